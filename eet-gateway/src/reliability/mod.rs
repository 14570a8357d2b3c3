//! Bounded retries for optimistic concurrency.
//!
//! Vault read-modify-write cycles lose against concurrent writers from time
//! to time. They are retried here with a short exponential backoff up to a
//! configurable number of attempts; no other operation retries.

mod retry;

pub use retry::{RetryError, RetryPolicy, retry_with_backoff};
