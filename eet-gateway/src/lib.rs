//! EET Gateway: signing and verifying front end for the Czech electronic
//! sales registry (EET).
//!
//! Cash registers hand the gateway a sale in plain JSON. The gateway computes
//! the security codes, wraps the sale in a WS-Security signed SOAP envelope,
//! sends it to the registry and verifies the signed answer before returning
//! the fiscal identification code (FIK).
//!
//! Merchant key pairs never leave the gateway in the clear: they are imported
//! once from a PKCS#12 bundle and kept in a credential vault, sealed under a
//! password only the cash register knows.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  Cash register  │  JSON over the REST API (eet-gateway-server)
//! └────────┬────────┘
//!          │
//! ┌────────▼────────────────────────────────────────┐
//! │               GatewayCore (this crate)          │
//! │  ┌──────────┐  ┌──────────┐  ┌──────────────┐   │
//! │  │  sale    │──│  soap    │──│  transport   │   │
//! │  │ (codes)  │  │ (sign /  │  │  (HTTPS)     │   │
//! │  └──────────┘  │  verify) │  └──────────────┘   │
//! │                └──────────┘                     │
//! │  ┌─────────────────────────────┐                │
//! │  │ vault (sealed key pairs)    │── Redis        │
//! │  └─────────────────────────────┘                │
//! └────────┬────────────────────────────────────────┘
//!          │ SOAP 1.1 + WS-Security, TLS 1.3
//! ┌────────▼────────┐
//! │  EET registry   │
//! └─────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use eet_gateway::{
//!     config::GatewayConfig,
//!     gateway::GatewayCore,
//!     sale::Sale,
//!     soap::ResponseVerifier,
//!     transport::HttpTransport,
//!     vault::{CredentialVault, StoreBackend},
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example(sale: Sale) -> Result<(), Box<dyn std::error::Error>> {
//! let config = GatewayConfig::from_file("eet-gateway.toml")?;
//!
//! let store = StoreBackend::connect(&config.vault).await?;
//! let vault = CredentialVault::with_policy(store, config.vault.retry_policy());
//! let transport = HttpTransport::with_config(config.endpoint()?, &config.authority)?;
//! let verifier = ResponseVerifier::new(
//!     Arc::new(config.trust.authority_pool()?),
//!     config.trust.authority_organization.clone(),
//! );
//! let gateway = GatewayCore::new(vault, transport, config.merchant_pool()?, verifier);
//!
//! let response = gateway.send_sale(&CancellationToken::new(), "shop-1", b"secret", sale).await?;
//! println!("FIK: {:?}", response.fik());
//! # Ok(())
//! # }
//! ```
//!
//! # Module Organization
//!
//! - [`gateway`]: the orchestrating [`GatewayCore`](gateway::GatewayCore)
//! - [`sale`]: the sale record, its validation and the PKP/BKP codes
//! - [`soap`]: envelope construction, WS-Security signing and response verification
//! - [`xml`]: a small namespace-aware DOM and exclusive canonicalization
//! - [`certs`]: PKCS#12 import and pinned root pools
//! - [`vault`]: sealed key-pair storage over Redis or memory
//! - [`transport`]: the HTTPS client for the registry
//! - [`reliability`]: bounded retry with backoff
//! - [`config`]: TOML configuration
//! - [`error`]: the error taxonomy
//!
//! # Security Considerations
//!
//! - **TLS 1.3 only** towards the registry, HTTPS enforced
//! - **Pinned trust**: merchant bundles must chain to configured roots; the
//!   registry's response certificate must chain to its own pinned roots and
//!   carry the configured organisation name
//! - **Sealed at rest**: AES-256-GCM, key derived from the caller's password
//! - **No automatic resend**: a sale is sent at most once per call

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod certs;
pub mod config;
pub mod error;
pub mod gateway;
pub mod reliability;
pub mod sale;
pub mod soap;
pub mod transport;
pub mod vault;
pub mod xml;

#[cfg(test)]
mod test_support;

pub use error::{ErrorKind, GatewayError, Result};
pub use gateway::GatewayCore;
