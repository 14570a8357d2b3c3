//! Logging setup and the health report served by `/v1/ping`.

use std::io;

use eet_gateway::{ErrorKind, GatewayError};
use serde_json::{Value, json};
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Log format configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable pretty format for development.
    Pretty,
    /// JSON format for production log aggregation.
    Json,
}

impl LogFormat {
    /// Determines log format from environment.
    ///
    /// Checks `LOG_FORMAT` environment variable:
    /// - `json` => JSON format
    /// - `pretty` or unset => Pretty format
    #[must_use]
    pub fn from_env() -> Self {
        Self::parse(&std::env::var("LOG_FORMAT").unwrap_or_default())
    }

    fn parse(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Pretty,
        }
    }
}

/// Initializes structured logging.
///
/// # Environment Variables
///
/// - `LOG_FORMAT`: `json` or `pretty` (default: `pretty`)
/// - `RUST_LOG`: Log level filter (default: `info`)
pub fn init_observability(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Pretty => {
            subscriber
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_thread_ids(false)
                        .with_thread_names(false)
                        .with_span_events(FmtSpan::CLOSE)
                        .with_writer(io::stderr),
                )
                .init();
        }
        LogFormat::Json => {
            subscriber
                .with(
                    fmt::layer()
                        .json()
                        .with_current_span(true)
                        .with_span_list(true)
                        .with_target(true)
                        .with_thread_ids(false)
                        .with_thread_names(false)
                        .with_span_events(FmtSpan::CLOSE)
                        .with_writer(io::stderr),
                )
                .init();
        }
    }
}

/// Health of the whole gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// Every downstream answered.
    Healthy,
    /// At least one downstream failed.
    Unhealthy,
}

impl HealthStatus {
    /// Returns string representation for JSON serialization.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Unhealthy => "unhealthy",
        }
    }
}

/// Result of probing one downstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheck {
    /// `authority` or `vault`.
    pub name: &'static str,
    /// `None` when the probe passed.
    pub failure: Option<String>,
}

/// Health report for `/v1/ping`.
#[derive(Debug, Clone)]
pub struct HealthReport {
    /// Overall status.
    pub status: HealthStatus,
    /// Server version.
    pub version: &'static str,
    /// Uptime in seconds.
    pub uptime_secs: u64,
    /// One entry per downstream.
    pub checks: Vec<HealthCheck>,
}

impl HealthReport {
    /// Builds a report from the failures of a gateway ping.
    #[must_use]
    pub fn from_failures(failures: &[GatewayError], uptime_secs: u64) -> Self {
        let failure_of = |name: &str| {
            failures.iter().find(|err| downstream(err) == name).map(ToString::to_string)
        };
        let checks: Vec<HealthCheck> = ["authority", "vault"]
            .into_iter()
            .map(|name| HealthCheck { name, failure: failure_of(name) })
            .collect();
        let status =
            if failures.is_empty() { HealthStatus::Healthy } else { HealthStatus::Unhealthy };

        Self { status, version: env!("CARGO_PKG_VERSION"), uptime_secs, checks }
    }

    /// JSON body of the report.
    #[must_use]
    pub fn to_json(&self) -> Value {
        json!({
            "status": self.status.as_str(),
            "version": self.version,
            "uptime_secs": self.uptime_secs,
            "checks": self.checks.iter().map(|c| {
                let mut obj = json!({
                    "name": c.name,
                    "status": if c.failure.is_some() { "fail" } else { "pass" },
                });
                if let Some(msg) = &c.failure {
                    obj["message"] = Value::String(msg.clone());
                }
                obj
            }).collect::<Vec<_>>(),
        })
    }
}

fn downstream(err: &GatewayError) -> &'static str {
    match err.kind() {
        ErrorKind::AuthorityUnreachable => "authority",
        _ => "vault",
    }
}

#[cfg(test)]
mod tests {
    use eet_gateway::transport::TransportError;

    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse(""), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::parse("pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("unknown"), LogFormat::Pretty);
    }

    #[test]
    fn test_healthy_report() {
        let report = HealthReport::from_failures(&[], 3600);
        assert_eq!(report.status, HealthStatus::Healthy);

        let json = report.to_json();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["uptime_secs"], 3600);
        assert_eq!(json["checks"][0]["name"], "authority");
        assert_eq!(json["checks"][1]["status"], "pass");
        assert!(json["checks"][1].get("message").is_none());
    }

    #[test]
    fn test_report_names_failed_downstreams() {
        let failures = [
            GatewayError::AuthorityUnreachable(TransportError::Status(503)),
            GatewayError::VaultUnavailable("connection refused".to_owned()),
        ];
        let json = HealthReport::from_failures(&failures, 60).to_json();

        assert_eq!(json["status"], "unhealthy");
        assert_eq!(json["checks"][0]["status"], "fail");
        assert!(json["checks"][0]["message"].as_str().unwrap().contains("503"));
        assert_eq!(json["checks"][1]["message"], "credential vault unavailable: connection refused");
    }

    #[test]
    fn test_single_failure() {
        let failures = [GatewayError::VaultUnavailable("down".to_owned())];
        let report = HealthReport::from_failures(&failures, 1);
        assert_eq!(report.checks[0].failure, None);
        assert!(report.checks[1].failure.is_some());
    }
}
