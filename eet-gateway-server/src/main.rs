//! EET gateway server.
//!
//! Loads the TOML configuration, connects the credential vault, pins the
//! trust anchors and serves the REST API until SIGINT/SIGTERM.

mod api;
mod observability;

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::Parser;
use eet_gateway::{
    GatewayCore,
    config::GatewayConfig,
    soap::ResponseVerifier,
    transport::HttpTransport,
    vault::{CredentialVault, StoreBackend},
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::observability::{LogFormat, init_observability};

#[derive(Debug, Parser)]
#[command(name = "eet-gateway", version, about = "Signing gateway for the Czech EET sales registry")]
struct Cli {
    /// Configuration file.
    #[arg(short, long, default_value = "eet-gateway.toml")]
    config: PathBuf,

    /// Listen address, overriding `server.listen`.
    #[arg(short, long)]
    listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_observability(LogFormat::from_env());

    let config = GatewayConfig::from_file(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let gateway = build_gateway(&config).await?;

    let shutdown = CancellationToken::new();
    let app = api::router(gateway, shutdown.clone()).layer(TraceLayer::new_for_http());

    let listen = cli.listen.unwrap_or(config.server.listen);
    let listener = TcpListener::bind(listen).await.with_context(|| format!("binding {listen}"))?;
    info!(%listen, environment = ?config.environment, "EET gateway listening");

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal(shutdown)).await?;
    info!("EET gateway stopped");
    Ok(())
}

async fn build_gateway(config: &GatewayConfig) -> anyhow::Result<GatewayCore<StoreBackend, HttpTransport>> {
    let store = StoreBackend::connect(&config.vault).await.context("connecting credential vault")?;
    let vault =
        CredentialVault::with_policy(store, config.vault.retry_policy()).with_namespace(config.vault.namespace.clone());

    let endpoint = config.endpoint()?;
    let transport = HttpTransport::with_config(endpoint, &config.authority)?;

    let merchant_roots = config.merchant_pool().context("loading merchant roots")?;
    let authority_roots = config.trust.authority_pool().context("loading authority roots")?;
    info!(
        environment = ?config.environment,
        merchant_roots = merchant_roots.len(),
        authority_roots = authority_roots.len(),
        endpoint = %transport.endpoint(),
        "trust anchors pinned"
    );
    let verifier = ResponseVerifier::new(Arc::new(authority_roots), config.trust.authority_organization.clone());

    Ok(GatewayCore::new(vault, transport, merchant_roots, verifier))
}

/// Resolves on Ctrl-C or SIGTERM and cancels in-flight operations.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutdown requested");
    shutdown.cancel();
}
