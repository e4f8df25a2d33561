//! # Initialization
//!
//! Process startup shared by both subcommands: rustls setup, tracing, metrics, the
//! health server, and the Kubernetes client.

use crate::observability;
use crate::runtime::shutdown::Shutdown;
use crate::server::{start_server, ServerState};
use anyhow::{Context, Result};
use kube::Client;
use std::sync::Arc;
use tracing::{error, info};

/// What every subcommand needs once startup succeeded
pub struct InitializationResult {
    /// Kubernetes client
    pub client: Client,
    /// Server state for health checks
    pub server_state: Arc<ServerState>,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("server_ready", &self.server_state.is_ready())
            .finish_non_exhaustive()
    }
}

/// Install the ring crypto provider for rustls
///
/// Must run before anything creates a TLS connection. Installing twice is harmless.
pub fn install_crypto_provider() {
    // Err means a provider is already installed
    let _ = rustls::crypto::ring::default_provider().install_default();
}

/// Initialize the tracing subscriber
///
/// `RUST_LOG` controls the filter (default `node_ip_webhook=info`); `log_format`
/// picks `json` or human-readable `text` output.
pub fn init_tracing(log_format: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "node_ip_webhook=info".into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = if log_format.eq_ignore_ascii_case("text") {
        builder.try_init()
    } else {
        builder.json().flatten_event(true).try_init()
    };
    if let Err(e) = result {
        eprintln!("Tracing subscriber already initialized: {e}");
    }
}

/// Common startup for `component`
///
/// Startup failures are fatal: without API access there is nothing useful to do.
pub async fn initialize(
    component: &str,
    log_format: &str,
    metrics_port: u16,
    shutdown: Shutdown,
) -> Result<InitializationResult> {
    install_crypto_provider();
    init_tracing(log_format);

    info!("Starting node-ip-webhook {}", component);
    info!(
        "Build info: timestamp={}, datetime={}, git_hash={}",
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );

    observability::metrics::register_metrics().context("Failed to register metrics")?;

    let server_state = Arc::new(ServerState::default());
    let server_state_clone = Arc::clone(&server_state);
    tokio::spawn(async move {
        if let Err(e) = start_server(metrics_port, server_state_clone, shutdown).await {
            error!("HTTP server error: {}", e);
        }
    });

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    Ok(InitializationResult {
        client,
        server_state,
    })
}
