//! # Node IP Webhook
//!
//! Entry point for both deployments of the webhook.
//!
//! ```bash
//! # Keep the serving certificate and the MutatingWebhookConfiguration reconciled
//! node-ip-webhook controller
//!
//! # Serve admission reviews over HTTPS
//! node-ip-webhook webhook --port 10250
//! ```
//!
//! Settings come from environment variables (see `config`); flags override them.

use anyhow::Result;
use clap::{Parser, Subcommand};
use node_ip_webhook::config::{ControllerConfig, WebhookServerConfig};
use node_ip_webhook::runtime;

/// Self-managed TLS and node IP injection for Knative pods
#[derive(Parser)]
#[command(name = "node-ip-webhook", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Namespace of the certificate Secret and the webhook Service
    #[arg(short, long, global = true)]
    namespace: Option<String>,

    /// Port of the metrics and health server
    #[arg(long, global = true)]
    metrics_port: Option<u16>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the certificate and webhook configuration reconcilers
    Controller,
    /// Run the HTTPS admission server
    Webhook {
        /// HTTPS listen port
        #[arg(short, long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Controller => {
            let mut config = ControllerConfig::from_env();
            if let Some(namespace) = cli.namespace {
                config.objects.namespace = namespace;
            }
            if let Some(metrics_port) = cli.metrics_port {
                config.metrics_port = metrics_port;
            }
            runtime::run_controller(config).await
        }
        Commands::Webhook { port } => {
            let mut config = WebhookServerConfig::from_env();
            if let Some(namespace) = cli.namespace {
                config.objects.namespace = namespace;
            }
            if let Some(metrics_port) = cli.metrics_port {
                config.metrics_port = metrics_port;
            }
            if let Some(port) = port {
                config.port = port;
            }
            runtime::run_webhook(config).await
        }
    }
}
