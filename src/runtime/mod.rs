//! # Runtime
//!
//! Process wiring for the two subcommands.
//!
//! - `initialization`: rustls, tracing, metrics, health server and Kubernetes client
//! - `watch_loop`: Controllers and the certificate reflector, restarted until shutdown
//! - `error_policy`: Error classification and logging
//! - `shutdown`: Process-wide shutdown signal

pub mod error_policy;
pub mod initialization;
pub mod shutdown;
pub mod watch_loop;

use crate::admission::handler;
use crate::admission::tls::{server_config, SecretCertResolver};
use crate::config::{ControllerConfig, WebhookServerConfig};
use crate::controller::backoff::ExponentialBackoff;
use crate::controller::client::{NamedApi, ObjectClient};
use crate::controller::runner::{anchor_ref, Context};
use crate::controller::secret::SecretReconciler;
use crate::controller::webhook::WebhookReconciler;
use anyhow::{Context as _, Result};
use axum_server::tls_rustls::RustlsConfig;
use k8s_openapi::api::admissionregistration::v1::MutatingWebhookConfiguration;
use k8s_openapi::api::core::v1::{Namespace, Secret};
use kube::api::Api;
use kube_runtime::reflector;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{error, info};
use watch_loop::{
    anchored_controller, run_reconciler, run_reflector, single_object_config, watch_object,
};

/// How long in-flight admission requests get to finish after shutdown starts
const ADMISSION_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Run the Secret and Webhook reconcilers until SIGINT/SIGTERM
pub async fn run_controller(config: ControllerConfig) -> Result<()> {
    let (trigger, shutdown) = shutdown::channel();
    shutdown::spawn_signal_handler(trigger);

    let init = initialization::initialize(
        "controller",
        &config.log_format,
        config.metrics_port,
        shutdown.clone(),
    )
    .await?;
    let certificate = config.certificate.validated();
    let objects = &config.objects;
    info!(
        secret.namespace = %objects.namespace,
        secret.name = %objects.secret_name,
        webhook.name = %objects.webhook_name,
        "Managing webhook certificate and configuration"
    );

    let namespace_api: Api<Namespace> = Api::all(init.client.clone());
    let secret_api: Api<Secret> = Api::namespaced(init.client.clone(), &objects.namespace);
    let webhook_api: Api<MutatingWebhookConfiguration> = Api::all(init.client.clone());

    let secret_client: Arc<dyn ObjectClient<Secret>> =
        Arc::new(NamedApi::new(secret_api.clone(), &objects.secret_name));
    let webhook_client: Arc<dyn ObjectClient<MutatingWebhookConfiguration>> =
        Arc::new(NamedApi::new(webhook_api.clone(), &objects.webhook_name));

    let backoff =
        || ExponentialBackoff::new(config.backoff_start_duration(), config.backoff_max_duration());
    let secret_ctx = Arc::new(Context::new(
        SecretReconciler::new(Arc::clone(&secret_client), objects.clone(), certificate),
        backoff(),
    ));
    let webhook_ctx = Arc::new(Context::new(
        WebhookReconciler::new(secret_client, webhook_client, objects),
        backoff(),
    ));

    // Secret controller: the Secret itself, plus the periodic expiry check
    let build_secret_controller = {
        let (namespace_api, secret_api) = (namespace_api.clone(), secret_api.clone());
        let (objects, shutdown) = (objects.clone(), shutdown.clone());
        let resync = config.resync_interval();
        move || {
            let anchor = anchor_ref(&objects.namespace);
            anchored_controller(
                namespace_api.clone(),
                &objects.namespace,
                Some(resync),
                shutdown.clone(),
            )
            .watches_stream(
                watch_object(secret_api.clone(), Some(&objects.namespace), &objects.secret_name),
                move |_| Some(anchor.clone()),
            )
        }
    };

    // Webhook controller: the Secret it reads and the configuration it writes
    let build_webhook_controller = {
        let objects = objects.clone();
        let shutdown = shutdown.clone();
        move || {
            let secret_anchor = anchor_ref(&objects.namespace);
            let webhook_anchor = anchor_ref(&objects.namespace);
            anchored_controller(
                namespace_api.clone(),
                &objects.namespace,
                None,
                shutdown.clone(),
            )
            .watches_stream(
                watch_object(secret_api.clone(), Some(&objects.namespace), &objects.secret_name),
                move |_| Some(secret_anchor.clone()),
            )
            .watches_stream(
                watch_object(webhook_api.clone(), None, &objects.webhook_name),
                move |_| Some(webhook_anchor.clone()),
            )
        }
    };

    let restart_delay = config.watch_restart_delay_duration();
    let mut tasks = JoinSet::new();
    tasks.spawn(run_reconciler(
        build_secret_controller,
        secret_ctx,
        restart_delay,
        shutdown.clone(),
    ));
    tasks.spawn(run_reconciler(
        build_webhook_controller,
        webhook_ctx,
        restart_delay,
        shutdown,
    ));

    init.server_state.set_ready(true);
    info!("Controllers started");

    while let Some(result) = tasks.join_next().await {
        if let Err(e) = result {
            error!("Controller task failed: {}", e);
        }
    }

    info!("Controller stopped gracefully");
    Ok(())
}

/// Serve admission reviews over HTTPS until SIGINT/SIGTERM
pub async fn run_webhook(config: WebhookServerConfig) -> Result<()> {
    let (trigger, shutdown) = shutdown::channel();
    shutdown::spawn_signal_handler(trigger);

    let init = initialization::initialize(
        "webhook",
        &config.log_format,
        config.metrics_port,
        shutdown.clone(),
    )
    .await?;
    let objects = &config.objects;

    let secret_api: Api<Secret> = Api::namespaced(init.client.clone(), &objects.namespace);
    let (secret_store, secret_writer) = reflector::store();
    tokio::spawn(run_reflector(
        secret_api,
        single_object_config(&objects.secret_name),
        secret_writer,
        config.watch_restart_delay_duration(),
        shutdown.clone(),
    ));

    info!(
        secret.namespace = %objects.namespace,
        secret.name = %objects.secret_name,
        "Waiting for certificate secret cache to sync..."
    );
    tokio::select! {
        ready = secret_store.wait_until_ready() => {
            ready.context("Secret watch stopped before its cache synced")?;
        }
        () = shutdown.wait() => {
            info!("Shutdown requested before the secret cache synced");
            return Ok(());
        }
    }

    let resolver = Arc::new(SecretCertResolver::new(
        secret_store,
        &objects.namespace,
        &objects.secret_name,
    ));
    let tls_config = server_config(resolver).context("Failed to build TLS configuration")?;
    let rustls_config = RustlsConfig::from_config(Arc::new(tls_config));

    let handle = axum_server::Handle::new();
    let shutdown_handle = handle.clone();
    let server_state = Arc::clone(&init.server_state);
    tokio::spawn(async move {
        shutdown.wait().await;
        server_state.set_ready(false);
        info!("Draining in-flight admission requests...");
        shutdown_handle.graceful_shutdown(Some(ADMISSION_SHUTDOWN_GRACE));
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Admission server listening on {}", addr);
    init.server_state.set_ready(true);

    axum_server::bind_rustls(addr, rustls_config)
        .handle(handle)
        .serve(handler::router().into_make_service())
        .await
        .context("Admission server failed")?;

    info!("Admission server stopped gracefully");
    Ok(())
}
