//! # Watch Loop
//!
//! Long-running watch tasks: the reconcile controllers and the plain reflector the
//! admission server reads its certificate from.
//!
//! Both restart after `restart_delay` if their stream ever ends before shutdown.

use crate::controller::events::object_changes;
use crate::controller::runner::{error_policy, reconcile, Context, Reconcile};
use crate::runtime::error_policy::handle_watch_stream_error;
use crate::runtime::shutdown::Shutdown;
use futures::{Stream, StreamExt};
use k8s_openapi::api::core::v1::Namespace;
use kube::api::Api;
use kube::Resource;
use kube_runtime::controller::{self, Controller};
use kube_runtime::reflector::store::Writer;
use kube_runtime::{watcher, WatchStreamExt};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::IntervalStream;
use tracing::{debug, error, info, warn, Instrument};

/// Watcher config selecting exactly the object called `name`
pub fn single_object_config(name: &str) -> watcher::Config {
    watcher::Config::default().fields(&format!("metadata.name={name}"))
}

/// Changes of the object `name` as seen by a backed-off watch
///
/// `namespace` is `None` for cluster-scoped objects.
pub fn watch_object<K>(
    api: Api<K>,
    namespace: Option<&str>,
    name: &str,
) -> impl Stream<Item = Result<K, watcher::Error>> + Send + 'static
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + 'static,
{
    let events = watcher(api, single_object_config(name)).default_backoff();
    object_changes(events, namespace.map(str::to_string), name.to_string())
}

/// Controller anchored on the managed namespace
///
/// With `resync` set, every period reconciles again without a trigger. The controller
/// stops taking new triggers once `shutdown` fires and drains the running cycle.
pub fn anchored_controller(
    namespace_api: Api<Namespace>,
    namespace: &str,
    resync: Option<Duration>,
    shutdown: Shutdown,
) -> Controller<Namespace> {
    let mut controller = Controller::new(namespace_api, single_object_config(namespace));
    if let Some(period) = resync.filter(|period| !period.is_zero()) {
        let ticks = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        controller = controller.reconcile_all_on(IntervalStream::new(ticks).map(|_| ()));
    }
    controller.graceful_shutdown_on(async move { shutdown.wait().await })
}

/// Drive a controller until `shutdown` fires
///
/// `build` is called for every (re)start; a [`Controller`] is consumed by running it.
pub async fn run_reconciler<R, F>(
    build: F,
    ctx: Arc<Context<R>>,
    restart_delay: Duration,
    shutdown: Shutdown,
) where
    R: Reconcile,
    F: Fn() -> Controller<Namespace> + Send + Sync,
{
    let name = ctx.name();
    let controller_span = tracing::info_span!("controller.run", controller = name);

    async move {
        loop {
            info!("Starting {} controller...", name);
            build()
                .run(reconcile::<R>, error_policy::<R>, Arc::clone(&ctx))
                .for_each(|result| {
                    match result {
                        Ok((anchor, action)) => {
                            debug!(anchor = %anchor, ?action, "Reconciled");
                        }
                        // Already logged and counted by the error policy
                        Err(controller::Error::ReconcilerFailed(e, _)) => {
                            debug!("Cycle failed: {}", e);
                        }
                        Err(controller::Error::QueueError(e)) => {
                            handle_watch_stream_error(name, &e);
                        }
                        Err(controller::Error::ObjectNotFound(anchor)) => {
                            warn!(anchor = %anchor, "Anchor namespace not in cache, skipping trigger");
                        }
                        Err(e) => error!("Controller error: {}", e),
                    }
                    futures::future::ready(())
                })
                .await;

            if shutdown.is_triggered() {
                break;
            }
            warn!(
                "{} controller stream ended, restarting in {:?}...",
                name, restart_delay
            );
            tokio::select! {
                () = shutdown.wait() => break,
                () = tokio::time::sleep(restart_delay) => {}
            }
        }
        info!("{} controller stopped", name);
    }
    .instrument(controller_span)
    .await;
}

/// Keep `writer`'s store current until `shutdown` fires
///
/// Stream errors are logged and the watcher backs off on its own.
pub async fn run_reflector<K>(
    api: Api<K>,
    config: watcher::Config,
    mut writer: Writer<K>,
    restart_delay: Duration,
    shutdown: Shutdown,
) where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    let watched = K::kind(&()).into_owned();
    let watch_span = tracing::info_span!("controller.watch", watched = %watched);

    async move {
        'watch: loop {
            info!("Starting watch of {}...", watched);
            let stream = watcher(api.clone(), config.clone()).default_backoff();
            futures::pin_mut!(stream);

            loop {
                tokio::select! {
                    () = shutdown.wait() => break 'watch,
                    next = stream.next() => match next {
                        Some(Ok(event)) => writer.apply_watcher_event(&event),
                        Some(Err(e)) => handle_watch_stream_error(&watched, &e),
                        None => break,
                    },
                }
            }

            warn!(
                "Watch stream of {} ended, restarting in {:?}...",
                watched, restart_delay
            );
            tokio::select! {
                () = shutdown.wait() => break 'watch,
                () = tokio::time::sleep(restart_delay) => {}
            }
        }

        info!("Watch of {} stopped", watched);
    }
    .instrument(watch_span)
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_object_config_selects_by_name() {
        let config = single_object_config("webhook-cert");
        assert_eq!(
            config.field_selector.as_deref(),
            Some("metadata.name=webhook-cert")
        );
    }
}
