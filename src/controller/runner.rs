//! # Controller Runner
//!
//! Adapts a [`Reconcile`] implementation to the kube-runtime controller.
//!
//! Both reconcilers manage one named object that may not exist yet, while the
//! kube-runtime applier only reconciles objects it holds in its store. The controller
//! is therefore anchored on the managed namespace: every trigger maps to the namespace
//! and the reconciler reads its real objects itself.
//!
//! Failed cycles are requeued with exponential backoff; a successful cycle resets it.

use crate::controller::backoff::ExponentialBackoff;
use crate::controller::types::ReconcilerError;
use crate::observability;
use crate::runtime::error_policy::handle_reconciliation_error;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use kube_runtime::controller::Action;
use kube_runtime::reflector::ObjectRef;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::debug;

/// One level-triggered convergence step for a single managed object
#[async_trait]
pub trait Reconcile: Send + Sync + 'static {
    /// Controller name used in logs and metric labels
    fn name(&self) -> &'static str;

    /// Converge the managed object toward its desired state
    async fn reconcile(&self) -> Result<(), ReconcilerError>;
}

/// The object every trigger of a controller maps to
pub fn anchor_ref(namespace: &str) -> ObjectRef<Namespace> {
    ObjectRef::new(namespace)
}

#[derive(Debug)]
struct RetryState {
    backoff: ExponentialBackoff,
    /// Consecutive failed cycles
    failures: u32,
}

/// Shared state handed to every cycle of one controller
pub struct Context<R> {
    reconciler: R,
    retry: Mutex<RetryState>,
}

impl<R: Reconcile> std::fmt::Debug for Context<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("controller", &self.reconciler.name())
            .field("retry", &self.retry)
            .finish()
    }
}

impl<R: Reconcile> Context<R> {
    pub fn new(reconciler: R, backoff: ExponentialBackoff) -> Self {
        Self {
            reconciler,
            retry: Mutex::new(RetryState {
                backoff,
                failures: 0,
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.reconciler.name()
    }

    /// Consecutive failed cycles so far
    pub fn failures(&self) -> u32 {
        self.retry().failures
    }

    fn retry(&self) -> MutexGuard<'_, RetryState> {
        self.retry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Run one cycle; called by the controller for every trigger of the anchor
pub async fn reconcile<R: Reconcile>(
    _anchor: Arc<Namespace>,
    ctx: Arc<Context<R>>,
) -> Result<Action, ReconcilerError> {
    let name = ctx.name();
    let started = Instant::now();
    observability::metrics::increment_reconciliations(name);

    let result = ctx.reconciler.reconcile().await;
    observability::metrics::observe_reconciliation_duration(
        name,
        started.elapsed().as_secs_f64(),
    );
    result?;

    let mut retry = ctx.retry();
    retry.backoff.reset();
    retry.failures = 0;
    debug!("Reconciliation succeeded");
    Ok(Action::await_change())
}

/// Requeue a failed cycle after the next backoff delay
#[allow(
    clippy::needless_pass_by_value,
    reason = "Signature required by kube-runtime's Controller::run"
)]
pub fn error_policy<R: Reconcile>(
    _anchor: Arc<Namespace>,
    error: &ReconcilerError,
    ctx: Arc<Context<R>>,
) -> Action {
    let (delay, failures) = {
        let mut retry = ctx.retry();
        retry.failures = retry.failures.saturating_add(1);
        (retry.backoff.next_backoff(), retry.failures)
    };
    handle_reconciliation_error(ctx.name(), error, failures);
    Action::requeue(delay)
}
