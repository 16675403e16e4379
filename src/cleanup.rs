//! Ordered, best-effort teardown
//!
//! Every resource a test creates registers an undo action on a
//! [`CleanupStack`]. Draining runs the actions newest-first, so anything
//! that depends on an earlier resource is removed before that resource.
//! A failing action is logged and recorded; the rest still run.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Error returned by a cleanup action
pub type CleanupError = Box<dyn std::error::Error + Send + Sync>;

type Action = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), CleanupError>> + Send>;

struct CleanupAction {
    label: String,
    run: Action,
}

/// Outcome of draining a cleanup stack
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Number of actions that ran
    pub attempted: usize,
    /// `label: error` for every action that failed
    pub failed: Vec<String>,
}

impl CleanupReport {
    /// True when every action succeeded
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// LIFO stack of teardown actions
#[derive(Default)]
pub struct CleanupStack {
    actions: Mutex<Vec<CleanupAction>>,
}

impl CleanupStack {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<CleanupAction>> {
        self.actions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register an action; it runs before everything registered earlier
    pub fn push<F, Fut, E>(&self, label: impl Into<String>, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<CleanupError>,
    {
        let label = label.into();
        debug!(action = %label, "Registered cleanup");
        self.lock().push(CleanupAction {
            label,
            run: Box::new(move || action().map(|r| r.map_err(Into::into)).boxed()),
        });
    }

    /// Number of actions not yet run
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Run every pending action, newest first
    ///
    /// Never fails: errors are logged and collected into the report.
    /// Actions registered while draining run too, ahead of older ones.
    pub async fn drain(&self) -> CleanupReport {
        let mut report = CleanupReport::default();

        loop {
            let Some(action) = self.lock().pop() else {
                break;
            };

            report.attempted += 1;
            debug!(action = %action.label, "Running cleanup");

            if let Err(e) = (action.run)().await {
                warn!(action = %action.label, error = %e, "Failed to clean up");
                report.failed.push(format!("{}: {e}", action.label));
            }
        }

        report
    }
}

impl Drop for CleanupStack {
    fn drop(&mut self) {
        let actions = self
            .actions
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if !actions.is_empty() {
            let labels: Vec<&str> = actions.iter().map(|a| a.label.as_str()).collect();
            warn!(
                pending = actions.len(),
                actions = ?labels,
                "Cleanup stack dropped without draining"
            );
        }
    }
}
