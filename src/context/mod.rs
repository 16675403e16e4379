//! Per-test handle: role, clients, log span and cleanup stack
//!
//! A [`TestContext`] is resolved from the role registry at the start of a
//! test. Everything it creates registers an undo action, and
//! [`TestContext::cleanup`] runs them newest-first when the test ends.
//!
//! # Errors
//!
//! Fallible operations return [`ContextError`], whose messages name the
//! resource kind and name involved.

#![allow(clippy::missing_errors_doc)]

mod crud;
mod patching;
mod waiting;

pub use crud::Teardown;

use crate::cleanup::{CleanupError, CleanupReport, CleanupStack};
use crate::clients::ClientBundle;
use crate::registry::Role;
use crate::wait::PollSettings;
use kube::Client;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, info_span, warn, Instrument, Span};

/// Per-test handle bundling a role, its clients and a cleanup stack
///
/// # Example
///
/// ```ignore
/// let ctx = mesh_e2e::setup_cluster_admin().await?;
///
/// ctx.create_unstructured(&Gvr::service_mesh_member_roll(), &roll).await?;
///
/// let report = ctx.cleanup().await;
/// assert!(report.is_clean());
/// ```
pub struct TestContext {
    role: Role,
    bundle: Arc<ClientBundle>,
    cleanup: CleanupStack,
    span: Span,
    poll: PollSettings,
}

impl std::fmt::Debug for TestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestContext")
            .field("role", &self.role)
            .field("bundle", &self.bundle)
            .field("pending_cleanups", &self.cleanup.len())
            .field("poll", &self.poll)
            .finish_non_exhaustive()
    }
}

impl TestContext {
    /// Context acting as `role` through `bundle`
    #[must_use]
    pub fn new(role: Role, bundle: Arc<ClientBundle>) -> Self {
        let span = info_span!(
            "test_context",
            role = %role,
            kubeconfig = %bundle.source().display()
        );
        Self {
            role,
            bundle,
            cleanup: CleanupStack::new(),
            span,
            poll: PollSettings::default(),
        }
    }

    /// Override the default wait cadence
    #[must_use]
    pub fn with_poll_settings(mut self, poll: PollSettings) -> Self {
        self.poll = poll;
        self
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Role name, e.g. "ProjectAdmin"
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.role.name()
    }

    /// Shared client bundle for this role
    #[must_use]
    pub fn clients(&self) -> &Arc<ClientBundle> {
        &self.bundle
    }

    #[must_use]
    pub fn client(&self) -> Client {
        self.bundle.client()
    }

    /// Span that every operation of this context logs under
    #[must_use]
    pub fn span(&self) -> &Span {
        &self.span
    }

    #[must_use]
    pub fn poll_settings(&self) -> PollSettings {
        self.poll
    }

    /// Register an undo action; it runs before everything registered earlier
    pub fn add_cleanup<F, Fut, E>(&self, label: impl Into<String>, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<CleanupError>,
    {
        let _entered = self.span.enter();
        self.cleanup.push(label, action);
    }

    /// Number of undo actions not yet run
    #[must_use]
    pub fn pending_cleanups(&self) -> usize {
        self.cleanup.len()
    }

    /// Run every pending undo action, newest first
    ///
    /// Failures are logged and listed in the report; they never fail the
    /// test.
    pub async fn cleanup(&self) -> CleanupReport {
        let report = self.cleanup.drain().instrument(self.span.clone()).await;

        self.span.in_scope(|| {
            if report.is_clean() {
                info!(actions = report.attempted, "Cleanup complete");
            } else {
                warn!(
                    actions = report.attempted,
                    failed = report.failed.len(),
                    "Cleanup finished with failures"
                );
            }
        });

        report
    }
}

/// Drain several contexts one after another, in the order given
pub async fn cleanup_all<'a>(
    contexts: impl IntoIterator<Item = &'a TestContext>,
) -> Vec<CleanupReport> {
    let mut reports = Vec::new();
    for ctx in contexts {
        reports.push(ctx.cleanup().await);
    }
    reports
}

/// Errors from context operations
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("Failed to create resource: {0}")]
    CreateError(String),

    #[error("Failed to get resource: {0}")]
    GetError(String),

    #[error("Failed to delete resource: {0}")]
    DeleteError(String),

    #[error("Failed to patch resource: {0}")]
    PatchError(String),

    #[error("Invalid resource reference: {0}")]
    InvalidResourceRef(String),

    #[error("{0}")]
    WaitTimeout(#[from] crate::wait::WaitError),
}

/// Improve a kube error message with human-readable context
///
/// Recognizes common API failures and names the resource kind and name in
/// the message.
pub(crate) fn improve_error_message(
    err: &kube::Error,
    resource_kind: &str,
    resource_name: &str,
) -> String {
    if let kube::Error::Api(ae) = err {
        match ae.code {
            404 => return format!("{resource_kind} '{resource_name}' not found"),
            409 => return format!("{resource_kind} '{resource_name}' already exists"),
            401 => {
                return format!("{resource_kind} '{resource_name}': unauthorized (check kubeconfig)")
            }
            403 => {
                return format!("{resource_kind} '{resource_name}': permission denied (check RBAC)")
            }
            422 => {
                return format!(
                    "{resource_kind} '{resource_name}': rejected by the API server: {}",
                    ae.message
                )
            }
            _ => {}
        }
    }

    let raw = err.to_string();

    if raw.contains("no matches for kind") || raw.contains("the server could not find") {
        return format!(
            "{resource_kind} '{resource_name}': resource type not served (is the operator installed?)"
        );
    }

    if raw.contains("connection refused") || raw.contains("ECONNREFUSED") {
        return format!("{resource_kind} '{resource_name}': cannot connect to Kubernetes API");
    }

    if raw.contains("timeout") || raw.contains("deadline exceeded") {
        return format!("{resource_kind} '{resource_name}': operation timed out");
    }

    format!("{resource_kind} '{resource_name}': {raw}")
}
