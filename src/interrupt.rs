//! Emergency teardown on Ctrl-C
//!
//! A test run interrupted from the terminal would otherwise leave mesh
//! control planes and policies behind. [`cleanup_on_interrupt`] spawns a
//! listener that runs a caller-supplied teardown once and exits with
//! status 1.
//!
//! The listener does not know about any [`TestContext`](crate::TestContext);
//! the caller decides what the teardown drains.
//!
//! # Example
//!
//! ```ignore
//! let admin = Arc::new(mesh_e2e::setup_cluster_admin().await?);
//! let for_interrupt = admin.clone();
//! mesh_e2e::interrupt::cleanup_on_interrupt(move || async move {
//!     for_interrupt.cleanup().await;
//! });
//! ```

use std::future::Future;
use tokio::task::JoinHandle;
use tracing::{error, warn};

/// Exit status used when a run is interrupted
pub const INTERRUPT_EXIT_CODE: i32 = 1;

/// Run `teardown` and exit the process when SIGINT arrives
pub fn cleanup_on_interrupt<F, Fut>(teardown: F) -> JoinHandle<()>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(run_on_signal(tokio::signal::ctrl_c(), teardown, || {
        std::process::exit(INTERRUPT_EXIT_CODE);
    }))
}

/// Wait for `signal`, then run `teardown` once and call `exit`
///
/// If the signal listener itself fails nothing else happens.
pub(crate) async fn run_on_signal<S, F, Fut, X>(signal: S, teardown: F, exit: X)
where
    S: Future<Output = std::io::Result<()>>,
    F: FnOnce() -> Fut,
    Fut: Future<Output = ()>,
    X: FnOnce(),
{
    match signal.await {
        Ok(()) => {
            warn!("Test interrupted, cleaning up");
            teardown().await;
            exit();
        }
        Err(e) => {
            error!(error = %e, "Failed to listen for interrupt signal");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CleanupError, Role, TestContext};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_signal_runs_teardown_then_exit() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let teardown_order = order.clone();
        let exit_order = order.clone();

        run_on_signal(
            async { Ok(()) },
            move || async move {
                teardown_order.lock().unwrap().push("teardown");
            },
            move || exit_order.lock().unwrap().push("exit"),
        )
        .await;

        assert_eq!(*order.lock().unwrap(), vec!["teardown", "exit"]);
    }

    #[tokio::test]
    async fn test_listener_error_skips_teardown() {
        let calls = Arc::new(AtomicUsize::new(0));
        let teardown_calls = calls.clone();
        let exit_calls = calls.clone();

        run_on_signal(
            async { Err(std::io::Error::new(std::io::ErrorKind::Other, "no signal support")) },
            move || async move {
                teardown_calls.fetch_add(1, Ordering::SeqCst);
            },
            move || {
                exit_calls.fetch_add(1, Ordering::SeqCst);
            },
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_teardown_not_run_before_signal() {
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let calls = Arc::new(AtomicUsize::new(0));
        let teardown_calls = calls.clone();

        let listener = tokio::spawn(run_on_signal(
            async move { rx.await.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)) },
            move || async move {
                teardown_calls.fetch_add(1, Ordering::SeqCst);
            },
            || {},
        ));

        tokio::task::yield_now().await;
        assert_eq!(calls.load(Ordering::SeqCst), 0, "No teardown before the signal");

        tx.send(()).expect("Listener should be waiting");
        listener.await.expect("Listener task should finish");
        assert_eq!(calls.load(Ordering::SeqCst), 1, "Teardown runs exactly once");
    }

    fn context_with_cleanups(log: &Arc<std::sync::Mutex<Vec<String>>>) -> TestContext {
        let server = crate::test_utils::FakeApiServer::new();
        let ctx = TestContext::new(
            Role::ClusterAdmin,
            Arc::new(server.bundle("/creds/admin.kubeconfig")),
        );
        for label in ["control-plane", "member-roll", "gateway"] {
            let log = log.clone();
            ctx.add_cleanup(label, move || async move {
                log.lock().unwrap().push(label.to_string());
                Ok::<(), CleanupError>(())
            });
        }
        ctx
    }

    #[tokio::test]
    async fn test_interrupt_leaves_unwired_context_alone() {
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let ctx = context_with_cleanups(&log);
        let teardown_log = log.clone();

        run_on_signal(
            async { Ok(()) },
            move || async move {
                teardown_log.lock().unwrap().push("teardown".to_string());
            },
            || {},
        )
        .await;

        assert_eq!(*log.lock().unwrap(), vec!["teardown"]);
        assert_eq!(ctx.pending_cleanups(), 3, "Context stack is not touched");

        let report = ctx.cleanup().await;
        assert_eq!(report.attempted, 3);
    }

    #[tokio::test]
    async fn test_interrupt_drains_wired_context_once_before_exit() {
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let ctx = Arc::new(context_with_cleanups(&log));
        let wired = ctx.clone();
        let exit_log = log.clone();

        run_on_signal(
            async { Ok(()) },
            move || async move {
                wired.cleanup().await;
            },
            move || exit_log.lock().unwrap().push("exit".to_string()),
        )
        .await;

        assert_eq!(
            *log.lock().unwrap(),
            vec!["gateway", "member-roll", "control-plane", "exit"]
        );
        assert_eq!(ctx.pending_cleanups(), 0);
        assert_eq!(ctx.cleanup().await.attempted, 0, "Nothing left to drain");
    }
}
