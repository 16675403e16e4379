//! Logging setup for test runs
//!
//! Every [`TestContext`](crate::TestContext) logs under its own span, so a
//! formatted line shows which role did what. Filtering follows `RUST_LOG`.
//!
//! # Example
//!
//! ```no_run
//! use mesh_e2e::telemetry::init_logging;
//!
//! init_logging();
//! // Logs go to the test writer, captured per test unless --nocapture
//! ```

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset or invalid
pub const DEFAULT_FILTER: &str = "info,kube_client=warn";

/// Initialize logging with tracing-subscriber
///
/// Safe to call from every test; only the first call installs a subscriber.
pub fn init_logging() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)))
        .with(tracing_subscriber::fmt::layer().with_test_writer().with_target(false))
        .try_init();
}
