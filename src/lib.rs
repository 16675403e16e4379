//! mesh-e2e - end-to-end test harness for Knative serving on a service mesh
//!
//! Tests run as one of several cluster roles, create mesh and networking
//! resources through a per-test [`TestContext`], and rely on the context to
//! remove everything again in reverse order when the test ends.
//!
//! # Example
//!
//! ```no_run
//! use mesh_e2e::mesh::allow_from_serving_system_namespace;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     mesh_e2e::telemetry::init_logging();
//!
//!     // Kubeconfigs come from KUBECONFIGS, one per role
//!     let ctx = mesh_e2e::setup_project_admin().await?;
//!
//!     ctx.create_network_policy(&allow_from_serving_system_namespace("serving-tests"))
//!         .await?;
//!
//!     // Your assertions here...
//!
//!     let report = ctx.cleanup().await;
//!     assert!(report.is_clean());
//!     Ok(())
//! }
//! ```
//!
//! # With the test macro
//!
//! ```ignore
//! #[mesh_e2e::test(role = "cluster-admin")]
//! async fn control_plane_comes_up(ctx: mesh_e2e::TestContext) {
//!     ctx.create_service_mesh_control_plane(&smcp).await.unwrap();
//!     ctx.wait_service_mesh_control_plane_ready("basic", "istio-system")
//!         .await
//!         .unwrap();
//! }
//! ```

pub mod cleanup;
pub mod clients;
pub mod config;
pub mod context;
pub mod interrupt;
pub mod mesh;
pub mod registry;
pub mod resource;
pub mod telemetry;
pub mod wait;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types
pub use cleanup::{CleanupError, CleanupReport, CleanupStack};
pub use clients::{ClientBundle, ClientTuning, Credential};
pub use config::{ConfigError, HarnessConfig};
pub use context::{cleanup_all, ContextError, Teardown, TestContext};
pub use registry::{
    setup, setup_cluster_admin, setup_edit, setup_project_admin, setup_view, Role, RoleRegistry,
    SetupError,
};
pub use resource::{DynamicAccessor, Gvr, ResourceAccessor, ResourceId, TypedAccessor};
pub use wait::{conditions, poll_until, PollSettings, WaitError};

// Re-export the test macro
pub use mesh_e2e_macros::test;

#[doc(hidden)]
pub use futures as __futures;
