//! Role registry: which credential a test runs as
//!
//! Kubeconfigs are positional. The first belongs to a cluster admin, the
//! second to a project admin, then edit and view users. The registry loads
//! one [`Credential`] per file the first time any test asks for a context
//! and hands the same credentials to every later caller.
//!
//! # Example
//!
//! ```ignore
//! let ctx = mesh_e2e::setup_project_admin().await?;
//! ctx.create_network_policy(&policy).await?;
//! ctx.cleanup().await;
//! ```

use crate::clients::{ClientBundle, Credential};
use crate::config::{ConfigError, HarnessConfig};
use crate::context::TestContext;
use kube::config::KubeconfigError;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;

/// Identity a test acts as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    ClusterAdmin,
    ProjectAdmin,
    Edit,
    View,
}

impl Role {
    /// Every role in credential order
    pub const ALL: [Role; 4] = [Role::ClusterAdmin, Role::ProjectAdmin, Role::Edit, Role::View];

    /// Position of this role's kubeconfig in the configured list
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Role::ClusterAdmin => 0,
            Role::ProjectAdmin => 1,
            Role::Edit => 2,
            Role::View => 3,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Role::ClusterAdmin => "ClusterAdmin",
            Role::ProjectAdmin => "ProjectAdmin",
            Role::Edit => "Edit",
            Role::View => "View",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Role {
    type Err = String;

    /// Accepts `ClusterAdmin`, `cluster-admin`, `cluster_admin` and so on
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_ascii_lowercase();

        match normalized.as_str() {
            "clusteradmin" => Ok(Role::ClusterAdmin),
            "projectadmin" => Ok(Role::ProjectAdmin),
            "edit" => Ok(Role::Edit),
            "view" => Ok(Role::View),
            _ => Err(format!(
                "unknown role '{s}', expected one of: ClusterAdmin, ProjectAdmin, Edit, View"
            )),
        }
    }
}

/// Fatal errors while preparing clients for a test run
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to load kubeconfig {}: {source}", .path.display())]
    Kubeconfig {
        path: PathBuf,
        source: KubeconfigError,
    },

    #[error("failed to build client from {}: {source}", .path.display())]
    Client { path: PathBuf, source: kube::Error },

    #[error("no kubeconfigs configured")]
    NoKubeconfigs,

    #[error("kubeconfig for user with {0} role not present")]
    MissingCredential(Role),

    #[error("role registry used before bootstrap")]
    NotBootstrapped,
}

/// Lazily loaded list of credentials, indexed by [`Role`]
///
/// Only credentials are cached. Every resolved context opens its own
/// [`ClientBundle`] on the runtime it runs on, so a registry bootstrapped by
/// one `#[tokio::test]` keeps working in the next.
pub struct RoleRegistry {
    credentials: OnceCell<Vec<Arc<Credential>>>,
}

impl Default for RoleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RoleRegistry {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            credentials: OnceCell::const_new(),
        }
    }

    /// True once a bootstrap has succeeded
    #[must_use]
    pub fn is_bootstrapped(&self) -> bool {
        self.credentials.initialized()
    }

    /// Load a credential for every configured kubeconfig, once per registry
    pub async fn bootstrap(
        &self,
        config: &HarnessConfig,
    ) -> Result<&[Arc<Credential>], SetupError> {
        let tuning = config.tuning;
        self.bootstrap_with(&config.kubeconfigs, move |path| {
            Credential::load(path, tuning)
        })
        .await
    }

    /// [`bootstrap`](Self::bootstrap) with a custom credential loader
    ///
    /// The loader runs once per path, in order, and only until the first
    /// successful bootstrap. A failure leaves the registry empty so a later
    /// call can try again.
    pub async fn bootstrap_with<F, Fut>(
        &self,
        paths: &[PathBuf],
        loader: F,
    ) -> Result<&[Arc<Credential>], SetupError>
    where
        F: Fn(PathBuf) -> Fut,
        Fut: Future<Output = Result<Credential, SetupError>>,
    {
        let credentials = self
            .credentials
            .get_or_try_init(|| async {
                if paths.is_empty() {
                    return Err(SetupError::NoKubeconfigs);
                }

                let mut credentials = Vec::with_capacity(paths.len());
                for path in paths {
                    credentials.push(Arc::new(loader(path.clone()).await?));
                }

                let available: Vec<&str> = Role::ALL
                    .iter()
                    .take(credentials.len())
                    .map(|r| r.name())
                    .collect();
                info!(
                    kubeconfigs = credentials.len(),
                    roles = ?available,
                    "Bootstrapped role credentials"
                );

                Ok(credentials)
            })
            .await?;

        Ok(credentials)
    }

    /// Shared credential for `role`
    pub fn credential(&self, role: Role) -> Result<Arc<Credential>, SetupError> {
        let credentials = self.credentials.get().ok_or(SetupError::NotBootstrapped)?;
        credentials
            .get(role.index())
            .cloned()
            .ok_or(SetupError::MissingCredential(role))
    }

    /// Open a client bundle for `role` on the current runtime
    pub fn bundle(&self, role: Role) -> Result<ClientBundle, SetupError> {
        self.credential(role)?.connect()
    }

    /// Bootstrap if needed and return a fresh context for `role`
    pub async fn context(
        &self,
        role: Role,
        config: &HarnessConfig,
    ) -> Result<TestContext, SetupError> {
        self.bootstrap(config).await?;
        let bundle = self.bundle(role)?;
        Ok(TestContext::new(role, Arc::new(bundle)).with_poll_settings(config.poll))
    }
}

static REGISTRY: RoleRegistry = RoleRegistry::new();

/// The process-wide registry used by the `setup_*` functions
#[must_use]
pub fn global() -> &'static RoleRegistry {
    &REGISTRY
}

/// Context for `role`, configured from the environment
pub async fn setup(role: Role) -> Result<TestContext, SetupError> {
    let config = HarnessConfig::from_env()?;
    REGISTRY.context(role, &config).await
}

pub async fn setup_cluster_admin() -> Result<TestContext, SetupError> {
    setup(Role::ClusterAdmin).await
}

pub async fn setup_project_admin() -> Result<TestContext, SetupError> {
    setup(Role::ProjectAdmin).await
}

pub async fn setup_edit() -> Result<TestContext, SetupError> {
    setup(Role::Edit).await
}

pub async fn setup_view() -> Result<TestContext, SetupError> {
    setup(Role::View).await
}
