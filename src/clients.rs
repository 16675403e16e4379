//! Client bundles: one authenticated set of API handles per kubeconfig
//!
//! A [`Credential`] is loaded once per kubeconfig file and shared read-only
//! by every [`TestContext`](crate::TestContext) that runs as the matching
//! role. Each context opens a [`ClientBundle`] from it: the credential plus
//! a client whose tower stack carries a request-rate limit raised well above
//! what a single test needs, so polling-heavy suites are not throttled.

use crate::registry::SetupError;
use crate::resource::{DynamicAccessor, Gvr, TypedAccessor};
use kube::client::ClientBuilder;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::core::{ClusterResourceScope, NamespaceResourceScope};
use kube::{Client, Config, Resource};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tower::limit::RateLimitLayer;
use tracing::{debug, instrument};

/// Client-side request rate limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientTuning {
    /// Sustained requests per second
    pub qps: u64,
    /// Requests allowed in one burst window
    pub burst: u64,
}

impl Default for ClientTuning {
    fn default() -> Self {
        Self {
            qps: 100,
            burst: 200,
        }
    }
}

impl ClientTuning {
    /// Rate limit admitting `burst` requests per `burst / qps` seconds
    pub(crate) fn rate_limit_layer(&self) -> RateLimitLayer {
        let qps = self.qps.max(1);
        let burst = self.burst.max(qps);
        let window = Duration::from_millis(burst.saturating_mul(1000) / qps);
        RateLimitLayer::new(burst, window)
    }
}

/// How a [`Credential`] opens connections
#[derive(Clone)]
enum Transport {
    Http,
    #[cfg(test)]
    Fake(crate::test_utils::FakeApiServer),
}

/// A loaded kubeconfig with its client limits, not yet connected
///
/// Credentials are what the role registry caches for the whole process.
/// A `kube::Client` drives its connection from a task on the runtime that
/// built it, so clients are opened per test through [`Credential::connect`]
/// in the caller's runtime.
#[derive(Clone)]
pub struct Credential {
    source: PathBuf,
    config: Config,
    tuning: ClientTuning,
    transport: Transport,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("source", &self.source)
            .field("cluster_url", &self.config.cluster_url)
            .field("tuning", &self.tuning)
            .finish_non_exhaustive()
    }
}

impl Credential {
    pub fn new(source: impl Into<PathBuf>, config: Config, tuning: ClientTuning) -> Self {
        Self {
            source: source.into(),
            config,
            tuning,
            transport: Transport::Http,
        }
    }

    /// Credential whose clients talk to an in-memory API server
    #[cfg(test)]
    pub(crate) fn fake(source: impl Into<PathBuf>, server: crate::test_utils::FakeApiServer) -> Self {
        let config = Config::new(
            "http://127.0.0.1:6443"
                .parse()
                .expect("static url parses"),
        );
        Self {
            transport: Transport::Fake(server),
            ..Self::new(source, config, ClientTuning::default())
        }
    }

    /// Read a kubeconfig file into a connection config
    #[instrument(skip_all, fields(kubeconfig = %path.as_ref().display()))]
    pub async fn load(path: impl AsRef<Path>, tuning: ClientTuning) -> Result<Self, SetupError> {
        let path = path.as_ref();

        let kubeconfig = Kubeconfig::read_from(path).map_err(|source| SetupError::Kubeconfig {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|source| SetupError::Kubeconfig {
                path: path.to_path_buf(),
                source,
            })?;

        debug!(cluster = %config.cluster_url, "Loaded kubeconfig");
        Ok(Self::new(path, config, tuning))
    }

    /// Kubeconfig this credential was read from
    #[must_use]
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Raw connection config
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn tuning(&self) -> ClientTuning {
        self.tuning
    }

    /// Open a rate-limited client bundle on the current runtime
    ///
    /// Must be called from within a tokio runtime; the bundle stops working
    /// once that runtime shuts down.
    pub fn connect(self: &Arc<Self>) -> Result<ClientBundle, SetupError> {
        let client = match &self.transport {
            Transport::Http => ClientBuilder::try_from(self.config.clone())
                .map_err(|source| SetupError::Client {
                    path: self.source.clone(),
                    source,
                })?
                .with_layer(&self.tuning.rate_limit_layer())
                .build(),
            #[cfg(test)]
            Transport::Fake(server) => server.client(),
        };

        debug!(
            kubeconfig = %self.source.display(),
            cluster = %self.config.cluster_url,
            qps = self.tuning.qps,
            burst = self.tuning.burst,
            "Opened client bundle"
        );

        Ok(ClientBundle::new(self.clone(), client))
    }
}

/// Authenticated handles for a single credential
pub struct ClientBundle {
    credential: Arc<Credential>,
    client: Client,
}

impl std::fmt::Debug for ClientBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBundle")
            .field("source", &self.credential.source)
            .field("cluster_url", &self.credential.config.cluster_url)
            .field("default_namespace", &self.credential.config.default_namespace)
            .finish_non_exhaustive()
    }
}

impl ClientBundle {
    /// Pair a credential with a client that was opened elsewhere
    pub fn new(credential: Arc<Credential>, client: Client) -> Self {
        Self { credential, client }
    }

    /// Read a kubeconfig file and open every handle from it
    ///
    /// Fails on the first handle that cannot be built.
    pub async fn from_kubeconfig(
        path: impl AsRef<Path>,
        tuning: ClientTuning,
    ) -> Result<Self, SetupError> {
        Arc::new(Credential::load(path, tuning).await?).connect()
    }

    /// Open the rate-limited client for an already loaded config
    pub fn from_config(
        source: impl Into<PathBuf>,
        config: Config,
        tuning: ClientTuning,
    ) -> Result<Self, SetupError> {
        Arc::new(Credential::new(source, config, tuning)).connect()
    }

    /// Credential this bundle was opened from
    #[must_use]
    pub fn credential(&self) -> &Arc<Credential> {
        &self.credential
    }

    /// Kubeconfig this bundle was built from
    #[must_use]
    pub fn source(&self) -> &Path {
        self.credential.source()
    }

    /// Raw connection config
    #[must_use]
    pub fn config(&self) -> &Config {
        self.credential.config()
    }

    /// Shared client (cheap to clone)
    #[must_use]
    pub fn client(&self) -> Client {
        self.client.clone()
    }

    /// Namespace the kubeconfig selects by default
    #[must_use]
    pub fn default_namespace(&self) -> &str {
        &self.credential.config.default_namespace
    }

    /// Typed accessor for a namespaced resource type
    #[must_use]
    pub fn typed<K>(&self, namespace: &str) -> TypedAccessor<K>
    where
        K: Resource<DynamicType = (), Scope = NamespaceResourceScope>,
    {
        TypedAccessor::namespaced(self.client(), namespace)
    }

    /// Typed accessor for a cluster-scoped resource type
    #[must_use]
    pub fn typed_cluster<K>(&self) -> TypedAccessor<K>
    where
        K: Resource<DynamicType = (), Scope = ClusterResourceScope>,
    {
        TypedAccessor::cluster(self.client())
    }

    /// Dynamic accessor for resources without generated types
    #[must_use]
    pub fn dynamic(&self, gvr: &Gvr, namespace: Option<&str>) -> DynamicAccessor {
        DynamicAccessor::new(self.client(), gvr, namespace)
    }
}
