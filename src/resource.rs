//! Resource identities and the accessors used to reach them
//!
//! Every resource the harness touches is addressed by a [`ResourceId`]:
//! group, version, resource (plural), namespace and name. Resources with a
//! generated Rust type go through [`TypedAccessor`]; everything else (mesh
//! CRDs, Istio networking objects) goes through [`DynamicAccessor`]. Both
//! implement [`ResourceAccessor`], so the creator and the poller do not care
//! which one they are given.

use crate::context::ContextError;
use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, PostParams};
use kube::core::{ApiResource, ClusterResourceScope, NamespaceResourceScope};
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;

/// `GroupVersionResource` identifies a Kubernetes resource type
///
/// Used with the dynamic client to work with CRDs and other resources
/// without compile-time type information.
///
/// # Example
///
/// ```
/// use mesh_e2e::Gvr;
///
/// let gvr = Gvr::new("maistra.io", "v1", "servicemeshmemberrolls", "ServiceMeshMemberRoll");
/// assert_eq!(gvr.api_version(), "maistra.io/v1");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Gvr {
    /// API group (e.g., "maistra.io", "" for core)
    pub group: String,
    /// API version (e.g., "v1", "v1alpha3")
    pub version: String,
    /// Resource name (plural, e.g., "servicemeshcontrolplanes")
    pub resource: String,
    /// Kind name (singular, e.g., "`ServiceMeshControlPlane`")
    pub kind: String,
}

impl Gvr {
    /// Create a new `GroupVersionResource`
    #[must_use]
    pub fn new(group: &str, version: &str, resource: &str, kind: &str) -> Self {
        Self {
            group: group.to_string(),
            version: version.to_string(),
            resource: resource.to_string(),
            kind: kind.to_string(),
        }
    }

    /// The `Gvr` of a generated resource type
    #[must_use]
    pub fn of<K>() -> Self
    where
        K: Resource<DynamicType = ()>,
    {
        Self::new(&K::group(&()), &K::version(&()), &K::plural(&()), &K::kind(&()))
    }

    /// `apiVersion` string as it appears in manifests
    #[must_use]
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// Convert to kube `ApiResource`
    #[must_use]
    pub fn to_api_resource(&self) -> ApiResource {
        ApiResource {
            group: self.group.clone(),
            version: self.version.clone(),
            api_version: self.api_version(),
            kind: self.kind.clone(),
            plural: self.resource.clone(),
        }
    }
}

/// Full coordinates of one resource: type, namespace and name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceId {
    pub gvr: Gvr,
    /// `None` for cluster-scoped resources
    pub namespace: Option<String>,
    pub name: String,
}

impl ResourceId {
    /// Build an identity, rejecting incomplete coordinates
    ///
    /// An empty `namespace` means the resource is cluster-scoped. The group
    /// may be empty (core API group); version, resource and name may not.
    pub fn new(
        gvr: Gvr,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<Self, ContextError> {
        let namespace = namespace.into();
        let name = name.into();

        if gvr.version.is_empty() || gvr.resource.is_empty() {
            return Err(ContextError::InvalidResourceRef(format!(
                "incomplete resource type {gvr:?}: version and resource are required"
            )));
        }
        if name.is_empty() {
            return Err(ContextError::InvalidResourceRef(format!(
                "{} without a name",
                gvr.kind
            )));
        }

        Ok(Self {
            gvr,
            namespace: (!namespace.is_empty()).then_some(namespace),
            name,
        })
    }

    /// Identity of a generated resource type
    pub fn of<K>(namespace: impl Into<String>, name: impl Into<String>) -> Result<Self, ContextError>
    where
        K: Resource<DynamicType = ()>,
    {
        Self::new(Gvr::of::<K>(), namespace, name)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.gvr.kind, ns, self.name),
            None => write!(f, "{} {}", self.gvr.kind, self.name),
        }
    }
}

/// True when the API answered 404 Not Found
#[must_use]
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

/// Create/get/delete capability over one resource type in one namespace
///
/// Implemented by [`TypedAccessor`] for generated types and by
/// [`DynamicAccessor`] for unstructured objects.
#[async_trait]
pub trait ResourceAccessor: Send + Sync {
    type Object: Clone + fmt::Debug + Serialize + Send + Sync + 'static;

    /// Type coordinates of the objects this accessor handles
    fn gvr(&self) -> &Gvr;

    /// Namespace the accessor is bound to, `None` when cluster-scoped
    fn namespace(&self) -> Option<&str>;

    /// `metadata.name` of an object
    fn name_of(obj: &Self::Object) -> Option<String>;

    async fn create(&self, obj: &Self::Object) -> Result<Self::Object, kube::Error>;

    async fn get(&self, name: &str) -> Result<Self::Object, kube::Error>;

    async fn delete(&self, name: &str) -> Result<(), kube::Error>;

    /// Identity of `name` under this accessor
    fn resource_id(&self, name: &str) -> Result<ResourceId, ContextError> {
        ResourceId::new(
            self.gvr().clone(),
            self.namespace().unwrap_or_default(),
            name,
        )
    }
}

/// Accessor backed by a generated resource type
#[derive(Clone)]
pub struct TypedAccessor<K> {
    api: Api<K>,
    gvr: Gvr,
    namespace: Option<String>,
}

impl<K> TypedAccessor<K>
where
    K: Resource<DynamicType = ()>,
{
    /// Accessor for a namespaced type in `namespace`
    #[must_use]
    pub fn namespaced(client: Client, namespace: &str) -> Self
    where
        K: Resource<Scope = NamespaceResourceScope>,
    {
        Self {
            api: Api::namespaced(client, namespace),
            gvr: Gvr::of::<K>(),
            namespace: Some(namespace.to_string()),
        }
    }

    /// Accessor for a cluster-scoped type
    #[must_use]
    pub fn cluster(client: Client) -> Self
    where
        K: Resource<Scope = ClusterResourceScope>,
    {
        Self {
            api: Api::all(client),
            gvr: Gvr::of::<K>(),
            namespace: None,
        }
    }
}

#[async_trait]
impl<K> ResourceAccessor for TypedAccessor<K>
where
    K: Resource<DynamicType = ()>
        + Clone
        + fmt::Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static,
{
    type Object = K;

    fn gvr(&self) -> &Gvr {
        &self.gvr
    }

    fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    fn name_of(obj: &K) -> Option<String> {
        obj.meta().name.clone()
    }

    async fn create(&self, obj: &K) -> Result<K, kube::Error> {
        self.api.create(&PostParams::default(), obj).await
    }

    async fn get(&self, name: &str) -> Result<K, kube::Error> {
        self.api.get(name).await
    }

    async fn delete(&self, name: &str) -> Result<(), kube::Error> {
        self.api
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
    }
}

/// Accessor backed by the dynamic client, for types without generated structs
#[derive(Clone)]
pub struct DynamicAccessor {
    api: Api<DynamicObject>,
    gvr: Gvr,
    namespace: Option<String>,
}

impl DynamicAccessor {
    /// Accessor for `gvr`, namespaced unless `namespace` is `None` or empty
    #[must_use]
    pub fn new(client: Client, gvr: &Gvr, namespace: Option<&str>) -> Self {
        let ar = gvr.to_api_resource();
        let namespace = namespace.filter(|ns| !ns.is_empty());
        let api = match namespace {
            Some(ns) => Api::namespaced_with(client, ns, &ar),
            None => Api::all_with(client, &ar),
        };

        Self {
            api,
            gvr: gvr.clone(),
            namespace: namespace.map(str::to_string),
        }
    }
}

#[async_trait]
impl ResourceAccessor for DynamicAccessor {
    type Object = DynamicObject;

    fn gvr(&self) -> &Gvr {
        &self.gvr
    }

    fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    fn name_of(obj: &DynamicObject) -> Option<String> {
        obj.metadata.name.clone()
    }

    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject, kube::Error> {
        self.api.create(&PostParams::default(), obj).await
    }

    async fn get(&self, name: &str) -> Result<DynamicObject, kube::Error> {
        self.api.get(name).await
    }

    async fn delete(&self, name: &str) -> Result<(), kube::Error> {
        self.api
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
    }
}
