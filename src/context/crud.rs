use super::{improve_error_message, ContextError, TestContext};
use crate::resource::{is_not_found, Gvr, ResourceAccessor, ResourceId, TypedAccessor};
use crate::wait::{conditions, poll_until, PollSettings};
use kube::api::DynamicObject;
use kube::core::{ClusterResourceScope, NamespaceResourceScope};
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use tracing::{debug, info, Instrument};

/// How a created resource is removed during cleanup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Teardown {
    /// Issue a delete and move on
    #[default]
    Delete,
    /// Delete, then wait until the API no longer returns the object
    ///
    /// For resources whose controllers finish teardown asynchronously, such
    /// as mesh control planes, so later steps do not race the finalizers.
    DeleteAndAwaitAbsence,
}

/// Delete `name`, counting "already gone" as success
async fn delete_if_present<A>(accessor: &A, name: &str) -> Result<(), ContextError>
where
    A: ResourceAccessor + ?Sized,
{
    match accessor.delete(name).await {
        Ok(()) => Ok(()),
        Err(e) if is_not_found(&e) => {
            debug!(kind = %accessor.gvr().kind, name = %name, "Already deleted");
            Ok(())
        }
        Err(e) => Err(ContextError::DeleteError(improve_error_message(
            &e,
            &accessor.gvr().kind,
            name,
        ))),
    }
}

async fn teardown<A>(
    accessor: &A,
    name: &str,
    mode: Teardown,
    poll: PollSettings,
) -> Result<(), ContextError>
where
    A: ResourceAccessor,
{
    delete_if_present(accessor, name).await?;

    if mode == Teardown::DeleteAndAwaitAbsence {
        poll_until(
            accessor,
            name,
            conditions::does_not_exist::<A::Object>(),
            poll,
            "does not exist",
        )
        .await?;
    }

    Ok(())
}

impl TestContext {
    /// Create `body` through `accessor` and register its removal
    ///
    /// The undo action targets the name the server returned. Creation is
    /// not retried; a failure comes back as [`ContextError::CreateError`].
    pub async fn create_with<A>(
        &self,
        accessor: A,
        body: &A::Object,
        mode: Teardown,
    ) -> Result<A::Object, ContextError>
    where
        A: ResourceAccessor + Clone + 'static,
    {
        let kind = accessor.gvr().kind.clone();
        let requested = A::name_of(body).unwrap_or_default();

        let created = accessor
            .create(body)
            .instrument(self.span.clone())
            .await
            .map_err(|e| {
                ContextError::CreateError(improve_error_message(&e, &kind, &requested))
            })?;

        let name = A::name_of(&created).ok_or_else(|| {
            ContextError::InvalidResourceRef(format!("{kind} created without a name"))
        })?;
        let id = accessor.resource_id(&name)?;

        self.span.in_scope(|| {
            info!(resource = %id, teardown = ?mode, "Created resource");
        });

        let poll = self.poll;
        self.add_cleanup(format!("delete {id}"), move || async move {
            teardown(&accessor, &name, mode, poll).await
        });

        Ok(created)
    }

    /// Create a namespaced resource and register its deletion
    ///
    /// Uses the namespace in the object's metadata, falling back to the
    /// kubeconfig's default namespace.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let policy = mesh_e2e::mesh::allow_from_serving_system_namespace("ns1");
    /// ctx.create(&policy).await?;
    /// ```
    pub async fn create<K>(&self, resource: &K) -> Result<K, ContextError>
    where
        K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
            + Clone
            + Debug
            + Serialize
            + DeserializeOwned
            + Send
            + Sync
            + 'static,
    {
        self.create_typed(resource, Teardown::Delete).await
    }

    /// [`create`](Self::create) with an explicit teardown mode
    pub async fn create_typed<K>(&self, resource: &K, mode: Teardown) -> Result<K, ContextError>
    where
        K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
            + Clone
            + Debug
            + Serialize
            + DeserializeOwned
            + Send
            + Sync
            + 'static,
    {
        let namespace = resource
            .meta()
            .namespace
            .clone()
            .filter(|ns| !ns.is_empty())
            .unwrap_or_else(|| self.bundle.default_namespace().to_string());

        self.create_with(self.bundle.typed::<K>(&namespace), resource, mode)
            .await
    }

    /// Create a cluster-scoped resource and register its deletion
    pub async fn create_cluster<K>(&self, resource: &K) -> Result<K, ContextError>
    where
        K: Resource<DynamicType = (), Scope = ClusterResourceScope>
            + Clone
            + Debug
            + Serialize
            + DeserializeOwned
            + Send
            + Sync
            + 'static,
    {
        let accessor: TypedAccessor<K> = self.bundle.typed_cluster();
        self.create_with(accessor, resource, Teardown::Delete).await
    }

    /// Create an unstructured object of type `gvr` and register its deletion
    ///
    /// `metadata.namespace` selects the namespace; leave it unset for
    /// cluster-scoped types.
    pub async fn create_unstructured(
        &self,
        gvr: &Gvr,
        object: &DynamicObject,
    ) -> Result<DynamicObject, ContextError> {
        self.create_unstructured_with(gvr, object, Teardown::Delete)
            .await
    }

    /// Like [`create_unstructured`](Self::create_unstructured), but cleanup
    /// waits until the object is really gone
    pub async fn create_unstructured_awaiting_removal(
        &self,
        gvr: &Gvr,
        object: &DynamicObject,
    ) -> Result<DynamicObject, ContextError> {
        self.create_unstructured_with(gvr, object, Teardown::DeleteAndAwaitAbsence)
            .await
    }

    async fn create_unstructured_with(
        &self,
        gvr: &Gvr,
        object: &DynamicObject,
        mode: Teardown,
    ) -> Result<DynamicObject, ContextError> {
        let mut object = object.clone();
        if object.types.is_none() {
            object.types = Some(kube::core::TypeMeta {
                api_version: gvr.api_version(),
                kind: gvr.kind.clone(),
            });
        }

        let accessor = self
            .bundle
            .dynamic(gvr, object.metadata.namespace.as_deref());
        self.create_with(accessor, &object, mode).await
    }

    /// Fetch an unstructured object by identity
    pub async fn get_unstructured(&self, id: &ResourceId) -> Result<DynamicObject, ContextError> {
        self.bundle
            .dynamic(&id.gvr, id.namespace.as_deref())
            .get(&id.name)
            .instrument(self.span.clone())
            .await
            .map_err(|e| ContextError::GetError(improve_error_message(&e, &id.gvr.kind, &id.name)))
    }

    /// Delete an unstructured object by identity
    ///
    /// Unlike registered cleanups, a missing object is an error here.
    pub async fn delete_unstructured(&self, id: &ResourceId) -> Result<(), ContextError> {
        self.bundle
            .dynamic(&id.gvr, id.namespace.as_deref())
            .delete(&id.name)
            .instrument(self.span.clone())
            .await
            .map_err(|e| {
                ContextError::DeleteError(improve_error_message(&e, &id.gvr.kind, &id.name))
            })?;

        self.span.in_scope(|| info!(resource = %id, "Deleted resource"));
        Ok(())
    }
}
