use super::{ContextError, TestContext};
use crate::resource::{ResourceAccessor, ResourceId};
use crate::wait::{conditions, poll_until};
use kube::api::DynamicObject;
use kube::core::NamespaceResourceScope;
use kube::runtime::wait::Condition;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use tracing::Instrument;

impl TestContext {
    /// Poll `name` through any accessor until `condition` holds
    ///
    /// Uses this context's poll settings. Returns the last observed object,
    /// `None` when the condition was satisfied by absence.
    pub async fn wait_for<A, C>(
        &self,
        accessor: &A,
        name: &str,
        condition: C,
        condition_name: &str,
    ) -> Result<Option<A::Object>, ContextError>
    where
        A: ResourceAccessor + ?Sized,
        C: Condition<A::Object>,
    {
        poll_until(accessor, name, condition, self.poll, condition_name)
            .instrument(self.span.clone())
            .await
    }

    /// Wait for a namespaced typed resource to satisfy `condition`
    ///
    /// # Example
    ///
    /// ```ignore
    /// use k8s_openapi::api::networking::v1::NetworkPolicy;
    ///
    /// ctx.wait_for_state::<NetworkPolicy, _>(
    ///     "ns1",
    ///     "allow-from-serving-system-namespace",
    ///     |np: Option<&NetworkPolicy>| np.is_some(),
    /// )
    /// .await?;
    /// ```
    pub async fn wait_for_state<K, C>(
        &self,
        namespace: &str,
        name: &str,
        condition: C,
    ) -> Result<Option<K>, ContextError>
    where
        K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
            + Clone
            + Debug
            + Serialize
            + DeserializeOwned
            + Send
            + Sync
            + 'static,
        C: Condition<K>,
    {
        let accessor = self.bundle.typed::<K>(namespace);
        self.wait_for(&accessor, name, condition, "custom condition")
            .await
    }

    /// Wait for an unstructured object to satisfy `condition`
    pub async fn wait_for_unstructured_state<C>(
        &self,
        id: &ResourceId,
        condition: C,
    ) -> Result<Option<DynamicObject>, ContextError>
    where
        C: Condition<DynamicObject>,
    {
        let accessor = self.bundle.dynamic(&id.gvr, id.namespace.as_deref());
        self.wait_for(&accessor, &id.name, condition, "custom condition")
            .await
    }

    /// Wait until an unstructured object reports `Ready=True`
    ///
    /// A 404 while waiting means "not created yet", not failure.
    pub async fn wait_unstructured_ready(
        &self,
        id: &ResourceId,
    ) -> Result<DynamicObject, ContextError> {
        let accessor = self.bundle.dynamic(&id.gvr, id.namespace.as_deref());
        self.wait_for(
            &accessor,
            &id.name,
            conditions::is_ready::<DynamicObject>(),
            "is ready",
        )
        .await?
        .ok_or_else(|| ContextError::GetError(format!("{id} vanished after becoming ready")))
    }

    /// Wait until an unstructured object no longer exists
    pub async fn wait_unstructured_absent(&self, id: &ResourceId) -> Result<(), ContextError> {
        let accessor = self.bundle.dynamic(&id.gvr, id.namespace.as_deref());
        self.wait_for(
            &accessor,
            &id.name,
            conditions::does_not_exist::<DynamicObject>(),
            "does not exist",
        )
        .await?;
        Ok(())
    }
}
