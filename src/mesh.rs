//! Service mesh resources: well-known types and create helpers
//!
//! Maistra and Istio objects have no generated Rust types, so they are
//! handled as [`DynamicObject`]s addressed by the [`Gvr`]s below. Each
//! `create_*` helper picks the teardown a resource needs: control planes
//! take a while to go away, so their cleanup waits for absence.

use crate::context::{ContextError, TestContext};
use crate::resource::{Gvr, ResourceId};
use k8s_openapi::api::networking::v1::{
    NetworkPolicy, NetworkPolicyIngressRule, NetworkPolicyPeer, NetworkPolicySpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::{DynamicObject, ObjectMeta};
use std::collections::BTreeMap;

/// Label marking the namespaces Knative system components run in
pub const SYSTEM_NAMESPACE_LABEL: &str = "knative.openshift.io/system-namespace";

/// Name of the policy built by [`allow_from_serving_system_namespace`]
pub const ALLOW_FROM_SERVING_SYSTEM_NAMESPACE: &str = "allow-from-serving-system-namespace";

const MAISTRA_GROUP: &str = "maistra.io";
const ISTIO_NETWORKING_GROUP: &str = "networking.istio.io";
const ISTIO_NETWORKING_VERSION: &str = "v1alpha3";

impl Gvr {
    #[must_use]
    pub fn service_mesh_control_plane_v1() -> Self {
        Self::new(MAISTRA_GROUP, "v1", "servicemeshcontrolplanes", "ServiceMeshControlPlane")
    }

    #[must_use]
    pub fn service_mesh_control_plane_v2() -> Self {
        Self::new(MAISTRA_GROUP, "v2", "servicemeshcontrolplanes", "ServiceMeshControlPlane")
    }

    #[must_use]
    pub fn service_mesh_member_roll() -> Self {
        Self::new(MAISTRA_GROUP, "v1", "servicemeshmemberrolls", "ServiceMeshMemberRoll")
    }

    #[must_use]
    pub fn istio_gateway() -> Self {
        Self::new(ISTIO_NETWORKING_GROUP, ISTIO_NETWORKING_VERSION, "gateways", "Gateway")
    }

    #[must_use]
    pub fn istio_virtual_service() -> Self {
        Self::new(
            ISTIO_NETWORKING_GROUP,
            ISTIO_NETWORKING_VERSION,
            "virtualservices",
            "VirtualService",
        )
    }

    #[must_use]
    pub fn istio_service_entry() -> Self {
        Self::new(
            ISTIO_NETWORKING_GROUP,
            ISTIO_NETWORKING_VERSION,
            "serviceentries",
            "ServiceEntry",
        )
    }
}

/// Control plane type matching the object's `apiVersion` (v1 unless it says v2)
fn control_plane_gvr(smcp: &DynamicObject) -> Gvr {
    match smcp.types.as_ref().map(|t| t.api_version.as_str()) {
        Some("maistra.io/v2") => Gvr::service_mesh_control_plane_v2(),
        _ => Gvr::service_mesh_control_plane_v1(),
    }
}

/// NetworkPolicy admitting ingress from namespaces labelled as Knative
/// system namespaces
///
/// Needed in mesh-enabled namespaces so the activator and other serving
/// components can still reach workloads.
#[must_use]
pub fn allow_from_serving_system_namespace(namespace: &str) -> NetworkPolicy {
    NetworkPolicy {
        metadata: ObjectMeta {
            name: Some(ALLOW_FROM_SERVING_SYSTEM_NAMESPACE.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(NetworkPolicySpec {
            ingress: Some(vec![NetworkPolicyIngressRule {
                from: Some(vec![NetworkPolicyPeer {
                    namespace_selector: Some(LabelSelector {
                        match_labels: Some(BTreeMap::from([(
                            SYSTEM_NAMESPACE_LABEL.to_string(),
                            "true".to_string(),
                        )])),
                        ..Default::default()
                    }),
                    ..Default::default()
                }]),
                ..Default::default()
            }]),
            policy_types: Some(vec!["Ingress".to_string()]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

impl TestContext {
    /// Create a `ServiceMeshControlPlane`; cleanup waits until it is gone
    pub async fn create_service_mesh_control_plane(
        &self,
        smcp: &DynamicObject,
    ) -> Result<DynamicObject, ContextError> {
        self.create_unstructured_awaiting_removal(&control_plane_gvr(smcp), smcp)
            .await
    }

    /// Wait until a v2 `ServiceMeshControlPlane` reports `Ready=True`
    pub async fn wait_service_mesh_control_plane_ready(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<DynamicObject, ContextError> {
        let id = ResourceId::new(Gvr::service_mesh_control_plane_v2(), namespace, name)?;
        self.wait_unstructured_ready(&id).await
    }

    pub async fn create_service_mesh_member_roll(
        &self,
        smmr: &DynamicObject,
    ) -> Result<DynamicObject, ContextError> {
        self.create_unstructured(&Gvr::service_mesh_member_roll(), smmr)
            .await
    }

    pub async fn create_istio_gateway(
        &self,
        gateway: &DynamicObject,
    ) -> Result<DynamicObject, ContextError> {
        self.create_unstructured(&Gvr::istio_gateway(), gateway)
            .await
    }

    pub async fn create_istio_virtual_service(
        &self,
        virtual_service: &DynamicObject,
    ) -> Result<DynamicObject, ContextError> {
        self.create_unstructured(&Gvr::istio_virtual_service(), virtual_service)
            .await
    }

    pub async fn create_istio_service_entry(
        &self,
        service_entry: &DynamicObject,
    ) -> Result<DynamicObject, ContextError> {
        self.create_unstructured(&Gvr::istio_service_entry(), service_entry)
            .await
    }

    /// Create a NetworkPolicy in its own namespace and register its deletion
    pub async fn create_network_policy(
        &self,
        policy: &NetworkPolicy,
    ) -> Result<NetworkPolicy, ContextError> {
        if policy.metadata.namespace.as_deref().unwrap_or_default().is_empty() {
            return Err(ContextError::InvalidResourceRef(format!(
                "NetworkPolicy {} has no namespace",
                policy.metadata.name.as_deref().unwrap_or("<unnamed>")
            )));
        }
        self.create(policy).await
    }
}
