use super::{improve_error_message, ContextError, TestContext};
use crate::resource::ResourceId;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, DynamicObject, Patch, PatchParams};
use serde_json::json;
use tracing::{info, Instrument};

impl TestContext {
    /// Set one label on a namespace using JSON Merge Patch
    ///
    /// # Example
    ///
    /// ```ignore
    /// ctx.label_namespace(
    ///     "knative-serving",
    ///     mesh_e2e::mesh::SYSTEM_NAMESPACE_LABEL,
    ///     "true",
    /// )
    /// .await?;
    /// ```
    pub async fn label_namespace(
        &self,
        namespace: &str,
        key: &str,
        value: &str,
    ) -> Result<Namespace, ContextError> {
        let api: Api<Namespace> = Api::all(self.client());
        let patch = json!({ "metadata": { "labels": { key: value } } });

        let patched = api
            .patch(namespace, &PatchParams::default(), &Patch::Merge(&patch))
            .instrument(self.span.clone())
            .await
            .map_err(|e| {
                ContextError::PatchError(improve_error_message(&e, "Namespace", namespace))
            })?;

        self.span.in_scope(|| {
            info!(namespace = %namespace, label = %key, value = %value, "Labelled namespace");
        });

        Ok(patched)
    }

    /// Merge-patch an unstructured object
    ///
    /// Fields set to `null` in `patch` are removed; everything else is merged.
    pub async fn patch_unstructured(
        &self,
        id: &ResourceId,
        patch: &serde_json::Value,
    ) -> Result<DynamicObject, ContextError> {
        let ar = id.gvr.to_api_resource();
        let api: Api<DynamicObject> = match &id.namespace {
            Some(ns) => Api::namespaced_with(self.client(), ns, &ar),
            None => Api::all_with(self.client(), &ar),
        };

        let patched = api
            .patch(&id.name, &PatchParams::default(), &Patch::Merge(patch))
            .instrument(self.span.clone())
            .await
            .map_err(|e| {
                ContextError::PatchError(improve_error_message(&e, &id.gvr.kind, &id.name))
            })?;

        self.span.in_scope(|| info!(resource = %id, "Patched resource"));

        Ok(patched)
    }
}
