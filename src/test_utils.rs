//! Test doubles for the Kubernetes API
//!
//! [`FakeApiServer`] is an in-memory API server behind a `tower::Service`,
//! plugged into a real `kube::Client`. [`ScriptedAccessor`] replays canned
//! fetch results for poller tests.

use crate::clients::{ClientBundle, Credential};
use crate::resource::{Gvr, ResourceAccessor};
use async_trait::async_trait;
use http::{Method, Request, Response, StatusCode};
use http_body_util::BodyExt;
use kube::client::Body;
use kube::Client;
use serde_json::{json, Value};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tower::Service;

/// Kubernetes `Status` reason for an HTTP status code
pub fn reason_for(code: u16) -> &'static str {
    match code {
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "NotFound",
        409 => "AlreadyExists",
        422 => "Invalid",
        _ => "InternalError",
    }
}

/// Build a `kube::Error::Api` with the given HTTP status code
pub fn api_error(code: u16) -> kube::Error {
    let reason = reason_for(code);
    kube::Error::Api(kube::core::ErrorResponse {
        status: "Failure".to_string(),
        message: format!("{reason} (HTTP {code})"),
        reason: reason.to_string(),
        code,
    })
}

fn status_json(code: u16, reason: &str, message: &str) -> String {
    json!({
        "kind": "Status",
        "apiVersion": "v1",
        "status": "Failure",
        "message": message,
        "reason": reason,
        "code": code
    })
    .to_string()
}

/// Merge `patch` into `target` following JSON Merge Patch semantics
fn merge(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                if value.is_null() {
                    target.remove(key);
                } else {
                    merge(target.entry(key.clone()).or_insert(Value::Null), value);
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

#[derive(Default)]
struct ServerState {
    objects: BTreeMap<String, Value>,
    requests: Vec<(String, String)>,
    failures: BTreeMap<(String, String), u16>,
    resource_version: u64,
}

/// An in-memory API server keyed by request path
///
/// `POST` to a collection stores the body under `<collection>/<name>`;
/// `GET`, `PATCH` (merge) and `DELETE` act on the stored object. Unknown
/// paths answer 404 with a `Status` body.
#[derive(Clone, Default)]
pub struct FakeApiServer {
    state: Arc<Mutex<ServerState>>,
}

impl FakeApiServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object at `path`
    pub fn with_object(self, path: &str, obj: Value) -> Self {
        self.state
            .lock()
            .unwrap()
            .objects
            .insert(path.to_string(), obj);
        self
    }

    /// Answer every `method` request on `path` with an error status
    pub fn failing(self, method: &str, path: &str, code: u16) -> Self {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert((method.to_string(), path.to_string()), code);
        self
    }

    /// Build a kube Client from this fake
    pub fn client(&self) -> Client {
        Client::new(self.clone(), "default")
    }

    /// Build a client bundle around this fake
    pub fn bundle(&self, source: &str) -> ClientBundle {
        Arc::new(self.credential(source)).connect().unwrap()
    }

    /// Credential whose bundles talk to this fake
    pub fn credential(&self, source: &str) -> Credential {
        Credential::fake(source, self.clone())
    }

    pub fn object(&self, path: &str) -> Option<Value> {
        self.state.lock().unwrap().objects.get(path).cloned()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.object(path).is_some()
    }

    /// Requests seen so far as `(method, path)`
    pub fn requests(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().requests.clone()
    }

    fn handle(&self, method: &Method, path: &str, body: &[u8]) -> (StatusCode, String) {
        let mut state = self.state.lock().unwrap();
        state
            .requests
            .push((method.to_string(), path.to_string()));

        if let Some(code) = state
            .failures
            .get(&(method.to_string(), path.to_string()))
            .copied()
        {
            let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            return (status, status_json(code, reason_for(code), "injected failure"));
        }

        let not_found = || {
            (
                StatusCode::NOT_FOUND,
                status_json(404, "NotFound", &format!("{path} not found")),
            )
        };

        match method {
            &Method::GET => match state.objects.get(path) {
                Some(obj) => (StatusCode::OK, obj.to_string()),
                None => not_found(),
            },
            &Method::POST => {
                let mut obj: Value = match serde_json::from_slice(body) {
                    Ok(obj) => obj,
                    Err(e) => {
                        return (
                            StatusCode::BAD_REQUEST,
                            status_json(400, "BadRequest", &e.to_string()),
                        )
                    }
                };
                let Some(name) = obj.pointer("/metadata/name").and_then(Value::as_str) else {
                    return (
                        StatusCode::UNPROCESSABLE_ENTITY,
                        status_json(422, "Invalid", "metadata.name is required"),
                    );
                };
                let key = format!("{path}/{name}");
                if state.objects.contains_key(&key) {
                    return (
                        StatusCode::CONFLICT,
                        status_json(409, "AlreadyExists", &format!("{name} already exists")),
                    );
                }
                state.resource_version += 1;
                obj["metadata"]["resourceVersion"] = json!(state.resource_version.to_string());
                obj["metadata"]["uid"] = json!(format!("uid-{}", state.resource_version));
                state.objects.insert(key, obj.clone());
                (StatusCode::CREATED, obj.to_string())
            }
            &Method::PATCH => {
                let patch: Value = serde_json::from_slice(body).unwrap_or(Value::Null);
                match state.objects.get_mut(path) {
                    Some(obj) => {
                        merge(obj, &patch);
                        (StatusCode::OK, obj.to_string())
                    }
                    None => not_found(),
                }
            }
            &Method::DELETE => match state.objects.remove(path) {
                Some(obj) => (StatusCode::OK, obj.to_string()),
                None => not_found(),
            },
            _ => (
                StatusCode::METHOD_NOT_ALLOWED,
                status_json(405, "MethodNotAllowed", "unsupported"),
            ),
        }
    }
}

impl Service<Request<Body>> for FakeApiServer {
    type Response = Response<Body>;
    type Error = tower::BoxError;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let server = self.clone();

        Box::pin(async move {
            let (parts, body) = req.into_parts();
            let bytes = body.collect().await?.to_bytes();
            let (status, body) = server.handle(&parts.method, parts.uri.path(), &bytes);

            let response = Response::builder()
                .status(status)
                .header("content-type", "application/json")
                .body(Body::from(body.into_bytes()))?;
            Ok(response)
        })
    }
}

/// Accessor replaying a script of fetch results
///
/// `Ok(obj)` is returned as-is, `Err(code)` becomes an API error with that
/// status. The last entry repeats once the script runs out.
#[derive(Clone)]
pub struct ScriptedAccessor {
    gvr: Gvr,
    script: Arc<Mutex<VecDeque<Result<Value, u16>>>>,
    fetches: Arc<AtomicUsize>,
}

impl ScriptedAccessor {
    pub fn sequence(script: Vec<Result<Value, u16>>) -> Self {
        assert!(!script.is_empty(), "script needs at least one entry");
        Self {
            gvr: Gvr::new("maistra.io", "v2", "servicemeshcontrolplanes", "ServiceMeshControlPlane"),
            script: Arc::new(Mutex::new(script.into())),
            fetches: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn always(result: Result<Value, u16>) -> Self {
        Self::sequence(vec![result])
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResourceAccessor for ScriptedAccessor {
    type Object = Value;

    fn gvr(&self) -> &Gvr {
        &self.gvr
    }

    fn namespace(&self) -> Option<&str> {
        Some("istio-system")
    }

    fn name_of(obj: &Value) -> Option<String> {
        obj.pointer("/metadata/name")
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    async fn create(&self, obj: &Value) -> Result<Value, kube::Error> {
        Ok(obj.clone())
    }

    async fn get(&self, _name: &str) -> Result<Value, kube::Error> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock().unwrap();
        let next = if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        };
        match next {
            Some(Ok(obj)) => Ok(obj),
            Some(Err(code)) => Err(api_error(code)),
            None => Err(api_error(404)),
        }
    }

    async fn delete(&self, _name: &str) -> Result<(), kube::Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::Namespace;
    use kube::Api;

    const NAMESPACE_PATH: &str = "/api/v1/namespaces/istio-system";

    async fn injected(code: u16) -> kube::core::ErrorResponse {
        let server = FakeApiServer::new().failing("GET", NAMESPACE_PATH, code);
        let api: Api<Namespace> = Api::all(server.client());

        match api.get("istio-system").await {
            Err(kube::Error::Api(status)) => status,
            other => panic!("expected API error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_injected_failure_reason_follows_code() {
        let forbidden = injected(403).await;
        assert_eq!(forbidden.code, 403);
        assert_eq!(forbidden.reason, "Forbidden");

        let conflict = injected(409).await;
        assert_eq!(conflict.reason, "AlreadyExists");

        let internal = injected(500).await;
        assert_eq!(internal.code, 500);
        assert_eq!(internal.reason, "InternalError");
    }

    #[test]
    fn test_api_error_matches_injected_reasons() {
        for code in [401, 403, 404, 409, 422, 500] {
            match api_error(code) {
                kube::Error::Api(status) => assert_eq!(status.reason, reason_for(code)),
                other => panic!("expected API error, got {other:?}"),
            }
        }
    }
}
