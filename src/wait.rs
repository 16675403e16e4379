//! Polling waits with rich timeout errors
//!
//! [`poll_until`] fetches a resource at a fixed interval and evaluates a
//! [`Condition`] over it until the condition holds or the timeout elapses.
//! Conditions see `Option<&K>`: `None` means the API answered 404.
//!
//! # Example
//!
//! ```ignore
//! use mesh_e2e::wait::conditions;
//!
//! let smcp = ctx
//!     .wait_for_unstructured_state(&id, conditions::is_ready())
//!     .await?;
//! ```
//!
//! When a wait times out the error shows what was last seen:
//!
//! ```text
//! Wait timeout for ServiceMeshControlPlane istio-system/basic (is ready)
//! ├─ Last state: Ready=False (ComponentsNotReady)
//! ├─ Elapsed: 300.2s
//! └─ Timeout: 300s
//! ```

use crate::context::{improve_error_message, ContextError};
use crate::resource::{is_not_found, ResourceAccessor};
use kube::runtime::wait::Condition;
use std::fmt;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::debug;

/// Polling cadence and overall bound for a wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(300),
        }
    }
}

impl PollSettings {
    /// Set the polling interval
    #[must_use]
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the overall timeout
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Rich error context for a wait that ran out of time
#[derive(Debug, Clone)]
pub struct WaitError {
    /// Resource reference (e.g., "ServiceMeshControlPlane istio-system/basic")
    pub resource: String,
    /// What was being waited for
    pub condition: String,
    /// Description of the last observed state
    pub last_state: String,
    /// Last object seen, if any
    pub last_observed: Option<serde_json::Value>,
    /// How long we waited before giving up
    pub elapsed: Duration,
    /// The timeout that was configured
    pub timeout: Duration,
}

impl WaitError {
    /// Create a new `WaitError`
    pub fn new(resource: impl Into<String>, timeout: Duration, elapsed: Duration) -> Self {
        Self {
            resource: resource.into(),
            condition: "condition".to_string(),
            last_state: "unknown".to_string(),
            last_observed: None,
            elapsed,
            timeout,
        }
    }

    /// Name the condition that was not met
    #[must_use]
    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = condition.into();
        self
    }

    /// Set the last observed state
    #[must_use]
    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.last_state = state.into();
        self
    }

    /// Attach the last observed object
    #[must_use]
    pub fn with_observed(mut self, observed: Option<serde_json::Value>) -> Self {
        self.last_observed = observed;
        self
    }
}

impl fmt::Display for WaitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f)?;
        writeln!(f, "Wait timeout for {} ({})", self.resource, self.condition)?;
        writeln!(f, "├─ Last state: {}", self.last_state)?;
        writeln!(f, "├─ Elapsed: {:?}", self.elapsed)?;
        writeln!(f, "└─ Timeout: {:?}", self.timeout)?;
        Ok(())
    }
}

impl std::error::Error for WaitError {}

/// Standard conditions for [`poll_until`]
pub mod conditions {
    use serde::Serialize;

    /// Resource exists and reports a `Ready` condition with status `"True"`
    ///
    /// A missing resource is "not yet": it may not have been persisted when
    /// polling started.
    pub fn is_ready<K: Serialize>() -> impl Fn(Option<&K>) -> bool {
        |obj: Option<&K>| {
            obj.and_then(|o| serde_json::to_value(o).ok())
                .is_some_and(|value| ready_status(&value) == Some(true))
        }
    }

    /// Resource is gone (the fetch answered 404)
    pub fn does_not_exist<K>() -> impl Fn(Option<&K>) -> bool {
        |obj: Option<&K>| obj.is_none()
    }

    /// Status of the `Ready` entry in `status.conditions`, if there is one
    #[must_use]
    pub fn ready_status(obj: &serde_json::Value) -> Option<bool> {
        obj.pointer("/status/conditions")?
            .as_array()?
            .iter()
            .find(|c| c.get("type").and_then(|t| t.as_str()) == Some("Ready"))
            .and_then(|c| c.get("status"))
            .and_then(|s| s.as_str())
            .map(|s| s == "True")
    }
}

/// One-line description of an observed object for timeout reports
pub(crate) fn describe_state(observed: Option<&serde_json::Value>) -> String {
    let Some(obj) = observed else {
        return "not found".to_string();
    };

    let ready = obj
        .pointer("/status/conditions")
        .and_then(|c| c.as_array())
        .and_then(|conds| {
            conds
                .iter()
                .find(|c| c.get("type").and_then(|t| t.as_str()) == Some("Ready"))
        });

    match ready {
        Some(cond) => {
            let status = cond.get("status").and_then(|s| s.as_str()).unwrap_or("Unknown");
            match cond.get("reason").and_then(|r| r.as_str()) {
                Some(reason) if !reason.is_empty() => format!("Ready={status} ({reason})"),
                _ => format!("Ready={status}"),
            }
        }
        None if obj.pointer("/metadata/deletionTimestamp").is_some() => {
            "exists, deletion in progress".to_string()
        }
        None => "exists, no Ready condition".to_string(),
    }
}

/// Poll `name` through `accessor` until `condition` holds
///
/// Fetches immediately, then every `settings.interval`. Returns the last
/// observed object (`None` when the condition was met by absence). A 404 is
/// handed to the condition as `None`; any other fetch error ends the wait.
pub async fn poll_until<A, C>(
    accessor: &A,
    name: &str,
    condition: C,
    settings: PollSettings,
    condition_name: &str,
) -> Result<Option<A::Object>, ContextError>
where
    A: ResourceAccessor + ?Sized,
    C: Condition<A::Object>,
{
    let resource = accessor.resource_id(name)?.to_string();
    let start = Instant::now();
    let mut attempts = 0u32;

    debug!(
        resource = %resource,
        condition = %condition_name,
        timeout = ?settings.timeout,
        "Starting wait"
    );

    loop {
        attempts += 1;

        let observed = match accessor.get(name).await {
            Ok(obj) => Some(obj),
            Err(e) if is_not_found(&e) => None,
            Err(e) => {
                return Err(ContextError::GetError(improve_error_message(
                    &e,
                    &accessor.gvr().kind,
                    name,
                )));
            }
        };

        if condition.matches_object(observed.as_ref()) {
            debug!(
                resource = %resource,
                condition = %condition_name,
                attempts = attempts,
                elapsed = ?start.elapsed(),
                "Condition met"
            );
            return Ok(observed);
        }

        let elapsed = start.elapsed();
        if elapsed >= settings.timeout {
            let last = observed
                .as_ref()
                .and_then(|obj| serde_json::to_value(obj).ok());
            return Err(WaitError::new(resource, settings.timeout, elapsed)
                .with_condition(condition_name)
                .with_state(describe_state(last.as_ref()))
                .with_observed(last)
                .into());
        }

        debug!(
            resource = %resource,
            condition = %condition_name,
            present = observed.is_some(),
            elapsed = ?elapsed,
            "Condition not met, waiting..."
        );

        sleep(settings.interval).await;
    }
}
