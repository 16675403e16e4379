//! Configuration types for the harness
//!
//! Build them programmatically, or read them from the environment the way a
//! CI job passes credentials in.
//!
//! # Example
//!
//! ```
//! use mesh_e2e::config::HarnessConfig;
//! use std::time::Duration;
//!
//! let config = HarnessConfig::new()
//!     .kubeconfig("/etc/e2e/admin.kubeconfig")
//!     .kubeconfig("/etc/e2e/project-admin.kubeconfig")
//!     .qps(50)
//!     .poll_timeout(Duration::from_secs(600));
//!
//! assert_eq!(config.kubeconfigs.len(), 2);
//! ```
//!
//! # Environment Variables
//!
//! - `KUBECONFIGS` - comma-separated kubeconfig paths, one per role in the
//!   order cluster-admin, project-admin, edit, view
//! - `KUBECONFIG` - used when `KUBECONFIGS` is unset; must name a single file,
//!   which becomes the cluster-admin credential
//! - `MESH_E2E_QPS`, `MESH_E2E_BURST` - client rate limits
//! - `MESH_E2E_POLL_INTERVAL_SECS`, `MESH_E2E_POLL_TIMEOUT_SECS` - wait tuning

use crate::clients::ClientTuning;
use crate::wait::PollSettings;
use std::path::PathBuf;
use std::time::Duration;

pub const KUBECONFIGS_ENV: &str = "KUBECONFIGS";
pub const KUBECONFIG_ENV: &str = "KUBECONFIG";
pub const QPS_ENV: &str = "MESH_E2E_QPS";
pub const BURST_ENV: &str = "MESH_E2E_BURST";
pub const POLL_INTERVAL_ENV: &str = "MESH_E2E_POLL_INTERVAL_SECS";
pub const POLL_TIMEOUT_ENV: &str = "MESH_E2E_POLL_TIMEOUT_SECS";

/// Errors from reading harness configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no kubeconfigs configured: set {KUBECONFIGS_ENV} or {KUBECONFIG_ENV}")]
    MissingKubeconfigs,

    #[error("kubeconfig list has an empty entry at position {0}")]
    EmptyKubeconfigEntry(usize),

    #[error("{KUBECONFIG_ENV} names {0} files; list per-role kubeconfigs in {KUBECONFIGS_ENV} instead")]
    MergedKubeconfig(usize),

    #[error("{var} must be a positive integer, got '{value}'")]
    InvalidNumber { var: &'static str, value: String },
}

/// Everything a test run needs before the first context is created
#[derive(Debug, Clone, Default)]
pub struct HarnessConfig {
    /// Kubeconfig per role, by position
    pub kubeconfigs: Vec<PathBuf>,

    /// Client rate limits
    pub tuning: ClientTuning,

    /// Default wait cadence for contexts
    pub poll: PollSettings,
}

impl HarnessConfig {
    /// Empty config with default tuning
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a kubeconfig (next role position)
    pub fn kubeconfig(mut self, path: impl Into<PathBuf>) -> Self {
        self.kubeconfigs.push(path.into());
        self
    }

    /// Replace the kubeconfig list
    pub fn kubeconfigs(mut self, paths: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        self.kubeconfigs = paths.into_iter().map(Into::into).collect();
        self
    }

    /// Set sustained requests per second
    pub fn qps(mut self, qps: u64) -> Self {
        self.tuning.qps = qps;
        self
    }

    /// Set burst size
    pub fn burst(mut self, burst: u64) -> Self {
        self.tuning.burst = burst;
        self
    }

    /// Set the wait polling interval
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll.interval = interval;
        self
    }

    /// Set the wait timeout
    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll.timeout = timeout;
        self
    }

    /// Read configuration from process environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Read configuration through an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let kubeconfigs = match lookup(KUBECONFIGS_ENV).filter(|v| !v.trim().is_empty()) {
            Some(list) => parse_kubeconfig_list(&list)?,
            None => {
                let single = lookup(KUBECONFIG_ENV).ok_or(ConfigError::MissingKubeconfigs)?;
                parse_single_kubeconfig(&single)?
            }
        };

        let mut config = Self::new().kubeconfigs(kubeconfigs);

        if let Some(qps) = number(&lookup, QPS_ENV)? {
            config.tuning.qps = qps;
        }
        if let Some(burst) = number(&lookup, BURST_ENV)? {
            config.tuning.burst = burst;
        }
        if let Some(secs) = number(&lookup, POLL_INTERVAL_ENV)? {
            config.poll.interval = Duration::from_secs(secs);
        }
        if let Some(secs) = number(&lookup, POLL_TIMEOUT_ENV)? {
            config.poll.timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }
}

fn number(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<u64>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(value) => match value.trim().parse::<u64>() {
            Ok(n) if n > 0 => Ok(Some(n)),
            _ => Err(ConfigError::InvalidNumber { var, value }),
        },
    }
}

/// Split a comma-separated kubeconfig list
///
/// Position in the list decides the role, so an empty entry is an error
/// rather than something to skip.
pub fn parse_kubeconfig_list(raw: &str) -> Result<Vec<PathBuf>, ConfigError> {
    if raw.trim().is_empty() {
        return Err(ConfigError::MissingKubeconfigs);
    }

    raw.split(',')
        .enumerate()
        .map(|(i, entry)| {
            let entry = entry.trim();
            if entry.is_empty() {
                Err(ConfigError::EmptyKubeconfigEntry(i))
            } else {
                Ok(PathBuf::from(entry))
            }
        })
        .collect()
}

/// Read a standard `KUBECONFIG` value as the cluster-admin credential
///
/// The value follows kubectl's format (paths joined by the platform path
/// separator). Only a single file is accepted, since one file maps to one role.
pub fn parse_single_kubeconfig(raw: &str) -> Result<Vec<PathBuf>, ConfigError> {
    let paths: Vec<PathBuf> = std::env::split_paths(raw.trim())
        .filter(|p| !p.as_os_str().is_empty())
        .collect();

    match paths.len() {
        0 => Err(ConfigError::MissingKubeconfigs),
        1 => Ok(paths),
        n => Err(ConfigError::MergedKubeconfig(n)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn test_builder() {
        let config = HarnessConfig::new()
            .kubeconfig("/a")
            .kubeconfig("/b")
            .qps(10)
            .burst(20)
            .poll_interval(Duration::from_millis(500))
            .poll_timeout(Duration::from_secs(30));

        assert_eq!(config.kubeconfigs, vec![PathBuf::from("/a"), PathBuf::from("/b")]);
        assert_eq!(config.tuning, ClientTuning { qps: 10, burst: 20 });
        assert_eq!(config.poll.interval, Duration::from_millis(500));
        assert_eq!(config.poll.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_parse_kubeconfig_list() {
        let paths = parse_kubeconfig_list("/admin, /project-admin ,/edit,/view").unwrap();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/admin"),
                PathBuf::from("/project-admin"),
                PathBuf::from("/edit"),
                PathBuf::from("/view"),
            ]
        );
    }

    #[test]
    fn test_parse_kubeconfig_list_rejects_gaps() {
        let err = parse_kubeconfig_list("/admin,,/edit").unwrap_err();
        assert!(matches!(err, ConfigError::EmptyKubeconfigEntry(1)));

        let err = parse_kubeconfig_list("  ").unwrap_err();
        assert!(matches!(err, ConfigError::MissingKubeconfigs));
    }

    #[test]
    fn test_from_lookup_prefers_kubeconfigs() {
        let config = HarnessConfig::from_lookup(env(&[
            (KUBECONFIGS_ENV, "/admin,/project-admin"),
            (KUBECONFIG_ENV, "/fallback"),
        ]))
        .unwrap();

        assert_eq!(config.kubeconfigs.len(), 2);
        assert_eq!(config.tuning, ClientTuning::default());
        assert_eq!(config.poll, PollSettings::default());
    }

    #[test]
    fn test_from_lookup_falls_back_to_kubeconfig() {
        let config = HarnessConfig::from_lookup(env(&[(KUBECONFIG_ENV, "/fallback")])).unwrap();
        assert_eq!(config.kubeconfigs, vec![PathBuf::from("/fallback")]);
    }

    #[test]
    fn test_kubeconfig_fallback_is_not_comma_split() {
        let config =
            HarnessConfig::from_lookup(env(&[(KUBECONFIG_ENV, "/configs/admin,ci.yaml")])).unwrap();
        assert_eq!(config.kubeconfigs, vec![PathBuf::from("/configs/admin,ci.yaml")]);
    }

    #[test]
    fn test_kubeconfig_fallback_rejects_merged_paths() {
        let joined = std::env::join_paths(["/home/ci/.kube/config", "/etc/e2e/extra.yaml"])
            .expect("Should join paths");
        let joined = joined.to_string_lossy().into_owned();

        let err = HarnessConfig::from_lookup(env(&[(KUBECONFIG_ENV, joined.as_str())])).unwrap_err();
        assert!(matches!(err, ConfigError::MergedKubeconfig(2)), "got {err:?}");
        assert!(err.to_string().contains(KUBECONFIGS_ENV));

        let empty = parse_single_kubeconfig("  ").unwrap_err();
        assert!(matches!(empty, ConfigError::MissingKubeconfigs));
    }

    #[test]
    fn test_from_lookup_reads_tuning() {
        let config = HarnessConfig::from_lookup(env(&[
            (KUBECONFIGS_ENV, "/admin"),
            (QPS_ENV, "20"),
            (BURST_ENV, "40"),
            (POLL_INTERVAL_ENV, "2"),
            (POLL_TIMEOUT_ENV, "600"),
        ]))
        .unwrap();

        assert_eq!(config.tuning, ClientTuning { qps: 20, burst: 40 });
        assert_eq!(config.poll.interval, Duration::from_secs(2));
        assert_eq!(config.poll.timeout, Duration::from_secs(600));
    }

    #[test]
    fn test_from_lookup_errors() {
        let missing = HarnessConfig::from_lookup(env(&[])).unwrap_err();
        assert!(matches!(missing, ConfigError::MissingKubeconfigs));

        let bad = HarnessConfig::from_lookup(env(&[(KUBECONFIGS_ENV, "/a"), (QPS_ENV, "fast")]))
            .unwrap_err();
        assert!(bad.to_string().contains(QPS_ENV));

        let zero = HarnessConfig::from_lookup(env(&[(KUBECONFIGS_ENV, "/a"), (BURST_ENV, "0")]))
            .unwrap_err();
        assert!(matches!(zero, ConfigError::InvalidNumber { .. }));
    }
}
