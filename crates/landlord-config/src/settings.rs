use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::ConfigError;

/// Top-level settings. Every section has working defaults so a bare
/// `landlord serve` runs with the in-memory store and the local providers.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default)]
    pub api: ApiSettings,
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub reconciler: ReconcilerSettings,
    #[serde(default)]
    pub workflow: WorkflowSettings,
    #[serde(default)]
    pub compute: ComputeSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApiSettings {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bearer token required on every route. None means one is generated at
    /// startup and logged.
    #[serde(default)]
    pub auth_token: Option<String>,
}

impl Default for ApiSettings {
    fn default() -> Self {
        ApiSettings {
            bind: default_bind(),
            port: default_port(),
            auth_token: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreSettings {
    /// Postgres connection string. None selects the in-memory store.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for StoreSettings {
    fn default() -> Self {
        StoreSettings {
            url: None,
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReconcilerSettings {
    /// Seconds between reconciliation sweeps. Floor is 1.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
    /// Transient failures per tenant before the tenant is marked failed.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_cap")]
    pub backoff_cap_secs: u64,
    /// Budget for confirming termination during stop-and-restart.
    #[serde(default = "default_stop_restart_budget")]
    pub stop_restart_budget_secs: u64,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        ReconcilerSettings {
            poll_interval_secs: default_poll_interval(),
            workers: default_workers(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_secs: default_backoff_cap(),
            stop_restart_budget_secs: default_stop_restart_budget(),
        }
    }
}

impl ReconcilerSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_cap(&self) -> Duration {
        Duration::from_secs(self.backoff_cap_secs)
    }

    pub fn stop_restart_budget(&self) -> Duration {
        Duration::from_secs(self.stop_restart_budget_secs)
    }
}

/// Workflow providers are enabled by the presence of their block; at most one
/// may be the default.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkflowSettings {
    #[serde(default)]
    pub default_provider: Option<String>,
    #[serde(default)]
    pub local: Option<LocalWorkflowSettings>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocalWorkflowSettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for LocalWorkflowSettings {
    fn default() -> Self {
        LocalWorkflowSettings {
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

/// Compute providers are enabled by configuration presence, not a flag.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ComputeSettings {
    #[serde(default)]
    pub local: Option<LocalComputeSettings>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocalComputeSettings {}

impl Settings {
    /// Load settings from an optional YAML file, then apply env overrides
    /// (`LANDLORD_STORE_URL`, `LANDLORD_TOKEN`) and validate.
    pub fn load(path: Option<&Path>) -> Result<Settings, ConfigError> {
        let mut settings = match path {
            Some(p) => {
                debug!("loading settings from {}", p.display());
                let content = std::fs::read_to_string(p).map_err(|e| ConfigError::Io {
                    path: p.display().to_string(),
                    source: e,
                })?;
                serde_yaml::from_str(&content).map_err(|e| ConfigError::YamlParse {
                    path: p.display().to_string(),
                    source: e,
                })?
            }
            None => Settings::default(),
        };

        if let Ok(url) = std::env::var("LANDLORD_STORE_URL") {
            if !url.is_empty() {
                settings.store.url = Some(url);
            }
        }
        if let Ok(token) = std::env::var("LANDLORD_TOKEN") {
            if !token.is_empty() {
                settings.api.auth_token = Some(token);
            }
        }

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.reconciler.workers == 0 {
            return Err(ConfigError::Invalid(
                "reconciler.workers must be at least 1".into(),
            ));
        }
        if self.reconciler.backoff_base_ms == 0 {
            return Err(ConfigError::Invalid(
                "reconciler.backoff_base_ms must be at least 1".into(),
            ));
        }
        if let Some(default) = &self.workflow.default_provider {
            if !self.workflow_provider_ids().iter().any(|id| id == default) {
                return Err(ConfigError::Invalid(format!(
                    "workflow.default_provider '{default}' names a provider with no configuration block"
                )));
            }
        }
        Ok(())
    }

    /// Ids of workflow providers enabled by configuration presence.
    pub fn workflow_provider_ids(&self) -> Vec<String> {
        let mut ids = Vec::new();
        if self.workflow.local.is_some() {
            ids.push("local".to_string());
        }
        ids
    }

    /// Ids of compute providers enabled by configuration presence.
    pub fn compute_provider_ids(&self) -> Vec<String> {
        let mut ids = Vec::new();
        if self.compute.local.is_some() {
            ids.push("local".to_string());
        }
        ids
    }
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8480
}

fn default_max_connections() -> u32 {
    10
}

fn default_poll_interval() -> u64 {
    10
}

fn default_workers() -> usize {
    4
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    5
}

fn default_backoff_base_ms() -> u64 {
    1000
}

fn default_backoff_cap() -> u64 {
    300
}

fn default_stop_restart_budget() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    5
}

fn default_retry_delay_ms() -> u64 {
    500
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_usable() {
        let s = Settings::default();
        assert_eq!(s.reconciler.poll_interval(), Duration::from_secs(10));
        assert_eq!(s.reconciler.workers, 4);
        assert_eq!(s.reconciler.max_retries, 5);
        assert_eq!(s.reconciler.backoff_base(), Duration::from_millis(1000));
        assert_eq!(s.reconciler.backoff_cap(), Duration::from_secs(300));
        assert!(s.store.url.is_none());
    }

    #[test]
    fn poll_interval_has_a_floor_of_one_second() {
        let s = ReconcilerSettings {
            poll_interval_secs: 0,
            ..Default::default()
        };
        assert_eq!(s.poll_interval(), Duration::from_secs(1));
    }

    #[test]
    fn yaml_file_round_trips() {
        let yaml = r#"
api:
  port: 9000
store:
  url: postgres://landlord@localhost/landlord
reconciler:
  poll_interval_secs: 5
  workers: 8
workflow:
  default_provider: local
  local:
    max_attempts: 3
compute:
  local: {}
"#;
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(yaml.as_bytes()).unwrap();

        let s = Settings::load(Some(f.path())).unwrap();
        assert_eq!(s.api.port, 9000);
        assert_eq!(s.reconciler.workers, 8);
        assert_eq!(s.workflow.default_provider.as_deref(), Some("local"));
        assert_eq!(s.workflow.local.as_ref().unwrap().max_attempts, 3);
        assert_eq!(s.compute_provider_ids(), vec!["local".to_string()]);
    }

    #[test]
    fn default_provider_must_be_enabled() {
        let yaml = r#"
workflow:
  default_provider: temporal
"#;
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(yaml.as_bytes()).unwrap();

        let err = Settings::load(Some(f.path())).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn zero_workers_is_rejected() {
        let yaml = r#"
reconciler:
  workers: 0
"#;
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(yaml.as_bytes()).unwrap();
        assert!(Settings::load(Some(f.path())).is_err());
    }
}
