//! Controller configuration.
//!
//! Configuration is resolved in layers:
//! 1. Built-in defaults
//! 2. Optional TOML file
//! 3. Environment variable overrides
//!
//! The result is validated before it is handed to the reconciler.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Error;
use crate::result::Result;

/// Environment variable holding the release history limit.
pub const HELM_MAX_HISTORY_ENV: &str = "HELM_MAX_HISTORY";
/// Environment variable holding the platform namespace.
pub const KRATEO_NAMESPACE_ENV: &str = "KRATEO_NAMESPACE";
/// Environment variable holding the controller's service account name.
pub const SERVICE_ACCOUNT_NAME_ENV: &str = "SERVICE_ACCOUNT_NAME";
/// Environment variable holding the controller's service account namespace.
pub const SERVICE_ACCOUNT_NAMESPACE_ENV: &str = "SERVICE_ACCOUNT_NAMESPACE";
/// Environment variable holding the per-invocation deadline in seconds.
pub const RECONCILE_TIMEOUT_SECS_ENV: &str = "RECONCILE_TIMEOUT_SECS";

/// Default platform namespace.
pub const DEFAULT_KRATEO_NAMESPACE: &str = "krateo-system";

/// Configuration for the composition controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Number of release revisions the package manager retains.
    #[serde(default = "default_helm_max_history")]
    pub helm_max_history: u32,

    /// Namespace of the platform installation, injected into chart values.
    #[serde(default = "default_krateo_namespace")]
    pub krateo_namespace: String,

    /// Service account that generated permissions are bound to.
    #[serde(default = "default_service_account_name")]
    pub service_account_name: String,

    /// Namespace of the service account.
    #[serde(default = "default_krateo_namespace")]
    pub service_account_namespace: String,

    /// Deadline for a single reconcile invocation.
    #[serde(default = "default_reconcile_timeout_secs")]
    pub reconcile_timeout_secs: u64,
}

fn default_helm_max_history() -> u32 {
    3
}

fn default_krateo_namespace() -> String {
    DEFAULT_KRATEO_NAMESPACE.to_string()
}

fn default_service_account_name() -> String {
    "composition-controller".to_string()
}

fn default_reconcile_timeout_secs() -> u64 {
    300
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            helm_max_history: default_helm_max_history(),
            krateo_namespace: default_krateo_namespace(),
            service_account_name: default_service_account_name(),
            service_account_namespace: default_krateo_namespace(),
            reconcile_timeout_secs: default_reconcile_timeout_secs(),
        }
    }
}

impl ControllerConfig {
    /// Parse a configuration from TOML text. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns error if the text is not valid TOML for this schema.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::toml_parse_failed(e.to_string()))
    }

    /// Apply overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns error if a numeric variable does not parse.
    pub fn apply_env_vars(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides using an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns error if a numeric variable does not parse.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(HELM_MAX_HISTORY_ENV) {
            self.helm_max_history = value
                .trim()
                .parse()
                .map_err(|e| Error::invalid_env_value(HELM_MAX_HISTORY_ENV, format!("{e}")))?;
        }

        if let Some(value) = lookup(KRATEO_NAMESPACE_ENV) {
            self.krateo_namespace = value;
        }

        if let Some(value) = lookup(SERVICE_ACCOUNT_NAME_ENV) {
            self.service_account_name = value;
        }

        if let Some(value) = lookup(SERVICE_ACCOUNT_NAMESPACE_ENV) {
            self.service_account_namespace = value;
        }

        if let Some(value) = lookup(RECONCILE_TIMEOUT_SECS_ENV) {
            self.reconcile_timeout_secs = value.trim().parse().map_err(|e| {
                Error::invalid_env_value(RECONCILE_TIMEOUT_SECS_ENV, format!("{e}"))
            })?;
        }

        Ok(())
    }

    /// Deadline for a single reconcile invocation.
    #[must_use]
    pub const fn reconcile_timeout(&self) -> Duration {
        Duration::from_secs(self.reconcile_timeout_secs)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns error if a required value is empty or out of range.
    pub fn validate(&self) -> Result<()> {
        if self.helm_max_history == 0 {
            return Err(Error::invalid_config(
                "helm_max_history must be greater than 0",
            ));
        }

        if self.krateo_namespace.trim().is_empty() {
            return Err(Error::invalid_config("krateo_namespace must not be empty"));
        }

        if self.service_account_name.trim().is_empty() {
            return Err(Error::invalid_config(
                "service_account_name must not be empty",
            ));
        }

        if self.service_account_namespace.trim().is_empty() {
            return Err(Error::invalid_config(
                "service_account_namespace must not be empty",
            ));
        }

        if self.reconcile_timeout_secs == 0 {
            return Err(Error::invalid_config(
                "reconcile_timeout_secs must be greater than 0",
            ));
        }

        Ok(())
    }
}

/// Load configuration from all sources with hierarchy.
///
/// # Errors
///
/// Returns error if:
/// - The config file cannot be read or is malformed TOML
/// - An environment override does not parse
/// - The resolved values fail validation
pub fn load_config(path: Option<&Path>) -> Result<ControllerConfig> {
    let mut config = match path {
        Some(path) => load_toml_file(path)?,
        None => ControllerConfig::default(),
    };

    config.apply_env_vars()?;
    config.validate()?;
    debug!(
        helm_max_history = config.helm_max_history,
        krateo_namespace = %config.krateo_namespace,
        service_account = %config.service_account_name,
        timeout_secs = config.reconcile_timeout_secs,
        "Controller configuration loaded"
    );

    Ok(config)
}

fn load_toml_file(path: &Path) -> Result<ControllerConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::file_read_failed(path, e.to_string()))?;

    ControllerConfig::from_toml_str(&content)
}
