//! Configuration types for provflow.
//!
//! - [`GlobalConfig`]: user-level configuration stored in `~/.provflow/config.yaml`
//! - [`ProjectConfig`]: project-level overrides stored in `.provflow/config.yaml`
//! - [`ResolvedConfig`]: the effective values for one project (project > global > defaults)

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_EXECUTOR, DEFAULT_LOCK_TIMEOUT_SECS, GLOBAL_CONFIG_FILENAME, PROJECT_CONFIG_FILENAME,
    PROVFLOW_DIR, PROVFLOW_HOME_DIR,
};
use crate::errors::ProvflowError;
use crate::lock::LockMode;

// ============================================================================
// Sections
// ============================================================================

/// Defaults for `update`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateConfig {
    /// Skip regenerating outputs whose files were deleted and that nothing
    /// downstream consumes.
    #[serde(default)]
    pub ignore_deleted: bool,
}

/// Project lock behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockingConfig {
    /// Bounded wait for queued operations, in seconds.
    #[serde(default = "default_lock_timeout")]
    pub timeout_secs: u64,

    /// Interactive operations fail immediately when the lock is held.
    #[serde(default = "default_true")]
    pub fail_fast: bool,
}

fn default_lock_timeout() -> u64 {
    DEFAULT_LOCK_TIMEOUT_SECS
}

fn default_true() -> bool {
    true
}

impl Default for LockingConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_LOCK_TIMEOUT_SECS,
            fail_fast: true,
        }
    }
}

impl LockingConfig {
    /// The lock mode for an operation.
    ///
    /// Interactive callers fail fast (unless disabled); queued callers wait
    /// up to `timeout_secs`.
    pub fn mode(&self, interactive: bool) -> LockMode {
        if interactive && self.fail_fast {
            LockMode::FailFast
        } else {
            LockMode::Wait(Duration::from_secs(self.timeout_secs))
        }
    }

    /// The lock mode for the metadata lock.
    ///
    /// Always a bounded wait of at least one second, whatever `fail_fast`
    /// says: only the project lock fails fast.
    pub fn metadata_mode(&self) -> LockMode {
        LockMode::Wait(Duration::from_secs(self.timeout_secs.max(1)))
    }

    /// Validate and return warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.timeout_secs == 0 {
            warnings.push(
                "locking.timeoutSecs is 0: queued operations will fail as soon as the project is busy"
                    .to_string(),
            );
        }
        if self.timeout_secs > 3600 {
            warnings.push(format!(
                "locking.timeoutSecs is {} (over an hour): queued operations may appear hung",
                self.timeout_secs
            ));
        }
        warnings
    }
}

/// Execution defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionConfig {
    /// Executor used when no `--provider` is given.
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Dispatch the members of a batch concurrently.
    #[serde(default)]
    pub parallel: bool,
}

fn default_provider() -> String {
    DEFAULT_EXECUTOR.to_string()
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            default_provider: default_provider(),
            parallel: false,
        }
    }
}

/// The person recorded as the agent of new activities.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserConfig {
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Email address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

// ============================================================================
// GlobalConfig
// ============================================================================

/// Global (user-level) configuration.
///
/// # Example YAML
///
/// ```yaml
/// update:
///   ignoreDeleted: false
/// locking:
///   timeoutSecs: 30
///   failFast: true
/// execution:
///   defaultProvider: local
///   parallel: false
/// user:
///   name: Jane Doe
///   email: jane@example.org
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Update defaults.
    #[serde(default)]
    pub update: UpdateConfig,

    /// Lock behaviour.
    #[serde(default)]
    pub locking: LockingConfig,

    /// Execution defaults.
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Agent identity.
    #[serde(default)]
    pub user: UserConfig,
}

impl GlobalConfig {
    /// Load the global configuration from `~/.provflow/config.yaml`.
    ///
    /// If the file does not exist, returns defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ProvflowError::InvalidGlobalConfig`] if the file exists but cannot be parsed.
    pub fn load_default() -> Result<Self, ProvflowError> {
        match Self::default_path() {
            Some(path) => Self::from_path(&path),
            None => {
                tracing::debug!("Could not determine home directory, using default config");
                Ok(Self::default())
            }
        }
    }

    /// Load the global configuration from a specific path.
    ///
    /// If the file does not exist, returns defaults. Validation warnings are
    /// logged, never fatal.
    pub fn from_path(path: &Path) -> Result<Self, ProvflowError> {
        if !path.exists() {
            tracing::debug!(
                "Global config not found at {}, using defaults",
                path.display()
            );
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| {
            ProvflowError::InvalidGlobalConfig(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let config: Self = serde_yaml::from_str(&content).map_err(|e| {
            ProvflowError::InvalidGlobalConfig(format!(
                "Failed to parse {}: {}",
                path.display(),
                e
            ))
        })?;

        for warning in config.validate() {
            tracing::warn!("Config warning: {}", warning);
        }

        Ok(config)
    }

    /// Get the default global config directory (`~/.provflow`).
    pub fn default_dir() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(PROVFLOW_HOME_DIR))
    }

    /// Get the default global config file path (`~/.provflow/config.yaml`).
    pub fn default_path() -> Option<PathBuf> {
        Self::default_dir().map(|d| d.join(GLOBAL_CONFIG_FILENAME))
    }

    /// Create a default configuration suitable for testing.
    pub fn default_for_testing() -> Self {
        Self::default()
    }

    /// Validate the configuration, returning non-fatal warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = self.locking.validate();
        if self.execution.default_provider.trim().is_empty() {
            warnings.push(format!(
                "execution.defaultProvider is empty, `{}` will be used",
                DEFAULT_EXECUTOR
            ));
        }
        warnings
    }
}

// ============================================================================
// ProjectConfig
// ============================================================================

/// Per-project overrides for [`UpdateConfig`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOverride {
    /// Overrides `update.ignoreDeleted`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_deleted: Option<bool>,
}

/// Per-project overrides for [`LockingConfig`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockingOverride {
    /// Overrides `locking.timeoutSecs`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Overrides `locking.failFast`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail_fast: Option<bool>,
}

/// Per-project overrides for [`ExecutionConfig`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOverride {
    /// Overrides `execution.defaultProvider`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_provider: Option<String>,
    /// Overrides `execution.parallel`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel: Option<bool>,
}

/// Project-level configuration (`.provflow/config.yaml`).
///
/// Every field is optional; unset fields inherit from the global config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Update overrides.
    #[serde(default)]
    pub update: UpdateOverride,

    /// Lock overrides.
    #[serde(default)]
    pub locking: LockingOverride,

    /// Execution overrides.
    #[serde(default)]
    pub execution: ExecutionOverride,

    /// Agent override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserConfig>,
}

impl ProjectConfig {
    /// Load the project configuration from a project root.
    ///
    /// # Errors
    ///
    /// Returns [`ProvflowError::InvalidProjectConfig`] if the file exists but cannot be parsed.
    pub fn load_from_workspace(workspace_root: &Path) -> Result<Self, ProvflowError> {
        let path = Self::config_path_for_workspace(workspace_root);
        Self::from_path(&path)
    }

    /// Load the project configuration from a specific path.
    ///
    /// If the file does not exist, returns a default configuration.
    pub fn from_path(path: &Path) -> Result<Self, ProvflowError> {
        if !path.exists() {
            tracing::debug!(
                "Project config not found at {}, using defaults",
                path.display()
            );
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| {
            ProvflowError::InvalidProjectConfig(format!("Failed to read {}: {}", path.display(), e))
        })?;

        serde_yaml::from_str(&content).map_err(|e| {
            ProvflowError::InvalidProjectConfig(format!(
                "Failed to parse {}: {}",
                path.display(),
                e
            ))
        })
    }

    /// Get the config file path for a given project root.
    pub fn config_path_for_workspace(workspace_root: &Path) -> PathBuf {
        workspace_root
            .join(PROVFLOW_DIR)
            .join(PROJECT_CONFIG_FILENAME)
    }

    /// Create a default configuration suitable for testing.
    pub fn default_for_testing() -> Self {
        Self::default()
    }
}

// ============================================================================
// ResolvedConfig
// ============================================================================

/// Effective configuration for one project.
///
/// Resolution precedence (highest to lowest):
/// 1. Project override (`.provflow/config.yaml`)
/// 2. Global config (`~/.provflow/config.yaml`)
/// 3. Built-in defaults
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    /// Effective update defaults.
    pub update: UpdateConfig,
    /// Effective lock behaviour.
    pub locking: LockingConfig,
    /// Effective execution defaults.
    pub execution: ExecutionConfig,
    /// Effective agent identity.
    pub user: UserConfig,
}

impl ResolvedConfig {
    /// Merge a project config over a global config.
    pub fn resolve(global: &GlobalConfig, project: &ProjectConfig) -> Self {
        let update = UpdateConfig {
            ignore_deleted: project
                .update
                .ignore_deleted
                .unwrap_or(global.update.ignore_deleted),
        };

        let locking = LockingConfig {
            timeout_secs: project
                .locking
                .timeout_secs
                .unwrap_or(global.locking.timeout_secs),
            fail_fast: project.locking.fail_fast.unwrap_or(global.locking.fail_fast),
        };

        let default_provider = project
            .execution
            .default_provider
            .clone()
            .unwrap_or_else(|| global.execution.default_provider.clone());
        let execution = ExecutionConfig {
            default_provider: if default_provider.trim().is_empty() {
                DEFAULT_EXECUTOR.to_string()
            } else {
                default_provider
            },
            parallel: project
                .execution
                .parallel
                .unwrap_or(global.execution.parallel),
        };

        let user = project.user.clone().unwrap_or_else(|| global.user.clone());

        Self {
            update,
            locking,
            execution,
            user,
        }
    }

    /// Defaults only, for tests.
    pub fn default_for_testing() -> Self {
        Self::resolve(&GlobalConfig::default(), &ProjectConfig::default())
    }
}

// ============================================================================
// Tests
// ============================================================================
