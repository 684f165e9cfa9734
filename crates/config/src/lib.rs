//! Group configuration for Covenant
//!
//! The configuration record is owned by whoever hosts a group; the governance
//! engine only ever reads a snapshot of it at the start of each call.

use std::env;
use std::fs;
use std::path::Path;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Errors that can occur in configuration operations
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidEnvVar(String, String),

    #[error("Failed to read file: {0}")]
    FileReadError(String),

    #[error("Failed to parse YAML: {0}")]
    YamlParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Environment variable naming a YAML configuration file
pub const CONFIG_FILE_ENV: &str = "COVENANT_CONFIG_FILE";

/// Thirty days
pub const DEFAULT_INACTIVITY_WINDOW_SECS: u32 = 60 * 60 * 24 * 30;

/// Administrative configuration of one governed group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GroupConfig {
    /// Upper bound on enrolled custodians, 0 for no limit
    pub max_custodians: u8,
    /// Custodians silent for this long stop counting towards quorum
    pub inactivate_cust_after_sec: u32,
    /// Dispatch bundles whose strictest threshold is 0 without a proposal
    pub exec_on_threshold_zero: bool,
    /// Records kept per archive scope, 0 to keep everything
    pub proposal_archive_size: u8,
    pub member_registration: bool,
    pub withdrawals: bool,
    pub internal_transfers: bool,
    pub deposits: bool,
    /// Account handed maintenance rights by the hosting platform
    pub maintainer_account: String,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            max_custodians: 0,
            inactivate_cust_after_sec: DEFAULT_INACTIVITY_WINDOW_SECS,
            exec_on_threshold_zero: false,
            proposal_archive_size: 3,
            member_registration: false,
            withdrawals: false,
            internal_transfers: false,
            deposits: false,
            maintainer_account: "maintainer".to_string(),
        }
    }
}

impl GroupConfig {
    /// Load configuration from the environment.
    ///
    /// When `COVENANT_CONFIG_FILE` points at an existing file it is used as the
    /// base; otherwise the defaults are. Individual `COVENANT_*` variables
    /// override single fields on top of that base.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|name| env::var(name).ok())
    }

    /// Same as [`GroupConfig::from_env`] with an injectable variable lookup
    pub fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match lookup(CONFIG_FILE_ENV) {
            Some(path) if Path::new(&path).exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };

        if let Some(v) = lookup("COVENANT_MAX_CUSTODIANS") {
            config.max_custodians = parse_var("COVENANT_MAX_CUSTODIANS", &v)?;
        }
        if let Some(v) = lookup("COVENANT_INACTIVITY_WINDOW_SECS") {
            config.inactivate_cust_after_sec = parse_var("COVENANT_INACTIVITY_WINDOW_SECS", &v)?;
        }
        if let Some(v) = lookup("COVENANT_EXEC_ON_THRESHOLD_ZERO") {
            config.exec_on_threshold_zero = parse_var("COVENANT_EXEC_ON_THRESHOLD_ZERO", &v)?;
        }
        if let Some(v) = lookup("COVENANT_ARCHIVE_SIZE") {
            config.proposal_archive_size = parse_var("COVENANT_ARCHIVE_SIZE", &v)?;
        }
        if let Some(v) = lookup("COVENANT_MEMBER_REGISTRATION") {
            config.member_registration = parse_var("COVENANT_MEMBER_REGISTRATION", &v)?;
        }
        if let Some(v) = lookup("COVENANT_MAINTAINER_ACCOUNT") {
            config.maintainer_account = v;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|e| ConfigError::FileReadError(format!("Failed to read {}: {}", path.display(), e)))?;

        let config: GroupConfig = serde_yaml::from_str(&contents)?;
        config.validate()?;
        debug!("Loaded group configuration from {}", path.display());
        Ok(config)
    }

    /// Serialize to YAML
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Reject records the engine cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.inactivate_cust_after_sec == 0 {
            return Err(ConfigError::Invalid(
                "inactivate_cust_after_sec must be greater than zero".to_string(),
            ));
        }
        if self.maintainer_account.trim().is_empty() {
            return Err(ConfigError::Invalid("maintainer_account can't be empty".to_string()));
        }
        Ok(())
    }

    /// Inactivity window as used by the liveness predicate
    pub fn inactivity_window(&self) -> u64 {
        u64::from(self.inactivate_cust_after_sec)
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnvVar(name.to_string(), e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = GroupConfig::default();
        assert_eq!(config.max_custodians, 0);
        assert_eq!(config.inactivate_cust_after_sec, 2_592_000);
        assert!(!config.exec_on_threshold_zero);
        assert_eq!(config.proposal_archive_size, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_file_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "exec_on_threshold_zero: true").unwrap();
        writeln!(file, "inactivate_cust_after_sec: 86400").unwrap();

        let config = GroupConfig::from_file(file.path()).unwrap();
        assert!(config.exec_on_threshold_zero);
        assert_eq!(config.inactivate_cust_after_sec, 86_400);
        assert_eq!(config.proposal_archive_size, 3);
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "exec_on_treshold_zero: true").unwrap();

        assert!(matches!(
            GroupConfig::from_file(file.path()),
            Err(ConfigError::YamlParseError(_))
        ));
    }

    #[test]
    fn test_zero_window_is_invalid() {
        let config = GroupConfig {
            inactivate_cust_after_sec: 0,
            ..GroupConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("COVENANT_MAX_CUSTODIANS", "5"),
            ("COVENANT_EXEC_ON_THRESHOLD_ZERO", "true"),
            ("COVENANT_MAINTAINER_ACCOUNT", "ops"),
        ]);

        let config = GroupConfig::from_vars(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.max_custodians, 5);
        assert!(config.exec_on_threshold_zero);
        assert_eq!(config.maintainer_account, "ops");
        assert_eq!(config.inactivate_cust_after_sec, DEFAULT_INACTIVITY_WINDOW_SECS);
    }

    #[test]
    fn test_bad_env_value() {
        let result = GroupConfig::from_vars(|k| {
            (k == "COVENANT_ARCHIVE_SIZE").then(|| "lots".to_string())
        });
        assert!(matches!(result, Err(ConfigError::InvalidEnvVar(name, _)) if name == "COVENANT_ARCHIVE_SIZE"));
    }

    #[test]
    fn test_yaml_roundtrip_of_modified_config() {
        let config = GroupConfig {
            member_registration: true,
            max_custodians: 9,
            ..GroupConfig::default()
        };
        let yaml = config.to_yaml().unwrap();
        let parsed: GroupConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, config);
    }
}
