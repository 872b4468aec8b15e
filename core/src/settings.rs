use std::{env, time::Duration};

use dotenv::dotenv;
use serde::{Deserialize, Serialize};

pub const DEFAULT_TIMEOUT_SECS: u32 = 600;

pub const BATCH_SIZE_ENV: &str = "SQLBULK_BATCH_SIZE";
pub const TIMEOUT_SECS_ENV: &str = "SQLBULK_TIMEOUT_SECS";
pub const TABLE_LOCK_ENV: &str = "SQLBULK_TABLE_LOCK";

fn default_timeout_secs() -> u32 {
    DEFAULT_TIMEOUT_SECS
}

/// Load-time flags forwarded to the bulk-copy transport untouched.
#[derive(Debug, Default, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct BulkCopyOptions {
    pub keep_identity: bool,
    pub check_constraints: bool,
    pub table_lock: bool,
    pub keep_nulls: bool,
    pub fire_triggers: bool,
    pub use_internal_transaction: bool,
    /// Ask the transport for row locks instead of its default lock granularity.
    pub row_lock_hint: bool,
}

/// Transport tuning for one operation.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct BulkCopySettings {
    /// Rows per round trip, the whole buffer in one batch when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<u32>,

    #[serde(default = "default_timeout_secs")]
    pub bulk_copy_timeout_secs: u32,

    #[serde(default)]
    pub enable_streaming: bool,

    #[serde(default)]
    pub options: BulkCopyOptions,
}

impl Default for BulkCopySettings {
    fn default() -> Self {
        BulkCopySettings {
            batch_size: None,
            bulk_copy_timeout_secs: DEFAULT_TIMEOUT_SECS,
            enable_streaming: false,
            options: BulkCopyOptions::default(),
        }
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum SettingsError {
    #[error("{name} must be {expected}, got '{value}'")]
    InvalidValue { name: &'static str, value: String, expected: &'static str },

    #[error("Could not parse bulk copy settings: {0}")]
    Yaml(String),
}

impl BulkCopySettings {
    /// Reads overrides from the environment, loading a `.env` file first if there is one.
    pub fn from_env() -> Result<Self, SettingsError> {
        dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, SettingsError> {
        serde_yaml::from_str(yaml).map_err(|e| SettingsError::Yaml(e.to_string()))
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, SettingsError> {
        let mut settings = BulkCopySettings::default();

        if let Some(value) = lookup(BATCH_SIZE_ENV) {
            let batch_size = value.trim().parse::<u32>().map_err(|_| SettingsError::InvalidValue {
                name: BATCH_SIZE_ENV,
                value: value.clone(),
                expected: "a positive whole number",
            })?;
            settings.batch_size = Some(batch_size);
        }

        if let Some(value) = lookup(TIMEOUT_SECS_ENV) {
            settings.bulk_copy_timeout_secs =
                value.trim().parse::<u32>().map_err(|_| SettingsError::InvalidValue {
                    name: TIMEOUT_SECS_ENV,
                    value: value.clone(),
                    expected: "a number of seconds",
                })?;
        }

        if let Some(value) = lookup(TABLE_LOCK_ENV) {
            settings.options.table_lock = match value.trim().to_lowercase().as_str() {
                "true" | "1" | "yes" => true,
                "false" | "0" | "no" => false,
                _ => {
                    return Err(SettingsError::InvalidValue {
                        name: TABLE_LOCK_ENV,
                        value,
                        expected: "true or false",
                    })
                }
            };
        }

        Ok(settings)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.bulk_copy_timeout_secs))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let settings = BulkCopySettings::default();
        assert_eq!(settings.batch_size, None);
        assert_eq!(settings.timeout(), Duration::from_secs(600));
        assert!(!settings.options.table_lock);
    }

    #[test]
    fn test_from_lookup_overrides() {
        let settings = BulkCopySettings::from_lookup(lookup(&[
            (BATCH_SIZE_ENV, "5000"),
            (TIMEOUT_SECS_ENV, " 30 "),
            (TABLE_LOCK_ENV, "TRUE"),
        ]))
        .unwrap();

        assert_eq!(settings.batch_size, Some(5000));
        assert_eq!(settings.bulk_copy_timeout_secs, 30);
        assert!(settings.options.table_lock);
    }

    #[test]
    fn test_from_lookup_rejects_malformed_values() {
        let err = BulkCopySettings::from_lookup(lookup(&[(BATCH_SIZE_ENV, "lots")])).unwrap_err();
        assert!(matches!(err, SettingsError::InvalidValue { name: BATCH_SIZE_ENV, .. }));

        let err = BulkCopySettings::from_lookup(lookup(&[(TABLE_LOCK_ENV, "maybe")])).unwrap_err();
        assert!(matches!(err, SettingsError::InvalidValue { name: TABLE_LOCK_ENV, .. }));
    }

    #[test]
    fn test_yaml_with_partial_options() {
        let yaml = r#"
          batch_size: 4000
          options:
            keep_nulls: true
        "#;

        let settings = BulkCopySettings::from_yaml(yaml).unwrap();

        assert_eq!(settings.batch_size, Some(4000));
        assert_eq!(settings.bulk_copy_timeout_secs, DEFAULT_TIMEOUT_SECS);
        assert!(settings.options.keep_nulls);
        assert!(!settings.options.fire_triggers);
    }
}
