//! Job configuration: one invocation, one action.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::manifest::Metadata;

/// Fixed location the orchestrator mounts the job configuration at.
pub const CONFIG_PATH: &str = "/run/config.json";

/// Action that tears down everything labeled with the job.
pub const ACTION_TEARDOWN: &str = "teardown";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("read config file {path:?}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parse config json {path:?}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Input for one runner invocation.
///
/// `job` identifies the logical deployment and scopes ownership of every
/// created artifact; `run` identifies this invocation and is stamped on
/// artifacts for audit. Unknown JSON fields are ignored for forward
/// compatibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Configuration {
    pub job: Uuid,
    pub run: Uuid,

    #[serde(default)]
    pub runner: String,

    /// Selects the engine backend (currently only "docker").
    #[serde(default)]
    pub platform: String,

    /// Opaque platform-specific payload, passed through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_data: Option<Value>,

    pub action: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

impl Configuration {
    /// Load and parse the configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_slice(&bytes).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_minimal_configuration() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "job": "6a47b0d6-1a4b-4cf1-9e8a-1f2f78a9f001",
                "run": "6a47b0d6-1a4b-4cf1-9e8a-1f2f78a9f002",
                "runner": "runner-1",
                "platform": "docker",
                "action": "setup"
            }}"#
        )
        .unwrap();

        let config = Configuration::load(file.path()).unwrap();
        assert_eq!(config.platform, "docker");
        assert_eq!(config.action, "setup");
        assert!(config.metadata.is_none());
    }

    #[test]
    fn ignores_unknown_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "job": "6a47b0d6-1a4b-4cf1-9e8a-1f2f78a9f001",
                "run": "6a47b0d6-1a4b-4cf1-9e8a-1f2f78a9f002",
                "action": "teardown",
                "shiny_new_field": {{"nested": true}}
            }}"#
        )
        .unwrap();

        let config = Configuration::load(file.path()).unwrap();
        assert_eq!(config.action, ACTION_TEARDOWN);
        assert!(config.runner.is_empty());
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = Configuration::load("/nonexistent/config.json").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
