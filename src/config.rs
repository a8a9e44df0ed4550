use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{EvalOptions, ExecutionMode, MissingKeyPolicy};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Engine settings. Every field has a default, so `{}` is a valid config.
///
/// ```json
/// {
///   "variable": "txn",
///   "missing_keys": "zero_value",
///   "trace": true,
///   "execution": "parallel",
///   "deadline_ms": 250,
///   "aggregates": ["failed_txn_past_month"]
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Name rules use for the transaction.
    pub variable: String,
    pub missing_keys: MissingKeyPolicy,
    /// Record sub-expression values in every report.
    pub trace: bool,
    pub execution: ExecutionMode,
    /// Give up waiting for rules after this many milliseconds.
    pub deadline_ms: Option<u64>,
    /// Aggregates computed for every transaction, in order.
    pub aggregates: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            variable: "txn".to_owned(),
            missing_keys: MissingKeyPolicy::default(),
            trace: true,
            execution: ExecutionMode::default(),
            deadline_ms: None,
            aggregates: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if `json` is not a valid config.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Parse`] if its contents are not a valid config.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    #[must_use]
    pub fn eval_options(&self) -> EvalOptions {
        EvalOptions {
            missing_keys: self.missing_keys,
            trace: self.trace,
        }
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_ms.map(Duration::from_millis)
    }
}
