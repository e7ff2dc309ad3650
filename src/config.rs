use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::errors::{LedgerError, Result};
use crate::types::MonthKey;

/// ledger configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// directory of the on-disk store
    pub data_path: Option<PathBuf>,
    /// book positive interest back into the live balance when closing
    pub capitalize_interest: bool,
    /// comment of capitalization entries; `{month}` is replaced
    pub capitalization_comment: String,
    /// comment of the entry booking an initial balance
    pub opening_balance_comment: String,
    /// inception scans longer than this log a cost warning
    pub fallback_scan_warn_threshold: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            data_path: None,
            capitalize_interest: true,
            capitalization_comment: "interest credited for {month}".to_string(),
            opening_balance_comment: "opening balance".to_string(),
            fallback_scan_warn_threshold: 10_000,
        }
    }
}

impl LedgerConfig {
    /// configuration for a store rooted at `path`
    pub fn with_data_path(path: impl Into<PathBuf>) -> Self {
        Self {
            data_path: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = fs::read_to_string(path.as_ref()).map_err(|e| LedgerError::InvalidInput {
            message: format!("failed to read config file {}: {e}", path.as_ref().display()),
        })?;
        let config = Self::from_yaml(&raw)?;
        debug!(path = %path.as_ref().display(), "loaded ledger config");
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        serde_yaml::from_str(raw).map_err(|e| LedgerError::InvalidInput {
            message: format!("failed to parse config: {e}"),
        })
    }

    /// render the capitalization comment for `month`
    pub fn capitalization_comment_for(&self, month: MonthKey) -> String {
        self.capitalization_comment.replace("{month}", &month.to_string())
    }
}
