//! Tracking context options
//!
//! Options are plain serde data so they can be embedded in a host
//! application's own TOML configuration or loaded from a standalone file:
//!
//! ```toml
//! cascade_delete_timing = "on_save_changes"
//! delete_orphans_timing = "immediate"
//! sensitive_data_logging = false
//! allow_null_keys = false
//! auto_detect_changes = true
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, TrackerError};

/// When cascade deletes and orphan deletes run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CascadeTiming {
    /// Inside the state transition that caused it
    #[default]
    Immediate,
    /// Deferred to `cascade_changes`, which save entry points call
    OnSaveChanges,
    /// Only when explicitly forced
    Never,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerOptions {
    pub cascade_delete_timing: CascadeTiming,
    pub delete_orphans_timing: CascadeTiming,
    /// Render key values in log fields and error messages
    pub sensitive_data_logging: bool,
    /// Silently skip indexing entries whose key is null instead of failing
    pub allow_null_keys: bool,
    /// Run a detect-changes sweep before saving and before cascading
    pub auto_detect_changes: bool,
}

impl Default for TrackerOptions {
    fn default() -> Self {
        Self {
            cascade_delete_timing: CascadeTiming::Immediate,
            delete_orphans_timing: CascadeTiming::Immediate,
            sensitive_data_logging: false,
            allow_null_keys: false,
            auto_detect_changes: true,
        }
    }
}

impl TrackerOptions {
    /// Parse options from TOML text; missing fields keep their defaults
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::Config` if the text is not valid TOML or a
    /// field has the wrong type.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load options from a TOML file
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::Config` if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| TrackerError::Config {
            message: format!("failed to read {}: {}", path.display(), e),
        })?;
        Self::from_toml_str(&text)
    }

    pub fn with_cascade_delete_timing(mut self, timing: CascadeTiming) -> Self {
        self.cascade_delete_timing = timing;
        self
    }

    pub fn with_delete_orphans_timing(mut self, timing: CascadeTiming) -> Self {
        self.delete_orphans_timing = timing;
        self
    }

    pub fn with_sensitive_data_logging(mut self, enabled: bool) -> Self {
        self.sensitive_data_logging = enabled;
        self
    }

    pub fn with_allow_null_keys(mut self, allowed: bool) -> Self {
        self.allow_null_keys = allowed;
        self
    }

    pub fn with_auto_detect_changes(mut self, enabled: bool) -> Self {
        self.auto_detect_changes = enabled;
        self
    }
}
