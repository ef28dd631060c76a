use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Tunables of the sync engine.
///
/// Loaded from a TOML file; every field has a production default so an empty
/// file (or no file at all) is valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncSettings {
    /// Abort the whole deactivation batch at or above this many conventions,
    /// when inside the guard window. Early each year most annexes for the new
    /// year are still missing from ASP data; deactivating everything would be
    /// wrong, so we wait for the data to catch up instead.
    pub deactivation_threshold: usize,

    /// Last month (inclusive, 1-12) of the start-of-year window during which
    /// the deactivation threshold applies. 0 disables the window entirely.
    pub deactivation_guard_month_through: u32,

    /// A convention manually reactivated by staff less than this many days
    /// ago is not deactivated, whatever the export says.
    pub reactivation_guard_days: i64,

    /// Staff-created structures younger than this are left alone while we
    /// wait for ASP data to confirm them.
    pub staff_grace_days: i64,

    /// Days of partial access a structure keeps after its convention is
    /// deactivated, before becoming delete-eligible.
    pub convention_grace_days: i64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            deactivation_threshold: 200,
            deactivation_guard_month_through: 6,
            reactivation_guard_days: 90,
            staff_grace_days: 90,
            convention_grace_days: 30,
        }
    }
}

impl SyncSettings {
    pub fn from_toml(s: &str) -> Result<Self, ConfigError> {
        let settings: SyncSettings =
            toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let s = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {e}", path.display())))?;
        Self::from_toml(&s)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.deactivation_guard_month_through > 12 {
            return Err(ConfigError::Validation(format!(
                "deactivation_guard_month_through must be 0-12, got {}",
                self.deactivation_guard_month_through
            )));
        }
        if self.deactivation_threshold == 0 {
            return Err(ConfigError::Validation(
                "deactivation_threshold must be at least 1".into(),
            ));
        }
        for (name, value) in [
            ("reactivation_guard_days", self.reactivation_guard_days),
            ("staff_grace_days", self.staff_grace_days),
            ("convention_grace_days", self.convention_grace_days),
        ] {
            if value < 0 {
                return Err(ConfigError::Validation(format!("{name} must not be negative")));
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
pub enum ConfigError {
    /// TOML parse / deserialization error.
    Parse(String),
    /// Value outside its accepted range.
    Validation(String),
    /// File read error.
    Io(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(msg) => write!(f, "settings parse error: {msg}"),
            Self::Validation(msg) => write!(f, "settings validation error: {msg}"),
            Self::Io(msg) => write!(f, "cannot read settings: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}
