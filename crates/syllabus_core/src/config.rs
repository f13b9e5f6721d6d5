//! Runtime configuration resolved from the process environment.
//!
//! # Responsibility
//! - Resolve the database path and logging settings for core callers.
//! - Keep environment lookups injectable so resolution stays testable.
//!
//! # Invariants
//! - Blank variables count as unset.
//! - Resolution never panics; malformed values are reported as `ConfigError`.

use crate::logging::{default_log_level, init_logging, normalize_level, LoggingError};
use log::info;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

pub const DB_PATH_VAR: &str = "SYLLABUS_DB_PATH";
pub const LOG_LEVEL_VAR: &str = "SYLLABUS_LOG_LEVEL";
pub const LOG_DIR_VAR: &str = "SYLLABUS_LOG_DIR";

const DEFAULT_DB_FILE_NAME: &str = "syllabus.sqlite3";

/// Errors from configuration resolution.
#[derive(Debug)]
pub enum ConfigError {
    /// A variable is set to a value that cannot be used.
    InvalidValue { key: &'static str, reason: String },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { key, reason } => write!(f, "invalid {key}: {reason}"),
        }
    }
}

impl Error for ConfigError {}

/// Resolved core settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreConfig {
    /// SQLite file holding the aggregate store.
    pub db_path: PathBuf,
    /// Normalized `trace|debug|info|warn|error`.
    pub log_level: &'static str,
    /// Absolute directory for rolling logs; `None` leaves logging off.
    pub log_dir: Option<PathBuf>,
}

impl CoreConfig {
    /// Resolves settings from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolves settings through an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let db_path = read(DB_PATH_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::temp_dir().join(DEFAULT_DB_FILE_NAME));

        let log_level = match read(LOG_LEVEL_VAR) {
            Some(value) => normalize_level(&value).map_err(|err| ConfigError::InvalidValue {
                key: LOG_LEVEL_VAR,
                reason: err.to_string(),
            })?,
            None => default_log_level(),
        };

        let log_dir = match read(LOG_DIR_VAR).map(PathBuf::from) {
            Some(dir) if !dir.is_absolute() => {
                return Err(ConfigError::InvalidValue {
                    key: LOG_DIR_VAR,
                    reason: format!("`{}` is not an absolute path", dir.display()),
                });
            }
            other => other,
        };

        Ok(Self {
            db_path,
            log_level,
            log_dir,
        })
    }

    /// Starts file logging when a log directory is configured.
    ///
    /// Returns whether logging is active afterwards.
    pub fn init_logging(&self) -> Result<bool, LoggingError> {
        let Some(log_dir) = self.log_dir.as_deref() else {
            return Ok(false);
        };
        init_logging(self.log_level, log_dir)?;
        info!(
            "event=config_resolved module=config status=ok db_path={}",
            self.db_path.display()
        );
        Ok(true)
    }
}
