use std::{env, fmt::Display, path::PathBuf, str::FromStr, time::Duration};

use log::{info, warn};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {message}")]
    Invalid { key: String, message: String },
}

/// Which columns of the sheet carry meaning for the portal.
#[derive(Debug, Clone)]
pub struct SheetSettings {
    /// Tab name inside the spreadsheet document.
    pub sheet_name: String,
    /// Last column letter of the range read by `fetch_all`.
    pub last_column: String,
    /// Header whose value is snapshotted into audit entries.
    pub title_field: String,
    /// Header holding the program used to scope reviewers.
    pub program_field: String,
}

impl Default for SheetSettings {
    fn default() -> Self {
        SheetSettings {
            sheet_name: "Form Responses 1".to_string(),
            last_column: "ZZ".to_string(),
            title_field: "APPROVED RESEARCH TITLE".to_string(),
            program_field: "Program".to_string(),
        }
    }
}

/// Runtime configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: String,
    pub port: u16,
    pub database_path: PathBuf,
    pub spreadsheet_id: Option<String>,
    pub credentials_base64: Option<String>,
    pub credentials_path: Option<PathBuf>,
    pub sheet: SheetSettings,
    pub session_ttl: Duration,
    pub admin_password: Option<String>,
}

impl Config {
    /// Load every setting, logging the defaults that were applied.
    ///
    /// # Errors
    /// * `ConfigError::Invalid` when a variable is set but cannot be parsed
    pub fn load() -> Result<Self, ConfigError> {
        let defaults = SheetSettings::default();
        let session_hours: u64 = try_load("SESSION_HOURS", "8")?;
        let session_ttl = session_ttl(session_hours)?;

        Ok(Self {
            bind_address: try_load("BIND_ADDRESS", "0.0.0.0")?,
            port: try_load("PORT", "5000")?,
            database_path: PathBuf::from(try_load::<String>("DATABASE_PATH", "database/rerc.db")?),
            spreadsheet_id: optional("SPREADSHEET_ID"),
            credentials_base64: optional("GOOGLE_CREDENTIALS_BASE64"),
            credentials_path: optional("GOOGLE_CREDENTIALS_PATH").map(PathBuf::from),
            sheet: SheetSettings {
                sheet_name: try_load("SHEET_NAME", &defaults.sheet_name)?,
                last_column: try_load("SHEET_LAST_COLUMN", &defaults.last_column)?,
                title_field: try_load("TITLE_FIELD", &defaults.title_field)?,
                program_field: try_load("PROGRAM_FIELD", &defaults.program_field)?,
            },
            session_ttl,
            admin_password: optional("ADMIN_PASSWORD"),
        })
    }
}

fn session_ttl(hours: u64) -> Result<Duration, ConfigError> {
    hours
        .checked_mul(60 * 60)
        .map(Duration::from_secs)
        .ok_or_else(|| ConfigError::Invalid {
            key: "SESSION_HOURS".to_string(),
            message: format!("{hours} hours is too long"),
        })
}

fn var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn optional(key: &str) -> Option<String> {
    let value = var(key);
    if value.is_none() {
        warn!("Environment variable {key} not found");
    }
    value
}

fn try_load<T: FromStr>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T::Err: Display,
{
    var(key)
        .unwrap_or_else(|| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .parse()
        .map_err(|e: T::Err| ConfigError::Invalid {
            key: key.to_string(),
            message: e.to_string(),
        })
}
