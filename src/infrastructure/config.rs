use crate::infrastructure::error::InfraError;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

const SETTINGS_JSON: &str = "settings.json";
const SETTINGS_SCHEMA: u64 = 1;
const DEFAULT_TIMEZONE: &str = "UTC";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub calendar_url: String,
    #[serde(default)]
    pub tasks_prefix: String,
    #[serde(default)]
    pub tasks_directory: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            calendar_url: String::new(),
            tasks_prefix: String::new(),
            tasks_directory: String::new(),
            timezone: default_timezone(),
        }
    }
}

impl Settings {
    pub fn time_zone(&self) -> Result<Tz, InfraError> {
        parse_timezone(&self.timezone)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SettingsFile {
    schema: u64,
    #[serde(flatten)]
    settings: Settings,
}

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}

pub fn parse_timezone(value: &str) -> Result<Tz, InfraError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(Tz::UTC);
    }
    value
        .parse::<Tz>()
        .map_err(|error| InfraError::InvalidConfig(format!("unknown timezone '{value}': {error}")))
}

pub fn settings_path(config_dir: &Path) -> std::path::PathBuf {
    config_dir.join(SETTINGS_JSON)
}

pub fn ensure_default_settings(config_dir: &Path) -> Result<(), InfraError> {
    let path = settings_path(config_dir);
    if !path.exists() {
        write_settings_file(&path, &Settings::default())?;
    }
    Ok(())
}

pub fn load_settings(config_dir: &Path) -> Result<Settings, InfraError> {
    let path = settings_path(config_dir);
    let raw = fs::read_to_string(&path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != SETTINGS_SCHEMA {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }

    let file: SettingsFile = serde_json::from_value(parsed)?;
    parse_timezone(&file.settings.timezone)?;
    Ok(file.settings)
}

pub fn save_settings(config_dir: &Path, settings: &Settings) -> Result<(), InfraError> {
    parse_timezone(&settings.timezone)?;
    write_settings_file(&settings_path(config_dir), settings)
}

fn write_settings_file(path: &Path, settings: &Settings) -> Result<(), InfraError> {
    let file = SettingsFile {
        schema: SETTINGS_SCHEMA,
        settings: settings.clone(),
    };
    let formatted = serde_json::to_string_pretty(&file)?;
    fs::write(path, format!("{formatted}\n"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_are_written_once_and_load_back() {
        let dir = tempfile::tempdir().expect("temp dir");
        ensure_default_settings(dir.path()).expect("write defaults");

        let loaded = load_settings(dir.path()).expect("load defaults");
        assert_eq!(loaded, Settings::default());

        let custom = Settings {
            calendar_url: "https://example.com/cal.ics".to_string(),
            tasks_prefix: "#".to_string(),
            tasks_directory: "tasks".to_string(),
            timezone: "Europe/Berlin".to_string(),
        };
        save_settings(dir.path(), &custom).expect("save custom");
        ensure_default_settings(dir.path()).expect("defaults are not rewritten");

        assert_eq!(load_settings(dir.path()).expect("load custom"), custom);
    }

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let dir = tempfile::tempdir().expect("temp dir");
        fs::write(
            settings_path(dir.path()),
            r##"{"schema": 1, "tasksPrefix": "#"}"##,
        )
        .expect("write settings");

        let loaded = load_settings(dir.path()).expect("load partial settings");
        assert_eq!(loaded.tasks_prefix, "#");
        assert_eq!(loaded.calendar_url, "");
        assert_eq!(loaded.timezone, "UTC");
    }

    #[test]
    fn unsupported_schema_is_rejected() {
        let dir = tempfile::tempdir().expect("temp dir");
        fs::write(settings_path(dir.path()), r#"{"schema": 2}"#).expect("write settings");

        match load_settings(dir.path()) {
            Err(InfraError::InvalidConfig(message)) => assert!(message.contains("schema 2")),
            other => panic!("expected invalid config error, got {other:?}"),
        }
    }

    #[test]
    fn unknown_timezone_is_rejected_on_save() {
        let dir = tempfile::tempdir().expect("temp dir");
        let settings = Settings {
            timezone: "Mars/Olympus_Mons".to_string(),
            ..Settings::default()
        };
        assert!(save_settings(dir.path(), &settings).is_err());
    }
}
