use crate::application::aggregation::{AggregationService, RunError, RunReport};
use crate::application::bootstrap::bootstrap_workspace;
use crate::domain::models::{format_date, DatePreset, RunRequest};
use crate::domain::status::{ListenerHandle, StatusMachine, TransitionViolation};
use crate::infrastructure::calendar_client::CalendarFeedClient;
use crate::infrastructure::config::{load_settings, parse_timezone, save_settings, Settings};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::task_store::{FsTaskStore, TaskStore};
use chrono::{DateTime, Utc};
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Append-only JSON-lines log at `<workspace>/logs/commands.log`.
#[derive(Debug)]
struct RunLog {
    path: PathBuf,
    guard: Mutex<()>,
}

impl RunLog {
    fn append(&self, level: &str, command: &str, message: &str) {
        let Ok(_guard) = self.guard.lock() else {
            return;
        };
        let payload = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "level": level,
            "command": command,
            "message": message,
        });

        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(&self.path) {
            let _ = writeln!(file, "{}", payload);
        }
    }
}

pub struct AppState {
    config_dir: PathBuf,
    vault_root: PathBuf,
    status: Arc<StatusMachine>,
    log: Arc<RunLog>,
    check_failure_handle: ListenerHandle,
}

impl AppState {
    pub fn new(workspace_root: PathBuf, vault_root: PathBuf) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        let log = Arc::new(RunLog {
            path: bootstrap.logs_dir.join("commands.log"),
            guard: Mutex::new(()),
        });

        let status = Arc::new(StatusMachine::new());
        let sink = Arc::clone(&log);
        let check_failure_handle =
            status.subscribe_check_failures(Arc::new(move |violation: TransitionViolation| {
                tracing::warn!(from = %violation.from, to = %violation.to, "illegal status transition");
                sink.append("warn", "status", &violation.to_string());
            }));

        Ok(Self {
            config_dir: bootstrap.config_dir,
            vault_root,
            status,
            log,
            check_failure_handle,
        })
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn vault_root(&self) -> &Path {
        &self.vault_root
    }

    pub fn status(&self) -> &Arc<StatusMachine> {
        &self.status
    }

    pub fn command_error(&self, command: &str, error: &impl fmt::Display) -> String {
        self.log_error(command, &error.to_string());
        error.to_string()
    }

    pub fn log_info(&self, command: &str, message: &str) {
        self.log.append("info", command, message);
    }

    pub fn log_warn(&self, command: &str, message: &str) {
        self.log.append("warn", command, message);
    }

    pub fn log_error(&self, command: &str, message: &str) {
        self.log.append("error", command, message);
    }
}

impl Drop for AppState {
    fn drop(&mut self) {
        self.status.unsubscribe(self.check_failure_handle);
    }
}

/// Per-run overrides; anything left `None` falls back to the saved settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CalculateOptions {
    pub calendar_url: Option<String>,
    pub tasks_prefix: Option<String>,
    pub tasks_directory: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub preset: Option<DatePreset>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsUpdate {
    pub calendar_url: Option<String>,
    pub tasks_prefix: Option<String>,
    pub tasks_directory: Option<String>,
    pub timezone: Option<String>,
}

/// Merges flags over settings. A date preset replaces both dates.
pub fn resolve_request(
    settings: &Settings,
    options: &CalculateOptions,
    now: DateTime<Utc>,
) -> Result<RunRequest, InfraError> {
    let (start_date, end_date) = match options.preset {
        Some(preset) => {
            let today = now.with_timezone(&settings.time_zone()?).date_naive();
            let (start, end) = preset.resolve(today);
            (format_date(start), format_date(end))
        }
        None => (
            options.start_date.clone().unwrap_or_default(),
            options.end_date.clone().unwrap_or_default(),
        ),
    };

    Ok(RunRequest {
        calendar_url: options
            .calendar_url
            .clone()
            .unwrap_or_else(|| settings.calendar_url.clone()),
        tasks_prefix: options
            .tasks_prefix
            .clone()
            .unwrap_or_else(|| settings.tasks_prefix.clone()),
        tasks_directory: options
            .tasks_directory
            .clone()
            .unwrap_or_else(|| settings.tasks_directory.clone()),
        start_date,
        end_date,
    })
}

pub async fn calculate_impl<C>(
    state: &AppState,
    calendar_client: Arc<C>,
    options: CalculateOptions,
    now: DateTime<Utc>,
) -> Result<RunReport, RunError>
where
    C: CalendarFeedClient,
{
    let settings = load_settings(state.config_dir()).map_err(RunError::Processing)?;
    let time_zone = settings.time_zone().map_err(RunError::Processing)?;
    let request = resolve_request(&settings, &options, now).map_err(RunError::Processing)?;

    let task_store = Arc::new(FsTaskStore::new(state.vault_root()));
    let service = AggregationService::new(calendar_client, task_store, Arc::clone(state.status()))
        .with_time_zone(time_zone);

    match service.run(&request).await {
        Ok(report) => {
            state.log_info(
                "calculate",
                &format!(
                    "window={}..{} updated={} skipped={}",
                    request.start_date,
                    request.end_date,
                    report.updated.len(),
                    report.skipped.len()
                ),
            );
            Ok(report)
        }
        Err(RunError::Validation(message)) => {
            state.log_warn("calculate", &message);
            Err(RunError::Validation(message))
        }
        Err(error) => {
            state.log_error("calculate", &error.to_string());
            Err(error)
        }
    }
}

pub fn show_settings_impl(state: &AppState) -> Result<Settings, InfraError> {
    load_settings(state.config_dir())
}

pub fn update_settings_impl(state: &AppState, update: SettingsUpdate) -> Result<Settings, InfraError> {
    let mut settings = load_settings(state.config_dir())?;
    if let Some(calendar_url) = update.calendar_url {
        settings.calendar_url = calendar_url.trim().to_string();
    }
    if let Some(tasks_prefix) = update.tasks_prefix {
        settings.tasks_prefix = tasks_prefix;
    }
    if let Some(tasks_directory) = update.tasks_directory {
        settings.tasks_directory = tasks_directory.trim().to_string();
    }
    if let Some(timezone) = update.timezone {
        parse_timezone(&timezone)?;
        settings.timezone = timezone.trim().to_string();
    }
    save_settings(state.config_dir(), &settings)?;
    state.log_info("settings", "saved settings");
    Ok(settings)
}

pub fn suggest_dirs_impl(state: &AppState, input: &str) -> Result<Vec<String>, InfraError> {
    FsTaskStore::new(state.vault_root()).suggest_directories(input)
}
