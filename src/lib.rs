pub mod application;
pub mod domain;
pub mod infrastructure;

use application::aggregation::RunReport;
use application::bootstrap::bootstrap_workspace;
use application::commands::{
    calculate_impl, show_settings_impl, suggest_dirs_impl, update_settings_impl, AppState,
    CalculateOptions, SettingsUpdate,
};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use domain::models::DatePreset;
use domain::status::ChannelStatusListener;
use infrastructure::calendar_client::ReqwestCalendarFeedClient;
use infrastructure::config::Settings;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

/// Sums calendar time per task token and writes it into task notes.
#[derive(Parser, Debug)]
#[command(name = "calsum")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Workspace holding config/ and logs/ (defaults to current directory)
    #[arg(long, global = true, env = "CALSUM_WORKSPACE")]
    pub workspace: Option<PathBuf>,

    /// Vault holding the task notes (defaults to the workspace)
    #[arg(long, global = true, env = "CALSUM_VAULT")]
    pub vault: Option<PathBuf>,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Aggregate calendar time into task notes
    Calculate(CalculateArgs),

    /// Show or change saved settings
    #[command(subcommand)]
    Settings(SettingsCommands),

    /// List sub-folders of a vault folder
    SuggestDirs {
        /// Folder typed so far; empty or "/" is the vault root
        #[arg(default_value = "")]
        input: String,
    },

    /// Create the workspace layout and default settings
    Init,
}

#[derive(Args, Debug, Default)]
pub struct CalculateArgs {
    /// Calendar feed URL (http, https or webcal)
    #[arg(long)]
    pub calendar_url: Option<String>,

    /// Prefix marking task tokens in event titles
    #[arg(long)]
    pub prefix: Option<String>,

    /// Vault folder containing the task notes
    #[arg(long)]
    pub tasks_dir: Option<String>,

    /// First day of the window (YYYY-MM-DD)
    #[arg(long)]
    pub start: Option<String>,

    /// Exclusive last day of the window (YYYY-MM-DD)
    #[arg(long)]
    pub end: Option<String>,

    /// Window covering today
    #[arg(long, group = "preset", conflicts_with_all = ["start", "end"])]
    pub today: bool,

    /// Window covering yesterday
    #[arg(long, group = "preset", conflicts_with_all = ["start", "end"])]
    pub yesterday: bool,

    /// Window from this week's Monday through today
    #[arg(long, group = "preset", conflicts_with_all = ["start", "end"])]
    pub since_monday: bool,
}

impl CalculateArgs {
    fn preset(&self) -> Option<DatePreset> {
        if self.today {
            Some(DatePreset::Today)
        } else if self.yesterday {
            Some(DatePreset::Yesterday)
        } else if self.since_monday {
            Some(DatePreset::SinceMonday)
        } else {
            None
        }
    }

    fn into_options(self) -> CalculateOptions {
        let preset = self.preset();
        CalculateOptions {
            calendar_url: self.calendar_url,
            tasks_prefix: self.prefix,
            tasks_directory: self.tasks_dir,
            start_date: self.start,
            end_date: self.end,
            preset,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum SettingsCommands {
    /// Print the saved settings
    Show,

    /// Update one or more saved settings
    Set {
        #[arg(long)]
        calendar_url: Option<String>,
        #[arg(long)]
        prefix: Option<String>,
        #[arg(long)]
        tasks_dir: Option<String>,
        /// IANA time zone used for dates and floating event times
        #[arg(long)]
        timezone: Option<String>,
    },
}

#[derive(Debug, Serialize)]
struct InitResponse {
    workspace_root: String,
    config_dir: String,
}

fn emit<T: Serialize>(json: bool, value: &T, human: impl FnOnce(&T) -> String) -> Result<(), String> {
    if json {
        let rendered = serde_json::to_string_pretty(value).map_err(|error| error.to_string())?;
        println!("{rendered}");
    } else {
        println!("{}", human(value));
    }
    Ok(())
}

fn describe_settings(settings: &Settings) -> String {
    format!(
        "calendarUrl: {}\ntasksPrefix: {}\ntasksDirectory: {}\ntimezone: {}",
        settings.calendar_url, settings.tasks_prefix, settings.tasks_directory, settings.timezone
    )
}

fn describe_report(report: &RunReport) -> String {
    let mut lines = vec![report.summary()];
    lines.extend(report.updated.iter().map(|path| format!("updated {path}")));
    lines.join("\n")
}

/// Runs one CLI invocation. Errors come back as the user-facing message.
pub async fn run(cli: Cli) -> Result<(), String> {
    let workspace_root = match cli.workspace {
        Some(path) => path,
        None => std::env::current_dir().map_err(|error| error.to_string())?,
    };
    let vault_root = cli.vault.unwrap_or_else(|| workspace_root.clone());

    if let Commands::Init = cli.command {
        let result = bootstrap_workspace(&workspace_root).map_err(|error| error.to_string())?;
        let response = InitResponse {
            workspace_root: result.workspace_root.display().to_string(),
            config_dir: result.config_dir.display().to_string(),
        };
        return emit(cli.json, &response, |response| {
            format!("initialized {}", response.workspace_root)
        });
    }

    let state = AppState::new(workspace_root, vault_root).map_err(|error| error.to_string())?;
    match cli.command {
        Commands::Calculate(args) => {
            let (sender, mut receiver) = tokio::sync::mpsc::unbounded_channel();
            let handle = state
                .status()
                .subscribe(Arc::new(ChannelStatusListener::new(sender)));
            let quiet = cli.json;
            let printer = tokio::spawn(async move {
                while let Some(update) = receiver.recv().await {
                    if !quiet {
                        eprintln!("[{}] {}", update.code, update.message);
                    }
                }
            });

            let result = calculate_impl(
                &state,
                Arc::new(ReqwestCalendarFeedClient::new()),
                args.into_options(),
                Utc::now(),
            )
            .await;
            state.status().unsubscribe(handle);
            // Dropping the last sender ends the printer once queued updates are shown.
            let _ = printer.await;

            let report = result.map_err(|error| state.command_error("calculate", &error))?;
            emit(cli.json, &report, describe_report)
        }
        Commands::Settings(SettingsCommands::Show) => {
            let settings =
                show_settings_impl(&state).map_err(|error| state.command_error("settings", &error))?;
            emit(cli.json, &settings, describe_settings)
        }
        Commands::Settings(SettingsCommands::Set {
            calendar_url,
            prefix,
            tasks_dir,
            timezone,
        }) => {
            let update = SettingsUpdate {
                calendar_url,
                tasks_prefix: prefix,
                tasks_directory: tasks_dir,
                timezone,
            };
            let settings = update_settings_impl(&state, update)
                .map_err(|error| state.command_error("settings", &error))?;
            emit(cli.json, &settings, describe_settings)
        }
        Commands::SuggestDirs { input } => {
            let suggestions = suggest_dirs_impl(&state, &input)
                .map_err(|error| state.command_error("suggest_dirs", &error))?;
            emit(cli.json, &suggestions, |suggestions| suggestions.join("\n"))
        }
        Commands::Init => Ok(()),
    }
}
