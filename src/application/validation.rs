use crate::application::aggregation::RunError;
use crate::domain::models::{parse_date, RunRequest, TaskRecord};
use crate::infrastructure::task_store::TaskStore;
use chrono::NaiveDate;

pub const CALENDAR_URL_REQUIRED: &str = "Calendar url is required";
pub const TASKS_DIRECTORY_REQUIRED: &str = "Tasks directory is required";
pub const TASKS_DIRECTORY_NOT_FOUND: &str = "Tasks directory is not found";
pub const START_DATE_REQUIRED: &str = "Start date is required";
pub const END_DATE_REQUIRED: &str = "End date is required";
pub const START_DATE_INVALID: &str = "Start date is invalid";
pub const END_DATE_INVALID: &str = "End date is invalid";
pub const START_AFTER_END: &str = "Start date should be earlier than end date";
pub const TASKS_DIRECTORY_EMPTY: &str = "Tasks directory is empty";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedRun {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub tasks: Vec<TaskRecord>,
}

fn reject(message: &str) -> RunError {
    RunError::Validation(message.to_string())
}

/// Checks run inputs in order and stops at the first failure. Only the task store is
/// touched; nothing is fetched.
pub fn validate_request<S>(request: &RunRequest, store: &S) -> Result<ValidatedRun, RunError>
where
    S: TaskStore + ?Sized,
{
    if request.calendar_url.trim().is_empty() {
        return Err(reject(CALENDAR_URL_REQUIRED));
    }
    if request.tasks_directory.trim().is_empty() {
        return Err(reject(TASKS_DIRECTORY_REQUIRED));
    }
    let exists = store
        .directory_exists(&request.tasks_directory)
        .map_err(|error| {
            tracing::debug!(%error, "tasks directory lookup failed");
            reject(TASKS_DIRECTORY_NOT_FOUND)
        })?;
    if !exists {
        return Err(reject(TASKS_DIRECTORY_NOT_FOUND));
    }
    if request.start_date.trim().is_empty() {
        return Err(reject(START_DATE_REQUIRED));
    }
    if request.end_date.trim().is_empty() {
        return Err(reject(END_DATE_REQUIRED));
    }
    let start_date = parse_date(&request.start_date).ok_or_else(|| reject(START_DATE_INVALID))?;
    let end_date = parse_date(&request.end_date).ok_or_else(|| reject(END_DATE_INVALID))?;
    if start_date > end_date {
        return Err(reject(START_AFTER_END));
    }

    let tasks = store
        .list_tasks(&request.tasks_directory)
        .map_err(RunError::Processing)?;
    if tasks.is_empty() {
        return Err(reject(TASKS_DIRECTORY_EMPTY));
    }

    Ok(ValidatedRun {
        start_date,
        end_date,
        tasks,
    })
}
