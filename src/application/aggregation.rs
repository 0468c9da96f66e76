use crate::application::expander::expand_feed;
use crate::application::validation::validate_request;
use crate::domain::aggregation::{aggregate_durations, format_duration};
use crate::domain::models::{RunRequest, TimeWindow};
use crate::domain::status::{StatusCode, StatusMachine};
use crate::infrastructure::calendar_client::CalendarFeedClient;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::task_store::TaskStore;
use chrono_tz::Tz;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

pub const READY_MESSAGE: &str = "Ready to calculate";
pub const LOADING_MESSAGE: &str = "Loading...";
pub const PROCESSING_MESSAGE: &str = "Processing...";

#[derive(Debug, Error)]
pub enum RunError {
    #[error("{0}")]
    Validation(String),
    #[error("failed to fetch calendar: {0}")]
    Fetch(InfraError),
    #[error("failed to process calendar: {0}")]
    Processing(InfraError),
}

impl RunError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::ValidationError,
            Self::Fetch(_) | Self::Processing(_) => StatusCode::Error,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub occurrences: usize,
    pub tokens: usize,
    pub updated: Vec<String>,
    pub skipped: Vec<String>,
}

impl RunReport {
    pub fn summary(&self) -> String {
        format!(
            "Loaded {} events, updated {} of {} tasks",
            self.occurrences,
            self.updated.len(),
            self.updated.len() + self.skipped.len()
        )
    }
}

pub struct AggregationService<C, S>
where
    C: CalendarFeedClient,
    S: TaskStore,
{
    calendar_client: Arc<C>,
    task_store: Arc<S>,
    status: Arc<StatusMachine>,
    time_zone: Tz,
}

impl<C, S> AggregationService<C, S>
where
    C: CalendarFeedClient,
    S: TaskStore,
{
    pub fn new(calendar_client: Arc<C>, task_store: Arc<S>, status: Arc<StatusMachine>) -> Self {
        Self {
            calendar_client,
            task_store,
            status,
            time_zone: Tz::UTC,
        }
    }

    pub fn with_time_zone(mut self, time_zone: Tz) -> Self {
        self.time_zone = time_zone;
        self
    }

    pub fn status(&self) -> &Arc<StatusMachine> {
        &self.status
    }

    /// Validates, fetches, expands, aggregates and writes one run, driving the status
    /// machine through each phase. The first failure ends the run.
    pub async fn run(&self, request: &RunRequest) -> Result<RunReport, RunError> {
        let validated = validate_request(request, self.task_store.as_ref())
            .map_err(|error| self.fail(error))?;
        self.status.update(StatusCode::Ready, READY_MESSAGE);

        self.status.update(StatusCode::LoadingData, LOADING_MESSAGE);
        let feed = self
            .calendar_client
            .fetch_feed(&request.calendar_url)
            .await
            .map_err(|error| self.fail(RunError::Fetch(error)))?;

        self.status.update(StatusCode::ProcessingData, PROCESSING_MESSAGE);
        let window = TimeWindow::from_dates(validated.start_date, validated.end_date, self.time_zone);
        let occurrences = expand_feed(&feed, window, self.time_zone)
            .map_err(|error| self.fail(RunError::Processing(error)))?;
        let totals = aggregate_durations(&occurrences, &request.tasks_prefix);
        tracing::info!(
            occurrences = occurrences.len(),
            tokens = totals.len(),
            "aggregated calendar durations"
        );

        let mut report = RunReport {
            occurrences: occurrences.len(),
            tokens: totals.len(),
            ..RunReport::default()
        };
        for task in &validated.tasks {
            let token = task.expected_token(&request.tasks_prefix);
            let path = task.path.display().to_string();
            match totals.get(&token) {
                Some(total) if *total > 0 => {
                    let duration = format_duration(*total);
                    self.task_store
                        .write_duration(task, &duration)
                        .map_err(|error| self.fail(RunError::Processing(error)))?;
                    tracing::debug!(token, duration, "updated task note");
                    report.updated.push(path);
                }
                _ => report.skipped.push(path),
            }
        }

        self.status.update(StatusCode::Processed, report.summary());
        Ok(report)
    }

    fn fail(&self, error: RunError) -> RunError {
        self.status.update(error.status_code(), error.to_string());
        error
    }
}
