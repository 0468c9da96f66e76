use chrono::{
    DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeZone, Utc,
    Weekday,
};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Token to accumulated milliseconds for one run.
pub type AggregationMap = HashMap<String, i64>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventOccurrence {
    pub title: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl EventOccurrence {
    pub fn new(title: impl Into<String>, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            title: Some(title.into()),
            start: Some(start),
            end: Some(end),
        }
    }

    /// Title, start and end when all three are present; `None` marks a malformed occurrence.
    pub fn parts(&self) -> Option<(&str, DateTime<Utc>, DateTime<Utc>)> {
        let title = self.title.as_deref().filter(|title| !title.is_empty())?;
        Some((title, self.start?, self.end?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// `[start 00:00, end 00:00)` in the given zone.
    pub fn from_dates(start: NaiveDate, end: NaiveDate, zone: Tz) -> Self {
        Self {
            start: local_to_utc(zone, start.and_time(NaiveTime::MIN)),
            end: local_to_utc(zone, end.and_time(NaiveTime::MIN)),
        }
    }

    pub fn overlaps(&self, start: DateTime<Utc>, end: Option<DateTime<Utc>>) -> bool {
        match end {
            Some(end) if end > start => start < self.end && end > self.start,
            _ => start >= self.start && start < self.end,
        }
    }
}

/// Resolves a wall-clock time in `zone`. Times inside a DST gap move forward by the
/// gap; ambiguous times take the earlier instant.
pub fn local_to_utc(zone: Tz, local: NaiveDateTime) -> DateTime<Utc> {
    if let Some(resolved) = zone.from_local_datetime(&local).earliest() {
        return resolved.with_timezone(&Utc);
    }
    let before_gap = zone
        .offset_from_utc_datetime(&(local - Duration::hours(12)))
        .fix();
    Utc.from_utc_datetime(&(local - Duration::seconds(i64::from(before_gap.local_minus_utc()))))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRecord {
    pub base_name: String,
    pub path: PathBuf,
}

impl TaskRecord {
    pub fn expected_token(&self, prefix: &str) -> String {
        format!("{prefix}{}", self.base_name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    pub calendar_url: String,
    pub tasks_prefix: String,
    pub tasks_directory: String,
    pub start_date: String,
    pub end_date: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatePreset {
    Today,
    Yesterday,
    SinceMonday,
}

impl DatePreset {
    /// Start and exclusive end date for the preset.
    pub fn resolve(self, today: NaiveDate) -> (NaiveDate, NaiveDate) {
        let tomorrow = today + Duration::days(1);
        match self {
            Self::Today => (today, tomorrow),
            Self::Yesterday => (today - Duration::days(1), today),
            Self::SinceMonday => (last_monday(today), tomorrow),
        }
    }
}

fn last_monday(today: NaiveDate) -> NaiveDate {
    let mut cursor = today;
    while cursor.weekday() != Weekday::Mon {
        cursor -= Duration::days(1);
    }
    cursor
}

pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").ok()
}
