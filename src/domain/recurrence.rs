use chrono::{
    DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc, Weekday,
};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecurrenceError {
    #[error("recurrence rule has no FREQ: {0}")]
    MissingFrequency(String),
    #[error("unsupported recurrence frequency: {0}")]
    UnsupportedFrequency(String),
    #[error("invalid recurrence {part} value '{value}'")]
    InvalidPart { part: String, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frequency {
    Minutely,
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeekdayRule {
    pub ordinal: Option<i32>,
    pub weekday: Weekday,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleUntil {
    Date(NaiveDate),
    Floating(NaiveDateTime),
    Utc(DateTime<Utc>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecurrenceRule {
    pub frequency: Frequency,
    pub interval: u32,
    pub count: Option<u32>,
    pub until: Option<RuleUntil>,
    pub by_day: Vec<WeekdayRule>,
    pub by_month_day: Vec<i32>,
    pub by_month: Vec<u32>,
    pub by_hour: Vec<u32>,
    pub by_minute: Vec<u32>,
    pub by_set_pos: Vec<i32>,
    pub week_start: Weekday,
}

impl FromStr for RecurrenceRule {
    type Err = RecurrenceError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let body = raw.trim();
        let body = body
            .strip_prefix("RRULE:")
            .or_else(|| body.strip_prefix("rrule:"))
            .unwrap_or(body);

        let mut frequency = None;
        let mut rule = RecurrenceRule {
            frequency: Frequency::Daily,
            interval: 1,
            count: None,
            until: None,
            by_day: Vec::new(),
            by_month_day: Vec::new(),
            by_month: Vec::new(),
            by_hour: Vec::new(),
            by_minute: Vec::new(),
            by_set_pos: Vec::new(),
            week_start: Weekday::Mon,
        };

        for part in body.split(';').map(str::trim).filter(|part| !part.is_empty()) {
            let Some((key, value)) = part.split_once('=') else {
                return Err(invalid(part, ""));
            };
            let key = key.trim().to_ascii_uppercase();
            let value = value.trim();
            match key.as_str() {
                "FREQ" => frequency = Some(parse_frequency(value)?),
                "INTERVAL" => {
                    rule.interval = value
                        .parse::<u32>()
                        .ok()
                        .filter(|interval| *interval > 0)
                        .ok_or_else(|| invalid(&key, value))?;
                }
                "COUNT" => {
                    rule.count = Some(value.parse::<u32>().map_err(|_| invalid(&key, value))?);
                }
                "UNTIL" => rule.until = Some(parse_until(value).ok_or_else(|| invalid(&key, value))?),
                "BYDAY" => rule.by_day = parse_list(&key, value, parse_weekday_rule)?,
                "BYMONTHDAY" => {
                    rule.by_month_day = parse_list(&key, value, |item| {
                        parse_signed_in_range(item, 1, 31)
                    })?;
                }
                "BYMONTH" => {
                    rule.by_month = parse_list(&key, value, |item| {
                        item.parse::<u32>().ok().filter(|month| (1..=12).contains(month))
                    })?;
                }
                "BYHOUR" => {
                    rule.by_hour = parse_list(&key, value, |item| {
                        item.parse::<u32>().ok().filter(|hour| *hour < 24)
                    })?;
                }
                "BYMINUTE" => {
                    rule.by_minute = parse_list(&key, value, |item| {
                        item.parse::<u32>().ok().filter(|minute| *minute < 60)
                    })?;
                }
                "BYSETPOS" => {
                    rule.by_set_pos = parse_list(&key, value, |item| {
                        parse_signed_in_range(item, 1, 366)
                    })?;
                }
                "WKST" => {
                    rule.week_start = parse_weekday(value).ok_or_else(|| invalid(&key, value))?;
                }
                other => tracing::debug!(part = other, "ignoring unsupported recurrence rule part"),
            }
        }

        rule.frequency = frequency.ok_or_else(|| RecurrenceError::MissingFrequency(raw.to_string()))?;
        Ok(rule)
    }
}

impl RecurrenceRule {
    /// Instance starts in `[from, to)`, in wall-clock time of the event.
    ///
    /// `dtstart` is always the first instance. `until` is the rule's UNTIL already
    /// expressed in the event's wall-clock time. Generation stops once a period begins
    /// at or after `to`, so unbounded rules terminate at the window edge.
    pub fn instances(
        &self,
        dtstart: NaiveDateTime,
        until: Option<NaiveDateTime>,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> Vec<NaiveDateTime> {
        let mut instances = Vec::new();
        if dtstart >= from && dtstart < to {
            instances.push(dtstart);
        }
        let mut emitted: u32 = 1;
        if self.count.is_some_and(|count| emitted >= count) {
            return instances;
        }

        let mut period = self.first_period(dtstart, from);
        loop {
            let Some(period_start) = self.period_start(dtstart, period) else {
                break;
            };
            if period_start >= to || until.is_some_and(|until| period_start > until) {
                break;
            }

            for candidate in self.period_candidates(dtstart, period) {
                if candidate <= dtstart {
                    continue;
                }
                if until.is_some_and(|until| candidate > until) || candidate >= to {
                    return instances;
                }
                emitted = emitted.saturating_add(1);
                if candidate >= from {
                    instances.push(candidate);
                }
                if self.count.is_some_and(|count| emitted >= count) {
                    return instances;
                }
            }

            period = match period.checked_add(i64::from(self.interval)) {
                Some(next) => next,
                None => break,
            };
        }
        instances
    }

    /// Fixed-length frequencies without COUNT can skip periods that end before `from`.
    fn first_period(&self, dtstart: NaiveDateTime, from: NaiveDateTime) -> i64 {
        if self.count.is_some() || from <= dtstart {
            return 0;
        }
        let unit_seconds: i64 = match self.frequency {
            Frequency::Minutely => 60,
            Frequency::Hourly => 3_600,
            Frequency::Daily => 86_400,
            Frequency::Weekly => 7 * 86_400,
            Frequency::Monthly | Frequency::Yearly => return 0,
        };
        let step = unit_seconds * i64::from(self.interval);
        let skipped_steps = (from - dtstart).num_seconds() / step - 1;
        skipped_steps.max(0) * i64::from(self.interval)
    }

    fn period_start(&self, dtstart: NaiveDateTime, period: i64) -> Option<NaiveDateTime> {
        let midnight = |date: NaiveDate| date.and_time(NaiveTime::MIN);
        match self.frequency {
            Frequency::Minutely => dtstart.checked_add_signed(Duration::try_minutes(period)?),
            Frequency::Hourly => {
                let base = dtstart.checked_add_signed(Duration::try_hours(period)?)?;
                base.with_minute(0)?.with_second(0)
            }
            Frequency::Daily => Some(midnight(
                dtstart.date().checked_add_signed(Duration::try_days(period)?)?,
            )),
            Frequency::Weekly => Some(midnight(self.week_start_date(dtstart.date(), period)?)),
            Frequency::Monthly => {
                let (year, month) = add_months(dtstart.year(), dtstart.month(), period)?;
                Some(midnight(NaiveDate::from_ymd_opt(year, month, 1)?))
            }
            Frequency::Yearly => {
                let year = i32::try_from(i64::from(dtstart.year()) + period).ok()?;
                Some(midnight(NaiveDate::from_ymd_opt(year, 1, 1)?))
            }
        }
    }

    fn week_start_date(&self, date: NaiveDate, period: i64) -> Option<NaiveDate> {
        let back = days_from(self.week_start, date.weekday());
        date.checked_sub_signed(Duration::days(back))?
            .checked_add_signed(Duration::try_weeks(period)?)
    }

    fn period_candidates(&self, dtstart: NaiveDateTime, period: i64) -> Vec<NaiveDateTime> {
        let mut candidates = match self.frequency {
            Frequency::Minutely => Duration::try_minutes(period)
                .and_then(|offset| dtstart.checked_add_signed(offset))
                .into_iter()
                .filter(|candidate| self.matches_filters(*candidate))
                .collect::<Vec<_>>(),
            Frequency::Hourly => {
                let base = Duration::try_hours(period).and_then(|offset| dtstart.checked_add_signed(offset));
                let minutes = if self.by_minute.is_empty() {
                    vec![dtstart.minute()]
                } else {
                    self.by_minute.clone()
                };
                base.into_iter()
                    .flat_map(|base| minutes.iter().filter_map(move |minute| base.with_minute(*minute)))
                    .filter(|candidate| self.matches_filters(*candidate))
                    .collect()
            }
            Frequency::Daily | Frequency::Weekly | Frequency::Monthly | Frequency::Yearly => {
                let times = self.times_of_day(dtstart.time());
                self.period_dates(dtstart.date(), period)
                    .into_iter()
                    .flat_map(|date| times.iter().map(move |time| date.and_time(*time)))
                    .collect()
            }
        };
        candidates.sort_unstable();
        candidates.dedup();
        select_positions(candidates, &self.by_set_pos)
    }

    fn period_dates(&self, start: NaiveDate, period: i64) -> Vec<NaiveDate> {
        let dates = match self.frequency {
            Frequency::Minutely | Frequency::Hourly => Vec::new(),
            Frequency::Daily => Duration::try_days(period)
                .and_then(|offset| start.checked_add_signed(offset))
                .into_iter()
                .filter(|date| self.matches_month_day(*date) && self.matches_weekday(*date))
                .collect(),
            Frequency::Weekly => {
                let Some(week_start) = self.week_start_date(start, period) else {
                    return Vec::new();
                };
                let weekdays = if self.by_day.is_empty() {
                    vec![start.weekday()]
                } else {
                    self.by_day.iter().map(|rule| rule.weekday).collect()
                };
                weekdays
                    .into_iter()
                    .filter_map(|weekday| {
                        week_start.checked_add_signed(Duration::days(days_from(self.week_start, weekday)))
                    })
                    .collect()
            }
            Frequency::Monthly => {
                let Some((year, month)) = add_months(start.year(), start.month(), period) else {
                    return Vec::new();
                };
                self.dates_in_month(year, month, start.day())
            }
            Frequency::Yearly => {
                let Ok(year) = i32::try_from(i64::from(start.year()) + period) else {
                    return Vec::new();
                };
                if self.by_month.is_empty() && self.by_month_day.is_empty() && !self.by_day.is_empty() {
                    self.weekday_dates_in_year(year)
                } else {
                    let months = if !self.by_month.is_empty() {
                        self.by_month.clone()
                    } else if !self.by_month_day.is_empty() {
                        (1..=12).collect()
                    } else {
                        vec![start.month()]
                    };
                    months
                        .into_iter()
                        .flat_map(|month| self.dates_in_month(year, month, start.day()))
                        .collect()
                }
            }
        };
        dates
            .into_iter()
            .filter(|date| self.by_month.is_empty() || self.by_month.contains(&date.month()))
            .collect()
    }

    fn dates_in_month(&self, year: i32, month: u32, default_day: u32) -> Vec<NaiveDate> {
        let Some(length) = days_in_month(year, month) else {
            return Vec::new();
        };
        if !self.by_month_day.is_empty() {
            return self
                .by_month_day
                .iter()
                .filter_map(|day| resolve_signed_index(*day, length))
                .filter_map(|day| NaiveDate::from_ymd_opt(year, month, day))
                .filter(|date| self.matches_weekday(*date))
                .collect();
        }
        if !self.by_day.is_empty() {
            let days = (1..=length)
                .filter_map(|day| NaiveDate::from_ymd_opt(year, month, day))
                .collect::<Vec<_>>();
            return self.pick_weekdays(&days);
        }
        NaiveDate::from_ymd_opt(year, month, default_day)
            .into_iter()
            .collect()
    }

    fn weekday_dates_in_year(&self, year: i32) -> Vec<NaiveDate> {
        let Some(first) = NaiveDate::from_ymd_opt(year, 1, 1) else {
            return Vec::new();
        };
        let days = first
            .iter_days()
            .take_while(|date| date.year() == year)
            .collect::<Vec<_>>();
        self.pick_weekdays(&days)
    }

    /// Applies BYDAY to a month or year of dates; ordinals count within that span.
    fn pick_weekdays(&self, days: &[NaiveDate]) -> Vec<NaiveDate> {
        let mut picked = Vec::new();
        for rule in &self.by_day {
            let matching = days
                .iter()
                .copied()
                .filter(|date| date.weekday() == rule.weekday)
                .collect::<Vec<_>>();
            match rule.ordinal {
                None => picked.extend(matching),
                Some(ordinal) => {
                    let Ok(length) = u32::try_from(matching.len()) else {
                        continue;
                    };
                    if let Some(index) = resolve_signed_index(ordinal, length) {
                        picked.extend(matching.get(index as usize - 1).copied());
                    }
                }
            }
        }
        picked
    }

    fn times_of_day(&self, start: NaiveTime) -> Vec<NaiveTime> {
        let hours = if self.by_hour.is_empty() {
            vec![start.hour()]
        } else {
            self.by_hour.clone()
        };
        let minutes = if self.by_minute.is_empty() {
            vec![start.minute()]
        } else {
            self.by_minute.clone()
        };
        hours
            .iter()
            .flat_map(|hour| {
                minutes
                    .iter()
                    .filter_map(move |minute| NaiveTime::from_hms_opt(*hour, *minute, start.second()))
            })
            .collect()
    }

    fn matches_filters(&self, candidate: NaiveDateTime) -> bool {
        let date = candidate.date();
        (self.by_month.is_empty() || self.by_month.contains(&date.month()))
            && self.matches_month_day(date)
            && self.matches_weekday(date)
            && (self.by_hour.is_empty() || self.by_hour.contains(&candidate.hour()))
            && (self.by_minute.is_empty() || self.by_minute.contains(&candidate.minute()))
    }

    fn matches_month_day(&self, date: NaiveDate) -> bool {
        if self.by_month_day.is_empty() {
            return true;
        }
        let Some(length) = days_in_month(date.year(), date.month()) else {
            return false;
        };
        self.by_month_day
            .iter()
            .filter_map(|day| resolve_signed_index(*day, length))
            .any(|day| day == date.day())
    }

    fn matches_weekday(&self, date: NaiveDate) -> bool {
        self.by_day.is_empty() || self.by_day.iter().any(|rule| rule.weekday == date.weekday())
    }
}

fn select_positions(candidates: Vec<NaiveDateTime>, positions: &[i32]) -> Vec<NaiveDateTime> {
    if positions.is_empty() {
        return candidates;
    }
    let Ok(length) = u32::try_from(candidates.len()) else {
        return Vec::new();
    };
    let mut selected = positions
        .iter()
        .filter_map(|position| resolve_signed_index(*position, length))
        .filter_map(|index| candidates.get(index as usize - 1).copied())
        .collect::<Vec<_>>();
    selected.sort_unstable();
    selected.dedup();
    selected
}

/// 1-based index; negative values count back from `length`.
fn resolve_signed_index(value: i32, length: u32) -> Option<u32> {
    let length = i64::from(length);
    let value = i64::from(value);
    let resolved = if value > 0 { value } else { length + value + 1 };
    (1..=length).contains(&resolved).then(|| resolved as u32)
}

fn days_from(week_start: Weekday, weekday: Weekday) -> i64 {
    let start = i64::from(week_start.num_days_from_monday());
    let day = i64::from(weekday.num_days_from_monday());
    (day - start).rem_euclid(7)
}

fn add_months(year: i32, month: u32, offset: i64) -> Option<(i32, u32)> {
    let zero_based = i64::from(year) * 12 + i64::from(month) - 1 + offset;
    let year = i32::try_from(zero_based.div_euclid(12)).ok()?;
    let month = u32::try_from(zero_based.rem_euclid(12) + 1).ok()?;
    Some((year, month))
}

fn days_in_month(year: i32, month: u32) -> Option<u32> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let (next_year, next_month) = add_months(year, month, 1)?;
    let next = NaiveDate::from_ymd_opt(next_year, next_month, 1)?;
    u32::try_from((next - first).num_days()).ok()
}

fn invalid(part: &str, value: &str) -> RecurrenceError {
    RecurrenceError::InvalidPart {
        part: part.to_string(),
        value: value.to_string(),
    }
}

fn parse_frequency(value: &str) -> Result<Frequency, RecurrenceError> {
    match value.to_ascii_uppercase().as_str() {
        "MINUTELY" => Ok(Frequency::Minutely),
        "HOURLY" => Ok(Frequency::Hourly),
        "DAILY" => Ok(Frequency::Daily),
        "WEEKLY" => Ok(Frequency::Weekly),
        "MONTHLY" => Ok(Frequency::Monthly),
        "YEARLY" => Ok(Frequency::Yearly),
        other => Err(RecurrenceError::UnsupportedFrequency(other.to_string())),
    }
}

fn parse_list<T, F>(part: &str, value: &str, parse: F) -> Result<Vec<T>, RecurrenceError>
where
    F: Fn(&str) -> Option<T>,
{
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| parse(item).ok_or_else(|| invalid(part, item)))
        .collect()
}

fn parse_signed_in_range(value: &str, min: i32, max: i32) -> Option<i32> {
    let parsed = value.trim_start_matches('+').parse::<i32>().ok()?;
    (min..=max).contains(&parsed.abs()).then_some(parsed)
}

fn parse_weekday(value: &str) -> Option<Weekday> {
    match value.to_ascii_uppercase().as_str() {
        "MO" => Some(Weekday::Mon),
        "TU" => Some(Weekday::Tue),
        "WE" => Some(Weekday::Wed),
        "TH" => Some(Weekday::Thu),
        "FR" => Some(Weekday::Fri),
        "SA" => Some(Weekday::Sat),
        "SU" => Some(Weekday::Sun),
        _ => None,
    }
}

fn parse_weekday_rule(value: &str) -> Option<WeekdayRule> {
    let split_at = value.len().checked_sub(2)?;
    let (ordinal, weekday) = value.split_at_checked(split_at)?;
    let weekday = parse_weekday(weekday)?;
    let ordinal = if ordinal.is_empty() {
        None
    } else {
        Some(parse_signed_in_range(ordinal, 1, 53)?)
    };
    Some(WeekdayRule { ordinal, weekday })
}

fn parse_until(value: &str) -> Option<RuleUntil> {
    if let Some(utc) = value.strip_suffix('Z') {
        let parsed = NaiveDateTime::parse_from_str(utc, "%Y%m%dT%H%M%S").ok()?;
        return Some(RuleUntil::Utc(parsed.and_utc()));
    }
    if value.contains('T') {
        return NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S")
            .ok()
            .map(RuleUntil::Floating);
    }
    NaiveDate::parse_from_str(value, "%Y%m%d")
        .ok()
        .map(RuleUntil::Date)
}
