use crate::domain::models::local_to_utc;
use crate::infrastructure::error::InfraError;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use ical::parser::ical::component::IcalEvent;
use ical::property::Property;
use std::io::BufReader;

const PROP_UID: &str = "UID";
const PROP_SUMMARY: &str = "SUMMARY";
const PROP_DTSTART: &str = "DTSTART";
const PROP_DTEND: &str = "DTEND";
const PROP_DURATION: &str = "DURATION";
const PROP_RRULE: &str = "RRULE";
const PROP_EXDATE: &str = "EXDATE";
const PROP_RDATE: &str = "RDATE";
const PROP_RECURRENCE_ID: &str = "RECURRENCE-ID";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTime {
    Date(NaiveDate),
    Utc(DateTime<Utc>),
    Zoned(NaiveDateTime, Tz),
    Floating(NaiveDateTime),
}

impl EventTime {
    pub fn is_date(&self) -> bool {
        matches!(self, Self::Date(_))
    }

    /// Zone in which recurrence arithmetic for this value runs.
    pub fn zone(&self, default_zone: Tz) -> Tz {
        match self {
            Self::Utc(_) => Tz::UTC,
            Self::Zoned(_, zone) => *zone,
            Self::Date(_) | Self::Floating(_) => default_zone,
        }
    }

    pub fn to_utc(&self, default_zone: Tz) -> DateTime<Utc> {
        match self {
            Self::Date(date) => local_to_utc(default_zone, date.and_time(NaiveTime::MIN)),
            Self::Utc(value) => *value,
            Self::Zoned(local, zone) => local_to_utc(*zone, *local),
            Self::Floating(local) => local_to_utc(default_zone, *local),
        }
    }

    /// Wall-clock value as seen in `zone`.
    pub fn wall_clock(&self, zone: Tz, default_zone: Tz) -> NaiveDateTime {
        match self {
            Self::Date(date) => date.and_time(NaiveTime::MIN),
            Self::Floating(local) => *local,
            Self::Zoned(local, own_zone) if *own_zone == zone => *local,
            Self::Utc(_) | Self::Zoned(_, _) => {
                self.to_utc(default_zone).with_timezone(&zone).naive_local()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEvent {
    pub uid: Option<String>,
    pub summary: Option<String>,
    pub start: EventTime,
    pub end: Option<EventTime>,
    pub duration: Option<Duration>,
    pub rrule: Option<String>,
    pub exdates: Vec<EventTime>,
    pub rdates: Vec<EventTime>,
    pub recurrence_id: Option<EventTime>,
}

/// Parses every VEVENT of every VCALENDAR in `text`. Events without a usable
/// DTSTART are dropped; text that is not iCalendar is an error.
pub fn parse_feed(text: &str, default_zone: Tz) -> Result<Vec<FeedEvent>, InfraError> {
    let reader = ical::IcalParser::new(BufReader::new(text.as_bytes()));
    let mut events = Vec::new();
    for calendar in reader {
        let calendar = calendar
            .map_err(|error| InfraError::InvalidFeed(format!("iCalendar parse error: {error}")))?;
        for event in &calendar.events {
            if let Some(parsed) = decode_event(event, default_zone) {
                events.push(parsed);
            }
        }
    }
    Ok(events)
}

fn decode_event(event: &IcalEvent, default_zone: Tz) -> Option<FeedEvent> {
    let mut uid = None;
    let mut summary = None;
    let mut start = None;
    let mut end = None;
    let mut duration = None;
    let mut rrule = None;
    let mut exdates = Vec::new();
    let mut rdates = Vec::new();
    let mut recurrence_id = None;

    for property in &event.properties {
        let Some(value) = property.value.as_deref().map(str::trim) else {
            continue;
        };
        match property.name.to_ascii_uppercase().as_str() {
            PROP_UID => uid = Some(value.to_string()).filter(|uid| !uid.is_empty()),
            PROP_SUMMARY => summary = Some(unescape_text(value)),
            PROP_DTSTART => start = parse_event_time(property, value, default_zone),
            PROP_DTEND => end = parse_event_time(property, value, default_zone),
            PROP_DURATION => duration = parse_duration(value),
            PROP_RRULE => rrule = Some(value.to_string()),
            PROP_EXDATE => exdates.extend(parse_time_list(property, value, default_zone)),
            PROP_RDATE => rdates.extend(parse_time_list(property, value, default_zone)),
            PROP_RECURRENCE_ID => {
                recurrence_id = parse_event_time(property, value, default_zone)
            }
            _ => {}
        }
    }

    let Some(start) = start else {
        tracing::debug!(?uid, ?summary, "skipping event without a valid DTSTART");
        return None;
    };
    Some(FeedEvent {
        uid,
        summary,
        start,
        end,
        duration,
        rrule,
        exdates,
        rdates,
        recurrence_id,
    })
}

fn param<'a>(property: &'a Property, name: &str) -> Option<&'a str> {
    property
        .params
        .as_ref()?
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .and_then(|(_, values)| values.first())
        .map(|value| value.trim().trim_matches('"'))
}

fn parse_time_list(property: &Property, value: &str, default_zone: Tz) -> Vec<EventTime> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        // RDATE periods keep only their start.
        .map(|item| item.split('/').next().unwrap_or(item))
        .filter_map(|item| parse_event_time(property, item, default_zone))
        .collect()
}

fn parse_event_time(property: &Property, value: &str, default_zone: Tz) -> Option<EventTime> {
    let is_date = param(property, "VALUE").is_some_and(|kind| kind.eq_ignore_ascii_case("DATE"))
        || (value.len() == 8 && !value.contains('T'));
    if is_date {
        return NaiveDate::parse_from_str(value, "%Y%m%d")
            .map(EventTime::Date)
            .map_err(|error| tracing::warn!(property = %property.name, value, %error, "invalid date value"))
            .ok();
    }

    if let Some(utc) = value.strip_suffix('Z') {
        return parse_local(utc).map(|local| EventTime::Utc(local.and_utc()));
    }
    let local = parse_local(value)?;
    match param(property, "TZID") {
        Some(tzid) => Some(EventTime::Zoned(local, resolve_tzid(tzid, default_zone))),
        None => Some(EventTime::Floating(local)),
    }
}

fn parse_local(value: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S")
        .map_err(|error| tracing::warn!(value, %error, "invalid date-time value"))
        .ok()
}

fn resolve_tzid(tzid: &str, default_zone: Tz) -> Tz {
    let trimmed = tzid.trim_start_matches('/');
    trimmed.parse::<Tz>().unwrap_or_else(|_| {
        tracing::warn!(tzid, fallback = %default_zone, "unknown TZID, using configured time zone");
        default_zone
    })
}

/// `[+-]P[nW][nD][T[nH][nM][nS]]`
pub fn parse_duration(value: &str) -> Option<Duration> {
    let (negative, rest) = match value.as_bytes().first()? {
        b'-' => (true, &value[1..]),
        b'+' => (false, &value[1..]),
        _ => (false, value),
    };
    let rest = rest.strip_prefix('P')?;

    let mut total = Duration::zero();
    let mut in_time = false;
    let mut digits = String::new();
    let mut saw_component = false;
    for ch in rest.chars() {
        match ch {
            'T' if !in_time && digits.is_empty() => in_time = true,
            '0'..='9' => digits.push(ch),
            unit => {
                let amount = digits.parse::<i64>().ok()?;
                digits.clear();
                let part = match (unit, in_time) {
                    ('W', false) => Duration::try_weeks(amount)?,
                    ('D', false) => Duration::try_days(amount)?,
                    ('H', true) => Duration::try_hours(amount)?,
                    ('M', true) => Duration::try_minutes(amount)?,
                    ('S', true) => Duration::try_seconds(amount)?,
                    _ => return None,
                };
                total = total.checked_add(&part)?;
                saw_component = true;
            }
        }
    }
    if !digits.is_empty() || !saw_component {
        return None;
    }
    Some(if negative { -total } else { total })
}

/// Reverses TEXT escaping (`\n`, `\,`, `\;`, `\\`).
fn unescape_text(value: &str) -> String {
    let mut unescaped = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            unescaped.push(ch);
            continue;
        }
        match chars.next() {
            Some('n' | 'N') => unescaped.push('\n'),
            Some(other) => unescaped.push(other),
            None => unescaped.push('\\'),
        }
    }
    unescaped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(events: &str) -> String {
        format!("BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//calsum//test//EN\r\n{events}END:VCALENDAR\r\n")
    }

    fn local(value: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M").expect("valid local datetime")
    }

    #[test]
    fn parses_basic_event_fields() {
        let text = feed(
            "BEGIN:VEVENT\r\nUID:abc-1\r\nSUMMARY:#task Review\\, then ship\r\nDTSTART:20241223T090000Z\r\nDTEND:20241223T103000Z\r\nEND:VEVENT\r\n",
        );
        let events = parse_feed(&text, Tz::UTC).expect("feed parses");

        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.uid.as_deref(), Some("abc-1"));
        assert_eq!(event.summary.as_deref(), Some("#task Review, then ship"));
        assert_eq!(event.start, EventTime::Utc(local("2024-12-23 09:00").and_utc()));
        assert_eq!(event.end, Some(EventTime::Utc(local("2024-12-23 10:30").and_utc())));
        assert!(event.rrule.is_none());
    }

    #[test]
    fn reads_tzid_date_and_floating_values() {
        let text = feed(concat!(
            "BEGIN:VEVENT\r\nUID:zoned\r\nDTSTART;TZID=Europe/Berlin:20241223T090000\r\nEND:VEVENT\r\n",
            "BEGIN:VEVENT\r\nUID:all-day\r\nDTSTART;VALUE=DATE:20241224\r\nEND:VEVENT\r\n",
            "BEGIN:VEVENT\r\nUID:floating\r\nDTSTART:20241225T080000\r\nEND:VEVENT\r\n",
            "BEGIN:VEVENT\r\nUID:unknown-zone\r\nDTSTART;TZID=Mars/Olympus:20241226T080000\r\nEND:VEVENT\r\n",
        ));
        let events = parse_feed(&text, chrono_tz::Asia::Tokyo).expect("feed parses");

        assert_eq!(
            events[0].start,
            EventTime::Zoned(local("2024-12-23 09:00"), chrono_tz::Europe::Berlin)
        );
        assert_eq!(
            events[1].start,
            EventTime::Date(NaiveDate::from_ymd_opt(2024, 12, 24).expect("date"))
        );
        assert_eq!(events[2].start, EventTime::Floating(local("2024-12-25 08:00")));
        assert_eq!(
            events[3].start,
            EventTime::Zoned(local("2024-12-26 08:00"), chrono_tz::Asia::Tokyo)
        );
    }

    #[test]
    fn collects_recurrence_properties() {
        let text = feed(
            "BEGIN:VEVENT\r\nUID:series\r\nDTSTART:20241223T090000Z\r\nDURATION:PT45M\r\nRRULE:FREQ=DAILY;COUNT=5\r\nEXDATE:20241224T090000Z,20241225T090000Z\r\nEXDATE:20241226T090000Z\r\nRDATE;VALUE=PERIOD:20241230T120000Z/PT1H\r\nEND:VEVENT\r\n\
             BEGIN:VEVENT\r\nUID:series\r\nRECURRENCE-ID:20241227T090000Z\r\nDTSTART:20241227T140000Z\r\nDTEND:20241227T150000Z\r\nEND:VEVENT\r\n",
        );
        let events = parse_feed(&text, Tz::UTC).expect("feed parses");

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].rrule.as_deref(), Some("FREQ=DAILY;COUNT=5"));
        assert_eq!(events[0].duration, Some(Duration::minutes(45)));
        assert_eq!(events[0].exdates.len(), 3);
        assert_eq!(
            events[0].rdates,
            vec![EventTime::Utc(local("2024-12-30 12:00").and_utc())]
        );
        assert_eq!(
            events[1].recurrence_id,
            Some(EventTime::Utc(local("2024-12-27 09:00").and_utc()))
        );
    }

    #[test]
    fn drops_events_without_start_and_ignores_other_components() {
        let text = feed(concat!(
            "BEGIN:VEVENT\r\nUID:no-start\r\nSUMMARY:#a\r\nEND:VEVENT\r\n",
            "BEGIN:VTODO\r\nUID:todo\r\nSUMMARY:#a\r\nDTSTART:20241223T090000Z\r\nEND:VTODO\r\n",
            "BEGIN:VEVENT\r\nUID:bad-start\r\nDTSTART:yesterday\r\nEND:VEVENT\r\n",
        ));
        let events = parse_feed(&text, Tz::UTC).expect("feed parses");
        assert!(events.is_empty());
    }

    #[test]
    fn rejects_text_that_is_not_icalendar() {
        let result = parse_feed("this is not a calendar", Tz::UTC);
        assert!(matches!(result, Err(InfraError::InvalidFeed(_))));
    }

    #[test]
    fn wall_clock_converts_between_zones() {
        let utc = EventTime::Utc(local("2024-12-23 08:00").and_utc());
        assert_eq!(
            utc.wall_clock(chrono_tz::Europe::Berlin, Tz::UTC),
            local("2024-12-23 09:00")
        );
        let floating = EventTime::Floating(local("2024-12-23 08:00"));
        assert_eq!(
            floating.to_utc(chrono_tz::Europe::Berlin),
            local("2024-12-23 07:00").and_utc()
        );
    }

    #[test]
    fn parses_durations() {
        assert_eq!(parse_duration("PT1H30M"), Some(Duration::minutes(90)));
        assert_eq!(parse_duration("P1D"), Some(Duration::days(1)));
        assert_eq!(parse_duration("P1W"), Some(Duration::weeks(1)));
        assert_eq!(parse_duration("P1DT2H"), Some(Duration::hours(26)));
        assert_eq!(parse_duration("-PT15M"), Some(Duration::minutes(-15)));
        assert_eq!(parse_duration("PT"), None);
        assert_eq!(parse_duration("1H"), None);
        assert_eq!(parse_duration("PT5X"), None);
    }

    #[test]
    fn unescapes_text_values() {
        assert_eq!(unescape_text(r"a\, b\; c\\d\ne"), "a, b; c\\d\ne");
    }
}
