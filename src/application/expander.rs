use crate::domain::models::{local_to_utc, EventOccurrence, TimeWindow};
use crate::domain::recurrence::{RecurrenceRule, RuleUntil};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::ics_parser::{parse_feed, EventTime, FeedEvent};
use chrono::{DateTime, Duration, NaiveDateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use std::collections::{HashMap, HashSet};

/// How an instance's end is derived from its start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InstanceSpan {
    /// All-day lengths are added in wall-clock time so days stay whole across DST.
    WallClock(Duration),
    Exact(Duration),
}

/// Expands `feed_text` into the occurrences that overlap `window`.
pub fn expand_feed(
    feed_text: &str,
    window: TimeWindow,
    zone: Tz,
) -> Result<Vec<EventOccurrence>, InfraError> {
    let events = parse_feed(feed_text, zone)?;

    let (overrides, masters): (Vec<&FeedEvent>, Vec<&FeedEvent>) =
        events.iter().partition(|event| event.recurrence_id.is_some());

    let master_spans = masters
        .iter()
        .filter_map(|event| Some((event.uid.as_deref()?, instance_span(event, zone))))
        .collect::<HashMap<_, _>>();
    let replaced = overrides
        .iter()
        .filter_map(|event| {
            let recurrence_id = event.recurrence_id?;
            Some((event.uid.clone(), recurrence_id.to_utc(zone)))
        })
        .collect::<HashSet<_>>();

    let mut occurrences = Vec::new();
    for master in &masters {
        let span = instance_span(master, zone);
        for start in instance_starts(master, window, span, zone) {
            let start_utc = local_to_utc(master.start.zone(zone), start);
            if replaced.contains(&(master.uid.clone(), start_utc)) {
                continue;
            }
            push_if_overlapping(&mut occurrences, master, start, span, window, zone);
        }
    }

    for event in &overrides {
        let own_span = instance_span(event, zone);
        let span = match own_span {
            Some(_) => own_span,
            None => event
                .uid
                .as_deref()
                .and_then(|uid| master_spans.get(uid).copied())
                .flatten(),
        };
        let start = event.start.wall_clock(event.start.zone(zone), zone);
        push_if_overlapping(&mut occurrences, event, start, span, window, zone);
    }

    occurrences.sort_by_key(|occurrence| occurrence.start);
    tracing::debug!(
        events = events.len(),
        occurrences = occurrences.len(),
        "expanded calendar feed"
    );
    Ok(occurrences)
}

fn push_if_overlapping(
    occurrences: &mut Vec<EventOccurrence>,
    event: &FeedEvent,
    start: NaiveDateTime,
    span: Option<InstanceSpan>,
    window: TimeWindow,
    zone: Tz,
) {
    let event_zone = event.start.zone(zone);
    let start_utc = local_to_utc(event_zone, start);
    let end_utc = span.map(|span| instance_end(event_zone, start, start_utc, span));
    if window.overlaps(start_utc, end_utc) {
        occurrences.push(EventOccurrence {
            title: event.summary.clone(),
            start: Some(start_utc),
            end: end_utc,
        });
    }
}

fn instance_end(
    zone: Tz,
    start: NaiveDateTime,
    start_utc: DateTime<Utc>,
    span: InstanceSpan,
) -> DateTime<Utc> {
    match span {
        InstanceSpan::WallClock(length) => start
            .checked_add_signed(length)
            .map(|end| local_to_utc(zone, end))
            .unwrap_or(start_utc),
        InstanceSpan::Exact(length) => start_utc.checked_add_signed(length).unwrap_or(start_utc),
    }
}

fn instance_span(event: &FeedEvent, zone: Tz) -> Option<InstanceSpan> {
    if event.start.is_date() {
        let length = match (event.end, event.duration) {
            (Some(EventTime::Date(end)), _) => match event.start {
                EventTime::Date(start) => end - start,
                _ => Duration::days(1),
            },
            (_, Some(duration)) => duration,
            _ => Duration::days(1),
        };
        return Some(InstanceSpan::WallClock(length));
    }

    match (event.end, event.duration) {
        (Some(end), _) => {
            let start_utc = event.start.to_utc(zone);
            Some(InstanceSpan::Exact(end.to_utc(zone) - start_utc))
        }
        (None, Some(duration)) => Some(InstanceSpan::Exact(duration)),
        (None, None) => None,
    }
}

/// Wall-clock instance starts in the event's zone that may overlap `window`.
fn instance_starts(
    event: &FeedEvent,
    window: TimeWindow,
    span: Option<InstanceSpan>,
    zone: Tz,
) -> Vec<NaiveDateTime> {
    let event_zone = event.start.zone(zone);
    let dtstart = event.start.wall_clock(event_zone, zone);

    let rule = event.rrule.as_deref().and_then(|raw| {
        raw.parse::<RecurrenceRule>()
            .map_err(|error| {
                tracing::warn!(uid = ?event.uid, rule = raw, %error, "ignoring malformed recurrence rule");
            })
            .ok()
    });
    if rule.is_none() && event.rdates.is_empty() {
        return vec![dtstart];
    }

    // Instances starting this long before the window may still reach into it.
    let reach = match span {
        Some(InstanceSpan::WallClock(length) | InstanceSpan::Exact(length)) if length > Duration::zero() => length,
        _ => Duration::zero(),
    };
    let from = (window.start - reach - Duration::days(1))
        .with_timezone(&event_zone)
        .naive_local();
    let to = (window.end + Duration::days(1))
        .with_timezone(&event_zone)
        .naive_local();

    let mut starts = match &rule {
        Some(rule) => {
            let until = rule.until.map(|until| match until {
                RuleUntil::Utc(value) => value.with_timezone(&event_zone).naive_local(),
                RuleUntil::Floating(value) => value,
                RuleUntil::Date(date) if event.start.is_date() => date.and_time(NaiveTime::MIN),
                RuleUntil::Date(date) => date.and_time(NaiveTime::MIN) + Duration::days(1) - Duration::seconds(1),
            });
            rule.instances(dtstart, until, from, to)
        }
        None => vec![dtstart],
    };
    starts.extend(
        event
            .rdates
            .iter()
            .map(|rdate| rdate.wall_clock(event_zone, zone)),
    );
    starts.sort_unstable();
    starts.dedup();

    starts.retain(|start| {
        !event.exdates.iter().any(|exdate| match exdate {
            EventTime::Date(date) => start.date() == *date,
            other => other.wall_clock(event_zone, zone) == *start,
        })
    });
    starts
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn date(value: &str) -> NaiveDate {
        NaiveDate::parse_from_str(value, "%Y-%m-%d").expect("valid date")
    }

    fn feed(events: &str) -> String {
        format!("BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//calsum//test//EN\r\n{events}END:VCALENDAR\r\n")
    }

    fn window(start: &str, end: &str) -> TimeWindow {
        TimeWindow::from_dates(date(start), date(end), Tz::UTC)
    }

    fn starts(occurrences: &[EventOccurrence]) -> Vec<DateTime<Utc>> {
        occurrences.iter().filter_map(|occurrence| occurrence.start).collect()
    }

    #[test]
    fn single_event_inside_window() {
        let text = feed(
            "BEGIN:VEVENT\r\nUID:1\r\nSUMMARY:#task Review\r\nDTSTART:20241223T090000Z\r\nDTEND:20241223T103000Z\r\nEND:VEVENT\r\n",
        );
        let occurrences = expand_feed(&text, window("2024-12-23", "2024-12-24"), Tz::UTC)
            .expect("expansion succeeds");

        assert_eq!(
            occurrences,
            vec![EventOccurrence::new(
                "#task Review",
                fixed_time("2024-12-23T09:00:00Z"),
                fixed_time("2024-12-23T10:30:00Z"),
            )]
        );
    }

    #[test]
    fn events_outside_window_are_dropped() {
        let text = feed(concat!(
            "BEGIN:VEVENT\r\nUID:before\r\nSUMMARY:#a\r\nDTSTART:20241222T230000Z\r\nDTEND:20241223T000000Z\r\nEND:VEVENT\r\n",
            "BEGIN:VEVENT\r\nUID:after\r\nSUMMARY:#a\r\nDTSTART:20241224T000000Z\r\nDTEND:20241224T010000Z\r\nEND:VEVENT\r\n",
            "BEGIN:VEVENT\r\nUID:straddle\r\nSUMMARY:#a\r\nDTSTART:20241222T230000Z\r\nDTEND:20241223T010000Z\r\nEND:VEVENT\r\n",
        ));
        let occurrences = expand_feed(&text, window("2024-12-23", "2024-12-24"), Tz::UTC)
            .expect("expansion succeeds");
        assert_eq!(starts(&occurrences), vec![fixed_time("2024-12-22T23:00:00Z")]);
    }

    #[test]
    fn daily_series_is_clipped_to_window() {
        let text = feed(
            "BEGIN:VEVENT\r\nUID:standup\r\nSUMMARY:#standup\r\nDTSTART:20240101T090000Z\r\nDURATION:PT15M\r\nRRULE:FREQ=DAILY\r\nEND:VEVENT\r\n",
        );
        let occurrences = expand_feed(&text, window("2024-12-23", "2024-12-26"), Tz::UTC)
            .expect("expansion succeeds");

        assert_eq!(
            starts(&occurrences),
            vec![
                fixed_time("2024-12-23T09:00:00Z"),
                fixed_time("2024-12-24T09:00:00Z"),
                fixed_time("2024-12-25T09:00:00Z"),
            ]
        );
        assert!(occurrences.iter().all(|occurrence| {
            occurrence.end.zip(occurrence.start).map(|(end, start)| end - start)
                == Some(Duration::minutes(15))
        }));
    }

    #[test]
    fn exdate_rdate_and_override_are_applied() {
        let text = feed(concat!(
            "BEGIN:VEVENT\r\nUID:series\r\nSUMMARY:#sync\r\nDTSTART:20241223T090000Z\r\nDTEND:20241223T100000Z\r\n",
            "RRULE:FREQ=DAILY;COUNT=4\r\nEXDATE:20241224T090000Z\r\nRDATE:20241223T150000Z\r\nEND:VEVENT\r\n",
            "BEGIN:VEVENT\r\nUID:series\r\nSUMMARY:#sync moved\r\nRECURRENCE-ID:20241225T090000Z\r\n",
            "DTSTART:20241225T130000Z\r\nEND:VEVENT\r\n",
        ));
        let occurrences = expand_feed(&text, window("2024-12-23", "2024-12-30"), Tz::UTC)
            .expect("expansion succeeds");

        assert_eq!(
            starts(&occurrences),
            vec![
                fixed_time("2024-12-23T09:00:00Z"),
                fixed_time("2024-12-23T15:00:00Z"),
                fixed_time("2024-12-25T13:00:00Z"),
                fixed_time("2024-12-26T09:00:00Z"),
            ]
        );
        let moved = &occurrences[2];
        assert_eq!(moved.title.as_deref(), Some("#sync moved"));
        assert_eq!(moved.end, Some(fixed_time("2024-12-25T14:00:00Z")));
    }

    #[test]
    fn zoned_series_keeps_wall_clock_across_dst() {
        let text = feed(
            "BEGIN:VEVENT\r\nUID:z\r\nSUMMARY:#a\r\nDTSTART;TZID=Europe/Berlin:20240329T090000\r\nDTEND;TZID=Europe/Berlin:20240329T100000\r\nRRULE:FREQ=DAILY;COUNT=3\r\nEND:VEVENT\r\n",
        );
        let occurrences = expand_feed(&text, window("2024-03-29", "2024-04-01"), Tz::UTC)
            .expect("expansion succeeds");
        assert_eq!(
            starts(&occurrences),
            vec![
                fixed_time("2024-03-29T08:00:00Z"),
                fixed_time("2024-03-30T08:00:00Z"),
                fixed_time("2024-03-31T07:00:00Z"),
            ]
        );
    }

    #[test]
    fn all_day_event_lasts_a_day_in_configured_zone() {
        let text = feed("BEGIN:VEVENT\r\nUID:d\r\nSUMMARY:#offsite\r\nDTSTART;VALUE=DATE:20241223\r\nEND:VEVENT\r\n");
        let zone = chrono_tz::Europe::Berlin;
        let occurrences = expand_feed(
            &text,
            TimeWindow::from_dates(date("2024-12-23"), date("2024-12-24"), zone),
            zone,
        )
        .expect("expansion succeeds");

        assert_eq!(
            occurrences,
            vec![EventOccurrence::new(
                "#offsite",
                fixed_time("2024-12-22T23:00:00Z"),
                fixed_time("2024-12-23T23:00:00Z"),
            )]
        );
    }

    #[test]
    fn timed_event_without_end_has_no_end() {
        let text = feed("BEGIN:VEVENT\r\nUID:p\r\nSUMMARY:#ping\r\nDTSTART:20241223T090000Z\r\nEND:VEVENT\r\n");
        let occurrences = expand_feed(&text, window("2024-12-23", "2024-12-24"), Tz::UTC)
            .expect("expansion succeeds");
        assert_eq!(occurrences.len(), 1);
        assert!(occurrences[0].end.is_none());
    }

    #[test]
    fn malformed_rule_keeps_first_instance_only() {
        let text = feed(
            "BEGIN:VEVENT\r\nUID:bad\r\nSUMMARY:#a\r\nDTSTART:20241223T090000Z\r\nDTEND:20241223T100000Z\r\nRRULE:FREQ=SECONDLY\r\nEND:VEVENT\r\n",
        );
        let occurrences = expand_feed(&text, window("2024-12-23", "2024-12-30"), Tz::UTC)
            .expect("expansion succeeds");
        assert_eq!(starts(&occurrences), vec![fixed_time("2024-12-23T09:00:00Z")]);
    }

    #[test]
    fn until_bounds_the_series() {
        let text = feed(
            "BEGIN:VEVENT\r\nUID:u\r\nSUMMARY:#a\r\nDTSTART:20241223T090000Z\r\nDTEND:20241223T100000Z\r\nRRULE:FREQ=DAILY;UNTIL=20241224T090000Z\r\nEND:VEVENT\r\n",
        );
        let occurrences = expand_feed(&text, window("2024-12-20", "2024-12-30"), Tz::UTC)
            .expect("expansion succeeds");
        assert_eq!(occurrences.len(), 2);
    }

    #[test]
    fn invalid_feed_is_an_error() {
        let result = expand_feed("garbage", window("2024-12-23", "2024-12-24"), Tz::UTC);
        assert!(matches!(result, Err(InfraError::InvalidFeed(_))));
    }
}
