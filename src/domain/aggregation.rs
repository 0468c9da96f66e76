use crate::domain::models::{AggregationMap, EventOccurrence};

const MS_PER_MINUTE: i64 = 60_000;

/// Whitespace-separated title tokens starting with `prefix`. An empty prefix keeps every token.
pub fn extract_tokens<'a>(title: &'a str, prefix: &'a str) -> impl Iterator<Item = &'a str> + 'a {
    title
        .split_whitespace()
        .filter(move |token| token.starts_with(prefix))
}

/// Sums `end - start` per token. Occurrences without a title, start or end are skipped;
/// negative spans and overlapping occurrences are summed as they are.
pub fn aggregate_durations<'a, I>(occurrences: I, prefix: &str) -> AggregationMap
where
    I: IntoIterator<Item = &'a EventOccurrence>,
{
    let mut totals = AggregationMap::new();
    for occurrence in occurrences {
        let Some((title, start, end)) = occurrence.parts() else {
            tracing::debug!(?occurrence, "skipping malformed occurrence");
            continue;
        };
        let duration_ms = (end - start).num_milliseconds();
        for token in extract_tokens(title, prefix) {
            *totals.entry(token.to_string()).or_insert(0) += duration_ms;
        }
    }
    totals
}

/// `{H}h {M}m` when at least an hour has accrued, `{M}m` otherwise.
pub fn format_duration(duration_ms: i64) -> String {
    let total_minutes = duration_ms.div_euclid(MS_PER_MINUTE);
    let hours = total_minutes.div_euclid(60);
    let minutes = total_minutes.rem_euclid(60);
    if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}
