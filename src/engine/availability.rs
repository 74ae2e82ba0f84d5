use chrono::{NaiveDate, NaiveTime, TimeDelta};

use crate::model::*;

// ── Window admission ──────────────────────────────────────────────

/// Whether a court's schedule admits `span`. Only the time-of-day parts of
/// `span.start` and `span.end` are inspected.
///
/// With windows configured the request must fit inside a single window;
/// touching windows are not joined. Without windows, the open/close pair
/// bounds each side independently and an unset side is unbounded.
pub fn permits(schedule: &Schedule, span: &Span) -> bool {
    let start = span.start.time();
    let end = span.end.time();

    if !schedule.windows.is_empty() {
        return schedule.windows.iter().any(|w| w.contains(start, end));
    }

    schedule.open.is_none_or(|open| start >= open)
        && schedule.close.is_none_or(|close| end <= close)
}

// ── Free slots ────────────────────────────────────────────────────

/// Spans on `date` during which the schedule admits bookings, merged.
pub fn day_spans(schedule: &Schedule, date: NaiveDate) -> Vec<Span> {
    let midnight = date.and_time(NaiveTime::default());
    let next_midnight = midnight + TimeDelta::days(1);

    let mut spans: Vec<Span> = if schedule.windows.is_empty() {
        let start = schedule.open.map_or(midnight, |t| date.and_time(t));
        let end = schedule.close.map_or(next_midnight, |t| date.and_time(t));
        Span::try_new(start, end).into_iter().collect()
    } else {
        schedule
            .windows
            .iter()
            .filter_map(|w| Span::try_new(date.and_time(w.start), date.and_time(w.end)))
            .collect()
    };

    spans.sort_by_key(|s| s.start);
    merge_overlapping(&spans)
}

/// Bookable spans on `date`: the schedule's spans minus every interval that
/// blocks under `policy`.
pub fn free_slots(resource: &ResourceState, date: NaiveDate, policy: ConflictPolicy) -> Vec<Span> {
    let base = day_spans(&resource.schedule, date);
    if base.is_empty() {
        return base;
    }
    let day = match (base.first(), base.last()) {
        (Some(first), Some(last)) => Span::new(first.start, last.end),
        _ => return base,
    };
    let taken: Vec<Span> = resource
        .index
        .overlapping(&day)
        .filter(|e| policy.blocks(e.state))
        .map(|e| e.span)
        .collect();
    if taken.is_empty() {
        return base;
    }
    subtract_intervals(&base, &taken)
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

/// Remove `to_remove` (sorted by start) from `base` (sorted, disjoint).
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}
