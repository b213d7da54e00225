use chrono::{DateTime, Datelike};

use crate::model::*;

// ── Free-slot algebra ─────────────────────────────────────────────

/// Lay recurring weekly windows onto every calendar day (UTC) touched by
/// `range`, clamped to `range`. Output is sorted by start.
///
/// One span per window occurrence. Windows that touch are not merged: a
/// booking must fit inside a single window, so a merged span would advertise
/// time that cannot be booked.
pub fn materialize_windows(windows: &[AvailabilityWindow], range: &Span) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut day_start = range.start.div_euclid(DAY_MS) * DAY_MS;

    while day_start < range.end {
        if let Some(day) = DateTime::from_timestamp_millis(day_start) {
            let weekday = day.weekday().num_days_from_sunday() as u8;
            for w in windows.iter().filter(|w| w.active && w.day_of_week == weekday) {
                let of_day = w.span_of_day();
                let start = (day_start + of_day.start).max(range.start);
                let end = (day_start + of_day.end).min(range.end);
                if start < end {
                    spans.push(Span::new(start, end));
                }
            }
        }
        day_start += DAY_MS;
    }

    spans.sort_by_key(|s| s.start);
    spans
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end {
                last.end = last.end.max(span.end);
                continue;
            }
        merged.push(span);
    }
    merged
}

/// Remove every span of `to_remove` from `base`. Both inputs sorted by start.
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
