use crate::model::{DAY_MS, Ms};

pub const DEFAULT_DURATION_MINUTES: u32 = 30;
pub const MAX_DURATION_MINUTES: u32 = 24 * 60;

pub const MAX_NOTES_LEN: usize = 4096;
pub const MAX_NAME_LEN: usize = 100;
pub const MAX_LOCATION_LEN: usize = 100;

pub const MAX_WINDOWS_PER_DOCTOR: usize = 64;
/// Cap on Scheduled appointments per doctor. Terminal rows are not counted.
pub const MAX_APPOINTMENTS_PER_DOCTOR: usize = 100_000;
pub const MAX_RESOURCES: usize = 100_000;

/// Widest range accepted by open-slot search.
pub const MAX_QUERY_WINDOW_MS: Ms = 92 * DAY_MS;

/// 2000-01-01T00:00:00Z .. 2200-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;
