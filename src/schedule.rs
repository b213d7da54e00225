use std::sync::Arc;

use chrono::{DateTime, Datelike};
use dashmap::DashMap;
use tokio::sync::RwLock;
use tracing::info;

use crate::commit::Committer;
use crate::error::CoreError;
use crate::limits::MAX_WINDOWS_PER_DOCTOR;
use crate::model::*;

type WindowTable = DashMap<DoctorId, Arc<[AvailabilityWindow]>>;

/// Recurring weekly availability per doctor.
///
/// Reads clone an `Arc` snapshot out of the table and never wait on writers.
/// Writes for one doctor are serialized through a per-doctor gate and
/// journaled before the snapshot is swapped.
pub struct ScheduleIndex {
    windows: Arc<WindowTable>,
    write_gates: DashMap<DoctorId, Arc<RwLock<()>>>,
    committer: Arc<Committer>,
}

impl ScheduleIndex {
    pub fn new(committer: Arc<Committer>) -> Self {
        Self {
            windows: Arc::new(DashMap::new()),
            write_gates: DashMap::new(),
            committer,
        }
    }

    /// True iff `[start, start + duration)` lies inside one active window on
    /// the request's UTC weekday. Requests crossing midnight never fit.
    pub fn is_within_schedule(&self, doctor_id: DoctorId, start: Ms, duration_minutes: u32) -> bool {
        if duration_minutes == 0 {
            return false;
        }
        let Some(at) = DateTime::from_timestamp_millis(start) else {
            return false;
        };
        let Some(windows) = self.windows.get(&doctor_id).map(|e| e.value().clone()) else {
            return false;
        };

        let day = at.weekday().num_days_from_sunday() as u8;
        let start_of_day = ms_of_day(at.time());
        let requested = Span::new(
            start_of_day,
            start_of_day + duration_minutes as Ms * MINUTE_MS,
        );

        windows
            .iter()
            .any(|w| w.active && w.day_of_week == day && w.span_of_day().contains_span(&requested))
    }

    pub fn windows(&self, doctor_id: DoctorId) -> Arc<[AvailabilityWindow]> {
        self.windows
            .get(&doctor_id)
            .map(|e| e.value().clone())
            .unwrap_or_else(|| Arc::from(Vec::new()))
    }

    /// Replace every window for `doctor_id`. An empty list clears the schedule.
    pub async fn set_availability(
        &self,
        doctor_id: DoctorId,
        windows: Vec<AvailabilityWindow>,
    ) -> Result<(), CoreError> {
        validate_windows(doctor_id, &windows)?;

        let gate = self.write_gates.entry(doctor_id).or_default().clone();
        let locked = self.committer.lock(doctor_id, gate).await?;

        let count = windows.len();
        let event = Event::AvailabilitySet { doctor_id, windows };
        let table = self.windows.clone();
        self.committer
            .commit(locked, event, move |_, e| apply_to_table(&table, e))
            .await?;

        info!(%doctor_id, windows = count, "availability set");
        Ok(())
    }

    pub(crate) fn apply(&self, event: &Event) {
        apply_to_table(&self.windows, event);
    }

    pub(crate) fn snapshot_events(&self) -> Vec<Event> {
        let mut events: Vec<Event> = self
            .windows
            .iter()
            .map(|e| Event::AvailabilitySet {
                doctor_id: *e.key(),
                windows: e.value().to_vec(),
            })
            .collect();
        events.sort_by_key(Event::subject_id);
        events
    }
}

fn apply_to_table(table: &WindowTable, event: &Event) {
    if let Event::AvailabilitySet { doctor_id, windows } = event {
        if windows.is_empty() {
            table.remove(doctor_id);
        } else {
            table.insert(*doctor_id, Arc::from(windows.as_slice()));
        }
    }
}

fn validate_windows(doctor_id: DoctorId, windows: &[AvailabilityWindow]) -> Result<(), CoreError> {
    if windows.len() > MAX_WINDOWS_PER_DOCTOR {
        return Err(CoreError::LimitExceeded("too many availability windows"));
    }
    for w in windows {
        if w.day_of_week > 6 {
            return Err(CoreError::Validation(format!(
                "day_of_week must be 0..=6, got {}",
                w.day_of_week
            )));
        }
        if w.start >= w.end {
            return Err(CoreError::Validation(format!(
                "window start {} is not before end {}",
                w.start, w.end
            )));
        }
    }

    for day in 0..=6u8 {
        let mut spans: Vec<Span> = windows
            .iter()
            .filter(|w| w.active && w.day_of_week == day)
            .map(AvailabilityWindow::span_of_day)
            .collect();
        spans.sort_by_key(|s| s.start);
        if spans.windows(2).any(|pair| pair[0].overlaps(&pair[1])) {
            return Err(CoreError::ScheduleConflict {
                doctor_id,
                day_of_week: day,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};
    use ulid::Ulid;

    const MONDAY: u8 = 1;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    /// 2024-01-01 was a Monday.
    fn monday_at(h: u32, m: u32) -> Ms {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
            .and_utc()
            .timestamp_millis()
    }

    async fn index_with_morning() -> (ScheduleIndex, DoctorId) {
        let index = ScheduleIndex::new(Arc::new(Committer::in_memory()));
        let doctor = Ulid::new();
        index
            .set_availability(doctor, vec![AvailabilityWindow::new(MONDAY, t(9, 0), t(12, 0))])
            .await
            .unwrap();
        (index, doctor)
    }

    #[tokio::test]
    async fn containment_is_half_open() {
        let (index, doctor) = index_with_morning().await;
        assert!(index.is_within_schedule(doctor, monday_at(9, 0), 30));
        assert!(index.is_within_schedule(doctor, monday_at(11, 30), 30)); // ends exactly at 12:00
        assert!(!index.is_within_schedule(doctor, monday_at(11, 45), 30)); // spills past 12:00
        assert!(!index.is_within_schedule(doctor, monday_at(8, 45), 30)); // starts early
        assert!(!index.is_within_schedule(doctor, monday_at(13, 0), 30));
    }

    #[tokio::test]
    async fn other_days_and_doctors_are_outside() {
        let (index, doctor) = index_with_morning().await;
        let tuesday_nine = monday_at(9, 0) + DAY_MS;
        assert!(!index.is_within_schedule(doctor, tuesday_nine, 30));
        assert!(!index.is_within_schedule(Ulid::new(), monday_at(9, 0), 30));
        // Same weekday a week later still fits
        assert!(index.is_within_schedule(doctor, monday_at(9, 0) + 7 * DAY_MS, 30));
    }

    #[tokio::test]
    async fn zero_duration_never_fits() {
        let (index, doctor) = index_with_morning().await;
        assert!(!index.is_within_schedule(doctor, monday_at(10, 0), 0));
    }

    #[tokio::test]
    async fn crossing_midnight_never_fits() {
        let index = ScheduleIndex::new(Arc::new(Committer::in_memory()));
        let doctor = Ulid::new();
        let night = AvailabilityWindow::new(MONDAY, t(22, 0), NaiveTime::from_hms_opt(23, 59, 59).unwrap());
        index.set_availability(doctor, vec![night]).await.unwrap();
        assert!(index.is_within_schedule(doctor, monday_at(22, 0), 60));
        assert!(!index.is_within_schedule(doctor, monday_at(23, 30), 60));
    }

    #[tokio::test]
    async fn inactive_windows_are_ignored() {
        let index = ScheduleIndex::new(Arc::new(Committer::in_memory()));
        let doctor = Ulid::new();
        let mut off = AvailabilityWindow::new(MONDAY, t(9, 0), t(12, 0));
        off.active = false;
        // Overlaps the inactive window, which is allowed
        let on = AvailabilityWindow::new(MONDAY, t(11, 0), t(14, 0));
        index.set_availability(doctor, vec![off, on]).await.unwrap();

        assert!(!index.is_within_schedule(doctor, monday_at(9, 0), 30));
        assert!(index.is_within_schedule(doctor, monday_at(12, 0), 30));
        assert_eq!(index.windows(doctor).len(), 2);
    }

    #[tokio::test]
    async fn overlapping_windows_rejected() {
        let (index, doctor) = index_with_morning().await;
        let result = index
            .set_availability(
                doctor,
                vec![
                    AvailabilityWindow::new(MONDAY, t(9, 0), t(12, 0)),
                    AvailabilityWindow::new(MONDAY, t(11, 0), t(13, 0)),
                ],
            )
            .await;
        assert!(matches!(
            result,
            Err(CoreError::ScheduleConflict { day_of_week: MONDAY, .. })
        ));
        // The previous set is untouched
        assert_eq!(index.windows(doctor).len(), 1);
    }

    #[tokio::test]
    async fn adjacent_windows_and_split_days_allowed() {
        let index = ScheduleIndex::new(Arc::new(Committer::in_memory()));
        let doctor = Ulid::new();
        index
            .set_availability(
                doctor,
                vec![
                    AvailabilityWindow::new(MONDAY, t(9, 0), t(12, 0)),
                    AvailabilityWindow::new(MONDAY, t(12, 0), t(13, 0)),
                    AvailabilityWindow::new(MONDAY + 1, t(9, 0), t(12, 0)),
                ],
            )
            .await
            .unwrap();
        // Request spanning both adjacent windows is not inside a single one
        assert!(!index.is_within_schedule(doctor, monday_at(11, 30), 60));
        assert!(index.is_within_schedule(doctor, monday_at(12, 0), 60));
    }

    #[tokio::test]
    async fn malformed_windows_rejected() {
        let index = ScheduleIndex::new(Arc::new(Committer::in_memory()));
        let doctor = Ulid::new();
        let bad_day = AvailabilityWindow::new(7, t(9, 0), t(10, 0));
        assert!(matches!(
            index.set_availability(doctor, vec![bad_day]).await,
            Err(CoreError::Validation(_))
        ));
        let backwards = AvailabilityWindow::new(MONDAY, t(10, 0), t(9, 0));
        assert!(matches!(
            index.set_availability(doctor, vec![backwards]).await,
            Err(CoreError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn replace_and_clear() {
        let (index, doctor) = index_with_morning().await;
        index
            .set_availability(doctor, vec![AvailabilityWindow::new(MONDAY, t(14, 0), t(16, 0))])
            .await
            .unwrap();
        assert!(!index.is_within_schedule(doctor, monday_at(9, 0), 30));
        assert!(index.is_within_schedule(doctor, monday_at(14, 0), 30));

        index.set_availability(doctor, Vec::new()).await.unwrap();
        assert!(index.windows(doctor).is_empty());
        assert!(index.snapshot_events().is_empty());
    }
}
