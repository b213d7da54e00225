use crate::error::CoreError;
use crate::limits::*;
use crate::model::*;

use super::availability::{materialize_windows, merge_overlapping, subtract_intervals};
use super::{AppointmentLedger, SharedDoctorBook};

impl AppointmentLedger {
    pub async fn get(&self, id: AppointmentId) -> Result<Appointment, CoreError> {
        let book = self
            .doctor_for(&id)
            .and_then(|doctor_id| self.get_book(&doctor_id))
            .ok_or(CoreError::AppointmentNotFound(id))?;
        let guard = book.read().await;
        guard.get(id).cloned().ok_or(CoreError::AppointmentNotFound(id))
    }

    /// Appointments matching `filter`, ordered by `(start, id)`.
    pub async fn query(&self, filter: &AppointmentFilter) -> Vec<Appointment> {
        let books: Vec<SharedDoctorBook> = match filter.doctor_id {
            Some(doctor_id) => self.get_book(&doctor_id).into_iter().collect(),
            None => self.books.iter().map(|e| e.value().clone()).collect(),
        };

        let mut out = Vec::new();
        for book in books {
            let guard = book.read().await;
            out.extend(guard.appointments.iter().filter(|a| filter.matches(a)).cloned());
        }
        out.sort_by(|a, b| a.start.cmp(&b.start).then(a.id.cmp(&b.id)));
        out
    }

    /// Maximal free spans inside `range` where the doctor is scheduled to work
    /// and holds no Scheduled appointment, at least `min_duration_minutes` long.
    pub async fn open_slots(
        &self,
        doctor_id: DoctorId,
        range: Span,
        min_duration_minutes: u32,
    ) -> Result<Vec<Span>, CoreError> {
        if range.start >= range.end {
            return Err(CoreError::Validation("empty slot search range".into()));
        }
        if range.start < MIN_VALID_TIMESTAMP_MS || range.end > MAX_VALID_TIMESTAMP_MS {
            return Err(CoreError::Validation("slot search range outside supported dates".into()));
        }
        if range.duration_ms() > MAX_QUERY_WINDOW_MS {
            return Err(CoreError::LimitExceeded("query window too wide"));
        }

        let windows = self.schedule.windows(doctor_id);
        let working = materialize_windows(&windows, &range);
        if working.is_empty() {
            return Ok(Vec::new());
        }

        let mut booked: Vec<Span> = match self.get_book(&doctor_id) {
            Some(book) => {
                let guard = book.read().await;
                guard.scheduled_overlapping(&range).map(Appointment::span).collect()
            }
            None => Vec::new(),
        };
        booked.sort_by_key(|s| s.start);
        let booked = merge_overlapping(&booked);

        let min_ms = min_duration_minutes as Ms * MINUTE_MS;
        let mut free = subtract_intervals(&working, &booked);
        free.retain(|s| s.duration_ms() >= min_ms);
        Ok(free)
    }
}
