use tracing::{debug, info};
use ulid::Ulid;

use crate::error::CoreError;
use crate::limits::MAX_APPOINTMENTS_PER_DOCTOR;
use crate::model::*;

use super::conflict::{check_no_double_booking, validate_request};
use super::{AppointmentLedger, ReserveRequest, apply_to_book};

impl AppointmentLedger {
    /// Reserve a slot for a patient.
    ///
    /// Schedule check, overlap scan and insert all happen inside the doctor's
    /// critical section, so of two overlapping concurrent reserves exactly one
    /// commits and the other sees its row.
    pub async fn reserve(&self, req: ReserveRequest) -> Result<Appointment, CoreError> {
        let span = validate_request(&req)?;
        let doctor_id = req.doctor_id;

        let book = self.book_or_create(doctor_id);
        let locked = self.committer.lock(doctor_id, book).await?;

        if !self
            .schedule
            .is_within_schedule(doctor_id, req.start, req.duration_minutes)
        {
            debug!(%doctor_id, start = req.start, "reserve rejected: outside schedule");
            return Err(CoreError::OutsideSchedule { doctor_id, span });
        }
        if locked.scheduled_count() >= MAX_APPOINTMENTS_PER_DOCTOR {
            return Err(CoreError::LimitExceeded("too many appointments for doctor"));
        }
        if let Err(e) = check_no_double_booking(&locked, &span) {
            metrics::counter!(crate::observability::DOUBLE_BOOKINGS_TOTAL).increment(1);
            debug!(%doctor_id, start = req.start, "reserve rejected: {e}");
            return Err(e);
        }

        let now = now_ms();
        let appointment = Appointment {
            id: Ulid::new(),
            patient_id: req.patient_id,
            doctor_id,
            start: req.start,
            duration_minutes: req.duration_minutes,
            status: AppointmentStatus::Scheduled,
            notes: req.notes,
            created_at: now,
            updated_at: now,
        };

        let event = Event::AppointmentReserved {
            appointment: appointment.clone(),
        };
        let index = self.appointment_to_doctor.clone();
        self.committer
            .commit(locked, event, move |book, e| apply_to_book(book, e, &index))
            .await?;

        info!(
            appointment_id = %appointment.id,
            %doctor_id,
            patient_id = %appointment.patient_id,
            start = appointment.start,
            duration_minutes = appointment.duration_minutes,
            "appointment reserved"
        );
        Ok(appointment)
    }

    /// Move a Scheduled appointment to a terminal status.
    ///
    /// Repeating a terminal transition (e.g. cancelling twice) is rejected with
    /// `InvalidTransition` rather than treated as a no-op.
    pub async fn update_status(
        &self,
        id: AppointmentId,
        new_status: AppointmentStatus,
    ) -> Result<Appointment, CoreError> {
        let doctor_id = self
            .doctor_for(&id)
            .ok_or(CoreError::AppointmentNotFound(id))?;
        let book = self
            .get_book(&doctor_id)
            .ok_or(CoreError::AppointmentNotFound(id))?;
        let locked = self.committer.lock(doctor_id, book).await?;

        let current = locked.get(id).ok_or(CoreError::AppointmentNotFound(id))?;
        if !current.status.can_transition_to(new_status) {
            debug!(appointment_id = %id, from = %current.status, to = %new_status, "transition rejected");
            return Err(CoreError::InvalidTransition {
                appointment_id: id,
                from: current.status,
                to: new_status,
            });
        }

        let mut updated = current.clone();
        updated.status = new_status;
        updated.updated_at = now_ms().max(current.updated_at);

        let event = Event::AppointmentStatusChanged {
            id,
            doctor_id,
            status: new_status,
            at: updated.updated_at,
        };
        let index = self.appointment_to_doctor.clone();
        self.committer
            .commit(locked, event, move |book, e| apply_to_book(book, e, &index))
            .await?;

        metrics::counter!(
            crate::observability::STATUS_TRANSITIONS_TOTAL,
            "status" => new_status.as_str()
        )
        .increment(1);
        info!(appointment_id = %id, %doctor_id, status = %new_status, "appointment status changed");
        Ok(updated)
    }
}
