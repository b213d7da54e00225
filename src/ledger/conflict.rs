use crate::error::CoreError;
use crate::limits::*;
use crate::model::*;

use super::{DoctorBook, ReserveRequest};

/// Reject malformed input before any lock is taken. Returns the requested span.
pub(crate) fn validate_request(req: &ReserveRequest) -> Result<Span, CoreError> {
    if req.duration_minutes == 0 {
        return Err(CoreError::Validation("duration must be positive".into()));
    }
    if req.duration_minutes > MAX_DURATION_MINUTES {
        return Err(CoreError::Validation(format!(
            "duration {} exceeds {MAX_DURATION_MINUTES} minutes",
            req.duration_minutes
        )));
    }
    if req.start < MIN_VALID_TIMESTAMP_MS || req.start > MAX_VALID_TIMESTAMP_MS {
        return Err(CoreError::Validation(format!("start {} out of range", req.start)));
    }
    if let Some(ref notes) = req.notes
        && notes.len() > MAX_NOTES_LEN {
            return Err(CoreError::LimitExceeded("notes too long"));
        }
    Ok(Span::new(
        req.start,
        req.start + req.duration_minutes as Ms * MINUTE_MS,
    ))
}

/// Any Scheduled appointment intersecting `span` is a double booking.
/// Completed, cancelled and no-show appointments no longer hold their slot.
pub(crate) fn check_no_double_booking(book: &DoctorBook, span: &Span) -> Result<(), CoreError> {
    match book.scheduled_overlapping(span).next() {
        Some(existing) => Err(CoreError::DoubleBooking {
            doctor_id: book.doctor_id,
            conflicting: existing.id,
        }),
        None => Ok(()),
    }
}
