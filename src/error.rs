use std::fmt;
use std::io;

use thiserror::Error;
use ulid::Ulid;

use crate::model::{
    AppointmentId, AppointmentStatus, DoctorId, PatientId, ResourceId, ResourceStatus, Span,
};

/// Why a resource could not be taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unavailability {
    AlreadyOccupied { patient_id: PatientId },
    UnderMaintenance,
}

impl fmt::Display for Unavailability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unavailability::AlreadyOccupied { patient_id } => {
                write!(f, "already occupied by patient {patient_id}")
            }
            Unavailability::UnderMaintenance => f.write_str("under maintenance"),
        }
    }
}

/// Persistence faults. Opaque to the core: never interpreted, only propagated.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("journal I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("journal writer shut down")]
    WriterShutdown,

    #[error("commit task aborted: {0}")]
    CommitAborted(String),
}

#[derive(Debug, Error)]
pub enum CoreError {
    /// Malformed input, rejected before any ledger is touched.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),

    #[error("appointment not found: {0}")]
    AppointmentNotFound(AppointmentId),

    #[error("resource not found: {0}")]
    ResourceNotFound(ResourceId),

    #[error("doctor {doctor_id} is not scheduled to work during [{}, {})", .span.start, .span.end)]
    OutsideSchedule { doctor_id: DoctorId, span: Span },

    #[error("doctor {doctor_id} is already booked by appointment {conflicting}")]
    DoubleBooking {
        doctor_id: DoctorId,
        conflicting: AppointmentId,
    },

    #[error("appointment {appointment_id} cannot move from {from} to {to}")]
    InvalidTransition {
        appointment_id: AppointmentId,
        from: AppointmentStatus,
        to: AppointmentStatus,
    },

    /// `cancelled_appointment` is set when a booking reserved a slot first and
    /// had to cancel it again because the resource could not be taken.
    #[error("resource {resource_id} is unavailable: {reason}")]
    ResourceUnavailable {
        resource_id: ResourceId,
        reason: Unavailability,
        cancelled_appointment: Option<AppointmentId>,
    },

    #[error("resource {resource_id} is not occupied (status {status})")]
    NotOccupied {
        resource_id: ResourceId,
        status: ResourceStatus,
    },

    #[error("resource {resource_id} is not under maintenance (status {status})")]
    NotUnderMaintenance {
        resource_id: ResourceId,
        status: ResourceStatus,
    },

    #[error("doctor {doctor_id}: availability windows overlap on day {day_of_week}")]
    ScheduleConflict { doctor_id: DoctorId, day_of_week: u8 },

    /// The per-key critical section could not be entered in time. Nothing was
    /// committed; safe to retry.
    #[error("timed out waiting for lock on {key}")]
    LockTimeout { key: Ulid },

    #[error("failed to cancel appointment {appointment_id} after resource assignment failed")]
    CompensationFailed {
        appointment_id: AppointmentId,
        source: Box<CoreError>,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl CoreError {
    /// Transient system faults the caller may retry unchanged.
    pub fn is_transient(&self) -> bool {
        matches!(self, CoreError::LockTimeout { .. } | CoreError::Storage(_))
    }

    /// Business-rule rejections: expected outcomes, not system faults.
    pub fn is_business_rule(&self) -> bool {
        matches!(
            self,
            CoreError::OutsideSchedule { .. }
                | CoreError::DoubleBooking { .. }
                | CoreError::InvalidTransition { .. }
                | CoreError::ResourceUnavailable { .. }
                | CoreError::NotOccupied { .. }
                | CoreError::NotUnderMaintenance { .. }
                | CoreError::ScheduleConflict { .. }
        )
    }

    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            CoreError::Validation(_) => "validation",
            CoreError::LimitExceeded(_) => "limit_exceeded",
            CoreError::AppointmentNotFound(_) | CoreError::ResourceNotFound(_) => "not_found",
            CoreError::OutsideSchedule { .. } => "outside_schedule",
            CoreError::DoubleBooking { .. } => "double_booking",
            CoreError::InvalidTransition { .. } => "invalid_transition",
            CoreError::ResourceUnavailable { .. } => "resource_unavailable",
            CoreError::NotOccupied { .. } => "not_occupied",
            CoreError::NotUnderMaintenance { .. } => "not_under_maintenance",
            CoreError::ScheduleConflict { .. } => "schedule_conflict",
            CoreError::LockTimeout { .. } => "lock_timeout",
            CoreError::CompensationFailed { .. } => "compensation_failed",
            CoreError::Storage(_) => "storage",
        }
    }
}
