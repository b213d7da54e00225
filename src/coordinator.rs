use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::allocator::ResourceAllocator;
use crate::error::{CoreError, StorageError};
use crate::ledger::{AppointmentLedger, ReserveRequest, validate_request};
use crate::limits::DEFAULT_DURATION_MINUTES;
use crate::model::*;
use crate::observability::{BOOKING_DURATION_SECONDS, BOOKINGS_TOTAL, COMPENSATIONS_TOTAL};

/// Everything needed to book one visit, optionally with a room, bed or device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub patient_id: PatientId,
    pub doctor_id: DoctorId,
    pub start: Ms,
    pub duration_minutes: u32,
    pub notes: Option<String>,
    pub resource_id: Option<ResourceId>,
}

impl BookingRequest {
    /// A booking of the default length with no resource.
    pub fn new(patient_id: PatientId, doctor_id: DoctorId, start: Ms) -> Self {
        Self {
            patient_id,
            doctor_id,
            start,
            duration_minutes: DEFAULT_DURATION_MINUTES,
            notes: None,
            resource_id: None,
        }
    }

    pub fn with_duration(mut self, minutes: u32) -> Self {
        self.duration_minutes = minutes;
        self
    }

    pub fn with_resource(mut self, resource_id: ResourceId) -> Self {
        self.resource_id = Some(resource_id);
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    fn reserve_request(&self) -> ReserveRequest {
        ReserveRequest {
            patient_id: self.patient_id,
            doctor_id: self.doctor_id,
            start: self.start,
            duration_minutes: self.duration_minutes,
            notes: self.notes.clone(),
        }
    }
}

/// A confirmed booking. `resource` is set iff one was requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Booking {
    pub appointment: Appointment,
    pub resource: Option<Resource>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingStage {
    Received,
    ScheduleChecked,
    SlotReserved,
    ResourceReserved,
    Confirmed,
    Reverted,
}

impl fmt::Display for BookingStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BookingStage::Received => "received",
            BookingStage::ScheduleChecked => "schedule_checked",
            BookingStage::SlotReserved => "slot_reserved",
            BookingStage::ResourceReserved => "resource_reserved",
            BookingStage::Confirmed => "confirmed",
            BookingStage::Reverted => "reverted",
        })
    }
}

/// Runs the booking saga across the appointment ledger and the resource
/// allocator. Holds no state and never locks both ledgers at once; a failed
/// resource step is undone by cancelling the reserved appointment.
#[derive(Clone)]
pub struct BookingCoordinator {
    ledger: Arc<AppointmentLedger>,
    allocator: Arc<ResourceAllocator>,
}

impl BookingCoordinator {
    pub fn new(ledger: Arc<AppointmentLedger>, allocator: Arc<ResourceAllocator>) -> Self {
        Self { ledger, allocator }
    }

    /// Run the saga to completion. The saga is a detached task: once started,
    /// dropping the returned future does not stop it, so a reserved
    /// appointment is always either confirmed or compensated.
    pub async fn book_appointment(&self, req: BookingRequest) -> Result<Booking, CoreError> {
        let this = self.clone();
        let task = tokio::spawn(async move {
            let started = Instant::now();
            let result = this.run(req).await;

            let outcome = match &result {
                Ok(_) => "confirmed",
                Err(e) => e.label(),
            };
            metrics::counter!(BOOKINGS_TOTAL, "outcome" => outcome).increment(1);
            metrics::histogram!(BOOKING_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
            result
        });

        match task.await {
            Ok(result) => result,
            Err(join) => Err(StorageError::CommitAborted(join.to_string()).into()),
        }
    }

    async fn run(&self, req: BookingRequest) -> Result<Booking, CoreError> {
        let reserve = req.reserve_request();
        trace_stage(&req, BookingStage::Received);

        let span = validate_request(&reserve)?;
        if let Some(resource_id) = req.resource_id
            && !self.allocator.contains(&resource_id)
        {
            return Err(CoreError::ResourceNotFound(resource_id));
        }

        // Early read-only rejection; reserve repeats the check under the doctor's lock.
        if !self
            .ledger
            .schedule()
            .is_within_schedule(req.doctor_id, req.start, req.duration_minutes)
        {
            return Err(CoreError::OutsideSchedule {
                doctor_id: req.doctor_id,
                span,
            });
        }
        trace_stage(&req, BookingStage::ScheduleChecked);

        let appointment = self.ledger.reserve(reserve).await?;
        trace_stage(&req, BookingStage::SlotReserved);

        let Some(resource_id) = req.resource_id else {
            trace_stage(&req, BookingStage::Confirmed);
            return Ok(Booking {
                appointment,
                resource: None,
            });
        };

        match self.allocator.assign(resource_id, req.patient_id).await {
            Ok(resource) => {
                trace_stage(&req, BookingStage::ResourceReserved);
                trace_stage(&req, BookingStage::Confirmed);
                info!(
                    appointment_id = %appointment.id,
                    %resource_id,
                    "booking confirmed with resource"
                );
                Ok(Booking {
                    appointment,
                    resource: Some(resource),
                })
            }
            Err(assign_err) => {
                self.compensate(&appointment, &assign_err).await?;
                trace_stage(&req, BookingStage::Reverted);
                Err(match assign_err {
                    CoreError::ResourceUnavailable {
                        resource_id,
                        reason,
                        ..
                    } => CoreError::ResourceUnavailable {
                        resource_id,
                        reason,
                        cancelled_appointment: Some(appointment.id),
                    },
                    other => other,
                })
            }
        }
    }

    /// Cancel the appointment reserved by a booking whose resource step failed.
    async fn compensate(&self, appointment: &Appointment, cause: &CoreError) -> Result<(), CoreError> {
        metrics::counter!(COMPENSATIONS_TOTAL).increment(1);
        warn!(
            appointment_id = %appointment.id,
            "resource step failed ({cause}), cancelling reserved appointment"
        );

        match self
            .ledger
            .update_status(appointment.id, AppointmentStatus::Cancelled)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => {
                error!(appointment_id = %appointment.id, "compensating cancel failed: {e}");
                Err(CoreError::CompensationFailed {
                    appointment_id: appointment.id,
                    source: Box::new(e),
                })
            }
        }
    }
}

fn trace_stage(req: &BookingRequest, stage: BookingStage) {
    debug!(
        patient_id = %req.patient_id,
        doctor_id = %req.doctor_id,
        start = req.start,
        %stage,
        "booking stage"
    );
}
