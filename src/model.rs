use std::fmt;
use std::str::FromStr;

use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::CoreError;

/// Unix milliseconds, UTC. The only instant type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const DAY_MS: Ms = 86_400_000;

pub type DoctorId = Ulid;
pub type PatientId = Ulid;
pub type AppointmentId = Ulid;
pub type ResourceId = Ulid;

pub fn now_ms() -> Ms {
    chrono::Utc::now().timestamp_millis()
}

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

// ── Appointments ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AppointmentStatus {
    Scheduled,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    /// Scheduled is the only non-terminal state; every exit from it is final.
    pub fn can_transition_to(self, next: AppointmentStatus) -> bool {
        matches!(
            (self, next),
            (
                AppointmentStatus::Scheduled,
                AppointmentStatus::Completed | AppointmentStatus::Cancelled | AppointmentStatus::NoShow
            )
        )
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, AppointmentStatus::Scheduled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "Scheduled",
            AppointmentStatus::Completed => "Completed",
            AppointmentStatus::Cancelled => "Cancelled",
            AppointmentStatus::NoShow => "NoShow",
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppointmentStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Scheduled" => Ok(AppointmentStatus::Scheduled),
            "Completed" => Ok(AppointmentStatus::Completed),
            "Cancelled" => Ok(AppointmentStatus::Cancelled),
            "NoShow" => Ok(AppointmentStatus::NoShow),
            other => Err(CoreError::Validation(format!(
                "unknown appointment status: {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: AppointmentId,
    pub patient_id: PatientId,
    pub doctor_id: DoctorId,
    pub start: Ms,
    pub duration_minutes: u32,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl Appointment {
    pub fn end(&self) -> Ms {
        self.start + self.duration_minutes as Ms * MINUTE_MS
    }

    pub fn span(&self) -> Span {
        Span::new(self.start, self.end())
    }

    pub fn is_scheduled(&self) -> bool {
        self.status == AppointmentStatus::Scheduled
    }
}

/// Every field narrows the result; an empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppointmentFilter {
    pub doctor_id: Option<DoctorId>,
    pub patient_id: Option<PatientId>,
    /// Matches appointments whose start lies inside the span.
    pub date_range: Option<Span>,
    pub status: Option<AppointmentStatus>,
}

impl AppointmentFilter {
    pub fn matches(&self, appt: &Appointment) -> bool {
        self.doctor_id.is_none_or(|d| appt.doctor_id == d)
            && self.patient_id.is_none_or(|p| appt.patient_id == p)
            && self.date_range.is_none_or(|r| r.contains_instant(appt.start))
            && self.status.is_none_or(|s| appt.status == s)
    }
}

// ── Doctor availability ──────────────────────────────────────────

/// One recurring weekly window. `day_of_week` counts from Sunday = 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityWindow {
    pub day_of_week: u8,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub active: bool,
}

impl AvailabilityWindow {
    pub fn new(day_of_week: u8, start: NaiveTime, end: NaiveTime) -> Self {
        Self {
            day_of_week,
            start,
            end,
            active: true,
        }
    }

    /// The window as a span of milliseconds since midnight.
    pub fn span_of_day(&self) -> Span {
        Span::new(ms_of_day(self.start), ms_of_day(self.end))
    }
}

pub fn ms_of_day(t: NaiveTime) -> Ms {
    t.num_seconds_from_midnight() as Ms * 1000 + (t.nanosecond() / 1_000_000) as Ms
}

// ── Resources ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Room,
    Equipment,
    Bed,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResourceKind::Room => "Room",
            ResourceKind::Equipment => "Equipment",
            ResourceKind::Bed => "Bed",
        })
    }
}

impl FromStr for ResourceKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Room" => Ok(ResourceKind::Room),
            "Equipment" => Ok(ResourceKind::Equipment),
            "Bed" => Ok(ResourceKind::Bed),
            other => Err(CoreError::Validation(format!("unknown resource type: {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceStatus {
    Available,
    Occupied,
    Maintenance,
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResourceStatus::Available => "Available",
            ResourceStatus::Occupied => "Occupied",
            ResourceStatus::Maintenance => "Maintenance",
        })
    }
}

impl FromStr for ResourceStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Available" => Ok(ResourceStatus::Available),
            "Occupied" => Ok(ResourceStatus::Occupied),
            "Maintenance" => Ok(ResourceStatus::Maintenance),
            other => Err(CoreError::Validation(format!("unknown resource status: {other:?}"))),
        }
    }
}

/// Occupancy carries the assignment only in the Occupied arm, so a resource
/// can never be assigned without being Occupied or vice versa.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Occupancy {
    Available,
    Occupied { patient_id: PatientId, assigned_at: Ms },
    Maintenance,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    pub name: String,
    pub kind: ResourceKind,
    pub location: Option<String>,
    pub occupancy: Occupancy,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl Resource {
    pub fn status(&self) -> ResourceStatus {
        match self.occupancy {
            Occupancy::Available => ResourceStatus::Available,
            Occupancy::Occupied { .. } => ResourceStatus::Occupied,
            Occupancy::Maintenance => ResourceStatus::Maintenance,
        }
    }

    pub fn assigned_patient_id(&self) -> Option<PatientId> {
        match self.occupancy {
            Occupancy::Occupied { patient_id, .. } => Some(patient_id),
            _ => None,
        }
    }

    pub fn assigned_at(&self) -> Option<Ms> {
        match self.occupancy {
            Occupancy::Occupied { assigned_at, .. } => Some(assigned_at),
            _ => None,
        }
    }

    pub fn is_available(&self) -> bool {
        self.occupancy == Occupancy::Available
    }
}

// ── Journal events ───────────────────────────────────────────────

/// Every committed state transition, flat. This is both the WAL record
/// format and the payload broadcast to audit subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    AvailabilitySet {
        doctor_id: DoctorId,
        windows: Vec<AvailabilityWindow>,
    },
    AppointmentReserved {
        appointment: Appointment,
    },
    AppointmentStatusChanged {
        id: AppointmentId,
        doctor_id: DoctorId,
        status: AppointmentStatus,
        at: Ms,
    },
    ResourceRegistered {
        resource: Resource,
    },
    ResourceAssigned {
        id: ResourceId,
        patient_id: PatientId,
        at: Ms,
    },
    ResourceReleased {
        id: ResourceId,
        at: Ms,
    },
    MaintenanceStarted {
        id: ResourceId,
        at: Ms,
    },
    MaintenanceEnded {
        id: ResourceId,
        at: Ms,
    },
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Event::AvailabilitySet { .. } => "availability_set",
            Event::AppointmentReserved { .. } => "appointment_reserved",
            Event::AppointmentStatusChanged { .. } => "appointment_status_changed",
            Event::ResourceRegistered { .. } => "resource_registered",
            Event::ResourceAssigned { .. } => "resource_assigned",
            Event::ResourceReleased { .. } => "resource_released",
            Event::MaintenanceStarted { .. } => "maintenance_started",
            Event::MaintenanceEnded { .. } => "maintenance_ended",
        }
    }

    /// The record the event mutates: doctor, appointment or resource id.
    pub fn subject_id(&self) -> Ulid {
        match self {
            Event::AvailabilitySet { doctor_id, .. } => *doctor_id,
            Event::AppointmentReserved { appointment } => appointment.id,
            Event::AppointmentStatusChanged { id, .. } => *id,
            Event::ResourceRegistered { resource } => resource.id,
            Event::ResourceAssigned { id, .. }
            | Event::ResourceReleased { id, .. }
            | Event::MaintenanceStarted { id, .. }
            | Event::MaintenanceEnded { id, .. } => *id,
        }
    }
}
