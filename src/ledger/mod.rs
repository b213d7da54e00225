mod availability;
mod conflict;
mod mutations;
mod queries;

pub use availability::{materialize_windows, merge_overlapping, subtract_intervals};
pub(crate) use conflict::validate_request;

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;

use crate::commit::Committer;
use crate::model::*;
use crate::schedule::ScheduleIndex;

pub type SharedDoctorBook = Arc<RwLock<DoctorBook>>;

/// All appointments of one doctor, every status, sorted by `start`.
#[derive(Debug, Clone)]
pub struct DoctorBook {
    pub doctor_id: DoctorId,
    pub(crate) appointments: Vec<Appointment>,
    scheduled: usize,
}

impl DoctorBook {
    pub fn new(doctor_id: DoctorId) -> Self {
        Self {
            doctor_id,
            appointments: Vec::new(),
            scheduled: 0,
        }
    }

    pub fn appointments(&self) -> &[Appointment] {
        &self.appointments
    }

    /// Appointments still holding their slot. Terminal rows are history and
    /// do not count toward the per-doctor cap.
    pub fn scheduled_count(&self) -> usize {
        self.scheduled
    }

    /// Insert maintaining sort order by start.
    pub fn insert(&mut self, appointment: Appointment) {
        if appointment.is_scheduled() {
            self.scheduled += 1;
        }
        let pos = self
            .appointments
            .partition_point(|a| a.start <= appointment.start);
        self.appointments.insert(pos, appointment);
    }

    pub fn get(&self, id: AppointmentId) -> Option<&Appointment> {
        self.appointments.iter().find(|a| a.id == id)
    }

    /// Set the status of `id`, keeping the Scheduled count in step.
    pub fn set_status(&mut self, id: AppointmentId, status: AppointmentStatus, at: Ms) -> bool {
        let Some(appt) = self.appointments.iter_mut().find(|a| a.id == id) else {
            return false;
        };
        match (appt.is_scheduled(), status == AppointmentStatus::Scheduled) {
            (true, false) => self.scheduled -= 1,
            (false, true) => self.scheduled += 1,
            _ => {}
        }
        appt.status = status;
        appt.updated_at = at;
        true
    }

    /// Appointments of any status whose interval intersects `query`.
    /// Binary search skips everything starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Appointment> {
        let right_bound = self.appointments.partition_point(|a| a.start < query.end);
        self.appointments[..right_bound]
            .iter()
            .filter(move |a| a.end() > query.start)
    }

    pub fn scheduled_overlapping(&self, query: &Span) -> impl Iterator<Item = &Appointment> {
        self.overlapping(query).filter(|a| a.is_scheduled())
    }
}

/// Apply a committed event to a book (caller holds the lock).
fn apply_to_book(
    book: &mut DoctorBook,
    event: &Event,
    index: &DashMap<AppointmentId, DoctorId>,
) {
    match event {
        Event::AppointmentReserved { appointment } => {
            index.insert(appointment.id, appointment.doctor_id);
            book.insert(appointment.clone());
        }
        Event::AppointmentStatusChanged { id, status, at, .. } => {
            book.set_status(*id, *status, *at);
        }
        _ => {}
    }
}

/// Input to [`AppointmentLedger::reserve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReserveRequest {
    pub patient_id: PatientId,
    pub doctor_id: DoctorId,
    pub start: Ms,
    pub duration_minutes: u32,
    pub notes: Option<String>,
}

impl ReserveRequest {
    pub fn new(patient_id: PatientId, doctor_id: DoctorId, start: Ms, duration_minutes: u32) -> Self {
        Self {
            patient_id,
            doctor_id,
            start,
            duration_minutes,
            notes: None,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// Authoritative appointment store and sole writer of status transitions.
pub struct AppointmentLedger {
    books: DashMap<DoctorId, SharedDoctorBook>,
    /// Reverse lookup: appointment id → doctor id
    appointment_to_doctor: Arc<DashMap<AppointmentId, DoctorId>>,
    schedule: Arc<ScheduleIndex>,
    committer: Arc<Committer>,
}

impl AppointmentLedger {
    pub fn new(schedule: Arc<ScheduleIndex>, committer: Arc<Committer>) -> Self {
        Self {
            books: DashMap::new(),
            appointment_to_doctor: Arc::new(DashMap::new()),
            schedule,
            committer,
        }
    }

    pub fn schedule(&self) -> &Arc<ScheduleIndex> {
        &self.schedule
    }

    pub fn get_book(&self, doctor_id: &DoctorId) -> Option<SharedDoctorBook> {
        self.books.get(doctor_id).map(|e| e.value().clone())
    }

    fn book_or_create(&self, doctor_id: DoctorId) -> SharedDoctorBook {
        self.books
            .entry(doctor_id)
            .or_insert_with(|| Arc::new(RwLock::new(DoctorBook::new(doctor_id))))
            .clone()
    }

    pub fn doctor_for(&self, appointment_id: &AppointmentId) -> Option<DoctorId> {
        self.appointment_to_doctor.get(appointment_id).map(|e| *e.value())
    }

    /// Apply a replayed journal event.
    pub(crate) async fn apply(&self, event: &Event) {
        let doctor_id = match event {
            Event::AppointmentReserved { appointment } => appointment.doctor_id,
            Event::AppointmentStatusChanged { doctor_id, .. } => *doctor_id,
            _ => return,
        };
        let book = self.book_or_create(doctor_id);
        let mut guard = book.write().await;
        apply_to_book(&mut guard, event, &self.appointment_to_doctor);
    }

    /// One `AppointmentReserved` per appointment, carrying its current status.
    pub(crate) async fn snapshot_events(&self) -> Vec<Event> {
        let books: Vec<SharedDoctorBook> = self.books.iter().map(|e| e.value().clone()).collect();
        let mut events = Vec::new();
        for book in books {
            let guard = book.read().await;
            events.extend(guard.appointments.iter().map(|a| Event::AppointmentReserved {
                appointment: a.clone(),
            }));
        }
        events
    }
}
