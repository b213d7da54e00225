use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::info;

use crate::allocator::ResourceAllocator;
use crate::audit::AuditHub;
use crate::commit::Committer;
use crate::config::CoreConfig;
use crate::coordinator::{Booking, BookingCoordinator, BookingRequest};
use crate::error::{CoreError, StorageError};
use crate::journal::{Journal, MemoryJournal, WalJournal};
use crate::ledger::AppointmentLedger;
use crate::model::*;
use crate::observability::COMPACTIONS_TOTAL;
use crate::schedule::ScheduleIndex;

/// The scheduling core behind one journal: schedule, appointments, resources
/// and the booking coordinator, wired to a shared committer and audit hub.
pub struct SchedulingService {
    schedule: Arc<ScheduleIndex>,
    ledger: Arc<AppointmentLedger>,
    allocator: Arc<ResourceAllocator>,
    coordinator: BookingCoordinator,
    committer: Arc<Committer>,
    config: CoreConfig,
}

impl SchedulingService {
    /// Open the service described by `config`, replaying the WAL in
    /// `data_dir` if one is configured. Must be called inside a tokio runtime.
    pub async fn open(config: CoreConfig) -> Result<Self, CoreError> {
        if let Err(e) = crate::observability::init_metrics(config.metrics_port) {
            tracing::warn!("metrics exporter not installed: {e}");
        }

        let (journal, replayed): (Arc<dyn Journal>, Vec<Event>) = match config.wal_path() {
            Some(path) => {
                if let Some(dir) = path.parent() {
                    tokio::fs::create_dir_all(dir)
                        .await
                        .map_err(StorageError::from)?;
                }
                let (wal, events) = WalJournal::open(&path).map_err(StorageError::from)?;
                info!(path = %path.display(), events = events.len(), "journal replayed");
                let journal: Arc<dyn Journal> = Arc::new(wal);
                (journal, events)
            }
            None => {
                let journal: Arc<dyn Journal> = Arc::new(MemoryJournal::new());
                (journal, Vec::new())
            }
        };

        Ok(Self::with_journal(journal, replayed, config).await)
    }

    /// Build a service over an existing journal, replaying `events` first.
    pub async fn with_journal(journal: Arc<dyn Journal>, events: Vec<Event>, config: CoreConfig) -> Self {
        let audit = Arc::new(AuditHub::new(config.audit_capacity));
        let committer = Arc::new(Committer::new(journal, audit, config.lock_timeout));
        let schedule = Arc::new(ScheduleIndex::new(committer.clone()));
        let ledger = Arc::new(AppointmentLedger::new(schedule.clone(), committer.clone()));
        let allocator = Arc::new(ResourceAllocator::new(committer.clone()));
        let coordinator = BookingCoordinator::new(ledger.clone(), allocator.clone());

        let service = Self {
            schedule,
            ledger,
            allocator,
            coordinator,
            committer,
            config,
        };
        for event in &events {
            service.apply(event).await;
        }
        service
    }

    /// In-memory service with default settings.
    pub async fn in_memory() -> Self {
        Self::with_journal(Arc::new(MemoryJournal::new()), Vec::new(), CoreConfig::default()).await
    }

    async fn apply(&self, event: &Event) {
        match event {
            Event::AvailabilitySet { .. } => self.schedule.apply(event),
            Event::AppointmentReserved { .. } | Event::AppointmentStatusChanged { .. } => {
                self.ledger.apply(event).await
            }
            Event::ResourceRegistered { .. }
            | Event::ResourceAssigned { .. }
            | Event::ResourceReleased { .. }
            | Event::MaintenanceStarted { .. }
            | Event::MaintenanceEnded { .. } => self.allocator.apply(event).await,
        }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn schedule(&self) -> &Arc<ScheduleIndex> {
        &self.schedule
    }

    pub fn ledger(&self) -> &Arc<AppointmentLedger> {
        &self.ledger
    }

    pub fn allocator(&self) -> &Arc<ResourceAllocator> {
        &self.allocator
    }

    // ── Bookings and appointments ────────────────────────────

    pub async fn book_appointment(&self, req: BookingRequest) -> Result<Booking, CoreError> {
        self.coordinator.book_appointment(req).await
    }

    pub async fn update_appointment_status(
        &self,
        id: AppointmentId,
        status: AppointmentStatus,
    ) -> Result<Appointment, CoreError> {
        self.ledger.update_status(id, status).await
    }

    pub async fn query_appointments(&self, filter: &AppointmentFilter) -> Vec<Appointment> {
        self.ledger.query(filter).await
    }

    pub async fn get_appointment(&self, id: AppointmentId) -> Result<Appointment, CoreError> {
        self.ledger.get(id).await
    }

    pub async fn open_slots(
        &self,
        doctor_id: DoctorId,
        range: Span,
        min_duration_minutes: u32,
    ) -> Result<Vec<Span>, CoreError> {
        self.ledger.open_slots(doctor_id, range, min_duration_minutes).await
    }

    // ── Doctor availability ──────────────────────────────────

    pub async fn set_doctor_availability(
        &self,
        doctor_id: DoctorId,
        windows: Vec<AvailabilityWindow>,
    ) -> Result<(), CoreError> {
        self.schedule.set_availability(doctor_id, windows).await
    }

    pub fn doctor_windows(&self, doctor_id: DoctorId) -> Vec<AvailabilityWindow> {
        self.schedule.windows(doctor_id).to_vec()
    }

    // ── Resources ────────────────────────────────────────────

    pub async fn register_resource(
        &self,
        name: impl Into<String>,
        kind: ResourceKind,
        location: Option<String>,
    ) -> Result<Resource, CoreError> {
        self.allocator.register(name, kind, location).await
    }

    pub async fn assign_resource(
        &self,
        resource_id: ResourceId,
        patient_id: PatientId,
    ) -> Result<Resource, CoreError> {
        self.allocator.assign(resource_id, patient_id).await
    }

    pub async fn release_resource(&self, resource_id: ResourceId) -> Result<Resource, CoreError> {
        self.allocator.release(resource_id).await
    }

    pub async fn begin_maintenance(&self, resource_id: ResourceId) -> Result<Resource, CoreError> {
        self.allocator.begin_maintenance(resource_id).await
    }

    pub async fn end_maintenance(&self, resource_id: ResourceId) -> Result<Resource, CoreError> {
        self.allocator.end_maintenance(resource_id).await
    }

    pub async fn list_available_resources(&self, kind: ResourceKind) -> Vec<Resource> {
        self.allocator.list_available(kind).await
    }

    pub async fn list_resources(&self, kind: Option<ResourceKind>) -> Vec<Resource> {
        self.allocator.list(kind).await
    }

    // ── Audit and journal ────────────────────────────────────

    pub fn subscribe_audit(&self) -> broadcast::Receiver<Event> {
        self.committer.audit().subscribe()
    }

    pub async fn appends_since_compact(&self) -> u64 {
        self.committer.journal().appends_since_compact().await
    }

    /// Rewrite the journal as the minimal event list recreating current state.
    /// Commits wait on the gate until the snapshot is written.
    pub async fn compact(&self) -> Result<(), CoreError> {
        let _gate = self.committer.exclusive().await;

        let mut events = self.schedule.snapshot_events();
        events.extend(self.allocator.snapshot_events().await);
        events.extend(self.ledger.snapshot_events().await);
        let count = events.len();

        self.committer.journal().compact(events).await?;
        metrics::counter!(COMPACTIONS_TOTAL).increment(1);
        info!(events = count, "journal compacted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};
    use ulid::Ulid;

    fn monday_at(h: u32, m: u32) -> Ms {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
            .and_utc()
            .timestamp_millis()
    }

    fn morning() -> Vec<AvailabilityWindow> {
        vec![AvailabilityWindow::new(
            1,
            NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
        )]
    }

    /// Drive a service through a few transitions of every kind.
    async fn populate(service: &SchedulingService) -> (DoctorId, AppointmentId, ResourceId) {
        let doctor = Ulid::new();
        service.set_doctor_availability(doctor, morning()).await.unwrap();
        let room = service
            .register_resource("Exam 1", ResourceKind::Room, Some("Wing A".into()))
            .await
            .unwrap();
        let booking = service
            .book_appointment(
                BookingRequest::new(Ulid::new(), doctor, monday_at(9, 0)).with_resource(room.id),
            )
            .await
            .unwrap();
        let other = service
            .book_appointment(BookingRequest::new(Ulid::new(), doctor, monday_at(10, 0)))
            .await
            .unwrap();
        service
            .update_appointment_status(other.appointment.id, AppointmentStatus::NoShow)
            .await
            .unwrap();
        let bed = service.register_resource("Bed 1", ResourceKind::Bed, None).await.unwrap();
        service.begin_maintenance(bed.id).await.unwrap();
        (doctor, booking.appointment.id, room.id)
    }

    async fn assert_same_state(a: &SchedulingService, b: &SchedulingService, doctor: DoctorId) {
        assert_eq!(
            a.query_appointments(&AppointmentFilter::default()).await,
            b.query_appointments(&AppointmentFilter::default()).await
        );
        assert_eq!(a.list_resources(None).await, b.list_resources(None).await);
        assert_eq!(a.doctor_windows(doctor), b.doctor_windows(doctor));
    }

    #[tokio::test]
    async fn replaying_the_journal_rebuilds_state() {
        let journal = Arc::new(MemoryJournal::new());
        let service = SchedulingService::with_journal(journal.clone(), Vec::new(), CoreConfig::default()).await;
        let (doctor, appointment_id, room_id) = populate(&service).await;

        let events = journal.events().await;
        let replayed = SchedulingService::with_journal(
            Arc::new(MemoryJournal::new()),
            events,
            CoreConfig::default(),
        )
        .await;

        assert_same_state(&service, &replayed, doctor).await;
        assert_eq!(
            replayed.get_appointment(appointment_id).await.unwrap().status,
            AppointmentStatus::Scheduled
        );
        assert!(!replayed.allocator().get(room_id).await.unwrap().is_available());
    }

    #[tokio::test]
    async fn compaction_preserves_state() {
        let journal = Arc::new(MemoryJournal::new());
        let service = SchedulingService::with_journal(journal.clone(), Vec::new(), CoreConfig::default()).await;
        let (doctor, _, _) = populate(&service).await;
        let before = journal.events().await.len();
        assert!(service.appends_since_compact().await > 0);

        service.compact().await.unwrap();
        assert_eq!(service.appends_since_compact().await, 0);

        // availability + 2 resources + 2 appointments
        let compacted = journal.events().await;
        assert_eq!(compacted.len(), 5);
        assert!(compacted.len() < before);

        let replayed = SchedulingService::with_journal(
            Arc::new(MemoryJournal::new()),
            compacted,
            CoreConfig::default(),
        )
        .await;
        assert_same_state(&service, &replayed, doctor).await;
    }

    #[tokio::test]
    async fn audit_sees_every_transition() {
        let service = SchedulingService::in_memory().await;
        let mut rx = service.subscribe_audit();
        let doctor = Ulid::new();
        service.set_doctor_availability(doctor, morning()).await.unwrap();
        let booking = service
            .book_appointment(BookingRequest::new(Ulid::new(), doctor, monday_at(9, 0)))
            .await
            .unwrap();
        service
            .update_appointment_status(booking.appointment.id, AppointmentStatus::Completed)
            .await
            .unwrap();

        let kinds: Vec<&str> = [
            rx.recv().await.unwrap(),
            rx.recv().await.unwrap(),
            rx.recv().await.unwrap(),
        ]
        .iter()
        .map(Event::kind)
        .collect();
        assert_eq!(
            kinds,
            vec!["availability_set", "appointment_reserved", "appointment_status_changed"]
        );
    }

    #[tokio::test]
    async fn dropped_subscriber_never_fails_operations() {
        let service = SchedulingService::in_memory().await;
        drop(service.subscribe_audit());
        let room = service.register_resource("Exam 1", ResourceKind::Room, None).await.unwrap();
        service.assign_resource(room.id, Ulid::new()).await.unwrap();
        service.release_resource(room.id).await.unwrap();
        assert_eq!(service.list_available_resources(ResourceKind::Room).await.len(), 1);
    }
}
