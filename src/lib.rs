//! Appointment scheduling and clinical resource allocation.
//!
//! [`SchedulingService`] wires the four components together: the
//! [`ScheduleIndex`] of recurring doctor availability, the
//! [`AppointmentLedger`], the [`ResourceAllocator`] and the
//! [`BookingCoordinator`] that books a visit together with a room, bed or
//! device. Every transition is journaled before it is applied and broadcast
//! to audit subscribers after.

pub mod allocator;
pub mod audit;
pub mod commit;
pub mod compactor;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod journal;
pub mod ledger;
pub mod limits;
pub mod model;
pub mod observability;
pub mod schedule;
pub mod service;

pub use allocator::ResourceAllocator;
pub use config::CoreConfig;
pub use coordinator::{Booking, BookingCoordinator, BookingRequest, BookingStage};
pub use error::{CoreError, StorageError, Unavailability};
pub use ledger::{AppointmentLedger, ReserveRequest};
pub use schedule::ScheduleIndex;
pub use service::SchedulingService;
