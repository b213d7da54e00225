use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};
use ulid::Ulid;

use crate::commit::{Committer, Locked};
use crate::error::{CoreError, Unavailability};
use crate::limits::*;
use crate::model::*;

pub type SharedResource = Arc<RwLock<Resource>>;

/// Authoritative state of rooms, equipment and beds.
///
/// Every transition runs check-and-set inside the resource's critical
/// section, so of two concurrent assigns to one Available resource exactly
/// one wins.
pub struct ResourceAllocator {
    resources: Arc<DashMap<ResourceId, SharedResource>>,
    committer: Arc<Committer>,
}

impl ResourceAllocator {
    pub fn new(committer: Arc<Committer>) -> Self {
        Self {
            resources: Arc::new(DashMap::new()),
            committer,
        }
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.resources.contains_key(id)
    }

    fn shared(&self, id: ResourceId) -> Result<SharedResource, CoreError> {
        self.resources
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or(CoreError::ResourceNotFound(id))
    }

    pub async fn register(
        &self,
        name: impl Into<String>,
        kind: ResourceKind,
        location: Option<String>,
    ) -> Result<Resource, CoreError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(CoreError::Validation("resource name must not be empty".into()));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(CoreError::LimitExceeded("resource name too long"));
        }
        if location.as_ref().is_some_and(|l| l.len() > MAX_LOCATION_LEN) {
            return Err(CoreError::LimitExceeded("resource location too long"));
        }
        if self.resources.len() >= MAX_RESOURCES {
            return Err(CoreError::LimitExceeded("too many resources"));
        }

        let now = now_ms();
        let resource = Resource {
            id: Ulid::new(),
            name,
            kind,
            location,
            occupancy: Occupancy::Available,
            created_at: now,
            updated_at: now,
        };

        // The slot is unreachable until the commit publishes it, so the lock is
        // uncontended. Publishing inside the commit keeps it under the gate.
        let slot = Arc::new(RwLock::new(resource.clone()));
        let locked = self.committer.lock(resource.id, slot.clone()).await?;
        let event = Event::ResourceRegistered {
            resource: resource.clone(),
        };
        let resources = self.resources.clone();
        let id = resource.id;
        self.committer
            .commit(locked, event, move |_, _| {
                resources.insert(id, slot);
            })
            .await?;

        info!(resource_id = %resource.id, name = %resource.name, kind = %resource.kind, "resource registered");
        Ok(resource)
    }

    /// Available → Occupied for `patient_id`.
    pub async fn assign(&self, resource_id: ResourceId, patient_id: PatientId) -> Result<Resource, CoreError> {
        let shared = self.shared(resource_id)?;
        let locked = self.committer.lock(resource_id, shared).await?;

        let reason = match locked.occupancy {
            Occupancy::Available => None,
            Occupancy::Occupied { patient_id, .. } => Some(Unavailability::AlreadyOccupied { patient_id }),
            Occupancy::Maintenance => Some(Unavailability::UnderMaintenance),
        };
        if let Some(reason) = reason {
            debug!(%resource_id, %reason, "assign rejected");
            return Err(CoreError::ResourceUnavailable {
                resource_id,
                reason,
                cancelled_appointment: None,
            });
        }

        let event = Event::ResourceAssigned {
            id: resource_id,
            patient_id,
            at: now_ms().max(locked.updated_at),
        };
        let updated = self.commit_transition(locked, event).await?;
        info!(%resource_id, %patient_id, "resource assigned");
        Ok(updated)
    }

    /// Occupied → Available.
    pub async fn release(&self, resource_id: ResourceId) -> Result<Resource, CoreError> {
        let shared = self.shared(resource_id)?;
        let locked = self.committer.lock(resource_id, shared).await?;

        if !matches!(locked.occupancy, Occupancy::Occupied { .. }) {
            return Err(CoreError::NotOccupied {
                resource_id,
                status: locked.status(),
            });
        }

        let event = Event::ResourceReleased {
            id: resource_id,
            at: now_ms().max(locked.updated_at),
        };
        let updated = self.commit_transition(locked, event).await?;
        info!(%resource_id, "resource released");
        Ok(updated)
    }

    /// Available → Maintenance. An occupied resource must be released first.
    pub async fn begin_maintenance(&self, resource_id: ResourceId) -> Result<Resource, CoreError> {
        let shared = self.shared(resource_id)?;
        let locked = self.committer.lock(resource_id, shared).await?;

        match locked.occupancy {
            Occupancy::Available => {}
            Occupancy::Occupied { patient_id, .. } => {
                return Err(CoreError::ResourceUnavailable {
                    resource_id,
                    reason: Unavailability::AlreadyOccupied { patient_id },
                    cancelled_appointment: None,
                });
            }
            Occupancy::Maintenance => {
                return Err(CoreError::ResourceUnavailable {
                    resource_id,
                    reason: Unavailability::UnderMaintenance,
                    cancelled_appointment: None,
                });
            }
        }

        let event = Event::MaintenanceStarted {
            id: resource_id,
            at: now_ms().max(locked.updated_at),
        };
        let updated = self.commit_transition(locked, event).await?;
        info!(%resource_id, "maintenance started");
        Ok(updated)
    }

    /// Maintenance → Available.
    pub async fn end_maintenance(&self, resource_id: ResourceId) -> Result<Resource, CoreError> {
        let shared = self.shared(resource_id)?;
        let locked = self.committer.lock(resource_id, shared).await?;

        if locked.occupancy != Occupancy::Maintenance {
            return Err(CoreError::NotUnderMaintenance {
                resource_id,
                status: locked.status(),
            });
        }

        let event = Event::MaintenanceEnded {
            id: resource_id,
            at: now_ms().max(locked.updated_at),
        };
        let updated = self.commit_transition(locked, event).await?;
        info!(%resource_id, "maintenance ended");
        Ok(updated)
    }

    async fn commit_transition(
        &self,
        locked: Locked<Resource>,
        event: Event,
    ) -> Result<Resource, CoreError> {
        let kind = event.kind();
        let updated = self
            .committer
            .commit(locked, event, |resource, e| {
                apply_to_resource(resource, e);
                resource.clone()
            })
            .await?;
        metrics::counter!(crate::observability::RESOURCE_TRANSITIONS_TOTAL, "event" => kind).increment(1);
        Ok(updated)
    }

    // ── Queries ──────────────────────────────────────────────

    pub async fn get(&self, resource_id: ResourceId) -> Result<Resource, CoreError> {
        let shared = self.shared(resource_id)?;
        let guard = shared.read().await;
        Ok(guard.clone())
    }

    /// All resources, optionally of one kind, ordered by id.
    pub async fn list(&self, kind: Option<ResourceKind>) -> Vec<Resource> {
        let shared: Vec<SharedResource> = self.resources.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(shared.len());
        for resource in shared {
            let guard = resource.read().await;
            if kind.is_none_or(|k| guard.kind == k) {
                out.push(guard.clone());
            }
        }
        out.sort_by_key(|r| r.id);
        out
    }

    /// Available resources of `kind`, ordered by id.
    pub async fn list_available(&self, kind: ResourceKind) -> Vec<Resource> {
        let mut out = self.list(Some(kind)).await;
        out.retain(Resource::is_available);
        out
    }

    // ── Replay / compaction ──────────────────────────────────

    pub(crate) async fn apply(&self, event: &Event) {
        match event {
            Event::ResourceRegistered { resource } => {
                self.resources
                    .insert(resource.id, Arc::new(RwLock::new(resource.clone())));
            }
            Event::ResourceAssigned { id, .. }
            | Event::ResourceReleased { id, .. }
            | Event::MaintenanceStarted { id, .. }
            | Event::MaintenanceEnded { id, .. } => {
                let Some(shared) = self.resources.get(id).map(|e| e.value().clone()) else {
                    tracing::warn!(resource_id = %id, kind = event.kind(), "replayed event for unknown resource");
                    return;
                };
                apply_to_resource(&mut *shared.write().await, event);
            }
            _ => {}
        }
    }

    /// One `ResourceRegistered` per resource, carrying its current occupancy.
    pub(crate) async fn snapshot_events(&self) -> Vec<Event> {
        self.list(None)
            .await
            .into_iter()
            .map(|resource| Event::ResourceRegistered { resource })
            .collect()
    }
}

fn apply_to_resource(resource: &mut Resource, event: &Event) {
    let (occupancy, at) = match *event {
        Event::ResourceAssigned { patient_id, at, .. } => (
            Occupancy::Occupied {
                patient_id,
                assigned_at: at,
            },
            at,
        ),
        Event::ResourceReleased { at, .. }
        | Event::MaintenanceEnded { at, .. } => (Occupancy::Available, at),
        Event::MaintenanceStarted { at, .. } => (Occupancy::Maintenance, at),
        _ => return,
    };
    resource.occupancy = occupancy;
    resource.updated_at = at;
}
