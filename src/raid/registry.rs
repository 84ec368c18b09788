//! Raid registry
//!
//! Concurrent map of live raid instances. Each entry is a [`RaidHandle`]:
//! the instance behind its own mutex, the most recently published
//! snapshot for readers, an admission counter bounding how many requests
//! may queue on the mutex, and the once-only finalization slot.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

use crate::config::schema::BossDefinition;
use crate::config::validation::Validator;
use crate::error::RaidError;

use super::finalization::FinalizationRecord;
use super::instance::{InstanceId, RaidInstance, RaidSnapshot, RaidStatus};

// ============================================================================
// Handle
// ============================================================================

/// One registered raid instance.
pub struct RaidHandle {
    id: InstanceId,
    boss: Arc<BossDefinition>,
    state: Mutex<RaidInstance>,
    published: RwLock<Arc<RaidSnapshot>>,
    pending: AtomicUsize,
    finalization: OnceLock<Arc<FinalizationRecord>>,
}

impl std::fmt::Debug for RaidHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RaidHandle")
            .field("id", &self.id)
            .field("boss", &self.boss.id)
            .field("pending", &self.pending.load(Ordering::Relaxed))
            .field("finalized", &self.finalization.get().is_some())
            .finish_non_exhaustive()
    }
}

impl RaidHandle {
    fn new(instance: RaidInstance) -> Self {
        let snapshot = Arc::new(instance.snapshot());
        Self {
            id: instance.id().clone(),
            boss: Arc::clone(instance.boss()),
            state: Mutex::new(instance),
            published: RwLock::new(snapshot),
            pending: AtomicUsize::new(0),
            finalization: OnceLock::new(),
        }
    }

    /// Instance id.
    #[must_use]
    pub const fn id(&self) -> &InstanceId {
        &self.id
    }

    /// Boss definition.
    #[must_use]
    pub const fn boss(&self) -> &Arc<BossDefinition> {
        &self.boss
    }

    /// Latest published snapshot. Never touches the instance mutex.
    #[must_use]
    pub fn snapshot(&self) -> Arc<RaidSnapshot> {
        Arc::clone(&self.published.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Enters the instance's critical section.
    ///
    /// Poisoning is ignored: every instance mutation leaves it consistent.
    pub fn lock(&self) -> MutexGuard<'_, RaidInstance> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publishes a snapshot of `instance` for readers and returns it.
    ///
    /// The returned snapshot is the one taken under the caller's lock, even
    /// if another writer publishes again before the caller reads it.
    pub fn publish(&self, instance: &RaidInstance) -> Arc<RaidSnapshot> {
        let snapshot = Arc::new(instance.snapshot());
        *self.published.write().unwrap_or_else(PoisonError::into_inner) = Arc::clone(&snapshot);
        tracing::trace!(instance = %self.id, version = instance.version(), "snapshot published");
        snapshot
    }

    /// Reserves a place in the queue for the critical section.
    ///
    /// # Errors
    ///
    /// Returns [`RaidError::RaidBusy`] if `max_pending` requests are already
    /// waiting.
    pub fn admit(&self, max_pending: usize) -> Result<AdmissionGuard<'_>, RaidError> {
        let prev = self.pending.fetch_add(1, Ordering::AcqRel);
        if prev >= max_pending {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            return Err(RaidError::RaidBusy {
                instance_id: self.id.to_string(),
                pending: prev,
            });
        }
        Ok(AdmissionGuard {
            pending: &self.pending,
        })
    }

    /// Requests currently admitted.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Finalization record, once finalized.
    #[must_use]
    pub fn finalization(&self) -> Option<Arc<FinalizationRecord>> {
        self.finalization.get().cloned()
    }

    /// Stores the finalization record. Returns `false` if one was already stored.
    pub fn set_finalization(&self, record: Arc<FinalizationRecord>) -> bool {
        self.finalization.set(record).is_ok()
    }
}

/// Releases an admission slot on drop.
#[derive(Debug)]
pub struct AdmissionGuard<'a> {
    pending: &'a AtomicUsize,
}

impl Drop for AdmissionGuard<'_> {
    fn drop(&mut self) {
        self.pending.fetch_sub(1, Ordering::AcqRel);
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Id and status of a registered instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceSummary {
    /// Instance id
    pub instance_id: InstanceId,
    /// Boss definition id
    pub boss_id: String,
    /// Lifecycle status
    pub status: RaidStatus,
    /// Whether finalization has run
    pub finalized: bool,
}

/// Concurrent registry of raid instances.
#[derive(Debug, Default)]
pub struct RaidRegistry {
    instances: DashMap<InstanceId, Arc<RaidHandle>>,
}

impl RaidRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates `boss` and registers a fresh instance of it.
    ///
    /// # Errors
    ///
    /// Returns [`RaidError::ConfigInvalid`] if the definition fails validation.
    pub fn spawn(
        &self,
        boss: Arc<BossDefinition>,
        spawned_at: DateTime<Utc>,
        opens_at: DateTime<Utc>,
    ) -> Result<Arc<RaidHandle>, RaidError> {
        let result = Validator::new().validate_boss(&boss);
        if result.has_errors() {
            let reason = result
                .errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(RaidError::ConfigInvalid {
                boss_id: boss.id.clone(),
                reason,
            });
        }

        let id = InstanceId::generate();
        let handle = Arc::new(RaidHandle::new(RaidInstance::new(
            id.clone(),
            boss,
            spawned_at,
            opens_at,
        )));
        self.instances.insert(id, Arc::clone(&handle));
        Ok(handle)
    }

    /// Looks up an instance handle.
    ///
    /// # Errors
    ///
    /// Returns [`RaidError::InstanceNotFound`] for unknown ids.
    pub fn handle(&self, id: &InstanceId) -> Result<Arc<RaidHandle>, RaidError> {
        self.instances
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| RaidError::InstanceNotFound(id.to_string()))
    }

    /// Latest snapshot of an instance.
    ///
    /// # Errors
    ///
    /// Returns [`RaidError::InstanceNotFound`] for unknown ids.
    pub fn get(&self, id: &InstanceId) -> Result<Arc<RaidSnapshot>, RaidError> {
        self.handle(id).map(|h| h.snapshot())
    }

    /// Removes a finalized instance.
    ///
    /// # Errors
    ///
    /// Returns [`RaidError::InstanceNotFound`] for unknown ids and
    /// [`RaidError::RaidNotFinalized`] while the instance is still active.
    pub fn archive(&self, id: &InstanceId) -> Result<Arc<RaidHandle>, RaidError> {
        let handle = self.handle(id)?;
        if handle.finalization().is_none() {
            return Err(RaidError::RaidNotFinalized(id.to_string()));
        }
        self.instances.remove(id);
        Ok(handle)
    }

    /// Every registered handle.
    #[must_use]
    pub fn handles(&self) -> Vec<Arc<RaidHandle>> {
        self.instances.iter().map(|e| Arc::clone(e.value())).collect()
    }

    /// Ids and statuses of every registered instance.
    #[must_use]
    pub fn list(&self) -> Vec<InstanceSummary> {
        self.instances
            .iter()
            .map(|e| {
                let handle = e.value();
                InstanceSummary {
                    instance_id: handle.id().clone(),
                    boss_id: handle.boss().id.clone(),
                    status: handle.snapshot().status,
                    finalized: handle.finalization().is_some(),
                }
            })
            .collect()
    }

    /// Number of registered instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Returns `true` when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}
