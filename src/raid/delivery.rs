//! Reward delivery
//!
//! Hands finalization records to an external [`RewardSink`]. Delivery is
//! decoupled from computation: a failed delivery is retried with
//! exponential backoff and then parked, and redelivery reuses the stored
//! record without recomputing anything. The instance id is the
//! idempotency key.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::{DashMap, DashSet};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::DeliverySettings;
use crate::error::DeliveryError;
use crate::observability::events::{EventEmitter, RaidEvent};
use crate::observability::metrics;

use super::finalization::FinalizationRecord;
use super::instance::InstanceId;

/// External recipient of reward bundles.
#[async_trait]
pub trait RewardSink: Send + Sync + std::fmt::Debug {
    /// Delivers every bundle of `record`.
    ///
    /// May be called more than once for the same record; implementations
    /// should treat `record.instance_id` as an idempotency key.
    ///
    /// # Errors
    ///
    /// Returns a [`DeliveryError`] if the sink is unreachable or refuses
    /// the record.
    async fn deliver(&self, record: &FinalizationRecord) -> Result<(), DeliveryError>;
}

/// Sink that logs each bundle and always succeeds.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingSink;

#[async_trait]
impl RewardSink for LoggingSink {
    async fn deliver(&self, record: &FinalizationRecord) -> Result<(), DeliveryError> {
        for bundle in &record.rewards.players {
            info!(
                instance = %record.instance_id,
                player = %bundle.player_id,
                rank = bundle.rank,
                items = bundle.items.len(),
                exclusive = bundle.exclusive,
                "reward bundle delivered"
            );
        }
        for bundle in &record.rewards.guilds {
            info!(
                instance = %record.instance_id,
                guild = %bundle.guild_id,
                rank = bundle.rank,
                items = bundle.items.len(),
                "guild reward bundle delivered"
            );
        }
        Ok(())
    }
}

/// Outcome of a redelivery pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RedeliveryReport {
    /// Records delivered by this pass
    pub delivered: usize,
    /// Records still pending afterwards
    pub still_pending: usize,
}

/// Retrying delivery queue consumer.
pub struct DeliveryWorker {
    sink: Arc<dyn RewardSink>,
    settings: DeliverySettings,
    events: Option<Arc<EventEmitter>>,
    pending: DashMap<InstanceId, Arc<FinalizationRecord>>,
    delivered: DashSet<InstanceId>,
}

impl std::fmt::Debug for DeliveryWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryWorker")
            .field("sink", &self.sink)
            .field("settings", &self.settings)
            .field("pending", &self.pending.len())
            .field("delivered", &self.delivered.len())
            .finish_non_exhaustive()
    }
}

impl DeliveryWorker {
    /// Creates a worker delivering to `sink`.
    #[must_use]
    pub fn new(sink: Arc<dyn RewardSink>, settings: DeliverySettings) -> Self {
        Self {
            sink,
            settings,
            events: None,
            pending: DashMap::new(),
            delivered: DashSet::new(),
        }
    }

    /// Emits delivery events to `emitter`.
    #[must_use]
    pub fn with_event_emitter(mut self, emitter: Arc<EventEmitter>) -> Self {
        self.events = Some(emitter);
        self
    }

    fn emit(&self, event: RaidEvent) {
        if let Some(events) = &self.events {
            events.emit(event);
        }
    }

    /// Delivers one record, retrying with exponential backoff.
    ///
    /// Returns the number of attempts it took, or `0` if the record had
    /// already been delivered. After the last failed attempt the record is
    /// parked for [`redeliver_pending`](Self::redeliver_pending).
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Exhausted`] when every attempt failed.
    pub async fn deliver(&self, record: Arc<FinalizationRecord>) -> Result<u32, DeliveryError> {
        let id = record.instance_id.clone();
        if self.delivered.contains(&id) {
            debug!(instance = %id, "rewards already delivered; skipping");
            self.pending.remove(&id);
            return Ok(0);
        }

        let max_attempts = self.settings.max_attempts.max(1);
        let mut backoff = self.settings.initial_backoff;
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            match self.sink.deliver(&record).await {
                Ok(()) => {
                    metrics::record_delivery(true);
                    self.delivered.insert(id.clone());
                    self.pending.remove(&id);
                    metrics::set_pending_deliveries(self.pending.len());
                    self.emit(RaidEvent::RewardsDelivered {
                        timestamp: Utc::now(),
                        instance_id: id.to_string(),
                        attempts: attempt,
                    });
                    info!(instance = %id, attempts = attempt, "rewards delivered");
                    return Ok(attempt);
                }
                Err(err) => {
                    metrics::record_delivery(false);
                    warn!(instance = %id, attempt, max_attempts, %err, "reward delivery failed");
                    last_error = err.to_string();
                    if attempt < max_attempts {
                        tokio::time::sleep(backoff).await;
                        backoff = next_backoff(backoff, self.settings.max_backoff);
                    }
                }
            }
        }

        self.pending.insert(id.clone(), record);
        metrics::set_pending_deliveries(self.pending.len());
        self.emit(RaidEvent::DeliveryFailed {
            timestamp: Utc::now(),
            instance_id: id.to_string(),
            attempts: max_attempts,
            error: last_error.clone(),
        });
        Err(DeliveryError::Exhausted {
            instance_id: id.to_string(),
            attempts: max_attempts,
            last_error,
        })
    }

    /// Retries every parked record.
    pub async fn redeliver_pending(&self) -> RedeliveryReport {
        let records: Vec<Arc<FinalizationRecord>> =
            self.pending.iter().map(|e| Arc::clone(e.value())).collect();

        let mut report = RedeliveryReport::default();
        for record in records {
            if self.deliver(record).await.is_ok() {
                report.delivered += 1;
            }
        }
        report.still_pending = self.pending.len();
        report
    }

    /// Number of parked records.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Ids of parked records.
    #[must_use]
    pub fn pending_ids(&self) -> Vec<InstanceId> {
        self.pending.iter().map(|e| e.key().clone()).collect()
    }

    /// Whether rewards for `id` have been delivered.
    #[must_use]
    pub fn is_delivered(&self, id: &InstanceId) -> bool {
        self.delivered.contains(id)
    }

    /// Drops the delivered marker for an archived instance.
    ///
    /// Archived instances are never finalized again, so their idempotency
    /// key is no longer needed. Parked records are left alone and keep
    /// being retried.
    pub fn forget(&self, id: &InstanceId) -> bool {
        self.delivered.remove(id).is_some()
    }

    /// Consumes records from `rx` until the channel closes or `cancel` fires.
    pub fn spawn(
        self: &Arc<Self>,
        mut rx: mpsc::UnboundedReceiver<Arc<FinalizationRecord>>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let worker = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        debug!("delivery worker cancelled");
                        break;
                    }
                    next = rx.recv() => {
                        let Some(record) = next else {
                            debug!("delivery queue closed");
                            break;
                        };
                        // Exhausted records are parked; nothing more to do here.
                        let _ = worker.deliver(record).await;
                    }
                }
            }
        })
    }
}

fn next_backoff(current: Duration, max: Duration) -> Duration {
    current.saturating_mul(2).min(max)
}
