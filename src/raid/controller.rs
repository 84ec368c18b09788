//! Raid lifecycle controller
//!
//! Entry point for spawning raids, resolving attacks, answering queries and
//! closing instances. Every state change of an instance happens inside that
//! instance's critical section; finalization runs there too, exactly once,
//! for whichever caller flipped the instance out of `Active`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ConfigProvider, RaidSettings};
use crate::error::RaidError;
use crate::observability::events::{EventEmitter, RaidEvent};
use crate::observability::metrics;

use super::clock::{Clock, add_duration};
use super::combat::{CombatContext, CombatSimulator, TeamDescriptor};
use super::delivery::DeliveryWorker;
use super::finalization::FinalizationRecord;
use super::instance::{GuildId, InstanceId, InstanceStatus, PlayerId, RaidInstance, RaidSnapshot, RaidStatus};
use super::ledger::{Attacker, ContributionEntry};
use super::phase::{self, MAX_DEBUFF_STACKS, effective_stats};
use super::ranking::{
    self, GuildDirectory, IdGuildDirectory, PlayerRank, RankedGuild, RankedPlayer,
};
use super::registry::{InstanceSummary, RaidHandle, RaidRegistry};
use super::reward::{InMemoryMilestoneHistory, MilestoneHistory};

// ============================================================================
// Requests and responses
// ============================================================================

/// Request to open a new raid instance.
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    /// Boss definition id in the catalog
    pub boss_definition_id: String,
    /// When the encounter window opens (defaults to now)
    pub starts_at: Option<DateTime<Utc>>,
}

impl SpawnRequest {
    /// Spawns `boss_definition_id`, opening immediately.
    #[must_use]
    pub fn now(boss_definition_id: impl Into<String>) -> Self {
        Self {
            boss_definition_id: boss_definition_id.into(),
            starts_at: None,
        }
    }
}

/// Result of a successful spawn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpawnResponse {
    /// New instance id
    pub instance_id: InstanceId,
    /// Boss definition id
    pub boss_id: String,
    /// Starting HP
    pub max_hp: u64,
    /// Number of phases
    pub phase_count: usize,
    /// Window open time
    pub opens_at: DateTime<Utc>,
    /// Window close time
    pub ends_at: DateTime<Utc>,
}

/// One participant's attack on an instance.
#[derive(Debug, Clone)]
pub struct AttackRequest {
    /// Target instance
    pub instance_id: InstanceId,
    /// Attacker
    pub player_id: PlayerId,
    /// Attacker display name
    pub display_name: String,
    /// Attacker's guild, if any
    pub guild_id: Option<GuildId>,
    /// Team sent into combat
    pub team: TeamDescriptor,
}

/// Why an attack was declined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// The encounter window has not opened
    NotActive,
    /// The boss is already defeated
    AlreadyDefeated,
    /// The encounter window has closed
    Expired,
    /// The participant has no attempts left
    AttemptLimitExceeded,
    /// Too many requests are queued on the instance
    Busy,
}

impl RejectReason {
    /// Maps a lifecycle error to the reason reported on the response.
    #[must_use]
    pub const fn from_error(err: &RaidError) -> Option<Self> {
        match err {
            RaidError::RaidNotActive(_) => Some(Self::NotActive),
            RaidError::RaidAlreadyDefeated(_) => Some(Self::AlreadyDefeated),
            RaidError::RaidExpired(_) => Some(Self::Expired),
            RaidError::AttemptLimitExceeded { .. } => Some(Self::AttemptLimitExceeded),
            RaidError::RaidBusy { .. } => Some(Self::Busy),
            RaidError::ConfigInvalid { .. }
            | RaidError::InstanceNotFound(_)
            | RaidError::RaidNotFinalized(_) => None,
        }
    }

    /// Metric label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotActive => "not_active",
            Self::AlreadyDefeated => "already_defeated",
            Self::Expired => "expired",
            Self::AttemptLimitExceeded => "attempt_limit",
            Self::Busy => "busy",
        }
    }
}

/// Result of an attack request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttackResponse {
    /// Whether the attack was resolved
    pub accepted: bool,
    /// Why the attack was declined
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<RejectReason>,
    /// Human-readable decline message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Damage credited (shield absorption plus HP loss)
    pub damage_applied: u64,
    /// Portion of the damage absorbed by a shield
    pub shield_absorbed: u64,
    /// Boss HP after the attack
    pub boss_current_hp: u64,
    /// Boss maximum HP
    pub boss_max_hp: u64,
    /// Boss phase after the attack
    pub current_phase: u32,
    /// Whether this attack moved the boss into a new phase
    pub phase_changed: bool,
    /// Whether this attack defeated the boss
    pub boss_defeated: bool,
    /// Caller's rank, if they have attacked
    pub caller_rank: Option<u32>,
    /// Caller's guild rank, if they belong to a guild
    pub caller_guild_rank: Option<u32>,
    /// Attempts the caller has left
    pub attempts_remaining: u32,
}

/// Outcome of one expiry sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Instances expired by this sweep
    pub expired: usize,
    /// Finalized instances archived by this sweep
    pub archived: usize,
}

// ============================================================================
// Controller
// ============================================================================

/// Orchestrates raid instances.
pub struct RaidController {
    registry: RaidRegistry,
    config: Arc<dyn ConfigProvider>,
    combat: Arc<dyn CombatSimulator>,
    clock: Arc<dyn Clock>,
    milestones: Arc<dyn MilestoneHistory>,
    guilds: Arc<dyn GuildDirectory>,
    events: Option<Arc<EventEmitter>>,
    delivery: Option<Arc<DeliveryWorker>>,
    settings: RaidSettings,
    finalized_tx: mpsc::UnboundedSender<Arc<FinalizationRecord>>,
    finalized_rx: Mutex<Option<mpsc::UnboundedReceiver<Arc<FinalizationRecord>>>>,
    finalizations: AtomicU64,
    cancel: CancellationToken,
}

impl std::fmt::Debug for RaidController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RaidController")
            .field("instances", &self.registry.len())
            .field("combat", &self.combat.name())
            .field("finalizations", &self.finalizations.load(Ordering::Relaxed))
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl RaidController {
    /// Creates a controller with in-memory milestone history, id-only guild
    /// names, no event stream and default settings.
    #[must_use]
    pub fn new(
        config: Arc<dyn ConfigProvider>,
        combat: Arc<dyn CombatSimulator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (finalized_tx, finalized_rx) = mpsc::unbounded_channel();
        Self {
            registry: RaidRegistry::new(),
            config,
            combat,
            clock,
            milestones: Arc::new(InMemoryMilestoneHistory::new()),
            guilds: Arc::new(IdGuildDirectory),
            events: None,
            delivery: None,
            settings: RaidSettings::default(),
            finalized_tx,
            finalized_rx: Mutex::new(Some(finalized_rx)),
            finalizations: AtomicU64::new(0),
            cancel: CancellationToken::new(),
        }
    }

    /// Uses `history` for one-time milestone bookkeeping.
    #[must_use]
    pub fn with_milestone_history(mut self, history: Arc<dyn MilestoneHistory>) -> Self {
        self.milestones = history;
        self
    }

    /// Uses `directory` for guild display names.
    #[must_use]
    pub fn with_guild_directory(mut self, directory: Arc<dyn GuildDirectory>) -> Self {
        self.guilds = directory;
        self
    }

    /// Emits lifecycle events to `emitter`.
    #[must_use]
    pub fn with_event_emitter(mut self, emitter: Arc<EventEmitter>) -> Self {
        self.events = Some(emitter);
        self
    }

    /// Tells `worker` when an instance is archived so it can drop the
    /// instance's delivery marker.
    #[must_use]
    pub fn with_delivery_worker(mut self, worker: Arc<DeliveryWorker>) -> Self {
        self.delivery = Some(worker);
        self
    }

    /// Overrides runtime settings.
    #[must_use]
    pub fn with_settings(mut self, settings: RaidSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Takes the receiving end of the finalized-record queue.
    ///
    /// Returns `None` after the first call.
    pub fn take_finalized_receiver(
        &self,
    ) -> Option<mpsc::UnboundedReceiver<Arc<FinalizationRecord>>> {
        self.finalized_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// The instance registry.
    #[must_use]
    pub const fn registry(&self) -> &RaidRegistry {
        &self.registry
    }

    /// Number of finalizations performed.
    #[must_use]
    pub fn finalization_count(&self) -> u64 {
        self.finalizations.load(Ordering::Acquire)
    }

    fn emit(&self, event: RaidEvent) {
        if let Some(events) = &self.events {
            events.emit(event);
        }
    }

    fn archived(&self, id: &InstanceId) {
        if let Some(worker) = &self.delivery {
            worker.forget(id);
        }
    }

    // ========================================================================
    // Spawn
    // ========================================================================

    /// Spawns a new instance of a catalog boss.
    ///
    /// # Errors
    ///
    /// Returns [`RaidError::ConfigInvalid`] if the id is unknown (with a
    /// suggestion when a close id exists) or the definition fails validation.
    pub fn spawn(&self, request: &SpawnRequest) -> Result<SpawnResponse, RaidError> {
        let id = &request.boss_definition_id;
        let boss = self.config.boss_definition(id).ok_or_else(|| {
            let reason = self.config.suggest(id).map_or_else(
                || "unknown boss definition".to_string(),
                |s| format!("unknown boss definition (did you mean '{s}'?)"),
            );
            RaidError::ConfigInvalid {
                boss_id: id.clone(),
                reason,
            }
        })?;

        let now = self.clock.now();
        let opens_at = request.starts_at.unwrap_or(now);
        let handle = self.registry.spawn(boss, now, opens_at)?;
        let snapshot = handle.snapshot();

        metrics::record_spawn(&snapshot.boss_id);
        self.emit(RaidEvent::InstanceSpawned {
            timestamp: now,
            instance_id: snapshot.instance_id.to_string(),
            boss_id: snapshot.boss_id.clone(),
            max_hp: snapshot.max_hp,
            ends_at: snapshot.ends_at,
        });
        info!(
            instance = %snapshot.instance_id,
            boss = %snapshot.boss_id,
            max_hp = snapshot.max_hp,
            ends_at = %snapshot.ends_at,
            "raid instance spawned"
        );

        Ok(SpawnResponse {
            instance_id: snapshot.instance_id.clone(),
            boss_id: snapshot.boss_id.clone(),
            max_hp: snapshot.max_hp,
            phase_count: snapshot.phase_count,
            opens_at: snapshot.opens_at,
            ends_at: snapshot.ends_at,
        })
    }

    // ========================================================================
    // Attack
    // ========================================================================

    /// Resolves one attack.
    ///
    /// Declined attacks return `Ok` with `accepted == false` and a reason.
    /// Checks run in order: window not yet open, already defeated, expired
    /// (an overdue active instance is expired and finalized here), attempt
    /// limit. A declined attack changes no contribution state.
    ///
    /// # Errors
    ///
    /// Returns [`RaidError::InstanceNotFound`] for unknown instances.
    pub fn attack(&self, request: &AttackRequest) -> Result<AttackResponse, RaidError> {
        let started = Instant::now();
        let handle = self.registry.handle(&request.instance_id)?;
        let boss_id = handle.boss().id.clone();

        let _slot = match handle.admit(self.settings.max_pending_attacks) {
            Ok(slot) => slot,
            Err(err) => {
                warn!(instance = %request.instance_id, player = %request.player_id, %err, "attack declined");
                return Ok(self.decline(&handle, request, &err, started));
            }
        };

        let mut inst = handle.lock();
        let now = self.clock.now();

        if let Some(err) = self.precheck(&handle, &mut inst, now) {
            drop(inst);
            return Ok(self.decline(&handle, request, &err, started));
        }

        let attacker = Attacker {
            player_id: &request.player_id,
            display_name: &request.display_name,
            guild_id: request.guild_id.as_ref(),
        };
        let limit = inst.boss().attempt_limit;
        let attempts_remaining = match inst.ledger_mut().record_attempt(attacker, limit, now) {
            Ok(remaining) => remaining,
            Err(err) => {
                drop(inst);
                return Ok(self.decline(&handle, request, &err, started));
            }
        };

        let phase_before = inst.current_phase();
        let attempt = limit - attempts_remaining;
        let outcome = self.combat.simulate(&CombatContext {
            boss_id: &boss_id,
            phase: phase_before,
            stats: effective_stats(inst.boss(), phase_before, inst.debuff_stacks()),
            player_id: &request.player_id,
            attempt,
            team: &request.team,
        });

        let applied = inst.apply_damage(outcome.total_damage);
        let seq = inst
            .ledger_mut()
            .record_damage(
                &ContributionEntry {
                    player_id: request.player_id.clone(),
                    damage: applied.applied(),
                    highest_hit: outcome.highest_hit,
                    phase: phase_before,
                    participant_deaths: outcome.participant_deaths,
                },
                now,
            )
            .unwrap_or_default();
        inst.add_debuffs(outcome.debuffs_applied, MAX_DEBUFF_STACKS);

        let boss_defeated = inst.current_hp() == 0 && inst.mark_defeated(now);
        let transition = if boss_defeated {
            None
        } else {
            phase::evaluate(&mut inst, &request.player_id, seq, now)
        };

        if let Some(entry) = &transition {
            metrics::record_phase_transition(&boss_id, entry.phase);
            self.emit(RaidEvent::PhaseEntered {
                timestamp: now,
                instance_id: request.instance_id.to_string(),
                from_phase: entry.from_phase,
                phase: entry.phase,
                effect: entry.effect.label().to_string(),
                hp_after_effect: entry.hp_after_effect,
                triggered_by: request.player_id.to_string(),
            });
        }

        if boss_defeated {
            info!(
                instance = %request.instance_id,
                boss = %boss_id,
                final_blow = %request.player_id,
                participants = inst.ledger().participant_count(),
                "boss defeated"
            );
            self.emit(RaidEvent::BossDefeated {
                timestamp: now,
                instance_id: request.instance_id.to_string(),
                final_blow_by: request.player_id.to_string(),
                participants: inst.ledger().participant_count(),
            });
            self.finalize_locked(&handle, &inst, now);
        }

        let snapshot = handle.publish(&inst);
        drop(inst);

        metrics::record_damage(&boss_id, applied.applied());
        metrics::record_attack(&boss_id, "accepted", started.elapsed());
        debug!(
            instance = %request.instance_id,
            player = %request.player_id,
            damage = applied.applied(),
            absorbed = applied.absorbed,
            hp = snapshot.current_hp,
            "attack resolved"
        );

        let (caller_rank, caller_guild_rank) = caller_ranks(&snapshot, &request.player_id);
        Ok(AttackResponse {
            accepted: true,
            reason: None,
            message: None,
            damage_applied: applied.applied(),
            shield_absorbed: applied.absorbed,
            boss_current_hp: snapshot.current_hp,
            boss_max_hp: snapshot.max_hp,
            current_phase: snapshot.current_phase,
            phase_changed: transition.is_some(),
            boss_defeated,
            caller_rank,
            caller_guild_rank,
            attempts_remaining,
        })
    }

    /// Lifecycle checks that precede the attempt check.
    ///
    /// Expires an overdue instance as a side effect.
    fn precheck(
        &self,
        handle: &RaidHandle,
        inst: &mut RaidInstance,
        now: DateTime<Utc>,
    ) -> Option<RaidError> {
        let id = inst.id().to_string();
        match inst.status() {
            RaidStatus::Defeated => Some(RaidError::RaidAlreadyDefeated(id)),
            RaidStatus::Expired => Some(RaidError::RaidExpired(id)),
            RaidStatus::Active if inst.is_past_end(now) => {
                if self.expire_locked(handle, inst, now) {
                    handle.publish(inst);
                }
                Some(RaidError::RaidExpired(id))
            }
            RaidStatus::Active if inst.is_before_open(now) => Some(RaidError::RaidNotActive(id)),
            RaidStatus::Active => None,
        }
    }

    fn decline(
        &self,
        handle: &RaidHandle,
        request: &AttackRequest,
        err: &RaidError,
        started: Instant,
    ) -> AttackResponse {
        let reason = RejectReason::from_error(err);
        metrics::record_attack(
            &handle.boss().id,
            reason.map_or("error", RejectReason::as_str),
            started.elapsed(),
        );
        debug!(instance = %request.instance_id, player = %request.player_id, %err, "attack declined");

        let snapshot = handle.snapshot();
        let (caller_rank, caller_guild_rank) = caller_ranks(&snapshot, &request.player_id);
        let used = snapshot
            .player(&request.player_id)
            .map_or(0, |p| p.attempts_used);

        AttackResponse {
            accepted: false,
            reason,
            message: Some(err.to_string()),
            damage_applied: 0,
            shield_absorbed: 0,
            boss_current_hp: snapshot.current_hp,
            boss_max_hp: snapshot.max_hp,
            current_phase: snapshot.current_phase,
            phase_changed: false,
            boss_defeated: false,
            caller_rank,
            caller_guild_rank,
            attempts_remaining: snapshot.attempt_limit.saturating_sub(used),
        }
    }

    // ========================================================================
    // Expiry and finalization
    // ========================================================================

    /// Flips an active instance to `Expired` and finalizes it.
    ///
    /// Must be called with the instance locked. Returns `true` only for the
    /// caller that performed the flip.
    fn expire_locked(&self, handle: &RaidHandle, inst: &mut RaidInstance, now: DateTime<Utc>) -> bool {
        if !inst.mark_expired(now) {
            return false;
        }
        info!(
            instance = %inst.id(),
            boss = %inst.boss().id,
            remaining_hp = inst.current_hp(),
            "raid expired"
        );
        self.emit(RaidEvent::RaidExpired {
            timestamp: now,
            instance_id: inst.id().to_string(),
            remaining_hp: inst.current_hp(),
        });
        self.finalize_locked(handle, inst, now);
        true
    }

    /// Builds and stores the finalization record, then queues it for delivery.
    fn finalize_locked(&self, handle: &RaidHandle, inst: &RaidInstance, now: DateTime<Utc>) {
        if handle.finalization().is_some() {
            warn!(instance = %inst.id(), "finalization already recorded; skipping");
            return;
        }

        let snapshot = inst.snapshot();
        let mut record = FinalizationRecord::build(
            &snapshot,
            &inst.boss().rewards,
            self.milestones.as_ref(),
            self.guilds.as_ref(),
            now,
        );
        let withdrawn = record.rewards.claim_first_time(
            &record.boss_id,
            &inst.boss().rewards,
            self.milestones.as_ref(),
        );
        for (player, milestone) in &withdrawn {
            warn!(
                instance = %inst.id(),
                player = %player,
                milestone = %milestone,
                "one-time milestone already claimed by another raid; withdrawn"
            );
        }

        let record = Arc::new(record);
        if !handle.set_finalization(Arc::clone(&record)) {
            warn!(instance = %inst.id(), "finalization already recorded; skipping");
            return;
        }

        self.finalizations.fetch_add(1, Ordering::AcqRel);
        metrics::record_terminal(&record.boss_id, record.outcome == RaidStatus::Defeated);
        self.emit(RaidEvent::RaidFinalized {
            timestamp: now,
            instance_id: record.instance_id.to_string(),
            outcome: record.outcome.to_string(),
            participants: record.participant_count(),
            total_damage: record.total_damage,
        });
        info!(
            instance = %record.instance_id,
            outcome = %record.outcome,
            participants = record.participant_count(),
            total_damage = record.total_damage,
            "raid finalized"
        );

        if self.finalized_tx.send(record).is_err() {
            debug!(instance = %inst.id(), "no delivery queue attached; record kept on the instance only");
        }
    }

    /// Expires overdue instances and archives old finalized ones.
    ///
    /// Takes each candidate instance's lock, so it never races an attack.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();

        for handle in self.registry.handles() {
            if let Some(record) = handle.finalization() {
                if add_duration(record.finalized_at, self.settings.archive_after) <= now
                    && self.registry.archive(handle.id()).is_ok()
                {
                    self.archived(handle.id());
                    debug!(instance = %handle.id(), "archived finalized raid");
                    report.archived += 1;
                }
                continue;
            }

            if handle.snapshot().status != RaidStatus::Active {
                continue;
            }
            let mut inst = handle.lock();
            if inst.status() == RaidStatus::Active
                && inst.is_past_end(now)
                && self.expire_locked(&handle, &mut inst, now)
            {
                handle.publish(&inst);
                report.expired += 1;
            }
        }

        if report.expired > 0 || report.archived > 0 {
            debug!(expired = report.expired, archived = report.archived, "sweep complete");
        }
        report
    }

    /// Runs [`sweep_expired`](Self::sweep_expired) on an interval until
    /// [`shutdown`](Self::shutdown).
    pub fn start_sweep_task(self: &Arc<Self>) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        let period = self
            .settings
            .sweep_interval
            .max(std::time::Duration::from_millis(10));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    () = controller.cancel.cancelled() => {
                        debug!("sweep task cancelled");
                        break;
                    }
                    _ = interval.tick() => {
                        controller.sweep_expired(controller.clock.now());
                    }
                }
            }
        })
    }

    /// Stops the sweep task.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Cancellation token observed by background tasks.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Latest snapshot of an instance.
    ///
    /// # Errors
    ///
    /// Returns [`RaidError::InstanceNotFound`] for unknown instances.
    pub fn get_snapshot(&self, id: &InstanceId) -> Result<Arc<RaidSnapshot>, RaidError> {
        self.registry.get(id)
    }

    /// Top `top_n` participants.
    ///
    /// # Errors
    ///
    /// Returns [`RaidError::InstanceNotFound`] for unknown instances.
    pub fn get_leaderboard(
        &self,
        id: &InstanceId,
        top_n: usize,
    ) -> Result<Vec<RankedPlayer>, RaidError> {
        let snapshot = self.registry.get(id)?;
        Ok(ranking::leaderboard(&snapshot, top_n))
    }

    /// Top `top_n` guilds.
    ///
    /// # Errors
    ///
    /// Returns [`RaidError::InstanceNotFound`] for unknown instances.
    pub fn get_guild_leaderboard(
        &self,
        id: &InstanceId,
        top_n: usize,
    ) -> Result<Vec<RankedGuild>, RaidError> {
        let snapshot = self.registry.get(id)?;
        Ok(ranking::guild_leaderboard(
            &snapshot,
            top_n,
            self.guilds.as_ref(),
        ))
    }

    /// A participant's current rank.
    ///
    /// # Errors
    ///
    /// Returns [`RaidError::InstanceNotFound`] for unknown instances.
    pub fn get_player_rank(
        &self,
        id: &InstanceId,
        player: &PlayerId,
    ) -> Result<PlayerRank, RaidError> {
        let snapshot = self.registry.get(id)?;
        Ok(ranking::player_rank(&snapshot, player))
    }

    /// HP, phase and status of an instance.
    ///
    /// # Errors
    ///
    /// Returns [`RaidError::InstanceNotFound`] for unknown instances.
    pub fn get_instance_status(&self, id: &InstanceId) -> Result<InstanceStatus, RaidError> {
        Ok(self.registry.get(id)?.status_report())
    }

    /// The finalization record of a closed instance.
    ///
    /// # Errors
    ///
    /// Returns [`RaidError::InstanceNotFound`] for unknown instances and
    /// [`RaidError::RaidNotFinalized`] while the instance is still active.
    pub fn get_finalization(&self, id: &InstanceId) -> Result<Arc<FinalizationRecord>, RaidError> {
        self.registry
            .handle(id)?
            .finalization()
            .ok_or_else(|| RaidError::RaidNotFinalized(id.to_string()))
    }

    /// Ids and statuses of all registered instances.
    #[must_use]
    pub fn list(&self) -> Vec<InstanceSummary> {
        self.registry.list()
    }

    /// Removes a finalized instance from the registry.
    ///
    /// # Errors
    ///
    /// Returns [`RaidError::InstanceNotFound`] for unknown instances and
    /// [`RaidError::RaidNotFinalized`] while the instance is still active.
    pub fn archive(&self, id: &InstanceId) -> Result<(), RaidError> {
        self.registry.archive(id)?;
        self.archived(id);
        info!(instance = %id, "raid archived");
        Ok(())
    }
}

/// Caller's rank and guild rank in `snapshot`.
fn caller_ranks(snapshot: &RaidSnapshot, player: &PlayerId) -> (Option<u32>, Option<u32>) {
    let rank = match ranking::player_rank(snapshot, player) {
        PlayerRank::Ranked { rank, .. } => Some(rank),
        PlayerRank::NotParticipating => None,
    };
    let guild_rank = snapshot
        .player(player)
        .and_then(|p| p.guild_id.as_ref())
        .and_then(|g| ranking::guild_rank(snapshot, g));
    (rank, guild_rank)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::LoadedCatalog;
    use crate::config::schema::{
        BossDefinition, PhaseSpec, RewardPolicy, StatModifiers, TransitionEffect,
    };
    use crate::raid::clock::ManualClock;
    use crate::raid::combat::{CombatOutcome, TeamPowerSimulator};

    /// Simulator that deals exactly the team's total power.
    #[derive(Debug)]
    struct FixedDamage;

    impl CombatSimulator for FixedDamage {
        fn simulate(&self, ctx: &CombatContext<'_>) -> CombatOutcome {
            let power = ctx.team.total_power();
            CombatOutcome {
                total_damage: power,
                highest_hit: power,
                ..CombatOutcome::default()
            }
        }

        fn name(&self) -> &'static str {
            "fixed"
        }
    }

    fn start() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn wyrm() -> BossDefinition {
        BossDefinition {
            id: "frost_wyrm".to_string(),
            name: None,
            max_hp: 1000,
            base_attack: 0,
            base_defense: 0,
            attempt_limit: 2,
            duration: Duration::from_secs(3600),
            shield_absorbs_damage: false,
            phases: vec![
                PhaseSpec {
                    phase: 1,
                    name: None,
                    hp_threshold: 1.0,
                    on_enter: TransitionEffect::None,
                    modifiers: StatModifiers::default(),
                    mechanics: vec![],
                },
                PhaseSpec {
                    phase: 2,
                    name: None,
                    hp_threshold: 0.5,
                    on_enter: TransitionEffect::None,
                    modifiers: StatModifiers::default(),
                    mechanics: vec![],
                },
            ],
            rewards: RewardPolicy::default(),
        }
    }

    fn controller() -> (RaidController, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start()));
        let controller = RaidController::new(
            Arc::new(LoadedCatalog::new([wyrm()])),
            Arc::new(FixedDamage),
            clock.clone(),
        );
        (controller, clock)
    }

    fn attack(instance: &InstanceId, player: &str, damage: u64) -> AttackRequest {
        AttackRequest {
            instance_id: instance.clone(),
            player_id: PlayerId::new(player),
            display_name: player.to_string(),
            guild_id: Some(GuildId::new("g1")),
            team: TeamDescriptor::uniform(1, damage),
        }
    }

    #[test]
    fn test_spawn_unknown_boss_suggests() {
        let (controller, _) = controller();
        let err = controller.spawn(&SpawnRequest::now("frost_wrym")).unwrap_err();
        match err {
            RaidError::ConfigInvalid { reason, .. } => assert!(reason.contains("frost_wyrm")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_attack_flow() {
        let (controller, _) = controller();
        let spawned = controller.spawn(&SpawnRequest::now("frost_wyrm")).unwrap();
        assert_eq!(spawned.max_hp, 1000);
        assert_eq!(spawned.phase_count, 2);

        let resp = controller.attack(&attack(&spawned.instance_id, "p1", 600)).unwrap();
        assert!(resp.accepted);
        assert_eq!(resp.damage_applied, 600);
        assert_eq!(resp.boss_current_hp, 400);
        assert!(resp.phase_changed);
        assert_eq!(resp.current_phase, 2);
        assert_eq!(resp.caller_rank, Some(1));
        assert_eq!(resp.caller_guild_rank, Some(1));
        assert_eq!(resp.attempts_remaining, 1);
    }

    #[test]
    fn test_attack_unknown_instance_is_error() {
        let (controller, _) = controller();
        let err = controller
            .attack(&attack(&InstanceId::new("missing"), "p1", 10))
            .unwrap_err();
        assert!(matches!(err, RaidError::InstanceNotFound(_)));
    }

    #[test]
    fn test_attempt_limit_declines() {
        let (controller, _) = controller();
        let id = controller
            .spawn(&SpawnRequest::now("frost_wyrm"))
            .unwrap()
            .instance_id;
        controller.attack(&attack(&id, "p1", 1)).unwrap();
        controller.attack(&attack(&id, "p1", 1)).unwrap();
        let resp = controller.attack(&attack(&id, "p1", 1)).unwrap();
        assert!(!resp.accepted);
        assert_eq!(resp.reason, Some(RejectReason::AttemptLimitExceeded));
        assert_eq!(resp.attempts_remaining, 0);
        assert_eq!(resp.boss_current_hp, 998);
    }

    #[test]
    fn test_defeat_finalizes_once() {
        let (controller, _) = controller();
        let mut rx = controller.take_finalized_receiver().unwrap();
        let id = controller
            .spawn(&SpawnRequest::now("frost_wyrm"))
            .unwrap()
            .instance_id;

        let resp = controller.attack(&attack(&id, "p1", 5_000)).unwrap();
        assert!(resp.boss_defeated);
        assert!(!resp.phase_changed);
        assert_eq!(resp.boss_current_hp, 0);
        assert_eq!(resp.damage_applied, 1000);

        let late = controller.attack(&attack(&id, "p2", 10)).unwrap();
        assert_eq!(late.reason, Some(RejectReason::AlreadyDefeated));

        assert_eq!(controller.finalization_count(), 1);
        let record = rx.try_recv().unwrap();
        assert_eq!(record.outcome, RaidStatus::Defeated);
        assert!(rx.try_recv().is_err());
        assert!(controller.get_finalization(&id).is_ok());
    }

    #[test]
    fn test_lazy_expiry() {
        let (controller, clock) = controller();
        let id = controller
            .spawn(&SpawnRequest::now("frost_wyrm"))
            .unwrap()
            .instance_id;
        controller.attack(&attack(&id, "p1", 100)).unwrap();

        clock.advance(Duration::from_secs(3601));
        let resp = controller.attack(&attack(&id, "p2", 100)).unwrap();
        assert_eq!(resp.reason, Some(RejectReason::Expired));
        assert_eq!(
            controller.get_instance_status(&id).unwrap().status,
            RaidStatus::Expired
        );
        assert_eq!(controller.finalization_count(), 1);

        controller.attack(&attack(&id, "p3", 100)).unwrap();
        assert_eq!(controller.finalization_count(), 1);
    }

    #[test]
    fn test_scheduled_spawn_not_active_yet() {
        let (controller, clock) = controller();
        let id = controller
            .spawn(&SpawnRequest {
                boss_definition_id: "frost_wyrm".to_string(),
                starts_at: Some(start() + chrono::TimeDelta::minutes(5)),
            })
            .unwrap()
            .instance_id;

        let resp = controller.attack(&attack(&id, "p1", 10)).unwrap();
        assert_eq!(resp.reason, Some(RejectReason::NotActive));
        assert_eq!(resp.attempts_remaining, 2);

        clock.advance(Duration::from_secs(301));
        assert!(controller.attack(&attack(&id, "p1", 10)).unwrap().accepted);
    }

    #[test]
    fn test_sweep_expires_and_archives() {
        let (controller, clock) = controller();
        let controller = controller.with_settings(RaidSettings {
            archive_after: Duration::from_secs(60),
            ..RaidSettings::default()
        });
        let id = controller
            .spawn(&SpawnRequest::now("frost_wyrm"))
            .unwrap()
            .instance_id;

        assert_eq!(controller.sweep_expired(clock.now()), SweepReport::default());

        clock.advance(Duration::from_secs(3601));
        let report = controller.sweep_expired(clock.now());
        assert_eq!(report.expired, 1);
        assert_eq!(report.archived, 0);

        clock.advance(Duration::from_secs(61));
        let report = controller.sweep_expired(clock.now());
        assert_eq!(report.archived, 1);
        assert!(matches!(
            controller.get_snapshot(&id),
            Err(RaidError::InstanceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_archive_releases_delivery_marker() {
        let worker = Arc::new(DeliveryWorker::new(
            Arc::new(crate::raid::delivery::LoggingSink),
            crate::config::DeliverySettings::default(),
        ));
        let (controller, _) = controller();
        let controller = controller.with_delivery_worker(Arc::clone(&worker));
        let id = controller
            .spawn(&SpawnRequest::now("frost_wyrm"))
            .unwrap()
            .instance_id;
        assert!(controller.attack(&attack(&id, "p1", 1000)).unwrap().boss_defeated);

        worker.deliver(controller.get_finalization(&id).unwrap()).await.unwrap();
        assert!(worker.is_delivered(&id));

        controller.archive(&id).unwrap();
        assert!(!worker.is_delivered(&id));
    }

    #[test]
    fn test_archive_active_refused() {
        let (controller, _) = controller();
        let id = controller
            .spawn(&SpawnRequest::now("frost_wyrm"))
            .unwrap()
            .instance_id;
        assert!(matches!(
            controller.archive(&id),
            Err(RaidError::RaidNotFinalized(_))
        ));
        assert!(matches!(
            controller.get_finalization(&id),
            Err(RaidError::RaidNotFinalized(_))
        ));
    }

    #[test]
    fn test_busy_declines_without_mutation() {
        let (controller, _) = controller();
        let controller = controller.with_settings(RaidSettings {
            max_pending_attacks: 1,
            ..RaidSettings::default()
        });
        let id = controller
            .spawn(&SpawnRequest::now("frost_wyrm"))
            .unwrap()
            .instance_id;
        let handle = controller.registry().handle(&id).unwrap();
        let _held = handle.admit(1).unwrap();

        let resp = controller.attack(&attack(&id, "p1", 10)).unwrap();
        assert_eq!(resp.reason, Some(RejectReason::Busy));
        assert_eq!(controller.get_snapshot(&id).unwrap().players.len(), 0);
    }

    #[test]
    fn test_queries() {
        let clock = Arc::new(ManualClock::new(start()));
        let controller = RaidController::new(
            Arc::new(LoadedCatalog::new([wyrm()])),
            Arc::new(TeamPowerSimulator),
            clock,
        );
        let id = controller
            .spawn(&SpawnRequest::now("frost_wyrm"))
            .unwrap()
            .instance_id;
        controller.attack(&attack(&id, "p1", 50)).unwrap();
        controller.attack(&attack(&id, "p2", 80)).unwrap();

        let board = controller.get_leaderboard(&id, 10).unwrap();
        assert_eq!(board[0].player_id.as_str(), "p2");
        assert_eq!(
            controller.get_player_rank(&id, &PlayerId::new("p1")).unwrap(),
            PlayerRank::Ranked {
                rank: 2,
                total_damage: 50
            }
        );
        assert_eq!(
            controller.get_player_rank(&id, &PlayerId::new("nobody")).unwrap(),
            PlayerRank::NotParticipating
        );
        let guilds = controller.get_guild_leaderboard(&id, 10).unwrap();
        assert_eq!(guilds[0].total_damage, 130);
        assert_eq!(controller.list().len(), 1);
    }
}
