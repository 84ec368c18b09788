//! Raid instance state
//!
//! [`RaidInstance`] is the mutable state of one encounter. It is only ever
//! touched inside the per-instance critical section owned by
//! [`RaidHandle`](super::registry::RaidHandle). Readers see immutable
//! [`RaidSnapshot`] copies published at the end of each mutation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::schema::{BossDefinition, PhaseSpec, TransitionEffect};

use super::clock::add_duration;
use super::ledger::{ContributionLedger, GuildContribution, PlayerContribution};

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Creates an id from a string.
            #[must_use]
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Returns the id as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.pad(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// Identifier of one raid instance.
    InstanceId
);
string_id!(
    /// Identifier of a participant.
    PlayerId
);
string_id!(
    /// Identifier of a guild.
    GuildId
);

impl InstanceId {
    /// Generates a fresh random instance id.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

// ============================================================================
// Status
// ============================================================================

/// Lifecycle state of a raid instance. `Defeated` and `Expired` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RaidStatus {
    /// Accepting attacks
    Active,
    /// Boss HP reached zero
    Defeated,
    /// Encounter window closed before the boss was defeated
    Expired,
}

impl RaidStatus {
    /// Returns `true` for `Defeated` and `Expired`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Active)
    }

    /// Short label for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Defeated => "defeated",
            Self::Expired => "expired",
        }
    }
}

impl std::fmt::Display for RaidStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

// ============================================================================
// Phase log
// ============================================================================

/// Record of one phase transition, in the order they happened.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseTransitionLogEntry {
    /// Phase the instance was in
    pub from_phase: u32,
    /// Phase entered
    pub phase: u32,
    /// When the transition happened
    pub at: DateTime<Utc>,
    /// Boss HP when the threshold was crossed
    pub hp_at_transition: u64,
    /// Boss HP after the side effect was applied
    pub hp_after_effect: u64,
    /// Side effect applied
    pub effect: TransitionEffect,
    /// Ledger sequence number of the contribution that crossed the threshold
    pub triggered_by_sequence: u64,
    /// Participant whose attack crossed the threshold
    pub triggered_by: PlayerId,
    /// Number of participants at that moment
    pub participant_count: usize,
}

// ============================================================================
// Damage application
// ============================================================================

/// How an incoming damage value was absorbed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DamageApplication {
    /// Damage reported by the combat collaborator
    pub requested: u64,
    /// Portion absorbed by the boss shield
    pub absorbed: u64,
    /// Portion removed from HP
    pub hp_loss: u64,
}

impl DamageApplication {
    /// Damage credited to the attacker: shield absorption plus HP loss.
    #[must_use]
    pub const fn applied(&self) -> u64 {
        self.absorbed + self.hp_loss
    }
}

// ============================================================================
// Raid Instance
// ============================================================================

/// Mutable state of one raid encounter.
#[derive(Debug)]
pub struct RaidInstance {
    id: InstanceId,
    boss: Arc<BossDefinition>,
    spawned_at: DateTime<Utc>,
    opens_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    current_hp: u64,
    current_phase: u32,
    status: RaidStatus,
    defeated_at: Option<DateTime<Utc>>,
    expired_at: Option<DateTime<Utc>>,
    shield: u64,
    debuff_stacks: u32,
    transitions: Vec<PhaseTransitionLogEntry>,
    ledger: ContributionLedger,
    version: u64,
}

impl RaidInstance {
    /// Creates a fresh instance at full HP in the boss's first phase.
    ///
    /// The encounter window runs from `opens_at` for the boss's duration.
    #[must_use]
    pub fn new(
        id: InstanceId,
        boss: Arc<BossDefinition>,
        spawned_at: DateTime<Utc>,
        opens_at: DateTime<Utc>,
    ) -> Self {
        let ends_at = add_duration(opens_at, boss.duration);
        Self {
            id,
            current_hp: boss.max_hp,
            current_phase: boss.first_phase(),
            boss,
            spawned_at,
            opens_at,
            ends_at,
            status: RaidStatus::Active,
            defeated_at: None,
            expired_at: None,
            shield: 0,
            debuff_stacks: 0,
            transitions: Vec::new(),
            ledger: ContributionLedger::default(),
            version: 0,
        }
    }

    /// Instance id.
    #[must_use]
    pub const fn id(&self) -> &InstanceId {
        &self.id
    }

    /// Boss definition the instance was spawned from.
    #[must_use]
    pub const fn boss(&self) -> &Arc<BossDefinition> {
        &self.boss
    }

    /// Current HP, always within `[0, max_hp]`.
    #[must_use]
    pub const fn current_hp(&self) -> u64 {
        self.current_hp
    }

    /// Current phase number.
    #[must_use]
    pub const fn current_phase(&self) -> u32 {
        self.current_phase
    }

    /// Spec of the current phase.
    #[must_use]
    pub fn current_phase_spec(&self) -> Option<&PhaseSpec> {
        self.boss.phase(self.current_phase)
    }

    /// Lifecycle status.
    #[must_use]
    pub const fn status(&self) -> RaidStatus {
        self.status
    }

    /// When the instance was created.
    #[must_use]
    pub const fn spawned_at(&self) -> DateTime<Utc> {
        self.spawned_at
    }

    /// When attacks start being accepted.
    #[must_use]
    pub const fn opens_at(&self) -> DateTime<Utc> {
        self.opens_at
    }

    /// When the encounter window closes.
    #[must_use]
    pub const fn ends_at(&self) -> DateTime<Utc> {
        self.ends_at
    }

    /// When the boss was defeated, if it was.
    #[must_use]
    pub const fn defeated_at(&self) -> Option<DateTime<Utc>> {
        self.defeated_at
    }

    /// When the instance expired, if it did.
    #[must_use]
    pub const fn expired_at(&self) -> Option<DateTime<Utc>> {
        self.expired_at
    }

    /// Current shield points.
    #[must_use]
    pub const fn shield(&self) -> u64 {
        self.shield
    }

    /// Active debuff stacks applied by participants.
    #[must_use]
    pub const fn debuff_stacks(&self) -> u32 {
        self.debuff_stacks
    }

    /// Phase transitions so far.
    #[must_use]
    pub fn transitions(&self) -> &[PhaseTransitionLogEntry] {
        &self.transitions
    }

    /// Contribution ledger.
    #[must_use]
    pub const fn ledger(&self) -> &ContributionLedger {
        &self.ledger
    }

    /// Mutable contribution ledger.
    pub const fn ledger_mut(&mut self) -> &mut ContributionLedger {
        &mut self.ledger
    }

    /// Number of mutations applied so far.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Current HP as a fraction of max HP.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hp_ratio(&self) -> f64 {
        if self.boss.max_hp == 0 {
            return 0.0;
        }
        self.current_hp as f64 / self.boss.max_hp as f64
    }

    /// Returns `true` when `now` is before the encounter window opens.
    #[must_use]
    pub fn is_before_open(&self, now: DateTime<Utc>) -> bool {
        now < self.opens_at
    }

    /// Returns `true` when `now` is past the end of the encounter window.
    #[must_use]
    pub fn is_past_end(&self, now: DateTime<Utc>) -> bool {
        now > self.ends_at
    }

    /// Applies incoming damage, shield first when the boss absorbs with shields.
    ///
    /// HP is clamped at zero regardless of the incoming value. Terminal
    /// instances ignore damage entirely.
    pub fn apply_damage(&mut self, amount: u64) -> DamageApplication {
        if self.status.is_terminal() {
            return DamageApplication {
                requested: amount,
                ..DamageApplication::default()
            };
        }

        let absorbed = if self.boss.shield_absorbs_damage {
            let absorbed = amount.min(self.shield);
            self.shield -= absorbed;
            absorbed
        } else {
            0
        };

        let hp_loss = (amount - absorbed).min(self.current_hp);
        self.current_hp -= hp_loss;
        self.bump();

        DamageApplication {
            requested: amount,
            absorbed,
            hp_loss,
        }
    }

    /// Restores HP, clamped to `max_hp`. Returns the HP actually restored.
    pub fn heal(&mut self, amount: u64) -> u64 {
        if self.status.is_terminal() {
            return 0;
        }
        let healed = amount.min(self.boss.max_hp - self.current_hp);
        self.current_hp += healed;
        self.bump();
        healed
    }

    /// Adds shield points.
    pub fn grant_shield(&mut self, amount: u64) {
        self.shield = self.shield.saturating_add(amount);
        self.bump();
    }

    /// Adds debuff stacks, capped at `max`.
    pub fn add_debuffs(&mut self, stacks: u32, max: u32) {
        if stacks == 0 {
            return;
        }
        self.debuff_stacks = self.debuff_stacks.saturating_add(stacks).min(max);
        self.bump();
    }

    /// Removes every debuff stack.
    pub fn clear_debuffs(&mut self) {
        self.debuff_stacks = 0;
        self.bump();
    }

    /// Moves the instance into `phase`. Phases never go backwards.
    ///
    /// Returns `false` (and changes nothing) if `phase` is not ahead of the
    /// current one.
    pub fn enter_phase(&mut self, phase: u32) -> bool {
        if phase <= self.current_phase {
            return false;
        }
        self.current_phase = phase;
        self.bump();
        true
    }

    /// Appends a phase transition record.
    pub fn log_transition(&mut self, entry: PhaseTransitionLogEntry) {
        self.transitions.push(entry);
    }

    /// Flips `Active` to `Defeated` if HP is zero.
    ///
    /// Returns `true` only for the call that performed the flip.
    pub fn mark_defeated(&mut self, now: DateTime<Utc>) -> bool {
        if self.status != RaidStatus::Active || self.current_hp != 0 {
            return false;
        }
        self.status = RaidStatus::Defeated;
        self.defeated_at = Some(now);
        self.bump();
        true
    }

    /// Flips `Active` to `Expired`.
    ///
    /// Returns `true` only for the call that performed the flip.
    pub fn mark_expired(&mut self, now: DateTime<Utc>) -> bool {
        if self.status != RaidStatus::Active {
            return false;
        }
        self.status = RaidStatus::Expired;
        self.expired_at = Some(now);
        self.bump();
        true
    }

    /// Takes an immutable copy of the current state.
    #[must_use]
    pub fn snapshot(&self) -> RaidSnapshot {
        RaidSnapshot {
            instance_id: self.id.clone(),
            boss_id: self.boss.id.clone(),
            boss_name: self.boss.display_name().to_string(),
            max_hp: self.boss.max_hp,
            current_hp: self.current_hp,
            current_phase: self.current_phase,
            phase_count: self.boss.phases.len(),
            status: self.status,
            attempt_limit: self.boss.attempt_limit,
            spawned_at: self.spawned_at,
            opens_at: self.opens_at,
            ends_at: self.ends_at,
            defeated_at: self.defeated_at,
            expired_at: self.expired_at,
            shield: self.shield,
            debuff_stacks: self.debuff_stacks,
            total_damage: self.ledger.total_damage(),
            players: self.ledger.shared_players().cloned().collect(),
            guilds: self.ledger.shared_guilds().cloned().collect(),
            transitions: self.transitions.clone(),
            version: self.version,
        }
    }

    fn bump(&mut self) {
        self.version += 1;
    }
}

// ============================================================================
// Snapshot
// ============================================================================

/// Immutable copy of a raid instance, safe to share with readers.
#[derive(Debug, Clone, Serialize)]
pub struct RaidSnapshot {
    /// Instance id
    pub instance_id: InstanceId,
    /// Boss definition id
    pub boss_id: String,
    /// Boss display name
    pub boss_name: String,
    /// Maximum HP
    pub max_hp: u64,
    /// Current HP
    pub current_hp: u64,
    /// Current phase number
    pub current_phase: u32,
    /// Number of phases in the boss's table
    pub phase_count: usize,
    /// Lifecycle status
    pub status: RaidStatus,
    /// Per-participant attempt limit
    pub attempt_limit: u32,
    /// Creation time
    pub spawned_at: DateTime<Utc>,
    /// Window open time
    pub opens_at: DateTime<Utc>,
    /// Window close time
    pub ends_at: DateTime<Utc>,
    /// Defeat time
    pub defeated_at: Option<DateTime<Utc>>,
    /// Expiry time
    pub expired_at: Option<DateTime<Utc>>,
    /// Shield points
    pub shield: u64,
    /// Debuff stacks
    pub debuff_stacks: u32,
    /// Sum of all credited damage
    pub total_damage: u64,
    /// Player contributions, in join order
    pub players: Vec<Arc<PlayerContribution>>,
    /// Guild aggregates, in first-seen order
    pub guilds: Vec<Arc<GuildContribution>>,
    /// Phase transition log
    pub transitions: Vec<PhaseTransitionLogEntry>,
    /// Mutation counter at the time of the snapshot
    pub version: u64,
}

impl RaidSnapshot {
    /// Current HP as a fraction of max HP.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hp_ratio(&self) -> f64 {
        if self.max_hp == 0 {
            return 0.0;
        }
        self.current_hp as f64 / self.max_hp as f64
    }

    /// Looks up one participant.
    #[must_use]
    pub fn player(&self, id: &PlayerId) -> Option<&PlayerContribution> {
        self.players
            .iter()
            .find(|p| &p.player_id == id)
            .map(Arc::as_ref)
    }

    /// Summarizes the instance for status queries.
    #[must_use]
    pub fn status_report(&self) -> InstanceStatus {
        InstanceStatus {
            instance_id: self.instance_id.clone(),
            boss_id: self.boss_id.clone(),
            hp_ratio: self.hp_ratio(),
            current_hp: self.current_hp,
            max_hp: self.max_hp,
            phase: self.current_phase,
            status: self.status,
            ends_at: self.ends_at,
            participants: self.players.len(),
        }
    }
}

/// Answer to a status query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceStatus {
    /// Instance id
    pub instance_id: InstanceId,
    /// Boss definition id
    pub boss_id: String,
    /// Current HP over max HP
    pub hp_ratio: f64,
    /// Current HP
    pub current_hp: u64,
    /// Maximum HP
    pub max_hp: u64,
    /// Current phase number
    pub phase: u32,
    /// Lifecycle status
    pub status: RaidStatus,
    /// Window close time
    pub ends_at: DateTime<Utc>,
    /// Number of participants
    pub participants: usize,
}

// ============================================================================
// Tests
// ============================================================================
