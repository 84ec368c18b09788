//! Finalization records
//!
//! A [`FinalizationRecord`] is the immutable result of closing an instance:
//! final standings and the reward bundles owed. It is built once per
//! instance and is what the delivery worker hands to the reward sink.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::instance::{InstanceId, PhaseTransitionLogEntry, RaidSnapshot, RaidStatus};
use super::ranking::{GuildDirectory, RankedGuild, RankedPlayer, rank_guilds, rank_players};
use super::reward::{MilestoneHistory, RewardSet, calculate};

/// Final result of one raid instance.
#[derive(Debug, Clone, Serialize)]
pub struct FinalizationRecord {
    /// Instance id, also the delivery idempotency key
    pub instance_id: InstanceId,
    /// Boss definition id
    pub boss_id: String,
    /// `Defeated` or `Expired`
    pub outcome: RaidStatus,
    /// When finalization ran
    pub finalized_at: DateTime<Utc>,
    /// Defeat time, if defeated
    pub defeated_at: Option<DateTime<Utc>>,
    /// Boss HP at the end
    pub final_hp: u64,
    /// Phase the boss ended in
    pub final_phase: u32,
    /// Sum of credited damage
    pub total_damage: u64,
    /// Final participant standings
    pub leaderboard: Vec<RankedPlayer>,
    /// Final guild standings
    pub guild_leaderboard: Vec<RankedGuild>,
    /// Rewards owed
    pub rewards: RewardSet,
    /// Phase transitions over the encounter
    pub transitions: Vec<PhaseTransitionLogEntry>,
}

impl FinalizationRecord {
    /// Builds the record from the instance's terminal snapshot.
    #[must_use]
    pub fn build(
        snapshot: &RaidSnapshot,
        rewards_policy: &crate::config::schema::RewardPolicy,
        history: &dyn MilestoneHistory,
        directory: &dyn GuildDirectory,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            instance_id: snapshot.instance_id.clone(),
            boss_id: snapshot.boss_id.clone(),
            outcome: snapshot.status,
            finalized_at: now,
            defeated_at: snapshot.defeated_at,
            final_hp: snapshot.current_hp,
            final_phase: snapshot.current_phase,
            total_damage: snapshot.total_damage,
            leaderboard: rank_players(snapshot),
            guild_leaderboard: rank_guilds(snapshot, directory),
            rewards: calculate(snapshot, rewards_policy, history),
            transitions: snapshot.transitions.clone(),
        }
    }

    /// Number of participants rewarded.
    #[must_use]
    pub fn participant_count(&self) -> usize {
        self.rewards.players.len()
    }
}
