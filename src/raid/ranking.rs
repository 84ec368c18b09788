//! Deterministic ranking of participants and guilds
//!
//! Ordering is by damage (descending), then by who reached that total
//! first (timestamp, then ledger sequence), then by id. The order is total,
//! so every participant holds a distinct rank.

use std::cmp::Ordering;
use std::sync::Arc;

use serde::Serialize;

use super::instance::{GuildId, PlayerId, RaidSnapshot};
use super::ledger::{GuildContribution, PlayerContribution};

// ============================================================================
// Guild display names
// ============================================================================

/// Resolves guild display names for leaderboards.
pub trait GuildDirectory: Send + Sync + std::fmt::Debug {
    /// Returns the display name of a guild. Defaults to the id.
    fn display_name(&self, id: &GuildId) -> String {
        id.to_string()
    }
}

/// Directory that displays guild ids as-is.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdGuildDirectory;

impl GuildDirectory for IdGuildDirectory {}

// ============================================================================
// Ranked entries
// ============================================================================

/// One leaderboard row for a participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankedPlayer {
    /// 1-based rank
    pub rank: u32,
    /// Participant id
    pub player_id: PlayerId,
    /// Display name
    pub display_name: String,
    /// Guild, if any
    pub guild_id: Option<GuildId>,
    /// Cumulative damage
    pub total_damage: u64,
    /// Largest single hit
    pub highest_hit: u64,
    /// Attacks resolved
    pub attack_count: u32,
}

/// One leaderboard row for a guild.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedGuild {
    /// 1-based rank
    pub rank: u32,
    /// Guild id
    pub guild_id: GuildId,
    /// Display name from the guild directory
    pub display_name: String,
    /// Total damage of all members
    pub total_damage: u64,
    /// Members who attacked
    pub participant_count: usize,
    /// Average damage per member
    pub average_damage: f64,
    /// Member with the highest total
    pub top_contributor: Option<PlayerId>,
}

/// A participant's standing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PlayerRank {
    /// The participant has attacked and holds this rank
    Ranked {
        /// 1-based rank
        rank: u32,
        /// Cumulative damage
        total_damage: u64,
    },
    /// The participant never attacked this instance
    NotParticipating,
}

// ============================================================================
// Ordering
// ============================================================================

/// Leaderboard order for participants. `Less` ranks higher.
#[must_use]
pub fn compare_players(a: &PlayerContribution, b: &PlayerContribution) -> Ordering {
    b.total_damage
        .cmp(&a.total_damage)
        .then_with(|| a.reached_total_at.cmp(&b.reached_total_at))
        .then_with(|| a.reached_total_seq.cmp(&b.reached_total_seq))
        .then_with(|| a.player_id.cmp(&b.player_id))
}

/// Leaderboard order for guilds. `Less` ranks higher.
#[must_use]
pub fn compare_guilds(a: &GuildContribution, b: &GuildContribution) -> Ordering {
    b.total_damage
        .cmp(&a.total_damage)
        .then_with(|| a.reached_total_at.cmp(&b.reached_total_at))
        .then_with(|| a.reached_total_seq.cmp(&b.reached_total_seq))
        .then_with(|| a.guild_id.cmp(&b.guild_id))
}

fn to_rank(position: usize) -> u32 {
    u32::try_from(position + 1).unwrap_or(u32::MAX)
}

// ============================================================================
// Ranking
// ============================================================================

/// Full participant ranking.
#[must_use]
pub fn rank_players(snapshot: &RaidSnapshot) -> Vec<RankedPlayer> {
    let mut sorted: Vec<&PlayerContribution> =
        snapshot.players.iter().map(Arc::as_ref).collect();
    sorted.sort_by(|a, b| compare_players(a, b));
    sorted
        .into_iter()
        .enumerate()
        .map(|(i, p)| RankedPlayer {
            rank: to_rank(i),
            player_id: p.player_id.clone(),
            display_name: p.display_name.clone(),
            guild_id: p.guild_id.clone(),
            total_damage: p.total_damage,
            highest_hit: p.highest_hit,
            attack_count: p.attack_count,
        })
        .collect()
}

/// Full guild ranking.
#[must_use]
pub fn rank_guilds(snapshot: &RaidSnapshot, directory: &dyn GuildDirectory) -> Vec<RankedGuild> {
    let mut sorted: Vec<&GuildContribution> =
        snapshot.guilds.iter().map(Arc::as_ref).collect();
    sorted.sort_by(|a, b| compare_guilds(a, b));
    sorted
        .into_iter()
        .enumerate()
        .map(|(i, g)| RankedGuild {
            rank: to_rank(i),
            guild_id: g.guild_id.clone(),
            display_name: directory.display_name(&g.guild_id),
            total_damage: g.total_damage,
            participant_count: g.participant_count,
            average_damage: g.average_damage,
            top_contributor: g.top_contributor.clone(),
        })
        .collect()
}

/// Top `top_n` participants.
#[must_use]
pub fn leaderboard(snapshot: &RaidSnapshot, top_n: usize) -> Vec<RankedPlayer> {
    let mut ranked = rank_players(snapshot);
    ranked.truncate(top_n);
    ranked
}

/// Top `top_n` guilds.
#[must_use]
pub fn guild_leaderboard(
    snapshot: &RaidSnapshot,
    top_n: usize,
    directory: &dyn GuildDirectory,
) -> Vec<RankedGuild> {
    let mut ranked = rank_guilds(snapshot, directory);
    ranked.truncate(top_n);
    ranked
}

/// Rank of one participant, computed in a single pass without sorting.
#[must_use]
pub fn player_rank(snapshot: &RaidSnapshot, id: &PlayerId) -> PlayerRank {
    let Some(target) = snapshot.player(id) else {
        return PlayerRank::NotParticipating;
    };
    let ahead = snapshot
        .players
        .iter()
        .filter(|p| compare_players(p, target) == Ordering::Less)
        .count();
    PlayerRank::Ranked {
        rank: to_rank(ahead),
        total_damage: target.total_damage,
    }
}

/// Rank of one guild, computed in a single pass without sorting.
#[must_use]
pub fn guild_rank(snapshot: &RaidSnapshot, id: &GuildId) -> Option<u32> {
    let target = snapshot.guilds.iter().find(|g| &g.guild_id == id)?;
    let ahead = snapshot
        .guilds
        .iter()
        .filter(|g| compare_guilds(g, target) == Ordering::Less)
        .count();
    Some(to_rank(ahead))
}
