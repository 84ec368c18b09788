//! Contribution ledger
//!
//! Per-instance record of who attacked, how often, and for how much.
//! Player and guild totals are maintained together so that the sum of
//! player damage, the sum of guild damage and the instance total always
//! agree.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;

use crate::error::RaidError;

use super::instance::{GuildId, PlayerId};

/// One participant's running totals in a raid instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerContribution {
    /// Participant id
    pub player_id: PlayerId,
    /// Latest display name supplied with an attack
    pub display_name: String,
    /// Guild the participant attacked for, fixed by the first attack
    pub guild_id: Option<GuildId>,
    /// Cumulative damage credited
    pub total_damage: u64,
    /// Damage credited since the last phase transition
    pub phase_damage: u64,
    /// Damage credited per boss phase
    pub damage_by_phase: BTreeMap<u32, u64>,
    /// Attacks resolved against the boss
    pub attack_count: u32,
    /// Attempts consumed against the limit
    pub attempts_used: u32,
    /// Largest single hit credited
    pub highest_hit: u64,
    /// Heroes lost across all attacks
    pub participant_deaths: u32,
    /// First accepted attack
    pub first_attack_at: DateTime<Utc>,
    /// Most recent recorded attack
    pub last_attack_at: DateTime<Utc>,
    /// When the current damage total was reached
    pub reached_total_at: Option<DateTime<Utc>>,
    /// Ledger sequence at which the current total was reached
    pub reached_total_seq: u64,
}

/// A guild's aggregate over its members in one instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GuildContribution {
    /// Guild id
    pub guild_id: GuildId,
    /// Sum of member damage
    pub total_damage: u64,
    /// Members who attacked
    pub participant_count: usize,
    /// `total_damage / participant_count`
    pub average_damage: f64,
    /// Member with the highest total
    pub top_contributor: Option<PlayerId>,
    /// Damage of the top contributor
    pub top_contribution: u64,
    /// When the current total was reached
    pub reached_total_at: Option<DateTime<Utc>>,
    /// Ledger sequence at which the current total was reached
    pub reached_total_seq: u64,
}

impl GuildContribution {
    fn new(guild_id: GuildId) -> Self {
        Self {
            guild_id,
            total_damage: 0,
            participant_count: 0,
            average_damage: 0.0,
            top_contributor: None,
            top_contribution: 0,
            reached_total_at: None,
            reached_total_seq: 0,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn refresh_average(&mut self) {
        self.average_damage = if self.participant_count == 0 {
            0.0
        } else {
            self.total_damage as f64 / self.participant_count as f64
        };
    }
}

/// Identity of an attacker as supplied with the attack request.
#[derive(Debug, Clone, Copy)]
pub struct Attacker<'a> {
    /// Participant id
    pub player_id: &'a PlayerId,
    /// Display name
    pub display_name: &'a str,
    /// Guild, if the participant belongs to one
    pub guild_id: Option<&'a GuildId>,
}

/// The outcome of one resolved attack, as fed to the ledger.
#[derive(Debug, Clone)]
pub struct ContributionEntry {
    /// Attacker
    pub player_id: PlayerId,
    /// Damage credited (already clamped by the instance)
    pub damage: u64,
    /// Largest single hit reported by the combat collaborator
    pub highest_hit: u64,
    /// Phase the boss was in when the damage landed
    pub phase: u32,
    /// Heroes lost during the attack
    pub participant_deaths: u32,
}

/// Player and guild contribution tables for one instance.
///
/// Entries are shared with published snapshots and copied on write, so a
/// write only copies the entries it touches.
#[derive(Debug, Default, Clone)]
pub struct ContributionLedger {
    players: IndexMap<PlayerId, Arc<PlayerContribution>>,
    guilds: IndexMap<GuildId, Arc<GuildContribution>>,
    total_damage: u64,
    sequence: u64,
}

impl ContributionLedger {
    /// Consumes one attempt, registering the participant on first use.
    ///
    /// Returns the attempts remaining after this one. The guild is fixed by
    /// the first attempt; later attempts naming a different guild are
    /// credited to the original one.
    ///
    /// # Errors
    ///
    /// Returns [`RaidError::AttemptLimitExceeded`] if the participant has
    /// already used `limit` attempts. Nothing is changed in that case.
    pub fn record_attempt(
        &mut self,
        attacker: Attacker<'_>,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<u32, RaidError> {
        let player_id = attacker.player_id;

        if let Some(entry) = self.players.get_mut(player_id) {
            if entry.attempts_used >= limit {
                return Err(RaidError::AttemptLimitExceeded {
                    player_id: player_id.to_string(),
                    limit,
                });
            }
            if entry.guild_id.as_ref() != attacker.guild_id {
                tracing::warn!(
                    player = %player_id,
                    registered_guild = ?entry.guild_id,
                    requested_guild = ?attacker.guild_id,
                    "attack names a different guild; crediting the original guild"
                );
            }
            let player = Arc::make_mut(entry);
            player.attempts_used += 1;
            attacker.display_name.clone_into(&mut player.display_name);
            return Ok(limit - player.attempts_used);
        }

        if limit == 0 {
            return Err(RaidError::AttemptLimitExceeded {
                player_id: player_id.to_string(),
                limit,
            });
        }

        self.players.insert(
            player_id.clone(),
            Arc::new(PlayerContribution {
                player_id: player_id.clone(),
                display_name: attacker.display_name.to_string(),
                guild_id: attacker.guild_id.cloned(),
                total_damage: 0,
                phase_damage: 0,
                damage_by_phase: BTreeMap::new(),
                attack_count: 0,
                attempts_used: 1,
                highest_hit: 0,
                participant_deaths: 0,
                first_attack_at: now,
                last_attack_at: now,
                reached_total_at: None,
                reached_total_seq: 0,
            }),
        );

        if let Some(guild_id) = attacker.guild_id {
            let guild = Arc::make_mut(
                self.guilds
                    .entry(guild_id.clone())
                    .or_insert_with(|| Arc::new(GuildContribution::new(guild_id.clone()))),
            );
            guild.participant_count += 1;
            guild.refresh_average();
        }

        Ok(limit - 1)
    }

    /// Credits the outcome of an attack and returns its ledger sequence number.
    ///
    /// The participant must have been registered by [`record_attempt`](Self::record_attempt);
    /// an unknown participant is ignored and `None` is returned.
    pub fn record_damage(&mut self, entry: &ContributionEntry, now: DateTime<Utc>) -> Option<u64> {
        let player = Arc::make_mut(self.players.get_mut(&entry.player_id)?);

        self.sequence += 1;
        let seq = self.sequence;

        player.total_damage = player.total_damage.saturating_add(entry.damage);
        player.phase_damage = player.phase_damage.saturating_add(entry.damage);
        *player.damage_by_phase.entry(entry.phase).or_default() += entry.damage;
        player.highest_hit = player.highest_hit.max(entry.highest_hit.min(entry.damage));
        player.attack_count += 1;
        player.participant_deaths = player
            .participant_deaths
            .saturating_add(entry.participant_deaths);
        player.last_attack_at = now;
        if entry.damage > 0 {
            player.reached_total_at = Some(now);
            player.reached_total_seq = seq;
        }

        let player_total = player.total_damage;
        if let Some(guild) = player
            .guild_id
            .as_ref()
            .and_then(|id| self.guilds.get_mut(id))
            .map(Arc::make_mut)
        {
            guild.total_damage = guild.total_damage.saturating_add(entry.damage);
            if entry.damage > 0 {
                guild.reached_total_at = Some(now);
                guild.reached_total_seq = seq;
            }
            // Strict comparison keeps the member who got there first.
            if player_total > guild.top_contribution {
                guild.top_contribution = player_total;
                guild.top_contributor = Some(entry.player_id.clone());
            }
            guild.refresh_average();
        }

        self.total_damage = self.total_damage.saturating_add(entry.damage);
        Some(seq)
    }

    /// Zeroes every participant's damage-since-transition counter.
    pub fn reset_phase_damage(&mut self) {
        for player in self.players.values_mut() {
            if player.phase_damage != 0 {
                Arc::make_mut(player).phase_damage = 0;
            }
        }
    }

    /// Looks up one participant.
    #[must_use]
    pub fn player(&self, id: &PlayerId) -> Option<&PlayerContribution> {
        self.players.get(id).map(Arc::as_ref)
    }

    /// Looks up one guild.
    #[must_use]
    pub fn guild(&self, id: &GuildId) -> Option<&GuildContribution> {
        self.guilds.get(id).map(Arc::as_ref)
    }

    /// Participants in join order.
    pub fn players(&self) -> impl Iterator<Item = &PlayerContribution> {
        self.players.values().map(Arc::as_ref)
    }

    /// Guilds in first-seen order.
    pub fn guilds(&self) -> impl Iterator<Item = &GuildContribution> {
        self.guilds.values().map(Arc::as_ref)
    }

    /// Shared handles to the participant entries, for snapshots.
    pub fn shared_players(&self) -> impl Iterator<Item = &Arc<PlayerContribution>> {
        self.players.values()
    }

    /// Shared handles to the guild entries, for snapshots.
    pub fn shared_guilds(&self) -> impl Iterator<Item = &Arc<GuildContribution>> {
        self.guilds.values()
    }

    /// Number of participants.
    #[must_use]
    pub fn participant_count(&self) -> usize {
        self.players.len()
    }

    /// Sum of all credited damage.
    #[must_use]
    pub const fn total_damage(&self) -> u64 {
        self.total_damage
    }

    /// Sequence number of the most recent contribution.
    #[must_use]
    pub const fn last_sequence(&self) -> u64 {
        self.sequence
    }
}
