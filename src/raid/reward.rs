//! Reward calculation
//!
//! Turns a final snapshot and the boss's [`RewardPolicy`] into per-player
//! and per-guild bundles. Calculation is pure: the only outside input is a
//! read of the [`MilestoneHistory`]. One-time milestones are then claimed
//! with [`RewardSet::claim_first_time`], which drops any grant another
//! instance claimed first.

use std::time::Duration;

use dashmap::DashSet;
use indexmap::IndexMap;
use serde::Serialize;

use crate::config::schema::{DamageMilestone, RewardItem, RewardPolicy};

use super::instance::{GuildId, PlayerId, RaidSnapshot, RaidStatus};
use super::ranking::{IdGuildDirectory, RankedPlayer, rank_guilds, rank_players};

// ============================================================================
// Milestone history
// ============================================================================

/// Record of one-time milestones already granted, across all instances.
pub trait MilestoneHistory: Send + Sync + std::fmt::Debug {
    /// Returns `true` if `player` already received `milestone_id` for `boss_id`.
    fn has_granted(&self, player: &PlayerId, boss_id: &str, milestone_id: &str) -> bool;

    /// Claims `milestone_id` for `boss_id` on behalf of `player`.
    ///
    /// Returns `false` if it was already granted. Check and record happen
    /// as one atomic step, so concurrent finalizations of different
    /// instances cannot both win the same grant.
    fn try_grant(&self, player: &PlayerId, boss_id: &str, milestone_id: &str) -> bool;
}

/// Process-local milestone history.
#[derive(Debug, Default)]
pub struct InMemoryMilestoneHistory {
    granted: DashSet<(PlayerId, String, String)>,
}

impl InMemoryMilestoneHistory {
    /// Creates an empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded grants.
    #[must_use]
    pub fn len(&self) -> usize {
        self.granted.len()
    }

    /// Returns `true` when nothing has been granted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.granted.is_empty()
    }
}

impl MilestoneHistory for InMemoryMilestoneHistory {
    fn has_granted(&self, player: &PlayerId, boss_id: &str, milestone_id: &str) -> bool {
        self.granted.contains(&(
            player.clone(),
            boss_id.to_string(),
            milestone_id.to_string(),
        ))
    }

    fn try_grant(&self, player: &PlayerId, boss_id: &str, milestone_id: &str) -> bool {
        self.granted.insert((
            player.clone(),
            boss_id.to_string(),
            milestone_id.to_string(),
        ))
    }
}

// ============================================================================
// Bundles
// ============================================================================

/// Rewards owed to one participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlayerRewardBundle {
    /// Participant id
    pub player_id: PlayerId,
    /// Display name
    pub display_name: String,
    /// Guild, if any
    pub guild_id: Option<GuildId>,
    /// Final rank
    pub rank: u32,
    /// Final cumulative damage
    pub total_damage: u64,
    /// Merged items, in the order they were first granted
    pub items: Vec<RewardItem>,
    /// Every milestone granted in this bundle
    pub milestones: Vec<String>,
    /// One-time milestones granted for the first time
    pub first_time_milestones: Vec<String>,
    /// Whether the top-rank exclusive was granted
    pub exclusive: bool,
}

impl PlayerRewardBundle {
    /// Takes back a milestone and the items it granted.
    fn withdraw_milestone(&mut self, milestone: &DamageMilestone) {
        self.milestones.retain(|id| id != &milestone.id);
        self.first_time_milestones.retain(|id| id != &milestone.id);
        for reward in &milestone.rewards {
            if let Some(item) = self.items.iter_mut().find(|i| i.item == reward.item) {
                item.quantity = item.quantity.saturating_sub(reward.quantity);
            }
        }
        self.items.retain(|i| i.quantity > 0);
    }
}

/// Rewards owed to one guild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GuildRewardBundle {
    /// Guild id
    pub guild_id: GuildId,
    /// Final guild rank
    pub rank: u32,
    /// Final guild damage
    pub total_damage: u64,
    /// Items granted
    pub items: Vec<RewardItem>,
}

/// All bundles for one finalized instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RewardSet {
    /// Per-participant bundles, in rank order
    pub players: Vec<PlayerRewardBundle>,
    /// Per-guild bundles, in rank order
    pub guilds: Vec<GuildRewardBundle>,
}

impl RewardSet {
    /// Claims every first-time milestone in the set against `history`.
    ///
    /// Grants that lose the claim are withdrawn from their bundle, items
    /// included. Returns the withdrawn `(player, milestone)` pairs.
    pub fn claim_first_time(
        &mut self,
        boss_id: &str,
        policy: &RewardPolicy,
        history: &dyn MilestoneHistory,
    ) -> Vec<(PlayerId, String)> {
        let mut withdrawn = Vec::new();
        for bundle in &mut self.players {
            let lost: Vec<String> = bundle
                .first_time_milestones
                .iter()
                .filter(|id| !history.try_grant(&bundle.player_id, boss_id, id))
                .cloned()
                .collect();
            for id in lost {
                if let Some(milestone) = policy.milestones.iter().find(|m| m.id == id) {
                    bundle.withdraw_milestone(milestone);
                }
                withdrawn.push((bundle.player_id.clone(), id));
            }
        }
        withdrawn
    }
}

// ============================================================================
// Calculation
// ============================================================================

/// Merges items by id, keeping first-seen order.
#[derive(Debug, Default)]
struct ItemAccumulator(IndexMap<String, u64>);

impl ItemAccumulator {
    fn add(&mut self, item: &str, quantity: u64) {
        if quantity == 0 {
            return;
        }
        let slot = self.0.entry(item.to_string()).or_default();
        *slot = slot.saturating_add(quantity);
    }

    fn extend(&mut self, items: &[RewardItem]) {
        for i in items {
            self.add(&i.item, i.quantity);
        }
    }

    fn finish(self) -> Vec<RewardItem> {
        self.0
            .into_iter()
            .map(|(item, quantity)| RewardItem { item, quantity })
            .collect()
    }
}

/// Scales a base quantity by a tier multiplier.
///
/// Rounds half away from zero; a non-zero base never scales below 1.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn scale_quantity(base: u64, multiplier: f64) -> u64 {
    if base == 0 {
        return 0;
    }
    let scaled = (base as f64 * multiplier).round();
    if scaled >= u64::MAX as f64 {
        u64::MAX
    } else if scaled < 1.0 {
        1
    } else {
        scaled as u64
    }
}

/// Whether the instance was defeated, and how long after opening.
fn defeat_elapsed(snapshot: &RaidSnapshot) -> Option<Duration> {
    if snapshot.status != RaidStatus::Defeated {
        return None;
    }
    let at = snapshot.defeated_at?;
    Some((at - snapshot.opens_at).to_std().unwrap_or(Duration::ZERO))
}

fn player_bundle(
    row: &RankedPlayer,
    boss_id: &str,
    policy: &RewardPolicy,
    defeat: Option<Duration>,
    history: &dyn MilestoneHistory,
) -> PlayerRewardBundle {
    let mut items = ItemAccumulator::default();

    let tier = policy.ranking_tiers.iter().find(|t| t.contains(row.rank));
    let multiplier = tier.map_or(1.0, |t| t.multiplier);
    for base in &policy.base {
        items.add(&base.item, scale_quantity(base.quantity, multiplier));
    }
    if let Some(tier) = tier {
        items.extend(&tier.rewards);
    }

    let mut milestones = Vec::new();
    let mut first_time = Vec::new();
    for m in policy
        .milestones
        .iter()
        .filter(|m| m.threshold <= row.total_damage)
    {
        if m.one_time {
            if history.has_granted(&row.player_id, boss_id, &m.id) {
                continue;
            }
            first_time.push(m.id.clone());
        }
        milestones.push(m.id.clone());
        items.extend(&m.rewards);
    }

    let exclusive = policy.exclusive.as_ref().is_some_and(|ex| {
        if row.rank > ex.max_rank {
            return false;
        }
        match (ex.within, defeat) {
            (Some(limit), Some(elapsed)) => elapsed <= limit,
            (Some(_), None) => false,
            (None, _) => !ex.requires_defeat || defeat.is_some(),
        }
    });
    if exclusive {
        if let Some(ex) = &policy.exclusive {
            items.add(&ex.item.item, ex.item.quantity);
        }
    }

    PlayerRewardBundle {
        player_id: row.player_id.clone(),
        display_name: row.display_name.clone(),
        guild_id: row.guild_id.clone(),
        rank: row.rank,
        total_damage: row.total_damage,
        items: items.finish(),
        milestones,
        first_time_milestones: first_time,
        exclusive,
    }
}

/// Computes every reward bundle for a finalized snapshot.
#[must_use]
pub fn calculate(
    snapshot: &RaidSnapshot,
    policy: &RewardPolicy,
    history: &dyn MilestoneHistory,
) -> RewardSet {
    let defeat = defeat_elapsed(snapshot);

    let players = rank_players(snapshot)
        .iter()
        .map(|row| player_bundle(row, &snapshot.boss_id, policy, defeat, history))
        .collect();

    let guilds = rank_guilds(snapshot, &IdGuildDirectory)
        .into_iter()
        .map(|g| {
            let mut items = ItemAccumulator::default();
            if let Some(tier) = policy.guild_tiers.iter().find(|t| t.contains(g.rank)) {
                items.extend(&tier.rewards);
            }
            GuildRewardBundle {
                guild_id: g.guild_id,
                rank: g.rank,
                total_damage: g.total_damage,
                items: items.finish(),
            }
        })
        .collect();

    RewardSet { players, guilds }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{DateTime, TimeDelta, Utc};

    use super::*;
    use crate::config::schema::{
        BossDefinition, ExclusiveReward, GuildTier, PhaseSpec, RankingTier,
        StatModifiers, TransitionEffect,
    };
    use crate::raid::instance::{InstanceId, RaidInstance};
    use crate::raid::ledger::{Attacker, ContributionEntry};

    fn start() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn policy() -> RewardPolicy {
        RewardPolicy {
            base: vec![RewardItem::new("gold", 100), RewardItem::new("dust", 1)],
            ranking_tiers: vec![
                RankingTier {
                    min_rank: 1,
                    max_rank: 1,
                    multiplier: 2.5,
                    rewards: vec![RewardItem::new("crown", 1)],
                },
                RankingTier {
                    min_rank: 2,
                    max_rank: 3,
                    multiplier: 0.4,
                    rewards: vec![],
                },
            ],
            guild_tiers: vec![GuildTier {
                min_rank: 1,
                max_rank: 1,
                rewards: vec![RewardItem::new("banner", 1)],
            }],
            milestones: vec![
                DamageMilestone {
                    id: "m100".into(),
                    threshold: 100,
                    rewards: vec![RewardItem::new("gold", 10)],
                    one_time: false,
                },
                DamageMilestone {
                    id: "first_500".into(),
                    threshold: 500,
                    rewards: vec![RewardItem::new("title", 1)],
                    one_time: true,
                },
            ],
            exclusive: Some(ExclusiveReward {
                max_rank: 1,
                item: RewardItem::new("wyrm_mount", 1),
                requires_defeat: true,
                within: None,
            }),
        }
    }

    fn instance(policy: RewardPolicy) -> RaidInstance {
        let boss = Arc::new(BossDefinition {
            id: "wyrm".to_string(),
            name: None,
            max_hp: 1000,
            base_attack: 0,
            base_defense: 0,
            attempt_limit: 10,
            duration: std::time::Duration::from_secs(3600),
            shield_absorbs_damage: false,
            phases: vec![PhaseSpec {
                phase: 1,
                name: None,
                hp_threshold: 1.0,
                on_enter: TransitionEffect::None,
                modifiers: StatModifiers::default(),
                mechanics: vec![],
            }],
            rewards: policy,
        });
        RaidInstance::new(InstanceId::new("i"), boss, start(), start())
    }

    fn hit(inst: &mut RaidInstance, player: &str, guild: Option<&str>, damage: u64) {
        let player_id = PlayerId::new(player);
        let guild_id = guild.map(GuildId::new);
        inst.ledger_mut()
            .record_attempt(
                Attacker {
                    player_id: &player_id,
                    display_name: player,
                    guild_id: guild_id.as_ref(),
                },
                10,
                start(),
            )
            .unwrap();
        let applied = inst.apply_damage(damage);
        inst.ledger_mut().record_damage(
            &ContributionEntry {
                player_id,
                damage: applied.applied(),
                highest_hit: damage,
                phase: 1,
                participant_deaths: 0,
            },
            start(),
        );
    }

    fn qty(bundle: &PlayerRewardBundle, item: &str) -> u64 {
        bundle
            .items
            .iter()
            .find(|i| i.item == item)
            .map_or(0, |i| i.quantity)
    }

    #[test]
    fn test_scale_quantity_rounding() {
        assert_eq!(scale_quantity(100, 2.5), 250);
        assert_eq!(scale_quantity(5, 0.5), 3);
        assert_eq!(scale_quantity(1, 0.4), 1);
        assert_eq!(scale_quantity(0, 3.0), 0);
    }

    #[test]
    fn test_tiers_milestones_and_exclusive_on_defeat() {
        let mut inst = instance(policy());
        hit(&mut inst, "p1", Some("red"), 600);
        hit(&mut inst, "p2", Some("blue"), 150);
        hit(&mut inst, "p3", None, 250);
        assert!(inst.mark_defeated(start() + TimeDelta::minutes(10)));

        let history = InMemoryMilestoneHistory::new();
        let set = calculate(&inst.snapshot(), &policy(), &history);

        let top = &set.players[0];
        assert_eq!(top.player_id.as_str(), "p1");
        assert_eq!(qty(top, "gold"), 250 + 10);
        assert_eq!(qty(top, "dust"), 3);
        assert_eq!(qty(top, "crown"), 1);
        assert_eq!(qty(top, "title"), 1);
        assert_eq!(top.first_time_milestones, vec!["first_500".to_string()]);
        assert!(top.exclusive);
        assert_eq!(qty(top, "wyrm_mount"), 1);

        let second = &set.players[1];
        assert_eq!(second.player_id.as_str(), "p3");
        assert_eq!(qty(second, "gold"), 40 + 10);
        assert_eq!(qty(second, "dust"), 1);
        assert!(!second.exclusive);

        assert_eq!(set.guilds.len(), 2);
        assert_eq!(set.guilds[0].guild_id.as_str(), "red");
        assert_eq!(set.guilds[0].items, vec![RewardItem::new("banner", 1)]);
        assert!(set.guilds[1].items.is_empty());
    }

    #[test]
    fn test_expired_raid_withholds_exclusive() {
        let mut inst = instance(policy());
        hit(&mut inst, "p1", None, 600);
        assert!(inst.mark_expired(start() + TimeDelta::hours(2)));
        let set = calculate(&inst.snapshot(), &policy(), &InMemoryMilestoneHistory::new());
        assert!(!set.players[0].exclusive);
        assert_eq!(qty(&set.players[0], "crown"), 1);
        assert_eq!(qty(&set.players[0], "wyrm_mount"), 0);
    }

    #[test]
    fn test_exclusive_without_defeat_requirement() {
        let mut p = policy();
        if let Some(ex) = p.exclusive.as_mut() {
            ex.requires_defeat = false;
        }
        let mut inst = instance(p.clone());
        hit(&mut inst, "p1", None, 600);
        inst.mark_expired(start());
        let set = calculate(&inst.snapshot(), &p, &InMemoryMilestoneHistory::new());
        assert!(set.players[0].exclusive);
    }

    #[test]
    fn test_exclusive_time_window() {
        let mut p = policy();
        if let Some(ex) = p.exclusive.as_mut() {
            ex.within = Some(Duration::from_secs(300));
        }

        let mut fast = instance(p.clone());
        hit(&mut fast, "p1", None, 1000);
        fast.mark_defeated(start() + TimeDelta::minutes(4));
        let set = calculate(&fast.snapshot(), &p, &InMemoryMilestoneHistory::new());
        assert!(set.players[0].exclusive);

        let mut slow = instance(p.clone());
        hit(&mut slow, "p1", None, 1000);
        slow.mark_defeated(start() + TimeDelta::minutes(6));
        let set = calculate(&slow.snapshot(), &p, &InMemoryMilestoneHistory::new());
        assert!(!set.players[0].exclusive);
    }

    #[test]
    fn test_one_time_milestone_suppressed() {
        let mut inst = instance(policy());
        hit(&mut inst, "p1", None, 600);
        inst.mark_defeated(start());

        let history = InMemoryMilestoneHistory::new();
        assert!(history.try_grant(&PlayerId::new("p1"), "wyrm", "first_500"));

        let set = calculate(&inst.snapshot(), &policy(), &history);
        let bundle = &set.players[0];
        assert_eq!(qty(bundle, "title"), 0);
        assert!(bundle.first_time_milestones.is_empty());
        assert_eq!(bundle.milestones, vec!["m100".to_string()]);
    }

    #[test]
    fn test_second_claim_withdraws_grant_and_items() {
        let mut inst = instance(policy());
        hit(&mut inst, "p1", None, 600);
        inst.mark_defeated(start());
        let snapshot = inst.snapshot();
        let history = InMemoryMilestoneHistory::new();

        // Both computed before either claims, as two concurrent finalizations would.
        let mut first = calculate(&snapshot, &policy(), &history);
        let mut second = calculate(&snapshot, &policy(), &history);
        assert_eq!(second.players[0].first_time_milestones, vec!["first_500".to_string()]);

        assert!(first.claim_first_time("wyrm", &policy(), &history).is_empty());
        let withdrawn = second.claim_first_time("wyrm", &policy(), &history);
        assert_eq!(withdrawn, vec![(PlayerId::new("p1"), "first_500".to_string())]);

        let kept = &first.players[0];
        assert_eq!(qty(kept, "title"), 1);
        let lost = &second.players[0];
        assert_eq!(qty(lost, "title"), 0);
        assert!(lost.first_time_milestones.is_empty());
        assert_eq!(lost.milestones, vec!["m100".to_string()]);
        assert_eq!(qty(lost, "gold"), qty(kept, "gold"));
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_untiered_rank_gets_base_only() {
        let mut inst = instance(policy());
        for (i, dmg) in [90_u64, 80, 70, 60].iter().enumerate() {
            hit(&mut inst, &format!("p{i}"), None, *dmg);
        }
        inst.mark_expired(start());
        let set = calculate(&inst.snapshot(), &policy(), &InMemoryMilestoneHistory::new());
        let last = &set.players[3];
        assert_eq!(last.rank, 4);
        assert_eq!(
            last.items,
            vec![RewardItem::new("gold", 100), RewardItem::new("dust", 1)]
        );
    }
}
