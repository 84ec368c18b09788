//! Boss catalog schema types
//!
//! These types are deserialized from YAML catalog files and are immutable
//! once loaded. A raid instance holds its `BossDefinition` behind an `Arc`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ============================================================================
// Catalog
// ============================================================================

/// Root of a boss catalog file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BossCatalog {
    /// Boss definitions, in file order
    #[serde(default)]
    pub bosses: Vec<BossDefinition>,
}

// ============================================================================
// Boss Definition
// ============================================================================

/// Immutable description of one world boss encounter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BossDefinition {
    /// Unique identifier used by spawn requests
    pub id: String,

    /// Display name (defaults to the id)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Maximum (and starting) HP
    pub max_hp: u64,

    /// Base attack before phase modifiers
    #[serde(default)]
    pub base_attack: u64,

    /// Base defense before phase modifiers
    #[serde(default)]
    pub base_defense: u64,

    /// Attacks each participant may make against one instance
    pub attempt_limit: u32,

    /// Length of the encounter window
    #[serde(with = "duration_str")]
    pub duration: Duration,

    /// Whether a granted shield absorbs damage before HP drops
    #[serde(default)]
    pub shield_absorbs_damage: bool,

    /// Phase table, ascending by phase number
    pub phases: Vec<PhaseSpec>,

    /// Reward policy applied at finalization
    #[serde(default)]
    pub rewards: RewardPolicy,
}

impl BossDefinition {
    /// Returns the display name, falling back to the id.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    /// Returns the phase spec with the given phase number.
    #[must_use]
    pub fn phase(&self, number: u32) -> Option<&PhaseSpec> {
        self.phases.iter().find(|p| p.phase == number)
    }

    /// Returns the phase number a fresh instance starts in.
    #[must_use]
    pub fn first_phase(&self) -> u32 {
        self.phases.first().map_or(1, |p| p.phase)
    }

    /// Returns the HP-ratio range `(low, high]` covered by a phase.
    ///
    /// The upper bound is the phase's entry threshold; the lower bound is
    /// the next phase's threshold, or `0.0` for the last phase.
    #[must_use]
    pub fn phase_range(&self, number: u32) -> Option<(f64, f64)> {
        let idx = self.phases.iter().position(|p| p.phase == number)?;
        let high = self.phases[idx].hp_threshold;
        let low = self.phases.get(idx + 1).map_or(0.0, |p| p.hp_threshold);
        Some((low, high))
    }
}

// ============================================================================
// Phases
// ============================================================================

/// One HP-gated stage of the encounter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PhaseSpec {
    /// Phase number (strictly increasing through the table)
    pub phase: u32,

    /// Optional display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Entry threshold: the phase is entered once `hp / max_hp <= hp_threshold`
    pub hp_threshold: f64,

    /// Side effect applied when the phase is entered
    #[serde(default)]
    pub on_enter: TransitionEffect,

    /// Stat modifiers active during the phase
    #[serde(default)]
    pub modifiers: StatModifiers,

    /// Minion waves and mechanics announced for the phase
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mechanics: Vec<MechanicSpec>,
}

/// Side effect of entering a phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransitionEffect {
    /// No side effect
    #[default]
    None,
    /// Restore HP to maximum
    FullHeal,
    /// Restore a fraction of maximum HP
    PartialHeal {
        /// Fraction of `max_hp` restored, in `(0, 1]`
        fraction: f64,
    },
    /// Remove every debuff stack applied by participants
    ClearDebuffs,
    /// Grant a shield
    Shield {
        /// Shield points granted
        amount: u64,
    },
}

impl TransitionEffect {
    /// Short label for logs and metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::FullHeal => "full_heal",
            Self::PartialHeal { .. } => "partial_heal",
            Self::ClearDebuffs => "clear_debuffs",
            Self::Shield { .. } => "shield",
        }
    }
}

/// Multipliers applied to the boss's base stats during a phase.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StatModifiers {
    /// Attack multiplier
    #[serde(default = "one")]
    pub attack: f64,
    /// Defense multiplier
    #[serde(default = "one")]
    pub defense: f64,
}

impl Default for StatModifiers {
    fn default() -> Self {
        Self {
            attack: 1.0,
            defense: 1.0,
        }
    }
}

/// Minion or mechanic descriptor attached to a phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MechanicSpec {
    /// Mechanic name
    pub name: String,
    /// Number of minions spawned with the mechanic
    #[serde(default)]
    pub minions: u32,
    /// Free-form description for clients
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

// ============================================================================
// Rewards
// ============================================================================

/// Reward configuration for one boss.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RewardPolicy {
    /// Reward every participant receives
    #[serde(default)]
    pub base: Vec<RewardItem>,

    /// Player reward bands by final rank
    #[serde(default)]
    pub ranking_tiers: Vec<RankingTier>,

    /// Guild reward bands by final guild rank
    #[serde(default)]
    pub guild_tiers: Vec<GuildTier>,

    /// Cumulative damage milestones
    #[serde(default)]
    pub milestones: Vec<DamageMilestone>,

    /// Exclusive item for the top ranks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclusive: Option<ExclusiveReward>,
}

/// An item and quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RewardItem {
    /// Item identifier in the external inventory
    pub item: String,
    /// Quantity granted
    pub quantity: u64,
}

impl RewardItem {
    /// Creates a reward item.
    #[must_use]
    pub fn new(item: impl Into<String>, quantity: u64) -> Self {
        Self {
            item: item.into(),
            quantity,
        }
    }
}

/// Player reward band covering ranks `min_rank..=max_rank`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RankingTier {
    /// First rank in the band (1-based)
    pub min_rank: u32,
    /// Last rank in the band (inclusive)
    pub max_rank: u32,
    /// Multiplier applied to the base reward quantities
    #[serde(default = "one")]
    pub multiplier: f64,
    /// Additional items for the band
    #[serde(default)]
    pub rewards: Vec<RewardItem>,
}

impl RankingTier {
    /// Returns whether `rank` falls in this band.
    #[must_use]
    pub const fn contains(&self, rank: u32) -> bool {
        rank >= self.min_rank && rank <= self.max_rank
    }
}

/// Guild reward band covering guild ranks `min_rank..=max_rank`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GuildTier {
    /// First guild rank in the band (1-based)
    pub min_rank: u32,
    /// Last guild rank in the band (inclusive)
    pub max_rank: u32,
    /// Items granted to the guild
    #[serde(default)]
    pub rewards: Vec<RewardItem>,
}

impl GuildTier {
    /// Returns whether `rank` falls in this band.
    #[must_use]
    pub const fn contains(&self, rank: u32) -> bool {
        rank >= self.min_rank && rank <= self.max_rank
    }
}

/// Reward for reaching a cumulative damage threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DamageMilestone {
    /// Stable identifier, used for one-time bookkeeping
    pub id: String,
    /// Cumulative damage required
    pub threshold: u64,
    /// Items granted
    #[serde(default)]
    pub rewards: Vec<RewardItem>,
    /// Granted only the first time a player ever crosses it
    #[serde(default)]
    pub one_time: bool,
}

/// Exclusive item for the top of the leaderboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExclusiveReward {
    /// Ranks `1..=max_rank` qualify
    pub max_rank: u32,
    /// Item granted
    pub item: RewardItem,
    /// Only granted when the boss was defeated
    #[serde(default = "yes")]
    pub requires_defeat: bool,
    /// Only granted when the defeat happened within this long of the window opening
    #[serde(
        default,
        with = "opt_duration_str",
        skip_serializing_if = "Option::is_none"
    )]
    pub within: Option<Duration>,
}

const fn one() -> f64 {
    1.0
}

const fn yes() -> bool {
    true
}

// ============================================================================
// Duration (de)serialization
// ============================================================================

/// Human-readable durations (`"2h"`, `"90s"`) via `humantime`.
mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(raw.trim()).map_err(serde::de::Error::custom)
    }
}

mod opt_duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::ref_option)]
    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_str(&humantime::format_duration(*d).to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|raw| humantime::parse_duration(raw.trim()).map_err(serde::de::Error::custom))
            .transpose()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r"
bosses:
  - id: frost_wyrm
    name: Frost Wyrm
    max_hp: 1000000
    base_attack: 1200
    base_defense: 300
    attempt_limit: 3
    duration: 2h
    phases:
      - phase: 1
        hp_threshold: 1.0
      - phase: 2
        hp_threshold: 0.7
        on_enter: { type: partial_heal, fraction: 0.1 }
        modifiers: { attack: 1.5 }
      - phase: 3
        hp_threshold: 0.4
        on_enter: { type: shield, amount: 5000 }
        mechanics:
          - name: ice adds
            minions: 4
    rewards:
      base:
        - { item: gold, quantity: 100 }
      ranking_tiers:
        - { min_rank: 1, max_rank: 1, multiplier: 3.0 }
      milestones:
        - { id: dmg_100k, threshold: 100000, one_time: true }
      exclusive:
        max_rank: 3
        item: { item: wyrm_mount, quantity: 1 }
        within: 30m
";

    #[test]
    fn test_parse_sample_catalog() {
        let catalog: BossCatalog = serde_yaml::from_str(SAMPLE).unwrap();
        assert_eq!(catalog.bosses.len(), 1);
        let boss = &catalog.bosses[0];
        assert_eq!(boss.display_name(), "Frost Wyrm");
        assert_eq!(boss.duration, Duration::from_secs(7200));
        assert_eq!(boss.phases.len(), 3);
        assert_eq!(
            boss.phases[1].on_enter,
            TransitionEffect::PartialHeal { fraction: 0.1 }
        );
        assert!((boss.phases[1].modifiers.attack - 1.5).abs() < f64::EPSILON);
        assert!((boss.phases[1].modifiers.defense - 1.0).abs() < f64::EPSILON);
        assert_eq!(boss.phases[2].mechanics[0].minions, 4);

        let exclusive = boss.rewards.exclusive.as_ref().unwrap();
        assert!(exclusive.requires_defeat);
        assert_eq!(exclusive.within, Some(Duration::from_secs(1800)));
        assert!(boss.rewards.milestones[0].one_time);
    }

    #[test]
    fn test_phase_range() {
        let catalog: BossCatalog = serde_yaml::from_str(SAMPLE).unwrap();
        let boss = &catalog.bosses[0];
        assert_eq!(boss.phase_range(1), Some((0.7, 1.0)));
        assert_eq!(boss.phase_range(2), Some((0.4, 0.7)));
        assert_eq!(boss.phase_range(3), Some((0.0, 0.4)));
        assert_eq!(boss.phase_range(9), None);
        assert_eq!(boss.first_phase(), 1);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let yaml = r"
bosses:
  - id: x
    max_hp: 10
    attempt_limit: 1
    duration: 1h
    phases: []
    hp: 3
";
        let result: Result<BossCatalog, _> = serde_yaml::from_str(yaml);
        assert!(result.is_err());
    }

    #[test]
    fn test_bad_duration_rejected() {
        let yaml = r"
bosses:
  - id: x
    max_hp: 10
    attempt_limit: 1
    duration: soon
    phases: []
";
        let result: Result<BossCatalog, _> = serde_yaml::from_str(yaml);
        assert!(result.is_err());
    }

    #[test]
    fn test_tier_contains() {
        let tier = RankingTier {
            min_rank: 2,
            max_rank: 5,
            multiplier: 1.0,
            rewards: vec![],
        };
        assert!(!tier.contains(1));
        assert!(tier.contains(2));
        assert!(tier.contains(5));
        assert!(!tier.contains(6));
    }

    #[test]
    fn test_effect_labels() {
        assert_eq!(TransitionEffect::FullHeal.label(), "full_heal");
        assert_eq!(TransitionEffect::Shield { amount: 1 }.label(), "shield");
        assert_eq!(TransitionEffect::default().label(), "none");
    }
}
