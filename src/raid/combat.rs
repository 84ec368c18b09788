//! Combat collaborator seam
//!
//! The raid core never computes combat outcomes. It hands a
//! [`CombatContext`] to a [`CombatSimulator`] and consumes the returned
//! [`CombatOutcome`]. The simulator runs inside the per-instance critical
//! section, so implementations must be synchronous and cheap.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::instance::PlayerId;
use super::phase::EffectiveStats;

/// One hero in an attacking team.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeroDescriptor {
    /// Hero identifier
    pub id: String,
    /// Combat power rating
    pub power: u64,
}

/// The team a participant sends against the boss.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamDescriptor {
    /// Heroes in formation order
    pub heroes: Vec<HeroDescriptor>,
}

impl TeamDescriptor {
    /// Creates a team of equally rated heroes.
    #[must_use]
    pub fn uniform(size: usize, power: u64) -> Self {
        Self {
            heroes: (0..size)
                .map(|i| HeroDescriptor {
                    id: format!("hero-{i}"),
                    power,
                })
                .collect(),
        }
    }

    /// Sum of hero power ratings.
    #[must_use]
    pub fn total_power(&self) -> u64 {
        self.heroes
            .iter()
            .fold(0_u64, |acc, h| acc.saturating_add(h.power))
    }
}

/// Everything a simulator may look at for one attack.
#[derive(Debug, Clone, Copy)]
pub struct CombatContext<'a> {
    /// Boss definition id
    pub boss_id: &'a str,
    /// Phase the boss is in
    pub phase: u32,
    /// Boss stats after phase modifiers and debuffs
    pub stats: EffectiveStats,
    /// Attacker
    pub player_id: &'a PlayerId,
    /// Attempt number of this attack (1-based)
    pub attempt: u32,
    /// Attacking team
    pub team: &'a TeamDescriptor,
}

/// Result of one simulated attack.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CombatOutcome {
    /// Damage dealt to the boss
    pub total_damage: u64,
    /// Largest single hit
    pub highest_hit: u64,
    /// Heroes lost
    pub participant_deaths: u32,
    /// Debuff stacks the team applied to the boss
    pub debuffs_applied: u32,
}

/// Computes the outcome of one attack.
pub trait CombatSimulator: Send + Sync + std::fmt::Debug {
    /// Simulates an attack. Must not block.
    fn simulate(&self, ctx: &CombatContext<'_>) -> CombatOutcome;

    /// Name for logging.
    fn name(&self) -> &'static str;
}

// ============================================================================
// Deterministic power simulator
// ============================================================================

/// Each hero hits once for its power minus the boss's defense (minimum 1).
///
/// A hero falls when the boss's attack exceeds twice its power.
#[derive(Debug, Default, Clone, Copy)]
pub struct TeamPowerSimulator;

impl CombatSimulator for TeamPowerSimulator {
    fn simulate(&self, ctx: &CombatContext<'_>) -> CombatOutcome {
        let mut outcome = CombatOutcome::default();
        for hero in &ctx.team.heroes {
            if hero.power == 0 {
                continue;
            }
            let hit = hero.power.saturating_sub(ctx.stats.defense).max(1);
            outcome.total_damage = outcome.total_damage.saturating_add(hit);
            outcome.highest_hit = outcome.highest_hit.max(hit);
            if ctx.stats.attack > hero.power.saturating_mul(2) {
                outcome.participant_deaths += 1;
            }
        }
        outcome
    }

    fn name(&self) -> &'static str {
        "team_power"
    }
}

// ============================================================================
// Seeded simulator
// ============================================================================

/// Randomized simulator with reproducible output.
///
/// The RNG is derived from the seed, the attacker and the attempt number,
/// so the same attack always produces the same outcome regardless of the
/// order in which concurrent attacks are resolved.
#[derive(Debug, Clone, Copy)]
pub struct SeededSimulator {
    seed: u64,
    crit_chance: f64,
    debuff_chance: f64,
}

impl SeededSimulator {
    /// Creates a simulator with default crit (10%) and debuff (20%) chances.
    #[must_use]
    pub const fn new(seed: u64) -> Self {
        Self {
            seed,
            crit_chance: 0.1,
            debuff_chance: 0.2,
        }
    }

    fn rng_for(&self, ctx: &CombatContext<'_>) -> StdRng {
        // FNV-1a over the attacker id keeps the derivation stable across runs.
        let mut h: u64 = 0xcbf2_9ce4_8422_2325;
        for b in ctx.player_id.as_str().bytes() {
            h ^= u64::from(b);
            h = h.wrapping_mul(0x0100_0000_01b3);
        }
        StdRng::seed_from_u64(self.seed ^ h ^ u64::from(ctx.attempt).rotate_left(32))
    }
}

impl CombatSimulator for SeededSimulator {
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    fn simulate(&self, ctx: &CombatContext<'_>) -> CombatOutcome {
        let mut rng = self.rng_for(ctx);
        let mut outcome = CombatOutcome::default();

        for hero in &ctx.team.heroes {
            if hero.power == 0 {
                continue;
            }
            let roll: f64 = rng.random_range(0.8..=1.2);
            let mut hit = ((hero.power as f64 * roll) as u64)
                .saturating_sub(ctx.stats.defense)
                .max(1);
            if rng.random_bool(self.crit_chance) {
                hit = hit.saturating_mul(2);
            }
            outcome.total_damage = outcome.total_damage.saturating_add(hit);
            outcome.highest_hit = outcome.highest_hit.max(hit);

            if rng.random_bool(self.debuff_chance) {
                outcome.debuffs_applied += 1;
            }
            let danger = ctx.stats.attack as f64 / (hero.power as f64 * 4.0);
            if rng.random_bool(danger.clamp(0.0, 1.0)) {
                outcome.participant_deaths += 1;
            }
        }
        outcome
    }

    fn name(&self) -> &'static str {
        "seeded"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>(player: &'a PlayerId, team: &'a TeamDescriptor, attempt: u32) -> CombatContext<'a> {
        CombatContext {
            boss_id: "wyrm",
            phase: 1,
            stats: EffectiveStats {
                attack: 100,
                defense: 30,
            },
            player_id: player,
            attempt,
            team,
        }
    }

    #[test]
    fn test_team_power_damage() {
        let player = PlayerId::new("p1");
        let team = TeamDescriptor {
            heroes: vec![
                HeroDescriptor {
                    id: "a".into(),
                    power: 100,
                },
                HeroDescriptor {
                    id: "b".into(),
                    power: 40,
                },
                HeroDescriptor {
                    id: "c".into(),
                    power: 10,
                },
            ],
        };
        let outcome = TeamPowerSimulator.simulate(&ctx(&player, &team, 1));
        assert_eq!(outcome.total_damage, 70 + 10 + 1);
        assert_eq!(outcome.highest_hit, 70);
        assert_eq!(outcome.participant_deaths, 2);
    }

    #[test]
    fn test_empty_team_deals_nothing() {
        let player = PlayerId::new("p1");
        let team = TeamDescriptor::default();
        let outcome = TeamPowerSimulator.simulate(&ctx(&player, &team, 1));
        assert_eq!(outcome, CombatOutcome::default());
    }

    #[test]
    fn test_seeded_is_reproducible() {
        let player = PlayerId::new("p1");
        let team = TeamDescriptor::uniform(5, 500);
        let sim = SeededSimulator::new(42);
        let a = sim.simulate(&ctx(&player, &team, 1));
        let b = sim.simulate(&ctx(&player, &team, 1));
        assert_eq!(a, b);
        assert!(a.total_damage > 0);
        assert!(a.highest_hit <= a.total_damage);
    }

    #[test]
    fn test_seeded_varies_by_attempt() {
        let player = PlayerId::new("p1");
        let team = TeamDescriptor::uniform(5, 10_000);
        let sim = SeededSimulator::new(7);
        let outcomes: Vec<_> = (1..=8)
            .map(|attempt| sim.simulate(&ctx(&player, &team, attempt)).total_damage)
            .collect();
        assert!(outcomes.windows(2).any(|w| w[0] != w[1]));
    }

    #[test]
    fn test_total_power_saturates() {
        let team = TeamDescriptor::uniform(3, u64::MAX);
        assert_eq!(team.total_power(), u64::MAX);
    }
}
