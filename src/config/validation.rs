//! Boss catalog validation
//!
//! Semantic checks on deserialized `BossDefinition` values. Validation
//! collects ALL issues rather than stopping at the first, so a catalog
//! author sees every problem in one pass.

use std::collections::HashSet;

use crate::config::loader::CatalogLimits;
use crate::config::schema::{
    BossCatalog, BossDefinition, RewardPolicy, StatModifiers, TransitionEffect,
};
use crate::error::{Severity, ValidationIssue};

// ============================================================================
// Public API
// ============================================================================

/// Result of catalog validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Validation errors (prevent loading).
    pub errors: Vec<ValidationIssue>,

    /// Validation warnings (informational).
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// Returns `true` if there are any errors.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Returns `true` if validation passed (no errors).
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Boss catalog validator.
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<ValidationIssue>,
    warnings: Vec<ValidationIssue>,
}

impl Validator {
    /// Creates a new validator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates a whole catalog.
    pub fn validate(&mut self, catalog: &BossCatalog, limits: &CatalogLimits) -> ValidationResult {
        self.errors.clear();
        self.warnings.clear();

        if catalog.bosses.is_empty() {
            self.add_warning("bosses", "Catalog defines no bosses");
        }

        if catalog.bosses.len() > limits.max_bosses {
            self.add_error(
                "bosses",
                &format!(
                    "Too many bosses: {} (maximum: {}). \
                     Set RAIDBOSS_MAX_BOSSES to increase the limit.",
                    catalog.bosses.len(),
                    limits.max_bosses
                ),
            );
        }

        let mut seen = HashSet::new();
        for (i, boss) in catalog.bosses.iter().enumerate() {
            let prefix = format!("bosses[{i}]");
            if !boss.id.is_empty() && !seen.insert(boss.id.as_str()) {
                self.add_error(
                    &format!("{prefix}.id"),
                    &format!("Duplicate boss id '{}'", boss.id),
                );
            }
            self.check_boss(boss, &prefix, limits);
        }

        self.take()
    }

    /// Validates a single definition, as done at spawn time.
    pub fn validate_boss(&mut self, boss: &BossDefinition) -> ValidationResult {
        self.errors.clear();
        self.warnings.clear();
        self.check_boss(boss, &format!("boss '{}'", boss.id), &CatalogLimits::default());
        self.take()
    }

    fn take(&mut self) -> ValidationResult {
        ValidationResult {
            errors: std::mem::take(&mut self.errors),
            warnings: std::mem::take(&mut self.warnings),
        }
    }

    // ========================================================================
    // Boss checks
    // ========================================================================

    fn check_boss(&mut self, boss: &BossDefinition, prefix: &str, limits: &CatalogLimits) {
        if boss.id.trim().is_empty() {
            self.add_error(&format!("{prefix}.id"), "Boss id is required and cannot be empty");
        }
        if boss.max_hp == 0 {
            self.add_error(&format!("{prefix}.max_hp"), "max_hp must be greater than zero");
        }
        if boss.attempt_limit == 0 {
            self.add_error(
                &format!("{prefix}.attempt_limit"),
                "attempt_limit must be at least 1",
            );
        }
        if boss.duration.is_zero() {
            self.add_error(&format!("{prefix}.duration"), "duration must be non-zero");
        }
        if boss.duration > limits.max_duration {
            self.add_error(
                &format!("{prefix}.duration"),
                &format!(
                    "duration {} exceeds the maximum of {}",
                    humantime::format_duration(boss.duration),
                    humantime::format_duration(limits.max_duration)
                ),
            );
        }

        self.check_phases(boss, prefix, limits);
        self.check_rewards(&boss.rewards, &format!("{prefix}.rewards"));
    }

    fn check_phases(&mut self, boss: &BossDefinition, prefix: &str, limits: &CatalogLimits) {
        let path = format!("{prefix}.phases");
        let Some(first) = boss.phases.first() else {
            self.add_error(&path, "At least one phase is required");
            return;
        };

        if boss.phases.len() > limits.max_phases {
            self.add_error(
                &path,
                &format!(
                    "Too many phases: {} (maximum: {})",
                    boss.phases.len(),
                    limits.max_phases
                ),
            );
        }

        if (first.hp_threshold - 1.0).abs() > f64::EPSILON {
            self.add_error(
                &format!("{path}[0].hp_threshold"),
                "The first phase must start at hp_threshold 1.0",
            );
        }
        if first.on_enter != TransitionEffect::None {
            self.add_warning(
                &format!("{path}[0].on_enter"),
                "The first phase is active at spawn; its on_enter effect never fires",
            );
        }

        for (i, phase) in boss.phases.iter().enumerate() {
            let phase_path = format!("{path}[{i}]");
            if !(0.0..=1.0).contains(&phase.hp_threshold) {
                self.add_error(
                    &format!("{phase_path}.hp_threshold"),
                    &format!("hp_threshold {} must be within [0, 1]", phase.hp_threshold),
                );
            }
            let StatModifiers { attack, defense } = phase.modifiers;
            if !attack.is_finite() || !defense.is_finite() || attack < 0.0 || defense < 0.0 {
                self.add_error(
                    &format!("{phase_path}.modifiers"),
                    "Stat modifiers must be finite and non-negative",
                );
            }
            if let TransitionEffect::PartialHeal { fraction } = phase.on_enter {
                if !fraction.is_finite() || fraction <= 0.0 || fraction > 1.0 {
                    self.add_error(
                        &format!("{phase_path}.on_enter.fraction"),
                        &format!("Heal fraction {fraction} must be within (0, 1]"),
                    );
                }
            }
            if let TransitionEffect::Shield { amount: 0 } = phase.on_enter {
                self.add_warning(
                    &format!("{phase_path}.on_enter.amount"),
                    "Shield amount is zero",
                );
            }

            if i > 0 {
                let prev = &boss.phases[i - 1];
                if phase.phase <= prev.phase {
                    self.add_error(
                        &format!("{phase_path}.phase"),
                        &format!(
                            "Phase numbers must be strictly increasing ({} follows {})",
                            phase.phase, prev.phase
                        ),
                    );
                }
                if phase.hp_threshold >= prev.hp_threshold {
                    self.add_error(
                        &format!("{phase_path}.hp_threshold"),
                        &format!(
                            "Thresholds must be strictly decreasing ({} follows {})",
                            phase.hp_threshold, prev.hp_threshold
                        ),
                    );
                }
            }
        }
    }

    fn check_rewards(&mut self, rewards: &RewardPolicy, path: &str) {
        let mut bands = Vec::with_capacity(rewards.ranking_tiers.len());
        for (i, tier) in rewards.ranking_tiers.iter().enumerate() {
            let tier_path = format!("{path}.ranking_tiers[{i}]");
            self.check_band(tier.min_rank, tier.max_rank, &tier_path);
            if tier.multiplier <= 0.0 || !tier.multiplier.is_finite() {
                self.add_error(
                    &format!("{tier_path}.multiplier"),
                    &format!("Multiplier {} must be a positive number", tier.multiplier),
                );
            }
            bands.push((tier.min_rank, tier.max_rank, tier_path));
        }
        self.check_overlaps(&bands);

        let mut guild_bands = Vec::with_capacity(rewards.guild_tiers.len());
        for (i, tier) in rewards.guild_tiers.iter().enumerate() {
            let tier_path = format!("{path}.guild_tiers[{i}]");
            self.check_band(tier.min_rank, tier.max_rank, &tier_path);
            guild_bands.push((tier.min_rank, tier.max_rank, tier_path));
        }
        self.check_overlaps(&guild_bands);

        let mut milestone_ids = HashSet::new();
        for (i, milestone) in rewards.milestones.iter().enumerate() {
            let m_path = format!("{path}.milestones[{i}]");
            if milestone.id.trim().is_empty() {
                self.add_error(&format!("{m_path}.id"), "Milestone id cannot be empty");
            } else if !milestone_ids.insert(milestone.id.as_str()) {
                self.add_error(
                    &format!("{m_path}.id"),
                    &format!("Duplicate milestone id '{}'", milestone.id),
                );
            }
            if milestone.threshold == 0 {
                self.add_warning(
                    &format!("{m_path}.threshold"),
                    "Milestone threshold of zero is reached by every participant",
                );
            }
        }

        if rewards.ranking_tiers.is_empty() {
            self.add_warning(
                &format!("{path}.ranking_tiers"),
                "No ranking tiers; participants only receive base and milestone rewards",
            );
        }

        if let Some(exclusive) = &rewards.exclusive {
            if exclusive.max_rank == 0 {
                self.add_error(
                    &format!("{path}.exclusive.max_rank"),
                    "Exclusive max_rank must be at least 1",
                );
            } else if !rewards.ranking_tiers.is_empty()
                && !rewards
                    .ranking_tiers
                    .iter()
                    .any(|t| t.contains(exclusive.max_rank))
            {
                self.add_warning(
                    &format!("{path}.exclusive.max_rank"),
                    "Exclusive rank band is not covered by any ranking tier",
                );
            }
        }
    }

    fn check_band(&mut self, min_rank: u32, max_rank: u32, path: &str) {
        if min_rank == 0 {
            self.add_error(&format!("{path}.min_rank"), "Ranks are 1-based; min_rank must be >= 1");
        }
        if max_rank < min_rank {
            self.add_error(
                &format!("{path}.max_rank"),
                &format!("max_rank {max_rank} is below min_rank {min_rank}"),
            );
        }
    }

    fn check_overlaps(&mut self, bands: &[(u32, u32, String)]) {
        for (i, (a_min, a_max, _)) in bands.iter().enumerate() {
            for (b_min, b_max, b_path) in &bands[i + 1..] {
                if a_min <= b_max && b_min <= a_max {
                    self.add_error(
                        b_path,
                        &format!(
                            "Rank band {b_min}..={b_max} overlaps band {a_min}..={a_max}"
                        ),
                    );
                }
            }
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Adds an error to the collection.
    fn add_error(&mut self, path: &str, message: &str) {
        self.errors.push(ValidationIssue {
            path: path.to_string(),
            message: message.to_string(),
            severity: Severity::Error,
        });
    }

    /// Adds a warning to the collection.
    fn add_warning(&mut self, path: &str, message: &str) {
        self.warnings.push(ValidationIssue {
            path: path.to_string(),
            message: message.to_string(),
            severity: Severity::Warning,
        });
    }
}

// ============================================================================
// Tests
// ============================================================================
