//! Phase resolution
//!
//! Decides when an instance crosses into the next HP-gated phase and
//! applies the phase's entry effect. Phases only ever advance, one step
//! per damage application.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::schema::{BossDefinition, PhaseSpec, TransitionEffect};

use super::instance::{PhaseTransitionLogEntry, PlayerId, RaidInstance};

/// Defense reduction per debuff stack.
pub const DEBUFF_DEFENSE_STEP: f64 = 0.05;

/// Maximum debuff stacks a boss can carry.
pub const MAX_DEBUFF_STACKS: u32 = 10;

/// Boss stats with phase modifiers and debuffs applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EffectiveStats {
    /// Attack
    pub attack: u64,
    /// Defense
    pub defense: u64,
}

/// Computes the boss's stats for `phase` with `debuff_stacks` applied.
///
/// Unknown phases use the base stats.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn effective_stats(boss: &BossDefinition, phase: u32, debuff_stacks: u32) -> EffectiveStats {
    let modifiers = boss.phase(phase).map(|p| p.modifiers).unwrap_or_default();
    let debuff = 1.0 - DEBUFF_DEFENSE_STEP * f64::from(debuff_stacks.min(MAX_DEBUFF_STACKS));

    let scale = |base: u64, factor: f64| -> u64 {
        let v = (base as f64 * factor).round();
        if v <= 0.0 {
            0
        } else if v >= u64::MAX as f64 {
            u64::MAX
        } else {
            v as u64
        }
    };

    EffectiveStats {
        attack: scale(boss.base_attack, modifiers.attack),
        defense: scale(boss.base_defense, modifiers.defense * debuff),
    }
}

/// Returns the phase an instance at `hp_ratio` should advance to, if any.
///
/// The first phase (ascending) numbered above `current` whose entry
/// threshold is at or above `hp_ratio` wins.
#[must_use]
pub fn next_phase(boss: &BossDefinition, current: u32, hp_ratio: f64) -> Option<&PhaseSpec> {
    boss.phases
        .iter()
        .find(|p| p.phase > current && p.hp_threshold >= hp_ratio)
}

/// Applies a phase-entry effect to the instance.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn apply_effect(instance: &mut RaidInstance, effect: TransitionEffect) {
    match effect {
        TransitionEffect::None => {}
        TransitionEffect::FullHeal => {
            instance.heal(instance.boss().max_hp);
        }
        TransitionEffect::PartialHeal { fraction } => {
            let amount = (instance.boss().max_hp as f64 * fraction.clamp(0.0, 1.0)).round() as u64;
            instance.heal(amount);
        }
        TransitionEffect::ClearDebuffs => instance.clear_debuffs(),
        TransitionEffect::Shield { amount } => instance.grant_shield(amount),
    }
}

/// Evaluates and applies at most one phase transition.
///
/// Must be called inside the instance's critical section, after the damage
/// write and its ledger entry. Returns the log entry of the transition, if
/// one happened. Terminal instances and instances at zero HP never
/// transition.
pub fn evaluate(
    instance: &mut RaidInstance,
    trigger: &PlayerId,
    trigger_seq: u64,
    now: DateTime<Utc>,
) -> Option<PhaseTransitionLogEntry> {
    if instance.status().is_terminal() || instance.current_hp() == 0 {
        return None;
    }

    let (phase, effect) = {
        let spec = next_phase(instance.boss(), instance.current_phase(), instance.hp_ratio())?;
        (spec.phase, spec.on_enter)
    };

    let from_phase = instance.current_phase();
    let hp_at_transition = instance.current_hp();
    if !instance.enter_phase(phase) {
        return None;
    }
    apply_effect(instance, effect);
    instance.ledger_mut().reset_phase_damage();

    let entry = PhaseTransitionLogEntry {
        from_phase,
        phase,
        at: now,
        hp_at_transition,
        hp_after_effect: instance.current_hp(),
        effect,
        triggered_by_sequence: trigger_seq,
        triggered_by: trigger.clone(),
        participant_count: instance.ledger().participant_count(),
    };
    instance.log_transition(entry.clone());

    tracing::info!(
        instance = %instance.id(),
        from = from_phase,
        to = phase,
        effect = effect.label(),
        hp = entry.hp_after_effect,
        "boss entered new phase"
    );

    Some(entry)
}
