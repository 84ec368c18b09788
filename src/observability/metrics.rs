//! Metrics collection for `raidboss`.
//!
//! Prometheus-compatible metrics with bounded label values and typed
//! convenience functions for the raid lifecycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::RaidBossError;

/// Guard to prevent double-initialization of the metrics recorder.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Maximum length for boss id labels.
///
/// Boss ids come from the catalog and are used directly as labels.
const MAX_BOSS_LABEL_LEN: usize = 64;

/// Initializes the global metrics recorder.
///
/// When `port` is `Some`, a Prometheus HTTP listener is started on
/// `127.0.0.1:<port>`. When `None`, the recorder is installed without
/// an HTTP endpoint.
///
/// # Errors
///
/// Returns `RaidBossError::Io` if the recorder or HTTP listener
/// cannot be installed (e.g. port already in use).
pub fn init_metrics(port: Option<u16>) -> Result<(), RaidBossError> {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        tracing::debug!("metrics already initialized, skipping");
        return Ok(());
    }
    port.map_or_else(
        || PrometheusBuilder::new().install_recorder().map(|_| ()),
        |p| {
            PrometheusBuilder::new()
                .with_http_listener(([127, 0, 0, 1], p))
                .install()
        },
    )
    .map_err(|e| RaidBossError::Io(std::io::Error::other(e.to_string())))?;

    describe_metrics();
    Ok(())
}

/// Registers metric descriptions with the global recorder.
fn describe_metrics() {
    describe_counter!(
        "raidboss_attacks_total",
        "Attack requests by boss and outcome"
    );
    describe_counter!(
        "raidboss_damage_applied_total",
        "Damage credited to bosses (shield absorption plus HP loss)"
    );
    describe_histogram!(
        "raidboss_attack_duration_ms",
        "Time spent resolving an attack, including the wait for the instance lock"
    );
    describe_counter!(
        "raidboss_phase_transitions_total",
        "Phase transitions by boss and entered phase"
    );
    describe_counter!("raidboss_spawns_total", "Raid instances spawned");
    describe_counter!("raidboss_defeats_total", "Bosses defeated");
    describe_counter!("raidboss_expiries_total", "Raid instances expired");
    describe_counter!("raidboss_finalizations_total", "Raid instances finalized");
    describe_counter!(
        "raidboss_deliveries_total",
        "Reward delivery attempts by status"
    );
    describe_gauge!("raidboss_instances_active", "Raid instances accepting attacks");
    describe_gauge!(
        "raidboss_deliveries_pending",
        "Finalization records awaiting redelivery"
    );
}

/// Sanitizes a boss id for use as a metrics label.
///
/// Truncates to [`MAX_BOSS_LABEL_LEN`] characters and replaces any
/// characters invalid in Prometheus labels with underscores.
#[must_use]
pub fn sanitize_boss_label(id: &str) -> String {
    id.chars()
        .take(MAX_BOSS_LABEL_LEN)
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Records a resolved attack request.
///
/// `outcome` is one of a fixed set of labels (`accepted`, or a reject reason).
pub fn record_attack(boss_id: &str, outcome: &'static str, duration: Duration) {
    counter!(
        "raidboss_attacks_total",
        "boss" => sanitize_boss_label(boss_id),
        "outcome" => outcome,
    )
    .increment(1);
    histogram!("raidboss_attack_duration_ms").record(duration.as_secs_f64() * 1000.0);
}

/// Records damage credited to a boss.
pub fn record_damage(boss_id: &str, damage: u64) {
    counter!("raidboss_damage_applied_total", "boss" => sanitize_boss_label(boss_id))
        .increment(damage);
}

/// Records a phase transition.
pub fn record_phase_transition(boss_id: &str, phase: u32) {
    counter!(
        "raidboss_phase_transitions_total",
        "boss" => sanitize_boss_label(boss_id),
        "phase" => phase.to_string(),
    )
    .increment(1);
}

/// Records a spawn.
pub fn record_spawn(boss_id: &str) {
    counter!("raidboss_spawns_total", "boss" => sanitize_boss_label(boss_id)).increment(1);
    gauge!("raidboss_instances_active").increment(1.0);
}

/// Records an instance leaving the active state.
///
/// `defeated` distinguishes a defeat from an expiry.
pub fn record_terminal(boss_id: &str, defeated: bool) {
    let name = if defeated {
        "raidboss_defeats_total"
    } else {
        "raidboss_expiries_total"
    };
    counter!(name, "boss" => sanitize_boss_label(boss_id)).increment(1);
    counter!("raidboss_finalizations_total").increment(1);
    gauge!("raidboss_instances_active").decrement(1.0);
}

/// Records a reward delivery attempt.
pub fn record_delivery(success: bool) {
    let status = if success { "delivered" } else { "failed" };
    counter!("raidboss_deliveries_total", "status" => status).increment(1);
}

/// Sets the number of records parked for redelivery.
#[allow(clippy::cast_precision_loss)]
pub fn set_pending_deliveries(count: usize) {
    gauge!("raidboss_deliveries_pending").set(count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_boss_label() {
        assert_eq!(sanitize_boss_label("frost_wyrm"), "frost_wyrm");
        assert_eq!(sanitize_boss_label("evil boss!{}"), "evil_boss___");
    }

    #[test]
    fn test_sanitize_truncates_long_ids() {
        let long = "x".repeat(10_000);
        assert_eq!(sanitize_boss_label(&long).len(), MAX_BOSS_LABEL_LEN);
    }

    #[test]
    fn test_record_functions_do_not_panic_without_recorder() {
        record_attack("frost_wyrm", "accepted", Duration::from_millis(3));
        record_damage("frost_wyrm", 12_000);
        record_phase_transition("frost_wyrm", 2);
        record_spawn("frost_wyrm");
        record_terminal("frost_wyrm", true);
        record_terminal("frost_wyrm", false);
        record_delivery(true);
        record_delivery(false);
        set_pending_deliveries(4);
    }
}
