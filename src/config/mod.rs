//! Boss catalog configuration
//!
//! Schema types, the YAML catalog loader, validation, and the
//! [`ConfigProvider`] seam through which the raid core obtains
//! `BossDefinition` values. The raid core never parses files itself.

pub mod loader;
pub mod schema;
pub mod validation;

use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;

pub use schema::{BossCatalog, BossDefinition, PhaseSpec, RewardPolicy, TransitionEffect};

// ============================================================================
// Config Provider
// ============================================================================

/// Source of boss definitions for spawn requests.
pub trait ConfigProvider: Send + Sync {
    /// Returns the boss definition with the given id, if known.
    fn boss_definition(&self, id: &str) -> Option<Arc<BossDefinition>>;

    /// Returns every known boss id, in catalog order.
    fn boss_ids(&self) -> Vec<String>;

    /// Suggests a known boss id close to `input`, for typo correction.
    ///
    /// Returns the closest id if its Damerau-Levenshtein distance is <= 3.
    fn suggest(&self, input: &str) -> Option<String> {
        self.boss_ids()
            .into_iter()
            .map(|id| {
                let dist = strsim::damerau_levenshtein(input, &id);
                (id, dist)
            })
            .filter(|(_, dist)| *dist <= 3)
            .min_by_key(|(_, dist)| *dist)
            .map(|(id, _)| id)
    }
}

/// A frozen, validated catalog indexed by boss id.
#[derive(Debug, Clone, Default)]
pub struct LoadedCatalog {
    bosses: IndexMap<String, Arc<BossDefinition>>,
}

impl LoadedCatalog {
    /// Builds a catalog from definitions. Later duplicates replace earlier ones.
    #[must_use]
    pub fn new(definitions: impl IntoIterator<Item = BossDefinition>) -> Self {
        let bosses = definitions
            .into_iter()
            .map(|def| (def.id.clone(), Arc::new(def)))
            .collect();
        Self { bosses }
    }

    /// Number of boss definitions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bosses.len()
    }

    /// Returns `true` when the catalog holds no definitions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bosses.is_empty()
    }

    /// Iterates over definitions in catalog order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<BossDefinition>> {
        self.bosses.values()
    }
}

impl ConfigProvider for LoadedCatalog {
    fn boss_definition(&self, id: &str) -> Option<Arc<BossDefinition>> {
        self.bosses.get(id).cloned()
    }

    fn boss_ids(&self) -> Vec<String> {
        self.bosses.keys().cloned().collect()
    }
}

// ============================================================================
// Runtime Settings
// ============================================================================

/// Runtime tuning for the raid controller.
///
/// Defaults can be overridden through `RAIDBOSS_*` environment variables.
#[derive(Debug, Clone)]
pub struct RaidSettings {
    /// Interval between expiry sweeps.
    pub sweep_interval: Duration,

    /// How long a finalized instance stays registered before the sweep archives it.
    pub archive_after: Duration,

    /// Maximum requests allowed to wait on one instance's critical section.
    pub max_pending_attacks: usize,

    /// Reward delivery retry policy.
    pub delivery: DeliverySettings,
}

impl Default for RaidSettings {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_millis(env_or("RAIDBOSS_SWEEP_INTERVAL_MS", 1000)),
            archive_after: Duration::from_secs(env_or("RAIDBOSS_ARCHIVE_AFTER_SECS", 600)),
            max_pending_attacks: env_or("RAIDBOSS_MAX_PENDING_ATTACKS", 1024),
            delivery: DeliverySettings::default(),
        }
    }
}

/// Retry policy for handing reward bundles to the external sink.
#[derive(Debug, Clone)]
pub struct DeliverySettings {
    /// Attempts per record before it is parked as pending.
    pub max_attempts: u32,

    /// Delay before the first retry; doubled after each failure.
    pub initial_backoff: Duration,

    /// Upper bound for the retry delay.
    pub max_backoff: Duration,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            max_attempts: env_or("RAIDBOSS_DELIVERY_ATTEMPTS", 5),
            initial_backoff: Duration::from_millis(env_or("RAIDBOSS_DELIVERY_BACKOFF_MS", 200)),
            max_backoff: Duration::from_secs(10),
        }
    }
}

/// Reads an environment variable and parses it, falling back to `default`.
pub(crate) fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::RewardPolicy;

    fn boss(id: &str) -> BossDefinition {
        BossDefinition {
            id: id.to_string(),
            name: None,
            max_hp: 100,
            base_attack: 0,
            base_defense: 0,
            attempt_limit: 1,
            duration: Duration::from_secs(60),
            shield_absorbs_damage: false,
            phases: vec![],
            rewards: RewardPolicy::default(),
        }
    }

    #[test]
    fn test_catalog_lookup() {
        let catalog = LoadedCatalog::new([boss("frost_wyrm"), boss("lava_golem")]);
        assert_eq!(catalog.len(), 2);
        assert!(catalog.boss_definition("frost_wyrm").is_some());
        assert!(catalog.boss_definition("unknown").is_none());
        assert_eq!(catalog.boss_ids(), vec!["frost_wyrm", "lava_golem"]);
    }

    #[test]
    fn test_suggest_close_id() {
        let catalog = LoadedCatalog::new([boss("frost_wyrm"), boss("lava_golem")]);
        assert_eq!(catalog.suggest("frost_wrym").as_deref(), Some("frost_wyrm"));
        assert_eq!(catalog.suggest("completely_different"), None);
    }

    #[test]
    fn test_env_or_default() {
        assert_eq!(env_or("RAIDBOSS_TEST_UNSET_VARIABLE", 7_u32), 7);
    }

    #[test]
    fn test_default_settings_are_positive() {
        let settings = RaidSettings::default();
        assert!(settings.max_pending_attacks > 0);
        assert!(settings.delivery.max_attempts > 0);
        assert!(!settings.sweep_interval.is_zero());
    }
}
