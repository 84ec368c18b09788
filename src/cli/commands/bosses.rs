//! `raidboss bosses`
//!
//! Lists the boss definitions in a catalog.

use serde::Serialize;

use crate::cli::args::{BossesArgs, OutputFormat};
use crate::config::LoadedCatalog;
use crate::config::loader::CatalogLoader;
use crate::error::RaidBossError;

/// One catalog row.
#[derive(Debug, Serialize)]
pub struct BossSummary {
    /// Boss id
    pub id: String,
    /// Display name
    pub name: String,
    /// Maximum HP
    pub max_hp: u64,
    /// Number of phases
    pub phases: usize,
    /// Attempts per participant
    pub attempt_limit: u32,
    /// Encounter window, humantime formatted
    pub duration: String,
    /// Number of damage milestones
    pub milestones: usize,
    /// Whether an exclusive reward is configured
    pub exclusive: bool,
}

/// Summarizes every boss in catalog order.
#[must_use]
pub fn summarize(catalog: &LoadedCatalog) -> Vec<BossSummary> {
    catalog
        .iter()
        .map(|boss| BossSummary {
            id: boss.id.clone(),
            name: boss.display_name().to_string(),
            max_hp: boss.max_hp,
            phases: boss.phases.len(),
            attempt_limit: boss.attempt_limit,
            duration: humantime::format_duration(boss.duration).to_string(),
            milestones: boss.rewards.milestones.len(),
            exclusive: boss.rewards.exclusive.is_some(),
        })
        .collect()
}

/// List catalog entries.
///
/// # Errors
///
/// Returns a config error if the catalog fails to load, or a JSON error if
/// the listing cannot be serialized.
pub fn run(args: &BossesArgs) -> Result<(), RaidBossError> {
    let loaded = CatalogLoader::default().load(&args.config)?;
    for warning in &loaded.warnings {
        tracing::warn!(
            location = warning.location.as_deref().unwrap_or("<unknown>"),
            "{}",
            warning.message
        );
    }
    let rows = summarize(&loaded.catalog);

    match args.format {
        OutputFormat::Human => {
            println!(
                "{:<24} {:<28} {:>14} {:>6} {:>8} {:>10}",
                "ID", "NAME", "MAX HP", "PHASES", "ATTEMPTS", "WINDOW"
            );
            for row in &rows {
                println!(
                    "{:<24} {:<28} {:>14} {:>6} {:>8} {:>10}",
                    row.id, row.name, row.max_hp, row.phases, row.attempt_limit, row.duration
                );
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    #[test]
    fn test_summarize_catalog() {
        let raw = r"
bosses:
  - id: frost_wyrm
    name: Frost Wyrm
    max_hp: 5000
    attempt_limit: 3
    duration: 90m
    phases:
      - { phase: 1, hp_threshold: 1.0 }
      - { phase: 2, hp_threshold: 0.5 }
";
        let loaded = CatalogLoader::default()
            .load_str(raw, Path::new("inline.yaml"))
            .unwrap();
        let rows = summarize(&loaded.catalog);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "Frost Wyrm");
        assert_eq!(rows[0].phases, 2);
        assert_eq!(rows[0].duration, "1h 30m");
        assert!(!rows[0].exclusive);
    }
}
