//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::path::PathBuf;
use std::process::Output;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use raidboss::config::LoadedCatalog;
use raidboss::config::loader::CatalogLoader;
use raidboss::raid::{
    AttackRequest, CombatContext, CombatOutcome, CombatSimulator, GuildId, InstanceId,
    ManualClock, PlayerId, RaidController, TeamDescriptor,
};

/// Deals exactly the team's total power, with no deaths or debuffs.
#[derive(Debug, Default)]
pub struct ExactDamage;

impl CombatSimulator for ExactDamage {
    fn simulate(&self, ctx: &CombatContext<'_>) -> CombatOutcome {
        let power = ctx.team.total_power();
        CombatOutcome {
            total_damage: power,
            highest_hit: power,
            ..CombatOutcome::default()
        }
    }

    fn name(&self) -> &'static str {
        "exact"
    }
}

/// Path to a file under `tests/fixtures`.
pub fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// The shared fixture catalog.
pub fn catalog() -> Arc<LoadedCatalog> {
    CatalogLoader::default()
        .load(&fixture("catalog.yaml"))
        .expect("fixture catalog should load")
        .catalog
}

/// Fixed start time for manual clocks.
pub fn start() -> DateTime<Utc> {
    DateTime::from_timestamp(1_750_000_000, 0).expect("valid timestamp")
}

/// Controller over the fixture catalog with exact damage and a manual clock.
pub fn controller() -> (RaidController, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(start()));
    let controller = RaidController::new(catalog(), Arc::new(ExactDamage), clock.clone());
    (controller, clock)
}

/// Attack request dealing `damage` under [`ExactDamage`].
pub fn hit(instance: &InstanceId, player: &str, guild: Option<&str>, damage: u64) -> AttackRequest {
    AttackRequest {
        instance_id: instance.clone(),
        player_id: PlayerId::new(player),
        display_name: player.to_uppercase(),
        guild_id: guild.map(GuildId::new),
        team: TeamDescriptor::uniform(1, damage),
    }
}

/// Runs the `raidboss` binary with `args`.
pub fn run_cli(args: &[&str]) -> Output {
    std::process::Command::new(env!("CARGO_BIN_EXE_raidboss"))
        .args(args)
        .env_remove("RAIDBOSS_LOG_LEVEL")
        .output()
        .expect("failed to run raidboss")
}
