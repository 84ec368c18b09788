//! `raidboss simulate`
//!
//! Spawns one instance of a catalog boss and drives it with concurrent
//! synthetic participants, then closes the window, delivers rewards to the
//! logging sink and prints the final standings.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinSet;

use crate::cli::args::{OutputFormat, SimulateArgs};
use crate::config::loader::CatalogLoader;
use crate::config::{ConfigProvider, RaidSettings};
use crate::error::{RaidBossError, RaidError};
use crate::observability::{EventEmitter, init_metrics};
use crate::raid::clock::{Clock, ManualClock};
use crate::raid::combat::{SeededSimulator, TeamDescriptor};
use crate::raid::controller::{AttackRequest, RaidController, SpawnRequest};
use crate::raid::delivery::{DeliveryWorker, LoggingSink};
use crate::raid::finalization::FinalizationRecord;
use crate::raid::instance::{GuildId, InstanceId, PlayerId};

/// Longest wait for the delivery worker to pick up the final record.
const DELIVERY_WAIT: Duration = Duration::from_secs(5);

/// Counts gathered from the attacker tasks.
#[derive(Debug, Default, Clone, Copy)]
struct AttackTally {
    accepted: u64,
    declined: u64,
}

/// Run a synthetic raid.
///
/// # Errors
///
/// Returns a usage error for an empty roster, or an error if the catalog
/// cannot be loaded, the boss cannot be spawned, the event file or metrics
/// listener cannot be opened, or output serialization fails.
pub async fn run(args: &SimulateArgs) -> Result<(), RaidBossError> {
    if args.players == 0 || args.team_size == 0 {
        return Err(RaidBossError::Usage(
            "--players and --team-size must be at least 1".to_string(),
        ));
    }

    if let Some(port) = args.metrics_port {
        init_metrics(Some(port))?;
    }

    let loaded = CatalogLoader::default().load(&args.config)?;
    let catalog: Arc<dyn ConfigProvider> = loaded.catalog;
    let events = Arc::new(match &args.events_file {
        Some(path) => EventEmitter::from_file(path)?,
        None => EventEmitter::noop(),
    });

    let settings = RaidSettings::default();
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let worker = Arc::new(
        DeliveryWorker::new(Arc::new(LoggingSink), settings.delivery.clone())
            .with_event_emitter(Arc::clone(&events)),
    );
    let controller = Arc::new(
        RaidController::new(
            catalog,
            Arc::new(SeededSimulator::new(args.seed)),
            clock.clone(),
        )
        .with_event_emitter(Arc::clone(&events))
        .with_delivery_worker(Arc::clone(&worker))
        .with_settings(settings.clone()),
    );
    let cancel = controller.cancellation_token();
    let delivery_task = controller
        .take_finalized_receiver()
        .map(|rx| worker.spawn(rx, cancel.clone()));
    let sweep_task = controller.start_sweep_task();

    let spawned = controller.spawn(&SpawnRequest::now(args.boss.clone()))?;
    let rounds = match args.rounds {
        Some(r) => r,
        None => controller
            .get_snapshot(&spawned.instance_id)?
            .attempt_limit,
    };
    tracing::info!(
        instance = %spawned.instance_id,
        players = args.players,
        rounds,
        seed = args.seed,
        "starting simulation"
    );

    let tally = run_attackers(&controller, &spawned.instance_id, args, rounds).await?;

    // Close the window for raids the participants could not finish.
    if controller.get_finalization(&spawned.instance_id).is_err() {
        clock.set(spawned.ends_at);
        clock.advance(Duration::from_secs(1));
        controller.sweep_expired(clock.now());
    }
    let record = controller.get_finalization(&spawned.instance_id)?;

    let delivered = tokio::time::timeout(DELIVERY_WAIT, async {
        while !worker.is_delivered(&record.instance_id) && worker.pending_count() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .is_ok()
        && worker.is_delivered(&record.instance_id);

    controller.shutdown();
    let _ = sweep_task.await;
    if let Some(task) = delivery_task {
        let _ = task.await;
    }

    match args.format {
        OutputFormat::Human => print_human(&record, tally, delivered, args.top),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&*record)?),
    }
    Ok(())
}

/// Spawns one task per participant and waits for all of them.
async fn run_attackers(
    controller: &Arc<RaidController>,
    instance_id: &InstanceId,
    args: &SimulateArgs,
    rounds: u32,
) -> Result<AttackTally, RaidBossError> {
    let mut tasks = JoinSet::new();

    for n in 0..args.players {
        let controller = Arc::clone(controller);
        let request = AttackRequest {
            instance_id: instance_id.clone(),
            player_id: PlayerId::new(format!("player-{n:03}")),
            display_name: format!("Player {n}"),
            guild_id: (args.guilds > 0).then(|| GuildId::new(format!("guild-{}", n % args.guilds))),
            team: TeamDescriptor::uniform(args.team_size, 400 + (u64::from(n) * 131) % 600),
        };

        tasks.spawn(async move {
            let mut tally = AttackTally::default();
            for _ in 0..rounds {
                let response = controller.attack(&request)?;
                if response.accepted {
                    tally.accepted += 1;
                } else {
                    tally.declined += 1;
                    break;
                }
                tokio::task::yield_now().await;
            }
            Ok::<_, RaidError>(tally)
        });
    }

    let mut total = AttackTally::default();
    while let Some(joined) = tasks.join_next().await {
        let tally = joined.map_err(|e| RaidBossError::Io(std::io::Error::other(e)))??;
        total.accepted += tally.accepted;
        total.declined += tally.declined;
    }
    Ok(total)
}

fn print_human(record: &FinalizationRecord, tally: AttackTally, delivered: bool, top: usize) {
    println!(
        "{} ({}): {} with {} HP left in phase {}",
        record.boss_id, record.instance_id, record.outcome, record.final_hp, record.final_phase
    );
    println!(
        "attacks: {} accepted, {} declined; total damage {}; {} phase transitions",
        tally.accepted,
        tally.declined,
        record.total_damage,
        record.transitions.len()
    );

    println!();
    println!("{:>4}  {:<14} {:<10} {:>12} {:>10}", "RANK", "PLAYER", "GUILD", "DAMAGE", "BEST HIT");
    for row in record.leaderboard.iter().take(top) {
        println!(
            "{:>4}  {:<14} {:<10} {:>12} {:>10}",
            row.rank,
            row.player_id,
            row.guild_id.as_ref().map_or("-", GuildId::as_str),
            row.total_damage,
            row.highest_hit
        );
    }

    if !record.guild_leaderboard.is_empty() {
        println!();
        println!("{:>4}  {:<14} {:>12} {:>8}", "RANK", "GUILD", "DAMAGE", "MEMBERS");
        for row in record.guild_leaderboard.iter().take(top) {
            println!(
                "{:>4}  {:<14} {:>12} {:>8}",
                row.rank, row.display_name, row.total_damage, row.participant_count
            );
        }
    }

    println!();
    for bundle in record.rewards.players.iter().take(top) {
        let items: Vec<String> = bundle
            .items
            .iter()
            .map(|i| format!("{}x{}", i.item, i.quantity))
            .collect();
        let exclusive = if bundle.exclusive { " [exclusive]" } else { "" };
        println!("#{} {}: {}{exclusive}", bundle.rank, bundle.player_id, items.join(", "));
    }
    println!();
    println!(
        "rewards {}",
        if delivered { "delivered" } else { "pending redelivery" }
    );
}
