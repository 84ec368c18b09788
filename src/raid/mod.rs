//! Raid core
//!
//! Instance state, the contribution ledger, phase engine, ranking, reward
//! calculation, finalization and delivery, tied together by
//! [`RaidController`].

pub mod clock;
pub mod combat;
pub mod controller;
pub mod delivery;
pub mod finalization;
pub mod instance;
pub mod ledger;
pub mod phase;
pub mod ranking;
pub mod registry;
pub mod reward;

pub use clock::{Clock, ManualClock, SystemClock};
pub use combat::{
    CombatContext, CombatOutcome, CombatSimulator, HeroDescriptor, SeededSimulator,
    TeamDescriptor, TeamPowerSimulator,
};
pub use controller::{
    AttackRequest, AttackResponse, RaidController, RejectReason, SpawnRequest, SpawnResponse,
    SweepReport,
};
pub use delivery::{DeliveryWorker, LoggingSink, RedeliveryReport, RewardSink};
pub use finalization::FinalizationRecord;
pub use instance::{GuildId, InstanceId, InstanceStatus, PlayerId, RaidSnapshot, RaidStatus};
pub use ranking::{GuildDirectory, IdGuildDirectory, PlayerRank, RankedGuild, RankedPlayer};
pub use reward::{InMemoryMilestoneHistory, MilestoneHistory, RewardSet};
