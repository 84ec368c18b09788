//! Structured raid event stream.
//!
//! Discrete, typed lifecycle events serialized as newline-delimited JSON
//! (JSONL), each carrying a monotonically increasing sequence number.

use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

// ---------------------------------------------------------------------------
// Event variants
// ---------------------------------------------------------------------------

/// A raid lifecycle event.
///
/// Each variant is tagged with `"type"` when serialized so consumers can
/// dispatch on the event kind.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum RaidEvent {
    /// A raid instance was spawned.
    InstanceSpawned {
        /// When the instance was spawned.
        timestamp: DateTime<Utc>,
        /// Instance id.
        instance_id: String,
        /// Boss definition id.
        boss_id: String,
        /// Starting HP.
        max_hp: u64,
        /// When the encounter window closes.
        ends_at: DateTime<Utc>,
    },

    /// The boss entered a new phase.
    PhaseEntered {
        /// When the transition occurred.
        timestamp: DateTime<Utc>,
        /// Instance id.
        instance_id: String,
        /// Phase left.
        from_phase: u32,
        /// Phase entered.
        phase: u32,
        /// Entry effect label.
        effect: String,
        /// HP after the entry effect.
        hp_after_effect: u64,
        /// Participant whose attack crossed the threshold.
        triggered_by: String,
    },

    /// The boss was defeated.
    BossDefeated {
        /// When the killing blow landed.
        timestamp: DateTime<Utc>,
        /// Instance id.
        instance_id: String,
        /// Participant who landed the killing blow.
        final_blow_by: String,
        /// Number of participants.
        participants: usize,
    },

    /// The encounter window closed before the boss was defeated.
    RaidExpired {
        /// When expiry was detected.
        timestamp: DateTime<Utc>,
        /// Instance id.
        instance_id: String,
        /// HP left on the boss.
        remaining_hp: u64,
    },

    /// Final standings and rewards were computed.
    RaidFinalized {
        /// When finalization ran.
        timestamp: DateTime<Utc>,
        /// Instance id.
        instance_id: String,
        /// `defeated` or `expired`.
        outcome: String,
        /// Participants rewarded.
        participants: usize,
        /// Total damage credited.
        total_damage: u64,
    },

    /// Rewards were handed to the sink.
    RewardsDelivered {
        /// When delivery succeeded.
        timestamp: DateTime<Utc>,
        /// Instance id.
        instance_id: String,
        /// Attempts it took.
        attempts: u32,
    },

    /// Reward delivery gave up; the record is parked for redelivery.
    DeliveryFailed {
        /// When the last attempt failed.
        timestamp: DateTime<Utc>,
        /// Instance id.
        instance_id: String,
        /// Attempts made.
        attempts: u32,
        /// Last error from the sink.
        error: String,
    },
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Wraps a [`RaidEvent`] with its sequence number.
#[derive(Debug, Serialize)]
struct EventEnvelope {
    sequence: u64,
    #[serde(flatten)]
    event: RaidEvent,
}

// ---------------------------------------------------------------------------
// Emitter
// ---------------------------------------------------------------------------

/// Thread-safe, buffered JSONL event writer.
///
/// Serialization or I/O failures are dropped; emitting an event never
/// fails the raid operation that produced it.
pub struct EventEmitter {
    writer: Mutex<BufWriter<Box<dyn Write + Send>>>,
    sequence: AtomicU64,
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("sequence", &self.sequence.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl EventEmitter {
    /// Creates an emitter that writes to the given writer.
    #[must_use]
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(BufWriter::new(writer)),
            sequence: AtomicU64::new(0),
        }
    }

    /// Creates an emitter that discards all events.
    #[must_use]
    pub fn noop() -> Self {
        Self::new(Box::new(std::io::sink()))
    }

    /// Creates an emitter that writes to a file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be created.
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        let file = std::fs::File::create(path)?;
        Ok(Self::new(Box::new(file)))
    }

    /// Emits an event as a single JSONL line.
    pub fn emit(&self, event: RaidEvent) {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let envelope = EventEnvelope {
            sequence: seq,
            event,
        };

        if let Ok(mut w) = self.writer.lock() {
            if let Ok(line) = serde_json::to_string(&envelope) {
                let _ = writeln!(w, "{line}");
                let _ = w.flush();
            }
        }
    }

    /// Number of events emitted so far.
    #[must_use]
    pub fn event_count(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }
}
