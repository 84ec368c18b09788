//! Observability
//!
//! Logging, metrics, and the structured raid event stream.

pub mod events;
pub mod logging;
pub mod metrics;

pub use events::{EventEmitter, RaidEvent};
pub use logging::{LogFormat, init_logging};
pub use metrics::init_metrics;
