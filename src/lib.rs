//! `raidboss` - World boss raid coordinator
//!
//! This library manages shared boss health pools attacked concurrently by
//! many participants, advances encounters through HP-gated phases, ranks
//! contribution per player and per guild, and resolves rewards exactly once
//! when an encounter ends.

pub mod cli;
pub mod config;
pub mod error;
pub mod observability;
pub mod raid;
