//! Logging setup.
//!
//! `-v` raises the level of `raidboss` targets only; dependencies stay at
//! `warn` unless `RAIDBOSS_LOG_LEVEL` supplies a full filter. Output goes to
//! stderr so `--format json` results on stdout stay machine-readable.

use std::io::IsTerminal;

use tracing_subscriber::EnvFilter;

use crate::cli::args::ColorChoice;

/// Log line encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Plain text, colored when the terminal allows it.
    #[default]
    Human,
    /// One JSON object per line.
    Json,
}

/// Filter directive for a `-v` count.
///
/// The raid core is one step quieter than the rest of the crate at each
/// level, since it logs per attack.
#[must_use]
pub fn filter_directive(verbosity: u8) -> String {
    let (crate_level, raid_level) = match verbosity {
        0 => ("warn", "warn"),
        1 => ("info", "info"),
        2 => ("debug", "info"),
        3 => ("debug", "debug"),
        _ => ("trace", "trace"),
    };
    format!("warn,raidboss={crate_level},raidboss::raid={raid_level}")
}

fn wants_ansi(color: ColorChoice) -> bool {
    match color {
        ColorChoice::Always => true,
        ColorChoice::Never => false,
        ColorChoice::Auto => {
            std::io::stderr().is_terminal() && std::env::var_os("NO_COLOR").is_none()
        }
    }
}

/// Installs the global subscriber.
///
/// A second call is a no-op.
pub fn init_logging(format: LogFormat, verbosity: u8, color: ColorChoice) {
    let filter = EnvFilter::try_from_env("RAIDBOSS_LOG_LEVEL")
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(verbosity)));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbosity >= 2)
        .with_writer(std::io::stderr);

    let installed = match format {
        LogFormat::Human => builder.with_ansi(wants_ansi(color)).try_init(),
        LogFormat::Json => builder.json().with_current_span(false).try_init(),
    };
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
