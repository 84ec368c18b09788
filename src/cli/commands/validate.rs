//! `raidboss validate`
//!
//! Loads each catalog through the normal loading pipeline and reports every
//! issue found, without spawning anything.

use std::path::Path;

use serde::Serialize;

use crate::cli::args::{OutputFormat, ValidateArgs};
use crate::config::loader::CatalogLoader;
use crate::error::{ConfigError, RaidBossError, Severity, ValidationIssue};

/// Validation outcome for one file.
#[derive(Debug, Serialize)]
pub struct FileReport {
    /// File that was checked
    pub file: String,
    /// Whether the file passed
    pub valid: bool,
    /// Number of boss definitions loaded
    pub bosses: usize,
    /// Error messages
    pub errors: Vec<String>,
    /// Warning messages
    pub warnings: Vec<String>,
}

/// Validates one catalog file.
///
/// Returns the report and, if the file failed, the error to surface.
#[must_use]
pub fn check_file(
    loader: &CatalogLoader,
    path: &Path,
    strict: bool,
) -> (FileReport, Option<ConfigError>) {
    let file = path.display().to_string();
    match loader.load(path) {
        Ok(result) => {
            let warnings: Vec<String> = result
                .warnings
                .iter()
                .map(|w| match &w.location {
                    Some(loc) => format!("{} at {loc}", w.message),
                    None => w.message.clone(),
                })
                .collect();

            let failure = (strict && !result.warnings.is_empty()).then(|| {
                ConfigError::ValidationError {
                    path: file.clone(),
                    errors: result
                        .warnings
                        .iter()
                        .map(|w| ValidationIssue {
                            path: w.location.clone().unwrap_or_default(),
                            message: w.message.clone(),
                            severity: Severity::Warning,
                        })
                        .collect(),
                }
            });

            let report = FileReport {
                file,
                valid: failure.is_none(),
                bosses: result.catalog.len(),
                errors: vec![],
                warnings,
            };
            (report, failure)
        }
        Err(err) => {
            let errors = match &err {
                ConfigError::ValidationError { errors, .. } => {
                    errors.iter().map(ToString::to_string).collect()
                }
                other => vec![other.to_string()],
            };
            let report = FileReport {
                file,
                valid: false,
                bosses: 0,
                errors,
                warnings: vec![],
            };
            (report, Some(err))
        }
    }
}

/// Validate catalog files.
///
/// Every file is checked and reported before the first failure is returned.
///
/// # Errors
///
/// Returns the first file's [`ConfigError`] if any file fails validation,
/// or a JSON error if the report cannot be serialized.
pub fn run(args: &ValidateArgs) -> Result<(), RaidBossError> {
    let loader = CatalogLoader::default();
    let mut reports = Vec::with_capacity(args.files.len());
    let mut first_failure = None;

    for path in &args.files {
        tracing::info!(file = %path.display(), "validating catalog");
        let (report, failure) = check_file(&loader, path, args.strict);
        if first_failure.is_none() {
            first_failure = failure;
        }
        reports.push(report);
    }

    match args.format {
        OutputFormat::Human => {
            for report in &reports {
                if report.valid {
                    println!("ok    {} ({} bosses)", report.file, report.bosses);
                } else {
                    println!("FAIL  {}", report.file);
                }
                for error in &report.errors {
                    println!("      {error}");
                }
                for warning in &report.warnings {
                    println!("      warning: {warning}");
                }
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&reports)?),
    }

    first_failure.map_or(Ok(()), |err| Err(err.into()))
}
