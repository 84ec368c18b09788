//! Boss catalog loader
//!
//! Loading pipeline:
//! 1. Size check
//! 2. Environment variable expansion (on raw text)
//! 3. YAML parsing and typed deserialization
//! 4. Validation (all issues collected)
//! 5. Freeze into an `Arc<LoadedCatalog>`

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::config::schema::BossCatalog;
use crate::config::validation::Validator;
use crate::config::{LoadedCatalog, env_or};
use crate::error::ConfigError;

// ============================================================================
// Public API
// ============================================================================

/// Limits applied while loading a catalog.
#[derive(Debug, Clone)]
pub struct CatalogLimits {
    /// Maximum number of boss definitions.
    pub max_bosses: usize,

    /// Maximum number of phases per boss.
    pub max_phases: usize,

    /// Longest allowed encounter window.
    pub max_duration: Duration,

    /// Maximum catalog file size in bytes.
    pub max_file_size: usize,
}

impl Default for CatalogLimits {
    fn default() -> Self {
        Self {
            max_bosses: env_or("RAIDBOSS_MAX_BOSSES", 500),
            max_phases: env_or("RAIDBOSS_MAX_PHASES", 32),
            max_duration: Duration::from_secs(env_or("RAIDBOSS_MAX_DURATION_SECS", 30 * 86_400)),
            max_file_size: env_or("RAIDBOSS_MAX_CATALOG_SIZE", 4 * 1024 * 1024),
        }
    }
}

/// Result of loading a catalog file.
#[derive(Debug)]
pub struct LoadResult {
    /// The loaded and validated catalog.
    pub catalog: Arc<LoadedCatalog>,

    /// Warnings encountered during loading.
    pub warnings: Vec<LoadWarning>,
}

/// Warning during catalog loading.
#[derive(Debug, Clone)]
pub struct LoadWarning {
    /// Warning message.
    pub message: String,

    /// Location where the warning occurred.
    pub location: Option<String>,
}

/// Loads boss catalogs from YAML.
#[derive(Debug, Default)]
pub struct CatalogLoader {
    limits: CatalogLimits,
}

impl CatalogLoader {
    /// Creates a loader with the given limits.
    #[must_use]
    pub const fn new(limits: CatalogLimits) -> Self {
        Self { limits }
    }

    /// Loads and validates the catalog at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, exceeds the size limit,
    /// references an unset required environment variable, fails to parse,
    /// or fails validation.
    pub fn load(&self, path: &Path) -> Result<LoadResult, ConfigError> {
        let metadata = std::fs::metadata(path).map_err(|_| ConfigError::MissingFile {
            path: path.to_path_buf(),
        })?;
        let size = usize::try_from(metadata.len()).unwrap_or(usize::MAX);
        if size > self.limits.max_file_size {
            return Err(ConfigError::TooLarge {
                size,
                limit: self.limits.max_file_size,
            });
        }

        let raw = std::fs::read_to_string(path).map_err(|_| ConfigError::MissingFile {
            path: path.to_path_buf(),
        })?;

        tracing::debug!(path = %path.display(), bytes = size, "loading boss catalog");
        self.load_str(&raw, path)
    }

    /// Loads and validates a catalog from an in-memory string.
    ///
    /// `origin` is used only for error messages.
    ///
    /// # Errors
    ///
    /// Same as [`load`](Self::load), minus file access failures.
    pub fn load_str(&self, raw: &str, origin: &Path) -> Result<LoadResult, ConfigError> {
        let raw = raw.strip_prefix('\u{feff}').unwrap_or(raw);
        if raw.len() > self.limits.max_file_size {
            return Err(ConfigError::TooLarge {
                size: raw.len(),
                limit: self.limits.max_file_size,
            });
        }

        let mut warnings = Vec::new();
        let expanded = expand_env(raw, origin, &mut warnings)?;

        if expanded.trim().is_empty() {
            return Err(ConfigError::ParseError {
                path: origin.to_path_buf(),
                line: None,
                message: "Catalog file is empty".to_string(),
            });
        }

        let catalog: BossCatalog =
            serde_yaml::from_str(&expanded).map_err(|e| ConfigError::ParseError {
                path: origin.to_path_buf(),
                line: e.location().map(|l| l.line()),
                message: e.to_string(),
            })?;

        let result = Validator::new().validate(&catalog, &self.limits);
        if result.has_errors() {
            return Err(ConfigError::ValidationError {
                path: origin.display().to_string(),
                errors: result.errors,
            });
        }
        warnings.extend(result.warnings.into_iter().map(|issue| LoadWarning {
            message: issue.message,
            location: Some(issue.path),
        }));

        tracing::info!(
            path = %origin.display(),
            bosses = catalog.bosses.len(),
            warnings = warnings.len(),
            "boss catalog loaded"
        );

        Ok(LoadResult {
            catalog: Arc::new(LoadedCatalog::new(catalog.bosses)),
            warnings,
        })
    }
}

// ============================================================================
// Environment Expansion
// ============================================================================

/// Expands `${VAR}`, `${VAR:-default}` and `$$` in raw catalog text.
///
/// An unset `${VAR}` without a default expands to nothing and records a
/// warning; `${VAR:?message}` fails with [`ConfigError::EnvVarNotSet`].
fn expand_env(
    raw: &str,
    origin: &Path,
    warnings: &mut Vec<LoadWarning>,
) -> Result<String, ConfigError> {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;

    while let Some(idx) = rest.find('$') {
        out.push_str(&rest[..idx]);
        let after = &rest[idx + 1..];

        if let Some(tail) = after.strip_prefix('$') {
            out.push('$');
            rest = tail;
            continue;
        }

        let Some(body_and_tail) = after.strip_prefix('{') else {
            out.push('$');
            rest = after;
            continue;
        };

        let Some(close) = body_and_tail.find('}') else {
            return Err(ConfigError::ParseError {
                path: origin.to_path_buf(),
                line: None,
                message: "Unclosed environment variable reference".to_string(),
            });
        };

        let spec = &body_and_tail[..close];
        out.push_str(&resolve_var(spec, origin, warnings)?);
        rest = &body_and_tail[close + 1..];
    }

    out.push_str(rest);
    Ok(out)
}

fn resolve_var(
    spec: &str,
    origin: &Path,
    warnings: &mut Vec<LoadWarning>,
) -> Result<String, ConfigError> {
    let (name, fallback) = spec
        .split_once(":-")
        .map_or((spec, None), |(n, d)| (n, Some(d)));
    let (name, required) = name
        .split_once(":?")
        .map_or((name, None), |(n, m)| (n, Some(m)));

    if let Ok(value) = std::env::var(name) {
        return Ok(value);
    }
    if let Some(default) = fallback {
        return Ok(default.to_string());
    }
    if let Some(message) = required {
        return Err(ConfigError::EnvVarNotSet {
            var: name.to_string(),
            location: message.to_string(),
        });
    }

    warnings.push(LoadWarning {
        message: format!("Environment variable '{name}' is not set, using empty string"),
        location: Some(origin.display().to_string()),
    });
    Ok(String::new())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::path::PathBuf;

    use super::*;
    use crate::config::ConfigProvider;

    const CATALOG: &str = r"
bosses:
  - id: frost_wyrm
    max_hp: ${RAIDBOSS_TEST_WYRM_HP:-500000}
    attempt_limit: 3
    duration: 1h
    phases:
      - { phase: 1, hp_threshold: 1.0 }
      - { phase: 2, hp_threshold: 0.5 }
    rewards:
      ranking_tiers:
        - { min_rank: 1, max_rank: 3 }
";

    fn origin() -> PathBuf {
        PathBuf::from("catalog.yaml")
    }

    #[test]
    fn test_load_str_with_default_expansion() {
        let result = CatalogLoader::default().load_str(CATALOG, &origin()).unwrap();
        let boss = result.catalog.boss_definition("frost_wyrm").unwrap();
        assert_eq!(boss.max_hp, 500_000);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_expand_escaped_dollar() {
        let mut warnings = Vec::new();
        let out = expand_env("price: $$5", &origin(), &mut warnings).unwrap();
        assert_eq!(out, "price: $5");
    }

    #[test]
    fn test_expand_bare_dollar_kept() {
        let mut warnings = Vec::new();
        let out = expand_env("a $b c", &origin(), &mut warnings).unwrap();
        assert_eq!(out, "a $b c");
    }

    #[test]
    fn test_expand_missing_var_warns() {
        let mut warnings = Vec::new();
        let out = expand_env("x: ${RAIDBOSS_TEST_SURELY_UNSET}", &origin(), &mut warnings).unwrap();
        assert_eq!(out, "x: ");
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_expand_required_var_fails() {
        let mut warnings = Vec::new();
        let err = expand_env(
            "x: ${RAIDBOSS_TEST_SURELY_UNSET:?boss hp}",
            &origin(),
            &mut warnings,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::EnvVarNotSet { .. }));
    }

    #[test]
    fn test_expand_unclosed_fails() {
        let mut warnings = Vec::new();
        let err = expand_env("x: ${OOPS", &origin(), &mut warnings).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn test_empty_catalog_rejected() {
        let err = CatalogLoader::default().load_str("  \n", &origin()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn test_validation_failure_surfaces_all_issues() {
        let raw = r"
bosses:
  - id: broken
    max_hp: 0
    attempt_limit: 0
    duration: 1h
    phases:
      - { phase: 1, hp_threshold: 1.0 }
";
        let err = CatalogLoader::default().load_str(raw, &origin()).unwrap_err();
        match err {
            ConfigError::ValidationError { errors, .. } => assert_eq!(errors.len(), 2),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_size_limit() {
        let loader = CatalogLoader::new(CatalogLimits {
            max_file_size: 8,
            ..CatalogLimits::default()
        });
        let err = loader.load_str(CATALOG, &origin()).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge { .. }));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(CATALOG.as_bytes()).unwrap();
        let result = CatalogLoader::default().load(file.path()).unwrap();
        assert_eq!(result.catalog.len(), 1);
    }

    #[test]
    fn test_missing_file() {
        let err = CatalogLoader::default()
            .load(Path::new("/nonexistent/catalog.yaml"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingFile { .. }));
    }
}
