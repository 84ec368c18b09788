mod common;

use std::path::Path;

use common::run_cli;
use raidboss::config::ConfigProvider;
use raidboss::config::loader::CatalogLoader;
use raidboss::error::ConfigError;

fn validate_text(contents: &[u8]) -> std::process::Output {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let path = dir.path().join("catalog.yaml");
    std::fs::write(&path, contents).unwrap();
    run_cli(&["validate", path.to_str().unwrap()])
}

/// Empty catalog file should be rejected with a clear error.
#[test]
fn empty_file_rejected() {
    let output = validate_text(b"");
    assert_eq!(output.status.code(), Some(2));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("empty"), "report should mention 'empty': {stdout}");
}

/// Binary content is not a catalog.
#[test]
fn binary_content_rejected() {
    let output = validate_text(b"\x00\x01\x02\x03\xff\xfe\xfd\xfc");
    assert!(!output.status.success());
}

/// YAML syntax errors surface as parse errors.
#[test]
fn yaml_syntax_error_rejected() {
    let output = validate_text(b"bosses:\n  - id: [unclosed\n");
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("parse error"), "stderr: {stderr}");
}

/// Misspelled fields are rejected instead of silently ignored.
#[test]
fn unknown_field_rejected() {
    let raw = "
bosses:
  - id: frost_wyrm
    max_hp: 1000
    attempt_limt: 3
    duration: 1h
    phases: [{ phase: 1, hp_threshold: 1.0 }]
";
    let err = CatalogLoader::default()
        .load_str(raw, Path::new("typo.yaml"))
        .unwrap_err();
    match err {
        ConfigError::ParseError { message, .. } => assert!(message.contains("attempt_limt")),
        other => panic!("unexpected error: {other:?}"),
    }
}

/// Environment references are expanded before parsing.
#[test]
fn env_defaults_expand() {
    let raw = "
bosses:
  - id: ${RAIDBOSS_TEST_UNSET_BOSS_ID:-event_dragon}
    max_hp: ${RAIDBOSS_TEST_UNSET_HP:-25000}
    attempt_limit: 2
    duration: 45m
    phases: [{ phase: 1, hp_threshold: 1.0 }]
    rewards:
      ranking_tiers: [{ min_rank: 1, max_rank: 10 }]
";
    let loaded = CatalogLoader::default()
        .load_str(raw, Path::new("env.yaml"))
        .unwrap();
    let boss = loaded.catalog.boss_definition("event_dragon").unwrap();
    assert_eq!(boss.max_hp, 25_000);
    assert!(loaded.warnings.is_empty());
}

/// Overlapping tiers and unordered thresholds are reported together.
#[test]
fn all_issues_reported_together() {
    let raw = "
bosses:
  - id: messy
    max_hp: 100
    attempt_limit: 1
    duration: 1h
    phases:
      - { phase: 1, hp_threshold: 1.0 }
      - { phase: 2, hp_threshold: 0.3 }
      - { phase: 3, hp_threshold: 0.6 }
    rewards:
      ranking_tiers:
        - { min_rank: 1, max_rank: 5 }
        - { min_rank: 5, max_rank: 10 }
";
    let err = CatalogLoader::default()
        .load_str(raw, Path::new("messy.yaml"))
        .unwrap_err();
    let ConfigError::ValidationError { errors, .. } = err else {
        panic!("expected validation error");
    };
    assert!(errors.iter().any(|e| e.path.contains("phases")));
    assert!(errors.iter().any(|e| e.path.contains("ranking_tiers")));
}
