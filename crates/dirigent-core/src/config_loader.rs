// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! TOML/environment configuration loading (feature `config-loader`).
//!
//! Layering, lowest to highest precedence: built-in defaults, the TOML
//! file, then `DIRIGENT_*` environment variables.  Every field is optional
//! at every layer; the merged result is validated once at the end.

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::config::{Config, EvidenceThresholds, LevelThresholds};

/// Configuration loading failure.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// On-disk representation.  All fields optional; absent fields keep their
/// defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    prime_content: Option<String>,
    daily_budget: Option<u64>,
    approval_ttl_ms: Option<u64>,
    rejection_cooldown_ms: Option<u64>,
    delta_flush_size: Option<usize>,
    top_k: Option<usize>,
    min_similarity: Option<f32>,
    #[serde(default)]
    level_thresholds: ThresholdsFile,
    #[serde(default)]
    evidence_thresholds: EvidenceFile,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ThresholdsFile {
    optimized: Option<f64>,
    lightweight: Option<f64>,
    emergency: Option<f64>,
    skeleton: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct EvidenceFile {
    tertiary: Option<u32>,
    secondary: Option<u32>,
}

/// Load configuration from a TOML file, then apply `DIRIGENT_*` environment
/// overrides.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let raw = std::fs::read_to_string(path)?;
    let file: ConfigFile = toml::from_str(&raw)?;
    let config = apply_env(merge(Config::default(), file));
    validate(&config)?;
    Ok(config)
}

/// Environment overrides applied on top of built-in defaults, with no file.
pub fn from_env() -> Result<Config, ConfigError> {
    let config = apply_env(Config::default());
    validate(&config)?;
    Ok(config)
}

fn merge(mut config: Config, file: ConfigFile) -> Config {
    if let Some(v) = file.prime_content {
        config.prime_content = v;
    }
    if let Some(v) = file.daily_budget {
        config.daily_budget = v;
    }
    if let Some(v) = file.approval_ttl_ms {
        config.approval_ttl_ms = v;
    }
    if let Some(v) = file.rejection_cooldown_ms {
        config.rejection_cooldown_ms = v;
    }
    if let Some(v) = file.delta_flush_size {
        config.delta_flush_size = v;
    }
    if let Some(v) = file.top_k {
        config.top_k = v;
    }
    if let Some(v) = file.min_similarity {
        config.min_similarity = v;
    }

    let defaults = LevelThresholds::default();
    config.level_thresholds = LevelThresholds {
        optimized: file.level_thresholds.optimized.unwrap_or(defaults.optimized),
        lightweight: file.level_thresholds.lightweight.unwrap_or(defaults.lightweight),
        emergency: file.level_thresholds.emergency.unwrap_or(defaults.emergency),
        skeleton: file.level_thresholds.skeleton.unwrap_or(defaults.skeleton),
    };

    let defaults = EvidenceThresholds::default();
    config.evidence_thresholds = EvidenceThresholds {
        tertiary: file.evidence_thresholds.tertiary.unwrap_or(defaults.tertiary),
        secondary: file.evidence_thresholds.secondary.unwrap_or(defaults.secondary),
    };

    config
}

fn apply_env(mut config: Config) -> Config {
    if let Some(v) = env_var("DIRIGENT_PRIME_CONTENT") {
        config.prime_content = v;
    }
    if let Some(v) = parse_env("DIRIGENT_DAILY_BUDGET") {
        config.daily_budget = v;
    }
    if let Some(v) = parse_env("DIRIGENT_APPROVAL_TTL_MS") {
        config.approval_ttl_ms = v;
    }
    if let Some(v) = parse_env("DIRIGENT_REJECTION_COOLDOWN_MS") {
        config.rejection_cooldown_ms = v;
    }
    if let Some(v) = parse_env("DIRIGENT_DELTA_FLUSH_SIZE") {
        config.delta_flush_size = v;
    }
    if let Some(v) = parse_env("DIRIGENT_TOP_K") {
        config.top_k = v;
    }
    if let Some(v) = parse_env("DIRIGENT_MIN_SIMILARITY") {
        config.min_similarity = v;
    }
    config
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = env_var(name)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(name, raw = %raw, "unparseable environment override ignored");
            None
        }
    }
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.daily_budget == 0 {
        return Err(ConfigError::Invalid("daily_budget must be positive".into()));
    }
    if config.prime_content.trim().is_empty() {
        return Err(ConfigError::Invalid("prime_content must not be empty".into()));
    }

    let t = &config.level_thresholds;
    let ladder = [t.optimized, t.lightweight, t.emergency, t.skeleton];
    if ladder.iter().any(|v| !(0.0..=1.0).contains(v)) {
        return Err(ConfigError::Invalid(
            "level thresholds must lie within 0.0..=1.0".into(),
        ));
    }
    if ladder.windows(2).any(|pair| pair[0] >= pair[1]) {
        return Err(ConfigError::Invalid(
            "level thresholds must be strictly increasing".into(),
        ));
    }

    if !(0.0..=1.0).contains(&config.min_similarity) {
        return Err(ConfigError::Invalid(
            "min_similarity must lie within 0.0..=1.0".into(),
        ));
    }
    if config.top_k == 0 {
        return Err(ConfigError::Invalid("top_k must be positive".into()));
    }
    if config.delta_flush_size == 0 {
        return Err(ConfigError::Invalid("delta_flush_size must be positive".into()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
