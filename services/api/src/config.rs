//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use chrono::Duration;
use homecare_core::domain::DEFAULT_RETRY_LIMIT;
use homecare_core::jobs::{AnalyticsConfig, DEFAULT_STALE_AFTER_MINUTES};
use homecare_core::recipes::DEFAULT_CANDIDATE_LIMIT;
use std::net::SocketAddr;
use std::str::FromStr;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub log_level: Level,
    pub openai_api_key: Option<String>,
    pub recipe_model: String,
    pub pin_retry_limit: u8,
    pub recipe_candidate_limit: u32,
    pub min_support: f64,
    pub job_stale_after_minutes: i64,
    pub cors_origin: String,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // --- Load Server and Database Settings ---
        let bind_address: SocketAddr =
            parse_or(&lookup, "BIND_ADDRESS", "0.0.0.0:3000".parse().ok())?;

        let database_url = lookup("DATABASE_URL")
            .ok_or_else(|| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Load API Keys (as optional) ---
        let openai_api_key = lookup("OPENAI_API_KEY").filter(|key| !key.trim().is_empty());
        let recipe_model = lookup("RECIPE_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string());

        // --- Load Domain Settings ---
        let pin_retry_limit: u8 = parse_or(&lookup, "PIN_RETRY_LIMIT", Some(DEFAULT_RETRY_LIMIT))?;
        if !(1..=9).contains(&pin_retry_limit) {
            return Err(ConfigError::InvalidValue(
                "PIN_RETRY_LIMIT".to_string(),
                format!("{} is outside 1..=9", pin_retry_limit),
            ));
        }

        let recipe_candidate_limit: u32 =
            parse_or(&lookup, "RECIPE_CANDIDATE_LIMIT", Some(DEFAULT_CANDIDATE_LIMIT))?;

        let min_support: f64 = parse_or(&lookup, "MIN_SUPPORT", Some(0.0))?;
        if !(0.0..=1.0).contains(&min_support) {
            return Err(ConfigError::InvalidValue(
                "MIN_SUPPORT".to_string(),
                format!("{} is outside 0..=1", min_support),
            ));
        }

        let job_stale_after_minutes: i64 = parse_or(
            &lookup,
            "JOB_STALE_AFTER_MINUTES",
            Some(DEFAULT_STALE_AFTER_MINUTES),
        )?;
        if job_stale_after_minutes <= 0 {
            return Err(ConfigError::InvalidValue(
                "JOB_STALE_AFTER_MINUTES".to_string(),
                "must be positive".to_string(),
            ));
        }

        let cors_origin =
            lookup("CORS_ORIGIN").unwrap_or_else(|| "http://localhost:3000".to_string());

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            openai_api_key,
            recipe_model,
            pin_retry_limit,
            recipe_candidate_limit,
            min_support,
            job_stale_after_minutes,
            cors_origin,
        })
    }

    pub fn analytics(&self) -> AnalyticsConfig {
        AnalyticsConfig {
            candidate_limit: self.recipe_candidate_limit,
            min_support: self.min_support,
            stale_after: Duration::minutes(self.job_stale_after_minutes),
        }
    }
}

/// Parses `name` if set, otherwise falls back to `default`.
fn parse_or<F, T>(lookup: &F, name: &str, default: Option<T>) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        None => default.ok_or_else(|| ConfigError::MissingVar(name.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_only_the_database_is_set() {
        let config = load(&[("DATABASE_URL", "postgres://localhost/homecare")]).expect("config");
        assert_eq!(config.bind_address.port(), 3000);
        assert_eq!(config.log_level, Level::INFO);
        assert_eq!(config.pin_retry_limit, 3);
        assert_eq!(config.recipe_candidate_limit, 50);
        assert_eq!(config.recipe_model, "gpt-4o-mini");
        assert!(config.openai_api_key.is_none());
        assert_eq!(config.analytics().stale_after, Duration::minutes(120));
    }

    #[test]
    fn database_url_is_required() {
        assert_eq!(
            load(&[]).expect_err("missing"),
            ConfigError::MissingVar("DATABASE_URL".to_string())
        );
    }

    #[rstest]
    #[case("PIN_RETRY_LIMIT", "0")]
    #[case("PIN_RETRY_LIMIT", "10")]
    #[case("PIN_RETRY_LIMIT", "three")]
    #[case("MIN_SUPPORT", "1.5")]
    #[case("JOB_STALE_AFTER_MINUTES", "0")]
    #[case("BIND_ADDRESS", "localhost")]
    #[case("RUST_LOG", "loud")]
    fn out_of_range_values_are_rejected(#[case] name: &str, #[case] value: &str) {
        let err = load(&[("DATABASE_URL", "postgres://db"), (name, value)]).expect_err("invalid");
        assert!(matches!(err, ConfigError::InvalidValue(var, _) if var == name));
    }

    #[test]
    fn overrides_are_honoured() {
        let config = load(&[
            ("DATABASE_URL", "postgres://db"),
            ("PIN_RETRY_LIMIT", "5"),
            ("MIN_SUPPORT", "0.02"),
            ("RECIPE_CANDIDATE_LIMIT", "10"),
        ])
        .expect("config");
        assert_eq!(config.pin_retry_limit, 5);
        let analytics = config.analytics();
        assert_eq!(analytics.candidate_limit, 10);
        assert_eq!(analytics.min_support, 0.02);
    }
}
