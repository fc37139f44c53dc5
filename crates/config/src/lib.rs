//! Configuration for the AgingOS analytics backend, loaded from the
//! environment via `dotenvy` + `std::env::var`.

use std::collections::HashMap;
use std::env;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// HTTP authentication mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    Off,
    ApiKey,
}

/// `tracing-subscriber` output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Top-level application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub bind_address: String,
    pub auth_mode: AuthMode,
    pub api_keys: Vec<String>,
    pub scheduler_enabled: bool,
    pub timezone: String,
    pub log_format: LogFormat,
    pub insights_base_url: Option<String>,
    pub insights_timeout_ms: u64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let auth_mode = match env_var_or("AGINGOS_AUTH_MODE", "off").as_str() {
            "off" => AuthMode::Off,
            "api_key" => AuthMode::ApiKey,
            other => {
                return Err(ConfigError::InvalidValue(
                    "AGINGOS_AUTH_MODE".to_string(),
                    other.to_string(),
                ));
            }
        };

        let api_keys = match auth_mode {
            AuthMode::ApiKey => {
                let raw = env_var("AGINGOS_API_KEYS")?;
                let keys: Vec<String> = raw
                    .split(',')
                    .map(|k| k.trim().to_string())
                    .filter(|k| !k.is_empty())
                    .collect();
                if keys.is_empty() {
                    return Err(ConfigError::InvalidValue(
                        "AGINGOS_API_KEYS".to_string(),
                        "must not be empty when AGINGOS_AUTH_MODE=api_key".to_string(),
                    ));
                }
                keys
            }
            AuthMode::Off => Vec::new(),
        };

        let log_format = match env_var_or("LOG_FORMAT", "pretty").as_str() {
            "pretty" => LogFormat::Pretty,
            "json" => LogFormat::Json,
            other => {
                return Err(ConfigError::InvalidValue(
                    "LOG_FORMAT".to_string(),
                    other.to_string(),
                ));
            }
        };

        Ok(Self {
            database_url: env_var("DATABASE_URL")?,
            bind_address: env_var_or("BIND_ADDRESS", "0.0.0.0:8080"),
            auth_mode,
            api_keys,
            scheduler_enabled: env_bool_or("SCHEDULER_ENABLED", true)?,
            timezone: env_var_or("AGINGOS_TIMEZONE", "Europe/Oslo"),
            log_format,
            insights_base_url: env::var("AGINGOS_INSIGHTS_BASE_URL").ok(),
            insights_timeout_ms: env_int_or("AGINGOS_INSIGHTS_TIMEOUT_MS", 2000)?.max(0) as u64,
        })
    }
}

/// Per-rule tunables, keyed by rule id (e.g. `"R-001"`).
#[derive(Debug, Clone, Default)]
pub struct RuleSettings {
    pub enabled_in_scheduler: bool,
    pub lookback_minutes: Option<i64>,
    pub expire_after_minutes: Option<i64>,
    pub params: HashMap<String, String>,
}

/// Scheduler cadence and per-rule settings, loaded from
/// `RULES__<ID>__*` environment keys.
#[derive(Debug, Clone)]
pub struct RuleConfig {
    pub scheduler_interval_minutes: i64,
    pub scheduler_default_subject_key: String,
    pub defaults_lookback_minutes: i64,
    pub defaults_expire_after_minutes: i64,
    pub rules: HashMap<String, RuleSettings>,
}

impl RuleConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        Ok(Self {
            scheduler_interval_minutes: env_int_or("SCHEDULER_INTERVAL_MINUTES", 1)?,
            scheduler_default_subject_key: env_var_or("SCHEDULER_DEFAULT_SUBJECT_KEY", "default"),
            defaults_lookback_minutes: env_int_or("DEFAULTS_LOOKBACK_MINUTES", 60)?,
            defaults_expire_after_minutes: env_int_or("DEFAULTS_EXPIRE_AFTER_MINUTES", 60)?,
            rules: parse_rule_settings_from_env(),
        })
    }

    /// `rules.<id>.lookback_minutes`, falling back to `defaults.lookback_minutes`.
    pub fn rule_lookback_minutes(&self, rule_id: &str) -> i64 {
        self.rules
            .get(rule_id)
            .and_then(|r| r.lookback_minutes)
            .unwrap_or(self.defaults_lookback_minutes)
    }

    /// `rules.<id>.expire_after_minutes`, falling back to `defaults.expire_after_minutes`.
    pub fn rule_expire_after_minutes(&self, rule_id: &str) -> i64 {
        self.rules
            .get(rule_id)
            .and_then(|r| r.expire_after_minutes)
            .unwrap_or(self.defaults_expire_after_minutes)
    }

    pub fn rule_enabled_in_scheduler(&self, rule_id: &str) -> bool {
        self.rules
            .get(rule_id)
            .map(|r| r.enabled_in_scheduler)
            .unwrap_or(false)
    }

    pub fn rule_param(&self, rule_id: &str, key: &str) -> Option<&str> {
        self.rules.get(rule_id)?.params.get(key).map(String::as_str)
    }
}

/// Scan the environment for `RULES__<ID>__*` keys and assemble per-rule
/// settings. `RULES__<ID>__PARAMS__<KEY>` feeds `RuleSettings::params`.
fn parse_rule_settings_from_env() -> HashMap<String, RuleSettings> {
    let mut rules: HashMap<String, RuleSettings> = HashMap::new();

    for (key, value) in env::vars() {
        let Some(rest) = key.strip_prefix("RULES__") else {
            continue;
        };
        let mut parts = rest.splitn(2, "__");
        let Some(rule_id) = parts.next() else { continue };
        let Some(field) = parts.next() else { continue };

        let entry = rules.entry(rule_id.to_string()).or_default();

        if let Some(param_key) = field.strip_prefix("PARAMS__") {
            entry.params.insert(param_key.to_ascii_lowercase(), value);
            continue;
        }

        match field {
            "ENABLED_IN_SCHEDULER" => {
                entry.enabled_in_scheduler = value.eq_ignore_ascii_case("true") || value == "1";
            }
            "LOOKBACK_MINUTES" => {
                entry.lookback_minutes = value.parse().ok();
            }
            "EXPIRE_AFTER_MINUTES" => {
                entry.expire_after_minutes = value.parse().ok();
            }
            _ => {}
        }
    }

    rules
}

fn env_var(name: &str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::MissingVar(name.to_string()))
}

fn env_var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_int_or(name: &str, default: i64) -> Result<i64, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidValue(name.to_string(), raw)),
        Err(_) => Ok(default),
    }
}

fn env_bool_or(name: &str, default: bool) -> Result<bool, ConfigError> {
    match env::var(name) {
        Ok(raw) => match raw.to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            _ => Err(ConfigError::InvalidValue(name.to_string(), raw)),
        },
        Err(_) => Ok(default),
    }
}
