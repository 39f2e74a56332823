use std::time::Duration;

use crate::error::{AppError, Result};
use crate::types::Game;

pub const TRADE_API_URL: &str = "https://www.pathofexile.com";
pub const RATES_API_URL: &str = "https://poe.ninja";

/// Maximum listing ids per fetch call. The marketplace rejects wider requests.
pub const FETCH_BATCH_SIZE: usize = 10;

/// Upper bound on how long `stop()` waits for the loop task to exit (seconds).
pub const STOP_TIMEOUT_SECS: u64 = 10;

/// Exchange-rate refresh interval (seconds). Independent of the polling interval.
pub const RATE_REFRESH_INTERVAL_SECS: u64 = 600;

/// Timeout applied to every outbound HTTP request (seconds).
pub const HTTP_TIMEOUT_SECS: u64 = 30;

/// Pause between consecutive marketplace calls within a cycle (milliseconds).
pub const MARKETPLACE_REQUEST_DELAY_MS: u64 = 500;

/// A cycle gap larger than this multiple of the polling interval is reported as a health warning.
pub const HEALTH_GAP_FACTOR: u32 = 2;

pub const NS_PER_SEC: i64 = 1_000_000_000;
pub const NS_PER_DAY: i64 = 86_400 * NS_PER_SEC;

#[derive(Debug, Clone)]
pub struct Config {
    /// Master switch for the scheduled loop (COLLECTOR_ENABLED).
    pub enabled: bool,
    pub league: String,
    pub game: Game,
    /// Polling interval in minutes (COLLECTOR_INTERVAL_MINUTES)
    pub interval_minutes: u64,
    /// Result ids read per template search (COLLECTOR_MAX_RESULTS). A ceiling, not adaptive.
    pub max_results_per_template: usize,
    /// Base types to poll (COLLECTOR_TEMPLATES, comma-separated).
    /// Example: "Hubris Circlet,Vaal Regalia,Stygian Vise"
    pub templates: Vec<String>,
    pub trade_api_url: String,
    pub rates_api_url: String,
    pub user_agent: String,
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            enabled: parse_bool(
                &std::env::var("COLLECTOR_ENABLED").unwrap_or_else(|_| "true".to_string()),
            )
            .ok_or_else(|| AppError::Config("COLLECTOR_ENABLED must be true or false".to_string()))?,
            league: std::env::var("COLLECTOR_LEAGUE").unwrap_or_else(|_| "Standard".to_string()),
            game: std::env::var("COLLECTOR_GAME")
                .unwrap_or_else(|_| "poe1".to_string())
                .parse::<Game>()?,
            interval_minutes: parse_positive(
                "COLLECTOR_INTERVAL_MINUTES",
                &std::env::var("COLLECTOR_INTERVAL_MINUTES").unwrap_or_else(|_| "15".to_string()),
            )?,
            max_results_per_template: parse_positive(
                "COLLECTOR_MAX_RESULTS",
                &std::env::var("COLLECTOR_MAX_RESULTS").unwrap_or_else(|_| "50".to_string()),
            )?,
            templates: std::env::var("COLLECTOR_TEMPLATES")
                .unwrap_or_default()
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            trade_api_url: std::env::var("TRADE_API_URL")
                .unwrap_or_else(|_| TRADE_API_URL.to_string()),
            rates_api_url: std::env::var("RATES_API_URL")
                .unwrap_or_else(|_| RATES_API_URL.to_string()),
            user_agent: std::env::var("TRADE_USER_AGENT").unwrap_or_else(|_| {
                format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
            }),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "collector.db".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
        })
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes.saturating_mul(60))
    }
}

fn parse_positive<T>(var: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr + Default + PartialOrd,
{
    raw.trim()
        .parse::<T>()
        .ok()
        .filter(|n| *n > T::default())
        .ok_or_else(|| AppError::Config(format!("{var} must be a positive integer")))
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        enabled: true,
        league: "Standard".to_string(),
        game: Game::Poe1,
        interval_minutes: 15,
        max_results_per_template: 50,
        templates: vec!["Hubris Circlet".to_string()],
        trade_api_url: TRADE_API_URL.to_string(),
        rates_api_url: RATES_API_URL.to_string(),
        user_agent: "trade-collector-tests".to_string(),
        log_level: "debug".to_string(),
        db_path: ":memory:".to_string(),
        api_port: 0,
    }
}
