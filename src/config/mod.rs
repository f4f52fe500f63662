//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Wall-clock length of one tick
    pub tick_interval: Duration,
    /// Simulated seconds each tick advances a match
    pub sim_seconds_per_tick: u32,
    pub scheduler_interval: Duration,
    /// Matches stepped concurrently within a tick
    pub tick_workers: usize,

    /// Supabase backend; in-memory store when absent
    pub supabase: Option<SupabaseConfig>,

    /// Settlement webhook; settlement is only logged when absent
    pub settlement_webhook: Option<WebhookConfig>,

    /// Bearer key for mutating routes; open when absent
    pub admin_api_key: Option<String>,
    /// Allowed client origins for CORS, comma-separated
    pub client_origin: String,
}

#[derive(Clone, Debug)]
pub struct SupabaseConfig {
    pub url: String,
    /// Service role key (bypasses RLS - server only!)
    pub service_role_key: String,
}

#[derive(Clone, Debug)]
pub struct WebhookConfig {
    pub url: String,
    pub secret: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Render provides PORT env var, fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        let supabase = match (optional("SUPABASE_URL"), optional("SUPABASE_SERVICE_ROLE_KEY")) {
            (Some(url), Some(service_role_key)) => Some(SupabaseConfig {
                url,
                service_role_key,
            }),
            (None, None) => None,
            (Some(_), None) => return Err(ConfigError::Missing("SUPABASE_SERVICE_ROLE_KEY")),
            (None, Some(_)) => return Err(ConfigError::Missing("SUPABASE_URL")),
        };

        let settlement_webhook = match optional("SETTLEMENT_WEBHOOK_URL") {
            Some(url) => Some(WebhookConfig {
                url,
                secret: optional("SETTLEMENT_WEBHOOK_SECRET")
                    .ok_or(ConfigError::Missing("SETTLEMENT_WEBHOOK_SECRET"))?,
            }),
            None => None,
        };

        let tick_workers: usize = parsed("TICK_WORKERS", 8)?;
        if tick_workers == 0 {
            return Err(ConfigError::Invalid("TICK_WORKERS"));
        }

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            tick_interval: Duration::from_millis(parsed("TICK_INTERVAL_MS", 1000)?),
            sim_seconds_per_tick: parsed("SIM_SECONDS_PER_TICK", 10)?,
            scheduler_interval: Duration::from_millis(parsed("SCHEDULER_INTERVAL_MS", 5000)?),
            tick_workers,

            supabase,
            settlement_webhook,

            admin_api_key: optional("ADMIN_API_KEY"),
            client_origin: env::var("CLIENT_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
        })
    }
}

/// Unset and blank are the same thing
fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parsed<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match optional(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(key)),
        None => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),
}
