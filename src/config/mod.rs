//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use rand::RngCore;
use tracing::warn;

use crate::game::content::DifficultyTier;
use crate::lobby::LobbySettings;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Allowed client origins for CORS; empty allows any origin
    pub client_origins: Vec<String>,

    /// HMAC key for seat reservation tokens
    pub reservation_secret: Vec<u8>,

    /// Supabase project URL; the in-memory store is used when unset
    pub supabase_url: Option<String>,
    /// Supabase service role key (bypasses RLS - server only!)
    pub supabase_service_role_key: Option<String>,

    pub matchmaking_interval: Duration,
    pub matchmaking_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub empty_room_timeout: Duration,
    /// Tier for start requests without one; survival rooms when unset
    pub default_difficulty: Option<u8>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        // Render provides PORT env var, fall back to SERVER_ADDR or default
        let server_addr = match lookup("PORT") {
            Some(port) => format!("0.0.0.0:{}", port),
            None => lookup("SERVER_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
        };
        let server_addr = server_addr
            .parse()
            .map_err(|_| ConfigError::InvalidAddress)?;

        let client_origins = lookup("CLIENT_ORIGIN")
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let reservation_secret = match lookup("RESERVATION_SECRET").filter(|s| !s.is_empty()) {
            Some(secret) => secret.into_bytes(),
            None => {
                warn!("RESERVATION_SECRET not set, using a random key; reservations will not survive a restart");
                let mut key = vec![0u8; 32];
                rand::thread_rng().fill_bytes(&mut key);
                key
            }
        };

        let supabase_url = lookup("SUPABASE_URL").filter(|s| !s.is_empty());
        let supabase_service_role_key = lookup("SUPABASE_SERVICE_ROLE_KEY").filter(|s| !s.is_empty());
        if supabase_url.is_some() != supabase_service_role_key.is_some() {
            return Err(ConfigError::IncompleteSupabase);
        }

        let default_difficulty = match lookup("DEFAULT_DIFFICULTY").filter(|s| !s.trim().is_empty()) {
            Some(raw) => {
                let level = raw
                    .trim()
                    .parse::<u8>()
                    .map_err(|_| ConfigError::Invalid("DEFAULT_DIFFICULTY"))?;
                if DifficultyTier::for_level(level).is_none() {
                    return Err(ConfigError::Invalid("DEFAULT_DIFFICULTY"));
                }
                Some(level)
            }
            None => None,
        };

        Ok(Self {
            server_addr,
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            client_origins,
            reservation_secret,
            supabase_url,
            supabase_service_role_key,
            matchmaking_interval: Duration::from_millis(parse_or(&lookup, "MATCHMAKING_INTERVAL_MS", 1_000)?),
            matchmaking_timeout: Duration::from_secs(parse_or(&lookup, "MATCHMAKING_TIMEOUT_SECS", 300)?),
            heartbeat_interval: Duration::from_secs(parse_or(&lookup, "HEARTBEAT_INTERVAL_SECS", 30)?),
            empty_room_timeout: Duration::from_secs(parse_or(&lookup, "EMPTY_ROOM_TIMEOUT_SECS", 30)?),
            default_difficulty,
        })
    }

    /// Supabase credentials when both are configured
    pub fn supabase(&self) -> Option<(&str, &str)> {
        match (&self.supabase_url, &self.supabase_service_role_key) {
            (Some(url), Some(key)) => Some((url, key)),
            _ => None,
        }
    }

    pub fn lobby_settings(&self) -> LobbySettings {
        LobbySettings {
            default_difficulty: self.default_difficulty,
            matchmaking_interval: self.matchmaking_interval,
            queue_timeout: self.matchmaking_timeout,
            heartbeat_interval: self.heartbeat_interval,
            empty_room_timeout: self.empty_room_timeout,
            ..LobbySettings::default()
        }
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(key)),
        None => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,

    #[error("SUPABASE_URL and SUPABASE_SERVICE_ROLE_KEY must be set together")]
    IncompleteSupabase,
}
