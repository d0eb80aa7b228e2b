//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Supabase project URL
    pub supabase_url: String,
    /// Supabase service role key (bypasses RLS - server only!)
    pub supabase_service_role_key: String,
    /// Supabase JWT secret for token verification
    pub supabase_jwt_secret: String,

    /// Allowed client origins for CORS, comma separated
    pub client_origin: String,

    /// Points needed to win a match
    pub win_score: u32,
    /// Session tick frequency (Hz)
    pub tick_rate: u32,
    /// Pre-match countdown in seconds
    pub countdown_secs: f32,
    /// Empty waiting matches are torn down after this many seconds
    pub idle_timeout_secs: f32,
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

        let config = Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            supabase_url: required("SUPABASE_URL")?,
            supabase_service_role_key: required("SUPABASE_SERVICE_ROLE_KEY")?,
            supabase_jwt_secret: required("SUPABASE_JWT_SECRET")?,
            client_origin: required("CLIENT_ORIGIN")?,

            win_score: optional("WIN_SCORE", 5)?,
            tick_rate: optional("TICK_RATE", 60)?,
            countdown_secs: optional("COUNTDOWN_SECS", 3.0)?,
            idle_timeout_secs: optional("IDLE_TIMEOUT_SECS", 300.0)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.win_score == 0 {
            return Err(ConfigError::Invalid("WIN_SCORE"));
        }
        if !(1..=240).contains(&self.tick_rate) {
            return Err(ConfigError::Invalid("TICK_RATE"));
        }
        if !(self.countdown_secs >= 0.0) {
            return Err(ConfigError::Invalid("COUNTDOWN_SECS"));
        }
        if !(self.idle_timeout_secs > 0.0) {
            return Err(ConfigError::Invalid("IDLE_TIMEOUT_SECS"));
        }
        Ok(())
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::Missing(name))
}

fn optional<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => parse_value(name, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_value<T: FromStr>(name: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Invalid(name))
}

/// Configuration errors
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}

/// Fixed configuration for tests; the backend URL points at a closed port
#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        server_addr: "127.0.0.1:0".parse().unwrap(),
        log_level: "info".into(),
        supabase_url: "http://127.0.0.1:9".into(),
        supabase_service_role_key: "service".into(),
        supabase_jwt_secret: "secret".into(),
        client_origin: "http://localhost:5173".into(),
        win_score: 5,
        tick_rate: 60,
        countdown_secs: 3.0,
        idle_timeout_secs: 300.0,
    }
}
