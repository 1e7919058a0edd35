// src/config.rs
use rust_decimal::Decimal;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

const DEV_SESSION_SECRET: &str = "dev-session-secret-change-me";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} not set")]
    Missing(&'static str),

    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: String,
    pub database_path: PathBuf,
    pub bind_addr: SocketAddr,
    pub session_secret: String,
    pub session_ttl_hours: i64,
    pub bcrypt_cost: u32,
    pub starting_cash: Decimal,
    pub quote_base_url: String,
}

impl Config {
    /// Reads the process environment, after loading `.env` if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup("API_KEY")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing("API_KEY"))?;

        let session_secret = match lookup("SESSION_SECRET") {
            Some(secret) if !secret.is_empty() => secret,
            _ => {
                log::warn!("SESSION_SECRET not set; using the development secret");
                DEV_SESSION_SECRET.to_string()
            }
        };

        Ok(Config {
            api_key,
            database_path: lookup("DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("finance.db")),
            bind_addr: parse_or(&lookup, "BIND_ADDR", SocketAddr::from(([127, 0, 0, 1], 3030)))?,
            session_secret,
            session_ttl_hours: parse_or(&lookup, "SESSION_TTL_HOURS", 24)?,
            bcrypt_cost: parse_or(&lookup, "BCRYPT_COST", bcrypt::DEFAULT_COST)?,
            starting_cash: parse_or(&lookup, "STARTING_CASH", Decimal::new(10_000_00, 2))?,
            quote_base_url: lookup("QUOTE_BASE_URL")
                .unwrap_or_else(|| "https://www.alphavantage.co".to_string()),
        })
    }
}

fn parse_or<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn api_key_is_required() {
        assert!(matches!(load(&[]), Err(ConfigError::Missing("API_KEY"))));
    }

    #[test]
    fn defaults_apply() {
        let config = load(&[("API_KEY", "demo")]).unwrap();
        assert_eq!(config.database_path, PathBuf::from("finance.db"));
        assert_eq!(config.bind_addr.port(), 3030);
        assert_eq!(config.starting_cash, Decimal::new(10000, 0));
        assert_eq!(config.bcrypt_cost, bcrypt::DEFAULT_COST);
        assert_eq!(config.session_ttl_hours, 24);
    }

    #[test]
    fn overrides_are_parsed() {
        let config = load(&[
            ("API_KEY", "demo"),
            ("BIND_ADDR", "0.0.0.0:8080"),
            ("STARTING_CASH", "250.75"),
            ("BCRYPT_COST", "6"),
        ])
        .unwrap();
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.starting_cash, Decimal::new(25075, 2));
        assert_eq!(config.bcrypt_cost, 6);
    }

    #[test]
    fn malformed_value_is_reported() {
        let err = load(&[("API_KEY", "demo"), ("SESSION_TTL_HOURS", "soon")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "SESSION_TTL_HOURS", .. }));
    }
}
