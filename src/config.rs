use crate::error::{Error, Result};
use dotenvy::dotenv;
use std::env;
use std::sync::OnceLock;

#[derive(Debug, Clone)]
pub struct Config {
    /// Only required when the Postgres-backed stores are used.
    pub database_url: Option<String>,
    /// How often a session opportunistically flushes buffered drafts.
    pub autosave_interval_seconds: u64,
    /// Countdown tick cadence. Display only; expiry is wall-clock based.
    pub countdown_tick_ms: u64,
}

pub static CONFIG: OnceLock<Config> = OnceLock::new();

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        Ok(Self {
            database_url: env::var("DATABASE_URL").ok(),
            autosave_interval_seconds: get_env_or("AUTOSAVE_INTERVAL_SECONDS", 30)?,
            countdown_tick_ms: get_env_or("COUNTDOWN_TICK_MS", 1000)?,
        })
    }
}

fn get_env_or<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| Error::Config(format!("Invalid value for {}: {}", name, e))),
        Err(_) => Ok(default),
    }
}

pub fn init_config() -> Result<()> {
    let config = Config::from_env()?;
    CONFIG
        .set(config)
        .map_err(|_| Error::Config("Configuration has already been initialized".to_string()))?;
    Ok(())
}

pub fn get_config() -> &'static Config {
    CONFIG
        .get()
        .expect("Configuration has not been initialized")
}
