use std::{env, fmt::Display, fs::read_to_string, str::FromStr};

use anyhow::{Context, Error, bail};
use posts::geo::DEFAULT_RADIUS_KM;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Redis,
    Memory,
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(Backend::Redis),
            "memory" => Ok(Backend::Memory),
            other => Err(format!("unknown store backend {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub backend: Backend,
    pub redis_url: String,
    pub allowed_origins: Vec<String>,
    pub default_radius_km: f64,
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        let redis_url: String = try_load("REDIS_URL", "redis://redis:6379")?;

        let config = Self {
            port: try_load("RUST_PORT", "3001")?,
            backend: try_load("STORE_BACKEND", "redis")?,
            redis_url: with_password(&redis_url, read_secret("REDIS_PASSWORD"))?,
            allowed_origins: try_load::<String>(
                "ALLOWED_ORIGINS",
                "http://localhost:3000,http://localhost:3001",
            )?
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(String::from)
            .collect(),
            default_radius_km: try_load("DEFAULT_RADIUS_KM", &DEFAULT_RADIUS_KM.to_string())?,
        };

        if !config.default_radius_km.is_finite() || config.default_radius_km < 0.0 {
            bail!("DEFAULT_RADIUS_KM must be a non-negative number");
        }

        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3001,
            backend: Backend::Memory,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            allowed_origins: Vec::new(),
            default_radius_km: DEFAULT_RADIUS_KM,
        }
    }
}

fn var(key: &str) -> Option<String> {
    env::var(key)
        .map_err(|_| {
            warn!("Environment variable {key} not found, using default");
        })
        .ok()
}

fn try_load<T: FromStr>(key: &str, default: &str) -> Result<T, Error>
where
    T::Err: Display,
{
    let raw = var(key).unwrap_or_else(|| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });

    raw.parse()
        .map_err(|e| Error::msg(format!("Invalid {key} value: {e}")))
}

/// Docker secret, if mounted.
fn read_secret(secret_name: &str) -> Option<String> {
    let path = format!("/run/secrets/{secret_name}");

    read_to_string(&path)
        .map(|s| s.trim().to_string())
        .map_err(|e| {
            info!("No {secret_name} secret at {path}: {e}");
        })
        .ok()
        .filter(|s| !s.is_empty())
}

fn with_password(url: &str, password: Option<String>) -> Result<String, Error> {
    let Some(password) = password else {
        return Ok(url.to_string());
    };

    let (scheme, rest) = url
        .split_once("://")
        .with_context(|| format!("REDIS_URL {url} has no scheme"))?;

    if rest.contains('@') {
        warn!("REDIS_URL already carries credentials, ignoring REDIS_PASSWORD secret");
        return Ok(url.to_string());
    }

    Ok(format!("{scheme}://:{password}@{rest}"))
}
