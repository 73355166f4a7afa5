use std::{env, fmt::Display, fs::read_to_string, str::FromStr};

use tracing::{info, warn};

pub struct Config {
    pub port: u16,
    pub redis_url: String,
    /// Signing key for the token codec. Never logged.
    pub token_secret: String,
    /// Cool-down window: repeat scans inside it are duplicates.
    pub cooldown_hours: i64,
    pub cookie_max_age_days: i64,
    /// How long accepted scan facts are kept for reporting.
    pub retention_days: i64,
    /// Where accepted scans redirect to.
    pub redirect_base: String,
    pub production: bool,
}

impl Config {
    pub fn load() -> Self {
        Self {
            port: try_load("RUST_PORT", "5000"),
            redis_url: try_load("REDIS_URL", "redis://127.0.0.1:6379"),
            token_secret: read_secret("TOKEN_SECRET"),
            cooldown_hours: try_load("COOLDOWN_HOURS", "24"),
            cookie_max_age_days: try_load("COOKIE_MAX_AGE_DAYS", "14"),
            retention_days: try_load("RETENTION_DAYS", "30"),
            redirect_base: try_load("REDIRECT_BASE", "https://yourdestination.com"),
            production: try_load("PRODUCTION", "false"),
        }
    }
}

fn var(key: &str) -> Result<String, ()> {
    env::var(key).map_err(|_| {
        warn!("Environment variable {key} not found, using default");
    })
}

fn try_load<T: FromStr>(key: &str, default: &str) -> T
where
    T::Err: Display,
{
    var(key)
        .unwrap_or_else(|_| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .parse()
        .map_err(|e| {
            warn!("Invalid {key} value: {e}");
        })
        .expect("Environment misconfigured!")
}

fn read_secret(secret_name: &str) -> String {
    let path = format!("/run/secrets/{secret_name}");

    read_to_string(&path)
        .map(|s| s.trim().to_string())
        .map_err(|e| {
            warn!("Failed to read {secret_name} from file: {e}");
        })
        .expect("Secrets misconfigured!")
}
