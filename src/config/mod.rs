use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub api_server: ServerConfig,
    pub serving: ServingConfig,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    Sqlite,
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServingConfig {
    /// Click-through rate used to turn a CPC bid into an impression value
    pub estimated_ctr: f64,
    /// Impressions of one creative a viewer may see within the window
    pub frequency_cap: i64,
    pub frequency_window_secs: i64,
    /// 0 disables the candidate cache
    pub candidate_cache_ttl_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

impl ServingConfig {
    pub fn candidate_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.candidate_cache_ttl_ms)
    }
}

impl Default for ServingConfig {
    fn default() -> Self {
        Self {
            estimated_ctr: 0.01,
            frequency_cap: 3,
            frequency_window_secs: 3600,
            candidate_cache_ttl_ms: 1000,
        }
    }
}

impl DatabaseBackend {
    fn parse(value: &str) -> anyhow::Result<Self> {
        match value.to_lowercase().as_str() {
            "sqlite" => Ok(DatabaseBackend::Sqlite),
            "postgres" | "postgresql" => Ok(DatabaseBackend::Postgres),
            "memory" => Ok(DatabaseBackend::Memory),
            other => anyhow::bail!(
                "Unknown DATABASE_BACKEND '{other}'. Supported values: sqlite, postgres, memory"
            ),
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let backend_str =
            std::env::var("DATABASE_BACKEND").unwrap_or_else(|_| "sqlite".to_string());
        let backend = DatabaseBackend::parse(&backend_str)?;

        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./adreel.db?mode=rwc".to_string());
        let max_connections = std::env::var("DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse::<u32>()
            .context("DATABASE_MAX_CONNECTIONS must be a positive integer")?;

        let api_host = std::env::var("API_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let api_port = std::env::var("API_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse::<u16>()?;

        let defaults = ServingConfig::default();
        let estimated_ctr = env_or("ESTIMATED_CTR", defaults.estimated_ctr)?;
        if !(0.0..=1.0).contains(&estimated_ctr) {
            anyhow::bail!("ESTIMATED_CTR must be between 0 and 1, got {estimated_ctr}");
        }
        let serving = ServingConfig {
            estimated_ctr,
            frequency_cap: env_or("FREQUENCY_CAP", defaults.frequency_cap)?,
            frequency_window_secs: env_or(
                "FREQUENCY_WINDOW_SECS",
                defaults.frequency_window_secs,
            )?,
            candidate_cache_ttl_ms: env_or(
                "CANDIDATE_CACHE_TTL_MS",
                defaults.candidate_cache_ttl_ms,
            )?,
        };

        let log_format = match std::env::var("LOG_FORMAT")
            .unwrap_or_else(|_| "text".to_string())
            .to_lowercase()
            .as_str()
        {
            "json" => LogFormat::Json,
            "text" => LogFormat::Text,
            other => {
                eprintln!("Unknown LOG_FORMAT '{other}', falling back to 'text'");
                LogFormat::Text
            }
        };

        Ok(Config {
            database: DatabaseConfig {
                backend,
                url: database_url,
                max_connections,
            },
            api_server: ServerConfig {
                host: api_host,
                port: api_port,
            },
            serving,
            log_format,
        })
    }
}

fn env_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .with_context(|| format!("{key} has an invalid value '{raw}'")),
        Err(_) => Ok(default),
    }
}
