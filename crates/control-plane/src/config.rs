// Server configuration from environment variables
//
// Every setting has a default so the server starts with an empty environment.
// Values are read once at startup; `.env` files are loaded by main via dotenvy.

use std::time::Duration;

use thiserror::Error;
use timekeeper_durable::prelude::WorkerPoolConfig;
use timekeeper_durable::worker::PollerConfig;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} must be {expected}, got '{value}'")]
    Invalid {
        key: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Interface to bind (HOST)
    pub host: String,
    /// Port to bind (PORT)
    pub port: u16,
    /// Base URL used in status links (PUBLIC_BASE_URL)
    pub public_base_url: String,
    /// Worker identity in task claims (WORKER_ID)
    pub worker_id: String,
    /// Concurrent activity executions (MAX_CONCURRENT_TASKS)
    pub max_concurrent_tasks: usize,
    /// Poll interval when work is available (POLL_MIN_INTERVAL_MS)
    pub poll_min_interval: Duration,
    /// Poll interval ceiling when idle (POLL_MAX_INTERVAL_MS)
    pub poll_max_interval: Duration,
    /// Allowed cross-origin callers (CORS_ALLOWED_ORIGINS, comma separated)
    pub cors_allowed_origins: Vec<String>,
}

impl Config {
    /// Load from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let host = var("HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port = parse(&var, "PORT", "a port number", 9300u16)?;
        let public_base_url = var("PUBLIC_BASE_URL")
            .unwrap_or_else(|| {
                let public_host = if host == "0.0.0.0" { "localhost" } else { host.as_str() };
                format!("http://{}:{}", public_host, port)
            })
            .trim_end_matches('/')
            .to_string();

        let worker_id = var("WORKER_ID").unwrap_or_else(|| format!("timekeeper-{}", std::process::id()));
        let max_concurrent_tasks =
            parse(&var, "MAX_CONCURRENT_TASKS", "a positive integer", 10usize)?;
        if max_concurrent_tasks == 0 {
            return Err(ConfigError::Invalid {
                key: "MAX_CONCURRENT_TASKS",
                expected: "a positive integer",
                value: "0".to_string(),
            });
        }
        let poll_min_interval =
            Duration::from_millis(parse(&var, "POLL_MIN_INTERVAL_MS", "milliseconds", 100u64)?);
        let poll_max_interval =
            Duration::from_millis(parse(&var, "POLL_MAX_INTERVAL_MS", "milliseconds", 1000u64)?);

        let cors_allowed_origins = var("CORS_ALLOWED_ORIGINS")
            .map(|s| {
                s.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            host,
            port,
            public_base_url,
            worker_id,
            max_concurrent_tasks,
            poll_min_interval,
            poll_max_interval: poll_max_interval.max(poll_min_interval),
            cors_allowed_origins,
        })
    }

    /// Address to bind the HTTP listener to
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Worker pool settings
    pub fn worker_pool(&self) -> WorkerPoolConfig {
        WorkerPoolConfig::new()
            .with_worker_id(self.worker_id.clone())
            .with_max_concurrency(self.max_concurrent_tasks)
            .with_poller(
                PollerConfig::new()
                    .with_min_interval(self.poll_min_interval)
                    .with_max_interval(self.poll_max_interval),
            )
    }
}

fn parse<T, V>(var: &V, key: &'static str, expected: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    V: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
            key,
            expected,
            value,
        }),
        None => Ok(default),
    }
}
