use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::store::{DatabaseConfig, DatabaseType};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    Memory,
    Spool,
}

impl Default for QueueBackend {
    fn default() -> Self {
        QueueBackend::Memory
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub queue: QueueConfig,
    pub worker: WorkerConfig,
    pub dispatch: DispatchConfig,
    pub policy: PolicyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default)]
    pub backend: QueueBackend,
    pub dir: PathBuf,
    pub capacity: usize,
    pub visibility_timeout_secs: u64,
}

impl QueueConfig {
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub count: usize,
    pub max_attempts: u32,
    pub backoff_base_secs: u64,
    pub backoff_cap_secs: u64,
}

impl WorkerConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_secs(self.backoff_base_secs)
    }

    pub fn backoff_cap(&self) -> Duration {
        Duration::from_secs(self.backoff_cap_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    pub lock_ttl_secs: u64,
    pub tool_call_timeout_secs: u64,
    pub kubernetes_tool_url: Option<String>,
    pub virt_tool_url: Option<String>,
    pub prometheus_tool_url: Option<String>,
    pub grafana_tool_url: Option<String>,
}

impl DispatchConfig {
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    pub fn tool_call_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_call_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    pub refresh_secs: u64,
    pub seed_path: Option<PathBuf>,
}

impl PolicyConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_secs)
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn load() -> crate::Result<Self> {
        // Load environment variables from .env file if it exists
        let _ = dotenvy::dotenv();

        let config = Config {
            server: ServerConfig {
                addr: env_or("SERVER_ADDR", "0.0.0.0:8080"),
            },
            database: DatabaseConfig {
                db_type: match env_or("DATABASE_TYPE", "sqlite").to_lowercase().as_str() {
                    "postgres" => DatabaseType::Postgres,
                    _ => DatabaseType::Sqlite,
                },
                sqlite_path: std::env::var("SQLITE_PATH")
                    .map(PathBuf::from)
                    .ok()
                    .or_else(|| Some(PathBuf::from("data/mend.db"))),
                postgres_url: std::env::var("DATABASE_URL").ok(),
                max_connections: env_parse("DATABASE_MAX_CONNECTIONS", 5),
            },
            queue: QueueConfig {
                backend: match env_or("QUEUE_BACKEND", "memory").to_lowercase().as_str() {
                    "spool" => QueueBackend::Spool,
                    _ => QueueBackend::Memory,
                },
                dir: PathBuf::from(env_or("QUEUE_DIR", "data/queue")),
                capacity: env_parse("QUEUE_CAPACITY", 1024),
                visibility_timeout_secs: env_parse("QUEUE_VISIBILITY_TIMEOUT_SECS", 120),
            },
            worker: WorkerConfig {
                count: env_parse("WORKER_COUNT", 4),
                max_attempts: env_parse("WORKER_MAX_ATTEMPTS", 3),
                backoff_base_secs: env_parse("WORKER_BACKOFF_BASE_SECS", 2),
                backoff_cap_secs: env_parse("WORKER_BACKOFF_CAP_SECS", 60),
            },
            dispatch: DispatchConfig {
                lock_ttl_secs: env_parse("LOCK_TTL_SECS", 90),
                tool_call_timeout_secs: env_parse("TOOL_CALL_TIMEOUT_SECS", 30),
                kubernetes_tool_url: std::env::var("KUBERNETES_TOOL_URL").ok(),
                virt_tool_url: std::env::var("VIRT_TOOL_URL").ok(),
                prometheus_tool_url: std::env::var("PROMETHEUS_TOOL_URL").ok(),
                grafana_tool_url: std::env::var("GRAFANA_TOOL_URL").ok(),
            },
            policy: PolicyConfig {
                refresh_secs: env_parse("POLICY_REFRESH_SECS", 30),
                seed_path: std::env::var("POLICY_SEED_PATH").map(PathBuf::from).ok(),
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> crate::Result<()> {
        match self.database.db_type {
            DatabaseType::Postgres => {
                if self.database.postgres_url.is_none() {
                    return Err(crate::Error::Config(
                        "DATABASE_URL must be set when using PostgreSQL".to_string(),
                    ));
                }
            }
            DatabaseType::Sqlite => {
                if self.database.sqlite_path.is_none() {
                    return Err(crate::Error::Config(
                        "SQLITE_PATH must be set when using SQLite".to_string(),
                    ));
                }
            }
        }

        if self.worker.count == 0 {
            return Err(crate::Error::Config(
                "WORKER_COUNT must be at least 1".to_string(),
            ));
        }
        if self.worker.max_attempts == 0 {
            return Err(crate::Error::Config(
                "WORKER_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }

        // The advisory lock must outlive a tool call, otherwise a slow call
        // could lose its lock while still running.
        if self.dispatch.lock_ttl_secs <= self.dispatch.tool_call_timeout_secs {
            return Err(crate::Error::Config(format!(
                "LOCK_TTL_SECS ({}) must exceed TOOL_CALL_TIMEOUT_SECS ({})",
                self.dispatch.lock_ttl_secs, self.dispatch.tool_call_timeout_secs
            )));
        }

        for (name, value) in [
            ("KUBERNETES_TOOL_URL", &self.dispatch.kubernetes_tool_url),
            ("VIRT_TOOL_URL", &self.dispatch.virt_tool_url),
            ("PROMETHEUS_TOOL_URL", &self.dispatch.prometheus_tool_url),
            ("GRAFANA_TOOL_URL", &self.dispatch.grafana_tool_url),
        ] {
            if let Some(value) = value {
                url::Url::parse(value)
                    .map_err(|e| crate::Error::Config(format!("{name} is not a valid URL: {e}")))?;
            }
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                addr: "0.0.0.0:8080".to_string(),
            },
            database: DatabaseConfig {
                db_type: DatabaseType::Sqlite,
                sqlite_path: Some(PathBuf::from("data/mend.db")),
                postgres_url: None,
                max_connections: 5,
            },
            queue: QueueConfig {
                backend: QueueBackend::Memory,
                dir: PathBuf::from("data/queue"),
                capacity: 1024,
                visibility_timeout_secs: 120,
            },
            worker: WorkerConfig {
                count: 4,
                max_attempts: 3,
                backoff_base_secs: 2,
                backoff_cap_secs: 60,
            },
            dispatch: DispatchConfig {
                lock_ttl_secs: 90,
                tool_call_timeout_secs: 30,
                kubernetes_tool_url: None,
                virt_tool_url: None,
                prometheus_tool_url: None,
                grafana_tool_url: None,
            },
            policy: PolicyConfig {
                refresh_secs: 30,
                seed_path: None,
            },
        }
    }
}
