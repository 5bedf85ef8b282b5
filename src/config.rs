use anyhow::{bail, Result};
use serde::Deserialize;
use std::env;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub environment: Environment,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub queue: QueueConfig,
    pub llm: LLMConfig,
    pub auth: AuthConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
}

impl std::str::FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => bail!("Unknown APP_ENV: {}", other),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    Redis,
    Memory,
}

impl std::str::FromStr for QueueBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "redis" => Ok(QueueBackend::Redis),
            "memory" => Ok(QueueBackend::Memory),
            other => bail!("Unknown QUEUE_BACKEND: {}", other),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    pub backend: QueueBackend,
    pub broker_url: String,
    pub result_backend_url: String,
    pub notify_url: String,
    pub worker_concurrency: usize,
    pub max_retries: u32,
    pub retry_delay_secs: u64,
    pub poll_interval_ms: u64,
}

impl QueueConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LLMConfig {
    pub openai_api_key: String,
    pub api_base: String,
    pub model: String,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Deserialize)]
pub struct AuthConfig {
    pub secret_key: String,
}

// Keep the signing key out of `info!("{:?}", config)` output.
impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub file: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let broker_url = env::var("BROKER_URL")
            .unwrap_or_else(|_| "redis://localhost:6379/0".to_string());

        Ok(Self {
            environment: env::var("APP_ENV")
                .unwrap_or_else(|_| "development".to_string())
                .parse()?,
            server: ServerConfig {
                port: env::var("PORT")
                    .unwrap_or_else(|_| "5000".to_string())
                    .parse()?,
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite://jobalizer.db?mode=rwc".to_string()),
                max_connections: env::var("DB_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()?,
            },
            queue: QueueConfig {
                backend: env::var("QUEUE_BACKEND")
                    .unwrap_or_else(|_| "redis".to_string())
                    .parse()?,
                result_backend_url: env::var("RESULT_BACKEND_URL")
                    .unwrap_or_else(|_| broker_url.clone()),
                notify_url: env::var("NOTIFY_URL").unwrap_or_else(|_| broker_url.clone()),
                broker_url,
                worker_concurrency: env::var("WORKER_CONCURRENCY")
                    .unwrap_or_else(|_| "4".to_string())
                    .parse()?,
                max_retries: env::var("TASK_MAX_RETRIES")
                    .unwrap_or_else(|_| "3".to_string())
                    .parse()?,
                retry_delay_secs: env::var("TASK_RETRY_DELAY_SECS")
                    .unwrap_or_else(|_| "60".to_string())
                    .parse()?,
                poll_interval_ms: env::var("QUEUE_POLL_INTERVAL_MS")
                    .unwrap_or_else(|_| "500".to_string())
                    .parse()?,
            },
            llm: LLMConfig {
                openai_api_key: env::var("OPENAI_API_KEY").unwrap_or_default(),
                api_base: env::var("OPENAI_API_BASE")
                    .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
                model: env::var("EXTRACTION_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
                max_tokens: env::var("EXTRACTION_MAX_TOKENS")
                    .unwrap_or_else(|_| "150".to_string())
                    .parse()?,
                timeout_secs: env::var("EXTRACTION_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()?,
            },
            auth: AuthConfig {
                secret_key: env::var("SECRET_KEY").unwrap_or_default(),
            },
            logging: LoggingConfig {
                file: env::var("LOG_FILE").unwrap_or_else(|_| "jobalizer.log".to_string()),
            },
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    /// Check required secrets and bounds before anything is started.
    ///
    /// Production refuses to start without `SECRET_KEY` and `OPENAI_API_KEY`.
    /// Development substitutes a random signing key so local runs work out of the box.
    pub fn validate(&mut self) -> Result<()> {
        if self.queue.worker_concurrency == 0 {
            bail!("WORKER_CONCURRENCY must be at least 1");
        }

        let secret_missing = self.auth.secret_key.trim().is_empty();
        let api_key_missing = self.llm.openai_api_key.trim().is_empty();

        if self.is_production() {
            if secret_missing {
                bail!("SECRET_KEY must be set in production");
            }
            if api_key_missing {
                bail!("OPENAI_API_KEY must be set in production");
            }
            return Ok(());
        }

        if secret_missing {
            warn!("SECRET_KEY not set, generating an ephemeral key for this process");
            let key: [u8; 32] = rand::random();
            self.auth.secret_key = hex::encode(key);
        }
        if api_key_missing {
            warn!("OPENAI_API_KEY not set, extraction calls will fail");
        }

        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        environment: Environment::Development,
        server: ServerConfig {
            port: 0,
            host: "127.0.0.1".to_string(),
        },
        database: DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
        },
        queue: QueueConfig {
            backend: QueueBackend::Memory,
            broker_url: "redis://localhost:6379/0".to_string(),
            result_backend_url: "redis://localhost:6379/0".to_string(),
            notify_url: "redis://localhost:6379/0".to_string(),
            worker_concurrency: 2,
            max_retries: 3,
            retry_delay_secs: 60,
            poll_interval_ms: 50,
        },
        llm: LLMConfig {
            openai_api_key: "sk-test".to_string(),
            api_base: "http://127.0.0.1:1".to_string(),
            model: "gpt-4o-mini".to_string(),
            max_tokens: 150,
            timeout_secs: 5,
        },
        auth: AuthConfig {
            secret_key: "test-secret".to_string(),
        },
        logging: LoggingConfig {
            file: "jobalizer.log".to_string(),
        },
    }
}
