use anyhow::{anyhow, Context, Result};
use std::env;
use std::str::FromStr;

use crate::payments::providers::mpesa::{
    MpesaConfig, MpesaEnvironment, SANDBOX_PASSKEY, SANDBOX_SHORT_CODE,
};

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub mpesa: MpesaConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            environment: "development".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// In-memory store when unset
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 20,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RedisConfig {
    /// Gateway tokens are only shared across instances when set
    pub url: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; empty values count as unset
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let server = ServerConfig {
            host: get("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(get("PORT"), 3000).context("PORT must be a valid number")?,
            environment: get("ENVIRONMENT").unwrap_or_else(|| "development".to_string()),
        };

        let database = DatabaseConfig {
            url: get("DATABASE_URL"),
            max_connections: parse_or(get("DATABASE_MAX_CONNECTIONS"), 20)
                .context("DATABASE_MAX_CONNECTIONS must be a valid number")?,
        };

        let redis = RedisConfig {
            url: get("REDIS_URL"),
        };

        let environment: MpesaEnvironment = match get("MPESA_ENVIRONMENT") {
            Some(value) => value.parse().map_err(|e: String| anyhow!(e))?,
            None => MpesaEnvironment::Sandbox,
        };

        // Public Daraja sandbox credentials are never a production default.
        let sandbox_default = |value: &str| match environment {
            MpesaEnvironment::Production => String::new(),
            _ => value.to_string(),
        };

        let app_url = get("APP_URL").unwrap_or_else(|| format!("http://localhost:{}", server.port));

        let mpesa = MpesaConfig {
            consumer_key: get("MPESA_CONSUMER_KEY").unwrap_or_default(),
            consumer_secret: get("MPESA_CONSUMER_SECRET").unwrap_or_default(),
            business_short_code: get("MPESA_BUSINESS_SHORTCODE")
                .unwrap_or_else(|| sandbox_default(SANDBOX_SHORT_CODE)),
            passkey: get("MPESA_PASSKEY").unwrap_or_else(|| sandbox_default(SANDBOX_PASSKEY)),
            callback_url: get("MPESA_CALLBACK_URL")
                .unwrap_or_else(|| format!("{}/api/mpesa/callback", app_url.trim_end_matches('/'))),
            environment,
            timeout_secs: parse_or(get("MPESA_TIMEOUT_SECS"), 30)
                .context("MPESA_TIMEOUT_SECS must be a valid number")?,
            account_reference: get("MPESA_ACCOUNT_REFERENCE")
                .unwrap_or_else(|| "Online Payment".to_string()),
            callback_secret: get("MPESA_CALLBACK_SECRET"),
            base_url_override: get("MPESA_BASE_URL"),
        };

        let config = Config {
            server,
            database,
            redis,
            mpesa,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.port < 1024 {
            return Err(anyhow!(
                "Port must be at least 1024, got {}",
                self.server.port
            ));
        }

        let valid_environments = ["development", "staging", "production"];
        if !valid_environments.contains(&self.server.environment.as_str()) {
            return Err(anyhow!(
                "Environment must be one of: {:?}, got {}",
                valid_environments,
                self.server.environment
            ));
        }

        if self.database.max_connections == 0 {
            return Err(anyhow!("DATABASE_MAX_CONNECTIONS must be greater than 0"));
        }

        if self.mpesa.environment != MpesaEnvironment::Simulated {
            let required = [
                ("MPESA_CONSUMER_KEY", &self.mpesa.consumer_key),
                ("MPESA_CONSUMER_SECRET", &self.mpesa.consumer_secret),
                ("MPESA_BUSINESS_SHORTCODE", &self.mpesa.business_short_code),
                ("MPESA_PASSKEY", &self.mpesa.passkey),
            ];
            for (key, value) in required {
                if value.trim().is_empty() {
                    return Err(anyhow!(
                        "{} is required for the {} environment",
                        key,
                        self.mpesa.environment
                    ));
                }
            }
        }

        if !self.mpesa.callback_url.starts_with("http://")
            && !self.mpesa.callback_url.starts_with("https://")
        {
            return Err(anyhow!(
                "MPESA_CALLBACK_URL must be an http(s) URL, got {}",
                self.mpesa.callback_url
            ));
        }

        if self.mpesa.timeout_secs == 0 {
            return Err(anyhow!("MPESA_TIMEOUT_SECS must be greater than 0"));
        }

        if self.mpesa.account_reference.trim().is_empty() {
            return Err(anyhow!("MPESA_ACCOUNT_REFERENCE cannot be empty"));
        }

        Ok(())
    }
}

pub(crate) fn parse_or<T: FromStr>(value: Option<String>, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match value {
        Some(v) => Ok(v.trim().parse()?),
        None => Ok(default),
    }
}
