// src/config.rs
use crate::error::{AppError, Result};
use crate::ratelimit::RateLimitConfig;
use crate::sonar::{SonarConfig, DEFAULT_MODEL};
use crate::yahoo::YahooConfig;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Development,
    Production,
    Test,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub env: AppEnv,
    pub bind_addr: SocketAddr,
    pub sonar: SonarConfig,
    pub yahoo: YahooConfig,
    /// `None` leaves every route unlimited.
    pub rate_limit: Option<RateLimitConfig>,
    pub http_timeout: Duration,
}

impl Config {
    /// Reads the process environment, after loading `.env` if present.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_vars(std::env::vars().collect())
    }

    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self> {
        let get = |key: &str| vars.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());

        let api_key = get("SONAR_KEY")
            .ok_or_else(|| AppError::Config("SONAR_KEY must be set".to_string()))?
            .to_string();

        let env = match get("APP_ENV").unwrap_or("development") {
            "development" => AppEnv::Development,
            "production" => AppEnv::Production,
            "test" => AppEnv::Test,
            other => {
                return Err(AppError::Config(format!(
                    "APP_ENV must be development, production or test, got {:?}",
                    other
                )))
            }
        };

        let bind_addr = get("BIND_ADDR")
            .unwrap_or("127.0.0.1:3030")
            .parse::<SocketAddr>()
            .map_err(|e| AppError::Config(format!("BIND_ADDR is not a socket address: {}", e)))?;

        let tokens = parse_number::<u32>(get("RATE_LIMIT_TOKENS"), "RATE_LIMIT_TOKENS", 0)?;
        let interval_secs =
            parse_number::<u64>(get("RATE_LIMIT_INTERVAL_SECS"), "RATE_LIMIT_INTERVAL_SECS", 60)?;
        if tokens > 0 && interval_secs == 0 {
            return Err(AppError::Config(
                "RATE_LIMIT_INTERVAL_SECS must be greater than 0".to_string(),
            ));
        }
        let rate_limit = (tokens > 0).then(|| RateLimitConfig {
            tokens_per_interval: tokens,
            interval: Duration::from_secs(interval_secs),
        });

        let timeout_secs = parse_number::<u64>(get("HTTP_TIMEOUT_SECS"), "HTTP_TIMEOUT_SECS", 30)?;

        let yahoo_defaults = YahooConfig::default();
        Ok(Config {
            env,
            bind_addr,
            sonar: SonarConfig {
                api_base: get("SONAR_API_URL")
                    .unwrap_or("https://api.perplexity.ai")
                    .trim_end_matches('/')
                    .to_string(),
                api_key,
                model: get("SONAR_MODEL").unwrap_or(DEFAULT_MODEL).to_string(),
            },
            yahoo: YahooConfig {
                api_base: get("YAHOO_API_URL")
                    .map(|v| v.trim_end_matches('/').to_string())
                    .unwrap_or(yahoo_defaults.api_base),
                cookie_url: get("YAHOO_COOKIE_URL")
                    .map(str::to_string)
                    .unwrap_or(yahoo_defaults.cookie_url),
            },
            rate_limit,
            http_timeout: Duration::from_secs(timeout_secs),
        })
    }
}

fn parse_number<T: std::str::FromStr>(value: Option<&str>, key: &str, default: T) -> Result<T> {
    match value {
        None => Ok(default),
        Some(v) => v
            .parse::<T>()
            .map_err(|_| AppError::Config(format!("{} must be a non-negative integer, got {:?}", key, v))),
    }
}
