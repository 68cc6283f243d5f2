use std::collections::HashMap;
use std::env;

use crate::error::AppError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub provider: ProviderConfig,
    pub logging: LoggingConfig,
    pub request: RequestConfig,
    pub usage: UsageConfig,
}

/// Generation gateway configuration
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub default_provider: String,
    pub default_model: String,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// HTTP request configuration
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    /// Longest gap allowed between two reads of a streamed body.
    pub stream_idle_timeout_ms: u64,
}

/// Per-provider usage quotas fed into the usage ledger
#[derive(Debug, Clone, Default)]
pub struct UsageConfig {
    pub limits: HashMap<String, f64>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let provider = ProviderConfig {
            base_url: env::var("PROVIDER_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8787".to_string()),
            api_key: env::var("PROVIDER_API_KEY")
                .ok()
                .filter(|key| !key.trim().is_empty()),
            default_provider: env::var("DEFAULT_PROVIDER").unwrap_or_else(|_| "openai".to_string()),
            default_model: env::var("DEFAULT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let request = RequestConfig {
            timeout_ms: env::var("REQUEST_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30000),
            max_retries: env::var("MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3),
            retry_delay_ms: env::var("RETRY_DELAY_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1000),
            stream_idle_timeout_ms: env::var("STREAM_IDLE_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(60000),
        };

        let usage = match env::var("USAGE_LIMITS") {
            Ok(raw) => UsageConfig {
                limits: parse_usage_limits(&raw)?,
            },
            Err(_) => UsageConfig::default(),
        };

        Ok(Config {
            provider,
            logging,
            request,
            usage,
        })
    }
}

/// Parse `provider=limit` pairs separated by commas.
///
/// Empty segments are skipped so trailing commas are harmless.
pub fn parse_usage_limits(raw: &str) -> Result<HashMap<String, f64>, AppError> {
    let mut limits = HashMap::new();

    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (provider, limit) = entry.split_once('=').ok_or_else(|| AppError::Config {
            message: format!("USAGE_LIMITS entry '{}' must be provider=limit", entry),
        })?;

        let provider = provider.trim();
        if provider.is_empty() {
            return Err(AppError::Config {
                message: format!("USAGE_LIMITS entry '{}' has no provider", entry),
            });
        }

        let limit: f64 = limit.trim().parse().map_err(|_| AppError::Config {
            message: format!("USAGE_LIMITS limit for '{}' is not a number", provider),
        })?;
        if !limit.is_finite() || limit < 0.0 {
            return Err(AppError::Config {
                message: format!("USAGE_LIMITS limit for '{}' must be >= 0", provider),
            });
        }

        limits.insert(provider.to_string(), limit);
    }

    Ok(limits)
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30000,
            max_retries: 3,
            retry_delay_ms: 1000,
            stream_idle_timeout_ms: 60000,
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8787".to_string(),
            api_key: None,
            default_provider: "openai".to_string(),
            default_model: "gpt-4o-mini".to_string(),
        }
    }
}
