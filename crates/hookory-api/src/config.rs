//! API configuration.
//!
//! Built once in `main` and handed to [`crate::AppState`], which passes the
//! relevant sub-configs to each service.

use std::time::Duration;

use hookory_billing::BillingConfig;
use hookory_models::{PlanSettings, DEFAULT_CACHE_TTL_DAYS};

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// CORS origins
    pub cors_origins: Vec<String>,
    /// Rate limit requests per second, per client IP
    pub rate_limit_rps: u32,
    /// Rate limit burst
    pub rate_limit_burst: u32,
    /// Request timeout for every route except `/api/generate`
    pub request_timeout: Duration,
    /// Max request body size
    pub max_body_size: usize,
    /// Environment (development/production)
    pub environment: String,
    /// Public app URL, used for billing return URLs when no `Origin` is sent.
    pub app_url: String,
    pub plans: PlanSettings,
    pub cache: CacheSettings,
    pub generation: GenerationConfig,
    pub email: EmailConfig,
    pub billing: BillingConfig,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: vec!["*".to_string()],
            rate_limit_rps: 10,
            rate_limit_burst: 20,
            request_timeout: Duration::from_secs(90),
            max_body_size: 1024 * 1024, // 1MB
            environment: "development".to_string(),
            app_url: "http://localhost:3000".to_string(),
            plans: PlanSettings::default(),
            cache: CacheSettings::default(),
            generation: GenerationConfig::default(),
            email: EmailConfig::default(),
            billing: BillingConfig::default(),
        }
    }
}

impl ApiConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("API_HOST").unwrap_or(defaults.host),
            port: env_parse("API_PORT", defaults.port),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(defaults.cors_origins),
            rate_limit_rps: env_parse("RATE_LIMIT_RPS", defaults.rate_limit_rps),
            rate_limit_burst: env_parse("RATE_LIMIT_BURST", defaults.rate_limit_burst),
            request_timeout: Duration::from_secs(env_parse(
                "REQUEST_TIMEOUT",
                defaults.request_timeout.as_secs(),
            )),
            max_body_size: env_parse("MAX_BODY_SIZE", defaults.max_body_size),
            environment: std::env::var("ENVIRONMENT").unwrap_or(defaults.environment),
            app_url: env_non_empty("APP_URL").unwrap_or(defaults.app_url),
            plans: PlanSettings::from_env(),
            cache: CacheSettings::from_env(),
            generation: GenerationConfig::from_env(),
            email: EmailConfig::from_env(),
            billing: BillingConfig::from_env(),
        }
    }

    /// Check if running in production mode.
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

/// Content cache settings.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub ttl: chrono::Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl: chrono::Duration::days(DEFAULT_CACHE_TTL_DAYS),
        }
    }
}

impl CacheSettings {
    pub fn from_env() -> Self {
        Self {
            ttl: chrono::Duration::days(env_parse("CACHE_TTL_DAYS", DEFAULT_CACHE_TTL_DAYS)),
        }
    }
}

/// Generation backend settings.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    /// Deadline for all formats of one generate request.
    pub timeout: Duration,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

impl GenerationConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_key: env_non_empty("OPENAI_API_KEY"),
            model: env_non_empty("OPENAI_MODEL").unwrap_or(defaults.model),
            base_url: env_non_empty("OPENAI_BASE_URL").unwrap_or(defaults.base_url),
            timeout: Duration::from_secs(env_parse(
                "GENERATION_TIMEOUT_SECS",
                defaults.timeout.as_secs(),
            )),
        }
    }
}

/// Outbound email settings.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub api_key: Option<String>,
    pub from: String,
    pub api_base: String,
    /// Base URL for links in email templates.
    pub app_url: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            from: "Hookory <onboarding@resend.dev>".to_string(),
            api_base: "https://api.resend.com".to_string(),
            app_url: "http://localhost:3000".to_string(),
        }
    }
}

impl EmailConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_key: env_non_empty("RESEND_API_KEY"),
            from: env_non_empty("EMAIL_FROM").unwrap_or(defaults.from),
            api_base: env_non_empty("RESEND_API_BASE").unwrap_or(defaults.api_base),
            app_url: env_non_empty("APP_URL").unwrap_or(defaults.app_url),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_defaults_without_env() {
        for key in ["API_PORT", "CACHE_TTL_DAYS", "OPENAI_API_KEY", "GENERATION_TIMEOUT_SECS"] {
            std::env::remove_var(key);
        }
        let config = ApiConfig::from_env();
        assert_eq!(config.port, 8000);
        assert_eq!(config.cache.ttl, chrono::Duration::days(30));
        assert!(config.generation.api_key.is_none());
        assert_eq!(config.generation.timeout, Duration::from_secs(60));
        assert!(!config.is_production());
    }

    #[test]
    #[serial]
    fn test_overrides_from_env() {
        std::env::set_var("CACHE_TTL_DAYS", "7");
        std::env::set_var("OPENAI_MODEL", "gpt-4o");
        std::env::set_var("ENVIRONMENT", "Production");
        let config = ApiConfig::from_env();
        assert_eq!(config.cache.ttl, chrono::Duration::days(7));
        assert_eq!(config.generation.model, "gpt-4o");
        assert!(config.is_production());
        for key in ["CACHE_TTL_DAYS", "OPENAI_MODEL", "ENVIRONMENT"] {
            std::env::remove_var(key);
        }
    }
}
