//! API configuration.

use std::str::FromStr;
use std::time::Duration;

use outreach_models::{
    Credits, OperationKind, PlanCatalog, PlanCatalogError, DEFAULT_HOLD_TTL_SECS,
    DEFAULT_SWEEP_INTERVAL_SECS, EMAIL_LOOKUP_COST, FREE_TIER_FLOOR, MAX_HOLD_TTL_SECS,
    MESSAGE_GENERATION_COST, PROFILE_SCRAPE_COST, SIGNUP_CREDITS,
};
use thiserror::Error;

/// Default page size for credit history.
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

/// Maximum page size for credit history.
pub const MAX_HISTORY_LIMIT: usize = 100;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },

    #[error("Invalid plan catalog: {0}")]
    PlanCatalog(#[from] PlanCatalogError),
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(default)
}

/// Hold lifetime in seconds: positive and at most `MAX_HOLD_TTL_SECS`.
fn env_hold_ttl(key: &'static str, default: u64) -> Result<Duration, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .ok()
            .filter(|secs| (1..=MAX_HOLD_TTL_SECS).contains(secs))
            .map(Duration::from_secs)
            .ok_or(ConfigError::InvalidValue { key, value }),
        Err(_) => Ok(Duration::from_secs(default)),
    }
}

fn env_credits(key: &'static str, default: Credits) -> Result<Credits, ConfigError> {
    match std::env::var(key) {
        Ok(value) => Credits::parse(&value)
            .ok()
            .filter(|c| !c.is_negative())
            .ok_or(ConfigError::InvalidValue { key, value }),
        Err(_) => Ok(default),
    }
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
    /// Rate limit requests per second (per client IP)
    pub rate_limit_rps: u32,
    /// Rate limit burst
    pub rate_limit_burst: u32,
    /// Max request body size
    pub max_body_size: usize,
    /// Environment (development/production)
    pub environment: String,
    /// HMAC key for `X-Webhook-Signature` on billing and internal routes.
    /// Those routes reject every request while unset.
    pub webhook_secret: Option<String>,
    /// OAuth client IDs accepted as ID token audiences (web and extension).
    pub google_client_ids: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: vec!["*".to_string()],
            rate_limit_rps: 10,
            rate_limit_burst: 20,
            max_body_size: 1024 * 1024,
            environment: "development".to_string(),
            webhook_secret: None,
            google_client_ids: Vec::new(),
        }
    }
}

impl ApiConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("API_HOST").unwrap_or(defaults.host),
            port: env_or("API_PORT", defaults.port),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(defaults.cors_origins),
            rate_limit_rps: env_or("RATE_LIMIT_RPS", defaults.rate_limit_rps),
            rate_limit_burst: env_or("RATE_LIMIT_BURST", defaults.rate_limit_burst),
            max_body_size: env_or("MAX_BODY_SIZE", defaults.max_body_size),
            environment: std::env::var("ENVIRONMENT").unwrap_or(defaults.environment),
            webhook_secret: std::env::var("WEBHOOK_SECRET").ok().filter(|s| !s.is_empty()),
            google_client_ids: std::env::var("GOOGLE_CLIENT_IDS")
                .map(|s| {
                    s.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    /// Check if running in production mode.
    pub fn is_production(&self) -> bool {
        self.environment.to_lowercase() == "production"
    }
}

/// Where ledger rows or holds live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    /// In-process; lost on restart.
    Memory,
    Firestore,
}

impl StoreBackend {
    fn from_env(key: &'static str, default: StoreBackend) -> Result<Self, ConfigError> {
        match std::env::var(key) {
            Ok(value) => match value.to_lowercase().as_str() {
                "memory" => Ok(StoreBackend::Memory),
                "firestore" => Ok(StoreBackend::Firestore),
                _ => Err(ConfigError::InvalidValue { key, value }),
            },
            Err(_) => Ok(default),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StoreBackend::Memory => "memory",
            StoreBackend::Firestore => "firestore",
        }
    }
}

/// Credit accounting configuration.
#[derive(Debug, Clone)]
pub struct CreditConfig {
    /// Age after which the sweep force-releases a hold.
    pub hold_ttl: Duration,
    /// Interval between hold sweeps.
    pub sweep_interval: Duration,
    pub sweep_enabled: bool,
    /// Balance free accounts are raised to by `reset_free_credits`.
    pub free_tier_floor: Credits,
    /// Balance of a newly created account.
    pub signup_credits: Credits,
    pub plans: PlanCatalog,
    pub ledger_backend: StoreBackend,
    /// `Memory` keeps holds process-local; `Firestore` shares them across instances.
    pub hold_backend: StoreBackend,
}

impl Default for CreditConfig {
    fn default() -> Self {
        Self {
            hold_ttl: Duration::from_secs(DEFAULT_HOLD_TTL_SECS),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            sweep_enabled: true,
            free_tier_floor: FREE_TIER_FLOOR,
            signup_credits: SIGNUP_CREDITS,
            plans: PlanCatalog::default(),
            ledger_backend: StoreBackend::Firestore,
            hold_backend: StoreBackend::Memory,
        }
    }
}

impl CreditConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let plans = match std::env::var("PLAN_CATALOG_JSON") {
            Ok(json) => PlanCatalog::from_json(&json)?,
            Err(_) => defaults.plans,
        };

        Ok(Self {
            hold_ttl: env_hold_ttl("HOLD_TTL_SECS", DEFAULT_HOLD_TTL_SECS)?,
            sweep_interval: Duration::from_secs(env_or(
                "HOLD_SWEEP_INTERVAL_SECS",
                DEFAULT_SWEEP_INTERVAL_SECS,
            )),
            sweep_enabled: env_flag("ENABLE_HOLD_SWEEP", defaults.sweep_enabled),
            free_tier_floor: env_credits("FREE_TIER_FLOOR", defaults.free_tier_floor)?,
            signup_credits: env_credits("SIGNUP_CREDITS", defaults.signup_credits)?,
            plans,
            ledger_backend: StoreBackend::from_env("LEDGER_BACKEND", defaults.ledger_backend)?,
            hold_backend: StoreBackend::from_env("HOLD_BACKEND", defaults.hold_backend)?,
        })
    }
}

/// Paid operation configuration: prices, timeouts and deduct retries.
#[derive(Debug, Clone)]
pub struct OperationConfig {
    pub scrape_price: Credits,
    pub message_price: Credits,
    pub email_price: Credits,
    /// Covers submit, every poll and the final fetch.
    pub scrape_timeout: Duration,
    pub scrape_poll_interval: Duration,
    pub message_timeout: Duration,
    pub email_timeout: Duration,
    /// Attempts at the post-success deduction before giving up.
    pub deduct_attempts: u32,
    pub deduct_retry_base: Duration,
}

impl Default for OperationConfig {
    fn default() -> Self {
        Self {
            scrape_price: PROFILE_SCRAPE_COST,
            message_price: MESSAGE_GENERATION_COST,
            email_price: EMAIL_LOOKUP_COST,
            scrape_timeout: Duration::from_secs(120),
            scrape_poll_interval: Duration::from_secs(3),
            message_timeout: Duration::from_secs(60),
            email_timeout: Duration::from_secs(30),
            deduct_attempts: 3,
            deduct_retry_base: Duration::from_millis(200),
        }
    }
}

impl OperationConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            scrape_price: env_credits("PRICE_PROFILE_SCRAPE", defaults.scrape_price)?,
            message_price: env_credits("PRICE_MESSAGE_GENERATION", defaults.message_price)?,
            email_price: env_credits("PRICE_EMAIL_LOOKUP", defaults.email_price)?,
            scrape_timeout: Duration::from_secs(env_or("SCRAPE_TIMEOUT_SECS", 120)),
            scrape_poll_interval: Duration::from_millis(env_or("SCRAPE_POLL_INTERVAL_MS", 3000)),
            message_timeout: Duration::from_secs(env_or("MESSAGE_TIMEOUT_SECS", 60)),
            email_timeout: Duration::from_secs(env_or("EMAIL_TIMEOUT_SECS", 30)),
            deduct_attempts: env_or("DEDUCT_MAX_ATTEMPTS", defaults.deduct_attempts).max(1),
            deduct_retry_base: Duration::from_millis(env_or("DEDUCT_RETRY_BASE_MS", 200)),
        })
    }

    /// Configured price of one operation.
    pub fn price_of(&self, operation: OperationKind) -> Credits {
        match operation {
            OperationKind::Scrape => self.scrape_price,
            OperationKind::Message => self.message_price,
            OperationKind::EmailLookup => self.email_price,
        }
    }
}
