//! Server configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `DATABASE_URL` - `PostgreSQL` connection string
//! - `FRONTEND_URL` - Storefront origin, used for checkout return URLs and CORS
//! - `STRIPE_SECRET_KEY` - Payment provider API key
//! - `STRIPE_WEBHOOK_SECRET` - Webhook signing secret
//! - `IDENTITY_JWT_SECRET` - Shared secret for verifying identity tokens
//!
//! ## Optional
//! - `HOST` - Bind address (default: 127.0.0.1)
//! - `PORT` - Listen port (default: 8000)
//! - `EXTRA_CORS_ORIGINS` - Comma-separated additional allowed origins
//! - `CURRENCY` - Store currency (default: USD)
//! - `REQUEST_TIMEOUT_SECS` - Per-request timeout (default: 30)
//! - `STRIPE_API_BASE` - Payment provider API base URL (default: <https://api.stripe.com>)
//! - `STRIPE_TIMEOUT_SECS` - Payment provider call timeout (default: 10)
//! - `WEBHOOK_TOLERANCE_SECS` - Accepted webhook timestamp skew (default: 300)
//! - `IDENTITY_JWT_ISSUER` - Required `iss` claim, if set
//! - `LOG_FORMAT` - `json` for structured logs, text otherwise
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT`, `SENTRY_SAMPLE_RATE`, `SENTRY_TRACES_SAMPLE_RATE`

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;
use url::Url;

use shopwright_core::CurrencyCode;

const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;
const MIN_JWT_SECRET_LENGTH: usize = 32;
const DEFAULT_STRIPE_API_BASE: &str = "https://api.stripe.com";

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "password",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "enter-",
    "put-your",
    "add-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// `PostgreSQL` database connection URL (contains password)
    pub database_url: SecretString,
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Storefront origin
    pub frontend_url: Url,
    /// Additional CORS origins
    pub extra_cors_origins: Vec<String>,
    /// Currency of catalog prices
    pub currency: CurrencyCode,
    /// Upper bound for handling one request
    pub request_timeout: Duration,
    /// Payment provider configuration
    pub stripe: StripeConfig,
    /// Identity token verification
    pub identity: IdentityConfig,
    pub log_format: LogFormat,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment (e.g., "development", "staging", "production")
    pub sentry_environment: Option<String>,
    /// Sentry error sample rate (0.0 to 1.0)
    pub sentry_sample_rate: f32,
    /// Sentry traces sample rate for performance monitoring (0.0 to 1.0)
    pub sentry_traces_sample_rate: f32,
}

/// Payment provider configuration.
///
/// Implements `Debug` manually to redact the API key and signing secret.
#[derive(Clone)]
pub struct StripeConfig {
    /// Secret API key
    pub secret_key: SecretString,
    /// Webhook signing secret
    pub webhook_secret: SecretString,
    /// API base URL
    pub api_base: Url,
    /// Timeout for API calls
    pub timeout: Duration,
    /// Maximum age of a webhook signature timestamp
    pub webhook_tolerance: Duration,
}

impl std::fmt::Debug for StripeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeConfig")
            .field("secret_key", &"[REDACTED]")
            .field("webhook_secret", &"[REDACTED]")
            .field("api_base", &self.api_base.as_str())
            .field("timeout", &self.timeout)
            .field("webhook_tolerance", &self.webhook_tolerance)
            .finish()
    }
}

/// Identity token verification settings.
///
/// Implements `Debug` manually to redact the shared secret.
#[derive(Clone)]
pub struct IdentityConfig {
    /// HS256 shared secret
    pub jwt_secret: SecretString,
    /// Expected issuer, if any
    pub issuer: Option<String>,
}

impl std::fmt::Debug for IdentityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityConfig")
            .field("jwt_secret", &"[REDACTED]")
            .field("issuer", &self.issuer)
            .finish()
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, or
    /// if secrets fail validation (placeholder detection, entropy check).
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database_url = SecretString::from(get_required_env("DATABASE_URL")?);
        let host = get_env_or_default("HOST", "127.0.0.1")
            .parse::<IpAddr>()
            .map_err(|e| ConfigError::InvalidEnvVar("HOST".to_string(), e.to_string()))?;
        let port = get_env_or_default("PORT", "8000")
            .parse::<u16>()
            .map_err(|e| ConfigError::InvalidEnvVar("PORT".to_string(), e.to_string()))?;
        let frontend_url = parse_url("FRONTEND_URL", &get_required_env("FRONTEND_URL")?)?;
        let extra_cors_origins = get_optional_env("EXTRA_CORS_ORIGINS")
            .map(|value| parse_origin_list(&value))
            .unwrap_or_default();
        let currency = get_env_or_default("CURRENCY", "USD")
            .parse::<CurrencyCode>()
            .map_err(|e| ConfigError::InvalidEnvVar("CURRENCY".to_string(), e))?;
        let request_timeout = get_secs("REQUEST_TIMEOUT_SECS", 30)?;

        let stripe = StripeConfig::from_env()?;
        let identity = IdentityConfig::from_env()?;

        let log_format = match get_optional_env("LOG_FORMAT").as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };
        let sentry_dsn = get_optional_env("SENTRY_DSN");
        let sentry_environment = get_optional_env("SENTRY_ENVIRONMENT");
        let sentry_sample_rate = get_optional_env("SENTRY_SAMPLE_RATE")
            .and_then(|s| s.parse().ok())
            .unwrap_or(1.0);
        let sentry_traces_sample_rate = get_optional_env("SENTRY_TRACES_SAMPLE_RATE")
            .and_then(|s| s.parse().ok())
            .unwrap_or(0.1);

        Ok(Self {
            database_url,
            host,
            port,
            frontend_url,
            extra_cors_origins,
            currency,
            request_timeout,
            stripe,
            identity,
            log_format,
            sentry_dsn,
            sentry_environment,
            sentry_sample_rate,
            sentry_traces_sample_rate,
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Origins allowed by CORS: the frontend plus any extras.
    #[must_use]
    pub fn cors_origins(&self) -> Vec<String> {
        let mut origins = vec![self.frontend_url.origin().ascii_serialization()];
        for origin in &self.extra_cors_origins {
            if !origins.contains(origin) {
                origins.push(origin.clone());
            }
        }
        origins
    }
}

impl StripeConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let api_base = parse_url(
            "STRIPE_API_BASE",
            &get_env_or_default("STRIPE_API_BASE", DEFAULT_STRIPE_API_BASE),
        )?;
        Ok(Self {
            secret_key: get_validated_secret("STRIPE_SECRET_KEY")?,
            webhook_secret: get_validated_secret("STRIPE_WEBHOOK_SECRET")?,
            api_base,
            timeout: get_secs("STRIPE_TIMEOUT_SECS", 10)?,
            webhook_tolerance: get_secs("WEBHOOK_TOLERANCE_SECS", 300)?,
        })
    }
}

impl IdentityConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let secret = get_required_env("IDENTITY_JWT_SECRET")?;
        validate_secret_strength(&secret, "IDENTITY_JWT_SECRET")?;
        validate_min_length(&secret, MIN_JWT_SECRET_LENGTH, "IDENTITY_JWT_SECRET")?;
        Ok(Self {
            jwt_secret: SecretString::from(secret),
            issuer: get_optional_env("IDENTITY_JWT_ISSUER"),
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get an optional environment variable. Blank values count as unset.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    get_optional_env(key).unwrap_or_else(|| default.to_string())
}

/// Get a positive number of seconds.
fn get_secs(key: &str, default: u64) -> Result<Duration, ConfigError> {
    let secs = get_env_or_default(key, &default.to_string())
        .parse::<u64>()
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))?;
    if secs == 0 {
        return Err(ConfigError::InvalidEnvVar(
            key.to_string(),
            "must be greater than zero".to_string(),
        ));
    }
    Ok(Duration::from_secs(secs))
}

fn parse_url(key: &str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

/// Split a comma-separated origin list, dropping blanks and trailing slashes.
fn parse_origin_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|origin| origin.trim().trim_end_matches('/'))
        .filter(|origin| !origin.is_empty())
        .map(String::from)
        .collect()
}

fn validate_min_length(secret: &str, min: usize, var_name: &str) -> Result<(), ConfigError> {
    if secret.len() < min {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!("must be at least {min} characters (got {})", secret.len()),
        ));
    }
    Ok(())
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.len() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)] // Character count will never exceed f64 precision
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1}). Use a randomly generated secret."
            ),
        ));
    }

    Ok(())
}

/// Load and validate a secret from environment.
fn get_validated_secret(key: &str) -> Result<SecretString, ConfigError> {
    let value = get_required_env(key)?;
    validate_secret_strength(&value, key)?;
    Ok(SecretString::from(value))
}
