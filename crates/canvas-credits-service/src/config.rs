//! Service configuration.

use serde::Deserialize;
use std::path::Path;

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// Path to `RocksDB` data directory (default: "/data/canvas-credits").
    pub data_dir: String,

    /// JWT issuer base URL; JWKS is fetched from `{auth_base_url}/.well-known/jwks.json`.
    pub auth_base_url: String,

    /// Expected JWT audience (default: "canvas-credits").
    pub auth_audience: String,

    /// Service API key for service-to-service auth.
    pub service_api_key: Option<String>,

    /// Admin API key for manual adjustments.
    pub admin_api_key: Option<String>,

    /// Shared secret for payment webhook signatures. Verification is skipped when unset.
    pub payment_webhook_secret: Option<String>,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,

    /// Return the earlier purchase when an external reference repeats.
    pub dedupe_purchases: bool,

    /// How many times a conflicting transaction is retried.
    pub consume_max_retries: u32,
}

/// Payment secrets file structure.
#[derive(Debug, Deserialize)]
struct PaymentSecrets {
    webhook_secret: String,
}

impl ServiceConfig {
    /// Load configuration from environment variables and secrets files.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or(defaults.listen_addr),
            data_dir: std::env::var("DATA_DIR").unwrap_or(defaults.data_dir),
            auth_base_url: std::env::var("AUTH_BASE_URL").unwrap_or(defaults.auth_base_url),
            auth_audience: std::env::var("AUTH_AUDIENCE").unwrap_or(defaults.auth_audience),
            service_api_key: std::env::var("SERVICE_API_KEY").ok(),
            admin_api_key: std::env::var("ADMIN_API_KEY").ok(),
            payment_webhook_secret: load_payment_webhook_secret(),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|s| parse_origins(&s))
                .unwrap_or(defaults.cors_origins),
            max_body_bytes: env_parse("MAX_BODY_BYTES").unwrap_or(defaults.max_body_bytes),
            request_timeout_seconds: env_parse("REQUEST_TIMEOUT_SECONDS")
                .unwrap_or(defaults.request_timeout_seconds),
            dedupe_purchases: std::env::var("DEDUPE_PURCHASES")
                .map(|s| parse_flag(&s))
                .unwrap_or(defaults.dedupe_purchases),
            consume_max_retries: env_parse("CONSUME_MAX_RETRIES")
                .unwrap_or(defaults.consume_max_retries),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

fn parse_origins(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Load the payment webhook secret from file or environment.
fn load_payment_webhook_secret() -> Option<String> {
    let secret_paths = [
        ".secrets/payments.json",
        "canvas-credits/.secrets/payments.json",
        "../.secrets/payments.json",
    ];

    for path in &secret_paths {
        if let Ok(secrets) = load_secrets_file::<PaymentSecrets>(path) {
            tracing::info!(path = %path, "Loaded payment secrets from file");
            return Some(secrets.webhook_secret);
        }
    }

    tracing::debug!("Payment secrets file not found, using environment variables");
    std::env::var("PAYMENT_WEBHOOK_SECRET").ok()
}

/// Load secrets from a JSON file.
fn load_secrets_file<T: serde::de::DeserializeOwned>(path: &str) -> Result<T, std::io::Error> {
    let path = Path::new(path);
    if !path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Secrets file not found",
        ));
    }
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            data_dir: "/data/canvas-credits".into(),
            auth_base_url: "http://localhost:3210".into(),
            auth_audience: "canvas-credits".into(),
            service_api_key: None,
            admin_api_key: None,
            payment_webhook_secret: None,
            cors_origins: vec!["*".into()],
            max_body_bytes: 1024 * 1024,
            request_timeout_seconds: 30,
            dedupe_purchases: false,
            consume_max_retries: 5,
        }
    }
}
