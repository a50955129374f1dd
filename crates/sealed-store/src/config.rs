//! Configuration loading and validation for the service.
//!
//! All values are read from environment variables at startup. The process
//! exits with a clear error message if any required variable is missing or
//! any value is out of range.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::retry::{RetryPolicy, RetryScope};

/// Configuration could not be loaded or is invalid.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A variable is missing or cannot be parsed into its field type.
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// A variable parsed but its value is unusable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Where key versions come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyProviderKind {
    /// AWS KMS, one asymmetric key per version.
    Kms,
    /// In-process keys. Lost on restart; development only.
    Local,
}

/// Where records are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    S3,
    Memory,
}

/// Validated service configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_key_provider")]
    pub key_provider: KeyProviderKind,

    /// Logical key name versions are grouped under. **Required.**
    pub key_name: String,

    #[serde(default = "default_store_backend")]
    pub store_backend: StoreBackend,

    /// Bucket holding record objects. Required when `STORE_BACKEND=s3`.
    #[serde(default)]
    pub s3_bucket: Option<String>,

    /// Key prefix under which record objects are written.
    #[serde(default = "default_s3_prefix")]
    pub s3_prefix: String,

    /// Endpoint override for KMS and S3 (e.g. LocalStack).
    #[serde(default)]
    pub aws_endpoint_url: Option<String>,

    /// Record field that is sealed at rest.
    #[serde(default = "default_sensitive_field")]
    pub sensitive_field: String,

    /// Port the HTTP server listens on.
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,

    #[serde(default = "default_retry_min_wait")]
    pub retry_min_wait_secs: u64,

    #[serde(default = "default_retry_max_wait")]
    pub retry_max_wait_secs: u64,

    #[serde(default = "default_retry_multiplier")]
    pub retry_multiplier: f64,

    /// `transient` retries only transient store errors; `any` retries everything.
    #[serde(default)]
    pub retry_scope: RetryScope,

    /// How often (seconds) to re-read the active key version.
    #[serde(default = "default_key_refresh_interval")]
    pub key_refresh_interval_secs: u64,

    #[serde(default = "default_page_size")]
    pub default_page_size: usize,

    #[serde(default = "default_max_page_size")]
    pub max_page_size: usize,

    /// OTLP/gRPC collector endpoint. Span export is off when unset.
    #[serde(default)]
    pub otel_exporter_otlp_endpoint: Option<String>,

    /// Tracing log level (e.g. `"info"`, `"debug"`).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_key_provider() -> KeyProviderKind {
    KeyProviderKind::Local
}
fn default_store_backend() -> StoreBackend {
    StoreBackend::Memory
}
fn default_s3_prefix() -> String {
    "items/".into()
}
fn default_sensitive_field() -> String {
    "name".into()
}
fn default_listen_port() -> u16 {
    8080
}
fn default_request_timeout() -> u64 {
    crate::server::middleware::REQUEST_TIMEOUT.as_secs()
}
fn default_retry_max_attempts() -> u32 {
    5
}
fn default_retry_min_wait() -> u64 {
    4
}
fn default_retry_max_wait() -> u64 {
    10
}
fn default_retry_multiplier() -> f64 {
    1.0
}
fn default_key_refresh_interval() -> u64 {
    300
}
fn default_page_size() -> usize {
    100
}
fn default_max_page_size() -> usize {
    1000
}
fn default_log_level() -> String {
    "info".into()
}

impl Config {
    /// Load and validate configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if any required variable is absent, cannot be parsed,
    /// or fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(config::Environment::default())
    }

    fn load(source: config::Environment) -> Result<Self, ConfigError> {
        let mut cfg: Config = config::Config::builder()
            .add_source(source)
            .build()?
            .try_deserialize()?;

        // An exported-but-empty variable means "unset".
        for opt in [
            &mut cfg.s3_bucket,
            &mut cfg.aws_endpoint_url,
            &mut cfg.otel_exporter_otlp_endpoint,
        ] {
            if opt.as_deref().is_some_and(|v| v.trim().is_empty()) {
                *opt = None;
            }
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Validate all fields, returning a descriptive error on the first failure.
    fn validate(&self) -> Result<(), ConfigError> {
        ensure_non_empty(&self.key_name, "KEY_NAME")?;
        ensure_non_empty(&self.sensitive_field, "SENSITIVE_FIELD")?;
        if self.sensitive_field == crate::record::ID_FIELD {
            return Err(invalid("SENSITIVE_FIELD cannot be the record id"));
        }
        if self.store_backend == StoreBackend::S3 && self.s3_bucket.is_none() {
            return Err(invalid("S3_BUCKET is required when STORE_BACKEND=s3"));
        }
        if self.request_timeout_secs == 0 {
            return Err(invalid("REQUEST_TIMEOUT_SECS must be > 0"));
        }
        if self.retry_max_attempts == 0 {
            return Err(invalid("RETRY_MAX_ATTEMPTS must be >= 1"));
        }
        if self.retry_min_wait_secs > self.retry_max_wait_secs {
            return Err(invalid("RETRY_MIN_WAIT_SECS must not exceed RETRY_MAX_WAIT_SECS"));
        }
        if !self.retry_multiplier.is_finite() || self.retry_multiplier <= 0.0 {
            return Err(invalid("RETRY_MULTIPLIER must be a positive number"));
        }
        let backoff = self.retry_policy().total_backoff();
        if self.request_timeout() <= backoff {
            return Err(ConfigError::Invalid(format!(
                "REQUEST_TIMEOUT_SECS must exceed the total retry backoff of {}s",
                backoff.as_secs()
            )));
        }
        if self.key_refresh_interval_secs == 0 {
            return Err(invalid("KEY_REFRESH_INTERVAL_SECS must be > 0"));
        }
        if self.max_page_size == 0 {
            return Err(invalid("MAX_PAGE_SIZE must be > 0"));
        }
        if self.default_page_size == 0 || self.default_page_size > self.max_page_size {
            return Err(invalid("DEFAULT_PAGE_SIZE must be between 1 and MAX_PAGE_SIZE"));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts,
            min_wait: Duration::from_secs(self.retry_min_wait_secs),
            max_wait: Duration::from_secs(self.retry_max_wait_secs),
            multiplier: self.retry_multiplier,
            scope: self.retry_scope,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn key_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.key_refresh_interval_secs)
    }
}

fn invalid(msg: &str) -> ConfigError {
    ConfigError::Invalid(msg.into())
}

fn ensure_non_empty(value: &str, name: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Invalid(format!(
            "{name} is required and must not be empty"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::load(config::Environment::default().source(Some(map)))
    }

    #[test]
    fn defaults_are_correct() {
        let cfg = load(&[("KEY_NAME", "items")]).unwrap();
        assert_eq!(cfg.key_provider, KeyProviderKind::Local);
        assert_eq!(cfg.store_backend, StoreBackend::Memory);
        assert_eq!(cfg.s3_prefix, "items/");
        assert_eq!(cfg.sensitive_field, "name");
        assert_eq!(cfg.listen_port, 8080);
        assert_eq!(cfg.request_timeout(), Duration::from_secs(60));
        assert_eq!(cfg.key_refresh_interval(), Duration::from_secs(300));
        assert_eq!(cfg.default_page_size, 100);
        assert_eq!(cfg.max_page_size, 1000);
        assert_eq!(cfg.log_level, "info");
        assert!(cfg.otel_exporter_otlp_endpoint.is_none());
        assert_eq!(cfg.retry_policy(), RetryPolicy::default());
    }

    #[test]
    fn key_name_is_required() {
        assert!(matches!(load(&[]), Err(ConfigError::Load(_))));
        assert!(matches!(
            load(&[("KEY_NAME", "  ")]),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn parses_backends_and_retry_settings() {
        let cfg = load(&[
            ("KEY_NAME", "items"),
            ("KEY_PROVIDER", "kms"),
            ("STORE_BACKEND", "s3"),
            ("S3_BUCKET", "records"),
            ("RETRY_MAX_ATTEMPTS", "3"),
            ("RETRY_SCOPE", "any"),
            ("AWS_ENDPOINT_URL", ""),
        ])
        .unwrap();
        assert_eq!(cfg.key_provider, KeyProviderKind::Kms);
        assert_eq!(cfg.store_backend, StoreBackend::S3);
        assert_eq!(cfg.s3_bucket.as_deref(), Some("records"));
        assert!(cfg.aws_endpoint_url.is_none());
        let retry = cfg.retry_policy();
        assert_eq!(retry.max_attempts, 3);
        assert_eq!(retry.scope, RetryScope::Any);
    }

    #[test]
    fn s3_backend_requires_bucket() {
        assert!(matches!(
            load(&[("KEY_NAME", "items"), ("STORE_BACKEND", "s3")]),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn rejects_out_of_range_values() {
        for bad in [
            ("RETRY_MAX_ATTEMPTS", "0"),
            ("RETRY_MIN_WAIT_SECS", "20"),
            ("RETRY_MULTIPLIER", "0"),
            ("KEY_REFRESH_INTERVAL_SECS", "0"),
            ("DEFAULT_PAGE_SIZE", "5000"),
            ("SENSITIVE_FIELD", "id"),
            ("REQUEST_TIMEOUT_SECS", "20"),
        ] {
            assert!(
                matches!(load(&[("KEY_NAME", "items"), bad]), Err(ConfigError::Invalid(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn request_timeout_must_outlast_retry_backoff() {
        let cfg = load(&[
            ("KEY_NAME", "items"),
            ("REQUEST_TIMEOUT_SECS", "10"),
            ("RETRY_MAX_ATTEMPTS", "2"),
        ])
        .unwrap();
        assert_eq!(cfg.retry_policy().total_backoff(), Duration::from_secs(4));

        let err = load(&[
            ("KEY_NAME", "items"),
            ("REQUEST_TIMEOUT_SECS", "30"),
            ("RETRY_MAX_WAIT_SECS", "60"),
            ("RETRY_MULTIPLIER", "4"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("retry backoff"), "{err}");
    }

    #[test]
    fn rejects_unknown_provider() {
        assert!(matches!(
            load(&[("KEY_NAME", "items"), ("KEY_PROVIDER", "vault")]),
            Err(ConfigError::Load(_))
        ));
    }
}
