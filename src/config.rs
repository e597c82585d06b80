use crate::payments::providers::payu::PayuMode;
use crate::payments::signature::FIELD_SEPARATOR;
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::env;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub gateway: GatewayConfig,
    pub entitlements: EntitlementConfig,
    pub reconciliation: ReconciliationConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// Shared secret that never shows up in `Debug` output
#[derive(Clone, Deserialize)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Merchant credentials and redirect targets, passed explicitly to every
/// payment component.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    pub merchant_key: String,
    pub merchant_salt: Secret,
    pub mode: PayuMode,
    pub success_url: String,
    pub failure_url: String,
    /// Front-end page users land on after a redirect callback
    pub result_url: String,
    /// Redirect URLs must use https (production)
    pub require_https: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EntitlementConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

/// One year
pub const MAX_MANUAL_RECONCILIATION_WINDOW_HOURS: u64 = 24 * 366;

#[derive(Debug, Clone, Deserialize)]
pub struct ReconciliationConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub claim_lease_secs: u64,
    pub manual_reconciliation_window_hours: u64,
    pub unknown_status_alert_threshold: i64,
}

impl ReconciliationConfig {
    pub fn claim_lease(&self) -> Duration {
        Duration::from_secs(self.claim_lease_secs)
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| anyhow!("{} must be a valid number, got {}", name, value)),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let server = ServerConfig {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT")
                .context("PORT not set")?
                .parse()
                .context("PORT must be a valid number")?,
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        };

        let database = DatabaseConfig {
            url: env::var("DATABASE_URL").context("DATABASE_URL not set")?,
            max_connections: env_or("DATABASE_MAX_CONNECTIONS", 20)?,
        };

        let mode = env::var("PAYU_MODE")
            .unwrap_or_else(|_| "test".to_string())
            .parse::<PayuMode>()
            .map_err(|e| anyhow!(e))?;

        let gateway = GatewayConfig {
            merchant_key: env::var("PAYU_MERCHANT_KEY").context("PAYU_MERCHANT_KEY not set")?,
            merchant_salt: Secret::new(
                env::var("PAYU_MERCHANT_SALT").context("PAYU_MERCHANT_SALT not set")?,
            ),
            mode,
            success_url: env::var("PAYMENT_SUCCESS_URL").context("PAYMENT_SUCCESS_URL not set")?,
            failure_url: env::var("PAYMENT_FAILURE_URL").context("PAYMENT_FAILURE_URL not set")?,
            result_url: env::var("PAYMENT_RESULT_URL").context("PAYMENT_RESULT_URL not set")?,
            require_https: server.environment == "production",
        };

        let entitlements = EntitlementConfig {
            base_url: env::var("ENTITLEMENT_SERVICE_URL")
                .context("ENTITLEMENT_SERVICE_URL not set")?,
            timeout_secs: env_or("ENTITLEMENT_TIMEOUT_SECS", 10)?,
        };

        let reconciliation = ReconciliationConfig {
            max_attempts: env_or("SIDE_EFFECT_MAX_ATTEMPTS", 5)?,
            initial_backoff_ms: env_or("SIDE_EFFECT_INITIAL_BACKOFF_MS", 500)?,
            max_backoff_ms: env_or("SIDE_EFFECT_MAX_BACKOFF_MS", 8_000)?,
            claim_lease_secs: env_or("IDEMPOTENCY_CLAIM_LEASE_SECS", 900)?,
            manual_reconciliation_window_hours: env_or("MANUAL_RECONCILIATION_WINDOW_HOURS", 24)?,
            unknown_status_alert_threshold: env_or("UNKNOWN_STATUS_ALERT_THRESHOLD", 3)?,
        };

        let config = Config {
            server,
            database,
            gateway,
            entitlements,
            reconciliation,
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

        if self.database.url.trim().is_empty() {
            return Err(anyhow!("DATABASE_URL cannot be empty"));
        }

        if self.database.max_connections == 0 {
            return Err(anyhow!("DATABASE_MAX_CONNECTIONS must be greater than 0"));
        }

        if self.gateway.merchant_key.trim().is_empty() {
            return Err(anyhow!("PAYU_MERCHANT_KEY cannot be empty"));
        }

        if self.gateway.merchant_salt.expose().trim().is_empty() {
            return Err(anyhow!("PAYU_MERCHANT_SALT cannot be empty"));
        }

        // Both are hashed as fields of the signed sequence
        if self.gateway.merchant_key.contains(FIELD_SEPARATOR) {
            return Err(anyhow!("PAYU_MERCHANT_KEY must not contain '{}'", FIELD_SEPARATOR));
        }
        if self.gateway.merchant_salt.expose().contains(FIELD_SEPARATOR) {
            return Err(anyhow!("PAYU_MERCHANT_SALT must not contain '{}'", FIELD_SEPARATOR));
        }

        // Live credentials only make sense in production and vice versa
        if self.server.environment == "production" && self.gateway.mode != PayuMode::Live {
            return Err(anyhow!("PAYU_MODE must be 'live' in production"));
        }

        for (name, url) in [
            ("PAYMENT_SUCCESS_URL", &self.gateway.success_url),
            ("PAYMENT_FAILURE_URL", &self.gateway.failure_url),
            ("PAYMENT_RESULT_URL", &self.gateway.result_url),
            ("ENTITLEMENT_SERVICE_URL", &self.entitlements.base_url),
        ] {
            if url.trim().is_empty() {
                return Err(anyhow!("{} cannot be empty", name));
            }
        }

        if self.entitlements.timeout_secs == 0 {
            return Err(anyhow!("ENTITLEMENT_TIMEOUT_SECS must be greater than 0"));
        }

        let reconciliation = &self.reconciliation;
        if reconciliation.max_attempts == 0 || reconciliation.max_attempts > 10 {
            return Err(anyhow!(
                "SIDE_EFFECT_MAX_ATTEMPTS must be between 1 and 10, got {}",
                reconciliation.max_attempts
            ));
        }

        if reconciliation.initial_backoff_ms > reconciliation.max_backoff_ms {
            return Err(anyhow!(
                "SIDE_EFFECT_INITIAL_BACKOFF_MS cannot exceed SIDE_EFFECT_MAX_BACKOFF_MS"
            ));
        }

        if reconciliation.claim_lease_secs == 0 {
            return Err(anyhow!("IDEMPOTENCY_CLAIM_LEASE_SECS must be greater than 0"));
        }

        if reconciliation.manual_reconciliation_window_hours
            > MAX_MANUAL_RECONCILIATION_WINDOW_HOURS
        {
            return Err(anyhow!(
                "MANUAL_RECONCILIATION_WINDOW_HOURS must be at most {}, got {}",
                MAX_MANUAL_RECONCILIATION_WINDOW_HOURS,
                reconciliation.manual_reconciliation_window_hours
            ));
        }

        if reconciliation.unknown_status_alert_threshold < 1 {
            return Err(anyhow!("UNKNOWN_STATUS_ALERT_THRESHOLD must be at least 1"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                environment: "development".to_string(),
            },
            database: DatabaseConfig {
                url: "postgres://localhost/payments".to_string(),
                max_connections: 20,
            },
            gateway: GatewayConfig {
                merchant_key: "gtKFFx".to_string(),
                merchant_salt: Secret::new("eCwWELxi"),
                mode: PayuMode::Test,
                success_url: "http://localhost:8080/payments/success".to_string(),
                failure_url: "http://localhost:8080/payments/failure".to_string(),
                result_url: "http://localhost:3000/billing/result".to_string(),
                require_https: false,
            },
            entitlements: EntitlementConfig {
                base_url: "http://localhost:9000".to_string(),
                timeout_secs: 10,
            },
            reconciliation: ReconciliationConfig {
                max_attempts: 5,
                initial_backoff_ms: 500,
                max_backoff_ms: 8_000,
                claim_lease_secs: 900,
                manual_reconciliation_window_hours: 24,
                unknown_status_alert_threshold: 3,
            },
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_secret_is_redacted_in_debug() {
        let config = valid_config();
        let debug = format!("{:?}", config.gateway);
        assert!(!debug.contains("eCwWELxi"));
        assert!(debug.contains("Secret(***)"));
    }

    #[test]
    fn test_production_requires_live_mode() {
        let mut config = valid_config();
        config.server.environment = "production".to_string();
        assert!(config.validate().is_err());
        config.gateway.mode = PayuMode::Live;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_unbounded_retry_policy() {
        let mut config = valid_config();
        config.reconciliation.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.reconciliation.initial_backoff_ms = 10_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_field_separator_in_credentials() {
        let mut config = valid_config();
        config.gateway.merchant_key = "gtK|FFx".to_string();
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.gateway.merchant_salt = Secret::new("eCw|WELxi");
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("PAYU_MERCHANT_SALT"));
        assert!(!err.contains("eCw"));
    }

    #[test]
    fn test_rejects_oversized_manual_reconciliation_window() {
        let mut config = valid_config();
        config.reconciliation.manual_reconciliation_window_hours = u64::MAX;
        assert!(config.validate().is_err());

        config.reconciliation.manual_reconciliation_window_hours =
            MAX_MANUAL_RECONCILIATION_WINDOW_HOURS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_empty_salt() {
        let mut config = valid_config();
        config.gateway.merchant_salt = Secret::new("  ");
        assert!(config.validate().is_err());
    }
}
