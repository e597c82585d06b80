//! Shared fixtures for the integration tests
#![allow(dead_code)]

use payment_integrity_backend::config::{
    Config, DatabaseConfig, EntitlementConfig, GatewayConfig, ReconciliationConfig, Secret,
    ServerConfig,
};
use payment_integrity_backend::database::memory::InMemoryPaymentStore;
use payment_integrity_backend::payments::alerts::RecordingAlertSink;
use payment_integrity_backend::payments::audit::CountingEntitlementService;
use payment_integrity_backend::payments::processor::{NotificationProcessor, ProcessorConfig};
use payment_integrity_backend::payments::providers::PayuMode;
use payment_integrity_backend::payments::reconciler::RetryPolicy;
use payment_integrity_backend::payments::request::{PaymentIntent, RequestBuilder, TransactionRequest};
use std::sync::Arc;
use std::time::Duration;

pub const MERCHANT_KEY: &str = "gtKFFx";
pub const SALT: &str = "eCwWELxi";

pub fn gateway_config() -> GatewayConfig {
    GatewayConfig {
        merchant_key: MERCHANT_KEY.to_string(),
        merchant_salt: Secret::new(SALT),
        mode: PayuMode::Test,
        success_url: "https://shop.example.com/payments/success".to_string(),
        failure_url: "https://shop.example.com/payments/failure".to_string(),
        result_url: "https://shop.example.com/billing/result".to_string(),
        require_https: false,
    }
}

pub fn app_config() -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8080,
            environment: "development".to_string(),
        },
        database: DatabaseConfig {
            url: "postgres://localhost/payments".to_string(),
            max_connections: 5,
        },
        gateway: gateway_config(),
        entitlements: EntitlementConfig {
            base_url: "http://entitlements.invalid".to_string(),
            timeout_secs: 1,
        },
        reconciliation: ReconciliationConfig {
            max_attempts: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 4,
            claim_lease_secs: 900,
            manual_reconciliation_window_hours: 24,
            unknown_status_alert_threshold: 3,
        },
    }
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(4),
        call_timeout: Duration::from_secs(1),
    }
}

pub fn intent(amount: &str) -> PaymentIntent {
    PaymentIntent {
        payment_record_id: "sub_77".to_string(),
        user_id: "42".to_string(),
        amount: amount.to_string(),
        product_info: "Pro plan".to_string(),
        payer_name: "Asha".to_string(),
        payer_email: "asha@example.com".to_string(),
        udf1: None,
        udf2: None,
        udf5: None,
        success_url: None,
        failure_url: None,
    }
}

/// Request builder and processor sharing one in-memory store
pub struct Harness {
    pub store: Arc<InMemoryPaymentStore>,
    pub entitlements: Arc<CountingEntitlementService>,
    pub alerts: Arc<RecordingAlertSink>,
    pub builder: RequestBuilder,
    pub processor: NotificationProcessor,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(CountingEntitlementService::new(), fast_retry())
    }

    pub fn with(entitlements: CountingEntitlementService, retry: RetryPolicy) -> Self {
        Self::with_window(entitlements, retry, Duration::from_secs(24 * 3600))
    }

    pub fn with_window(
        entitlements: CountingEntitlementService,
        retry: RetryPolicy,
        manual_reconciliation_window: Duration,
    ) -> Self {
        let store = Arc::new(InMemoryPaymentStore::default());
        let entitlements = Arc::new(entitlements);
        let alerts = Arc::new(RecordingAlertSink::new());

        let processor = NotificationProcessor::new(
            store.clone(),
            entitlements.clone(),
            alerts.clone(),
            ProcessorConfig {
                merchant_key: MERCHANT_KEY.to_string(),
                merchant_salt: Secret::new(SALT),
                retry,
                manual_reconciliation_window,
                unknown_status_alert_threshold: 3,
            },
        );

        Self {
            builder: RequestBuilder::new(gateway_config(), store.clone()),
            store,
            entitlements,
            alerts,
            processor,
        }
    }

    pub async fn issue(&self, amount: &str) -> TransactionRequest {
        self.builder
            .build(&intent(amount))
            .await
            .expect("request should build")
    }
}
