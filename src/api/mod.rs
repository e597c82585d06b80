pub mod health;
pub mod payments;

use crate::config::Config;
use crate::database::repository::PaymentStore;
use crate::payments::processor::{NotificationProcessor, ProcessorConfig};
use crate::payments::request::RequestBuilder;
use crate::payments::traits::{AlertSink, EntitlementService};
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub builder: Arc<RequestBuilder>,
    pub processor: Arc<NotificationProcessor>,
    pub store: Arc<dyn PaymentStore>,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<dyn PaymentStore>,
        entitlements: Arc<dyn EntitlementService>,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        let builder = RequestBuilder::new(config.gateway.clone(), store.clone());
        let processor = NotificationProcessor::new(
            store.clone(),
            entitlements,
            alerts,
            ProcessorConfig::from_config(&config),
        );

        Self {
            config: Arc::new(config),
            builder: Arc::new(builder),
            processor: Arc::new(processor),
            store,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/payments/initiate", post(payments::initiate))
        .route("/payments/webhook", post(payments::webhook))
        .route("/payments/success", post(payments::redirect_callback))
        .route("/payments/failure", post(payments::redirect_callback))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .with_state(state)
}
