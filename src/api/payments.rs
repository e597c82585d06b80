use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    Form, Json,
};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::api::AppState;
use crate::payments::error::PaymentError;
use crate::payments::processor::Acknowledgement;
use crate::payments::request::PaymentIntent;
use crate::payments::types::{GatewayResponse, NotificationSource};

#[derive(Debug, Serialize, Deserialize)]
pub struct FormField {
    pub name: String,
    pub value: String,
}

/// What the front end needs to post the user to the gateway
#[derive(Debug, Serialize, Deserialize)]
pub struct InitiateResponse {
    pub txn_id: String,
    pub action_url: String,
    pub fields: Vec<FormField>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AckBody {
    pub status: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
        .into_response()
}

pub async fn initiate(
    State(state): State<AppState>,
    Json(intent): Json<PaymentIntent>,
) -> Response {
    match state.builder.build(&intent).await {
        Ok(request) => {
            let fields = request
                .form_fields()
                .into_iter()
                .map(|(name, value)| FormField {
                    name: name.to_string(),
                    value,
                })
                .collect();
            Json(InitiateResponse {
                txn_id: request.txn_id().to_string(),
                action_url: request.action_url().to_string(),
                fields,
            })
            .into_response()
        }
        Err(e @ (PaymentError::Validation { .. } | PaymentError::InvalidField { .. })) => {
            error_response(StatusCode::BAD_REQUEST, e.to_string())
        }
        Err(e) => {
            error!(error = %e, "Failed to initiate payment");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "payment could not be initiated")
        }
    }
}

/// Asynchronous gateway notification. The body never explains a rejection.
pub async fn webhook(
    State(state): State<AppState>,
    Form(message): Form<GatewayResponse>,
) -> Response {
    let result = state
        .processor
        .process(&message, NotificationSource::Webhook)
        .await;

    let (status, body) = match Acknowledgement::for_result(&result) {
        Acknowledgement::Accepted => (StatusCode::OK, "ok"),
        Acknowledgement::Rejected => (StatusCode::BAD_REQUEST, "rejected"),
        Acknowledgement::RetryLater => (StatusCode::INTERNAL_SERVER_ERROR, "retry"),
    };

    (
        status,
        Json(AckBody {
            status: body.to_string(),
        }),
    )
        .into_response()
}

/// Browser redirect from the gateway (`surl` / `furl`)
///
/// The user lands on the result page with the stored state after
/// reconciliation, whatever the inbound message claimed. State is only
/// revealed for messages that passed verification.
pub async fn redirect_callback(
    State(state): State<AppState>,
    Form(message): Form<GatewayResponse>,
) -> Redirect {
    let result = state
        .processor
        .process(&message, NotificationSource::Redirect)
        .await;

    let authentic = matches!(
        result,
        Ok(_) | Err(PaymentError::DuplicateNotification { .. })
    );

    let stored = match GatewayResponse::present(&message.txnid) {
        Some(txn_id) if authentic => match state.store.load_transaction(txn_id).await {
            Ok(found) => found,
            Err(e) => {
                error!(txn_id = %txn_id, error = %e, "Failed to load transaction for redirect");
                None
            }
        },
        _ => None,
    };

    let base = &state.config.gateway.result_url;
    let separator = if base.contains('?') { '&' } else { '?' };
    let target = match stored {
        Some(transaction) => format!(
            "{}{}txnid={}&status={}",
            base,
            separator,
            transaction.txn_id,
            transaction.state.as_db_status()
        ),
        None => format!("{}{}status=unknown", base, separator),
    };

    Redirect::to(&target)
}
