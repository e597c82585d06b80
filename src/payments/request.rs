//! Transaction Request Builder
//!
//! Turns a [`PaymentIntent`] into a signed, immutable [`TransactionRequest`].
//! The transaction is persisted in `Initiated` before the request is handed
//! out, so the gateway can never answer for a transaction we do not know.

use crate::config::GatewayConfig;
use crate::database::repository::PaymentStore;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::providers::payu::{
    fields, request_hash_fields, HashInput, PAYMENT_RECORD_UDF, USER_ID_UDF,
};
use crate::payments::signature::{sign, FIELD_SEPARATOR};
use crate::payments::types::{Amount, NewTransaction};
use chrono::Utc;
use http::Uri;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{info, warn};
use uuid::Uuid;

/// Gateway limit on `txnid`
pub const MAX_TXN_ID_LEN: usize = 25;
const TXN_ID_PREFIX: &str = "TXN";
const MAX_ID_ATTEMPTS: u32 = 3;

/// What the caller wants to charge for
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub payment_record_id: String,
    pub user_id: String,
    /// Decimal amount as text, e.g. `"499.00"`
    pub amount: String,
    pub product_info: String,
    pub payer_name: String,
    pub payer_email: String,
    #[serde(default)]
    pub udf1: Option<String>,
    #[serde(default)]
    pub udf2: Option<String>,
    #[serde(default)]
    pub udf5: Option<String>,
    /// Overrides the configured `surl`
    #[serde(default)]
    pub success_url: Option<String>,
    /// Overrides the configured `furl`
    #[serde(default)]
    pub failure_url: Option<String>,
}

/// Signed outbound payment request. Fields are read-only once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionRequest {
    merchant_key: String,
    txn_id: String,
    amount: Amount,
    product_info: String,
    payer_name: String,
    payer_email: String,
    udf: [String; 5],
    success_url: String,
    failure_url: String,
    hash: String,
    action_url: String,
}

impl TransactionRequest {
    pub fn merchant_key(&self) -> &str {
        &self.merchant_key
    }

    pub fn txn_id(&self) -> &str {
        &self.txn_id
    }

    pub fn amount(&self) -> Amount {
        self.amount
    }

    pub fn product_info(&self) -> &str {
        &self.product_info
    }

    pub fn payer_name(&self) -> &str {
        &self.payer_name
    }

    pub fn payer_email(&self) -> &str {
        &self.payer_email
    }

    pub fn udf(&self) -> &[String; 5] {
        &self.udf
    }

    pub fn success_url(&self) -> &str {
        &self.success_url
    }

    pub fn failure_url(&self) -> &str {
        &self.failure_url
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Gateway endpoint the form must be posted to
    pub fn action_url(&self) -> &str {
        &self.action_url
    }

    /// Wire form fields in posting order
    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        let mut form = vec![
            (fields::KEY, self.merchant_key.clone()),
            (fields::TXNID, self.txn_id.clone()),
            (fields::AMOUNT, self.amount.canonical()),
            (fields::PRODUCTINFO, self.product_info.clone()),
            (fields::FIRSTNAME, self.payer_name.clone()),
            (fields::EMAIL, self.payer_email.clone()),
        ];
        for (name, value) in fields::UDF.iter().zip(self.udf.iter()) {
            form.push((*name, value.clone()));
        }
        form.push((fields::SURL, self.success_url.clone()));
        form.push((fields::FURL, self.failure_url.clone()));
        form.push((fields::HASH, self.hash.clone()));
        form
    }
}

/// Issues transaction ids that are never reused
///
/// Millisecond timestamp, a per-process sequence and a random suffix. The
/// random part keeps ids distinct across processes; the store's primary key
/// is the final guard.
#[derive(Debug, Default)]
pub struct TransactionIdGenerator {
    sequence: AtomicU64,
}

impl TransactionIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed) % 1000;
        let suffix = Uuid::new_v4().simple().to_string();
        format!(
            "{}{}{:03}{}",
            TXN_ID_PREFIX,
            Utc::now().timestamp_millis(),
            seq,
            &suffix[..5]
        )
    }
}

fn email_pattern() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| {
        Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern is a valid regex")
    })
}

fn validate_redirect_url(name: &str, raw: &str, require_https: bool) -> PaymentResult<String> {
    let trimmed = raw.trim();
    let uri: Uri = trimmed
        .parse()
        .map_err(|_| PaymentError::validation(format!("{} is not a valid URL", name)))?;

    let scheme = uri
        .scheme_str()
        .ok_or_else(|| PaymentError::validation(format!("{} must be an absolute URL", name)))?;
    if uri.authority().is_none() {
        return Err(PaymentError::validation(format!(
            "{} must be an absolute URL",
            name
        )));
    }

    match scheme {
        "https" => {}
        "http" if !require_https => {}
        "http" => {
            return Err(PaymentError::validation(format!(
                "{} must use https in production",
                name
            )))
        }
        other => {
            return Err(PaymentError::validation(format!(
                "{} has unsupported scheme '{}'",
                name, other
            )))
        }
    }

    Ok(trimmed.to_string())
}

fn required_text(name: &str, value: &str) -> PaymentResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(PaymentError::validation(format!("{} must not be empty", name)));
    }
    optional_text(name, trimmed)
}

fn optional_text(name: &str, value: &str) -> PaymentResult<String> {
    let trimmed = value.trim();
    if trimmed.contains(FIELD_SEPARATOR) {
        return Err(PaymentError::validation(format!(
            "{} must not contain '{}'",
            name, FIELD_SEPARATOR
        )));
    }
    Ok(trimmed.to_string())
}

fn validate_amount(raw: &str) -> PaymentResult<Amount> {
    let amount = Amount::parse(raw).map_err(|e| match e {
        PaymentError::InvalidField { reason, .. } => {
            PaymentError::validation(format!("amount {}", reason))
        }
        other => other,
    })?;
    // Zero and negative amounts are never issued
    if !amount.is_positive() {
        return Err(PaymentError::validation(format!(
            "amount must be greater than zero, got {}",
            amount
        )));
    }
    Ok(amount)
}

pub struct RequestBuilder {
    gateway: GatewayConfig,
    store: Arc<dyn PaymentStore>,
    ids: TransactionIdGenerator,
}

impl RequestBuilder {
    pub fn new(gateway: GatewayConfig, store: Arc<dyn PaymentStore>) -> Self {
        Self {
            gateway,
            store,
            ids: TransactionIdGenerator::new(),
        }
    }

    /// Validate, persist and sign a new payment attempt
    pub async fn build(&self, intent: &PaymentIntent) -> PaymentResult<TransactionRequest> {
        let amount = validate_amount(&intent.amount)?;

        let payer_email = required_text("payer_email", &intent.payer_email)?;
        if !email_pattern().is_match(&payer_email) {
            return Err(PaymentError::validation("payer_email is not a valid address"));
        }

        let payment_record_id = required_text("payment_record_id", &intent.payment_record_id)?;
        let user_id = required_text("user_id", &intent.user_id)?;
        let product_info = required_text("product_info", &intent.product_info)?;
        let payer_name = required_text("payer_name", &intent.payer_name)?;

        let mut udf: [String; 5] = Default::default();
        udf[0] = optional_text("udf1", intent.udf1.as_deref().unwrap_or(""))?;
        udf[1] = optional_text("udf2", intent.udf2.as_deref().unwrap_or(""))?;
        udf[USER_ID_UDF] = user_id.clone();
        udf[PAYMENT_RECORD_UDF] = payment_record_id.clone();
        udf[4] = optional_text("udf5", intent.udf5.as_deref().unwrap_or(""))?;

        let require_https = self.gateway.require_https;
        let success_url = validate_redirect_url(
            "success_url",
            intent
                .success_url
                .as_deref()
                .unwrap_or(&self.gateway.success_url),
            require_https,
        )?;
        let failure_url = validate_redirect_url(
            "failure_url",
            intent
                .failure_url
                .as_deref()
                .unwrap_or(&self.gateway.failure_url),
            require_https,
        )?;

        let txn_id = self
            .persist_new_transaction(&payment_record_id, &user_id, amount)
            .await?;

        let canonical_amount = amount.canonical();
        let hash = sign(
            &request_hash_fields(&HashInput {
                key: &self.gateway.merchant_key,
                txnid: &txn_id,
                amount: &canonical_amount,
                productinfo: &product_info,
                firstname: &payer_name,
                email: &payer_email,
                udf: [
                    udf[0].as_str(),
                    udf[1].as_str(),
                    udf[2].as_str(),
                    udf[3].as_str(),
                    udf[4].as_str(),
                ],
            }),
            self.gateway.merchant_salt.expose(),
        )?;

        info!(
            txn_id = %txn_id,
            payment_record_id = %payment_record_id,
            amount = %amount,
            "Payment request built"
        );

        Ok(TransactionRequest {
            merchant_key: self.gateway.merchant_key.clone(),
            txn_id,
            amount,
            product_info,
            payer_name,
            payer_email,
            udf,
            success_url,
            failure_url,
            hash,
            action_url: self.gateway.mode.payment_url().to_string(),
        })
    }

    async fn persist_new_transaction(
        &self,
        payment_record_id: &str,
        user_id: &str,
        amount: Amount,
    ) -> PaymentResult<String> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let txn_id = self.ids.next_id();
            let new_transaction = NewTransaction {
                txn_id: txn_id.clone(),
                payment_record_id: payment_record_id.to_string(),
                user_id: user_id.to_string(),
                amount,
            };

            match self.store.create_transaction(&new_transaction).await {
                Ok(_) => return Ok(txn_id),
                Err(e) if e.is_unique_violation() && attempt < MAX_ID_ATTEMPTS => {
                    warn!(txn_id = %txn_id, attempt, "Transaction id collision, regenerating");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Secret;
    use crate::database::memory::InMemoryPaymentStore;
    use crate::payments::providers::payu::PayuMode;
    use crate::payments::signature::verify;
    use crate::payments::types::TransactionState;
    use std::collections::HashSet;

    fn gateway(require_https: bool) -> GatewayConfig {
        GatewayConfig {
            merchant_key: "gtKFFx".to_string(),
            merchant_salt: Secret::new("eCwWELxi"),
            mode: PayuMode::Test,
            success_url: "https://shop.example.com/payments/success".to_string(),
            failure_url: "https://shop.example.com/payments/failure".to_string(),
            result_url: "https://shop.example.com/billing/result".to_string(),
            require_https,
        }
    }

    fn intent(amount: &str) -> PaymentIntent {
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

    fn builder(require_https: bool) -> (RequestBuilder, Arc<InMemoryPaymentStore>) {
        let store = Arc::new(InMemoryPaymentStore::default());
        (RequestBuilder::new(gateway(require_https), store.clone()), store)
    }

    #[test]
    fn test_transaction_ids_are_unique_and_bounded() {
        let ids = TransactionIdGenerator::new();
        let issued: HashSet<String> = (0..1_000).map(|_| ids.next_id()).collect();
        assert_eq!(issued.len(), 1_000);
        assert!(issued.iter().all(|id| id.len() <= MAX_TXN_ID_LEN));
        assert!(issued.iter().all(|id| id.starts_with(TXN_ID_PREFIX)));
    }

    #[tokio::test]
    async fn test_build_persists_initiated_transaction() {
        let (builder, store) = builder(false);
        let request = builder.build(&intent("499")).await.unwrap();

        assert_eq!(request.amount().canonical(), "499.00");
        assert_eq!(request.udf()[2], "42");
        assert_eq!(request.udf()[3], "sub_77");
        assert_eq!(request.action_url(), PayuMode::Test.payment_url());

        let stored = store.load_transaction(request.txn_id()).await.unwrap().unwrap();
        assert_eq!(stored.state, TransactionState::Initiated);
        assert_eq!(stored.payment_record_id, "sub_77");
        assert_eq!(stored.amount, request.amount());
    }

    #[tokio::test]
    async fn test_build_signs_request_sequence() {
        let (builder, _) = builder(false);
        let request = builder.build(&intent("499.00")).await.unwrap();

        let fields = request_hash_fields(&HashInput {
            key: "gtKFFx",
            txnid: request.txn_id(),
            amount: "499.00",
            productinfo: "Pro plan",
            firstname: "Asha",
            email: "asha@example.com",
            udf: ["", "", "42", "sub_77", ""],
        });
        assert!(verify(&fields, "eCwWELxi", request.hash()));

        let form = request.form_fields();
        assert_eq!(form.len(), 14);
        assert!(form.contains(&("amount", "499.00".to_string())));
        assert!(form.contains(&("hash", request.hash().to_string())));
    }

    #[tokio::test]
    async fn test_retried_intent_gets_new_id() {
        let (builder, store) = builder(false);
        let first = builder.build(&intent("10")).await.unwrap();
        let second = builder.build(&intent("10")).await.unwrap();
        assert_ne!(first.txn_id(), second.txn_id());
        assert_eq!(store.transaction_count().await, 2);
    }

    #[tokio::test]
    async fn test_rejects_bad_amounts_without_persisting() {
        let (builder, store) = builder(false);
        for amount in ["-1.00", "0", "0.00", "NaN", "inf", "abc", "1.005", ""] {
            let err = builder.build(&intent(amount)).await.unwrap_err();
            assert!(
                matches!(err, PaymentError::Validation { .. }),
                "{:?} gave {:?}",
                amount,
                err
            );
        }
        assert_eq!(store.transaction_count().await, 0);
    }

    #[tokio::test]
    async fn test_amount_bounded_by_ledger_column() {
        let (builder, store) = builder(false);
        let request = builder.build(&intent("999999999999.99")).await.unwrap();
        assert_eq!(request.amount().canonical(), "999999999999.99");

        for amount in ["1000000000000.00", "100000000000000.00", "79228162514264337593543950335"] {
            let err = builder.build(&intent(amount)).await.unwrap_err();
            assert!(
                matches!(&err, PaymentError::Validation { message } if message.contains("exceeds maximum")),
                "{:?} gave {:?}",
                amount,
                err
            );
        }
        assert_eq!(store.transaction_count().await, 1);
    }

    #[tokio::test]
    async fn test_rejects_empty_or_invalid_email() {
        let (builder, _) = builder(false);
        for email in ["", "   ", "not-an-email", "a@b"] {
            let mut bad = intent("10");
            bad.payer_email = email.to_string();
            assert!(matches!(
                builder.build(&bad).await,
                Err(PaymentError::Validation { .. })
            ));
        }
    }

    #[tokio::test]
    async fn test_rejects_field_separator_in_text() {
        let (builder, _) = builder(false);
        let mut bad = intent("10");
        bad.product_info = "Pro|admin".to_string();
        assert!(matches!(
            builder.build(&bad).await,
            Err(PaymentError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn test_redirect_url_rules() {
        let (builder, _) = builder(false);
        for url in ["/payments/success", "shop.example.com/ok", "ftp://shop.example.com/ok", "not a url"] {
            let mut bad = intent("10");
            bad.success_url = Some(url.to_string());
            assert!(
                matches!(builder.build(&bad).await, Err(PaymentError::Validation { .. })),
                "{} accepted",
                url
            );
        }

        let mut plain_http = intent("10");
        plain_http.failure_url = Some("http://localhost:8080/payments/failure".to_string());
        assert!(builder.build(&plain_http).await.is_ok());

        let (production, _) = self::builder(true);
        assert!(matches!(
            production.build(&plain_http).await,
            Err(PaymentError::Validation { .. })
        ));
    }
}
