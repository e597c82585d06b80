//! Response / webhook verifier
//!
//! Checks run in a fixed order and stop at the first failure:
//! structure, known open transaction, signature, amount, status vocabulary.
//! Nothing here mutates state; the only reads are the transaction record and
//! the idempotency ledger.

use crate::config::Secret;
use crate::database::repository::PaymentStore;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::providers::payu::{fields, map_status, response_hash_fields, HashInput};
use crate::payments::signature::verify;
use crate::payments::types::{
    Amount, GatewayOutcome, GatewayResponse, IdempotencyKey, PaymentTransaction, TransactionState,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// A gateway message that passed every check
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedMessage {
    pub transaction: PaymentTransaction,
    pub gateway_txn_id: String,
    pub status: String,
    pub outcome: GatewayOutcome,
    pub target: TransactionState,
    pub amount: Amount,
}

impl VerifiedMessage {
    pub fn txn_id(&self) -> &str {
        &self.transaction.txn_id
    }

    pub fn idempotency_key(&self) -> IdempotencyKey {
        IdempotencyKey::new(
            self.transaction.txn_id.clone(),
            self.gateway_txn_id.clone(),
            self.status.clone(),
            self.target,
        )
    }
}

/// Required fields present on a message, trimmed
struct Envelope<'a> {
    txn_id: &'a str,
    status: &'a str,
    amount: &'a str,
    gateway_txn_id: &'a str,
    hash: &'a str,
}

fn structural_check(message: &GatewayResponse) -> PaymentResult<Envelope<'_>> {
    let txn_id = GatewayResponse::present(&message.txnid);
    let status = GatewayResponse::present(&message.status);
    let amount = GatewayResponse::present(&message.amount);
    let gateway_txn_id = GatewayResponse::present(&message.mihpayid);
    let hash = GatewayResponse::present(&message.hash);

    match (txn_id, status, amount, gateway_txn_id, hash) {
        (Some(txn_id), Some(status), Some(amount), Some(gateway_txn_id), Some(hash)) => {
            Ok(Envelope {
                txn_id,
                status,
                amount,
                gateway_txn_id,
                hash,
            })
        }
        _ => {
            let missing = [
                (fields::TXNID, txn_id.is_none()),
                (fields::STATUS, status.is_none()),
                (fields::AMOUNT, amount.is_none()),
                (fields::MIHPAYID, gateway_txn_id.is_none()),
                (fields::HASH, hash.is_none()),
            ]
            .into_iter()
            .filter(|(_, absent)| *absent)
            .map(|(name, _)| name)
            .collect();
            Err(PaymentError::MalformedMessage { missing })
        }
    }
}

pub struct Verifier {
    merchant_key: String,
    merchant_salt: Secret,
    store: Arc<dyn PaymentStore>,
}

impl Verifier {
    pub fn new(merchant_key: String, merchant_salt: Secret, store: Arc<dyn PaymentStore>) -> Self {
        Self {
            merchant_key,
            merchant_salt,
            store,
        }
    }

    pub async fn verify(&self, message: &GatewayResponse) -> PaymentResult<VerifiedMessage> {
        let envelope = structural_check(message)?;
        let txn_id = envelope.txn_id;

        let transaction = self.open_transaction(&envelope).await?;

        let udf = message.udf();
        let hash_fields = response_hash_fields(
            &HashInput {
                key: &self.merchant_key,
                txnid: txn_id,
                amount: envelope.amount,
                productinfo: message.productinfo.as_deref().unwrap_or(""),
                firstname: message.firstname.as_deref().unwrap_or(""),
                email: message.email.as_deref().unwrap_or(""),
                udf,
            },
            envelope.status,
            GatewayResponse::present(&message.additional_charges),
        );
        if !verify(&hash_fields, self.merchant_salt.expose(), envelope.hash) {
            warn!(txn_id = %txn_id, status = %envelope.status, "Gateway signature mismatch");
            return Err(PaymentError::SignatureMismatch {
                txn_id: txn_id.to_string(),
            });
        }

        let amount_mismatch = || PaymentError::AmountMismatch {
            txn_id: txn_id.to_string(),
            expected: transaction.amount.canonical(),
            received: envelope.amount.to_string(),
        };
        let amount = Amount::parse(envelope.amount).map_err(|_| amount_mismatch())?;
        if amount != transaction.amount {
            warn!(
                txn_id = %txn_id,
                expected = %transaction.amount,
                received = %amount,
                "Gateway amount mismatch"
            );
            return Err(amount_mismatch());
        }

        let outcome = map_status(envelope.status);
        let target = outcome.target_state().ok_or_else(|| {
            debug!(txn_id = %txn_id, status = %envelope.status, "Unmapped gateway status");
            PaymentError::UnknownStatus {
                txn_id: txn_id.to_string(),
                status: envelope.status.to_string(),
            }
        })?;

        Ok(VerifiedMessage {
            gateway_txn_id: envelope.gateway_txn_id.to_string(),
            status: envelope.status.to_string(),
            outcome,
            target,
            amount,
            transaction,
        })
    }

    /// Known-transaction check
    ///
    /// A closed transaction answers `DuplicateNotification` only when this
    /// exact notification is the one already applied; anything else aimed at
    /// a closed transaction is rejected as closed.
    async fn open_transaction(&self, envelope: &Envelope<'_>) -> PaymentResult<PaymentTransaction> {
        let transaction = self
            .store
            .load_transaction(envelope.txn_id)
            .await?
            .ok_or_else(|| {
                warn!(txn_id = %envelope.txn_id, "Notification for unknown transaction");
                PaymentError::unknown_or_closed(envelope.txn_id)
            })?;

        if !transaction.state.is_terminal() {
            return Ok(transaction);
        }

        if let Some(target) = map_status(envelope.status).target_state() {
            let key = IdempotencyKey::new(
                envelope.txn_id,
                envelope.gateway_txn_id,
                envelope.status,
                target,
            );
            if self.store.is_key_applied(&key).await? {
                return Err(PaymentError::DuplicateNotification {
                    txn_id: envelope.txn_id.to_string(),
                    status: envelope.status.to_string(),
                });
            }
        }

        warn!(
            txn_id = %envelope.txn_id,
            state = %transaction.state,
            status = %envelope.status,
            "Notification for closed transaction"
        );
        Err(PaymentError::unknown_or_closed(envelope.txn_id))
    }
}
