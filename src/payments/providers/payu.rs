//! PayU hosted-checkout wire contract
//!
//! Field names, hash sequences, status vocabulary and endpoints for the
//! redirect-based PayU flow. Everything gateway specific lives here so the
//! signature engine, verifier and reconciler stay vendor neutral.

use crate::payments::signature::OrderedFieldList;
use crate::payments::types::GatewayOutcome;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const TEST_PAYMENT_URL: &str = "https://test.payu.in/_payment";
pub const LIVE_PAYMENT_URL: &str = "https://secure.payu.in/_payment";

/// Wire names of request and response form fields
pub mod fields {
    pub const KEY: &str = "key";
    pub const TXNID: &str = "txnid";
    pub const AMOUNT: &str = "amount";
    pub const PRODUCTINFO: &str = "productinfo";
    pub const FIRSTNAME: &str = "firstname";
    pub const EMAIL: &str = "email";
    pub const UDF: [&str; 5] = ["udf1", "udf2", "udf3", "udf4", "udf5"];
    /// Reserved slots that are always hashed as empty strings
    pub const RESERVED_UDF: [&str; 5] = ["udf6", "udf7", "udf8", "udf9", "udf10"];
    pub const SURL: &str = "surl";
    pub const FURL: &str = "furl";
    pub const HASH: &str = "hash";
    pub const MIHPAYID: &str = "mihpayid";
    pub const STATUS: &str = "status";
    pub const ADDITIONAL_CHARGES: &str = "additionalCharges";
}

/// Index of the user-defined field carrying the internal user id
pub const USER_ID_UDF: usize = 2;
/// Index of the user-defined field carrying the internal payment record id
pub const PAYMENT_RECORD_UDF: usize = 3;

/// Fixed status table. Extend only by adding rows here.
const STATUS_TABLE: [(&str, GatewayOutcome); 4] = [
    ("success", GatewayOutcome::Success),
    ("failure", GatewayOutcome::Failure),
    ("pending", GatewayOutcome::Pending),
    ("cancel", GatewayOutcome::Cancelled),
];

pub fn map_status(code: &str) -> GatewayOutcome {
    STATUS_TABLE
        .iter()
        .find(|(known, _)| *known == code)
        .map(|(_, outcome)| *outcome)
        .unwrap_or(GatewayOutcome::Unknown)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayuMode {
    Test,
    Live,
}

impl PayuMode {
    pub fn payment_url(&self) -> &'static str {
        match self {
            PayuMode::Test => TEST_PAYMENT_URL,
            PayuMode::Live => LIVE_PAYMENT_URL,
        }
    }
}

impl fmt::Display for PayuMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayuMode::Test => write!(f, "test"),
            PayuMode::Live => write!(f, "live"),
        }
    }
}

impl FromStr for PayuMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "test" => Ok(PayuMode::Test),
            "live" => Ok(PayuMode::Live),
            other => Err(format!("PAYU_MODE must be 'test' or 'live', got {}", other)),
        }
    }
}

/// Fields shared by the request and response hash sequences
#[derive(Debug, Clone, Copy)]
pub struct HashInput<'a> {
    pub key: &'a str,
    pub txnid: &'a str,
    pub amount: &'a str,
    pub productinfo: &'a str,
    pub firstname: &'a str,
    pub email: &'a str,
    pub udf: [&'a str; 5],
}

/// `key|txnid|amount|productinfo|firstname|email|udf1..udf5|udf6..udf10|SALT`
pub fn request_hash_fields(input: &HashInput<'_>) -> OrderedFieldList {
    let mut list = OrderedFieldList::new()
        .text(fields::KEY, input.key)
        .text(fields::TXNID, input.txnid)
        .amount(input.amount)
        .text(fields::PRODUCTINFO, input.productinfo)
        .text(fields::FIRSTNAME, input.firstname)
        .text(fields::EMAIL, input.email);
    for (name, value) in fields::UDF.iter().zip(input.udf.iter()) {
        list = list.text(*name, *value);
    }
    for name in fields::RESERVED_UDF {
        list = list.empty(name);
    }
    list.secret()
}

/// `[additionalCharges|]SALT|status|udf10..udf6|udf5..udf1|email|firstname|productinfo|amount|txnid|key`
pub fn response_hash_fields(
    input: &HashInput<'_>,
    status: &str,
    additional_charges: Option<&str>,
) -> OrderedFieldList {
    let mut list = OrderedFieldList::new();
    if let Some(charges) = additional_charges {
        list = list.text(fields::ADDITIONAL_CHARGES, charges);
    }
    list = list.secret().text(fields::STATUS, status);
    for name in fields::RESERVED_UDF.iter().rev() {
        list = list.empty(*name);
    }
    for (name, value) in fields::UDF.iter().zip(input.udf.iter()).rev() {
        list = list.text(*name, *value);
    }
    list.text(fields::EMAIL, input.email)
        .text(fields::FIRSTNAME, input.firstname)
        .text(fields::PRODUCTINFO, input.productinfo)
        .amount(input.amount)
        .text(fields::TXNID, input.txnid)
        .text(fields::KEY, input.key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::signature::{sign, verify};
    use sha2::{Digest, Sha512};

    fn sample_input() -> HashInput<'static> {
        HashInput {
            key: "gtKFFx",
            txnid: "TXN42",
            amount: "499",
            productinfo: "Pro plan",
            firstname: "Asha",
            email: "asha@example.com",
            udf: ["", "", "42", "sub_77", ""],
        }
    }

    #[test]
    fn test_request_hash_sequence() {
        let expected = hex::encode(Sha512::digest(
            b"gtKFFx|TXN42|499.00|Pro plan|Asha|asha@example.com|||42|sub_77|||||||salt",
        ));
        let digest = sign(&request_hash_fields(&sample_input()), "salt").unwrap();
        assert_eq!(digest, expected);
    }

    #[test]
    fn test_response_hash_sequence() {
        let expected = hex::encode(Sha512::digest(
            b"salt|success|||||||sub_77|42|||asha@example.com|Asha|Pro plan|499.00|TXN42|gtKFFx",
        ));
        let fields = response_hash_fields(&sample_input(), "success", None);
        assert_eq!(sign(&fields, "salt").unwrap(), expected);
        assert!(verify(&fields, "salt", &expected));
    }

    #[test]
    fn test_response_hash_with_additional_charges() {
        let expected = hex::encode(Sha512::digest(
            b"10.00|salt|success|||||||sub_77|42|||asha@example.com|Asha|Pro plan|499.00|TXN42|gtKFFx",
        ));
        let fields = response_hash_fields(&sample_input(), "success", Some("10.00"));
        assert_eq!(sign(&fields, "salt").unwrap(), expected);
    }

    #[test]
    fn test_request_and_response_digests_differ() {
        let input = sample_input();
        let request = sign(&request_hash_fields(&input), "salt").unwrap();
        let response = sign(&response_hash_fields(&input, "success", None), "salt").unwrap();
        assert_ne!(request, response);
    }

    #[test]
    fn test_status_table_is_exact() {
        assert_eq!(map_status("success"), GatewayOutcome::Success);
        assert_eq!(map_status("failure"), GatewayOutcome::Failure);
        assert_eq!(map_status("pending"), GatewayOutcome::Pending);
        assert_eq!(map_status("cancel"), GatewayOutcome::Cancelled);
        for code in ["SUCCESS", "failed", "cancelled", "bounced", "in progress", ""] {
            assert_eq!(map_status(code), GatewayOutcome::Unknown, "{:?}", code);
        }
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("live".parse::<PayuMode>().unwrap(), PayuMode::Live);
        assert_eq!(PayuMode::Test.payment_url(), TEST_PAYMENT_URL);
        assert!("sandbox".parse::<PayuMode>().is_err());
    }
}
