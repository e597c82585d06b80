//! Transaction signature engine
//!
//! A signature is the SHA-512 digest, as 128 lowercase hex characters, of an
//! ordered list of fields joined by [`FIELD_SEPARATOR`]. The shared secret is
//! a positional placeholder in the list and is only substituted while the
//! digest is computed. Both functions are pure.

use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::types::Amount;
use sha2::{Digest, Sha512};
use subtle::ConstantTimeEq;

pub const FIELD_SEPARATOR: char = '|';

/// Length of a hex encoded SHA-512 digest
pub const DIGEST_HEX_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Field {
    Text { name: &'static str, value: String },
    /// Raw amount, canonicalized at render time
    Amount(String),
    Secret,
}

/// Fields in the exact order they are hashed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderedFieldList {
    fields: Vec<Field>,
}

impl OrderedFieldList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.fields.push(Field::Text {
            name,
            value: value.into(),
        });
        self
    }

    pub fn empty(self, name: &'static str) -> Self {
        self.text(name, String::new())
    }

    pub fn amount(mut self, raw: impl Into<String>) -> Self {
        self.fields.push(Field::Amount(raw.into()));
        self
    }

    pub fn secret(mut self) -> Self {
        self.fields.push(Field::Secret);
        self
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn render(&self, secret: &str) -> PaymentResult<String> {
        if secret.is_empty() {
            return Err(PaymentError::invalid_field("secret", "must not be empty"));
        }
        if secret.contains(FIELD_SEPARATOR) {
            return Err(PaymentError::invalid_field(
                "secret",
                "contains the field separator",
            ));
        }
        let secret_slots = self.fields.iter().filter(|f| **f == Field::Secret).count();
        if secret_slots != 1 {
            return Err(PaymentError::invalid_field(
                "secret",
                format!("expected exactly one secret slot, found {}", secret_slots),
            ));
        }

        let mut parts = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            match field {
                Field::Text { name, value } => {
                    if value.contains(FIELD_SEPARATOR) {
                        return Err(PaymentError::invalid_field(
                            *name,
                            "contains the field separator",
                        ));
                    }
                    parts.push(value.clone());
                }
                Field::Amount(raw) => parts.push(Amount::parse(raw)?.canonical()),
                Field::Secret => parts.push(secret.to_string()),
            }
        }

        Ok(parts.join(&FIELD_SEPARATOR.to_string()))
    }
}

/// Compute the signature over `fields`, failing closed on malformed input.
pub fn sign(fields: &OrderedFieldList, secret: &str) -> PaymentResult<String> {
    let payload = fields.render(secret)?;
    Ok(hex::encode(Sha512::digest(payload.as_bytes())))
}

/// Recompute the signature and compare it with `candidate` in constant time.
pub fn verify(fields: &OrderedFieldList, secret: &str, candidate: &str) -> bool {
    let expected = match sign(fields, secret) {
        Ok(digest) => digest,
        Err(_) => return false,
    };

    let candidate = candidate.trim();
    if candidate.len() != DIGEST_HEX_LEN {
        return false;
    }

    expected.as_bytes().ct_eq(candidate.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "eCwWELxi";

    fn sample_fields(amount: &str) -> OrderedFieldList {
        OrderedFieldList::new()
            .text("key", "gtKFFx")
            .text("txnid", "TXN1700000000000001a2b3c")
            .amount(amount)
            .text("productinfo", "Pro plan")
            .text("firstname", "Asha")
            .text("email", "asha@example.com")
            .text("udf1", "")
            .text("udf2", "")
            .text("udf3", "42")
            .text("udf4", "sub_77")
            .text("udf5", "")
            .secret()
    }

    #[test]
    fn test_sign_produces_lowercase_sha512_hex() {
        let digest = sign(&sample_fields("499.00"), SECRET).unwrap();
        assert_eq!(digest.len(), DIGEST_HEX_LEN);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_sign_matches_manual_digest() {
        let fields = OrderedFieldList::new().text("a", "x").amount("1").secret();
        let expected = hex::encode(Sha512::digest(b"x|1.00|s3cret"));
        assert_eq!(sign(&fields, "s3cret").unwrap(), expected);
    }

    #[test]
    fn test_sign_then_verify() {
        let fields = sample_fields("499.00");
        let digest = sign(&fields, SECRET).unwrap();
        assert!(verify(&fields, SECRET, &digest));
    }

    #[test]
    fn test_amount_formatting_does_not_change_signature() {
        let a = sign(&sample_fields("499"), SECRET).unwrap();
        let b = sign(&sample_fields("499.00"), SECRET).unwrap();
        let c = sign(&sample_fields("499.0"), SECRET).unwrap();
        assert_eq!(a, b);
        assert_eq!(b, c);
    }

    #[test]
    fn test_any_single_character_mutation_fails() {
        let fields = sample_fields("499.00");
        let digest = sign(&fields, SECRET).unwrap();

        for position in 0..digest.len() {
            let mut mutated: Vec<char> = digest.chars().collect();
            mutated[position] = if mutated[position] == '0' { '1' } else { '0' };
            let mutated: String = mutated.into_iter().collect();
            assert!(
                !verify(&fields, SECRET, &mutated),
                "mutation at {} was accepted",
                position
            );
        }
    }

    #[test]
    fn test_wrong_secret_fails() {
        let fields = sample_fields("499.00");
        let digest = sign(&fields, "another-salt").unwrap();
        assert!(!verify(&fields, SECRET, &digest));
    }

    #[test]
    fn test_truncated_or_uppercase_digest_fails() {
        let fields = sample_fields("499.00");
        let digest = sign(&fields, SECRET).unwrap();
        assert!(!verify(&fields, SECRET, &digest[..64]));
        assert!(!verify(&fields, SECRET, &digest.to_uppercase()));
        assert!(!verify(&fields, SECRET, ""));
    }

    #[test]
    fn test_malformed_fields_fail_closed() {
        let bad_amount = sample_fields("ten rupees");
        assert!(matches!(
            sign(&bad_amount, SECRET),
            Err(PaymentError::InvalidField { field: "amount", .. })
        ));
        assert!(!verify(&bad_amount, SECRET, &"0".repeat(DIGEST_HEX_LEN)));

        let embedded = OrderedFieldList::new()
            .text("productinfo", "plan|admin")
            .secret();
        assert!(matches!(
            sign(&embedded, SECRET),
            Err(PaymentError::InvalidField { field: "productinfo", .. })
        ));
    }

    #[test]
    fn test_secret_slot_is_required_once() {
        let missing = OrderedFieldList::new().text("a", "x");
        assert!(sign(&missing, SECRET).is_err());

        let twice = OrderedFieldList::new().secret().text("a", "x").secret();
        assert!(sign(&twice, SECRET).is_err());

        assert!(sign(&sample_fields("1.00"), "").is_err());
        assert!(sign(&sample_fields("1.00"), "a|b").is_err());
    }
}
