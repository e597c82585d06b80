//! Gateway wire contracts
//!
//! Vendor field names, hash sequences and status vocabularies.

pub mod payu;

pub use payu::PayuMode;
