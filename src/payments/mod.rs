//! Payment-gateway transaction integrity
//!
//! Outbound requests are signed by the request builder; inbound redirect
//! responses and webhooks go through the verifier and the reconciler, which
//! applies each terminal outcome to the entitlement service exactly once.

pub mod alerts;
pub mod audit;
pub mod entitlements;
pub mod error;
pub mod processor;
pub mod providers;
pub mod reconciler;
pub mod request;
pub mod signature;
pub mod traits;
pub mod types;
pub mod verifier;
