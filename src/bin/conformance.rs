//! Runs the payment conformance fixtures and prints the report as JSON.
//!
//! Exits non-zero when any fixture fails.

use payment_integrity_backend::payments::audit::ConformanceHarness;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let report = ConformanceHarness::new().run_all().await;
    println!("{}", serde_json::to_string_pretty(&report)?);

    let failures = report.failures();
    if failures.is_empty() {
        tracing::info!(fixtures = report.results.len(), "All conformance fixtures passed");
        Ok(ExitCode::SUCCESS)
    } else {
        for failure in failures {
            tracing::error!(fixture = ?failure.fixture, observed = %failure.observed, "Conformance fixture failed");
        }
        Ok(ExitCode::FAILURE)
    }
}
