//! Entry point for the Payroll Batch binary.
//!
//! Running this binary starts an HTTP server exposing aggregation and
//! export over the record snapshots found in `PAYROLL_SNAPSHOT_DIR`
//! (default `snapshots`). The bind address comes from
//! `PAYROLL_BIND_ADDR`; see [`payroll_batch::config`] for the rest.

use payroll_batch::config::Config;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(err) = payroll_batch::api::serve(&config).await {
        error!(error = %err, "server stopped");
        return Err(err);
    }
    Ok(())
}
