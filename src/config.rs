//! Runtime configuration read from the environment.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::PathBuf;

pub const BIND_ADDR_VAR: &str = "PAYROLL_BIND_ADDR";
pub const SNAPSHOT_DIR_VAR: &str = "PAYROLL_SNAPSHOT_DIR";
pub const LOG_VAR: &str = "PAYROLL_LOG";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind_addr: SocketAddr,
    /// Directory holding JSON record snapshots.
    pub snapshot_dir: PathBuf,
    /// Tracing filter used when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let addr = lookup(BIND_ADDR_VAR).unwrap_or_else(|| "127.0.0.1:3000".to_string());
        let bind_addr = addr
            .parse()
            .with_context(|| format!("{BIND_ADDR_VAR} is not a socket address: {addr}"))?;
        Ok(Self {
            bind_addr,
            snapshot_dir: PathBuf::from(
                lookup(SNAPSHOT_DIR_VAR).unwrap_or_else(|| "snapshots".to_string()),
            ),
            log_filter: lookup(LOG_VAR).unwrap_or_else(|| "info".to_string()),
        })
    }
}
