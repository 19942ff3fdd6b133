use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use ledger::types::HISTORY_LIMIT;

/// Casino ledger server
#[derive(Debug, Clone, Parser)]
#[command(version, about)]
pub struct Config {
    /// Address to listen on
    #[arg(long, env = "CASINO_BIND", default_value = "0.0.0.0:6957")]
    pub bind: SocketAddr,

    /// SQLite database file. Accounts are kept in memory when omitted
    #[arg(long, env = "CASINO_DB")]
    pub db: Option<PathBuf>,

    /// Hex SHA-256 digest of the bearer token admin routes accept.
    /// Admin routes are disabled when omitted
    #[arg(long, env = "CASINO_ADMIN_TOKEN_SHA256")]
    pub admin_token_sha256: Option<String>,

    /// Entries kept per account history
    #[arg(long, env = "CASINO_HISTORY_LIMIT", default_value_t = HISTORY_LIMIT)]
    pub history_limit: usize,

    /// How often timed out game sessions are reaped
    #[arg(long, env = "CASINO_REAP_INTERVAL_SECS", default_value_t = 15)]
    pub reap_interval_secs: u64,
}

impl Config {
    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs.max(1))
    }

    /// Lowercased digest, or None when admin routes are disabled.
    pub fn admin_digest(&self) -> Option<String> {
        self.admin_token_sha256
            .as_deref()
            .map(str::trim)
            .filter(|digest| !digest.is_empty())
            .map(str::to_ascii_lowercase)
    }
}
