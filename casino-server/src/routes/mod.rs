pub mod games;
pub mod servers;
pub mod users;

use ledger::LedgerError;
use ledger::types::{Amount, Balances, LedgerEntry, from_amount};
use serde::Serialize;

use crate::error::ApiError;

/// Runs a ledger call on the blocking pool. Store calls do file I/O and hold
/// the store lock, so they stay off the async workers.
pub async fn blocking<T, F>(call: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, LedgerError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(call)
        .await
        .map_err(|e| ApiError(LedgerError::StoreUnavailable(format!("ledger task failed: {e}"))))?
        .map_err(ApiError)
}

// Decimal views of ledger documents for JSON responses

#[derive(Debug, Serialize)]
pub struct BalancesResponse {
    pub points: f64,
    pub credits: f64,
}

impl From<&Balances> for BalancesResponse {
    fn from(balances: &Balances) -> Self {
        BalancesResponse {
            points: from_amount(balances.points),
            credits: from_amount(balances.credits),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct EntryResponse {
    pub kind: ledger::types::EntryKind,
    pub game: Option<String>,
    pub currency: ledger::types::Currency,
    pub bet_amount: f64,
    pub result_amount: f64,
    pub multiplier: Option<f64>,
    pub timestamp: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl From<&LedgerEntry> for EntryResponse {
    fn from(entry: &LedgerEntry) -> Self {
        EntryResponse {
            kind: entry.kind,
            game: entry.game.clone(),
            currency: entry.currency,
            bet_amount: from_amount(entry.bet_amount),
            result_amount: from_amount(entry.result_amount),
            multiplier: entry.multiplier,
            timestamp: entry.timestamp,
            user_id: entry.user_id.map(|id| id.to_string()),
        }
    }
}

pub fn entries(history: &[LedgerEntry]) -> Vec<EntryResponse> {
    history.iter().map(EntryResponse::from).collect()
}

pub fn decimal(amount: Amount) -> f64 {
    from_amount(amount)
}
