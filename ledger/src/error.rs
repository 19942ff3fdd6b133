use std::fmt;
use thiserror::Error;

use crate::types::{Amount, from_amount};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AccountKind {
    User,
    Server,
}

impl fmt::Display for AccountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountKind::User => f.write_str("user"),
            AccountKind::Server => f.write_str("server"),
        }
    }
}

fn decimal(amount: &Amount) -> f64 {
    from_amount(*amount)
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LedgerError {
    #[error("{kind} {id} is not registered")]
    NotFound { kind: AccountKind, id: u64 },
    #[error("{kind} {id} is already registered")]
    AlreadyExists { kind: AccountKind, id: u64 },
    #[error("insufficient funds (needed {}, available {})", decimal(.needed), decimal(.available))]
    InsufficientFunds { needed: Amount, available: Amount },
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
    #[error("unknown currency '{0}'")]
    UnknownCurrency(String),
    #[error("user {0} is blacklisted")]
    Blacklisted(u64),
    #[error("user {user_id} already has a {game} game in progress")]
    SessionActive { user_id: u64, game: String },
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("corrupt document: {0}")]
    Corrupt(String),
}

impl LedgerError {
    pub(crate) fn unavailable(err: impl fmt::Display) -> Self {
        LedgerError::StoreUnavailable(err.to_string())
    }

    /// Transient infrastructure failures, as opposed to rejected requests.
    pub fn is_store_failure(&self) -> bool {
        matches!(
            self,
            LedgerError::StoreUnavailable(_) | LedgerError::Corrupt(_)
        )
    }
}
