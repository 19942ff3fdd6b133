//! Stake reservation, the funds check every game runs before resolving a
//! round.

use serde::{Deserialize, Serialize};

use crate::error::LedgerError;
use crate::ledger::{Ledger, StatsDelta};
use crate::types::{Amount, Currency, UserId};

/// Order in which balances are drawn down when a stake is reserved.
pub const SPEND_ORDER: [Currency; 2] = [Currency::Credits, Currency::Points];

/// What was actually taken from the user for one stake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeReceipt {
    pub user_id: UserId,
    pub total: Amount,
    pub parts: Vec<(Currency, Amount)>,
}

impl StakeReceipt {
    pub fn amount_in(&self, currency: Currency) -> Amount {
        self.parts
            .iter()
            .filter(|(c, _)| *c == currency)
            .map(|(_, amount)| *amount)
            .sum()
    }
}

/// Checks funds and deducts the stake in one document update. Credits are
/// spent before points. Nothing is deducted when the combined balance falls
/// short.
pub fn reserve_stake(
    ledger: &Ledger,
    user_id: UserId,
    stake: Amount,
) -> Result<StakeReceipt, LedgerError> {
    if stake <= 0 {
        return Err(LedgerError::InvalidAmount(
            "stake must be greater than 0".to_string(),
        ));
    }

    let mut parts = Vec::new();
    ledger.mutate_user(user_id, &mut |account| {
        parts.clear();
        if account.blacklisted {
            return Err(LedgerError::Blacklisted(user_id.0));
        }

        let available = account.balances.total();
        if available < stake {
            return Err(LedgerError::InsufficientFunds {
                needed: stake,
                available,
            });
        }

        let mut remaining = stake;
        for currency in SPEND_ORDER {
            let balance = account.balances.get_mut(currency);
            let taken = remaining.min(*balance);
            if taken > 0 {
                *balance -= taken;
                remaining -= taken;
                parts.push((currency, taken));
            }
        }

        StatsDelta {
            played: 1,
            spent: stake,
            ..StatsDelta::default()
        }
        .apply(&mut account.stats)
    })?;

    tracing::debug!("Reserved stake {} for user {}: {:?}", stake, user_id, parts);
    Ok(StakeReceipt {
        user_id,
        total: stake,
        parts,
    })
}
