use serde::{Deserialize, Serialize};

use crate::bet::StakeReceipt;
use crate::error::LedgerError;
use crate::ledger::{Ledger, StatsDelta, UserUpdate};
use crate::types::{Amount, BalanceMode, Currency, EntryKind, LedgerEntry, ServerId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundReport {
    pub entry: LedgerEntry,
    pub payout: Amount,
    pub balance_after: Amount,
    /// Positive when the house won
    pub house_delta: Amount,
}

/// Payout for a stake at the given multiplier, rounded down.
pub fn payout_for(stake: Amount, multiplier: f64) -> Amount {
    if !multiplier.is_finite() || multiplier <= 0.0 {
        return 0;
    }
    (stake as f64 * multiplier).floor() as Amount
}

/// Resolves a round whose stake was already reserved.
///
/// The payout is always credited in the settlement currency. The user's
/// credit, counters and history entry are one document update; the house
/// profit and the mirrored entry are a second update on the server document.
/// Rounds played outside a registered server settle for the user only.
pub fn settle_round(
    ledger: &Ledger,
    server_id: Option<ServerId>,
    receipt: &StakeReceipt,
    game: &str,
    multiplier: f64,
) -> Result<RoundReport, LedgerError> {
    let stake = receipt.total;
    let payout = payout_for(stake, multiplier);
    let kind = match payout.cmp(&stake) {
        std::cmp::Ordering::Greater => EntryKind::Win,
        std::cmp::Ordering::Equal => EntryKind::Push,
        std::cmp::Ordering::Less => EntryKind::Loss,
    };

    let entry = LedgerEntry::new(kind, Currency::SETTLEMENT, stake, payout)
        .with_game(game)
        .with_multiplier(multiplier);
    let stats = StatsDelta {
        won: u64::from(kind == EntryKind::Win),
        lost: u64::from(kind == EntryKind::Loss),
        pushed: u64::from(kind == EntryKind::Push),
        earned: payout,
        ..StatsDelta::default()
    };
    let update = UserUpdate::new()
        .balance(Currency::SETTLEMENT, payout, BalanceMode::Increment)
        .stats(stats)
        .entry(entry.clone());
    let account = ledger.apply_user_update(receipt.user_id, &update)?;

    let house_delta = stake - payout;
    if let Some(server_id) = server_id {
        let mirrored = entry.mirrored_for(receipt.user_id);
        match ledger.settle_server(server_id, house_delta, Some(&mirrored)) {
            Ok(_) => {}
            Err(LedgerError::NotFound { .. }) => {
                tracing::warn!(
                    "Server {} is not registered, skipping house settlement for {} round",
                    server_id,
                    game
                );
            }
            Err(e) => {
                tracing::error!(
                    "User {} was settled but server {} was not: {}",
                    receipt.user_id,
                    server_id,
                    e
                );
                return Err(e);
            }
        }
    }

    tracing::info!(
        "Settled {} round for user {}: stake={} payout={} ({:?})",
        game,
        receipt.user_id,
        stake,
        payout,
        kind
    );

    Ok(RoundReport {
        entry,
        payout,
        balance_after: account.balances.get(Currency::SETTLEMENT),
        house_delta,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bet::reserve_stake;
    use crate::store::MemoryStore;
    use crate::types::UserId;
    use std::sync::Arc;

    fn setup() -> (Ledger, UserId, ServerId) {
        let ledger = Ledger::new(Arc::new(MemoryStore::new()));
        let user = UserId(1);
        let server = ServerId(500);
        ledger.register_user(user, None).unwrap();
        ledger.register_server(server, "casino floor").unwrap();
        ledger
            .adjust_balance(user, Currency::Points, 10_000, BalanceMode::Set)
            .unwrap();
        (ledger, user, server)
    }

    #[test]
    fn test_payout_rounds_down() {
        assert_eq!(payout_for(1_000, 1.98), 1_980);
        assert_eq!(payout_for(333, 1.5), 499);
        assert_eq!(payout_for(1_000, 0.0), 0);
        assert_eq!(payout_for(1_000, f64::NAN), 0);
    }

    #[test]
    fn test_winning_round_moves_money_from_house() {
        let (ledger, user, server) = setup();
        let receipt = reserve_stake(&ledger, user, 1_000).unwrap();
        let report = settle_round(&ledger, Some(server), &receipt, "dice", 2.0).unwrap();

        assert_eq!(report.entry.kind, EntryKind::Win);
        assert_eq!(report.payout, 2_000);
        assert_eq!(report.balance_after, 11_000);
        assert_eq!(report.house_delta, -1_000);

        let account = ledger.fetch_user(user).unwrap();
        assert_eq!(account.stats.total_won, 1);
        assert_eq!(account.stats.total_earned, 2_000);
        assert_eq!(account.history.len(), 1);

        let house = ledger.fetch_server(server).unwrap();
        assert_eq!(house.total_profit, -1_000);
        assert_eq!(house.history[0].user_id, Some(user));
    }

    #[test]
    fn test_money_is_conserved_across_rounds() {
        let (ledger, user, server) = setup();
        for multiplier in [0.0, 1.0, 1.98, 0.0, 3.5, 0.0] {
            let receipt = reserve_stake(&ledger, user, 700).unwrap();
            settle_round(&ledger, Some(server), &receipt, "limbo", multiplier).unwrap();
        }

        let points = ledger.fetch_user(user).unwrap().balances.points;
        let profit = ledger.fetch_server(server).unwrap().total_profit;
        assert_eq!(points + profit, 10_000);
    }

    #[test]
    fn test_credits_stake_pays_out_in_points() {
        let (ledger, user, _) = setup();
        ledger
            .adjust_balance(user, Currency::Credits, 500, BalanceMode::Set)
            .unwrap();
        let receipt = reserve_stake(&ledger, user, 500).unwrap();
        assert_eq!(receipt.amount_in(Currency::Credits), 500);

        settle_round(&ledger, None, &receipt, "coinflip", 1.96).unwrap();
        let account = ledger.fetch_user(user).unwrap();
        assert_eq!(account.balances.credits, 0);
        assert_eq!(account.balances.points, 10_980);
    }

    #[test]
    fn test_push_and_unregistered_server() {
        let (ledger, user, _) = setup();
        let receipt = reserve_stake(&ledger, user, 1_000).unwrap();
        let report = settle_round(&ledger, Some(ServerId(9)), &receipt, "dice", 1.0).unwrap();

        assert_eq!(report.entry.kind, EntryKind::Push);
        assert_eq!(report.house_delta, 0);
        assert_eq!(ledger.fetch_user(user).unwrap().stats.total_pushed, 1);
    }

    #[test]
    fn test_counter_overflow_is_rejected_without_side_effects() {
        let (ledger, user, server) = setup();
        ledger
            .adjust_balance(user, Currency::Points, i64::MAX, BalanceMode::Set)
            .unwrap();
        let receipt = reserve_stake(&ledger, user, i64::MAX).unwrap();
        let report = settle_round(&ledger, Some(server), &receipt, "dice", 1.0).unwrap();
        assert_eq!(report.balance_after, i64::MAX);

        // total_spent is already at the top of its range
        assert!(matches!(
            reserve_stake(&ledger, user, 1),
            Err(LedgerError::InvalidAmount(_))
        ));
        let account = ledger.fetch_user(user).unwrap();
        assert_eq!(account.balances.points, i64::MAX);
        assert_eq!(account.stats.total_played, 1);

        // The rest of the ledger keeps working
        ledger.register_user(UserId(2), None).unwrap();
        ledger
            .adjust_balance(UserId(2), Currency::Points, 50, BalanceMode::Increment)
            .unwrap();
        assert_eq!(ledger.fetch_user(UserId(2)).unwrap().balances.points, 50);
    }
}
