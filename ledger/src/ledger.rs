use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::error::{AccountKind, LedgerError};
use crate::store::DocumentStore;
use crate::types::{
    Amount, BalanceMode, Currency, EntryKind, HISTORY_LIMIT, LedgerEntry, LedgerEvent,
    Registration, ServerAccount, ServerId, Stats, UserAccount, UserId, push_capped,
};

const EVENT_BUFFER: usize = 1024;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BalanceOp {
    pub currency: Currency,
    pub amount: Amount,
    pub mode: BalanceMode,
}

/// Signed deltas applied to the account counters.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct StatsDelta {
    pub played: u64,
    pub won: u64,
    pub lost: u64,
    pub pushed: u64,
    pub spent: Amount,
    pub earned: Amount,
}

impl StatsDelta {
    /// Adds every delta, or fails with the counters untouched.
    pub(crate) fn apply(&self, stats: &mut Stats) -> Result<(), LedgerError> {
        let overflow = |counter: &str| LedgerError::InvalidAmount(format!("{counter} overflow"));
        let updated = Stats {
            total_played: stats
                .total_played
                .checked_add(self.played)
                .ok_or_else(|| overflow("played counter"))?,
            total_won: stats
                .total_won
                .checked_add(self.won)
                .ok_or_else(|| overflow("won counter"))?,
            total_lost: stats
                .total_lost
                .checked_add(self.lost)
                .ok_or_else(|| overflow("lost counter"))?,
            total_pushed: stats
                .total_pushed
                .checked_add(self.pushed)
                .ok_or_else(|| overflow("pushed counter"))?,
            total_spent: stats
                .total_spent
                .checked_add(self.spent)
                .ok_or_else(|| overflow("spent total"))?,
            total_earned: stats
                .total_earned
                .checked_add(self.earned)
                .ok_or_else(|| overflow("earned total"))?,
        };
        *stats = updated;
        Ok(())
    }
}

/// Several field changes committed to one user document in one store call.
#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub balances: Vec<BalanceOp>,
    pub stats: StatsDelta,
    pub history: Vec<LedgerEntry>,
}

impl UserUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance(mut self, currency: Currency, amount: Amount, mode: BalanceMode) -> Self {
        self.balances.push(BalanceOp {
            currency,
            amount,
            mode,
        });
        self
    }

    pub fn stats(mut self, stats: StatsDelta) -> Self {
        self.stats = stats;
        self
    }

    pub fn entry(mut self, entry: LedgerEntry) -> Self {
        self.history.push(entry);
        self
    }

    fn touches_balances(&self) -> bool {
        !self.balances.is_empty()
    }

    /// Applies every change, or fails without a partial result being kept
    /// by the store.
    pub fn apply(&self, account: &mut UserAccount, history_limit: usize) -> Result<(), LedgerError> {
        for op in &self.balances {
            let balance = account.balances.get_mut(op.currency);
            match op.mode {
                BalanceMode::Set => {
                    if op.amount < 0 {
                        return Err(LedgerError::InvalidAmount(format!(
                            "cannot set {} to a negative balance",
                            op.currency
                        )));
                    }
                    *balance = op.amount;
                }
                BalanceMode::Increment => {
                    let updated = balance.checked_add(op.amount).ok_or_else(|| {
                        LedgerError::InvalidAmount(format!("{} balance overflow", op.currency))
                    })?;
                    if updated < 0 {
                        return Err(LedgerError::InsufficientFunds {
                            needed: -op.amount,
                            available: *balance,
                        });
                    }
                    *balance = updated;
                }
            }
        }
        self.stats.apply(&mut account.stats)?;
        for entry in &self.history {
            push_capped(&mut account.history, entry.clone(), history_limit);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GameProfit {
    pub rounds: u64,
    pub wagered: Amount,
    pub paid_out: Amount,
    pub profit: Amount,
}

/// House results over the server's stored history window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfitReport {
    pub server_id: ServerId,
    pub name: String,
    pub total_profit: Amount,
    pub window: GameProfit,
    pub per_game: BTreeMap<String, GameProfit>,
}

/// Data access facade over the account collections. Stateless apart from the
/// event channel: every call is one round trip to the store, with no retries
/// and no compensation when a store call fails.
#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn DocumentStore>,
    events: broadcast::Sender<LedgerEvent>,
    history_limit: usize,
}

impl Ledger {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self::with_history_limit(store, HISTORY_LIMIT)
    }

    pub fn with_history_limit(store: Arc<dyn DocumentStore>, history_limit: usize) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            store,
            events,
            history_limit,
        }
    }

    pub fn history_limit(&self) -> usize {
        self.history_limit
    }

    /// Receives balance and profit changes committed after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: LedgerEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    pub fn fetch_user(&self, id: UserId) -> Result<UserAccount, LedgerError> {
        self.store.get_user(id)?.ok_or(LedgerError::NotFound {
            kind: AccountKind::User,
            id: id.0,
        })
    }

    pub fn fetch_server(&self, id: ServerId) -> Result<ServerAccount, LedgerError> {
        self.store.get_server(id)?.ok_or(LedgerError::NotFound {
            kind: AccountKind::Server,
            id: id.0,
        })
    }

    /// Creates a zeroed account. An existing account is never touched.
    pub fn register_user(
        &self,
        id: UserId,
        referred_by: Option<UserId>,
    ) -> Result<Registration, LedgerError> {
        let mut account = UserAccount::new(id);
        account.referred_by = referred_by.filter(|referrer| *referrer != id);

        if !self.store.insert_user(&account)? {
            tracing::debug!("User {} already registered", id);
            return Ok(Registration::AlreadyExists);
        }
        tracing::info!("Registered user {}", id);

        if let Some(referrer) = account.referred_by {
            match self.store.update_user(referrer, &mut |account| {
                account.referrals += 1;
                Ok(())
            }) {
                Ok(_) => tracing::info!("User {} referred by {}", id, referrer),
                Err(LedgerError::NotFound { .. }) => {
                    tracing::warn!("Referrer {} of user {} is not registered", referrer, id)
                }
                Err(e) => return Err(e),
            }
        }

        Ok(Registration::Created)
    }

    pub fn register_server(
        &self,
        id: ServerId,
        name: &str,
    ) -> Result<Registration, LedgerError> {
        if !self.store.insert_server(&ServerAccount::new(id, name))? {
            return Ok(Registration::AlreadyExists);
        }
        tracing::info!("Registered server {} ({})", id, name);
        Ok(Registration::Created)
    }

    /// The primitive every money movement goes through. An increment that
    /// would leave the balance negative is rejected before anything is
    /// written.
    pub fn adjust_balance(
        &self,
        id: UserId,
        currency: Currency,
        amount: Amount,
        mode: BalanceMode,
    ) -> Result<UserAccount, LedgerError> {
        self.apply_user_update(id, &UserUpdate::new().balance(currency, amount, mode))
    }

    pub fn append_history(
        &self,
        id: UserId,
        entry: LedgerEntry,
        max_entries: usize,
    ) -> Result<UserAccount, LedgerError> {
        self.store.update_user(id, &mut |account| {
            push_capped(&mut account.history, entry.clone(), max_entries);
            Ok(())
        })
    }

    pub fn apply_user_update(
        &self,
        id: UserId,
        update: &UserUpdate,
    ) -> Result<UserAccount, LedgerError> {
        let history_limit = self.history_limit;
        let account = self
            .store
            .update_user(id, &mut |account| update.apply(account, history_limit))
            .inspect_err(|e| tracing::debug!("Update for user {} rejected: {}", id, e))?;
        if update.touches_balances() {
            self.publish_balance(&account);
        }
        Ok(account)
    }

    /// Runs an arbitrary single-document mutation and publishes the
    /// resulting balances.
    pub(crate) fn mutate_user(
        &self,
        id: UserId,
        mutation: &mut dyn FnMut(&mut UserAccount) -> Result<(), LedgerError>,
    ) -> Result<UserAccount, LedgerError> {
        let account = self.store.update_user(id, mutation)?;
        self.publish_balance(&account);
        Ok(account)
    }

    fn publish_balance(&self, account: &UserAccount) {
        self.publish(LedgerEvent::BalanceChanged {
            user_id: account.id,
            balances: account.balances,
        });
    }

    /// Signed delta: positive when the house gained.
    pub fn update_server_profit(
        &self,
        server_id: ServerId,
        delta: Amount,
    ) -> Result<ServerAccount, LedgerError> {
        self.settle_server(server_id, delta, None)
    }

    pub fn append_server_history(
        &self,
        server_id: ServerId,
        entry: LedgerEntry,
        max_entries: usize,
    ) -> Result<ServerAccount, LedgerError> {
        self.store.update_server(server_id, &mut |server| {
            push_capped(&mut server.history, entry.clone(), max_entries);
            Ok(())
        })
    }

    /// Profit delta and optional mirrored entry in one server update.
    pub(crate) fn settle_server(
        &self,
        server_id: ServerId,
        delta: Amount,
        entry: Option<&LedgerEntry>,
    ) -> Result<ServerAccount, LedgerError> {
        let history_limit = self.history_limit;
        let server = self.store.update_server(server_id, &mut |server| {
            server.total_profit = server.total_profit.checked_add(delta).ok_or_else(|| {
                LedgerError::InvalidAmount("server profit overflow".to_string())
            })?;
            if let Some(entry) = entry {
                push_capped(&mut server.history, entry.clone(), history_limit);
            }
            Ok(())
        })?;
        self.publish(LedgerEvent::ServerProfitChanged {
            server_id,
            total_profit: server.total_profit,
        });
        Ok(server)
    }

    pub fn set_blacklisted(&self, id: UserId, blacklisted: bool) -> Result<UserAccount, LedgerError> {
        let account = self.store.update_user(id, &mut |account| {
            account.blacklisted = blacklisted;
            Ok(())
        })?;
        tracing::info!("User {} blacklisted={}", id, blacklisted);
        Ok(account)
    }

    /// Administrative wipe. Returns whether an account was removed.
    pub fn wipe_user(&self, id: UserId) -> Result<bool, LedgerError> {
        let removed = self.store.delete_user(id)?;
        if removed {
            tracing::warn!("Wiped user {}", id);
        }
        Ok(removed)
    }

    pub fn delete_server(&self, id: ServerId) -> Result<bool, LedgerError> {
        let removed = self.store.delete_server(id)?;
        if removed {
            tracing::warn!("Deleted server {}", id);
        }
        Ok(removed)
    }

    pub fn add_server_admin(
        &self,
        server_id: ServerId,
        user_id: UserId,
    ) -> Result<ServerAccount, LedgerError> {
        self.store.update_server(server_id, &mut |server| {
            server.admins.insert(user_id);
            Ok(())
        })
    }

    pub fn remove_server_admin(
        &self,
        server_id: ServerId,
        user_id: UserId,
    ) -> Result<ServerAccount, LedgerError> {
        self.store.update_server(server_id, &mut |server| {
            server.admins.remove(&user_id);
            Ok(())
        })
    }

    pub fn profit_report(&self, server_id: ServerId) -> Result<ProfitReport, LedgerError> {
        let server = self.fetch_server(server_id)?;
        let mut window = GameProfit::default();
        let mut per_game: BTreeMap<String, GameProfit> = BTreeMap::new();

        let rounds = server
            .history
            .iter()
            .filter(|e| matches!(e.kind, EntryKind::Win | EntryKind::Loss | EntryKind::Push));
        for entry in rounds {
            let game = entry.game.clone().unwrap_or_else(|| "unknown".to_string());
            for totals in [&mut window, per_game.entry(game).or_default()] {
                totals.rounds += 1;
                totals.wagered = totals.wagered.saturating_add(entry.bet_amount);
                totals.paid_out = totals.paid_out.saturating_add(entry.result_amount);
                totals.profit = totals
                    .profit
                    .saturating_add(entry.bet_amount.saturating_sub(entry.result_amount));
            }
        }

        Ok(ProfitReport {
            server_id,
            name: server.name,
            total_profit: server.total_profit,
            window,
            per_game,
        })
    }

    /// Highest balances first. Blacklisted users are left out.
    pub fn leaderboard(
        &self,
        currency: Currency,
        limit: usize,
    ) -> Result<Vec<(UserId, Amount)>, LedgerError> {
        let mut rows: Vec<(UserId, Amount)> = self
            .store
            .list_users()?
            .into_iter()
            .filter(|account| !account.blacklisted)
            .map(|account| (account.id, account.balances.get(currency)))
            .collect();
        rows.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        rows.truncate(limit);
        Ok(rows)
    }
}
