use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::LedgerError;

/// Fixed-point amount in hundredths of a unit. Keeps increments exact.
pub type Amount = i64;

/// 1 point = 100 units
pub const AMOUNT_SCALE: i64 = 100;

/// Most recent entries kept per account history.
pub const HISTORY_LIMIT: usize = 100;

/// Convert a decimal value to a fixed-point Amount.
#[inline]
pub fn to_amount(value: f64) -> Amount {
    (value * AMOUNT_SCALE as f64).round() as Amount
}

/// Convert a fixed-point Amount back to a decimal value.
#[inline]
pub fn from_amount(amount: Amount) -> f64 {
    amount as f64 / AMOUNT_SCALE as f64
}

#[inline]
pub(crate) fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

// Chat platform ids are 64-bit snowflakes. JSON documents carry them as
// strings so clients with 53-bit numbers don't corrupt them.
macro_rules! snowflake_id {
    ($name:ident) => {
        #[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim().parse().map(Self)
            }
        }

        impl Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                serializer.collect_str(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                let value = String::deserialize(deserializer)?;
                value
                    .parse()
                    .map_err(|_| serde::de::Error::custom("expected a numeric id string"))
            }
        }
    };
}

snowflake_id!(UserId);
snowflake_id!(ServerId);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Currency {
    Points,
    /// Promotional balance, spent before points and never paid out
    Credits,
}

impl Currency {
    pub const ALL: [Currency; 2] = [Currency::Points, Currency::Credits];

    /// Every round pays out in this currency.
    pub const SETTLEMENT: Currency = Currency::Points;

    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Points => "points",
            Currency::Credits => "credits",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Currency {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "points" => Ok(Currency::Points),
            "credits" => Ok(Currency::Credits),
            other => Err(LedgerError::UnknownCurrency(other.to_string())),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BalanceMode {
    /// Overwrite the balance
    Set,
    /// Add a signed delta to the balance
    Increment,
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balances {
    pub points: Amount,
    pub credits: Amount,
}

impl Balances {
    pub fn get(&self, currency: Currency) -> Amount {
        match currency {
            Currency::Points => self.points,
            Currency::Credits => self.credits,
        }
    }

    pub fn get_mut(&mut self, currency: Currency) -> &mut Amount {
        match currency {
            Currency::Points => &mut self.points,
            Currency::Credits => &mut self.credits,
        }
    }

    pub fn total(&self) -> Amount {
        self.points.saturating_add(self.credits)
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub total_played: u64,
    pub total_won: u64,
    pub total_lost: u64,
    pub total_pushed: u64,
    pub total_spent: Amount,
    pub total_earned: Amount,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Win,
    Loss,
    Push,
    Deposit,
    Withdraw,
    AdminAdjustment,
}

/// One immutable record of a balance-affecting event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub kind: EntryKind,
    pub game: Option<String>,
    pub currency: Currency,
    pub bet_amount: Amount,
    pub result_amount: Amount,
    pub multiplier: Option<f64>,
    /// Milliseconds since the unix epoch
    pub timestamp: u64,
    /// Set on entries mirrored into a server history
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
}

impl LedgerEntry {
    pub fn new(kind: EntryKind, currency: Currency, bet_amount: Amount, result_amount: Amount) -> Self {
        Self {
            kind,
            game: None,
            currency,
            bet_amount,
            result_amount,
            multiplier: None,
            timestamp: current_timestamp(),
            user_id: None,
        }
    }

    pub fn with_game(mut self, game: impl Into<String>) -> Self {
        self.game = Some(game.into());
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = Some(multiplier);
        self
    }

    /// Copy of this entry tagged with the user it belongs to.
    pub fn mirrored_for(&self, user_id: UserId) -> Self {
        Self {
            user_id: Some(user_id),
            ..self.clone()
        }
    }
}

/// Pushes an entry and drops the oldest ones beyond `max_entries`.
pub(crate) fn push_capped(history: &mut Vec<LedgerEntry>, entry: LedgerEntry, max_entries: usize) {
    history.push(entry);
    if history.len() > max_entries {
        let overflow = history.len() - max_entries;
        history.drain(..overflow);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: UserId,
    pub balances: Balances,
    /// Most recent last
    pub history: Vec<LedgerEntry>,
    pub stats: Stats,
    #[serde(default)]
    pub blacklisted: bool,
    #[serde(default)]
    pub referred_by: Option<UserId>,
    #[serde(default)]
    pub referrals: u64,
    pub created_at: u64,
}

impl UserAccount {
    pub fn new(id: UserId) -> Self {
        Self {
            id,
            balances: Balances::default(),
            history: Vec::new(),
            stats: Stats::default(),
            blacklisted: false,
            referred_by: None,
            referrals: 0,
            created_at: current_timestamp(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerAccount {
    pub id: ServerId,
    pub name: String,
    /// Signed house profit across every round hosted in this server
    pub total_profit: Amount,
    pub admins: BTreeSet<UserId>,
    pub history: Vec<LedgerEntry>,
    pub created_at: u64,
}

impl ServerAccount {
    pub fn new(id: ServerId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            total_profit: 0,
            admins: BTreeSet::new(),
            history: Vec::new(),
            created_at: current_timestamp(),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Registration {
    Created,
    AlreadyExists,
}

/// Balance-affecting events published to subscribers after a commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LedgerEvent {
    #[serde(rename = "balance_changed")]
    BalanceChanged { user_id: UserId, balances: Balances },
    #[serde(rename = "server_profit_changed")]
    ServerProfitChanged {
        server_id: ServerId,
        total_profit: Amount,
    },
}
