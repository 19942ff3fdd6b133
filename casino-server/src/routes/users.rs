use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use ledger::types::{
    BalanceMode, Currency, EntryKind, LedgerEntry, Registration, Stats, UserAccount, UserId,
    to_amount,
};
use serde::{Deserialize, Serialize};

use super::{BalancesResponse, EntryResponse, blocking, decimal, entries};
use crate::{AppState, error::ApiError, middleware::AdminAuth};

// Register request
#[derive(Deserialize, Default)]
pub struct RegisterUserRequest {
    #[serde(default)]
    pub referred_by: Option<UserId>,
}

#[derive(Serialize)]
pub struct RegisterResponse {
    pub success: bool,
    pub message: String,
    pub registration: Registration,
}

// Adjust balance request
#[derive(Deserialize)]
pub struct AdjustBalanceRequest {
    pub currency: String,
    pub amount: f64,
    pub mode: BalanceMode,
}

// Append history request
#[derive(Deserialize)]
pub struct AppendHistoryRequest {
    pub kind: EntryKind,
    pub game: Option<String>,
    pub currency: String,
    pub bet_amount: f64,
    pub result_amount: f64,
    pub multiplier: Option<f64>,
    pub max_entries: Option<usize>,
}

#[derive(Deserialize)]
pub struct BlacklistRequest {
    pub blacklisted: bool,
}

#[derive(Deserialize)]
pub struct LeaderboardQuery {
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_currency() -> String {
    Currency::SETTLEMENT.to_string()
}

fn default_limit() -> usize {
    10
}

#[derive(Serialize)]
pub struct StatsResponse {
    pub total_played: u64,
    pub total_won: u64,
    pub total_lost: u64,
    pub total_pushed: u64,
    pub total_spent: f64,
    pub total_earned: f64,
}

impl From<&Stats> for StatsResponse {
    fn from(stats: &Stats) -> Self {
        StatsResponse {
            total_played: stats.total_played,
            total_won: stats.total_won,
            total_lost: stats.total_lost,
            total_pushed: stats.total_pushed,
            total_spent: decimal(stats.total_spent),
            total_earned: decimal(stats.total_earned),
        }
    }
}

// User account response model
#[derive(Serialize)]
pub struct UserResponse {
    pub id: String,
    pub balances: BalancesResponse,
    pub history: Vec<EntryResponse>,
    pub stats: StatsResponse,
    pub blacklisted: bool,
    pub referred_by: Option<String>,
    pub referrals: u64,
}

impl From<&UserAccount> for UserResponse {
    fn from(account: &UserAccount) -> Self {
        UserResponse {
            id: account.id.to_string(),
            balances: BalancesResponse::from(&account.balances),
            history: entries(&account.history),
            stats: StatsResponse::from(&account.stats),
            blacklisted: account.blacklisted,
            referred_by: account.referred_by.map(|id| id.to_string()),
            referrals: account.referrals,
        }
    }
}

#[derive(Serialize)]
pub struct LeaderboardRow {
    pub user_id: String,
    pub balance: f64,
}

#[derive(Serialize)]
pub struct WipeResponse {
    pub success: bool,
    pub message: String,
}

// Register user endpoint
pub async fn register_user(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(payload): Json<RegisterUserRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    let ledger = state.ledger.clone();
    let registration = blocking(move || ledger.register_user(UserId(id), payload.referred_by)).await?;
    let (status, message) = match registration {
        Registration::Created => (StatusCode::CREATED, "User registered"),
        Registration::AlreadyExists => (StatusCode::OK, "User already registered"),
    };
    Ok((
        status,
        Json(RegisterResponse {
            success: true,
            message: message.to_string(),
            registration,
        }),
    ))
}

// Get user endpoint
pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<UserResponse>, ApiError> {
    let ledger = state.ledger.clone();
    let account = blocking(move || ledger.fetch_user(UserId(id))).await?;
    Ok(Json(UserResponse::from(&account)))
}

// Adjust balance endpoint (admin)
pub async fn adjust_balance(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Path(id): Path<u64>,
    Json(payload): Json<AdjustBalanceRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    let currency: Currency = payload.currency.parse()?;
    let (amount, mode) = (to_amount(payload.amount), payload.mode);
    let ledger = state.ledger.clone();
    let account =
        blocking(move || ledger.adjust_balance(UserId(id), currency, amount, mode)).await?;
    tracing::info!(
        "Admin adjusted {} of user {} ({:?} {})",
        currency,
        id,
        payload.mode,
        payload.amount
    );
    Ok(Json(UserResponse::from(&account)))
}

// Append history endpoint (admin)
pub async fn append_history(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Path(id): Path<u64>,
    Json(payload): Json<AppendHistoryRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    let currency: Currency = payload.currency.parse()?;
    let mut entry = LedgerEntry::new(
        payload.kind,
        currency,
        to_amount(payload.bet_amount),
        to_amount(payload.result_amount),
    );
    entry.game = payload.game;
    entry.multiplier = payload.multiplier;

    let max_entries = payload
        .max_entries
        .unwrap_or(state.ledger.history_limit());
    let ledger = state.ledger.clone();
    let account = blocking(move || ledger.append_history(UserId(id), entry, max_entries)).await?;
    Ok(Json(UserResponse::from(&account)))
}

// Blacklist endpoint (admin)
pub async fn set_blacklisted(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Path(id): Path<u64>,
    Json(payload): Json<BlacklistRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    let ledger = state.ledger.clone();
    let account =
        blocking(move || ledger.set_blacklisted(UserId(id), payload.blacklisted)).await?;
    Ok(Json(UserResponse::from(&account)))
}

// Wipe user endpoint (admin)
pub async fn wipe_user(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Path(id): Path<u64>,
) -> Result<(StatusCode, Json<WipeResponse>), ApiError> {
    let ledger = state.ledger.clone();
    let removed = blocking(move || ledger.wipe_user(UserId(id))).await?;
    let response = WipeResponse {
        success: removed,
        message: if removed {
            "User wiped".to_string()
        } else {
            "User not found".to_string()
        },
    };
    let status = if removed {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    };
    Ok((status, Json(response)))
}

// Leaderboard endpoint
pub async fn leaderboard(
    State(state): State<AppState>,
    Query(params): Query<LeaderboardQuery>,
) -> Result<Json<Vec<LeaderboardRow>>, ApiError> {
    let currency: Currency = params.currency.parse()?;
    let limit = params.limit.clamp(1, 100);
    let ledger = state.ledger.clone();
    let rows = blocking(move || ledger.leaderboard(currency, limit))
        .await?
        .into_iter()
        .map(|(user_id, balance)| LeaderboardRow {
            user_id: user_id.to_string(),
            balance: decimal(balance),
        })
        .collect();
    Ok(Json(rows))
}
