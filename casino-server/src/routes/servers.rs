use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use ledger::ledger::{GameProfit, ProfitReport};
use ledger::types::{Registration, ServerAccount, ServerId, UserId, to_amount};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{EntryResponse, blocking, decimal, entries, users::RegisterResponse};
use crate::{AppState, error::ApiError, middleware::AdminAuth};

#[derive(Deserialize)]
pub struct RegisterServerRequest {
    pub name: String,
}

#[derive(Deserialize)]
pub struct ProfitRequest {
    /// Positive when the house gained
    pub delta: f64,
}

#[derive(Deserialize)]
pub struct AdminRequest {
    pub user_id: UserId,
}

#[derive(Serialize)]
pub struct ServerResponse {
    pub id: String,
    pub name: String,
    pub total_profit: f64,
    pub admins: Vec<String>,
    pub history: Vec<EntryResponse>,
}

impl From<&ServerAccount> for ServerResponse {
    fn from(server: &ServerAccount) -> Self {
        ServerResponse {
            id: server.id.to_string(),
            name: server.name.clone(),
            total_profit: decimal(server.total_profit),
            admins: server.admins.iter().map(|id| id.to_string()).collect(),
            history: entries(&server.history),
        }
    }
}

#[derive(Serialize)]
pub struct GameProfitResponse {
    pub rounds: u64,
    pub wagered: f64,
    pub paid_out: f64,
    pub profit: f64,
}

impl From<&GameProfit> for GameProfitResponse {
    fn from(totals: &GameProfit) -> Self {
        GameProfitResponse {
            rounds: totals.rounds,
            wagered: decimal(totals.wagered),
            paid_out: decimal(totals.paid_out),
            profit: decimal(totals.profit),
        }
    }
}

// Profit report response model
#[derive(Serialize)]
pub struct ReportResponse {
    pub server_id: String,
    pub name: String,
    pub total_profit: f64,
    pub recent: GameProfitResponse,
    pub per_game: BTreeMap<String, GameProfitResponse>,
}

impl From<&ProfitReport> for ReportResponse {
    fn from(report: &ProfitReport) -> Self {
        ReportResponse {
            server_id: report.server_id.to_string(),
            name: report.name.clone(),
            total_profit: decimal(report.total_profit),
            recent: GameProfitResponse::from(&report.window),
            per_game: report
                .per_game
                .iter()
                .map(|(game, totals)| (game.clone(), GameProfitResponse::from(totals)))
                .collect(),
        }
    }
}

#[derive(Serialize)]
pub struct DeleteServerResponse {
    pub success: bool,
    pub message: String,
}

// Register server endpoint
pub async fn register_server(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(payload): Json<RegisterServerRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    let ledger = state.ledger.clone();
    let registration = blocking(move || ledger.register_server(ServerId(id), &payload.name)).await?;
    let (status, message) = match registration {
        Registration::Created => (StatusCode::CREATED, "Server registered"),
        Registration::AlreadyExists => (StatusCode::OK, "Server already registered"),
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

// Get server endpoint
pub async fn get_server(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<ServerResponse>, ApiError> {
    let ledger = state.ledger.clone();
    let server = blocking(move || ledger.fetch_server(ServerId(id))).await?;
    Ok(Json(ServerResponse::from(&server)))
}

// Delete server endpoint (admin)
pub async fn delete_server(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Path(id): Path<u64>,
) -> Result<(StatusCode, Json<DeleteServerResponse>), ApiError> {
    let ledger = state.ledger.clone();
    let removed = blocking(move || ledger.delete_server(ServerId(id))).await?;
    let response = DeleteServerResponse {
        success: removed,
        message: if removed {
            "Server deleted".to_string()
        } else {
            "Server not found".to_string()
        },
    };
    let status = if removed {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    };
    Ok((status, Json(response)))
}

// Update house profit endpoint (admin)
pub async fn update_profit(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Path(id): Path<u64>,
    Json(payload): Json<ProfitRequest>,
) -> Result<Json<ServerResponse>, ApiError> {
    let delta = to_amount(payload.delta);
    let ledger = state.ledger.clone();
    let server = blocking(move || ledger.update_server_profit(ServerId(id), delta)).await?;
    Ok(Json(ServerResponse::from(&server)))
}

// Add server admin endpoint (admin)
pub async fn add_admin(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Path(id): Path<u64>,
    Json(payload): Json<AdminRequest>,
) -> Result<Json<ServerResponse>, ApiError> {
    let ledger = state.ledger.clone();
    let server = blocking(move || ledger.add_server_admin(ServerId(id), payload.user_id)).await?;
    Ok(Json(ServerResponse::from(&server)))
}

// Remove server admin endpoint (admin)
pub async fn remove_admin(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Path((id, user_id)): Path<(u64, u64)>,
) -> Result<Json<ServerResponse>, ApiError> {
    let ledger = state.ledger.clone();
    let server =
        blocking(move || ledger.remove_server_admin(ServerId(id), UserId(user_id))).await?;
    Ok(Json(ServerResponse::from(&server)))
}

// Profit report endpoint
pub async fn profit_report(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<ReportResponse>, ApiError> {
    let ledger = state.ledger.clone();
    let report = blocking(move || ledger.profit_report(ServerId(id))).await?;
    Ok(Json(ReportResponse::from(&report)))
}
