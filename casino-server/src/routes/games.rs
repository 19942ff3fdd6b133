use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use ledger::bet::reserve_stake;
use ledger::games::GameParams;
use ledger::round::settle_round;
use ledger::types::{EntryKind, ServerId, UserId, to_amount};
use serde::{Deserialize, Serialize};

use super::decimal;
use crate::{
    AppState,
    error::{ApiError, ROUND_FAILED_MESSAGE, error_response},
};

// Play request: common fields plus the game's own parameters
#[derive(Deserialize)]
pub struct PlayRequest {
    pub user_id: UserId,
    pub server_id: Option<ServerId>,
    pub stake: f64,
    #[serde(flatten)]
    pub params: GameParams,
}

#[derive(Serialize)]
pub struct PlayResponse {
    pub success: bool,
    pub game: String,
    pub kind: EntryKind,
    pub detail: String,
    pub multiplier: f64,
    pub stake: f64,
    pub payout: f64,
    pub balance: f64,
}

// Play a round endpoint
pub async fn play(State(state): State<AppState>, Json(payload): Json<PlayRequest>) -> Response {
    let result = tokio::task::spawn_blocking(move || play_round(&state, payload))
        .await
        .unwrap_or_else(|e| {
            tracing::error!("Round task failed: {}", e);
            Err(RoundError::Failed)
        });
    match result {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(RoundError::Rejected(e)) => e.into_response(),
        Err(RoundError::Failed) => {
            error_response(StatusCode::INTERNAL_SERVER_ERROR, ROUND_FAILED_MESSAGE)
        }
    }
}

enum RoundError {
    /// Nothing was deducted
    Rejected(ApiError),
    /// Failed after the stake was reserved
    Failed,
}

impl From<ledger::LedgerError> for RoundError {
    fn from(err: ledger::LedgerError) -> Self {
        RoundError::Rejected(ApiError(err))
    }
}

fn play_round(state: &AppState, payload: PlayRequest) -> Result<PlayResponse, RoundError> {
    let game = payload.params.name();
    let stake = to_amount(payload.stake);

    let _session = state
        .sessions
        .begin(payload.user_id, game, payload.params.timeout())?;

    // Drawn before the stake is reserved; invalid parameters move no money
    let outcome = payload.params.play(&mut rand::thread_rng())?;
    let receipt = reserve_stake(&state.ledger, payload.user_id, stake)?;

    let report = settle_round(
        &state.ledger,
        payload.server_id,
        &receipt,
        game,
        outcome.multiplier,
    )
    .map_err(|e| {
        tracing::error!(
            "Failed to settle {} round for user {}: {}",
            game,
            payload.user_id,
            e
        );
        RoundError::Failed
    })?;

    Ok(PlayResponse {
        success: true,
        game: game.to_string(),
        kind: report.entry.kind,
        detail: outcome.detail,
        multiplier: outcome.multiplier,
        stake: decimal(receipt.total),
        payout: decimal(report.payout),
        balance: decimal(report.balance_after),
    })
}
