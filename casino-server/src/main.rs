use anyhow::Context;
use axum::{
    Router,
    routing::{any, delete, get, post},
};
use clap::Parser;
use ledger::Ledger;
use ledger::session::SessionTable;
use ledger::store::{DocumentStore, MemoryStore, SqliteStore};
use std::sync::Arc;
use std::time::Instant;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::EnvFilter;

mod config;
mod error;
mod middleware;
mod routes;
mod websocket;

use config::Config;
use routes::games::play;
use routes::servers::{
    add_admin, delete_server, get_server, profit_report, register_server, remove_admin,
    update_profit,
};
use routes::users::{
    adjust_balance, append_history, get_user, leaderboard, register_user, set_blacklisted,
    wipe_user,
};
use websocket::websocket_handler;

// Application state shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub ledger: Ledger,
    pub sessions: SessionTable,
    /// Hex SHA-256 of the admin bearer token; admin routes are off when None
    pub admin_digest: Option<Arc<str>>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/users/{id}", post(register_user).get(get_user).delete(wipe_user))
        .route("/users/{id}/balance", post(adjust_balance))
        .route("/users/{id}/history", post(append_history))
        .route("/users/{id}/blacklist", post(set_blacklisted))
        .route(
            "/servers/{id}",
            post(register_server).get(get_server).delete(delete_server),
        )
        .route("/servers/{id}/profit", post(update_profit))
        .route("/servers/{id}/admins", post(add_admin))
        .route("/servers/{id}/admins/{user_id}", delete(remove_admin))
        .route("/servers/{id}/report", get(profit_report))
        .route("/leaderboard", get(leaderboard))
        .route("/games/play", post(play))
        .route("/notifications", any(websocket_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

fn open_store(config: &Config) -> anyhow::Result<Arc<dyn DocumentStore>> {
    match &config.db {
        Some(path) => {
            let store = SqliteStore::open(path)
                .with_context(|| format!("failed to open database {}", path.display()))?;
            tracing::info!("SQLite store opened at {}", path.display());
            Ok(Arc::new(store))
        }
        None => {
            tracing::info!("In-memory store initialized, accounts will not survive a restart");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

// Releases game sessions whose deadline passed
async fn reap_sessions(sessions: SessionTable, config: Config) {
    let mut interval = tokio::time::interval(config.reap_interval());
    loop {
        interval.tick().await;
        for expired in sessions.reap_expired(Instant::now()) {
            tracing::info!(
                "{} session of user {} timed out, stake forfeited",
                expired.game,
                expired.user_id
            );
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    let store = open_store(&config)?;
    let ledger = Ledger::with_history_limit(store, config.history_limit);

    let admin_digest = config.admin_digest().map(Arc::from);
    if admin_digest.is_none() {
        tracing::warn!("No admin token configured, admin routes are disabled");
    }

    let state = AppState {
        ledger,
        sessions: SessionTable::new(),
        admin_digest,
    };
    tokio::spawn(reap_sessions(state.sessions.clone(), config.clone()));

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    tracing::info!("Server running on http://{}", config.bind);
    axum::serve(listener, app(state)).await?;

    Ok(())
}

// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

// Root endpoint
async fn root() -> &'static str {
    "Casino Ledger API - POST /users/{id} to register, GET /users/{id} for balances, POST /games/play to play a round, WebSocket /notifications for balance updates"
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use ledger::LedgerError;
    use ledger::store::Mutation;
    use ledger::types::{BalanceMode, Currency, ServerAccount, ServerId, UserAccount, UserId};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    const ADMIN_TOKEN: &str = "let-me-in";

    fn test_state() -> AppState {
        AppState {
            ledger: Ledger::new(Arc::new(MemoryStore::new())),
            sessions: SessionTable::new(),
            admin_digest: Some(Arc::from(middleware::token_digest(ADMIN_TOKEN))),
        }
    }

    fn funded_user(state: &AppState, id: u64, points: i64) {
        state.ledger.register_user(UserId(id), None).unwrap();
        state
            .ledger
            .adjust_balance(UserId(id), Currency::Points, points, BalanceMode::Set)
            .unwrap();
    }

    // Memory store whose server collection is unreachable
    struct ServerOutage(MemoryStore);

    impl DocumentStore for ServerOutage {
        fn get_user(&self, id: UserId) -> Result<Option<UserAccount>, LedgerError> {
            self.0.get_user(id)
        }

        fn insert_user(&self, account: &UserAccount) -> Result<bool, LedgerError> {
            self.0.insert_user(account)
        }

        fn update_user(
            &self,
            id: UserId,
            mutation: Mutation<'_, UserAccount>,
        ) -> Result<UserAccount, LedgerError> {
            self.0.update_user(id, mutation)
        }

        fn delete_user(&self, id: UserId) -> Result<bool, LedgerError> {
            self.0.delete_user(id)
        }

        fn list_users(&self) -> Result<Vec<UserAccount>, LedgerError> {
            self.0.list_users()
        }

        fn get_server(&self, id: ServerId) -> Result<Option<ServerAccount>, LedgerError> {
            self.0.get_server(id)
        }

        fn insert_server(&self, account: &ServerAccount) -> Result<bool, LedgerError> {
            self.0.insert_server(account)
        }

        fn update_server(
            &self,
            _id: ServerId,
            _mutation: Mutation<'_, ServerAccount>,
        ) -> Result<ServerAccount, LedgerError> {
            Err(LedgerError::StoreUnavailable("connection reset".to_string()))
        }

        fn delete_server(&self, id: ServerId) -> Result<bool, LedgerError> {
            self.0.delete_server(id)
        }
    }

    async fn send(
        state: &AppState,
        method: &str,
        uri: &str,
        body: Option<Value>,
        admin: bool,
    ) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if admin {
            request = request.header(header::AUTHORIZATION, format!("Bearer {ADMIN_TOKEN}"));
        }
        let request = match body {
            Some(body) => request
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = app(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_register_and_fetch_user() {
        let state = test_state();
        let (status, _) = send(&state, "GET", "/users/1", None, false).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(&state, "POST", "/users/1", Some(json!({})), false).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["registration"], "created");

        let (status, body) = send(&state, "POST", "/users/1", Some(json!({})), false).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["registration"], "already_exists");

        let (status, body) = send(&state, "GET", "/users/1", None, false).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], "1");
        assert_eq!(body["balances"]["points"], 0.0);
    }

    #[tokio::test]
    async fn test_adjust_balance_requires_admin() {
        let state = test_state();
        state.ledger.register_user(UserId(1), None).unwrap();
        let adjust = json!({"currency": "points", "amount": 100.0, "mode": "increment"});

        let (status, _) =
            send(&state, "POST", "/users/1/balance", Some(adjust.clone()), false).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = send(&state, "POST", "/users/1/balance", Some(adjust), true).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["balances"]["points"], 100.0);

        let set = json!({"currency": "points", "amount": 30.0, "mode": "set"});
        let (_, body) = send(&state, "POST", "/users/1/balance", Some(set), true).await;
        assert_eq!(body["balances"]["points"], 30.0);

        let overdraw = json!({"currency": "points", "amount": -30.01, "mode": "increment"});
        let (status, _) = send(&state, "POST", "/users/1/balance", Some(overdraw), true).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let unknown = json!({"currency": "tokens", "amount": 1.0, "mode": "set"});
        let (status, body) = send(&state, "POST", "/users/1/balance", Some(unknown), true).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "unknown currency 'tokens'");
    }

    #[tokio::test]
    async fn test_admin_routes_disabled_without_token() {
        let mut state = test_state();
        state.admin_digest = None;
        let (status, _) = send(&state, "DELETE", "/servers/1", None, true).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_play_round_settles_user_and_house() {
        let state = test_state();
        state.ledger.register_user(UserId(7), None).unwrap();
        state.ledger.register_server(ServerId(3), "floor").unwrap();
        state
            .ledger
            .adjust_balance(
                UserId(7),
                Currency::Points,
                10_000,
                BalanceMode::Set,
            )
            .unwrap();

        let request = json!({
            "user_id": "7",
            "server_id": "3",
            "stake": 25.0,
            "game": "limbo",
            "target": 2.0
        });
        let (status, body) = send(&state, "POST", "/games/play", Some(request), false).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["game"], "limbo");

        let balance = body["balance"].as_f64().unwrap();
        let (_, server) = send(&state, "GET", "/servers/3", None, false).await;
        let profit = server["total_profit"].as_f64().unwrap();
        assert_eq!(balance + profit, 100.0);
        assert_eq!(server["history"][0]["user_id"], "7");
        assert!(!state.sessions.is_active(UserId(7)));
    }

    #[tokio::test]
    async fn test_play_rejections() {
        let state = test_state();
        state.ledger.register_user(UserId(7), None).unwrap();
        let request = json!({"user_id": "7", "stake": 5.0, "game": "coinflip", "side": "heads"});

        let (status, body) =
            send(&state, "POST", "/games/play", Some(request.clone()), false).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "insufficient funds (needed 5, available 0)");

        let _guard = state
            .sessions
            .begin(UserId(7), "blackjack", std::time::Duration::from_secs(60))
            .unwrap();
        let (status, _) = send(&state, "POST", "/games/play", Some(request), false).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_blacklisted_user_is_forbidden() {
        let state = test_state();
        state.ledger.register_user(UserId(7), None).unwrap();
        let (status, body) = send(
            &state,
            "POST",
            "/users/7/blacklist",
            Some(json!({"blacklisted": true})),
            true,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["blacklisted"], true);

        let request = json!({"user_id": "7", "stake": 1.0, "game": "dice", "target": 50.0, "over": true});
        let (status, _) = send(&state, "POST", "/games/play", Some(request), false).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_server_profit_and_report() {
        let state = test_state();
        let (status, _) = send(
            &state,
            "POST",
            "/servers/9",
            Some(json!({"name": "lounge"})),
            false,
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        for delta in [50.0, -20.0] {
            let (status, _) = send(
                &state,
                "POST",
                "/servers/9/profit",
                Some(json!({ "delta": delta })),
                true,
            )
            .await;
            assert_eq!(status, StatusCode::OK);
        }

        let (status, body) = send(&state, "GET", "/servers/9/report", None, false).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_profit"], 30.0);
        assert_eq!(body["name"], "lounge");

        let (_, body) = send(
            &state,
            "POST",
            "/servers/9/admins",
            Some(json!({"user_id": "12"})),
            true,
        )
        .await;
        assert_eq!(body["admins"][0], "12");
        let (_, body) = send(&state, "DELETE", "/servers/9/admins/12", None, true).await;
        assert_eq!(body["admins"].as_array().unwrap().len(), 0);

        let (status, _) = send(&state, "DELETE", "/servers/9", None, true).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&state, "GET", "/servers/9", None, false).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_history_and_leaderboard() {
        let state = test_state();
        for id in [1, 2] {
            state.ledger.register_user(UserId(id), None).unwrap();
        }
        state
            .ledger
            .adjust_balance(UserId(2), Currency::Points, 5_000, BalanceMode::Set)
            .unwrap();

        let entry = json!({
            "kind": "deposit",
            "currency": "points",
            "bet_amount": 0.0,
            "result_amount": 12.5,
            "max_entries": 1
        });
        for _ in 0..3 {
            let (status, _) =
                send(&state, "POST", "/users/1/history", Some(entry.clone()), true).await;
            assert_eq!(status, StatusCode::OK);
        }
        let (_, body) = send(&state, "GET", "/users/1", None, false).await;
        assert_eq!(body["history"].as_array().unwrap().len(), 1);
        assert_eq!(body["history"][0]["result_amount"], 12.5);

        let (status, body) = send(&state, "GET", "/leaderboard?limit=1", None, false).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["user_id"], "2");
        assert_eq!(body[0]["balance"], 50.0);
    }

    #[tokio::test]
    async fn test_store_failure_after_stake_reports_round_failure() {
        let state = AppState {
            ledger: Ledger::new(Arc::new(ServerOutage(MemoryStore::new()))),
            ..test_state()
        };
        funded_user(&state, 7, 10_000);
        state.ledger.register_server(ServerId(3), "floor").unwrap();

        let request = json!({
            "user_id": "7",
            "server_id": "3",
            "stake": 25.0,
            "game": "limbo",
            "target": 2.0
        });
        let (status, body) = send(&state, "POST", "/games/play", Some(request), false).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], error::ROUND_FAILED_MESSAGE);

        // The user side of the round was committed, the house side was not
        let account = state.ledger.fetch_user(UserId(7)).unwrap();
        assert_eq!(account.history.len(), 1);
        let payout = account.history[0].result_amount;
        assert_eq!(account.balances.points, 10_000 - 2_500 + payout);
        let house = state.ledger.fetch_server(ServerId(3)).unwrap();
        assert_eq!(house.total_profit, 0);
        assert!(house.history.is_empty());
        assert!(!state.sessions.is_active(UserId(7)));
    }

    #[tokio::test]
    async fn test_invalid_game_moves_no_money() {
        let state = test_state();
        funded_user(&state, 7, 10_000);

        let request = json!({"user_id": "7", "stake": 5.0, "game": "dice", "target": 150.0, "over": true});
        let (status, _) = send(&state, "POST", "/games/play", Some(request), false).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let account = state.ledger.fetch_user(UserId(7)).unwrap();
        assert_eq!(account.balances.points, 10_000);
        assert_eq!(account.stats.total_played, 0);
        assert!(!state.sessions.is_active(UserId(7)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_rounds_on_sqlite() {
        let state = AppState {
            ledger: Ledger::new(Arc::new(SqliteStore::open_in_memory().unwrap())),
            ..test_state()
        };
        state.ledger.register_server(ServerId(1), "floor").unwrap();
        for id in 1..=8 {
            funded_user(&state, id, 10_000);
        }

        let mut tasks = Vec::new();
        for id in 1..=8u64 {
            let state = state.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..5 {
                    let request = json!({
                        "user_id": id.to_string(),
                        "server_id": "1",
                        "stake": 10.0,
                        "game": "coinflip",
                        "side": "tails"
                    });
                    let (status, _) =
                        send(&state, "POST", "/games/play", Some(request), false).await;
                    assert_eq!(status, StatusCode::OK);
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let players: i64 = (1..=8)
            .map(|id| state.ledger.fetch_user(UserId(id)).unwrap().balances.points)
            .sum();
        let house = state.ledger.fetch_server(ServerId(1)).unwrap();
        assert_eq!(players + house.total_profit, 80_000);
        assert_eq!(house.history.len(), 40);
    }
}
