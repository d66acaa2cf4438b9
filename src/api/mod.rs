// HTTP API routes (strategy CRUD, tournament control, replays).
//
// Identity is a plain `user_id` supplied by the caller; a fronting
// proxy is expected to authenticate and inject it. Ownership checks
// still run against that id, so the error surface matches a full auth
// deployment.

use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::db::Database;
use crate::engine::sandbox::{screen_source, Sandbox};
use crate::error::EngineError;
use crate::metrics;
use crate::orchestrator;
use crate::replay;
use crate::worker_pool::WorkerPool;

// ── Request types ─────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateStrategyRequest {
    pub user_id: i64,
    pub name: String,
    pub code: String,
}

#[derive(Deserialize)]
pub struct UpdateStrategyRequest {
    pub user_id: i64,
    pub code: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Deserialize)]
pub struct CreateTournamentRequest {
    pub name: String,
    pub rounds_per_match: Option<i64>,
    pub created_by: Option<i64>,
}

#[derive(Deserialize)]
pub struct SelectStrategyRequest {
    pub user_id: i64,
    pub strategy_id: i64,
}

#[derive(Deserialize)]
pub struct ListStrategiesParams {
    pub user_id: Option<i64>,
}

// ── Shared application state ─────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub pool: Arc<WorkerPool>,
    pub sandbox: Sandbox,
}

// ── Error helpers ─────────────────────────────────────────────────────

fn json_error(status: StatusCode, msg: &str) -> impl IntoResponse {
    (status, Json(json!({ "error": msg })))
}

fn internal_error(e: sqlx::Error) -> impl IntoResponse {
    tracing::error!("Database error: {e}");
    json_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
}

fn engine_error(e: EngineError) -> axum::response::Response {
    let status = match &e {
        EngineError::Validation(_) => StatusCode::BAD_REQUEST,
        EngineError::Conflict(_) => StatusCode::CONFLICT,
        EngineError::Ownership(_) => StatusCode::FORBIDDEN,
        EngineError::Persistence(_) | EngineError::Internal(_) => {
            tracing::error!("Engine error: {e}");
            return json_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
                .into_response();
        }
    };
    json_error(status, &e.to_string()).into_response()
}

// ── Router ────────────────────────────────────────────────────────────

pub fn router(db: Arc<Database>, pool: Arc<WorkerPool>, sandbox: Sandbox) -> Router {
    let state = AppState { db, pool, sandbox };

    Router::new()
        // Strategies
        .route("/api/strategies", get(list_strategies).post(create_strategy))
        .route(
            "/api/strategies/{id}",
            get(get_strategy).put(update_strategy),
        )
        // Tournaments
        .route(
            "/api/tournaments",
            get(list_tournaments).post(create_tournament),
        )
        .route("/api/tournaments/{id}", get(get_tournament))
        .route(
            "/api/tournaments/{id}/participants",
            post(select_strategy),
        )
        .route("/api/tournaments/{id}/run", post(run_tournament))
        .route("/api/tournaments/{id}/reopen", post(reopen_tournament))
        .route(
            "/api/tournaments/{id}/matches/{match_id}/replay",
            get(get_match_replay),
        )
        // Observability
        .route("/metrics", get(get_metrics))
        .route("/health", get(health_check))
        .with_state(state)
}

// ── Strategy handlers ─────────────────────────────────────────────────

async fn list_strategies(
    State(state): State<AppState>,
    Query(params): Query<ListStrategiesParams>,
) -> impl IntoResponse {
    let result = match params.user_id {
        Some(user_id) => state.db.list_strategies_by_user(user_id).await,
        None => state.db.list_strategies().await,
    };
    match result {
        Ok(strategies) => (StatusCode::OK, Json(json!(strategies))).into_response(),
        Err(e) => internal_error(e).into_response(),
    }
}

async fn create_strategy(
    State(state): State<AppState>,
    Json(req): Json<CreateStrategyRequest>,
) -> impl IntoResponse {
    if req.name.is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "name is required").into_response();
    }
    if let Err(reason) = screen_source(&req.code) {
        metrics::STRATEGY_REJECTIONS_TOTAL.inc();
        return json_error(StatusCode::BAD_REQUEST, &reason).into_response();
    }
    match state.db.create_strategy(req.user_id, &req.name, &req.code).await {
        Ok(strategy) => (StatusCode::CREATED, Json(json!(strategy))).into_response(),
        Err(e) => internal_error(e).into_response(),
    }
}

async fn get_strategy(State(state): State<AppState>, Path(id): Path<i64>) -> impl IntoResponse {
    match state.db.get_strategy(id).await {
        Ok(Some(strategy)) => (StatusCode::OK, Json(json!(strategy))).into_response(),
        Ok(None) => json_error(StatusCode::NOT_FOUND, "Strategy not found").into_response(),
        Err(e) => internal_error(e).into_response(),
    }
}

async fn update_strategy(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateStrategyRequest>,
) -> impl IntoResponse {
    let strategy = match state.db.get_strategy(id).await {
        Ok(Some(strategy)) => strategy,
        Ok(None) => return json_error(StatusCode::NOT_FOUND, "Strategy not found").into_response(),
        Err(e) => return internal_error(e).into_response(),
    };
    if strategy.user_id != req.user_id {
        return json_error(StatusCode::FORBIDDEN, "You do not own this strategy").into_response();
    }

    if let Some(code) = &req.code {
        if let Err(reason) = screen_source(code) {
            metrics::STRATEGY_REJECTIONS_TOTAL.inc();
            return json_error(StatusCode::BAD_REQUEST, &reason).into_response();
        }
        if let Err(e) = state.db.update_strategy_code(id, code).await {
            return internal_error(e).into_response();
        }
    }
    if let Some(active) = req.is_active {
        if let Err(e) = state.db.set_strategy_active(id, active).await {
            return internal_error(e).into_response();
        }
    }

    match state.db.get_strategy(id).await {
        Ok(Some(strategy)) => (StatusCode::OK, Json(json!(strategy))).into_response(),
        Ok(None) => json_error(StatusCode::NOT_FOUND, "Strategy not found").into_response(),
        Err(e) => internal_error(e).into_response(),
    }
}

// ── Tournament handlers ───────────────────────────────────────────────

async fn list_tournaments(State(state): State<AppState>) -> impl IntoResponse {
    match state.db.list_tournaments().await {
        Ok(tournaments) => (StatusCode::OK, Json(json!(tournaments))).into_response(),
        Err(e) => internal_error(e).into_response(),
    }
}

async fn create_tournament(
    State(state): State<AppState>,
    Json(req): Json<CreateTournamentRequest>,
) -> impl IntoResponse {
    let rounds = req
        .rounds_per_match
        .unwrap_or(crate::scheduler::WEEKLY_ROUNDS_PER_MATCH);
    match orchestrator::create_tournament(&state.db, &req.name, rounds, req.created_by).await {
        Ok(tournament) => (StatusCode::CREATED, Json(json!(tournament))).into_response(),
        Err(e) => engine_error(e),
    }
}

async fn get_tournament(State(state): State<AppState>, Path(id): Path<i64>) -> impl IntoResponse {
    let tournament = match state.db.get_tournament(id).await {
        Ok(Some(tournament)) => tournament,
        Ok(None) => {
            return json_error(StatusCode::NOT_FOUND, "Tournament not found").into_response()
        }
        Err(e) => return internal_error(e).into_response(),
    };
    let participants = match state.db.list_participants(id).await {
        Ok(participants) => participants,
        Err(e) => return internal_error(e).into_response(),
    };
    let matches = match state.db.list_matches(id).await {
        Ok(matches) => matches,
        Err(e) => return internal_error(e).into_response(),
    };

    // Standings sorted the way the final table reads; unranked rows
    // (pending/running) fall back to participant order.
    let mut standings = participants;
    standings.sort_by_key(|p| (p.rank.unwrap_or(i64::MAX), p.id));

    (
        StatusCode::OK,
        Json(json!({
            "tournament": tournament,
            "standings": standings,
            "matches": matches,
        })),
    )
        .into_response()
}

async fn select_strategy(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<SelectStrategyRequest>,
) -> impl IntoResponse {
    match orchestrator::select_strategy(&state.db, id, req.user_id, req.strategy_id).await {
        Ok(participant) => (StatusCode::CREATED, Json(json!(participant))).into_response(),
        Err(e) => engine_error(e),
    }
}

/// Kick off a run as a background job. Preconditions are checked here
/// so the caller gets a synchronous 4xx; the run itself re-checks the
/// pending state atomically before doing any work.
async fn run_tournament(State(state): State<AppState>, Path(id): Path<i64>) -> impl IntoResponse {
    let tournament = match state.db.get_tournament(id).await {
        Ok(Some(tournament)) => tournament,
        Ok(None) => {
            return json_error(StatusCode::NOT_FOUND, "Tournament not found").into_response()
        }
        Err(e) => return internal_error(e).into_response(),
    };
    if tournament.status != "pending" {
        return json_error(
            StatusCode::CONFLICT,
            &format!("tournament is {}, not pending", tournament.status),
        )
        .into_response();
    }
    match state.db.list_participants(id).await {
        Ok(participants) if participants.len() < 2 => {
            return json_error(
                StatusCode::BAD_REQUEST,
                "a tournament needs at least two participants",
            )
            .into_response()
        }
        Ok(_) => {}
        Err(e) => return internal_error(e).into_response(),
    }

    let _ = orchestrator::spawn_run(
        state.db.clone(),
        state.pool.clone(),
        state.sandbox.clone(),
        id,
    );
    // The CAS to running happens inside the background task; all this
    // response promises is that the run was accepted. Callers poll the
    // tournament for its actual status.
    (StatusCode::ACCEPTED, Json(json!({ "tournament_id": id, "status": "accepted" })))
        .into_response()
}

async fn reopen_tournament(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    match state.db.reopen(id).await {
        Ok(true) => (StatusCode::OK, Json(json!({ "tournament_id": id, "status": "pending" })))
            .into_response(),
        Ok(false) => json_error(
            StatusCode::CONFLICT,
            "only completed or failed tournaments can be reopened",
        )
        .into_response(),
        Err(e) => internal_error(e).into_response(),
    }
}

async fn get_match_replay(
    State(state): State<AppState>,
    Path((id, match_id)): Path<(i64, i64)>,
) -> impl IntoResponse {
    let record = match state.db.get_match(id, match_id).await {
        Ok(Some(record)) => record,
        Ok(None) => return json_error(StatusCode::NOT_FOUND, "Match not found").into_response(),
        Err(e) => return internal_error(e).into_response(),
    };
    match replay::decompress_move_log(&record.move_log) {
        Ok(moves) => (
            StatusCode::OK,
            Json(json!({
                "match_id": record.id,
                "rounds": record.rounds,
                "score1": record.score1,
                "score2": record.score2,
                "winner": record.winner,
                "moves": moves,
            })),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(match_id, "corrupt move log: {e}");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Corrupt move log").into_response()
        }
    }
}

// ── Observability ─────────────────────────────────────────────────────

async fn get_metrics() -> impl IntoResponse {
    (StatusCode::OK, metrics::gather_metrics())
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}
