use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::binary::omset::SubtreeOmset;
use crate::binary::placement::Placement;
use crate::binary::ranking::{BinaryStructure, TopMember, LEVEL_LIMITS};
use crate::commission::PurchaseReceipt;
use crate::engine::{AdjustDirection, CompensationEngine};
use crate::error::{EngineError, EngineResult};
use crate::ledger::accounts::PlacedUser;
use crate::ledger::catalog::RewardUpdate;
use crate::ledger::progress::ProgressListing;
use crate::models::{Amount, BalanceKind, Reward, RewardProgress, UserId};
use crate::referral::TeamLevel;
use crate::rewards::RewardStatus;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: CompensationEngine,
}

/// Create the API router
pub fn create_router(engine: CompensationEngine) -> Router {
    let state = AppState { engine };

    Router::new()
        .route("/health", get(health_check))
        .route("/api/users/:id/binary", get(get_binary_structure))
        .route("/api/users/:id/binary/members", get(get_binary_members))
        .route("/api/users/:id/omset", get(get_omset))
        .route("/api/users/:id/rewards", get(get_rewards))
        .route("/api/users/:id/team", get(get_team))
        .route("/api/users/:id/investments", post(post_investment))
        .route("/api/binary/place", post(post_place))
        .route("/api/admin/rewards/claim", post(post_claim_reward))
        .route("/api/admin/rewards/:id", put(put_reward))
        .route("/api/admin/binary/users", get(get_placed_users))
        .route("/api/admin/binary/rewards", get(get_all_reward_progress))
        .route("/api/admin/users/:id/balance", post(post_adjust_balance))
        .with_state(state)
}

/// Engine calls block on SQLite; keep them off the async workers.
async fn run_blocking<T, F>(state: &AppState, op: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&CompensationEngine) -> EngineResult<T> + Send + 'static,
{
    let engine = state.engine.clone();
    let result = tokio::task::spawn_blocking(move || op(&engine))
        .await
        .map_err(|e| ApiError::Internal(format!("worker failed: {}", e)))?;
    Ok(result?)
}

// ===== Route Handlers =====

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn get_binary_structure(
    State(state): State<AppState>,
    Path(id): Path<UserId>,
) -> Result<Json<BinaryStructure>, ApiError> {
    let view = run_blocking(&state, move |e| e.binary_structure(id)).await?;
    Ok(Json(view))
}

/// Ranked members at one level; the limit defaults to the level's display size.
async fn get_binary_members(
    State(state): State<AppState>,
    Path(id): Path<UserId>,
    Query(params): Query<MembersQuery>,
) -> Result<Json<Vec<TopMember>>, ApiError> {
    if !(1..=LEVEL_LIMITS.len() as u32).contains(&params.level) {
        return Err(ApiError::BadRequest(format!(
            "level must be between 1 and {}",
            LEVEL_LIMITS.len()
        )));
    }
    let limit = params
        .limit
        .unwrap_or(LEVEL_LIMITS[params.level as usize - 1]);
    let members = run_blocking(&state, move |e| {
        e.top_members_at_level(id, params.level, limit)
    })
    .await?;
    Ok(Json(members))
}

async fn get_omset(
    State(state): State<AppState>,
    Path(id): Path<UserId>,
) -> Result<Json<OmsetResponse>, ApiError> {
    let (own, subtree) = run_blocking(&state, move |e| {
        e.user(id)?;
        Ok((e.compute_own_omset(id)?, e.compute_subtree_omset(id)?))
    })
    .await?;
    Ok(Json(OmsetResponse {
        user_id: id,
        own,
        subtree,
    }))
}

async fn get_rewards(
    State(state): State<AppState>,
    Path(id): Path<UserId>,
) -> Result<Json<Vec<RewardStatus>>, ApiError> {
    let rewards = run_blocking(&state, move |e| e.reward_overview(id)).await?;
    Ok(Json(rewards))
}

async fn get_team(
    State(state): State<AppState>,
    Path(id): Path<UserId>,
) -> Result<Json<Vec<TeamLevel>>, ApiError> {
    let team = run_blocking(&state, move |e| e.team_levels(id)).await?;
    Ok(Json(team))
}

async fn post_investment(
    State(state): State<AppState>,
    Path(id): Path<UserId>,
    Json(req): Json<PurchaseRequest>,
) -> Result<(StatusCode, Json<PurchaseReceipt>), ApiError> {
    let receipt = run_blocking(&state, move |e| {
        e.apply_investment_purchase(id, req.product_id)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

async fn post_place(
    State(state): State<AppState>,
    Json(req): Json<PlaceRequest>,
) -> Result<Json<Placement>, ApiError> {
    let placement = run_blocking(&state, move |e| {
        e.place_in_binary_tree(req.sponsor_id, req.user_id)
    })
    .await?;
    Ok(Json(placement))
}

async fn post_claim_reward(
    State(state): State<AppState>,
    Json(req): Json<ClaimRequest>,
) -> Result<Json<RewardProgress>, ApiError> {
    if req.user_id <= 0 || req.reward_id <= 0 {
        return Err(ApiError::BadRequest(
            "user_id and reward_id are required".to_string(),
        ));
    }
    let progress = run_blocking(&state, move |e| e.claim_reward(req.user_id, req.reward_id)).await?;
    Ok(Json(progress))
}

async fn put_reward(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(update): Json<RewardUpdate>,
) -> Result<Json<Reward>, ApiError> {
    let reward = run_blocking(&state, move |e| e.update_reward(id, &update)).await?;
    Ok(Json(reward))
}

async fn get_placed_users(
    State(state): State<AppState>,
) -> Result<Json<Vec<PlacedUser>>, ApiError> {
    let users = run_blocking(&state, |e| e.placed_users()).await?;
    Ok(Json(users))
}

async fn get_all_reward_progress(
    State(state): State<AppState>,
) -> Result<Json<Vec<ProgressListing>>, ApiError> {
    let rows = run_blocking(&state, |e| e.all_reward_progress()).await?;
    Ok(Json(rows))
}

async fn post_adjust_balance(
    State(state): State<AppState>,
    Path(id): Path<UserId>,
    Json(req): Json<AdjustRequest>,
) -> Result<Json<AdjustResponse>, ApiError> {
    let ledger = req.ledger;
    let value = run_blocking(&state, move |e| {
        e.adjust_balance(id, req.ledger, req.direction, req.amount, req.note.as_deref())
    })
    .await?;
    Ok(Json(AdjustResponse {
        user_id: id,
        ledger,
        value,
    }))
}

// ===== Request/Response Types =====

#[derive(Deserialize)]
struct MembersQuery {
    level: u32,
    limit: Option<usize>,
}

#[derive(Deserialize)]
struct PurchaseRequest {
    product_id: i64,
}

#[derive(Deserialize)]
struct PlaceRequest {
    sponsor_id: UserId,
    user_id: UserId,
}

#[derive(Deserialize)]
struct ClaimRequest {
    user_id: UserId,
    reward_id: i64,
}

#[derive(Deserialize)]
struct AdjustRequest {
    ledger: BalanceKind,
    direction: AdjustDirection,
    amount: Amount,
    note: Option<String>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct OmsetResponse {
    user_id: UserId,
    own: Amount,
    subtree: SubtreeOmset,
}

#[derive(Serialize)]
struct AdjustResponse {
    user_id: UserId,
    ledger: BalanceKind,
    value: Amount,
}

// ===== Error Handling =====

#[derive(Debug)]
pub enum ApiError {
    Engine(EngineError),
    BadRequest(String),
    Internal(String),
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        ApiError::Engine(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Engine(err) => match err {
                EngineError::NotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
                EngineError::InsufficientFunds { .. } | EngineError::InvalidState(_) => {
                    (StatusCode::BAD_REQUEST, err.to_string())
                }
                EngineError::TransientStore(e) => {
                    tracing::warn!("Store error: {}", e);
                    (
                        StatusCode::SERVICE_UNAVAILABLE,
                        "Store temporarily unavailable".to_string(),
                    )
                }
                EngineError::Configuration(msg) => {
                    tracing::error!("Configuration error: {}", msg);
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Internal server error".to_string(),
                    )
                }
            },
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}
