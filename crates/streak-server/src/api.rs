use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, Method, StatusCode},
    routing::{get, post, put},
    Json, Router,
};
use serde::Serialize;
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};
use uuid::Uuid;

use streak_shared::collections::Collections;
use streak_shared::constants::USER_ID_HEADER;
use streak_shared::protocol::{
    CreateGroupRequest, CreateShareRequest, FriendRequestBody, ProfileLookupRequest,
    RegisterProfileRequest, ScoreQuery, ShareStatus, UpsertOutcome,
};
use streak_shared::{
    Friendship, JoinCode, ScoreRecord, ShareLink, SocialGroup, UserId, UserProfile,
};

use crate::config::ServerConfig;
use crate::error::ServerError;

#[derive(Clone)]
pub struct AppState {
    pub collections: Arc<RwLock<Collections>>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            collections: Arc::new(RwLock::new(Collections::new())),
            config: Arc::new(config),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        .route("/scores", get(query_scores))
        .route("/scores/:id", put(upsert_score))
        .route("/groups", get(list_groups).post(create_group))
        .route("/groups/:id", get(get_group))
        .route("/groups/:id/members/me", put(join_group).delete(leave_group))
        .route(
            "/groups/:id/share",
            get(get_share).post(create_share).delete(delete_share),
        )
        .route("/groups/:id/share/status", get(share_status))
        .route("/join-codes/:code", get(find_by_code))
        .route("/profiles/me", put(register_profile))
        .route("/profiles/lookup", post(lookup_profiles))
        .route("/friendships", get(list_friendships).post(request_friendship))
        .route("/friendships/:id", get(get_friendship))
        .route("/friendships/:id/accept", post(accept_friendship))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct ServerInfoResponse {
    name: String,
    version: &'static str,
    max_score_page: usize,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    Json(ServerInfoResponse {
        name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        max_score_page: state.config.max_score_page,
    })
}

/// The calling user, taken from the `x-user-id` header.
fn caller(headers: &HeaderMap) -> Result<UserId, ServerError> {
    let raw = headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(ServerError::Unauthenticated)?;
    UserId::new(raw).map_err(|_| ServerError::Unauthenticated)
}

// ---------------------------------------------------------------------------
// Scores
// ---------------------------------------------------------------------------

async fn upsert_score(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(record): Json<ScoreRecord>,
) -> Result<Json<UpsertOutcome>, ServerError> {
    let author = caller(&headers)?;
    if record.id != id {
        return Err(ServerError::BadRequest(format!(
            "path id {id} does not match record id {}",
            record.id
        )));
    }

    let outcome = state.collections.write().await.upsert_score(&author, record)?;
    debug!(record_id = %id, ?outcome, "Score upserted");
    Ok(Json(outcome))
}

async fn query_scores(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(mut query): Query<ScoreQuery>,
) -> Result<Json<Vec<ScoreRecord>>, ServerError> {
    let reader = caller(&headers)?;
    let max = state.config.max_score_page;
    query.limit = Some(query.limit.map_or(max, |l| l.min(max)));

    let records = state.collections.read().await.query_scores(&reader, &query);
    Ok(Json(records))
}

// ---------------------------------------------------------------------------
// Groups
// ---------------------------------------------------------------------------

async fn create_group(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateGroupRequest>,
) -> Result<Json<SocialGroup>, ServerError> {
    let creator = caller(&headers)?;
    let group = state.collections.write().await.create_group(&creator, req)?;
    info!(group_id = %group.id, creator = %creator, "Group created");
    Ok(Json(group))
}

async fn list_groups(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<SocialGroup>>, ServerError> {
    let user = caller(&headers)?;
    Ok(Json(state.collections.read().await.groups_for_member(&user)))
}

async fn get_group(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<SocialGroup>, ServerError> {
    caller(&headers)?;
    Ok(Json(state.collections.read().await.group(id)?))
}

async fn find_by_code(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(code): Path<String>,
) -> Result<Json<SocialGroup>, ServerError> {
    caller(&headers)?;
    let code = JoinCode::parse(&code).map_err(|e| ServerError::BadRequest(e.to_string()))?;
    Ok(Json(state.collections.read().await.group_by_code(&code)?))
}

async fn join_group(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<SocialGroup>, ServerError> {
    let user = caller(&headers)?;
    let group = state.collections.write().await.add_member(id, &user)?;
    info!(group_id = %id, user = %user, members = group.members.len(), "Member added");
    Ok(Json(group))
}

async fn leave_group(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<SocialGroup>, ServerError> {
    let user = caller(&headers)?;
    let group = state.collections.write().await.remove_member(id, &user)?;
    info!(group_id = %id, user = %user, "Member removed");
    Ok(Json(group))
}

// ---------------------------------------------------------------------------
// Shares
// ---------------------------------------------------------------------------

async fn get_share(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<Option<ShareLink>>, ServerError> {
    caller(&headers)?;
    Ok(Json(state.collections.read().await.share(id)))
}

async fn create_share(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(req): Json<CreateShareRequest>,
) -> Result<Json<ShareLink>, ServerError> {
    let user = caller(&headers)?;
    let link = state
        .collections
        .write()
        .await
        .create_share(&user, id, &req.capability_version)?;
    info!(group_id = %id, capability = %link.capability_version, "Share created");
    Ok(Json(link))
}

async fn delete_share(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ServerError> {
    let user = caller(&headers)?;
    state.collections.write().await.delete_share(&user, id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn share_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<ShareStatus>, ServerError> {
    caller(&headers)?;
    let exists = state.collections.read().await.share(id).is_some();
    Ok(Json(ShareStatus { exists }))
}

// ---------------------------------------------------------------------------
// Profiles
// ---------------------------------------------------------------------------

async fn register_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RegisterProfileRequest>,
) -> Result<StatusCode, ServerError> {
    let id = caller(&headers)?;
    state.collections.write().await.register_profile(UserProfile {
        id,
        display_name: req.display_name,
    });
    Ok(StatusCode::NO_CONTENT)
}

async fn lookup_profiles(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ProfileLookupRequest>,
) -> Result<Json<Vec<UserProfile>>, ServerError> {
    caller(&headers)?;
    Ok(Json(state.collections.read().await.profiles(&req.ids)))
}

// ---------------------------------------------------------------------------
// Friendships
// ---------------------------------------------------------------------------

async fn request_friendship(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<FriendRequestBody>,
) -> Result<Json<Friendship>, ServerError> {
    let requester = caller(&headers)?;
    let friendship = state
        .collections
        .write()
        .await
        .create_friendship(&requester, &req.recipient)?;
    Ok(Json(friendship))
}

async fn list_friendships(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Friendship>>, ServerError> {
    let user = caller(&headers)?;
    Ok(Json(state.collections.read().await.friendships_for(&user)))
}

async fn get_friendship(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<Friendship>, ServerError> {
    let user = caller(&headers)?;
    Ok(Json(state.collections.read().await.friendship(&user, id)?))
}

async fn accept_friendship(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<Friendship>, ServerError> {
    let user = caller(&headers)?;
    let friendship = state.collections.write().await.accept_friendship(&user, id)?;
    info!(friendship_id = %id, "Friendship accepted");
    Ok(Json(friendship))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
