//! Viewer session endpoints
//!
//! The identity collaborator (the UI bridge holding the signer) presents the
//! viewer id and follow set; signature checks happen on its side.

use axum::{
    extract::{rejection::JsonRejection, State},
    routing::{get, post, put},
    Json, Router,
};
use jimdex_common::events::SessionPhase;
use serde::{Deserialize, Serialize};

use crate::session::{PresentedIdentity, SessionState};
use crate::{ApiResult, AppState};

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginRequest {
    pub viewer_id: String,
    #[serde(default)]
    pub follows: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FollowsRequest {
    pub follows: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub state: SessionPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub viewer_id: Option<String>,
    pub follow_count: usize,
}

impl From<&SessionState> for SessionResponse {
    fn from(state: &SessionState) -> Self {
        let viewer = state.viewer();
        Self {
            state: state.phase(),
            viewer_id: viewer.map(|v| v.viewer_id.clone()),
            follow_count: viewer.map_or(0, |v| v.follow_set.len()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FollowsResponse {
    pub newly_mutual: Vec<String>,
    pub entries_changed: usize,
}

/// GET /session
pub async fn get_session(State(state): State<AppState>) -> Json<SessionResponse> {
    Json(SessionResponse::from(&state.session.state().await))
}

/// POST /session/login
pub async fn login(
    State(state): State<AppState>,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult<Json<SessionResponse>> {
    let Json(request) = body?;
    let identity = PresentedIdentity {
        viewer_id: request.viewer_id,
        follows: request.follows,
    };
    state.session.login(&identity).await?;
    Ok(Json(SessionResponse::from(&state.session.state().await)))
}

/// PUT /session/follows
pub async fn update_follows(
    State(state): State<AppState>,
    body: Result<Json<FollowsRequest>, JsonRejection>,
) -> ApiResult<Json<FollowsResponse>> {
    let Json(request) = body?;
    let change = state.session.update_follows(request.follows).await?;
    Ok(Json(FollowsResponse {
        newly_mutual: change.newly_mutual.into_iter().collect(),
        entries_changed: change.entries_changed,
    }))
}

pub fn session_routes() -> Router<AppState> {
    Router::new()
        .route("/session", get(get_session))
        .route("/session/login", post(login))
        .route("/session/follows", put(update_follows))
}
