//! Ranked directory snapshot

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::models::EntryView;
use crate::AppState;

/// Ranking requested by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectoryView {
    /// Rank by all recommenders
    Anonymous,
    /// Rank by recommenders mutual with the authenticated viewer
    Viewer,
}

#[derive(Debug, Default, Deserialize)]
pub struct DirectoryQuery {
    pub view: Option<DirectoryView>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DirectoryResponse {
    /// View actually served; `viewer` falls back to `anonymous` without a session
    pub view: DirectoryView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub viewer_id: Option<String>,
    pub loaded: bool,
    pub entries: Vec<EntryView>,
}

/// GET /directory?view=anonymous|viewer
///
/// Without `view`, the authenticated viewer's ranking is served when there is
/// one.
pub async fn get_directory(
    State(state): State<AppState>,
    Query(query): Query<DirectoryQuery>,
) -> Json<DirectoryResponse> {
    let viewer = match query.view {
        Some(DirectoryView::Anonymous) => None,
        Some(DirectoryView::Viewer) | None => state.engine.current_viewer().await,
    };

    let entries = state.engine.snapshot(viewer.as_ref()).await;

    Json(DirectoryResponse {
        view: if viewer.is_some() {
            DirectoryView::Viewer
        } else {
            DirectoryView::Anonymous
        },
        viewer_id: viewer.map(|v| v.viewer_id),
        loaded: state.engine.has_loaded(),
        entries,
    })
}

pub fn directory_routes() -> Router<AppState> {
    Router::new().route("/directory", get(get_directory))
}
