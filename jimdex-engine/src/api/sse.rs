//! Server-Sent Events for directory changes

use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use futures::stream::Stream;
use std::convert::Infallible;

use crate::AppState;

/// GET /events
///
/// Streams every `JimdexEvent`: entries discovered, enriched or failed,
/// recommendations, mutuality passes, session changes, feed restarts and
/// resolved profiles.
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    jimdex_common::sse::create_event_sse_stream("jimdex-engine", &state.event_bus)
}
