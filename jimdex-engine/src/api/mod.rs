//! HTTP API handlers for jimdex-engine
//!
//! REST for snapshots, record intake and the viewer session; SSE for change
//! notifications.

pub mod directory;
pub mod health;
pub mod records;
pub mod session;
pub mod sse;

pub use directory::directory_routes;
pub use health::health_routes;
pub use records::record_routes;
pub use session::session_routes;
pub use sse::event_stream;
