//! # Jimdex Common Library
//!
//! Shared code for the Jim Index directory services including:
//! - Event types (JimdexEvent enum) and the EventBus
//! - Bootstrap configuration loading
//! - Server-Sent Events helpers
//! - Common error type

pub mod config;
pub mod error;
pub mod events;
pub mod sse;

pub use error::{Error, Result};
pub use events::{EventBus, JimdexEvent};
