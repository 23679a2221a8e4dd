//! HTTP request handlers
//!
//! Only operational endpoints are served over HTTP; the protocol services are
//! embedded through [`crate::state::AppState`].

pub mod health;

pub use crate::state::AppState;
pub use health::{health, ready, HealthResponse, ReadyResponse};
