//! HTTP surface over the action boundary.

pub mod handlers;
pub mod server;

pub use handlers::{AppState, HealthResponse};
pub use server::ApiServer;
