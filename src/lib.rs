//! conclave: capability-aware worker selection and multi-strategy dispatch
//! for agent pools.
//!
//! The dispatch core lives in [`conclave_dispatch`] and configuration in
//! [`conclave_config`]. This crate adds the JSON action boundary, logging
//! setup, bootstrap and (behind the `api` feature) an HTTP surface.

pub mod actions;
pub mod bootstrap;
pub mod logging;

#[cfg(feature = "api")]
pub mod api;

pub use conclave_config as config;
pub use conclave_dispatch as dispatch;

pub use actions::{Action, ActionError, ActionHandler, ActionRequest, ApiResponse};
pub use bootstrap::build_orchestrator;
