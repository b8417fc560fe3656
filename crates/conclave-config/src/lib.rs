//! Configuration management for conclave.
//!
//! All settings live in a single TOML document. Every field has a default,
//! so an empty file (or no file at all) yields a working configuration.

pub mod config;

pub use config::{
    AdaptiveConfig, ApiConfig, AppConfig, CollaborationConfig, ConfigError, DispatchConfig,
    IntelligentConfig, LoggingConfig, PoolConfig, WorkerSeed,
};
