//! Configuration Module
//!
//! Configuration loading for the location sync engine.

mod settings;

pub use settings::{
    ApiSettings, ApiToken, BroadcastSettings, ConfigError, DEFAULT_API_URL, ServerSettings,
    StreamSettings, SyncConfig,
};
