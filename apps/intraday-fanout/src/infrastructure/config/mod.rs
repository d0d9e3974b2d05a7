//! Configuration Module
//!
//! Configuration loading for the fanout service.

mod settings;

pub use settings::{
    ConfigError, DEFAULT_MASSIVE_WS_URL, FanoutConfig, MassiveSettings, ServerSettings,
    SessionSettings,
};
