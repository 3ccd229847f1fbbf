//! # chat-common
//!
//! Shared client utilities: environment configuration and tracing setup.

pub mod config;
pub mod telemetry;

// Re-export commonly used types at crate root
pub use config::{
    ApiConfig, AppSettings, AuthConfig, ClientConfig, ConfigError, Environment, GatewayConfig,
    ShardingConfig,
};
pub use telemetry::{
    init_tracing, init_tracing_with_config, try_init_tracing, try_init_tracing_with_config,
    TracingConfig, TracingError,
};
