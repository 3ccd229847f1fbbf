//! Configuration structs

mod app_config;

pub use app_config::{
    ApiConfig, AppSettings, AuthConfig, ClientConfig, ConfigError, Environment, GatewayConfig,
    ShardingConfig,
};
