pub mod config;
pub mod logging;

pub const APP_NAME: &str = "RELAY";

pub use config::{ConfigError, ContextConfig, RateLimitConfig, RelayConfig, SessionConfig};
