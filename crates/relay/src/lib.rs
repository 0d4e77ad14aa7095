// Herald Relay Library
// Decision: Library/binary split so the relay glue is testable without a process

pub mod config;
pub mod relay;
pub mod source;
pub mod telemetry;

pub use config::{ConfigError, ConfigSummary, FieldError, LogLevel, LoggingConfig, RelayConfig};
pub use relay::EventRelay;
pub use source::EventSource;
