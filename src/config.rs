//! Connection configuration
//!
//! [`ConnectionConfig`] describes one broker connection and is loaded from
//! JSON; [`ConnectorSettings`] carries process-wide timings that can be
//! overridden from the environment.

mod connection;
pub(crate) mod duration_ms;
mod error;
mod protocol;
mod settings;

#[cfg(test)]
mod config_tests;

pub use connection::{
	ClientIdStrategy, ConnectionConfig, Credentials, Enforcement, SUPPORTED_SCHEMES,
	Source, SourceAddress, Target,
};
pub use error::ConfigError;
pub use protocol::{
	DEFAULT_PUBLISH_QUEUE_CAPACITY, DEFAULT_REDELIVERY_DELAY, LastWillConfig,
	ProtocolConfig,
};
pub use settings::{ConnectorSettings, ENV_PREFIX};
