//! # MQTT Connectivity
//!
//! Connection lifecycle orchestration for attaching a digital-twin platform
//! to MQTT brokers.
//!
//! ## Features
//!
//! - **Lifecycle Controller**: One actor per connection owning its state machine
//! - **Ordered Establishment**: Sources are subscribed before the handshake completes
//! - **Separate Publisher**: Optional dedicated publishing connection with its own will
//! - **Failover**: Automatic reconnects with pluggable backoff strategies
//! - **Redelivery**: Consumer reconnects that make the broker redeliver unacked messages
//! - **Bounded Publishing**: Non-blocking publish queue with a single in-flight publish
//! - **Connection Probe**: Dry-run connection test that always cleans up
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use mqtt_connectivity::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConnectionConfig::new("plant-7", "tcp://broker.local:1883")
//!         .with_source(Source::new(["telemetry/+/state"]))
//!         .with_target(Target::new("commands/out"));
//!
//!     let (task, handle) = LifecycleController::spawn(
//!         Arc::new(config),
//!         Arc::new(ConnectorSettings::from_env()?),
//!         Arc::new(RumqttConnector::default()),
//!         Arc::new(DiscardingSink),
//!     );
//!     handle.connect().await?;
//!
//!     let signal = OutboundSignal::new("signal-1", "on");
//!     let outcome = handle.publish(&signal, &Target::new("commands/out")).await?;
//!     println!("published {}", outcome.signal_id());
//!
//!     task.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Topic Filters
//!
//! Source addresses are MQTT topic filters:
//!
//! - `+` matches a single topic level (e.g., `sensors/+/temperature`)
//! - `#` matches the remaining levels (e.g., `sensors/#`)

#![warn(missing_docs)]

pub mod backoff;
pub mod broker;
pub mod config;
pub mod connection;
pub mod error;
pub mod health;
pub mod lifecycle;
pub mod probe;
pub mod publish;
pub mod subscription;
pub mod topic;

#[cfg(test)]
mod test_support;

// === Core Public API ===
pub use config::{ConnectionConfig, ConnectorSettings, Source, Target};
pub use error::ConnectionError;
pub use lifecycle::{
	ConnectionEvent, ConnectionState, ControllerTask, LifecycleController,
	LifecycleHandle,
};

// Broker access
pub use broker::{BrokerConnector, LoopbackBroker, Qos, RumqttConnector};

// Inbound and outbound messages
pub use publish::{OutboundSignal, SendError, SendOutcome};
pub use subscription::{AckOutcome, DiscardingSink, InboundDelivery, InboundSink};

// Diagnostics
pub use health::WorkerHealth;
pub use probe::{ConnectionProbe, ProbeError, ProbeReport};

/// Prelude module for convenient imports
///
/// ```rust
/// use mqtt_connectivity::prelude::*;
/// ```
pub mod prelude {
	//! Essential types for most connectors

	pub use crate::{
		AckOutcome, ConnectionConfig, ConnectionError, ConnectionEvent,
		ConnectionState, ConnectorSettings, DiscardingSink, InboundDelivery,
		InboundSink, LifecycleController, LifecycleHandle, OutboundSignal, Qos,
		RumqttConnector, SendOutcome, Source, Target,
	};
}

/// Error types used throughout the library
///
/// ```rust
/// use mqtt_connectivity::errors::*;
/// ```
pub mod errors {
	//! All error types used in the library

	pub use crate::broker::BrokerError;
	pub use crate::config::ConfigError;
	pub use crate::health::HealthTimeout;
	pub use crate::topic::TopicFilterError;
	pub use crate::{ConnectionError, ProbeError, SendError};
}
