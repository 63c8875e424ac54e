//! MQTT protocol level options of a connection

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::ConfigError;
use crate::broker::Qos;
use crate::topic::validate_publish_topic;

/// Default delay before a consumer-only reconnect for redelivery
pub const DEFAULT_REDELIVERY_DELAY: Duration = Duration::from_secs(10);
/// Default number of queued publish requests
pub const DEFAULT_PUBLISH_QUEUE_CAPACITY: usize = 1000;

/// Last Will and Testament published by the broker if the connection dies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastWillConfig {
	/// Topic the broker publishes the will on
	pub topic: String,
	/// Will payload
	#[serde(default)]
	pub payload: String,
	/// Will QoS
	#[serde(default = "default_will_qos")]
	pub qos: Qos,
	/// Whether the broker retains the will
	#[serde(default)]
	pub retain: bool,
}

impl LastWillConfig {
	/// Creates a QoS 0, non-retained last will.
	pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
		Self {
			topic: topic.into(),
			payload: payload.into(),
			qos: default_will_qos(),
			retain: false,
		}
	}

	/// Sets the QoS level.
	pub fn qos(mut self, qos: Qos) -> Self {
		self.qos = qos;
		self
	}

	/// Sets the retain flag.
	pub fn retain(mut self, retain: bool) -> Self {
		self.retain = retain;
		self
	}
}

fn default_will_qos() -> Qos {
	Qos::AtMostOnce
}

/// Protocol options; immutable while the connection runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolConfig {
	/// Requested clean session flag, honored only with redelivery enabled
	#[serde(default)]
	pub clean_session: bool,
	/// Keep-alive override
	#[serde(default, with = "crate::config::duration_ms::option")]
	pub keep_alive: Option<Duration>,
	/// Last will of the connection
	#[serde(default)]
	pub last_will: Option<LastWillConfig>,
	/// Reconnect the consumer to make the broker redeliver unacked messages
	#[serde(default)]
	pub reconnect_for_redelivery: bool,
	/// Delay before such a reconnect, never below one second
	#[serde(
		default = "default_redelivery_delay",
		with = "crate::config::duration_ms"
	)]
	pub reconnect_for_redelivery_delay: Duration,
	/// Use a dedicated broker connection for publishing
	#[serde(default)]
	pub separate_publisher_client: bool,
	/// Client id of the dedicated publisher connection
	#[serde(default)]
	pub publisher_id: Option<String>,
	/// Maximum number of queued publish requests
	#[serde(default = "default_queue_capacity")]
	pub publish_queue_capacity: usize,
	/// Connection-wide default QoS for source addresses
	#[serde(default)]
	pub default_qos: Option<Qos>,
}

impl Default for ProtocolConfig {
	fn default() -> Self {
		Self {
			clean_session: false,
			keep_alive: None,
			last_will: None,
			reconnect_for_redelivery: false,
			reconnect_for_redelivery_delay: DEFAULT_REDELIVERY_DELAY,
			separate_publisher_client: false,
			publisher_id: None,
			publish_queue_capacity: DEFAULT_PUBLISH_QUEUE_CAPACITY,
			default_qos: None,
		}
	}
}

impl ProtocolConfig {
	/// Clean session flag actually sent to the broker.
	///
	/// A persisted session only helps when redelivery is handled, so without
	/// `reconnect_for_redelivery` sessions are always clean.
	pub fn effective_clean_session(&self) -> bool {
		!self.reconnect_for_redelivery || self.clean_session
	}

	pub(crate) fn validate(&self) -> Result<(), ConfigError> {
		if self.publish_queue_capacity == 0 {
			return Err(ConfigError::QueueCapacity);
		}
		if let Some(keep_alive) = self.keep_alive {
			if !keep_alive.is_zero() && keep_alive < Duration::from_secs(1) {
				return Err(ConfigError::KeepAlive(keep_alive));
			}
		}
		if let Some(last_will) = &self.last_will {
			validate_publish_topic(&last_will.topic).map_err(|error| {
				ConfigError::InvalidLastWill {
					topic: last_will.topic.clone(),
					error,
				}
			})?;
		}
		Ok(())
	}
}

fn default_redelivery_delay() -> Duration {
	DEFAULT_REDELIVERY_DELAY
}

fn default_queue_capacity() -> usize {
	DEFAULT_PUBLISH_QUEUE_CAPACITY
}
