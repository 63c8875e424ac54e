//! Process-wide connector tunables

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::ConfigError;
use crate::backoff::BackoffConfig;

/// Prefix of every environment override
pub const ENV_PREFIX: &str = "MQTT_CONNECTIVITY_";

/// Timings and capacities shared by all connections of a process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorSettings {
	/// Delay between issuing subscriptions and starting the consumer handshake
	#[serde(with = "crate::config::duration_ms")]
	pub subscribe_handshake_delay: Duration,
	/// Lower bound for reconnects after a broker-initiated disconnect
	#[serde(with = "crate::config::duration_ms")]
	pub min_server_disconnect_delay: Duration,
	/// Lower bound for redelivery reconnects
	#[serde(with = "crate::config::duration_ms")]
	pub min_redelivery_delay: Duration,
	/// How long a probe waits for each worker health answer
	#[serde(with = "crate::config::duration_ms")]
	pub health_probe_timeout: Duration,
	/// How long a consumer waits for the platform to settle an inbound message
	#[serde(with = "crate::config::duration_ms")]
	pub inbound_ack_timeout: Duration,
	/// Buffer of every source's inbound message channel
	pub inbound_channel_capacity: usize,
	/// Buffer of the controller command channel
	pub command_channel_capacity: usize,
	/// Buffer of the connection event stream
	pub event_channel_capacity: usize,
	/// Reconnect delay policy of every broker handle
	pub backoff: BackoffConfig,
}

impl Default for ConnectorSettings {
	fn default() -> Self {
		Self {
			subscribe_handshake_delay: Duration::from_secs(1),
			min_server_disconnect_delay: Duration::from_secs(1),
			min_redelivery_delay: Duration::from_secs(1),
			health_probe_timeout: Duration::from_secs(10),
			inbound_ack_timeout: Duration::from_secs(60),
			inbound_channel_capacity: 100,
			command_channel_capacity: 32,
			event_channel_capacity: 64,
			backoff: BackoffConfig::default(),
		}
	}
}

impl ConnectorSettings {
	/// Defaults overridden by `MQTT_CONNECTIVITY_*` variables.
	///
	/// A `.env` file in the working directory is loaded first when present.
	pub fn from_env() -> Result<Self, ConfigError> {
		let _ = dotenv::dotenv();
		Self::from_lookup(|name| std::env::var(name).ok())
	}

	/// Defaults overridden by whatever `lookup` returns for each variable.
	///
	/// `lookup` receives the full variable name, prefix included.
	pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
	where F: Fn(&str) -> Option<String> {
		let mut settings = Self::default();
		let env = EnvReader { lookup };

		if let Some(ms) = env.parse::<u64>("SUBSCRIBE_DELAY_MS")? {
			settings.subscribe_handshake_delay = Duration::from_millis(ms);
		}
		if let Some(ms) = env.parse::<u64>("MIN_SERVER_DISCONNECT_DELAY_MS")? {
			settings.min_server_disconnect_delay = Duration::from_millis(ms);
		}
		if let Some(ms) = env.parse::<u64>("MIN_REDELIVERY_DELAY_MS")? {
			settings.min_redelivery_delay = Duration::from_millis(ms);
		}
		if let Some(ms) = env.parse::<u64>("HEALTH_PROBE_TIMEOUT_MS")? {
			settings.health_probe_timeout = Duration::from_millis(ms);
		}
		if let Some(ms) = env.parse::<u64>("INBOUND_ACK_TIMEOUT_MS")? {
			settings.inbound_ack_timeout = Duration::from_millis(ms);
		}
		if let Some(capacity) = env.capacity("INBOUND_CHANNEL_CAPACITY")? {
			settings.inbound_channel_capacity = capacity;
		}
		if let Some(capacity) = env.capacity("COMMAND_CHANNEL_CAPACITY")? {
			settings.command_channel_capacity = capacity;
		}
		if let Some(capacity) = env.capacity("EVENT_CHANNEL_CAPACITY")? {
			settings.event_channel_capacity = capacity;
		}
		if let Some(ms) = env.parse::<u64>("BACKOFF_INITIAL_MS")? {
			settings.backoff = settings.backoff.with_initial(Duration::from_millis(ms));
		}
		if let Some(ms) = env.parse::<u64>("BACKOFF_MAX_MS")? {
			settings.backoff = settings.backoff.with_max(Duration::from_millis(ms));
		}

		Ok(settings)
	}
}

struct EnvReader<F> {
	lookup: F,
}

impl<F> EnvReader<F>
where F: Fn(&str) -> Option<String>
{
	fn parse<T>(&self, suffix: &str) -> Result<Option<T>, ConfigError>
	where
		T: FromStr,
		T::Err: std::fmt::Display,
	{
		let name = format!("{ENV_PREFIX}{suffix}");
		let Some(value) = (self.lookup)(&name) else {
			return Ok(None);
		};
		value
			.trim()
			.parse::<T>()
			.map(Some)
			.map_err(|e| ConfigError::Environment {
				name,
				value,
				reason: e.to_string(),
			})
	}

	fn capacity(&self, suffix: &str) -> Result<Option<usize>, ConfigError> {
		match self.parse::<usize>(suffix)? {
			| Some(0) => Err(ConfigError::Environment {
				name: format!("{ENV_PREFIX}{suffix}"),
				value: "0".to_string(),
				reason: "capacity must be greater than 0".to_string(),
			}),
			| other => Ok(other),
		}
	}
}
