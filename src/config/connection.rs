//! Connection, source and target configuration

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::ConfigError;
use super::protocol::ProtocolConfig;
use crate::broker::{Qos, TopicFilterQos};
use crate::topic::{TopicFilter, TopicFilterError, validate_publish_topic};

/// URI schemes accepted for broker connections
pub const SUPPORTED_SCHEMES: &[&str] = &["tcp", "mqtt", "ssl", "mqtts"];
const TLS_SCHEMES: &[&str] = &["ssl", "mqtts"];

/// Broker login
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
	/// User name
	pub username: String,
	/// Password
	#[serde(default)]
	pub password: String,
}

impl Credentials {
	/// Creates a username/password pair.
	pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
		Self {
			username: username.into(),
			password: password.into(),
		}
	}
}

impl fmt::Debug for Credentials {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Credentials")
			.field("username", &self.username)
			.field("password", &"***")
			.finish()
	}
}

/// How the consumer client id is chosen
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientIdStrategy {
	/// Use the connection id
	#[default]
	ConnectionId,
	/// Use a fixed client id
	Fixed(String),
}

/// Opaque enforcement rule handed to the platform together with inbound messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enforcement {
	/// Expression evaluated against the inbound message
	pub input: String,
	/// Patterns the evaluated input must match
	#[serde(default)]
	pub filters: Vec<String>,
}

/// One topic filter of a source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceAddress {
	/// MQTT topic filter
	pub filter: String,
	/// Per-address QoS override
	#[serde(default)]
	pub qos: Option<Qos>,
}

impl SourceAddress {
	/// Address without QoS override.
	pub fn new(filter: impl Into<String>) -> Self {
		Self {
			filter: filter.into(),
			qos: None,
		}
	}

	/// Address with its own QoS.
	pub fn with_qos(filter: impl Into<String>, qos: Qos) -> Self {
		Self {
			filter: filter.into(),
			qos: Some(qos),
		}
	}
}

/// Inbound message source: topic filters consumed together
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
	/// Topic filters of the source
	pub addresses: Vec<SourceAddress>,
	/// Source-level QoS
	#[serde(default)]
	pub qos: Option<Qos>,
	/// Optional enforcement rule
	#[serde(default)]
	pub enforcement: Option<Enforcement>,
	/// Number of consumers, always 1 for MQTT
	#[serde(default = "default_consumer_count")]
	pub consumer_count: usize,
}

fn default_consumer_count() -> usize {
	1
}

impl Source {
	/// Creates a source subscribing to the given filters.
	pub fn new<I, S>(filters: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self {
			addresses: filters.into_iter().map(SourceAddress::new).collect(),
			qos: None,
			enforcement: None,
			consumer_count: default_consumer_count(),
		}
	}

	/// Creates a source from explicit addresses.
	pub fn from_addresses(addresses: Vec<SourceAddress>) -> Self {
		Self {
			addresses,
			qos: None,
			enforcement: None,
			consumer_count: default_consumer_count(),
		}
	}

	/// Sets the source-level QoS.
	pub fn with_qos(mut self, qos: Qos) -> Self {
		self.qos = Some(qos);
		self
	}

	/// Attaches an enforcement rule.
	pub fn with_enforcement(mut self, enforcement: Enforcement) -> Self {
		self.enforcement = Some(enforcement);
		self
	}

	/// QoS an address is subscribed with.
	///
	/// Address override first, then the source QoS, then the connection-wide
	/// default, finally QoS 2.
	pub fn effective_qos(
		&self,
		address: &SourceAddress,
		connection_default: Option<Qos>,
	) -> Qos {
		address
			.qos
			.or(self.qos)
			.or(connection_default)
			.unwrap_or(Qos::ExactlyOnce)
	}

	/// One filter/QoS pair per address, in configuration order.
	pub fn filter_requests(
		&self,
		connection_default: Option<Qos>,
	) -> Result<Vec<TopicFilterQos>, TopicFilterError> {
		self.addresses
			.iter()
			.map(|address| {
				Ok(TopicFilterQos {
					filter: TopicFilter::parse(address.filter.as_str())?,
					qos: self.effective_qos(address, connection_default),
				})
			})
			.collect()
	}
}

/// Outbound publish destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
	/// Topic messages are published to
	pub address: String,
	/// Publish QoS, QoS 1 when unset
	#[serde(default)]
	pub qos: Option<Qos>,
	/// Label of the acknowledgement issued once the broker confirms a publish
	#[serde(default)]
	pub ack_label: Option<String>,
}

impl Target {
	/// Creates a target publishing at QoS 1 without ack label.
	pub fn new(address: impl Into<String>) -> Self {
		Self {
			address: address.into(),
			qos: None,
			ack_label: None,
		}
	}

	/// Sets the publish QoS.
	pub fn with_qos(mut self, qos: Qos) -> Self {
		self.qos = Some(qos);
		self
	}

	/// Issues acknowledgements with the given label.
	pub fn with_ack_label(mut self, label: impl Into<String>) -> Self {
		self.ack_label = Some(label.into());
		self
	}

	/// Publish QoS after defaults
	pub fn effective_qos(&self) -> Qos {
		self.qos.unwrap_or(Qos::AtLeastOnce)
	}
}

/// Complete description of one broker connection
///
/// Shared immutably while the connection runs; changing it means restarting
/// the connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
	/// Connection identifier, used in logs and as default client id
	pub id: String,
	/// Broker URI
	pub uri: String,
	/// Optional broker login
	#[serde(default)]
	pub credentials: Option<Credentials>,
	/// Consumer client id strategy
	#[serde(default)]
	pub client_id: ClientIdStrategy,
	/// Inbound sources
	#[serde(default)]
	pub sources: Vec<Source>,
	/// Outbound targets
	#[serde(default)]
	pub targets: Vec<Target>,
	/// Reconnect automatically after losing an established connection
	#[serde(default = "default_failover")]
	pub failover_enabled: bool,
	/// Protocol options
	#[serde(default)]
	pub protocol: ProtocolConfig,
}

fn default_failover() -> bool {
	true
}

impl ConnectionConfig {
	/// Creates a configuration without sources or targets.
	pub fn new(id: impl Into<String>, uri: impl Into<String>) -> Self {
		Self {
			id: id.into(),
			uri: uri.into(),
			credentials: None,
			client_id: ClientIdStrategy::default(),
			sources: Vec::new(),
			targets: Vec::new(),
			failover_enabled: default_failover(),
			protocol: ProtocolConfig::default(),
		}
	}

	/// Parses and validates a JSON document.
	pub fn from_json(json: &str) -> Result<Self, ConfigError> {
		let config: Self =
			serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
		config.validate()?;
		Ok(config)
	}

	/// Adds a source.
	pub fn with_source(mut self, source: Source) -> Self {
		self.sources.push(source);
		self
	}

	/// Adds a target.
	pub fn with_target(mut self, target: Target) -> Self {
		self.targets.push(target);
		self
	}

	/// Sets the broker login.
	pub fn with_credentials(mut self, credentials: Credentials) -> Self {
		self.credentials = Some(credentials);
		self
	}

	/// Uses a fixed consumer client id.
	pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
		self.client_id = ClientIdStrategy::Fixed(client_id.into());
		self
	}

	/// Replaces the protocol options.
	pub fn with_protocol(mut self, protocol: ProtocolConfig) -> Self {
		self.protocol = protocol;
		self
	}

	/// Enables or disables automatic reconnects.
	pub fn with_failover(mut self, enabled: bool) -> Self {
		self.failover_enabled = enabled;
		self
	}

	/// Client id of the consumer (or shared) handle
	pub fn client_id(&self) -> String {
		match &self.client_id {
			| ClientIdStrategy::ConnectionId => self.id.clone(),
			| ClientIdStrategy::Fixed(id) => id.clone(),
		}
	}

	/// Client id of the dedicated publisher handle
	pub fn publisher_client_id(&self) -> String {
		match &self.protocol.publisher_id {
			| Some(id) if !id.is_empty() => id.clone(),
			| _ => format!("{}p", self.client_id()),
		}
	}

	/// Whether the URI scheme selects a TLS transport
	pub fn uses_tls(&self) -> bool {
		uri_scheme(&self.uri)
			.map(|scheme| TLS_SCHEMES.contains(&scheme.as_str()))
			.unwrap_or(false)
	}

	/// Checks everything that can be checked without talking to the broker.
	pub fn validate(&self) -> Result<(), ConfigError> {
		validate_uri(&self.uri)?;
		if self.client_id().is_empty() {
			return Err(ConfigError::EmptyClientId);
		}

		for (source_index, source) in self.sources.iter().enumerate() {
			if source.addresses.is_empty() {
				return Err(ConfigError::EmptySource { source_index });
			}
			if source.consumer_count != 1 {
				return Err(ConfigError::ConsumerCount {
					source_index,
					count: source.consumer_count,
				});
			}
			for address in &source.addresses {
				TopicFilter::parse(address.filter.as_str()).map_err(|error| {
					ConfigError::InvalidSourceFilter {
						source_index,
						filter: address.filter.clone(),
						error,
					}
				})?;
			}
		}

		for (target_index, target) in self.targets.iter().enumerate() {
			validate_publish_topic(&target.address).map_err(|error| {
				ConfigError::InvalidTargetAddress {
					target_index,
					address: target.address.clone(),
					error,
				}
			})?;
		}

		self.protocol.validate()
	}
}

fn uri_scheme(uri: &str) -> Option<String> {
	uri.split_once("://")
		.map(|(scheme, _)| scheme.to_ascii_lowercase())
}

fn validate_uri(uri: &str) -> Result<(), ConfigError> {
	let invalid = |reason: &str| ConfigError::InvalidUri {
		uri: uri.to_string(),
		reason: reason.to_string(),
	};

	let (scheme, rest) = uri
		.split_once("://")
		.ok_or_else(|| invalid("missing scheme"))?;
	if !SUPPORTED_SCHEMES.contains(&scheme.to_ascii_lowercase().as_str()) {
		return Err(invalid("expected one of tcp, mqtt, ssl, mqtts"));
	}

	let authority = rest.split(['/', '?']).next().unwrap_or_default();
	let host_port = authority.rsplit_once('@').map_or(authority, |(_, hp)| hp);
	let host = match host_port.rsplit_once(':') {
		| Some((host, port)) => {
			port.parse::<u16>().map_err(|_| invalid("invalid port"))?;
			host
		}
		| None => host_port,
	};
	if host.is_empty() {
		return Err(invalid("missing host"));
	}
	Ok(())
}
