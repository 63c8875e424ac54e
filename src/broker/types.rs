//! Values exchanged with broker client implementations

use std::fmt::{self, Display};
use std::time::Duration;

use arcstr::ArcStr;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::config::{Credentials, LastWillConfig};
use crate::topic::TopicFilter;

/// MQTT quality of service level
#[derive(
	Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(try_from = "u8", into = "u8")]
pub enum Qos {
	/// QoS 0
	AtMostOnce = 0,
	/// QoS 1
	AtLeastOnce = 1,
	/// QoS 2
	ExactlyOnce = 2,
}

impl TryFrom<u8> for Qos {
	type Error = String;

	fn try_from(value: u8) -> Result<Self, Self::Error> {
		match value {
			| 0 => Ok(Qos::AtMostOnce),
			| 1 => Ok(Qos::AtLeastOnce),
			| 2 => Ok(Qos::ExactlyOnce),
			| other => Err(format!("invalid QoS level {other}, expected 0, 1 or 2")),
		}
	}
}

impl From<Qos> for u8 {
	fn from(qos: Qos) -> Self {
		qos as u8
	}
}

impl From<Qos> for rumqttc::QoS {
	fn from(qos: Qos) -> Self {
		match qos {
			| Qos::AtMostOnce => rumqttc::QoS::AtMostOnce,
			| Qos::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
			| Qos::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
		}
	}
}

impl From<rumqttc::QoS> for Qos {
	fn from(qos: rumqttc::QoS) -> Self {
		match qos {
			| rumqttc::QoS::AtMostOnce => Qos::AtMostOnce,
			| rumqttc::QoS::AtLeastOnce => Qos::AtLeastOnce,
			| rumqttc::QoS::ExactlyOnce => Qos::ExactlyOnce,
		}
	}
}

impl Display for Qos {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", *self as u8)
	}
}

/// Everything a broker implementation needs to build one client handle
#[derive(Debug, Clone, PartialEq)]
pub struct ClientOptions {
	/// Broker URI, scheme selects the transport
	pub uri: String,
	/// MQTT client identifier
	pub client_id: String,
	/// Optional username/password
	pub credentials: Option<Credentials>,
	/// Clean session flag sent in CONNECT
	pub clean_session: bool,
	/// Keep-alive override, library default when `None`
	pub keep_alive: Option<Duration>,
	/// Last will registered with the broker
	pub last_will: Option<LastWillConfig>,
	/// Inbound QoS 1/2 messages are acknowledged explicitly
	pub manual_acks: bool,
}

/// Handshake result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnAck {
	/// Broker resumed a persisted session
	pub session_present: bool,
}

/// One topic filter of a SUBSCRIBE request
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicFilterQos {
	/// Filter to subscribe to
	pub filter: TopicFilter,
	/// Requested maximum QoS
	pub qos: Qos,
}

/// Broker verdict for one filter of a SUBSCRIBE request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterOutcome {
	/// Filter accepted with the granted QoS
	Granted(Qos),
	/// Filter rejected, with the broker's reason when available
	Rejected(String),
}

/// Per-filter SUBACK result, in request order
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SubscribeAck {
	/// Outcome of every requested filter
	pub outcomes: Vec<(TopicFilter, FilterOutcome)>,
}

impl SubscribeAck {
	/// Filters the broker rejected, with reasons
	pub fn rejected(&self) -> impl Iterator<Item = (&TopicFilter, &str)> {
		self.outcomes.iter().filter_map(|(filter, outcome)| match outcome {
			| FilterOutcome::Rejected(reason) => Some((filter, reason.as_str())),
			| FilterOutcome::Granted(_) => None,
		})
	}

	/// Filters the broker granted
	pub fn granted(&self) -> impl Iterator<Item = (&TopicFilter, Qos)> {
		self.outcomes.iter().filter_map(|(filter, outcome)| match outcome {
			| FilterOutcome::Granted(qos) => Some((filter, *qos)),
			| FilterOutcome::Rejected(_) => None,
		})
	}

	/// Whether every filter was granted
	pub fn is_success(&self) -> bool {
		self.rejected().next().is_none()
	}
}

/// Broker-native outbound publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
	/// Concrete topic name
	pub topic: ArcStr,
	/// Raw payload
	pub payload: Bytes,
	/// Publish QoS
	pub qos: Qos,
	/// Retain flag
	pub retain: bool,
}

/// Broker confirmation of a publish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishAck {
	/// QoS the message was confirmed at
	pub qos: Qos,
}

/// Identifies an inbound delivery for manual acknowledgement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeliveryTag {
	/// Packet identifier, zero for QoS 0
	pub packet_id: u16,
	/// Delivery QoS
	pub qos: Qos,
}

/// Message received from the broker on a subscribed filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
	/// Topic the message was published on
	pub topic: ArcStr,
	/// Raw payload
	pub payload: Bytes,
	/// Retain flag as delivered
	pub retain: bool,
	/// Broker marked this as a redelivery
	pub duplicate: bool,
	/// Ack token
	pub delivery: DeliveryTag,
}

impl InboundMessage {
	/// Whether the broker expects an acknowledgement for this message
	pub fn requires_ack(&self) -> bool {
		self.delivery.qos != Qos::AtMostOnce
	}
}

/// Channel receiving inbound messages for one subscription
pub type InboundSender = mpsc::Sender<InboundMessage>;
/// Receiving side of [`InboundSender`]
pub type InboundReceiver = mpsc::Receiver<InboundMessage>;

/// Who initiated a disconnect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectSource {
	/// Client side failure (network, protocol, timeout)
	Client,
	/// Broker closed or refused the connection
	Server,
	/// Explicit disconnect requested by the application
	User,
}

/// Details handed to [`ConnectionListener::on_disconnected`](super::ConnectionListener::on_disconnected)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectEvent {
	/// Initiator of the disconnect
	pub source: DisconnectSource,
	/// Human readable cause
	pub cause: String,
	/// Whether the client completed at least one handshake
	pub ever_connected: bool,
	/// Library retry counter: 0 for the first failure after a successful connect
	pub attempt: u32,
}

/// Listener verdict on whether the library should reconnect by itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDirective {
	/// Stop the client, no further attempts
	Stop,
	/// Retry the handshake after the given delay
	ReconnectAfter(Duration),
}
