use std::collections::HashMap;

use arcstr::ArcStr;
use bytes::Bytes;

use super::error::SendError;
use crate::broker::{OutboundMessage, Qos};
use crate::config::Target;
use crate::topic::validate_publish_topic;

/// Header replacing the target topic
pub const TOPIC_HEADER: &str = "mqtt.topic";
/// Header replacing the target QoS (`0`, `1` or `2`)
pub const QOS_HEADER: &str = "mqtt.qos";
/// Header setting the retain flag (`true` or `false`)
pub const RETAIN_HEADER: &str = "mqtt.retain";

/// Platform-originated message to be published to a [`Target`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundSignal {
	/// Signal identifier, echoed in the acknowledgement
	pub id: String,
	/// Mapped payload
	pub payload: Bytes,
	/// Signal headers, `mqtt.*` entries override target settings
	pub headers: HashMap<String, String>,
}

impl OutboundSignal {
	/// Creates a signal without headers.
	pub fn new(id: impl Into<String>, payload: impl Into<Bytes>) -> Self {
		Self {
			id: id.into(),
			payload: payload.into(),
			headers: HashMap::new(),
		}
	}

	/// Adds a header.
	pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.headers.insert(name.into(), value.into());
		self
	}

	/// Broker message for `target`, with header overrides applied.
	pub fn to_message(&self, target: &Target) -> Result<OutboundMessage, SendError> {
		let topic = self
			.headers
			.get(TOPIC_HEADER)
			.map_or(target.address.as_str(), String::as_str);
		validate_publish_topic(topic)?;

		let qos = match self.headers.get(QOS_HEADER) {
			| Some(value) => parse_qos(value)?,
			| None => target.effective_qos(),
		};
		let retain = match self.headers.get(RETAIN_HEADER) {
			| Some(value) => value.trim().parse::<bool>().map_err(|e| {
				SendError::InvalidHeader {
					name: RETAIN_HEADER.to_string(),
					value: value.clone(),
					reason: e.to_string(),
				}
			})?,
			| None => false,
		};

		Ok(OutboundMessage {
			topic: ArcStr::from(topic),
			payload: self.payload.clone(),
			qos,
			retain,
		})
	}
}

fn parse_qos(value: &str) -> Result<Qos, SendError> {
	let invalid = |reason: String| SendError::InvalidHeader {
		name: QOS_HEADER.to_string(),
		value: value.to_string(),
		reason,
	};
	let level = value.trim().parse::<u8>().map_err(|e| invalid(e.to_string()))?;
	Qos::try_from(level).map_err(invalid)
}

/// Positive acknowledgement issued when a target carries an ack label
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acknowledgement {
	/// Signal the acknowledgement belongs to
	pub signal_id: String,
	/// Target's ack label
	pub label: String,
	/// QoS the broker confirmed
	pub qos: Qos,
}

/// Successful result of a publish request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
	/// Broker confirmed, acknowledgement issued
	Acknowledged(Acknowledgement),
	/// Broker confirmed, target has no ack label
	Sent {
		/// Signal that was published
		signal_id: String,
	},
}

impl SendOutcome {
	/// Signal the outcome belongs to
	pub fn signal_id(&self) -> &str {
		match self {
			| SendOutcome::Acknowledged(ack) => &ack.signal_id,
			| SendOutcome::Sent { signal_id } => signal_id,
		}
	}
}
