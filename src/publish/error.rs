use thiserror::Error;

use crate::broker::BrokerError;
use crate::topic::TopicFilterError;

/// Failure of one publish request
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SendError {
	/// The publish queue is full
	#[error("too many in-flight requests")]
	Overflow,

	/// The publisher worker stopped before the broker confirmed the message
	#[error("Publisher stopped before the message was confirmed")]
	PublisherStopped,

	/// No publisher is running for the connection
	#[error("Connection is not established")]
	NotConnected,

	/// A signal header override could not be applied
	#[error("Invalid header '{name}' with value '{value}': {reason}")]
	InvalidHeader {
		/// Header name
		name: String,
		/// Header value
		value: String,
		/// What is wrong with the value
		reason: String,
	},

	/// Resolved topic cannot be published to
	#[error("Invalid publish topic: {0}")]
	InvalidTopic(#[from] TopicFilterError),

	/// Broker failed the publish
	#[error("Broker publish failed: {0}")]
	Broker(#[from] BrokerError),
}
