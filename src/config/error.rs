use std::time::Duration;

use thiserror::Error;

use crate::topic::TopicFilterError;

/// Connection configuration problems, detected before anything is started
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
	/// Configuration document could not be parsed
	#[error("Failed to parse connection configuration: {0}")]
	Parse(String),

	/// Broker URI is malformed or uses an unsupported scheme
	#[error("Unsupported broker URI '{uri}': {reason}")]
	InvalidUri {
		/// Offending URI
		uri: String,
		/// What is wrong with it
		reason: String,
	},

	/// Resolved client id is empty
	#[error("Client id must not be empty")]
	EmptyClientId,

	/// A source lists no topic filters
	#[error("Source {source_index} has no addresses")]
	EmptySource {
		/// Position of the source in the configuration
		source_index: usize,
	},

	/// A source address is not a valid topic filter
	#[error("Invalid topic filter '{filter}' in source {source_index}: {error}")]
	InvalidSourceFilter {
		/// Position of the source in the configuration
		source_index: usize,
		/// Offending filter
		filter: String,
		/// Validation failure
		error: TopicFilterError,
	},

	/// MQTT sources are consumed by exactly one consumer
	#[error(
		"Source {source_index} requests {count} consumers, MQTT sources support \
		 exactly one"
	)]
	ConsumerCount {
		/// Position of the source in the configuration
		source_index: usize,
		/// Requested consumer count
		count: usize,
	},

	/// A target address is not a valid publish topic
	#[error("Invalid address '{address}' in target {target_index}: {error}")]
	InvalidTargetAddress {
		/// Position of the target in the configuration
		target_index: usize,
		/// Offending address
		address: String,
		/// Validation failure
		error: TopicFilterError,
	},

	/// Last will topic is not a valid publish topic
	#[error("Invalid last will topic '{topic}': {error}")]
	InvalidLastWill {
		/// Offending topic
		topic: String,
		/// Validation failure
		error: TopicFilterError,
	},

	/// Publish queue must hold at least one request
	#[error("Publish queue capacity must be greater than 0")]
	QueueCapacity,

	/// Keep-alive has sub-second precision the protocol cannot express
	#[error("Keep-alive must be zero or at least one second, got {0:?}")]
	KeepAlive(Duration),

	/// An environment override could not be parsed
	#[error("Invalid value for {name}: '{value}' ({reason})")]
	Environment {
		/// Variable name
		name: String,
		/// Raw value
		value: String,
		/// Parse failure
		reason: String,
	},
}
