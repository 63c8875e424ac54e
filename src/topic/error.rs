//! Error types and limits for topic filters and publish topics

use thiserror::Error;

/// Errors produced when parsing or validating MQTT topic filters and topics
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopicFilterError {
	/// Filter or topic was empty
	#[error("Topic is empty")]
	Empty,

	/// Filter or topic exceeds the protocol length limit
	#[error("Topic is too long: {length} > {max}")]
	TooLong {
		/// Actual length in bytes
		length: usize,
		/// Maximum allowed length
		max: usize,
	},

	/// Filter nests deeper than allowed
	#[error("Topic is too deep: {depth} levels > {max}")]
	TooDeep {
		/// Actual number of levels
		depth: usize,
		/// Maximum allowed number of levels
		max: usize,
	},

	/// Null byte found in a topic level
	#[error("Topic level {level} contains a null byte")]
	NullByte {
		/// Index of the offending level
		level: usize,
	},

	/// `+` or `#` combined with other characters inside one level
	#[error("Wildcard must occupy a whole level: '{segment}'")]
	PartialWildcard {
		/// Offending level text
		segment: String,
	},

	/// `#` used anywhere but the last level
	#[error("Multi-level wildcard '#' must be the last level in '{filter}'")]
	HashNotLast {
		/// Offending filter
		filter: String,
	},

	/// Wildcards found where a concrete topic is required
	#[error("Publish topic contains wildcard characters: '{topic}'")]
	WildcardInTopic {
		/// Offending topic
		topic: String,
	},
}

/// Topic processing limits
pub mod limits {
	/// Maximum topic length allowed by the MQTT protocol (UTF-8 string prefix)
	pub const MAX_TOPIC_LENGTH: usize = 65_535;

	/// Maximum number of levels accepted in a filter or topic
	pub const MAX_TOPIC_DEPTH: usize = 128;
}
