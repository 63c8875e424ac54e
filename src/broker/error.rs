use thiserror::Error;

/// Failures reported by a broker client implementation
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BrokerError {
	/// Client options could not be turned into a broker client
	#[error("Invalid client options: {0}")]
	InvalidOptions(String),

	/// Broker answered the handshake with a refusal
	#[error("Broker refused connection: {0}")]
	ConnectionRefused(String),

	/// Transport-level failure
	#[error("Network error: {0}")]
	Network(String),

	/// The client library rejected a request
	#[error("Client request failed: {0}")]
	Request(String),

	/// Operation requires a connected client
	#[error("Client is not connected")]
	NotConnected,

	/// Connection went away while the operation was pending
	#[error("Client disconnected: {0}")]
	Disconnected(String),

	/// `connect` was called on a client that was already started
	#[error("Client was already started")]
	AlreadyStarted,
}
