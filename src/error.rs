//! Connection lifecycle failures

use thiserror::Error;

use crate::broker::BrokerError;
use crate::config::ConfigError;
use crate::connection::HandshakeFailure;

/// Why a connection attempt or an established connection failed.
///
/// Travels inside [`ConnectionEvent::ConnectionFailure`] and therefore is
/// `Clone`.
///
/// [`ConnectionEvent::ConnectionFailure`]: crate::lifecycle::ConnectionEvent::ConnectionFailure
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConnectionError {
	/// Configuration was rejected before any broker I/O
	#[error("Invalid connection configuration: {0}")]
	Config(#[from] ConfigError),

	/// Broker client handles could not be created
	#[error("Failed to create broker client: {0}")]
	ClientCreation(#[source] BrokerError),

	/// The handshake of a handle failed
	#[error("Failed to connect client '{client_id}': {error}")]
	Handshake {
		/// Client id of the failing handle
		client_id: String,
		/// Broker error
		#[source]
		error: BrokerError,
	},

	/// At least one source subscription failed
	#[error("Failed to subscribe to topics {0}")]
	SubscribeFailed(String),

	/// An established connection was lost and will not be recovered
	#[error("Connection lost: {0}")]
	ConnectionLost(String),

	/// Redelivery needs a reconnect of the shared client handle
	#[error("Reconnect required to trigger redelivery of unacknowledged messages")]
	RedeliveryRequired,

	/// The attempt was superseded by a disconnect
	#[error("Connection attempt cancelled")]
	Cancelled,

	/// The controller task is gone
	#[error("Connection controller stopped")]
	ControllerStopped,
}

impl From<HandshakeFailure> for ConnectionError {
	fn from(failure: HandshakeFailure) -> Self {
		ConnectionError::Handshake {
			client_id: failure.client_id,
			error: failure.error,
		}
	}
}
