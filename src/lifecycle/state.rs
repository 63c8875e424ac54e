use std::fmt::{self, Display};

use crate::error::ConnectionError;

/// Lifecycle state of one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
	/// No broker handles exist
	Disconnected,
	/// Handshake and subscriptions in progress
	Connecting,
	/// Handles connected, sources consumed, publisher running
	Connected,
	/// Intentional teardown in progress
	Disconnecting,
	/// The last attempt or connection failed, everything was torn down
	Failed,
}

impl Display for ConnectionState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			| ConnectionState::Disconnected => "disconnected",
			| ConnectionState::Connecting => "connecting",
			| ConnectionState::Connected => "connected",
			| ConnectionState::Disconnecting => "disconnecting",
			| ConnectionState::Failed => "failed",
		})
	}
}

/// Notification emitted by the controller
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
	/// The connection is established
	ClientConnected,
	/// The connection was closed on request
	ClientDisconnected,
	/// The attempt or the established connection failed and was torn down
	ConnectionFailure(ConnectionError),
	/// Connection status is healthy again
	ReportConnectionStatusSuccess,
	/// Connection status degraded, possibly recovering on its own
	ReportConnectionStatusError(String),
}
