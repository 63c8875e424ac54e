use std::sync::Arc;
use std::time::Duration;

use arcstr::ArcStr;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::handle::{DisconnectDecision, HandleRole, HandleState};
use crate::broker::{ConnAck, ConnectionListener, DisconnectEvent, ReconnectDirective};

/// Broker handle callback outcome, posted to the connection controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleEvent {
	/// Connection attempt the handle belongs to
	pub generation: u64,
	/// Handle identifier within its set
	pub handle_id: u64,
	/// Role of the handle
	pub role: HandleRole,
	/// What happened
	pub kind: HandleEventKind,
}

/// Kinds of [`HandleEvent`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleEventKind {
	/// Handshake completed, initially or after a reconnect
	Connected(ConnAck),
	/// Connection lost, the library reconnects after `delay`
	Reconnecting {
		/// Disconnect cause
		cause: String,
		/// Delay before the next attempt
		delay: Duration,
	},
	/// The first handshake failed
	HandshakeFailed {
		/// Failure cause
		cause: String,
	},
	/// Connection lost for good
	Lost {
		/// Disconnect cause
		cause: String,
	},
}

/// Channel carrying [`HandleEvent`]s
pub type HandleEventSender = mpsc::UnboundedSender<HandleEvent>;

pub(crate) struct HandleListener {
	pub(crate) connection_id: ArcStr,
	pub(crate) client_id: String,
	pub(crate) generation: u64,
	pub(crate) handle_id: u64,
	pub(crate) role: HandleRole,
	pub(crate) state: Arc<HandleState>,
	pub(crate) failover_enabled: bool,
	pub(crate) min_server_delay: Duration,
	pub(crate) events: HandleEventSender,
}

impl HandleListener {
	fn post(&self, kind: HandleEventKind) {
		let event = HandleEvent {
			generation: self.generation,
			handle_id: self.handle_id,
			role: self.role,
			kind,
		};
		if self.events.send(event).is_err() {
			debug!(
				connection_id = %self.connection_id,
				client_id = %self.client_id,
				"Handle event dropped, controller gone"
			);
		}
	}
}

impl ConnectionListener for HandleListener {
	fn on_connected(&self, ack: &ConnAck) {
		self.state.mark_connected();
		info!(
			connection_id = %self.connection_id,
			client_id = %self.client_id,
			role = %self.role,
			session_present = ack.session_present,
			"Broker handle connected"
		);
		self.post(HandleEventKind::Connected(*ack));
	}

	fn on_disconnected(&self, event: &DisconnectEvent) -> ReconnectDirective {
		let decision =
			self.state
				.decide(event, self.failover_enabled, self.min_server_delay);
		match decision {
			| DisconnectDecision::Intentional => {
				debug!(
					connection_id = %self.connection_id,
					client_id = %self.client_id,
					"Disconnected on request, not reconnecting"
				);
				ReconnectDirective::Stop
			}
			| DisconnectDecision::HandshakeFailed => {
				warn!(
					connection_id = %self.connection_id,
					client_id = %self.client_id,
					cause = %event.cause,
					"Initial handshake failed, not reconnecting"
				);
				self.post(HandleEventKind::HandshakeFailed {
					cause: event.cause.clone(),
				});
				ReconnectDirective::Stop
			}
			| DisconnectDecision::Reconnect(delay) => {
				warn!(
					connection_id = %self.connection_id,
					client_id = %self.client_id,
					source = ?event.source,
					attempt = event.attempt,
					cause = %event.cause,
					delay = ?delay,
					"Connection lost, reconnecting"
				);
				self.post(HandleEventKind::Reconnecting {
					cause: event.cause.clone(),
					delay,
				});
				ReconnectDirective::ReconnectAfter(delay)
			}
			| DisconnectDecision::Lost => {
				error!(
					connection_id = %self.connection_id,
					client_id = %self.client_id,
					source = ?event.source,
					cause = %event.cause,
					"Connection lost, failover disabled"
				);
				self.post(HandleEventKind::Lost {
					cause: event.cause.clone(),
				});
				ReconnectDirective::Stop
			}
		}
	}
}
