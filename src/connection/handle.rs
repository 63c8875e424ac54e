use std::fmt::{self, Display};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, warn};

use crate::backoff::{BackoffStrategy, reconnect_delay};
use crate::broker::{BrokerClient, BrokerError, DisconnectEvent, DisconnectSource};

/// What a handle is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleRole {
	/// Consumes and publishes
	Shared,
	/// Consumes only
	Consumer,
	/// Publishes only
	Publisher,
}

impl Display for HandleRole {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			| HandleRole::Shared => "shared",
			| HandleRole::Consumer => "consumer",
			| HandleRole::Publisher => "publisher",
		})
	}
}

/// Verdict on a lost connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectDecision {
	/// The reconnect token is set, the disconnect was requested
	Intentional,
	/// The first handshake never completed
	HandshakeFailed,
	/// Let the library reconnect after the delay
	Reconnect(Duration),
	/// Give up on the connection
	Lost,
}

struct HandleInner {
	reconnect_token: bool,
	ever_connected: bool,
	backoff: Box<dyn BackoffStrategy>,
}

/// Mutable state of one broker handle, shared with its listener
pub struct HandleState {
	inner: Mutex<HandleInner>,
}

impl HandleState {
	/// Fresh state: token unset, never connected.
	pub fn new(backoff: Box<dyn BackoffStrategy>) -> Self {
		Self {
			inner: Mutex::new(HandleInner {
				reconnect_token: false,
				ever_connected: false,
				backoff,
			}),
		}
	}

	fn lock(&self) -> MutexGuard<'_, HandleInner> {
		self.inner.lock().unwrap_or_else(PoisonError::into_inner)
	}

	/// Suppresses every further automatic reconnect. Irreversible.
	pub fn set_reconnect_token(&self) {
		self.lock().reconnect_token = true;
	}

	/// Whether an intentional disconnect is under way
	pub fn reconnect_token(&self) -> bool {
		self.lock().reconnect_token
	}

	/// Whether the handle completed at least one handshake
	pub fn ever_connected(&self) -> bool {
		self.lock().ever_connected
	}

	pub(crate) fn mark_connected(&self) {
		self.lock().ever_connected = true;
	}

	/// Decides how to react to a lost connection.
	///
	/// Backoff restarts when the library reports its first retry; a
	/// broker-initiated disconnect never reconnects faster than
	/// `min_server_delay`.
	pub fn decide(
		&self,
		event: &DisconnectEvent,
		failover_enabled: bool,
		min_server_delay: Duration,
	) -> DisconnectDecision {
		let mut inner = self.lock();
		if inner.reconnect_token {
			return DisconnectDecision::Intentional;
		}
		if !(event.ever_connected || inner.ever_connected) {
			return DisconnectDecision::HandshakeFailed;
		}
		if !failover_enabled {
			return DisconnectDecision::Lost;
		}
		if event.attempt == 0 {
			inner.backoff.reset();
		}
		let delay = reconnect_delay(
			inner.backoff.as_mut(),
			event.source == DisconnectSource::Server,
			min_server_delay,
		);
		DisconnectDecision::Reconnect(delay)
	}
}

/// One broker client together with its state
#[derive(Clone)]
pub struct BrokerHandle {
	id: u64,
	role: HandleRole,
	client: Arc<dyn BrokerClient>,
	state: Arc<HandleState>,
}

impl BrokerHandle {
	pub(crate) fn new(
		id: u64,
		role: HandleRole,
		client: Arc<dyn BrokerClient>,
		state: Arc<HandleState>,
	) -> Self {
		Self {
			id,
			role,
			client,
			state,
		}
	}

	/// Identifier unique within the owning set
	pub fn id(&self) -> u64 {
		self.id
	}

	/// Role of the handle
	pub fn role(&self) -> HandleRole {
		self.role
	}

	/// Broker client
	pub fn client(&self) -> &Arc<dyn BrokerClient> {
		&self.client
	}

	/// MQTT client id
	pub fn client_id(&self) -> &str {
		self.client.client_id()
	}

	/// Handle state
	pub fn state(&self) -> &Arc<HandleState> {
		&self.state
	}

	/// Sets the reconnect token and disconnects from the broker.
	pub async fn shutdown(&self) {
		self.state.set_reconnect_token();
		match self.client.disconnect().await {
			| Ok(()) => debug!(
				client_id = %self.client_id(),
				role = %self.role,
				"Broker handle disconnected"
			),
			| Err(err) => warn!(
				client_id = %self.client_id(),
				role = %self.role,
				error = %err,
				"Broker handle disconnect failed"
			),
		}
	}
}

/// A handle's handshake failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeFailure {
	/// Client id of the failing handle
	pub client_id: String,
	/// Broker error
	pub error: BrokerError,
}

/// Connects `consumer` once `delay` has elapsed while `publisher`, if any,
/// connects right away.
///
/// Callers issue their subscriptions on `consumer` before calling this so
/// the requests are queued ahead of the handshake. The first failed
/// handshake is returned as soon as it happens and the other one is dropped.
pub async fn connect_after_delay(
	consumer: &BrokerHandle,
	publisher: Option<&BrokerHandle>,
	delay: Duration,
) -> Result<(), HandshakeFailure> {
	let consumer_connect = async {
		tokio::time::sleep(delay).await;
		consumer.connect().await
	};
	let publisher_connect = async {
		match publisher {
			| Some(publisher) => publisher.connect().await,
			| None => Ok(()),
		}
	};
	tokio::try_join!(consumer_connect, publisher_connect).map(|_| ())
}

impl BrokerHandle {
	async fn connect(&self) -> Result<(), HandshakeFailure> {
		self.client
			.connect()
			.await
			.map(|_| ())
			.map_err(|error| HandshakeFailure {
				client_id: self.client_id().to_string(),
				error,
			})
	}
}
