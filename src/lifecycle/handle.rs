use arcstr::ArcStr;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tracing::warn;

use super::state::{ConnectionEvent, ConnectionState};
use crate::config::Target;
use crate::error::ConnectionError;
use crate::publish::{OutboundSignal, PublishQueue, PublishReceipt, PublishRequest, SendError};

#[derive(Debug)]
pub(super) enum Command {
	Connect(oneshot::Sender<Result<(), ConnectionError>>),
	Disconnect(oneshot::Sender<()>),
}

/// Owner of the controller task
pub struct ControllerTask {
	shutdown_tx: oneshot::Sender<()>,
	join_handler: JoinHandle<()>,
}

impl ControllerTask {
	pub(super) fn new(shutdown_tx: oneshot::Sender<()>, join_handler: JoinHandle<()>) -> Self {
		Self {
			shutdown_tx,
			join_handler,
		}
	}

	/// Tears the connection down and waits for the controller to exit.
	pub async fn shutdown(self) -> Result<(), JoinError> {
		let _ = self.shutdown_tx.send(()).inspect_err(|_| {
			warn!("ControllerTask: controller already stopped");
		});
		self.join_handler.await.inspect_err(|e| {
			warn!(error = ?e, "ControllerTask: controller run failed");
		})
	}
}

/// Cloneable front end of a [`LifecycleController`](super::LifecycleController)
#[derive(Clone)]
pub struct LifecycleHandle {
	connection_id: ArcStr,
	command_tx: mpsc::Sender<Command>,
	state_rx: watch::Receiver<ConnectionState>,
	queue_rx: watch::Receiver<Option<PublishQueue>>,
	events_tx: broadcast::Sender<ConnectionEvent>,
}

impl LifecycleHandle {
	pub(super) fn new(
		connection_id: ArcStr,
		command_tx: mpsc::Sender<Command>,
		state_rx: watch::Receiver<ConnectionState>,
		queue_rx: watch::Receiver<Option<PublishQueue>>,
		events_tx: broadcast::Sender<ConnectionEvent>,
	) -> Self {
		Self {
			connection_id,
			command_tx,
			state_rx,
			queue_rx,
			events_tx,
		}
	}

	/// Connection id of the controlled connection
	pub fn connection_id(&self) -> &str {
		&self.connection_id
	}

	/// Establishes the connection.
	///
	/// Resolves once the handshake and every source subscription succeeded,
	/// or with the cause of the failure. Already connected is success.
	pub async fn connect(&self) -> Result<(), ConnectionError> {
		let (tx, rx) = oneshot::channel();
		self.command_tx
			.send(Command::Connect(tx))
			.await
			.map_err(|_| ConnectionError::ControllerStopped)?;
		rx.await.map_err(|_| ConnectionError::ControllerStopped)?
	}

	/// Tears the connection down; resolves when every handle is disconnected.
	pub async fn disconnect(&self) -> Result<(), ConnectionError> {
		let (tx, rx) = oneshot::channel();
		self.command_tx
			.send(Command::Disconnect(tx))
			.await
			.map_err(|_| ConnectionError::ControllerStopped)?;
		rx.await.map_err(|_| ConnectionError::ControllerStopped)
	}

	/// Offers `signal` to the connection's publish queue.
	///
	/// Never waits for queue space; the receipt resolves with the broker
	/// confirmation or the reason the message was not sent.
	pub fn publish(&self, signal: &OutboundSignal, target: &Target) -> PublishReceipt {
		let Some(queue) = self.queue_rx.borrow().clone() else {
			return PublishReceipt::failed(SendError::NotConnected);
		};
		match PublishRequest::for_signal(signal, target) {
			| Ok((request, receipt)) => {
				queue.offer(request);
				receipt
			}
			| Err(err) => PublishReceipt::failed(err),
		}
	}

	/// Current state
	pub fn state(&self) -> ConnectionState {
		*self.state_rx.borrow()
	}

	/// Waits until the state satisfies `predicate` and returns it.
	pub async fn wait_for_state<F>(&self, predicate: F) -> Result<ConnectionState, ConnectionError>
	where F: FnMut(&ConnectionState) -> bool {
		let mut state_rx = self.state_rx.clone();
		state_rx
			.wait_for(predicate)
			.await
			.map(|state| *state)
			.map_err(|_| ConnectionError::ControllerStopped)
	}

	/// Subscribes to connection events emitted from now on.
	pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
		self.events_tx.subscribe()
	}
}
