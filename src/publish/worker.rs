use std::sync::Arc;

use arcstr::ArcStr;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::SendError;
use super::queue::{PublishQueue, PublishRequest};
use crate::broker::BrokerClient;
use crate::health::{HealthHandle, HealthRequest, WorkerHealth};

/// Owner of a connection's publish queue drain loop
pub struct PublisherWorker {
	queue: PublishQueue,
	health: HealthHandle,
	cancel: CancellationToken,
	join: JoinHandle<()>,
}

impl PublisherWorker {
	/// Spawns the drain loop publishing through `client`.
	pub fn start(
		connection_id: impl Into<ArcStr>,
		client: Arc<dyn BrokerClient>,
		capacity: usize,
	) -> Self {
		let connection_id = connection_id.into();
		let (queue, requests) = PublishQueue::new(capacity);
		let (health, health_rx) =
			HealthHandle::channel(format!("publisher:{}", client.client_id()));
		let cancel = CancellationToken::new();
		let drain = DrainLoop {
			connection_id,
			client,
			requests,
			health_rx,
			cancel: cancel.clone(),
			last_failure: None,
		};
		let join = tokio::spawn(drain.run());
		Self {
			queue,
			health,
			cancel,
			join,
		}
	}

	/// Queue feeding this worker
	pub fn queue(&self) -> PublishQueue {
		self.queue.clone()
	}

	/// Health query handle
	pub fn health(&self) -> HealthHandle {
		self.health.clone()
	}

	/// Stops the loop; in-flight and queued requests resolve with
	/// [`SendError::PublisherStopped`].
	pub async fn stop(self) {
		self.cancel.cancel();
		if let Err(err) = self.join.await {
			warn!(error = ?err, "Publisher worker task failed");
		}
	}
}

struct DrainLoop {
	connection_id: ArcStr,
	client: Arc<dyn BrokerClient>,
	requests: mpsc::Receiver<PublishRequest>,
	health_rx: mpsc::Receiver<HealthRequest>,
	cancel: CancellationToken,
	last_failure: Option<String>,
}

impl DrainLoop {
	async fn run(mut self) {
		info!(
			connection_id = %self.connection_id,
			client_id = %self.client.client_id(),
			"Publisher worker started"
		);
		loop {
			tokio::select! {
				biased;
				_ = self.cancel.cancelled() => break,
				Some(reply) = self.health_rx.recv() => {
					let _ = reply.send(self.health());
				}
				request = self.requests.recv() => match request {
					| Some(request) => self.publish(request).await,
					| None => break,
				},
			}
		}

		self.requests.close();
		let mut abandoned = 0usize;
		while let Ok(request) = self.requests.try_recv() {
			request.fail(SendError::PublisherStopped);
			abandoned += 1;
		}
		info!(
			connection_id = %self.connection_id,
			abandoned,
			"Publisher worker stopped"
		);
	}

	async fn publish(&mut self, request: PublishRequest) {
		let client = Arc::clone(&self.client);
		let message = request.message().clone();
		let publish = client.publish(message);
		tokio::pin!(publish);

		let result = loop {
			tokio::select! {
				biased;
				_ = self.cancel.cancelled() => break Err(SendError::PublisherStopped),
				Some(reply) = self.health_rx.recv() => {
					let _ = reply.send(self.health());
				}
				result = &mut publish => break result.map_err(SendError::from),
			}
		};

		match &result {
			| Ok(ack) => {
				debug!(
					connection_id = %self.connection_id,
					signal_id = %request.signal_id(),
					topic = %request.message().topic,
					qos = %ack.qos,
					"Publish confirmed"
				);
				self.last_failure = None;
			}
			| Err(SendError::PublisherStopped) => {}
			| Err(err) => {
				warn!(
					connection_id = %self.connection_id,
					signal_id = %request.signal_id(),
					topic = %request.message().topic,
					error = %err,
					"Publish failed"
				);
				self.last_failure = Some(err.to_string());
			}
		}
		request.complete(result);
	}

	fn health(&self) -> WorkerHealth {
		match &self.last_failure {
			| None => WorkerHealth::Healthy,
			| Some(failure) => WorkerHealth::Unhealthy(format!("last publish failed: {failure}")),
		}
	}
}
