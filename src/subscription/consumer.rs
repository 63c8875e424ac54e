use std::sync::Arc;
use std::time::Duration;

use arcstr::ArcStr;
use futures::future::BoxFuture;
use futures::stream::FuturesOrdered;
use futures::{FutureExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::result::SubscribedSource;
use super::sink::{AckOutcome, InboundDelivery, InboundSink};
use crate::broker::{BrokerClient, InboundMessage, InboundReceiver};
use crate::config::Enforcement;
use crate::health::{HealthHandle, HealthRequest, WorkerHealth};

/// Called with the source index when a message is left for redelivery
pub type RedeliveryHook = Arc<dyn Fn(usize) + Send + Sync>;

/// Acknowledgement policy of a consumer
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
	/// Longest wait for the sink to settle a message
	pub ack_timeout: Duration,
	/// Leave unsettled messages unacknowledged so a reconnect redelivers them
	pub reconnect_for_redelivery: bool,
	/// Deliveries awaiting settlement before the consumer stops reading
	pub max_pending: usize,
}

type Settlement = BoxFuture<'static, (InboundMessage, Option<AckOutcome>)>;

/// Drains one subscribed source into the platform sink
pub struct ConsumerWorker {
	source_index: usize,
	health: HealthHandle,
	cancel: CancellationToken,
	join: JoinHandle<()>,
}

impl ConsumerWorker {
	/// Spawns a consumer for `source`.
	pub fn start(
		connection_id: impl Into<ArcStr>,
		client: Arc<dyn BrokerClient>,
		sink: Arc<dyn InboundSink>,
		source: SubscribedSource,
		enforcement: Option<Arc<Enforcement>>,
		settings: ConsumerSettings,
		redelivery: Option<RedeliveryHook>,
	) -> Self {
		let source_index = source.source_index;
		let (health, health_rx) = HealthHandle::channel(format!(
			"consumer:{}:{source_index}",
			client.client_id()
		));
		let cancel = CancellationToken::new();
		let consumer = ConsumeLoop {
			connection_id: connection_id.into(),
			source_index,
			client,
			sink,
			enforcement,
			settings,
			redelivery,
			health_rx,
			cancel: cancel.clone(),
			stream_closed: false,
			ack_failure: None,
			left_unacked: 0,
		};
		let join = tokio::spawn(consumer.run(source.inbound));
		Self {
			source_index,
			health,
			cancel,
			join,
		}
	}

	/// Source this worker consumes
	pub fn source_index(&self) -> usize {
		self.source_index
	}

	/// Health query handle
	pub fn health(&self) -> HealthHandle {
		self.health.clone()
	}

	/// Stops consuming; unsettled messages stay unacknowledged.
	pub async fn stop(self) {
		self.cancel.cancel();
		if let Err(err) = self.join.await {
			warn!(
				source_index = self.source_index,
				error = ?err,
				"Consumer worker task failed"
			);
		}
	}
}

struct ConsumeLoop {
	connection_id: ArcStr,
	source_index: usize,
	client: Arc<dyn BrokerClient>,
	sink: Arc<dyn InboundSink>,
	enforcement: Option<Arc<Enforcement>>,
	settings: ConsumerSettings,
	redelivery: Option<RedeliveryHook>,
	health_rx: mpsc::Receiver<HealthRequest>,
	cancel: CancellationToken,
	stream_closed: bool,
	ack_failure: Option<String>,
	left_unacked: u64,
}

impl ConsumeLoop {
	async fn run(mut self, mut inbound: InboundReceiver) {
		info!(
			connection_id = %self.connection_id,
			client_id = %self.client.client_id(),
			source_index = self.source_index,
			"Consumer worker started"
		);
		let mut pending: FuturesOrdered<Settlement> = FuturesOrdered::new();
		let max_pending = self.settings.max_pending.max(1);

		loop {
			let can_read = !self.stream_closed && pending.len() < max_pending;
			tokio::select! {
				biased;
				_ = self.cancel.cancelled() => break,
				Some(reply) = self.health_rx.recv() => {
					let _ = reply.send(self.health(&inbound));
				}
				Some((message, outcome)) = pending.next(), if !pending.is_empty() => {
					self.settle(message, outcome).await;
				}
				message = inbound.recv(), if can_read => match message {
					| Some(message) => pending.push_back(self.dispatch(message)),
					| None => {
						warn!(
							connection_id = %self.connection_id,
							source_index = self.source_index,
							"Inbound stream closed"
						);
						self.stream_closed = true;
					}
				},
			}
		}

		info!(
			connection_id = %self.connection_id,
			source_index = self.source_index,
			unsettled = pending.len(),
			left_unacked = self.left_unacked,
			"Consumer worker stopped"
		);
	}

	fn dispatch(&self, message: InboundMessage) -> Settlement {
		let sink = Arc::clone(&self.sink);
		let timeout = self.settings.ack_timeout;
		let delivery = InboundDelivery {
			connection_id: self.connection_id.clone(),
			source_index: self.source_index,
			enforcement: self.enforcement.clone(),
			message: message.clone(),
		};
		async move {
			let outcome = tokio::time::timeout(timeout, sink.deliver(delivery))
				.await
				.ok();
			(message, outcome)
		}
		.boxed()
	}

	async fn settle(&mut self, message: InboundMessage, outcome: Option<AckOutcome>) {
		if !message.requires_ack() {
			return;
		}

		match outcome {
			| Some(AckOutcome::Acknowledged) => {}
			| Some(AckOutcome::RejectedPermanently(reason)) => {
				info!(
					connection_id = %self.connection_id,
					topic = %message.topic,
					reason = %reason,
					"Message rejected permanently, acknowledging so the broker drops it"
				);
			}
			| Some(AckOutcome::Redeliverable(reason)) => {
				if self.leave_for_redelivery(&message, &reason) {
					return;
				}
			}
			| None => {
				let reason =
					format!("not settled within {:?}", self.settings.ack_timeout);
				if self.leave_for_redelivery(&message, &reason) {
					return;
				}
			}
		}

		let acknowledged = tokio::select! {
			biased;
			_ = self.cancel.cancelled() => return,
			result = self.client.acknowledge(&message) => result,
		};
		match acknowledged {
			| Ok(()) => {
				debug!(
					connection_id = %self.connection_id,
					packet_id = message.delivery.packet_id,
					"Message acknowledged"
				);
				self.ack_failure = None;
			}
			| Err(err) => {
				warn!(
					connection_id = %self.connection_id,
					packet_id = message.delivery.packet_id,
					error = %err,
					"Failed to acknowledge message"
				);
				self.ack_failure = Some(err.to_string());
			}
		}
	}

	/// Returns `true` when the message stays unacknowledged.
	fn leave_for_redelivery(&mut self, message: &InboundMessage, reason: &str) -> bool {
		if !self.settings.reconnect_for_redelivery {
			warn!(
				connection_id = %self.connection_id,
				topic = %message.topic,
				reason,
				"Acknowledging unsettled message, it will not be redelivered because \
				 reconnect for redelivery is disabled"
			);
			return false;
		}

		self.left_unacked += 1;
		info!(
			connection_id = %self.connection_id,
			topic = %message.topic,
			packet_id = message.delivery.packet_id,
			reason,
			"Message left unacknowledged for redelivery"
		);
		if let Some(hook) = &self.redelivery {
			hook(self.source_index);
		}
		true
	}

	fn health(&self, inbound: &InboundReceiver) -> WorkerHealth {
		if self.stream_closed || inbound.is_closed() {
			return WorkerHealth::Unhealthy("inbound stream closed".to_string());
		}
		match &self.ack_failure {
			| Some(failure) => {
				WorkerHealth::Unhealthy(format!("acknowledgement failed: {failure}"))
			}
			| None => WorkerHealth::Healthy,
		}
	}
}
