use std::sync::Arc;
use std::time::Duration;

use arcstr::ArcStr;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use super::handle::{Command, ControllerTask, LifecycleHandle};
use super::session::Session;
use super::state::{ConnectionEvent, ConnectionState};
use crate::broker::BrokerConnector;
use crate::config::{ConnectionConfig, ConnectorSettings, Enforcement};
use crate::connection::{
	BrokerHandle, ClientConnectionSet, HandleEvent, HandleEventKind, SetMode,
	connect_after_delay,
};
use crate::error::ConnectionError;
use crate::publish::{PublishQueue, PublisherWorker};
use crate::subscription::{
	ConsumerSettings, ConsumerWorker, InboundSink, RedeliveryHook, SubscribedSource,
	SubscriptionCoordinator,
};

type ConnectReply = oneshot::Sender<Result<(), ConnectionError>>;
type Established = Result<Vec<SubscribedSource>, ConnectionError>;

#[derive(Debug)]
enum InternalEvent {
	AttemptFinished {
		generation: u64,
		outcome: Established,
	},
	RedeliveryRequested {
		generation: u64,
		source_index: usize,
	},
	RedeliveryTimerFired {
		generation: u64,
	},
	ConsumerCycleFinished {
		generation: u64,
		handle_id: u64,
		outcome: Established,
	},
}

/// Actor owning the lifecycle of one broker connection
pub struct LifecycleController {
	connection_id: ArcStr,
	config: Arc<ConnectionConfig>,
	settings: Arc<ConnectorSettings>,
	connector: Arc<dyn BrokerConnector>,
	sink: Arc<dyn InboundSink>,
	enforcements: Vec<Option<Arc<Enforcement>>>,
	state_tx: watch::Sender<ConnectionState>,
	queue_tx: watch::Sender<Option<PublishQueue>>,
	events_tx: broadcast::Sender<ConnectionEvent>,
	internal_tx: mpsc::UnboundedSender<InternalEvent>,
	handle_events_tx: mpsc::UnboundedSender<HandleEvent>,
	generation: u64,
	session: Option<Session>,
	waiters: Vec<ConnectReply>,
}

impl LifecycleController {
	/// Spawns the controller actor in the `Disconnected` state.
	///
	/// Nothing talks to the broker until [`LifecycleHandle::connect`] is
	/// called.
	pub fn spawn(
		config: Arc<ConnectionConfig>,
		settings: Arc<ConnectorSettings>,
		connector: Arc<dyn BrokerConnector>,
		sink: Arc<dyn InboundSink>,
	) -> (ControllerTask, LifecycleHandle) {
		let connection_id = ArcStr::from(config.id.as_str());
		let (command_tx, command_rx) = mpsc::channel(settings.command_channel_capacity.max(1));
		let (shutdown_tx, shutdown_rx) = oneshot::channel();
		let (internal_tx, internal_rx) = mpsc::unbounded_channel();
		let (handle_events_tx, handle_events_rx) = mpsc::unbounded_channel();
		let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
		let (queue_tx, queue_rx) = watch::channel(None);
		let (events_tx, _) = broadcast::channel(settings.event_channel_capacity.max(1));

		let enforcements = config
			.sources
			.iter()
			.map(|source| source.enforcement.clone().map(Arc::new))
			.collect();
		let controller = Self {
			connection_id: connection_id.clone(),
			config,
			settings,
			connector,
			sink,
			enforcements,
			state_tx,
			queue_tx,
			events_tx: events_tx.clone(),
			internal_tx,
			handle_events_tx,
			generation: 0,
			session: None,
			waiters: Vec::new(),
		};
		let join_handler = tokio::spawn(controller.run(
			command_rx,
			internal_rx,
			handle_events_rx,
			shutdown_rx,
		));

		let task = ControllerTask::new(shutdown_tx, join_handler);
		let handle =
			LifecycleHandle::new(connection_id, command_tx, state_rx, queue_rx, events_tx);
		(task, handle)
	}

	async fn run(
		mut self,
		mut command_rx: mpsc::Receiver<Command>,
		mut internal_rx: mpsc::UnboundedReceiver<InternalEvent>,
		mut handle_events_rx: mpsc::UnboundedReceiver<HandleEvent>,
		mut shutdown_rx: oneshot::Receiver<()>,
	) {
		info!(connection_id = %self.connection_id, "Lifecycle controller started");
		loop {
			tokio::select! {
				_ = &mut shutdown_rx => {
					info!(connection_id = %self.connection_id, "Shutdown signal received");
					break;
				}
				command = command_rx.recv() => match command {
					| Some(Command::Connect(reply)) => self.handle_connect(reply),
					| Some(Command::Disconnect(reply)) => {
						self.handle_disconnect().await;
						let _ = reply.send(());
					}
					| None => {
						info!(connection_id = %self.connection_id, "All handles dropped");
						break;
					}
				},
				Some(event) = internal_rx.recv() => self.handle_internal(event).await,
				Some(event) = handle_events_rx.recv() => self.handle_broker_event(event).await,
			}
		}

		if self.session.is_some() {
			self.handle_disconnect().await;
		}
		info!(connection_id = %self.connection_id, "Lifecycle controller stopped");
	}

	fn state(&self) -> ConnectionState {
		*self.state_tx.borrow()
	}

	fn set_state(&self, state: ConnectionState) {
		let previous = self.state_tx.send_replace(state);
		if previous != state {
			info!(
				connection_id = %self.connection_id,
				from = %previous,
				to = %state,
				"Connection state changed"
			);
		}
	}

	fn emit(&self, event: ConnectionEvent) {
		debug!(connection_id = %self.connection_id, event = ?event, "Emitting connection event");
		let _ = self.events_tx.send(event);
	}

	fn reply_waiters(&mut self, result: Result<(), ConnectionError>) {
		for waiter in self.waiters.drain(..) {
			let _ = waiter.send(result.clone());
		}
	}

	fn handle_connect(&mut self, reply: ConnectReply) {
		match self.state() {
			| ConnectionState::Connected => {
				let _ = reply.send(Ok(()));
			}
			| ConnectionState::Connecting | ConnectionState::Disconnecting => {
				self.waiters.push(reply);
			}
			| ConnectionState::Disconnected | ConnectionState::Failed => {
				match self.start_attempt() {
					| Ok(()) => self.waiters.push(reply),
					| Err(err) => {
						let _ = reply.send(Err(err));
					}
				}
			}
		}
	}

	fn start_attempt(&mut self) -> Result<(), ConnectionError> {
		self.generation += 1;
		let generation = self.generation;

		let created = self
			.config
			.validate()
			.map_err(ConnectionError::from)
			.and_then(|()| {
				ClientConnectionSet::create(
					Arc::clone(&self.connector),
					Arc::clone(&self.config),
					Arc::clone(&self.settings),
					generation,
					self.handle_events_tx.clone(),
					SetMode::Live,
				)
				.map_err(ConnectionError::ClientCreation)
			});
		let set = match created {
			| Ok(set) => set,
			| Err(err) => {
				error!(
					connection_id = %self.connection_id,
					error = %err,
					"Failed to create client connection set"
				);
				self.set_state(ConnectionState::Disconnected);
				self.emit(ConnectionEvent::ConnectionFailure(err.clone()));
				return Err(err);
			}
		};

		info!(connection_id = %self.connection_id, generation, "Connecting");
		let consumer = set.consumer().clone();
		let publisher = set.has_separate_publisher().then(|| set.publisher().clone());
		let plan = self.plan(consumer, publisher);
		let internal_tx = self.internal_tx.clone();
		let task = tokio::spawn(async move {
			let outcome = establish(plan).await;
			let _ = internal_tx.send(InternalEvent::AttemptFinished {
				generation,
				outcome,
			});
		});
		self.session = Some(Session::new(set, task));
		self.set_state(ConnectionState::Connecting);
		Ok(())
	}

	fn plan(&self, consumer: BrokerHandle, publisher: Option<BrokerHandle>) -> EstablishPlan {
		EstablishPlan {
			connection_id: self.connection_id.clone(),
			coordinator: SubscriptionCoordinator::new(
				self.connection_id.clone(),
				Arc::clone(consumer.client()),
				self.settings.inbound_channel_capacity,
				self.config.protocol.default_qos,
			),
			config: Arc::clone(&self.config),
			delay: self.settings.subscribe_handshake_delay,
			consumer,
			publisher,
		}
	}

	async fn handle_disconnect(&mut self) {
		match self.state() {
			| ConnectionState::Disconnected => {}
			| ConnectionState::Failed => self.set_state(ConnectionState::Disconnected),
			| ConnectionState::Connecting
			| ConnectionState::Connected
			| ConnectionState::Disconnecting => {
				info!(connection_id = %self.connection_id, "Disconnecting");
				self.set_state(ConnectionState::Disconnecting);
				self.reply_waiters(Err(ConnectionError::Cancelled));
				self.teardown().await;
				self.set_state(ConnectionState::Disconnected);
				self.emit(ConnectionEvent::ClientDisconnected);
			}
		}
	}

	async fn teardown(&mut self) {
		self.queue_tx.send_replace(None);
		if let Some(session) = self.session.take() {
			session.teardown().await;
		}
	}

	async fn fail(&mut self, err: ConnectionError) {
		error!(connection_id = %self.connection_id, error = %err, "Connection failed");
		self.teardown().await;
		self.set_state(ConnectionState::Failed);
		self.emit(ConnectionEvent::ConnectionFailure(err.clone()));
		self.emit(ConnectionEvent::ReportConnectionStatusError(err.to_string()));
		self.reply_waiters(Err(err));
	}

	async fn handle_internal(&mut self, event: InternalEvent) {
		match event {
			| InternalEvent::AttemptFinished {
				generation,
				outcome,
			} => self.on_attempt_finished(generation, outcome).await,
			| InternalEvent::RedeliveryRequested {
				generation,
				source_index,
			} => self.on_redelivery_requested(generation, source_index).await,
			| InternalEvent::RedeliveryTimerFired { generation } => {
				self.on_redelivery_timer(generation).await
			}
			| InternalEvent::ConsumerCycleFinished {
				generation,
				handle_id,
				outcome,
			} => self.on_consumer_cycle_finished(generation, handle_id, outcome).await,
		}
	}

	async fn on_attempt_finished(&mut self, generation: u64, outcome: Established) {
		if generation != self.generation || self.state() != ConnectionState::Connecting {
			debug!(
				connection_id = %self.connection_id,
				generation,
				"Discarding result of superseded connection attempt"
			);
			return;
		}

		let sources = match outcome {
			| Ok(sources) => sources,
			| Err(err) => return self.fail(err).await,
		};

		let consumers = self.start_consumers(sources);
		let Some(session) = self.session.as_mut() else {
			return;
		};
		session.task = None;
		let publisher = PublisherWorker::start(
			self.connection_id.clone(),
			Arc::clone(session.set.publisher().client()),
			self.config.protocol.publish_queue_capacity,
		);
		self.queue_tx.send_replace(Some(publisher.queue()));
		session.publisher = Some(publisher);
		session.consumers = consumers;

		self.set_state(ConnectionState::Connected);
		self.emit(ConnectionEvent::ClientConnected);
		self.emit(ConnectionEvent::ReportConnectionStatusSuccess);
		self.reply_waiters(Ok(()));
	}

	fn start_consumers(&self, sources: Vec<SubscribedSource>) -> Vec<ConsumerWorker> {
		let Some(session) = self.session.as_ref() else {
			return Vec::new();
		};
		let client = session.set.consumer().client();
		let protocol = &self.config.protocol;
		let settings = ConsumerSettings {
			ack_timeout: self.settings.inbound_ack_timeout,
			reconnect_for_redelivery: protocol.reconnect_for_redelivery,
			max_pending: self.settings.inbound_channel_capacity,
		};
		let hook = protocol.reconnect_for_redelivery.then(|| self.redelivery_hook());

		sources
			.into_iter()
			.map(|source| {
				let enforcement = self
					.enforcements
					.get(source.source_index)
					.cloned()
					.flatten();
				ConsumerWorker::start(
					self.connection_id.clone(),
					Arc::clone(client),
					Arc::clone(&self.sink),
					source,
					enforcement,
					settings.clone(),
					hook.clone(),
				)
			})
			.collect()
	}

	fn redelivery_hook(&self) -> RedeliveryHook {
		let internal_tx = self.internal_tx.clone();
		let generation = self.generation;
		Arc::new(move |source_index| {
			let _ = internal_tx.send(InternalEvent::RedeliveryRequested {
				generation,
				source_index,
			});
		})
	}

	async fn on_redelivery_requested(&mut self, generation: u64, source_index: usize) {
		if generation != self.generation || self.state() != ConnectionState::Connected {
			return;
		}
		let Some(session) = self.session.as_mut() else {
			return;
		};
		if session.redelivery_pending() {
			debug!(
				connection_id = %self.connection_id,
				source_index,
				"Reconnect for redelivery already pending"
			);
			return;
		}

		if !session.set.has_separate_publisher() {
			warn!(
				connection_id = %self.connection_id,
				source_index,
				"Redelivery requires reconnecting the shared client"
			);
			return self.fail(ConnectionError::RedeliveryRequired).await;
		}

		let delay = self
			.config
			.protocol
			.reconnect_for_redelivery_delay
			.max(self.settings.min_redelivery_delay);
		info!(
			connection_id = %self.connection_id,
			source_index,
			delay = ?delay,
			"Scheduling consumer reconnect for redelivery"
		);
		let internal_tx = self.internal_tx.clone();
		session.redelivery_timer = Some(tokio::spawn(async move {
			tokio::time::sleep(delay).await;
			let _ = internal_tx.send(InternalEvent::RedeliveryTimerFired { generation });
		}));
	}

	async fn on_redelivery_timer(&mut self, generation: u64) {
		if generation != self.generation || self.state() != ConnectionState::Connected {
			return;
		}
		let Some(session) = self.session.as_mut() else {
			return;
		};
		session.redelivery_timer = None;
		session.cycling_consumer = true;

		info!(connection_id = %self.connection_id, "Reconnecting consumer for redelivery");
		session.stop_consumers().await;
		let cycled = session.set.cycle_consumer().await.map(BrokerHandle::clone);
		let consumer = match cycled {
			| Ok(consumer) => consumer,
			| Err(err) => return self.fail(ConnectionError::ClientCreation(err)).await,
		};

		let handle_id = consumer.id();
		let plan = self.plan(consumer, None);
		let internal_tx = self.internal_tx.clone();
		let task = tokio::spawn(async move {
			let outcome = establish(plan).await;
			let _ = internal_tx.send(InternalEvent::ConsumerCycleFinished {
				generation,
				handle_id,
				outcome,
			});
		});
		if let Some(session) = self.session.as_mut() {
			session.task = Some(task);
		}
	}

	async fn on_consumer_cycle_finished(
		&mut self,
		generation: u64,
		handle_id: u64,
		outcome: Established,
	) {
		let current = generation == self.generation
			&& self.state() == ConnectionState::Connected
			&& self
				.session
				.as_ref()
				.is_some_and(|s| s.cycling_consumer && s.set.owns(handle_id));
		if !current {
			debug!(
				connection_id = %self.connection_id,
				generation,
				handle_id,
				"Discarding result of superseded consumer reconnect"
			);
			return;
		}

		let sources = match outcome {
			| Ok(sources) => sources,
			| Err(err) => return self.fail(err).await,
		};
		let consumers = self.start_consumers(sources);
		if let Some(session) = self.session.as_mut() {
			session.task = None;
			session.cycling_consumer = false;
			session.consumers = consumers;
		}
		info!(
			connection_id = %self.connection_id,
			"Reconnect for redelivery completed, consumers restarted"
		);
	}

	async fn handle_broker_event(&mut self, event: HandleEvent) {
		let current = event.generation == self.generation
			&& self
				.session
				.as_ref()
				.is_some_and(|s| s.set.owns(event.handle_id));
		if !current {
			debug!(
				connection_id = %self.connection_id,
				generation = event.generation,
				handle_id = event.handle_id,
				"Discarding event of a released broker handle"
			);
			return;
		}
		let state = self.state();

		match event.kind {
			| HandleEventKind::Connected(_) => {
				let recovered = self
					.session
					.as_mut()
					.is_some_and(|s| s.reconnecting.remove(&event.handle_id));
				if recovered && state == ConnectionState::Connected {
					info!(
						connection_id = %self.connection_id,
						role = %event.role,
						"Broker handle reconnected"
					);
					self.emit(ConnectionEvent::ReportConnectionStatusSuccess);
				}
			}
			| HandleEventKind::Reconnecting { cause, delay } => {
				if let Some(session) = self.session.as_mut() {
					session.reconnecting.insert(event.handle_id);
				}
				if state == ConnectionState::Connected {
					debug!(
						connection_id = %self.connection_id,
						role = %event.role,
						delay = ?delay,
						"Broker handle reconnecting"
					);
					self.emit(ConnectionEvent::ReportConnectionStatusError(cause));
				}
			}
			| HandleEventKind::HandshakeFailed { cause } => {
				debug!(
					connection_id = %self.connection_id,
					role = %event.role,
					cause = %cause,
					"Handshake failure reported by handle"
				);
			}
			| HandleEventKind::Lost { cause } => {
				if matches!(
					state,
					ConnectionState::Connecting | ConnectionState::Connected
				) {
					self.fail(ConnectionError::ConnectionLost(cause)).await;
				}
			}
		}
	}
}

struct EstablishPlan {
	connection_id: ArcStr,
	coordinator: SubscriptionCoordinator,
	config: Arc<ConnectionConfig>,
	delay: Duration,
	consumer: BrokerHandle,
	publisher: Option<BrokerHandle>,
}

/// Subscribes every source on the consumer handle, waits the handshake delay,
/// then connects it. A separate publisher handle connects during the delay.
async fn establish(plan: EstablishPlan) -> Established {
	let EstablishPlan {
		connection_id,
		coordinator,
		config,
		delay,
		consumer,
		publisher,
	} = plan;
	let pending = coordinator.issue(&config.sources);
	connect_after_delay(&consumer, publisher.as_ref(), delay).await?;
	debug!(connection_id = %connection_id, "Handshake complete, awaiting subscriptions");

	let total = pending.wait().await;
	match total.failure_message() {
		| None => Ok(total.into_parts().0),
		| Some(message) => Err(ConnectionError::SubscribeFailed(message)),
	}
}
