//! In-memory broker for tests, demos and dry runs.
//!
//! Publishes are routed to the registrations of every connected client whose
//! filter matches, exactly like a real broker would. Faults can be injected
//! (rejected filters, refused handshakes, held publishes, broker-initiated
//! drops) and the broker keeps counters that tests use to check that no
//! connection or subscription leaks.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use arcstr::ArcStr;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::watch;
use tracing::{debug, info};

use super::client::{BrokerClient, BrokerConnector, ConnectionListener};
use super::error::BrokerError;
use super::types::{
	ClientOptions, ConnAck, DeliveryTag, DisconnectEvent, DisconnectSource,
	FilterOutcome, InboundMessage, InboundSender, OutboundMessage, PublishAck,
	Qos, ReconnectDirective, SubscribeAck, TopicFilterQos,
};
use crate::topic::TopicFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientPhase {
	Idle,
	Connected,
	Reconnecting,
	Stopped,
}

struct Registration {
	filter: TopicFilter,
	sender: InboundSender,
}

struct ClientRecord {
	options: ClientOptions,
	listener: Arc<dyn ConnectionListener>,
	phase: Arc<watch::Sender<ClientPhase>>,
	instance: u64,
	connects: u32,
	disconnects: u32,
	reconnect_attempt: u32,
	registrations: Vec<Registration>,
}

impl ClientRecord {
	fn is_connected(&self) -> bool {
		*self.phase.borrow() == ClientPhase::Connected
	}
}

#[derive(Default)]
struct BrokerState {
	clients: HashMap<String, ClientRecord>,
	rejected_filters: HashMap<String, String>,
	connect_failures: VecDeque<BrokerError>,
	published: Vec<OutboundMessage>,
	acknowledged: Vec<(String, DeliveryTag)>,
	next_instance: u64,
	next_packet_id: u16,
}

impl BrokerState {
	fn next_packet_id(&mut self) -> u16 {
		self.next_packet_id = self.next_packet_id.wrapping_add(1).max(1);
		self.next_packet_id
	}

	fn deliver(&mut self, topic: &str, payload: &Bytes, qos: Qos, retain: bool) -> usize {
		let mut targets = Vec::new();
		for record in self.clients.values().filter(|r| r.is_connected()) {
			for registration in &record.registrations {
				if registration.filter.matches(topic)
					&& !targets.iter().any(|s: &InboundSender| {
						s.same_channel(&registration.sender)
					}) {
					targets.push(registration.sender.clone());
				}
			}
		}
		let mut delivered = 0;
		for sender in targets {
			let packet_id = if qos == Qos::AtMostOnce {
				0
			} else {
				self.next_packet_id()
			};
			let message = InboundMessage {
				topic: ArcStr::from(topic),
				payload: payload.clone(),
				retain,
				duplicate: false,
				delivery: DeliveryTag { packet_id, qos },
			};
			match sender.try_send(message) {
				| Ok(()) => delivered += 1,
				| Err(err) => debug!(topic, error = %err, "Loopback delivery dropped"),
			}
		}
		delivered
	}
}

/// In-memory MQTT broker implementing [`BrokerConnector`]
#[derive(Clone)]
pub struct LoopbackBroker {
	state: Arc<Mutex<BrokerState>>,
	publish_gate: Arc<watch::Sender<bool>>,
	in_flight: Arc<watch::Sender<usize>>,
}

impl Default for LoopbackBroker {
	fn default() -> Self {
		Self::new()
	}
}

impl LoopbackBroker {
	/// Creates an empty broker.
	pub fn new() -> Self {
		Self {
			state: Arc::new(Mutex::new(BrokerState::default())),
			publish_gate: Arc::new(watch::channel(false).0),
			in_flight: Arc::new(watch::channel(0).0),
		}
	}

	fn state(&self) -> MutexGuard<'_, BrokerState> {
		self.state.lock().unwrap_or_else(PoisonError::into_inner)
	}

	/// SUBSCRIBE requests for `filter` will be rejected with `reason`.
	pub fn reject_filter(&self, filter: &str, reason: &str) {
		self.state()
			.rejected_filters
			.insert(filter.to_string(), reason.to_string());
	}

	/// The next handshake of any client fails with `error`.
	pub fn fail_next_connect(&self, error: BrokerError) {
		self.state().connect_failures.push_back(error);
	}

	/// Publishes stay in flight until [`release_publishes`](Self::release_publishes).
	pub fn hold_publishes(&self) {
		self.publish_gate.send_replace(true);
	}

	/// Lets held publishes complete.
	pub fn release_publishes(&self) {
		self.publish_gate.send_replace(false);
	}

	/// Waits until at least `count` publishes are held in flight.
	pub async fn wait_for_in_flight(&self, count: usize) {
		let mut rx = self.in_flight.subscribe();
		let _ = rx.wait_for(|current| *current >= count).await;
	}

	/// Delivers a message to every matching subscription, as if another
	/// client had published it. Returns the number of deliveries.
	pub fn inject(&self, topic: &str, payload: impl Into<Bytes>, qos: Qos) -> usize {
		let payload = payload.into();
		self.state().deliver(topic, &payload, qos, false)
	}

	/// Simulates the broker dropping a connected client.
	///
	/// The client's listener decides whether it reconnects; a reconnect
	/// completes after the returned delay.
	pub fn drop_connection(&self, client_id: &str, source: DisconnectSource) {
		let (listener, event, phase, instance, clean_session) = {
			let mut state = self.state();
			let Some(record) = state.clients.get_mut(client_id) else {
				return;
			};
			if !record.is_connected() {
				return;
			}
			record.phase.send_replace(ClientPhase::Reconnecting);
			let event = DisconnectEvent {
				source,
				cause: "connection dropped by loopback broker".to_string(),
				ever_connected: true,
				attempt: record.reconnect_attempt,
			};
			record.reconnect_attempt += 1;
			(
				Arc::clone(&record.listener),
				event,
				Arc::clone(&record.phase),
				record.instance,
				record.options.clean_session,
			)
		};
		info!(client_id, source = ?source, "Loopback broker dropping connection");

		match listener.on_disconnected(&event) {
			| ReconnectDirective::Stop => {
				phase.send_replace(ClientPhase::Stopped);
			}
			| ReconnectDirective::ReconnectAfter(delay) => {
				let broker = self.clone();
				let client_id = client_id.to_string();
				tokio::spawn(async move {
					tokio::time::sleep(delay).await;
					broker.complete_reconnect(&client_id, instance, clean_session);
				});
			}
		}
	}

	fn complete_reconnect(&self, client_id: &str, instance: u64, clean_session: bool) {
		let listener = {
			let mut state = self.state();
			let Some(record) = state.clients.get_mut(client_id) else {
				return;
			};
			if record.instance != instance
				|| *record.phase.borrow() != ClientPhase::Reconnecting
			{
				return;
			}
			record.connects += 1;
			record.reconnect_attempt = 0;
			record.phase.send_replace(ClientPhase::Connected);
			Arc::clone(&record.listener)
		};
		listener.on_connected(&ConnAck {
			session_present: !clean_session,
		});
	}

	/// Number of successful handshakes of `client_id`, reconnects included
	pub fn connect_count(&self, client_id: &str) -> u32 {
		self.state().clients.get(client_id).map_or(0, |r| r.connects)
	}

	/// Number of client-initiated disconnects of `client_id`
	pub fn disconnect_count(&self, client_id: &str) -> u32 {
		self.state().clients.get(client_id).map_or(0, |r| r.disconnects)
	}

	/// Whether `client_id` currently holds a connection
	pub fn is_connected(&self, client_id: &str) -> bool {
		self.state()
			.clients
			.get(client_id)
			.is_some_and(ClientRecord::is_connected)
	}

	/// Number of clients currently connected
	pub fn connected_clients(&self) -> usize {
		self.state()
			.clients
			.values()
			.filter(|r| r.is_connected())
			.count()
	}

	/// Active inbound registrations of `client_id`
	pub fn registration_count(&self, client_id: &str) -> usize {
		self.state()
			.clients
			.get(client_id)
			.map_or(0, |r| r.registrations.len())
	}

	/// Active inbound registrations over all clients
	pub fn total_registrations(&self) -> usize {
		self.state()
			.clients
			.values()
			.map(|r| r.registrations.len())
			.sum()
	}

	/// Every client id that was ever created, sorted
	pub fn client_ids(&self) -> Vec<String> {
		let mut ids: Vec<String> = self.state().clients.keys().cloned().collect();
		ids.sort();
		ids
	}

	/// Options `client_id` was created with
	pub fn client_options(&self, client_id: &str) -> Option<ClientOptions> {
		self.state().clients.get(client_id).map(|r| r.options.clone())
	}

	/// All messages published through the broker, in order
	pub fn published(&self) -> Vec<OutboundMessage> {
		self.state().published.clone()
	}

	/// Number of inbound messages `client_id` acknowledged
	pub fn acknowledged_count(&self, client_id: &str) -> usize {
		self.state()
			.acknowledged
			.iter()
			.filter(|(id, _)| id == client_id)
			.count()
	}
}

impl BrokerConnector for LoopbackBroker {
	fn create_client(
		&self,
		options: ClientOptions,
		listener: Arc<dyn ConnectionListener>,
	) -> Result<Arc<dyn BrokerClient>, BrokerError> {
		if options.client_id.is_empty() {
			return Err(BrokerError::InvalidOptions(
				"client id must not be empty".to_string(),
			));
		}
		let phase = Arc::new(watch::channel(ClientPhase::Idle).0);
		let mut state = self.state();
		state.next_instance += 1;
		let instance = state.next_instance;
		let client_id = options.client_id.clone();
		match state.clients.get_mut(&client_id) {
			| Some(record) => {
				// Client id reuse takes over the broker-side session
				record.phase.send_replace(ClientPhase::Stopped);
				record.options = options;
				record.listener = listener;
				record.phase = Arc::clone(&phase);
				record.instance = instance;
				record.reconnect_attempt = 0;
				record.registrations.clear();
			}
			| None => {
				state.clients.insert(client_id.clone(), ClientRecord {
					options,
					listener,
					phase: Arc::clone(&phase),
					instance,
					connects: 0,
					disconnects: 0,
					reconnect_attempt: 0,
					registrations: Vec::new(),
				});
			}
		}
		Ok(Arc::new(LoopbackClient {
			client_id,
			instance,
			phase,
			broker: self.clone(),
		}))
	}
}

struct InFlight<'a>(&'a watch::Sender<usize>);

impl<'a> InFlight<'a> {
	fn enter(counter: &'a watch::Sender<usize>) -> Self {
		counter.send_modify(|count| *count += 1);
		Self(counter)
	}
}

impl Drop for InFlight<'_> {
	fn drop(&mut self) {
		self.0.send_modify(|count| *count = count.saturating_sub(1));
	}
}

struct LoopbackClient {
	client_id: String,
	instance: u64,
	phase: Arc<watch::Sender<ClientPhase>>,
	broker: LoopbackBroker,
}

impl LoopbackClient {
	fn current_phase(&self) -> ClientPhase {
		*self.phase.borrow()
	}
}

#[async_trait]
impl BrokerClient for LoopbackClient {
	fn client_id(&self) -> &str {
		&self.client_id
	}

	async fn connect(&self) -> Result<ConnAck, BrokerError> {
		if self.current_phase() != ClientPhase::Idle {
			return Err(BrokerError::AlreadyStarted);
		}
		let (outcome, listener) = {
			let mut state = self.broker.state();
			let failure = state.connect_failures.pop_front();
			let Some(record) = state.clients.get_mut(&self.client_id) else {
				return Err(BrokerError::NotConnected);
			};
			if record.instance != self.instance {
				return Err(BrokerError::Disconnected(
					"client id taken over".to_string(),
				));
			}
			let outcome = match failure {
				| Some(error) => Err(error),
				| None => {
					record.connects += 1;
					Ok(ConnAck {
						session_present: !record.options.clean_session
							&& record.connects > 1,
					})
				}
			};
			(outcome, Arc::clone(&record.listener))
		};

		match outcome {
			| Ok(ack) => {
				self.phase.send_replace(ClientPhase::Connected);
				listener.on_connected(&ack);
				Ok(ack)
			}
			| Err(error) => {
				self.phase.send_replace(ClientPhase::Stopped);
				let _ = listener.on_disconnected(&DisconnectEvent {
					source: DisconnectSource::Server,
					cause: error.to_string(),
					ever_connected: false,
					attempt: 0,
				});
				Err(error)
			}
		}
	}

	async fn subscribe(
		&self,
		filters: Vec<TopicFilterQos>,
		inbound: InboundSender,
	) -> Result<SubscribeAck, BrokerError> {
		let mut phase = self.phase.subscribe();
		let ready = phase
			.wait_for(|p| *p != ClientPhase::Idle)
			.await
			.map(|p| *p)
			.unwrap_or(ClientPhase::Stopped);
		if ready == ClientPhase::Stopped {
			return Err(BrokerError::Disconnected(
				"client stopped before SUBACK".to_string(),
			));
		}

		let mut state = self.broker.state();
		let rejected = state.rejected_filters.clone();
		let Some(record) = state.clients.get_mut(&self.client_id) else {
			return Err(BrokerError::NotConnected);
		};
		let outcomes = filters
			.into_iter()
			.map(|requested| {
				let outcome = match rejected.get(requested.filter.as_str()) {
					| Some(reason) => FilterOutcome::Rejected(reason.clone()),
					| None => {
						record.registrations.push(Registration {
							filter: requested.filter.clone(),
							sender: inbound.clone(),
						});
						FilterOutcome::Granted(requested.qos)
					}
				};
				(requested.filter, outcome)
			})
			.collect();
		Ok(SubscribeAck { outcomes })
	}

	async fn publish(
		&self,
		message: OutboundMessage,
	) -> Result<PublishAck, BrokerError> {
		if self.current_phase() != ClientPhase::Connected {
			return Err(BrokerError::NotConnected);
		}
		{
			let _in_flight = InFlight::enter(&self.broker.in_flight);
			let mut gate = self.broker.publish_gate.subscribe();
			let _ = gate.wait_for(|held| !*held).await;
		}

		let mut state = self.broker.state();
		state.deliver(&message.topic, &message.payload, message.qos, message.retain);
		let qos = message.qos;
		state.published.push(message);
		Ok(PublishAck { qos })
	}

	async fn acknowledge(&self, message: &InboundMessage) -> Result<(), BrokerError> {
		if !message.requires_ack() {
			return Ok(());
		}
		self.broker
			.state()
			.acknowledged
			.push((self.client_id.clone(), message.delivery));
		Ok(())
	}

	async fn disconnect(&self) -> Result<(), BrokerError> {
		let previous = self.phase.send_replace(ClientPhase::Stopped);
		let mut state = self.broker.state();
		if let Some(record) = state.clients.get_mut(&self.client_id) {
			if record.instance == self.instance {
				if previous != ClientPhase::Stopped && previous != ClientPhase::Idle {
					record.disconnects += 1;
				}
				record.registrations.clear();
			}
		}
		debug!(client_id = %self.client_id, "Loopback client disconnected");
		Ok(())
	}
}
