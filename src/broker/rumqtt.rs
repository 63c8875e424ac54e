//! [`BrokerConnector`] backed by `rumqttc`.
//!
//! `rumqttc` reports request completion only through event loop
//! notifications, so the driver task correlates them: every SUBSCRIBE and
//! PUBLISH request is queued locally in the same order it enters the client's
//! request channel, bound to its packet id when the matching
//! `Outgoing::Subscribe`/`Outgoing::Publish` notification appears, and
//! resolved on SUBACK, PUBACK or PUBCOMP.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use arcstr::ArcStr;
use async_trait::async_trait;
use rumqttc::Event::{Incoming, Outgoing};
use rumqttc::{
	AsyncClient, ConnectionError, EventLoop, LastWill, MqttOptions, Packet,
	Publish, SubscribeFilter, SubscribeReasonCode,
};
use tokio::sync::{mpsc::error::TrySendError, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::client::{BrokerClient, BrokerConnector, ConnectionListener};
use super::error::BrokerError;
use super::types::{
	ClientOptions, ConnAck, DeliveryTag, DisconnectEvent, DisconnectSource,
	FilterOutcome, InboundMessage, InboundSender, OutboundMessage, PublishAck,
	Qos, ReconnectDirective, SubscribeAck, TopicFilterQos,
};
use crate::topic::TopicFilter;

/// How long `disconnect` waits for the DISCONNECT packet to be flushed
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);
/// Upper bound for handing an inbound message to a slow consumer
const SLOW_DELIVERY_TIMEOUT: Duration = Duration::from_secs(2);

/// Creates `rumqttc` backed clients
#[derive(Debug, Clone)]
pub struct RumqttConnector {
	request_capacity: usize,
}

impl RumqttConnector {
	/// Creates a connector whose clients buffer up to `request_capacity`
	/// requests before the event loop picks them up.
	pub fn new(request_capacity: usize) -> Self {
		Self {
			request_capacity: request_capacity.max(1),
		}
	}
}

impl Default for RumqttConnector {
	fn default() -> Self {
		Self::new(10)
	}
}

impl BrokerConnector for RumqttConnector {
	fn create_client(
		&self,
		options: ClientOptions,
		listener: Arc<dyn ConnectionListener>,
	) -> Result<Arc<dyn BrokerClient>, BrokerError> {
		let mqtt_options = build_mqtt_options(&options)?;
		let (client, event_loop) =
			AsyncClient::new(mqtt_options, self.request_capacity);
		debug!(client_id = %options.client_id, uri = %options.uri, "Created rumqttc client");
		Ok(Arc::new(RumqttClient {
			client_id: options.client_id,
			client,
			event_loop: Mutex::new(Some(event_loop)),
			driver: Mutex::new(None),
			shared: Arc::new(DriverShared::new(listener)),
			cancel: CancellationToken::new(),
		}))
	}
}

pub(super) fn build_mqtt_options(
	options: &ClientOptions,
) -> Result<MqttOptions, BrokerError> {
	let url = url_with_client_id(&options.uri, &options.client_id);
	let mut mqtt_options = MqttOptions::parse_url(url)
		.map_err(|err| BrokerError::InvalidOptions(err.to_string()))?;
	mqtt_options.set_clean_session(options.clean_session);
	if let Some(keep_alive) = options.keep_alive {
		mqtt_options.set_keep_alive(keep_alive);
	}
	if let Some(credentials) = &options.credentials {
		mqtt_options.set_credentials(
			credentials.username.clone(),
			credentials.password.clone(),
		);
	}
	if let Some(last_will) = &options.last_will {
		mqtt_options.set_last_will(LastWill::new(
			last_will.topic.clone(),
			last_will.payload.clone(),
			last_will.qos.into(),
			last_will.retain,
		));
	}
	mqtt_options.set_manual_acks(options.manual_acks);
	Ok(mqtt_options)
}

/// Appends the client id as a form-encoded query parameter, the way
/// `MqttOptions::parse_url` decodes it.
pub(super) fn url_with_client_id(uri: &str, client_id: &str) -> String {
	let encoded: String =
		url::form_urlencoded::byte_serialize(client_id.as_bytes()).collect();
	let separator = if uri.contains('?') { '&' } else { '?' };
	format!("{uri}{separator}client_id={encoded}")
}

pub(super) type ConnectResponder = oneshot::Sender<Result<ConnAck, BrokerError>>;
pub(super) type SubscribeResponder =
	oneshot::Sender<Result<SubscribeAck, BrokerError>>;
pub(super) type PublishResponder = oneshot::Sender<Result<PublishAck, BrokerError>>;

struct PendingSubscribe {
	filters: Vec<TopicFilterQos>,
	inbound: Option<InboundSender>,
	responder: Option<SubscribeResponder>,
}

struct PendingPublish {
	qos: Qos,
	responder: PublishResponder,
}

#[derive(Default)]
struct PendingRequests {
	connect: Option<ConnectResponder>,
	unsent_subscribes: VecDeque<PendingSubscribe>,
	subscribes: HashMap<u16, PendingSubscribe>,
	unsent_publishes: VecDeque<PendingPublish>,
	publishes: HashMap<u16, PendingPublish>,
}

struct InboundRoute {
	filter: TopicFilter,
	qos: Qos,
	sender: InboundSender,
}

pub(super) struct DriverShared {
	pending: Mutex<PendingRequests>,
	/// Keeps the local pending queues in request channel order
	request_order: tokio::sync::Mutex<()>,
	routes: Mutex<Vec<InboundRoute>>,
	listener: Arc<dyn ConnectionListener>,
}

impl DriverShared {
	pub(super) fn new(listener: Arc<dyn ConnectionListener>) -> Self {
		Self {
			pending: Mutex::new(PendingRequests::default()),
			request_order: tokio::sync::Mutex::new(()),
			routes: Mutex::new(Vec::new()),
			listener,
		}
	}

	fn pending(&self) -> MutexGuard<'_, PendingRequests> {
		self.pending.lock().unwrap_or_else(PoisonError::into_inner)
	}

	fn routes(&self) -> MutexGuard<'_, Vec<InboundRoute>> {
		self.routes.lock().unwrap_or_else(PoisonError::into_inner)
	}

	pub(super) fn expect_connack(&self, responder: ConnectResponder) {
		self.pending().connect = Some(responder);
	}

	/// Routes go in before the request so that messages redelivered right
	/// after CONNACK already find their consumer.
	pub(super) fn queue_subscribe(
		&self,
		filters: Vec<TopicFilterQos>,
		inbound: InboundSender,
		responder: SubscribeResponder,
	) {
		self.routes().extend(filters.iter().map(|f| InboundRoute {
			filter: f.filter.clone(),
			qos: f.qos,
			sender: inbound.clone(),
		}));
		self.pending().unsent_subscribes.push_back(PendingSubscribe {
			filters,
			inbound: Some(inbound),
			responder: Some(responder),
		});
	}

	/// Undoes the last [`queue_subscribe`](Self::queue_subscribe) after the
	/// request never reached the client.
	fn abandon_subscribe(&self, inbound: &InboundSender) {
		self.pending().unsent_subscribes.pop_back();
		self.routes().retain(|route| !route.sender.same_channel(inbound));
	}

	pub(super) fn queue_publish(&self, qos: Qos, responder: PublishResponder) {
		self.pending()
			.unsent_publishes
			.push_back(PendingPublish { qos, responder });
	}

	pub(super) fn subscribe_sent(&self, pkid: u16) {
		let mut pending = self.pending();
		match pending.unsent_subscribes.pop_front() {
			| Some(request) => {
				pending.subscribes.insert(pkid, request);
			}
			| None => {
				warn!(pkid, "SUBSCRIBE sent without a pending request");
			}
		}
	}

	pub(super) fn complete_subscribe(
		&self,
		pkid: u16,
		codes: &[SubscribeReasonCode],
	) {
		let Some(request) = self.pending().subscribes.remove(&pkid) else {
			debug!(pkid, "SUBACK for unknown packet id");
			return;
		};
		let outcomes: Vec<_> = request
			.filters
			.iter()
			.enumerate()
			.map(|(index, requested)| {
				let outcome = match codes.get(index) {
					| Some(SubscribeReasonCode::Success(qos)) => {
						FilterOutcome::Granted((*qos).into())
					}
					| Some(SubscribeReasonCode::Failure) => {
						FilterOutcome::Rejected(
							"broker returned failure reason code".to_string(),
						)
					}
					| None => FilterOutcome::Rejected(
						"SUBACK carried no reason code".to_string(),
					),
				};
				(requested.filter.clone(), outcome)
			})
			.collect();
		let ack = SubscribeAck { outcomes };

		if let Some(inbound) = &request.inbound {
			let mut routes = self.routes();
			for (filter, reason) in ack.rejected() {
				warn!(filter = %filter, reason, "Subscription rejected by broker");
				routes.retain(|route| {
					!(route.filter == *filter && route.sender.same_channel(inbound))
				});
			}
		}
		if let Some(responder) = request.responder {
			let _ = responder.send(Ok(ack));
		}
	}

	pub(super) fn publish_sent(&self, pkid: u16) {
		let mut pending = self.pending();
		if pkid != 0 && pending.publishes.contains_key(&pkid) {
			debug!(pkid, "Retransmitted PUBLISH");
			return;
		}
		let Some(request) = pending.unsent_publishes.pop_front() else {
			warn!(pkid, "PUBLISH sent without a pending request");
			return;
		};
		if request.qos == Qos::AtMostOnce {
			let _ = request.responder.send(Ok(PublishAck { qos: request.qos }));
		} else {
			pending.publishes.insert(pkid, request);
		}
	}

	pub(super) fn complete_publish(&self, pkid: u16) {
		match self.pending().publishes.remove(&pkid) {
			| Some(request) => {
				let _ =
					request.responder.send(Ok(PublishAck { qos: request.qos }));
			}
			| None => debug!(pkid, "Publish confirmation for unknown packet id"),
		}
	}

	pub(super) fn fail_in_flight_subscribes(&self, reason: &str) {
		let in_flight: Vec<_> =
			self.pending().subscribes.drain().map(|(_, r)| r).collect();
		for request in in_flight {
			if let Some(responder) = request.responder {
				let _ = responder
					.send(Err(BrokerError::Disconnected(reason.to_string())));
			}
		}
	}

	pub(super) fn fail_all_pending(&self, reason: &str) {
		let mut pending = std::mem::take(&mut *self.pending());
		let error = || BrokerError::Disconnected(reason.to_string());
		if let Some(responder) = pending.connect.take() {
			let _ = responder.send(Err(error()));
		}
		let subscribes = pending
			.unsent_subscribes
			.drain(..)
			.chain(pending.subscribes.drain().map(|(_, r)| r));
		for request in subscribes {
			if let Some(responder) = request.responder {
				let _ = responder.send(Err(error()));
			}
		}
		let publishes = pending
			.unsent_publishes
			.drain(..)
			.chain(pending.publishes.drain().map(|(_, r)| r));
		for request in publishes {
			let _ = request.responder.send(Err(error()));
		}
		self.routes().clear();
	}

	/// Hands `publish` to every consumer whose filter matches. Messages no
	/// route claims are acknowledged right away so the broker stops
	/// redelivering them.
	pub(super) fn dispatch(&self, client: &AsyncClient, publish: Publish) {
		let qos: Qos = publish.qos.into();
		let message = InboundMessage {
			topic: ArcStr::from(publish.topic.as_str()),
			payload: publish.payload.clone(),
			retain: publish.retain,
			duplicate: publish.dup,
			delivery: DeliveryTag {
				packet_id: publish.pkid,
				qos,
			},
		};

		let targets = self.route_targets(&publish.topic);
		if targets.is_empty() {
			warn!(topic = %publish.topic, "No subscription for inbound message, acknowledging");
			if let Err(err) = client.try_ack(&publish) {
				error!(topic = %publish.topic, error = %err, "Failed to acknowledge unrouted message");
			}
			return;
		}

		for sender in targets {
			match sender.try_send(message.clone()) {
				| Ok(()) => {}
				| Err(TrySendError::Closed(_)) => {
					debug!(topic = %publish.topic, "Consumer channel closed, message dropped");
				}
				| Err(TrySendError::Full(message)) => {
					let topic = publish.topic.clone();
					tokio::spawn(async move {
						if let Err(err) =
							sender.send_timeout(message, SLOW_DELIVERY_TIMEOUT).await
						{
							error!(topic = %topic, error = %err, "Slow consumer, inbound message dropped");
						}
					});
				}
			}
		}
	}

	/// Active filters, each once, in the order they were first subscribed
	pub(super) fn resubscribe_filters(&self) -> Vec<TopicFilterQos> {
		let mut filters: Vec<TopicFilterQos> = Vec::new();
		for route in self.routes().iter() {
			if !filters.iter().any(|f| f.filter == route.filter) {
				filters.push(TopicFilterQos {
					filter: route.filter.clone(),
					qos: route.qos,
				});
			}
		}
		filters
	}

	/// Channels of every route matching `topic`, each once
	pub(super) fn route_targets(&self, topic: &str) -> Vec<InboundSender> {
		let mut targets: Vec<InboundSender> = Vec::new();
		for route in self.routes().iter() {
			if route.filter.matches(topic)
				&& !targets.iter().any(|t| t.same_channel(&route.sender))
			{
				targets.push(route.sender.clone());
			}
		}
		targets
	}

	/// Re-issues SUBSCRIBE for every active route after a session was lost.
	pub(super) async fn resubscribe_all(&self, client: &AsyncClient) {
		let filters = self.resubscribe_filters();
		if filters.is_empty() {
			return;
		}
		let _order = self.request_order.lock().await;
		let request: Vec<_> = filters
			.iter()
			.map(|f| SubscribeFilter::new(f.filter.to_string(), f.qos.into()))
			.collect();
		self.pending().unsent_subscribes.push_back(PendingSubscribe {
			filters,
			inbound: None,
			responder: None,
		});
		if let Err(err) = client.subscribe_many(request).await {
			self.pending().unsent_subscribes.pop_back();
			error!(error = %err, "Failed to resubscribe after session loss");
		}
	}
}

struct RumqttClient {
	client_id: String,
	client: AsyncClient,
	event_loop: Mutex<Option<EventLoop>>,
	driver: Mutex<Option<JoinHandle<()>>>,
	shared: Arc<DriverShared>,
	cancel: CancellationToken,
}

#[async_trait]
impl BrokerClient for RumqttClient {
	fn client_id(&self) -> &str {
		&self.client_id
	}

	async fn connect(&self) -> Result<ConnAck, BrokerError> {
		let event_loop = self
			.event_loop
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.take()
			.ok_or(BrokerError::AlreadyStarted)?;
		let (tx, rx) = oneshot::channel();
		self.shared.expect_connack(tx);

		let driver = Driver {
			client_id: self.client_id.clone(),
			event_loop,
			client: self.client.clone(),
			shared: Arc::clone(&self.shared),
			cancel: self.cancel.clone(),
			ever_connected: false,
			attempt: 0,
			server_disconnect: false,
		};
		*self.driver.lock().unwrap_or_else(PoisonError::into_inner) =
			Some(tokio::spawn(driver.run()));

		rx.await.map_err(|_| {
			BrokerError::Disconnected("driver stopped before CONNACK".to_string())
		})?
	}

	async fn subscribe(
		&self,
		filters: Vec<TopicFilterQos>,
		inbound: InboundSender,
	) -> Result<SubscribeAck, BrokerError> {
		if filters.is_empty() {
			return Ok(SubscribeAck::default());
		}
		let (tx, rx) = oneshot::channel();
		{
			let _order = self.shared.request_order.lock().await;
			let request: Vec<_> = filters
				.iter()
				.map(|f| SubscribeFilter::new(f.filter.to_string(), f.qos.into()))
				.collect();
			self.shared.queue_subscribe(filters, inbound.clone(), tx);
			if let Err(err) = self.client.subscribe_many(request).await {
				self.shared.abandon_subscribe(&inbound);
				return Err(BrokerError::Request(err.to_string()));
			}
		}
		rx.await.map_err(|_| {
			BrokerError::Disconnected("subscribe response lost".to_string())
		})?
	}

	async fn publish(
		&self,
		message: OutboundMessage,
	) -> Result<PublishAck, BrokerError> {
		let (tx, rx) = oneshot::channel();
		{
			let _order = self.shared.request_order.lock().await;
			self.shared.queue_publish(message.qos, tx);
			if let Err(err) = self
				.client
				.publish_bytes(
					message.topic.as_str(),
					message.qos.into(),
					message.retain,
					message.payload,
				)
				.await
			{
				self.shared.pending().unsent_publishes.pop_back();
				return Err(BrokerError::Request(err.to_string()));
			}
		}
		rx.await.map_err(|_| {
			BrokerError::Disconnected("publish response lost".to_string())
		})?
	}

	async fn acknowledge(&self, message: &InboundMessage) -> Result<(), BrokerError> {
		if !message.requires_ack() {
			return Ok(());
		}
		let mut publish = Publish::new(
			message.topic.as_str(),
			message.delivery.qos.into(),
			Vec::<u8>::new(),
		);
		publish.pkid = message.delivery.packet_id;
		self.client
			.ack(&publish)
			.await
			.map_err(|err| BrokerError::Request(err.to_string()))
	}

	async fn disconnect(&self) -> Result<(), BrokerError> {
		let driver = self
			.driver
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.take();
		let Some(mut driver) = driver else {
			// Never started: dropping the event loop closes the request channel
			self.event_loop
				.lock()
				.unwrap_or_else(PoisonError::into_inner)
				.take();
			self.cancel.cancel();
			self.shared.fail_all_pending("client disconnected");
			return Ok(());
		};

		if let Err(err) = self.client.try_disconnect() {
			debug!(client_id = %self.client_id, error = %err, "Could not queue DISCONNECT");
		}
		match tokio::time::timeout(DISCONNECT_GRACE, &mut driver).await {
			| Ok(Ok(())) => {}
			| Ok(Err(err)) => {
				warn!(client_id = %self.client_id, error = %err, "Driver task failed");
			}
			| Err(_) => {
				warn!(
					client_id = %self.client_id,
					grace = ?DISCONNECT_GRACE,
					"DISCONNECT not flushed in time, cancelling driver"
				);
				self.cancel.cancel();
				if let Err(err) = driver.await {
					warn!(client_id = %self.client_id, error = %err, "Driver task failed");
				}
			}
		}
		self.shared.fail_all_pending("client disconnected");
		Ok(())
	}
}

struct Driver {
	client_id: String,
	event_loop: EventLoop,
	client: AsyncClient,
	shared: Arc<DriverShared>,
	cancel: CancellationToken,
	ever_connected: bool,
	attempt: u32,
	server_disconnect: bool,
}

impl Driver {
	async fn run(mut self) {
		loop {
			let polled = tokio::select! {
				_ = self.cancel.cancelled() => {
					info!(client_id = %self.client_id, "Driver cancelled");
					break;
				}
				polled = self.event_loop.poll() => polled,
			};
			match polled {
				| Ok(Incoming(Packet::ConnAck(ack))) => {
					self.on_connack(ack.session_present);
				}
				| Ok(Incoming(Packet::Publish(publish))) => {
					self.shared.dispatch(&self.client, publish);
				}
				| Ok(Incoming(Packet::SubAck(ack))) => {
					self.shared.complete_subscribe(ack.pkid, &ack.return_codes);
				}
				| Ok(Incoming(Packet::PubAck(ack))) => {
					self.shared.complete_publish(ack.pkid);
				}
				| Ok(Incoming(Packet::PubComp(comp))) => {
					self.shared.complete_publish(comp.pkid);
				}
				| Ok(Incoming(Packet::Disconnect)) => {
					info!(client_id = %self.client_id, "Received MQTT Disconnect packet from server");
					self.server_disconnect = true;
				}
				| Ok(Outgoing(rumqttc::Outgoing::Subscribe(pkid))) => {
					self.shared.subscribe_sent(pkid);
				}
				| Ok(Outgoing(rumqttc::Outgoing::Publish(pkid))) => {
					self.shared.publish_sent(pkid);
				}
				| Ok(Outgoing(rumqttc::Outgoing::Disconnect)) => {
					info!(client_id = %self.client_id, "Sent MQTT Disconnect packet to server");
					break;
				}
				| Ok(notification) => {
					debug!(client_id = %self.client_id, notification = ?notification, "MQTT notification");
				}
				| Err(err) => {
					if !self.on_connection_error(err).await {
						break;
					}
				}
			}
		}
		self.shared.fail_all_pending("event loop stopped");
		info!(client_id = %self.client_id, "MQTT driver terminated");
	}

	fn on_connack(&mut self, session_present: bool) {
		let first = !self.ever_connected;
		self.ever_connected = true;
		self.attempt = 0;
		self.server_disconnect = false;

		let ack = ConnAck { session_present };
		if let Some(responder) = self.shared.pending().connect.take() {
			let _ = responder.send(Ok(ack));
		}
		info!(client_id = %self.client_id, session_present, first, "MQTT connection established");
		self.shared.listener.on_connected(&ack);

		if !first && !session_present {
			info!(client_id = %self.client_id, "Reconnected without session, resubscribing");
			let shared = Arc::clone(&self.shared);
			let client = self.client.clone();
			tokio::spawn(async move { shared.resubscribe_all(&client).await });
		}
	}

	/// Returns whether the driver keeps polling.
	async fn on_connection_error(&mut self, err: ConnectionError) -> bool {
		let source = if self.server_disconnect
			|| matches!(err, ConnectionError::ConnectionRefused(_))
		{
			DisconnectSource::Server
		} else {
			DisconnectSource::Client
		};
		let event = DisconnectEvent {
			source,
			cause: err.to_string(),
			ever_connected: self.ever_connected,
			attempt: self.attempt,
		};
		self.attempt = self.attempt.saturating_add(1);
		self.server_disconnect = false;
		warn!(
			client_id = %self.client_id,
			error = %err,
			source = ?source,
			attempt = event.attempt,
			"MQTT connection lost"
		);

		if !self.ever_connected {
			if let Some(responder) = self.shared.pending().connect.take() {
				let error = match &err {
					| ConnectionError::ConnectionRefused(code) => {
						BrokerError::ConnectionRefused(format!("{code:?}"))
					}
					| other => BrokerError::Network(other.to_string()),
				};
				let _ = responder.send(Err(error));
			}
		}
		self.shared.fail_in_flight_subscribes(&event.cause);

		match self.shared.listener.on_disconnected(&event) {
			| ReconnectDirective::Stop => false,
			| ReconnectDirective::ReconnectAfter(delay) => {
				debug!(client_id = %self.client_id, delay = ?delay, "Reconnecting after delay");
				tokio::select! {
					_ = self.cancel.cancelled() => false,
					_ = tokio::time::sleep(delay) => true,
				}
			}
		}
	}
}
