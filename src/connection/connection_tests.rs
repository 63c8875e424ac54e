use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use super::*;
use crate::backoff::{BackoffConfig, ExponentialBackoff};
use crate::broker::{BrokerError, DisconnectEvent, DisconnectSource, LoopbackBroker};
use crate::config::{
	ConnectionConfig, ConnectorSettings, LastWillConfig, ProtocolConfig,
};

fn config(separate: bool) -> ConnectionConfig {
	ConnectionConfig::new("conn-1", "tcp://broker:1883").with_protocol(ProtocolConfig {
		separate_publisher_client: separate,
		keep_alive: Some(Duration::from_secs(30)),
		last_will: Some(LastWillConfig::new("status/conn-1", "offline")),
		reconnect_for_redelivery: true,
		..ProtocolConfig::default()
	})
}

fn settings() -> ConnectorSettings {
	ConnectorSettings {
		min_server_disconnect_delay: Duration::from_secs(3),
		backoff: BackoffConfig::Exponential {
			initial: Duration::from_millis(100),
			multiplier: 2.0,
			max: Duration::from_secs(60),
		},
		..ConnectorSettings::default()
	}
}

fn create(
	broker: &LoopbackBroker,
	config: ConnectionConfig,
	mode: SetMode,
) -> (ClientConnectionSet, mpsc::UnboundedReceiver<HandleEvent>) {
	let (events, rx) = mpsc::unbounded_channel();
	let set = ClientConnectionSet::create(
		Arc::new(broker.clone()),
		Arc::new(config),
		Arc::new(settings()),
		7,
		events,
		mode,
	)
	.unwrap();
	(set, rx)
}

fn event(source: DisconnectSource, ever_connected: bool, attempt: u32) -> DisconnectEvent {
	DisconnectEvent {
		source,
		cause: "gone".to_string(),
		ever_connected,
		attempt,
	}
}

#[test]
fn shared_handle_carries_everything() {
	let broker = LoopbackBroker::new();
	let (set, _events) = create(&broker, config(false), SetMode::Live);

	assert!(!set.has_separate_publisher());
	assert_eq!(set.handles().count(), 1);
	assert_eq!(set.consumer().id(), set.publisher().id());
	assert_eq!(set.consumer().role(), HandleRole::Shared);

	let options = broker.client_options("conn-1").unwrap();
	assert!(options.manual_acks);
	assert!(!options.clean_session);
	assert_eq!(options.keep_alive, Some(Duration::from_secs(30)));
	assert!(options.last_will.is_some());
}

#[test]
fn separate_publisher_gets_will_and_suffixed_id() {
	let broker = LoopbackBroker::new();
	let (set, _events) = create(&broker, config(true), SetMode::Live);

	assert!(set.has_separate_publisher());
	assert_eq!(set.consumer().client_id(), "conn-1");
	assert_eq!(set.publisher().client_id(), "conn-1p");
	assert_eq!(set.generation(), 7);
	assert!(set.owns(set.publisher().id()));

	let consumer = broker.client_options("conn-1").unwrap();
	assert!(consumer.manual_acks);
	assert!(consumer.last_will.is_none());

	let publisher = broker.client_options("conn-1p").unwrap();
	assert!(!publisher.manual_acks);
	assert_eq!(
		publisher.last_will.map(|will| will.topic),
		Some("status/conn-1".to_string())
	);
}

#[test]
fn probe_mode_overrides_session_settings() {
	let broker = LoopbackBroker::new();
	let (set, _events) = create(&broker, config(false), SetMode::probe());

	let client_id = set.consumer().client_id().to_string();
	assert!(client_id.starts_with("conn-1-probe-"), "{client_id}");
	let options = broker.client_options(&client_id).unwrap();
	assert!(options.clean_session);
	assert_eq!(options.keep_alive, None);
	assert!(options.last_will.is_none());
}

#[test]
fn create_fails_on_invalid_client() {
	let broker = LoopbackBroker::new();
	let (events, _rx) = mpsc::unbounded_channel();
	let result = ClientConnectionSet::create(
		Arc::new(broker),
		Arc::new(ConnectionConfig::new("", "tcp://broker")),
		Arc::new(settings()),
		1,
		events,
		SetMode::Live,
	);
	assert!(result.is_err());
}

#[test]
fn decide_follows_token_and_history() {
	let state = HandleState::new(Box::new(ExponentialBackoff::new(
		Duration::from_millis(100),
		2.0,
		Duration::from_secs(10),
	)));
	let minimum = Duration::from_secs(1);

	assert_eq!(
		state.decide(&event(DisconnectSource::Client, false, 0), true, minimum),
		DisconnectDecision::HandshakeFailed
	);
	assert_eq!(
		state.decide(&event(DisconnectSource::Client, true, 0), false, minimum),
		DisconnectDecision::Lost
	);
	assert_eq!(
		state.decide(&event(DisconnectSource::Client, true, 0), true, minimum),
		DisconnectDecision::Reconnect(Duration::from_millis(100))
	);
	assert_eq!(
		state.decide(&event(DisconnectSource::Client, true, 1), true, minimum),
		DisconnectDecision::Reconnect(Duration::from_millis(200))
	);
	assert_eq!(
		state.decide(&event(DisconnectSource::Server, true, 2), true, minimum),
		DisconnectDecision::Reconnect(minimum)
	);
	assert_eq!(
		state.decide(&event(DisconnectSource::Client, true, 0), true, minimum),
		DisconnectDecision::Reconnect(Duration::from_millis(100))
	);

	state.set_reconnect_token();
	assert!(state.reconnect_token());
	assert_eq!(
		state.decide(&event(DisconnectSource::Server, true, 0), true, minimum),
		DisconnectDecision::Intentional
	);
}

#[tokio::test(start_paused = true)]
async fn server_drop_reconnects_no_faster_than_minimum() {
	let broker = LoopbackBroker::new();
	let (set, mut events) = create(&broker, config(false), SetMode::Live);
	set.consumer().client().connect().await.unwrap();
	assert!(matches!(
		events.recv().await.unwrap().kind,
		HandleEventKind::Connected(_)
	));

	broker.drop_connection("conn-1", DisconnectSource::Server);
	let reconnecting = events.recv().await.unwrap();
	assert_eq!(reconnecting.generation, 7);
	match reconnecting.kind {
		| HandleEventKind::Reconnecting { delay, .. } => {
			assert_eq!(delay, Duration::from_secs(3))
		}
		| other => panic!("unexpected event {other:?}"),
	}

	let started = tokio::time::Instant::now();
	assert!(matches!(
		events.recv().await.unwrap().kind,
		HandleEventKind::Connected(_)
	));
	assert!(started.elapsed() >= Duration::from_secs(3));
	assert_eq!(broker.connect_count("conn-1"), 2);
}

#[tokio::test(start_paused = true)]
async fn publisher_handshake_failure_is_reported_without_waiting() {
	let broker = LoopbackBroker::new();
	let (set, _events) = create(&broker, config(true), SetMode::Live);
	broker.fail_next_connect(BrokerError::ConnectionRefused("bad credentials".to_string()));
	let started = tokio::time::Instant::now();

	let result =
		connect_after_delay(set.consumer(), Some(set.publisher()), Duration::from_secs(5)).await;

	let failure = result.unwrap_err();
	assert_eq!(failure.client_id, "conn-1p");
	assert_eq!(
		failure.error,
		BrokerError::ConnectionRefused("bad credentials".to_string())
	);
	assert!(started.elapsed() < Duration::from_secs(5));
	assert_eq!(broker.connect_count("conn-1"), 0);
}

#[tokio::test(start_paused = true)]
async fn consumer_connects_after_delay() {
	let broker = LoopbackBroker::new();
	let (set, _events) = create(&broker, config(true), SetMode::Live);
	let started = tokio::time::Instant::now();

	connect_after_delay(set.consumer(), Some(set.publisher()), Duration::from_secs(5))
		.await
		.unwrap();

	assert!(started.elapsed() >= Duration::from_secs(5));
	assert_eq!(broker.connect_count("conn-1"), 1);
	assert_eq!(broker.connect_count("conn-1p"), 1);
}

#[tokio::test]
async fn intentional_disconnect_posts_nothing() {
	let broker = LoopbackBroker::new();
	let (set, mut events) = create(&broker, config(false), SetMode::Live);
	set.consumer().client().connect().await.unwrap();
	events.recv().await.unwrap();

	set.disconnect_all().await;
	broker.drop_connection("conn-1", DisconnectSource::Server);

	assert!(set.consumer().state().reconnect_token());
	assert_eq!(broker.disconnect_count("conn-1"), 1);
	assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn cycle_replaces_only_the_consumer() {
	let broker = LoopbackBroker::new();
	let (mut set, _events) = create(&broker, config(true), SetMode::Live);
	set.consumer().client().connect().await.unwrap();
	set.publisher().client().connect().await.unwrap();
	let old_id = set.consumer().id();
	let publisher_id = set.publisher().id();

	let fresh = set.cycle_consumer().await.unwrap();
	assert_ne!(fresh.id(), old_id);
	assert_eq!(fresh.client_id(), "conn-1");
	assert!(!fresh.state().reconnect_token());
	assert_eq!(set.publisher().id(), publisher_id);
	assert!(!set.owns(old_id));
	assert_eq!(broker.disconnect_count("conn-1"), 1);
	assert_eq!(broker.disconnect_count("conn-1p"), 0);
	assert!(broker.is_connected("conn-1p"));
}

#[tokio::test]
async fn shared_handle_cannot_cycle() {
	let broker = LoopbackBroker::new();
	let (mut set, _events) = create(&broker, config(false), SetMode::Live);
	assert!(set.cycle_consumer().await.is_err());
}
