//! End-to-end runs of a connection against the loopback broker

mod common;

use std::time::Duration;

use common::{RecordingSink, eventually, spawn};
use mqtt_connectivity::{
	AckOutcome, ConnectionConfig, ConnectionState, LoopbackBroker, OutboundSignal, Qos,
	SendError, SendOutcome, Target,
};

const PLANT_CONFIG: &str = r#"{
	"id": "plant-7",
	"uri": "tcp://loopback:1883",
	"sources": [
		{
			"addresses": [{ "filter": "plant/+/telemetry" }],
			"qos": 1,
			"enforcement": { "input": "{{ source:topic }}", "filters": ["plant/{{ thing:name }}/telemetry"] }
		},
		{ "addresses": [{ "filter": "plant/alarms/#" }], "qos": 1 }
	],
	"targets": [{ "address": "plant/commands", "ack_label": "delivered" }],
	"protocol": { "separate_publisher_client": true, "publish_queue_capacity": 2 }
}"#;

fn plant_config() -> ConnectionConfig {
	ConnectionConfig::from_json(PLANT_CONFIG).unwrap()
}

#[tokio::test(start_paused = true)]
async fn inbound_messages_reach_sink_with_source_metadata() {
	let broker = LoopbackBroker::new();
	let (sink, mut seen) = RecordingSink::new(AckOutcome::Acknowledged);
	let (_task, handle) = spawn(&broker, plant_config(), sink);
	handle.connect().await.unwrap();

	assert_eq!(broker.registration_count("plant-7"), 2);
	assert_eq!(broker.registration_count("plant-7p"), 0);

	assert_eq!(broker.inject("plant/boiler/telemetry", "21.5", Qos::AtLeastOnce), 1);
	let delivery = seen.recv().await.unwrap();
	assert_eq!(delivery.connection_id.as_str(), "plant-7");
	assert_eq!(delivery.source_index, 0);
	assert_eq!(delivery.message.topic.as_str(), "plant/boiler/telemetry");
	assert_eq!(
		delivery.enforcement.as_deref().map(|e| e.input.as_str()),
		Some("{{ source:topic }}")
	);

	assert_eq!(broker.inject("plant/alarms/fire", "!", Qos::AtLeastOnce), 1);
	let delivery = seen.recv().await.unwrap();
	assert_eq!(delivery.source_index, 1);
	assert!(delivery.enforcement.is_none());

	eventually("both acknowledged", || broker.acknowledged_count("plant-7") == 2).await;
}

#[tokio::test(start_paused = true)]
async fn permanently_rejected_messages_are_acknowledged() {
	let broker = LoopbackBroker::new();
	let (sink, mut seen) =
		RecordingSink::new(AckOutcome::RejectedPermanently("no such thing".to_string()));
	let (_task, handle) = spawn(&broker, plant_config(), sink);
	handle.connect().await.unwrap();

	broker.inject("plant/pump/telemetry", "x", Qos::AtLeastOnce);
	broker.inject("plant/pump/telemetry", "y", Qos::AtMostOnce);
	seen.recv().await.unwrap();
	seen.recv().await.unwrap();

	eventually("rejection acknowledged", || broker.acknowledged_count("plant-7") == 1).await;
	assert_eq!(handle.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn publishes_keep_order_and_overflow_fails_fast() {
	let broker = LoopbackBroker::new();
	let (sink, _seen) = RecordingSink::new(AckOutcome::Acknowledged);
	let (_task, handle) = spawn(&broker, plant_config(), sink);
	handle.connect().await.unwrap();
	let target = Target::new("plant/commands").with_ack_label("delivered");

	broker.hold_publishes();
	let first = handle.publish(&OutboundSignal::new("s1", "1"), &target);
	broker.wait_for_in_flight(1).await;
	let second = handle.publish(&OutboundSignal::new("s2", "2"), &target);
	let third = handle.publish(&OutboundSignal::new("s3", "3"), &target);
	let overflow = handle.publish(&OutboundSignal::new("s4", "4"), &target);

	assert_eq!(overflow.await, Err(SendError::Overflow));
	broker.release_publishes();

	for (receipt, id) in [(first, "s1"), (second, "s2"), (third, "s3")] {
		let outcome = receipt.await.unwrap();
		assert_eq!(outcome.signal_id(), id);
		assert!(matches!(outcome, SendOutcome::Acknowledged(_)));
	}
	let payloads: Vec<_> = broker
		.published()
		.into_iter()
		.map(|m| String::from_utf8(m.payload.to_vec()).unwrap())
		.collect();
	assert_eq!(payloads, vec!["1", "2", "3"]);
}

#[tokio::test(start_paused = true)]
async fn disconnect_fails_queued_publishes_and_stops_delivery() {
	let broker = LoopbackBroker::new();
	let (sink, mut seen) = RecordingSink::new(AckOutcome::Acknowledged);
	let (_task, handle) = spawn(&broker, plant_config(), sink);
	handle.connect().await.unwrap();
	let target = Target::new("plant/commands");

	broker.hold_publishes();
	let held = handle.publish(&OutboundSignal::new("s1", "1"), &target);
	broker.wait_for_in_flight(1).await;
	let queued = handle.publish(&OutboundSignal::new("s2", "2"), &target);

	handle.disconnect().await.unwrap();

	assert_eq!(held.await, Err(SendError::PublisherStopped));
	assert_eq!(queued.await, Err(SendError::PublisherStopped));
	assert_eq!(broker.inject("plant/boiler/telemetry", "late", Qos::AtLeastOnce), 0);
	assert!(seen.try_recv().is_err());
	assert_eq!(
		handle.publish(&OutboundSignal::new("s3", "3"), &target).await,
		Err(SendError::NotConnected)
	);
}

#[tokio::test(start_paused = true)]
async fn reconnects_after_disconnect() {
	let broker = LoopbackBroker::new();
	let (sink, _seen) = RecordingSink::new(AckOutcome::Acknowledged);
	let (_task, handle) = spawn(&broker, plant_config(), sink);

	for round in 1..=3 {
		handle.connect().await.unwrap();
		assert_eq!(broker.connected_clients(), 2);
		handle.disconnect().await.unwrap();
		assert_eq!(broker.connected_clients(), 0);
		assert_eq!(broker.disconnect_count("plant-7"), round);
	}
	tokio::time::sleep(Duration::from_secs(60)).await;
	assert_eq!(broker.total_registrations(), 0);
}
