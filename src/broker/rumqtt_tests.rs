use std::sync::Arc;

use rumqttc::{AsyncClient, EventLoop, MqttOptions, Publish, QoS, SubscribeReasonCode};
use tokio::sync::{mpsc, oneshot};

use super::rumqtt::{DriverShared, build_mqtt_options, url_with_client_id};
use super::{
	BrokerError, FilterOutcome, InboundReceiver, InboundSender, PublishAck,
	Qos, SubscribeAck, TopicFilterQos,
};
use crate::config::SUPPORTED_SCHEMES;
use crate::test_support::{RecordingListener, options};
use crate::topic::TopicFilter;

type SubscribeReply = oneshot::Receiver<Result<SubscribeAck, BrokerError>>;
type PublishReply = oneshot::Receiver<Result<PublishAck, BrokerError>>;

fn shared() -> DriverShared {
	DriverShared::new(Arc::new(RecordingListener::default()))
}

fn filters(names: &[&str]) -> Vec<TopicFilterQos> {
	names
		.iter()
		.map(|name| TopicFilterQos {
			filter: TopicFilter::parse(*name).unwrap(),
			qos: Qos::AtLeastOnce,
		})
		.collect()
}

fn inbound() -> (InboundSender, InboundReceiver) {
	mpsc::channel(8)
}

fn subscribe(
	shared: &DriverShared,
	names: &[&str],
	inbound: &InboundSender,
) -> SubscribeReply {
	let (tx, rx) = oneshot::channel();
	shared.queue_subscribe(filters(names), inbound.clone(), tx);
	rx
}

fn publish(shared: &DriverShared, qos: Qos) -> PublishReply {
	let (tx, rx) = oneshot::channel();
	shared.queue_publish(qos, tx);
	rx
}

/// Client that is never polled, so requests pile up in its channel
fn idle_client(capacity: usize) -> (AsyncClient, EventLoop) {
	AsyncClient::new(MqttOptions::new("rumqtt-test", "localhost", 1883), capacity)
}

fn incoming(topic: &str, qos: QoS, pkid: u16) -> Publish {
	let mut publish = Publish::new(topic, qos, "21.5");
	publish.pkid = pkid;
	publish
}

fn channel_is_empty(client: &AsyncClient) -> bool {
	client.try_publish("status/free-slot", QoS::AtMostOnce, false, "x").is_ok()
}

#[test]
fn every_supported_scheme_builds_options() {
	for scheme in SUPPORTED_SCHEMES {
		let mut options = options("plant-7");
		options.uri = format!("{scheme}://broker.local:1883");
		assert!(build_mqtt_options(&options).is_ok(), "scheme {scheme}");
	}
}

#[test]
fn client_id_survives_url_round_trip() {
	for client_id in ["a#b", "plant 7&x=1", "line=3", "100%", "zone/7?"] {
		let mut options = options(client_id);
		options.uri = "tcp://broker.local:1883".to_string();
		let mqtt_options = build_mqtt_options(&options).unwrap();
		assert_eq!(mqtt_options.client_id(), client_id);
	}
}

#[test]
fn client_id_is_appended_to_existing_query() {
	assert_eq!(
		url_with_client_id("tcp://broker:1883?clean_session=true", "a b#c"),
		"tcp://broker:1883?clean_session=true&client_id=a+b%23c"
	);
	assert_eq!(
		url_with_client_id("tcp://broker:1883", "plant-7"),
		"tcp://broker:1883?client_id=plant-7"
	);
}

#[test]
fn suback_resolves_and_prunes_rejected_routes() {
	let shared = shared();
	let (sender, _receiver) = inbound();
	let mut reply = subscribe(&shared, &["plant/+/telemetry", "plant/alarms/#"], &sender);

	shared.subscribe_sent(7);
	assert!(reply.try_recv().is_err());
	shared.complete_subscribe(7, &[
		SubscribeReasonCode::Success(QoS::AtLeastOnce),
		SubscribeReasonCode::Failure,
	]);

	let ack = reply.try_recv().unwrap().unwrap();
	assert_eq!(ack.outcomes[0].1, FilterOutcome::Granted(Qos::AtLeastOnce));
	assert!(matches!(ack.outcomes[1].1, FilterOutcome::Rejected(_)));
	assert_eq!(shared.route_targets("plant/boiler/telemetry").len(), 1);
	assert!(shared.route_targets("plant/alarms/fire").is_empty());
}

#[test]
fn rejection_prunes_only_the_requesting_consumer() {
	let shared = shared();
	let (first, _first_rx) = inbound();
	let (second, _second_rx) = inbound();
	let _kept = subscribe(&shared, &["plant/#"], &first);
	let _pruned = subscribe(&shared, &["plant/#"], &second);
	shared.subscribe_sent(1);
	shared.subscribe_sent(2);

	shared.complete_subscribe(2, &[SubscribeReasonCode::Failure]);

	let targets = shared.route_targets("plant/pump");
	assert_eq!(targets.len(), 1);
	assert!(targets[0].same_channel(&first));
}

#[test]
fn missing_reason_code_rejects_filter() {
	let shared = shared();
	let (sender, _receiver) = inbound();
	let mut reply = subscribe(&shared, &["a", "b"], &sender);
	shared.subscribe_sent(3);

	shared.complete_subscribe(3, &[SubscribeReasonCode::Success(QoS::AtMostOnce)]);

	let ack = reply.try_recv().unwrap().unwrap();
	let rejected: Vec<_> = ack.rejected().map(|(f, r)| (f.as_str(), r)).collect();
	assert_eq!(rejected, vec![("b", "SUBACK carried no reason code")]);
}

#[test]
fn subacks_are_matched_by_packet_id() {
	let shared = shared();
	let (sender, _receiver) = inbound();
	let mut first = subscribe(&shared, &["a"], &sender);
	let mut second = subscribe(&shared, &["b"], &sender);
	shared.subscribe_sent(10);
	shared.subscribe_sent(11);

	shared.complete_subscribe(11, &[SubscribeReasonCode::Success(QoS::AtLeastOnce)]);
	shared.complete_subscribe(42, &[SubscribeReasonCode::Failure]);

	assert!(first.try_recv().is_err());
	let ack = second.try_recv().unwrap().unwrap();
	assert_eq!(ack.outcomes[0].0.as_str(), "b");
}

#[test]
fn qos0_publish_resolves_when_sent() {
	let shared = shared();
	let mut reply = publish(&shared, Qos::AtMostOnce);

	shared.publish_sent(0);

	assert_eq!(
		reply.try_recv().unwrap(),
		Ok(PublishAck { qos: Qos::AtMostOnce })
	);
}

#[test]
fn retransmitted_publish_keeps_queue_order() {
	let shared = shared();
	let mut first = publish(&shared, Qos::AtLeastOnce);
	let mut second = publish(&shared, Qos::ExactlyOnce);

	shared.publish_sent(5);
	shared.publish_sent(5);
	shared.publish_sent(6);

	shared.complete_publish(6);
	assert!(first.try_recv().is_err());
	assert_eq!(
		second.try_recv().unwrap(),
		Ok(PublishAck { qos: Qos::ExactlyOnce })
	);

	shared.complete_publish(5);
	assert_eq!(
		first.try_recv().unwrap(),
		Ok(PublishAck { qos: Qos::AtLeastOnce })
	);
}

#[test]
fn confirmation_for_unknown_packet_is_ignored() {
	let shared = shared();
	let mut reply = publish(&shared, Qos::AtLeastOnce);
	shared.publish_sent(9);

	shared.complete_publish(8);
	shared.complete_publish(9);
	shared.complete_publish(9);

	assert!(reply.try_recv().unwrap().is_ok());
}

#[test]
fn lost_connection_fails_only_sent_subscribes() {
	let shared = shared();
	let (sender, _receiver) = inbound();
	let mut sent = subscribe(&shared, &["a"], &sender);
	let mut unsent = subscribe(&shared, &["b"], &sender);
	shared.subscribe_sent(1);

	shared.fail_in_flight_subscribes("connection reset");

	assert_eq!(
		sent.try_recv().unwrap(),
		Err(BrokerError::Disconnected("connection reset".to_string()))
	);
	assert!(unsent.try_recv().is_err());
	shared.subscribe_sent(2);
	shared.complete_subscribe(2, &[SubscribeReasonCode::Success(QoS::AtLeastOnce)]);
	assert!(unsent.try_recv().unwrap().is_ok());
}

#[test]
fn fail_all_pending_resolves_every_request_once() {
	let shared = shared();
	let (sender, _receiver) = inbound();
	let (connect_tx, mut connect) = oneshot::channel();
	shared.expect_connack(connect_tx);
	let mut sent_subscribe = subscribe(&shared, &["a"], &sender);
	let mut unsent_subscribe = subscribe(&shared, &["b"], &sender);
	let mut sent_publish = publish(&shared, Qos::AtLeastOnce);
	let mut unsent_publish = publish(&shared, Qos::AtLeastOnce);
	shared.subscribe_sent(1);
	shared.publish_sent(2);

	shared.fail_all_pending("client disconnected");

	let gone = || BrokerError::Disconnected("client disconnected".to_string());
	assert_eq!(connect.try_recv().unwrap(), Err(gone()));
	assert_eq!(sent_subscribe.try_recv().unwrap(), Err(gone()));
	assert_eq!(unsent_subscribe.try_recv().unwrap(), Err(gone()));
	assert_eq!(sent_publish.try_recv().unwrap(), Err(gone()));
	assert_eq!(unsent_publish.try_recv().unwrap(), Err(gone()));
	assert!(shared.route_targets("a").is_empty());

	// Late acknowledgements find nothing to resolve
	shared.complete_subscribe(1, &[SubscribeReasonCode::Success(QoS::AtLeastOnce)]);
	shared.complete_publish(2);
	shared.fail_all_pending("again");
	let (tx, mut late) = oneshot::channel();
	shared.queue_publish(Qos::AtMostOnce, tx);
	shared.publish_sent(0);
	assert!(late.try_recv().unwrap().is_ok());
}

#[test]
fn resubscribe_filters_are_deduplicated() {
	let shared = shared();
	let (first, _first_rx) = inbound();
	let (second, _second_rx) = inbound();
	let _a = subscribe(&shared, &["plant/#", "plant/+/telemetry"], &first);
	let _b = subscribe(&shared, &["plant/#", "site/alarms"], &second);

	let names: Vec<_> = shared
		.resubscribe_filters()
		.iter()
		.map(|f| f.filter.as_str().to_string())
		.collect();

	assert_eq!(names, vec!["plant/#", "plant/+/telemetry", "site/alarms"]);
}

#[tokio::test]
async fn resubscribe_is_queued_ahead_of_later_requests() {
	let shared = shared();
	let (client, _event_loop) = idle_client(10);
	let (sender, _receiver) = inbound();
	let _initial = subscribe(&shared, &["plant/#"], &sender);
	shared.subscribe_sent(1);
	shared.complete_subscribe(1, &[SubscribeReasonCode::Success(QoS::AtLeastOnce)]);

	shared.resubscribe_all(&client).await;
	let mut later = subscribe(&shared, &["site/#"], &sender);
	shared.subscribe_sent(2);
	shared.subscribe_sent(3);

	// A failed resubscribe has no consumer to prune
	shared.complete_subscribe(2, &[SubscribeReasonCode::Failure]);
	assert_eq!(shared.route_targets("plant/pump").len(), 1);
	shared.complete_subscribe(3, &[SubscribeReasonCode::Success(QoS::AtLeastOnce)]);
	assert!(later.try_recv().unwrap().is_ok());
}

#[tokio::test]
async fn resubscribe_without_routes_sends_nothing() {
	let shared = shared();
	let (client, _event_loop) = idle_client(10);

	shared.resubscribe_all(&client).await;

	let (sender, _receiver) = inbound();
	let mut first = subscribe(&shared, &["a"], &sender);
	shared.subscribe_sent(1);
	shared.complete_subscribe(1, &[SubscribeReasonCode::Success(QoS::AtLeastOnce)]);
	assert!(first.try_recv().unwrap().is_ok());
}

#[tokio::test]
async fn dispatch_delivers_once_per_consumer() {
	let shared = shared();
	let (client, _event_loop) = idle_client(1);
	let (first, mut first_rx) = inbound();
	let (second, mut second_rx) = inbound();
	let _a = subscribe(&shared, &["plant/+/telemetry", "plant/#"], &first);
	let _b = subscribe(&shared, &["plant/boiler/#"], &second);

	shared.dispatch(&client, incoming("plant/boiler/telemetry", QoS::AtLeastOnce, 4));

	for receiver in [&mut first_rx, &mut second_rx] {
		let message = receiver.try_recv().unwrap();
		assert_eq!(message.topic.as_str(), "plant/boiler/telemetry");
		assert_eq!(message.delivery.packet_id, 4);
		assert_eq!(message.delivery.qos, Qos::AtLeastOnce);
		assert!(receiver.try_recv().is_err());
	}
	// Routed messages are acknowledged by their consumer, not here
	assert!(channel_is_empty(&client));
}

#[tokio::test]
async fn unrouted_message_is_acknowledged() {
	let shared = shared();
	let (client, _event_loop) = idle_client(1);
	let (sender, mut receiver) = inbound();
	let _routes = subscribe(&shared, &["plant/#"], &sender);

	shared.dispatch(&client, incoming("site/door", QoS::AtLeastOnce, 11));

	assert!(receiver.try_recv().is_err());
	assert!(!channel_is_empty(&client));
}

#[tokio::test]
async fn closed_consumer_drops_message_without_ack() {
	let shared = shared();
	let (client, _event_loop) = idle_client(1);
	let (sender, receiver) = inbound();
	let _routes = subscribe(&shared, &["plant/#"], &sender);
	drop(receiver);

	shared.dispatch(&client, incoming("plant/pump", QoS::AtLeastOnce, 12));

	assert!(channel_is_empty(&client));
}
