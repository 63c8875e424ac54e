use std::collections::HashMap;
use std::time::Duration;

use super::*;
use crate::backoff::BackoffConfig;
use crate::broker::Qos;
use crate::topic::TopicFilterError;

const FULL_CONFIG: &str = r#"{
	"id": "plant-7",
	"uri": "mqtts://broker.example.com:8883",
	"credentials": { "username": "twin", "password": "secret" },
	"client_id": { "fixed": "plant-7-consumer" },
	"sources": [
		{
			"addresses": [
				{ "filter": "plant/+/telemetry" },
				{ "filter": "plant/alarms/#", "qos": 1 }
			],
			"qos": 0
		}
	],
	"targets": [
		{ "address": "plant/commands", "qos": 2, "ack_label": "delivered" }
	],
	"failover_enabled": false,
	"protocol": {
		"keep_alive": 30000,
		"reconnect_for_redelivery": true,
		"reconnect_for_redelivery_delay": 5000,
		"separate_publisher_client": true,
		"publish_queue_capacity": 16,
		"last_will": { "topic": "plant/status", "payload": "offline", "retain": true }
	}
}"#;

#[test]
fn parses_full_document() {
	let config = ConnectionConfig::from_json(FULL_CONFIG).unwrap();

	assert_eq!(config.client_id(), "plant-7-consumer");
	assert_eq!(config.publisher_client_id(), "plant-7-consumerp");
	assert!(config.uses_tls());
	assert!(!config.failover_enabled);
	assert_eq!(config.protocol.keep_alive, Some(Duration::from_secs(30)));
	assert_eq!(
		config.protocol.reconnect_for_redelivery_delay,
		Duration::from_secs(5)
	);
	assert_eq!(config.protocol.publish_queue_capacity, 16);

	let will = config.protocol.last_will.as_ref().unwrap();
	assert_eq!(will.qos, Qos::AtMostOnce);
	assert!(will.retain);

	let target = &config.targets[0];
	assert_eq!(target.effective_qos(), Qos::ExactlyOnce);
	assert_eq!(target.ack_label.as_deref(), Some("delivered"));
}

#[test]
fn minimal_document_uses_defaults() {
	let config =
		ConnectionConfig::from_json(r#"{"id":"c1","uri":"tcp://localhost:1883"}"#)
			.unwrap();

	assert_eq!(config.client_id(), "c1");
	assert_eq!(config.publisher_client_id(), "c1p");
	assert!(config.failover_enabled);
	assert!(!config.uses_tls());
	assert_eq!(config.protocol, ProtocolConfig::default());
	assert_eq!(
		config.protocol.publish_queue_capacity,
		DEFAULT_PUBLISH_QUEUE_CAPACITY
	);
}

#[test]
fn configured_publisher_id_wins() {
	let config = ConnectionConfig::new("c1", "tcp://localhost").with_protocol(
		ProtocolConfig {
			publisher_id: Some("pub-1".into()),
			..ProtocolConfig::default()
		},
	);
	assert_eq!(config.publisher_client_id(), "pub-1");
}

#[test]
fn effective_qos_precedence() {
	let source = Source::from_addresses(vec![
		SourceAddress::with_qos("a", Qos::AtMostOnce),
		SourceAddress::new("b"),
	]);
	let requests = source.filter_requests(None).unwrap();
	assert_eq!(requests[0].qos, Qos::AtMostOnce);
	assert_eq!(requests[1].qos, Qos::ExactlyOnce);

	let requests = source.filter_requests(Some(Qos::AtLeastOnce)).unwrap();
	assert_eq!(requests[1].qos, Qos::AtLeastOnce);

	let source = source.with_qos(Qos::AtMostOnce);
	let requests = source.filter_requests(Some(Qos::AtLeastOnce)).unwrap();
	assert_eq!(requests[1].qos, Qos::AtMostOnce);
}

#[test]
fn effective_clean_session() {
	let mut protocol = ProtocolConfig::default();
	assert!(protocol.effective_clean_session());

	protocol.reconnect_for_redelivery = true;
	assert!(!protocol.effective_clean_session());

	protocol.clean_session = true;
	assert!(protocol.effective_clean_session());
}

#[test]
fn rejects_invalid_documents() {
	let cases: Vec<(&str, ConnectionConfig)> = vec![
		("scheme", ConnectionConfig::new("c", "http://localhost")),
		("host", ConnectionConfig::new("c", "tcp://:1883")),
		("port", ConnectionConfig::new("c", "tcp://host:99999")),
		("client id", ConnectionConfig::new("", "tcp://localhost")),
		(
			"empty source",
			ConnectionConfig::new("c", "tcp://localhost")
				.with_source(Source::new(Vec::<String>::new())),
		),
		(
			"bad filter",
			ConnectionConfig::new("c", "tcp://localhost").with_source(Source::new(["a/#/b"])),
		),
		(
			"wildcard target",
			ConnectionConfig::new("c", "tcp://localhost").with_target(Target::new("a/+")),
		),
	];

	for (name, config) in cases {
		assert!(config.validate().is_err(), "case '{name}' should fail");
	}
}

#[test]
fn websocket_uris_are_rejected() {
	for uri in ["ws://broker:80/mqtt", "wss://broker:443/mqtt"] {
		let result = ConnectionConfig::new("c", uri).validate();
		assert!(
			matches!(result, Err(ConfigError::InvalidUri { ref reason, .. }) if reason == "expected one of tcp, mqtt, ssl, mqtts"),
			"{uri}: {result:?}"
		);
	}
}

#[test]
fn reports_offending_source() {
	let config = ConnectionConfig::new("c", "tcp://localhost")
		.with_source(Source::new(["ok/topic"]))
		.with_source(Source::new(["bad+"]));

	assert_eq!(
		config.validate(),
		Err(ConfigError::InvalidSourceFilter {
			source_index: 1,
			filter: "bad+".into(),
			error: TopicFilterError::PartialWildcard {
				segment: "bad+".into()
			},
		})
	);
}

#[test]
fn consumer_count_must_be_one() {
	let mut source = Source::new(["a"]);
	source.consumer_count = 2;
	let config = ConnectionConfig::new("c", "tcp://localhost").with_source(source);
	assert_eq!(
		config.validate(),
		Err(ConfigError::ConsumerCount {
			source_index: 0,
			count: 2
		})
	);
}

#[test]
fn protocol_limits() {
	let zero_capacity = ConnectionConfig::new("c", "tcp://localhost").with_protocol(
		ProtocolConfig {
			publish_queue_capacity: 0,
			..ProtocolConfig::default()
		},
	);
	assert_eq!(zero_capacity.validate(), Err(ConfigError::QueueCapacity));

	let keep_alive = ConnectionConfig::new("c", "tcp://localhost").with_protocol(
		ProtocolConfig {
			keep_alive: Some(Duration::from_millis(300)),
			..ProtocolConfig::default()
		},
	);
	assert!(matches!(keep_alive.validate(), Err(ConfigError::KeepAlive(_))));

	let will = ConnectionConfig::new("c", "tcp://localhost").with_protocol(
		ProtocolConfig {
			last_will: Some(LastWillConfig::new("status/#", "gone")),
			..ProtocolConfig::default()
		},
	);
	assert!(matches!(
		will.validate(),
		Err(ConfigError::InvalidLastWill { .. })
	));
}

#[test]
fn parse_error_is_reported() {
	assert!(matches!(
		ConnectionConfig::from_json("{ not json"),
		Err(ConfigError::Parse(_))
	));
}

#[test]
fn credentials_debug_hides_password() {
	let rendered = format!("{:?}", Credentials::new("user", "hunter2"));
	assert!(rendered.contains("user"));
	assert!(!rendered.contains("hunter2"));
}

#[test]
fn settings_from_lookup() {
	let vars: HashMap<&str, &str> = [
		("MQTT_CONNECTIVITY_SUBSCRIBE_DELAY_MS", "250"),
		("MQTT_CONNECTIVITY_INBOUND_CHANNEL_CAPACITY", "8"),
		("MQTT_CONNECTIVITY_BACKOFF_MAX_MS", "30000"),
	]
	.into_iter()
	.collect();

	let settings =
		ConnectorSettings::from_lookup(|name| vars.get(name).map(|v| v.to_string()))
			.unwrap();

	assert_eq!(settings.subscribe_handshake_delay, Duration::from_millis(250));
	assert_eq!(settings.inbound_channel_capacity, 8);
	assert_eq!(
		settings.backoff,
		BackoffConfig::default().with_max(Duration::from_secs(30))
	);
	assert_eq!(settings.health_probe_timeout, Duration::from_secs(10));
}

#[test]
fn settings_reject_garbage() {
	let result = ConnectorSettings::from_lookup(|name| {
		(name == "MQTT_CONNECTIVITY_INBOUND_ACK_TIMEOUT_MS").then(|| "soon".to_string())
	});
	assert!(matches!(result, Err(ConfigError::Environment { .. })));

	let result = ConnectorSettings::from_lookup(|name| {
		(name == "MQTT_CONNECTIVITY_COMMAND_CHANNEL_CAPACITY").then(|| "0".to_string())
	});
	assert!(matches!(result, Err(ConfigError::Environment { .. })));
}
