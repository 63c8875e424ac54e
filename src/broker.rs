//! Broker client abstraction
//!
//! The orchestration core never talks MQTT itself. It drives
//! [`BrokerClient`] handles created by a [`BrokerConnector`]:
//!
//! - [`rumqtt::RumqttConnector`] talks to real brokers through `rumqttc`
//! - [`loopback::LoopbackBroker`] is an in-memory broker with fault injection

mod client;
mod error;
pub mod loopback;
pub mod rumqtt;
mod types;

#[cfg(test)]
mod rumqtt_tests;

pub use client::{BrokerClient, BrokerConnector, ConnectionListener};
pub use error::BrokerError;
pub use loopback::LoopbackBroker;
pub use rumqtt::RumqttConnector;
pub use types::{
	ClientOptions, ConnAck, DeliveryTag, DisconnectEvent, DisconnectSource,
	FilterOutcome, InboundMessage, InboundReceiver, InboundSender,
	OutboundMessage, PublishAck, Qos, ReconnectDirective, SubscribeAck,
	TopicFilterQos,
};
