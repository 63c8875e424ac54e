use std::sync::{Arc, Mutex};

use crate::broker::{
	BrokerClient, BrokerConnector, ClientOptions, ConnAck, ConnectionListener,
	DisconnectEvent, LoopbackBroker, ReconnectDirective,
};

/// Listener recording callbacks, never reconnecting
#[derive(Default)]
pub struct RecordingListener {
	pub connected: Mutex<Vec<ConnAck>>,
	pub disconnected: Mutex<Vec<DisconnectEvent>>,
}

impl ConnectionListener for RecordingListener {
	fn on_connected(&self, ack: &ConnAck) {
		self.connected.lock().unwrap().push(*ack);
	}

	fn on_disconnected(&self, event: &DisconnectEvent) -> ReconnectDirective {
		self.disconnected.lock().unwrap().push(event.clone());
		ReconnectDirective::Stop
	}
}

pub fn options(client_id: &str) -> ClientOptions {
	ClientOptions {
		uri: "tcp://loopback:1883".to_string(),
		client_id: client_id.to_string(),
		credentials: None,
		clean_session: true,
		keep_alive: None,
		last_will: None,
		manual_acks: true,
	}
}

pub fn client(broker: &LoopbackBroker, client_id: &str) -> Arc<dyn BrokerClient> {
	broker
		.create_client(options(client_id), Arc::new(RecordingListener::default()))
		.unwrap()
}

pub async fn connected_client(
	broker: &LoopbackBroker,
	client_id: &str,
) -> Arc<dyn BrokerClient> {
	let client = client(broker, client_id);
	client.connect().await.unwrap();
	client
}

/// Polls `condition` until it holds, giving spawned tasks time to run.
pub async fn eventually<F>(what: &str, condition: F)
where F: Fn() -> bool {
	for _ in 0..500 {
		if condition() {
			return;
		}
		tokio::time::sleep(std::time::Duration::from_millis(10)).await;
	}
	panic!("condition never held: {what}");
}
