//! Helpers shared by the integration tests
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mqtt_connectivity::{
	AckOutcome, ConnectionConfig, ConnectorSettings, ControllerTask, InboundDelivery,
	InboundSink, LifecycleController, LifecycleHandle, LoopbackBroker,
};
use tokio::sync::mpsc;

/// Sink recording deliveries and answering with a fixed outcome
pub struct RecordingSink {
	outcome: AckOutcome,
	seen: mpsc::UnboundedSender<InboundDelivery>,
}

impl RecordingSink {
	pub fn new(outcome: AckOutcome) -> (Arc<Self>, mpsc::UnboundedReceiver<InboundDelivery>) {
		let (seen, rx) = mpsc::unbounded_channel();
		(Arc::new(Self { outcome, seen }), rx)
	}
}

#[async_trait]
impl InboundSink for RecordingSink {
	async fn deliver(&self, delivery: InboundDelivery) -> AckOutcome {
		let _ = self.seen.send(delivery);
		self.outcome.clone()
	}
}

pub fn settings() -> Arc<ConnectorSettings> {
	Arc::new(ConnectorSettings::default())
}

pub fn spawn(
	broker: &LoopbackBroker,
	config: ConnectionConfig,
	sink: Arc<dyn InboundSink>,
) -> (ControllerTask, LifecycleHandle) {
	LifecycleController::spawn(Arc::new(config), settings(), Arc::new(broker.clone()), sink)
}

/// Polls `condition` until it holds, giving spawned tasks time to run.
pub async fn eventually<F>(what: &str, condition: F)
where F: Fn() -> bool {
	for _ in 0..500 {
		if condition() {
			return;
		}
		tokio::time::sleep(Duration::from_millis(10)).await;
	}
	panic!("condition never held: {what}");
}
