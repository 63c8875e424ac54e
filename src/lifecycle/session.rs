use std::collections::HashSet;

use futures::future::join_all;
use tokio::task::JoinHandle;

use crate::connection::ClientConnectionSet;
use crate::publish::PublisherWorker;
use crate::subscription::ConsumerWorker;

/// Resources of the current connection attempt or established connection
pub(super) struct Session {
	pub(super) set: ClientConnectionSet,
	/// Connect attempt or consumer cycle in progress
	pub(super) task: Option<JoinHandle<()>>,
	pub(super) publisher: Option<PublisherWorker>,
	pub(super) consumers: Vec<ConsumerWorker>,
	/// Handles the broker library is currently reconnecting
	pub(super) reconnecting: HashSet<u64>,
	pub(super) redelivery_timer: Option<JoinHandle<()>>,
	pub(super) cycling_consumer: bool,
}

impl Session {
	pub(super) fn new(set: ClientConnectionSet, task: JoinHandle<()>) -> Self {
		Self {
			set,
			task: Some(task),
			publisher: None,
			consumers: Vec::new(),
			reconnecting: HashSet::new(),
			redelivery_timer: None,
			cycling_consumer: false,
		}
	}

	pub(super) fn redelivery_pending(&self) -> bool {
		self.redelivery_timer.is_some() || self.cycling_consumer
	}

	pub(super) async fn stop_consumers(&mut self) {
		join_all(self.consumers.drain(..).map(ConsumerWorker::stop)).await;
	}

	/// Stops timers, tasks and workers, then disconnects every handle.
	pub(super) async fn teardown(mut self) {
		self.set.set_reconnect_tokens();
		if let Some(timer) = self.redelivery_timer.take() {
			timer.abort();
		}
		if let Some(task) = self.task.take() {
			task.abort();
		}
		self.stop_consumers().await;
		if let Some(publisher) = self.publisher.take() {
			publisher.stop().await;
		}
		self.set.disconnect_all().await;
	}
}
