use std::collections::BTreeSet;
use std::sync::Arc;

use arcstr::ArcStr;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::result::{
	FailedSource, SubscribeFailure, SubscribeResult, SubscribedSource,
	TotalSubscribeResult,
};
use crate::broker::{BrokerClient, BrokerError, Qos, TopicFilterQos};
use crate::config::Source;
use crate::topic::TopicFilterError;

/// Subscribes all sources of a connection against one broker handle
pub struct SubscriptionCoordinator {
	connection_id: ArcStr,
	client: Arc<dyn BrokerClient>,
	inbound_capacity: usize,
	default_qos: Option<Qos>,
}

impl SubscriptionCoordinator {
	/// Creates a coordinator for `client`.
	pub fn new(
		connection_id: impl Into<ArcStr>,
		client: Arc<dyn BrokerClient>,
		inbound_capacity: usize,
		default_qos: Option<Qos>,
	) -> Self {
		Self {
			connection_id: connection_id.into(),
			client,
			inbound_capacity: inbound_capacity.max(1),
			default_qos,
		}
	}

	/// Issues one subscribe request per source, all at once.
	///
	/// Requests start immediately; the returned handle only collects them.
	/// Dropping it aborts requests that have not been answered.
	pub fn issue(&self, sources: &[Source]) -> PendingSubscriptions {
		let mut tasks = JoinSet::new();
		for (source_index, source) in sources.iter().enumerate() {
			let filters = source.filter_requests(self.default_qos);
			let client = Arc::clone(&self.client);
			let connection_id = self.connection_id.clone();
			let capacity = self.inbound_capacity;
			tasks.spawn(subscribe_source(
				connection_id,
				client,
				source_index,
				filters,
				capacity,
			));
		}
		debug!(
			connection_id = %self.connection_id,
			client_id = %self.client.client_id(),
			sources = sources.len(),
			"Subscribe requests issued"
		);
		PendingSubscriptions {
			connection_id: self.connection_id.clone(),
			expected: sources.len(),
			tasks,
		}
	}

	/// Issues and awaits all subscriptions.
	pub async fn subscribe_all(&self, sources: &[Source]) -> TotalSubscribeResult {
		self.issue(sources).wait().await
	}
}

/// In-flight subscribe requests of one connection attempt
pub struct PendingSubscriptions {
	connection_id: ArcStr,
	expected: usize,
	tasks: JoinSet<SubscribeResult>,
}

impl PendingSubscriptions {
	/// Waits for every request and aggregates the answers.
	pub async fn wait(mut self) -> TotalSubscribeResult {
		let mut results = Vec::with_capacity(self.expected);
		while let Some(joined) = self.tasks.join_next().await {
			match joined {
				| Ok(result) => results.push(result),
				| Err(err) => {
					error!(
						connection_id = %self.connection_id,
						error = ?err,
						"Subscribe task failed"
					);
				}
			}
		}

		let answered: BTreeSet<usize> =
			results.iter().map(SubscribeResult::source_index).collect();
		for source_index in (0..self.expected).filter(|i| !answered.contains(i)) {
			results.push(SubscribeResult::Failure(FailedSource {
				source_index,
				failure: SubscribeFailure::Broker(BrokerError::Request(
					"subscribe task aborted".to_string(),
				)),
			}));
		}

		let total = TotalSubscribeResult::new(results);
		match total.failure_message() {
			| None => info!(
				connection_id = %self.connection_id,
				sources = self.expected,
				"All sources subscribed"
			),
			| Some(message) => warn!(
				connection_id = %self.connection_id,
				failed = total.failed(),
				succeeded = total.succeeded(),
				failures = %message,
				"Source subscription failed"
			),
		}
		total
	}
}

async fn subscribe_source(
	connection_id: ArcStr,
	client: Arc<dyn BrokerClient>,
	source_index: usize,
	filters: Result<Vec<TopicFilterQos>, TopicFilterError>,
	capacity: usize,
) -> SubscribeResult {
	let failed = |failure| {
		SubscribeResult::Failure(FailedSource {
			source_index,
			failure,
		})
	};
	let filters = match filters {
		| Ok(filters) => filters,
		| Err(error) => return failed(SubscribeFailure::InvalidFilter(error)),
	};

	let (inbound_tx, inbound) = mpsc::channel(capacity);
	debug!(
		connection_id = %connection_id,
		source_index,
		filters = filters.len(),
		"Subscribing source"
	);
	match client.subscribe(filters, inbound_tx).await {
		| Ok(ack) if ack.is_success() => SubscribeResult::Success(SubscribedSource {
			source_index,
			granted: ack
				.granted()
				.map(|(filter, qos)| (filter.clone(), qos))
				.collect(),
			inbound,
		}),
		| Ok(ack) => failed(SubscribeFailure::Rejected(
			ack.rejected()
				.map(|(filter, reason)| (filter.clone(), reason.to_string()))
				.collect(),
		)),
		| Err(error) => failed(SubscribeFailure::Broker(error)),
	}
}
