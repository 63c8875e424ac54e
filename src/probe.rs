//! One-off "does this configuration work" runs
//!
//! A [`ConnectionProbe`] builds throwaway handles (clean session, no last
//! will, unique client ids), subscribes every source, connects, starts a
//! publisher and one discarding consumer per subscribed source and asks each
//! worker for its health. Whatever happens, the workers are stopped and the
//! handles disconnected before the verdict is returned.

use std::sync::Arc;

use arcstr::ArcStr;
use futures::future::join_all;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::broker::{BrokerConnector, BrokerError};
use crate::config::{ConfigError, ConnectionConfig, ConnectorSettings};
use crate::connection::{ClientConnectionSet, SetMode, connect_after_delay};
use crate::health::{HealthHandle, HealthTimeout, WorkerHealth};
use crate::publish::PublisherWorker;
use crate::subscription::{
	ConsumerSettings, ConsumerWorker, DiscardingSink, InboundSink,
	SubscriptionCoordinator,
};

/// Why a probe run failed
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProbeError {
	/// Configuration is invalid
	#[error("Invalid connection configuration: {0}")]
	Config(#[from] ConfigError),

	/// Broker client handles could not be created
	#[error("Failed to create broker client: {0}")]
	ClientCreation(#[source] BrokerError),

	/// A handshake failed
	#[error("Failed to connect client '{client_id}': {error}")]
	Handshake {
		/// Client id of the failing handle
		client_id: String,
		/// Broker error
		#[source]
		error: BrokerError,
	},

	/// At least one source could not be subscribed
	#[error("Failed to subscribe to topics {0}")]
	SubscribeFailed(String),

	/// A worker answered the health query with a problem
	#[error("Worker '{worker}' is unhealthy: {reason}")]
	Unhealthy {
		/// Worker name
		worker: String,
		/// Reported problem
		reason: String,
	},

	/// A worker did not answer the health query in time
	#[error(transparent)]
	AckTimeout(#[from] HealthTimeout),
}

/// Successful probe run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
	/// Client ids the probe connected with
	pub client_ids: Vec<String>,
	/// Number of subscribed sources
	pub subscribed_sources: usize,
	/// Number of workers that answered healthy
	pub healthy_workers: usize,
}

/// Runs disposable connection tests
pub struct ConnectionProbe {
	connector: Arc<dyn BrokerConnector>,
	settings: Arc<ConnectorSettings>,
}

#[derive(Default)]
struct ProbeWorkers {
	publisher: Option<PublisherWorker>,
	consumers: Vec<ConsumerWorker>,
}

impl ProbeWorkers {
	fn health_handles(&self) -> Vec<HealthHandle> {
		self.publisher
			.iter()
			.map(PublisherWorker::health)
			.chain(self.consumers.iter().map(ConsumerWorker::health))
			.collect()
	}

	async fn stop(self) {
		join_all(self.consumers.into_iter().map(ConsumerWorker::stop)).await;
		if let Some(publisher) = self.publisher {
			publisher.stop().await;
		}
	}
}

impl ConnectionProbe {
	/// Creates a probe using `connector` for its handles.
	pub fn new(connector: Arc<dyn BrokerConnector>, settings: Arc<ConnectorSettings>) -> Self {
		Self {
			connector,
			settings,
		}
	}

	/// Tests `config` against the broker.
	pub async fn test(&self, config: &ConnectionConfig) -> Result<ProbeReport, ProbeError> {
		config.validate()?;
		let config = Arc::new(config.clone());
		let connection_id = ArcStr::from(config.id.as_str());

		// Failures surface through the awaited calls
		let (events_tx, _events_rx) = mpsc::unbounded_channel();
		let set = ClientConnectionSet::create(
			Arc::clone(&self.connector),
			Arc::clone(&config),
			Arc::clone(&self.settings),
			0,
			events_tx,
			SetMode::probe(),
		)
		.map_err(ProbeError::ClientCreation)?;
		info!(
			connection_id = %connection_id,
			client_id = %set.consumer().client_id(),
			"Probing connection"
		);

		let mut workers = ProbeWorkers::default();
		let outcome = self.exercise(&connection_id, &config, &set, &mut workers).await;

		workers.stop().await;
		set.disconnect_all().await;
		match &outcome {
			| Ok(report) => info!(
				connection_id = %connection_id,
				healthy_workers = report.healthy_workers,
				"Probe succeeded"
			),
			| Err(err) => warn!(connection_id = %connection_id, error = %err, "Probe failed"),
		}
		outcome
	}

	async fn exercise(
		&self,
		connection_id: &ArcStr,
		config: &ConnectionConfig,
		set: &ClientConnectionSet,
		workers: &mut ProbeWorkers,
	) -> Result<ProbeReport, ProbeError> {
		let consumer = set.consumer();
		let coordinator = SubscriptionCoordinator::new(
			connection_id.clone(),
			Arc::clone(consumer.client()),
			self.settings.inbound_channel_capacity,
			config.protocol.default_qos,
		);
		let pending = coordinator.issue(&config.sources);
		let separate = set.has_separate_publisher().then(|| set.publisher());
		connect_after_delay(consumer, separate, self.settings.subscribe_handshake_delay)
			.await
			.map_err(|failure| ProbeError::Handshake {
				client_id: failure.client_id,
				error: failure.error,
			})?;

		let total = pending.wait().await;
		let failure_message = total.failure_message();
		let (subscribed, _) = total.into_parts();
		let subscribed_sources = subscribed.len();

		workers.publisher = Some(PublisherWorker::start(
			connection_id.clone(),
			Arc::clone(set.publisher().client()),
			config.protocol.publish_queue_capacity,
		));
		let sink: Arc<dyn InboundSink> = Arc::new(DiscardingSink);
		let settings = ConsumerSettings {
			ack_timeout: self.settings.inbound_ack_timeout,
			reconnect_for_redelivery: false,
			max_pending: self.settings.inbound_channel_capacity,
		};
		workers.consumers = subscribed
			.into_iter()
			.map(|source| {
				ConsumerWorker::start(
					connection_id.clone(),
					Arc::clone(consumer.client()),
					Arc::clone(&sink),
					source,
					None,
					settings.clone(),
					None,
				)
			})
			.collect();

		let timeout = self.settings.health_probe_timeout;
		let handles = workers.health_handles();
		let answers = join_all(handles.iter().map(|handle| handle.query(timeout))).await;

		if let Some(message) = failure_message {
			return Err(ProbeError::SubscribeFailed(message));
		}
		let mut healthy_workers = 0;
		for (handle, answer) in handles.iter().zip(answers) {
			match answer? {
				| WorkerHealth::Healthy => healthy_workers += 1,
				| WorkerHealth::Unhealthy(reason) => {
					return Err(ProbeError::Unhealthy {
						worker: handle.worker().to_string(),
						reason,
					});
				}
			}
		}

		Ok(ProbeReport {
			client_ids: set.handles().map(|h| h.client_id().to_string()).collect(),
			subscribed_sources,
			healthy_workers,
		})
	}
}
