use std::sync::Arc;

use arcstr::ArcStr;
use futures::future::join_all;
use tracing::{debug, info};
use uuid::Uuid;

use super::handle::{BrokerHandle, HandleRole, HandleState};
use super::listener::{HandleEventSender, HandleListener};
use crate::broker::{BrokerConnector, BrokerError, ClientOptions};
use crate::config::{ConnectionConfig, ConnectorSettings};

/// How handles of a set are configured
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetMode {
	/// Regular connection following the configuration
	Live,
	/// Disposable test run: clean session, library keep-alive, no last will
	/// and client ids carrying `suffix`
	Probe {
		/// Appended to every client id
		suffix: String,
	},
}

impl SetMode {
	/// Probe mode with a random client id suffix.
	pub fn probe() -> Self {
		let id = Uuid::new_v4().simple().to_string();
		SetMode::Probe {
			suffix: format!("-probe-{}", &id[..8]),
		}
	}
}

struct HandleFactory {
	connector: Arc<dyn BrokerConnector>,
	config: Arc<ConnectionConfig>,
	settings: Arc<ConnectorSettings>,
	connection_id: ArcStr,
	generation: u64,
	events: HandleEventSender,
	mode: SetMode,
	next_handle_id: u64,
}

impl HandleFactory {
	fn options(&self, role: HandleRole) -> ClientOptions {
		let config = &self.config;
		let protocol = &config.protocol;
		let (probe, suffix) = match &self.mode {
			| SetMode::Live => (false, ""),
			| SetMode::Probe { suffix } => (true, suffix.as_str()),
		};
		let client_id = match role {
			| HandleRole::Publisher => config.publisher_client_id(),
			| HandleRole::Shared | HandleRole::Consumer => config.client_id(),
		};
		ClientOptions {
			uri: config.uri.clone(),
			client_id: format!("{client_id}{suffix}"),
			credentials: config.credentials.clone(),
			clean_session: probe || protocol.effective_clean_session(),
			keep_alive: if probe { None } else { protocol.keep_alive },
			last_will: match role {
				| _ if probe => None,
				| HandleRole::Consumer => None,
				| HandleRole::Shared | HandleRole::Publisher => protocol.last_will.clone(),
			},
			manual_acks: role != HandleRole::Publisher,
		}
	}

	fn create(&mut self, role: HandleRole) -> Result<BrokerHandle, BrokerError> {
		self.next_handle_id += 1;
		let handle_id = self.next_handle_id;
		let options = self.options(role);
		let client_id = options.client_id.clone();
		let state = Arc::new(HandleState::new(self.settings.backoff.build()));
		let listener = HandleListener {
			connection_id: self.connection_id.clone(),
			client_id: client_id.clone(),
			generation: self.generation,
			handle_id,
			role,
			state: Arc::clone(&state),
			failover_enabled: self.config.failover_enabled
				&& self.mode == SetMode::Live,
			min_server_delay: self.settings.min_server_disconnect_delay,
			events: self.events.clone(),
		};
		let client = self.connector.create_client(options, Arc::new(listener))?;
		debug!(
			connection_id = %self.connection_id,
			client_id = %client_id,
			role = %role,
			handle_id,
			"Broker handle created"
		);
		Ok(BrokerHandle::new(handle_id, role, client, state))
	}
}

/// Broker handles of one connection attempt
pub struct ClientConnectionSet {
	consumer: BrokerHandle,
	publisher: Option<BrokerHandle>,
	factory: HandleFactory,
}

impl ClientConnectionSet {
	/// Creates one shared handle, or a consumer and a publisher handle when
	/// the configuration asks for a separate publisher client.
	pub fn create(
		connector: Arc<dyn BrokerConnector>,
		config: Arc<ConnectionConfig>,
		settings: Arc<ConnectorSettings>,
		generation: u64,
		events: HandleEventSender,
		mode: SetMode,
	) -> Result<Self, BrokerError> {
		let separate = config.protocol.separate_publisher_client;
		let mut factory = HandleFactory {
			connector,
			connection_id: ArcStr::from(config.id.as_str()),
			config,
			settings,
			generation,
			events,
			mode,
			next_handle_id: 0,
		};

		let set = if separate {
			let consumer = factory.create(HandleRole::Consumer)?;
			let publisher = match factory.create(HandleRole::Publisher) {
				| Ok(publisher) => publisher,
				| Err(err) => {
					consumer.state().set_reconnect_token();
					return Err(err);
				}
			};
			Self {
				consumer,
				publisher: Some(publisher),
				factory,
			}
		} else {
			Self {
				consumer: factory.create(HandleRole::Shared)?,
				publisher: None,
				factory,
			}
		};
		info!(
			connection_id = %set.factory.connection_id,
			generation,
			separate_publisher = separate,
			"Client connection set created"
		);
		Ok(set)
	}

	/// Handle subscriptions run on
	pub fn consumer(&self) -> &BrokerHandle {
		&self.consumer
	}

	/// Handle publishes run on; the shared handle without a separate publisher
	pub fn publisher(&self) -> &BrokerHandle {
		self.publisher.as_ref().unwrap_or(&self.consumer)
	}

	/// Whether publisher traffic has its own handle
	pub fn has_separate_publisher(&self) -> bool {
		self.publisher.is_some()
	}

	/// Attempt generation the handles report with
	pub fn generation(&self) -> u64 {
		self.factory.generation
	}

	/// Every handle of the set
	pub fn handles(&self) -> impl Iterator<Item = &BrokerHandle> {
		std::iter::once(&self.consumer).chain(self.publisher.as_ref())
	}

	/// Whether `handle_id` belongs to a current handle
	pub fn owns(&self, handle_id: u64) -> bool {
		self.handles().any(|handle| handle.id() == handle_id)
	}

	/// Sets every reconnect token.
	pub fn set_reconnect_tokens(&self) {
		for handle in self.handles() {
			handle.state().set_reconnect_token();
		}
	}

	/// Sets every reconnect token, then disconnects all handles.
	pub async fn disconnect_all(&self) {
		self.set_reconnect_tokens();
		join_all(self.handles().map(BrokerHandle::shutdown)).await;
		info!(
			connection_id = %self.factory.connection_id,
			generation = self.factory.generation,
			"Client connection set disconnected"
		);
	}

	/// Disconnects the consumer handle and replaces it with a fresh one
	/// using the same client id. Only sets with a separate publisher have a
	/// consumer that can be cycled on its own.
	pub async fn cycle_consumer(&mut self) -> Result<&BrokerHandle, BrokerError> {
		if self.publisher.is_none() {
			return Err(BrokerError::Request(
				"shared client handle cannot be cycled on its own".to_string(),
			));
		}
		self.consumer.shutdown().await;
		self.consumer = self.factory.create(HandleRole::Consumer)?;
		Ok(&self.consumer)
	}
}
