//! Runs one connection from a JSON configuration file until Ctrl-C.
//!
//! ```text
//! mqtt-connectivity <config.json>          connect and supervise
//! mqtt-connectivity <config.json> --probe  test the configuration and exit
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mqtt_connectivity::backoff::BackoffStrategy;
use mqtt_connectivity::{
	AckOutcome, ConnectionConfig, ConnectionEvent, ConnectionProbe, ConnectorSettings,
	InboundDelivery, InboundSink, LifecycleController, LifecycleHandle, RumqttConnector,
};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{self, Instant};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Sink logging every inbound message and accepting it
struct LoggingSink;

#[async_trait]
impl InboundSink for LoggingSink {
	async fn deliver(&self, delivery: InboundDelivery) -> AckOutcome {
		info!(
			connection_id = %delivery.connection_id,
			source_index = delivery.source_index,
			topic = %delivery.message.topic,
			bytes = delivery.message.payload.len(),
			"Inbound message"
		);
		AckOutcome::Acknowledged
	}
}

fn spawn_connect(handle: &LifecycleHandle) {
	let handle = handle.clone();
	tokio::spawn(async move {
		if let Err(err) = handle.connect().await {
			debug!(error = %err, "Connect attempt finished with error");
		}
	});
}

async fn supervise(
	handle: LifecycleHandle,
	mut backoff: Box<dyn BackoffStrategy>,
) -> Result<(), Box<dyn std::error::Error>> {
	let mut events = handle.events();
	let mut ctrl_c = Box::pin(tokio::signal::ctrl_c());
	let retry = time::sleep(Duration::ZERO);
	tokio::pin!(retry);
	let mut retry_armed = true;

	loop {
		tokio::select! {
			result = &mut ctrl_c => {
				result?;
				info!("Ctrl-C received, shutting down");
				return Ok(());
			}
			() = &mut retry, if retry_armed => {
				retry_armed = false;
				spawn_connect(&handle);
			}
			event = events.recv() => match event {
				| Ok(ConnectionEvent::ClientConnected) => {
					info!(connection_id = handle.connection_id(), "Connected");
					backoff.reset();
				}
				| Ok(ConnectionEvent::ConnectionFailure(err)) => {
					let delay = backoff.next_delay();
					warn!(
						connection_id = handle.connection_id(),
						error = %err,
						attempt = backoff.attempts(),
						delay = ?delay,
						"Connection failed, retrying"
					);
					retry.as_mut().reset(Instant::now() + delay);
					retry_armed = true;
				}
				| Ok(event) => debug!(event = ?event, "Connection event"),
				| Err(RecvError::Lagged(skipped)) => {
					warn!(skipped, "Connection events lagged");
				}
				| Err(RecvError::Closed) => return Ok(()),
			},
		}
	}
}

async fn probe(
	config: &ConnectionConfig,
	settings: Arc<ConnectorSettings>,
) -> Result<(), Box<dyn std::error::Error>> {
	let probe = ConnectionProbe::new(Arc::new(RumqttConnector::default()), settings);
	let report = probe.test(config).await?;
	info!(
		client_ids = ?report.client_ids,
		subscribed_sources = report.subscribed_sources,
		healthy_workers = report.healthy_workers,
		"Configuration works"
	);
	Ok(())
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
	let mut args = std::env::args().skip(1);
	let path = args
		.next()
		.ok_or("usage: mqtt-connectivity <config.json> [--probe]")?;
	let probe_only = args.any(|arg| arg == "--probe");

	let config = ConnectionConfig::from_json(&std::fs::read_to_string(&path)?)?;
	let settings = Arc::new(ConnectorSettings::from_env()?);
	info!(connection_id = %config.id, uri = %config.uri, path = %path, "Configuration loaded");

	if probe_only {
		return probe(&config, settings).await;
	}

	let backoff = settings.backoff.build();
	let (task, handle) = LifecycleController::spawn(
		Arc::new(config),
		settings,
		Arc::new(RumqttConnector::default()),
		Arc::new(LoggingSink),
	);
	let supervised = supervise(handle, backoff).await;
	task.shutdown().await?;
	supervised
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	dotenv::dotenv().ok();
	tracing_subscriber::registry()
		.with(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| "info".into()),
		)
		.with(
			tracing_subscriber::fmt::layer()
				.with_target(true)
				.with_thread_ids(false)
				.with_file(false)
				.with_line_number(false)
				.compact(),
		)
		.init();

	info!("Starting MQTT connectivity");
	let result = run().await;
	if let Err(ref e) = result {
		error!(error = %e, "Connectivity failed");
	} else {
		info!("Connectivity stopped");
	}
	result
}
