//! Worker health queries

use std::fmt::{self, Display};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Health answer of a running worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerHealth {
	/// Worker is processing normally
	Healthy,
	/// Worker reports a problem
	Unhealthy(String),
}

impl WorkerHealth {
	/// Whether the answer is [`WorkerHealth::Healthy`]
	pub fn is_healthy(&self) -> bool {
		matches!(self, WorkerHealth::Healthy)
	}
}

impl Display for WorkerHealth {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			| WorkerHealth::Healthy => f.write_str("healthy"),
			| WorkerHealth::Unhealthy(reason) => write!(f, "unhealthy: {reason}"),
		}
	}
}

/// The worker did not answer in time
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Worker '{worker}' did not answer the health query within {timeout:?}")]
pub struct HealthTimeout {
	/// Worker name
	pub worker: String,
	/// Waited time
	pub timeout: Duration,
}

pub(crate) type HealthRequest = oneshot::Sender<WorkerHealth>;

/// Query side of a worker's health channel
#[derive(Debug, Clone)]
pub struct HealthHandle {
	worker: String,
	requests: mpsc::Sender<HealthRequest>,
}

impl HealthHandle {
	pub(crate) fn channel(worker: impl Into<String>) -> (Self, mpsc::Receiver<HealthRequest>) {
		let (requests, rx) = mpsc::channel(4);
		(
			Self {
				worker: worker.into(),
				requests,
			},
			rx,
		)
	}

	/// Worker name used in logs and errors
	pub fn worker(&self) -> &str {
		&self.worker
	}

	/// Asks the worker for its health and waits at most `timeout`.
	///
	/// A worker that already stopped answers unhealthy.
	pub async fn query(&self, timeout: Duration) -> Result<WorkerHealth, HealthTimeout> {
		let ask = async {
			let (tx, rx) = oneshot::channel();
			if self.requests.send(tx).await.is_err() {
				return WorkerHealth::Unhealthy("worker stopped".to_string());
			}
			rx.await.unwrap_or_else(|_| {
				WorkerHealth::Unhealthy("worker stopped".to_string())
			})
		};
		tokio::time::timeout(timeout, ask)
			.await
			.map_err(|_| HealthTimeout {
				worker: self.worker.clone(),
				timeout,
			})
	}
}
