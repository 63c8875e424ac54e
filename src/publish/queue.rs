use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::error::SendError;
use super::signal::{Acknowledgement, OutboundSignal, SendOutcome};
use crate::broker::{OutboundMessage, PublishAck};
use crate::config::Target;

type Completion = oneshot::Sender<Result<SendOutcome, SendError>>;

/// One outbound message with its single-resolution completion
#[derive(Debug)]
pub struct PublishRequest {
	message: OutboundMessage,
	signal_id: String,
	ack_label: Option<String>,
	completion: Completion,
}

impl PublishRequest {
	/// Creates a request and the receipt it resolves.
	pub fn new(
		message: OutboundMessage,
		signal_id: impl Into<String>,
		ack_label: Option<String>,
	) -> (Self, PublishReceipt) {
		let (completion, rx) = oneshot::channel();
		let request = Self {
			message,
			signal_id: signal_id.into(),
			ack_label,
			completion,
		};
		(request, PublishReceipt { rx })
	}

	/// Request publishing `signal` to `target`.
	pub fn for_signal(
		signal: &OutboundSignal,
		target: &Target,
	) -> Result<(Self, PublishReceipt), SendError> {
		let message = signal.to_message(target)?;
		Ok(Self::new(message, signal.id.clone(), target.ack_label.clone()))
	}

	/// Message to publish
	pub fn message(&self) -> &OutboundMessage {
		&self.message
	}

	/// Originating signal
	pub fn signal_id(&self) -> &str {
		&self.signal_id
	}

	pub(crate) fn complete(self, result: Result<PublishAck, SendError>) {
		let Self {
			signal_id,
			ack_label,
			completion,
			..
		} = self;
		let outcome = result.map(|ack| match ack_label {
			| Some(label) => SendOutcome::Acknowledged(Acknowledgement {
				signal_id: signal_id.clone(),
				label,
				qos: ack.qos,
			}),
			| None => SendOutcome::Sent {
				signal_id: signal_id.clone(),
			},
		});
		if completion.send(outcome).is_err() {
			debug!(signal_id = %signal_id, "Publish receipt dropped before completion");
		}
	}

	pub(crate) fn fail(self, error: SendError) {
		self.complete(Err(error));
	}
}

/// Future resolving once with the publish result
#[derive(Debug)]
pub struct PublishReceipt {
	rx: oneshot::Receiver<Result<SendOutcome, SendError>>,
}

impl PublishReceipt {
	/// Receipt that is already resolved with `error`.
	pub fn failed(error: SendError) -> Self {
		let (tx, rx) = oneshot::channel();
		let _ = tx.send(Err(error));
		Self { rx }
	}
}

impl Future for PublishReceipt {
	type Output = Result<SendOutcome, SendError>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		Pin::new(&mut self.rx)
			.poll(cx)
			.map(|result| result.unwrap_or(Err(SendError::PublisherStopped)))
	}
}

/// Bounded FIFO feeding the publisher worker
#[derive(Debug, Clone)]
pub struct PublishQueue {
	tx: mpsc::Sender<PublishRequest>,
	capacity: usize,
}

impl PublishQueue {
	pub(crate) fn new(capacity: usize) -> (Self, mpsc::Receiver<PublishRequest>) {
		let capacity = capacity.max(1);
		let (tx, rx) = mpsc::channel(capacity);
		(Self { tx, capacity }, rx)
	}

	/// Enqueues `request` without waiting.
	///
	/// A full queue resolves the request with [`SendError::Overflow`], a
	/// stopped worker with [`SendError::PublisherStopped`].
	pub fn offer(&self, request: PublishRequest) {
		match self.tx.try_send(request) {
			| Ok(()) => {}
			| Err(mpsc::error::TrySendError::Full(request)) => {
				warn!(
					signal_id = %request.signal_id,
					capacity = self.capacity,
					"Publish queue full, dropping request"
				);
				request.fail(SendError::Overflow);
			}
			| Err(mpsc::error::TrySendError::Closed(request)) => {
				request.fail(SendError::PublisherStopped);
			}
		}
	}

	/// Maximum number of queued requests
	pub fn capacity(&self) -> usize {
		self.capacity
	}

	/// Requests waiting for the worker
	pub fn len(&self) -> usize {
		self.capacity - self.tx.capacity()
	}

	/// Whether no request is waiting
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Whether the worker stopped draining
	pub fn is_closed(&self) -> bool {
		self.tx.is_closed()
	}
}
