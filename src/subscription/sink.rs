use std::sync::Arc;

use arcstr::ArcStr;
use async_trait::async_trait;

use crate::broker::InboundMessage;
use crate::config::Enforcement;

/// Inbound message handed to the platform
#[derive(Debug, Clone)]
pub struct InboundDelivery {
	/// Connection the message arrived on
	pub connection_id: ArcStr,
	/// Source whose filter matched
	pub source_index: usize,
	/// Enforcement rule of the source
	pub enforcement: Option<Arc<Enforcement>>,
	/// The message itself
	pub message: InboundMessage,
}

/// Platform verdict on an inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckOutcome {
	/// Processed, acknowledge to the broker
	Acknowledged,
	/// Will never be processed, acknowledge so the broker drops it
	RejectedPermanently(String),
	/// Failed for now, the broker should deliver it again
	Redeliverable(String),
}

/// Platform side receiving inbound messages
#[async_trait]
pub trait InboundSink: Send + Sync + 'static {
	/// Processes one delivery and settles it.
	async fn deliver(&self, delivery: InboundDelivery) -> AckOutcome;
}

/// Sink accepting and dropping everything
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardingSink;

#[async_trait]
impl InboundSink for DiscardingSink {
	async fn deliver(&self, _delivery: InboundDelivery) -> AckOutcome {
		AckOutcome::Acknowledged
	}
}
