//! Outbound publish pipeline
//!
//! Signals are converted to [`PublishRequest`]s and offered to the
//! connection's [`PublishQueue`]. A single [`PublisherWorker`] drains the
//! queue, so at most one broker publish per connection is in flight and the
//! offer order is the publish order. Offers never block: a full queue fails
//! the request right away.

mod error;
mod queue;
mod signal;
mod worker;


pub use error::SendError;
pub use queue::{PublishQueue, PublishReceipt, PublishRequest};
pub use signal::{
	Acknowledgement, OutboundSignal, QOS_HEADER, RETAIN_HEADER, SendOutcome,
	TOPIC_HEADER,
};
pub use worker::PublisherWorker;
