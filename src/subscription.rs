//! Source subscriptions and inbound consumers
//!
//! [`SubscriptionCoordinator`] issues one SUBSCRIBE per configured source and
//! folds the answers into a [`TotalSubscribeResult`]. Every subscribed source
//! is then drained by a [`ConsumerWorker`] that hands messages to the
//! platform's [`InboundSink`] and acknowledges them according to the sink's
//! [`AckOutcome`].

mod consumer;
mod coordinator;
mod result;
mod sink;


pub use consumer::{ConsumerSettings, ConsumerWorker, RedeliveryHook};
pub use coordinator::{PendingSubscriptions, SubscriptionCoordinator};
pub use result::{
	FailedSource, SubscribeFailure, SubscribeResult, SubscribedSource,
	TotalSubscribeResult,
};
pub use sink::{AckOutcome, DiscardingSink, InboundDelivery, InboundSink};
