//! Broker handles of one connection
//!
//! A [`ClientConnectionSet`] owns either one shared handle or a consumer and
//! a publisher handle. Each [`BrokerHandle`] carries a [`HandleState`]: the
//! reconnect token that suppresses automatic reconnects once an intentional
//! disconnect is under way, and the handle's backoff strategy. The listener
//! registered with the broker client evaluates disconnects against that
//! state synchronously and posts the outcome as a [`HandleEvent`].

mod handle;
mod listener;
mod set;

#[cfg(test)]
mod connection_tests;

pub use handle::{
	BrokerHandle, DisconnectDecision, HandleRole, HandleState, HandshakeFailure,
	connect_after_delay,
};
pub use listener::{HandleEvent, HandleEventKind, HandleEventSender};
pub use set::{ClientConnectionSet, SetMode};
