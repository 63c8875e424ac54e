//! Topic handling module
//!
//! Parsing, validation and matching of MQTT topic filters used by sources,
//! and validation of concrete publish topics used by targets.

pub mod error;
pub mod filter;

#[cfg(test)]
mod filter_tests;

pub use error::{TopicFilterError, limits};
pub use filter::{FilterLevel, TopicFilter, validate_publish_topic};
