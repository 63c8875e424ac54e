use std::fmt::{self, Display};

use crate::broker::{BrokerError, InboundReceiver, Qos};
use crate::topic::{TopicFilter, TopicFilterError};

/// Source whose filters were all granted
#[derive(Debug)]
pub struct SubscribedSource {
	/// Position of the source in the connection configuration
	pub source_index: usize,
	/// Granted filters with their QoS
	pub granted: Vec<(TopicFilter, Qos)>,
	/// Messages arriving on the granted filters
	pub inbound: InboundReceiver,
}

/// Why a source could not be subscribed
#[derive(Debug, Clone, PartialEq)]
pub enum SubscribeFailure {
	/// Broker refused some filters
	Rejected(Vec<(TopicFilter, String)>),
	/// Source address is not a valid filter
	InvalidFilter(TopicFilterError),
	/// Request failed without per-filter detail
	Broker(BrokerError),
}

impl SubscribeFailure {
	fn entries(&self) -> Vec<String> {
		match self {
			| SubscribeFailure::Rejected(filters) => filters
				.iter()
				.map(|(filter, _)| filter.to_string())
				.collect(),
			| SubscribeFailure::InvalidFilter(error) => vec![error.to_string()],
			| SubscribeFailure::Broker(error) => vec![error.to_string()],
		}
	}
}

impl Display for SubscribeFailure {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			| SubscribeFailure::Rejected(filters) => {
				let rendered: Vec<String> = filters
					.iter()
					.map(|(filter, reason)| format!("{filter} ({reason})"))
					.collect();
				write!(f, "rejected filters: {}", rendered.join(", "))
			}
			| SubscribeFailure::InvalidFilter(error) => write!(f, "{error}"),
			| SubscribeFailure::Broker(error) => write!(f, "{error}"),
		}
	}
}

/// Source that could not be subscribed
#[derive(Debug, Clone, PartialEq)]
pub struct FailedSource {
	/// Position of the source in the connection configuration
	pub source_index: usize,
	/// Cause
	pub failure: SubscribeFailure,
}

/// Result of subscribing one source; consumed once
#[derive(Debug)]
pub enum SubscribeResult {
	/// All filters granted
	Success(SubscribedSource),
	/// At least one filter failed
	Failure(FailedSource),
}

impl SubscribeResult {
	/// Position of the source in the connection configuration
	pub fn source_index(&self) -> usize {
		match self {
			| SubscribeResult::Success(source) => source.source_index,
			| SubscribeResult::Failure(failed) => failed.source_index,
		}
	}

	/// Whether the source was subscribed
	pub fn is_success(&self) -> bool {
		matches!(self, SubscribeResult::Success(_))
	}
}

/// Aggregate over every source of a connection.
///
/// A single failed source makes the whole aggregate a failure. No sources at
/// all is a success.
#[derive(Debug, Default)]
pub struct TotalSubscribeResult {
	results: Vec<SubscribeResult>,
}

impl TotalSubscribeResult {
	pub(crate) fn new(mut results: Vec<SubscribeResult>) -> Self {
		results.sort_by_key(SubscribeResult::source_index);
		Self { results }
	}

	/// Whether every source was subscribed
	pub fn is_success(&self) -> bool {
		self.results.iter().all(SubscribeResult::is_success)
	}

	/// Per-source results, ordered by source index
	pub fn results(&self) -> &[SubscribeResult] {
		&self.results
	}

	/// Number of subscribed sources
	pub fn succeeded(&self) -> usize {
		self.results.iter().filter(|r| r.is_success()).count()
	}

	/// Number of failed sources
	pub fn failed(&self) -> usize {
		self.results.len() - self.succeeded()
	}

	/// Every failed filter, bracketed and comma separated.
	///
	/// Sources that failed without per-filter detail contribute their raw
	/// error. `None` when nothing failed.
	pub fn failure_message(&self) -> Option<String> {
		if self.is_success() {
			return None;
		}
		let entries: Vec<String> = self
			.results
			.iter()
			.filter_map(|result| match result {
				| SubscribeResult::Failure(failed) => Some(failed.failure.entries()),
				| SubscribeResult::Success(_) => None,
			})
			.flatten()
			.collect();
		Some(format!("[{}]", entries.join(", ")))
	}

	/// Splits into subscribed and failed sources.
	pub fn into_parts(self) -> (Vec<SubscribedSource>, Vec<FailedSource>) {
		let mut subscribed = Vec::new();
		let mut failed = Vec::new();
		for result in self.results {
			match result {
				| SubscribeResult::Success(source) => subscribed.push(source),
				| SubscribeResult::Failure(source) => failed.push(source),
			}
		}
		(subscribed, failed)
	}
}
