//! Reconnect delay policies
//!
//! A [`BackoffStrategy`] is owned by one broker handle and consulted each time
//! the handle loses its connection. Delays never shrink until [`reset`] is
//! called and never exceed the configured ceiling.
//!
//! [`reset`]: BackoffStrategy::reset

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Stateful attempt counter producing retry delays
pub trait BackoffStrategy: Send + 'static {
	/// Delay before the next attempt; advances the attempt counter.
	fn next_delay(&mut self) -> Duration;

	/// Forgets all previous attempts.
	fn reset(&mut self);

	/// Attempts since the last reset
	fn attempts(&self) -> u32;
}

/// `initial * multiplier^n`, capped at `max`
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
	initial: Duration,
	multiplier: f64,
	max: Duration,
	attempts: u32,
}

impl ExponentialBackoff {
	/// Creates the policy. Multipliers below 1 are treated as 1.
	pub fn new(initial: Duration, multiplier: f64, max: Duration) -> Self {
		Self {
			initial: initial.min(max),
			multiplier: if multiplier.is_finite() { multiplier.max(1.0) } else { 1.0 },
			max,
			attempts: 0,
		}
	}
}

impl BackoffStrategy for ExponentialBackoff {
	fn next_delay(&mut self) -> Duration {
		let exponent = i32::try_from(self.attempts).unwrap_or(i32::MAX);
		self.attempts = self.attempts.saturating_add(1);
		let factor = self.multiplier.powi(exponent);
		let secs = self.initial.as_secs_f64() * factor;
		if !secs.is_finite() || secs >= self.max.as_secs_f64() {
			return self.max;
		}
		Duration::from_secs_f64(secs).min(self.max)
	}

	fn reset(&mut self) {
		self.attempts = 0;
	}

	fn attempts(&self) -> u32 {
		self.attempts
	}
}

/// Starts at `min` and doubles every attempt, capped at `max`
#[derive(Debug, Clone)]
pub struct DuplicationBackoff {
	min: Duration,
	max: Duration,
	current: Option<Duration>,
	attempts: u32,
}

impl DuplicationBackoff {
	/// Creates the policy.
	pub fn new(min: Duration, max: Duration) -> Self {
		Self {
			min: min.min(max),
			max,
			current: None,
			attempts: 0,
		}
	}
}

impl BackoffStrategy for DuplicationBackoff {
	fn next_delay(&mut self) -> Duration {
		self.attempts = self.attempts.saturating_add(1);
		let next = match self.current {
			| None => self.min,
			| Some(current) => current.saturating_mul(2).min(self.max),
		};
		self.current = Some(next);
		next
	}

	fn reset(&mut self) {
		self.current = None;
		self.attempts = 0;
	}

	fn attempts(&self) -> u32 {
		self.attempts
	}
}

/// Serializable backoff policy description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum BackoffConfig {
	/// See [`ExponentialBackoff`]
	Exponential {
		/// First delay
		#[serde(with = "crate::config::duration_ms")]
		initial: Duration,
		/// Growth factor per attempt
		multiplier: f64,
		/// Ceiling
		#[serde(with = "crate::config::duration_ms")]
		max: Duration,
	},
	/// See [`DuplicationBackoff`]
	Duplication {
		/// First delay
		#[serde(with = "crate::config::duration_ms")]
		min: Duration,
		/// Ceiling
		#[serde(with = "crate::config::duration_ms")]
		max: Duration,
	},
}

impl Default for BackoffConfig {
	fn default() -> Self {
		BackoffConfig::Exponential {
			initial: Duration::from_secs(1),
			multiplier: 2.0,
			max: Duration::from_secs(120),
		}
	}
}

impl BackoffConfig {
	/// Builds a fresh strategy with zero attempts.
	pub fn build(&self) -> Box<dyn BackoffStrategy> {
		match *self {
			| BackoffConfig::Exponential {
				initial,
				multiplier,
				max,
			} => Box::new(ExponentialBackoff::new(initial, multiplier, max)),
			| BackoffConfig::Duplication { min, max } => {
				Box::new(DuplicationBackoff::new(min, max))
			}
		}
	}

	/// Replaces the first delay of either policy.
	pub fn with_initial(self, delay: Duration) -> Self {
		match self {
			| BackoffConfig::Exponential { multiplier, max, .. } => {
				BackoffConfig::Exponential {
					initial: delay,
					multiplier,
					max,
				}
			}
			| BackoffConfig::Duplication { max, .. } => {
				BackoffConfig::Duplication { min: delay, max }
			}
		}
	}

	/// Replaces the ceiling of either policy.
	pub fn with_max(self, ceiling: Duration) -> Self {
		match self {
			| BackoffConfig::Exponential {
				initial,
				multiplier,
				..
			} => BackoffConfig::Exponential {
				initial,
				multiplier,
				max: ceiling,
			},
			| BackoffConfig::Duplication { min, .. } => {
				BackoffConfig::Duplication { min, max: ceiling }
			}
		}
	}
}

/// Reconnect delay after a lost connection.
///
/// Server-initiated disconnects never reconnect faster than `server_minimum`.
pub fn reconnect_delay(
	strategy: &mut dyn BackoffStrategy,
	server_initiated: bool,
	server_minimum: Duration,
) -> Duration {
	let delay = strategy.next_delay();
	if server_initiated {
		delay.max(server_minimum)
	} else {
		delay
	}
}

#[cfg(test)]
mod tests {
	use proptest::prelude::*;

	use super::*;

	#[test]
	fn exponential_grows_and_caps() {
		let mut backoff = ExponentialBackoff::new(
			Duration::from_millis(100),
			2.0,
			Duration::from_millis(500),
		);
		let delays: Vec<_> = (0..5).map(|_| backoff.next_delay()).collect();
		assert_eq!(
			delays,
			vec![
				Duration::from_millis(100),
				Duration::from_millis(200),
				Duration::from_millis(400),
				Duration::from_millis(500),
				Duration::from_millis(500),
			]
		);
		assert_eq!(backoff.attempts(), 5);
	}

	#[test]
	fn duplication_starts_at_minimum() {
		let mut backoff =
			DuplicationBackoff::new(Duration::from_secs(1), Duration::from_secs(5));
		assert_eq!(backoff.next_delay(), Duration::from_secs(1));
		assert_eq!(backoff.next_delay(), Duration::from_secs(2));
		assert_eq!(backoff.next_delay(), Duration::from_secs(4));
		assert_eq!(backoff.next_delay(), Duration::from_secs(5));
	}

	#[test]
	fn reset_restarts_sequence() {
		let mut backoff = BackoffConfig::default().build();
		backoff.next_delay();
		backoff.next_delay();
		backoff.reset();
		assert_eq!(backoff.attempts(), 0);
		assert_eq!(backoff.next_delay(), Duration::from_secs(1));
	}

	#[test]
	fn server_disconnect_respects_minimum() {
		let mut backoff = ExponentialBackoff::new(
			Duration::from_millis(10),
			2.0,
			Duration::from_secs(60),
		);
		let minimum = Duration::from_secs(1);
		assert_eq!(reconnect_delay(&mut backoff, true, minimum), minimum);
		assert_eq!(
			reconnect_delay(&mut backoff, false, minimum),
			Duration::from_millis(20)
		);
	}

	#[test]
	fn config_round_trips_through_json() {
		let config: BackoffConfig = serde_json::from_str(
			r#"{"policy":"duplication","min":250,"max":4000}"#,
		)
		.unwrap();
		assert_eq!(
			config,
			BackoffConfig::Duplication {
				min: Duration::from_millis(250),
				max: Duration::from_secs(4),
			}
		);
	}

	proptest! {
		#[test]
		fn exponential_is_monotonic(
			initial_ms in 1u64..10_000,
			multiplier in 1.0f64..4.0,
			max_ms in 1u64..600_000,
			steps in 1usize..64,
		) {
			let max = Duration::from_millis(max_ms);
			let mut backoff =
				ExponentialBackoff::new(Duration::from_millis(initial_ms), multiplier, max);
			let mut previous = Duration::ZERO;
			for _ in 0..steps {
				let delay = backoff.next_delay();
				prop_assert!(delay >= previous);
				prop_assert!(delay <= max);
				previous = delay;
			}
		}

		#[test]
		fn duplication_is_monotonic(
			min_ms in 1u64..10_000,
			max_ms in 1u64..600_000,
			steps in 1usize..64,
		) {
			let max = Duration::from_millis(max_ms);
			let mut backoff = DuplicationBackoff::new(Duration::from_millis(min_ms), max);
			let mut previous = Duration::ZERO;
			for _ in 0..steps {
				let delay = backoff.next_delay();
				prop_assert!(delay >= previous);
				prop_assert!(delay <= max);
				previous = delay;
			}
		}

		#[test]
		fn server_clamp_never_below_minimum(
			min_ms in 0u64..5_000,
			initial_ms in 0u64..5_000,
		) {
			let minimum = Duration::from_millis(min_ms);
			let mut backoff = ExponentialBackoff::new(
				Duration::from_millis(initial_ms),
				2.0,
				Duration::from_secs(60),
			);
			prop_assert!(reconnect_delay(&mut backoff, true, minimum) >= minimum);
		}
	}
}
