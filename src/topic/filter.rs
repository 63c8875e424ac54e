use std::fmt::{self, Display};
use std::str::FromStr;

use arcstr::ArcStr;
use smallvec::SmallVec;

use super::error::{TopicFilterError, limits};

/// One level of a parsed topic filter
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FilterLevel {
	/// Exact level text
	Literal(ArcStr),
	/// `+`, matches exactly one level
	SingleLevel,
	/// `#`, matches the parent level and any number of child levels
	MultiLevel,
}

/// Validated MQTT topic filter, as sent in a SUBSCRIBE packet.
///
/// Wildcards follow MQTT 3.1.1 section 4.7: `+` must occupy a whole level,
/// `#` must occupy the whole last level. Wildcards in the first level never
/// match topics starting with `$`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicFilter {
	raw: ArcStr,
	levels: SmallVec<[FilterLevel; 8]>,
}

impl TopicFilter {
	/// Parses and validates a filter string.
	pub fn parse(filter: impl Into<ArcStr>) -> Result<Self, TopicFilterError> {
		let raw = filter.into();
		check_common_limits(&raw)?;

		let segments: Vec<&str> = raw.split('/').collect();
		let last = segments.len() - 1;
		let mut levels = SmallVec::with_capacity(segments.len());
		for (index, segment) in segments.iter().enumerate() {
			let level = match *segment {
				| "+" => FilterLevel::SingleLevel,
				| "#" if index == last => FilterLevel::MultiLevel,
				| "#" => {
					return Err(TopicFilterError::HashNotLast {
						filter: raw.to_string(),
					});
				}
				| other if other.contains(['+', '#']) => {
					return Err(TopicFilterError::PartialWildcard {
						segment: other.to_string(),
					});
				}
				| other => FilterLevel::Literal(ArcStr::from(other)),
			};
			levels.push(level);
		}
		Ok(Self { raw, levels })
	}

	/// Original filter text
	pub fn as_str(&self) -> &str {
		&self.raw
	}

	/// Parsed levels
	pub fn levels(&self) -> &[FilterLevel] {
		&self.levels
	}

	/// Whether the filter contains `+` or `#`
	pub fn has_wildcards(&self) -> bool {
		self.levels.iter().any(|level| !matches!(level, FilterLevel::Literal(_)))
	}

	/// Checks whether a concrete topic name matches this filter.
	pub fn matches(&self, topic: &str) -> bool {
		let system_topic = topic.starts_with('$');
		let mut topic_levels = topic.split('/');
		for (index, level) in self.levels.iter().enumerate() {
			match level {
				| FilterLevel::MultiLevel => {
					return !(index == 0 && system_topic);
				}
				| FilterLevel::SingleLevel => {
					if topic_levels.next().is_none()
						|| (index == 0 && system_topic)
					{
						return false;
					}
				}
				| FilterLevel::Literal(expected) => {
					match topic_levels.next() {
						| Some(actual) if actual == expected.as_str() => {}
						| _ => return false,
					}
				}
			}
		}
		topic_levels.next().is_none()
	}
}

impl Display for TopicFilter {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.raw)
	}
}

impl FromStr for TopicFilter {
	type Err = TopicFilterError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::parse(s)
	}
}

impl TryFrom<&str> for TopicFilter {
	type Error = TopicFilterError;

	fn try_from(value: &str) -> Result<Self, Self::Error> {
		Self::parse(value)
	}
}

/// Validates a concrete topic name used for PUBLISH.
pub fn validate_publish_topic(topic: &str) -> Result<(), TopicFilterError> {
	check_common_limits(topic)?;
	if topic.contains(['+', '#']) {
		return Err(TopicFilterError::WildcardInTopic {
			topic: topic.to_string(),
		});
	}
	Ok(())
}

fn check_common_limits(text: &str) -> Result<(), TopicFilterError> {
	if text.is_empty() {
		return Err(TopicFilterError::Empty);
	}
	if text.len() > limits::MAX_TOPIC_LENGTH {
		return Err(TopicFilterError::TooLong {
			length: text.len(),
			max: limits::MAX_TOPIC_LENGTH,
		});
	}
	let mut depth = 0;
	for (level, segment) in text.split('/').enumerate() {
		depth = level + 1;
		if segment.contains('\0') {
			return Err(TopicFilterError::NullByte { level });
		}
	}
	if depth > limits::MAX_TOPIC_DEPTH {
		return Err(TopicFilterError::TooDeep {
			depth,
			max: limits::MAX_TOPIC_DEPTH,
		});
	}
	Ok(())
}
