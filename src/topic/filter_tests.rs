use super::error::TopicFilterError;
use super::filter::{FilterLevel, TopicFilter, validate_publish_topic};

// Helper: every (topic, expected) pair is checked against one filter
fn assert_matches(filter: &str, cases: &[(&str, bool)]) {
	let filter = TopicFilter::parse(filter).unwrap();
	for (topic, expected) in cases {
		assert_eq!(
			filter.matches(topic),
			*expected,
			"filter '{}' vs topic '{}'",
			filter,
			topic
		);
	}
}

#[test]
fn test_exact_filter() {
	assert_matches("sensors/temperature", &[
		("sensors/temperature", true),
		("sensors/humidity", false),
		("sensors/temperature/room1", false),
		("sensors", false),
	]);
}

#[test]
fn test_single_level_wildcard() {
	assert_matches("sensors/+/status", &[
		("sensors/kitchen/status", true),
		("sensors//status", true),
		("sensors/kitchen/door/status", false),
		("sensors/status", false),
	]);
}

#[test]
fn test_multi_level_wildcard_matches_parent() {
	assert_matches("devices/#", &[
		("devices", true),
		("devices/light", true),
		("devices/light/1/state", true),
		("device", false),
	]);
}

#[test]
fn test_wildcards_skip_system_topics() {
	assert_matches("#", &[("$SYS/broker/load", false), ("a/b", true)]);
	assert_matches("+/broker/load", &[
		("$SYS/broker/load", false),
		("x/broker/load", true),
	]);
	assert_matches("$SYS/#", &[("$SYS/broker/load", true)]);
}

#[test]
fn test_parse_levels() {
	let filter = TopicFilter::parse("a/+/#").unwrap();
	assert_eq!(filter.levels().len(), 3);
	assert!(matches!(filter.levels()[1], FilterLevel::SingleLevel));
	assert!(matches!(filter.levels()[2], FilterLevel::MultiLevel));
	assert!(filter.has_wildcards());
	assert!(!TopicFilter::parse("a/b").unwrap().has_wildcards());
}

#[test]
fn test_invalid_filters() {
	assert_eq!(TopicFilter::parse(""), Err(TopicFilterError::Empty));
	assert!(matches!(
		TopicFilter::parse("a/#/b"),
		Err(TopicFilterError::HashNotLast { .. })
	));
	assert!(matches!(
		TopicFilter::parse("a/b+/c"),
		Err(TopicFilterError::PartialWildcard { .. })
	));
	assert!(matches!(
		TopicFilter::parse("a/b#"),
		Err(TopicFilterError::PartialWildcard { .. })
	));
	assert!(matches!(
		TopicFilter::parse("a/\0/c"),
		Err(TopicFilterError::NullByte { level: 1 })
	));
}

#[test]
fn test_publish_topic_validation() {
	assert!(validate_publish_topic("things/abc/events").is_ok());
	assert!(matches!(
		validate_publish_topic("things/+/events"),
		Err(TopicFilterError::WildcardInTopic { .. })
	));
	assert_eq!(validate_publish_topic(""), Err(TopicFilterError::Empty));
}
