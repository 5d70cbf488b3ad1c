//! Subscription and template topic validation
//!
//! Key rules:
//! - Subscription topics MAY contain wildcards
//! - Multi-level wildcard (#) must occupy the last level
//! - Single-level wildcard (+) must occupy an entire level
//! - Template topics are concrete examples and must not contain `#`
//! - A template topic must be matched by its subscription topic

use regex::Regex;
use smallvec::SmallVec;

use super::{normalize_topic, SEPARATOR, WILDCARD_MULTI, WILDCARD_SINGLE};
use crate::mapping::ValidationError;

/// Split a normalized pattern into the levels the topic tree indexes.
///
/// A trailing separator (kept after `+` by normalization) does not add a level.
pub fn pattern_levels(pattern: &str) -> Result<SmallVec<[&str; 8]>, &'static str> {
    if pattern.is_empty() {
        return Err("topic pattern cannot be empty");
    }

    let mut levels: SmallVec<[&str; 8]> = pattern.split(SEPARATOR).collect();
    if levels.len() > 1 && levels.last() == Some(&"") {
        levels.pop();
    }

    for (i, level) in levels.iter().enumerate() {
        if level.is_empty() && i > 0 {
            return Err("topic pattern contains an empty interior level");
        }
        if level.contains(WILDCARD_MULTI) {
            if *level != WILDCARD_MULTI {
                return Err("multi-level wildcard must occupy entire level");
            }
            if i != levels.len() - 1 {
                return Err("multi-level wildcard must be last level");
            }
        }
        if level.contains(WILDCARD_SINGLE) && *level != WILDCARD_SINGLE {
            return Err("single-level wildcard must occupy entire level");
        }
    }

    Ok(levels)
}

/// Validate a subscription topic, collecting every violation found
pub fn validate_subscription_topic(topic: &str) -> Vec<ValidationError> {
    let mut result = Vec::new();
    let topic = normalize_topic(topic);
    if topic.is_empty() {
        result.push(ValidationError::SubscriptionTopicMustNotBeEmpty);
        return result;
    }

    let multi_count = topic.matches(WILDCARD_MULTI).count();
    if multi_count > 1 {
        result.push(ValidationError::OnlyOneMultiLevelWildcard);
    }
    if multi_count >= 1 && !topic.ends_with(WILDCARD_MULTI) {
        result.push(ValidationError::MultiLevelWildcardOnlyAtEnd);
    }

    let partial_level = topic.split(SEPARATOR).any(|level| {
        (level.contains(WILDCARD_SINGLE) && level != WILDCARD_SINGLE)
            || (level.contains(WILDCARD_MULTI) && level != WILDCARD_MULTI)
    });
    if partial_level {
        result.push(ValidationError::WildcardMustOccupyWholeLevel);
    }

    result
}

/// Validate a template topic
///
/// Template topics may contain any number of `+` but no `#`.
pub fn validate_template_topic(topic: &str) -> Vec<ValidationError> {
    let mut result = Vec::new();
    if normalize_topic(topic).is_empty() {
        result.push(ValidationError::TemplateTopicMustNotBeEmpty);
    }
    if topic.contains(WILDCARD_MULTI) {
        result.push(ValidationError::NoMultiLevelWildcardAllowedInTemplateTopic);
    }
    result
}

/// Normalized topic without the cosmetic trailing separator
fn canonical(topic: &str) -> String {
    let mut topic = normalize_topic(topic);
    if topic.len() > 1 && topic.ends_with(SEPARATOR) {
        topic.pop();
    }
    topic
}

/// Check that a template topic is covered by a subscription topic.
///
/// `+` matches one non-empty level and a trailing `#` matches whatever
/// follows its separator, so `/device/#` covers `/device/east/` but not
/// `/device`.
pub fn template_matches_subscription(subscription: &str, template: &str) -> bool {
    let subscription = canonical(subscription);
    let template = canonical(template);

    let body = subscription
        .split(SEPARATOR)
        .map(|level| match level {
            WILDCARD_SINGLE => "[^/]+".to_string(),
            WILDCARD_MULTI => ".*".to_string(),
            literal => regex::escape(literal),
        })
        .collect::<Vec<_>>()
        .join("/");

    match Regex::new(&format!("^{}$", body)) {
        Ok(re) => re.is_match(&template),
        Err(_) => false,
    }
}

/// Check if a subscription pattern matches a concrete topic
///
/// Matching rules:
/// - / is the level separator
/// - + matches exactly one level
/// - # matches one or more remaining levels (must be last)
pub fn topic_matches_pattern(pattern: &str, topic: &str) -> bool {
    let pattern = canonical(pattern);
    let topic = canonical(topic);

    let topic_levels: SmallVec<[&str; 8]> = topic.split(SEPARATOR).collect();
    let pattern_levels: SmallVec<[&str; 8]> = pattern.split(SEPARATOR).collect();

    let mut ti = 0;
    let mut pi = 0;

    while pi < pattern_levels.len() {
        let pattern_level = pattern_levels[pi];

        if pattern_level == WILDCARD_MULTI {
            // # needs at least one level to consume
            return ti < topic_levels.len();
        }

        if ti >= topic_levels.len() {
            return false;
        }

        if pattern_level == WILDCARD_SINGLE || pattern_level == topic_levels[ti] {
            ti += 1;
            pi += 1;
        } else {
            return false;
        }
    }

    ti == topic_levels.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_pattern_levels() {
        assert_eq!(pattern_levels("a/b").unwrap().as_slice(), &["a", "b"]);
        assert_eq!(pattern_levels("/a/+/").unwrap().as_slice(), &["", "a", "+"]);
        assert_eq!(pattern_levels("/").unwrap().as_slice(), &[""]);
        assert_eq!(pattern_levels("#").unwrap().as_slice(), &["#"]);

        assert!(pattern_levels("").is_err());
        assert!(pattern_levels("a//b").is_err());
        assert!(pattern_levels("a/#/b").is_err());
        assert!(pattern_levels("a/b#").is_err());
        assert!(pattern_levels("a/b+/c").is_err());
    }

    #[test]
    fn test_validate_subscription_topic() {
        assert!(validate_subscription_topic("/device/+/data").is_empty());
        assert!(validate_subscription_topic("/device/#").is_empty());
        assert!(validate_subscription_topic("a/+/+").is_empty());

        assert_eq!(
            validate_subscription_topic("/device/#/data"),
            vec![ValidationError::MultiLevelWildcardOnlyAtEnd]
        );
        assert_eq!(
            validate_subscription_topic("a/#/#"),
            vec![ValidationError::OnlyOneMultiLevelWildcard]
        );
        assert_eq!(
            validate_subscription_topic("a/b+"),
            vec![ValidationError::WildcardMustOccupyWholeLevel]
        );
        assert_eq!(
            validate_subscription_topic(" "),
            vec![ValidationError::SubscriptionTopicMustNotBeEmpty]
        );
    }

    #[test]
    fn test_validate_template_topic() {
        assert!(validate_template_topic("/device/+/east").is_empty());
        assert_eq!(
            validate_template_topic("/device/#"),
            vec![ValidationError::NoMultiLevelWildcardAllowedInTemplateTopic]
        );
        assert_eq!(
            validate_template_topic(""),
            vec![ValidationError::TemplateTopicMustNotBeEmpty]
        );
    }

    #[test_case("/device/#", "/device/east/", true ; "multi wildcard covers deeper template")]
    #[test_case("/device/#", "/device", false ; "multi wildcard needs a level")]
    #[test_case("/device/+/east/", "/device/us/east/", true ; "single wildcard")]
    #[test_case("/device/+/east", "/device/us/west", false ; "literal mismatch")]
    #[test_case("/device/+", "/device/a/b", false ; "single wildcard spans one level")]
    #[test_case("a.b/+", "axb/c", false ; "literal dots are escaped")]
    fn test_template_matches_subscription(subscription: &str, template: &str, expected: bool) {
        assert_eq!(
            template_matches_subscription(subscription, template),
            expected
        );
    }

    #[test]
    fn test_topic_matches_pattern() {
        assert!(topic_matches_pattern("a/b", "a/b"));
        assert!(!topic_matches_pattern("a/b", "a"));
        assert!(topic_matches_pattern("a/+", "a/c"));
        assert!(!topic_matches_pattern("a/+", "a/c/d"));
        assert!(topic_matches_pattern("a/#", "a/c/d"));
        assert!(!topic_matches_pattern("a/#", "a"));
        assert!(topic_matches_pattern("/a/+/", "/a/x/"));
        assert!(!topic_matches_pattern("/a", "a"));
    }
}
