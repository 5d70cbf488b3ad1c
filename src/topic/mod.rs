//! Topic handling for mapping resolution
//!
//! Topics and subscription patterns are normalized before they are
//! validated, indexed or matched, so that `a//b/` and `a/b` address the
//! same mappings.
//!
//! - `+` matches exactly one level
//! - `#` matches one or more trailing levels and must be the last level
//! - A leading `/` is significant: `/a` and `a` are different topics

mod tree;
pub mod validation;

pub use tree::{MappingTopicTree, TreeError};
pub use validation::{
    pattern_levels, template_matches_subscription, topic_matches_pattern,
    validate_subscription_topic, validate_template_topic,
};

/// Level separator
pub const SEPARATOR: char = '/';
/// Single-level wildcard
pub const WILDCARD_SINGLE: &str = "+";
/// Multi-level wildcard
pub const WILDCARD_MULTI: &str = "#";

/// Normalize a topic or subscription pattern.
///
/// Repeated separators collapse to one. A single trailing separator is
/// stripped, except after a `+` level where it is kept; `#/` becomes `#`.
pub fn normalize_topic(topic: &str) -> String {
    let trimmed = topic.trim();
    let mut out = String::with_capacity(trimmed.len());
    let mut previous_separator = false;
    for c in trimmed.chars() {
        let is_separator = c == SEPARATOR;
        if is_separator && previous_separator {
            continue;
        }
        previous_separator = is_separator;
        out.push(c);
    }

    loop {
        let trimmed_len = out.trim_end().len();
        out.truncate(trimmed_len);
        if out.len() <= 1 || !out.ends_with(SEPARATOR) {
            break;
        }
        let body = &out[..out.len() - 1];
        if body == WILDCARD_SINGLE || body.ends_with("/+") {
            break;
        }
        out.pop();
    }

    out
}

/// Split a topic keeping every separator as its own element.
///
/// `/d1/e1/f1/` becomes `["/", "d1", "/", "e1", "/", "f1", "/"]`.
pub fn split_topic_including_separator(topic: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    for (i, c) in topic.char_indices() {
        if c == SEPARATOR {
            if i > start {
                parts.push(&topic[start..i]);
            }
            parts.push(&topic[i..i + 1]);
            start = i + 1;
        }
    }
    if start < topic.len() {
        parts.push(&topic[start..]);
    }
    parts
}

/// Split a topic into its non-empty levels.
///
/// `/d1/e1/f1/` becomes `["d1", "e1", "f1"]`.
pub fn split_topic_excluding_separator(topic: &str) -> Vec<String> {
    topic
        .split(SEPARATOR)
        .filter(|level| !level.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    #[test_case("/rom/hamburg/madrid/#/", "/rom/hamburg/madrid/#" ; "trailing multi wildcard separator")]
    #[test_case("///rom/hamburg/madrid/+//", "/rom/hamburg/madrid/+/" ; "trailing single wildcard keeps separator")]
    #[test_case("a//b///c", "a/b/c" ; "interior separators collapse")]
    #[test_case("/device/east/", "/device/east" ; "trailing separator stripped")]
    #[test_case("/", "/" ; "root")]
    #[test_case("+/", "+/" ; "lone single wildcard")]
    #[test_case("  a/b  ", "a/b" ; "whitespace trimmed")]
    #[test_case("", "" ; "empty")]
    fn test_normalize_topic(input: &str, expected: &str) {
        assert_eq!(normalize_topic(input), expected);
    }

    #[test]
    fn test_split_including_separator() {
        assert_eq!(
            split_topic_including_separator("/d1/e1/f1/"),
            vec!["/", "d1", "/", "e1", "/", "f1", "/"]
        );
        assert_eq!(split_topic_including_separator("a/b"), vec!["a", "/", "b"]);
        assert!(split_topic_including_separator("").is_empty());
    }

    #[test]
    fn test_split_excluding_separator() {
        assert_eq!(
            split_topic_excluding_separator("/d1/e1/f1/"),
            vec!["d1", "e1", "f1"]
        );
        assert_eq!(split_topic_excluding_separator("a"), vec!["a"]);
    }

    proptest! {
        #[test]
        fn normalize_is_idempotent(topic in "[ a-c/+#]{0,16}") {
            let once = normalize_topic(&topic);
            prop_assert_eq!(normalize_topic(&once), once);
        }
    }
}
