// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Topic pattern matching and subscriptions

/// Pattern for matching topics
/// Supports:
///   - Exact: "rwgate:request"
///   - Single wildcard: "rwgate:*" matches "rwgate:request", "rwgate:release"
///   - Rest wildcard: "rwgate:**" matches every topic under the prefix
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TopicPattern(String);

impl TopicPattern {
    pub fn new(pattern: &str) -> Self {
        Self(pattern.to_string())
    }

    /// Check if this pattern matches a topic
    pub fn matches(&self, topic: &str) -> bool {
        if self.0.is_empty() {
            return false;
        }

        if self.0 == "*" || self.0 == "**" {
            return true;
        }

        let pattern_parts: Vec<&str> = self.0.split(':').collect();
        let topic_parts: Vec<&str> = topic.split(':').collect();

        Self::match_segments(&pattern_parts, &topic_parts)
    }

    fn match_segments(pattern: &[&str], topic: &[&str]) -> bool {
        match (pattern.first(), topic.first()) {
            (None, None) => true,
            (Some(&"**"), _) => true,
            (Some(&"*"), Some(_)) => Self::match_segments(&pattern[1..], &topic[1..]),
            (Some(p), Some(t)) if *p == *t => Self::match_segments(&pattern[1..], &topic[1..]),
            _ => false,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TopicPattern {
    fn from(pattern: &str) -> Self {
        Self::new(pattern)
    }
}

/// Subscriber handle for unsubscribing
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SubscriberId(pub String);

/// A subscription to specific topic patterns
#[derive(Clone, Debug)]
pub struct Subscription {
    pub id: SubscriberId,
    pub patterns: Vec<TopicPattern>,
    pub description: String,
}

impl Subscription {
    pub fn new(
        id: impl Into<String>,
        patterns: Vec<TopicPattern>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: SubscriberId(id.into()),
            patterns,
            description: description.into(),
        }
    }

    /// Subscription to an explicit list of exact topics
    pub fn topics<'a>(
        id: impl Into<String>,
        topics: impl IntoIterator<Item = &'a str>,
        description: impl Into<String>,
    ) -> Self {
        Self::new(
            id,
            topics.into_iter().map(TopicPattern::new).collect(),
            description,
        )
    }

    /// Check if any pattern matches the topic
    pub fn matches(&self, topic: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(topic))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match() {
        let pattern = TopicPattern::new("rwgate:request");
        assert!(pattern.matches("rwgate:request"));
        assert!(!pattern.matches("rwgate:release"));
    }

    #[test]
    fn single_wildcard_matches_one_segment() {
        let pattern = TopicPattern::new("rwgate:*");
        assert!(pattern.matches("rwgate:request"));
        assert!(pattern.matches("rwgate:clean-worker"));
        assert!(!pattern.matches("other:request"));
        assert!(!pattern.matches("rwgate:a:b"));
    }

    #[test]
    fn rest_wildcard_matches_everything_below() {
        let pattern = TopicPattern::new("rwgate:**");
        assert!(pattern.matches("rwgate:request"));
        assert!(pattern.matches("rwgate:a:b"));
        assert!(!pattern.matches("files:request"));
    }

    #[test]
    fn empty_pattern_matches_nothing() {
        assert!(!TopicPattern::new("").matches("rwgate:request"));
    }

    #[test]
    fn subscription_matches_any_topic() {
        let sub = Subscription::topics("s", ["a:x", "b:y"], "two topics");
        assert!(sub.matches("a:x"));
        assert!(sub.matches("b:y"));
        assert!(!sub.matches("a:y"));
    }
}
