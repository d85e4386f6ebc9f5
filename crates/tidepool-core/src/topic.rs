//! Topic names and subscription patterns
//!
//! Topics are `/`-separated levels. Subscription patterns follow MQTT rules:
//! `+` matches exactly one level, `#` matches the remaining levels (including
//! none) and must be the last level. Wildcards only occupy a whole level.

use std::fmt;

use crate::error::TopicError;

const SEPARATOR: char = '/';
const SINGLE: &str = "+";
const MULTI: &str = "#";

/// Check that a topic is publishable (non-empty, no wildcards)
pub fn validate_topic(topic: &str) -> Result<(), TopicError> {
    if topic.is_empty() {
        return Err(TopicError::Empty);
    }
    if topic.contains(['+', '#']) {
        return Err(TopicError::WildcardInTopic(topic.to_string()));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Level {
    Exact(String),
    Single,
    Multi,
}

/// A compiled subscription pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicPattern {
    raw: String,
    levels: Vec<Level>,
}

impl TopicPattern {
    /// Parse a subscription pattern
    pub fn parse(pattern: &str) -> Result<Self, TopicError> {
        if pattern.is_empty() {
            return Err(TopicError::Empty);
        }

        let parts: Vec<&str> = pattern.split(SEPARATOR).collect();
        let mut levels = Vec::with_capacity(parts.len());

        for (i, part) in parts.iter().enumerate() {
            let level = match *part {
                SINGLE => Level::Single,
                MULTI => {
                    if i != parts.len() - 1 {
                        return Err(TopicError::InvalidPattern {
                            pattern: pattern.to_string(),
                            reason: "'#' must be the last level",
                        });
                    }
                    Level::Multi
                }
                other if other.contains(['+', '#']) => {
                    return Err(TopicError::InvalidPattern {
                        pattern: pattern.to_string(),
                        reason: "wildcards must occupy a whole level",
                    });
                }
                other => Level::Exact(other.to_string()),
            };
            levels.push(level);
        }

        Ok(Self {
            raw: pattern.to_string(),
            levels,
        })
    }

    /// The pattern as written
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether this pattern contains no wildcard
    pub fn is_exact(&self) -> bool {
        self.levels.iter().all(|l| matches!(l, Level::Exact(_)))
    }

    /// Check whether a published topic matches this pattern
    pub fn matches(&self, topic: &str) -> bool {
        // System topics are only reachable by an explicit first level
        if topic.starts_with('$') && !matches!(self.levels.first(), Some(Level::Exact(_))) {
            return false;
        }

        let mut topic_levels = topic.split(SEPARATOR);

        for level in &self.levels {
            match level {
                Level::Multi => return true,
                Level::Single => {
                    if topic_levels.next().is_none() {
                        return false;
                    }
                }
                Level::Exact(expected) => match topic_levels.next() {
                    Some(actual) if actual == expected => {}
                    _ => return false,
                },
            }
        }

        topic_levels.next().is_none()
    }
}

impl fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
