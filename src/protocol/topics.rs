//! Topic matching for mower update topics
//!
//! Mowers publish status on a fixed hierarchy such as `/device/{device_id}/update`.
//! A [`TopicPattern`] describes one such hierarchy with a single `+` segment that
//! captures the device identifier; a [`TopicMatcher`] holds every configured
//! pattern and is the only place that knows about topic layout.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use thiserror::Error;

/// Single-level wildcard in MQTT filters
const SINGLE_LEVEL_WILDCARD: &str = "+";

/// Identifier of one physical mower, taken verbatim from the topic path
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for DeviceId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DeviceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Invalid topic pattern configuration
#[derive(Debug, Error, PartialEq)]
pub enum TopicError {
    #[error("Topic pattern cannot be empty")]
    EmptyPattern,
    #[error("Topic pattern '{0}' must contain exactly one '+' segment for the device id")]
    MissingDeviceSegment(String),
    #[error("Topic pattern '{pattern}' has an invalid segment '{segment}'")]
    InvalidSegment { pattern: String, segment: String },
}

#[derive(Debug, Clone, PartialEq)]
enum PatternSegment {
    Static(String),
    DeviceId,
}

/// One device-update topic layout, e.g. `/device/+/update`
#[derive(Debug, Clone, PartialEq)]
pub struct TopicPattern {
    filter: String,
    segments: Vec<PatternSegment>,
}

impl TopicPattern {
    /// Parse an MQTT filter with exactly one `+` segment
    pub fn parse(pattern: &str) -> Result<Self, TopicError> {
        if pattern.is_empty() {
            return Err(TopicError::EmptyPattern);
        }

        let mut segments = Vec::new();
        let mut wildcards = 0;
        for segment in pattern.split('/') {
            if segment == SINGLE_LEVEL_WILDCARD {
                wildcards += 1;
                segments.push(PatternSegment::DeviceId);
            } else if segment.contains('+') || segment.contains('#') {
                return Err(TopicError::InvalidSegment {
                    pattern: pattern.to_string(),
                    segment: segment.to_string(),
                });
            } else {
                segments.push(PatternSegment::Static(segment.to_string()));
            }
        }

        if wildcards != 1 {
            return Err(TopicError::MissingDeviceSegment(pattern.to_string()));
        }

        Ok(Self {
            filter: pattern.to_string(),
            segments,
        })
    }

    /// Build the vendor update pattern: `/{prefix}/+/update`
    pub fn update_topic(prefix: &str) -> Result<Self, TopicError> {
        let prefix = prefix.trim_matches('/');
        if prefix.is_empty() {
            return Err(TopicError::EmptyPattern);
        }
        Self::parse(&format!("/{prefix}/+/update"))
    }

    /// The MQTT subscription filter for this pattern
    pub fn filter(&self) -> &str {
        &self.filter
    }

    /// Capture the device id if `topic` fits this pattern exactly
    pub fn capture(&self, topic: &str) -> Option<DeviceId> {
        let mut captured = None;
        let mut levels = topic.split('/');

        for segment in &self.segments {
            let level = levels.next()?;
            match segment {
                PatternSegment::Static(expected) if expected == level => {}
                PatternSegment::Static(_) => return None,
                PatternSegment::DeviceId => {
                    if level.is_empty() {
                        return None;
                    }
                    captured = Some(DeviceId::new(level));
                }
            }
        }

        // Topic has more levels than the pattern
        if levels.next().is_some() {
            return None;
        }

        captured
    }
}

/// Result of a successful topic match
#[derive(Debug, Clone, PartialEq)]
pub struct TopicMatch {
    pub device_id: DeviceId,
    /// Index of the pattern that matched, in configuration order
    pub pattern_index: usize,
}

/// Matches incoming topics against the configured device-update patterns
#[derive(Debug, Clone)]
pub struct TopicMatcher {
    patterns: Vec<TopicPattern>,
}

impl TopicMatcher {
    pub fn new(patterns: Vec<TopicPattern>) -> Self {
        Self { patterns }
    }

    /// Matcher for the vendor update topic under `prefix`, plus any extra filters
    pub fn from_prefix(prefix: &str, extra_patterns: &[String]) -> Result<Self, TopicError> {
        let mut patterns = vec![TopicPattern::update_topic(prefix)?];
        for raw in extra_patterns {
            let pattern = TopicPattern::parse(raw)?;
            if !patterns.contains(&pattern) {
                patterns.push(pattern);
            }
        }
        Ok(Self::new(patterns))
    }

    /// Filters to subscribe to, one per pattern
    pub fn subscription_filters(&self) -> Vec<String> {
        self.patterns.iter().map(|p| p.filter().to_string()).collect()
    }

    pub fn patterns(&self) -> &[TopicPattern] {
        &self.patterns
    }

    /// First pattern wins; `None` means the topic is unrelated traffic
    pub fn match_topic(&self, topic: &str) -> Option<TopicMatch> {
        self.patterns
            .iter()
            .enumerate()
            .find_map(|(pattern_index, pattern)| {
                pattern.capture(topic).map(|device_id| TopicMatch {
                    device_id,
                    pattern_index,
                })
            })
    }
}
