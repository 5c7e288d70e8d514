use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// Event-type filter: `*`, `prefix.*`, or an exact type.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EventPattern {
    #[default]
    Any,
    /// `payment.*`; holds `payment`.
    Prefix(String),
    Exact(String),
}

impl EventPattern {
    pub fn parse(pattern: &str) -> Self {
        if pattern == "*" {
            EventPattern::Any
        } else if let Some(prefix) = pattern.strip_suffix(".*") {
            EventPattern::Prefix(prefix.to_string())
        } else {
            EventPattern::Exact(pattern.to_string())
        }
    }

    pub fn matches(&self, event_type: &str) -> bool {
        match self {
            EventPattern::Any => true,
            EventPattern::Prefix(prefix) => event_type
                .strip_prefix(prefix.as_str())
                .is_some_and(|rest| rest.starts_with('.')),
            EventPattern::Exact(exact) => event_type == exact,
        }
    }

    pub fn is_any(&self) -> bool {
        matches!(self, EventPattern::Any)
    }
}

impl FromStr for EventPattern {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(EventPattern::parse(s))
    }
}

impl fmt::Display for EventPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventPattern::Any => f.write_str("*"),
            EventPattern::Prefix(prefix) => write!(f, "{prefix}.*"),
            EventPattern::Exact(exact) => f.write_str(exact),
        }
    }
}

/// Match `event_type` against a raw pattern string.
pub fn matches(event_type: &str, pattern: &str) -> bool {
    EventPattern::parse(pattern).matches(event_type)
}
