//! Label matchers attached to routing tree nodes.

use std::{cmp::Ordering, fmt, str::FromStr};

use regex::Regex;
use thiserror::Error;

use crate::models::LabelSet;

/// Errors raised while parsing or compiling a matcher.
#[derive(Debug, Error)]
pub enum MatcherError {
    /// The textual matcher form could not be split into name, operator and
    /// value.
    #[error("Invalid matcher expression: '{0}'")]
    InvalidExpression(String),

    /// The matcher has an empty label name.
    #[error("Matcher has an empty label name: '{0}'")]
    EmptyName(String),

    /// The regular expression of a regex matcher failed to compile.
    #[error("Invalid matcher regex for label '{name}': {source}")]
    InvalidRegex {
        /// The label name the regex applies to.
        name: String,
        /// The underlying regex compilation error.
        #[source]
        source: regex::Error,
    },
}

/// The comparison a matcher applies to a label value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MatchOperator {
    /// Exact equality (`=`).
    Equal,
    /// Exact inequality (`!=`).
    NotEqual,
    /// Full-value regex match (`=~`).
    Regex,
    /// Negated full-value regex match (`!~`).
    NotRegex,
}

impl fmt::Display for MatchOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            MatchOperator::Equal => "=",
            MatchOperator::NotEqual => "!=",
            MatchOperator::Regex => "=~",
            MatchOperator::NotRegex => "!~",
        };
        write!(f, "{}", op)
    }
}

/// A single label predicate of a routing tree node.
///
/// An absent label is matched as the empty string, so `name=""` matches
/// alerts without the label and `name!=""` requires its presence.
#[derive(Debug, Clone)]
pub struct Matcher {
    name: String,
    op: MatchOperator,
    value: String,
    regex: Option<Regex>,
}

impl Matcher {
    /// Creates a matcher, compiling the regex for regex operators.
    ///
    /// Regex values are anchored to the full label value.
    pub fn new(
        name: impl Into<String>,
        op: MatchOperator,
        value: impl Into<String>,
    ) -> Result<Self, MatcherError> {
        let name = name.into();
        let value = value.into();

        if name.is_empty() {
            return Err(MatcherError::EmptyName(format!("{}\"{}\"", op, value)));
        }

        let regex = match op {
            MatchOperator::Regex | MatchOperator::NotRegex => {
                let anchored = format!("^(?:{})$", value);
                Some(Regex::new(&anchored).map_err(|source| MatcherError::InvalidRegex {
                    name: name.clone(),
                    source,
                })?)
            }
            MatchOperator::Equal | MatchOperator::NotEqual => None,
        };

        Ok(Self { name, op, value, regex })
    }

    /// The label name this matcher inspects.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The operator this matcher applies.
    pub fn op(&self) -> MatchOperator {
        self.op
    }

    /// The right-hand side value of the matcher.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Returns true if the given label set satisfies this matcher.
    pub fn matches(&self, labels: &LabelSet) -> bool {
        let value = labels.get(&self.name).unwrap_or("");
        match self.op {
            MatchOperator::Equal => value == self.value,
            MatchOperator::NotEqual => value != self.value,
            // The regex is always present for regex operators.
            MatchOperator::Regex => self.regex.as_ref().is_some_and(|re| re.is_match(value)),
            MatchOperator::NotRegex => !self.regex.as_ref().is_some_and(|re| re.is_match(value)),
        }
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}\"{}\"", self.name, self.op, self.value)
    }
}

impl PartialEq for Matcher {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.op == other.op && self.value == other.value
    }
}

impl Eq for Matcher {}

impl PartialOrd for Matcher {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Matcher {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name
            .cmp(&other.name)
            .then_with(|| self.op.cmp(&other.op))
            .then_with(|| self.value.cmp(&other.value))
    }
}

impl FromStr for Matcher {
    type Err = MatcherError;

    /// Parses the textual forms `name="v"`, `name!="v"`, `name=~"v"` and
    /// `name!~"v"` (quotes optional).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();

        // Longest operators first so `!=` is not split as `=`.
        for (token, op) in [
            ("!=", MatchOperator::NotEqual),
            ("=~", MatchOperator::Regex),
            ("!~", MatchOperator::NotRegex),
            ("=", MatchOperator::Equal),
        ] {
            if let Some(idx) = trimmed.find(token) {
                let name = trimmed[..idx].trim();
                let raw_value = trimmed[idx + token.len()..].trim();
                let value = raw_value.trim_matches('"');
                return Matcher::new(name, op, value);
            }
        }

        Err(MatcherError::InvalidExpression(trimmed.to_string()))
    }
}
