//! Values carried on the queues between stages

use crate::error::PipelineError;

/// Payload shape of an [`Item`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Integer,
    Text,
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Integer => f.write_str("integer"),
            Self::Text => f.write_str("text"),
        }
    }
}

/// One value flowing through a pipeline queue.
///
/// The source edge carries integers; every edge after the first stage
/// carries text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Item {
    Integer(i64),
    Text(String),
}

impl Item {
    /// Decimal text form of a numeric item.
    ///
    /// Accepts `Integer` and `Text` holding exactly a base-10 integer
    /// (surrounding whitespace is not a number). The text is re-rendered so
    /// `"007"` and `7` hash identically.
    pub fn into_numeric_text(self, stage: &'static str) -> Result<String, PipelineError> {
        match self {
            Self::Integer(n) => Ok(n.to_string()),
            Self::Text(s) => match s.parse::<i64>() {
                Ok(n) => Ok(n.to_string()),
                Err(_) => Err(PipelineError::Shape {
                    stage,
                    expected: ItemKind::Integer,
                    found: describe_text(&s),
                }),
            },
        }
    }

    /// Text payload; any other shape is a fatal shape error.
    pub fn into_text(self, stage: &'static str) -> Result<String, PipelineError> {
        match self {
            Self::Text(s) => Ok(s),
            Self::Integer(n) => Err(PipelineError::Shape {
                stage,
                expected: ItemKind::Text,
                found: format!("integer {n}"),
            }),
        }
    }
}

impl From<i64> for Item {
    fn from(n: i64) -> Self {
        Self::Integer(n)
    }
}

impl From<String> for Item {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for Item {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

/// Short description for error messages (long payloads are cut off)
fn describe_text(s: &str) -> String {
    const MAX: usize = 32;
    match s.char_indices().nth(MAX) {
        Some((cut, _)) => format!("text {:?}...", &s[..cut]),
        None => format!("text {s:?}"),
    }
}
