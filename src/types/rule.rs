use serde::{Deserialize, Serialize};

/// A rule as authored: a unique name and the expression text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSource {
    pub name: String,
    pub text: String,
}

impl RuleSource {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }
}

impl<N: Into<String>, T: Into<String>> From<(N, T)> for RuleSource {
    fn from((name, text): (N, T)) -> Self {
        Self::new(name, text)
    }
}

/// A compiled rule as held by a [`RuleStore`](crate::RuleStore).
///
/// The artifact is kept in its byte-serialized form; every evaluation decodes
/// and reconstructs its own executable copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRule {
    pub name: String,
    /// The original expression text, kept for audit and debugging.
    pub source: String,
    pub artifact: Vec<u8>,
}
