use std::fmt;

use thiserror::Error;

use super::checked::Type;

/// One problem found while compiling a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Human-readable description.
    pub message: String,
    /// Byte offset into the source text, when known.
    pub offset: Option<usize>,
}

impl Diagnostic {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            offset: None,
        }
    }

    pub(crate) fn at(message: impl Into<String>, offset: usize) -> Self {
        Self {
            message: message.into(),
            offset: Some(offset),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.offset {
            Some(offset) => write!(f, "{} (at offset {offset})", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error("invalid expression: {}", join(diagnostics))]
    InvalidExpression { diagnostics: Vec<Diagnostic> },

    #[error("expression must evaluate to bool, found {found}")]
    WrongOutputType { found: Type },

    #[error("duplicate rule name '{name}'")]
    DuplicateRule { name: String },

    #[error("rule name must not be empty")]
    EmptyName,
}

fn join(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Failure to turn a decoded artifact into an executable [`Program`](crate::Program).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReconstructError {
    #[error("artifact references unknown field '{field}'")]
    UnknownField { field: String },

    #[error("field '{field}' is recorded as {recorded} but the schema declares {declared}")]
    FieldTypeMismatch {
        field: String,
        recorded: Type,
        declared: Type,
    },

    #[error("node {node}: {message}")]
    IllTyped { node: u32, message: String },

    #[error("artifact root evaluates to {found}, not bool")]
    NotBoolean { found: Type },
}

/// Failure while executing a rule against a transaction.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("no such key: '{key}'")]
    NoSuchKey { key: String },

    #[error("index {index} out of range for list of length {len}")]
    IndexOutOfRange { index: i64, len: usize },

    #[error("division by zero")]
    DivisionByZero,

    #[error("integer overflow in '{op}'")]
    Overflow { op: String },

    #[error("cannot convert {value} to {target}")]
    InvalidConversion { value: String, target: Type },

    #[error("node {node}: expected {expected}, found {found}")]
    TypeMismatch {
        node: u32,
        expected: String,
        found: String,
    },
}
