use thiserror::Error;

use crate::config::ConfigError;
use crate::parse::ParseError;
use crate::prepare::AggregateError;
use crate::serial::{DeserializeError, SerializeError};
use crate::store::StoreError;
use crate::{CompileError, EvalError, ReconstructError};

/// One rule of a batch that failed to compile.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("rule '{rule}': {error}")]
pub struct RuleRejection {
    pub rule: String,
    pub error: CompileError,
}

/// Why a rule set was not stored. Nothing is stored on any error.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("{} rule(s) rejected: {}", .0.len(), join(.0))]
    Rejected(Vec<RuleRejection>),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Serialize(#[from] SerializeError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

fn join(rejections: &[RuleRejection]) -> String {
    rejections
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Why a raw transaction could not be turned into facts.
#[derive(Debug, Error)]
pub enum PreparationError {
    #[error("amount must be finite and non-negative, got {amount}")]
    InvalidAmount { amount: f64 },

    #[error("aggregates are configured but no aggregate source is attached")]
    NoAggregateSource,

    #[error("aggregate '{name}' failed: {source}")]
    Aggregate {
        name: String,
        #[source]
        source: AggregateError,
    },
}

/// Unified error type covering every fallible operation in the crate.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Submit(#[from] SubmitError),

    #[error(transparent)]
    Preparation(#[from] PreparationError),

    #[error(transparent)]
    Serialize(#[from] SerializeError),

    #[error(transparent)]
    Deserialize(#[from] DeserializeError),

    #[error(transparent)]
    Reconstruct(#[from] ReconstructError),

    #[error(transparent)]
    Eval(#[from] EvalError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid transaction JSON: {0}")]
    Json(#[from] serde_json::Error),
}
