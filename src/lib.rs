//! Transaction decision engine.
//!
//! Rules are expressions over a transaction (`txn.type == 'QRIS' &&
//! txn.riskScore >= 7`). They are compiled once into type-checked artifacts,
//! persisted as bytes in a [`RuleStore`], and evaluated concurrently against
//! each prepared transaction with per-rule failure isolation.

mod check;
mod compile;
mod config;
mod engine;
mod error;
mod evaluate;
mod orchestrate;
pub mod parse;
mod prepare;
pub mod serial;
mod store;
mod types;

pub use compile::compile;
pub use config::{ConfigError, EngineConfig};
pub use engine::{Engine, EngineBuilder};
pub use error::{Error, PreparationError, RuleRejection, SubmitError};
pub use orchestrate::{ExecutionMode, Orchestrator};
pub use prepare::{categorize, AggregateError, AggregateSource, Preparation};
pub use serial::{DeserializeError, SerializeError};
pub use store::{FileRuleStore, MemoryRuleStore, RuleStore, StoreError};
pub(crate) use types::{Node, NodeKind};
pub use types::{
    ArithOp, BinaryOp, CompareOp, CompileError, CompiledArtifact, Diagnostic, EvalError,
    EvalOptions, EvaluationReport, Execution, Expr, FailureStage, Field, FieldRef, FieldTable,
    Function, Literal, MissingKeyPolicy, NodeId, Outcome, Program, RawTransaction, RawValue,
    ReconstructError, RuleFailure, RuleSource, Schema, StoredRule, Trace, TraceEntry, Transaction,
    Type, UnaryOp, Value, MAX_DEPTH,
};
