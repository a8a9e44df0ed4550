mod artifact;
pub(crate) mod ast;
pub(crate) mod checked;
mod error;
mod evaluation_report;
mod field_table;
mod program;
mod rule;
mod schema;
mod trace;
mod transaction;
mod value;

pub use artifact::{CompiledArtifact, FieldRef};
pub use ast::{BinaryOp, Expr, Literal, UnaryOp, MAX_DEPTH};
pub use checked::{ArithOp, CompareOp, Function, NodeId, Type};
pub(crate) use checked::{Node, NodeKind};
pub use error::{CompileError, Diagnostic, EvalError, ReconstructError};
pub use evaluation_report::{EvaluationReport, FailureStage, Outcome, RuleFailure};
pub use field_table::FieldTable;
pub use program::{EvalOptions, Execution, MissingKeyPolicy, Program};
pub use rule::{RuleSource, StoredRule};
pub use schema::{Field, Schema};
pub use trace::{Trace, TraceEntry};
pub use transaction::{RawTransaction, RawValue, Transaction};
pub use value::Value;
