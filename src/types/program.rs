use serde::{Deserialize, Serialize};

use super::artifact::CompiledArtifact;
use super::checked::{Node, Type};
use super::error::{EvalError, ReconstructError};
use super::field_table::FieldTable;
use super::schema::Schema;
use super::trace::Trace;
use super::transaction::Transaction;

/// What a map lookup on a missing key evaluates to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingKeyPolicy {
    /// The lookup fails with [`EvalError::NoSuchKey`].
    #[default]
    Error,
    /// The lookup yields the zero value of the map's value type
    /// (`false`, `0.0`, `""`).
    ZeroValue,
}

/// Per-execution knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvalOptions {
    pub missing_keys: MissingKeyPolicy,
    /// Record sub-expression values.
    pub trace: bool,
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self {
            missing_keys: MissingKeyPolicy::Error,
            trace: true,
        }
    }
}

/// The result of one successful execution.
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    pub matched: bool,
    pub trace: Option<Trace>,
}

/// An executable rule: a verified expression whose fields are bound to a schema.
///
/// Programs are immutable and `Send + Sync`.
#[derive(Debug, Clone)]
pub struct Program {
    pub(crate) root: Node,
    pub(crate) fields: FieldTable,
}

impl Program {
    /// Bind an artifact to `schema`, re-verifying its typing.
    ///
    /// # Errors
    ///
    /// Returns [`ReconstructError`] if a field is unknown to the schema, a
    /// field type disagrees with the schema, or the tree is ill-typed.
    pub fn from_artifact(
        artifact: CompiledArtifact,
        schema: &Schema,
    ) -> Result<Self, ReconstructError> {
        let mut resolved = Vec::with_capacity(artifact.fields.len());
        for field_ref in &artifact.fields {
            let field = schema
                .canonical(&field_ref.name)
                .ok_or_else(|| ReconstructError::UnknownField {
                    field: field_ref.name.clone(),
                })?;
            if field.ty() != field_ref.ty {
                return Err(ReconstructError::FieldTypeMismatch {
                    field: field_ref.name.clone(),
                    recorded: field_ref.ty.clone(),
                    declared: field.ty(),
                });
            }
            resolved.push(field);
        }
        let fields = FieldTable::from_fields(resolved);

        crate::check::verify(&artifact.root, &fields)?;
        if artifact.root.ty != Type::Bool {
            return Err(ReconstructError::NotBoolean {
                found: artifact.root.ty,
            });
        }

        Ok(Self {
            root: artifact.root,
            fields,
        })
    }

    /// Evaluate against a transaction.
    ///
    /// # Errors
    ///
    /// Returns [`EvalError`] when the expression cannot be evaluated, e.g. a
    /// missing map key under [`MissingKeyPolicy::Error`].
    pub fn execute(
        &self,
        txn: &Transaction,
        options: &EvalOptions,
    ) -> Result<Execution, EvalError> {
        crate::evaluate::execute(self, txn, options)
    }
}
