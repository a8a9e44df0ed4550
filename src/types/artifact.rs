use std::fmt;

use super::checked::{Node, Type};
use super::error::ReconstructError;
use super::program::Program;
use super::schema::Schema;

/// A field as recorded in an artifact: canonical name and the type it was
/// checked against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRef {
    pub name: String,
    pub ty: Type,
}

/// The compiled, type-checked form of one rule expression.
///
/// Produced by [`compile()`](crate::compile). It can be turned into an
/// executable [`Program`] without re-parsing, and serialized to bytes with
/// [`to_bytes()`](Self::to_bytes).
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledArtifact {
    pub(crate) root: Node,
    pub(crate) fields: Vec<FieldRef>,
    pub(crate) source_digest: Option<[u8; 32]>,
}

impl CompiledArtifact {
    /// The static result type of the expression. Always bool for artifacts
    /// produced by [`compile()`](crate::compile).
    #[must_use]
    pub fn output_type(&self) -> &Type {
        &self.root.ty
    }

    /// Fields the expression reads, in slot order.
    #[must_use]
    pub fn fields(&self) -> &[FieldRef] {
        &self.fields
    }

    /// Number of nodes in the checked expression tree.
    #[must_use]
    pub fn node_count(&self) -> usize {
        let mut count = 0;
        self.root.walk(&mut |_| count += 1);
        count
    }

    /// Whether `source` is the text this artifact was compiled from.
    ///
    /// Returns `false` when the artifact carries no source digest.
    #[must_use]
    pub fn matches_source(&self, source: &str) -> bool {
        self.source_digest
            .is_some_and(|digest| digest == *blake3::hash(source.as_bytes()).as_bytes())
    }

    /// Reconstruct an executable program against `schema`.
    ///
    /// # Errors
    ///
    /// Returns [`ReconstructError`] if the artifact does not fit the schema.
    pub fn program(&self, schema: &Schema) -> Result<Program, ReconstructError> {
        Program::from_artifact(self.clone(), schema)
    }

    /// Serialize this artifact to its framed binary form.
    ///
    /// # Errors
    ///
    /// Returns [`SerializeError`](crate::serial::SerializeError) if encoding fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, crate::serial::SerializeError> {
        crate::serial::encode_artifact(self)
    }

    /// Decode an artifact previously produced by [`to_bytes()`](Self::to_bytes).
    ///
    /// # Errors
    ///
    /// Returns [`DeserializeError`](crate::serial::DeserializeError) on
    /// format, integrity, or structural validation failure.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, crate::serial::DeserializeError> {
        crate::serial::decode_artifact(bytes)
    }
}

impl fmt::Display for CompiledArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CompiledArtifact({} nodes, {} fields, output {})",
            self.node_count(),
            self.fields.len(),
            self.root.ty,
        )
    }
}
