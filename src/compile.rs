use std::collections::HashSet;

use tracing::debug;

use crate::check;
use crate::error::{RuleRejection, SubmitError};
use crate::parse::parse_expression;
use crate::{
    CompileError, CompiledArtifact, Diagnostic, FieldRef, RuleSource, Schema, StoredRule, Type,
};

/// Compile one expression against `schema` into a type-checked artifact.
///
/// The artifact's root is guaranteed to be bool. It records the BLAKE3 digest
/// of `source` so a stored text can later be matched against its artifact.
///
/// # Errors
///
/// Returns [`CompileError::InvalidExpression`] for syntax or type errors and
/// [`CompileError::WrongOutputType`] when the expression is well-typed but not
/// bool.
pub fn compile(source: &str, schema: &Schema) -> Result<CompiledArtifact, CompileError> {
    let expr = parse_expression(source).map_err(|e| CompileError::InvalidExpression {
        diagnostics: vec![Diagnostic::at(e.message(), e.offset())],
    })?;

    let checked = check::check(&expr, schema)
        .map_err(|diagnostics| CompileError::InvalidExpression { diagnostics })?;

    if checked.root.ty != Type::Bool {
        return Err(CompileError::WrongOutputType {
            found: checked.root.ty,
        });
    }

    let fields = checked
        .fields
        .iter()
        .map(|field| FieldRef {
            name: field.canonical_name().to_owned(),
            ty: field.ty(),
        })
        .collect();

    Ok(CompiledArtifact {
        root: checked.root,
        fields,
        source_digest: Some(*blake3::hash(source.as_bytes()).as_bytes()),
    })
}

/// Compile a batch of rules for storage, all-or-nothing.
///
/// Every rejected rule is reported, not just the first one.
pub(crate) fn compile_rule_set(
    rules: &[RuleSource],
    schema: &Schema,
) -> Result<Vec<StoredRule>, SubmitError> {
    let mut seen = HashSet::new();
    let mut rejections = Vec::new();
    let mut stored = Vec::with_capacity(rules.len());

    for rule in rules {
        let reject = |error| RuleRejection {
            rule: rule.name.clone(),
            error,
        };
        if rule.name.trim().is_empty() {
            rejections.push(reject(CompileError::EmptyName));
            continue;
        }
        if !seen.insert(rule.name.as_str()) {
            rejections.push(reject(CompileError::DuplicateRule {
                name: rule.name.clone(),
            }));
            continue;
        }
        match compile(&rule.text, schema) {
            Ok(artifact) => {
                debug!(rule = %rule.name, nodes = artifact.node_count(), "compiled rule");
                stored.push(StoredRule {
                    name: rule.name.clone(),
                    source: rule.text.clone(),
                    artifact: artifact.to_bytes()?,
                });
            }
            Err(error) => rejections.push(reject(error)),
        }
    }

    if rejections.is_empty() {
        Ok(stored)
    } else {
        Err(SubmitError::Rejected(rejections))
    }
}
