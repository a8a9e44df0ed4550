//! Binary serialization of compiled artifacts and persisted rule sets.
//!
//! Both formats share a 32-byte fixed header followed by a bincode-encoded
//! payload. Only the magic differs.
//!
//! ## Wire Format
//!
//! ```text
//! Offset  Size  Field
//! 0       4     Magic bytes: b"TXRA" (artifact) or b"TXRS" (rule set)
//! 4       2     Format version (u16, little-endian)
//! 6       2     Engine version (u16, little-endian)
//! 8       4     Flags (u32, reserved)
//! 12      4     Payload length in bytes (u32, little-endian)
//! 16      16    BLAKE3 hash of the payload (truncated to 16 bytes)
//! 32..    var   Bincode-encoded payload
//! ```
//!
//! ## Versioning
//!
//! The format version in the header must match exactly. If it does not,
//! decoding fails immediately with [`DeserializeError::IncompatibleVersion`].
//! The engine version is informational only.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{
    ArithOp, CompareOp, CompiledArtifact, FieldRef, Function, Node, NodeKind, StoredRule, Type,
    Value, MAX_DEPTH,
};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const ARTIFACT_MAGIC: &[u8; 4] = b"TXRA";
const RULE_SET_MAGIC: &[u8; 4] = b"TXRS";
const FORMAT_VERSION: u16 = 1;
const ENGINE_VERSION: u16 = 1;
const HEADER_SIZE: usize = 32;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can occur when encoding an artifact or rule set.
#[derive(Debug, Error)]
pub enum SerializeError {
    #[error("failed to encode payload: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("payload of {0} bytes exceeds the 4 GiB format limit")]
    TooLarge(usize),

    #[error("list and map values cannot be stored as literals")]
    CompositeLiteral,
}

/// Errors that can occur when decoding an artifact or rule set.
#[derive(Debug, Error)]
pub enum DeserializeError {
    #[error("invalid magic bytes: expected {expected:?}")]
    BadMagic { expected: &'static str },

    #[error("incompatible format version: blob is v{blob}, engine supports v{supported}")]
    IncompatibleVersion { blob: u16, supported: u16 },

    #[error("integrity check failed: BLAKE3 checksum mismatch")]
    ChecksumMismatch,

    #[error("payload length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("failed to decode payload: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("validation failed: {0}")]
    Validation(String),
}

// ---------------------------------------------------------------------------
// Serialized type hierarchy
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct SerializedArtifact {
    metadata: ArtifactMetadata,
    fields: Vec<SerializedField>,
    root: SerializedNode,
}

#[derive(Debug, Serialize, Deserialize)]
struct ArtifactMetadata {
    node_count: usize,
    field_count: usize,
    source_digest: Option<[u8; 32]>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SerializedField {
    name: String,
    ty: SerializedType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum SerializedType {
    Bool,
    Int,
    Float,
    Str,
    List(Box<SerializedType>),
    Map(Box<SerializedType>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SerializedNode {
    id: u32,
    ty: SerializedType,
    kind: SerializedKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum SerializedKind {
    Literal(SerializedValue),
    Field(usize),
    Index(Box<SerializedNode>, Box<SerializedNode>),
    List(Vec<SerializedNode>),
    Not(Box<SerializedNode>),
    Neg(Box<SerializedNode>),
    And(Box<SerializedNode>, Box<SerializedNode>),
    Or(Box<SerializedNode>, Box<SerializedNode>),
    Compare(SerializedCompareOp, Box<SerializedNode>, Box<SerializedNode>),
    Arith(SerializedArithOp, Box<SerializedNode>, Box<SerializedNode>),
    In(Box<SerializedNode>, Box<SerializedNode>),
    Conditional(Box<SerializedNode>, Box<SerializedNode>, Box<SerializedNode>),
    Call(SerializedFunction, Vec<SerializedNode>),
}

/// Literal values. Lists and maps are never literals, they are built by nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
enum SerializedValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
enum SerializedCompareOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
enum SerializedArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
enum SerializedFunction {
    Size,
    ToInt,
    ToFloat,
    ToString,
    Contains,
    StartsWith,
    EndsWith,
}

#[derive(Debug, Serialize, Deserialize)]
struct SerializedRuleSet {
    rule_count: usize,
    rules: Vec<SerializedStoredRule>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SerializedStoredRule {
    name: String,
    source: String,
    artifact: Vec<u8>,
}

// ---------------------------------------------------------------------------
// Operator and type conversion
// ---------------------------------------------------------------------------

fn serialize_compare_op(op: CompareOp) -> SerializedCompareOp {
    match op {
        CompareOp::Eq => SerializedCompareOp::Eq,
        CompareOp::Neq => SerializedCompareOp::Neq,
        CompareOp::Gt => SerializedCompareOp::Gt,
        CompareOp::Gte => SerializedCompareOp::Gte,
        CompareOp::Lt => SerializedCompareOp::Lt,
        CompareOp::Lte => SerializedCompareOp::Lte,
    }
}

fn deserialize_compare_op(op: SerializedCompareOp) -> CompareOp {
    match op {
        SerializedCompareOp::Eq => CompareOp::Eq,
        SerializedCompareOp::Neq => CompareOp::Neq,
        SerializedCompareOp::Gt => CompareOp::Gt,
        SerializedCompareOp::Gte => CompareOp::Gte,
        SerializedCompareOp::Lt => CompareOp::Lt,
        SerializedCompareOp::Lte => CompareOp::Lte,
    }
}

fn serialize_arith_op(op: ArithOp) -> SerializedArithOp {
    match op {
        ArithOp::Add => SerializedArithOp::Add,
        ArithOp::Sub => SerializedArithOp::Sub,
        ArithOp::Mul => SerializedArithOp::Mul,
        ArithOp::Div => SerializedArithOp::Div,
        ArithOp::Rem => SerializedArithOp::Rem,
    }
}

fn deserialize_arith_op(op: SerializedArithOp) -> ArithOp {
    match op {
        SerializedArithOp::Add => ArithOp::Add,
        SerializedArithOp::Sub => ArithOp::Sub,
        SerializedArithOp::Mul => ArithOp::Mul,
        SerializedArithOp::Div => ArithOp::Div,
        SerializedArithOp::Rem => ArithOp::Rem,
    }
}

fn serialize_function(function: Function) -> SerializedFunction {
    match function {
        Function::Size => SerializedFunction::Size,
        Function::ToInt => SerializedFunction::ToInt,
        Function::ToFloat => SerializedFunction::ToFloat,
        Function::ToString => SerializedFunction::ToString,
        Function::Contains => SerializedFunction::Contains,
        Function::StartsWith => SerializedFunction::StartsWith,
        Function::EndsWith => SerializedFunction::EndsWith,
    }
}

fn deserialize_function(function: SerializedFunction) -> Function {
    match function {
        SerializedFunction::Size => Function::Size,
        SerializedFunction::ToInt => Function::ToInt,
        SerializedFunction::ToFloat => Function::ToFloat,
        SerializedFunction::ToString => Function::ToString,
        SerializedFunction::Contains => Function::Contains,
        SerializedFunction::StartsWith => Function::StartsWith,
        SerializedFunction::EndsWith => Function::EndsWith,
    }
}

fn serialize_type(ty: &Type) -> SerializedType {
    match ty {
        Type::Bool => SerializedType::Bool,
        Type::Int => SerializedType::Int,
        Type::Float => SerializedType::Float,
        Type::String => SerializedType::Str,
        Type::List(inner) => SerializedType::List(Box::new(serialize_type(inner))),
        Type::Map(inner) => SerializedType::Map(Box::new(serialize_type(inner))),
    }
}

fn deserialize_type(ty: SerializedType) -> Type {
    match ty {
        SerializedType::Bool => Type::Bool,
        SerializedType::Int => Type::Int,
        SerializedType::Float => Type::Float,
        SerializedType::Str => Type::String,
        SerializedType::List(inner) => Type::List(Box::new(deserialize_type(*inner))),
        SerializedType::Map(inner) => Type::Map(Box::new(deserialize_type(*inner))),
    }
}

fn serialize_value(value: &Value) -> Result<SerializedValue, SerializeError> {
    match value {
        Value::Int(v) => Ok(SerializedValue::Int(*v)),
        Value::Float(v) => Ok(SerializedValue::Float(*v)),
        Value::Bool(v) => Ok(SerializedValue::Bool(*v)),
        Value::String(v) => Ok(SerializedValue::Str(v.clone())),
        Value::List(_) | Value::Map(_) => Err(SerializeError::CompositeLiteral),
    }
}

fn deserialize_value(value: SerializedValue) -> Value {
    match value {
        SerializedValue::Int(v) => Value::Int(v),
        SerializedValue::Float(v) => Value::Float(v),
        SerializedValue::Bool(v) => Value::Bool(v),
        SerializedValue::Str(v) => Value::String(v),
    }
}

// ---------------------------------------------------------------------------
// Node conversion
// ---------------------------------------------------------------------------

fn serialize_node(node: &Node) -> Result<SerializedNode, SerializeError> {
    let pair = |a: &Node, b: &Node| -> Result<_, SerializeError> {
        Ok((Box::new(serialize_node(a)?), Box::new(serialize_node(b)?)))
    };
    let kind = match &node.kind {
        NodeKind::Literal(value) => SerializedKind::Literal(serialize_value(value)?),
        NodeKind::Field(slot) => SerializedKind::Field(*slot),
        NodeKind::Index { target, key } => {
            let (t, k) = pair(target, key)?;
            SerializedKind::Index(t, k)
        }
        NodeKind::List(items) => SerializedKind::List(
            items.iter().map(serialize_node).collect::<Result<_, _>>()?,
        ),
        NodeKind::Not(inner) => SerializedKind::Not(Box::new(serialize_node(inner)?)),
        NodeKind::Neg(inner) => SerializedKind::Neg(Box::new(serialize_node(inner)?)),
        NodeKind::And(lhs, rhs) => {
            let (l, r) = pair(lhs, rhs)?;
            SerializedKind::And(l, r)
        }
        NodeKind::Or(lhs, rhs) => {
            let (l, r) = pair(lhs, rhs)?;
            SerializedKind::Or(l, r)
        }
        NodeKind::Compare { op, lhs, rhs } => {
            let (l, r) = pair(lhs, rhs)?;
            SerializedKind::Compare(serialize_compare_op(*op), l, r)
        }
        NodeKind::Arith { op, lhs, rhs } => {
            let (l, r) = pair(lhs, rhs)?;
            SerializedKind::Arith(serialize_arith_op(*op), l, r)
        }
        NodeKind::In { needle, haystack } => {
            let (n, h) = pair(needle, haystack)?;
            SerializedKind::In(n, h)
        }
        NodeKind::Conditional {
            cond,
            then,
            otherwise,
        } => SerializedKind::Conditional(
            Box::new(serialize_node(cond)?),
            Box::new(serialize_node(then)?),
            Box::new(serialize_node(otherwise)?),
        ),
        NodeKind::Call { function, args } => SerializedKind::Call(
            serialize_function(*function),
            args.iter().map(serialize_node).collect::<Result<_, _>>()?,
        ),
    };
    Ok(SerializedNode {
        id: node.id,
        ty: serialize_type(&node.ty),
        kind,
    })
}

fn deserialize_node(node: SerializedNode) -> Node {
    let boxed = |n: Box<SerializedNode>| Box::new(deserialize_node(*n));
    let kind = match node.kind {
        SerializedKind::Literal(value) => NodeKind::Literal(deserialize_value(value)),
        SerializedKind::Field(slot) => NodeKind::Field(slot),
        SerializedKind::Index(target, key) => NodeKind::Index {
            target: boxed(target),
            key: boxed(key),
        },
        SerializedKind::List(items) => {
            NodeKind::List(items.into_iter().map(deserialize_node).collect())
        }
        SerializedKind::Not(inner) => NodeKind::Not(boxed(inner)),
        SerializedKind::Neg(inner) => NodeKind::Neg(boxed(inner)),
        SerializedKind::And(lhs, rhs) => NodeKind::And(boxed(lhs), boxed(rhs)),
        SerializedKind::Or(lhs, rhs) => NodeKind::Or(boxed(lhs), boxed(rhs)),
        SerializedKind::Compare(op, lhs, rhs) => NodeKind::Compare {
            op: deserialize_compare_op(op),
            lhs: boxed(lhs),
            rhs: boxed(rhs),
        },
        SerializedKind::Arith(op, lhs, rhs) => NodeKind::Arith {
            op: deserialize_arith_op(op),
            lhs: boxed(lhs),
            rhs: boxed(rhs),
        },
        SerializedKind::In(needle, haystack) => NodeKind::In {
            needle: boxed(needle),
            haystack: boxed(haystack),
        },
        SerializedKind::Conditional(cond, then, otherwise) => NodeKind::Conditional {
            cond: boxed(cond),
            then: boxed(then),
            otherwise: boxed(otherwise),
        },
        SerializedKind::Call(function, args) => NodeKind::Call {
            function: deserialize_function(function),
            args: args.into_iter().map(deserialize_node).collect(),
        },
    };
    Node {
        id: node.id,
        ty: deserialize_type(node.ty),
        kind,
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate_artifact(
    metadata: &ArtifactMetadata,
    fields: &[FieldRef],
    root: &Node,
) -> Result<(), DeserializeError> {
    let depth = root.depth();
    if depth > MAX_DEPTH {
        return Err(DeserializeError::Validation(format!(
            "tree is {depth} levels deep, the limit is {MAX_DEPTH}"
        )));
    }

    if metadata.field_count != fields.len() {
        return Err(DeserializeError::Validation(format!(
            "metadata says {} fields but payload has {}",
            metadata.field_count,
            fields.len()
        )));
    }

    let mut names = HashSet::new();
    for field in fields {
        if !names.insert(field.name.as_str()) {
            return Err(DeserializeError::Validation(format!(
                "field '{}' appears twice in the field table",
                field.name
            )));
        }
    }

    let mut nodes = Vec::new();
    root.walk(&mut |node| nodes.push(node));

    if metadata.node_count != nodes.len() {
        return Err(DeserializeError::Validation(format!(
            "metadata says {} nodes but payload has {}",
            metadata.node_count,
            nodes.len()
        )));
    }

    let mut seen = HashSet::new();
    for (expected, node) in (1u32..).zip(&nodes) {
        if !seen.insert(node.id) {
            return Err(DeserializeError::Validation(format!(
                "duplicate node id {}",
                node.id
            )));
        }
        if node.id != expected {
            return Err(DeserializeError::Validation(format!(
                "node id {} out of pre-order, expected {expected}",
                node.id
            )));
        }
        validate_node(node, fields.len())?;
    }
    Ok(())
}

fn validate_node(node: &Node, field_count: usize) -> Result<(), DeserializeError> {
    match &node.kind {
        NodeKind::Field(slot) if *slot >= field_count => Err(DeserializeError::Validation(
            format!("field slot {slot} out of bounds (max {field_count})"),
        )),
        NodeKind::Call { function, args } if args.len() != function.arity() => {
            Err(DeserializeError::Validation(format!(
                "call to '{function}' has {} arguments, expected {}",
                args.len(),
                function.arity()
            )))
        }
        _ => Ok(()),
    }
}

fn validate_rule_set(ser: &SerializedRuleSet) -> Result<(), DeserializeError> {
    if ser.rule_count != ser.rules.len() {
        return Err(DeserializeError::Validation(format!(
            "metadata says {} rules but payload has {}",
            ser.rule_count,
            ser.rules.len()
        )));
    }
    let mut names = HashSet::new();
    for rule in &ser.rules {
        if rule.name.trim().is_empty() {
            return Err(DeserializeError::Validation(
                "rule with empty name".to_owned(),
            ));
        }
        if !names.insert(rule.name.as_str()) {
            return Err(DeserializeError::Validation(format!(
                "duplicate rule name '{}'",
                rule.name
            )));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Header I/O
// ---------------------------------------------------------------------------

fn frame(magic: &[u8; 4], payload: &[u8]) -> Result<Vec<u8>, SerializeError> {
    let payload_len =
        u32::try_from(payload.len()).map_err(|_| SerializeError::TooLarge(payload.len()))?;
    let hash = blake3::hash(payload);

    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(magic);
    buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    buf.extend_from_slice(&ENGINE_VERSION.to_le_bytes());
    buf.extend_from_slice(&0u32.to_le_bytes()); // flags (reserved)
    buf.extend_from_slice(&payload_len.to_le_bytes());
    buf.extend_from_slice(&hash.as_bytes()[..16]);
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Check the header and return the verified payload.
fn unframe<'a>(magic: &[u8; 4], bytes: &'a [u8]) -> Result<&'a [u8], DeserializeError> {
    if bytes.len() < HEADER_SIZE {
        return Err(DeserializeError::LengthMismatch {
            expected: HEADER_SIZE,
            actual: bytes.len(),
        });
    }

    if &bytes[0..4] != magic {
        return Err(DeserializeError::BadMagic {
            expected: if magic == ARTIFACT_MAGIC { "TXRA" } else { "TXRS" },
        });
    }

    let format_version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if format_version != FORMAT_VERSION {
        return Err(DeserializeError::IncompatibleVersion {
            blob: format_version,
            supported: FORMAT_VERSION,
        });
    }
    // bytes[6..8] is engine_version (informational)
    // bytes[8..12] is flags (reserved)
    let payload_len = u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]) as usize;

    let payload = &bytes[HEADER_SIZE..];
    if payload.len() != payload_len {
        return Err(DeserializeError::LengthMismatch {
            expected: payload_len,
            actual: payload.len(),
        });
    }

    if blake3::hash(payload).as_bytes()[..16] != bytes[16..32] {
        return Err(DeserializeError::ChecksumMismatch);
    }
    Ok(payload)
}

// ---------------------------------------------------------------------------
// Public encode/decode
// ---------------------------------------------------------------------------

pub(crate) fn encode_artifact(artifact: &CompiledArtifact) -> Result<Vec<u8>, SerializeError> {
    let serialized = SerializedArtifact {
        metadata: ArtifactMetadata {
            node_count: artifact.node_count(),
            field_count: artifact.fields.len(),
            source_digest: artifact.source_digest,
        },
        fields: artifact
            .fields
            .iter()
            .map(|f| SerializedField {
                name: f.name.clone(),
                ty: serialize_type(&f.ty),
            })
            .collect(),
        root: serialize_node(&artifact.root)?,
    };
    let payload = bincode::serde::encode_to_vec(&serialized, bincode::config::standard())?;
    frame(ARTIFACT_MAGIC, &payload)
}

pub(crate) fn decode_artifact(bytes: &[u8]) -> Result<CompiledArtifact, DeserializeError> {
    let payload = unframe(ARTIFACT_MAGIC, bytes)?;
    let (serialized, _): (SerializedArtifact, usize) =
        bincode::serde::decode_from_slice(payload, bincode::config::standard())?;

    let fields: Vec<FieldRef> = serialized
        .fields
        .into_iter()
        .map(|f| FieldRef {
            name: f.name,
            ty: deserialize_type(f.ty),
        })
        .collect();
    let root = deserialize_node(serialized.root);
    validate_artifact(&serialized.metadata, &fields, &root)?;

    Ok(CompiledArtifact {
        root,
        fields,
        source_digest: serialized.metadata.source_digest,
    })
}

pub(crate) fn encode_rule_set(rules: &[StoredRule]) -> Result<Vec<u8>, SerializeError> {
    let serialized = SerializedRuleSet {
        rule_count: rules.len(),
        rules: rules
            .iter()
            .map(|r| SerializedStoredRule {
                name: r.name.clone(),
                source: r.source.clone(),
                artifact: r.artifact.clone(),
            })
            .collect(),
    };
    let payload = bincode::serde::encode_to_vec(&serialized, bincode::config::standard())?;
    frame(RULE_SET_MAGIC, &payload)
}

pub(crate) fn decode_rule_set(bytes: &[u8]) -> Result<Vec<StoredRule>, DeserializeError> {
    let payload = unframe(RULE_SET_MAGIC, bytes)?;
    let (serialized, _): (SerializedRuleSet, usize) =
        bincode::serde::decode_from_slice(payload, bincode::config::standard())?;
    validate_rule_set(&serialized)?;
    Ok(serialized
        .rules
        .into_iter()
        .map(|r| StoredRule {
            name: r.name,
            source: r.source,
            artifact: r.artifact,
        })
        .collect())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
