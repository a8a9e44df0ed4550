use std::collections::BTreeMap;

use crate::{
    ArithOp, EvalError, EvalOptions, Execution, Field, FieldTable, Function, MissingKeyPolicy,
    Node, NodeId, NodeKind, Program, Trace, Transaction, Type, Value,
};

pub(crate) fn execute(
    program: &Program,
    txn: &Transaction,
    options: &EvalOptions,
) -> Result<Execution, EvalError> {
    let mut evaluator = Evaluator {
        fields: &program.fields,
        txn,
        missing_keys: options.missing_keys,
        trace: options.trace.then(BTreeMap::new),
    };
    let matched = evaluator.eval_bool(&program.root)?;
    Ok(Execution {
        matched,
        trace: evaluator.trace.map(Trace::from_map),
    })
}

struct Evaluator<'a> {
    fields: &'a FieldTable,
    txn: &'a Transaction,
    missing_keys: MissingKeyPolicy,
    trace: Option<BTreeMap<NodeId, Value>>,
}

fn mismatch(node: &Node, expected: &str, found: &Value) -> EvalError {
    EvalError::TypeMismatch {
        node: node.id,
        expected: expected.to_owned(),
        found: found.type_of().to_string(),
    }
}

/// Widen ints where the checker unified a mixed int/float position to float.
#[allow(clippy::cast_precision_loss)]
fn coerce(value: Value, ty: &Type) -> Value {
    match (value, ty) {
        (Value::Int(i), Type::Float) => Value::Float(i as f64),
        (Value::List(items), Type::List(elem)) => {
            Value::List(items.into_iter().map(|v| coerce(v, elem)).collect())
        }
        (value, _) => value,
    }
}

impl Evaluator<'_> {
    fn eval(&mut self, node: &Node) -> Result<Value, EvalError> {
        let value = coerce(self.eval_kind(node)?, &node.ty);
        if let Some(trace) = self.trace.as_mut() {
            trace.insert(node.id, value.clone());
        }
        Ok(value)
    }

    fn eval_bool(&mut self, node: &Node) -> Result<bool, EvalError> {
        match self.eval(node)? {
            Value::Bool(b) => Ok(b),
            other => Err(mismatch(node, "bool", &other)),
        }
    }

    fn eval_kind(&mut self, node: &Node) -> Result<Value, EvalError> {
        match &node.kind {
            NodeKind::Literal(value) => Ok(value.clone()),
            NodeKind::Field(slot) => self
                .fields
                .get(*slot)
                .map(|field| field.read(self.txn))
                .ok_or_else(|| EvalError::TypeMismatch {
                    node: node.id,
                    expected: "bound field".to_owned(),
                    found: format!("slot {slot}"),
                }),
            NodeKind::Index { target, key } => {
                if let NodeKind::Field(slot) = &target.kind {
                    let map_field = self
                        .fields
                        .get(*slot)
                        .filter(|field| matches!(field.ty(), Type::Map(_)));
                    if let Some(field) = map_field {
                        return self.lookup(node, target, field, key);
                    }
                }
                let container = self.eval(target)?;
                let key = self.eval(key)?;
                self.index(node, container, &key)
            }
            NodeKind::List(items) => items
                .iter()
                .map(|item| self.eval(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            NodeKind::Not(inner) => self.eval_bool(inner).map(|b| Value::Bool(!b)),
            NodeKind::Neg(inner) => match self.eval(inner)? {
                Value::Int(i) => i.checked_neg().map(Value::Int).ok_or(EvalError::Overflow {
                    op: "-".to_owned(),
                }),
                Value::Float(f) => Ok(Value::Float(-f)),
                other => Err(mismatch(inner, "number", &other)),
            },
            NodeKind::And(lhs, rhs) => {
                let left = self.eval_bool(lhs);
                if matches!(left, Ok(false)) {
                    return Ok(Value::Bool(false));
                }
                // An error on one side is absorbed when the other side decides.
                match (left, self.eval_bool(rhs)) {
                    (_, Ok(false)) => Ok(Value::Bool(false)),
                    (Ok(_), Ok(true)) => Ok(Value::Bool(true)),
                    (Err(e), _) | (_, Err(e)) => Err(e),
                }
            }
            NodeKind::Or(lhs, rhs) => {
                let left = self.eval_bool(lhs);
                if matches!(left, Ok(true)) {
                    return Ok(Value::Bool(true));
                }
                match (left, self.eval_bool(rhs)) {
                    (_, Ok(true)) => Ok(Value::Bool(true)),
                    (Ok(_), Ok(false)) => Ok(Value::Bool(false)),
                    (Err(e), _) | (_, Err(e)) => Err(e),
                }
            }
            NodeKind::Compare { op, lhs, rhs } => {
                let lhs = self.eval(lhs)?;
                let rhs = self.eval(rhs)?;
                // Unordered operands (NaN) compare false.
                Ok(Value::Bool(lhs.compare(*op, &rhs).unwrap_or(false)))
            }
            NodeKind::Arith { op, lhs, rhs } => {
                let lhs = self.eval(lhs)?;
                let rhs = self.eval(rhs)?;
                arith(node, *op, lhs, rhs)
            }
            NodeKind::In { needle, haystack } => {
                let needle = self.eval(needle)?;
                match self.eval(haystack)? {
                    Value::List(items) => Ok(Value::Bool(items.iter().any(|item| {
                        needle
                            .compare(crate::CompareOp::Eq, item)
                            .unwrap_or(false)
                    }))),
                    Value::Map(entries) => match &needle {
                        Value::String(key) => Ok(Value::Bool(entries.contains_key(key))),
                        other => Err(mismatch(node, "string key", other)),
                    },
                    other => Err(mismatch(haystack, "list or map", &other)),
                }
            }
            NodeKind::Conditional {
                cond,
                then,
                otherwise,
            } => {
                if self.eval_bool(cond)? {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
            NodeKind::Call { function, args } => {
                let args = args
                    .iter()
                    .map(|arg| self.eval(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                call(node, *function, &args)
            }
        }
    }

    /// Read one entry of a map field straight from the transaction. The map
    /// itself is only built when the trace records it.
    fn lookup(
        &mut self,
        node: &Node,
        target: &Node,
        field: Field,
        key: &Node,
    ) -> Result<Value, EvalError> {
        if let Some(trace) = self.trace.as_mut() {
            trace.insert(target.id, field.read(self.txn));
        }
        let key = match self.eval(key)? {
            Value::String(key) => key,
            other => return Err(mismatch(node, "string key", &other)),
        };
        match field.read_entry(self.txn, &key) {
            Some(value) => Ok(value),
            None => self.missing(node, key),
        }
    }

    fn missing(&self, node: &Node, key: String) -> Result<Value, EvalError> {
        match self.missing_keys {
            MissingKeyPolicy::Error => Err(EvalError::NoSuchKey { key }),
            MissingKeyPolicy::ZeroValue => Ok(Value::zero_of(&node.ty)),
        }
    }

    fn index(&self, node: &Node, container: Value, key: &Value) -> Result<Value, EvalError> {
        match (container, key) {
            (Value::Map(mut entries), Value::String(key)) => match entries.remove(key) {
                Some(value) => Ok(value),
                None => self.missing(node, key.clone()),
            },
            (Value::List(mut items), Value::Int(index)) => {
                let len = items.len();
                usize::try_from(*index)
                    .ok()
                    .filter(|i| *i < len)
                    .map(|i| items.swap_remove(i))
                    .ok_or(EvalError::IndexOutOfRange { index: *index, len })
            }
            (container, _) => Err(mismatch(node, "map or list", &container)),
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn arith(node: &Node, op: ArithOp, lhs: Value, rhs: Value) -> Result<Value, EvalError> {
    let overflow = || EvalError::Overflow { op: op.to_string() };
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => {
            let result = match op {
                ArithOp::Add => a.checked_add(b),
                ArithOp::Sub => a.checked_sub(b),
                ArithOp::Mul => a.checked_mul(b),
                ArithOp::Div | ArithOp::Rem if b == 0 => return Err(EvalError::DivisionByZero),
                ArithOp::Div => a.checked_div(b),
                ArithOp::Rem => a.checked_rem(b),
            };
            result.map(Value::Int).ok_or_else(overflow)
        }
        (Value::String(a), Value::String(b)) if op == ArithOp::Add => Ok(Value::String(a + &b)),
        (lhs, rhs) => {
            let as_float = |v: &Value| match v {
                Value::Int(i) => Some(*i as f64),
                Value::Float(f) => Some(*f),
                _ => None,
            };
            let (Some(a), Some(b)) = (as_float(&lhs), as_float(&rhs)) else {
                return Err(mismatch(node, "numbers", &lhs));
            };
            match op {
                ArithOp::Add => Ok(Value::Float(a + b)),
                ArithOp::Sub => Ok(Value::Float(a - b)),
                ArithOp::Mul => Ok(Value::Float(a * b)),
                ArithOp::Div => Ok(Value::Float(a / b)),
                ArithOp::Rem => Err(mismatch(node, "int", &lhs)),
            }
        }
    }
}

#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
fn call(node: &Node, function: Function, args: &[Value]) -> Result<Value, EvalError> {
    let invalid = |value: &Value, target: Type| EvalError::InvalidConversion {
        value: value.to_string(),
        target,
    };
    match (function, args) {
        (Function::Size, [value]) => {
            let len = match value {
                Value::String(s) => s.chars().count(),
                Value::List(items) => items.len(),
                Value::Map(entries) => entries.len(),
                other => return Err(mismatch(node, "string, list or map", other)),
            };
            i64::try_from(len)
                .map(Value::Int)
                .map_err(|_| EvalError::Overflow {
                    op: "size".to_owned(),
                })
        }
        (Function::ToInt, [value]) => match value {
            Value::Int(i) => Ok(Value::Int(*i)),
            Value::Float(f) if f.is_finite() && *f >= i64::MIN as f64 && *f < i64::MAX as f64 => {
                Ok(Value::Int(f.trunc() as i64))
            }
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| invalid(value, Type::Int)),
            other => Err(invalid(other, Type::Int)),
        },
        (Function::ToFloat, [value]) => match value {
            Value::Int(i) => Ok(Value::Float(*i as f64)),
            Value::Float(f) => Ok(Value::Float(*f)),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| invalid(value, Type::Float)),
            other => Err(invalid(other, Type::Float)),
        },
        (Function::ToString, [value]) => match value {
            Value::Bool(b) => Ok(Value::String(b.to_string())),
            Value::Int(i) => Ok(Value::String(i.to_string())),
            Value::Float(f) => Ok(Value::String(f.to_string())),
            Value::String(s) => Ok(Value::String(s.clone())),
            other => Err(invalid(other, Type::String)),
        },
        (Function::Contains, [Value::String(s), Value::String(sub)]) => {
            Ok(Value::Bool(s.contains(sub.as_str())))
        }
        (Function::StartsWith, [Value::String(s), Value::String(prefix)]) => {
            Ok(Value::Bool(s.starts_with(prefix.as_str())))
        }
        (Function::EndsWith, [Value::String(s), Value::String(suffix)]) => {
            Ok(Value::Bool(s.ends_with(suffix.as_str())))
        }
        (_, args) => Err(EvalError::TypeMismatch {
            node: node.id,
            expected: format!("arguments for '{function}'"),
            found: args
                .iter()
                .map(|a| a.type_of().to_string())
                .collect::<Vec<_>>()
                .join(", "),
        }),
    }
}
