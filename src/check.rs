//! Type checking: resolves a parsed [`Expr`] against a [`Schema`] into a
//! checked [`Node`] tree, and re-verifies decoded trees before execution.

use crate::types::checked::{
    arith_type, call_type, compare_type, conditional_type, in_type, index_type, list_type,
};
use crate::{
    ArithOp, BinaryOp, CompareOp, Diagnostic, Expr, FieldTable, Function, Literal, Node, NodeId,
    NodeKind, ReconstructError, Schema, Type, UnaryOp, Value, MAX_DEPTH,
};

/// Output of a successful check.
#[derive(Debug)]
pub(crate) struct Checked {
    pub(crate) root: Node,
    pub(crate) fields: FieldTable,
}

/// Check `expr` against `schema`, collecting every problem found.
pub(crate) fn check(expr: &Expr, schema: &Schema) -> Result<Checked, Vec<Diagnostic>> {
    let depth = expr.depth();
    if depth > MAX_DEPTH {
        return Err(vec![Diagnostic::new(format!(
            "expression is {depth} levels deep, the limit is {MAX_DEPTH}"
        ))]);
    }
    let mut checker = Checker {
        schema,
        fields: FieldTable::new(),
        next_id: 1,
        diagnostics: Vec::new(),
    };
    let root = checker.check(expr);
    match root {
        Some(root) if checker.diagnostics.is_empty() => Ok(Checked {
            root,
            fields: checker.fields,
        }),
        _ => Err(checker.diagnostics),
    }
}

struct Checker<'a> {
    schema: &'a Schema,
    fields: FieldTable,
    next_id: NodeId,
    diagnostics: Vec<Diagnostic>,
}

impl Checker<'_> {
    fn alloc(&mut self) -> NodeId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn fail<T>(&mut self, message: impl Into<String>) -> Option<T> {
        self.diagnostics.push(Diagnostic::new(message));
        None
    }

    fn typed(&mut self, id: NodeId, ty: Result<Type, String>, kind: NodeKind) -> Option<Node> {
        match ty {
            Ok(ty) => Some(Node { id, ty, kind }),
            Err(message) => self.fail(message),
        }
    }

    fn field(&mut self, id: NodeId, name: &str) -> Option<Node> {
        let Some(field) = self.schema.resolve(name) else {
            return self.fail(format!(
                "undefined field '{name}' on '{}'",
                self.schema.variable()
            ));
        };
        let slot = self.fields.register(field);
        Some(Node {
            id,
            ty: field.ty(),
            kind: NodeKind::Field(slot),
        })
    }

    fn check(&mut self, expr: &Expr) -> Option<Node> {
        let id = self.alloc();
        match expr {
            Expr::Literal(literal) => {
                let value = match literal {
                    Literal::Bool(b) => Value::Bool(*b),
                    Literal::Int(i) => Value::Int(*i),
                    Literal::Float(f) => Value::Float(*f),
                    Literal::String(s) => Value::String(s.clone()),
                };
                Some(Node {
                    id,
                    ty: value.type_of(),
                    kind: NodeKind::Literal(value),
                })
            }
            Expr::Ident(name) => {
                if name == self.schema.variable() {
                    return self.fail(format!(
                        "'{name}' cannot be used directly; select one of its fields"
                    ));
                }
                if self.schema.resolve(name).is_none() {
                    return self.fail(format!("undeclared reference to '{name}'"));
                }
                self.field(id, name)
            }
            Expr::Member { target, field } => {
                if matches!(target.as_ref(), Expr::Ident(v) if v == self.schema.variable()) {
                    return self.field(id, field);
                }
                let target = self.check(target)?;
                match &target.ty {
                    Type::Map(value) => {
                        let ty = (**value).clone();
                        let key = Node {
                            id: self.alloc(),
                            ty: Type::String,
                            kind: NodeKind::Literal(Value::String(field.clone())),
                        };
                        Some(Node {
                            id,
                            ty,
                            kind: NodeKind::Index {
                                target: Box::new(target),
                                key: Box::new(key),
                            },
                        })
                    }
                    other => self.fail(format!("type {other} has no field '{field}'")),
                }
            }
            Expr::Index { target, key } => {
                let target = self.check(target);
                let key = self.check(key);
                let (target, key) = (target?, key?);
                let ty = index_type(&target.ty, &key.ty);
                self.typed(
                    id,
                    ty,
                    NodeKind::Index {
                        target: Box::new(target),
                        key: Box::new(key),
                    },
                )
            }
            Expr::Call {
                target,
                function,
                args,
            } => {
                let resolved = Function::lookup(function, target.is_some());
                let mut checked = Vec::with_capacity(args.len() + 1);
                for arg in target.iter().map(|t| &**t).chain(args) {
                    checked.push(self.check(arg));
                }
                let Some(function) = resolved else {
                    return self.fail(format!("undeclared reference to '{function}'"));
                };
                let args: Vec<Node> = checked.into_iter().collect::<Option<_>>()?;
                let types: Vec<Type> = args.iter().map(|a| a.ty.clone()).collect();
                let ty = call_type(function, &types);
                self.typed(id, ty, NodeKind::Call { function, args })
            }
            Expr::List(items) => {
                let checked: Vec<Option<Node>> = items.iter().map(|i| self.check(i)).collect();
                let items: Vec<Node> = checked.into_iter().collect::<Option<_>>()?;
                let types: Vec<Type> = items.iter().map(|i| i.ty.clone()).collect();
                let ty = list_type(&types);
                self.typed(id, ty, NodeKind::List(items))
            }
            Expr::Unary { op, operand } => {
                let operand = Box::new(self.check(operand)?);
                match op {
                    UnaryOp::Not => {
                        let ty = not_type(&operand.ty);
                        self.typed(id, ty, NodeKind::Not(operand))
                    }
                    UnaryOp::Neg => {
                        let ty = neg_type(&operand.ty);
                        self.typed(id, ty, NodeKind::Neg(operand))
                    }
                }
            }
            Expr::Binary { op, lhs, rhs } => {
                let lhs = self.check(lhs);
                let rhs = self.check(rhs);
                let (lhs, rhs) = (Box::new(lhs?), Box::new(rhs?));
                let (ty, kind) = binary_node(*op, lhs, rhs);
                self.typed(id, ty, kind)
            }
            Expr::Conditional {
                cond,
                then,
                otherwise,
            } => {
                let cond = self.check(cond);
                let then = self.check(then);
                let otherwise = self.check(otherwise);
                let (cond, then, otherwise) = (cond?, then?, otherwise?);
                let ty = conditional_type(&cond.ty, &then.ty, &otherwise.ty);
                self.typed(
                    id,
                    ty,
                    NodeKind::Conditional {
                        cond: Box::new(cond),
                        then: Box::new(then),
                        otherwise: Box::new(otherwise),
                    },
                )
            }
        }
    }
}

fn binary_node(op: BinaryOp, lhs: Box<Node>, rhs: Box<Node>) -> (Result<Type, String>, NodeKind) {
    let compare = |cmp: CompareOp, lhs: Box<Node>, rhs: Box<Node>| {
        (
            compare_type(cmp, &lhs.ty, &rhs.ty),
            NodeKind::Compare { op: cmp, lhs, rhs },
        )
    };
    let arith = |a: ArithOp, lhs: Box<Node>, rhs: Box<Node>| {
        (
            arith_type(a, &lhs.ty, &rhs.ty),
            NodeKind::Arith { op: a, lhs, rhs },
        )
    };
    match op {
        BinaryOp::And => (logic_type("&&", &lhs.ty, &rhs.ty), NodeKind::And(lhs, rhs)),
        BinaryOp::Or => (logic_type("||", &lhs.ty, &rhs.ty), NodeKind::Or(lhs, rhs)),
        BinaryOp::Eq => compare(CompareOp::Eq, lhs, rhs),
        BinaryOp::Neq => compare(CompareOp::Neq, lhs, rhs),
        BinaryOp::Lt => compare(CompareOp::Lt, lhs, rhs),
        BinaryOp::Lte => compare(CompareOp::Lte, lhs, rhs),
        BinaryOp::Gt => compare(CompareOp::Gt, lhs, rhs),
        BinaryOp::Gte => compare(CompareOp::Gte, lhs, rhs),
        BinaryOp::In => (
            in_type(&lhs.ty, &rhs.ty),
            NodeKind::In {
                needle: lhs,
                haystack: rhs,
            },
        ),
        BinaryOp::Add => arith(ArithOp::Add, lhs, rhs),
        BinaryOp::Sub => arith(ArithOp::Sub, lhs, rhs),
        BinaryOp::Mul => arith(ArithOp::Mul, lhs, rhs),
        BinaryOp::Div => arith(ArithOp::Div, lhs, rhs),
        BinaryOp::Rem => arith(ArithOp::Rem, lhs, rhs),
    }
}

fn logic_type(op: &str, lhs: &Type, rhs: &Type) -> Result<Type, String> {
    if *lhs == Type::Bool && *rhs == Type::Bool {
        Ok(Type::Bool)
    } else {
        Err(format!("no matching overload for '{op}' applied to ({lhs}, {rhs})"))
    }
}

fn not_type(operand: &Type) -> Result<Type, String> {
    if *operand == Type::Bool {
        Ok(Type::Bool)
    } else {
        Err(format!("no matching overload for '!' applied to ({operand})"))
    }
}

fn neg_type(operand: &Type) -> Result<Type, String> {
    if operand.is_numeric() {
        Ok(operand.clone())
    } else {
        Err(format!("no matching overload for '-' applied to ({operand})"))
    }
}

// ---------------------------------------------------------------------------
// Verification of decoded trees
// ---------------------------------------------------------------------------

/// Recompute every node's type from its children and the field table, and
/// reject any node whose recorded type disagrees.
pub(crate) fn verify(root: &Node, fields: &FieldTable) -> Result<(), ReconstructError> {
    verify_node(root, fields).map(|_| ())
}

fn verify_node(node: &Node, fields: &FieldTable) -> Result<Type, ReconstructError> {
    let ill = |message: String| ReconstructError::IllTyped {
        node: node.id,
        message,
    };
    let computed = match &node.kind {
        NodeKind::Literal(value) => {
            if matches!(value, Value::List(_) | Value::Map(_)) {
                return Err(ill("literal must be a scalar".to_owned()));
            }
            Ok(value.type_of())
        }
        NodeKind::Field(slot) => match fields.get(*slot) {
            Some(field) => Ok(field.ty()),
            None => return Err(ill(format!("field slot {slot} out of range"))),
        },
        NodeKind::Index { target, key } => {
            index_type(&verify_node(target, fields)?, &verify_node(key, fields)?)
        }
        NodeKind::List(items) => {
            let types = items
                .iter()
                .map(|i| verify_node(i, fields))
                .collect::<Result<Vec<_>, _>>()?;
            list_type(&types)
        }
        NodeKind::Not(inner) => not_type(&verify_node(inner, fields)?),
        NodeKind::Neg(inner) => neg_type(&verify_node(inner, fields)?),
        NodeKind::And(lhs, rhs) => logic_type(
            "&&",
            &verify_node(lhs, fields)?,
            &verify_node(rhs, fields)?,
        ),
        NodeKind::Or(lhs, rhs) => logic_type(
            "||",
            &verify_node(lhs, fields)?,
            &verify_node(rhs, fields)?,
        ),
        NodeKind::Compare { op, lhs, rhs } => {
            compare_type(*op, &verify_node(lhs, fields)?, &verify_node(rhs, fields)?)
        }
        NodeKind::Arith { op, lhs, rhs } => {
            arith_type(*op, &verify_node(lhs, fields)?, &verify_node(rhs, fields)?)
        }
        NodeKind::In { needle, haystack } => in_type(
            &verify_node(needle, fields)?,
            &verify_node(haystack, fields)?,
        ),
        NodeKind::Conditional {
            cond,
            then,
            otherwise,
        } => conditional_type(
            &verify_node(cond, fields)?,
            &verify_node(then, fields)?,
            &verify_node(otherwise, fields)?,
        ),
        NodeKind::Call { function, args } => {
            let types = args
                .iter()
                .map(|a| verify_node(a, fields))
                .collect::<Result<Vec<_>, _>>()?;
            call_type(*function, &types)
        }
    }
    .map_err(ill)?;

    if computed != node.ty {
        return Err(ill(format!(
            "recorded type {} but operands give {computed}",
            node.ty
        )));
    }
    Ok(computed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_expression;

    fn check_src(source: &str) -> Result<Checked, Vec<Diagnostic>> {
        check(&parse_expression(source).unwrap(), &Schema::transaction())
    }

    fn ids(node: &Node) -> Vec<NodeId> {
        let mut out = Vec::new();
        node.walk(&mut |n| out.push(n.id));
        out
    }

    #[test]
    fn ids_are_preorder_from_one() {
        let checked = check_src("txn.type == 'QRIS' && txn.riskScore >= 7").unwrap();
        assert_eq!(ids(&checked.root), vec![1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(checked.root.ty, Type::Bool);
    }

    #[test]
    fn member_on_map_becomes_index() {
        let checked = check_src("txn.customBools.is_vip").unwrap();
        assert!(matches!(checked.root.kind, NodeKind::Index { .. }));
        assert_eq!(checked.root.ty, Type::Bool);
        assert_eq!(ids(&checked.root), vec![1, 2, 3]);
    }

    #[test]
    fn fields_are_registered_once() {
        let checked = check_src("txn.amount > 1.0 && txn.Amount < 10.0").unwrap();
        assert_eq!(checked.fields.len(), 1);
    }

    #[test]
    fn bare_field_names_resolve() {
        assert!(check_src("riskScore > 3").is_ok());
    }

    #[test]
    fn undeclared_reference() {
        let errs = check_src("txn.amount > limit").unwrap_err();
        assert_eq!(errs.len(), 1);
        assert!(errs[0].message.contains("undeclared reference to 'limit'"));
    }

    #[test]
    fn unknown_field() {
        let errs = check_src("txn.velocity > 1.0").unwrap_err();
        assert!(errs[0].message.contains("undefined field 'velocity'"));
    }

    #[test]
    fn bare_variable_is_rejected() {
        assert!(check_src("txn == txn").is_err());
    }

    #[test]
    fn collects_multiple_diagnostics() {
        let errs = check_src("txn.velocity > 1.0 && txn.type > 3").unwrap_err();
        assert_eq!(errs.len(), 2);
    }

    #[test]
    fn type_errors() {
        assert!(check_src("txn.type + 1").is_err());
        assert!(check_src("!txn.amount").is_err());
        assert!(check_src("txn.amount && true").is_err());
        assert!(check_src("txn.name.startsWith(1)").is_err());
        assert!(check_src("unknownFn(txn.name)").is_err());
    }

    #[test]
    fn verify_accepts_checked_tree() {
        let checked = check_src("size(txn.name) > 2 ? txn.amount > 1.0 : false").unwrap();
        assert!(verify(&checked.root, &checked.fields).is_ok());
    }

    #[test]
    fn verify_rejects_bad_slot() {
        let checked = check_src("txn.amount > 1.0").unwrap();
        let err = verify(&checked.root, &FieldTable::new()).unwrap_err();
        assert!(matches!(err, ReconstructError::IllTyped { node: 2, .. }));
    }

    #[test]
    fn verify_rejects_wrong_recorded_type() {
        let mut checked = check_src("txn.amount > 1.0").unwrap();
        checked.root.ty = Type::Float;
        let err = verify(&checked.root, &checked.fields).unwrap_err();
        assert!(matches!(err, ReconstructError::IllTyped { node: 1, .. }));
    }

    fn negations(count: usize) -> Expr {
        let mut expr = Expr::Literal(Literal::Bool(true));
        for _ in 0..count {
            expr = Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(expr),
            };
        }
        expr
    }

    #[test]
    fn depth_limit_is_inclusive() {
        let schema = Schema::transaction();
        let checked = check(&negations(MAX_DEPTH - 1), &schema).unwrap();
        assert_eq!(checked.root.depth(), MAX_DEPTH);

        let diagnostics = check(&negations(MAX_DEPTH), &schema).unwrap_err();
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].message.contains("limit"));
    }
}
