use std::fmt;

use super::value::Value;

/// Static types of the expression language.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Bool,
    Int,
    Float,
    String,
    /// A list whose elements all have the inner type.
    List(Box<Type>),
    /// A map with string keys and values of the inner type.
    Map(Box<Type>),
}

impl Type {
    #[must_use]
    pub fn is_numeric(&self) -> bool {
        matches!(self, Type::Int | Type::Float)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Bool => write!(f, "bool"),
            Type::Int => write!(f, "int"),
            Type::Float => write!(f, "float"),
            Type::String => write!(f, "string"),
            Type::List(inner) => write!(f, "list({inner})"),
            Type::Map(inner) => write!(f, "map(string, {inner})"),
        }
    }
}

/// Comparison operators supported in rule expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CompareOp {
    #[must_use]
    pub fn is_ordering(self) -> bool {
        !matches!(self, CompareOp::Eq | CompareOp::Neq)
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompareOp::Eq => write!(f, "=="),
            CompareOp::Neq => write!(f, "!="),
            CompareOp::Gt => write!(f, ">"),
            CompareOp::Gte => write!(f, ">="),
            CompareOp::Lt => write!(f, "<"),
            CompareOp::Lte => write!(f, "<="),
        }
    }
}

/// Arithmetic operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl fmt::Display for ArithOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArithOp::Add => write!(f, "+"),
            ArithOp::Sub => write!(f, "-"),
            ArithOp::Mul => write!(f, "*"),
            ArithOp::Div => write!(f, "/"),
            ArithOp::Rem => write!(f, "%"),
        }
    }
}

/// Built-in functions. Method calls pass their receiver as the first argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Size,
    ToInt,
    ToFloat,
    ToString,
    Contains,
    StartsWith,
    EndsWith,
}

impl Function {
    /// Resolve a function by the name it is called with in source text.
    pub(crate) fn lookup(name: &str, is_method: bool) -> Option<Function> {
        match (name, is_method) {
            ("size", _) => Some(Function::Size),
            ("int", false) => Some(Function::ToInt),
            ("double", false) => Some(Function::ToFloat),
            ("string", false) => Some(Function::ToString),
            ("contains", true) => Some(Function::Contains),
            ("startsWith", true) => Some(Function::StartsWith),
            ("endsWith", true) => Some(Function::EndsWith),
            _ => None,
        }
    }

    /// Number of arguments, counting the receiver of a method call.
    #[must_use]
    pub fn arity(self) -> usize {
        match self {
            Function::Size | Function::ToInt | Function::ToFloat | Function::ToString => 1,
            Function::Contains | Function::StartsWith | Function::EndsWith => 2,
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Function::Size => "size",
            Function::ToInt => "int",
            Function::ToFloat => "double",
            Function::ToString => "string",
            Function::Contains => "contains",
            Function::StartsWith => "startsWith",
            Function::EndsWith => "endsWith",
        };
        write!(f, "{name}")
    }
}

/// Identifier of a node in a checked expression. Assigned in pre-order starting at 1.
pub type NodeId = u32;

/// A type-checked expression node.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Node {
    pub(crate) id: NodeId,
    pub(crate) ty: Type,
    pub(crate) kind: NodeKind,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum NodeKind {
    Literal(Value),
    /// Slot into the artifact's field table.
    Field(usize),
    Index {
        target: Box<Node>,
        key: Box<Node>,
    },
    List(Vec<Node>),
    Not(Box<Node>),
    Neg(Box<Node>),
    And(Box<Node>, Box<Node>),
    Or(Box<Node>, Box<Node>),
    Compare {
        op: CompareOp,
        lhs: Box<Node>,
        rhs: Box<Node>,
    },
    Arith {
        op: ArithOp,
        lhs: Box<Node>,
        rhs: Box<Node>,
    },
    In {
        needle: Box<Node>,
        haystack: Box<Node>,
    },
    Conditional {
        cond: Box<Node>,
        then: Box<Node>,
        otherwise: Box<Node>,
    },
    Call {
        function: Function,
        args: Vec<Node>,
    },
}

impl Node {
    /// Number of nodes on the longest root-to-leaf path.
    pub(crate) fn depth(&self) -> usize {
        let mut deepest = 0;
        let mut stack = vec![(self, 1)];
        while let Some((node, depth)) = stack.pop() {
            deepest = deepest.max(depth);
            let children: Vec<&Node> = match &node.kind {
                NodeKind::Literal(_) | NodeKind::Field(_) => Vec::new(),
                NodeKind::Not(inner) | NodeKind::Neg(inner) => vec![&**inner],
                NodeKind::Index { target: a, key: b }
                | NodeKind::And(a, b)
                | NodeKind::Or(a, b)
                | NodeKind::Compare { lhs: a, rhs: b, .. }
                | NodeKind::Arith { lhs: a, rhs: b, .. }
                | NodeKind::In {
                    needle: a,
                    haystack: b,
                } => vec![&**a, &**b],
                NodeKind::Conditional {
                    cond,
                    then,
                    otherwise,
                } => vec![&**cond, &**then, &**otherwise],
                NodeKind::List(items) | NodeKind::Call { args: items, .. } => {
                    items.iter().collect()
                }
            };
            stack.extend(children.into_iter().map(|child| (child, depth + 1)));
        }
        deepest
    }

    /// Visit this node and its descendants in pre-order.
    pub(crate) fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Node)) {
        visit(self);
        match &self.kind {
            NodeKind::Literal(_) | NodeKind::Field(_) => {}
            NodeKind::Not(inner) | NodeKind::Neg(inner) => inner.walk(visit),
            NodeKind::Index { target: a, key: b }
            | NodeKind::And(a, b)
            | NodeKind::Or(a, b)
            | NodeKind::Compare { lhs: a, rhs: b, .. }
            | NodeKind::Arith { lhs: a, rhs: b, .. }
            | NodeKind::In {
                needle: a,
                haystack: b,
            } => {
                a.walk(visit);
                b.walk(visit);
            }
            NodeKind::Conditional {
                cond,
                then,
                otherwise,
            } => {
                cond.walk(visit);
                then.walk(visit);
                otherwise.walk(visit);
            }
            NodeKind::List(items) | NodeKind::Call { args: items, .. } => {
                for item in items {
                    item.walk(visit);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Typing rules
//
// Shared by the checker (source -> checked tree) and by reconstruction, which
// re-verifies a decoded tree before it is executed.
// ---------------------------------------------------------------------------

/// The wider of two numeric types, or the common type when both are equal.
pub(crate) fn unify(a: &Type, b: &Type) -> Option<Type> {
    if a == b {
        return Some(a.clone());
    }
    if a.is_numeric() && b.is_numeric() {
        return Some(Type::Float);
    }
    None
}

pub(crate) fn compare_type(op: CompareOp, lhs: &Type, rhs: &Type) -> Result<Type, String> {
    let comparable = if op.is_ordering() {
        (lhs.is_numeric() && rhs.is_numeric()) || (*lhs == Type::String && *rhs == Type::String)
    } else {
        (lhs.is_numeric() && rhs.is_numeric())
            || (lhs == rhs && matches!(lhs, Type::Bool | Type::String))
    };
    if comparable {
        Ok(Type::Bool)
    } else {
        Err(format!("no matching overload for '{op}' applied to ({lhs}, {rhs})"))
    }
}

pub(crate) fn arith_type(op: ArithOp, lhs: &Type, rhs: &Type) -> Result<Type, String> {
    match (op, lhs, rhs) {
        (ArithOp::Add, Type::String, Type::String) => Ok(Type::String),
        (ArithOp::Rem, Type::Int, Type::Int) => Ok(Type::Int),
        (ArithOp::Rem, _, _) => Err(format!(
            "no matching overload for '%' applied to ({lhs}, {rhs})"
        )),
        (_, l, r) if l.is_numeric() && r.is_numeric() => unify(l, r).ok_or_else(|| {
            format!("no matching overload for '{op}' applied to ({lhs}, {rhs})")
        }),
        _ => Err(format!("no matching overload for '{op}' applied to ({lhs}, {rhs})")),
    }
}

pub(crate) fn index_type(target: &Type, key: &Type) -> Result<Type, String> {
    match (target, key) {
        (Type::Map(value), Type::String) => Ok((**value).clone()),
        (Type::List(elem), Type::Int) => Ok((**elem).clone()),
        _ => Err(format!("cannot index {target} with {key}")),
    }
}

pub(crate) fn in_type(needle: &Type, haystack: &Type) -> Result<Type, String> {
    let ok = match haystack {
        Type::List(elem) => unify(needle, elem).is_some(),
        Type::Map(_) => *needle == Type::String,
        _ => false,
    };
    if ok {
        Ok(Type::Bool)
    } else {
        Err(format!("no matching overload for 'in' applied to ({needle}, {haystack})"))
    }
}

pub(crate) fn conditional_type(cond: &Type, then: &Type, otherwise: &Type) -> Result<Type, String> {
    if *cond != Type::Bool {
        return Err(format!("conditional requires a bool condition, found {cond}"));
    }
    unify(then, otherwise)
        .ok_or_else(|| format!("conditional branches disagree: {then} and {otherwise}"))
}

pub(crate) fn list_type(items: &[Type]) -> Result<Type, String> {
    let Some(first) = items.first() else {
        return Err("empty list literal has no element type".to_owned());
    };
    let elem = items.iter().skip(1).try_fold(first.clone(), |acc, ty| {
        unify(&acc, ty).ok_or_else(|| format!("list elements disagree: {acc} and {ty}"))
    })?;
    Ok(Type::List(Box::new(elem)))
}

pub(crate) fn call_type(function: Function, args: &[Type]) -> Result<Type, String> {
    if args.len() != function.arity() {
        return Err(format!(
            "'{function}' takes {} argument(s), found {}",
            function.arity(),
            args.len()
        ));
    }
    let result = match (function, args) {
        (Function::Size, [Type::String | Type::List(_) | Type::Map(_)]) => Some(Type::Int),
        (Function::ToInt, [Type::Int | Type::Float | Type::String]) => Some(Type::Int),
        (Function::ToFloat, [Type::Int | Type::Float | Type::String]) => Some(Type::Float),
        (Function::ToString, [Type::Bool | Type::Int | Type::Float | Type::String]) => {
            Some(Type::String)
        }
        (
            Function::Contains | Function::StartsWith | Function::EndsWith,
            [Type::String, Type::String],
        ) => Some(Type::Bool),
        _ => None,
    };
    result.ok_or_else(|| {
        let list: Vec<String> = args.iter().map(ToString::to_string).collect();
        format!("no matching overload for '{function}' applied to ({})", list.join(", "))
    })
}
