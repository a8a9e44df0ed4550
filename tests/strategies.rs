#![allow(dead_code)]

use std::collections::BTreeMap;

use proptest::prelude::*;
use txrule::{RawTransaction, RuleSource, Transaction};

// --- Fixed fact shape ---
// txn.type                 : one of KINDS
// txn.currency             : one of CURRENCIES
// txn.amount               : multiples of 1000.0 in 0..=2_000_000.0
// txn.riskScore            : 0..=10
// txn.customBools[...]     : keys from BOOL_KEYS, each possibly absent
// txn.aggregates[...]      : keys from AGGREGATES, each possibly absent

pub const KINDS: &[&str] = &["QRIS", "VA", "CARD"];
pub const CURRENCIES: &[&str] = &["IDR", "USD"];
pub const BOOL_KEYS: &[&str] = &["is_vip", "is_new"];
pub const AGGREGATES: &[&str] = &["failed_txn_past_month"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Op {
    fn symbol(self) -> &'static str {
        match self {
            Op::Eq => "==",
            Op::Neq => "!=",
            Op::Gt => ">",
            Op::Gte => ">=",
            Op::Lt => "<",
            Op::Lte => "<=",
        }
    }

    fn apply<T: PartialOrd>(self, a: &T, b: &T) -> bool {
        match self {
            Op::Eq => a == b,
            Op::Neq => a != b,
            Op::Gt => a > b,
            Op::Gte => a >= b,
            Op::Lt => a < b,
            Op::Lte => a <= b,
        }
    }
}

/// A generated boolean rule expression with a reference interpretation.
#[derive(Debug, Clone)]
pub enum GenExpr {
    Amount(Op, f64),
    Risk(Op, i64),
    Kind { equal: bool, value: &'static str },
    Currency { equal: bool, value: &'static str },
    Flag(&'static str),
    Aggregate(Op, &'static str, f64),
    Not(Box<GenExpr>),
    And(Box<GenExpr>, Box<GenExpr>),
    Or(Box<GenExpr>, Box<GenExpr>),
}

impl GenExpr {
    /// Rule text for this expression, fully parenthesized.
    pub fn source(&self) -> String {
        match self {
            GenExpr::Amount(op, v) => format!("txn.amount {} {v:?}", op.symbol()),
            GenExpr::Risk(op, v) => format!("txn.riskScore {} {v}", op.symbol()),
            GenExpr::Kind { equal, value } => {
                format!("txn.type {} '{value}'", if *equal { "==" } else { "!=" })
            }
            GenExpr::Currency { equal, value } => {
                format!("txn.currency {} \"{value}\"", if *equal { "==" } else { "!=" })
            }
            GenExpr::Flag(key) => format!("txn.customBools['{key}']"),
            GenExpr::Aggregate(op, key, v) => {
                format!("txn.aggregates[\"{key}\"] {} {v:?}", op.symbol())
            }
            GenExpr::Not(inner) => format!("!({})", inner.source()),
            GenExpr::And(a, b) => format!("({} && {})", a.source(), b.source()),
            GenExpr::Or(a, b) => format!("({} || {})", a.source(), b.source()),
        }
    }

    /// Reference result. `None` stands for an evaluation error (a missing key).
    pub fn oracle(&self, txn: &Transaction) -> Option<bool> {
        match self {
            GenExpr::Amount(op, v) => Some(op.apply(&txn.amount, v)),
            GenExpr::Risk(op, v) => Some(op.apply(&txn.risk_score, v)),
            GenExpr::Kind { equal, value } => Some((txn.kind == *value) == *equal),
            GenExpr::Currency { equal, value } => Some((txn.currency == *value) == *equal),
            GenExpr::Flag(key) => txn.custom_bools.get(*key).copied(),
            GenExpr::Aggregate(op, key, v) => txn.aggregates.get(*key).map(|a| op.apply(a, v)),
            GenExpr::Not(inner) => inner.oracle(txn).map(|b| !b),
            GenExpr::And(a, b) => match (a.oracle(txn), b.oracle(txn)) {
                (Some(false), _) | (_, Some(false)) => Some(false),
                (Some(true), Some(true)) => Some(true),
                _ => None,
            },
            GenExpr::Or(a, b) => match (a.oracle(txn), b.oracle(txn)) {
                (Some(true), _) | (_, Some(true)) => Some(true),
                (Some(false), Some(false)) => Some(false),
                _ => None,
            },
        }
    }

    /// Whether evaluation can hit a missing key at all.
    pub fn reads_maps(&self) -> bool {
        match self {
            GenExpr::Flag(_) | GenExpr::Aggregate(..) => true,
            GenExpr::Not(inner) => inner.reads_maps(),
            GenExpr::And(a, b) | GenExpr::Or(a, b) => a.reads_maps() || b.reads_maps(),
            _ => false,
        }
    }
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop::sample::select(&[Op::Eq, Op::Neq, Op::Gt, Op::Gte, Op::Lt, Op::Lte][..])
}

fn arb_amount() -> impl Strategy<Value = f64> {
    (0_u32..=2000).prop_map(|k| f64::from(k) * 1000.0)
}

fn arb_scalar_leaf() -> impl Strategy<Value = GenExpr> {
    prop_oneof![
        (arb_op(), arb_amount()).prop_map(|(op, v)| GenExpr::Amount(op, v)),
        (arb_op(), 0_i64..=10).prop_map(|(op, v)| GenExpr::Risk(op, v)),
        (any::<bool>(), prop::sample::select(KINDS))
            .prop_map(|(equal, value)| GenExpr::Kind { equal, value }),
        (any::<bool>(), prop::sample::select(CURRENCIES))
            .prop_map(|(equal, value)| GenExpr::Currency { equal, value }),
    ]
}

fn arb_leaf() -> impl Strategy<Value = GenExpr> {
    prop_oneof![
        4 => arb_scalar_leaf(),
        1 => prop::sample::select(BOOL_KEYS).prop_map(GenExpr::Flag),
        1 => (arb_op(), prop::sample::select(AGGREGATES), 0_u32..=10)
            .prop_map(|(op, key, v)| GenExpr::Aggregate(op, key, f64::from(v))),
    ]
}

fn arb_tree<S>(leaf: S) -> impl Strategy<Value = GenExpr>
where
    S: Strategy<Value = GenExpr> + 'static,
{
    leaf.prop_recursive(4, 24, 2, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone())
                .prop_map(|(a, b)| GenExpr::And(Box::new(a), Box::new(b))),
            (inner.clone(), inner.clone())
                .prop_map(|(a, b)| GenExpr::Or(Box::new(a), Box::new(b))),
            inner.prop_map(|e| GenExpr::Not(Box::new(e))),
        ]
    })
}

/// Boolean expression trees of bounded depth.
pub fn arb_expr() -> impl Strategy<Value = GenExpr> {
    arb_tree(arb_leaf())
}

/// Trees over scalar fields only; these never touch a map.
pub fn arb_map_free_expr() -> impl Strategy<Value = GenExpr> {
    arb_tree(arb_scalar_leaf())
}

/// A prepared transaction drawn from the fixed fact shape.
pub fn arb_transaction() -> impl Strategy<Value = Transaction> {
    (
        prop::sample::select(KINDS),
        prop::sample::select(CURRENCIES),
        arb_amount(),
        0_i64..=10,
        prop::collection::btree_map(prop::sample::select(BOOL_KEYS), any::<bool>(), 0..=2),
        prop::collection::btree_map(prop::sample::select(AGGREGATES), 0_u32..=10, 0..=1),
    )
        .prop_map(|(kind, currency, amount, risk_score, bools, aggregates)| Transaction {
            name: "generated".into(),
            kind: kind.into(),
            currency: currency.into(),
            amount,
            risk_score,
            custom_bools: bools.into_iter().map(|(k, v)| (k.to_owned(), v)).collect(),
            aggregates: aggregates
                .into_iter()
                .map(|(k, v)| (k.to_owned(), f64::from(v)))
                .collect(),
            ..Transaction::default()
        })
}

/// A raw transaction with a mix of dynamic extension kinds.
pub fn arb_raw_transaction() -> impl Strategy<Value = RawTransaction> {
    (
        prop::sample::select(KINDS),
        prop::sample::select(CURRENCIES),
        arb_amount(),
        0_i64..=10,
        prop::option::of(any::<bool>()),
        prop::option::of(-100_i64..=100),
        prop::option::of(-100.0_f64..100.0),
        prop::option::of("[a-z]{0,8}"),
    )
        .prop_map(|(kind, currency, amount, risk, vip, level, ratio, tier)| {
            let mut raw = RawTransaction::new("generated")
                .kind(kind)
                .currency(currency)
                .amount(amount)
                .risk_score(risk);
            if let Some(vip) = vip {
                raw = raw.custom("is_vip", vip);
            }
            if let Some(level) = level {
                raw = raw.custom("vip_level", level);
            }
            if let Some(ratio) = ratio {
                raw = raw.custom("ratio", ratio);
            }
            if let Some(tier) = tier {
                raw = raw.custom("tier", tier);
            }
            raw
        })
}

/// Between one and six rules with distinct names.
pub fn arb_rule_set() -> impl Strategy<Value = Vec<(String, GenExpr)>> {
    prop::collection::vec(arb_expr(), 1..=6).prop_map(|exprs| {
        exprs
            .into_iter()
            .enumerate()
            .map(|(i, e)| (format!("rule_{i}"), e))
            .collect()
    })
}

pub fn sources(rules: &[(String, GenExpr)]) -> Vec<RuleSource> {
    rules
        .iter()
        .map(|(name, expr)| RuleSource::new(name.clone(), expr.source()))
        .collect()
}

/// An aggregate map for tests that only need a fixed value.
pub fn aggregates(value: f64) -> BTreeMap<String, f64> {
    BTreeMap::from([("failed_txn_past_month".to_owned(), value)])
}
