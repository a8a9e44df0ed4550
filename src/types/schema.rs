use std::collections::{BTreeMap, HashMap};
use std::fmt;

use super::checked::Type;
use super::transaction::Transaction;
use super::value::Value;

/// The fields a rule can read from a [`Transaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Name,
    Type,
    Currency,
    Amount,
    RiskScore,
    CustomBools,
    CustomFloats,
    CustomStrings,
    Aggregates,
}

impl Field {
    pub const ALL: [Field; 9] = [
        Field::Name,
        Field::Type,
        Field::Currency,
        Field::Amount,
        Field::RiskScore,
        Field::CustomBools,
        Field::CustomFloats,
        Field::CustomStrings,
        Field::Aggregates,
    ];

    /// The name this field is recorded under in compiled artifacts.
    #[must_use]
    pub fn canonical_name(self) -> &'static str {
        match self {
            Field::Name => "name",
            Field::Type => "type",
            Field::Currency => "currency",
            Field::Amount => "amount",
            Field::RiskScore => "riskScore",
            Field::CustomBools => "customBools",
            Field::CustomFloats => "customFloats",
            Field::CustomStrings => "customStrings",
            Field::Aggregates => "aggregates",
        }
    }

    #[must_use]
    pub fn ty(self) -> Type {
        match self {
            Field::Name | Field::Type | Field::Currency => Type::String,
            Field::Amount => Type::Float,
            Field::RiskScore => Type::Int,
            Field::CustomBools => Type::Map(Box::new(Type::Bool)),
            Field::CustomFloats | Field::Aggregates => Type::Map(Box::new(Type::Float)),
            Field::CustomStrings => Type::Map(Box::new(Type::String)),
        }
    }

    /// Read this field from a transaction.
    #[must_use]
    pub fn read(self, txn: &Transaction) -> Value {
        fn map<T: Clone + Into<Value>>(entries: &BTreeMap<String, T>) -> Value {
            Value::Map(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone().into()))
                    .collect(),
            )
        }
        match self {
            Field::Name => Value::String(txn.name.clone()),
            Field::Type => Value::String(txn.kind.clone()),
            Field::Currency => Value::String(txn.currency.clone()),
            Field::Amount => Value::Float(txn.amount),
            Field::RiskScore => Value::Int(txn.risk_score),
            Field::CustomBools => map(&txn.custom_bools),
            Field::CustomFloats => map(&txn.custom_floats),
            Field::CustomStrings => map(&txn.custom_strings),
            Field::Aggregates => map(&txn.aggregates),
        }
    }

    /// Look up a single map entry without materialising the whole map.
    /// Returns `None` for scalar fields and for missing keys.
    #[must_use]
    pub fn read_entry(self, txn: &Transaction, key: &str) -> Option<Value> {
        match self {
            Field::CustomBools => txn.custom_bools.get(key).map(|v| Value::Bool(*v)),
            Field::CustomFloats => txn.custom_floats.get(key).map(|v| Value::Float(*v)),
            Field::CustomStrings => txn.custom_strings.get(key).map(|v| Value::String(v.clone())),
            Field::Aggregates => txn.aggregates.get(key).map(|v| Value::Float(*v)),
            Field::Name | Field::Type | Field::Currency | Field::Amount | Field::RiskScore => None,
        }
    }

    fn snake_case_name(self) -> String {
        let mut out = String::new();
        for c in self.canonical_name().chars() {
            if c.is_ascii_uppercase() {
                out.push('_');
                out.push(c.to_ascii_lowercase());
            } else {
                out.push(c);
            }
        }
        out
    }

    fn pascal_case_name(self) -> String {
        let name = self.canonical_name();
        let mut chars = name.chars();
        chars.next().map_or_else(String::new, |first| {
            first.to_ascii_uppercase().to_string() + chars.as_str()
        })
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical_name())
    }
}

/// The typed environment rules are compiled and reconstructed against.
///
/// A schema binds one variable (default `txn`) to the [`Transaction`] shape.
/// Every field is reachable under its camelCase, PascalCase and snake_case
/// spelling, so `txn.riskScore`, `txn.RiskScore` and `txn.risk_score` are
/// the same field.
#[derive(Debug, Clone)]
pub struct Schema {
    variable: String,
    names: HashMap<String, Field>,
}

impl Schema {
    /// The transaction schema bound to the variable `txn`.
    #[must_use]
    pub fn transaction() -> Self {
        Self::with_variable("txn")
    }

    /// The transaction schema bound to a custom variable name.
    #[must_use]
    pub fn with_variable(variable: impl Into<String>) -> Self {
        let mut names = HashMap::new();
        for field in Field::ALL {
            names.insert(field.canonical_name().to_owned(), field);
            names.insert(field.pascal_case_name(), field);
            names.insert(field.snake_case_name(), field);
        }
        Self {
            variable: variable.into(),
            names,
        }
    }

    /// The name of the bound variable.
    #[must_use]
    pub fn variable(&self) -> &str {
        &self.variable
    }

    /// Resolve a field by any accepted spelling.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<Field> {
        self.names.get(name).copied()
    }

    /// Resolve a field by the canonical name recorded in artifacts.
    #[must_use]
    pub fn canonical(&self, name: &str) -> Option<Field> {
        Field::ALL
            .into_iter()
            .find(|f| f.canonical_name() == name)
            .filter(|f| self.names.contains_key(f.canonical_name()))
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self::transaction()
    }
}
