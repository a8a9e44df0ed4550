use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A prepared transaction: the fact record every rule is evaluated against.
///
/// Produced by [`Preparation::prepare()`](crate::Preparation::prepare). The
/// dynamic maps are ordered so traces and displays are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Transaction {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub currency: String,
    pub amount: f64,
    pub risk_score: i64,
    pub custom_bools: BTreeMap<String, bool>,
    pub custom_floats: BTreeMap<String, f64>,
    pub custom_strings: BTreeMap<String, String>,
    pub aggregates: BTreeMap<String, f64>,
}

/// A transaction as submitted by a caller, before preparation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawTransaction {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub currency: String,
    pub amount: f64,
    pub risk_score: i64,
    pub custom_data: BTreeMap<String, RawValue>,
}

impl RawTransaction {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    #[must_use]
    pub fn currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    #[must_use]
    pub fn amount(mut self, amount: f64) -> Self {
        self.amount = amount;
        self
    }

    #[must_use]
    pub fn risk_score(mut self, risk_score: i64) -> Self {
        self.risk_score = risk_score;
        self
    }

    /// Attach one dynamic extension field.
    #[must_use]
    pub fn custom(mut self, key: impl Into<String>, value: impl Into<RawValue>) -> Self {
        self.custom_data.insert(key.into(), value.into());
        self
    }
}

/// A dynamic extension value of caller-determined kind.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    /// Anything else (null, arrays, objects). Dropped during categorization.
    Unsupported,
}

impl Serialize for RawValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            RawValue::Bool(v) => serializer.serialize_bool(*v),
            RawValue::Int(v) => serializer.serialize_i64(*v),
            RawValue::Float(v) => serializer.serialize_f64(*v),
            RawValue::String(v) => serializer.serialize_str(v),
            RawValue::Unsupported => serializer.serialize_unit(),
        }
    }
}

impl From<serde_json::Value> for RawValue {
    #[allow(clippy::cast_precision_loss)]
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Bool(b) => RawValue::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    RawValue::Int(i)
                } else if let Some(u) = n.as_u64() {
                    RawValue::Float(u as f64)
                } else {
                    n.as_f64().map_or(RawValue::Unsupported, RawValue::Float)
                }
            }
            serde_json::Value::String(s) => RawValue::String(s),
            serde_json::Value::Null
            | serde_json::Value::Array(_)
            | serde_json::Value::Object(_) => RawValue::Unsupported,
        }
    }
}

impl<'de> Deserialize<'de> for RawValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(RawValue::from)
    }
}

impl From<bool> for RawValue {
    fn from(v: bool) -> Self {
        RawValue::Bool(v)
    }
}

impl From<i64> for RawValue {
    fn from(v: i64) -> Self {
        RawValue::Int(v)
    }
}

impl From<i32> for RawValue {
    fn from(v: i32) -> Self {
        RawValue::Int(i64::from(v))
    }
}

impl From<f64> for RawValue {
    fn from(v: f64) -> Self {
        RawValue::Float(v)
    }
}

impl From<&str> for RawValue {
    fn from(v: &str) -> Self {
        RawValue::String(v.to_owned())
    }
}

impl From<String> for RawValue {
    fn from(v: String) -> Self {
        RawValue::String(v)
    }
}
