use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::error::PreparationError;
use crate::{RawTransaction, RawValue, Transaction};

/// Failure reported by an [`AggregateSource`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct AggregateError {
    message: String,
}

impl AggregateError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Computes a named aggregate (e.g. `failed_txn_past_month`) for a transaction.
///
/// Implementations may block, for example on a database query. They see the
/// transaction after categorization but before any aggregate is attached.
pub trait AggregateSource: Send + Sync {
    /// # Errors
    ///
    /// Returns [`AggregateError`] when the aggregate cannot be computed.
    fn compute(&self, name: &str, txn: &Transaction) -> Result<f64, AggregateError>;
}

impl<F> AggregateSource for F
where
    F: Fn(&str, &Transaction) -> Result<f64, AggregateError> + Send + Sync,
{
    fn compute(&self, name: &str, txn: &Transaction) -> Result<f64, AggregateError> {
        self(name, txn)
    }
}

/// Split dynamic extension data into the typed maps of a [`Transaction`].
///
/// Integers and floats land in `custom_floats`, booleans in `custom_bools`,
/// strings in `custom_strings`. Unsupported values are dropped.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn categorize(raw: RawTransaction) -> Transaction {
    let mut txn = Transaction {
        name: raw.name,
        kind: raw.kind,
        currency: raw.currency,
        amount: raw.amount,
        risk_score: raw.risk_score,
        ..Transaction::default()
    };
    for (key, value) in raw.custom_data {
        match value {
            RawValue::Bool(b) => {
                txn.custom_bools.insert(key, b);
            }
            RawValue::Int(i) => {
                txn.custom_floats.insert(key, i as f64);
            }
            RawValue::Float(f) => {
                txn.custom_floats.insert(key, f);
            }
            RawValue::String(s) => {
                txn.custom_strings.insert(key, s);
            }
            RawValue::Unsupported => {
                debug!(key = %key, "dropping custom value of unsupported kind");
            }
        }
    }
    txn
}

/// Turns raw caller input into the fact record rules are evaluated against:
/// validation, then categorization, then aggregation.
#[derive(Clone, Default)]
pub struct Preparation {
    aggregates: Vec<String>,
    source: Option<Arc<dyn AggregateSource>>,
}

impl Preparation {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Aggregate names to compute, in order.
    #[must_use]
    pub fn aggregates<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aggregates = names.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn source(mut self, source: Arc<dyn AggregateSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Prepare one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`PreparationError::InvalidAmount`] for a negative or
    /// non-finite amount, [`PreparationError::NoAggregateSource`] when
    /// aggregates are configured without a source, and
    /// [`PreparationError::Aggregate`] when any aggregate fails. A failed
    /// aggregate aborts the whole preparation.
    pub fn prepare(&self, raw: RawTransaction) -> Result<Transaction, PreparationError> {
        if !raw.amount.is_finite() || raw.amount < 0.0 {
            return Err(PreparationError::InvalidAmount { amount: raw.amount });
        }

        let mut txn = categorize(raw);

        if self.aggregates.is_empty() {
            return Ok(txn);
        }
        let source = self
            .source
            .as_ref()
            .ok_or(PreparationError::NoAggregateSource)?;

        let mut results = std::collections::BTreeMap::new();
        for name in &self.aggregates {
            let value = source
                .compute(name, &txn)
                .map_err(|source| PreparationError::Aggregate {
                    name: name.clone(),
                    source,
                })?;
            debug!(aggregate = %name, value, "computed aggregate");
            results.insert(name.clone(), value);
        }
        txn.aggregates = results;
        Ok(txn)
    }
}

impl fmt::Debug for Preparation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Preparation")
            .field("aggregates", &self.aggregates)
            .field("source", &self.source.as_ref().map(|_| "AggregateSource"))
            .finish()
    }
}
