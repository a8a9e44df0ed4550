use std::fmt;
use std::sync::Arc;

use tracing::{info, info_span};

use crate::compile::compile_rule_set;
use crate::error::{Error, PreparationError, SubmitError};
use crate::parse::parse_rules;
use crate::{
    AggregateSource, EngineConfig, EvaluationReport, MemoryRuleStore, Orchestrator, Preparation,
    RawTransaction, RuleSource, RuleStore, Schema, StoredRule, Transaction,
};

/// Builder for [`Engine`].
#[derive(Default)]
pub struct EngineBuilder {
    config: EngineConfig,
    store: Option<Arc<dyn RuleStore>>,
    aggregate_source: Option<Arc<dyn AggregateSource>>,
}

impl EngineBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Where compiled rules are kept. Defaults to a [`MemoryRuleStore`].
    #[must_use]
    pub fn store(mut self, store: Arc<dyn RuleStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Source for the aggregates named in the config.
    #[must_use]
    pub fn aggregate_source(mut self, source: Arc<dyn AggregateSource>) -> Self {
        self.aggregate_source = Some(source);
        self
    }

    #[must_use]
    pub fn build(self) -> Engine {
        let schema = Arc::new(Schema::with_variable(self.config.variable.clone()));

        let mut preparation = Preparation::new().aggregates(self.config.aggregates.iter().cloned());
        if let Some(source) = self.aggregate_source {
            preparation = preparation.source(source);
        }

        let orchestrator = Orchestrator::new(Arc::clone(&schema))
            .options(self.config.eval_options())
            .mode(self.config.execution)
            .deadline(self.config.deadline());

        Engine {
            schema,
            store: self
                .store
                .unwrap_or_else(|| Arc::new(MemoryRuleStore::new())),
            preparation,
            orchestrator,
        }
    }
}

/// The decision engine: accepts rule sets and assesses transactions against
/// the current one.
///
/// `Engine` is `Send + Sync`; concurrent `assess` calls each work on their own
/// snapshot of the rule set.
///
/// ```ignore
/// let engine = Engine::new();
/// engine.submit_rule_set(&[RuleSource::new("big", "txn.amount >= 1000000.0")])?;
/// let reports = engine.assess(RawTransaction::new("t").amount(2_000_000.0))?;
/// assert_eq!(reports[0].matched(), Some(true));
/// ```
pub struct Engine {
    schema: Arc<Schema>,
    store: Arc<dyn RuleStore>,
    preparation: Preparation,
    orchestrator: Orchestrator,
}

impl Engine {
    /// An engine with default config and an in-memory store.
    #[must_use]
    pub fn new() -> Self {
        EngineBuilder::new().build()
    }

    #[must_use]
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// The current rule set snapshot.
    #[must_use]
    pub fn rules(&self) -> Arc<Vec<StoredRule>> {
        self.store.get()
    }

    /// Compile and store a rule set, replacing the current one.
    ///
    /// # Errors
    ///
    /// Returns [`SubmitError::Rejected`] listing every rule that failed to
    /// compile, or a store error. The current rule set is untouched on error.
    pub fn submit_rule_set(&self, rules: &[RuleSource]) -> Result<(), SubmitError> {
        let stored = compile_rule_set(rules, &self.schema)?;
        let count = stored.len();
        self.store.save(stored)?;
        info!(rules = count, "rule set stored");
        Ok(())
    }

    /// Parse a rule file and submit its rules as one set.
    ///
    /// # Errors
    ///
    /// Returns [`SubmitError::Parse`] for a malformed file, otherwise as
    /// [`submit_rule_set()`](Self::submit_rule_set).
    pub fn submit_rule_file(&self, text: &str) -> Result<(), SubmitError> {
        let parsed = parse_rules(text)?;
        self.submit_rule_set(&parsed.rules)
    }

    /// Validate, categorize and aggregate a raw transaction.
    ///
    /// # Errors
    ///
    /// See [`Preparation::prepare()`].
    pub fn prepare(&self, raw: RawTransaction) -> Result<Transaction, PreparationError> {
        self.preparation.prepare(raw)
    }

    /// Evaluate a prepared transaction against the current rule set.
    pub fn evaluate(&self, txn: Transaction) -> Vec<EvaluationReport> {
        let rules = self.store.get();
        self.orchestrator.evaluate(&Arc::new(txn), &rules)
    }

    /// Prepare a raw transaction and evaluate it against every stored rule.
    ///
    /// Per-rule failures are reported in the returned reports; only a
    /// preparation failure fails the whole call.
    ///
    /// # Errors
    ///
    /// Returns [`PreparationError`] if the transaction cannot be prepared.
    pub fn assess(&self, raw: RawTransaction) -> Result<Vec<EvaluationReport>, PreparationError> {
        let span = info_span!("assess", txn = %raw.name);
        let _guard = span.enter();

        let txn = self.prepare(raw)?;
        let reports = self.evaluate(txn);
        for report in &reports {
            info!("{report}");
        }
        Ok(reports)
    }

    /// Decode a raw transaction from JSON, then [`assess()`](Self::assess) it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] for malformed input and
    /// [`Error::Preparation`] if preparation fails.
    pub fn assess_json(&self, json: &str) -> Result<Vec<EvaluationReport>, Error> {
        let raw: RawTransaction = serde_json::from_str(json)?;
        Ok(self.assess(raw)?)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("variable", &self.schema.variable())
            .field("rules", &self.store.get().len())
            .field("preparation", &self.preparation)
            .field("orchestrator", &self.orchestrator)
            .finish()
    }
}
