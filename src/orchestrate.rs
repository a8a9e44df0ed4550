use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, debug_span, warn};

use crate::{
    CompiledArtifact, EvalOptions, EvaluationReport, FailureStage, Outcome, Program, RuleFailure,
    Schema, StoredRule, Transaction,
};

/// How the rules of one evaluation are scheduled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// One worker thread per rule.
    #[default]
    Parallel,
    /// Every rule in turn on the calling thread.
    Sequential,
}

/// Runs every stored rule against one transaction and gathers the reports.
///
/// Each rule decodes and reconstructs its own program, so a corrupt artifact
/// or a failing expression only affects its own report. Reports come back in
/// rule-store order whichever [`ExecutionMode`] is used.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    schema: Arc<Schema>,
    options: EvalOptions,
    mode: ExecutionMode,
    deadline: Option<Duration>,
}

impl Orchestrator {
    #[must_use]
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            options: EvalOptions::default(),
            mode: ExecutionMode::default(),
            deadline: None,
        }
    }

    #[must_use]
    pub fn options(mut self, options: EvalOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Stop waiting for rules after `deadline`. Rules still running are
    /// reported as [`Outcome::Incomplete`]. Only applies in parallel mode.
    #[must_use]
    pub fn deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Evaluate every rule in `rules` against `txn`.
    ///
    /// Returns one report per rule, in the order of `rules`.
    pub fn evaluate(
        &self,
        txn: &Arc<Transaction>,
        rules: &Arc<Vec<StoredRule>>,
    ) -> Vec<EvaluationReport> {
        let reports = match self.mode {
            ExecutionMode::Sequential => rules
                .iter()
                .map(|rule| {
                    let outcome = run_isolated(rule, txn, &self.schema, &self.options);
                    EvaluationReport::new(rule.name.as_str(), outcome)
                })
                .collect(),
            ExecutionMode::Parallel => self.evaluate_parallel(txn, rules),
        };
        debug!(
            rules = reports.len(),
            matched = reports.iter().filter(|r| r.matched() == Some(true)).count(),
            "evaluation finished"
        );
        reports
    }

    fn evaluate_parallel(
        &self,
        txn: &Arc<Transaction>,
        rules: &Arc<Vec<StoredRule>>,
    ) -> Vec<EvaluationReport> {
        let (tx, rx) = mpsc::channel::<(usize, Outcome)>();
        let mut outcomes: Vec<Option<Outcome>> = vec![None; rules.len()];
        let mut pending = 0usize;

        for index in 0..rules.len() {
            let tx = tx.clone();
            let worker_rules = Arc::clone(rules);
            let txn = Arc::clone(txn);
            let schema = Arc::clone(&self.schema);
            let options = self.options;
            let spawned = thread::Builder::new()
                .name(format!("txrule-eval-{index}"))
                .spawn(move || {
                    let outcome = run_isolated(&worker_rules[index], &txn, &schema, &options);
                    // The receiver is gone once the deadline has passed.
                    let _ = tx.send((index, outcome));
                });
            match spawned {
                Ok(_) => pending += 1,
                Err(e) => {
                    warn!(rule = %rules[index].name, error = %e, "failed to spawn rule worker");
                    let failure = RuleFailure::new(FailureStage::Spawn, e);
                    outcomes[index] = Some(Outcome::Failed(failure));
                }
            }
        }
        drop(tx);

        let deadline = self.deadline.map(|d| Instant::now() + d);
        rules
            .iter()
            .zip(gather_outcomes(&rx, outcomes, pending, deadline))
            .map(|(rule, outcome)| EvaluationReport::new(rule.name.as_str(), outcome))
            .collect()
    }
}

/// Receive `pending` worker outcomes into their slots.
///
/// Stops early when `deadline` passes or every sender is dropped. Slots still
/// empty are then [`Outcome::Incomplete`] after a timeout and a
/// [`FailureStage::Panicked`] failure after a disconnect.
fn gather_outcomes(
    rx: &Receiver<(usize, Outcome)>,
    mut outcomes: Vec<Option<Outcome>>,
    mut pending: usize,
    deadline: Option<Instant>,
) -> Vec<Outcome> {
    let mut missing = Outcome::Incomplete;
    while pending > 0 {
        let received = match deadline {
            Some(at) => rx.recv_timeout(at.saturating_duration_since(Instant::now())),
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match received {
            Ok((index, outcome)) => {
                outcomes[index] = Some(outcome);
                pending -= 1;
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(pending, "deadline expired with rules still running");
                break;
            }
            Err(RecvTimeoutError::Disconnected) => {
                warn!(pending, "rule workers exited without reporting");
                missing = Outcome::Failed(RuleFailure::new(
                    FailureStage::Panicked,
                    "worker exited without reporting",
                ));
                break;
            }
        }
    }
    outcomes
        .into_iter()
        .map(|outcome| outcome.unwrap_or_else(|| missing.clone()))
        .collect()
}

/// Evaluate one rule, turning a panic into a failure report.
fn run_isolated(
    rule: &StoredRule,
    txn: &Transaction,
    schema: &Schema,
    options: &EvalOptions,
) -> Outcome {
    panic::catch_unwind(AssertUnwindSafe(|| evaluate_rule(rule, txn, schema, options)))
        .unwrap_or_else(|payload| fail(rule, FailureStage::Panicked, panic_message(&*payload)))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "rule worker panicked".to_owned()
    }
}

fn fail(rule: &StoredRule, stage: FailureStage, error: impl std::fmt::Display) -> Outcome {
    let failure = RuleFailure::new(stage, error);
    warn!(rule = %rule.name, stage = %failure.stage, error = %failure.message, "rule failed");
    Outcome::Failed(failure)
}

fn evaluate_rule(
    rule: &StoredRule,
    txn: &Transaction,
    schema: &Schema,
    options: &EvalOptions,
) -> Outcome {
    let _span = debug_span!("rule", name = %rule.name).entered();

    let artifact = match CompiledArtifact::from_bytes(&rule.artifact) {
        Ok(artifact) => artifact,
        Err(e) => return fail(rule, FailureStage::Deserialize, e),
    };
    let program = match Program::from_artifact(artifact, schema) {
        Ok(program) => program,
        Err(e) => return fail(rule, FailureStage::Reconstruct, e),
    };
    match program.execute(txn, options) {
        Ok(execution) => {
            debug!(matched = execution.matched, "rule evaluated");
            Outcome::Evaluated {
                matched: execution.matched,
                trace: execution.trace,
            }
        }
        Err(e) => fail(rule, FailureStage::Eval, e),
    }
}
