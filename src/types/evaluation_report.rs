use std::fmt;

use super::trace::Trace;

/// Where a rule's evaluation broke down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    /// The stored bytes could not be decoded into an artifact.
    Deserialize,
    /// The artifact did not fit the schema.
    Reconstruct,
    /// The expression failed while executing.
    Eval,
    /// The rule's worker panicked.
    Panicked,
    /// No worker could be started for the rule.
    Spawn,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            FailureStage::Deserialize => "deserialize",
            FailureStage::Reconstruct => "reconstruct",
            FailureStage::Eval => "eval",
            FailureStage::Panicked => "panicked",
            FailureStage::Spawn => "spawn",
        };
        write!(f, "{stage}")
    }
}

/// An isolated per-rule failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleFailure {
    pub stage: FailureStage,
    pub message: String,
}

impl RuleFailure {
    pub(crate) fn new(stage: FailureStage, error: impl fmt::Display) -> Self {
        Self {
            stage,
            message: error.to_string(),
        }
    }
}

impl fmt::Display for RuleFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.stage, self.message)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Evaluated { matched: bool, trace: Option<Trace> },
    Failed(RuleFailure),
    /// The rule had not finished when the deadline expired.
    Incomplete,
}

/// The outcome of evaluating one rule against one transaction.
#[derive(Debug, Clone, PartialEq)]
#[must_use]
pub struct EvaluationReport {
    rule: String,
    outcome: Outcome,
}

impl EvaluationReport {
    pub(crate) fn new(rule: impl Into<String>, outcome: Outcome) -> Self {
        Self {
            rule: rule.into(),
            outcome,
        }
    }

    #[must_use]
    pub fn rule(&self) -> &str {
        &self.rule
    }

    #[must_use]
    pub fn outcome(&self) -> &Outcome {
        &self.outcome
    }

    /// `Some(matched)` when the rule evaluated, `None` when it failed or is incomplete.
    #[must_use]
    pub fn matched(&self) -> Option<bool> {
        match self.outcome {
            Outcome::Evaluated { matched, .. } => Some(matched),
            Outcome::Failed(_) | Outcome::Incomplete => None,
        }
    }

    #[must_use]
    pub fn trace(&self) -> Option<&Trace> {
        match &self.outcome {
            Outcome::Evaluated { trace, .. } => trace.as_ref(),
            Outcome::Failed(_) | Outcome::Incomplete => None,
        }
    }

    #[must_use]
    pub fn failure(&self) -> Option<&RuleFailure> {
        match &self.outcome {
            Outcome::Failed(failure) => Some(failure),
            Outcome::Evaluated { .. } | Outcome::Incomplete => None,
        }
    }
}

impl fmt::Display for EvaluationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            Outcome::Evaluated { matched, .. } => {
                write!(f, "rule [{}] result: {matched}", self.rule)
            }
            Outcome::Failed(failure) => write!(f, "rule [{}] failed: {failure}", self.rule),
            Outcome::Incomplete => write!(f, "rule [{}] incomplete", self.rule),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::Value;

    #[test]
    fn report_accessors() {
        let trace = Trace::from_map(BTreeMap::from([(1, Value::Bool(true))]));
        let report = EvaluationReport::new(
            "QRIS High risk",
            Outcome::Evaluated {
                matched: true,
                trace: Some(trace.clone()),
            },
        );
        assert_eq!(report.rule(), "QRIS High risk");
        assert_eq!(report.matched(), Some(true));
        assert_eq!(report.trace(), Some(&trace));
        assert!(report.failure().is_none());
    }

    #[test]
    fn report_display_variants() {
        let ok = EvaluationReport::new(
            "r",
            Outcome::Evaluated {
                matched: false,
                trace: None,
            },
        );
        assert_eq!(ok.to_string(), "rule [r] result: false");

        let failed = EvaluationReport::new(
            "r",
            Outcome::Failed(RuleFailure::new(FailureStage::Eval, "no such key: 'is_vip'")),
        );
        assert_eq!(failed.to_string(), "rule [r] failed: eval: no such key: 'is_vip'");
        assert_eq!(failed.matched(), None);

        let incomplete = EvaluationReport::new("r", Outcome::Incomplete);
        assert_eq!(incomplete.to_string(), "rule [r] incomplete");
    }
}
