use std::sync::Arc;

use txrule::{
    AggregateError, CompileError, Engine, EngineConfig, Error, EvalError, ExecutionMode,
    FailureStage, MissingKeyPolicy, Outcome, PreparationError, RawTransaction, RuleSource,
    SubmitError, Transaction,
};

fn engine_with(rules: &[(&str, &str)]) -> Engine {
    let engine = Engine::new();
    let sources: Vec<RuleSource> = rules.iter().map(|&(n, t)| RuleSource::new(n, t)).collect();
    engine.submit_rule_set(&sources).unwrap();
    engine
}

fn single(engine: &Engine, raw: RawTransaction) -> Outcome {
    let mut reports = engine.assess(raw).unwrap();
    assert_eq!(reports.len(), 1);
    reports.remove(0).outcome().clone()
}

fn matched(rule: &str, raw: RawTransaction) -> Option<bool> {
    engine_with(&[("r", rule)]).assess(raw).unwrap()[0].matched()
}

#[test]
fn empty_rule_set_yields_no_reports() {
    let engine = Engine::new();
    assert!(engine.assess(RawTransaction::new("t")).unwrap().is_empty());
}

#[test]
fn many_rules_keep_order() {
    let rules: Vec<RuleSource> = (0..65)
        .map(|i| RuleSource::new(format!("r{i}"), format!("txn.riskScore >= {i}")))
        .collect();
    let engine = Engine::new();
    engine.submit_rule_set(&rules).unwrap();

    let reports = engine.assess(RawTransaction::new("t").risk_score(32)).unwrap();
    assert_eq!(reports.len(), 65);
    for (i, report) in reports.iter().enumerate() {
        assert_eq!(report.rule(), format!("r{i}"));
        assert_eq!(report.matched(), Some(i <= 32));
    }
}

// ---------------------------------------------------------------------------
// Numbers
// ---------------------------------------------------------------------------

#[test]
fn nan_comparisons_are_false() {
    let raw = || RawTransaction::new("t").custom("ratio", f64::NAN);
    assert_eq!(
        matched("txn.customFloats['ratio'] == txn.customFloats['ratio']", raw()),
        Some(false)
    );
    assert_eq!(matched("txn.customFloats['ratio'] > 0.0", raw()), Some(false));
    assert_eq!(matched("txn.customFloats['ratio'] <= 0.0", raw()), Some(false));
    assert_eq!(matched("txn.customFloats['ratio'] != 1.0", raw()), Some(true));
}

#[test]
fn infinity_compares_normally() {
    let raw = || RawTransaction::new("t").custom("limit", f64::INFINITY);
    assert_eq!(matched("txn.customFloats['limit'] > 1e300", raw()), Some(true));
    assert_eq!(matched("txn.amount / 0.0 > 1.0", RawTransaction::new("t").amount(1.0)), Some(true));
}

#[test]
fn integer_division_by_zero_fails_the_rule() {
    let engine = engine_with(&[("r", "txn.riskScore / (txn.riskScore - 3) > 1")]);
    match single(&engine, RawTransaction::new("t").risk_score(3)) {
        Outcome::Failed(failure) => {
            assert_eq!(failure.stage, FailureStage::Eval);
            assert_eq!(failure.message, EvalError::DivisionByZero.to_string());
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[test]
fn integer_overflow_fails_the_rule() {
    let engine = engine_with(&[("r", "txn.riskScore * 9223372036854775807 > 0")]);
    let outcome = single(&engine, RawTransaction::new("t").risk_score(2));
    assert!(matches!(outcome, Outcome::Failed(ref f) if f.message.contains("overflow")));
}

#[test]
fn int_and_float_mix() {
    let raw = || RawTransaction::new("t").risk_score(7);
    assert_eq!(matched("txn.riskScore + 0.5 > 7.0", raw()), Some(true));
    assert_eq!(matched("txn.riskScore == 7.0", raw()), Some(true));
}

// ---------------------------------------------------------------------------
// Strings
// ---------------------------------------------------------------------------

#[test]
fn empty_and_unicode_strings() {
    assert_eq!(matched("txn.currency == ''", RawTransaction::new("t")), Some(true));
    assert_eq!(matched("txn.name.size() == 3", RawTransaction::new("日本語")), Some(true));
    assert_eq!(
        matched(
            "txn.customStrings['memo'].contains('refund')",
            RawTransaction::new("t").custom("memo", "partial refund #12"),
        ),
        Some(true)
    );
}

#[test]
fn in_list_membership() {
    let rule = "txn.type in ['VA', 'QRIS']";
    assert_eq!(matched(rule, RawTransaction::new("t").kind("VA")), Some(true));
    assert_eq!(matched(rule, RawTransaction::new("t").kind("CARD")), Some(false));
}

// ---------------------------------------------------------------------------
// Missing keys and error absorption
// ---------------------------------------------------------------------------

#[test]
fn missing_key_fails_under_default_policy() {
    let engine = engine_with(&[("vip", "txn.customBools['is_vip']")]);
    let outcome = single(&engine, RawTransaction::new("t"));
    assert!(matches!(outcome, Outcome::Failed(ref f) if f.stage == FailureStage::Eval));
}

#[test]
fn missing_key_reads_zero_under_zero_value_policy() {
    let engine = Engine::builder()
        .config(EngineConfig {
            missing_keys: MissingKeyPolicy::ZeroValue,
            ..EngineConfig::default()
        })
        .build();
    engine
        .submit_rule_set(&[
            RuleSource::new("not_vip", "!txn.customBools['is_vip']"),
            RuleSource::new("level", "txn.customFloats['vip_level'] == 0.0"),
            RuleSource::new("memo", "txn.customStrings['memo'] == ''"),
        ])
        .unwrap();
    let reports = engine.assess(RawTransaction::new("t")).unwrap();
    assert!(reports.iter().all(|r| r.matched() == Some(true)));
}

#[test]
fn logical_operators_absorb_errors() {
    let raw = || RawTransaction::new("t").risk_score(5);
    assert_eq!(matched("txn.customBools['missing'] || txn.riskScore > 1", raw()), Some(true));
    assert_eq!(matched("txn.riskScore > 1 || txn.customBools['missing']", raw()), Some(true));
    assert_eq!(matched("txn.customBools['missing'] && txn.riskScore > 9", raw()), Some(false));
    assert_eq!(matched("txn.customBools['missing'] && txn.riskScore > 1", raw()), None);
    assert_eq!(matched("txn.customBools['missing'] || txn.riskScore > 9", raw()), None);
}

#[test]
fn unsupported_custom_values_are_dropped() {
    let engine = engine_with(&[("tags", "txn.customStrings['tags'] == ''")]);
    let reports = engine
        .assess_json(r#"{"name": "t", "customData": {"tags": ["a", "b"], "note": null}}"#)
        .unwrap();
    assert!(matches!(reports[0].failure(), Some(f) if f.message.contains("tags")));
}

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

#[test]
fn non_boolean_rule_is_rejected() {
    let engine = Engine::new();
    let err = engine
        .submit_rule_set(&[RuleSource::new("amount", "txn.amount * 2.0")])
        .unwrap_err();
    assert!(matches!(
        err,
        SubmitError::Rejected(ref r) if matches!(r[0].error, CompileError::WrongOutputType { .. })
    ));
}

#[test]
fn unknown_variable_and_empty_name_are_rejected_together() {
    let engine = Engine::new();
    let err = engine
        .submit_rule_set(&[
            RuleSource::new("user", "user.age > 18"),
            RuleSource::new("", "txn.riskScore > 1"),
            RuleSource::new("fine", "txn.riskScore > 1"),
        ])
        .unwrap_err();
    let SubmitError::Rejected(rejections) = err else {
        panic!("expected rejection");
    };
    assert_eq!(rejections.len(), 2);
    assert!(matches!(rejections[0].error, CompileError::InvalidExpression { .. }));
    assert_eq!(rejections[1].error, CompileError::EmptyName);
    assert!(engine.rules().is_empty());
}

#[test]
fn over_deep_rules_are_rejected_without_crashing() {
    let engine = engine_with(&[("kept", "txn.riskScore > 1")]);
    let chain = vec!["txn.riskScore >= 0"; 3000].join(" && ");
    let parens = format!("{}true{}", "(".repeat(20_000), ")".repeat(20_000));
    let err = engine
        .submit_rule_set(&[
            RuleSource::new("chain", chain),
            RuleSource::new("parens", parens),
            RuleSource::new("fine", "txn.riskScore > 1"),
        ])
        .unwrap_err();
    let SubmitError::Rejected(rejections) = err else {
        panic!("expected rejection");
    };
    let names: Vec<&str> = rejections.iter().map(|r| r.rule.as_str()).collect();
    assert_eq!(names, vec!["chain", "parens"]);
    for rejection in &rejections {
        assert!(matches!(rejection.error, CompileError::InvalidExpression { .. }));
    }
    assert_eq!(engine.rules().len(), 1);
}

#[test]
fn long_chain_within_the_depth_limit_evaluates() {
    let chain = vec!["txn.riskScore >= 0"; 90].join(" && ");
    assert_eq!(matched(&chain, RawTransaction::new("t")), Some(true));
    let alternatives = vec!["txn.riskScore > 5"; 90].join(" || ");
    assert_eq!(matched(&alternatives, RawTransaction::new("t")), Some(false));
}

#[test]
fn empty_rule_set_submission_clears_rules() {
    let engine = engine_with(&[("r", "txn.riskScore > 1")]);
    engine.submit_rule_set(&[]).unwrap();
    assert!(engine.rules().is_empty());
}

// ---------------------------------------------------------------------------
// Preparation
// ---------------------------------------------------------------------------

#[test]
fn invalid_amount_fails_the_assessment() {
    let engine = engine_with(&[("r", "txn.riskScore > 1")]);
    for amount in [-1.0, f64::NAN, f64::INFINITY] {
        assert!(matches!(
            engine.assess(RawTransaction::new("t").amount(amount)),
            Err(PreparationError::InvalidAmount { .. })
        ));
    }
}

#[test]
fn configured_aggregates_need_a_source() {
    let engine = Engine::builder()
        .config(EngineConfig {
            aggregates: vec!["failed_txn_past_month".into()],
            ..EngineConfig::default()
        })
        .build();
    assert!(matches!(
        engine.assess(RawTransaction::new("t")),
        Err(PreparationError::NoAggregateSource)
    ));
}

#[test]
fn failing_aggregate_aborts_preparation() {
    let source = |name: &str, _: &Transaction| -> Result<f64, AggregateError> {
        Err(AggregateError::new(format!("{name} unavailable")))
    };
    let engine = Engine::builder()
        .config(EngineConfig {
            aggregates: vec!["failed_txn_past_month".into()],
            ..EngineConfig::default()
        })
        .aggregate_source(Arc::new(source))
        .build();
    let err = engine
        .assess_json(r#"{"name": "t", "riskScore": 3}"#)
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Preparation(PreparationError::Aggregate { ref name, .. })
            if name == "failed_txn_past_month"
    ));
}

// ---------------------------------------------------------------------------
// Scheduling
// ---------------------------------------------------------------------------

#[test]
fn zero_deadline_keeps_one_report_per_rule() {
    let engine = Engine::builder()
        .config(EngineConfig {
            deadline_ms: Some(0),
            ..EngineConfig::default()
        })
        .build();
    let rules: Vec<RuleSource> = (0..16)
        .map(|i| RuleSource::new(format!("r{i}"), "txn.riskScore >= 0"))
        .collect();
    engine.submit_rule_set(&rules).unwrap();

    let reports = engine.assess(RawTransaction::new("t")).unwrap();
    let names: Vec<&str> = reports.iter().map(|r| r.rule()).collect();
    let expected: Vec<String> = (0..16).map(|i| format!("r{i}")).collect();
    assert_eq!(names, expected);
}

#[test]
fn sequential_mode_ignores_deadline() {
    let engine = Engine::builder()
        .config(EngineConfig {
            execution: ExecutionMode::Sequential,
            deadline_ms: Some(0),
            ..EngineConfig::default()
        })
        .build();
    engine
        .submit_rule_set(&[RuleSource::new("r", "txn.riskScore >= 0")])
        .unwrap();
    let reports = engine.assess(RawTransaction::new("t")).unwrap();
    assert_eq!(reports[0].matched(), Some(true));
}

#[test]
fn disabling_trace_drops_it_from_reports() {
    let engine = Engine::builder()
        .config(EngineConfig {
            trace: false,
            ..EngineConfig::default()
        })
        .build();
    engine
        .submit_rule_set(&[RuleSource::new("r", "txn.riskScore >= 0")])
        .unwrap();
    let reports = engine.assess(RawTransaction::new("t")).unwrap();
    assert_eq!(reports[0].matched(), Some(true));
    assert!(reports[0].trace().is_none());
}
