use std::sync::Arc;

use txrule::{AggregateError, Engine, EngineConfig, Outcome, RawTransaction, Transaction};

const RULES: &str = r#"
rule "QRIS High risk":
    txn.Type == 'QRIS'
        && txn.Currency == 'IDR'
        && txn.Amount >= 1000000.0
        && txn.RiskScore >= 7

rule "VA High risk":
    txn.Type == 'VA'
        && txn.Currency == 'IDR'
        && txn.Amount >= 2000000.0
        && txn.RiskScore >= 7

rule "IDR VA Aggregate":
    txn.Type == 'VA'
        && txn.Currency == 'IDR'
        && txn.Aggregates["failed_txn_past_month"] > 7.0

rule "IDR VA not VIP":
    txn.Type == 'VA'
        && txn.Currency == 'IDR'
        && !txn.CustomBools["is_vip"]

rule "IDR VA super VIP":
    txn.Type == 'VA'
        && txn.Currency == 'IDR'
        && txn.CustomFloats["vip_level"] > 5.0
"#;

/// Stand-in for a lookup against transaction history.
fn failed_txn_past_month(_: &str, txn: &Transaction) -> Result<f64, AggregateError> {
    Ok(if txn.risk_score > 5 { 8.0 } else { 6.0 })
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("txrule=info".parse()?),
        )
        .init();

    let engine = Engine::builder()
        .config(EngineConfig {
            aggregates: vec!["failed_txn_past_month".into()],
            ..EngineConfig::default()
        })
        .aggregate_source(Arc::new(failed_txn_past_month))
        .build();
    engine.submit_rule_file(RULES)?;

    let transactions = [
        RawTransaction::new("high risk QRIS large txn")
            .kind("QRIS")
            .currency("IDR")
            .amount(100_000_000.0)
            .risk_score(8),
        RawTransaction::new("high risk VA large txn")
            .kind("VA")
            .currency("IDR")
            .amount(100_000_000.0)
            .risk_score(7)
            .custom("is_vip", true),
        RawTransaction::new("low risk VA large txn")
            .kind("VA")
            .currency("IDR")
            .amount(100_000_000.0)
            .risk_score(2)
            .custom("vip_level", 7),
    ];

    for raw in transactions {
        println!("{}", "=".repeat(60));
        println!("{}", raw.name);
        for report in engine.assess(raw)? {
            println!("  {report}");
            if let Outcome::Evaluated { trace: Some(trace), .. } = report.outcome() {
                for entry in trace.entries() {
                    println!("      {}: {}", entry.id, entry.value);
                }
            }
        }
    }
    Ok(())
}
