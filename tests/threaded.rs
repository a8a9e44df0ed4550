use std::sync::{Arc, Barrier};
use std::thread;

use txrule::{Engine, RawTransaction, RuleSource};

fn engine() -> Arc<Engine> {
    let engine = Engine::new();
    engine
        .submit_rule_set(&[
            RuleSource::new("big", "txn.amount >= 1000000.0"),
            RuleSource::new("risky", "txn.riskScore >= 7"),
            RuleSource::new("qris", "txn.type == 'QRIS'"),
        ])
        .unwrap();
    Arc::new(engine)
}

#[test]
fn assess_across_threads() {
    let engine = engine();
    let mut handles = vec![];

    // Thread 1: big risky QRIS -> all match
    let e = Arc::clone(&engine);
    handles.push(thread::spawn(move || {
        e.assess(
            RawTransaction::new("t1")
                .kind("QRIS")
                .amount(5_000_000.0)
                .risk_score(9),
        )
    }));

    // Thread 2: small VA -> nothing matches
    let e = Arc::clone(&engine);
    handles.push(thread::spawn(move || {
        e.assess(RawTransaction::new("t2").kind("VA").amount(10.0).risk_score(1))
    }));

    // Thread 3: big but low risk
    let e = Arc::clone(&engine);
    handles.push(thread::spawn(move || {
        e.assess(RawTransaction::new("t3").kind("VA").amount(2_000_000.0).risk_score(2))
    }));

    let results: Vec<Vec<Option<bool>>> = handles
        .into_iter()
        .map(|h| {
            h.join()
                .unwrap()
                .unwrap()
                .iter()
                .map(|r| r.matched())
                .collect()
        })
        .collect();

    assert_eq!(results[0], vec![Some(true), Some(true), Some(true)]);
    assert_eq!(results[1], vec![Some(false), Some(false), Some(false)]);
    assert_eq!(results[2], vec![Some(true), Some(false), Some(false)]);
}

#[test]
fn many_concurrent_assessments_agree() {
    let engine = engine();
    let start = Arc::new(Barrier::new(8));
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let engine = Arc::clone(&engine);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                (0..20)
                    .map(|_| {
                        let raw = RawTransaction::new(format!("t{i}"))
                            .amount(1_500_000.0)
                            .risk_score(8);
                        engine.assess(raw).unwrap()
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    for handle in handles {
        for reports in handle.join().unwrap() {
            let matched: Vec<_> = reports.iter().map(|r| r.matched()).collect();
            assert_eq!(matched, vec![Some(true), Some(true), Some(false)]);
        }
    }
}

#[test]
fn submit_while_assessing_sees_whole_sets() {
    let engine = engine();
    let alternate = [
        RuleSource::new("a1", "txn.riskScore > 0"),
        RuleSource::new("a2", "txn.riskScore > 100"),
    ];

    let writer = {
        let engine = Arc::clone(&engine);
        let alternate = alternate.clone();
        thread::spawn(move || {
            for i in 0..50 {
                if i % 2 == 0 {
                    engine.submit_rule_set(&alternate).unwrap();
                } else {
                    engine
                        .submit_rule_set(&[
                            RuleSource::new("big", "txn.amount >= 1000000.0"),
                            RuleSource::new("risky", "txn.riskScore >= 7"),
                            RuleSource::new("qris", "txn.type == 'QRIS'"),
                        ])
                        .unwrap();
                }
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for _ in 0..50 {
                    let reports = engine
                        .assess(RawTransaction::new("t").amount(1.0).risk_score(5))
                        .unwrap();
                    let names: Vec<&str> = reports.iter().map(|r| r.rule()).collect();
                    // Every assessment sees one complete rule set, never a mix.
                    assert!(
                        names == ["a1", "a2"] || names == ["big", "risky", "qris"],
                        "mixed rule set: {names:?}"
                    );
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }
}
