//! End-to-end differential runs over in-memory sessions.

use mdimport::memory::{FaultPlan, MemoryDispenser, MemoryImport, MetadataModel, MethodDef, TypeDef};
use mdimport::{
    DifferentialRunner, DualLoader, EnumKind, EnumQuery, Enumerator, Flavor, HarnessError,
    PerfComparator, PerfScenario, PerfScenarioKind, RunConfig, Scenario, ScenarioOutcome, Status,
    Token, exercise_reset, table,
};

/// Types 0x02000002..=0x02000004; the middle one has two methods with one
/// parameter each.
fn three_type_model() -> MetadataModel {
    let ty = |rid| Token::from_parts(table::TYPE_DEF, rid);
    let method = |rid| Token::from_parts(table::METHOD_DEF, rid);
    let param = |rid| Token::from_parts(table::PARAM_DEF, rid);
    MetadataModel {
        types: vec![
            TypeDef::new(ty(2)),
            TypeDef::new(ty(3))
                .with_method(MethodDef::new(method(1)).with_params([param(1)]))
                .with_method(MethodDef::new(method(2)).with_params([param(2)])),
            TypeDef::new(ty(4)),
        ],
        ..MetadataModel::default()
    }
}

#[test]
fn test_three_level_walk_matches_on_both_sides() {
    let model = three_type_model();
    let baseline = MemoryImport::new(model.clone());
    let current = MemoryImport::new(model);

    let expected: Vec<Token> = [
        0x0200_0002,
        0x0200_0003,
        0x0600_0001,
        0x0800_0001,
        0x0600_0002,
        0x0800_0002,
        0x0200_0004,
    ]
    .into_iter()
    .map(Token::new)
    .collect();

    let b = Enumerator::new(&baseline).type_hierarchy().unwrap();
    let c = Enumerator::new(&current).type_hierarchy().unwrap();
    assert_eq!(b, expected);
    assert_eq!(c, expected);
}

#[test]
fn test_every_handle_closed_exactly_once() {
    let model = MetadataModel::synthetic(6, 4, 3, 2);
    let baseline = MemoryDispenser::new(Flavor::Baseline, model.clone());
    let current = MemoryDispenser::new(Flavor::Current, model);

    let summary = DifferentialRunner::new(RunConfig {
        buffer_capacity: 3,
        strict_reset: true,
        ..RunConfig::default()
    })
    .run_image("synthetic", &DualLoader::new(&baseline, &current), &[]);
    assert!(summary.is_pass(), "{summary:?}");

    for stats in [baseline.stats(), current.stats()] {
        assert!(stats.opened > 0);
        assert_eq!(stats.opened, stats.closed);
        assert_eq!(stats.double_closes, 0);
        assert_eq!(stats.unknown_handle_calls, 0);
    }
}

#[test]
fn test_failures_close_every_handle() {
    let model = MetadataModel::synthetic(3, 2, 2, 1);
    for kind in [EnumKind::TypeDefs, EnumKind::Methods, EnumKind::Params, EnumKind::Members] {
        let faults = FaultPlan {
            paging: Some((kind, Status::E_FAIL)),
            ..FaultPlan::default()
        };
        let import = MemoryImport::with_faults(model.clone(), faults);
        let driver = Enumerator::new(&import);
        for scenario in Scenario::ALL {
            let _ = scenario.run(&driver, Flavor::Current, false);
        }
        let stats = import.stats();
        assert_eq!(stats.opened, stats.closed, "{kind}");
        assert_eq!(import.open_handles(), 0);
    }
}

#[test]
fn test_zero_types_yields_empty_sequences() {
    let baseline = MemoryDispenser::new(Flavor::Baseline, MetadataModel::default());
    let current = MemoryDispenser::new(Flavor::Current, MetadataModel::default());
    let summary = DifferentialRunner::default().run_image("empty", &DualLoader::new(&baseline, &current), &[]);
    assert!(summary.is_pass());
    assert!(summary.records.iter().all(|r| r.baseline_items == Some(0)));
    // Nothing was ever enumerated beyond the empty first pages.
    assert_eq!(baseline.stats().resets, 0);
}

#[test]
fn test_reset_on_reference_model() {
    let import = MemoryImport::new(MetadataModel::synthetic(2, 3, 0, 2));
    let report = exercise_reset(&Enumerator::new(&import)).unwrap();
    assert_eq!(report.count, 5);
    assert_eq!(report.after_tail_reset, vec![*report.first.last().unwrap()]);
    assert_eq!(report.after_full_reset, report.first);
}

#[test]
fn test_member_order_divergence_detected() {
    let baseline_model = MetadataModel::synthetic(2, 2, 0, 1);
    let mut current_model = baseline_model.clone();
    current_model.types[1].methods.reverse();

    let baseline = MemoryDispenser::new(Flavor::Baseline, baseline_model);
    let current = MemoryDispenser::new(Flavor::Current, current_model);
    let config = RunConfig {
        scenarios: vec![Scenario::TypeDefs, Scenario::Members],
        ..RunConfig::default()
    };
    let summary = DifferentialRunner::new(config).run_image("img", &DualLoader::new(&baseline, &current), &[]);

    let failure = summary.first_failure().unwrap();
    assert_eq!(failure.scenario, Scenario::Members);
    let ScenarioOutcome::Failed { divergence: Some(divergence), .. } = &failure.outcome else {
        panic!("expected a divergence, got {:?}", failure.outcome);
    };
    // [t2, m1, m2, f1, t3, m3, m4, f2] vs [t2, m1, m2, f1, t3, m4, m3, f2]
    assert_eq!(divergence.index, 5);
    assert_eq!(divergence.baseline.as_deref(), Some("0x06000003"));
    assert_eq!(divergence.current.as_deref(), Some("0x06000004"));
}

#[test]
fn test_signature_length_only_vs_bytes() {
    let baseline_model = MetadataModel::synthetic(2, 0, 0, 0);
    let mut current_model = baseline_model.clone();
    let sig = current_model.signatures[1];
    // Same length, different bytes.
    current_model.blobs.insert(sig, vec![0x07, 0x01, 0x0e]);

    let baseline = MemoryDispenser::new(Flavor::Baseline, baseline_model);
    let current = MemoryDispenser::new(Flavor::Current, current_model);
    let loader = DualLoader::new(&baseline, &current);
    let sessions = loader.open(&[]).unwrap();

    let runner = DifferentialRunner::default();
    assert!(runner.run_scenario(Scenario::SigFromToken, &sessions).is_ok());
    let err = runner.run_scenario(Scenario::SignatureBlobs, &sessions).unwrap_err();
    let HarnessError::DifferentialMismatch(divergence) = err else {
        panic!("expected mismatch, got {err}");
    };
    assert_eq!(divergence.index, 1);
}

#[test]
fn test_count_skew_on_child_enumeration_fails_image() {
    let model = MetadataModel::synthetic(2, 2, 1, 0);
    let baseline = MemoryDispenser::new(Flavor::Baseline, model.clone());
    let faults = FaultPlan {
        count_skew: Some((EnumKind::Params, -1)),
        ..FaultPlan::default()
    };
    let current = MemoryDispenser::with_faults(Flavor::Current, model, faults);
    let loader = DualLoader::new(&baseline, &current);
    let sessions = loader.open(&[]).unwrap();

    let err = DifferentialRunner::default()
        .run_scenario(Scenario::TypeHierarchy, &sessions)
        .unwrap_err();
    assert!(matches!(
        err,
        HarnessError::CountMismatch { query: EnumQuery::Params(_), reported: 0, produced: 1 }
    ));
}

#[test]
fn test_member_count_skew_still_compares_equal() {
    let model = MetadataModel::synthetic(3, 2, 0, 1);
    let baseline = MemoryDispenser::new(Flavor::Baseline, model.clone());
    let faults = FaultPlan {
        count_skew: Some((EnumKind::Members, 1)),
        ..FaultPlan::default()
    };
    let current = MemoryDispenser::with_faults(Flavor::Current, model, faults);
    let loader = DualLoader::new(&baseline, &current);
    let sessions = loader.open(&[]).unwrap();

    let runner = DifferentialRunner::default();
    assert!(runner.run_scenario(Scenario::Members, &sessions).is_ok());
    drop(sessions);

    let stats = current.stats();
    assert_eq!(stats.opened, stats.closed);
}

#[test]
fn test_perf_create_import_hundred_iterations() {
    let model = MetadataModel::synthetic(4, 2, 1, 1);
    let baseline = MemoryDispenser::new(Flavor::Baseline, model.clone());
    let current = MemoryDispenser::new(Flavor::Current, model);

    let create_import = |dispenser: &MemoryDispenser| {
        let dispenser = dispenser.clone();
        move |iterations: i32| {
            for _ in 0..iterations {
                if let Err(err) = mdimport::Dispenser::open_scope(&dispenser, &[]) {
                    return err.status().unwrap_or(Status::E_FAIL);
                }
            }
            Status::OK
        }
    };
    let comparator = PerfComparator::new(vec![PerfScenario::new(
        PerfScenarioKind::CreateImport,
        create_import(&baseline),
        create_import(&current),
    )]);

    let measurements = comparator.run(100, |_| {}).unwrap();
    assert_eq!(measurements.len(), 1);
    let m = measurements[0];
    assert_eq!(m.iterations, 100);
    assert!(m.baseline_ms.is_finite() && m.baseline_ms >= 0.0);
    assert!(m.current_ms.is_finite() && m.current_ms >= 0.0);
}
