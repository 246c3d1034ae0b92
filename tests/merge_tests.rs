//! Merge, conflict resolution and QC behaviour

use ndarray::{ArrayD, IxDyn};
use wbts_data::{
    dataset::{AttributeBag, Coordinate, Dataset, QcFlag, Variable},
    errors::WbtsError,
    merge::{
        apply_rules,
        conflict::{resolve, Candidate, Resolved, Sample},
        merge_datasets, remove_flagged, AxisPolicy, DimensionRule, MergeOptions, QcCheck, QcRule,
        Resolution,
    },
};

fn axis(name: &str, values: &[f64]) -> Coordinate {
    Coordinate::new(name, values.to_vec(), AttributeBag::new()).expect("valid axis")
}

fn series(dim: &str, values: &[f64], units: &str) -> Variable {
    let data = ArrayD::from_shape_vec(IxDyn(&[values.len()]), values.to_vec())
        .expect("1-D shape");
    Variable::numeric(vec![dim.to_string()], data)
        .expect("valid variable")
        .with_attribute("units", units)
}

fn profile(depths: &[f64], temps: &[f64]) -> Dataset {
    Dataset::new()
        .with_coordinate(axis("DEPTH", depths))
        .expect("coordinate")
        .with_variable("TEMP", series("DEPTH", temps, "degree_C"))
        .expect("variable")
}

fn values(ds: &Dataset, name: &str) -> Vec<f64> {
    ds.variable(name)
        .and_then(Variable::values)
        .expect("numeric variable")
        .iter()
        .copied()
        .collect()
}

fn flags(ds: &Dataset, name: &str) -> Vec<QcFlag> {
    ds.variable(name).expect("variable").flags().iter().copied().collect()
}

fn same_bits(a: &[f64], b: &[f64]) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b)
            .all(|(x, y)| (x.is_nan() && y.is_nan()) || x.to_bits() == y.to_bits())
}

/// Structural equality where NaN samples compare equal
fn same_dataset(a: &Dataset, b: &Dataset) -> bool {
    if a.coordinates() != b.coordinates() || a.attrs() != b.attrs() {
        return false;
    }
    if a.variable_names() != b.variable_names() {
        return false;
    }
    a.variables().all(|(name, va)| {
        let Some(vb) = b.variable(name) else {
            return false;
        };
        let data_equal = match (va.values(), vb.values()) {
            (Some(x), Some(y)) => {
                let x: Vec<f64> = x.iter().copied().collect();
                let y: Vec<f64> = y.iter().copied().collect();
                same_bits(&x, &y)
            }
            (None, None) => va.data() == vb.data(),
            _ => false,
        };
        data_equal && va.flags() == vb.flags() && va.attrs() == vb.attrs() && va.dims() == vb.dims()
    })
}

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}

#[test]
fn test_depth_union_merge_example() {
    let a = profile(&[0.0, 10.0, 20.0], &[5.0, 4.0, 3.0]);
    let b = profile(&[0.0, 10.0, 30.0], &[5.1, 4.2, 2.0]);

    let output = merge_datasets(&[a, b], &MergeOptions::default()).expect("merge succeeds");
    let merged = &output.dataset;

    assert_eq!(
        merged.coordinate("DEPTH").expect("DEPTH axis").values(),
        &[0.0, 10.0, 20.0, 30.0]
    );

    let temp = values(merged, "TEMP");
    assert_close(temp[0], 5.05);
    assert_close(temp[1], 4.1);
    assert_eq!(temp[2], 3.0);
    assert_eq!(temp[3], 2.0);
    assert_eq!(flags(merged, "TEMP"), vec![QcFlag::Good; 4]);

    let report = &output.report;
    assert_eq!(report.conflicts.len(), 2);
    assert_eq!(report.conflicts[0].coordinate, "DEPTH=0");
    assert_eq!(report.conflicts[1].coordinate, "DEPTH=10");
    assert!(report
        .conflicts
        .iter()
        .all(|c| c.variable == "TEMP" && c.resolution == Resolution::Averaged));
    assert_eq!(report.conflicts_resolved_by(Resolution::Averaged), 2);
    assert_eq!(report.totals.good, 4);
}

#[test]
fn test_merge_is_commutative_without_conflicts() {
    let a = profile(&[0.0, 10.0, 20.0], &[5.0, 4.0, 3.0])
        .with_attribute("title", "cast A");
    let b = profile(&[20.0, 30.0, 40.0], &[3.0, 2.5, 2.0])
        .with_variable("PSAL", series("DEPTH", &[35.1, 35.0, 34.9], "1e-3"))
        .expect("variable")
        .with_attribute("title", "cast B");

    let options = MergeOptions::default();
    let ab = merge_datasets(&[a.clone(), b.clone()], &options).expect("merge a, b");
    let ba = merge_datasets(&[b, a], &options).expect("merge b, a");

    assert!(ab.report.conflicts.is_empty());
    assert!(same_dataset(&ab.dataset, &ba.dataset));
    assert_eq!(ab.dataset.attrs().get_str("title"), Some("cast A"));
    assert_eq!(ab.report.attribute_disagreements.len(), 1);
}

#[test]
fn test_priority_breaks_ties_regardless_of_order() {
    let a = profile(&[0.0], &[5.0]);
    let b = profile(&[0.0], &[6.0]);

    let mut options = MergeOptions::default();
    options.priorities = vec![0, 5];
    let forward = merge_datasets(&[a.clone(), b.clone()], &options).expect("merge");

    options.priorities = vec![5, 0];
    let backward = merge_datasets(&[b, a], &options).expect("merge");

    assert_eq!(values(&forward.dataset, "TEMP"), vec![6.0]);
    assert_eq!(values(&backward.dataset, "TEMP"), vec![6.0]);
    assert_eq!(forward.report.conflicts[0].resolution, Resolution::Priority);
    assert_eq!(backward.report.conflicts[0].resolution, Resolution::Priority);
}

#[test]
fn test_better_flag_wins_before_priority() {
    let a = profile(&[0.0, 10.0], &[5.0, 4.0]);
    let mut questionable = series("DEPTH", &[9.0, 4.0], "degree_C");
    questionable
        .override_flag(&[0], QcFlag::Questionable)
        .expect("index in bounds");
    let b = Dataset::new()
        .with_coordinate(axis("DEPTH", &[0.0, 10.0]))
        .expect("coordinate")
        .with_variable("TEMP", questionable)
        .expect("variable");

    let mut options = MergeOptions::default();
    options.priorities = vec![0, 10];
    let output = merge_datasets(&[a, b], &options).expect("merge");

    assert_eq!(values(&output.dataset, "TEMP"), vec![5.0, 4.0]);
    assert_eq!(output.report.conflicts.len(), 1);
    assert_eq!(output.report.conflicts[0].resolution, Resolution::Flag);
}

#[test]
fn test_missing_samples_never_override_present_ones() {
    let a = profile(&[0.0, 10.0], &[5.0, f64::NAN]);
    let b = profile(&[0.0, 10.0], &[f64::NAN, 4.0]);

    let output = merge_datasets(&[a, b], &MergeOptions::default()).expect("merge");
    assert_eq!(values(&output.dataset, "TEMP"), vec![5.0, 4.0]);
    assert!(output.report.conflicts.is_empty());
}

#[test]
fn test_tied_text_samples_are_a_conflict_error() {
    let text = |value: &str| {
        Variable::text(
            vec!["DEPTH".to_string()],
            ArrayD::from_shape_vec(IxDyn(&[1]), vec![value.to_string()]).expect("shape"),
        )
        .expect("variable")
    };
    let a = profile(&[0.0], &[5.0])
        .with_variable("GC_STRING", text("GC_2001_04"))
        .expect("variable");
    let b = profile(&[0.0], &[5.0])
        .with_variable("GC_STRING", text("GC_2002_05"))
        .expect("variable");

    match merge_datasets(&[a, b], &MergeOptions::default()) {
        Err(WbtsError::Conflict {
            variable,
            coordinate,
        }) => {
            assert_eq!(variable, "GC_STRING");
            assert_eq!(coordinate, "DEPTH=0");
        }
        other => panic!("expected a conflict error, got {other:?}"),
    }
}

#[test]
fn test_units_mismatch_is_a_schema_error() {
    let a = profile(&[0.0], &[5.0]);
    let b = Dataset::new()
        .with_coordinate(axis("DEPTH", &[0.0]))
        .expect("coordinate")
        .with_variable("TEMP", series("DEPTH", &[278.0], "K"))
        .expect("variable");

    let err = merge_datasets(&[a, b], &MergeOptions::default()).unwrap_err();
    assert!(matches!(err, WbtsError::Schema { ref variable, .. } if variable == "TEMP"));
}

#[test]
fn test_tolerance_snaps_to_cluster_minimum() {
    let a = profile(&[0.0, 10.0], &[5.0, 4.0]);
    let b = profile(&[0.4, 10.3, 20.0], &[5.0, 4.0, 3.0]);
    let options =
        MergeOptions::default().with_dimension("DEPTH", DimensionRule::new(AxisPolicy::Union, 0.5));

    let ab = merge_datasets(&[a.clone(), b.clone()], &options).expect("merge");
    let ba = merge_datasets(&[b, a], &options).expect("merge");

    assert_eq!(
        ab.dataset.coordinate("DEPTH").expect("axis").values(),
        &[0.0, 10.0, 20.0]
    );
    assert!(ab.report.conflicts.is_empty());
    assert!(same_dataset(&ab.dataset, &ba.dataset));
}

#[test]
fn test_tolerance_collapsing_one_input_is_an_alignment_error() {
    let a = profile(&[0.0, 0.3, 10.0], &[5.0, 4.9, 4.0]);
    let options =
        MergeOptions::default().with_dimension("DEPTH", DimensionRule::new(AxisPolicy::Union, 0.5));

    let err = merge_datasets(&[a], &options).unwrap_err();
    assert!(matches!(err, WbtsError::Alignment { ref dimension, .. } if dimension == "DEPTH"));
}

#[test]
fn test_intersection_policy() {
    let a = profile(&[0.0, 10.0, 20.0], &[5.0, 4.0, 3.0]);
    let b = profile(&[10.0, 20.0, 30.0], &[4.0, 3.0, 2.0]);
    let options = MergeOptions::default()
        .with_dimension("DEPTH", DimensionRule::new(AxisPolicy::Intersection, 0.0));

    let output = merge_datasets(&[a, b], &options).expect("merge");
    assert_eq!(
        output.dataset.coordinate("DEPTH").expect("axis").values(),
        &[10.0, 20.0]
    );
    assert_eq!(values(&output.dataset, "TEMP"), vec![4.0, 3.0]);

    let disjoint_a = profile(&[0.0, 10.0], &[5.0, 4.0]);
    let disjoint_b = profile(&[20.0, 30.0], &[3.0, 2.0]);
    let err = merge_datasets(&[disjoint_a, disjoint_b], &options).unwrap_err();
    assert!(matches!(err, WbtsError::Alignment { .. }));
}

#[test]
fn test_nearest_policy_uses_first_axis_and_drops_out_of_range() {
    let a = profile(&[0.0, 10.0, 20.0], &[5.0, 4.0, 3.0]);
    let b = Dataset::new()
        .with_coordinate(axis("DEPTH", &[0.2, 10.1, 50.0]))
        .expect("coordinate")
        .with_variable("PSAL", series("DEPTH", &[36.0, 35.5, 35.0], "1e-3"))
        .expect("variable");
    let options = MergeOptions::default()
        .with_dimension("DEPTH", DimensionRule::new(AxisPolicy::Nearest, 0.5));

    let output = merge_datasets(&[a, b], &options).expect("merge");
    assert_eq!(
        output.dataset.coordinate("DEPTH").expect("axis").values(),
        &[0.0, 10.0, 20.0]
    );
    let psal = values(&output.dataset, "PSAL");
    assert_eq!(&psal[..2], &[36.0, 35.5]);
    assert!(psal[2].is_nan());
    assert_eq!(flags(&output.dataset, "PSAL")[2], QcFlag::Missing);

    let far = profile(&[100.0, 200.0], &[1.0, 1.0]);
    let reference = profile(&[0.0, 10.0], &[5.0, 4.0]);
    let err = merge_datasets(&[reference, far], &options).unwrap_err();
    assert!(matches!(err, WbtsError::Alignment { .. }));
}

#[test]
fn test_coordinate_units_must_agree() {
    let mut metres = AttributeBag::new();
    metres.insert("units", "m");
    let mut dbar = AttributeBag::new();
    dbar.insert("units", "dbar");

    let a = Dataset::new()
        .with_coordinate(Coordinate::new("DEPTH", vec![0.0], metres).expect("axis"))
        .expect("coordinate");
    let b = Dataset::new()
        .with_coordinate(Coordinate::new("DEPTH", vec![0.0], dbar).expect("axis"))
        .expect("coordinate");

    let err = merge_datasets(&[a, b], &MergeOptions::default()).unwrap_err();
    assert!(matches!(err, WbtsError::Alignment { .. }));
}

#[test]
fn test_empty_input_list_is_rejected() {
    assert!(merge_datasets(&[], &MergeOptions::default()).is_err());
}

#[test]
fn test_range_rule_flags_bad() {
    let ds = profile(&[0.0, 10.0, 20.0, 30.0], &[5.0, 15.0, -1.0, f64::NAN]);
    let rules = vec![QcRule::new(QcCheck::Range { min: 0.0, max: 10.0 }).for_variables(&["TEMP"])];

    let (checked, hits) = apply_rules(&ds, &rules, false).expect("non-strict QC");
    assert_eq!(
        flags(&checked, "TEMP"),
        vec![QcFlag::Good, QcFlag::Bad, QcFlag::Bad, QcFlag::Missing]
    );
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].rule, "range");
    assert_eq!(hits[0].samples, 2);

    // Data is never touched by rules
    assert!(same_bits(&values(&checked, "TEMP"), &values(&ds, "TEMP")));
}

#[test]
fn test_flags_only_escalate() {
    let mut temp = series("DEPTH", &[0.0, 1.0, 100.0, 101.0], "degree_C");
    temp.override_flag(&[2], QcFlag::Bad).expect("in bounds");
    let ds = Dataset::new()
        .with_coordinate(axis("DEPTH", &[0.0, 10.0, 20.0, 30.0]))
        .expect("coordinate")
        .with_variable("TEMP", temp)
        .expect("variable");

    let rules = vec![
        QcRule::new(QcCheck::RateOfChange {
            dimension: "DEPTH".to_string(),
            max_rate: 1.0,
        }),
        QcRule::new(QcCheck::Range {
            min: -10.0,
            max: 1000.0,
        }),
    ];
    let before = flags(&ds, "TEMP");
    let (checked, hits) = apply_rules(&ds, &rules, false).expect("QC");
    let after = flags(&checked, "TEMP");

    assert!(before.iter().zip(&after).all(|(b, a)| a >= b));
    // The jump 1 -> 100 is rejected but the sample was already bad
    assert_eq!(after[2], QcFlag::Bad);
    assert_eq!(hits[0].samples, 1);
    assert_eq!(hits[0].escalated, 0);
}

#[test]
fn test_rate_of_change_compares_with_preceding_sample_only() {
    let ds = Dataset::new()
        .with_coordinate(axis("DEPTH", &[0.0, 10.0, 20.0, 30.0]))
        .expect("coordinate")
        .with_variable(
            "TEMP",
            series("DEPTH", &[0.0, f64::NAN, 50.0, 51.0], "degree_C"),
        )
        .expect("variable");
    let rules = vec![QcRule::new(QcCheck::RateOfChange {
        dimension: "DEPTH".to_string(),
        max_rate: 1.0,
    })];

    let (checked, hits) = apply_rules(&ds, &rules, false).expect("QC");
    // 50 follows a missing sample, so nothing is compared against 0
    assert_eq!(
        flags(&checked, "TEMP"),
        vec![QcFlag::Good, QcFlag::Missing, QcFlag::Good, QcFlag::Good]
    );
    assert!(hits.is_empty());
}

#[test]
fn test_spike_and_non_finite_rules() {
    let ds = profile(
        &[0.0, 10.0, 20.0, 30.0, 40.0, 50.0],
        &[1.0, 1.0, 10.0, 1.0, 1.0, f64::INFINITY],
    );
    let rules = vec![
        QcRule::new(QcCheck::Spike {
            dimension: "DEPTH".to_string(),
            threshold: 2.0,
        }),
        QcRule::new(QcCheck::NonFinite),
    ];

    let (checked, _) = apply_rules(&ds, &rules, false).expect("QC");
    assert_eq!(
        flags(&checked, "TEMP"),
        vec![
            QcFlag::Good,
            QcFlag::Good,
            QcFlag::Bad,
            QcFlag::Good,
            QcFlag::Good,
            QcFlag::Missing
        ]
    );
}

#[test]
fn test_strict_mode_fails_on_first_violation() {
    let ds = profile(&[0.0, 10.0, 20.0], &[5.0, 50.0, 60.0]);
    let options = MergeOptions {
        qc_rules: vec![QcRule::new(QcCheck::Range { min: 0.0, max: 40.0 })],
        strict: true,
        ..MergeOptions::default()
    };

    match merge_datasets(&[ds], &options) {
        Err(WbtsError::Qc {
            rule,
            variable,
            index,
            coordinate,
        }) => {
            assert_eq!(rule, "range");
            assert_eq!(variable, "TEMP");
            assert_eq!(index, vec![1]);
            assert_eq!(coordinate, "DEPTH=10");
        }
        other => panic!("expected a QC error, got {other:?}"),
    }
}

#[test]
fn test_remove_flagged_is_explicit() {
    let ds = profile(&[0.0, 10.0, 20.0], &[5.0, 50.0, 6.0]);
    let rules = vec![QcRule::new(QcCheck::Range { min: 0.0, max: 40.0 })];
    let (checked, _) = apply_rules(&ds, &rules, false).expect("QC");

    let (cleaned, removed) = remove_flagged(&checked, QcFlag::Bad).expect("removal");
    assert_eq!(removed, 1);
    let temp = values(&cleaned, "TEMP");
    assert_eq!(temp[0], 5.0);
    assert!(temp[1].is_nan());
    assert_eq!(flags(&cleaned, "TEMP")[1], QcFlag::Missing);

    let options = MergeOptions {
        qc_rules: rules,
        remove_threshold: Some(QcFlag::Bad),
        ..MergeOptions::default()
    };
    let output = merge_datasets(&[ds], &options).expect("merge");
    assert_eq!(output.report.removed_samples, 1);
    assert_eq!(output.report.totals.missing, 1);
}

#[test]
fn test_report_serializes_to_json() {
    let a = profile(&[0.0, 10.0], &[5.0, 4.0]);
    let b = profile(&[0.0], &[5.2]);
    let output = merge_datasets(&[a, b], &MergeOptions::default()).expect("merge");

    let json: serde_json::Value =
        serde_json::from_str(&output.report.to_json().expect("serializes")).expect("valid JSON");
    assert_eq!(json["inputs"], 2);
    assert_eq!(json["conflicts"][0]["resolution"], "averaged");
    assert_eq!(json["variables"]["TEMP"]["good"], 2);
    assert_eq!(json["conflicts"][0]["candidates"][1]["flag"], "good");
}

#[test]
fn test_extent_attributes_are_stamped() {
    let a = profile(&[5.0, 10.0], &[5.0, 4.0]);
    let output = merge_datasets(&[a], &MergeOptions::default()).expect("merge");
    let attrs = output.dataset.attrs();
    assert_eq!(
        attrs.get("geospatial_vertical_min").and_then(|v| v.as_f64()),
        Some(5.0)
    );
    assert_eq!(
        attrs.get("geospatial_vertical_max").and_then(|v| v.as_f64()),
        Some(10.0)
    );
}

fn candidate(input: usize, value: Sample<'_>, flag: QcFlag) -> Candidate<'_> {
    Candidate {
        input,
        priority: 0,
        value,
        flag,
    }
}

#[test]
fn test_resolve_cell_candidates() {
    let cruise = String::from("GC_2001_04");
    let same_cruise = cruise.clone();
    // Equal text from separate buffers agrees without a record
    let agreed = resolve(
        "GC_STRING",
        "DATETIME=0",
        &[
            candidate(0, Sample::Text(&cruise), QcFlag::Good),
            candidate(1, Sample::Text(&same_cruise), QcFlag::Good),
        ],
    )
    .expect("identical text resolves");
    assert_eq!(agreed.value, Some(Resolved::Text("GC_2001_04".to_string())));
    assert!(agreed.record.is_none());

    // Differing text is settled by the better flag
    let other = String::from("GC_2001_05");
    let by_flag = resolve(
        "GC_STRING",
        "DATETIME=0",
        &[
            candidate(0, Sample::Text(&other), QcFlag::Questionable),
            candidate(1, Sample::Text(&cruise), QcFlag::Good),
        ],
    )
    .expect("flag settles text");
    assert_eq!(by_flag.value, Some(Resolved::Text("GC_2001_04".to_string())));
    assert_eq!(
        by_flag.record.map(|r| r.resolution),
        Some(Resolution::Flag)
    );

    // Only missing candidates leave the cell missing
    let empty = resolve(
        "TEMP",
        "DEPTH=0",
        &[candidate(0, Sample::Number(f64::NAN), QcFlag::Missing)],
    )
    .expect("missing cell");
    assert_eq!(empty.value, None);
    assert_eq!(empty.flag, QcFlag::Missing);
}
