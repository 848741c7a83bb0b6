use proptest::prelude::*;
use table_check::{
    metrics::{self, MetricError, QualityScoreSet, QualityWeights},
    table::{CellValue, ExtractedTable, ParsingReport},
};

fn report(accuracy: f64, whitespace: f64) -> ParsingReport {
    ParsingReport {
        accuracy: Some(accuracy),
        whitespace: Some(whitespace),
        ..Default::default()
    }
}

fn text_rows(rows: &[&[&str]]) -> Vec<Vec<CellValue>> {
    rows.iter()
        .map(|r| r.iter().map(|c| CellValue::from(*c)).collect())
        .collect()
}

#[test]
fn one_text_value_in_numeric_column_applies_flat_penalty() {
    let mut rows = vec![vec![CellValue::from("Item"), CellValue::from("Amount")]];
    for i in 0..10 {
        let amount = if i == 4 { "n/a".to_string() } else { format!("{}", i * 10) };
        rows.push(vec![CellValue::from(format!("item {i}")), CellValue::from(amount)]);
    }
    let r = report(95.0, 10.0);
    let acc = metrics::accuracy(Some(&r), &rows).unwrap();
    assert!((acc - 0.76).abs() < 1e-9, "accuracy {acc}");
}

#[test]
fn penalty_does_not_scale_with_violation_count() {
    let rows = text_rows(&[&["Qty"], &["1"], &["2"], &["3"], &["4"], &["x"], &["y"], &["5"]]);
    assert_eq!(metrics::numeric_violations(&rows), 2);
    let acc = metrics::accuracy(Some(&report(100.0, 0.0)), &rows).unwrap();
    assert!((acc - 0.8).abs() < 1e-9);
}

#[test]
fn text_header_over_numeric_column_keeps_full_accuracy() {
    let rows = text_rows(&[&["Item", "Amount"], &["a", "10"], &["b", "20"], &["c", "30"]]);
    assert_eq!(metrics::numeric_violations(&rows), 0);
    assert_eq!(metrics::accuracy(Some(&report(100.0, 0.0)), &rows), Ok(1.0));
}

#[test]
fn accuracy_is_clamped() {
    let rows = text_rows(&[&["a"]]);
    assert_eq!(metrics::accuracy(Some(&report(140.0, 0.0)), &rows), Ok(1.0));
    assert_eq!(metrics::accuracy(Some(&report(-5.0, 0.0)), &rows), Ok(0.0));
}

#[test]
fn missing_report_is_reported_not_zeroed() {
    let rows = text_rows(&[&["a"]]);
    assert_eq!(
        metrics::accuracy(None, &rows),
        Err(MetricError::MissingParsingReport)
    );
    let partial = ParsingReport {
        whitespace: Some(20.0),
        ..Default::default()
    };
    assert_eq!(
        metrics::accuracy(Some(&partial), &rows),
        Err(MetricError::MissingField("accuracy"))
    );
}

#[test]
fn completeness_counts_null_and_whitespace_cells() {
    let rows = vec![
        vec![CellValue::from("a"), CellValue::Null],
        vec![CellValue::from("   "), CellValue::Int(3)],
    ];
    assert_eq!(metrics::completeness(&rows), Ok(0.5));
}

#[test]
fn empty_tables_have_zero_completeness_and_consistency() {
    let no_rows: Vec<Vec<CellValue>> = Vec::new();
    let no_cols: Vec<Vec<CellValue>> = vec![vec![], vec![]];
    for rows in [no_rows, no_cols] {
        assert_eq!(metrics::completeness(&rows), Err(MetricError::EmptyTable));
        assert_eq!(metrics::consistency(&rows), Err(MetricError::EmptyTable));

        let table = ExtractedTable::new(rows, Some(report(90.0, 10.0)));
        let set = QualityScoreSet::evaluate(
            &table,
            table.parsing_report.as_ref(),
            &QualityWeights::default(),
        );
        assert_eq!(set.completeness, 0.0);
        assert_eq!(set.consistency, 0.0);
        assert!(set.is_degraded());
    }
}

#[test]
fn consistency_rewards_uniform_rows_and_types() {
    let uniform = text_rows(&[&["a", "1"], &["b", "2"], &["c", "3"]]);
    assert_eq!(metrics::consistency(&uniform), Ok(1.0));

    let ragged = text_rows(&[&["a", "1"], &["b"], &["c", "3"], &["d", "4"]]);
    let score = metrics::consistency(&ragged).unwrap();
    assert!((score - (0.7 * 0.75 + 0.3)).abs() < 1e-9, "{score}");

    let mixed = vec![
        vec![CellValue::Int(1)],
        vec![CellValue::from("two")],
        vec![CellValue::Int(3)],
        vec![CellValue::Float(4.0)],
    ];
    let score = metrics::consistency(&mixed).unwrap();
    assert!((score - (0.7 + 0.3 * 0.5)).abs() < 1e-9, "{score}");
}

#[test]
fn type_check_skips_short_tables() {
    let rows = vec![
        vec![CellValue::Int(1)],
        vec![CellValue::from("two")],
    ];
    assert_eq!(metrics::consistency(&rows), Ok(1.0));
}

#[test]
fn whitespace_defaults_to_half_when_unknown() {
    assert_eq!(metrics::whitespace(Some(&report(90.0, 25.0))), Ok(0.75));
    let table = ExtractedTable::new(text_rows(&[&["a"]]), None);
    let set = QualityScoreSet::evaluate(&table, None, &QualityWeights::default());
    assert_eq!(set.whitespace, 0.5);
    assert_eq!(set.accuracy, 0.0);
    assert!(set.degraded.iter().any(|d| d.starts_with("accuracy")));
}

#[test]
fn non_finite_report_zeroes_every_field() {
    let table = ExtractedTable::new(text_rows(&[&["a", "b"]]), Some(report(f64::NAN, 10.0)));
    let set = QualityScoreSet::evaluate(
        &table,
        table.parsing_report.as_ref(),
        &QualityWeights::default(),
    );
    assert_eq!(set.confidence, 0.0);
    assert_eq!(set.completeness, 0.0);
    assert_eq!(set.whitespace, 0.0);
    assert_eq!(set.degraded.len(), 1);
}

#[test]
fn clean_table_scores_full_confidence() {
    let table = ExtractedTable::new(
        text_rows(&[&["Name", "Qty"], &["bolt", "4"], &["nut", "9"]]),
        Some(report(100.0, 0.0)),
    );
    let set = QualityScoreSet::evaluate(
        &table,
        table.parsing_report.as_ref(),
        &QualityWeights::default(),
    );
    assert!((set.confidence - 100.0).abs() < 1e-9);
    assert!(!set.is_degraded());
}

#[test]
fn default_weights_sum_to_one() {
    assert!(QualityWeights::default().is_normalized());
    let skewed = QualityWeights {
        accuracy: 0.5,
        ..QualityWeights::default()
    };
    assert!(!skewed.is_normalized());
}

fn cell_strategy() -> impl Strategy<Value = CellValue> {
    prop_oneof![
        Just(CellValue::Null),
        any::<bool>().prop_map(CellValue::Bool),
        any::<i64>().prop_map(CellValue::Int),
        (-1.0e6..1.0e6f64).prop_map(CellValue::Float),
        "[a-z0-9 .-]{0,6}".prop_map(CellValue::Text),
    ]
}

fn rows_strategy() -> impl Strategy<Value = Vec<Vec<CellValue>>> {
    prop::collection::vec(prop::collection::vec(cell_strategy(), 0..6), 0..8)
}

#[test]
fn proptest_metrics_stay_in_bounds() {
    proptest!(|(rows in rows_strategy(), acc in -50.0..150.0f64, ws in -50.0..150.0f64)| {
        let table = ExtractedTable::new(rows, Some(report(acc, ws)));
        let set = QualityScoreSet::evaluate(
            &table,
            table.parsing_report.as_ref(),
            &QualityWeights::default(),
        );
        for v in [set.accuracy, set.completeness, set.consistency, set.whitespace] {
            prop_assert!((0.0..=1.0).contains(&v), "metric out of range: {}", v);
        }
        prop_assert!((0.0..=100.0).contains(&set.confidence));
    });
}

#[test]
fn proptest_confidence_is_linear_in_metrics() {
    proptest!(|(a in 0.0..=1.0f64, c in 0.0..=1.0f64, k in 0.0..=1.0f64, w in 0.0..=1.0f64)| {
        let set = QualityScoreSet::from_metrics(&QualityWeights::default(), a, c, k, w);
        let expected = 100.0 * (0.4 * a + 0.3 * c + 0.1 * k + 0.2 * w);
        prop_assert!((set.confidence - expected).abs() < 1e-9);
    });
}
