//! Canonicalizer guarantees on hand-written ground-truth records, including
//! records shaped like those written by older extraction tooling.

use credit_gt::{
    CanonicalRecord, CanonicalSchema, Canonicalizer, GroundTruthRecord, MissingFieldPolicy,
    SchemaError,
};
use serde_json::{json, Value};

fn gt(value: Value) -> GroundTruthRecord {
    GroundTruthRecord::from_value(value).unwrap()
}

fn canon(value: Value) -> CanonicalRecord {
    Canonicalizer::default().canonicalize(&gt(value)).unwrap()
}

fn canon_with_spans(value: Value) -> CanonicalRecord {
    Canonicalizer::default()
        .include_spans(true)
        .canonicalize(&gt(value))
        .unwrap()
}

fn assert_before(record: &CanonicalRecord, a: &str, b: &str) {
    let (pa, pb) = (record.position(a), record.position(b));
    assert!(
        pa.is_some() && pb.is_some() && pa < pb,
        "expected {a} before {b} in {:?}",
        record.keys().collect::<Vec<_>>()
    );
}

/// Every key at every depth.
fn all_keys(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                out.push(k.clone());
                all_keys(v, out);
            }
        }
        Value::Array(items) => items.iter().for_each(|v| all_keys(v, out)),
        _ => {}
    }
}

/// A record in the legacy nested shape with layout at several depths.
fn legacy_record() -> Value {
    json!({
        "rec": {
            "pdf_file": "summary_0412.pdf",
            "all_lines_obj": [{"text": "Credit Score"}],
            "age": 52,
            "age_page": 0,
            "age_bbox": [40.0, 60.0, 90.0, 72.0],
            "credit_score": {"value": 640, "color": "red", "_page": 0},
            "revolving_accounts_open": {"amount": 2200, "count": 4, "_bbox": [1, 2, 3, 4]},
            "installment_accounts_open": {"count": 1, "total": 18000},
            "inquiries_last_6_months": 3,
            "inquiries_last_6_months_spans": [{"text": "3"}],
            "collections": {"open": 1, "closed": 0},
            "late_pays": {"last_over_2_years": 2, "last_2_years": 1, "_spans": []},
            "credit_card_open_totals": {"balance": 900, "limit": 3000, "Percent": 30, "Payment": 45},
            "credit_factors": [
                {"factor": "High utilisation", "hex": "#c62828", "_page": 0, "_bbox": [1, 2, 3, 4], "canonical_key": "util"},
                {"factor": "Long history", "color": "Green", "page": 0, "bbox": [1, 2, 3, 4]},
                {"factor": "", "color": "red"},
                {"factor": "Recent late", "_spans": [{"text": "Recent late", "style": {"color": [200, 20, 20]}}]}
            ],
            "candidate_scores": [{"factor": "High utilisation", "score": 5}]
        }
    })
}

// ── The reference scenario ───────────────────────────────────────────────────

#[test]
fn test_reference_scenario_exact_output() {
    let record = canon(json!({
        "inquiries_6mo": 1,
        "line_of_credit_accounts_open": {"count": 3, "total": 9000}
    }));
    let expected = json!({
        "inquiries_lt6mo": 1,
        "line_of_credit_accounts_open_count": 3,
        "line_of_credit_accounts_open_total": 9000,
        "late_pays_lt2yr": 0,
        "late_pays_gt2yr": 0
    });
    assert_eq!(record.to_value(), expected);
    assert_eq!(
        record.keys().collect::<Vec<_>>(),
        [
            "inquiries_lt6mo",
            "line_of_credit_accounts_open_count",
            "line_of_credit_accounts_open_total",
            "late_pays_lt2yr",
            "late_pays_gt2yr"
        ]
    );
}

// ── Idempotence ──────────────────────────────────────────────────────────────

#[test]
fn test_idempotent_on_legacy_record() {
    let first = canon(legacy_record());
    let second = Canonicalizer::default()
        .canonicalize(&first.to_ground_truth())
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(
        first.keys().collect::<Vec<_>>(),
        second.keys().collect::<Vec<_>>()
    );
}

#[test]
fn test_idempotent_on_already_flat_record() {
    let flat = json!({
        "age": 30,
        "revolving_open_count": 1,
        "revolving_open_total": 50,
        "late_pays_lt2yr": 0,
        "late_pays_gt2yr": 0,
        "credit_factors": [{"factor": "Short history", "color": "black"}]
    });
    assert_eq!(canon(flat.clone()).to_value(), flat);
}

// ── Ordering ─────────────────────────────────────────────────────────────────

#[test]
fn test_count_before_total_for_every_category() {
    let record = canon(json!({
        "revolving_open_total": 1,
        "revolving_open_count": 1,
        "installment_open_total": 1,
        "installment_open_count": 1,
        "real_estate_open_total": 1,
        "real_estate_open_count": 1,
        "line_of_credit_accounts_open_total": 1,
        "line_of_credit_accounts_open_count": 1,
        "miscellaneous_accounts_open": {"total": 5, "count": 2}
    }));
    for prefix in [
        "revolving_open",
        "installment_open",
        "real_estate_open",
        "line_of_credit_accounts_open",
        "miscellaneous_accounts_open",
    ] {
        assert_before(&record, &format!("{prefix}_count"), &format!("{prefix}_total"));
    }
}

/// Every `<p>_open_count` present precedes its `<p>_open_total`.
fn assert_counts_before_totals(record: &CanonicalRecord) {
    let keys: Vec<&str> = record.keys().collect();
    for count in keys.iter().filter(|k| k.ends_with("_open_count")) {
        let total = format!("{}_open_total", &count[..count.len() - "_open_count".len()]);
        if record.contains_key(&total) {
            assert_before(record, count, &total);
        }
    }
}

#[test]
fn test_count_before_total_outside_schema_tables() {
    let record = canon(json!({
        "student_loans_open_total": 500,
        "age": 41,
        "student_loans_open_count": 2,
        "medical_open": {"total": 80, "count": 1},
        "auto_open": {"total": 12000, "_page": 0, "count": 1},
        "revolving_open_total": 9,
        "revolving_open_count": 1,
        "legacy": {"store_cards_open_total": 300, "store_cards_open_count": 3}
    }));
    for prefix in ["student_loans", "medical", "auto", "revolving", "legacy_store_cards"] {
        assert_before(
            &record,
            &format!("{prefix}_open_count"),
            &format!("{prefix}_open_total"),
        );
    }
    assert_counts_before_totals(&record);
    // keys outside any pair keep their source position
    assert_eq!(record.position("age"), Some(2));
}

#[test]
fn test_count_before_total_survives_recanonicalisation() {
    let first = canon(json!({
        "boat_open": {"total": 1, "count": 1},
        "plane_open_total": 2,
        "plane_open_count": 2
    }));
    let second = Canonicalizer::default()
        .canonicalize(&first.to_ground_truth())
        .unwrap();
    assert_counts_before_totals(&second);
    assert_eq!(
        first.keys().collect::<Vec<_>>(),
        second.keys().collect::<Vec<_>>()
    );
}

#[test]
fn test_late_pays_lt_before_gt() {
    let record = canon(json!({"late_pays_gt2yr": 3, "age": 40, "late_pays_lt2yr": 1}));
    assert_before(&record, "late_pays_lt2yr", "late_pays_gt2yr");
    // moving a key leaves the others where they were
    assert_eq!(
        record.keys().collect::<Vec<_>>(),
        ["late_pays_lt2yr", "late_pays_gt2yr", "age"]
    );
}

#[test]
fn test_legacy_record_ordering() {
    let record = canon(legacy_record());
    assert_before(&record, "revolving_open_count", "revolving_open_total");
    assert_before(&record, "installment_open_count", "installment_open_total");
    assert_before(&record, "late_pays_lt2yr", "late_pays_gt2yr");
}

// ── Defaults ─────────────────────────────────────────────────────────────────

#[test]
fn test_defaults_filled_when_absent() {
    let record = canon(json!({"age": 30}));
    assert_eq!(record.get("late_pays_lt2yr"), Some(&json!(0)));
    assert_eq!(record.get("late_pays_gt2yr"), Some(&json!(0)));
}

#[test]
fn test_defaults_never_override() {
    let record = canon(json!({"late_pays_lt2yr": 4, "late_pays_gt2yr": 2}));
    assert_eq!(record.get("late_pays_lt2yr"), Some(&json!(4)));
    assert_eq!(record.get("late_pays_gt2yr"), Some(&json!(2)));
}

// ── Aliases ──────────────────────────────────────────────────────────────────

#[test]
fn test_no_alias_key_survives() {
    for alias in ["inquiries_last_6_months", "inquiries_6mo"] {
        let mut input = serde_json::Map::new();
        input.insert(alias.to_string(), json!(7));
        let record = canon(Value::Object(input));
        assert_eq!(record.get("inquiries_lt6mo"), Some(&json!(7)));
        assert!(!record.contains_key(alias));
    }
    let record = canon(json!({"collections_open_count": 2, "collections_closed_count": 5}));
    assert_eq!(record.get("collections_open"), Some(&json!(2)));
    assert_eq!(record.get("collections_closed"), Some(&json!(5)));
    assert!(!record.contains_key("collections_open_count"));
    assert!(!record.contains_key("collections_closed_count"));
}

// ── Transient stripping ──────────────────────────────────────────────────────

#[test]
fn test_no_layout_keys_anywhere_without_spans() {
    let record = canon(legacy_record());
    let mut keys = Vec::new();
    all_keys(&record.to_value(), &mut keys);
    for k in &keys {
        assert!(
            !k.starts_with('_') && !k.ends_with("_page") && !k.ends_with("_bbox") && !k.ends_with("_spans"),
            "layout key {k} survived"
        );
        assert!(!["pdf_file", "all_lines_obj", "candidate_scores", "rec"].contains(&k.as_str()));
        assert!(!["page", "bbox", "spans", "canonical_key"].contains(&k.as_str()));
    }
}

#[test]
fn test_no_layout_keys_inside_arbitrary_lists() {
    let input = json!({
        "accounts": [
            {"name": "Card A", "_bbox": [1, 2, 3, 4], "_page": 0},
            {"name": "Card B", "history": [{"month": 1, "_spans": [], "status_page": 1}]}
        ],
        "notes": [[{"text": "n", "_page": 2}], "plain"],
        "extra": {"rows": [{"v": 1, "_bbox": [0, 0, 1, 1]}]},
        "inquiries_6mo": [{"count": 1, "_page": 0}],
        "late_pays": {"last_2_years": [{"n": 1, "_spans": []}]}
    });
    let record = canon(input.clone());
    let mut keys = Vec::new();
    all_keys(&record.to_value(), &mut keys);
    for k in &keys {
        assert!(
            !k.ends_with("_page") && !k.ends_with("_bbox") && !k.ends_with("_spans"),
            "layout key {k} survived in {keys:?}"
        );
    }
    assert_eq!(
        record.get("accounts"),
        Some(&json!([
            {"name": "Card A"},
            {"name": "Card B", "history": [{"month": 1}]}
        ]))
    );
    assert_eq!(record.get("notes"), Some(&json!([[{"text": "n"}], "plain"])));
    assert_eq!(record.get("extra_rows"), Some(&json!([{"v": 1}])));

    // nothing left to strip the second time round
    let again = Canonicalizer::default()
        .canonicalize(&record.to_ground_truth())
        .unwrap();
    assert_eq!(again, record);

    // kept verbatim with spans
    let kept = canon_with_spans(input.clone());
    assert_eq!(kept.get("accounts"), input.get("accounts"));
}

#[test]
fn test_layout_keys_preserved_with_spans() {
    let record = canon_with_spans(legacy_record());
    assert_eq!(record.get("age_page"), Some(&json!(0)));
    assert!(record.contains_key("age_bbox"));
    assert_eq!(record.get("credit_score_page"), Some(&json!(0)));
    assert_eq!(record.get("revolving_accounts_open_bbox"), Some(&json!([1, 2, 3, 4])));
    assert_eq!(record.get("late_pays_spans"), Some(&json!([])));
    assert_eq!(record.get("inquiries_lt6mo_spans"), Some(&json!([{"text": "3"}])));

    let factors = record.credit_factors("credit_factors");
    assert_eq!(factors[0].layout.get("canonical_key"), Some(&json!("util")));
    assert_eq!(factors[1].layout.get("bbox"), Some(&json!([1, 2, 3, 4])));
    // still transient even with spans
    assert!(!record.contains_key("candidate_scores"));
    assert!(!record.contains_key("pdf_file"));
}

// ── Flattening ───────────────────────────────────────────────────────────────

#[test]
fn test_legacy_record_flattened_values() {
    let v = canon(legacy_record()).to_value();
    assert_eq!(v["age"], json!(52));
    assert_eq!(v["credit_score"], json!(640));
    assert_eq!(v["credit_score_color"], json!("red"));
    assert_eq!(v["revolving_open_count"], json!(4));
    assert_eq!(v["revolving_open_total"], json!(2200));
    assert_eq!(v["installment_open_total"], json!(18000));
    assert_eq!(v["inquiries_lt6mo"], json!(3));
    assert_eq!(v["collections_open"], json!(1));
    assert_eq!(v["late_pays_lt2yr"], json!(1));
    assert_eq!(v["late_pays_gt2yr"], json!(2));
    assert_eq!(v["credit_card_open_totals_percent"], json!(30));
    assert_eq!(v["credit_card_open_totals_payment"], json!(45));
    for (k, value) in v.as_object().unwrap() {
        if k != "credit_factors" {
            assert!(!value.is_object(), "{k} is still nested");
        }
    }
}

#[test]
fn test_factor_simplification_without_spans() {
    let record = canon(legacy_record());
    assert_eq!(
        record.get("credit_factors"),
        Some(&json!([
            {"factor": "High utilisation", "color": "red", "hex": "#c62828"},
            {"factor": "Long history", "color": "green"},
            {"factor": "Recent late"}
        ]))
    );
}

#[test]
fn test_factor_colour_from_spans_only_when_kept() {
    let record = canon_with_spans(legacy_record());
    let factors = record.credit_factors("credit_factors");
    let late = factors.iter().find(|f| f.factor == "Recent late").unwrap();
    assert_eq!(late.color.as_deref(), Some("red"));
    assert!(late.hex.is_none());
}

// ── Errors ───────────────────────────────────────────────────────────────────

#[test]
fn test_wrong_shape_is_reported() {
    let err = Canonicalizer::default()
        .canonicalize(&gt(json!({"collections": [1, 2]})))
        .unwrap_err();
    assert!(matches!(
        err,
        SchemaError::UnexpectedShape { ref field, expected: "an object", found: "an array" } if field == "collections"
    ));
    assert!(err.to_string().contains("collections"));
}

#[test]
fn test_required_fields_from_custom_schema() {
    let schema = CanonicalSchema::from_json_str(
        r#"{
            "version": 2,
            "aliases": [{"canonical": "score", "aliases": ["fico"]}],
            "required": ["score", "age"]
        }"#,
    )
    .unwrap();

    let ok = Canonicalizer::new(schema.clone())
        .canonicalize(&gt(json!({"fico": 700, "age": 30})))
        .unwrap();
    assert_eq!(ok.to_value(), json!({"score": 700, "age": 30}));

    let err = Canonicalizer::new(schema.clone())
        .canonicalize(&gt(json!({"fico": 700})))
        .unwrap_err();
    assert!(matches!(err, SchemaError::MissingRequiredField { ref field } if field == "age"));

    let nulled = Canonicalizer::new(schema)
        .missing_required(MissingFieldPolicy::Null)
        .canonicalize(&gt(json!({"fico": 700})))
        .unwrap();
    assert_eq!(nulled.get("age"), Some(&Value::Null));
}
