//! End-to-end projection scenarios: one ViewDefinition, one resource, and
//! the exact rows that must come out.

use serde_json::{Value, json};
use tabula_sql_on_fhir::{FhirResource, ParseOptions, Row, ViewDefinition};

fn view(definition: Value) -> ViewDefinition {
    ViewDefinition::from_json(definition, ParseOptions::default()).unwrap()
}

fn resource(document: Value) -> FhirResource {
    FhirResource::from_json(document).unwrap()
}

fn condition_flat() -> ViewDefinition {
    view(json!({
        "resourceType": "ViewDefinition",
        "name": "condition_flat",
        "resource": "Condition",
        "select": [
            {
                "column": [
                    {"name": "id", "path": "getResourceKey()"},
                    {"name": "patient_id", "path": "subject.getReferenceKey(Patient)"},
                    {"name": "encounter_id", "path": "encounter.getReferenceKey(Encounter)"},
                    {"name": "onset_datetime", "path": "onset.ofType(dateTime)", "type": "dateTime"}
                ]
            },
            {
                "forEach": "code.coding",
                "column": [
                    {"name": "code_code", "path": "code"},
                    {"name": "code_sys", "path": "system"},
                    {"name": "code_display", "path": "display"}
                ]
            },
            {
                "forEach": "category.coding",
                "column": [{"name": "category", "path": "code"}]
            },
            {
                "forEach": "clinicalStatus.coding",
                "column": [{"name": "clinical_status", "path": "code"}]
            },
            {
                "forEachOrNull": "verificationStatus.coding",
                "column": [{"name": "verification_status", "path": "code"}]
            }
        ]
    }))
}

fn base_condition() -> Value {
    json!({
        "resourceType": "Condition",
        "id": "c1",
        "subject": {"reference": "Patient/p1"},
        "onsetDateTime": "2020-01-01",
        "code": {"coding": [{"system": "s1", "code": "A", "display": "dA"}]},
        "clinicalStatus": {"coding": [{"code": "active"}]},
        "verificationStatus": {"coding": []},
        "category": [{"coding": [{"code": "c"}]}]
    })
}

fn text(row: &Row, column: &str) -> Option<String> {
    row.get(column)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

#[test]
fn scalar_projection_produces_one_complete_row() {
    let view = condition_flat();
    let rows = view.apply(&resource(base_condition())).unwrap();

    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(text(row, "id").as_deref(), Some("c1"));
    assert_eq!(text(row, "patient_id").as_deref(), Some("p1"));
    assert_eq!(row.get("encounter_id"), None);
    assert_eq!(text(row, "onset_datetime").as_deref(), Some("2020-01-01"));
    assert_eq!(text(row, "code_code").as_deref(), Some("A"));
    assert_eq!(text(row, "code_sys").as_deref(), Some("s1"));
    assert_eq!(text(row, "code_display").as_deref(), Some("dA"));
    assert_eq!(text(row, "category").as_deref(), Some("c"));
    assert_eq!(text(row, "clinical_status").as_deref(), Some("active"));
    // empty coding under forEachOrNull: present row, null cell
    assert_eq!(row.get("verification_status"), None);
}

#[test]
fn sibling_iterators_multiply_rows() {
    let mut condition = base_condition();
    condition["code"]["coding"] = json!([{"code": "A"}, {"code": "B"}]);
    condition["category"] = json!([{"coding": [{"code": "x"}, {"code": "y"}]}]);

    let rows = condition_flat().apply(&resource(condition)).unwrap();
    assert_eq!(rows.len(), 4);

    let pairs: Vec<(String, String)> = rows
        .iter()
        .map(|row| {
            (
                text(row, "code_code").unwrap(),
                text(row, "category").unwrap(),
            )
        })
        .collect();
    for expected in [("A", "x"), ("A", "y"), ("B", "x"), ("B", "y")] {
        assert!(
            pairs.contains(&(expected.0.to_string(), expected.1.to_string())),
            "missing combination {:?} in {:?}",
            expected,
            pairs
        );
    }
    // earlier iterators vary slowest
    assert_eq!(pairs[0], ("A".to_string(), "x".to_string()));
    assert_eq!(pairs[3], ("B".to_string(), "y".to_string()));
}

#[test]
fn for_each_over_nothing_drops_all_rows() {
    let mut condition = base_condition();
    condition["code"]["coding"] = json!([]);

    let rows = condition_flat().apply(&resource(condition)).unwrap();
    assert!(rows.is_empty());
}

#[test]
fn for_each_or_null_over_nothing_keeps_one_null_row() {
    let simple = view(json!({
        "resourceType": "ViewDefinition",
        "name": "names",
        "resource": "Patient",
        "select": [
            {"column": [{"name": "id", "path": "id"}]},
            {
                "forEachOrNull": "name",
                "column": [
                    {"name": "family", "path": "family"},
                    {"name": "given", "path": "given.first()"}
                ]
            }
        ]
    }));

    let rows = simple
        .apply(&resource(json!({"resourceType": "Patient", "id": "p1"})))
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(text(&rows[0], "id").as_deref(), Some("p1"));
    assert_eq!(rows[0].get("family"), None);
    assert_eq!(rows[0].get("given"), None);
}

#[test]
fn constants_substitute_into_paths() {
    let thresholds = view(json!({
        "resourceType": "ViewDefinition",
        "name": "high_values",
        "resource": "Observation",
        "constant": [{"name": "threshold", "valueInteger": 5}],
        "select": [{
            "column": [{"name": "high", "path": "value.where($this > %threshold)"}]
        }]
    }));

    let above = thresholds
        .apply(&resource(
            json!({"resourceType": "Observation", "valueInteger": 7}),
        ))
        .unwrap();
    assert_eq!(above[0].get("high").unwrap(), 7);

    let below = thresholds
        .apply(&resource(
            json!({"resourceType": "Observation", "valueInteger": 3}),
        ))
        .unwrap();
    assert_eq!(below[0].get("high"), None);
}

#[test]
fn of_type_selects_the_matching_choice_variant() {
    let mut condition = base_condition();
    let as_period = condition.as_object_mut().unwrap();
    as_period.remove("onsetDateTime");
    as_period.insert("onsetPeriod".to_string(), json!({"start": "2020"}));

    let rows = condition_flat().apply(&resource(condition)).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("onset_datetime"), None);

    let mut condition = base_condition();
    condition["onsetDateTime"] = json!("2020-05-01");
    let rows = condition_flat().apply(&resource(condition)).unwrap();
    assert_eq!(text(&rows[0], "onset_datetime").as_deref(), Some("2020-05-01"));
}

#[test]
fn union_all_appends_rows_in_branch_order() {
    let unioned = view(json!({
        "resourceType": "ViewDefinition",
        "name": "all_codes",
        "resource": "Condition",
        "select": [{
            "unionAll": [
                {
                    "forEach": "code.coding",
                    "column": [
                        {"name": "code", "path": "code"},
                        {"name": "source", "path": "'code'"}
                    ]
                },
                {
                    "forEach": "category.coding",
                    "column": [
                        {"name": "code", "path": "code"},
                        {"name": "source", "path": "'category'"}
                    ]
                }
            ]
        }]
    }));

    let mut condition = base_condition();
    condition["code"]["coding"] = json!([{"code": "A"}, {"code": "B"}]);
    condition["category"] = json!([{"coding": [{"code": "x"}, {"code": "y"}]}]);

    let rows = unioned.apply(&resource(condition)).unwrap();
    let emitted: Vec<(String, String)> = rows
        .iter()
        .map(|row| (text(row, "code").unwrap(), text(row, "source").unwrap()))
        .collect();
    assert_eq!(
        emitted,
        vec![
            ("A".to_string(), "code".to_string()),
            ("B".to_string(), "code".to_string()),
            ("x".to_string(), "category".to_string()),
            ("y".to_string(), "category".to_string()),
        ]
    );
}

#[test]
fn union_all_branches_with_different_column_orders_fail_validation() {
    let result = ViewDefinition::from_json(
        json!({
            "resourceType": "ViewDefinition",
            "name": "bad_union",
            "resource": "Condition",
            "select": [{
                "unionAll": [
                    {"column": [
                        {"name": "a", "path": "id"},
                        {"name": "b", "path": "id"}
                    ]},
                    {"column": [
                        {"name": "b", "path": "id"},
                        {"name": "a", "path": "id"}
                    ]}
                ]
            }]
        }),
        ParseOptions::default(),
    );
    assert!(matches!(
        result,
        Err(tabula_sql_on_fhir::SofError::InvalidViewDefinition(_))
    ));
}

#[test]
fn rows_are_deterministic_and_schema_shaped() {
    let view = condition_flat();
    let condition = resource(base_condition());

    let first = view.apply(&condition).unwrap();
    let second = view.apply(&condition).unwrap();

    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(&second) {
        assert_eq!(a.values(), b.values());
        assert_eq!(a.values().len(), view.schema().len());
    }
}

#[test]
fn where_clauses_gate_resources() {
    let gated = view(json!({
        "resourceType": "ViewDefinition",
        "name": "active_only",
        "resource": "Condition",
        "where": [{"path": "clinicalStatus.coding.exists()"}],
        "select": [{"column": [{"name": "id", "path": "id"}]}]
    }));
    let ungated = view(json!({
        "resourceType": "ViewDefinition",
        "name": "everything",
        "resource": "Condition",
        "select": [{"column": [{"name": "id", "path": "id"}]}]
    }));

    let matching = resource(base_condition());
    assert_eq!(gated.apply(&matching).unwrap().len(), 1);
    // a passing where is the same as no where at all
    assert_eq!(
        gated.apply(&matching).unwrap()[0].values(),
        ungated.apply(&matching).unwrap()[0].values()
    );

    let non_matching = resource(json!({"resourceType": "Condition", "id": "c2"}));
    assert!(gated.apply(&non_matching).unwrap().is_empty());
    assert_eq!(ungated.apply(&non_matching).unwrap().len(), 1);
}

#[test]
fn other_resource_types_contribute_no_rows() {
    let rows = condition_flat()
        .apply(&resource(json!({"resourceType": "Patient", "id": "p1"})))
        .unwrap();
    assert!(rows.is_empty());
}

#[test]
fn collection_columns_keep_the_whole_sequence() {
    let names = view(json!({
        "resourceType": "ViewDefinition",
        "name": "patient_names",
        "resource": "Patient",
        "select": [{
            "column": [
                {"name": "id", "path": "id"},
                {"name": "given", "path": "name.given", "collection": true}
            ]
        }]
    }));

    let rows = names
        .apply(&resource(json!({
            "resourceType": "Patient",
            "id": "p1",
            "name": [
                {"given": ["Peter", "James"]},
                {"given": ["Jim"]}
            ]
        })))
        .unwrap();
    assert_eq!(rows[0].get("given").unwrap(), &json!(["Peter", "James", "Jim"]));

    // without the flag, a multi-valued path quietly keeps its first element
    let scalar = view(json!({
        "resourceType": "ViewDefinition",
        "name": "patient_first_given",
        "resource": "Patient",
        "select": [{"column": [{"name": "given", "path": "name.given"}]}]
    }));
    let rows = scalar
        .apply(&resource(json!({
            "resourceType": "Patient",
            "name": [{"given": ["Peter", "James"]}]
        })))
        .unwrap();
    assert_eq!(rows[0].get("given").unwrap(), "Peter");
}

#[test]
fn nested_selects_append_columns_in_parent_context() {
    let nested = view(json!({
        "resourceType": "ViewDefinition",
        "name": "nested",
        "resource": "Patient",
        "select": [{
            "forEach": "name",
            "column": [{"name": "family", "path": "family"}],
            "select": [{
                "forEach": "given",
                "column": [{"name": "given", "path": "$this"}]
            }]
        }]
    }));

    let rows = nested
        .apply(&resource(json!({
            "resourceType": "Patient",
            "name": [
                {"family": "Chalmers", "given": ["Peter", "James"]},
                {"family": "Windsor", "given": ["Pete"]}
            ]
        })))
        .unwrap();

    let emitted: Vec<(String, String)> = rows
        .iter()
        .map(|row| (text(row, "family").unwrap(), text(row, "given").unwrap()))
        .collect();
    assert_eq!(
        emitted,
        vec![
            ("Chalmers".to_string(), "Peter".to_string()),
            ("Chalmers".to_string(), "James".to_string()),
            ("Windsor".to_string(), "Pete".to_string()),
        ]
    );
}
