//! Edge case tests for tether-engine
//!
//! These tests cover boundary conditions and unusual payloads.

use serde_json::{json, Value};
use tether_engine::{
    contact, CoerceError, FieldDef, FieldType, LocalStatus, ObjectSchema, RecordSnapshot,
};

fn create_test_schema() -> ObjectSchema {
    ObjectSchema::new(
        "Item",
        vec![
            FieldDef::required("name", FieldType::String),
            FieldDef::optional("count", FieldType::Int),
            FieldDef::optional("data", FieldType::Json),
        ],
    )
}

fn item(id: &str, fields: Value) -> Value {
    let mut payload = fields.as_object().cloned().unwrap_or_default();
    payload.insert("Id".into(), json!(id));
    payload.insert("attributes".into(), json!({"type": "Item"}));
    Value::Object(payload)
}

// ============================================================================
// String Edge Cases
// ============================================================================

#[test]
fn empty_string_fields() {
    let record = create_test_schema()
        .coerce(&item("item1", json!({"name": ""})))
        .unwrap();
    assert_eq!(record.fields["name"], "");
}

#[test]
fn unicode_strings() {
    let schema = create_test_schema();
    let unicode_names = vec![
        "日本語テスト",
        "Привет мир",
        "مرحبا بالعالم",
        "🎉🚀💯",
        "Ω≈ç√∫",
        "Hello\nWorld\tTab",
        "Null\0Test",
    ];

    for (i, name) in unicode_names.iter().enumerate() {
        let record = schema
            .coerce(&item(&format!("item_{}", i), json!({"name": name})))
            .unwrap_or_else(|e| panic!("Failed for {}: {}", name, e));
        assert_eq!(record.fields["name"], *name);
    }
}

#[test]
fn unicode_search() {
    let schema = create_test_schema();
    let snapshot = RecordSnapshot::from_records([
        schema.coerce(&item("a", json!({"name": "Ärger"}))).unwrap(),
        schema.coerce(&item("b", json!({"name": "plain"}))).unwrap(),
    ]);
    let hits = snapshot.search("ärg");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, "a");
}

#[test]
fn very_long_strings() {
    let long_string = "x".repeat(1024 * 1024);
    let record = create_test_schema()
        .coerce(&item("item1", json!({"name": long_string})))
        .unwrap();
    assert_eq!(record.fields["name"].as_str().unwrap().len(), 1024 * 1024);
}

#[test]
fn multiline_last_name_rejected_for_contacts() {
    let payload = json!({
        "Id": "003",
        "attributes": {"type": "Contact"},
        "LastName": "Smith\r\nJones"
    });
    let err = contact::schema().coerce(&payload).unwrap_err();
    assert!(matches!(
        err,
        CoerceError::InvalidPropertyValue { ref key, .. } if key == "LastName"
    ));
}

// ============================================================================
// Numeric Edge Cases
// ============================================================================

#[test]
fn integer_boundaries() {
    let schema = create_test_schema();
    let values = vec![i64::MIN, i64::MAX, 0i64, -1i64, 1i64];

    for (i, value) in values.iter().enumerate() {
        let record = schema
            .coerce(&item(&format!("item_{}", i), json!({"name": "test", "count": value})))
            .unwrap();
        assert_eq!(record.fields["count"], *value);
    }
}

#[test]
fn u64_max_is_an_int() {
    let record = create_test_schema()
        .coerce(&item("item1", json!({"name": "test", "count": u64::MAX})))
        .unwrap();
    assert_eq!(record.fields["count"], u64::MAX);
}

#[test]
fn float_is_not_an_int() {
    let err = create_test_schema()
        .coerce(&item("item1", json!({"name": "test", "count": 1.5})))
        .unwrap_err();
    assert!(matches!(
        err,
        CoerceError::InvalidPropertyValue { ref key, .. } if key == "count"
    ));
}

// ============================================================================
// JSON Edge Cases
// ============================================================================

#[test]
fn deeply_nested_json() {
    let mut nested = json!({"value": "leaf"});
    for _ in 0..50 {
        nested = json!({"nested": nested});
    }

    let record = create_test_schema()
        .coerce(&item("item1", json!({"name": "test", "data": nested.clone()})))
        .unwrap();
    assert_eq!(record.fields["data"], nested);
}

#[test]
fn json_with_all_types() {
    let complex_json = json!({
        "string": "hello",
        "number": 42,
        "float": 3.14159,
        "bool_true": true,
        "bool_false": false,
        "null": null,
        "array": [1, 2, 3, "mixed", true, null],
        "object": {"a": 1, "b": "two"},
        "empty_array": [],
        "empty_object": {},
    });

    let record = create_test_schema()
        .coerce(&item("item1", json!({"name": "test", "data": complex_json.clone()})))
        .unwrap();
    assert_eq!(record.fields["data"], complex_json);
}

#[test]
fn null_optional_fields_are_kept_as_null() {
    let record = create_test_schema()
        .coerce(&item("item1", json!({"name": "test", "count": null})))
        .unwrap();
    assert_eq!(record.fields["count"], Value::Null);
    assert_eq!(record.field("count"), None);
}

#[test]
fn undeclared_fields_are_preserved() {
    let record = create_test_schema()
        .coerce(&item("item1", json!({"name": "test", "LastModifiedDate": "2024-01-01"})))
        .unwrap();
    assert_eq!(record.fields["LastModifiedDate"], "2024-01-01");
}

// ============================================================================
// Flag Edge Cases
// ============================================================================

#[test]
fn stale_local_flag_is_ignored() {
    // __local__ claims a pending change but no individual flag is set.
    let mut payload = item("item1", json!({"name": "test"}));
    payload["__local__"] = json!(true);

    let record = create_test_schema().coerce(&payload).unwrap();
    assert_eq!(record.local_status(), LocalStatus::MatchesUpstream);
    assert!(!record.is_local());
    assert_eq!(record.to_payload()["__local__"], false);
}

#[test]
fn string_flags_are_read() {
    let mut payload = item("item1", json!({"name": "test"}));
    payload["__locally_deleted__"] = json!("TRUE");

    let record = create_test_schema().coerce(&payload).unwrap();
    assert_eq!(record.local_status(), LocalStatus::LocallyDeleted);
}
