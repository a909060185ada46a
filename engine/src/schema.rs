//! Object schemas.
//!
//! A schema names the object type a repository manages, the fields it
//! requires, and the constraints each field value must satisfy. It also
//! defines value equality per field type, which decides whether a local
//! update actually changes anything.

use crate::{is_reserved_key, ObjectType, Record};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field types supported in schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Int,
    Float,
    Bool,
    /// Milliseconds since epoch
    Timestamp,
    /// Arbitrary nested JSON
    Json,
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldType::String => write!(f, "String"),
            FieldType::Int => write!(f, "Int"),
            FieldType::Float => write!(f, "Float"),
            FieldType::Bool => write!(f, "Bool"),
            FieldType::Timestamp => write!(f, "Timestamp"),
            FieldType::Json => write!(f, "Json"),
        }
    }
}

/// Definition of a field in an object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDef {
    /// Field name
    pub name: String,
    /// Field type
    pub field_type: FieldType,
    /// Whether this field is required
    pub required: bool,
    /// Strings must contain a non-whitespace character
    pub non_blank: bool,
    /// Strings must not contain line breaks or tabs
    pub single_line: bool,
}

impl FieldDef {
    /// Create a new required field definition.
    pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: true,
            non_blank: false,
            single_line: false,
        }
    }

    /// Create a new optional field definition.
    pub fn optional(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            required: false,
            ..Self::required(name, field_type)
        }
    }

    pub fn non_blank(mut self) -> Self {
        self.non_blank = true;
        self
    }

    pub fn single_line(mut self) -> Self {
        self.single_line = true;
        self
    }

    /// Check a present, non-null value against the type and constraints.
    ///
    /// Returns a description of the allowed values on failure.
    pub fn check(&self, value: &Value) -> Result<(), String> {
        let valid = match self.field_type {
            FieldType::String => value.is_string(),
            FieldType::Int => value.is_i64() || value.is_u64(),
            FieldType::Float => value.is_number(),
            FieldType::Bool => value.is_boolean(),
            FieldType::Timestamp => value.is_u64() || value.is_i64(),
            FieldType::Json => true,
        };
        if !valid {
            return Err(format!(
                "{} must be {}, got {}",
                self.name,
                self.field_type,
                json_type_name(value)
            ));
        }

        if let Value::String(s) = value {
            if self.non_blank && s.trim().is_empty() {
                return Err(format!("{} must not be blank", self.name));
            }
            if self.single_line && s.contains(['\n', '\r', '\t']) {
                return Err(format!(
                    "{} must not contain line breaks or tabs",
                    self.name
                ));
            }
        }

        Ok(())
    }

    /// Value equality for this field's type. Absent and `null` are equal.
    pub fn values_equal(&self, a: Option<&Value>, b: Option<&Value>) -> bool {
        let a = a.filter(|v| !v.is_null());
        let b = b.filter(|v| !v.is_null());
        match (a, b) {
            (None, None) => true,
            (Some(a), Some(b)) => match self.field_type {
                FieldType::Int | FieldType::Float | FieldType::Timestamp => numbers_equal(a, b),
                FieldType::String | FieldType::Bool | FieldType::Json => a == b,
            },
            _ => false,
        }
    }
}

fn numbers_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64()) {
                x == y
            } else if let (Some(x), Some(y)) = (x.as_u64(), y.as_u64()) {
                x == y
            } else {
                x.as_f64() == y.as_f64()
            }
        }
        _ => a == b,
    }
}

pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "Null",
        Value::Bool(_) => "Bool",
        Value::Number(n) if n.is_i64() || n.is_u64() => "Int",
        Value::Number(_) => "Float",
        Value::String(_) => "String",
        Value::Array(_) => "Array",
        Value::Object(_) => "Object",
    }
}

/// Schema for a single object type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectSchema {
    /// Expected `attributes.type`
    pub object_type: ObjectType,
    /// Field definitions
    pub fields: Vec<FieldDef>,
    /// Fields joined into the derived `Name` field on every local write
    pub display_name: Option<Vec<String>>,
}

/// Name of the derived display-name field.
pub const NAME: &str = "Name";

impl ObjectSchema {
    /// Create a new object schema.
    pub fn new(object_type: impl Into<ObjectType>, fields: Vec<FieldDef>) -> Self {
        Self {
            object_type: object_type.into(),
            fields,
            display_name: None,
        }
    }

    /// Derive `Name` from the given fields, joined with a space.
    pub fn with_display_name<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.display_name = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Get a field definition by name.
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Strip reserved keys from caller supplied fields. Sync flags and ids
    /// only change through repository operations.
    pub fn sanitize(&self, fields: &Map<String, Value>) -> Map<String, Value> {
        fields
            .iter()
            .filter(|(k, _)| !is_reserved_key(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Recompute the derived `Name` field, if this schema has one.
    pub fn apply_display_name(&self, fields: &mut Map<String, Value>) {
        let Some(parts) = &self.display_name else {
            return;
        };
        let name = parts
            .iter()
            .filter_map(|p| fields.get(p).and_then(Value::as_str))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        fields.insert(NAME.into(), Value::String(name));
    }

    /// Merge `incoming` into a record's fields and recompute the display
    /// name. `None` when the merged fields equal the current ones, compared
    /// per field type.
    ///
    /// The current fields get their display name recomputed too, so a write
    /// to the derived field alone, or a record stored without it, does not
    /// count as a change.
    pub fn merge_update(
        &self,
        existing: &Record,
        incoming: &Map<String, Value>,
    ) -> Option<Map<String, Value>> {
        let mut current = existing.fields.clone();
        self.apply_display_name(&mut current);

        let mut merged = current.clone();
        merged.extend(
            incoming
                .iter()
                .filter(|(k, _)| !is_reserved_key(k))
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        self.apply_display_name(&mut merged);

        let unchanged = merged
            .iter()
            .all(|(key, value)| self.value_unchanged(key, current.get(key), value));
        (!unchanged).then_some(merged)
    }

    fn value_unchanged(&self, key: &str, current: Option<&Value>, value: &Value) -> bool {
        match self.field(key) {
            Some(def) => def.values_equal(current, Some(value)),
            None => current.filter(|v| !v.is_null()) == Some(value).filter(|v| !v.is_null()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SyncFlags;
    use serde_json::json;

    fn test_schema() -> ObjectSchema {
        ObjectSchema::new(
            "Widget",
            vec![
                FieldDef::required("label", FieldType::String).non_blank(),
                FieldDef::optional("count", FieldType::Int),
                FieldDef::optional("weight", FieldType::Float),
                FieldDef::optional("meta", FieldType::Json),
            ],
        )
    }

    fn record(fields: Value) -> Record {
        Record {
            id: "w-1".into(),
            object_type: "Widget".into(),
            fields: fields.as_object().unwrap().clone(),
            flags: SyncFlags::clean(),
            local_id: None,
        }
    }

    #[test]
    fn check_type_mismatch() {
        let def = FieldDef::optional("count", FieldType::Int);
        let err = def.check(&json!("three")).unwrap_err();
        assert_eq!(err, "count must be Int, got String");
    }

    #[test]
    fn check_constraints() {
        let def = FieldDef::required("name", FieldType::String)
            .non_blank()
            .single_line();
        assert!(def.check(&json!("Ann")).is_ok());
        assert!(def.check(&json!("   ")).is_err());
        assert!(def.check(&json!("Ann\nMarie")).is_err());
        assert!(def.check(&json!("Ann\tMarie")).is_err());
    }

    #[test]
    fn json_field_accepts_any() {
        let def = FieldDef::required("data", FieldType::Json);
        assert!(def.check(&json!("string")).is_ok());
        assert!(def.check(&json!(123)).is_ok());
        assert!(def.check(&json!([1, 2, 3])).is_ok());
        assert!(def.check(&json!({"nested": "object"})).is_ok());
    }

    #[test]
    fn numeric_equality_ignores_representation() {
        let def = FieldDef::optional("weight", FieldType::Float);
        assert!(def.values_equal(Some(&json!(1)), Some(&json!(1.0))));
        assert!(!def.values_equal(Some(&json!(1)), Some(&json!(1.5))));
    }

    #[test]
    fn null_equals_absent() {
        let def = FieldDef::optional("label", FieldType::String);
        assert!(def.values_equal(None, Some(&Value::Null)));
        assert!(!def.values_equal(None, Some(&json!(""))));
    }

    #[test]
    fn noop_update_detection() {
        let schema = test_schema();
        let existing = record(json!({"label": "a", "count": 2, "meta": {"x": [1, 2]}}));

        let same = json!({"label": "a", "count": 2.0, "meta": {"x": [1, 2]}});
        assert!(schema
            .merge_update(&existing, same.as_object().unwrap())
            .is_none());

        let changed = json!({"meta": {"x": [2, 1]}});
        let merged = schema
            .merge_update(&existing, changed.as_object().unwrap())
            .unwrap();
        assert_eq!(merged["label"], "a");
        assert_eq!(merged["meta"], json!({"x": [2, 1]}));

        let undeclared = json!({"extra": null});
        assert!(schema
            .merge_update(&existing, undeclared.as_object().unwrap())
            .is_none());

        let reserved_only = json!({"__locally_deleted__": true});
        assert!(schema
            .merge_update(&existing, reserved_only.as_object().unwrap())
            .is_none());
    }

    #[test]
    fn derived_name_alone_is_not_a_change() {
        let schema = test_schema().with_display_name(["first", "last"]);
        let existing = record(json!({"label": "a", "first": "Ann", "last": "Smith", "Name": "Ann Smith"}));

        let renamed = json!({"Name": "Someone Else"});
        assert!(schema
            .merge_update(&existing, renamed.as_object().unwrap())
            .is_none());

        // A record stored without the derived field is not changed by it.
        let bare = record(json!({"label": "a", "last": "Smith"}));
        let same = json!({"last": "Smith"});
        assert!(schema.merge_update(&bare, same.as_object().unwrap()).is_none());

        let edited = json!({"first": "Annie"});
        let merged = schema
            .merge_update(&existing, edited.as_object().unwrap())
            .unwrap();
        assert_eq!(merged[NAME], "Annie Smith");
    }

    #[test]
    fn display_name_joins_present_parts() {
        let schema = test_schema().with_display_name(["first", "last"]);
        let mut fields = json!({"last": "Smith"}).as_object().unwrap().clone();
        schema.apply_display_name(&mut fields);
        assert_eq!(fields[NAME], "Smith");

        fields.insert("first".into(), json!("Ann"));
        schema.apply_display_name(&mut fields);
        assert_eq!(fields[NAME], "Ann Smith");
    }

    #[test]
    fn sanitize_drops_reserved_keys() {
        let schema = test_schema();
        let fields = json!({"Id": "x", "__local__": true, "label": "a"});
        let clean = schema.sanitize(fields.as_object().unwrap());
        assert_eq!(clean.len(), 1);
        assert_eq!(clean["label"], "a");
    }

    #[test]
    fn schema_serialization() {
        let schema = test_schema().with_display_name(["label"]);
        let json = serde_json::to_string(&schema).unwrap();
        let parsed: ObjectSchema = serde_json::from_str(&json).unwrap();
        assert_eq!(schema, parsed);
    }
}
