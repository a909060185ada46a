//! The Contact object.

use crate::error::{CoerceError, Result};
use crate::{FieldDef, FieldType, ObjectSchema, Record};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const OBJECT_TYPE: &str = "Contact";
pub const SOUP_NAME: &str = "contacts";
pub const SYNC_DOWN_NAME: &str = "syncDownContacts";
pub const SYNC_UP_NAME: &str = "syncUpContacts";

pub const FIRST_NAME: &str = "FirstName";
pub const LAST_NAME: &str = "LastName";
pub const TITLE: &str = "Title";
pub const DEPARTMENT: &str = "Department";

/// Schema for Contact records.
pub fn schema() -> ObjectSchema {
    ObjectSchema::new(
        OBJECT_TYPE,
        vec![
            FieldDef::optional(FIRST_NAME, FieldType::String).single_line(),
            FieldDef::required(LAST_NAME, FieldType::String)
                .non_blank()
                .single_line(),
            FieldDef::optional(TITLE, FieldType::String).single_line(),
            FieldDef::optional(DEPARTMENT, FieldType::String).single_line(),
        ],
    )
    .with_display_name([FIRST_NAME, LAST_NAME])
}

/// Typed view of a Contact record's fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub first_name: Option<String>,
    pub last_name: String,
    pub title: Option<String>,
    pub department: Option<String>,
}

impl Contact {
    pub fn new(last_name: impl Into<String>) -> Self {
        Self {
            first_name: None,
            last_name: last_name.into(),
            title: None,
            department: None,
        }
    }

    pub fn with_first_name(mut self, first_name: impl Into<String>) -> Self {
        self.first_name = Some(first_name.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_department(mut self, department: impl Into<String>) -> Self {
        self.department = Some(department.into());
        self
    }

    /// `"First Last"`, or just the last name.
    pub fn full_name(&self) -> String {
        match self.first_name.as_deref().map(str::trim) {
            Some(first) if !first.is_empty() => format!("{first} {}", self.last_name.trim()),
            _ => self.last_name.trim().to_string(),
        }
    }

    /// Field map suitable for `locally_create` / `locally_update`.
    ///
    /// Unset optional fields are written as `null` so an update clears them.
    pub fn to_fields(&self) -> Map<String, Value> {
        let opt = |v: &Option<String>| v.clone().map_or(Value::Null, Value::String);
        let mut fields = Map::new();
        fields.insert(FIRST_NAME.into(), opt(&self.first_name));
        fields.insert(LAST_NAME.into(), Value::String(self.last_name.clone()));
        fields.insert(TITLE.into(), opt(&self.title));
        fields.insert(DEPARTMENT.into(), opt(&self.department));
        fields
    }

    /// Read a Contact out of a record that has already passed coercion.
    pub fn from_record(record: &Record) -> Result<Self> {
        if record.object_type != OBJECT_TYPE {
            return Err(CoerceError::IncorrectObjectType {
                expected: OBJECT_TYPE.into(),
                found: record.object_type.clone(),
                payload: record.to_payload().to_string(),
            });
        }
        let last_name = record
            .str_field(LAST_NAME)
            .ok_or_else(|| CoerceError::MissingRequiredProperties {
                keys: vec![LAST_NAME.into()],
                payload: record.to_payload().to_string(),
            })?;
        let text = |key: &str| record.str_field(key).map(str::to_string);

        Ok(Self {
            first_name: text(FIRST_NAME),
            last_name: last_name.to_string(),
            title: text(TITLE),
            department: text(DEPARTMENT),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{schema::NAME, LocalStatus};
    use serde_json::json;

    #[test]
    fn full_name_formats() {
        assert_eq!(Contact::new("Smith").full_name(), "Smith");
        assert_eq!(
            Contact::new("Smith").with_first_name("Ann").full_name(),
            "Ann Smith"
        );
        assert_eq!(
            Contact::new("Smith").with_first_name("  ").full_name(),
            "Smith"
        );
    }

    #[test]
    fn schema_rejects_tabs_in_first_name() {
        let payload = json!({
            "Id": "003",
            "attributes": {"type": "Contact"},
            "LastName": "Smith",
            "FirstName": "Ann\t"
        });
        let err = schema().coerce(&payload).unwrap_err();
        assert!(matches!(
            err,
            CoerceError::InvalidPropertyValue { ref key, .. } if key == FIRST_NAME
        ));
    }

    #[test]
    fn record_roundtrip() {
        let contact = Contact::new("Smith")
            .with_first_name("Ann")
            .with_title("CTO")
            .with_department("Engineering");

        let mut fields = contact.to_fields();
        schema().apply_display_name(&mut fields);
        assert_eq!(fields[NAME], "Ann Smith");

        let mut payload = fields.clone();
        payload.insert("Id".into(), json!("003A"));
        payload.insert("attributes".into(), json!({"type": "Contact"}));
        let record = schema().coerce(&Value::Object(payload)).unwrap();

        assert_eq!(record.local_status(), LocalStatus::MatchesUpstream);
        assert_eq!(Contact::from_record(&record).unwrap(), contact);
    }

    #[test]
    fn to_fields_nulls_unset_options() {
        let fields = Contact::new("Smith").to_fields();
        assert_eq!(fields[TITLE], Value::Null);
        assert_eq!(fields[LAST_NAME], "Smith");
    }
}
