//! Coercion of raw store or network payloads into [`Record`]s.
//!
//! Coercion is strict: a missing or wrongly typed required field is an
//! error, never a silently defaulted value.

use crate::error::{CoerceError, Result};
use crate::record::{ATTRIBUTES, ID, LOCAL_ID, TYPE};
use crate::{is_reserved_key, ObjectSchema, Record, SyncFlags};
use serde_json::{Map, Value};

impl ObjectSchema {
    /// Coerce a payload into a record of this schema's object type.
    ///
    /// Checks run in order: object shape, `attributes.type`, required keys
    /// (all missing keys reported together), id, then field values.
    pub fn coerce(&self, payload: &Value) -> Result<Record> {
        let Some(obj) = payload.as_object() else {
            let mut keys = vec![ATTRIBUTES.to_string(), ID.to_string()];
            keys.extend(self.required_keys().map(str::to_string));
            return Err(CoerceError::MissingRequiredProperties {
                keys,
                payload: payload.to_string(),
            });
        };

        self.require_object_type(obj, payload)?;

        let missing: Vec<String> = std::iter::once(ID)
            .chain(self.required_keys())
            .filter(|key| obj.get(*key).map_or(true, Value::is_null))
            .map(str::to_string)
            .collect();
        if !missing.is_empty() {
            return Err(CoerceError::MissingRequiredProperties {
                keys: missing,
                payload: payload.to_string(),
            });
        }

        let id = match obj.get(ID) {
            Some(Value::String(id)) if !id.trim().is_empty() => id.clone(),
            _ => {
                return Err(CoerceError::InvalidPropertyValue {
                    key: ID.into(),
                    allowed: format!("{ID} must be a non-blank string"),
                    payload: payload.to_string(),
                })
            }
        };

        for def in &self.fields {
            if let Some(value) = obj.get(&def.name).filter(|v| !v.is_null()) {
                def.check(value)
                    .map_err(|allowed| CoerceError::InvalidPropertyValue {
                        key: def.name.clone(),
                        allowed,
                        payload: payload.to_string(),
                    })?;
            }
        }

        let fields: Map<String, Value> = obj
            .iter()
            .filter(|(k, _)| !is_reserved_key(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let local_id = obj
            .get(LOCAL_ID)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        Ok(Record {
            id,
            object_type: self.object_type.clone(),
            fields,
            flags: SyncFlags::read(obj),
            local_id,
        })
    }

    fn required_keys(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name.as_str())
    }

    fn require_object_type(&self, obj: &Map<String, Value>, payload: &Value) -> Result<()> {
        let attributes = obj
            .get(ATTRIBUTES)
            .and_then(Value::as_object)
            .ok_or_else(|| CoerceError::MissingRequiredProperties {
                keys: vec![ATTRIBUTES.into()],
                payload: payload.to_string(),
            })?;

        let found = attributes
            .get(TYPE)
            .and_then(Value::as_str)
            .unwrap_or_default();
        if found != self.object_type {
            return Err(CoerceError::IncorrectObjectType {
                expected: self.object_type.clone(),
                found: found.to_string(),
                payload: payload.to_string(),
            });
        }
        Ok(())
    }
}
