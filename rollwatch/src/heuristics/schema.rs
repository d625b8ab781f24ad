//! Declarative parameter schemas.
//!
//! Session parameters arrive as an untyped JSON map; each heuristic kind
//! declares the fields it accepts and their primitive types, and bootstrap
//! rejects anything that does not match with a `Config` error.

use crate::errors::{Error, Result};
use alloy_primitives::Address;
use serde_json::{Map, Value};
use std::str::FromStr;

/// Primitive type of one schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// A hex-encoded 20-byte address.
    Address,
    /// A number (integer or float accepted).
    Number,
    /// A non-empty array of strings.
    StringList,
}

impl FieldType {
    fn check(self, name: &str, value: &Value) -> Result<()> {
        let ok = match self {
            Self::Address => value
                .as_str()
                .is_some_and(|s| Address::from_str(s).is_ok()),
            Self::Number => value.as_f64().is_some(),
            Self::StringList => value
                .as_array()
                .is_some_and(|a| !a.is_empty() && a.iter().all(Value::is_string)),
        };
        if ok {
            Ok(())
        } else {
            Err(Error::config(format!(
                "parameter '{name}' must be a {self:?}, got {value}"
            )))
        }
    }
}

/// One declared field.
#[derive(Debug, Clone, Copy)]
pub struct Field {
    /// Field name in the params map.
    pub name: &'static str,
    /// Expected primitive type.
    pub ty: FieldType,
    /// Whether bootstrap fails when the field is absent.
    pub required: bool,
}

impl Field {
    /// A field that must be present.
    #[must_use]
    pub const fn required(name: &'static str, ty: FieldType) -> Self {
        Self {
            name,
            ty,
            required: true,
        }
    }

    /// A field that may be omitted.
    #[must_use]
    pub const fn optional(name: &'static str, ty: FieldType) -> Self {
        Self {
            name,
            ty,
            required: false,
        }
    }
}

/// The full schema of one heuristic kind's parameters.
#[derive(Debug, Clone)]
pub struct ParamSchema {
    fields: Vec<Field>,
}

impl ParamSchema {
    /// Builds a schema from its fields.
    #[must_use]
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    /// The declared fields.
    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Validates a params map: required fields present, all present fields
    /// well-typed, and no fields outside the schema.
    pub fn validate(&self, params: &Map<String, Value>) -> Result<()> {
        for field in &self.fields {
            match params.get(field.name) {
                Some(value) => field.ty.check(field.name, value)?,
                None if field.required => {
                    return Err(Error::config(format!(
                        "missing required parameter '{}'",
                        field.name
                    )))
                }
                None => {}
            }
        }
        for key in params.keys() {
            if !self.fields.iter().any(|f| f.name == key) {
                return Err(Error::config(format!("unknown parameter '{key}'")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> ParamSchema {
        ParamSchema::new(vec![
            Field::required("address", FieldType::Address),
            Field::optional("lower", FieldType::Number),
            Field::optional("upper", FieldType::Number),
        ])
    }

    fn params(entries: &[(&str, Value)]) -> Map<String, Value> {
        entries
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_valid_params_pass() {
        let p = params(&[
            ("address", json!("0x00000000000000000000000000000000000000aa")),
            ("lower", json!(3)),
        ]);
        assert!(schema().validate(&p).is_ok());
    }

    #[test]
    fn test_missing_required_field() {
        let p = params(&[("lower", json!(3))]);
        let err = schema().validate(&p).unwrap_err();
        assert!(err.to_string().contains("address"));
    }

    #[test]
    fn test_bad_address_rejected() {
        let p = params(&[("address", json!("0x1234"))]);
        assert!(schema().validate(&p).is_err());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let p = params(&[
            ("address", json!("0x00000000000000000000000000000000000000aa")),
            ("surprise", json!(true)),
        ]);
        let err = schema().validate(&p).unwrap_err();
        assert!(err.to_string().contains("surprise"));
    }

    #[test]
    fn test_float_bound_accepted() {
        let p = params(&[
            ("address", json!("0x00000000000000000000000000000000000000aa")),
            ("lower", json!(2.5)),
        ]);
        assert!(schema().validate(&p).is_ok());
    }

    #[test]
    fn test_string_list_must_be_non_empty() {
        let schema = ParamSchema::new(vec![Field::required("signatures", FieldType::StringList)]);
        assert!(schema.validate(&params(&[("signatures", json!([]))])).is_err());
        assert!(schema
            .validate(&params(&[("signatures", json!(["Transfer(address)"]))]))
            .is_ok());
    }
}
