//! Parameter schemas for capability arguments
//!
//! Arguments arrive from the model as loosely shaped JSON. Each capability
//! declares the record it accepts; `validate` checks and normalizes the
//! record before the capability ever sees it.

use serde_json::{json, Map, Value};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("arguments must be an object")]
    NotAnObject,
    #[error("missing required field `{0}`")]
    MissingField(String),
    #[error("field `{0}` must not be empty")]
    EmptyField(String),
    #[error("field `{field}` must be {expected}")]
    WrongType { field: String, expected: FieldKind },
    #[error("field `{field}` must be one of: {allowed}")]
    NotAllowed { field: String, allowed: String },
    #[error("unknown field `{0}`")]
    UnknownField(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Number,
    Integer,
    Boolean,
    StringList,
}

impl FieldKind {
    fn json_type(self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Number => "number",
            FieldKind::Integer => "integer",
            FieldKind::Boolean => "boolean",
            FieldKind::StringList => "array",
        }
    }

    fn accepts(self, value: &Value) -> bool {
        match self {
            FieldKind::String => value.is_string(),
            FieldKind::Number => value.is_number(),
            FieldKind::Integer => value.is_i64() || value.is_u64(),
            FieldKind::Boolean => value.is_boolean(),
            FieldKind::StringList => value
                .as_array()
                .is_some_and(|items| items.iter().all(Value::is_string)),
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldKind::String => "a string",
            FieldKind::Number => "a number",
            FieldKind::Integer => "an integer",
            FieldKind::Boolean => "a boolean",
            FieldKind::StringList => "a list of strings",
        };
        f.write_str(name)
    }
}

/// One named field of an argument record
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub kind: FieldKind,
    pub description: String,
    pub required: bool,
    /// Allowed string values; empty means unrestricted
    pub allowed: Vec<String>,
    pub default: Option<Value>,
}

impl Field {
    pub fn new(name: impl Into<String>, kind: FieldKind, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            description: description.into(),
            required: false,
            allowed: Vec::new(),
            default: None,
        }
    }

    pub fn string(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, FieldKind::String, description)
    }

    pub fn integer(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Integer, description)
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn one_of(mut self, values: &[&str]) -> Self {
        self.allowed = values.iter().map(|v| (*v).to_string()).collect();
        self
    }

    #[must_use]
    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    fn check(&self, value: &Value) -> Result<(), SchemaError> {
        if !self.kind.accepts(value) {
            return Err(SchemaError::WrongType {
                field: self.name.clone(),
                expected: self.kind,
            });
        }
        if let Some(text) = value.as_str() {
            if self.required && text.trim().is_empty() {
                return Err(SchemaError::EmptyField(self.name.clone()));
            }
            if !self.allowed.is_empty() && !self.allowed.iter().any(|a| a == text) {
                return Err(SchemaError::NotAllowed {
                    field: self.name.clone(),
                    allowed: self.allowed.join(", "),
                });
            }
        }
        Ok(())
    }

    fn to_json_schema(&self) -> Value {
        let mut schema = json!({
            "type": self.kind.json_type(),
            "description": self.description,
        });
        if self.kind == FieldKind::StringList {
            schema["items"] = json!({ "type": "string" });
        }
        if !self.allowed.is_empty() {
            schema["enum"] = json!(self.allowed);
        }
        if let Some(default) = &self.default {
            schema["default"] = default.clone();
        }
        schema
    }
}

/// Schema of an argument record
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSchema {
    fields: Vec<Field>,
}

impl ParameterSchema {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn get(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Check `args` and return the normalized record with defaults filled in.
    ///
    /// `null` values are treated as absent.
    pub fn validate(&self, args: &Value) -> Result<Value, SchemaError> {
        let object = args.as_object().ok_or(SchemaError::NotAnObject)?;

        if let Some(unknown) = object.keys().find(|key| self.get(key).is_none()) {
            return Err(SchemaError::UnknownField(unknown.clone()));
        }

        let mut normalized = Map::new();
        for field in &self.fields {
            match object.get(&field.name).filter(|v| !v.is_null()) {
                Some(value) => {
                    field.check(value)?;
                    normalized.insert(field.name.clone(), value.clone());
                }
                None if field.required => {
                    return Err(SchemaError::MissingField(field.name.clone()));
                }
                None => {
                    if let Some(default) = &field.default {
                        normalized.insert(field.name.clone(), default.clone());
                    }
                }
            }
        }
        Ok(Value::Object(normalized))
    }

    /// JSON Schema object sent to the model with the tool definition
    pub fn to_json_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .fields
            .iter()
            .map(|f| (f.name.clone(), f.to_json_schema()))
            .collect();
        let required: Vec<&str> = self
            .fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name.as_str())
            .collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        })
    }
}
