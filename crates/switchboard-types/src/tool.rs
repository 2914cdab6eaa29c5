//! Tool invocation envelope, responses and parameter shapes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::auth::{ApiKeyId, Permission};
use crate::error::ToolError;

/// An inbound tool invocation: `{toolName, params, callerKeyId}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    pub tool_name: String,
    #[serde(default)]
    pub params: Value,
    pub caller_key_id: ApiKeyId,
}

/// The outbound result: `{result}` or `{errorCode, errorMessage, detail?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolResponse {
    Ok {
        result: Value,
    },
    #[serde(rename_all = "camelCase")]
    Err {
        error_code: String,
        error_message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<Value>,
    },
}

impl ToolResponse {
    pub fn from_result(result: Result<Value, ToolError>) -> Self {
        match result {
            Ok(result) => ToolResponse::Ok { result },
            Err(err) => ToolResponse::Err {
                error_code: err.code().to_string(),
                error_message: err.to_string(),
                detail: err.detail(),
            },
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, ToolResponse::Ok { .. })
    }
}

/// A single field that failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Expected JSON type of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    /// RFC 3339 timestamp carried as a string.
    Timestamp,
}

impl ParamKind {
    fn accepts(&self, value: &Value) -> bool {
        match self {
            ParamKind::String => value.is_string(),
            ParamKind::Integer => value.is_i64() || value.is_u64(),
            ParamKind::Number => value.is_number(),
            ParamKind::Boolean => value.is_boolean(),
            ParamKind::Array => value.is_array(),
            ParamKind::Object => value.is_object(),
            ParamKind::Timestamp => value
                .as_str()
                .is_some_and(|s| chrono::DateTime::parse_from_rfc3339(s).is_ok()),
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            ParamKind::String => "a string",
            ParamKind::Integer => "an integer",
            ParamKind::Number => "a number",
            ParamKind::Boolean => "a boolean",
            ParamKind::Array => "an array",
            ParamKind::Object => "an object",
            ParamKind::Timestamp => "an RFC 3339 timestamp",
        }
    }

    fn schema_type(&self) -> &'static str {
        match self {
            ParamKind::String | ParamKind::Timestamp => "string",
            ParamKind::Integer => "integer",
            ParamKind::Number => "number",
            ParamKind::Boolean => "boolean",
            ParamKind::Array => "array",
            ParamKind::Object => "object",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamField {
    pub name: String,
    pub kind: ParamKind,
    pub required: bool,
    pub description: String,
}

/// Declared parameter shape of a tool.
///
/// Unknown fields are rejected so typos surface to the caller instead of
/// being silently ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParamSpec {
    pub fields: Vec<ParamField>,
}

impl ParamSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(mut self, name: &str, kind: ParamKind, description: &str) -> Self {
        self.fields.push(ParamField {
            name: name.to_string(),
            kind,
            required: true,
            description: description.to_string(),
        });
        self
    }

    pub fn optional(mut self, name: &str, kind: ParamKind, description: &str) -> Self {
        self.fields.push(ParamField {
            name: name.to_string(),
            kind,
            required: false,
            description: description.to_string(),
        });
        self
    }

    /// Check `params` against the declared fields, reporting every failure.
    ///
    /// `null` is treated as an empty object so parameterless tools accept it.
    pub fn validate(&self, params: &Value) -> Result<(), Vec<FieldError>> {
        let empty = Map::new();
        let obj = match params {
            Value::Object(map) => map,
            Value::Null => &empty,
            _ => {
                return Err(vec![FieldError::new("params", "must be a JSON object")]);
            }
        };

        let mut errors = Vec::new();
        for field in &self.fields {
            match obj.get(&field.name) {
                None | Some(Value::Null) if field.required => {
                    errors.push(FieldError::new(&field.name, "is required"));
                }
                None | Some(Value::Null) => {}
                Some(value) if !field.kind.accepts(value) => {
                    errors.push(FieldError::new(
                        &field.name,
                        format!("must be {}", field.kind.describe()),
                    ));
                }
                Some(_) => {}
            }
        }
        for key in obj.keys() {
            if !self.fields.iter().any(|f| &f.name == key) {
                errors.push(FieldError::new(key, "is not a recognized parameter"));
            }
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    /// JSON Schema rendering for tool listings.
    pub fn json_schema(&self) -> Value {
        let mut properties = Map::new();
        for field in &self.fields {
            let mut prop = json!({
                "type": field.kind.schema_type(),
                "description": field.description,
            });
            if field.kind == ParamKind::Timestamp {
                prop["format"] = json!("date-time");
            }
            properties.insert(field.name.clone(), prop);
        }
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

/// Static description of a registered tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub required_permissions: Vec<Permission>,
    pub params: ParamSpec,
}

impl ToolDefinition {
    /// Listing format: name, description and input schema.
    pub fn to_listing(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "requiredPermissions": self.required_permissions,
            "inputSchema": self.params.json_schema(),
        })
    }
}
