use crate::error::{CrewError, Result};
use serde_json::{json, Map, Value};

pub const MAX_STRING_LENGTH: usize = 10_000;
pub const MAX_COLLECTION_LENGTH: usize = 1_000;
pub const MAX_JSON_DEPTH: usize = 10;

/// Free-text markers that are rejected outright. The store layer always
/// binds parameters, so this is a second line against payloads aimed at
/// downstream runners and shells.
const DANGEROUS_PATTERNS: &[&str] = &[
    "drop table",
    "delete from",
    "; --",
    "union select",
    "$(",
    "`rm ",
    "rm -rf",
    "&& rm",
    "| sh",
    "| bash",
];

#[derive(Debug, Clone, Copy)]
pub enum FieldKind {
    /// UTF-8 text bounded by `max_len`.
    Text { max_len: usize },
    /// Float bounded to an inclusive range.
    Number { min: f64, max: f64 },
    /// Integer bounded to an inclusive range.
    Integer { min: i64, max: i64 },
    Bool,
    /// Array bounded by `max_len`; element structure is checked generically.
    Array { max_len: usize },
    Object,
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub required: bool,
    pub kind: FieldKind,
}

impl FieldSpec {
    #[must_use]
    pub const fn required_text(name: &'static str) -> Self {
        Self {
            name,
            required: true,
            kind: FieldKind::Text {
                max_len: MAX_STRING_LENGTH,
            },
        }
    }

    #[must_use]
    pub const fn optional_text(name: &'static str) -> Self {
        Self {
            name,
            required: false,
            kind: FieldKind::Text {
                max_len: MAX_STRING_LENGTH,
            },
        }
    }
}

/// Per-tool argument schema: a closed field list. Unknown fields are
/// rejected rather than ignored.
#[derive(Debug, Clone, Copy)]
pub struct ArgSchema {
    pub fields: &'static [FieldSpec],
}

impl ArgSchema {
    pub const EMPTY: Self = Self { fields: &[] };

    /// Validates and sanitizes the argument map in place.
    ///
    /// # Errors
    /// Returns `CrewError::InvalidArgument` describing the first violation.
    pub fn validate(&self, args: &mut Map<String, Value>) -> Result<()> {
        let unknown: Vec<String> = args
            .keys()
            .filter(|key| !self.fields.iter().any(|f| f.name == key.as_str()))
            .cloned()
            .collect();
        if !unknown.is_empty() {
            return Err(CrewError::InvalidArgument(format!(
                "unknown field(s): {}",
                unknown.join(", ")
            )));
        }

        for field in self.fields {
            match args.get(field.name) {
                None | Some(Value::Null) => {
                    if field.required {
                        return Err(CrewError::InvalidArgument(format!(
                            "missing required field: {}",
                            field.name
                        )));
                    }
                    // Strip explicit nulls so handlers see absent fields.
                    args.remove(field.name);
                }
                Some(value) => check_field(field, value)?,
            }
        }

        for (key, value) in args.iter_mut() {
            sanitize_value(key, value, 0)?;
        }
        Ok(())
    }

    /// Minimal JSON Schema rendering for `tools/list`.
    #[must_use]
    pub fn json_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for field in self.fields {
            let type_name = match field.kind {
                FieldKind::Text { .. } => "string",
                FieldKind::Number { .. } => "number",
                FieldKind::Integer { .. } => "integer",
                FieldKind::Bool => "boolean",
                FieldKind::Array { .. } => "array",
                FieldKind::Object => "object",
            };
            properties.insert(field.name.to_string(), json!({ "type": type_name }));
            if field.required {
                required.push(Value::String(field.name.to_string()));
            }
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

fn check_field(field: &FieldSpec, value: &Value) -> Result<()> {
    let name = field.name;
    match (field.kind, value) {
        (FieldKind::Text { max_len }, Value::String(text)) => {
            if text.chars().count() > max_len {
                return Err(CrewError::InvalidArgument(format!(
                    "field {name} exceeds {max_len} characters"
                )));
            }
            Ok(())
        }
        (FieldKind::Number { min, max }, Value::Number(n)) => {
            let v = n.as_f64().unwrap_or(f64::NAN);
            if !(min..=max).contains(&v) {
                return Err(CrewError::InvalidArgument(format!(
                    "field {name} must be within [{min}, {max}]"
                )));
            }
            Ok(())
        }
        (FieldKind::Integer { min, max }, Value::Number(n)) => {
            let Some(v) = n.as_i64() else {
                return Err(CrewError::InvalidArgument(format!(
                    "field {name} must be an integer"
                )));
            };
            if !(min..=max).contains(&v) {
                return Err(CrewError::InvalidArgument(format!(
                    "field {name} must be within [{min}, {max}]"
                )));
            }
            Ok(())
        }
        (FieldKind::Bool, Value::Bool(_)) => Ok(()),
        (FieldKind::Array { max_len }, Value::Array(items)) => {
            if items.len() > max_len {
                return Err(CrewError::InvalidArgument(format!(
                    "field {name} exceeds {max_len} elements"
                )));
            }
            Ok(())
        }
        (FieldKind::Object, Value::Object(_)) => Ok(()),
        (kind, _) => Err(CrewError::InvalidArgument(format!(
            "field {name} has wrong type, expected {}",
            kind_name(kind)
        ))),
    }
}

const fn kind_name(kind: FieldKind) -> &'static str {
    match kind {
        FieldKind::Text { .. } => "string",
        FieldKind::Number { .. } => "number",
        FieldKind::Integer { .. } => "integer",
        FieldKind::Bool => "boolean",
        FieldKind::Array { .. } => "array",
        FieldKind::Object => "object",
    }
}

/// Recursive structural pass: depth and collection bounds, control
/// characters, dangerous markers. Strings are trimmed in place.
fn sanitize_value(path: &str, value: &mut Value, depth: usize) -> Result<()> {
    if depth > MAX_JSON_DEPTH {
        return Err(CrewError::InvalidArgument(format!(
            "field {path} nests deeper than {MAX_JSON_DEPTH} levels"
        )));
    }
    match value {
        Value::String(text) => sanitize_string(path, text),
        Value::Array(items) => {
            if items.len() > MAX_COLLECTION_LENGTH {
                return Err(CrewError::InvalidArgument(format!(
                    "field {path} exceeds {MAX_COLLECTION_LENGTH} elements"
                )));
            }
            for (index, item) in items.iter_mut().enumerate() {
                sanitize_value(&format!("{path}[{index}]"), item, depth + 1)?;
            }
            Ok(())
        }
        Value::Object(map) => {
            if map.len() > MAX_COLLECTION_LENGTH {
                return Err(CrewError::InvalidArgument(format!(
                    "field {path} exceeds {MAX_COLLECTION_LENGTH} keys"
                )));
            }
            for (key, item) in map.iter_mut() {
                if key.chars().count() > 100 {
                    return Err(CrewError::InvalidArgument(format!(
                        "field {path} has an oversized key"
                    )));
                }
                sanitize_value(&format!("{path}.{key}"), item, depth + 1)?;
            }
            Ok(())
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => Ok(()),
    }
}

fn sanitize_string(path: &str, text: &mut String) -> Result<()> {
    if text.chars().count() > MAX_STRING_LENGTH {
        return Err(CrewError::InvalidArgument(format!(
            "field {path} exceeds {MAX_STRING_LENGTH} characters"
        )));
    }
    if text
        .chars()
        .any(|c| c.is_control() && !matches!(c, '\t' | '\n' | '\r'))
    {
        return Err(CrewError::InvalidArgument(format!(
            "field {path} contains control characters"
        )));
    }
    let lowered = text.to_lowercase();
    if let Some(pattern) = DANGEROUS_PATTERNS
        .iter()
        .find(|pattern| lowered.contains(**pattern))
    {
        return Err(CrewError::InvalidArgument(format!(
            "field {path} contains a rejected pattern: {pattern}"
        )));
    }
    let trimmed = text.trim();
    if trimmed.len() != text.len() {
        *text = trimmed.to_string();
    }
    Ok(())
}
