//! Entry schema definition and validation.
//!
//! The schema describes the shape of a dictionary entry payload and which
//! fields feed the search index. Records that fail validation are still
//! synced and stored, they are only left out of the index.

use crate::{error::Result, Error, SchemaVersion};
use serde::{Deserialize, Serialize};

/// Field types supported in entry schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldType {
    String,
    /// Array of strings
    StringList,
    Int,
    Bool,
    Timestamp,
    /// Arbitrary nested JSON
    Json,
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldType::String => write!(f, "String"),
            FieldType::StringList => write!(f, "StringList"),
            FieldType::Int => write!(f, "Int"),
            FieldType::Bool => write!(f, "Bool"),
            FieldType::Timestamp => write!(f, "Timestamp"),
            FieldType::Json => write!(f, "Json"),
        }
    }
}

/// Definition of a field in an entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDef {
    /// Field name
    pub name: String,
    /// Field type
    pub field_type: FieldType,
    /// Whether this field is required
    pub required: bool,
    /// Ranking weight when the field is indexed; `None` keeps it out of the index
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_weight: Option<f32>,
}

impl FieldDef {
    /// Create a new required field definition.
    pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: true,
            search_weight: None,
        }
    }

    /// Create a new optional field definition.
    pub fn optional(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: false,
            search_weight: None,
        }
    }

    /// Index this field with the given ranking weight.
    pub fn searchable(mut self, weight: f32) -> Self {
        self.search_weight = Some(weight);
        self
    }

    /// Validate a JSON value against this field definition.
    pub fn validate(&self, value: Option<&serde_json::Value>) -> Result<()> {
        match value {
            None if self.required => Err(Error::MissingRequiredField(self.name.clone())),
            None => Ok(()),
            Some(serde_json::Value::Null) if self.required => {
                Err(Error::MissingRequiredField(self.name.clone()))
            }
            Some(serde_json::Value::Null) => Ok(()),
            Some(serde_json::Value::Array(items))
                if self.required && self.field_type == FieldType::StringList && items.is_empty() =>
            {
                Err(Error::MissingRequiredField(self.name.clone()))
            }
            Some(v) => self.validate_type(v),
        }
    }

    fn validate_type(&self, value: &serde_json::Value) -> Result<()> {
        let valid = match self.field_type {
            FieldType::String => value.is_string(),
            FieldType::StringList => value
                .as_array()
                .map(|items| items.iter().all(|item| item.is_string()))
                .unwrap_or(false),
            FieldType::Int => value.is_i64() || value.is_u64(),
            FieldType::Bool => value.is_boolean(),
            FieldType::Timestamp => value.is_u64() || value.is_i64(),
            FieldType::Json => true, // Any JSON is valid
        };

        if valid {
            Ok(())
        } else {
            Err(Error::TypeMismatch {
                field: self.name.clone(),
                expected: self.field_type.to_string(),
                got: json_type_name(value).to_string(),
            })
        }
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "Null",
        serde_json::Value::Bool(_) => "Bool",
        serde_json::Value::Number(n) if n.is_i64() || n.is_u64() => "Int",
        serde_json::Value::Number(_) => "Float",
        serde_json::Value::String(_) => "String",
        serde_json::Value::Array(_) => "Array",
        serde_json::Value::Object(_) => "Object",
    }
}

/// Schema for dictionary entry payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntrySchema {
    /// Schema version for migrations
    pub version: SchemaVersion,
    /// Field definitions, in declaration order
    pub fields: Vec<FieldDef>,
}

impl EntrySchema {
    /// Create an empty schema.
    pub fn new(version: SchemaVersion) -> Self {
        Self {
            version,
            fields: Vec::new(),
        }
    }

    /// Builder-style method to add a field.
    pub fn with_field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// The schema used by the dictionary product.
    pub fn dictionary() -> Self {
        Self::new(1)
            .with_field(FieldDef::required("headword", FieldType::String).searchable(4.0))
            .with_field(FieldDef::optional("reading", FieldType::String).searchable(2.0))
            .with_field(FieldDef::required("senses", FieldType::StringList).searchable(1.0))
            .with_field(FieldDef::optional("partOfSpeech", FieldType::String))
            .with_field(FieldDef::optional("tags", FieldType::StringList).searchable(0.5))
            .with_field(FieldDef::optional("frequency", FieldType::Int))
    }

    /// Get a field definition by name.
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Fields that feed the search index, with their weights.
    pub fn searchable_fields(&self) -> impl Iterator<Item = (&FieldDef, f32)> {
        self.fields
            .iter()
            .filter_map(|f| f.search_weight.map(|w| (f, w)))
    }

    /// The field an exact query match is boosted on: the heaviest searchable
    /// string field.
    pub fn primary_field(&self) -> Option<&FieldDef> {
        self.searchable_fields()
            .filter(|(f, _)| f.field_type == FieldType::String)
            .fold(None, |best: Option<(&FieldDef, f32)>, (f, w)| match best {
                Some((_, best_w)) if best_w >= w => best,
                _ => Some((f, w)),
            })
            .map(|(f, _)| f)
    }

    /// Validate a payload against this schema.
    pub fn validate_payload(&self, payload: &serde_json::Value) -> Result<()> {
        let obj = payload
            .as_object()
            .ok_or_else(|| Error::InvalidPayload("payload must be an object".into()))?;

        for field in &self.fields {
            field.validate(obj.get(&field.name))?;
        }

        Ok(())
    }
}

impl Default for EntrySchema {
    fn default() -> Self {
        Self::dictionary()
    }
}
