//! Part specification schema validation.
//!
//! A raw part specification is a YAML mapping holding the common part
//! keys plus plugin keys prefixed with `<plugin>-`. Validation checks every
//! key against the typed schema of the part and its plugin, collecting
//! field-level errors instead of stopping at the first one.

use serde_yaml::{Mapping, Value};

use super::{PluginKind, PluginProperties};
use crate::domain::PartSpec;
use crate::errors::FieldError;

/// Expected shape of a field value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    StringList,
    StringMap,
}

/// A field accepted by a schema
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
}

impl FieldSpec {
    pub const fn string(name: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::String,
        }
    }

    pub const fn string_list(name: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::StringList,
        }
    }

    pub const fn string_map(name: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::StringMap,
        }
    }
}

/// Keys shared by every part regardless of plugin
pub const PART_FIELDS: &[FieldSpec] = &[
    FieldSpec::string("plugin"),
    FieldSpec::string_list("after"),
    FieldSpec::string("source"),
    FieldSpec::string("source-subdir"),
    FieldSpec::string_list("build-packages"),
    FieldSpec::string_list("stage-packages"),
    FieldSpec::string_list("stage"),
    FieldSpec::string_list("prime"),
    FieldSpec::string_map("organize"),
    FieldSpec::string("override-pull"),
    FieldSpec::string("override-build"),
    FieldSpec::string("override-stage"),
    FieldSpec::string("override-prime"),
];

/// A part specification split into its typed halves
#[derive(Debug, Clone)]
pub struct ValidatedSpec {
    pub spec: PartSpec,
    pub properties: PluginProperties,
}

/// Outcome of a failed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationFailure {
    /// Schema violations, one entry per offending field
    Fields(Vec<FieldError>),

    /// The mapping passed the schema but could not be unmarshalled
    Message(String),
}

/// Validate a raw part specification against the schema of `plugin`
pub fn validate_part(plugin: PluginKind, raw: &Mapping) -> Result<ValidatedSpec, ValidationFailure> {
    let mut errors = Vec::new();
    let mut common = Mapping::new();
    let mut plugin_keys = Mapping::new();

    for (key, value) in raw {
        let Some(name) = key.as_str() else {
            errors.push(FieldError::new(
                format!("{:?}", key),
                "field names must be strings",
            ));
            continue;
        };

        if let Some(field) = PART_FIELDS.iter().find(|f| f.name == name) {
            errors.extend(check_field(field, value));
            common.insert(key.clone(), value.clone());
        } else if let Some(field) = plugin.property_fields().iter().find(|f| f.name == name) {
            errors.extend(check_field(field, value));
            plugin_keys.insert(key.clone(), value.clone());
        } else {
            errors.push(FieldError::new(name, "extra field not permitted"));
        }
    }

    if !errors.is_empty() {
        return Err(ValidationFailure::Fields(errors));
    }

    let spec: PartSpec = serde_yaml::from_value(Value::Mapping(common))
        .map_err(|e| ValidationFailure::Message(e.to_string()))?;
    let properties = plugin
        .properties(plugin_keys)
        .map_err(|e| ValidationFailure::Message(e.to_string()))?;

    Ok(ValidatedSpec { spec, properties })
}

fn check_field(field: &FieldSpec, value: &Value) -> Option<FieldError> {
    match field.kind {
        FieldKind::String => {
            if value.is_string() {
                None
            } else {
                Some(FieldError::new(field.name, "value is not a valid string"))
            }
        }
        FieldKind::StringList => match value.as_sequence() {
            Some(items) => items.iter().position(|item| !item.is_string()).map(|idx| {
                FieldError::new(format!("{}[{}]", field.name, idx), "value is not a valid string")
            }),
            None => Some(FieldError::new(field.name, "value is not a valid list")),
        },
        FieldKind::StringMap => match value.as_mapping() {
            Some(entries) => entries
                .iter()
                .find(|(key, value)| !key.is_string() || !value.is_string())
                .map(|(key, _)| FieldError::new(format!("{}.{}", field.name, display_key(key)), "value is not a valid string")),
            None => Some(FieldError::new(field.name, "value is not a valid mapping")),
        },
    }
}

fn display_key(key: &Value) -> String {
    match key.as_str() {
        Some(key) => key.to_string(),
        None => format!("{:?}", key),
    }
}
