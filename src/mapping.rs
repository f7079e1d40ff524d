//! Bidirectional field mapping.
//!
//! Pull and push share the same [`field_mapping::Model`] rows. The direction
//! decides which side is the source: pulling reads connector fields and writes
//! form fields, pushing does the reverse.

use std::collections::HashSet;

use serde_json::{Map, Value};

use crate::error::HubError;
use crate::models::field_mapping;
use crate::transforms::{Transform, TransformError, apply_chain, validate_transforms};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingDirection {
    /// ERP response to form shape (pull)
    ErpToForm,
    /// Form submission to ERP payload (push)
    FormToErp,
}

/// A field mapping with its transform chain parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldMappingRule {
    pub form_field: String,
    pub connector_field: String,
    pub transforms: Vec<Transform>,
    pub required: bool,
    pub default_value: Option<Value>,
}

impl FieldMappingRule {
    pub fn new(form_field: impl Into<String>, connector_field: impl Into<String>) -> Self {
        Self {
            form_field: form_field.into(),
            connector_field: connector_field.into(),
            transforms: Vec::new(),
            required: false,
            default_value: None,
        }
    }

    pub fn with_transforms(mut self, transforms: Vec<Transform>) -> Self {
        self.transforms = transforms;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }

    pub fn from_model(model: &field_mapping::Model) -> Result<Self, TransformError> {
        let transforms = validate_transforms(&model.transform_chain()?)?;
        Ok(Self {
            form_field: model.form_field.clone(),
            connector_field: model.connector_field.clone(),
            transforms,
            required: model.required,
            default_value: model.default_value.clone().filter(|v| !v.is_null()),
        })
    }

    fn source(&self, direction: MappingDirection) -> &str {
        match direction {
            MappingDirection::ErpToForm => &self.connector_field,
            MappingDirection::FormToErp => &self.form_field,
        }
    }

    fn target(&self, direction: MappingDirection) -> &str {
        match direction {
            MappingDirection::ErpToForm => &self.form_field,
            MappingDirection::FormToErp => &self.connector_field,
        }
    }
}

/// Parse stored mappings into rules.
pub fn compile_rules(models: &[field_mapping::Model]) -> Result<Vec<FieldMappingRule>, HubError> {
    models
        .iter()
        .map(|model| FieldMappingRule::from_model(model).map_err(HubError::from))
        .collect()
}

/// Apply `rules` to `data` in the given direction.
///
/// Objects are mapped field by field and arrays element by element; any other
/// value is returned unchanged. Only mapped fields appear in the output.
pub fn apply_mappings(
    data: &Value,
    rules: &[FieldMappingRule],
    direction: MappingDirection,
) -> Result<Value, HubError> {
    match data {
        Value::Object(object) => map_object(object, rules, direction).map(Value::Object),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Object(object) => map_object(object, rules, direction).map(Value::Object),
                other => Ok(other.clone()),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        other => Ok(other.clone()),
    }
}

fn map_object(
    object: &Map<String, Value>,
    rules: &[FieldMappingRule],
    direction: MappingDirection,
) -> Result<Map<String, Value>, HubError> {
    let mut mapped = Map::new();

    for rule in rules {
        let source = rule.source(direction);
        let value = object
            .get(source)
            .filter(|v| !v.is_null())
            .or(rule.default_value.as_ref())
            .cloned();

        match value {
            Some(value) => {
                let transformed = apply_chain(value, &rule.transforms)?;
                mapped.insert(rule.target(direction).to_string(), transformed);
            }
            None if rule.required => {
                return Err(HubError::Validation(format!(
                    "required field '{source}' is missing"
                )));
            }
            None => {}
        }
    }

    Ok(mapped)
}

/// Form-specific mappings win over template mappings for the same form field.
pub fn effective_mappings(
    form_specific: Vec<field_mapping::Model>,
    templates: Vec<field_mapping::Model>,
) -> Vec<field_mapping::Model> {
    let covered: HashSet<String> = form_specific
        .iter()
        .map(|mapping| mapping.form_field.clone())
        .collect();

    form_specific
        .into_iter()
        .chain(
            templates
                .into_iter()
                .filter(|template| !covered.contains(&template.form_field)),
        )
        .collect()
}
