//! Value transform pipeline.
//!
//! Field mappings store their transform chains as raw `{type, params}` records
//! ([`TransformSpec`]). Before anything runs, a chain is parsed into the closed
//! [`Transform`] enum, so an unknown type or malformed parameter is reported
//! once, up front, and execution itself is an exhaustive match.
//!
//! Transforms are pure functions of one JSON value. `null` passes through every
//! transform unchanged. String transforms accept numbers and booleans by
//! stringifying them; arrays and objects are rejected.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use thiserror::Error;
use utoipa::ToSchema;

use crate::error::HubError;

/// A transform step as stored on a field mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TransformSpec {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub params: Option<Value>,
}

impl TransformSpec {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            params: None,
        }
    }

    pub fn with_params(kind: impl Into<String>, params: Value) -> Self {
        Self {
            kind: kind.into(),
            params: Some(params),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransformError {
    #[error("unknown transform: {0}")]
    Unknown(String),
    #[error("invalid params for {transform}: {reason}")]
    InvalidParams {
        transform: &'static str,
        reason: String,
    },
    #[error("{transform} cannot be applied to {found} values")]
    UnsupportedInput {
        transform: &'static str,
        found: &'static str,
    },
    #[error("to_number: '{0}' is not a numeric value")]
    NotNumeric(String),
    #[error("to_boolean: '{0}' is not a boolean value")]
    NotBoolean(String),
}

impl From<TransformError> for HubError {
    fn from(error: TransformError) -> Self {
        HubError::Validation(error.to_string())
    }
}

/// Closed registry of transforms.
#[derive(Debug, Clone, PartialEq)]
pub enum Transform {
    Trim,
    Uppercase,
    Lowercase,
    /// Keep at most `max_length` UTF-16 code units.
    Truncate {
        max_length: usize,
    },
    /// Remove Hebrew vowel points and cantillation marks.
    StripNikud,
    ToNumber,
    ToString,
    ToBoolean,
    Replace {
        from: String,
        to: String,
    },
    NormalizeWhitespace,
    StripBidi,
    Prefix(String),
    Suffix(String),
}

impl Transform {
    pub fn name(&self) -> &'static str {
        match self {
            Transform::Trim => "trim",
            Transform::Uppercase => "uppercase",
            Transform::Lowercase => "lowercase",
            Transform::Truncate { .. } => "truncate",
            Transform::StripNikud => "strip_nikud",
            Transform::ToNumber => "to_number",
            Transform::ToString => "to_string",
            Transform::ToBoolean => "to_boolean",
            Transform::Replace { .. } => "replace",
            Transform::NormalizeWhitespace => "normalize_whitespace",
            Transform::StripBidi => "strip_bidi",
            Transform::Prefix(_) => "prefix",
            Transform::Suffix(_) => "suffix",
        }
    }

    /// Names of every registered transform.
    pub const REGISTRY: &'static [&'static str] = &[
        "trim",
        "uppercase",
        "lowercase",
        "truncate",
        "strip_nikud",
        "to_number",
        "to_string",
        "to_boolean",
        "replace",
        "normalize_whitespace",
        "strip_bidi",
        "prefix",
        "suffix",
    ];

    pub fn parse(spec: &TransformSpec) -> Result<Self, TransformError> {
        let params = spec.params.as_ref();
        let transform = match spec.kind.as_str() {
            "trim" => Transform::Trim,
            "uppercase" => Transform::Uppercase,
            "lowercase" => Transform::Lowercase,
            "truncate" => {
                let max_length = param(params, "maxLength")
                    .and_then(Value::as_u64)
                    .ok_or_else(|| TransformError::InvalidParams {
                        transform: "truncate",
                        reason: "maxLength must be a non-negative integer".to_string(),
                    })?;
                Transform::Truncate {
                    max_length: usize::try_from(max_length).unwrap_or(usize::MAX),
                }
            }
            "strip_nikud" => Transform::StripNikud,
            "to_number" => Transform::ToNumber,
            "to_string" => Transform::ToString,
            "to_boolean" => Transform::ToBoolean,
            "replace" => {
                let from = string_param(params, "replace", "from")?;
                if from.is_empty() {
                    return Err(TransformError::InvalidParams {
                        transform: "replace",
                        reason: "from must not be empty".to_string(),
                    });
                }
                let to = param(params, "to")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                Transform::Replace { from, to }
            }
            "normalize_whitespace" => Transform::NormalizeWhitespace,
            "strip_bidi" => Transform::StripBidi,
            "prefix" => Transform::Prefix(string_param(params, "prefix", "value")?),
            "suffix" => Transform::Suffix(string_param(params, "suffix", "value")?),
            other => return Err(TransformError::Unknown(other.to_string())),
        };
        Ok(transform)
    }

    pub fn apply(&self, value: &Value) -> Result<Value, TransformError> {
        if value.is_null() {
            return Ok(Value::Null);
        }

        match self {
            Transform::ToNumber => to_number(value),
            Transform::ToBoolean => to_boolean(value),
            Transform::ToString => Ok(Value::String(self.text(value)?)),
            _ => {
                let text = self.text(value)?;
                Ok(Value::String(self.apply_str(&text)))
            }
        }
    }

    fn apply_str(&self, text: &str) -> String {
        match self {
            Transform::Trim => text.trim().to_string(),
            Transform::Uppercase => text.to_uppercase(),
            Transform::Lowercase => text.to_lowercase(),
            Transform::Truncate { max_length } => truncate_utf16(text, *max_length),
            Transform::StripNikud => text.chars().filter(|c| !is_nikud(*c)).collect(),
            Transform::Replace { from, to } => text.replace(from.as_str(), to),
            Transform::NormalizeWhitespace => text.split_whitespace().collect::<Vec<_>>().join(" "),
            Transform::StripBidi => text.chars().filter(|c| !is_bidi_control(*c)).collect(),
            Transform::Prefix(prefix) => format!("{prefix}{text}"),
            Transform::Suffix(suffix) => format!("{text}{suffix}"),
            Transform::ToNumber | Transform::ToString | Transform::ToBoolean => text.to_string(),
        }
    }

    fn text(&self, value: &Value) -> Result<String, TransformError> {
        match value {
            Value::String(s) => Ok(s.clone()),
            Value::Number(n) => Ok(n.to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            other => Err(TransformError::UnsupportedInput {
                transform: self.name(),
                found: json_type(other),
            }),
        }
    }
}

fn param<'a>(params: Option<&'a Value>, key: &str) -> Option<&'a Value> {
    params.and_then(|p| p.get(key))
}

fn string_param(
    params: Option<&Value>,
    transform: &'static str,
    key: &str,
) -> Result<String, TransformError> {
    param(params, key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| TransformError::InvalidParams {
            transform,
            reason: format!("{key} must be a string"),
        })
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn truncate_utf16(text: &str, max_length: usize) -> String {
    let mut units = 0;
    let mut end = 0;
    for (index, c) in text.char_indices() {
        units += c.len_utf16();
        if units > max_length {
            return text[..index].to_string();
        }
        end = index + c.len_utf8();
    }
    text[..end].to_string()
}

/// Hebrew cantillation marks and vowel points. Maqaf, paseq, sof pasuq and
/// nun hafukha are punctuation and are kept.
fn is_nikud(c: char) -> bool {
    matches!(c,
        '\u{0591}'..='\u{05BD}'
        | '\u{05BF}'
        | '\u{05C1}'..='\u{05C2}'
        | '\u{05C4}'..='\u{05C5}'
        | '\u{05C7}'
    )
}

/// Bidi embedding, override and isolate controls.
pub fn is_bidi_override(c: char) -> bool {
    matches!(c, '\u{202A}'..='\u{202E}' | '\u{2066}'..='\u{2069}')
}

/// All invisible bidi formatting characters, including directional marks.
pub fn is_bidi_control(c: char) -> bool {
    is_bidi_override(c) || matches!(c, '\u{200E}' | '\u{200F}' | '\u{061C}')
}

fn to_number(value: &Value) -> Result<Value, TransformError> {
    let raw = match value {
        Value::Number(_) => return Ok(value.clone()),
        Value::String(s) => s.trim(),
        other => {
            return Err(TransformError::UnsupportedInput {
                transform: "to_number",
                found: json_type(other),
            });
        }
    };

    if let Ok(int) = raw.parse::<i64>() {
        return Ok(Value::Number(int.into()));
    }

    raw.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| TransformError::NotNumeric(preview(raw)))
}

fn to_boolean(value: &Value) -> Result<Value, TransformError> {
    match value {
        Value::Bool(_) => Ok(value.clone()),
        Value::Number(n) => Ok(Value::Bool(n.as_f64().is_some_and(|f| f != 0.0))),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "y" | "on" => Ok(Value::Bool(true)),
            "false" | "0" | "no" | "n" | "off" | "" => Ok(Value::Bool(false)),
            _ => Err(TransformError::NotBoolean(preview(s))),
        },
        other => Err(TransformError::UnsupportedInput {
            transform: "to_boolean",
            found: json_type(other),
        }),
    }
}

fn preview(raw: &str) -> String {
    const LIMIT: usize = 64;
    if raw.chars().count() > LIMIT {
        format!("{}...", raw.chars().take(LIMIT).collect::<String>())
    } else {
        raw.to_string()
    }
}

/// Per-step record from [`execute_transforms`].
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TransformStep {
    pub transform: String,
    pub duration_ms: f64,
    #[schema(value_type = Object)]
    pub output: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TransformExecution {
    #[schema(value_type = Object)]
    pub output: Value,
    pub steps: Vec<TransformStep>,
    pub total_duration_ms: f64,
}

/// Parse a stored chain, rejecting unknown types and malformed params.
pub fn validate_transforms(chain: &[TransformSpec]) -> Result<Vec<Transform>, TransformError> {
    chain.iter().map(Transform::parse).collect()
}

/// Apply an already-parsed chain left to right.
pub fn apply_chain(value: Value, chain: &[Transform]) -> Result<Value, TransformError> {
    chain
        .iter()
        .try_fold(value, |current, transform| transform.apply(&current))
}

/// Validate and run a chain, recording every intermediate output.
pub fn execute_transforms(
    value: Value,
    chain: &[TransformSpec],
) -> Result<TransformExecution, TransformError> {
    let transforms = validate_transforms(chain)?;
    let started = Instant::now();
    let mut steps = Vec::with_capacity(transforms.len());
    let mut current = value;

    for transform in &transforms {
        let step_started = Instant::now();
        current = transform.apply(&current)?;
        steps.push(TransformStep {
            transform: transform.name().to_string(),
            duration_ms: step_started.elapsed().as_secs_f64() * 1000.0,
            output: current.clone(),
        });
    }

    Ok(TransformExecution {
        output: current,
        steps,
        total_duration_ms: started.elapsed().as_secs_f64() * 1000.0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chain(kinds: &[&str]) -> Vec<TransformSpec> {
        kinds.iter().map(|k| TransformSpec::new(*k)).collect()
    }

    fn run(value: Value, spec: TransformSpec) -> Result<Value, TransformError> {
        execute_transforms(value, &[spec]).map(|r| r.output)
    }

    #[test]
    fn test_trim_then_uppercase() {
        let result = execute_transforms(json!("  john doe  "), &chain(&["trim", "uppercase"]))
            .expect("chain runs");

        assert_eq!(result.output, json!("JOHN DOE"));
        assert_eq!(result.steps.len(), 2);
        assert_eq!(result.steps[0].transform, "trim");
        assert_eq!(result.steps[0].output, json!("john doe"));
        assert_eq!(result.steps[1].output, json!("JOHN DOE"));
        assert!(result.total_duration_ms >= 0.0);
    }

    #[test]
    fn test_unknown_transform_named_in_error() {
        let err = validate_transforms(&chain(&["trim", "rot13"])).unwrap_err();
        assert_eq!(err.to_string(), "unknown transform: rot13");
    }

    #[test]
    fn test_truncate_requires_max_length() {
        let err = validate_transforms(&[TransformSpec::new("truncate")]).unwrap_err();
        assert!(err.to_string().starts_with("invalid params for truncate"));

        let err = validate_transforms(&[TransformSpec::with_params(
            "truncate",
            json!({"maxLength": -1}),
        )])
        .unwrap_err();
        assert!(matches!(err, TransformError::InvalidParams { .. }));
    }

    #[test]
    fn test_truncate_counts_utf16_units() {
        let spec = |n: u64| TransformSpec::with_params("truncate", json!({ "maxLength": n }));

        assert_eq!(run(json!("שלום עולם"), spec(4)).unwrap(), json!("שלום"));
        assert_eq!(run(json!("abc"), spec(10)).unwrap(), json!("abc"));
        assert_eq!(run(json!("abc"), spec(0)).unwrap(), json!(""));
        // a surrogate pair is never split
        assert_eq!(run(json!("a😀b"), spec(2)).unwrap(), json!("a"));
        assert_eq!(run(json!("a😀b"), spec(3)).unwrap(), json!("a😀"));
    }

    #[test]
    fn test_strip_nikud_keeps_consonants_and_spacing() {
        let pointed = "שָׁלוֹם עוֹלָם";
        let result = run(json!(pointed), TransformSpec::new("strip_nikud")).unwrap();
        assert_eq!(result, json!("שלום עולם"));

        let with_maqaf = "בֵּית־סֵפֶר";
        let result = run(json!(with_maqaf), TransformSpec::new("strip_nikud")).unwrap();
        assert_eq!(result, json!("בית־ספר"));
    }

    #[test]
    fn test_to_number() {
        let spec = || TransformSpec::new("to_number");
        assert_eq!(run(json!(" 42 "), spec()).unwrap(), json!(42));
        assert_eq!(run(json!("3.5"), spec()).unwrap(), json!(3.5));
        assert_eq!(run(json!(7), spec()).unwrap(), json!(7));

        let err = run(json!("12abc"), spec()).unwrap_err();
        assert_eq!(err, TransformError::NotNumeric("12abc".to_string()));
        assert!(run(json!("NaN"), spec()).is_err());
        assert!(run(json!(true), spec()).is_err());
    }

    #[test]
    fn test_failing_step_propagates() {
        let result = execute_transforms(json!("abc"), &chain(&["trim", "to_number", "uppercase"]));
        assert!(matches!(result, Err(TransformError::NotNumeric(_))));
    }

    #[test]
    fn test_null_passes_through() {
        let all: Vec<TransformSpec> = vec![
            TransformSpec::new("trim"),
            TransformSpec::new("to_number"),
            TransformSpec::new("to_boolean"),
            TransformSpec::with_params("prefix", json!({"value": "x"})),
        ];
        assert_eq!(execute_transforms(Value::Null, &all).unwrap().output, Value::Null);
    }

    #[test]
    fn test_string_transforms_stringify_scalars_and_reject_containers() {
        assert_eq!(
            run(json!(12), TransformSpec::with_params("prefix", json!({"value": "#"}))).unwrap(),
            json!("#12")
        );
        assert_eq!(run(json!(false), TransformSpec::new("uppercase")).unwrap(), json!("FALSE"));

        let err = run(json!(["a"]), TransformSpec::new("trim")).unwrap_err();
        assert_eq!(err.to_string(), "trim cannot be applied to array values");
        assert!(run(json!({"a": 1}), TransformSpec::new("to_string")).is_err());
    }

    #[test]
    fn test_to_boolean() {
        let spec = || TransformSpec::new("to_boolean");
        assert_eq!(run(json!("Yes"), spec()).unwrap(), json!(true));
        assert_eq!(run(json!("0"), spec()).unwrap(), json!(false));
        assert_eq!(run(json!(2), spec()).unwrap(), json!(true));
        assert!(run(json!("maybe"), spec()).is_err());
    }

    #[test]
    fn test_replace_whitespace_and_bidi() {
        let replace = TransformSpec::with_params("replace", json!({"from": "-", "to": ""}));
        assert_eq!(run(json!("050-123-4567"), replace).unwrap(), json!("0501234567"));

        assert!(
            validate_transforms(&[TransformSpec::with_params("replace", json!({"from": ""}))])
                .is_err()
        );

        assert_eq!(
            run(json!("  a \t b\n c "), TransformSpec::new("normalize_whitespace")).unwrap(),
            json!("a b c")
        );
        assert_eq!(
            run(json!("\u{202E}abc\u{200F}"), TransformSpec::new("strip_bidi")).unwrap(),
            json!("abc")
        );
    }

    #[test]
    fn test_case_folding_is_unicode_aware() {
        assert_eq!(run(json!("straße"), TransformSpec::new("uppercase")).unwrap(), json!("STRASSE"));
        assert_eq!(run(json!("ÉCOLE"), TransformSpec::new("lowercase")).unwrap(), json!("école"));
    }

    #[test]
    fn test_execution_is_deterministic() {
        let specs = vec![
            TransformSpec::new("normalize_whitespace"),
            TransformSpec::new("strip_nikud"),
            TransformSpec::new("uppercase"),
            TransformSpec::with_params("truncate", json!({"maxLength": 8})),
        ];
        let input = json!("  שָׁלוֹם   hello world ");
        let first = execute_transforms(input.clone(), &specs).unwrap();
        let second = execute_transforms(input, &specs).unwrap();
        assert_eq!(first.output, second.output);
    }

    #[test]
    fn test_registry_covers_every_name() {
        for name in Transform::REGISTRY {
            let spec = match *name {
                "truncate" => TransformSpec::with_params(*name, json!({"maxLength": 1})),
                "replace" => TransformSpec::with_params(*name, json!({"from": "a"})),
                "prefix" | "suffix" => TransformSpec::with_params(*name, json!({"value": "a"})),
                _ => TransformSpec::new(*name),
            };
            let parsed = Transform::parse(&spec).expect("registered transform parses");
            assert_eq!(parsed.name(), *name);
        }
    }

    #[test]
    fn test_spec_serde_shape() {
        let spec: TransformSpec =
            serde_json::from_value(json!({"type": "truncate", "params": {"maxLength": 5}})).unwrap();
        assert_eq!(spec.kind, "truncate");
        assert_eq!(serde_json::to_value(TransformSpec::new("trim")).unwrap(), json!({"type": "trim"}));
    }
}
