//! Defensive validation of raw generator payloads.
//!
//! The generative backend is asked for bare JSON but is not trusted to
//! deliver it. Everything that crosses that boundary comes through here and
//! leaves as a typed record or a typed [`ResponseFormatError`]; a raw
//! `serde_json::Value` never travels downstream.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::analysis::{HairAnalysis, Porosity};
use crate::error::ResponseFormatError;
use crate::plan::{ColorPlan, FashionOverlay, PreLighten, Tone};

/// Validates a raw analysis payload. All eight diagnostic fields must be
/// present as strings; the porosity value itself is not constrained to the
/// canonical labels.
pub fn validate_analysis(raw: &str) -> Result<HairAnalysis, ResponseFormatError> {
    let obj = parse_object(raw)?;
    Ok(HairAnalysis {
        natural_level: required_string(&obj, "naturalLevel")?,
        current_cosmetic_level: required_string(&obj, "currentCosmeticLevel")?,
        dominant_undertone: required_string(&obj, "dominantUndertone")?,
        gray_percentage: required_string(&obj, "grayPercentage")?,
        porosity: Porosity::from_label(&required_string(&obj, "porosity")?),
        banding_zones: required_string(&obj, "bandingZones")?,
        risk_flags: required_string(&obj, "riskFlags")?,
        stylist_notes: required_string(&obj, "stylistNotes")?,
    })
}

/// Validates a raw plan payload. `path` and a non-empty `steps` array of
/// strings are required; the three creative sections are optional and
/// all-or-nothing: a partially populated section is nulled out rather than
/// failing the whole plan.
pub fn validate_plan(raw: &str) -> Result<ColorPlan, ResponseFormatError> {
    let obj = parse_object(raw)?;
    let path = required_string(&obj, "path")?;
    let steps = required_steps(&obj)?;
    Ok(ColorPlan {
        path,
        pre_lighten: optional_section::<PreLighten>(obj.get("preLighten")),
        tone: optional_section::<Tone>(obj.get("tone")),
        fashion_overlay: optional_section::<FashionOverlay>(obj.get("fashionOverlay")),
        steps,
    })
}

fn parse_object(raw: &str) -> Result<Map<String, Value>, ResponseFormatError> {
    let trimmed = raw.trim();
    // Cheap structural pre-check before handing the payload to the parser;
    // the model sometimes wraps JSON in prose or markdown fences.
    if !trimmed.starts_with('{') || !trimmed.ends_with('}') {
        return Err(ResponseFormatError::Unparseable(
            "payload is not a bare JSON object".to_string(),
        ));
    }
    let value: Value = serde_json::from_str(trimmed)
        .map_err(|err| ResponseFormatError::Unparseable(err.to_string()))?;
    match value {
        Value::Object(obj) => Ok(obj),
        _ => Err(ResponseFormatError::Unparseable(
            "payload parsed to a non-object".to_string(),
        )),
    }
}

fn required_string(obj: &Map<String, Value>, key: &str) -> Result<String, ResponseFormatError> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            ResponseFormatError::SchemaIncomplete(format!("missing or non-string field '{key}'"))
        })
}

fn required_steps(obj: &Map<String, Value>) -> Result<Vec<String>, ResponseFormatError> {
    let Some(items) = obj.get("steps").and_then(Value::as_array) else {
        return Err(ResponseFormatError::SchemaIncomplete(
            "missing or non-array field 'steps'".to_string(),
        ));
    };
    let steps: Vec<String> = items
        .iter()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect();
    if steps.is_empty() || steps.len() != items.len() {
        return Err(ResponseFormatError::SchemaIncomplete(
            "'steps' must be a non-empty array of strings".to_string(),
        ));
    }
    Ok(steps)
}

/// A section is kept only when it is fully present; `null`, missing, or any
/// shape that does not deserialize cleanly becomes `None`.
fn optional_section<T: DeserializeOwned>(value: Option<&Value>) -> Option<T> {
    let value = value?;
    if value.is_null() {
        return None;
    }
    serde_json::from_value(value.clone()).ok()
}
