//! JSON-backed FHIR resource wrapper.
//!
//! The engine does not depend on generated model types; the host hands it a
//! parsed JSON document and this wrapper is the adapter the evaluator
//! consumes. Conversion into the evaluation value tree happens once per
//! `apply` call and preserves document field order.

use indexmap::IndexMap;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use std::fmt;
use std::str::FromStr;

use tabula_fhirpath_support::{EvaluationResult, IntoEvaluationResult, TypeInfoResult};

/// Why a JSON document could not be wrapped as a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    /// The document root was not a JSON object.
    NotAnObject,
    /// The object has no non-empty `resourceType` string.
    MissingResourceType,
    /// The document was not valid JSON.
    Json(String),
}

impl std::error::Error for ResourceError {}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceError::NotAnObject => write!(f, "resource must be a JSON object"),
            ResourceError::MissingResourceType => {
                write!(f, "resource is missing a resourceType")
            }
            ResourceError::Json(msg) => write!(f, "invalid JSON: {}", msg),
        }
    }
}

/// A FHIR resource instance, held as its JSON document.
///
/// The wrapper guarantees the document is an object with a non-empty
/// `resourceType`, which is all the engine needs to route a resource to the
/// views that apply to it.
#[derive(Debug, Clone)]
pub struct FhirResource {
    value: serde_json::Value,
    resource_type: String,
}

impl FhirResource {
    /// Wraps an already-parsed JSON document.
    pub fn from_json(value: serde_json::Value) -> Result<Self, ResourceError> {
        let object = value.as_object().ok_or(ResourceError::NotAnObject)?;
        let resource_type = object
            .get("resourceType")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .ok_or(ResourceError::MissingResourceType)?
            .to_string();
        Ok(Self {
            value,
            resource_type,
        })
    }

    /// Parses a JSON text into a resource.
    pub fn from_json_str(text: &str) -> Result<Self, ResourceError> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|e| ResourceError::Json(e.to_string()))?;
        Self::from_json(value)
    }

    /// The `resourceType` tag.
    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    /// The resource's logical id, when present.
    pub fn logical_id(&self) -> Option<&str> {
        self.value.get("id").and_then(|v| v.as_str())
    }

    /// The underlying JSON document.
    pub fn as_json(&self) -> &serde_json::Value {
        &self.value
    }
}

impl IntoEvaluationResult for FhirResource {
    fn to_evaluation_result(&self) -> EvaluationResult {
        json_to_result(&self.value)
    }
}

/// Converts a JSON value into the evaluation value tree.
///
/// Objects carrying a `resourceType` are tagged with it so `ofType(...)` and
/// `getResourceKey()` can recognise resources; arrays drop JSON nulls (FHIR
/// uses them as alignment placeholders for primitive extensions).
pub fn json_to_result(value: &serde_json::Value) -> EvaluationResult {
    match value {
        serde_json::Value::Null => EvaluationResult::Empty,
        serde_json::Value::Bool(b) => EvaluationResult::Boolean(*b, None),
        serde_json::Value::Number(n) => number_to_result(n),
        serde_json::Value::String(s) => EvaluationResult::String(s.clone(), None),
        serde_json::Value::Array(items) => EvaluationResult::Collection {
            items: items
                .iter()
                .filter(|v| !v.is_null())
                .map(json_to_result)
                .collect(),
            type_info: None,
        },
        serde_json::Value::Object(fields) => {
            let mut map = IndexMap::with_capacity(fields.len());
            for (key, field_value) in fields {
                map.insert(key.clone(), json_to_result(field_value));
            }
            let type_info = fields
                .get("resourceType")
                .and_then(|v| v.as_str())
                .map(TypeInfoResult::fhir);
            EvaluationResult::Object { map, type_info }
        }
    }
}

fn number_to_result(n: &serde_json::Number) -> EvaluationResult {
    if let Some(i) = n.as_i64() {
        return EvaluationResult::Integer(i, None);
    }
    if let Ok(d) = Decimal::from_str(&n.to_string()) {
        return EvaluationResult::Decimal(d, None);
    }
    match n.as_f64().and_then(Decimal::from_f64) {
        Some(d) => EvaluationResult::Decimal(d, None),
        None => EvaluationResult::String(n.to_string(), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wraps_a_resource_and_reads_its_tags() {
        let resource = FhirResource::from_json(json!({
            "resourceType": "Patient",
            "id": "p1",
            "active": true
        }))
        .unwrap();
        assert_eq!(resource.resource_type(), "Patient");
        assert_eq!(resource.logical_id(), Some("p1"));
    }

    #[test]
    fn rejects_documents_without_a_resource_type() {
        assert_eq!(
            FhirResource::from_json(json!({"id": "x"})).unwrap_err(),
            ResourceError::MissingResourceType
        );
        assert_eq!(
            FhirResource::from_json(json!([1, 2])).unwrap_err(),
            ResourceError::NotAnObject
        );
    }

    #[test]
    fn conversion_tags_resources_and_flattens_nulls() {
        let resource = FhirResource::from_json(json!({
            "resourceType": "Observation",
            "code": {"coding": [null, {"code": "x"}]}
        }))
        .unwrap();
        let value = resource.to_evaluation_result();
        assert!(value.type_info().unwrap().matches("Observation"));
        if let EvaluationResult::Object { map, .. } = &value {
            if let Some(EvaluationResult::Object { map: code, .. }) = map.get("code") {
                assert_eq!(code.get("coding").unwrap().count(), 1);
            } else {
                panic!("code should be an object");
            }
        } else {
            panic!("resource should convert to an object");
        }
    }

    #[test]
    fn numbers_convert_without_precision_loss() {
        let value = json_to_result(&json!(4));
        assert_eq!(value, EvaluationResult::Integer(4, None));
        let value = json_to_result(&json!(1.25));
        assert_eq!(
            value,
            EvaluationResult::Decimal(Decimal::from_str("1.25").unwrap(), None)
        );
    }
}
