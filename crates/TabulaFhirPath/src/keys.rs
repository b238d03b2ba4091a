//! SQL-on-FHIR key functions: `getResourceKey()` and `getReferenceKey()`.
//!
//! Views join on opaque keys rather than raw references. `getResourceKey()`
//! is the row's own key; `getReferenceKey(Type?)` extracts the matching key
//! from a Reference value so the two sides agree.

use tabula_fhirpath_support::EvaluationResult;

/// Key for a resource value: its logical id.
///
/// Applies only to complex values that look like resources (carry a
/// `resourceType`); anything else yields the empty sequence.
pub fn resource_key(item: &EvaluationResult) -> EvaluationResult {
    let EvaluationResult::Object { map, .. } = item else {
        return EvaluationResult::Empty;
    };
    if !map.contains_key("resourceType") {
        return EvaluationResult::Empty;
    }
    match map.get("id") {
        Some(EvaluationResult::String(id, _)) => EvaluationResult::String(id.clone(), None),
        _ => EvaluationResult::Empty,
    }
}

/// Key for a Reference value: the logical id from its `reference` string.
///
/// With a type filter, references to other resource types yield the empty
/// sequence. References that are not of the `Type/id` shape (logical
/// identifiers, fragments, urn:uuid forms) have no key.
pub fn reference_key(item: &EvaluationResult, type_filter: Option<&str>) -> EvaluationResult {
    let EvaluationResult::Object { map, .. } = item else {
        return EvaluationResult::Empty;
    };
    let Some(EvaluationResult::String(reference, _)) = map.get("reference") else {
        return EvaluationResult::Empty;
    };
    match split_reference(reference) {
        Some((resource_type, id)) => {
            if let Some(wanted) = type_filter {
                if resource_type != wanted {
                    return EvaluationResult::Empty;
                }
            }
            EvaluationResult::String(id, None)
        }
        None => EvaluationResult::Empty,
    }
}

/// Splits `Type/id` out of a reference string.
///
/// Accepts relative and absolute forms and drops a version suffix:
/// `Patient/p1`, `https://host/fhir/Patient/p1`, `Patient/p1/_history/2`.
fn split_reference(reference: &str) -> Option<(String, String)> {
    let trimmed = match reference.find("/_history/") {
        Some(pos) => &reference[..pos],
        None => reference,
    };
    let mut segments = trimmed.rsplit('/');
    let id = segments.next()?;
    let resource_type = segments.next()?;
    if id.is_empty()
        || resource_type.is_empty()
        || !resource_type.chars().next()?.is_ascii_uppercase()
    {
        return None;
    }
    Some((resource_type.to_string(), id.to_string()))
}
