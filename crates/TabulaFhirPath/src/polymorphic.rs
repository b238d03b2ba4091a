//! Polymorphic (choice element) member access.
//!
//! Navigating `onset` on a Condition must find `onsetDateTime` or
//! `onsetPeriod`, whichever the instance carries, and the resolved value must
//! remember its concrete FHIR type so a following `ofType(dateTime)` can
//! filter on it.

use indexmap::IndexMap;
use tabula_fhir::choice::choice_type_for;
use tabula_fhirpath_support::{EvaluationResult, TypeInfoResult};

/// Looks up `name` in a complex value, falling back to choice-element
/// resolution. Direct fields win over choice variants; primitive-extension
/// siblings (`_field`) are never matched.
pub fn access_member(
    map: &IndexMap<String, EvaluationResult>,
    name: &str,
) -> Option<EvaluationResult> {
    if let Some(value) = map.get(name) {
        return Some(value.clone());
    }
    for (key, value) in map {
        if key.starts_with('_') {
            continue;
        }
        if let Some(fhir_type) = choice_type_for(key, name) {
            return Some(tag_choice_value(value.clone(), fhir_type));
        }
    }
    None
}

/// Attaches the concrete type to a resolved choice value.
///
/// Date-flavoured primitives arrive from JSON as plain strings; they are
/// re-wrapped into their temporal variants here so that comparisons against
/// `@` literals line up.
fn tag_choice_value(value: EvaluationResult, fhir_type: &str) -> EvaluationResult {
    let tag = TypeInfoResult::fhir(fhir_type);
    match (fhir_type, value) {
        ("date", EvaluationResult::String(s, _)) => EvaluationResult::Date(s, Some(tag)),
        ("dateTime" | "instant", EvaluationResult::String(s, _)) => {
            EvaluationResult::DateTime(s, Some(tag))
        }
        ("time", EvaluationResult::String(s, _)) => EvaluationResult::Time(s, Some(tag)),
        (_, value) => value.with_type(tag),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(fields: Vec<(&str, EvaluationResult)>) -> IndexMap<String, EvaluationResult> {
        fields
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    #[test]
    fn direct_fields_win() {
        let map = object(vec![(
            "status",
            EvaluationResult::String("final".into(), None),
        )]);
        assert_eq!(
            access_member(&map, "status"),
            Some(EvaluationResult::String("final".into(), None))
        );
    }

    #[test]
    fn choice_fields_resolve_and_carry_their_type() {
        let map = object(vec![(
            "onsetDateTime",
            EvaluationResult::String("2020-05-01".into(), None),
        )]);
        let resolved = access_member(&map, "onset").unwrap();
        assert!(matches!(resolved, EvaluationResult::DateTime(..)));
        assert!(resolved.type_info().unwrap().matches("dateTime"));
    }

    #[test]
    fn absent_members_stay_absent() {
        let map = object(vec![(
            "onsetPeriod",
            EvaluationResult::Object {
                map: IndexMap::new(),
                type_info: None,
            },
        )]);
        assert_eq!(access_member(&map, "abatement"), None);
        // but the period variant is found under its base name, tagged
        let period = access_member(&map, "onset").unwrap();
        assert!(period.type_info().unwrap().matches("Period"));
    }
}
