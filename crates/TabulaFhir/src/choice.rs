//! Choice-element (`value[x]`) suffix tables.
//!
//! A FHIR choice field is serialised under a name that concatenates the base
//! name with the UpperCamel form of the chosen type: `onset[x]` becomes
//! `onsetDateTime` or `onsetPeriod`. Navigation by base name has to recognise
//! those suffixes, and only those — `id` must not match `identifier`.

use once_cell::sync::Lazy;
use std::collections::HashMap;

/// FHIR primitive types that can appear as a choice suffix, keyed by their
/// UpperCamel suffix form, mapped to the lowerCamel type name.
static PRIMITIVE_SUFFIXES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("Base64Binary", "base64Binary"),
        ("Boolean", "boolean"),
        ("Canonical", "canonical"),
        ("Code", "code"),
        ("Date", "date"),
        ("DateTime", "dateTime"),
        ("Decimal", "decimal"),
        ("Id", "id"),
        ("Instant", "instant"),
        ("Integer", "integer"),
        ("Integer64", "integer64"),
        ("Markdown", "markdown"),
        ("Oid", "oid"),
        ("PositiveInt", "positiveInt"),
        ("String", "string"),
        ("Time", "time"),
        ("UnsignedInt", "unsignedInt"),
        ("Uri", "uri"),
        ("Url", "url"),
        ("Uuid", "uuid"),
    ])
});

/// Complex datatypes that can appear as a choice suffix. Their FHIR type name
/// is the suffix itself.
static COMPLEX_SUFFIXES: &[&str] = &[
    "Address",
    "Age",
    "Annotation",
    "Attachment",
    "Availability",
    "CodeableConcept",
    "CodeableReference",
    "Coding",
    "ContactDetail",
    "ContactPoint",
    "Count",
    "DataRequirement",
    "Distance",
    "Dosage",
    "Duration",
    "Expression",
    "ExtendedContactDetail",
    "HumanName",
    "Identifier",
    "Meta",
    "Money",
    "ParameterDefinition",
    "Period",
    "Quantity",
    "Range",
    "Ratio",
    "RatioRange",
    "Reference",
    "RelatedArtifact",
    "SampledData",
    "Signature",
    "Timing",
    "TriggerDefinition",
    "UsageContext",
];

/// Resolves a serialised field name against a choice base name.
///
/// Returns the FHIR type name of the chosen variant when `key` is `base`
/// followed by a recognised type suffix (`onsetDateTime` against `onset`
/// gives `dateTime`), and `None` otherwise.
pub fn choice_type_for(key: &str, base: &str) -> Option<&'static str> {
    let suffix = key.strip_prefix(base)?;
    if suffix.is_empty() || !suffix.starts_with(|c: char| c.is_ascii_uppercase()) {
        return None;
    }
    if let Some(primitive) = PRIMITIVE_SUFFIXES.get(suffix) {
        return Some(*primitive);
    }
    COMPLEX_SUFFIXES.iter().find(|s| **s == suffix).copied()
}
