//! FHIR specification versions recognised by the engine.

use std::fmt;

/// A FHIR specification release.
///
/// ViewDefinitions advertise compatibility through their `fhirVersion` list;
/// entries are matched by prefix against the published version numbers
/// (`3.0.x` is DSTU3, `4.0.x` R4, `4.3.x` R4B, `5.0.x` R5). Anything else is
/// rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FhirVersion {
    /// FHIR 3.0.x (STU3)
    Dstu3,
    /// FHIR 4.0.x (normative)
    R4,
    /// FHIR 4.3.x (ballot)
    R4B,
    /// FHIR 5.0.x
    R5,
}

impl FhirVersion {
    /// Maps a version string to a release by prefix.
    ///
    /// Accepts both bare prefixes (`"4.0"`) and full version numbers
    /// (`"4.0.1"`). Returns `None` for unrecognised prefixes.
    pub fn from_version_string(version: &str) -> Option<FhirVersion> {
        let version = version.trim();
        for (prefix, mapped) in [
            ("3.0", FhirVersion::Dstu3),
            ("4.0", FhirVersion::R4),
            ("4.3", FhirVersion::R4B),
            ("5.0", FhirVersion::R5),
        ] {
            if version == prefix || version.starts_with(&format!("{}.", prefix)) {
                return Some(mapped);
            }
        }
        None
    }

    /// The canonical short name used in diagnostics.
    pub fn as_str(&self) -> &'static str {
        match self {
            FhirVersion::Dstu3 => "DSTU3",
            FhirVersion::R4 => "R4",
            FhirVersion::R4B => "R4B",
            FhirVersion::R5 => "R5",
        }
    }
}

impl fmt::Display for FhirVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
