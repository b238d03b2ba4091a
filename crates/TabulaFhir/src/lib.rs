//! FHIR resource model for the Tabula engine.
//!
//! The engine is model-agnostic: resources arrive as JSON documents and this
//! crate supplies the pieces the evaluator needs to work with them —
//!
//! - [`FhirVersion`] — the specification releases a ViewDefinition can
//!   declare, with prefix-based version-string mapping
//! - [`FhirResource`] — a validated JSON document wrapper with
//!   `resourceType` routing and conversion into the evaluation value tree
//! - [`choice`] — the choice-element (`value[x]`) suffix tables behind
//!   polymorphic navigation

pub mod choice;
pub mod fhir_version;
pub mod resource;

pub use fhir_version::FhirVersion;
pub use resource::{FhirResource, ResourceError, json_to_result};
