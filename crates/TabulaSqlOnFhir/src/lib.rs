//! SQL-on-FHIR v2 ViewDefinition engine.
//!
//! This crate turns declarative [ViewDefinitions](https://sql-on-fhir.org/ig/latest)
//! into flat, typed rows. A ViewDefinition names a resource type, an
//! optional set of `where` predicates, and a tree of selects whose FHIRPath
//! columns, `forEach` iterators, and `unionAll` branches describe how one
//! nested resource becomes one or more rows.
//!
//! # Pipeline
//!
//! ```text
//! JSON text ──parse──▶ ViewDefinition (validated, constants resolved,
//!                        paths compiled, schema computed)
//! (ViewDefinition, FhirResource) ──apply──▶ rows
//! ```
//!
//! Parsing is fatal-on-error: no partially validated view is ever returned.
//! Apply is pure and per-resource: evaluation failures surface as errors for
//! that resource and the view stays usable.
//!
//! # Example
//!
//! ```rust
//! use serde_json::json;
//! use tabula_fhir::FhirResource;
//! use tabula_sql_on_fhir::{ParseOptions, ViewDefinition};
//!
//! let view = ViewDefinition::from_json(
//!     json!({
//!         "resourceType": "ViewDefinition",
//!         "name": "patient_flat",
//!         "resource": "Patient",
//!         "select": [{
//!             "column": [
//!                 {"name": "id", "path": "getResourceKey()"},
//!                 {"name": "family", "path": "name.family.first()"}
//!             ]
//!         }]
//!     }),
//!     ParseOptions::default(),
//! )?;
//!
//! let patient = FhirResource::from_json(json!({
//!     "resourceType": "Patient",
//!     "id": "p1",
//!     "name": [{"family": "Doe"}]
//! }))
//! .unwrap();
//!
//! let rows = view.apply(&patient)?;
//! assert_eq!(rows.len(), 1);
//! assert_eq!(rows[0].get("family").unwrap(), "Doe");
//! # Ok::<(), tabula_sql_on_fhir::SofError>(())
//! ```
//!
//! # Semantics in brief
//!
//! - `forEach` multiplies rows, one per element; an empty sequence means
//!   zero rows from that scope.
//! - `forEachOrNull` is the same, except an empty sequence yields one row
//!   with every column of the scope null.
//! - Sibling selects combine as a cross product (their column sets are
//!   disjoint by validation).
//! - `unionAll` branches must agree on their column schema and their rows
//!   are appended in branch order.
//! - Constants (`%name`) are substituted into paths at validation time;
//!   expressions are compiled once and cached on the view.

mod constants;
mod model;
mod output;
mod rows;
mod schema;
mod view;

pub use output::{ContentType, format_output};
pub use rows::{Row, RowSet};
pub use schema::{ColumnInfo, Schema};
pub use view::{ParseOptions, ViewDefinition};

// Re-exported for callers that only need the engine surface.
pub use tabula_fhir::{FhirResource, FhirVersion};

use thiserror::Error;

/// Failures surfaced by the engine.
///
/// Validation errors are fatal to the ViewDefinition being parsed;
/// evaluation errors are scoped to the resource being applied. Messages
/// carry a breadcrumb (`select[1].column[0]`, `where[2]`, `constant 'x'`)
/// locating the offending element.
#[derive(Debug, Error)]
pub enum SofError {
    /// Structural or semantic validation failure: bad or missing names,
    /// malformed constants, undefined constant references, duplicate
    /// columns, incompatible unionAll branches.
    #[error("Invalid ViewDefinition: {0}")]
    InvalidViewDefinition(String),

    /// Malformed JSON, or a FHIRPath expression outside the supported
    /// dialect.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// FHIRPath runtime failure while applying a view to a resource.
    #[error("Evaluation error: {0}")]
    EvaluationError(String),

    /// A `fhirVersion` entry (or requested version) with an unrecognised
    /// prefix. Known prefixes: 3.0, 4.0, 4.3, 5.0.
    #[error("Unsupported FHIR version: {0}")]
    UnsupportedFhirVersion(String),

    /// An output MIME type the formatter does not produce.
    #[error("Unsupported content type: {0}")]
    UnsupportedContentType(String),

    /// CSV formatting failure.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// CSV writer could not hand back its buffer.
    #[error("CSV writer error: {0}")]
    CsvWriter(String),

    /// File I/O failure from `parse_file`.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for SofError {
    fn from(e: serde_json::Error) -> Self {
        SofError::ParseError(e.to_string())
    }
}
