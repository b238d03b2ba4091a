//! FHIRPath evaluation for SQL-on-FHIR ViewDefinitions.
//!
//! This crate implements the restricted FHIRPath dialect that ViewDefinitions
//! actually use: member navigation (including choice elements), indexing, a
//! fixed function set, literals, and the predicate operators. It is not a
//! general FHIRPath engine; expressions outside the dialect fail to parse.
//!
//! ## Components
//!
//! - [`parser`] — chumsky-based parser producing an [`Expression`] AST
//! - [`evaluator`] — pure recursive evaluator over [`EvaluationContext`]
//! - [`polymorphic`] — choice-element (`value[x]`) base-name resolution
//! - [`keys`] — the SQL-on-FHIR `getResourceKey()` / `getReferenceKey()`
//!   domain functions
//!
//! ## Usage
//!
//! ```rust
//! use serde_json::json;
//! use tabula_fhir::FhirResource;
//! use tabula_fhir_path::{EvaluationContext, evaluate_expression};
//! use tabula_fhirpath_support::EvaluationResult;
//!
//! let patient = FhirResource::from_json(json!({
//!     "resourceType": "Patient",
//!     "id": "example",
//!     "name": [{"family": "Doe", "given": ["John"]}]
//! }))
//! .unwrap();
//!
//! let context = EvaluationContext::for_resource(&patient);
//! let family = evaluate_expression("name.family", &context).unwrap();
//! assert_eq!(family, EvaluationResult::String("Doe".to_string(), None));
//! ```
//!
//! The ViewDefinition engine does not go through [`evaluate_expression`]; it
//! parses every path once at validation time and hands the cached
//! [`Expression`] trees to [`evaluator::evaluate`] directly.

pub mod evaluator;
pub mod keys;
pub mod parser;
pub mod polymorphic;

pub use evaluator::{EvaluationContext, evaluate};
pub use parser::{Expression, Invocation, Literal, Term, parse_expression};

use tabula_fhirpath_support::EvaluationResult;

/// Parses and evaluates an expression in one step.
///
/// Convenience entry point for hosts evaluating ad-hoc expressions; parse
/// and evaluation failures are folded into one message. Engine code should
/// parse once and reuse the AST instead.
pub fn evaluate_expression(
    expression: &str,
    context: &EvaluationContext,
) -> Result<EvaluationResult, String> {
    let parsed = parse_expression(expression)?;
    evaluate(&parsed, context, None)
        .map_err(|e| format!("failed to evaluate '{}': {}", expression, e))
}
