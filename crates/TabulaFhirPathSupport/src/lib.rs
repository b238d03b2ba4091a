//! Shared value and error types for the Tabula FHIRPath engine.
//!
//! This crate is the communication layer between the resource model
//! (`tabula-fhir`), the expression evaluator (`tabula-fhir-path`), and the
//! ViewDefinition engine (`tabula-sql-on-fhir`):
//!
//! - [`EvaluationResult`] — the universal sequence-of-values type every
//!   expression evaluates to
//! - [`EvaluationError`] — runtime evaluation failures
//! - [`TypeInfoResult`] — FHIR type tags for `ofType(...)` dispatch
//! - [`IntoEvaluationResult`] — conversion of host data into the value tree

pub mod evaluation_error;
pub mod evaluation_result;
pub mod traits;
pub mod type_info;

pub use evaluation_error::EvaluationError;
pub use evaluation_result::EvaluationResult;
pub use traits::IntoEvaluationResult;
pub use type_info::TypeInfoResult;
