//! Conversion of host data into evaluation values.

use crate::evaluation_result::EvaluationResult;
use rust_decimal::Decimal;

/// Types that can present themselves to the FHIRPath evaluator.
///
/// The engine never navigates host data directly; it converts the resource
/// into an [`EvaluationResult`] tree once per call and walks that. Absent
/// values (`Option::None`) convert to the empty sequence, repeating elements
/// to collections.
pub trait IntoEvaluationResult {
    fn to_evaluation_result(&self) -> EvaluationResult;
}

impl IntoEvaluationResult for bool {
    fn to_evaluation_result(&self) -> EvaluationResult {
        EvaluationResult::Boolean(*self, None)
    }
}

impl IntoEvaluationResult for String {
    fn to_evaluation_result(&self) -> EvaluationResult {
        EvaluationResult::String(self.clone(), None)
    }
}

impl IntoEvaluationResult for &str {
    fn to_evaluation_result(&self) -> EvaluationResult {
        EvaluationResult::String((*self).to_string(), None)
    }
}

impl IntoEvaluationResult for i64 {
    fn to_evaluation_result(&self) -> EvaluationResult {
        EvaluationResult::Integer(*self, None)
    }
}

impl IntoEvaluationResult for i32 {
    fn to_evaluation_result(&self) -> EvaluationResult {
        EvaluationResult::Integer(i64::from(*self), None)
    }
}

impl IntoEvaluationResult for Decimal {
    fn to_evaluation_result(&self) -> EvaluationResult {
        EvaluationResult::Decimal(*self, None)
    }
}

impl<T: IntoEvaluationResult> IntoEvaluationResult for Option<T> {
    fn to_evaluation_result(&self) -> EvaluationResult {
        match self {
            Some(value) => value.to_evaluation_result(),
            None => EvaluationResult::Empty,
        }
    }
}

impl<T: IntoEvaluationResult> IntoEvaluationResult for Vec<T> {
    fn to_evaluation_result(&self) -> EvaluationResult {
        EvaluationResult::from_items(self.iter().map(T::to_evaluation_result).collect())
    }
}
