//! Universal value type for FHIRPath evaluation.
//!
//! Every FHIRPath expression produces a sequence of values. A scalar is a
//! one-element sequence and an absent field is the empty sequence, so the
//! evaluator works exclusively in terms of [`EvaluationResult`] and the
//! helpers here that move between the scalar and sequence views.

use indexmap::IndexMap;
use rust_decimal::Decimal;

pub use crate::evaluation_error::EvaluationError;
use crate::type_info::TypeInfoResult;

/// A value produced by evaluating a FHIRPath expression.
///
/// Dates, datetimes, and times are carried as their ISO string forms without
/// the FHIRPath `@` / `@T` literal prefixes; precision handling beyond string
/// comparison is out of dialect. Complex FHIR values keep their field order
/// from the source document.
#[derive(Debug, Clone)]
pub enum EvaluationResult {
    /// The empty sequence. Absent fields, failed filters, and unmatched
    /// type tests all land here.
    Empty,
    Boolean(bool, Option<TypeInfoResult>),
    String(String, Option<TypeInfoResult>),
    Integer(i64, Option<TypeInfoResult>),
    Decimal(Decimal, Option<TypeInfoResult>),
    /// Date in `YYYY[-MM[-DD]]` form.
    Date(String, Option<TypeInfoResult>),
    /// DateTime in ISO 8601 form with optional timezone.
    DateTime(String, Option<TypeInfoResult>),
    /// Time in `HH[:mm[:ss]]` form.
    Time(String, Option<TypeInfoResult>),
    /// Ordered sequence of values. Never nested by construction: the
    /// evaluator flattens when it builds one.
    Collection {
        items: Vec<EvaluationResult>,
        type_info: Option<TypeInfoResult>,
    },
    /// A complex FHIR value (resource, datatype, or backbone element) as an
    /// insertion-ordered field map.
    Object {
        map: IndexMap<String, EvaluationResult>,
        type_info: Option<TypeInfoResult>,
    },
}

impl EvaluationResult {
    /// Builds the canonical sequence form for `items`: empty sequence for
    /// zero values, the value itself for one, a collection otherwise.
    pub fn from_items(mut items: Vec<EvaluationResult>) -> EvaluationResult {
        match items.len() {
            0 => EvaluationResult::Empty,
            1 => items.remove(0),
            _ => EvaluationResult::Collection {
                items,
                type_info: None,
            },
        }
    }

    /// Views this value as a sequence of items, consuming it.
    pub fn into_items(self) -> Vec<EvaluationResult> {
        match self {
            EvaluationResult::Empty => Vec::new(),
            EvaluationResult::Collection { items, .. } => items,
            single => vec![single],
        }
    }

    /// Number of items in the sequence view.
    pub fn count(&self) -> usize {
        match self {
            EvaluationResult::Empty => 0,
            EvaluationResult::Collection { items, .. } => items.len(),
            _ => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Unwraps a sequence known to hold at most one value.
    ///
    /// `Ok(None)` for the empty sequence; an error when more than one item
    /// is present. `what` names the operation for the error message.
    pub fn into_singleton(self, what: &str) -> Result<Option<EvaluationResult>, EvaluationError> {
        match self {
            EvaluationResult::Empty => Ok(None),
            EvaluationResult::Collection { mut items, .. } => match items.len() {
                0 => Ok(None),
                1 => Ok(Some(items.remove(0))),
                n => Err(EvaluationError::SingletonRequired(format!(
                    "{} expects a singleton, found {} items",
                    what, n
                ))),
            },
            single => Ok(Some(single)),
        }
    }

    /// Strict boolean coercion: empty is `None`, a boolean singleton is its
    /// value, anything else is a type error.
    pub fn to_boolean(&self, what: &str) -> Result<Option<bool>, EvaluationError> {
        match self {
            EvaluationResult::Empty => Ok(None),
            EvaluationResult::Boolean(b, _) => Ok(Some(*b)),
            EvaluationResult::Collection { items, .. } => match items.as_slice() {
                [] => Ok(None),
                [EvaluationResult::Boolean(b, _)] => Ok(Some(*b)),
                _ => Err(EvaluationError::TypeError(format!(
                    "{} requires a boolean singleton, found a collection of {} items",
                    what,
                    items.len()
                ))),
            },
            other => Err(EvaluationError::TypeError(format!(
                "{} requires a boolean, found {}",
                what,
                other.type_name()
            ))),
        }
    }

    /// The type tag carried by this value, if any.
    pub fn type_info(&self) -> Option<&TypeInfoResult> {
        match self {
            EvaluationResult::Empty => None,
            EvaluationResult::Boolean(_, t)
            | EvaluationResult::String(_, t)
            | EvaluationResult::Integer(_, t)
            | EvaluationResult::Decimal(_, t)
            | EvaluationResult::Date(_, t)
            | EvaluationResult::DateTime(_, t)
            | EvaluationResult::Time(_, t)
            | EvaluationResult::Collection { type_info: t, .. }
            | EvaluationResult::Object { type_info: t, .. } => t.as_ref(),
        }
    }

    /// Replaces the type tag, returning the retagged value.
    pub fn with_type(self, type_info: TypeInfoResult) -> EvaluationResult {
        let tag = Some(type_info);
        match self {
            EvaluationResult::Empty => EvaluationResult::Empty,
            EvaluationResult::Boolean(v, _) => EvaluationResult::Boolean(v, tag),
            EvaluationResult::String(v, _) => EvaluationResult::String(v, tag),
            EvaluationResult::Integer(v, _) => EvaluationResult::Integer(v, tag),
            EvaluationResult::Decimal(v, _) => EvaluationResult::Decimal(v, tag),
            EvaluationResult::Date(v, _) => EvaluationResult::Date(v, tag),
            EvaluationResult::DateTime(v, _) => EvaluationResult::DateTime(v, tag),
            EvaluationResult::Time(v, _) => EvaluationResult::Time(v, tag),
            EvaluationResult::Collection { items, .. } => EvaluationResult::Collection {
                items,
                type_info: tag,
            },
            EvaluationResult::Object { map, .. } => EvaluationResult::Object {
                map,
                type_info: tag,
            },
        }
    }

    /// The variant name, for error messages. Prefers the FHIR type tag when
    /// one is attached.
    pub fn type_name(&self) -> &str {
        if let Some(info) = self.type_info() {
            return &info.name;
        }
        match self {
            EvaluationResult::Empty => "Empty",
            EvaluationResult::Boolean(..) => "Boolean",
            EvaluationResult::String(..) => "String",
            EvaluationResult::Integer(..) => "Integer",
            EvaluationResult::Decimal(..) => "Decimal",
            EvaluationResult::Date(..) => "Date",
            EvaluationResult::DateTime(..) => "DateTime",
            EvaluationResult::Time(..) => "Time",
            EvaluationResult::Collection { .. } => "Collection",
            EvaluationResult::Object { .. } => "Object",
        }
    }

    /// String rendering used by `join()`, `toString()`, and tabular output.
    /// Complex values have no string form.
    pub fn string_value(&self) -> Option<String> {
        match self {
            EvaluationResult::String(s, _)
            | EvaluationResult::Date(s, _)
            | EvaluationResult::DateTime(s, _)
            | EvaluationResult::Time(s, _) => Some(s.clone()),
            EvaluationResult::Boolean(b, _) => Some(b.to_string()),
            EvaluationResult::Integer(i, _) => Some(i.to_string()),
            EvaluationResult::Decimal(d, _) => Some(d.to_string()),
            _ => None,
        }
    }
}

/// Equality follows FHIRPath value semantics: decimals are normalized before
/// comparison, collections compare item-wise in order, objects compare as
/// maps, and cross-variant comparisons are `false`.
impl PartialEq for EvaluationResult {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (EvaluationResult::Empty, EvaluationResult::Empty) => true,
            (EvaluationResult::Boolean(a, _), EvaluationResult::Boolean(b, _)) => a == b,
            (EvaluationResult::String(a, _), EvaluationResult::String(b, _)) => a == b,
            (EvaluationResult::Integer(a, _), EvaluationResult::Integer(b, _)) => a == b,
            (EvaluationResult::Decimal(a, _), EvaluationResult::Decimal(b, _)) => {
                a.normalize() == b.normalize()
            }
            (EvaluationResult::Date(a, _), EvaluationResult::Date(b, _)) => a == b,
            (EvaluationResult::DateTime(a, _), EvaluationResult::DateTime(b, _)) => a == b,
            (EvaluationResult::Time(a, _), EvaluationResult::Time(b, _)) => a == b,
            (
                EvaluationResult::Collection { items: a, .. },
                EvaluationResult::Collection { items: b, .. },
            ) => a == b,
            (EvaluationResult::Object { map: a, .. }, EvaluationResult::Object { map: b, .. }) => {
                a == b
            }
            _ => false,
        }
    }
}

impl Eq for EvaluationResult {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_items_collapses_to_canonical_forms() {
        assert_eq!(
            EvaluationResult::from_items(vec![]),
            EvaluationResult::Empty
        );
        assert_eq!(
            EvaluationResult::from_items(vec![EvaluationResult::Integer(1, None)]),
            EvaluationResult::Integer(1, None)
        );
        assert_eq!(
            EvaluationResult::from_items(vec![
                EvaluationResult::Integer(1, None),
                EvaluationResult::Integer(2, None),
            ])
            .count(),
            2
        );
    }

    #[test]
    fn boolean_coercion_is_strict() {
        assert_eq!(EvaluationResult::Empty.to_boolean("test"), Ok(None));
        assert_eq!(
            EvaluationResult::Boolean(true, None).to_boolean("test"),
            Ok(Some(true))
        );
        assert!(
            EvaluationResult::String("yes".into(), None)
                .to_boolean("test")
                .is_err()
        );
    }

    #[test]
    fn decimal_equality_normalizes_precision() {
        use rust_decimal::Decimal;
        let a = EvaluationResult::Decimal(Decimal::new(100, 2), None); // 1.00
        let b = EvaluationResult::Decimal(Decimal::new(1, 0), None); // 1
        assert_eq!(a, b);
    }

    #[test]
    fn type_tag_survives_retagging() {
        let v = EvaluationResult::String("2020-05-01".into(), None)
            .with_type(TypeInfoResult::fhir("dateTime"));
        assert!(v.type_info().unwrap().matches("dateTime"));
        assert_eq!(v.type_name(), "dateTime");
    }
}
