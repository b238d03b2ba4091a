//! Recursive evaluator for the SQL-on-FHIR FHIRPath dialect.
//!
//! Evaluation is a pure walk over the parsed [`Expression`] tree. All state
//! lives in the [`EvaluationContext`] plus an explicit `current_item`
//! parameter carrying the focus inside `where`/`select` lambdas and
//! `forEach` scopes, so the evaluator is trivially reentrant: one validated
//! expression can serve any number of concurrent callers.
//!
//! Everything is a sequence. Scalars are one-element sequences, absent
//! fields evaluate to the empty sequence, and navigation over a sequence
//! applies element-wise and flattens.

use std::collections::HashMap;

use rust_decimal::Decimal;
use tabula_fhir::FhirResource;
use tabula_fhirpath_support::{EvaluationError, EvaluationResult, IntoEvaluationResult};

use crate::keys;
use crate::parser::{Expression, Invocation, Literal, Term};
use crate::polymorphic;

/// The environment an expression is evaluated in.
///
/// Holds the root resource (the default focus), an optional override focus
/// for iteration scopes, and named `%variables`. Validated views substitute
/// constants into expression text before compilation, so the variable table
/// is normally empty; it exists for hosts driving the evaluator directly.
pub struct EvaluationContext {
    resource: EvaluationResult,
    /// Focus override: when set, bare member navigation and `$this` resolve
    /// against this value instead of the root resource.
    pub this: Option<EvaluationResult>,
    variables: HashMap<String, EvaluationResult>,
}

impl EvaluationContext {
    /// Context focused on an already-converted value tree.
    pub fn new(resource: EvaluationResult) -> Self {
        Self {
            resource,
            this: None,
            variables: HashMap::new(),
        }
    }

    /// Context focused on a FHIR resource.
    pub fn for_resource(resource: &FhirResource) -> Self {
        Self::new(resource.to_evaluation_result())
    }

    /// The root resource value.
    pub fn resource(&self) -> &EvaluationResult {
        &self.resource
    }

    /// Binds a `%name` variable.
    pub fn set_variable_result(&mut self, name: &str, value: EvaluationResult) {
        self.variables.insert(name.to_string(), value);
    }

    fn variable(&self, name: &str) -> Option<&EvaluationResult> {
        self.variables.get(name)
    }
}

/// Evaluates `expr` against the context.
///
/// `current_item` overrides the focus for the duration of this evaluation;
/// `where`/`select` bind it per element, and the row generator binds it to
/// the current `forEach` iteration value.
pub fn evaluate(
    expr: &Expression,
    context: &EvaluationContext,
    current_item: Option<&EvaluationResult>,
) -> Result<EvaluationResult, EvaluationError> {
    match expr {
        Expression::Term(term) => evaluate_term(term, context, current_item),
        Expression::Invocation(base, invocation) => {
            let base = evaluate(base, context, current_item)?;
            apply_invocation(base, invocation, context, current_item)
        }
        Expression::Indexer(base, index) => {
            let base = evaluate(base, context, current_item)?;
            let index = evaluate(index, context, current_item)?;
            apply_index(base, index)
        }
        Expression::Inequality(left, op, right) => {
            let left = evaluate(left, context, current_item)?;
            let right = evaluate(right, context, current_item)?;
            apply_inequality(op, left, right)
        }
        Expression::Equality(left, op, right) => {
            let left = evaluate(left, context, current_item)?;
            let right = evaluate(right, context, current_item)?;
            apply_equality(op, left, right)
        }
        Expression::And(left, right) => {
            let left = evaluate(left, context, current_item)?.to_boolean("'and' operand")?;
            let right = evaluate(right, context, current_item)?.to_boolean("'and' operand")?;
            Ok(match (left, right) {
                (Some(false), _) | (_, Some(false)) => EvaluationResult::Boolean(false, None),
                (Some(true), Some(true)) => EvaluationResult::Boolean(true, None),
                _ => EvaluationResult::Empty,
            })
        }
        Expression::Or(left, right) => {
            let left = evaluate(left, context, current_item)?.to_boolean("'or' operand")?;
            let right = evaluate(right, context, current_item)?.to_boolean("'or' operand")?;
            Ok(match (left, right) {
                (Some(true), _) | (_, Some(true)) => EvaluationResult::Boolean(true, None),
                (Some(false), Some(false)) => EvaluationResult::Boolean(false, None),
                _ => EvaluationResult::Empty,
            })
        }
    }
}

fn focus_of<'a>(
    context: &'a EvaluationContext,
    current_item: Option<&'a EvaluationResult>,
) -> &'a EvaluationResult {
    current_item
        .or(context.this.as_ref())
        .unwrap_or(&context.resource)
}

fn evaluate_term(
    term: &Term,
    context: &EvaluationContext,
    current_item: Option<&EvaluationResult>,
) -> Result<EvaluationResult, EvaluationError> {
    match term {
        Term::Literal(literal) => Ok(literal_value(literal)),
        Term::ExternalConstant(name) => context
            .variable(name)
            .cloned()
            .ok_or_else(|| EvaluationError::UndefinedVariable(format!("%{}", name))),
        Term::Invocation(invocation) => {
            let focus = focus_of(context, current_item).clone();
            apply_invocation(focus, invocation, context, current_item)
        }
        Term::Parenthesized(inner) => evaluate(inner, context, current_item),
    }
}

fn literal_value(literal: &Literal) -> EvaluationResult {
    match literal {
        Literal::Empty => EvaluationResult::Empty,
        Literal::Boolean(b) => EvaluationResult::Boolean(*b, None),
        Literal::String(s) => EvaluationResult::String(s.clone(), None),
        Literal::Integer(i) => EvaluationResult::Integer(*i, None),
        Literal::Number(d) => EvaluationResult::Decimal(*d, None),
        Literal::Date(s) => EvaluationResult::Date(s.clone(), None),
        Literal::DateTime(s) => EvaluationResult::DateTime(s.clone(), None),
        Literal::Time(s) => EvaluationResult::Time(s.clone(), None),
    }
}

fn apply_invocation(
    base: EvaluationResult,
    invocation: &Invocation,
    context: &EvaluationContext,
    current_item: Option<&EvaluationResult>,
) -> Result<EvaluationResult, EvaluationError> {
    match invocation {
        Invocation::This => Ok(base),
        Invocation::Member(name) => Ok(navigate_member(&base, name)),
        Invocation::Function(name, args) => call_function(name, args, base, context, current_item),
    }
}

/// Member navigation. A leading resource-type segment (`Condition.id` on a
/// Condition) denotes the resource itself.
fn navigate_member(base: &EvaluationResult, name: &str) -> EvaluationResult {
    if name.starts_with(|c: char| c.is_ascii_uppercase()) {
        if let EvaluationResult::Object { map, .. } = base {
            if matches!(map.get("resourceType"), Some(EvaluationResult::String(rt, _)) if rt == name)
            {
                return base.clone();
            }
        }
    }
    navigate(base, name)
}

fn navigate(value: &EvaluationResult, name: &str) -> EvaluationResult {
    match value {
        EvaluationResult::Object { map, .. } => {
            polymorphic::access_member(map, name).unwrap_or(EvaluationResult::Empty)
        }
        EvaluationResult::Collection { items, .. } => EvaluationResult::from_items(
            items
                .iter()
                .flat_map(|item| navigate(item, name).into_items())
                .collect(),
        ),
        _ => EvaluationResult::Empty,
    }
}

fn expect_arity(name: &str, args: &[Expression], allowed: &[usize]) -> Result<(), EvaluationError> {
    if allowed.contains(&args.len()) {
        return Ok(());
    }
    let expected = allowed
        .iter()
        .map(|n| n.to_string())
        .collect::<Vec<_>>()
        .join(" or ");
    Err(EvaluationError::InvalidArity(format!(
        "Function '{}' expects {} arguments, got {}",
        name,
        expected,
        args.len()
    )))
}

fn call_function(
    name: &str,
    args: &[Expression],
    base: EvaluationResult,
    context: &EvaluationContext,
    current_item: Option<&EvaluationResult>,
) -> Result<EvaluationResult, EvaluationError> {
    match name {
        "exists" => {
            expect_arity(name, args, &[0])?;
            Ok(EvaluationResult::Boolean(!base.is_empty(), None))
        }
        "empty" => {
            expect_arity(name, args, &[0])?;
            Ok(EvaluationResult::Boolean(base.is_empty(), None))
        }
        "count" => {
            expect_arity(name, args, &[0])?;
            Ok(EvaluationResult::Integer(base.count() as i64, None))
        }
        "first" => {
            expect_arity(name, args, &[0])?;
            let mut items = base.into_items();
            Ok(if items.is_empty() {
                EvaluationResult::Empty
            } else {
                items.remove(0)
            })
        }
        "last" => {
            expect_arity(name, args, &[0])?;
            Ok(base.into_items().pop().unwrap_or(EvaluationResult::Empty))
        }
        "not" => {
            expect_arity(name, args, &[0])?;
            Ok(match base.to_boolean("not()")? {
                Some(b) => EvaluationResult::Boolean(!b, None),
                None => EvaluationResult::Empty,
            })
        }
        "where" => {
            expect_arity(name, args, &[1])?;
            let mut kept = Vec::new();
            for item in base.into_items() {
                let verdict = evaluate(&args[0], context, Some(&item))?;
                if verdict.to_boolean("where() predicate")? == Some(true) {
                    kept.push(item);
                }
            }
            Ok(EvaluationResult::from_items(kept))
        }
        "select" => {
            expect_arity(name, args, &[1])?;
            let mut projected = Vec::new();
            for item in base.into_items() {
                let value = evaluate(&args[0], context, Some(&item))?;
                projected.extend(value.into_items());
            }
            Ok(EvaluationResult::from_items(projected))
        }
        "join" => {
            expect_arity(name, args, &[0, 1])?;
            let separator = match args.first() {
                Some(arg) => {
                    let value = evaluate(arg, context, current_item)?
                        .into_singleton("join() separator")?;
                    match value.as_ref().and_then(EvaluationResult::string_value) {
                        Some(s) => s,
                        None => {
                            return Err(EvaluationError::TypeError(
                                "join() separator must be a string".to_string(),
                            ));
                        }
                    }
                }
                None => String::new(),
            };
            let mut parts = Vec::new();
            for item in base.into_items() {
                match item.string_value() {
                    Some(s) => parts.push(s),
                    None => {
                        return Err(EvaluationError::TypeError(format!(
                            "join() requires primitive items, found {}",
                            item.type_name()
                        )));
                    }
                }
            }
            Ok(EvaluationResult::String(parts.join(&separator), None))
        }
        "toString" => {
            expect_arity(name, args, &[0])?;
            Ok(match base.into_singleton("toString()")? {
                Some(value) => match value.string_value() {
                    Some(s) => EvaluationResult::String(s, None),
                    None => EvaluationResult::Empty,
                },
                None => EvaluationResult::Empty,
            })
        }
        "ofType" => {
            expect_arity(name, args, &[1])?;
            let type_name = type_argument(&args[0]).ok_or_else(|| {
                EvaluationError::TypeError("ofType() requires a type name argument".to_string())
            })?;
            Ok(EvaluationResult::from_items(
                base.into_items()
                    .into_iter()
                    .filter(|item| matches_type(item, &type_name))
                    .collect(),
            ))
        }
        "getResourceKey" => {
            expect_arity(name, args, &[0])?;
            Ok(EvaluationResult::from_items(
                base.into_items()
                    .iter()
                    .flat_map(|item| keys::resource_key(item).into_items())
                    .collect(),
            ))
        }
        "getReferenceKey" => {
            expect_arity(name, args, &[0, 1])?;
            let type_filter = match args.first() {
                Some(arg) => Some(type_argument(arg).ok_or_else(|| {
                    EvaluationError::TypeError(
                        "getReferenceKey() filter must be a type name".to_string(),
                    )
                })?),
                None => None,
            };
            Ok(EvaluationResult::from_items(
                base.into_items()
                    .iter()
                    .flat_map(|item| {
                        keys::reference_key(item, type_filter.as_deref()).into_items()
                    })
                    .collect(),
            ))
        }
        other => Err(EvaluationError::UnknownFunction(other.to_string())),
    }
}

/// Reads a type name out of an argument expression without evaluating it.
/// Accepts a bare identifier (`dateTime`), a quoted name (`'Patient'`), or a
/// namespace-qualified identifier (`FHIR.dateTime`).
fn type_argument(expr: &Expression) -> Option<String> {
    match expr {
        Expression::Term(Term::Invocation(Invocation::Member(name))) => Some(name.clone()),
        Expression::Term(Term::Literal(Literal::String(name))) => Some(name.clone()),
        Expression::Invocation(base, Invocation::Member(name)) => match base.as_ref() {
            Expression::Term(Term::Invocation(Invocation::Member(namespace)))
                if namespace == "FHIR" || namespace == "System" =>
            {
                Some(name.clone())
            }
            _ => None,
        },
        _ => None,
    }
}

fn matches_type(item: &EvaluationResult, name: &str) -> bool {
    if let Some(info) = item.type_info() {
        return info.matches(name);
    }
    // Untagged values fall back to their representation kind.
    match (item, name) {
        (EvaluationResult::Boolean(..), "boolean") => true,
        (
            EvaluationResult::Integer(..),
            "integer" | "integer64" | "positiveInt" | "unsignedInt",
        ) => true,
        (EvaluationResult::Decimal(..), "decimal") => true,
        (
            EvaluationResult::String(..),
            "string" | "code" | "id" | "uri" | "url" | "uuid" | "oid" | "canonical" | "markdown"
            | "base64Binary",
        ) => true,
        (EvaluationResult::Date(..), "date") => true,
        (EvaluationResult::DateTime(..), "dateTime" | "instant") => true,
        (EvaluationResult::Time(..), "time") => true,
        _ => false,
    }
}

fn apply_index(
    base: EvaluationResult,
    index: EvaluationResult,
) -> Result<EvaluationResult, EvaluationError> {
    let index = match index.into_singleton("indexer")? {
        None => return Ok(EvaluationResult::Empty),
        Some(EvaluationResult::Integer(i, _)) => i,
        Some(other) => {
            return Err(EvaluationError::InvalidIndex(format!(
                "index must be an integer, found {}",
                other.type_name()
            )));
        }
    };
    if index < 0 {
        return Ok(EvaluationResult::Empty);
    }
    Ok(base
        .into_items()
        .into_iter()
        .nth(index as usize)
        .unwrap_or(EvaluationResult::Empty))
}

fn apply_equality(
    op: &str,
    left: EvaluationResult,
    right: EvaluationResult,
) -> Result<EvaluationResult, EvaluationError> {
    // Empty propagates: {} = x is {}
    if left.is_empty() || right.is_empty() {
        return Ok(EvaluationResult::Empty);
    }
    let left = left.into_items();
    let right = right.into_items();
    let equal = left.len() == right.len()
        && left
            .iter()
            .zip(right.iter())
            .all(|(a, b)| values_equal(a, b));
    Ok(EvaluationResult::Boolean(
        if op == "!=" { !equal } else { equal },
        None,
    ))
}

/// Value equality with the cross-representation bridges the dialect needs:
/// integers compare against decimals, and temporal values compare against
/// the plain strings untyped JSON navigation produces.
fn values_equal(a: &EvaluationResult, b: &EvaluationResult) -> bool {
    if a == b {
        return true;
    }
    match (a, b) {
        (EvaluationResult::Integer(i, _), EvaluationResult::Decimal(d, _))
        | (EvaluationResult::Decimal(d, _), EvaluationResult::Integer(i, _)) => {
            Decimal::from(*i) == d.normalize()
        }
        (
            EvaluationResult::Date(x, _) | EvaluationResult::DateTime(x, _)
            | EvaluationResult::Time(x, _),
            EvaluationResult::String(y, _),
        )
        | (
            EvaluationResult::String(y, _),
            EvaluationResult::Date(x, _) | EvaluationResult::DateTime(x, _)
            | EvaluationResult::Time(x, _),
        ) => x == y,
        (EvaluationResult::Date(x, _), EvaluationResult::DateTime(y, _))
        | (EvaluationResult::DateTime(x, _), EvaluationResult::Date(y, _)) => x == y,
        _ => false,
    }
}

fn apply_inequality(
    op: &str,
    left: EvaluationResult,
    right: EvaluationResult,
) -> Result<EvaluationResult, EvaluationError> {
    let left = left.into_singleton("comparison")?;
    let right = right.into_singleton("comparison")?;
    let (Some(left), Some(right)) = (left, right) else {
        return Ok(EvaluationResult::Empty);
    };
    let ordering = compare_values(&left, &right)?;
    let result = match op {
        "<" => ordering.is_lt(),
        "<=" => ordering.is_le(),
        ">" => ordering.is_gt(),
        ">=" => ordering.is_ge(),
        other => {
            return Err(EvaluationError::TypeError(format!(
                "unknown comparison operator '{}'",
                other
            )));
        }
    };
    Ok(EvaluationResult::Boolean(result, None))
}

fn compare_values(
    a: &EvaluationResult,
    b: &EvaluationResult,
) -> Result<std::cmp::Ordering, EvaluationError> {
    use EvaluationResult::*;
    match (a, b) {
        (Integer(x, _), Integer(y, _)) => Ok(x.cmp(y)),
        (Decimal(x, _), Decimal(y, _)) => Ok(x.cmp(y)),
        (Integer(x, _), Decimal(y, _)) => Ok(rust_decimal::Decimal::from(*x).cmp(y)),
        (Decimal(x, _), Integer(y, _)) => Ok(x.cmp(&rust_decimal::Decimal::from(*y))),
        (String(x, _), String(y, _)) => Ok(x.cmp(y)),
        // ISO temporal strings order lexicographically within one precision
        (
            Date(x, _) | DateTime(x, _) | Time(x, _) | String(x, _),
            Date(y, _) | DateTime(y, _) | Time(y, _) | String(y, _),
        ) => Ok(x.cmp(y)),
        _ => Err(EvaluationError::TypeError(format!(
            "Cannot compare {} and {}",
            a.type_name(),
            b.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_expression;
    use serde_json::json;
    use tabula_fhir::json_to_result;

    fn patient_context() -> EvaluationContext {
        EvaluationContext::new(json_to_result(&json!({
            "resourceType": "Patient",
            "id": "example",
            "active": true,
            "name": [
                {"use": "official", "family": "Chalmers", "given": ["Peter", "James"]},
                {"use": "usual", "given": ["Jim"]}
            ],
            "deceasedBoolean": false,
            "managingOrganization": {"reference": "Organization/org1"}
        })))
    }

    fn eval(expr: &str, context: &EvaluationContext) -> EvaluationResult {
        evaluate(&parse_expression(expr).unwrap(), context, None).unwrap()
    }

    #[test]
    fn navigates_and_flattens() {
        let ctx = patient_context();
        let given = eval("name.given", &ctx);
        assert_eq!(given.count(), 3);
        assert_eq!(
            eval("name.family", &ctx),
            EvaluationResult::String("Chalmers".into(), None)
        );
        assert_eq!(eval("telecom", &ctx), EvaluationResult::Empty);
    }

    #[test]
    fn leading_resource_type_is_the_resource() {
        let ctx = patient_context();
        assert_eq!(
            eval("Patient.id", &ctx),
            EvaluationResult::String("example".into(), None)
        );
        // A different resource type is just an absent member
        assert_eq!(eval("Observation.id", &ctx), EvaluationResult::Empty);
    }

    #[test]
    fn indexing_and_first_last() {
        let ctx = patient_context();
        assert_eq!(
            eval("name.given[0]", &ctx),
            EvaluationResult::String("Peter".into(), None)
        );
        assert_eq!(
            eval("name.given.last()", &ctx),
            EvaluationResult::String("Jim".into(), None)
        );
        assert_eq!(eval("name.given[9]", &ctx), EvaluationResult::Empty);
    }

    #[test]
    fn where_binds_this_per_element() {
        let ctx = patient_context();
        let official = eval("name.where(use = 'official').family", &ctx);
        assert_eq!(official, EvaluationResult::String("Chalmers".into(), None));
        let none = eval("name.where(use = 'maiden')", &ctx);
        assert_eq!(none, EvaluationResult::Empty);
    }

    #[test]
    fn select_projects_and_flattens() {
        let ctx = patient_context();
        let joined = eval("name.select(given.join(' '))", &ctx);
        assert_eq!(joined.count(), 2);
    }

    #[test]
    fn exists_empty_count() {
        let ctx = patient_context();
        assert_eq!(
            eval("name.exists()", &ctx),
            EvaluationResult::Boolean(true, None)
        );
        assert_eq!(
            eval("telecom.empty()", &ctx),
            EvaluationResult::Boolean(true, None)
        );
        assert_eq!(eval("name.count()", &ctx), EvaluationResult::Integer(2, None));
    }

    #[test]
    fn choice_navigation_with_of_type() {
        let ctx = patient_context();
        assert_eq!(
            eval("deceased.ofType(boolean)", &ctx),
            EvaluationResult::Boolean(false, None)
        );
        assert_eq!(eval("deceased.ofType(dateTime)", &ctx), EvaluationResult::Empty);
    }

    #[test]
    fn reference_and_resource_keys() {
        let ctx = patient_context();
        assert_eq!(
            eval("getResourceKey()", &ctx),
            EvaluationResult::String("example".into(), None)
        );
        assert_eq!(
            eval("managingOrganization.getReferenceKey(Organization)", &ctx),
            EvaluationResult::String("org1".into(), None)
        );
        assert_eq!(
            eval("managingOrganization.getReferenceKey(Patient)", &ctx),
            EvaluationResult::Empty
        );
    }

    #[test]
    fn boolean_operators_are_three_valued() {
        let ctx = patient_context();
        assert_eq!(
            eval("active = true and name.exists()", &ctx),
            EvaluationResult::Boolean(true, None)
        );
        assert_eq!(
            eval("active = false and telecom.exists()", &ctx),
            EvaluationResult::Boolean(false, None)
        );
        // unknown and true stays unknown
        assert_eq!(eval("(telecom = 'x') and active", &ctx), EvaluationResult::Empty);
    }

    #[test]
    fn equality_propagates_empty() {
        let ctx = patient_context();
        assert_eq!(eval("telecom = 'phone'", &ctx), EvaluationResult::Empty);
        assert_eq!(
            eval("active != false", &ctx),
            EvaluationResult::Boolean(true, None)
        );
    }

    #[test]
    fn comparisons_require_compatible_singletons() {
        let ctx = patient_context();
        assert_eq!(
            eval("name.count() > 1", &ctx),
            EvaluationResult::Boolean(true, None)
        );
        let err = evaluate(
            &parse_expression("active > 1").unwrap(),
            &ctx,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, EvaluationError::TypeError(_)));
        let err = evaluate(&parse_expression("name.given > 'A'").unwrap(), &ctx, None).unwrap_err();
        assert!(matches!(err, EvaluationError::SingletonRequired(_)));
    }

    #[test]
    fn unknown_functions_are_rejected() {
        let ctx = patient_context();
        let err = evaluate(&parse_expression("name.aggregate()").unwrap(), &ctx, None).unwrap_err();
        assert_eq!(err, EvaluationError::UnknownFunction("aggregate".into()));
        let err = evaluate(&parse_expression("name.first(1)").unwrap(), &ctx, None).unwrap_err();
        assert!(matches!(err, EvaluationError::InvalidArity(_)));
    }

    #[test]
    fn external_constants_resolve_from_variables() {
        let mut ctx = patient_context();
        ctx.set_variable_result("wanted", EvaluationResult::String("official".into(), None));
        assert_eq!(
            eval("name.where(use = %wanted).family", &ctx),
            EvaluationResult::String("Chalmers".into(), None)
        );
        let err = evaluate(&parse_expression("%missing").unwrap(), &ctx, None).unwrap_err();
        assert!(matches!(err, EvaluationError::UndefinedVariable(_)));
    }
}
