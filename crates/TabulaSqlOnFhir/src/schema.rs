//! Output schema of a validated view.
//!
//! The schema is computed once, from the definition alone, before any
//! resource is seen: a pre-order walk of the select tree in which a select
//! contributes its own columns, then its nested selects, then its first
//! `unionAll` branch. Rows index into this order.

use std::collections::HashMap;

use tabula_fhir_path::{Expression, Invocation, Literal, Term};

/// One output column: name, FHIR type, and whether the cell holds a
/// (possibly empty) sequence rather than a scalar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub fhir_type: String,
    pub collection: bool,
    pub description: Option<String>,
}

/// The ordered column list of a view, with by-name lookup.
#[derive(Debug, Clone)]
pub struct Schema {
    columns: Vec<ColumnInfo>,
    index: HashMap<String, usize>,
}

impl Schema {
    pub(crate) fn new(columns: Vec<ColumnInfo>) -> Self {
        let index = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.clone(), i))
            .collect();
        Self { columns, index }
    }

    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Position of a column in row order.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }
}

/// Infers a column's FHIR type from its compiled path when the definition
/// does not declare one.
///
/// The path alone cannot always decide (bare navigation needs the resource's
/// structure definition, which is out of scope here), so the rules cover
/// what the expression itself reveals — literals, function return types, and
/// `ofType` filters — and the caller falls back to `string`.
pub(crate) fn infer_column_type(expr: &Expression) -> Option<String> {
    match expr {
        Expression::Term(Term::Literal(literal)) => Some(
            match literal {
                Literal::Empty => return None,
                Literal::Boolean(_) => "boolean",
                Literal::String(_) => "string",
                Literal::Integer(_) => "integer",
                Literal::Number(_) => "decimal",
                Literal::Date(_) => "date",
                Literal::DateTime(_) => "dateTime",
                Literal::Time(_) => "time",
            }
            .to_string(),
        ),
        Expression::Term(Term::Parenthesized(inner)) => infer_column_type(inner),
        Expression::Term(_) => None,
        Expression::Indexer(base, _) => infer_column_type(base),
        Expression::Equality(..)
        | Expression::Inequality(..)
        | Expression::And(..)
        | Expression::Or(..) => Some("boolean".to_string()),
        Expression::Invocation(base, invocation) => match invocation {
            Invocation::Function(name, args) => match name.as_str() {
                "count" => Some("integer".to_string()),
                "exists" | "empty" | "not" => Some("boolean".to_string()),
                "join" | "toString" => Some("string".to_string()),
                "getResourceKey" | "getReferenceKey" => Some("string".to_string()),
                "ofType" => args.first().and_then(type_name_of),
                "first" | "last" | "where" => infer_column_type(base),
                "select" => args.first().and_then(infer_column_type),
                _ => None,
            },
            Invocation::Member(_) | Invocation::This => None,
        },
    }
}

/// Syntactic type name of an `ofType(...)` argument.
fn type_name_of(expr: &Expression) -> Option<String> {
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
