//! Row generation: projecting one resource through a compiled select tree.
//!
//! The generator threads a focus value (the current `forEach` element, or
//! the resource itself) through the tree and expands a working set of
//! partial rows:
//!
//! - sibling selects multiply rows (each contributes disjoint columns, so
//!   the combination is a cross product, existing rows varying slowest),
//! - `forEach` over an empty sequence drops the rows of its scope,
//! - `forEachOrNull` over an empty sequence keeps exactly one fragment per
//!   incoming row with the whole subtree left null,
//! - `unionAll` branches each extend the accumulated fragments and their
//!   outputs are concatenated in branch order.
//!
//! Row order is fully determined by iteration order and branch order; cell
//! order is the schema order fixed at validation.

use std::sync::Arc;

use tracing::debug;

use tabula_fhir::FhirResource;
use tabula_fhir_path::evaluator::{EvaluationContext, evaluate};
use tabula_fhirpath_support::{EvaluationResult, IntoEvaluationResult};

use crate::SofError;
use crate::schema::Schema;
use crate::view::{CompiledColumn, CompiledSelect, ViewDefinition};

/// One output row of a view, indexed by the view's schema.
///
/// Cells are `None` for SQL null; `get` returns `None` both for null cells
/// and unknown column names.
#[derive(Debug, Clone)]
pub struct Row {
    schema: Arc<Schema>,
    values: Vec<Option<serde_json::Value>>,
}

impl Row {
    /// Looks a cell up by column name.
    pub fn get(&self, column: &str) -> Option<&serde_json::Value> {
        self.values
            .get(self.schema.index_of(column)?)?
            .as_ref()
    }

    /// Cells in schema order.
    pub fn values(&self) -> &[Option<serde_json::Value>] {
        &self.values
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// The row as a JSON object in schema order, nulls included.
    pub fn to_json(&self) -> serde_json::Value {
        let mut object = serde_json::Map::with_capacity(self.values.len());
        for (column, value) in self.schema.columns().iter().zip(&self.values) {
            object.insert(
                column.name.clone(),
                value.clone().unwrap_or(serde_json::Value::Null),
            );
        }
        serde_json::Value::Object(object)
    }
}

/// Rows produced by applying a view to a batch of resources.
#[derive(Debug, Clone)]
pub struct RowSet {
    schema: Arc<Schema>,
    rows: Vec<Row>,
}

impl RowSet {
    pub(crate) fn new(schema: Arc<Schema>, rows: Vec<Row>) -> Self {
        Self { schema, rows }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }
}

type PartialRow = Vec<Option<serde_json::Value>>;

/// Projects `resource` through `view`.
pub(crate) fn apply_view(
    view: &ViewDefinition,
    resource: &FhirResource,
) -> Result<Vec<Row>, SofError> {
    if resource.resource_type() != view.resource() {
        return Ok(Vec::new());
    }

    let context = EvaluationContext::new(resource.to_evaluation_result());

    for clause in view.wheres() {
        let verdict = evaluate(&clause.expr, &context, None).map_err(|e| {
            SofError::EvaluationError(format!("where '{}': {}", clause.path, e))
        })?;
        let truthy = verdict
            .to_boolean("where clause")
            .map_err(|e| SofError::EvaluationError(format!("where '{}': {}", clause.path, e)))?;
        if truthy != Some(true) {
            return Ok(Vec::new());
        }
    }

    let schema = view.schema_arc();
    let mut rows: Vec<PartialRow> = vec![vec![None; schema.len()]];
    for select in view.selects() {
        rows = expand_select(select, &context, None, rows)?;
    }

    debug!(
        resource = resource.resource_type(),
        id = resource.logical_id().unwrap_or("<no id>"),
        rows = rows.len(),
        "projected resource"
    );

    Ok(rows
        .into_iter()
        .map(|values| Row {
            schema: Arc::clone(&schema),
            values,
        })
        .collect())
}

/// Iteration element for one pass over a select.
enum IterItem {
    /// No iterator on this select: keep the inherited focus.
    Inherit,
    /// A `forEach`/`forEachOrNull` element becomes the focus.
    Node(EvaluationResult),
    /// `forEachOrNull` over an empty sequence: the whole subtree is null.
    Null,
}

fn expand_select(
    select: &CompiledSelect,
    context: &EvaluationContext,
    current: Option<&EvaluationResult>,
    rows: Vec<PartialRow>,
) -> Result<Vec<PartialRow>, SofError> {
    let elements: Vec<IterItem> = match &select.iterator {
        None => vec![IterItem::Inherit],
        Some(iterator) => {
            let value = evaluate(&iterator.expr, context, current).map_err(|e| {
                SofError::EvaluationError(format!(
                    "iterating '{}': {}",
                    iterator.path, e
                ))
            })?;
            let items = value.into_items();
            if items.is_empty() {
                if iterator.or_null {
                    vec![IterItem::Null]
                } else {
                    // forEach over nothing: this scope contributes no rows
                    return Ok(Vec::new());
                }
            } else {
                items.into_iter().map(IterItem::Node).collect()
            }
        }
    };

    let mut out = Vec::new();
    for row in &rows {
        for element in &elements {
            let focus = match element {
                IterItem::Inherit => current,
                IterItem::Node(value) => Some(value),
                IterItem::Null => {
                    // Null sentinel: nothing below this select evaluates;
                    // its columns were initialised null and stay null.
                    out.push(row.clone());
                    continue;
                }
            };

            let mut fragment = row.clone();
            for column in &select.columns {
                fragment[column.index] = evaluate_cell(column, context, focus)?;
            }

            let mut partial = vec![fragment];
            for child in &select.selects {
                partial = expand_select(child, context, focus, partial)?;
            }

            if !select.union_all.is_empty() {
                let mut unioned = Vec::new();
                for branch in &select.union_all {
                    unioned.extend(expand_select(branch, context, focus, partial.clone())?);
                }
                partial = unioned;
            }

            out.extend(partial);
        }
    }
    Ok(out)
}

fn evaluate_cell(
    column: &CompiledColumn,
    context: &EvaluationContext,
    focus: Option<&EvaluationResult>,
) -> Result<Option<serde_json::Value>, SofError> {
    let value = evaluate(&column.expr, context, focus).map_err(|e| {
        SofError::EvaluationError(format!(
            "column '{}' path '{}': {}",
            column.name, column.path, e
        ))
    })?;
    Ok(cell_value(value, column.collection))
}

/// Converts an evaluation result into a cell.
///
/// Collection columns always hold an array, empty included. Scalar columns
/// hold null for the empty sequence and otherwise the first element — a
/// multi-valued result is quietly truncated to its first element, never an
/// error; declaring the column single-valued is the author's contract.
fn cell_value(value: EvaluationResult, collection: bool) -> Option<serde_json::Value> {
    if collection {
        return Some(serde_json::Value::Array(
            value
                .into_items()
                .into_iter()
                .filter_map(value_to_json)
                .collect(),
        ));
    }
    value.into_items().into_iter().next().and_then(value_to_json)
}

fn value_to_json(value: EvaluationResult) -> Option<serde_json::Value> {
    match value {
        EvaluationResult::Empty => None,
        EvaluationResult::Boolean(b, _) => Some(serde_json::Value::Bool(b)),
        EvaluationResult::Integer(i, _) => Some(serde_json::Value::Number(i.into())),
        EvaluationResult::Decimal(d, _) => Some(decimal_to_json(d)),
        EvaluationResult::String(s, _)
        | EvaluationResult::Date(s, _)
        | EvaluationResult::DateTime(s, _)
        | EvaluationResult::Time(s, _) => Some(serde_json::Value::String(s)),
        EvaluationResult::Collection { items, .. } => Some(serde_json::Value::Array(
            items.into_iter().filter_map(value_to_json).collect(),
        )),
        EvaluationResult::Object { map, .. } => {
            let mut object = serde_json::Map::with_capacity(map.len());
            for (key, value) in map {
                if let Some(json) = value_to_json(value) {
                    object.insert(key, json);
                }
            }
            Some(serde_json::Value::Object(object))
        }
    }
}

fn decimal_to_json(d: rust_decimal::Decimal) -> serde_json::Value {
    use rust_decimal::prelude::ToPrimitive;
    if d.fract().is_zero() {
        if let Some(i) = d.to_i64() {
            return serde_json::Value::Number(i.into());
        }
    }
    match d.to_f64().and_then(serde_json::Number::from_f64) {
        Some(n) => serde_json::Value::Number(n),
        None => serde_json::Value::String(d.to_string()),
    }
}
