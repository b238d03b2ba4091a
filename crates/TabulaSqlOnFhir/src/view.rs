//! ViewDefinition parsing, validation, and compilation.
//!
//! A [`ViewDefinition`] is immutable once built. `parse` runs the whole
//! pipeline: deserialize, resolve constants into every path, validate names
//! and structure, compile each path to its AST, and compute the output
//! schema. Nothing is re-parsed at apply time, and no partially-validated
//! view is ever exposed.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use tabula_fhir::{FhirResource, FhirVersion};
use tabula_fhir_path::{Expression, parse_expression};

use crate::SofError;
use crate::constants::{constant_literal, substitute_constants};
use crate::model::{RawSelect, RawViewDefinition};
use crate::rows::{Row, RowSet, apply_view};
use crate::schema::{ColumnInfo, Schema, infer_column_type};

/// Identifier shape shared by view names, column names, and constant names.
static SQL_NAME: Lazy<Regex> = Lazy::new(|| Regex::new("^[A-Za-z][A-Za-z0-9_]*$").unwrap());

/// Knobs for [`ViewDefinition::parse`].
#[derive(Debug, Clone)]
pub struct ParseOptions {
    /// Require a sql-name `name` on the view. On by default; turn off for
    /// ad-hoc definitions that exist only inside one process.
    pub check_name: bool,
    /// FHIR version the caller intends to run against. When set, it must be
    /// a recognised version and, if the view declares `fhirVersion`, one the
    /// view supports.
    pub fhir_version: Option<String>,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            check_name: true,
            fhir_version: None,
        }
    }
}

/// A validated, compiled ViewDefinition.
///
/// Construction goes through [`ViewDefinition::parse`] (or `parse_file` /
/// `from_json`); afterwards the view is read-only and can be shared freely
/// across threads — every `apply` owns its transient state.
#[derive(Debug, Clone)]
pub struct ViewDefinition {
    name: Option<String>,
    resource: String,
    fhir_versions: Vec<FhirVersion>,
    description: Option<String>,
    schema: Arc<Schema>,
    wheres: Vec<CompiledWhere>,
    selects: Vec<CompiledSelect>,
}

#[derive(Debug, Clone)]
pub(crate) struct CompiledWhere {
    pub path: String,
    pub expr: Expression,
}

#[derive(Debug, Clone)]
pub(crate) struct CompiledColumn {
    pub name: String,
    pub path: String,
    /// Position in the view schema (and in every emitted row).
    pub index: usize,
    pub collection: bool,
    pub expr: Expression,
}

#[derive(Debug, Clone)]
pub(crate) struct CompiledIterator {
    pub path: String,
    pub expr: Expression,
    /// `forEachOrNull` instead of `forEach`: an empty iteration produces one
    /// all-null row instead of none.
    pub or_null: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct CompiledSelect {
    pub columns: Vec<CompiledColumn>,
    pub selects: Vec<CompiledSelect>,
    pub iterator: Option<CompiledIterator>,
    pub union_all: Vec<CompiledSelect>,
}

// Parsed-but-not-yet-indexed tree; column positions are only known once the
// whole schema exists.
struct ParsedColumn {
    name: String,
    path: String,
    expr: Expression,
    declared_type: Option<String>,
    collection: bool,
    description: Option<String>,
}

struct ParsedSelect {
    columns: Vec<ParsedColumn>,
    selects: Vec<ParsedSelect>,
    iterator: Option<CompiledIterator>,
    union_all: Vec<ParsedSelect>,
}

impl ViewDefinition {
    /// Parses and validates a ViewDefinition from JSON text.
    pub fn parse(json_text: &str, options: ParseOptions) -> Result<Self, SofError> {
        let raw: RawViewDefinition = serde_json::from_str(json_text)?;
        Self::validate_and_compile(raw, &options)
    }

    /// Parses and validates a ViewDefinition from an already-parsed JSON
    /// value.
    pub fn from_json(value: serde_json::Value, options: ParseOptions) -> Result<Self, SofError> {
        let raw: RawViewDefinition = serde_json::from_value(value)?;
        Self::validate_and_compile(raw, &options)
    }

    /// Reads and parses a ViewDefinition from a file.
    pub fn parse_file(path: impl AsRef<Path>, options: ParseOptions) -> Result<Self, SofError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text, options)
    }

    /// The view's name, when present.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The resource type this view applies to.
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Declared FHIR version compatibility; empty means unconstrained.
    pub fn fhir_versions(&self) -> &[FhirVersion] {
        &self.fhir_versions
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// The ordered output schema.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Projects one resource into rows.
    ///
    /// Resources of a different type contribute no rows, as do resources
    /// rejected by the view's `where` predicates. Evaluation errors surface
    /// per resource and leave the view untouched.
    pub fn apply(&self, resource: &FhirResource) -> Result<Vec<Row>, SofError> {
        apply_view(self, resource)
    }

    /// Projects a batch of resources, concatenating their rows in input
    /// order.
    pub fn apply_all<'a>(
        &self,
        resources: impl IntoIterator<Item = &'a FhirResource>,
    ) -> Result<RowSet, SofError> {
        let mut rows = Vec::new();
        for resource in resources {
            rows.extend(self.apply(resource)?);
        }
        Ok(RowSet::new(Arc::clone(&self.schema), rows))
    }

    pub(crate) fn schema_arc(&self) -> Arc<Schema> {
        Arc::clone(&self.schema)
    }

    pub(crate) fn wheres(&self) -> &[CompiledWhere] {
        &self.wheres
    }

    pub(crate) fn selects(&self) -> &[CompiledSelect] {
        &self.selects
    }

    fn validate_and_compile(
        raw: RawViewDefinition,
        options: &ParseOptions,
    ) -> Result<Self, SofError> {
        let resource = raw
            .resource
            .as_deref()
            .filter(|r| !r.is_empty())
            .ok_or_else(|| {
                SofError::InvalidViewDefinition(
                    "ViewDefinition.resource is required and must be non-empty".to_string(),
                )
            })?
            .to_string();

        if options.check_name {
            match raw.name.as_deref() {
                None => {
                    return Err(SofError::InvalidViewDefinition(
                        "ViewDefinition.name is required".to_string(),
                    ));
                }
                Some(name) if !SQL_NAME.is_match(name) => {
                    return Err(SofError::InvalidViewDefinition(format!(
                        "ViewDefinition.name '{}' is not a valid sql name",
                        name
                    )));
                }
                Some(_) => {}
            }
        }

        let fhir_versions = resolve_fhir_versions(&raw.fhir_version, options)?;

        // Constant table: names validated here, values rendered as FHIRPath
        // literals ready for substitution.
        let mut constants: HashMap<String, String> = HashMap::new();
        for (i, constant) in raw.constant.iter().enumerate() {
            let name = constant
                .name
                .as_deref()
                .filter(|n| !n.is_empty())
                .ok_or_else(|| {
                    SofError::InvalidViewDefinition(format!("constant[{}] is missing a name", i))
                })?;
            if !SQL_NAME.is_match(name) {
                return Err(SofError::InvalidViewDefinition(format!(
                    "constant name '{}' is not a valid sql name",
                    name
                )));
            }
            let literal = constant_literal(constant, name)?;
            if constants.insert(name.to_string(), literal).is_some() {
                return Err(SofError::InvalidViewDefinition(format!(
                    "duplicate constant name '{}'",
                    name
                )));
            }
        }

        if raw.select.is_empty() {
            return Err(SofError::InvalidViewDefinition(
                "ViewDefinition must have at least one select".to_string(),
            ));
        }

        let mut wheres = Vec::new();
        for (i, clause) in raw.where_.iter().enumerate() {
            let breadcrumb = format!("where[{}]", i);
            let path = clause
                .path
                .as_deref()
                .filter(|p| !p.is_empty())
                .ok_or_else(|| {
                    SofError::InvalidViewDefinition(format!("{} is missing a path", breadcrumb))
                })?;
            let path = substitute_constants(path, &constants, &breadcrumb)?;
            let expr = compile_path(&path, &breadcrumb)?;
            wheres.push(CompiledWhere { path, expr });
        }

        let mut parsed_selects = Vec::new();
        for (i, select) in raw.select.iter().enumerate() {
            parsed_selects.push(parse_select(
                select,
                &constants,
                &format!("select[{}]", i),
            )?);
        }

        // Schema: pre-order fold with global duplicate detection and
        // unionAll branch equality.
        let mut seen = HashSet::new();
        let mut columns = Vec::new();
        for (i, select) in parsed_selects.iter().enumerate() {
            columns.extend(schema_of_select(
                select,
                &mut seen,
                &format!("select[{}]", i),
            )?);
        }
        if columns.is_empty() {
            return Err(SofError::InvalidViewDefinition(
                "ViewDefinition defines no columns".to_string(),
            ));
        }
        let schema = Arc::new(Schema::new(columns));

        let selects = parsed_selects
            .into_iter()
            .map(|select| compile_select(select, &schema))
            .collect();

        debug!(
            name = raw.name.as_deref().unwrap_or("<unnamed>"),
            resource = %resource,
            columns = schema.len(),
            "validated ViewDefinition"
        );

        Ok(Self {
            name: raw.name,
            resource,
            fhir_versions,
            description: raw.description,
            schema,
            wheres,
            selects,
        })
    }
}

fn resolve_fhir_versions(
    declared: &[String],
    options: &ParseOptions,
) -> Result<Vec<FhirVersion>, SofError> {
    let mut versions = Vec::new();
    for value in declared {
        let version = FhirVersion::from_version_string(value)
            .ok_or_else(|| SofError::UnsupportedFhirVersion(value.clone()))?;
        if !versions.contains(&version) {
            versions.push(version);
        }
    }
    if let Some(requested) = &options.fhir_version {
        let requested_version = FhirVersion::from_version_string(requested)
            .ok_or_else(|| SofError::UnsupportedFhirVersion(requested.clone()))?;
        if !versions.is_empty() && !versions.contains(&requested_version) {
            return Err(SofError::InvalidViewDefinition(format!(
                "view does not support FHIR version {} ({})",
                requested, requested_version
            )));
        }
    }
    Ok(versions)
}

fn compile_path(path: &str, breadcrumb: &str) -> Result<Expression, SofError> {
    parse_expression(path).map_err(|e| SofError::ParseError(format!("in {}: {}", breadcrumb, e)))
}

fn parse_select(
    raw: &RawSelect,
    constants: &HashMap<String, String>,
    breadcrumb: &str,
) -> Result<ParsedSelect, SofError> {
    if raw.for_each.is_some() && raw.for_each_or_null.is_some() {
        return Err(SofError::InvalidViewDefinition(format!(
            "{} sets both forEach and forEachOrNull",
            breadcrumb
        )));
    }
    let iterator = match (&raw.for_each, &raw.for_each_or_null) {
        (Some(path), None) => Some(compile_iterator(path, false, constants, breadcrumb)?),
        (None, Some(path)) => Some(compile_iterator(path, true, constants, breadcrumb)?),
        _ => None,
    };

    let mut columns = Vec::new();
    for (i, column) in raw.column.iter().enumerate() {
        let crumb = format!("{}.column[{}]", breadcrumb, i);
        let name = column
            .name
            .as_deref()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| {
                SofError::InvalidViewDefinition(format!("{} is missing a name", crumb))
            })?;
        if !SQL_NAME.is_match(name) {
            return Err(SofError::InvalidViewDefinition(format!(
                "column name '{}' at {} is not a valid sql name",
                name, crumb
            )));
        }
        let path = column
            .path
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| {
                SofError::InvalidViewDefinition(format!(
                    "{} '{}' is missing a path",
                    crumb, name
                ))
            })?;
        let path = substitute_constants(path, constants, &crumb)?;
        let expr = compile_path(&path, &crumb)?;
        columns.push(ParsedColumn {
            name: name.to_string(),
            path,
            expr,
            declared_type: column.type_.clone(),
            collection: column.collection.unwrap_or(false),
            description: column.description.clone(),
        });
    }

    let mut selects = Vec::new();
    for (i, child) in raw.select.iter().enumerate() {
        selects.push(parse_select(
            child,
            constants,
            &format!("{}.select[{}]", breadcrumb, i),
        )?);
    }

    let mut union_all = Vec::new();
    for (i, branch) in raw.union_all.iter().enumerate() {
        union_all.push(parse_select(
            branch,
            constants,
            &format!("{}.unionAll[{}]", breadcrumb, i),
        )?);
    }

    Ok(ParsedSelect {
        columns,
        selects,
        iterator,
        union_all,
    })
}

fn compile_iterator(
    path: &str,
    or_null: bool,
    constants: &HashMap<String, String>,
    breadcrumb: &str,
) -> Result<CompiledIterator, SofError> {
    let crumb = format!(
        "{}.{}",
        breadcrumb,
        if or_null { "forEachOrNull" } else { "forEach" }
    );
    if path.is_empty() {
        return Err(SofError::InvalidViewDefinition(format!(
            "{} must not be empty",
            crumb
        )));
    }
    let path = substitute_constants(path, constants, &crumb)?;
    let expr = compile_path(&path, &crumb)?;
    Ok(CompiledIterator {
        path,
        expr,
        or_null,
    })
}

fn schema_of_select(
    select: &ParsedSelect,
    seen: &mut HashSet<String>,
    breadcrumb: &str,
) -> Result<Vec<ColumnInfo>, SofError> {
    let mut columns = Vec::new();
    for column in &select.columns {
        if !seen.insert(column.name.clone()) {
            return Err(SofError::InvalidViewDefinition(format!(
                "duplicate column name '{}' at {}",
                column.name, breadcrumb
            )));
        }
        let fhir_type = column
            .declared_type
            .clone()
            .or_else(|| infer_column_type(&column.expr))
            .unwrap_or_else(|| "string".to_string());
        columns.push(ColumnInfo {
            name: column.name.clone(),
            fhir_type,
            collection: column.collection,
            description: column.description.clone(),
        });
    }

    for (i, child) in select.selects.iter().enumerate() {
        columns.extend(schema_of_select(
            child,
            seen,
            &format!("{}.select[{}]", breadcrumb, i),
        )?);
    }

    if !select.union_all.is_empty() {
        // Branches deliberately reuse each other's names, so each is checked
        // against a private copy of the seen set; only the first branch's
        // columns join the schema.
        let mut branch_schemas = Vec::new();
        for (i, branch) in select.union_all.iter().enumerate() {
            let mut branch_seen = seen.clone();
            branch_schemas.push(schema_of_select(
                branch,
                &mut branch_seen,
                &format!("{}.unionAll[{}]", breadcrumb, i),
            )?);
        }
        for (i, other) in branch_schemas.iter().enumerate().skip(1) {
            if !schemas_match(&branch_schemas[0], other) {
                return Err(SofError::InvalidViewDefinition(format!(
                    "unionAll branch {} at {} does not match the first branch \
                     (column names, order, types, and collection flags must agree)",
                    i, breadcrumb
                )));
            }
        }
        let first = branch_schemas.remove(0);
        for column in &first {
            seen.insert(column.name.clone());
        }
        columns.extend(first);
    }

    Ok(columns)
}

/// Branch compatibility ignores descriptions; names, order, types, and
/// collection flags must agree.
fn schemas_match(a: &[ColumnInfo], b: &[ColumnInfo]) -> bool {
    a.len() == b.len()
        && a.iter().zip(b).all(|(x, y)| {
            x.name == y.name && x.fhir_type == y.fhir_type && x.collection == y.collection
        })
}

fn compile_select(parsed: ParsedSelect, schema: &Schema) -> CompiledSelect {
    CompiledSelect {
        columns: parsed
            .columns
            .into_iter()
            .map(|column| {
                let index = schema
                    .index_of(&column.name)
                    .expect("validated column is present in the schema");
                CompiledColumn {
                    name: column.name,
                    path: column.path,
                    index,
                    collection: column.collection,
                    expr: column.expr,
                }
            })
            .collect(),
        selects: parsed
            .selects
            .into_iter()
            .map(|child| compile_select(child, schema))
            .collect(),
        iterator: parsed.iterator,
        union_all: parsed
            .union_all
            .into_iter()
            .map(|branch| compile_select(branch, schema))
            .collect(),
    }
}
