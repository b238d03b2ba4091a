//! Serde data model for the ViewDefinition JSON profile.
//!
//! These are the raw deserialized shapes, before validation. Unknown JSON
//! fields are ignored for forward compatibility, and every field is optional
//! at this layer — the validator, not serde, decides what is required so
//! that error messages can carry a breadcrumb to the offending element.

use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawViewDefinition {
    pub name: Option<String>,
    pub resource: Option<String>,
    #[serde(default)]
    pub fhir_version: Vec<String>,
    #[serde(default)]
    pub constant: Vec<RawConstant>,
    #[serde(default, rename = "where")]
    pub where_: Vec<RawWhere>,
    #[serde(default)]
    pub select: Vec<RawSelect>,
    pub description: Option<String>,
    /// Carried by the profile; the engine accepts and ignores it.
    #[allow(dead_code)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawSelect {
    #[serde(default)]
    pub column: Vec<RawColumn>,
    #[serde(default)]
    pub select: Vec<RawSelect>,
    pub for_each: Option<String>,
    pub for_each_or_null: Option<String>,
    #[serde(default)]
    pub union_all: Vec<RawSelect>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawColumn {
    pub path: Option<String>,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub type_: Option<String>,
    pub collection: Option<bool>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawWhere {
    pub path: Option<String>,
    #[allow(dead_code)]
    pub description: Option<String>,
}

/// A named constant with its `value[x]` choice.
///
/// Exactly one of the value members must be set; the validator rejects
/// anything else. `valueInteger64` is kept as a raw JSON value because the
/// profile serialises it as a string.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawConstant {
    pub name: Option<String>,
    pub value_base64_binary: Option<String>,
    pub value_boolean: Option<bool>,
    pub value_canonical: Option<String>,
    pub value_code: Option<String>,
    pub value_date: Option<String>,
    pub value_date_time: Option<String>,
    pub value_decimal: Option<serde_json::Number>,
    pub value_id: Option<String>,
    pub value_instant: Option<String>,
    pub value_integer: Option<i64>,
    pub value_integer64: Option<serde_json::Value>,
    pub value_oid: Option<String>,
    pub value_positive_int: Option<i64>,
    pub value_string: Option<String>,
    pub value_time: Option<String>,
    pub value_unsigned_int: Option<i64>,
    pub value_uri: Option<String>,
    pub value_url: Option<String>,
    pub value_uuid: Option<String>,
}
