//! View constants: literal encoding and `%name` substitution.
//!
//! Constants are resolved once, at validation time. Each constant's single
//! `value[x]` member is rendered as the FHIRPath literal it stands for, and
//! every `%name` token in every path is replaced by that literal before the
//! path is compiled. A validated view therefore contains no unresolved
//! references, and re-running substitution on it is a no-op.

use std::collections::HashMap;

use crate::SofError;
use crate::model::RawConstant;

/// Renders a constant's value as a FHIRPath literal.
///
/// String-shaped members become quoted strings, temporal members become `@`
/// literals, numerics keep their textual form. Zero or more than one set
/// member is an error.
pub(crate) fn constant_literal(constant: &RawConstant, name: &str) -> Result<String, SofError> {
    let mut literals: Vec<String> = Vec::new();

    let quoted = [
        &constant.value_string,
        &constant.value_code,
        &constant.value_id,
        &constant.value_uri,
        &constant.value_url,
        &constant.value_uuid,
        &constant.value_oid,
        &constant.value_canonical,
        &constant.value_instant,
        &constant.value_base64_binary,
    ];
    for value in quoted.into_iter().flatten() {
        literals.push(quote_string(value));
    }
    for value in [&constant.value_date, &constant.value_date_time]
        .into_iter()
        .flatten()
    {
        literals.push(format!("@{}", value));
    }
    if let Some(value) = &constant.value_time {
        literals.push(format!("@T{}", value));
    }
    if let Some(value) = &constant.value_decimal {
        literals.push(value.to_string());
    }
    if let Some(value) = &constant.value_boolean {
        literals.push(value.to_string());
    }
    for value in [
        &constant.value_integer,
        &constant.value_positive_int,
        &constant.value_unsigned_int,
    ]
    .into_iter()
    .flatten()
    {
        literals.push(value.to_string());
    }
    if let Some(value) = &constant.value_integer64 {
        literals.push(integer64_literal(value, name)?);
    }

    match literals.len() {
        1 => Ok(literals.remove(0)),
        0 => Err(SofError::InvalidViewDefinition(format!(
            "constant '{}' has no value[x] member",
            name
        ))),
        n => Err(SofError::InvalidViewDefinition(format!(
            "constant '{}' has {} value[x] members, exactly one is allowed",
            name, n
        ))),
    }
}

/// The profile serialises integer64 as a JSON string; plain numbers are also
/// accepted.
fn integer64_literal(value: &serde_json::Value, name: &str) -> Result<String, SofError> {
    match value {
        serde_json::Value::Number(n) if n.is_i64() || n.is_u64() => Ok(n.to_string()),
        serde_json::Value::String(s) if !s.is_empty() && is_integer_text(s) => Ok(s.clone()),
        _ => Err(SofError::InvalidViewDefinition(format!(
            "constant '{}' has a malformed valueInteger64",
            name
        ))),
    }
}

fn is_integer_text(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

fn quote_string(value: &str) -> String {
    format!(
        "'{}'",
        value.replace('\\', "\\\\").replace('\'', "\\'")
    )
}

/// Replaces `%name` tokens in a path with their literal values.
///
/// Tokens inside single-quoted string literals are left alone; a `%` that
/// references a name missing from the table is an error carrying the
/// `breadcrumb` of the path being rewritten.
pub(crate) fn substitute_constants(
    path: &str,
    constants: &HashMap<String, String>,
    breadcrumb: &str,
) -> Result<String, SofError> {
    let mut out = String::with_capacity(path.len());
    let mut chars = path.chars().peekable();
    let mut in_string = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            match c {
                '\\' => {
                    // keep the escaped character verbatim
                    if let Some(escaped) = chars.next() {
                        out.push(escaped);
                    }
                }
                '\'' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '\'' => {
                in_string = true;
                out.push(c);
            }
            '%' => {
                let mut name = String::new();
                if matches!(chars.peek(), Some(c) if c.is_ascii_alphabetic()) {
                    while let Some(&next) = chars.peek() {
                        if next.is_ascii_alphanumeric() || next == '_' {
                            name.push(next);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                }
                if name.is_empty() {
                    out.push('%');
                    continue;
                }
                match constants.get(&name) {
                    Some(literal) => out.push_str(literal),
                    None => {
                        return Err(SofError::InvalidViewDefinition(format!(
                            "undefined constant %{} in {}",
                            name, breadcrumb
                        )));
                    }
                }
            }
            _ => out.push(c),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn encodes_each_value_family() {
        let mut c = RawConstant {
            name: Some("c".into()),
            ..Default::default()
        };
        c.value_string = Some("loinc".into());
        assert_eq!(constant_literal(&c, "c").unwrap(), "'loinc'");

        let mut c = RawConstant::default();
        c.value_integer = Some(5);
        assert_eq!(constant_literal(&c, "c").unwrap(), "5");

        let mut c = RawConstant::default();
        c.value_boolean = Some(true);
        assert_eq!(constant_literal(&c, "c").unwrap(), "true");

        let mut c = RawConstant::default();
        c.value_date_time = Some("2020-01-01T00:00:00Z".into());
        assert_eq!(constant_literal(&c, "c").unwrap(), "@2020-01-01T00:00:00Z");

        let mut c = RawConstant::default();
        c.value_time = Some("12:30:00".into());
        assert_eq!(constant_literal(&c, "c").unwrap(), "@T12:30:00");

        let mut c = RawConstant::default();
        c.value_decimal = Some(serde_json::Number::from_f64(1.25).unwrap());
        assert_eq!(constant_literal(&c, "c").unwrap(), "1.25");

        let mut c = RawConstant::default();
        c.value_integer64 = Some(serde_json::Value::String("9007199254740993".into()));
        assert_eq!(constant_literal(&c, "c").unwrap(), "9007199254740993");
    }

    #[test]
    fn quoting_escapes_embedded_quotes() {
        let mut c = RawConstant::default();
        c.value_string = Some("it's".into());
        assert_eq!(constant_literal(&c, "c").unwrap(), r"'it\'s'");
    }

    #[test]
    fn rejects_zero_and_multiple_values() {
        let c = RawConstant::default();
        assert!(matches!(
            constant_literal(&c, "c"),
            Err(SofError::InvalidViewDefinition(_))
        ));

        let mut c = RawConstant::default();
        c.value_string = Some("a".into());
        c.value_integer = Some(1);
        assert!(matches!(
            constant_literal(&c, "c"),
            Err(SofError::InvalidViewDefinition(_))
        ));
    }

    #[test]
    fn substitutes_tokens_outside_strings() {
        let constants = table(&[("threshold", "5"), ("system", "'http://loinc.org'")]);
        assert_eq!(
            substitute_constants("value.where($this > %threshold)", &constants, "where[0]")
                .unwrap(),
            "value.where($this > 5)"
        );
        assert_eq!(
            substitute_constants("coding.where(system = %system)", &constants, "where[0]")
                .unwrap(),
            "coding.where(system = 'http://loinc.org')"
        );
        // inside a string literal the token is plain text
        assert_eq!(
            substitute_constants("name = '%threshold'", &constants, "where[0]").unwrap(),
            "name = '%threshold'"
        );
    }

    #[test]
    fn substitution_is_idempotent_once_resolved() {
        let constants = table(&[("threshold", "5")]);
        let once =
            substitute_constants("value.where($this > %threshold)", &constants, "x").unwrap();
        let twice = substitute_constants(&once, &constants, "x").unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn missing_constants_are_errors() {
        let constants = table(&[]);
        let err = substitute_constants("a = %missing", &constants, "select[0].column[1]")
            .unwrap_err();
        match err {
            SofError::InvalidViewDefinition(msg) => {
                assert!(msg.contains("%missing"));
                assert!(msg.contains("select[0].column[1]"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
