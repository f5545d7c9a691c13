use arrow_schema::DataType;
use flint_common::{AnalyzerConfig, FlintError, Result};

use crate::expr::{AttributeRef, Expr, LiteralValue};

/// Identifier matching primitive; all name comparisons in the analyzer go
/// through one of these.
#[derive(Debug, Clone, Copy)]
pub struct NameResolver {
    case_sensitive: bool,
}

impl NameResolver {
    pub fn new(case_sensitive: bool) -> Self {
        Self { case_sensitive }
    }

    pub fn from_config(config: &AnalyzerConfig) -> Self {
        Self::new(config.case_sensitive_analysis)
    }

    pub fn matches(&self, candidate: &str, query: &str) -> bool {
        if self.case_sensitive {
            candidate == query
        } else {
            candidate.eq_ignore_ascii_case(query)
        }
    }
}

/// Resolve a multi-part identifier against a set of candidate attributes.
///
/// Tries `qualifier.name` binding first, then bare `name`; any identifier
/// parts left over after the attribute match become nested field extractions
/// over the matched attribute, aliased to the innermost field name.
///
/// Returns `Ok(None)` when nothing matches (a later pass may still succeed),
/// and an ambiguity diagnostic listing the candidates when several do.
pub fn resolve_attribute(
    parts: &[String],
    attrs: &[AttributeRef],
    resolver: &NameResolver,
) -> Result<Option<Expr>> {
    if parts.is_empty() {
        return Ok(None);
    }

    let mut candidates: Vec<(&AttributeRef, &[String])> = Vec::new();
    if parts.len() >= 2 {
        for a in attrs {
            let qualifier_matches = a
                .qualifier
                .as_deref()
                .map(|q| resolver.matches(q, &parts[0]))
                .unwrap_or(false);
            if qualifier_matches && resolver.matches(&a.name, &parts[1]) {
                candidates.push((a, &parts[2..]));
            }
        }
    }
    if candidates.is_empty() {
        for a in attrs {
            if resolver.matches(&a.name, &parts[0]) {
                candidates.push((a, &parts[1..]));
            }
        }
    }

    match candidates.len() {
        0 => Ok(None),
        1 => {
            let (attr, nested) = candidates.remove(0);
            let mut expr = Expr::Attribute(attr.clone());
            for part in nested {
                expr = extract_value(expr, Expr::utf8(part.clone()), resolver)?;
            }
            if let Some(last) = nested.last() {
                expr = expr.alias(last.clone());
            }
            Ok(Some(expr))
        }
        _ => {
            let names: Vec<String> = candidates
                .iter()
                .map(|(a, _)| a.qualified_name())
                .collect();
            Err(FlintError::analysis(format!(
                "Reference '{}' is ambiguous, could be: {}.",
                parts.join("."),
                names.join(", ")
            )))
        }
    }
}

/// Bind an extraction over a resolved child to its typed getter, selected by
/// the child's data type.
pub fn extract_value(child: Expr, field: Expr, resolver: &NameResolver) -> Result<Expr> {
    match child.data_type()? {
        DataType::Struct(fields) => {
            let field_name = match &field {
                Expr::Literal {
                    value: LiteralValue::Utf8(name),
                    ..
                } => name.clone(),
                other => {
                    return Err(FlintError::analysis(format!(
                        "Field name should be a string literal, but it is {other:?}"
                    )))
                }
            };
            let matching: Vec<usize> = fields
                .iter()
                .enumerate()
                .filter(|(_, f)| resolver.matches(f.name(), &field_name))
                .map(|(i, _)| i)
                .collect();
            match matching.as_slice() {
                [] => Err(FlintError::analysis(format!(
                    "No such struct field {field_name} in {}",
                    fields
                        .iter()
                        .map(|f| f.name().clone())
                        .collect::<Vec<_>>()
                        .join(", ")
                ))),
                [ordinal] => Ok(Expr::GetStructField {
                    child: Box::new(child),
                    ordinal: *ordinal,
                    name: fields[*ordinal].name().clone(),
                }),
                _ => Err(FlintError::analysis(format!(
                    "Ambiguous reference to fields {field_name}"
                ))),
            }
        }
        DataType::Map(_, _) => Ok(Expr::GetMapValue {
            child: Box::new(child),
            key: Box::new(field),
        }),
        DataType::List(_) | DataType::LargeList(_) => {
            let index_type = field.data_type()?;
            if !matches!(
                index_type,
                DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64
            ) {
                return Err(FlintError::analysis(format!(
                    "Array index should be an integral type, but it is {index_type:?}"
                )));
            }
            Ok(Expr::GetArrayItem {
                child: Box::new(child),
                index: Box::new(field),
            })
        }
        other => Err(FlintError::analysis(format!(
            "Can't extract value from {} of type {other:?}",
            crate::explain::format_expr(&child)
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_schema::{DataType, Field, Fields};

    fn attrs() -> Vec<AttributeRef> {
        vec![
            AttributeRef::new("a", DataType::Int64, true).with_qualifier("t"),
            AttributeRef::new("B", DataType::Utf8, true).with_qualifier("t"),
            AttributeRef::new("a", DataType::Int64, true).with_qualifier("s"),
        ]
    }

    #[test]
    fn unqualified_unique_name_resolves() {
        let resolver = NameResolver::new(false);
        let out = resolve_attribute(&["b".to_string()], &attrs(), &resolver)
            .unwrap()
            .expect("resolved");
        match out {
            Expr::Attribute(a) => assert_eq!(a.name, "B"),
            other => panic!("expected attribute, got {other:?}"),
        }
    }

    #[test]
    fn case_sensitivity_is_honored() {
        let resolver = NameResolver::new(true);
        let out = resolve_attribute(&["b".to_string()], &attrs(), &resolver).unwrap();
        assert!(out.is_none());
    }

    #[test]
    fn qualifier_disambiguates() {
        let resolver = NameResolver::new(false);
        let err = resolve_attribute(&["a".to_string()], &attrs(), &resolver).unwrap_err();
        assert!(err.to_string().contains("ambiguous"), "{err}");

        let out = resolve_attribute(&["s".to_string(), "a".to_string()], &attrs(), &resolver)
            .unwrap()
            .expect("resolved");
        match out {
            Expr::Attribute(a) => assert_eq!(a.qualifier.as_deref(), Some("s")),
            other => panic!("expected attribute, got {other:?}"),
        }
    }

    #[test]
    fn extra_parts_become_struct_extraction() {
        let resolver = NameResolver::new(false);
        let nested = AttributeRef::new(
            "rec",
            DataType::Struct(Fields::from(vec![Field::new("x", DataType::Int64, true)])),
            true,
        )
        .with_qualifier("t");
        let out = resolve_attribute(
            &["rec".to_string(), "x".to_string()],
            &[nested],
            &resolver,
        )
        .unwrap()
        .expect("resolved");
        match out {
            Expr::Alias { child, name, .. } => {
                assert_eq!(name, "x");
                assert!(matches!(*child, Expr::GetStructField { ordinal: 0, .. }));
            }
            other => panic!("expected aliased extraction, got {other:?}"),
        }
    }

    #[test]
    fn missing_struct_field_is_an_error() {
        let resolver = NameResolver::new(false);
        let rec = Expr::Attribute(AttributeRef::new(
            "rec",
            DataType::Struct(Fields::from(vec![Field::new("x", DataType::Int64, true)])),
            true,
        ));
        let err = extract_value(rec, Expr::utf8("y"), &resolver).unwrap_err();
        assert!(err.to_string().contains("No such struct field"), "{err}");
    }
}
