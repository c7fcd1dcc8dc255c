//! Structural filtering of directive collections with JMESPath expressions.

use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

use crate::model::Directive;

#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    #[error("invalid expression '{expression}': {message}")]
    Compile { expression: String, message: String },
    #[error("failed to evaluate expression '{expression}': {message}")]
    Evaluate { expression: String, message: String },
    #[error("expression '{expression}' must select directives, got {found}")]
    Shape { expression: String, found: String },
    #[error("failed to encode filter input")]
    Encode(#[from] serde_json::Error),
}

impl FilterError {
    /// Whether the error was caused by the expression rather than by the data.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, FilterError::Encode(_))
    }
}

/// Selects a subset of a directive collection by field values.
pub trait StructuralFilter {
    fn filter(
        &self,
        expression: &str,
        directives: Vec<Directive>,
    ) -> Result<Vec<Directive>, FilterError>;
}

/// Evaluates JMESPath expressions against the JSON form of the collection.
#[derive(Debug, Default, Clone, Copy)]
pub struct JmesPathFilter;

impl StructuralFilter for JmesPathFilter {
    fn filter(
        &self,
        expression: &str,
        directives: Vec<Directive>,
    ) -> Result<Vec<Directive>, FilterError> {
        let result = query(expression, &directives)?;

        let shape_error = |found: &Value| FilterError::Shape {
            expression: expression.to_string(),
            found: json_kind(found).to_string(),
        };
        let selected = match result {
            Value::Null | Value::Bool(false) => return Ok(Vec::new()),
            Value::Array(items) => items,
            object @ Value::Object(_) => vec![object],
            other => return Err(shape_error(&other)),
        };

        let positions: HashMap<&str, usize> = directives
            .iter()
            .enumerate()
            .filter(|(_, d)| !d.id.is_empty())
            .map(|(position, d)| (d.id.as_str(), position))
            .collect();

        selected
            .into_iter()
            .map(|item| {
                let directive: Directive =
                    serde_json::from_value(item.clone()).map_err(|_| shape_error(&item))?;
                // hand back the original so numbers keep their exact representation
                Ok(match positions.get(directive.id.as_str()) {
                    Some(&position) if directives[position].content_id() == directive.content_id() => {
                        directives[position].clone()
                    }
                    _ => directive,
                })
            })
            .collect()
    }
}

/// Evaluates `expression` against the JSON form of `data` and returns the raw result.
pub fn query(expression: &str, data: &impl Serialize) -> Result<Value, FilterError> {
    let compiled = jmespath::compile(expression).map_err(|error| FilterError::Compile {
        expression: expression.to_string(),
        message: error.to_string(),
    })?;

    let input = serde_json::to_value(data)?;
    let result = compiled
        .search(&input)
        .map_err(|error| FilterError::Evaluate {
            expression: expression.to_string(),
            message: error.to_string(),
        })?;

    Ok(serde_json::to_value(&*result)?)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Ledger;

    const SOURCE: &str = r#"
2024-01-01 open Assets:Checking USD
2024-01-01 open Expenses:Groceries
2024-01-01 open Expenses:Home

2024-01-15 * "John" "For groceries"
    Assets:Checking  -50.00 USD
    Expenses:Groceries

2024-01-20 * "Home Depot" "Paint"
    Assets:Checking  -30.25 USD
    Expenses:Home
"#;

    fn entries() -> Vec<Directive> {
        Ledger::from_source(SOURCE).entries().to_vec()
    }

    #[test]
    fn selects_by_type() {
        let entries = entries();
        let result = JmesPathFilter
            .filter("[?ty == 'Open']", entries.clone())
            .unwrap();

        assert_eq!(result, entries[..3]);
    }

    #[test]
    fn keeps_exact_numbers() {
        let entries = entries();
        let result = JmesPathFilter
            .filter("[?ty == 'Transaction']", entries.clone())
            .unwrap();

        assert_eq!(result.len(), 2);
        assert_eq!(result[1].to_string(), entries[4].to_string());
    }

    #[test]
    fn no_match_is_empty() {
        let result = JmesPathFilter.filter("[?ty == 'Price']", entries()).unwrap();
        assert!(result.is_empty());

        let result = JmesPathFilter.filter("missing", entries()).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn single_object_is_wrapped() {
        let entries = entries();
        let result = JmesPathFilter.filter("[0]", entries.clone()).unwrap();

        assert_eq!(result, [entries[0].clone()]);
    }

    #[test]
    fn rejects_non_directive_results() {
        let error = JmesPathFilter.filter("length(@)", entries()).unwrap_err();
        assert!(matches!(error, FilterError::Shape { .. }), "{error}");

        let error = JmesPathFilter.filter("[*].ty", entries()).unwrap_err();
        assert!(matches!(error, FilterError::Shape { .. }), "{error}");
    }

    #[test]
    fn malformed_expression() {
        let error = JmesPathFilter.filter("[?ty == ", entries()).unwrap_err();

        let FilterError::Compile { expression, .. } = &error else {
            panic!("expected a compile error, got {error:?}");
        };
        assert_eq!(expression, "[?ty == ");
        assert!(error.is_client_error());
    }

    #[test]
    fn raw_query() {
        let ledger = Ledger::from_source(SOURCE);

        assert_eq!(
            query("keys(accounts)", &ledger).unwrap(),
            serde_json::json!(["Assets:Checking", "Expenses:Groceries", "Expenses:Home"])
        );
        assert_eq!(
            query("length(entries)", &ledger).unwrap().as_f64(),
            Some(5.0)
        );
    }
}
