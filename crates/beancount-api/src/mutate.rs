use serde::{Deserialize, Serialize};

use crate::filter::{FilterError, JmesPathFilter, StructuralFilter};
use crate::model::Directive;
use crate::search::DirectiveSearcher;

/// Which stage of a [`Mutator`] runs first.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    Filter,
    Search,
}

/// A request to narrow a directive collection by a structural filter and a full-text search.
///
/// Either stage is skipped when its expression is absent or empty.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mutator {
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub priority: Priority,
}

impl Mutator {
    pub fn new(filter: Option<String>, search: Option<String>, priority: Priority) -> Self {
        Mutator {
            filter,
            search,
            priority,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.filter_expression().is_none() && self.search_expression().is_none()
    }

    pub fn mutate(&self, data: Vec<Directive>) -> Result<Vec<Directive>, FilterError> {
        self.mutate_with(&JmesPathFilter, data)
    }

    pub fn mutate_with(
        &self,
        filter: &impl StructuralFilter,
        data: Vec<Directive>,
    ) -> Result<Vec<Directive>, FilterError> {
        match self.priority {
            Priority::Filter => Ok(self.search(self.filter(filter, data)?)),
            Priority::Search => self.filter(filter, self.search(data)),
        }
    }

    fn filter(
        &self,
        filter: &impl StructuralFilter,
        data: Vec<Directive>,
    ) -> Result<Vec<Directive>, FilterError> {
        match self.filter_expression() {
            Some(expression) => filter.filter(expression, data),
            None => Ok(data),
        }
    }

    fn search(&self, data: Vec<Directive>) -> Vec<Directive> {
        match self.search_expression() {
            Some(query) => DirectiveSearcher::new(data).search(query),
            None => data,
        }
    }

    fn filter_expression(&self) -> Option<&str> {
        self.filter.as_deref().filter(|s| !s.trim().is_empty())
    }

    fn search_expression(&self) -> Option<&str> {
        self.search.as_deref().filter(|s| !s.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Ledger;
    use crate::model::{DirectiveContent, DirectiveType, Note};

    const SOURCE: &str = r#"
2024-01-01 open Assets:Checking USD
2024-01-01 open Expenses:Groceries
2024-01-01 open Expenses:Home

2024-01-10 * "Home Depot" "Paint"
    Assets:Checking  -30.25 USD
    Expenses:Home

2024-01-15 * "John" "For groceries"
    Assets:Checking  -50.00 USD
    Expenses:Groceries

2024-01-20 * "Home Depot" "Screws"
    Assets:Checking  -4.10 USD
    Expenses:Home
"#;

    fn entries() -> Vec<Directive> {
        let ledger = Ledger::from_source(SOURCE);
        assert!(ledger.errors().is_empty(), "{:?}", ledger.errors());

        let mut entries = ledger.entries().to_vec();
        entries.push(Directive::new(
            "2024-01-31".parse().unwrap(),
            DirectiveContent::Note(Note {
                account: "Expenses:Home".to_string(),
                comment: "Home Depot refund pending".to_string(),
            }),
        ));
        entries
    }

    fn mutator(filter: Option<&str>, search: Option<&str>, priority: Priority) -> Mutator {
        Mutator::new(
            filter.map(str::to_string),
            search.map(str::to_string),
            priority,
        )
    }

    #[test]
    fn passthrough() {
        let entries = entries();

        let result = Mutator::default().mutate(entries.clone()).unwrap();
        assert_eq!(result, entries);

        let result = mutator(Some(""), Some("  "), Priority::Search)
            .mutate(entries.clone())
            .unwrap();
        assert_eq!(result, entries);
        assert!(mutator(Some(""), None, Priority::Filter).is_noop());
    }

    #[test]
    fn filter_only() {
        let entries = entries();
        let result = mutator(Some("[?ty == 'Open']"), None, Priority::Filter)
            .mutate(entries.clone())
            .unwrap();

        assert_eq!(result, entries[..3]);
        assert!(
            result
                .iter()
                .all(|d| d.directive_type() == DirectiveType::Open)
        );
    }

    #[test]
    fn search_only() {
        let entries = entries();
        let result = mutator(None, Some("Home Depot"), Priority::Filter)
            .mutate(entries.clone())
            .unwrap();

        assert_eq!(result, [entries[3].clone(), entries[5].clone(), entries[6].clone()]);
    }

    #[test]
    fn filter_and_search() {
        let entries = entries();
        let result = mutator(Some("[?ty == 'Transaction']"), Some("home depot"), Priority::Filter)
            .mutate(entries.clone())
            .unwrap();

        assert_eq!(result, [entries[3].clone(), entries[5].clone()]);
    }

    #[test]
    fn empty_filter_result_is_empty_collection() {
        let result = mutator(Some("[?ty == 'Price']"), Some("home"), Priority::Filter)
            .mutate(entries())
            .unwrap();
        assert!(result.is_empty());

        let result = mutator(Some("[?ty == 'Price']"), Some("home"), Priority::Search)
            .mutate(entries())
            .unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn priority_changes_results() {
        let entries = entries();
        let filter_first = mutator(Some("[:4]"), Some("depot"), Priority::Filter)
            .mutate(entries.clone())
            .unwrap();
        let search_first = mutator(Some("[:4]"), Some("depot"), Priority::Search)
            .mutate(entries.clone())
            .unwrap();

        // the first four entries hold one matching transaction
        assert_eq!(filter_first, [entries[3].clone()]);
        // at most four matches
        assert_eq!(
            search_first,
            [entries[3].clone(), entries[5].clone(), entries[6].clone()]
        );
    }

    struct TakeLast;

    impl StructuralFilter for TakeLast {
        fn filter(
            &self,
            _expression: &str,
            mut directives: Vec<Directive>,
        ) -> Result<Vec<Directive>, FilterError> {
            Ok(directives.pop().into_iter().collect())
        }
    }

    #[test]
    fn custom_filter() {
        let entries = entries();

        let result = mutator(Some("last"), Some("groceries"), Priority::Filter)
            .mutate_with(&TakeLast, entries.clone())
            .unwrap();
        assert!(result.is_empty());

        let result = mutator(Some("last"), Some("groceries"), Priority::Search)
            .mutate_with(&TakeLast, entries.clone())
            .unwrap();
        assert_eq!(result, [entries[4].clone()]);
    }

    #[test]
    fn malformed_filter_is_an_error() {
        let error = mutator(Some("[?ty =="), None, Priority::Filter)
            .mutate(entries())
            .unwrap_err();

        assert!(matches!(error, FilterError::Compile { .. }));
    }

    #[test]
    fn deserializes_from_query_params() {
        let mutator: Mutator =
            serde_json::from_value(serde_json::json!({"search": "depot", "priority": "search"}))
                .unwrap();

        assert_eq!(mutator.filter, None);
        assert_eq!(mutator.search.as_deref(), Some("depot"));
        assert_eq!(mutator.priority, Priority::Search);
    }
}
