//! Full-text search over ledger entries.
//!
//! An inverted index maps each token to the set of entry IDs whose text contains it. A query
//! matches the entries that contain *every* query token.

use std::collections::{BTreeSet, HashMap};

use crate::model::{Directive, DirectiveContent};

/// An inverted index over a list of `(text, object)` pairs.
///
/// Entry IDs are assigned densely from 0 in input order. The index is read-only once built.
pub struct FullTextSearch<T> {
    entries: Vec<T>,
    index: HashMap<String, BTreeSet<usize>>,
}

impl<T> FullTextSearch<T> {
    pub fn new(items: impl IntoIterator<Item = (String, T)>) -> Self {
        let mut search = FullTextSearch {
            entries: Vec::new(),
            index: HashMap::new(),
        };
        for (text, entry) in items {
            search.index_entry(&text, entry);
        }
        search
    }

    fn index_entry(&mut self, text: &str, entry: T) {
        let id = self.entries.len();
        self.entries.push(entry);

        for token in tokenize(text) {
            self.index.entry(token).or_default().insert(id);
        }
    }

    /// Returns the entries containing all tokens of `query`, in input order.
    ///
    /// A query without any tokens matches nothing.
    pub fn search(&self, query: &str) -> Vec<&T> {
        self.search_ids(query)
            .into_iter()
            .map(|id| &self.entries[id])
            .collect()
    }

    fn search_ids(&self, query: &str) -> BTreeSet<usize> {
        let mut sets = Vec::new();
        for token in tokenize(query) {
            match self.index.get(&token) {
                Some(ids) => sets.push(ids),
                // a token nobody has empties the intersection
                None => return BTreeSet::new(),
            }
        }

        sets.sort_by_key(|ids| ids.len());
        let mut sets = sets.into_iter();
        let Some(first) = sets.next() else {
            return BTreeSet::new();
        };
        sets.fold(first.clone(), |acc, ids| {
            acc.intersection(ids).copied().collect()
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Splits text on whitespace, lowercases each word and strips ASCII punctuation from it.
/// Words made up entirely of punctuation produce no token.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|word| {
            word.chars()
                .filter(|c| !c.is_ascii_punctuation())
                .flat_map(char::to_lowercase)
                .collect::<String>()
        })
        .filter(|token| !token.is_empty())
        .collect()
}

/// The text a directive is found by, or `None` for directives that are never indexed.
pub fn searchable_text(directive: &Directive) -> Option<String> {
    let text = match &directive.content {
        DirectiveContent::Balance(balance) => balance.account.clone(),
        DirectiveContent::Close(close) => close.account.clone(),
        DirectiveContent::Commodity(commodity) => commodity.currency.clone(),
        DirectiveContent::Custom(_) => return None,
        DirectiveContent::Document(document) => {
            let mut s = format!("{} {}", document.account, document.filename.replace('/', " "));
            append_joined(&mut s, &document.links);
            append_joined(&mut s, &document.tags);
            s
        }
        DirectiveContent::Event(event) => format!("{} {}", event.kind, event.description),
        DirectiveContent::Note(note) => format!("{} {}", note.account, note.comment),
        DirectiveContent::Open(open) => {
            let mut s = open.account.clone();
            append_joined(&mut s, &open.currencies);
            s
        }
        DirectiveContent::Pad(pad) => format!("{} {}", pad.account, pad.source_account),
        DirectiveContent::Price(price) => price.currency.clone(),
        DirectiveContent::Query(query) => format!("{} {}", query.name, query.query_string),
        DirectiveContent::Transaction(txn) => {
            let mut s = txn.narration.clone();
            if let Some(payee) = txn.payee.as_deref().filter(|p| !p.is_empty()) {
                s.push(' ');
                s.push_str(payee);
            }
            append_joined(&mut s, &txn.links);
            append_joined(&mut s, &txn.tags);
            s
        }
    };
    Some(text)
}

fn append_joined(s: &mut String, items: &BTreeSet<String>) {
    if !items.is_empty() {
        let items: Vec<_> = items.iter().map(String::as_str).collect();
        s.push(' ');
        s.push_str(&items.join(" "));
    }
}

/// Searches a collection of directives by their [`searchable_text`].
pub struct DirectiveSearcher {
    data: Vec<Directive>,
}

impl DirectiveSearcher {
    pub fn new(data: Vec<Directive>) -> Self {
        DirectiveSearcher { data }
    }

    /// The `(text, position)` seeds the index is built from.
    pub fn index(&self) -> Vec<(String, usize)> {
        self.data
            .iter()
            .enumerate()
            .filter_map(|(position, directive)| {
                searchable_text(directive).map(|text| (text, position))
            })
            .collect()
    }

    /// Returns the directives matching `query`, keeping their original order.
    pub fn search(self, query: &str) -> Vec<Directive> {
        let index = FullTextSearch::new(self.index());
        let hits: BTreeSet<usize> = index.search(query).into_iter().copied().collect();

        self.data
            .into_iter()
            .enumerate()
            .filter_map(|(position, directive)| hits.contains(&position).then_some(directive))
            .collect()
    }
}
