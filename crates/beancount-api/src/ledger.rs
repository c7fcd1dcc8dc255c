//! An immutable, fully derived ledger snapshot.

use anyhow::Context;
use beancount_parser::Entry;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::model::{Amount, Cost, Directive, DirectiveContent, DirectiveType, Posting};
use crate::{Decimal, convert, scan, sorting};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub message: String,
}

impl LedgerError {
    pub fn new(source: Option<String>, message: impl Into<String>) -> Self {
        LedgerError {
            source,
            message: message.into(),
        }
    }
}

/// One lot held by an account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub units: Amount,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<Cost>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub name: String,
    pub open: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub close: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub currencies: BTreeSet<String>,
    /// Positions keyed by currency.
    pub balance: BTreeMap<String, Vec<Position>>,
    pub transactions: Vec<Directive>,
}

pub type Options = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ledger {
    entries: Vec<Directive>,
    errors: Vec<LedgerError>,
    options: Options,
    accounts: BTreeMap<String, Account>,
    #[serde(skip)]
    ids: HashMap<String, usize>,
}

impl Ledger {
    /// Builds a snapshot, deriving everything that is not part of the directive sequence itself.
    pub fn new(mut entries: Vec<Directive>, mut errors: Vec<LedgerError>, options: Options) -> Self {
        sorting::sort_dedup_directives(&mut entries);

        let mut ids = HashMap::with_capacity(entries.len());
        for (index, directive) in entries.iter_mut().enumerate() {
            directive.id = directive.content_id();
            ids.entry(directive.id.clone()).or_insert(index);
        }

        let accounts = derive_accounts(&entries, &mut errors);

        Ledger {
            entries,
            errors,
            options,
            accounts,
            ids,
        }
    }

    /// Parses ledger source text. Syntax errors are recorded rather than returned; includes are
    /// not followed.
    pub fn from_source(source: &str) -> Self {
        let mut builder = LedgerBuilder::default();
        builder.parse(source, None);
        builder.finish()
    }

    pub fn entries(&self) -> &[Directive] {
        &self.entries
    }

    pub fn errors(&self) -> &[LedgerError] {
        &self.errors
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn accounts(&self) -> &BTreeMap<String, Account> {
        &self.accounts
    }

    pub fn account(&self, name: &str) -> Option<&Account> {
        self.accounts.get(name)
    }

    pub fn by_id(&self, id: &str) -> Option<&Directive> {
        self.ids.get(id).map(|&index| &self.entries[index])
    }

    pub fn by_type(&self, ty: DirectiveType) -> impl Iterator<Item = &Directive> {
        self.entries
            .iter()
            .filter(move |directive| directive.directive_type() == ty)
    }

    pub fn by_account<'a>(&'a self, account: &'a str) -> impl Iterator<Item = &'a Directive> {
        self.entries
            .iter()
            .filter(move |directive| directive.touches_account(account))
    }
}

/// One file that fed into a loaded ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFile {
    pub path: PathBuf,
    /// The text that was parsed, or `None` when the file could not be read.
    pub contents: Option<String>,
}

/// The result of loading a ledger from disk: the snapshot and every file that fed into it.
pub struct LoadedLedger {
    pub ledger: Ledger,
    /// The entrypoint first, then includes in the order they were read.
    pub sources: Vec<SourceFile>,
}

impl LoadedLedger {
    pub fn files(&self) -> impl Iterator<Item = &Path> {
        self.sources.iter().map(|source| source.path.as_path())
    }
}

/// Reads the ledger rooted at `file`, following includes relative to the including file.
///
/// Paths are canonicalized before reading, so every file is read at most once and include
/// cycles end. An unreadable entrypoint is an error. Problems inside the ledger, including
/// unreadable includes, are recorded in [`Ledger::errors`].
pub fn load_file(file: impl AsRef<Path>) -> anyhow::Result<LoadedLedger> {
    let file = file.as_ref();
    let entrypoint = file
        .canonicalize()
        .and_then(|path| std::fs::read_to_string(&path).map(|source| (path, source)))
        .with_context(|| format!("Unable to locate beancount file at: {}", file.display()))?;

    let mut builder = LedgerBuilder::default();
    let mut sources = Vec::new();
    let mut seen = HashSet::from([entrypoint.0.clone()]);
    let mut pending = vec![entrypoint];

    while let Some((path, source)) = pending.pop() {
        let name = path.display().to_string();
        let includes = builder.parse(&source, Some(&name));
        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        sources.push(SourceFile {
            path,
            contents: Some(source),
        });

        for include in includes {
            let include = base_dir.join(include);
            let include = include.canonicalize().unwrap_or(include);
            if !seen.insert(include.clone()) {
                continue;
            }
            match std::fs::read_to_string(&include) {
                Ok(source) => pending.push((include, source)),
                Err(error) => {
                    builder.error(
                        Some(&name),
                        format!("Unable to read include {}: {error}", include.display()),
                    );
                    sources.push(SourceFile {
                        path: include,
                        contents: None,
                    });
                }
            }
        }
    }

    Ok(LoadedLedger {
        ledger: builder.finish(),
        sources,
    })
}

#[derive(Default)]
struct LedgerBuilder {
    entries: Vec<Directive>,
    errors: Vec<LedgerError>,
    options: Options,
}

impl LedgerBuilder {
    /// Parses one file and returns the includes it names, unresolved.
    fn parse(&mut self, source: &str, name: Option<&str>) -> Vec<PathBuf> {
        let mut includes = Vec::new();
        for entry in beancount_parser::parse_iter::<Decimal>(source) {
            match entry {
                Ok(Entry::Include(include)) => includes.push(include),
                Ok(entry) => self.push(entry, name),
                Err(error) => self.error(name, error.to_string()),
            }
        }

        let (directives, errors) = scan::scan(source);
        self.entries.extend(directives);
        for error in errors {
            self.error(name, format!("line {}: {}", error.line, error.message));
        }

        includes
    }

    fn push(&mut self, entry: Entry<Decimal>, source: Option<&str>) {
        match entry {
            Entry::Directive(parsed) => match convert::directive(&parsed) {
                Ok(Some(directive)) => self.entries.push(directive),
                Ok(None) => {}
                Err(error) => self.error(source, format!("{error:#}")),
            },
            Entry::Option(option) => self.option(option.name, option.value),
            _ => {}
        }
    }

    fn option(&mut self, name: String, value: String) {
        use serde_json::Value;

        match self.options.get_mut(&name) {
            None => {
                self.options.insert(name, Value::String(value));
            }
            Some(Value::Array(values)) => values.push(Value::String(value)),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, Value::String(value)]);
            }
        }
    }

    fn error(&mut self, source: Option<&str>, message: impl Into<String>) {
        self.errors
            .push(LedgerError::new(source.map(str::to_owned), message));
    }

    fn finish(self) -> Ledger {
        Ledger::new(self.entries, self.errors, self.options)
    }
}

fn derive_accounts(
    entries: &[Directive],
    errors: &mut Vec<LedgerError>,
) -> BTreeMap<String, Account> {
    let mut accounts: BTreeMap<String, Account> = BTreeMap::new();
    let mut unopened = BTreeSet::new();

    for directive in entries {
        match &directive.content {
            DirectiveContent::Open(open) => {
                accounts
                    .entry(open.account.clone())
                    .or_insert_with(|| Account {
                        name: open.account.clone(),
                        open: directive.date,
                        close: None,
                        currencies: open.currencies.clone(),
                        balance: BTreeMap::new(),
                        transactions: Vec::new(),
                    });
            }
            DirectiveContent::Close(close) => match accounts.get_mut(&close.account) {
                Some(account) => account.close = Some(directive.date),
                None => {
                    unopened.insert(close.account.clone());
                }
            },
            DirectiveContent::Transaction(txn) => {
                let elided = elided_units(&txn.postings);
                let mut touched = BTreeSet::new();

                for (index, posting) in txn.postings.iter().enumerate() {
                    let Some(account) = accounts.get_mut(&posting.account) else {
                        unopened.insert(posting.account.clone());
                        continue;
                    };
                    match &posting.units {
                        Some(units) => add_position(account, units.clone(), posting.cost.clone()),
                        None if elided.0 == Some(index) => {
                            for units in &elided.1 {
                                add_position(account, units.clone(), None);
                            }
                        }
                        None => {}
                    }
                    if touched.insert(posting.account.as_str()) {
                        account.transactions.push(directive.clone());
                    }
                }
            }
            _ => {}
        }
    }

    for account in accounts.values_mut() {
        account
            .balance
            .retain(|_, positions| !positions.is_empty());
    }

    errors.extend(
        unopened
            .into_iter()
            .map(|name| LedgerError::new(None, format!("Invalid reference to unknown account '{name}'"))),
    );

    accounts
}

fn add_position(account: &mut Account, units: Amount, cost: Option<Cost>) {
    let positions = account.balance.entry(units.currency.clone()).or_default();
    match positions.iter_mut().position(|p| p.cost == cost) {
        Some(at) => {
            positions[at].units.number += units.number;
            if positions[at].units.number.is_zero() {
                positions.remove(at);
            }
        }
        None if !units.number.is_zero() => positions.push(Position { units, cost }),
        None => {}
    }
}

/// Finds the single posting without units and the amounts that balance the transaction.
fn elided_units(postings: &[Posting]) -> (Option<usize>, Vec<Amount>) {
    let mut missing = postings.iter().enumerate().filter(|(_, p)| p.units.is_none());
    let (Some((index, _)), None) = (missing.next(), missing.next()) else {
        return (None, Vec::new());
    };

    let mut residual: BTreeMap<&str, Decimal> = BTreeMap::new();
    for posting in postings {
        if let Some(weight) = weight(posting) {
            *residual.entry(weight.1).or_default() += weight.0;
        }
    }

    let amounts = residual
        .into_iter()
        .filter(|(_, number)| !number.is_zero())
        .map(|(currency, number)| Amount::new(-number, currency))
        .collect();
    (Some(index), amounts)
}

/// The amount a posting contributes to its transaction's balance.
fn weight(posting: &Posting) -> Option<(Decimal, &str)> {
    let units = posting.units.as_ref()?;
    if let Some(Cost {
        number: Some(number),
        currency: Some(currency),
        ..
    }) = &posting.cost
    {
        return Some((units.number * number, currency.as_str()));
    }
    if let Some(price) = &posting.price {
        let number = if !posting.total_price {
            units.number * price.number
        } else if units.number.is_sign_negative() {
            -price.number.abs()
        } else {
            price.number.abs()
        };
        return Some((number, price.currency.as_str()));
    }
    Some((units.number, units.currency.as_str()))
}
