//! The JSON-facing ledger model.
//!
//! Directives are a closed sum type. The serialized form is flat and tagged with `ty`, which is
//! the shape structural filter expressions are written against, e.g. `[?ty == 'Open']`.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

pub type Metadata = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Directive {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub date: NaiveDate,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub meta: Metadata,
    #[serde(flatten)]
    pub content: DirectiveContent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "ty")]
pub enum DirectiveContent {
    Open(Open),
    Close(Close),
    Commodity(Commodity),
    Pad(Pad),
    Balance(Balance),
    Transaction(Transaction),
    Note(Note),
    Event(Event),
    Query(Query),
    Price(Price),
    Document(Document),
    Custom(Custom),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Open {
    pub account: String,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub currencies: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub booking: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Close {
    pub account: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commodity {
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pad {
    pub account: String,
    pub source_account: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub account: String,
    pub amount: Amount,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "rust_decimal::serde::float_option"
    )]
    pub tolerance: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(default = "default_flag")]
    pub flag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payee: Option<String>,
    #[serde(default)]
    pub narration: String,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub links: BTreeSet<String>,
    #[serde(default)]
    pub postings: Vec<Posting>,
}

fn default_flag() -> String {
    "*".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Posting {
    pub account: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<Amount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<Cost>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<Amount>,
    /// `price` covers all units (`@@`) instead of one unit (`@`).
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub total_price: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flag: Option<String>,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub meta: Metadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub account: String,
    pub comment: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub name: String,
    pub query_string: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Price {
    pub currency: String,
    pub amount: Amount,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub account: String,
    pub filename: String,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub links: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Custom {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Amount {
    #[serde(with = "rust_decimal::serde::float")]
    pub number: Decimal,
    pub currency: String,
}

impl Amount {
    pub fn new(number: Decimal, currency: impl Into<String>) -> Self {
        Amount {
            number,
            currency: currency.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Cost {
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "rust_decimal::serde::float_option"
    )]
    pub number: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Names accepted wherever a single directive type is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectiveType {
    Balance,
    Close,
    Commodity,
    Custom,
    Document,
    Event,
    Note,
    Open,
    Pad,
    Price,
    Query,
    Transaction,
}

impl DirectiveType {
    pub const ALL: [DirectiveType; 12] = [
        DirectiveType::Balance,
        DirectiveType::Close,
        DirectiveType::Commodity,
        DirectiveType::Custom,
        DirectiveType::Document,
        DirectiveType::Event,
        DirectiveType::Note,
        DirectiveType::Open,
        DirectiveType::Pad,
        DirectiveType::Price,
        DirectiveType::Query,
        DirectiveType::Transaction,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DirectiveType::Balance => "balance",
            DirectiveType::Close => "close",
            DirectiveType::Commodity => "commodity",
            DirectiveType::Custom => "custom",
            DirectiveType::Document => "document",
            DirectiveType::Event => "event",
            DirectiveType::Note => "note",
            DirectiveType::Open => "open",
            DirectiveType::Pad => "pad",
            DirectiveType::Price => "price",
            DirectiveType::Query => "query",
            DirectiveType::Transaction => "transaction",
        }
    }
}

impl fmt::Display for DirectiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DirectiveType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DirectiveType::ALL
            .into_iter()
            .find(|ty| ty.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown directive type: '{s}'"))
    }
}

impl DirectiveContent {
    pub fn directive_type(&self) -> DirectiveType {
        match self {
            DirectiveContent::Open(_) => DirectiveType::Open,
            DirectiveContent::Close(_) => DirectiveType::Close,
            DirectiveContent::Commodity(_) => DirectiveType::Commodity,
            DirectiveContent::Pad(_) => DirectiveType::Pad,
            DirectiveContent::Balance(_) => DirectiveType::Balance,
            DirectiveContent::Transaction(_) => DirectiveType::Transaction,
            DirectiveContent::Note(_) => DirectiveType::Note,
            DirectiveContent::Event(_) => DirectiveType::Event,
            DirectiveContent::Query(_) => DirectiveType::Query,
            DirectiveContent::Price(_) => DirectiveType::Price,
            DirectiveContent::Document(_) => DirectiveType::Document,
            DirectiveContent::Custom(_) => DirectiveType::Custom,
        }
    }
}

impl Directive {
    pub fn new(date: NaiveDate, content: DirectiveContent) -> Self {
        Directive {
            id: String::new(),
            date,
            meta: Metadata::new(),
            content,
        }
    }

    pub fn directive_type(&self) -> DirectiveType {
        self.content.directive_type()
    }

    /// Content hash of the directive, ignoring any ID it already carries.
    pub fn content_id(&self) -> String {
        let canonical = serde_json::to_vec(&(&self.date, &self.meta, &self.content))
            .unwrap_or_else(|_| format!("{:?}", (&self.date, &self.meta, &self.content)).into_bytes());
        hex::encode(Sha256::digest(&canonical))
    }

    /// Whether any part of the directive refers to `account`.
    pub fn touches_account(&self, account: &str) -> bool {
        match &self.content {
            DirectiveContent::Open(open) => open.account == account,
            DirectiveContent::Close(close) => close.account == account,
            DirectiveContent::Pad(pad) => pad.account == account || pad.source_account == account,
            DirectiveContent::Balance(balance) => balance.account == account,
            DirectiveContent::Transaction(txn) => {
                txn.postings.iter().any(|posting| posting.account == account)
            }
            DirectiveContent::Note(note) => note.account == account,
            DirectiveContent::Document(document) => document.account == account,
            DirectiveContent::Commodity(_)
            | DirectiveContent::Event(_)
            | DirectiveContent::Query(_)
            | DirectiveContent::Price(_)
            | DirectiveContent::Custom(_) => false,
        }
    }
}
