//! Renders directives back into ledger syntax.

use std::collections::BTreeSet;
use std::fmt::{self, Display, Formatter};

use crate::model::{Amount, Cost, Directive, DirectiveContent, Metadata, Posting};

impl Display for Directive {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} ", self.date)?;

        match &self.content {
            DirectiveContent::Open(open) => {
                write!(f, "open {}", open.account)?;
                if !open.currencies.is_empty() {
                    let currencies: Vec<_> = open.currencies.iter().map(String::as_str).collect();
                    write!(f, " {}", currencies.join(","))?;
                }
                if let Some(booking) = &open.booking {
                    write!(f, " {}", Quoted(booking))?;
                }
                writeln!(f)?;
            }
            DirectiveContent::Close(close) => writeln!(f, "close {}", close.account)?,
            DirectiveContent::Commodity(commodity) => {
                writeln!(f, "commodity {}", commodity.currency)?
            }
            DirectiveContent::Pad(pad) => {
                writeln!(f, "pad {} {}", pad.account, pad.source_account)?
            }
            DirectiveContent::Balance(balance) => {
                write!(f, "balance {}  {}", balance.account, balance.amount.number)?;
                if let Some(tolerance) = balance.tolerance {
                    write!(f, " ~ {tolerance}")?;
                }
                writeln!(f, " {}", balance.amount.currency)?;
            }
            DirectiveContent::Transaction(txn) => {
                write!(f, "{}", txn.flag)?;
                if let Some(payee) = &txn.payee {
                    write!(f, " {}", Quoted(payee))?;
                }
                write!(f, " {}", Quoted(&txn.narration))?;
                write_marked(f, '#', &txn.tags)?;
                write_marked(f, '^', &txn.links)?;
                writeln!(f)?;
                write_meta(f, &self.meta, 1)?;
                for posting in &txn.postings {
                    write_posting(f, posting)?;
                }
                return Ok(());
            }
            DirectiveContent::Note(note) => {
                writeln!(f, "note {} {}", note.account, Quoted(&note.comment))?
            }
            DirectiveContent::Event(event) => writeln!(
                f,
                "event {} {}",
                Quoted(&event.kind),
                Quoted(&event.description)
            )?,
            DirectiveContent::Query(query) => writeln!(
                f,
                "query {} {}",
                Quoted(&query.name),
                Quoted(&query.query_string)
            )?,
            DirectiveContent::Price(price) => {
                writeln!(f, "price {} {}", price.currency, price.amount)?
            }
            DirectiveContent::Document(document) => {
                write!(
                    f,
                    "document {} {}",
                    document.account,
                    Quoted(&document.filename)
                )?;
                write_marked(f, '#', &document.tags)?;
                write_marked(f, '^', &document.links)?;
                writeln!(f)?;
            }
            DirectiveContent::Custom(custom) => {
                write!(f, "custom {}", Quoted(&custom.kind))?;
                for value in &custom.values {
                    write!(f, " {}", Quoted(value))?;
                }
                writeln!(f)?;
            }
        }

        write_meta(f, &self.meta, 1)
    }
}

impl Display for Amount {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.number, self.currency)
    }
}

impl Display for Cost {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        match (&self.number, &self.currency) {
            (Some(number), Some(currency)) => parts.push(format!("{number} {currency}")),
            (Some(number), None) => parts.push(number.to_string()),
            (None, Some(currency)) => parts.push(currency.clone()),
            (None, None) => {}
        }
        if let Some(date) = &self.date {
            parts.push(date.to_string());
        }
        if let Some(label) = &self.label {
            parts.push(Quoted(label).to_string());
        }
        write!(f, "{{{}}}", parts.join(", "))
    }
}

struct Quoted<'a>(&'a str);

impl Display for Quoted<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self.0.replace('\\', "\\\\").replace('"', "\\\""))
    }
}

fn write_marked(f: &mut Formatter<'_>, sigil: char, names: &BTreeSet<String>) -> fmt::Result {
    for name in names {
        write!(f, " {sigil}{name}")?;
    }
    Ok(())
}

fn write_meta(f: &mut Formatter<'_>, meta: &Metadata, depth: usize) -> fmt::Result {
    let indent = "  ".repeat(depth);
    for (key, value) in meta {
        writeln!(f, "{indent}{key}: {}", Quoted(value))?;
    }
    Ok(())
}

fn write_posting(f: &mut Formatter<'_>, posting: &Posting) -> fmt::Result {
    write!(f, "  ")?;
    if let Some(flag) = &posting.flag {
        write!(f, "{flag} ")?;
    }
    write!(f, "{}", posting.account)?;
    if let Some(units) = &posting.units {
        write!(f, "  {units}")?;
    }
    if let Some(cost) = &posting.cost {
        write!(f, " {cost}")?;
    }
    if let Some(price) = &posting.price {
        let marker = if posting.total_price { "@@" } else { "@" };
        write!(f, " {marker} {price}")?;
    }
    writeln!(f)?;
    write_meta(f, &posting.meta, 2)
}
