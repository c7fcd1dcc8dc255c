//! Conversion from `beancount_parser` entries into the JSON-facing model.

use anyhow::{Context, anyhow};
use beancount_parser::metadata;
use chrono::NaiveDate;
use std::collections::BTreeSet;

use crate::Decimal;
use crate::model::{
    Amount, Balance, Close, Commodity, Cost, Directive, DirectiveContent, Event, Metadata, Open,
    Pad, Posting, Price, Transaction,
};

type ParsedDirective = beancount_parser::Directive<Decimal>;
type ParsedPosting = beancount_parser::Posting<Decimal>;
type ParsedAmount = beancount_parser::Amount<Decimal>;

pub(crate) fn date(date: beancount_parser::Date) -> anyhow::Result<NaiveDate> {
    NaiveDate::from_ymd_opt(date.year.into(), date.month.into(), date.day.into())
        .ok_or_else(|| anyhow!("invalid date {}-{}-{}", date.year, date.month, date.day))
}

/// Converts one parsed directive, or `None` when the model has no counterpart for it.
pub(crate) fn directive(parsed: &ParsedDirective) -> anyhow::Result<Option<Directive>> {
    use beancount_parser::DirectiveContent as Parsed;

    let content = match &parsed.content {
        Parsed::Open(open) => DirectiveContent::Open(Open {
            account: open.account.to_string(),
            currencies: open.currencies.iter().map(|c| c.to_string()).collect(),
            booking: open.booking_method.as_ref().map(|b| b.to_string()),
        }),
        Parsed::Close(close) => DirectiveContent::Close(Close {
            account: close.account.to_string(),
        }),
        Parsed::Commodity(currency) => DirectiveContent::Commodity(Commodity {
            currency: currency.to_string(),
        }),
        Parsed::Pad(pad) => DirectiveContent::Pad(Pad {
            account: pad.account.to_string(),
            source_account: pad.source_account.to_string(),
        }),
        Parsed::Balance(balance) => DirectiveContent::Balance(Balance {
            account: balance.account.to_string(),
            amount: amount(&balance.amount),
            tolerance: balance.tolerance,
        }),
        Parsed::Price(price) => DirectiveContent::Price(Price {
            currency: price.currency.to_string(),
            amount: amount(&price.amount),
        }),
        Parsed::Event(event) => DirectiveContent::Event(Event {
            kind: event.name.clone(),
            description: event.value.clone(),
        }),
        Parsed::Transaction(txn) => DirectiveContent::Transaction(Transaction {
            flag: txn
                .flag
                .map(|f| f.to_string())
                .unwrap_or_else(|| "*".to_string()),
            payee: txn.payee.clone(),
            narration: txn.narration.clone().unwrap_or_default(),
            tags: names(txn.tags.iter().map(|t| t.to_string()), '#'),
            links: names(txn.links.iter().map(|l| l.to_string()), '^'),
            postings: txn
                .postings
                .iter()
                .map(posting)
                .collect::<anyhow::Result<_>>()
                .context("invalid posting")?,
        }),
        other => {
            tracing::debug!("Skipping unsupported directive: {:?}", other);
            return Ok(None);
        }
    };

    Ok(Some(Directive {
        id: String::new(),
        date: date(parsed.date)?,
        meta: meta(&parsed.metadata),
        content,
    }))
}

fn posting(posting: &ParsedPosting) -> anyhow::Result<Posting> {
    use beancount_parser::PostingPrice;

    let units = posting.amount.as_ref().map(amount);
    let cost = posting
        .cost
        .as_ref()
        .map(|cost| -> anyhow::Result<Cost> {
            Ok(Cost {
                number: cost.amount.as_ref().map(|a| a.value),
                currency: cost.amount.as_ref().map(|a| a.currency.to_string()),
                date: cost.date.map(date).transpose()?,
                // the parser does not keep lot labels
                label: None,
            })
        })
        .transpose()?;
    let (price, total_price) = match &posting.price {
        Some(PostingPrice::Unit(unit)) => (Some(amount(unit)), false),
        Some(PostingPrice::Total(total)) => (Some(amount(total)), true),
        None => (None, false),
    };

    Ok(Posting {
        account: posting.account.to_string(),
        units,
        cost,
        price,
        total_price,
        flag: posting.flag.map(|f| f.to_string()),
        meta: meta(&posting.metadata),
    })
}

fn amount(amount: &ParsedAmount) -> Amount {
    Amount::new(amount.value, amount.currency.to_string())
}

fn meta(map: &metadata::Map<Decimal>) -> Metadata {
    map.iter()
        .filter_map(|(key, value)| {
            let value = match value {
                metadata::Value::String(s) => s.clone(),
                metadata::Value::Number(n) => n.to_string(),
                metadata::Value::Currency(c) => c.to_string(),
                #[allow(unreachable_patterns)]
                _ => return None,
            };
            Some((key.to_string(), value))
        })
        .collect()
}

fn names(items: impl Iterator<Item = String>, sigil: char) -> BTreeSet<String> {
    items
        .map(|item| item.trim_start_matches(sigil).to_string())
        .collect()
}
