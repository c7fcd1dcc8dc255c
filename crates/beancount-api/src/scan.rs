//! Directive kinds that `beancount_parser` passes over as comment lines: note, document, custom
//! and query. Their lines are picked out of the raw source and read here.

use chrono::NaiveDate;
use std::collections::BTreeSet;

use crate::model::{Custom, Directive, DirectiveContent, Document, Metadata, Note, Query};

/// Keywords `beancount_parser` reads itself.
const PARSED: [&str; 8] = [
    "txn",
    "open",
    "close",
    "balance",
    "pad",
    "commodity",
    "price",
    "event",
];

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Quoted(String),
    Bare(String),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct LineError {
    /// One-based line number.
    pub line: usize,
    pub message: String,
}

/// Reads every note, document, custom and query directive in `source`, along with the metadata
/// lines indented below it. Dated lines with a keyword nobody understands are reported.
pub(crate) fn scan(source: &str) -> (Vec<Directive>, Vec<LineError>) {
    let mut directives = Vec::new();
    let mut errors = Vec::new();
    let mut lines = source.lines().enumerate().peekable();

    while let Some((index, line)) = lines.next() {
        let Some((date, keyword, rest)) = header(line) else {
            continue;
        };
        if PARSED.contains(&keyword) {
            continue;
        }

        let mut meta = Metadata::new();
        while let Some((key, value)) = lines.peek().and_then(|(_, next)| meta_line(next)) {
            meta.insert(key, value);
            lines.next();
        }

        let content = tokens(rest).and_then(|tokens| match keyword {
            "note" => note(tokens),
            "document" => document(tokens),
            "custom" => custom(tokens),
            "query" => query(tokens),
            _ => Err(format!("Unsupported directive '{keyword}'")),
        });
        match content {
            Ok(content) => directives.push(Directive {
                id: String::new(),
                date,
                meta,
                content,
            }),
            Err(message) => errors.push(LineError {
                line: index + 1,
                message,
            }),
        }
    }

    (directives, errors)
}

/// Splits `2024-01-01 keyword rest` into its parts.
fn header(line: &str) -> Option<(NaiveDate, &str, &str)> {
    let (date, rest) = line.split_once(|c: char| c.is_ascii_whitespace())?;
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    let rest = rest.trim_start();
    let end = rest
        .find(|c: char| !c.is_ascii_lowercase())
        .unwrap_or(rest.len());
    let (keyword, rest) = rest.split_at(end);
    if keyword.is_empty() || !rest.chars().next().is_none_or(char::is_whitespace) {
        return None;
    }
    Some((date, keyword, rest))
}

fn meta_line(line: &str) -> Option<(String, String)> {
    if !line.starts_with([' ', '\t']) {
        return None;
    }
    let (key, value) = line.trim().split_once(':')?;
    let valid_key = key.starts_with(|c: char| c.is_ascii_lowercase())
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid_key {
        return None;
    }
    let value = match tokens(value).ok()?.as_slice() {
        [Token::Quoted(value) | Token::Bare(value)] => value.clone(),
        _ => return None,
    };
    Some((key.to_string(), value))
}

fn tokens(text: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c == ';' {
            break;
        } else if c == '"' {
            chars.next();
            let mut value = String::new();
            loop {
                match chars.next() {
                    Some('"') => break,
                    Some('\\') => match chars.next() {
                        Some(escaped) => value.push(escaped),
                        None => return Err("Unterminated string".to_string()),
                    },
                    Some(c) => value.push(c),
                    None => return Err("Unterminated string".to_string()),
                }
            }
            tokens.push(Token::Quoted(value));
        } else {
            let mut word = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() || c == '"' || c == ';' {
                    break;
                }
                word.push(c);
                chars.next();
            }
            tokens.push(Token::Bare(word));
        }
    }

    Ok(tokens)
}

fn account(token: Option<Token>, keyword: &str) -> Result<String, String> {
    match token {
        Some(Token::Bare(name))
            if name.starts_with(|c: char| c.is_ascii_uppercase()) && name.contains(':') =>
        {
            Ok(name)
        }
        _ => Err(format!("Expected an account after '{keyword}'")),
    }
}

fn quoted(token: Option<Token>, what: &str) -> Result<String, String> {
    match token {
        Some(Token::Quoted(value)) => Ok(value),
        _ => Err(format!("Expected a quoted {what}")),
    }
}

fn end(mut tokens: impl Iterator<Item = Token>) -> Result<(), String> {
    match tokens.next() {
        None => Ok(()),
        Some(Token::Quoted(value) | Token::Bare(value)) => {
            Err(format!("Unexpected '{value}' at end of directive"))
        }
    }
}

fn note(tokens: Vec<Token>) -> Result<DirectiveContent, String> {
    let mut tokens = tokens.into_iter();
    let account = account(tokens.next(), "note")?;
    let comment = quoted(tokens.next(), "comment")?;
    end(tokens)?;
    Ok(DirectiveContent::Note(Note { account, comment }))
}

fn document(tokens: Vec<Token>) -> Result<DirectiveContent, String> {
    let mut tokens = tokens.into_iter();
    let account = account(tokens.next(), "document")?;
    let filename = quoted(tokens.next(), "filename")?;

    let mut tags = BTreeSet::new();
    let mut links = BTreeSet::new();
    for token in tokens {
        match token {
            Token::Bare(word) if word.len() > 1 && word.starts_with('#') => {
                tags.insert(word[1..].to_string());
            }
            Token::Bare(word) if word.len() > 1 && word.starts_with('^') => {
                links.insert(word[1..].to_string());
            }
            Token::Quoted(value) | Token::Bare(value) => {
                return Err(format!("Unexpected '{value}' at end of directive"));
            }
        }
    }

    Ok(DirectiveContent::Document(Document {
        account,
        filename,
        tags,
        links,
    }))
}

fn custom(tokens: Vec<Token>) -> Result<DirectiveContent, String> {
    let mut tokens = tokens.into_iter();
    let kind = quoted(tokens.next(), "custom type")?;
    let values = tokens
        .map(|token| match token {
            Token::Quoted(value) | Token::Bare(value) => value,
        })
        .collect();
    Ok(DirectiveContent::Custom(Custom { kind, values }))
}

fn query(tokens: Vec<Token>) -> Result<DirectiveContent, String> {
    let mut tokens = tokens.into_iter();
    let name = quoted(tokens.next(), "query name")?;
    let query_string = quoted(tokens.next(), "query string")?;
    end(tokens)?;
    Ok(DirectiveContent::Query(Query { name, query_string }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn contents(source: &str) -> Vec<DirectiveContent> {
        let (directives, errors) = scan(source);
        assert!(errors.is_empty(), "{errors:?}");
        directives.into_iter().map(|d| d.content).collect()
    }

    #[test]
    fn reads_note_with_metadata() {
        let (directives, errors) = scan(
            "2024-01-05 note Assets:Cash \"Called the bank\" ; about fees\n  source: \"phone\"\n  count: 2\n\n2024-01-06 open Assets:Bank\n",
        );

        assert!(errors.is_empty(), "{errors:?}");
        assert_eq!(directives.len(), 1);
        assert_eq!(directives[0].date, date("2024-01-05"));
        assert_eq!(
            directives[0].content,
            DirectiveContent::Note(Note {
                account: "Assets:Cash".to_string(),
                comment: "Called the bank".to_string(),
            })
        );
        assert_eq!(
            directives[0].meta,
            Metadata::from([
                ("count".to_string(), "2".to_string()),
                ("source".to_string(), "phone".to_string()),
            ])
        );
    }

    #[test]
    fn reads_document_tags_and_links() {
        assert_eq!(
            contents("2024-01-09 document Assets:Cash \"statements/jan.pdf\" #bank ^jan-2024\n"),
            [DirectiveContent::Document(Document {
                account: "Assets:Cash".to_string(),
                filename: "statements/jan.pdf".to_string(),
                tags: BTreeSet::from(["bank".to_string()]),
                links: BTreeSet::from(["jan-2024".to_string()]),
            })]
        );
    }

    #[test]
    fn reads_custom_and_query() {
        assert_eq!(
            contents(
                "2024-01-10 custom \"budget\" Expenses:Food \"monthly\" 100.00 USD\n2024-01-11 query \"cash\" \"SELECT \\\"x\\\"\"\n",
            ),
            [
                DirectiveContent::Custom(Custom {
                    kind: "budget".to_string(),
                    values: vec![
                        "Expenses:Food".to_string(),
                        "monthly".to_string(),
                        "100.00".to_string(),
                        "USD".to_string(),
                    ],
                }),
                DirectiveContent::Query(Query {
                    name: "cash".to_string(),
                    query_string: "SELECT \"x\"".to_string(),
                }),
            ]
        );
    }

    #[test]
    fn leaves_parsed_kinds_alone() {
        let source = r#"
2024-01-01 open Assets:Cash USD
2024-01-02 txn "Shop"
  Assets:Cash  -5 USD
2024-01-03 * "Shop" "note this"
  Assets:Cash  -5 USD
2024-01-04 event "location" "Berlin"
; 2024-01-05 note Assets:Cash "commented out"
"#;
        assert!(contents(source).is_empty());
    }

    #[test]
    fn reports_unreadable_lines() {
        let (directives, errors) = scan(
            "2024-01-01 note Assets:Cash\n2024-01-02 query \"open\n2024-01-03 budget \"x\"\n",
        );

        assert!(directives.is_empty());
        assert_eq!(
            errors,
            [
                LineError {
                    line: 1,
                    message: "Expected a quoted comment".to_string(),
                },
                LineError {
                    line: 2,
                    message: "Unterminated string".to_string(),
                },
                LineError {
                    line: 3,
                    message: "Unsupported directive 'budget'".to_string(),
                },
            ]
        );
    }
}
