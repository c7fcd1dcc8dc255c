mod convert;
pub mod filter;
pub mod ledger;
pub mod model;
pub mod mutate;
mod scan;
pub mod search;
mod sorting;
mod syntax;

pub type Decimal = rust_decimal::Decimal;

pub use anyhow::Result;
pub use filter::{FilterError, JmesPathFilter, StructuralFilter};
pub use ledger::{Account, Ledger, LedgerError, LoadedLedger, Position, SourceFile, load_file};
pub use model::{Directive, DirectiveContent, DirectiveType};
pub use mutate::{Mutator, Priority};
pub use search::{DirectiveSearcher, FullTextSearch};
