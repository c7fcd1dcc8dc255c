use crate::model::{Directive, DirectiveContent};

/// Sorts by date, then by the per-type order beancount uses within a day, and drops exact
/// duplicate balance assertions. The sort is stable, so same-day transactions keep file order.
pub fn sort_dedup_directives(directives: &mut Vec<Directive>) {
    directives.sort_by_key(|directive| (directive.date, directive_order(directive)));
    directives.dedup_by(|a, b| is_identical(a, b));
}

fn directive_order(directive: &Directive) -> i8 {
    match directive.content {
        DirectiveContent::Open(_) => -2,
        DirectiveContent::Balance(_) => -1,
        DirectiveContent::Document(_) => 1,
        DirectiveContent::Close(_) => 2,
        DirectiveContent::Commodity(_)
        | DirectiveContent::Pad(_)
        | DirectiveContent::Transaction(_)
        | DirectiveContent::Note(_)
        | DirectiveContent::Event(_)
        | DirectiveContent::Query(_)
        | DirectiveContent::Price(_)
        | DirectiveContent::Custom(_) => 0,
    }
}

// The two directives are the exact same and can be deduplicated
fn is_identical(a: &Directive, b: &Directive) -> bool {
    match (&a.content, &b.content) {
        (DirectiveContent::Balance(ca), DirectiveContent::Balance(cb)) => {
            a.date == b.date && a.meta == b.meta && ca == cb
        }
        _ => false,
    }
}
