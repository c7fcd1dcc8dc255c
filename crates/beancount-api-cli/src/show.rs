use std::path::Path;

use anstyle::{AnsiColor, Color, Style};
use anyhow::{Context, Result};
use beancount_api::{Ledger, Mutator};

fn load(file: &Path) -> Result<Ledger> {
    let loaded = beancount_api::load_file(file)?;
    let ledger = loaded.ledger;

    let error_style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::Red)));
    for error in ledger.errors() {
        match &error.source {
            Some(source) => eprintln!("{error_style}error{error_style:#} {source}: {}", error.message),
            None => eprintln!("{error_style}error{error_style:#} {}", error.message),
        }
    }
    Ok(ledger)
}

pub fn dump(file: &Path) -> Result<()> {
    let ledger = load(file)?;
    let json = serde_json::to_string_pretty(&ledger).context("Failed to serialize ledger")?;
    println!("{json}");
    Ok(())
}

pub fn search(file: &Path, mutator: &Mutator) -> Result<()> {
    let ledger = load(file)?;
    let results = mutator.mutate(ledger.entries().to_vec())?;

    let header_style = Style::new().fg_color(Some(Color::Ansi(AnsiColor::Green)));
    let reset = Style::new();

    for directive in &results {
        println!(
            "{header_style}━━━ {} {} ━━━{reset}",
            directive.directive_type(),
            &directive.id[..12.min(directive.id.len())]
        );
        print!("{directive}");
        println!();
    }

    println!("{}━━━ Summary ━━━{}", Style::new().bold(), reset);
    println!(
        "  {header_style}{}{reset} of {} directive(s) matched",
        results.len(),
        ledger.entries().len()
    );

    Ok(())
}
