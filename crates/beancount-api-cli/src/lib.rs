mod show;

use std::path::PathBuf;

use anyhow::Result;
use beancount_api::{Mutator, Priority};
use beancount_api_web::Settings;
use clap::{Args as ClapArgs, CommandFactory as _, Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(
    name = "bapi",
    about = "Expose a beancount ledger as JSON over HTTP"
)]
#[command(disable_help_subcommand = true)]
struct Args {
    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server (default)
    Serve,
    /// Print the parsed ledger as JSON and exit
    Dump {
        /// Ledger file
        file: PathBuf,
    },
    /// Print the directives matching a filter and/or search
    Search {
        /// Ledger file
        file: PathBuf,

        #[command(flatten)]
        query: QueryArgs,
    },
}

#[derive(ClapArgs)]
struct QueryArgs {
    /// JMESPath expression selecting directives, e.g. "[?ty == 'Open']"
    #[arg(short, long)]
    filter: Option<String>,

    /// Words that must all appear in a directive
    #[arg(short, long)]
    search: Option<String>,

    /// Which of filter and search runs first
    #[arg(short, long, value_enum, default_value_t = PriorityArg::Filter)]
    priority: PriorityArg,
}

#[derive(Clone, Copy, ValueEnum)]
enum PriorityArg {
    Filter,
    Search,
}

impl From<QueryArgs> for Mutator {
    fn from(args: QueryArgs) -> Self {
        let priority = match args.priority {
            PriorityArg::Filter => Priority::Filter,
            PriorityArg::Search => Priority::Search,
        };
        Mutator::new(args.filter, args.search, priority)
    }
}

pub async fn run(args: impl IntoIterator<Item = String>) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "beancount_api_web=info,beancount_api=info".into());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    clap_complete::CompleteEnv::with_factory(Args::command).complete();

    let args = Args::parse_from(args);
    match args.command.unwrap_or(Commands::Serve) {
        Commands::Serve => beancount_api_web::run(args.settings).await,
        Commands::Dump { file } => show::dump(&file),
        Commands::Search { file, query } => show::search(&file, &query.into()),
    }
}
