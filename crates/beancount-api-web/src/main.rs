use beancount_api_web::Settings;
use clap::Parser;

#[derive(Parser)]
#[command(name = "beancount-api-web")]
#[command(about = "Serve a beancount ledger as JSON over HTTP")]
struct Args {
    #[command(flatten)]
    settings: Settings,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    beancount_api_web::run(args.settings).await
}
