#[tokio::main]
async fn main() -> anyhow::Result<()> {
    beancount_api_cli::run(std::env::args()).await
}
