use anyhow::Result;
use clap::Parser;
use nano_upload::cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    cli.run().await
}
