use anyhow::Result;
use clap::Parser;
use lifeline_cli::{init_tracing, run, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    run(Cli::parse()).await
}
