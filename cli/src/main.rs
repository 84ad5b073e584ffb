//! Retcon - main entry point

use clap::Parser;
use color_eyre::Result;
use retcon_cli::App;
use retcon_cli::Cli;
use retcon_cli::log_level;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    let cli = Cli::parse();

    // Logs go to stderr; stdout carries the streamed reply.
    let filter = EnvFilter::builder()
        .with_default_directive(log_level(cli.verbose).into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!("Running {:?}", cli.command);

    let app = App::from_cli(&cli).await?;
    let mut stdout = std::io::stdout();
    app.execute(cli.command, &mut stdout).await?;
    Ok(())
}
