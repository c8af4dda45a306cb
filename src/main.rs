use anyhow::{Context, Result};
use clap::Parser;

use buildlore::{
    cli::CliApp,
    cli_types::{Cli, Commands},
    logging, IngestConfig,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.json_logs);

    let config = IngestConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let app = CliApp::new(config, cli.verbose);

    match cli.command {
        Commands::Run(args) => {
            let summary = app.run_build(args).await?;
            if !summary.success {
                std::process::exit(summary.exit_code.unwrap_or(1));
            }
        }
        Commands::Headers(args) => app.headers(args)?,
        Commands::Config => app.show_config()?,
    }

    Ok(())
}
