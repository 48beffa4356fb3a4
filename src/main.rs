use std::fs::OpenOptions;
use std::sync::Mutex;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use shelfwatch::category_walker;
use shelfwatch::cli::{Cli, Commands};
use shelfwatch::config::Config;
use shelfwatch::normalizer;
use shelfwatch::sheet::numbers;

fn init_logging(cli: &Cli) -> Result<()> {
    let file_layer = match &cli.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(&cli)?;

    let mut config = Config::load(&cli.config)?;
    cli.command.apply(&mut config);

    match &cli.command {
        Commands::Scrape { .. } => {
            info!("Starting scrape of {} categories", config.scraper.categories.len());
            let summary = category_walker::run(&config.scraper).await?;
            info!(
                "Done: {} products from {} pages ({} items skipped)",
                summary.records, summary.pages, summary.skipped
            );
        }
        Commands::Normalize { as_of, .. } => {
            let Some(input) = config.normalizer.input.clone() else {
                bail!("No input spreadsheet given on the command line or in [normalizer] input");
            };
            let as_of = as_of.unwrap_or_else(|| chrono::Local::now().date_naive());

            match normalizer::run(&input, &config.normalizer, &config.numbers, as_of).await {
                Ok(diagnostics) => info!(
                    "Normalized {} products ({} forecast rows, {} warnings)",
                    diagnostics.products,
                    diagnostics.forecast_rows,
                    diagnostics.warnings.len()
                ),
                Err(e) => {
                    if normalizer::is_missing_token(&e) {
                        error!("Set the token in the environment or in a .env file");
                    }
                    return Err(e);
                }
            }
        }
        Commands::ConvertNumbers { input, .. } => {
            numbers::convert(input, &config.numbers, &config.numbers.output)?;
            info!("Data saved to {}", config.numbers.output.display());
        }
    }

    Ok(())
}
