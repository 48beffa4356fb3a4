use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};

use crate::config::{
    Config, DEFAULT_CONFIG_FILE, ExtractionStrategy, FetchBackend, SheetFormat,
};

#[derive(Parser, Debug)]
#[command(name = "shelfwatch")]
#[command(about = "Retail listing scraper and weekly sales series normalizer", long_about = None)]
pub struct Cli {
    /// TOML configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE, global = true)]
    pub config: PathBuf,

    /// Also write logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Walk the configured category pages and write products to CSV
    Scrape {
        /// Output CSV path
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(long, value_enum)]
        backend: Option<FetchBackend>,

        #[arg(long, value_enum)]
        strategy: Option<ExtractionStrategy>,

        /// Category URLs to walk instead of the configured ones
        #[arg(long = "category")]
        categories: Vec<String>,

        /// Page limit per category
        #[arg(long)]
        max_pages: Option<usize>,

        /// Route requests through the public proxy pool
        #[arg(long)]
        proxies: bool,
    },
    /// Turn a fiscal-week spreadsheet into a continuous weekly CSV with forecasts
    Normalize {
        /// Local path or URL of the spreadsheet
        input: Option<String>,

        #[arg(long, value_enum)]
        format: Option<SheetFormat>,

        /// Output CSV path
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Diagnostics JSON path
        #[arg(long)]
        diagnostics: Option<PathBuf>,

        /// Reference date recorded in the diagnostics (YYYY-MM-DD, default today)
        #[arg(long)]
        as_of: Option<NaiveDate>,

        /// Skip forecasting
        #[arg(long)]
        no_forecast: bool,

        /// Choose the model order per series by AIC
        #[arg(long)]
        auto_order: bool,

        /// Forecast horizon in weeks
        #[arg(long)]
        steps: Option<usize>,
    },
    /// Convert the first table of a Numbers file to CSV
    ConvertNumbers {
        /// Path to the .numbers file
        input: PathBuf,

        /// Output CSV path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

impl Commands {
    /// Fold command-line overrides into the loaded configuration.
    pub fn apply(&self, config: &mut Config) {
        match self {
            Self::Scrape {
                output,
                backend,
                strategy,
                categories,
                max_pages,
                proxies,
            } => {
                let scraper = &mut config.scraper;
                if let Some(output) = output {
                    scraper.output = output.clone();
                }
                if let Some(backend) = backend {
                    scraper.backend = *backend;
                }
                if let Some(strategy) = strategy {
                    scraper.strategy = *strategy;
                }
                if !categories.is_empty() {
                    scraper.categories = categories.clone();
                }
                if let Some(max_pages) = max_pages {
                    scraper.max_pages = *max_pages;
                }
                if *proxies {
                    scraper.proxy.enabled = true;
                }
            }
            Self::Normalize {
                input,
                format,
                output,
                diagnostics,
                no_forecast,
                auto_order,
                steps,
                ..
            } => {
                let normalizer = &mut config.normalizer;
                if input.is_some() {
                    normalizer.input = input.clone();
                }
                if format.is_some() {
                    normalizer.format = *format;
                }
                if let Some(output) = output {
                    normalizer.output = output.clone();
                }
                if diagnostics.is_some() {
                    normalizer.diagnostics = diagnostics.clone();
                }
                if *no_forecast {
                    normalizer.forecast.enabled = false;
                }
                if *auto_order {
                    normalizer.forecast.auto_order = true;
                }
                if let Some(steps) = steps {
                    normalizer.forecast.steps = *steps;
                }
            }
            Self::ConvertNumbers { output, .. } => {
                if let Some(output) = output {
                    config.numbers.output = output.clone();
                }
            }
        }
    }
}
