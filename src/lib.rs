pub mod arima;
pub mod category_walker;
pub mod cli;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod fiscal;
pub mod models;
pub mod normalizer;
pub mod output;
pub mod scraper;
pub mod sheet;
pub mod traits;
