use std::path::PathBuf;

use thiserror::Error;

/// Failures while loading or validating the TOML configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid selector `{selector}`: {message}")]
    Selector { selector: String, message: String },

    #[error("Invalid site origin `{0}`: {1}")]
    Origin(String, url::ParseError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// A single failed page fetch. Retried by `RetryingFetcher`, never surfaced past it.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected status {0}")]
    Status(reqwest::StatusCode),

    #[error("Blocked by bot protection (matched `{0}`)")]
    Blocked(String),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Page did not finish rendering the listing")]
    NotReady(String),

    #[error("Page returned no content")]
    Empty,
}

impl FetchError {
    /// Whatever page content the failed attempt still produced.
    pub fn page_content(&self) -> Option<&str> {
        match self {
            Self::NotReady(content) if !content.is_empty() => Some(content),
            _ => None,
        }
    }
}

/// Failures while loading spreadsheet input. All of these abort the run.
#[derive(Error, Debug)]
pub enum SheetError {
    #[error("Environment variable {0} is not set")]
    MissingToken(String),

    #[error("Download failed: {0}")]
    Download(#[from] reqwest::Error),

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot determine spreadsheet format for `{0}`")]
    UnknownFormat(String),

    #[error("Required columns missing: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("No data file (index.xml or Data) found in archive")]
    NoDataFile,

    #[error("No worksheet found in workbook")]
    NoWorksheet,

    #[error("No table found in document")]
    NoTable,

    #[error("Table is empty after processing")]
    EmptyTable,
}

/// A forecast model that could not be fitted. The normalizer falls back to zeros.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ForecastError {
    #[error("Series too short: {got} observations after differencing, need {needed}")]
    TooShort { needed: usize, got: usize },

    #[error("Series contains non-finite values")]
    NonFinite,

    #[error("Optimizer did not find a finite fit")]
    NoFit,
}
