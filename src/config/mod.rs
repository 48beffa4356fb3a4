//! Configuration for the scraper and the spreadsheet normalizer.
//!
//! Everything is read from a single TOML file (`shelfwatch.toml` by default).
//! Every field has a default, so an absent file or a partial file is valid.
//! The defaults reproduce the Currys category scrape and the fiscal-calendar
//! spreadsheet layout the tool was first written for.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveDate;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::models::fields;

pub const DEFAULT_CONFIG_FILE: &str = "shelfwatch.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scraper: ScraperSettings,
    pub normalizer: NormalizerSettings,
    pub numbers: NumbersSettings,
}

impl Config {
    /// Load configuration from `path`.
    ///
    /// A missing file yields the defaults; a present but invalid file is an error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        Self::from_toml(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

/// Which transport fetches listing pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FetchBackend {
    /// Headless Chrome with cookie dismissal, scrolling and "load more" clicks.
    #[default]
    Browser,
    /// Plain HTTP requests with browser-like headers.
    Http,
}

/// How product fields are read from each listing item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStrategy {
    /// Text content of child elements.
    VisibleText,
    /// JSON payload carried in a data attribute on the item element.
    #[default]
    StructuredData,
}

/// A uniform random delay range in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DelayRange {
    pub min_secs: f64,
    pub max_secs: f64,
}

impl DelayRange {
    pub const fn new(min_secs: f64, max_secs: f64) -> Self {
        Self { min_secs, max_secs }
    }

    pub const fn none() -> Self {
        Self::new(0.0, 0.0)
    }

    /// Draw a delay from the range. Inverted or negative bounds collapse to the lower one.
    pub fn sample(&self) -> Duration {
        let min = self.min_secs.max(0.0);
        let max = self.max_secs.max(min);
        let secs = if max > min {
            rand::thread_rng().gen_range(min..=max)
        } else {
            min
        };
        Duration::from_secs_f64(secs)
    }
}

/// Settings for the `scrape` command.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScraperSettings {
    pub backend: FetchBackend,
    pub strategy: ExtractionStrategy,
    /// Category listing URLs, walked in order.
    pub categories: Vec<String>,
    pub output: PathBuf,
    /// CSV header and field order. Defaults to the schema of the chosen strategy.
    pub columns: Option<Vec<String>>,
    /// Append each category to the output as soon as it finishes.
    pub append_per_category: bool,
    pub max_pages: usize,
    pub page_delay: DelayRange,
    pub category_delay: DelayRange,
    pub request_timeout_secs: u64,
    pub user_agents: Vec<String>,
    pub site: SiteSettings,
    pub retry: RetrySettings,
    pub proxy: ProxySettings,
    pub browser: BrowserSettings,
}

impl Default for ScraperSettings {
    fn default() -> Self {
        Self {
            backend: FetchBackend::default(),
            strategy: ExtractionStrategy::default(),
            categories: [
                "https://www.currys.co.uk/computing/laptops/laptops/apple",
                "https://www.currys.co.uk/computing/tablets-and-ereaders/tablets/apple",
                "https://www.currys.co.uk/phones/mobile-phones/mobile-phones/apple",
                "https://www.currys.co.uk/computing/desktop-pcs/desktop-pcs/apple",
                "https://www.currys.co.uk/tv-and-audio/headphones/headphones/apple",
                "https://www.currys.co.uk/smart-tech/smart-watches-and-fitness/smart-watches/apple",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            output: PathBuf::from("currys_products.csv"),
            columns: None,
            append_per_category: false,
            max_pages: 50,
            page_delay: DelayRange::new(2.0, 4.0),
            category_delay: DelayRange::new(2.0, 4.0),
            request_timeout_secs: 30,
            user_agents: default_user_agents(),
            site: SiteSettings::default(),
            retry: RetrySettings::default(),
            proxy: ProxySettings::default(),
            browser: BrowserSettings::default(),
        }
    }
}

impl ScraperSettings {
    /// The CSV columns to write, falling back to the strategy's schema.
    pub fn output_columns(&self) -> Vec<String> {
        if let Some(columns) = &self.columns {
            return columns.clone();
        }
        let names = match self.strategy {
            ExtractionStrategy::VisibleText => fields::VISIBLE_TEXT_COLUMNS,
            ExtractionStrategy::StructuredData => fields::STRUCTURED_DATA_COLUMNS,
        };
        names.iter().map(|s| (*s).to_string()).collect()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_user_agents() -> Vec<String> {
    [
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// CSS selectors describing a listing page, each list in priority order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteSettings {
    /// Origin that relative links are resolved against.
    pub origin: String,
    /// Containers tried first; `item_selector` is matched inside the first one that yields items.
    pub container_selectors: Vec<String>,
    pub item_selector: String,
    /// Item selectors tried against the whole document when no container yields items.
    pub fallback_item_selectors: Vec<String>,
    pub next_page_selectors: Vec<String>,
    /// Attribute holding the JSON product payload.
    pub product_data_attribute: String,
    pub title: String,
    pub price: String,
    pub link: String,
    pub rating: String,
    pub reviews: String,
    pub product_code: Option<String>,
}

impl Default for SiteSettings {
    fn default() -> Self {
        Self {
            origin: "https://www.currys.co.uk".to_string(),
            container_selectors: vec![
                r#"div[class*="product-grid"]"#.to_string(),
                r#"div[class*="product-list"]"#.to_string(),
                r#"div[class*="products"]"#.to_string(),
                r#"div[class*="results"]"#.to_string(),
            ],
            item_selector: "div.product".to_string(),
            fallback_item_selectors: vec![
                "div.product".to_string(),
                "div[data-productdatalayer]".to_string(),
                "div.product-card".to_string(),
            ],
            next_page_selectors: vec![
                "a.next".to_string(),
                r#"a[class*="next-page"]"#.to_string(),
                r#"a[rel="next"]"#.to_string(),
                r#"a[class*="pagination-next"]"#.to_string(),
            ],
            product_data_attribute: "data-productdatalayer".to_string(),
            title: "h2.pdp-grid-product-name".to_string(),
            price: "span.value".to_string(),
            link: "a.link.text-truncate.pdpLink".to_string(),
            rating: "span.nvda_star_reading".to_string(),
            reviews: "span.rating-count.average-reviews".to_string(),
            product_code: None,
        }
    }
}

/// Attempt budget, sleeps and block detection for page fetches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Attempts per page. Unset means 3, or 5 when requests go through the proxy pool.
    pub attempts: Option<u32>,
    /// Pause after a successful fetch.
    pub success_delay: DelayRange,
    /// Pause after a failed attempt before the next one.
    pub failure_delay: DelayRange,
    /// Case-insensitive substrings that mark a bot-protection page.
    pub block_markers: Vec<String>,
    /// Where to save the content of failed attempts, if anywhere.
    pub snapshot_dir: Option<PathBuf>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            attempts: None,
            success_delay: DelayRange::new(2.0, 4.0),
            failure_delay: DelayRange::new(2.0, 5.0),
            block_markers: vec![
                "cloudflare".to_string(),
                "sorry, you have been blocked".to_string(),
            ],
            snapshot_dir: None,
        }
    }
}

impl RetrySettings {
    pub const DEFAULT_ATTEMPTS: u32 = 3;
    pub const PROXY_ATTEMPTS: u32 = 5;

    /// The attempt budget, at least one.
    pub fn attempts_for(&self, proxied: bool) -> u32 {
        let fallback = if proxied {
            Self::PROXY_ATTEMPTS
        } else {
            Self::DEFAULT_ATTEMPTS
        };
        self.attempts.unwrap_or(fallback).max(1)
    }
}

/// Rotating public proxy pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxySettings {
    pub enabled: bool,
    /// Plain-text `host:port` list endpoints. The scheme comes from each URL's `protocol` parameter.
    pub sources: Vec<String>,
    pub validate: bool,
    pub test_url: String,
    pub validate_limit: usize,
    /// How many unvalidated proxies to keep when none passes validation.
    pub fallback_count: usize,
    pub validate_timeout_secs: u64,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            sources: ["http", "https", "socks5"]
                .iter()
                .map(|protocol| {
                    format!(
                        "https://api.proxyscrape.com/v2/?request=getproxies&protocol={protocol}&timeout=10000&country=all&ssl=all&anonymity=all"
                    )
                })
                .collect(),
            validate: true,
            test_url: "https://www.google.com".to_string(),
            validate_limit: 100,
            fallback_count: 50,
            validate_timeout_secs: 5,
        }
    }
}

/// Headless browser behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    pub headless: bool,
    /// The page counts as rendered once any of these matches.
    pub ready_selectors: Vec<String>,
    pub ready_timeout_secs: u64,
    pub cookie_selector: String,
    pub load_more_selector: String,
    pub load_more_clicks: u32,
    pub scrolls: u32,
    pub scroll_pause_ms: u64,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            ready_selectors: vec![
                r#"div[class*="product-grid"]"#.to_string(),
                "div.product".to_string(),
                r#"div[class*="product-list"]"#.to_string(),
                r#"div[class*="product-card"]"#.to_string(),
                r#"div[class*="results"]"#.to_string(),
            ],
            ready_timeout_secs: 15,
            cookie_selector: "button[id*='cookie'], button[class*='cookie'], a[class*='cookie']"
                .to_string(),
            load_more_selector: "button[class*='load-more'], a[class*='load-more']".to_string(),
            load_more_clicks: 3,
            scrolls: 3,
            scroll_pause_ms: 1500,
        }
    }
}

impl BrowserSettings {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn scroll_pause(&self) -> Duration {
        Duration::from_millis(self.scroll_pause_ms)
    }
}

/// What a fiscal code that fails to decode turns into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MalformedCodePolicy {
    /// Leave the date empty.
    #[default]
    Missing,
    /// Use `sentinel_date`.
    Sentinel,
    /// Quarter dates are derived from the row's week code when it decodes; otherwise empty.
    Derive,
}

/// What an unparseable metric cell turns into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnparseablePolicy {
    Zero,
    #[default]
    Missing,
}

/// Input file formats the normalizer reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SheetFormat {
    Xlsx,
    Csv,
    Numbers,
}

/// Header names of the columns the normalizer requires.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnNames {
    pub product_code: String,
    pub product: String,
    pub fiscal_quarter: String,
    pub fiscal_week: String,
    pub sessions: String,
    pub add_to_cart: String,
    pub units_sold: String,
}

impl Default for ColumnNames {
    fn default() -> Self {
        Self {
            product_code: "Product Code".to_string(),
            product: "Product".to_string(),
            fiscal_quarter: "FISCAL_QTR_YEAR_NAME".to_string(),
            fiscal_week: "FISCAL_WEEK_YEAR_NAME".to_string(),
            sessions: "Sessions".to_string(),
            add_to_cart: "PDP Add to Cart Units".to_string(),
            units_sold: "Units Sold".to_string(),
        }
    }
}

impl ColumnNames {
    pub fn required(&self) -> [&str; 7] {
        [
            &self.product_code,
            &self.product,
            &self.fiscal_quarter,
            &self.fiscal_week,
            &self.sessions,
            &self.add_to_cart,
            &self.units_sold,
        ]
    }
}

/// Settings for the `normalize` command.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerSettings {
    /// Local path or http(s) URL of the spreadsheet.
    pub input: Option<String>,
    pub format: Option<SheetFormat>,
    /// Environment variable holding the download token. `None` disables the check.
    pub token_env: Option<String>,
    pub output: PathBuf,
    pub diagnostics: Option<PathBuf>,
    pub columns: ColumnNames,
    pub malformed_codes: MalformedCodePolicy,
    pub sentinel_date: NaiveDate,
    pub unparseable: UnparseablePolicy,
    pub fill_gaps: bool,
    pub forecast: ForecastSettings,
}

impl Default for NormalizerSettings {
    fn default() -> Self {
        Self {
            input: None,
            format: None,
            token_env: Some("GITHUB_TOKEN".to_string()),
            output: PathBuf::from("processed_data_with_forecasts.csv"),
            diagnostics: Some(PathBuf::from("normalize_diagnostics.json")),
            columns: ColumnNames::default(),
            malformed_codes: MalformedCodePolicy::default(),
            sentinel_date: NaiveDate::from_ymd_opt(1900, 1, 1).unwrap_or_default(),
            unparseable: UnparseablePolicy::default(),
            fill_gaps: true,
            forecast: ForecastSettings::default(),
        }
    }
}

/// Per-product forecasting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastSettings {
    pub enabled: bool,
    pub steps: usize,
    /// Pick (p, d, q) by AIC instead of using `order`.
    pub auto_order: bool,
    pub order: [usize; 3],
    pub seasonal_period: usize,
    /// Series with fewer non-zero observations are forecast as zeros.
    pub min_nonzero: usize,
    /// Worker threads for the forecast pool. `None` uses rayon's default.
    pub threads: Option<usize>,
}

impl Default for ForecastSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            steps: 10,
            auto_order: false,
            order: [1, 1, 1],
            seasonal_period: 52,
            min_nonzero: 3,
            threads: None,
        }
    }
}

/// Settings for the `convert-numbers` command.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NumbersSettings {
    /// Zero-based table rows removed before the header row is taken.
    pub drop_rows: Vec<usize>,
    /// Zero-based column removed from the output.
    pub drop_column: Option<usize>,
    pub output: PathBuf,
}

impl Default for NumbersSettings {
    fn default() -> Self {
        Self {
            drop_rows: vec![0, 2],
            drop_column: Some(4),
            output: PathBuf::from("processed_output.csv"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_currys_layout() {
        let config = Config::default();
        assert_eq!(config.scraper.retry.attempts, None);
        assert_eq!(config.scraper.max_pages, 50);
        assert_eq!(config.scraper.categories.len(), 6);
        assert_eq!(config.scraper.site.next_page_selectors[0], "a.next");
        assert_eq!(config.normalizer.forecast.order, [1, 1, 1]);
        assert_eq!(config.normalizer.forecast.steps, 10);
        assert_eq!(config.scraper.output_columns().len(), 24);
    }

    #[test]
    fn test_attempt_budget_depends_on_proxies() {
        let retry = RetrySettings::default();
        assert_eq!(retry.attempts_for(false), 3);
        assert_eq!(retry.attempts_for(true), 5);

        let fixed = RetrySettings {
            attempts: Some(2),
            ..RetrySettings::default()
        };
        assert_eq!(fixed.attempts_for(true), 2);

        let zero = RetrySettings {
            attempts: Some(0),
            ..RetrySettings::default()
        };
        assert_eq!(zero.attempts_for(false), 1);
    }

    #[test]
    fn test_example_file_parses() {
        let config = Config::from_toml(include_str!("../../shelfwatch.example.toml")).unwrap();
        assert_eq!(config.scraper.categories.len(), 2);
        assert_eq!(config.scraper.page_delay, DelayRange::new(2.0, 4.0));
        assert_eq!(config.normalizer.token_env.as_deref(), Some("GITHUB_TOKEN"));
        assert_eq!(config.numbers.drop_column, Some(4));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let toml = r#"
            [scraper]
            backend = "http"
            strategy = "visible_text"
            categories = ["https://example.com/a"]

            [scraper.retry]
            attempts = 5

            [normalizer]
            malformed_codes = "sentinel"
            sentinel_date = "2000-01-01"

            [normalizer.forecast]
            auto_order = true
        "#;

        let config = Config::from_toml(toml).unwrap();
        assert_eq!(config.scraper.backend, FetchBackend::Http);
        assert_eq!(config.scraper.strategy, ExtractionStrategy::VisibleText);
        assert_eq!(config.scraper.categories, vec!["https://example.com/a"]);
        assert_eq!(config.scraper.retry.attempts, Some(5));
        assert_eq!(config.scraper.retry.attempts_for(false), 5);
        assert_eq!(config.scraper.retry.block_markers.len(), 2);
        assert_eq!(config.scraper.output_columns().len(), 5);
        assert_eq!(config.normalizer.malformed_codes, MalformedCodePolicy::Sentinel);
        assert_eq!(
            config.normalizer.sentinel_date,
            NaiveDate::from_ymd_opt(2000, 1, 1).unwrap()
        );
        assert!(config.normalizer.forecast.auto_order);
        assert_eq!(config.normalizer.forecast.steps, 10);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.numbers.drop_rows, vec![0, 2]);
    }

    #[test]
    fn test_invalid_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "[scraper\nbackend = 1").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_delay_sample_within_bounds() {
        let range = DelayRange::new(0.01, 0.02);
        for _ in 0..20 {
            let d = range.sample();
            assert!(d >= Duration::from_secs_f64(0.01));
            assert!(d <= Duration::from_secs_f64(0.02));
        }
        assert_eq!(DelayRange::none().sample(), Duration::ZERO);
    }
}
