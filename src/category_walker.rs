use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use scraper::Html;
use tracing::{info, warn};

use crate::config::{DelayRange, ScraperSettings};
use crate::error::ConfigError;
use crate::fetcher::{RetryingFetcher, build_fetcher};
use crate::models::ProductRecord;
use crate::output::ProductCsvSink;
use crate::scraper::{Extraction, ItemExtractor, PageParser};

/// Everything collected from one category.
#[derive(Debug, Default)]
pub struct CategoryResult {
    pub start_url: String,
    pub records: Vec<ProductRecord>,
    pub pages: usize,
    pub skipped: usize,
}

/// Records and follow-up link from a single listing page.
#[derive(Debug, Default)]
pub struct PageResult {
    pub records: Vec<ProductRecord>,
    pub skipped: usize,
    pub next_url: Option<String>,
}

/// Totals for a full run over all categories.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub categories: usize,
    pub pages: usize,
    pub records: usize,
    pub skipped: usize,
}

/// Follows next-page links through each category, one page at a time.
pub struct CategoryWalker {
    fetcher: RetryingFetcher,
    parser: PageParser,
    extractor: ItemExtractor,
    max_pages: usize,
    page_delay: DelayRange,
    category_delay: DelayRange,
    columns: Vec<String>,
}

impl CategoryWalker {
    pub fn new(settings: &ScraperSettings, fetcher: RetryingFetcher) -> Result<Self, ConfigError> {
        if settings.max_pages == 0 {
            return Err(ConfigError::Invalid("max_pages must be at least 1".to_string()));
        }
        Ok(Self {
            fetcher,
            parser: PageParser::new(&settings.site)?,
            extractor: ItemExtractor::new(&settings.site, settings.strategy)?,
            max_pages: settings.max_pages,
            page_delay: settings.page_delay,
            category_delay: settings.category_delay,
            columns: settings.output_columns(),
        })
    }

    /// Fetch, parse and extract a single page. A failed fetch yields nothing and no next page.
    pub async fn scrape_page(&self, url: &str) -> PageResult {
        info!("Scraping lister page: {}", url);

        let Some(html) = self.fetcher.fetch(url).await else {
            warn!("No content returned, skipping page");
            return PageResult::default();
        };

        // Html is not Send, so it stays inside this block
        let result = {
            let document = Html::parse_document(&html);
            let page = self.parser.parse(&document);

            let mut result = PageResult {
                next_url: page.next_url,
                ..PageResult::default()
            };
            for item in page.items {
                match self.extractor.extract(item) {
                    Extraction::Record(record) => result.records.push(record),
                    Extraction::Skipped(_) => result.skipped += 1,
                }
            }
            result
        };

        info!(
            "Collected {} valid products from page ({} skipped)",
            result.records.len(),
            result.skipped
        );
        info!(
            "Next page link: {}",
            result.next_url.as_deref().unwrap_or("None")
        );
        result
    }

    /// Walk a category until no next page remains, a page repeats, or the page limit is hit.
    pub async fn walk(&self, start_url: &str) -> CategoryResult {
        info!("Starting to scrape category: {}", start_url);

        let mut result = CategoryResult {
            start_url: start_url.to_string(),
            ..CategoryResult::default()
        };
        let mut seen = HashSet::new();
        let mut current_url = start_url.to_string();

        loop {
            seen.insert(current_url.clone());
            let page = self.scrape_page(&current_url).await;
            result.pages += 1;
            result.skipped += page.skipped;
            result.records.extend(page.records);
            info!(
                "Total products collected in category so far: {}",
                result.records.len()
            );

            let Some(next_url) = page.next_url else {
                info!("No more pages in category");
                break;
            };
            if seen.contains(&next_url) {
                warn!(
                    "Next page {} was already visited, stopping pagination",
                    next_url
                );
                break;
            }
            if result.pages >= self.max_pages {
                warn!(
                    "Reached maximum page limit ({}) for category: {}",
                    self.max_pages, start_url
                );
                break;
            }

            info!("Moving to next page: {}", next_url);
            current_url = next_url;
            tokio::time::sleep(self.page_delay.sample()).await;
        }

        info!(
            "Finished scraping category, collected {} products from {} pages",
            result.records.len(),
            result.pages
        );
        result
    }

    /// Walk every category and write the records to `output`.
    ///
    /// With `append_per_category` each category is appended as soon as it finishes;
    /// otherwise the file is rewritten once at the end.
    pub async fn scrape_all(
        &self,
        categories: &[String],
        output: &Path,
        append_per_category: bool,
    ) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        let mut collected = Vec::new();

        for (index, url) in categories.iter().enumerate() {
            info!("Processing category {}/{}: {}", index + 1, categories.len(), url);
            let category = self.walk(url).await;

            summary.categories += 1;
            summary.pages += category.pages;
            summary.skipped += category.skipped;
            summary.records += category.records.len();

            if append_per_category {
                let mut sink = ProductCsvSink::append(output, self.columns.clone())
                    .with_context(|| format!("opening {}", output.display()))?;
                let written = sink.write_all(&category.records)?;
                info!("Appended {} products to {}", written, output.display());
            } else {
                collected.extend(category.records);
            }
            info!(
                "Total products collected across all categories: {}",
                summary.records
            );

            if index + 1 < categories.len() {
                tokio::time::sleep(self.category_delay.sample()).await;
            }
        }

        if !append_per_category {
            info!("Writing {} products to CSV", collected.len());
            let mut sink = ProductCsvSink::create(output, self.columns.clone())
                .with_context(|| format!("creating {}", output.display()))?;
            sink.write_all(&collected)?;
        }

        info!(
            "Scraped {} products from {} categories. Data saved to {}",
            summary.records,
            summary.categories,
            output.display()
        );
        Ok(summary)
    }

    /// Release the fetcher's browser or connections.
    pub async fn shutdown(&self) {
        self.fetcher.shutdown().await;
    }
}

/// Build the configured fetcher, walk every category and shut the fetcher down again,
/// whether or not the walk succeeded.
pub async fn run(settings: &ScraperSettings) -> Result<RunSummary> {
    if settings.categories.is_empty() {
        warn!("No categories configured, nothing to scrape");
    }

    let fetcher = build_fetcher(settings).await?;
    info!("Starting scraper with the {} fetcher", fetcher.transport());
    let walker = CategoryWalker::new(settings, fetcher)?;

    let result = walker
        .scrape_all(
            &settings.categories,
            &settings.output,
            settings.append_per_category,
        )
        .await;

    walker.shutdown().await;
    result
}
