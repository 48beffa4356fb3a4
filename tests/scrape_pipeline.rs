use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use shelfwatch::category_walker::CategoryWalker;
use shelfwatch::config::{DelayRange, ExtractionStrategy, RetrySettings, ScraperSettings};
use shelfwatch::error::FetchError;
use shelfwatch::fetcher::RetryingFetcher;
use shelfwatch::fetcher::proxy::ProxyEndpoint;
use shelfwatch::traits::PageFetcher;

const START: &str = "https://www.currys.co.uk/computing/laptops";

fn item(title: &str, price: &str, href: &str) -> String {
    format!(
        r#"<div class="product">
             <h2 class="pdp-grid-product-name">{title}</h2>
             <span class="value">{price}</span>
             <a class="link text-truncate pdpLink" href="{href}">View</a>
           </div>"#
    )
}

fn page(items: &[String], next: Option<&str>) -> String {
    let next = next
        .map(|href| format!(r#"<a class="next" href="{href}">Next</a>"#))
        .unwrap_or_default();
    format!(
        r#"<html><body><div class="product-grid">{}</div>{next}</body></html>"#,
        items.concat()
    )
}

/// Serves fixed pages by URL and records every request.
struct SiteFixture {
    pages: HashMap<String, String>,
    requests: Mutex<Vec<String>>,
}

impl SiteFixture {
    fn new(pages: Vec<(&str, String)>) -> Self {
        Self {
            pages: pages
                .into_iter()
                .map(|(url, html)| (url.to_string(), html))
                .collect(),
            requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl PageFetcher for SiteFixture {
    fn name(&self) -> &str {
        "fixture"
    }

    async fn fetch_page(&self, url: &str, _proxy: Option<&ProxyEndpoint>) -> Result<String, FetchError> {
        self.requests.lock().unwrap().push(url.to_string());
        self.pages.get(url).cloned().ok_or(FetchError::Empty)
    }
}

fn settings() -> ScraperSettings {
    ScraperSettings {
        strategy: ExtractionStrategy::VisibleText,
        page_delay: DelayRange::none(),
        category_delay: DelayRange::none(),
        retry: RetrySettings {
            attempts: Some(1),
            success_delay: DelayRange::none(),
            failure_delay: DelayRange::none(),
            ..RetrySettings::default()
        },
        ..ScraperSettings::default()
    }
}

fn walker(pages: Vec<(&str, String)>) -> CategoryWalker {
    let settings = settings();
    let retry = settings.retry.clone();
    CategoryWalker::new(&settings, RetryingFetcher::new(Box::new(SiteFixture::new(pages)), retry)).unwrap()
}

#[tokio::test]
async fn test_two_page_category_writes_three_rows() {
    let second = "https://www.currys.co.uk/computing/laptops?page=2";
    let walker = walker(vec![
        (
            START,
            page(
                &[
                    item("MacBook Air 13", "£999.00", "/products/macbook-air-13"),
                    item("MacBook Pro 14", "£1,599.00", "/products/macbook-pro-14"),
                ],
                Some("/computing/laptops?page=2"),
            ),
        ),
        (
            second,
            page(&[item("iPad Pro", "£899.00", "https://www.currys.co.uk/products/ipad-pro")], None),
        ),
    ]);

    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("currys_products.csv");
    let summary = walker
        .scrape_all(&[START.to_string()], &output, false)
        .await
        .unwrap();

    assert_eq!(summary.categories, 1);
    assert_eq!(summary.pages, 2);
    assert_eq!(summary.records, 3);

    let mut reader = csv::Reader::from_path(&output).unwrap();
    let header: Vec<String> = reader.headers().unwrap().iter().map(str::to_string).collect();
    assert_eq!(header, vec!["title", "price", "url", "rating", "reviews"]);

    let rows: Vec<csv::StringRecord> = reader.records().map(Result::unwrap).collect();
    assert_eq!(rows.len(), 3);
    assert_eq!(&rows[0][0], "MacBook Air 13");
    assert_eq!(&rows[1][1], "£1,599.00");
    assert_eq!(&rows[0][2], "https://www.currys.co.uk/products/macbook-air-13");
    assert_eq!(&rows[2][2], "https://www.currys.co.uk/products/ipad-pro");
    assert_eq!(&rows[2][3], "No rating");
}

#[tokio::test]
async fn test_items_without_price_are_skipped() {
    let walker = walker(vec![(
        START,
        page(
            &[
                item("MacBook Air 13", "£999.00", "/a"),
                r#"<div class="product"><h2 class="pdp-grid-product-name">No price</h2></div>"#.to_string(),
            ],
            None,
        ),
    )]);

    let result = walker.walk(START).await;
    assert_eq!(result.records.len(), 1);
    assert_eq!(result.skipped, 1);
    assert_eq!(result.pages, 1);
}

#[tokio::test]
async fn test_repeated_next_link_stops_the_walk() {
    let walker = walker(vec![(
        START,
        page(&[item("MacBook Air 13", "£999.00", "/a")], Some("/computing/laptops")),
    )]);

    let result = walker.walk(START).await;
    assert_eq!(result.pages, 1);
    assert_eq!(result.records.len(), 1);
}

#[tokio::test]
async fn test_failed_fetch_ends_category_and_appends_nothing() {
    let walker = walker(Vec::new());
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("products.csv");

    let summary = walker
        .scrape_all(&[START.to_string()], &output, true)
        .await
        .unwrap();
    assert_eq!(summary.records, 0);

    let content = std::fs::read_to_string(&output).unwrap();
    assert_eq!(content.lines().collect::<Vec<_>>(), vec!["title,price,url,rating,reviews"]);
}
