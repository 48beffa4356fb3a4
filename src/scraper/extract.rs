//! Per-item field extraction from visible text or the embedded JSON data layer

use scraper::{ElementRef, Selector};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use super::{compile_selector, parse_origin, resolve_url};
use crate::config::{ExtractionStrategy, SiteSettings};
use crate::error::ConfigError;
use crate::models::{ProductRecord, fields};

/// Why an item produced no record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    #[error("missing title")]
    MissingTitle,
    #[error("missing price")]
    MissingPrice,
    #[error("no `{0}` attribute")]
    MissingData(String),
    #[error("malformed product data: {0}")]
    MalformedData(String),
}

/// Result of extracting one item.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    Record(ProductRecord),
    Skipped(SkipReason),
}

impl Extraction {
    pub fn into_record(self) -> Option<ProductRecord> {
        match self {
            Self::Record(record) => Some(record),
            Self::Skipped(_) => None,
        }
    }
}

/// Reads product fields out of a single listing item element.
#[derive(Debug, Clone)]
pub struct ItemExtractor {
    strategy: ExtractionStrategy,
    origin: Url,
    data_attribute: String,
    title: Selector,
    price: Selector,
    link: Selector,
    rating: Selector,
    reviews: Selector,
    product_code: Option<Selector>,
}

impl ItemExtractor {
    pub fn new(site: &SiteSettings, strategy: ExtractionStrategy) -> Result<Self, ConfigError> {
        Ok(Self {
            strategy,
            origin: parse_origin(&site.origin)?,
            data_attribute: site.product_data_attribute.clone(),
            title: compile_selector(&site.title)?,
            price: compile_selector(&site.price)?,
            link: compile_selector(&site.link)?,
            rating: compile_selector(&site.rating)?,
            reviews: compile_selector(&site.reviews)?,
            product_code: site
                .product_code
                .as_deref()
                .map(compile_selector)
                .transpose()?,
        })
    }

    pub fn extract(&self, item: ElementRef<'_>) -> Extraction {
        let outcome = match self.strategy {
            ExtractionStrategy::VisibleText => self.from_visible_text(item),
            ExtractionStrategy::StructuredData => self.from_data_layer(item),
        };

        let record = match outcome {
            Ok(record) => record,
            Err(reason) => {
                warn!("Skipping product: {}", reason);
                return Extraction::Skipped(reason);
            }
        };

        let title_field = fields::TITLE;
        let price_field = self.price_field();
        if !record.has(title_field) {
            warn!("Missing title for product: {}", record.get(fields::URL));
            return Extraction::Skipped(SkipReason::MissingTitle);
        }
        if !record.has(price_field) {
            warn!("Missing price for product: {}", record.get(fields::URL));
            return Extraction::Skipped(SkipReason::MissingPrice);
        }

        debug!(
            "Scraped product: {}, Price: {}, URL: {}",
            record.get(title_field),
            record.get(price_field),
            record.get(fields::URL)
        );
        Extraction::Record(record)
    }

    fn price_field(&self) -> &'static str {
        match self.strategy {
            ExtractionStrategy::VisibleText => fields::PRICE,
            ExtractionStrategy::StructuredData => fields::PRICE_REVENUE,
        }
    }

    fn text_of(item: ElementRef<'_>, selector: &Selector) -> Option<String> {
        item.select(selector)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .filter(|text| !text.is_empty())
    }

    fn link_of(&self, item: ElementRef<'_>) -> Option<String> {
        item.select(&self.link)
            .find_map(|el| el.value().attr("href"))
            .and_then(|href| resolve_url(&self.origin, href))
    }

    /// Fields shared by both strategies: link, rating and review count.
    fn visible_common(&self, item: ElementRef<'_>, record: &mut ProductRecord) {
        if let Some(url) = self.link_of(item) {
            record.set(fields::URL, url);
        }
        if let Some(rating) = Self::text_of(item, &self.rating) {
            record.set(fields::RATING, rating);
        }
        if let Some(reviews) = Self::text_of(item, &self.reviews) {
            record.set(fields::REVIEWS, reviews);
        }
    }

    fn from_visible_text(&self, item: ElementRef<'_>) -> Result<ProductRecord, SkipReason> {
        let mut record = ProductRecord::new();
        if let Some(title) = Self::text_of(item, &self.title) {
            record.set(fields::TITLE, title);
        }
        if let Some(price) = Self::text_of(item, &self.price) {
            record.set(fields::PRICE, price);
        }
        if let Some(selector) = &self.product_code
            && let Some(code) = Self::text_of(item, selector)
        {
            record.set(fields::PRODUCT_CODE, code);
        }
        self.visible_common(item, &mut record);
        Ok(record)
    }

    fn from_data_layer(&self, item: ElementRef<'_>) -> Result<ProductRecord, SkipReason> {
        let raw = item
            .value()
            .attr(&self.data_attribute)
            .filter(|raw| !raw.trim().is_empty())
            .ok_or_else(|| SkipReason::MissingData(self.data_attribute.clone()))?;

        let mut record = flatten_data_layer(raw)?;
        self.visible_common(item, &mut record);
        Ok(record)
    }
}

/// Render a JSON scalar the way it reads on the page: strings bare, integral numbers without `.0`.
fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(match n.as_f64() {
            Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            _ => n.to_string(),
        }),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
    .filter(|s| !s.is_empty())
}

fn set_scalar(record: &mut ProductRecord, field: &str, value: Option<&Value>) {
    if let Some(text) = value.and_then(scalar) {
        record.set(field, text);
    }
}

fn joined(values: impl Iterator<Item = String>) -> Option<String> {
    let parts: Vec<String> = values.filter(|s| !s.is_empty()).collect();
    (!parts.is_empty()).then(|| parts.join(", "))
}

/// Map a `data-productdatalayer` payload onto the flat record schema.
///
/// The payload is normally a one-element array; a bare object is accepted too.
pub fn flatten_data_layer(raw: &str) -> Result<ProductRecord, SkipReason> {
    let parsed: Value =
        serde_json::from_str(raw).map_err(|e| SkipReason::MalformedData(e.to_string()))?;

    let data = match &parsed {
        Value::Array(entries) => entries
            .first()
            .ok_or_else(|| SkipReason::MalformedData("empty array".to_string()))?,
        Value::Object(_) => &parsed,
        _ => {
            return Err(SkipReason::MalformedData(
                "expected an array or object".to_string(),
            ));
        }
    };
    if !data.is_object() {
        return Err(SkipReason::MalformedData("entry is not an object".to_string()));
    }

    let mut record = ProductRecord::new();
    set_scalar(&mut record, fields::TITLE, data.get("name"));
    set_scalar(&mut record, fields::PRODUCT_CODE, data.get("id"));
    set_scalar(&mut record, fields::BRAND, data.get("brand"));
    set_scalar(&mut record, fields::EAN, data.get("ean"));
    set_scalar(&mut record, fields::SKU, data.get("sku"));

    if let Some(price) = data.get("price").and_then(|p| p.get(0)) {
        set_scalar(&mut record, fields::PRICE_REVENUE, price.get("revenue"));
        set_scalar(&mut record, fields::PRICE_BASE_REVENUE, price.get("baseRevenue"));
        set_scalar(&mut record, fields::PRICE_CURRENCY, price.get("currency"));
        set_scalar(&mut record, fields::PRICE_TAX, price.get("tax"));
        if let Some(offers) = price.get("offer").and_then(Value::as_array)
            && let Some(names) = joined(
                offers
                    .iter()
                    .filter_map(|o| o.get("name").and_then(scalar)),
            )
        {
            record.set(fields::PRICE_OFFERS, names);
        }
    }

    for payment in data
        .get("payment")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        let field = match payment.get("frequency").and_then(Value::as_str) {
            Some("one off") => fields::PAYMENT_ONE_OFF_AMOUNT,
            Some("monthly") => fields::PAYMENT_MONTHLY_AMOUNT,
            _ => continue,
        };
        set_scalar(&mut record, field, payment.get("amount"));
    }

    for availability in data
        .get("availability")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
    {
        let (status_field, type_field) =
            match availability.get("availabilityStatus").and_then(Value::as_str) {
                Some("shipping") => (
                    fields::AVAILABILITY_SHIPPING_STATUS,
                    fields::AVAILABILITY_SHIPPING_TYPE,
                ),
                Some("collect in store") => (
                    fields::AVAILABILITY_COLLECT_STATUS,
                    fields::AVAILABILITY_COLLECT_TYPE,
                ),
                _ => continue,
            };
        set_scalar(&mut record, status_field, availability.get("availabilityStatus"));
        set_scalar(&mut record, type_field, availability.get("availabilityType"));
    }

    if let Some(category) = data.get("category") {
        if let Some(categories) = category.get("categories").and_then(Value::as_array)
            && let Some(text) = joined(categories.iter().filter_map(scalar))
        {
            record.set(fields::CATEGORY_CATEGORIES, text);
        }
        set_scalar(&mut record, fields::CATEGORY_MERCHENDISING_AREA, category.get("merchendisingArea"));
        set_scalar(&mut record, fields::CATEGORY_SUB_PLANNING_GROUP, category.get("subPlanningGroup"));
        set_scalar(&mut record, fields::CATEGORY_PLANNING_GROUP, category.get("planningGroup"));
        set_scalar(&mut record, fields::CATEGORY_PRODUCT_TYPE, category.get("productType"));
    }

    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Html;

    const DATA_LAYER: &str = r#"[{
        "name": "Apple MacBook Air 13.6\" (2024) - M3, 256 GB SSD, Midnight",
        "id": "10263081",
        "brand": "APPLE",
        "ean": "195949134489",
        "sku": "10263081",
        "price": [{"revenue": 999.0, "baseRevenue": 832.5, "currency": "GBP", "tax": 166.5,
                   "offer": [{"name": "Save £100"}, {"name": "Free AppleCare"}]}],
        "payment": [{"frequency": "monthly", "amount": 41.63}, {"frequency": "one off", "amount": 999}],
        "availability": [{"availabilityStatus": "shipping", "availabilityType": "in stock"},
                         {"availabilityStatus": "collect in store", "availabilityType": "limited"}],
        "category": {"categories": ["Computing", "Laptops"], "merchendisingArea": "Computing",
                     "subPlanningGroup": "Apple Laptops", "planningGroup": "Laptops",
                     "productType": "Laptop"}
    }]"#;

    fn first_item(html: &Html) -> ElementRef<'_> {
        let selector = Selector::parse("div.product").unwrap();
        html.select(&selector).next().unwrap()
    }

    fn escape_attr(raw: &str) -> String {
        raw.replace('&', "&amp;").replace('"', "&quot;")
    }

    #[test]
    fn test_flatten_maps_nested_fields() {
        let record = flatten_data_layer(DATA_LAYER).unwrap();
        assert_eq!(record.get(fields::PRODUCT_CODE), "10263081");
        assert_eq!(record.get(fields::PRICE_REVENUE), "999");
        assert_eq!(record.get(fields::PRICE_BASE_REVENUE), "832.5");
        assert_eq!(record.get(fields::PRICE_OFFERS), "Save £100, Free AppleCare");
        assert_eq!(record.get(fields::PAYMENT_MONTHLY_AMOUNT), "41.63");
        assert_eq!(record.get(fields::PAYMENT_ONE_OFF_AMOUNT), "999");
        assert_eq!(record.get(fields::AVAILABILITY_SHIPPING_STATUS), "shipping");
        assert_eq!(record.get(fields::AVAILABILITY_COLLECT_TYPE), "limited");
        assert_eq!(record.get(fields::CATEGORY_CATEGORIES), "Computing, Laptops");
        assert_eq!(record.get(fields::CATEGORY_PRODUCT_TYPE), "Laptop");
    }

    #[test]
    fn test_flatten_rejects_malformed_json() {
        assert!(matches!(
            flatten_data_layer("[{not json"),
            Err(SkipReason::MalformedData(_))
        ));
        assert!(matches!(
            flatten_data_layer("[]"),
            Err(SkipReason::MalformedData(_))
        ));
    }

    #[test]
    fn test_structured_item_with_visible_extras() {
        let html = Html::parse_document(&format!(
            r#"<div class="product" data-productdatalayer="{}">
                 <a class="link text-truncate pdpLink" href="/products/macbook-air-10263081.html">x</a>
                 <span class="nvda_star_reading">4.8 out of 5</span>
                 <span class="rating-count average-reviews">(312)</span>
               </div>"#,
            escape_attr(DATA_LAYER)
        ));
        let extractor =
            ItemExtractor::new(&SiteSettings::default(), ExtractionStrategy::StructuredData)
                .unwrap();

        let record = extractor.extract(first_item(&html)).into_record().unwrap();
        assert_eq!(
            record.get(fields::URL),
            "https://www.currys.co.uk/products/macbook-air-10263081.html"
        );
        assert_eq!(record.get(fields::RATING), "4.8 out of 5");
        assert_eq!(record.get(fields::REVIEWS), "(312)");
        assert_eq!(record.get(fields::BRAND), "APPLE");
    }

    #[test]
    fn test_structured_item_without_price_is_skipped() {
        let payload = r#"[{"name": "AirPods Pro", "price": []}]"#;
        let html = Html::parse_document(&format!(
            r#"<div class="product" data-productdatalayer="{}"></div>"#,
            escape_attr(payload)
        ));
        let extractor =
            ItemExtractor::new(&SiteSettings::default(), ExtractionStrategy::StructuredData)
                .unwrap();
        assert_eq!(
            extractor.extract(first_item(&html)),
            Extraction::Skipped(SkipReason::MissingPrice)
        );
    }

    #[test]
    fn test_structured_item_without_attribute_is_skipped() {
        let html = Html::parse_document(r#"<div class="product"><h2>Orphan</h2></div>"#);
        let extractor =
            ItemExtractor::new(&SiteSettings::default(), ExtractionStrategy::StructuredData)
                .unwrap();
        assert!(matches!(
            extractor.extract(first_item(&html)),
            Extraction::Skipped(SkipReason::MissingData(_))
        ));
    }

    #[test]
    fn test_visible_text_requires_title_and_price() {
        let extractor =
            ItemExtractor::new(&SiteSettings::default(), ExtractionStrategy::VisibleText).unwrap();

        let complete = Html::parse_document(
            r#"<div class="product">
                 <h2 class="pdp-grid-product-name"> iPhone 15 </h2>
                 <span class="value">£699.00</span>
                 <a class="link text-truncate pdpLink" href="https://www.currys.co.uk/p/iphone">x</a>
               </div>"#,
        );
        let record = extractor.extract(first_item(&complete)).into_record().unwrap();
        assert_eq!(record.get(fields::TITLE), "iPhone 15");
        assert_eq!(record.get(fields::PRICE), "£699.00");
        assert_eq!(record.get(fields::URL), "https://www.currys.co.uk/p/iphone");
        assert_eq!(record.get(fields::RATING), "No rating");

        let no_price = Html::parse_document(
            r#"<div class="product"><h2 class="pdp-grid-product-name">iPhone 15</h2></div>"#,
        );
        assert_eq!(
            extractor.extract(first_item(&no_price)),
            Extraction::Skipped(SkipReason::MissingPrice)
        );

        let no_title =
            Html::parse_document(r#"<div class="product"><span class="value">£1</span></div>"#);
        assert_eq!(
            extractor.extract(first_item(&no_title)),
            Extraction::Skipped(SkipReason::MissingTitle)
        );
    }
}
