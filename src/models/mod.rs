//! Data models for scraped products and normalized spreadsheet rows

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

/// Field names and their placeholders.
pub mod fields {
    pub const TITLE: &str = "title";
    pub const PRICE: &str = "price";
    pub const PRICE_REVENUE: &str = "price_revenue";
    pub const PRODUCT_CODE: &str = "product_code";
    pub const RATING: &str = "rating";
    pub const REVIEWS: &str = "reviews";
    pub const URL: &str = "url";
    pub const BRAND: &str = "brand";
    pub const EAN: &str = "ean";
    pub const SKU: &str = "sku";
    pub const PRICE_BASE_REVENUE: &str = "price_base_revenue";
    pub const PRICE_CURRENCY: &str = "price_currency";
    pub const PRICE_TAX: &str = "price_tax";
    pub const PRICE_OFFERS: &str = "price_offers";
    pub const PAYMENT_ONE_OFF_AMOUNT: &str = "payment_one_off_amount";
    pub const PAYMENT_MONTHLY_AMOUNT: &str = "payment_monthly_amount";
    pub const AVAILABILITY_SHIPPING_STATUS: &str = "availability_shipping_status";
    pub const AVAILABILITY_COLLECT_STATUS: &str = "availability_collect_status";
    pub const AVAILABILITY_SHIPPING_TYPE: &str = "availability_shipping_type";
    pub const AVAILABILITY_COLLECT_TYPE: &str = "availability_collect_type";
    pub const CATEGORY_CATEGORIES: &str = "category_categories";
    pub const CATEGORY_MERCHENDISING_AREA: &str = "category_merchendising_area";
    pub const CATEGORY_SUB_PLANNING_GROUP: &str = "category_sub_planning_group";
    pub const CATEGORY_PLANNING_GROUP: &str = "category_planning_group";
    pub const CATEGORY_PRODUCT_TYPE: &str = "category_product_type";

    /// Columns written for the visible-text strategy.
    pub const VISIBLE_TEXT_COLUMNS: &[&str] = &[TITLE, PRICE, URL, RATING, REVIEWS];

    /// Columns written for the structured-data strategy.
    pub const STRUCTURED_DATA_COLUMNS: &[&str] = &[
        TITLE,
        PRICE_REVENUE,
        PRODUCT_CODE,
        RATING,
        REVIEWS,
        URL,
        BRAND,
        EAN,
        SKU,
        PRICE_BASE_REVENUE,
        PRICE_CURRENCY,
        PRICE_TAX,
        PRICE_OFFERS,
        PAYMENT_ONE_OFF_AMOUNT,
        PAYMENT_MONTHLY_AMOUNT,
        AVAILABILITY_SHIPPING_STATUS,
        AVAILABILITY_COLLECT_STATUS,
        AVAILABILITY_SHIPPING_TYPE,
        AVAILABILITY_COLLECT_TYPE,
        CATEGORY_CATEGORIES,
        CATEGORY_MERCHENDISING_AREA,
        CATEGORY_SUB_PLANNING_GROUP,
        CATEGORY_PLANNING_GROUP,
        CATEGORY_PRODUCT_TYPE,
    ];

    /// The sentinel written when `field` could not be extracted.
    pub fn placeholder(field: &str) -> &'static str {
        match field {
            TITLE => "No title",
            PRICE | PRICE_REVENUE => "No price",
            PRODUCT_CODE => "No product code",
            RATING => "No rating",
            REVIEWS => "No reviews",
            URL => "No URL",
            BRAND => "No brand",
            EAN => "No EAN",
            SKU => "No SKU",
            PRICE_BASE_REVENUE => "No base revenue",
            PRICE_CURRENCY => "No currency",
            PRICE_TAX => "No tax",
            PRICE_OFFERS => "No offers",
            PAYMENT_ONE_OFF_AMOUNT => "No one-off amount",
            PAYMENT_MONTHLY_AMOUNT => "No monthly amount",
            AVAILABILITY_SHIPPING_STATUS => "No shipping status",
            AVAILABILITY_COLLECT_STATUS => "No collect status",
            AVAILABILITY_SHIPPING_TYPE => "No shipping type",
            AVAILABILITY_COLLECT_TYPE => "No collect type",
            CATEGORY_CATEGORIES => "No categories",
            CATEGORY_MERCHENDISING_AREA => "No merchendising area",
            CATEGORY_SUB_PLANNING_GROUP => "No sub planning group",
            CATEGORY_PLANNING_GROUP => "No planning group",
            CATEGORY_PRODUCT_TYPE => "No product type",
            _ => "",
        }
    }
}

/// A scraped product: named string fields, absent ones resolving to their placeholder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProductRecord {
    values: BTreeMap<String, String>,
}

impl ProductRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value. Empty strings are treated as absent.
    pub fn set(&mut self, field: &str, value: impl Into<String>) {
        let value = value.into();
        if value.is_empty() {
            self.values.remove(field);
        } else {
            self.values.insert(field.to_string(), value);
        }
    }

    pub fn with(mut self, field: &str, value: impl Into<String>) -> Self {
        self.set(field, value);
        self
    }

    /// The extracted value, or `None` when absent or equal to the placeholder.
    pub fn value(&self, field: &str) -> Option<&str> {
        self.values
            .get(field)
            .map(String::as_str)
            .filter(|v| *v != fields::placeholder(field))
    }

    /// The value for output, substituting the placeholder.
    pub fn get(&self, field: &str) -> &str {
        self.values
            .get(field)
            .map_or_else(|| fields::placeholder(field), String::as_str)
    }

    pub fn has(&self, field: &str) -> bool {
        self.value(field).is_some()
    }

    /// Values in `columns` order.
    pub fn row<'a>(&'a self, columns: &'a [String]) -> impl Iterator<Item = &'a str> + 'a {
        columns.iter().map(|c| self.get(c))
    }
}

/// Where a normalized row came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DataType {
    Actual,
    Filled,
    Forecast,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Actual => "Actual",
            Self::Filled => "Filled",
            Self::Forecast => "Forecast",
        })
    }
}

/// The three weekly metrics, in output order.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Metrics {
    pub sessions: Option<f64>,
    pub add_to_cart: Option<f64>,
    pub units_sold: Option<f64>,
}

impl Metrics {
    pub const fn zero() -> Self {
        Self {
            sessions: Some(0.0),
            add_to_cart: Some(0.0),
            units_sold: Some(0.0),
        }
    }

    pub fn from_array(values: [Option<f64>; 3]) -> Self {
        Self {
            sessions: values[0],
            add_to_cart: values[1],
            units_sold: values[2],
        }
    }

    pub fn as_array(&self) -> [Option<f64>; 3] {
        [self.sessions, self.add_to_cart, self.units_sold]
    }

    /// Element-wise sum; a side that is missing contributes nothing.
    pub fn merge(&self, other: &Self) -> Self {
        let add = |a: Option<f64>, b: Option<f64>| match (a, b) {
            (Some(x), Some(y)) => Some(x + y),
            (x, None) => x,
            (None, y) => y,
        };
        Self {
            sessions: add(self.sessions, other.sessions),
            add_to_cart: add(self.add_to_cart, other.add_to_cart),
            units_sold: add(self.units_sold, other.units_sold),
        }
    }
}

/// One row of the normalized weekly series.
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodRow {
    pub product_code: String,
    pub product: String,
    pub quarter_label: String,
    pub week_label: String,
    pub metrics: Metrics,
    pub quarter_start: Option<NaiveDate>,
    pub week_start: Option<NaiveDate>,
    pub data_type: DataType,
}

/// Counts and warnings collected while normalizing, written as JSON.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Diagnostics {
    pub generated_at: Option<DateTime<Utc>>,
    pub as_of: Option<NaiveDate>,
    pub input: String,
    pub rows_read: usize,
    pub rows_dropped_missing_product: usize,
    pub duplicate_weeks_merged: usize,
    pub malformed_quarter_codes: usize,
    pub malformed_week_codes: usize,
    pub unparseable_metrics: usize,
    pub filled_weeks: usize,
    pub products: usize,
    pub forecast_rows: usize,
    pub series_below_threshold: usize,
    pub forecast_failures: usize,
    pub warnings: Vec<String>,
}

impl Diagnostics {
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("{}", message);
        self.warnings.push(message);
    }
}
