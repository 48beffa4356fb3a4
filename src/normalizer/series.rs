use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::NaiveDate;

use crate::config::{MalformedCodePolicy, NormalizerSettings, UnparseablePolicy};
use crate::error::SheetError;
use crate::fiscal::{FiscalQuarter, FiscalWeek};
use crate::models::{DataType, Diagnostics, Metrics, PeriodRow};
use crate::sheet::Table;

/// Result of cleaning one metric cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricCell {
    Value(f64),
    Blank,
    Unparseable,
}

/// Strip thousands separators and whitespace, then parse.
pub fn clean_metric(raw: &str) -> MetricCell {
    let cleaned: String = raw
        .chars()
        .filter(|c| *c != ',' && !c.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return MetricCell::Blank;
    }
    match cleaned.parse::<f64>() {
        Ok(value) if value.is_finite() => MetricCell::Value(value),
        _ => MetricCell::Unparseable,
    }
}

/// A spreadsheet row after cleaning, before grouping.
#[derive(Debug, Clone)]
pub struct Observation {
    pub product_code: String,
    pub product: String,
    pub quarter_label: String,
    pub week_label: String,
    pub week: Option<FiscalWeek>,
    pub metrics: Metrics,
}

/// Read required columns and clean every row. Missing columns are fatal.
pub fn read_observations(
    table: &Table,
    settings: &NormalizerSettings,
    diagnostics: &mut Diagnostics,
) -> Result<Vec<Observation>, SheetError> {
    let [code_col, product_col, quarter_col, week_col, sessions_col, cart_col, units_col] =
        table.require(settings.columns.required())?;

    let cell = |row: &[String], index: usize| row.get(index).map(|c| c.trim().to_string()).unwrap_or_default();

    let mut observations = Vec::with_capacity(table.rows.len());
    for row in &table.rows {
        diagnostics.rows_read += 1;

        let product_code = cell(row, code_col);
        let product = cell(row, product_col);
        if product_code.is_empty() || product.is_empty() {
            diagnostics.rows_dropped_missing_product += 1;
            continue;
        }

        let mut values = [None; 3];
        for (slot, index) in values.iter_mut().zip([sessions_col, cart_col, units_col]) {
            let raw = cell(row, index);
            *slot = match clean_metric(&raw) {
                MetricCell::Value(v) => Some(v),
                MetricCell::Blank => None,
                MetricCell::Unparseable => {
                    diagnostics.unparseable_metrics += 1;
                    diagnostics.warn(format!(
                        "Unparseable value `{}` in column `{}` for product {}",
                        raw, table.header[index], product_code
                    ));
                    match settings.unparseable {
                        UnparseablePolicy::Zero => Some(0.0),
                        UnparseablePolicy::Missing => None,
                    }
                }
            };
        }

        let week_label = cell(row, week_col);
        let week = week_label.parse::<FiscalWeek>().ok();

        observations.push(Observation {
            product_code,
            product,
            quarter_label: cell(row, quarter_col),
            week_label,
            week,
            metrics: Metrics::from_array(values),
        });
    }
    Ok(observations)
}

/// Decodes quarter and week labels into start dates under the configured policy.
#[derive(Debug, Clone, Copy)]
pub struct DateDecoder {
    pub policy: MalformedCodePolicy,
    pub sentinel: NaiveDate,
}

impl DateDecoder {
    pub fn new(settings: &NormalizerSettings) -> Self {
        Self {
            policy: settings.malformed_codes,
            sentinel: settings.sentinel_date,
        }
    }

    /// `Err` carries the fallback date for a malformed label.
    pub fn quarter(&self, label: &str, week: Option<FiscalWeek>) -> Result<NaiveDate, Option<NaiveDate>> {
        if let Some(date) = label.parse::<FiscalQuarter>().ok().and_then(|q| q.start_date()) {
            return Ok(date);
        }
        Err(match self.policy {
            MalformedCodePolicy::Missing => None,
            MalformedCodePolicy::Sentinel => Some(self.sentinel),
            MalformedCodePolicy::Derive => week.and_then(|w| FiscalQuarter::containing(w).start_date()),
        })
    }

    pub fn week(&self, week: Option<FiscalWeek>) -> Result<NaiveDate, Option<NaiveDate>> {
        if let Some(date) = week.and_then(|w| w.start_date()) {
            return Ok(date);
        }
        Err(match self.policy {
            MalformedCodePolicy::Sentinel => Some(self.sentinel),
            MalformedCodePolicy::Missing | MalformedCodePolicy::Derive => None,
        })
    }
}

/// One product's observations, keyed by decodable week.
#[derive(Debug, Clone, Default)]
pub struct ProductSeries {
    pub product_code: String,
    pub product: String,
    pub weeks: BTreeMap<FiscalWeek, Observation>,
    /// Rows whose week code does not decode, in input order.
    pub undated: Vec<Observation>,
}

impl ProductSeries {
    pub fn first_week(&self) -> Option<FiscalWeek> {
        self.weeks.keys().next().copied()
    }

    pub fn last_week(&self) -> Option<FiscalWeek> {
        self.weeks.keys().next_back().copied()
    }

    /// Every week from the first to the last observation. Week 53 appears only when observed.
    pub fn continuous_weeks(&self) -> Vec<FiscalWeek> {
        let (Some(first), Some(last)) = (self.first_week(), self.last_week()) else {
            return Vec::new();
        };
        let mut weeks = Vec::new();
        let mut current = first;
        loop {
            weeks.push(current);
            if current >= last {
                break;
            }
            let long_year = FiscalWeek {
                year: current.year,
                week: current.week + 1,
            };
            current = if current.week == 52 && self.weeks.contains_key(&long_year) {
                long_year
            } else {
                current.next()
            };
        }
        weeks
    }

    /// Metric values along the continuous weeks, missing weeks and values as zero.
    pub fn zero_filled(&self) -> [Vec<f64>; 3] {
        let mut series: [Vec<f64>; 3] = Default::default();
        for week in self.continuous_weeks() {
            let values = self
                .weeks
                .get(&week)
                .map(|o| o.metrics.as_array())
                .unwrap_or_default();
            for (target, value) in series.iter_mut().zip(values) {
                target.push(value.unwrap_or(0.0));
            }
        }
        series
    }
}

/// Group observations by product code in first-appearance order, summing duplicate weeks.
pub fn group_by_product(observations: Vec<Observation>, diagnostics: &mut Diagnostics) -> Vec<ProductSeries> {
    let mut order: Vec<ProductSeries> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for observation in observations {
        let slot = *index.entry(observation.product_code.clone()).or_insert_with(|| {
            order.push(ProductSeries {
                product_code: observation.product_code.clone(),
                product: observation.product.clone(),
                ..ProductSeries::default()
            });
            order.len() - 1
        });
        let series = &mut order[slot];

        match observation.week {
            Some(week) => {
                if let Some(existing) = series.weeks.get_mut(&week) {
                    existing.metrics = existing.metrics.merge(&observation.metrics);
                    diagnostics.duplicate_weeks_merged += 1;
                } else {
                    series.weeks.insert(week, observation);
                }
            }
            None => series.undated.push(observation),
        }
    }
    order
}

/// Count and warn once per distinct malformed quarter label of a product.
fn report_quarter(
    reported: &mut HashSet<String>,
    label: &str,
    product_code: &str,
    diagnostics: &mut Diagnostics,
) {
    if reported.insert(label.to_string()) {
        diagnostics.malformed_quarter_codes += 1;
        diagnostics.warn(format!(
            "Malformed quarter code `{label}` for product {product_code}"
        ));
    }
}

/// Output rows for one product: observed weeks, optionally the gaps between them, then
/// rows whose week code could not be decoded.
pub fn product_rows(
    series: &ProductSeries,
    decoder: &DateDecoder,
    fill_gaps: bool,
    diagnostics: &mut Diagnostics,
) -> Vec<PeriodRow> {
    let weeks: Vec<FiscalWeek> = if fill_gaps {
        series.continuous_weeks()
    } else {
        series.weeks.keys().copied().collect()
    };

    // Quarter labels: forward fill, then back fill from the first observed label
    let mut labels: Vec<Option<String>> = Vec::with_capacity(weeks.len());
    let mut last_label: Option<String> = None;
    for week in &weeks {
        if let Some(observed) = series.weeks.get(week).filter(|o| !o.quarter_label.is_empty()) {
            last_label = Some(observed.quarter_label.clone());
        }
        labels.push(last_label.clone());
    }
    let first_label = labels.iter().flatten().next().cloned();
    let mut reported: HashSet<String> = HashSet::new();

    let mut rows = Vec::with_capacity(weeks.len() + series.undated.len());
    for (week, label) in weeks.iter().zip(labels) {
        let quarter_label = label.or_else(|| first_label.clone()).unwrap_or_default();
        let (metrics, data_type, week_label) = match series.weeks.get(week) {
            Some(observed) => (observed.metrics, DataType::Actual, observed.week_label.clone()),
            None => {
                diagnostics.filled_weeks += 1;
                (Metrics::zero(), DataType::Filled, week.to_string())
            }
        };

        let quarter_start = decoder.quarter(&quarter_label, Some(*week)).map_or_else(
            |fallback| {
                report_quarter(&mut reported, &quarter_label, &series.product_code, diagnostics);
                fallback
            },
            Some,
        );

        rows.push(PeriodRow {
            product_code: series.product_code.clone(),
            product: series.product.clone(),
            quarter_label,
            week_label,
            metrics,
            quarter_start,
            week_start: week.start_date(),
            data_type,
        });
    }

    for observation in &series.undated {
        diagnostics.malformed_week_codes += 1;
        diagnostics.warn(format!(
            "Malformed week code `{}` for product {}",
            observation.week_label, series.product_code
        ));
        let quarter_start = decoder.quarter(&observation.quarter_label, None).map_or_else(
            |fallback| {
                report_quarter(
                    &mut reported,
                    &observation.quarter_label,
                    &series.product_code,
                    diagnostics,
                );
                fallback
            },
            Some,
        );
        rows.push(PeriodRow {
            product_code: series.product_code.clone(),
            product: series.product.clone(),
            quarter_label: observation.quarter_label.clone(),
            week_label: observation.week_label.clone(),
            metrics: observation.metrics,
            quarter_start,
            week_start: decoder.week(None).map_or_else(|fallback| fallback, Some),
            data_type: DataType::Actual,
        });
    }
    rows
}
