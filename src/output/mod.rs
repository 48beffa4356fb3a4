//! CSV and JSON writers for products, normalized series and diagnostics

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDate;

use crate::models::{Diagnostics, PeriodRow, ProductRecord};

/// Header of the normalized weekly CSV.
pub const NORMALIZED_HEADERS: [&str; 10] = [
    "Product Code",
    "Product",
    "FISCAL_QTR_YEAR_NAME",
    "FISCAL_WEEK_YEAR_NAME",
    "Sessions",
    "PDP Add to Cart Units",
    "Units Sold",
    "Quarter_Start_Date",
    "Week_Start_Date",
    "Data_Type",
];

/// Writes product records under a fixed column list.
pub struct ProductCsvSink {
    writer: csv::Writer<File>,
    columns: Vec<String>,
}

impl ProductCsvSink {
    /// Truncate `path` and write the header.
    pub fn create(path: &Path, columns: Vec<String>) -> io::Result<Self> {
        let file = File::create(path)?;
        let mut writer = csv::Writer::from_writer(file);
        writer.write_record(&columns)?;
        Ok(Self { writer, columns })
    }

    /// Append to `path`, writing the header only when the file is new or empty.
    pub fn append(path: &Path, columns: Vec<String>) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let is_empty = file.metadata()?.len() == 0;
        let mut writer = csv::Writer::from_writer(file);
        if is_empty {
            writer.write_record(&columns)?;
        }
        Ok(Self { writer, columns })
    }

    pub fn write_all<'a>(
        &mut self,
        records: impl IntoIterator<Item = &'a ProductRecord>,
    ) -> io::Result<usize> {
        let mut written = 0;
        for record in records {
            self.writer.write_record(record.row(&self.columns))?;
            written += 1;
        }
        self.writer.flush()?;
        Ok(written)
    }
}

/// Integral values print without decimals, everything else with two.
pub fn format_metric(value: Option<f64>) -> String {
    match value {
        None => String::new(),
        Some(v) if !v.is_finite() => String::new(),
        Some(v) if v.fract() == 0.0 && v.abs() < 1e15 => format!("{}", v as i64),
        Some(v) => format!("{v:.2}"),
    }
}

fn format_date(date: Option<NaiveDate>) -> String {
    date.map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

/// Write the normalized series, forecasts included, to `path`.
pub fn write_period_rows(path: &Path, rows: &[PeriodRow]) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = csv::Writer::from_writer(file);
    writer.write_record(NORMALIZED_HEADERS)?;

    for row in rows {
        let [sessions, add_to_cart, units_sold] = row.metrics.as_array();
        writer.write_record([
            row.product_code.clone(),
            row.product.clone(),
            row.quarter_label.clone(),
            row.week_label.clone(),
            format_metric(sessions),
            format_metric(add_to_cart),
            format_metric(units_sold),
            format_date(row.quarter_start),
            format_date(row.week_start),
            row.data_type.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Write a plain table (header + rows) to `path`.
pub fn write_table(path: &Path, header: &[String], rows: &[Vec<String>]) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = csv::WriterBuilder::new().flexible(true).from_writer(file);
    writer.write_record(header)?;
    for row in rows {
        writer.write_record(row)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_diagnostics(path: &Path, diagnostics: &Diagnostics) -> Result<()> {
    let json = serde_json::to_string_pretty(diagnostics)?;
    std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fields;

    fn columns() -> Vec<String> {
        fields::VISIBLE_TEXT_COLUMNS
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn test_format_metric() {
        assert_eq!(format_metric(Some(1200.0)), "1200");
        assert_eq!(format_metric(Some(12.3456)), "12.35");
        assert_eq!(format_metric(Some(0.0)), "0");
        assert_eq!(format_metric(None), "");
        assert_eq!(format_metric(Some(f64::NAN)), "");
    }

    #[test]
    fn test_append_writes_header_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("products.csv");
        let record = ProductRecord::new()
            .with(fields::TITLE, "iPad mini")
            .with(fields::PRICE, "£499");

        for _ in 0..2 {
            let mut sink = ProductCsvSink::append(&path, columns()).unwrap();
            sink.write_all([&record]).unwrap();
        }

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "title,price,url,rating,reviews");
        assert_eq!(lines[1], "iPad mini,£499,No URL,No rating,No reviews");
    }
}
