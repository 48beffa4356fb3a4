//! Weekly series normalization: spreadsheet rows in, continuous per-product weeks out,
//! optionally followed by forecast rows.

pub mod forecast;
pub mod series;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use tracing::info;

use crate::config::{NormalizerSettings, NumbersSettings};
use crate::error::SheetError;
use crate::models::{Diagnostics, PeriodRow};
use crate::output::{write_diagnostics, write_period_rows};
use crate::sheet::{self, Table};
use series::{DateDecoder, group_by_product, product_rows, read_observations};

/// Rows ready for the CSV writer plus what happened along the way.
#[derive(Debug, Default)]
pub struct Normalized {
    pub rows: Vec<PeriodRow>,
    pub diagnostics: Diagnostics,
}

/// Turn a loaded table into the normalized series. Only missing columns are fatal.
pub fn normalize(table: &Table, settings: &NormalizerSettings) -> Result<Normalized> {
    let mut diagnostics = Diagnostics::default();
    let observations = read_observations(table, settings, &mut diagnostics)?;
    info!(
        "Read {} rows, dropped {} without product",
        diagnostics.rows_read, diagnostics.rows_dropped_missing_product
    );

    let products = group_by_product(observations, &mut diagnostics);
    diagnostics.products = products.len();

    let decoder = DateDecoder::new(settings);
    let mut rows = Vec::new();
    for product in &products {
        rows.extend(product_rows(product, &decoder, settings.fill_gaps, &mut diagnostics));
    }
    info!(
        "Built {} weekly rows for {} products ({} filled)",
        rows.len(),
        diagnostics.products,
        diagnostics.filled_weeks
    );

    if settings.forecast.enabled && settings.forecast.steps > 0 {
        let forecasts = forecast::forecast_all(&products, &settings.forecast, &mut diagnostics)?;
        rows.extend(forecasts);
    }

    Ok(Normalized { rows, diagnostics })
}

/// Load `input`, normalize it and write the CSV and diagnostics configured in `settings`.
///
/// `as_of` only reaches the diagnostics file, so the CSV stays reproducible.
pub async fn run(
    input: &str,
    settings: &NormalizerSettings,
    numbers: &NumbersSettings,
    as_of: NaiveDate,
) -> Result<Diagnostics> {
    let token = match settings.token_env.as_deref() {
        Some(variable) => Some(sheet::required_token(variable)?),
        None => None,
    };

    let table = sheet::load(input, settings.format, token.as_deref(), numbers).await?;
    let mut normalized = normalize(&table, settings)?;

    write_period_rows(&settings.output, &normalized.rows)?;
    info!(
        "Saved {} rows to {}",
        normalized.rows.len(),
        settings.output.display()
    );

    let diagnostics = &mut normalized.diagnostics;
    diagnostics.input = input.to_string();
    diagnostics.as_of = Some(as_of);
    diagnostics.generated_at = Some(Utc::now());
    if let Some(path) = &settings.diagnostics {
        write_diagnostics(path, diagnostics)
            .with_context(|| format!("writing diagnostics to {}", path.display()))?;
    }

    Ok(normalized.diagnostics)
}

/// Whether `error` came from a missing token, so the caller can say which variable to set.
pub fn is_missing_token(error: &anyhow::Error) -> bool {
    matches!(error.downcast_ref::<SheetError>(), Some(SheetError::MissingToken(_)))
}
