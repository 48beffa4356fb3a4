use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use tracing::{debug, info};

use super::series::ProductSeries;
use crate::arima::{Arima, Order};
use crate::config::ForecastSettings;
use crate::error::ForecastError;
use crate::fiscal::FiscalQuarter;
use crate::models::{DataType, Diagnostics, Metrics, PeriodRow};

const METRIC_NAMES: [&str; 3] = ["Sessions", "PDP Add to Cart Units", "Units Sold"];

/// Forecast rows for one product plus what happened while producing them.
#[derive(Debug, Default)]
pub struct ProductForecast {
    pub rows: Vec<PeriodRow>,
    pub below_threshold: usize,
    pub failures: Vec<String>,
}

/// `steps` non-negative predictions, or zeros when the series is too sparse.
///
/// `Ok(None)` means the series was below the non-zero threshold.
pub fn forecast_series(series: &[f64], settings: &ForecastSettings) -> Result<Option<Vec<f64>>, ForecastError> {
    let nonzero = series.iter().filter(|v| **v != 0.0).count();
    if nonzero < settings.min_nonzero {
        return Ok(None);
    }

    let model = if settings.auto_order {
        Arima::auto(series, settings.seasonal_period)?
    } else {
        Arima::fit(series, Order::from(settings.order), None)?
    };
    debug!(
        "Fitted ARIMA{} (seasonal lag {:?}, ar {:?}, ma {:?}, sigma2 {:.3}) with AIC {:.2}",
        model.order(),
        model.seasonal_lag(),
        model.ar(),
        model.ma(),
        model.sigma2(),
        model.aic()
    );

    Ok(Some(
        model
            .forecast(settings.steps)
            .into_iter()
            .map(|v| if v.is_finite() { v.max(0.0) } else { 0.0 })
            .collect(),
    ))
}

/// Forecast every metric of one product and build the future rows.
pub fn forecast_product(series: &ProductSeries, settings: &ForecastSettings) -> ProductForecast {
    let mut result = ProductForecast::default();
    let Some(last_week) = series.last_week() else {
        return result;
    };

    let mut columns: [Vec<f64>; 3] = Default::default();
    for ((target, values), name) in columns.iter_mut().zip(series.zero_filled()).zip(METRIC_NAMES) {
        *target = match forecast_series(&values, settings) {
            Ok(Some(forecast)) => forecast,
            Ok(None) => {
                result.below_threshold += 1;
                vec![0.0; settings.steps]
            }
            Err(e) => {
                result.failures.push(format!(
                    "Forecast failed for {} of product {}: {}",
                    name, series.product_code, e
                ));
                vec![0.0; settings.steps]
            }
        };
    }

    for step in 0..settings.steps {
        let week = last_week.advance(step + 1);
        let quarter = FiscalQuarter::containing(week);
        result.rows.push(PeriodRow {
            product_code: series.product_code.clone(),
            product: series.product.clone(),
            quarter_label: quarter.to_string(),
            week_label: week.to_string(),
            metrics: Metrics::from_array([
                Some(columns[0][step]),
                Some(columns[1][step]),
                Some(columns[2][step]),
            ]),
            quarter_start: quarter.start_date(),
            week_start: week.start_date(),
            data_type: DataType::Forecast,
        });
    }
    result
}

/// Forecast all products on a rayon pool. Output keeps the products' order.
pub fn forecast_all(
    products: &[ProductSeries],
    settings: &ForecastSettings,
    diagnostics: &mut Diagnostics,
) -> anyhow::Result<Vec<PeriodRow>> {
    let dated: Vec<&ProductSeries> = products.iter().filter(|p| !p.weeks.is_empty()).collect();
    info!(
        "Forecasting {} steps for {} products",
        settings.steps,
        dated.len()
    );

    let run = || -> Vec<ProductForecast> {
        dated
            .par_iter()
            .map(|product| forecast_product(product, settings))
            .collect()
    };
    let forecasts = match settings.threads {
        Some(threads) => ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .build()?
            .install(run),
        None => run(),
    };

    let mut rows = Vec::new();
    for forecast in forecasts {
        diagnostics.series_below_threshold += forecast.below_threshold;
        diagnostics.forecast_failures += forecast.failures.len();
        for failure in forecast.failures {
            diagnostics.warn(failure);
        }
        rows.extend(forecast.rows);
    }
    diagnostics.forecast_rows = rows.len();
    info!("Generated {} forecast rows", rows.len());
    Ok(rows)
}
