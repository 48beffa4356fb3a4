//! ARIMA(p, d, q) models fitted by conditional sum of squares
//!
//! Coefficients are optimised in an unconstrained space and mapped through partial
//! autocorrelations, so every fitted AR part is stationary and every MA part invertible.

pub mod optimize;

use std::f64::consts::PI;
use std::fmt;

use tracing::trace;

use crate::error::ForecastError;
use optimize::nelder_mead;

const MAX_ORDER: usize = 2;
const TOLERANCE: f64 = 1e-10;

/// Non-seasonal model order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Order {
    pub p: usize,
    pub d: usize,
    pub q: usize,
}

impl Order {
    pub const fn new(p: usize, d: usize, q: usize) -> Self {
        Self { p, d, q }
    }
}

impl From<[usize; 3]> for Order {
    fn from([p, d, q]: [usize; 3]) -> Self {
        Self { p, d, q }
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.p, self.d, self.q)
    }
}

/// Map values in (-1, 1) read as partial autocorrelations to the coefficients of a
/// stationary lag polynomial `1 - a1 z - a2 z^2 - ...` (Durbin–Levinson recursion).
pub fn partials_to_coefficients(partials: &[f64]) -> Vec<f64> {
    let mut coefficients: Vec<f64> = Vec::with_capacity(partials.len());
    for (k, &r) in partials.iter().enumerate() {
        let previous = coefficients.clone();
        coefficients.push(r);
        for j in 0..k {
            coefficients[j] = previous[j] - r * previous[k - 1 - j];
        }
    }
    coefficients
}

/// `series[t] - series[t - lag]`.
pub fn difference(series: &[f64], lag: usize) -> Vec<f64> {
    if series.len() <= lag {
        return Vec::new();
    }
    (lag..series.len()).map(|t| series[t] - series[t - lag]).collect()
}

/// Undo one round of differencing: extend `history` with `changes` at `lag`.
fn integrate(history: &[f64], changes: &[f64], lag: usize) -> Vec<f64> {
    let mut extended = history.to_vec();
    for change in changes {
        let base = extended[extended.len() - lag];
        extended.push(base + change);
    }
    extended.split_off(history.len())
}

fn variance(series: &[f64]) -> f64 {
    if series.is_empty() {
        return 0.0;
    }
    let n = series.len() as f64;
    let mean = series.iter().sum::<f64>() / n;
    series.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n
}

/// Conditional sum of squares objective over one differenced series.
struct Css<'a> {
    series: &'a [f64],
    p: usize,
    q: usize,
    constant: bool,
}

struct Parameters {
    mean: f64,
    ar: Vec<f64>,
    ma: Vec<f64>,
}

impl Css<'_> {
    fn dimension(&self) -> usize {
        self.p + self.q + usize::from(self.constant)
    }

    fn unpack(&self, x: &[f64]) -> Parameters {
        let ar_partials: Vec<f64> = x[..self.p].iter().map(|v| v.tanh()).collect();
        let ma_partials: Vec<f64> = x[self.p..self.p + self.q].iter().map(|v| v.tanh()).collect();
        Parameters {
            mean: if self.constant { x[self.p + self.q] } else { 0.0 },
            ar: partials_to_coefficients(&ar_partials),
            ma: partials_to_coefficients(&ma_partials)
                .into_iter()
                .map(|c| -c)
                .collect(),
        }
    }

    /// One-step residuals; the first `p` are zero.
    fn residuals(&self, params: &Parameters) -> Vec<f64> {
        let w = self.series;
        let mut errors = vec![0.0; w.len()];
        for t in self.p..w.len() {
            let mut predicted = params.mean;
            for (i, phi) in params.ar.iter().enumerate() {
                predicted += phi * (w[t - i - 1] - params.mean);
            }
            for (j, theta) in params.ma.iter().enumerate() {
                if t > j {
                    predicted += theta * errors[t - j - 1];
                }
            }
            errors[t] = w[t] - predicted;
        }
        errors
    }

    fn sum_of_squares(&self, x: &[f64]) -> f64 {
        let residuals = self.residuals(&self.unpack(x));
        residuals[self.p..].iter().map(|e| e * e).sum()
    }
}

/// A fitted model, ready to forecast.
#[derive(Debug, Clone)]
pub struct Arima {
    order: Order,
    seasonal_lag: Option<usize>,
    mean: f64,
    ar: Vec<f64>,
    ma: Vec<f64>,
    sigma2: f64,
    aic: f64,
    history: Vec<f64>,
}

impl Arima {
    /// Fit `order` to `series`, seasonally differencing at `seasonal_lag` first when given.
    pub fn fit(series: &[f64], order: Order, seasonal_lag: Option<usize>) -> Result<Self, ForecastError> {
        if series.iter().any(|v| !v.is_finite()) {
            return Err(ForecastError::NonFinite);
        }

        let mut working = match seasonal_lag {
            Some(lag) => difference(series, lag),
            None => series.to_vec(),
        };
        for _ in 0..order.d {
            working = difference(&working, 1);
        }

        let constant = order.d == 0 && seasonal_lag.is_none();
        let needed = order.p + order.q + usize::from(constant) + 2;
        if working.len() < needed {
            return Err(ForecastError::TooShort {
                needed,
                got: working.len(),
            });
        }

        let css = Css {
            series: &working,
            p: order.p,
            q: order.q,
            constant,
        };
        let dimension = css.dimension();

        let mut start = vec![0.0; dimension];
        let mut steps = vec![0.3; dimension];
        if constant {
            let mean = working.iter().sum::<f64>() / working.len() as f64;
            start[dimension - 1] = mean;
            steps[dimension - 1] = variance(&working).sqrt().max(mean.abs() * 0.1).max(0.1);
        }

        let minimum = nelder_mead(
            |x| css.sum_of_squares(x),
            &start,
            &steps,
            1000 * dimension.max(1),
            TOLERANCE,
        );
        if !minimum.value.is_finite() {
            return Err(ForecastError::NoFit);
        }
        trace!(
            "ARIMA{} sum of squares {:.4} after {} iterations",
            order, minimum.value, minimum.iterations
        );

        let params = css.unpack(&minimum.point);
        let effective = (working.len() - order.p) as f64;
        // Exact fits would give ln(0)
        let sigma2 = (minimum.value / effective).max(1e-12);
        let log_likelihood = -0.5 * effective * ((2.0 * PI * sigma2).ln() + 1.0);
        let parameters = dimension + 1;
        let aic = -2.0 * log_likelihood + 2.0 * parameters as f64;

        Ok(Self {
            order,
            seasonal_lag,
            mean: params.mean,
            ar: params.ar,
            ma: params.ma,
            sigma2,
            aic,
            history: series.to_vec(),
        })
    }

    /// Choose differencing by variance reduction, then (p, q) in `0..=2` by AIC.
    ///
    /// Seasonal differencing at `seasonal_period` is used only when the series covers
    /// at least two full seasons.
    pub fn auto(series: &[f64], seasonal_period: usize) -> Result<Self, ForecastError> {
        let seasonal_lag =
            (seasonal_period > 1 && series.len() >= 2 * seasonal_period).then_some(seasonal_period);
        let base = match seasonal_lag {
            Some(lag) => difference(series, lag),
            None => series.to_vec(),
        };
        let differenced = difference(&base, 1);
        let d = usize::from(!differenced.is_empty() && variance(&differenced) < variance(&base));

        let mut best: Option<Self> = None;
        let mut last_error = ForecastError::NoFit;
        for p in 0..=MAX_ORDER {
            for q in 0..=MAX_ORDER {
                match Self::fit(series, Order::new(p, d, q), seasonal_lag) {
                    Ok(model) => {
                        if best.as_ref().is_none_or(|b| model.aic < b.aic) {
                            best = Some(model);
                        }
                    }
                    Err(e) => last_error = e,
                }
            }
        }
        best.ok_or(last_error)
    }

    pub fn order(&self) -> Order {
        self.order
    }

    pub fn seasonal_lag(&self) -> Option<usize> {
        self.seasonal_lag
    }

    pub fn ar(&self) -> &[f64] {
        &self.ar
    }

    pub fn ma(&self) -> &[f64] {
        &self.ma
    }

    pub fn sigma2(&self) -> f64 {
        self.sigma2
    }

    pub fn aic(&self) -> f64 {
        self.aic
    }

    /// Point forecasts for the next `steps` observations on the original scale.
    pub fn forecast(&self, steps: usize) -> Vec<f64> {
        if steps == 0 {
            return Vec::new();
        }

        let seasonal_base = match self.seasonal_lag {
            Some(lag) => difference(&self.history, lag),
            None => self.history.clone(),
        };
        let mut levels = vec![seasonal_base];
        for _ in 0..self.order.d {
            let next = difference(levels.last().map(Vec::as_slice).unwrap_or_default(), 1);
            levels.push(next);
        }
        let working = levels.pop().unwrap_or_default();

        let css = Css {
            series: &working,
            p: self.order.p,
            q: self.order.q,
            constant: self.order.d == 0 && self.seasonal_lag.is_none(),
        };
        let params = Parameters {
            mean: self.mean,
            ar: self.ar.clone(),
            ma: self.ma.clone(),
        };
        let mut errors = css.residuals(&params);
        let mut extended = working.clone();

        for _ in 0..steps {
            let t = extended.len();
            let mut value = self.mean;
            for (i, phi) in self.ar.iter().enumerate() {
                if t > i {
                    value += phi * (extended[t - i - 1] - self.mean);
                }
            }
            for (j, theta) in self.ma.iter().enumerate() {
                if t > j {
                    value += theta * errors[t - j - 1];
                }
            }
            extended.push(value);
            errors.push(0.0);
        }
        let mut forecast = extended.split_off(working.len());

        for level in levels.iter().rev() {
            forecast = integrate(level, &forecast, 1);
        }
        if let Some(lag) = self.seasonal_lag {
            forecast = integrate(&self.history, &forecast, lag);
        }
        forecast
    }
}
