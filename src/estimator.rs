//! Seasonal ARIMA estimation on an already log-transformed series.
//!
//! The adapter only talks to [`SeasonalEstimator`] and [`LogSpaceModel`], so
//! tests and embedders can swap the numerical core. The built-in
//! [`CssSarimaEstimator`] fits `(p,d,q)(P,D,Q,s)` by conditional sum of
//! squares with zero pre-sample values, minimized with Nelder-Mead.
//!
//! The optimizer searches an unconstrained space. Each AR and MA factor is
//! mapped through `tanh` partial autocorrelations and the Durbin-Levinson
//! recursion, so every fitted factor is stationary (AR) or invertible (MA)
//! and forecasts cannot explode.

use crate::error::{Result, RevfluxError};
use crate::optimize::{nelder_mead, NelderMeadConfig};
use crate::schema::{EstimatorSettings, ModelSpec};
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use std::fmt::Debug;

/// Forecast in the space the model was fitted in.
#[derive(Debug, Clone, PartialEq)]
pub struct LogSpaceForecast {
    pub mean: Vec<f64>,
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

pub trait LogSpaceModel {
    fn forecast_log(&self, steps: usize, confidence_level: f64) -> Result<LogSpaceForecast>;
}

pub trait SeasonalEstimator {
    type Model: LogSpaceModel + Serialize + DeserializeOwned + Clone + Debug;

    fn fit(&self, log_values: &[f64], spec: &ModelSpec) -> Result<Self::Model>;
}

#[derive(Debug, Clone, Default)]
pub struct CssSarimaEstimator {
    settings: EstimatorSettings,
}

impl CssSarimaEstimator {
    pub fn new(settings: EstimatorSettings) -> Self {
        Self { settings }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SarimaModel {
    pub spec: ModelSpec,
    /// False when the history was too short for the seasonal terms and they
    /// were dropped from the fit.
    pub seasonal_active: bool,
    pub ar: Vec<f64>,
    pub ma: Vec<f64>,
    pub seasonal_ar: Vec<f64>,
    pub seasonal_ma: Vec<f64>,
    /// Mean of the series; only non-zero when no differencing is applied.
    pub mean: f64,
    pub sigma2: f64,
    pub sse: f64,
    pub iterations: usize,
    /// Fitted (log-space) history the forecast recursion starts from.
    pub history: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Structure {
    p: usize,
    q: usize,
    sp: usize,
    sq: usize,
    period: usize,
}

impl Structure {
    fn param_count(&self) -> usize {
        self.p + self.q + self.sp + self.sq
    }

    /// Maps a flat unconstrained vector to (ar, ma, seasonal_ar, seasonal_ma)
    /// coefficients inside the stationary and invertible region.
    fn coefficients(&self, params: &[f64]) -> Coefficients {
        let (ar, rest) = params.split_at(self.p);
        let (ma, rest) = rest.split_at(self.q);
        let (sar, sma) = rest.split_at(self.sp);
        Coefficients {
            ar: constrain_stationary(ar),
            ma: constrain_invertible(ma),
            seasonal_ar: constrain_stationary(sar),
            seasonal_ma: constrain_invertible(sma),
        }
    }
}

struct Coefficients {
    ar: Vec<f64>,
    ma: Vec<f64>,
    seasonal_ar: Vec<f64>,
    seasonal_ma: Vec<f64>,
}

/// Bound on the unconstrained inputs; keeps partial autocorrelations
/// strictly inside (-1, 1) in floating point.
const UNCONSTRAINED_LIMIT: f64 = 8.0;

/// Coefficients of a stationary `1 - c1 B - c2 B^2 - ...` from unconstrained
/// values, via partial autocorrelations `tanh(x)` and Durbin-Levinson.
fn constrain_stationary(raw: &[f64]) -> Vec<f64> {
    let mut coefs: Vec<f64> = Vec::with_capacity(raw.len());
    for (k, x) in raw.iter().enumerate() {
        let partial = x.clamp(-UNCONSTRAINED_LIMIT, UNCONSTRAINED_LIMIT).tanh();
        let previous = coefs.clone();
        for j in 0..k {
            coefs[j] = previous[j] - partial * previous[k - 1 - j];
        }
        coefs.push(partial);
    }
    coefs
}

/// Coefficients of an invertible `1 + c1 B + c2 B^2 + ...`.
fn constrain_invertible(raw: &[f64]) -> Vec<f64> {
    constrain_stationary(raw).into_iter().map(|c| -c).collect()
}

impl CssSarimaEstimator {
    /// Seasonal part of the fit, or `None` when the history cannot carry it.
    fn seasonal_structure(&self, n: usize, spec: &ModelSpec) -> Option<(usize, Structure)> {
        let seasonal = spec.seasonal_order;
        if seasonal.p + seasonal.d + seasonal.q == 0 || seasonal.period < 2 {
            return None;
        }

        let structure = Structure {
            p: spec.order.p,
            q: spec.order.q,
            sp: seasonal.p,
            sq: seasonal.q,
            period: seasonal.period,
        };
        let required = spec.order.d + seasonal.d * seasonal.period + structure.param_count() + 2;

        if n < required {
            warn!(
                "History of {} points is too short for the seasonal terms of {} (needs {}); fitting without them",
                n, spec, required
            );
            return None;
        }

        Some((seasonal.d, structure))
    }
}

impl SeasonalEstimator for CssSarimaEstimator {
    type Model = SarimaModel;

    fn fit(&self, log_values: &[f64], spec: &ModelSpec) -> Result<SarimaModel> {
        spec.validate()?;

        if let Some(bad) = log_values.iter().find(|v| !v.is_finite()) {
            return Err(RevfluxError::NumericalFailure(format!(
                "Series contains a non-finite value ({})",
                bad
            )));
        }

        let n = log_values.len();
        let (seasonal_d, structure) = match self.seasonal_structure(n, spec) {
            Some(found) => found,
            None => (
                0,
                Structure {
                    p: spec.order.p,
                    q: spec.order.q,
                    sp: 0,
                    sq: 0,
                    period: spec.seasonal_order.period.max(1),
                },
            ),
        };

        let required = spec.order.d + spec.order.p + spec.order.q + 1;
        if n < required {
            return Err(RevfluxError::InsufficientHistory {
                required,
                actual: n,
            });
        }

        let lags = differencing_lags(spec.order.d, seasonal_d, structure.period);
        let layers = difference_layers(log_values, &lags);
        let differenced = layers.last().cloned().unwrap_or_default();

        let mean = if lags.is_empty() {
            differenced.iter().sum::<f64>() / differenced.len() as f64
        } else {
            0.0
        };
        let centered: Vec<f64> = differenced.iter().map(|v| v - mean).collect();

        let k = structure.param_count();
        let result = nelder_mead(
            |params| css_objective(&centered, &structure, params),
            &vec![0.0; k],
            NelderMeadConfig {
                max_iter: self.settings.max_iterations,
                tolerance: self.settings.tolerance,
                ..Default::default()
            },
        );

        if !result.optimal_value.is_finite() {
            return Err(RevfluxError::NumericalFailure(
                "Conditional sum of squares is not finite at any explored parameter".to_string(),
            ));
        }
        if !result.converged {
            return Err(RevfluxError::NonConvergence {
                iterations: result.iterations,
            });
        }

        let mean_term = usize::from(lags.is_empty());
        let dof = centered.len().saturating_sub(k + mean_term).max(1);
        let sigma2 = result.optimal_value / dof as f64;
        if !sigma2.is_finite() {
            return Err(RevfluxError::NumericalFailure(format!(
                "Residual variance is not finite ({})",
                sigma2
            )));
        }

        let coefs = structure.coefficients(&result.optimal_point);
        debug!(
            "Fitted {} on {} points in {} iterations (sse {:.6}, sigma2 {:.6})",
            spec, n, result.iterations, result.optimal_value, sigma2
        );

        Ok(SarimaModel {
            spec: *spec,
            seasonal_active: structure.sp + structure.sq > 0 || seasonal_d > 0,
            ar: coefs.ar,
            ma: coefs.ma,
            seasonal_ar: coefs.seasonal_ar,
            seasonal_ma: coefs.seasonal_ma,
            mean,
            sigma2,
            sse: result.optimal_value,
            iterations: result.iterations,
            history: log_values.to_vec(),
        })
    }
}

impl SarimaModel {
    fn structure(&self) -> Structure {
        Structure {
            p: self.ar.len(),
            q: self.ma.len(),
            sp: self.seasonal_ar.len(),
            sq: self.seasonal_ma.len(),
            period: self.spec.seasonal_order.period.max(1),
        }
    }

    fn lags(&self) -> Vec<usize> {
        let seasonal_d = if self.seasonal_active {
            self.spec.seasonal_order.d
        } else {
            0
        };
        differencing_lags(self.spec.order.d, seasonal_d, self.spec.seasonal_order.period)
    }

    fn polynomials(&self) -> (Vec<f64>, Vec<f64>) {
        let period = self.structure().period;
        let ar_poly = poly_mul(&ar_polynomial(&self.ar, 1), &ar_polynomial(&self.seasonal_ar, period));
        let ma_poly = poly_mul(&ma_polynomial(&self.ma, 1), &ma_polynomial(&self.seasonal_ma, period));
        (ar_poly, ma_poly)
    }

    /// In-sample residuals of the differenced, centered series.
    pub fn residuals(&self) -> Vec<f64> {
        let lags = self.lags();
        let layers = difference_layers(&self.history, &lags);
        let centered: Vec<f64> = layers
            .last()
            .map(|w| w.iter().map(|v| v - self.mean).collect())
            .unwrap_or_default();
        let (ar_poly, ma_poly) = self.polynomials();
        css_residuals(&centered, &ar_poly, &ma_poly)
    }

    /// ψ-weights of the full model (differencing folded into the AR side).
    fn psi_weights(&self, count: usize) -> Vec<f64> {
        let (ar_poly, ma_poly) = self.polynomials();
        let full_ar = self
            .lags()
            .iter()
            .fold(ar_poly, |acc, &lag| poly_mul(&acc, &difference_polynomial(lag)));

        let mut psi = Vec::with_capacity(count);
        for j in 0..count {
            let mut value = if j == 0 {
                1.0
            } else {
                ma_poly.get(j).copied().unwrap_or(0.0)
            };
            for k in 1..=j.min(full_ar.len() - 1) {
                value -= full_ar[k] * psi[j - k];
            }
            psi.push(value);
        }
        psi
    }
}

impl LogSpaceModel for SarimaModel {
    fn forecast_log(&self, steps: usize, confidence_level: f64) -> Result<LogSpaceForecast> {
        if !(confidence_level > 0.0 && confidence_level < 1.0) {
            return Err(RevfluxError::InvalidConfig(format!(
                "Confidence level {} must be strictly between 0 and 1",
                confidence_level
            )));
        }

        let lags = self.lags();
        let layers = difference_layers(&self.history, &lags);
        let centered: Vec<f64> = layers
            .last()
            .map(|w| w.iter().map(|v| v - self.mean).collect())
            .unwrap_or_default();
        let (ar_poly, ma_poly) = self.polynomials();
        let residuals = css_residuals(&centered, &ar_poly, &ma_poly);

        let mut z = centered.clone();
        let mut e = residuals;
        let n = z.len();
        for t in n..n + steps {
            let mut value = 0.0;
            for k in 1..ar_poly.len() {
                if t >= k {
                    value -= ar_poly[k] * z[t - k];
                }
            }
            for k in 1..ma_poly.len() {
                if t >= k {
                    value += ma_poly[k] * e[t - k];
                }
            }
            z.push(value);
            e.push(0.0);
        }

        let differenced_future: Vec<f64> = z[n..].iter().map(|v| v + self.mean).collect();
        let mean = integrate(&layers, &lags, differenced_future);

        let psi = self.psi_weights(steps);
        let quantile = Normal::new(0.0, 1.0)
            .map_err(|e| RevfluxError::NumericalFailure(e.to_string()))?
            .inverse_cdf(0.5 + confidence_level / 2.0);

        let mut lower = Vec::with_capacity(steps);
        let mut upper = Vec::with_capacity(steps);
        let mut cumulative = 0.0;
        for (h, m) in mean.iter().enumerate() {
            cumulative += psi[h] * psi[h];
            let half_width = quantile * (self.sigma2 * cumulative).sqrt();
            lower.push(m - half_width);
            upper.push(m + half_width);
        }

        if mean.iter().chain(&lower).chain(&upper).any(|v| !v.is_finite()) {
            return Err(RevfluxError::NumericalFailure(
                "Forecast produced non-finite values".to_string(),
            ));
        }

        Ok(LogSpaceForecast { mean, lower, upper })
    }
}

fn differencing_lags(d: usize, seasonal_d: usize, period: usize) -> Vec<usize> {
    let mut lags = vec![1; d];
    lags.extend(std::iter::repeat(period).take(seasonal_d));
    lags
}

/// `layers[0]` is the input, `layers[i + 1]` is `layers[i]` differenced at `lags[i]`.
fn difference_layers(series: &[f64], lags: &[usize]) -> Vec<Vec<f64>> {
    let mut layers = vec![series.to_vec()];
    for &lag in lags {
        let prev = layers.last().map(Vec::as_slice).unwrap_or(&[]);
        let next: Vec<f64> = (lag..prev.len()).map(|t| prev[t] - prev[t - lag]).collect();
        layers.push(next);
    }
    layers
}

/// Undoes the differencing for values that extend the last layer.
fn integrate(layers: &[Vec<f64>], lags: &[usize], mut future: Vec<f64>) -> Vec<f64> {
    for (idx, &lag) in lags.iter().enumerate().rev() {
        let mut extended = layers[idx].clone();
        let start = extended.len();
        for delta in &future {
            let base = extended[extended.len() - lag];
            extended.push(delta + base);
        }
        future = extended.split_off(start);
    }
    future
}

/// `1 - c1 B^lag - c2 B^(2 lag) - ...`
fn ar_polynomial(coefs: &[f64], lag: usize) -> Vec<f64> {
    let mut poly = vec![0.0; coefs.len() * lag + 1];
    poly[0] = 1.0;
    for (i, c) in coefs.iter().enumerate() {
        poly[(i + 1) * lag] = -c;
    }
    poly
}

/// `1 + c1 B^lag + c2 B^(2 lag) + ...`
fn ma_polynomial(coefs: &[f64], lag: usize) -> Vec<f64> {
    let mut poly = vec![0.0; coefs.len() * lag + 1];
    poly[0] = 1.0;
    for (i, c) in coefs.iter().enumerate() {
        poly[(i + 1) * lag] = *c;
    }
    poly
}

fn difference_polynomial(lag: usize) -> Vec<f64> {
    let mut poly = vec![0.0; lag + 1];
    poly[0] = 1.0;
    poly[lag] = -1.0;
    poly
}

fn poly_mul(a: &[f64], b: &[f64]) -> Vec<f64> {
    let mut out = vec![0.0; a.len() + b.len() - 1];
    for (i, x) in a.iter().enumerate() {
        for (j, y) in b.iter().enumerate() {
            out[i + j] += x * y;
        }
    }
    out
}

/// `e_t = ar(B) w_t - (ma(B) - 1) e_t`, with zero values before the sample.
fn css_residuals(w: &[f64], ar_poly: &[f64], ma_poly: &[f64]) -> Vec<f64> {
    let mut e = Vec::with_capacity(w.len());
    for t in 0..w.len() {
        let mut value = 0.0;
        for (k, coef) in ar_poly.iter().enumerate() {
            if t >= k {
                value += coef * w[t - k];
            }
        }
        for k in 1..ma_poly.len() {
            if t >= k {
                value -= ma_poly[k] * e[t - k];
            }
        }
        e.push(value);
    }
    e
}

fn css_objective(w: &[f64], structure: &Structure, params: &[f64]) -> f64 {
    let coefs = structure.coefficients(params);
    let ar_poly = poly_mul(
        &ar_polynomial(&coefs.ar, 1),
        &ar_polynomial(&coefs.seasonal_ar, structure.period),
    );
    let ma_poly = poly_mul(
        &ma_polynomial(&coefs.ma, 1),
        &ma_polynomial(&coefs.seasonal_ma, structure.period),
    );
    css_residuals(w, &ar_poly, &ma_poly).iter().map(|e| e * e).sum()
}
