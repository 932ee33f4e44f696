//! Feature scaling transform

use crate::error::{LifecycleError, Result};
use polars::prelude::*;
use serde::{Deserialize, Serialize};

/// Type of scaler to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalerType {
    /// Standard scaling (z-score normalization): (x - mean) / std
    Standard,
    /// Min-Max scaling: (x - min) / (max - min)
    MinMax,
    /// Max absolute scaling: x / max(|x|)
    MaxAbs,
    /// No scaling
    None,
}

impl std::str::FromStr for ScalerType {
    type Err = LifecycleError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "standard" | "std" => Ok(Self::Standard),
            "minmax" | "range" => Ok(Self::MinMax),
            "maxabs" => Ok(Self::MaxAbs),
            "none" => Ok(Self::None),
            other => Err(LifecycleError::Config(format!("unknown scaler type '{}'", other))),
        }
    }
}

/// Fitted parameters for one column
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ScaleParams {
    column: String,
    center: f64, // mean, min, or 0
    scale: f64,  // std, range, or max |x|
}

/// Fitted feature-scaling transform.
///
/// Columns keep the order they were fitted in. [`transform`](Self::transform)
/// emits the accumulate (passthrough) columns first, untouched, followed by
/// the scaled columns; any other column of the input is dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScaleTransform {
    scaler_type: ScalerType,
    params: Vec<ScaleParams>,
    is_fitted: bool,
}

impl ScaleTransform {
    /// Create a new, unfitted transform
    pub fn new(scaler_type: ScalerType) -> Self {
        Self {
            scaler_type,
            params: Vec::new(),
            is_fitted: false,
        }
    }

    pub fn scaler_type(&self) -> ScalerType {
        self.scaler_type
    }

    /// Columns the transform scales, in fit order
    pub fn columns(&self) -> Vec<&str> {
        self.params.iter().map(|p| p.column.as_str()).collect()
    }

    /// Fit the transform to the given columns
    pub fn fit(&mut self, df: &DataFrame, columns: &[&str]) -> Result<&mut Self> {
        let params = columns
            .iter()
            .map(|name| {
                let column = df
                    .column(name)
                    .map_err(|_| LifecycleError::FeatureNotFound(name.to_string()))?;
                let series = as_float(column.as_materialized_series())?;
                self.compute_params(name, &series)
            })
            .collect::<Result<Vec<_>>>()?;

        self.params = params;
        self.is_fitted = true;
        Ok(self)
    }

    /// Scale the fitted columns, carrying `accumulate` columns through.
    /// Row order is preserved.
    pub fn transform(&self, df: &DataFrame, accumulate: &[&str]) -> Result<DataFrame> {
        if !self.is_fitted {
            return Err(LifecycleError::ModelNotFitted);
        }

        let mut columns: Vec<Column> = Vec::with_capacity(accumulate.len() + self.params.len());
        for name in accumulate {
            let column = df
                .column(name)
                .map_err(|_| LifecycleError::FeatureNotFound(name.to_string()))?;
            columns.push(column.clone());
        }

        for params in &self.params {
            if accumulate.contains(&params.column.as_str()) {
                continue;
            }
            let column = df
                .column(&params.column)
                .map_err(|_| LifecycleError::FeatureNotFound(params.column.clone()))?;
            let scaled = self.scale_series(column.as_materialized_series(), params)?;
            columns.push(scaled.into());
        }

        Ok(DataFrame::new(columns)?)
    }

    /// Fit and transform in one step
    pub fn fit_transform(&mut self, df: &DataFrame, columns: &[&str], accumulate: &[&str]) -> Result<DataFrame> {
        self.fit(df, columns)?;
        self.transform(df, accumulate)
    }

    fn compute_params(&self, name: &str, series: &Series) -> Result<ScaleParams> {
        let ca = series
            .f64()
            .map_err(|e| LifecycleError::Data(e.to_string()))?;

        let (center, scale) = match self.scaler_type {
            ScalerType::Standard => {
                let mean = ca.mean().unwrap_or(0.0);
                let std = ca.std(1).unwrap_or(1.0);
                (mean, std)
            }
            ScalerType::MinMax => {
                let min = ca.min().unwrap_or(0.0);
                let max = ca.max().unwrap_or(1.0);
                (min, max - min)
            }
            ScalerType::MaxAbs => {
                let max_abs = ca
                    .into_iter()
                    .filter_map(|v| v.map(|x| x.abs()))
                    .fold(0.0f64, |a, b| a.max(b));
                (0.0, max_abs)
            }
            ScalerType::None => (0.0, 1.0),
        };

        Ok(ScaleParams {
            column: name.to_string(),
            center,
            scale: if scale == 0.0 || !scale.is_finite() { 1.0 } else { scale },
        })
    }

    fn scale_series(&self, series: &Series, params: &ScaleParams) -> Result<Series> {
        let cast = as_float(series)?;
        let ca = cast
            .f64()
            .map_err(|e| LifecycleError::Data(e.to_string()))?;

        let scaled: Float64Chunked = ca
            .into_iter()
            .map(|opt| opt.map(|v| (v - params.center) / params.scale))
            .collect();

        Ok(scaled.with_name(series.name().clone()).into_series())
    }
}

/// Numeric or boolean column as `Float64`; anything else is a data error
/// rather than a column of nulls
fn as_float(series: &Series) -> Result<Series> {
    let dtype = series.dtype();
    if !dtype.is_primitive_numeric() && !dtype.is_bool() {
        return Err(LifecycleError::Data(format!(
            "column '{}' has non-numeric type {}",
            series.name(),
            dtype
        )));
    }
    series
        .strict_cast(&DataType::Float64)
        .map_err(|e| LifecycleError::Data(format!("column '{}': {}", series.name(), e)))
}
