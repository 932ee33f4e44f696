//! Frame helpers shared by the stages and the local engine

use crate::error::{LifecycleError, Result};
use ndarray::Array2;
use polars::prelude::*;
use std::collections::BTreeSet;

/// Convert `column` to a discrete-class encoding.
///
/// The column is recast to strings so downstream consumers treat it as a
/// classification target. Floating point columns holding only integral values
/// are rendered without a fractional part (`1.0` becomes `"1"`). Returns the
/// converted frame and the sorted set of class levels, which stays fixed for
/// the rest of the run.
pub fn as_factor(df: &DataFrame, column: &str) -> Result<(DataFrame, Vec<String>)> {
    let series = df
        .column(column)
        .map_err(|_| LifecycleError::FeatureNotFound(column.to_string()))?
        .as_materialized_series();

    let integral_float = if series.dtype().is_float() {
        let as_f64 = series.cast(&DataType::Float64)?;
        let ca = as_f64.f64().map_err(|e| LifecycleError::Data(e.to_string()))?;
        let all_integral = ca.into_iter().flatten().all(|v| v.fract() == 0.0);
        all_integral
    } else {
        false
    };

    let factor = if integral_float {
        series.cast(&DataType::Int64)?.cast(&DataType::String)?
    } else {
        series.cast(&DataType::String)?
    };

    let levels = class_levels(&factor)?;
    let mut out = df.clone();
    out.with_column(factor.with_name(column.into()))?;
    Ok((out, levels))
}

/// Sorted distinct non-null values of a string column
pub fn class_levels(series: &Series) -> Result<Vec<String>> {
    let ca = series.str().map_err(|e| LifecycleError::Data(e.to_string()))?;
    let levels: BTreeSet<String> = ca.into_iter().flatten().map(str::to_string).collect();
    Ok(levels.into_iter().collect())
}

/// Values of a column cast to `f64`, nulls preserved as `None`
pub fn numeric_values(df: &DataFrame, column: &str) -> Result<Vec<Option<f64>>> {
    let series = df
        .column(column)
        .map_err(|_| LifecycleError::FeatureNotFound(column.to_string()))?
        .as_materialized_series();
    if !series.dtype().is_primitive_numeric() && !series.dtype().is_bool() {
        return Err(LifecycleError::Data(format!(
            "column '{}' has non-numeric type {}",
            column,
            series.dtype()
        )));
    }
    let cast = series.cast(&DataType::Float64)?;
    let ca = cast.f64().map_err(|e| LifecycleError::Data(e.to_string()))?;
    Ok(ca.into_iter().collect())
}

/// Dense feature matrix in `features` order; nulls replaced by `fill[j]`
pub fn feature_matrix(df: &DataFrame, features: &[String], fill: &[f64]) -> Result<Array2<f64>> {
    if fill.len() != features.len() {
        return Err(LifecycleError::Data(format!(
            "{} fill values for {} features",
            fill.len(),
            features.len()
        )));
    }
    let n_rows = df.height();
    let mut x = Array2::zeros((n_rows, features.len()));
    for (j, name) in features.iter().enumerate() {
        let values = numeric_values(df, name)?;
        for (i, v) in values.into_iter().enumerate() {
            x[[i, j]] = match v {
                Some(v) if v.is_finite() => v,
                _ => fill[j],
            };
        }
    }
    Ok(x)
}

/// Row index of a frame: the entity-key column when the frame carries one,
/// otherwise ordinal row positions.
pub fn row_index(df: &DataFrame, entity_key: &str) -> Result<Vec<i64>> {
    match df.column(entity_key) {
        Ok(column) => {
            let cast = column.as_materialized_series().strict_cast(&DataType::Int64)?;
            let ca = cast.i64().map_err(|e| LifecycleError::Data(e.to_string()))?;
            ca.into_iter()
                .enumerate()
                .map(|(i, v)| {
                    v.ok_or_else(|| {
                        LifecycleError::Data(format!("null {} at row {}", entity_key, i))
                    })
                })
                .collect()
        }
        Err(_) => Ok((0..df.height() as i64).collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_as_factor_integral_floats() {
        let df = df!(
            "x" => &[1.0, 2.0, 3.0],
            "y" => &[0.0, 1.0, 1.0]
        )
        .unwrap();
        let (out, levels) = as_factor(&df, "y").unwrap();
        assert_eq!(levels, vec!["0".to_string(), "1".to_string()]);
        assert_eq!(out.column("y").unwrap().dtype(), &DataType::String);
        assert_eq!(out.column("x").unwrap().dtype(), &DataType::Float64);
    }

    #[test]
    fn test_as_factor_missing_column() {
        let df = df!("x" => &[1.0]).unwrap();
        assert!(matches!(
            as_factor(&df, "y"),
            Err(LifecycleError::FeatureNotFound(_))
        ));
    }

    #[test]
    fn test_feature_matrix_fills_nulls() {
        let df = df!(
            "a" => &[Some(1.0), None, Some(3.0)],
            "b" => &[1i64, 2, 3]
        )
        .unwrap();
        let x = feature_matrix(&df, &["a".to_string(), "b".to_string()], &[2.0, 0.0]).unwrap();
        assert_eq!(x.shape(), &[3, 2]);
        assert_eq!(x[[1, 0]], 2.0);
        assert_eq!(x[[2, 1]], 3.0);
    }

    #[test]
    fn test_row_index_prefers_entity_key() {
        let df = df!("id" => &[10i64, 20, 30], "v" => &[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(row_index(&df, "id").unwrap(), vec![10, 20, 30]);
        assert_eq!(row_index(&df, "other").unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_numeric_values_accepts_bools_rejects_strings() {
        let df = df!("flag" => &[true, false], "label" => &["a", "b"]).unwrap();
        assert_eq!(numeric_values(&df, "flag").unwrap(), vec![Some(1.0), Some(0.0)]);
        assert!(matches!(
            numeric_values(&df, "label"),
            Err(LifecycleError::Data(_))
        ));
    }
}
