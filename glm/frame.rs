//! Column-level helpers over polars `DataFrame`s.
//!
//! Every stage reads and writes through these helpers so that a missing or mistyped
//! column is reported the same way everywhere.

use ndarray::{Array1, Array2};
use polars::prelude::*;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    Polars(#[from] PolarsError),
    #[error("The column '{0}' was not found in the dataset.")]
    ColumnNotFound(String),
    #[error("The column '{column}' could not be converted to f64 (found type: {found}).")]
    WrongType { column: String, found: String },
    #[error("Missing or null values were found in column '{0}'.")]
    NullValues(String),
    #[error("Row {row} of list column '{column}' has {found} entries, expected {expected}.")]
    RaggedRow {
        column: String,
        row: usize,
        found: usize,
        expected: usize,
    },
}

pub fn has_column(df: &DataFrame, name: &str) -> bool {
    df.get_column_names().iter().any(|c| c.as_str() == name)
}

pub fn require_column<'a>(df: &'a DataFrame, name: &str) -> Result<&'a Column, FrameError> {
    if !has_column(df, name) {
        return Err(FrameError::ColumnNotFound(name.to_string()));
    }
    Ok(df.column(name)?)
}

/// Casts a column to `Float64`, keeping nulls.
pub fn float_column(df: &DataFrame, name: &str) -> Result<Float64Chunked, FrameError> {
    let column = require_column(df, name)?;
    let casted = column
        .cast(&DataType::Float64)
        .map_err(|_| FrameError::WrongType {
            column: name.to_string(),
            found: format!("{:?}", column.dtype()),
        })?;
    if casted.null_count() > column.null_count() {
        return Err(FrameError::WrongType {
            column: name.to_string(),
            found: format!("{:?}", column.dtype()),
        });
    }
    Ok(casted.f64()?.clone())
}

/// A null-free numeric column as a dense vector.
pub fn dense_column(df: &DataFrame, name: &str) -> Result<Array1<f64>, FrameError> {
    let values = float_column(df, name)?;
    if values.null_count() > 0 {
        return Err(FrameError::NullValues(name.to_string()));
    }
    Ok(values.into_no_null_iter().collect())
}

/// Packs the rows of `matrix` into a `List(Float64)` series.
pub fn matrix_to_list_series(name: &str, matrix: &Array2<f64>) -> Series {
    let rows: Vec<Series> = matrix
        .rows()
        .into_iter()
        .map(|row| Series::new("".into(), row.to_vec()))
        .collect();
    Series::new(name.into(), rows)
}

/// Unpacks a `List(Float64)` column into an `n x width` matrix.
pub fn list_column_to_matrix(
    df: &DataFrame,
    name: &str,
    width: usize,
) -> Result<Array2<f64>, FrameError> {
    let column = require_column(df, name)?;
    let list = column.as_materialized_series().list()?;
    let mut matrix = Array2::<f64>::zeros((df.height(), width));
    for (row_index, row) in list.into_iter().enumerate() {
        let row = row.ok_or_else(|| FrameError::NullValues(name.to_string()))?;
        if row.len() != width {
            return Err(FrameError::RaggedRow {
                column: name.to_string(),
                row: row_index,
                found: row.len(),
                expected: width,
            });
        }
        if row.null_count() > 0 {
            return Err(FrameError::NullValues(name.to_string()));
        }
        let values = row.cast(&DataType::Float64)?;
        for (j, value) in values.f64()?.into_no_null_iter().enumerate() {
            matrix[[row_index, j]] = value;
        }
    }
    Ok(matrix)
}

/// Returns a copy of `df` with `series` appended (or replaced if the name exists).
pub fn with_series(df: &DataFrame, series: Series) -> Result<DataFrame, FrameError> {
    let mut out = df.clone();
    out.with_column(series)?;
    Ok(out)
}

/// Drops the named columns that are present; absent names are ignored.
pub fn drop_present(df: &DataFrame, names: &[&str]) -> Result<DataFrame, FrameError> {
    let mut out = df.clone();
    for name in names {
        if has_column(&out, name) {
            out = out.drop(name)?;
        }
    }
    Ok(out)
}

/// `base` if unused, otherwise the first free `base_<n>`.
pub fn fresh_column_name(df: &DataFrame, base: &str) -> String {
    if !has_column(df, base) {
        return base.to_string();
    }
    (1..)
        .map(|n| format!("{base}_{n}"))
        .find(|candidate| !has_column(df, candidate))
        .unwrap_or_else(|| base.to_string())
}
