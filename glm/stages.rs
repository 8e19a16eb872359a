//! Fitted transformation stages that follow the formula encoder in a pipeline.

use crate::family::{Family, Link};
use crate::frame::{self, FrameError};
use crate::solver::TrainingSummary;
use ndarray::Array1;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StageError {
    #[error("{0}")]
    Frame(#[from] FrameError),
    #[error("Column '{column}' contains the level '{level}', which was not seen during fitting.")]
    UnseenLevel { column: String, level: String },
    #[error("Column '{column}' contains {value}, which is not a valid index into {labels} labels.")]
    InvalidIndex {
        column: String,
        value: f64,
        labels: usize,
    },
}

/// Converts a probability into a class index by rounding half up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbabilityToIndex {
    input_col: String,
    output_col: String,
}

impl ProbabilityToIndex {
    pub fn new(input_col: &str, output_col: &str) -> Self {
        Self {
            input_col: input_col.to_string(),
            output_col: output_col.to_string(),
        }
    }

    pub fn input_col(&self) -> &str {
        &self.input_col
    }

    pub fn output_col(&self) -> &str {
        &self.output_col
    }

    /// 0 below one half, 1 at or above it.
    pub fn classify(probability: f64) -> f64 {
        probability.round()
    }

    /// The input schema plus one `Float64` output field.
    pub fn output_schema(&self, input: &Schema) -> Schema {
        let mut schema = input.clone();
        schema.with_column(self.output_col.as_str().into(), DataType::Float64);
        schema
    }

    pub fn transform(&self, df: &DataFrame) -> Result<DataFrame, StageError> {
        let probabilities = frame::float_column(df, &self.input_col)?;
        let indices: Vec<Option<f64>> = probabilities
            .into_iter()
            .map(|p| p.map(Self::classify))
            .collect();
        Ok(frame::with_series(
            df,
            Series::new(self.output_col.as_str().into(), indices),
        )?)
    }
}

/// Maps class indices back to the label strings captured when the encoder was fit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexToLabel {
    input_col: String,
    output_col: String,
    labels: Vec<String>,
}

impl IndexToLabel {
    pub fn new(input_col: &str, output_col: &str, labels: Vec<String>) -> Self {
        Self {
            input_col: input_col.to_string(),
            output_col: output_col.to_string(),
            labels,
        }
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn output_col(&self) -> &str {
        &self.output_col
    }

    pub fn transform(&self, df: &DataFrame) -> Result<DataFrame, StageError> {
        let indices = frame::float_column(df, &self.input_col)?;
        let labels = indices
            .into_iter()
            .map(|index| match index {
                None => Ok(None),
                Some(value) => {
                    let valid = value.fract() == 0.0
                        && value >= 0.0
                        && (value as usize) < self.labels.len();
                    if valid {
                        Ok(Some(self.labels[value as usize].clone()))
                    } else {
                        Err(StageError::InvalidIndex {
                            column: self.input_col.clone(),
                            value,
                            labels: self.labels.len(),
                        })
                    }
                }
            })
            .collect::<Result<Vec<Option<String>>, StageError>>()?;
        Ok(frame::with_series(
            df,
            Series::new(self.output_col.as_str().into(), labels),
        )?)
    }
}

/// The fitted GLM: natural-order coefficients plus the link used for prediction.
///
/// The training summary only exists for models fit in this process; it is not
/// persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlmStage {
    family: Family,
    link: Link,
    fit_intercept: bool,
    intercept: f64,
    features_col: String,
    prediction_col: String,
    offset_col: Option<String>,
    coefficients: Vec<f64>,
    #[serde(skip)]
    summary: Option<Arc<dyn TrainingSummary>>,
}

impl PartialEq for GlmStage {
    fn eq(&self, other: &Self) -> bool {
        self.family == other.family
            && self.link == other.link
            && self.fit_intercept == other.fit_intercept
            && self.intercept.to_bits() == other.intercept.to_bits()
            && self.features_col == other.features_col
            && self.prediction_col == other.prediction_col
            && self.offset_col == other.offset_col
            && self.coefficients.len() == other.coefficients.len()
            && self
                .coefficients
                .iter()
                .zip(&other.coefficients)
                .all(|(a, b)| a.to_bits() == b.to_bits())
    }
}

/// Construction parameters for [`GlmStage`].
#[derive(Debug, Clone)]
pub struct GlmStageSpec {
    pub family: Family,
    pub link: Link,
    pub fit_intercept: bool,
    pub features_col: String,
    pub prediction_col: String,
    pub offset_col: Option<String>,
}

impl GlmStage {
    pub fn new(
        spec: GlmStageSpec,
        coefficients: Vec<f64>,
        intercept: f64,
        summary: Option<Arc<dyn TrainingSummary>>,
    ) -> Self {
        Self {
            family: spec.family,
            link: spec.link,
            fit_intercept: spec.fit_intercept,
            intercept,
            features_col: spec.features_col,
            prediction_col: spec.prediction_col,
            offset_col: spec.offset_col,
            coefficients,
            summary,
        }
    }

    pub fn family(&self) -> Family {
        self.family
    }

    pub fn link(&self) -> Link {
        self.link
    }

    pub fn fit_intercept(&self) -> bool {
        self.fit_intercept
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    pub fn prediction_col(&self) -> &str {
        &self.prediction_col
    }

    pub fn summary(&self) -> Option<&Arc<dyn TrainingSummary>> {
        self.summary.as_ref()
    }

    /// Linear predictor `X·β + intercept (+ offset)`.
    pub fn linear_predictor(&self, df: &DataFrame) -> Result<Array1<f64>, StageError> {
        let x = frame::list_column_to_matrix(df, &self.features_col, self.coefficients.len())?;
        let beta = Array1::from(self.coefficients.clone());
        let mut eta = x.dot(&beta) + self.intercept;
        if let Some(offset_col) = &self.offset_col {
            eta = eta + frame::dense_column(df, offset_col)?;
        }
        Ok(eta)
    }

    pub fn transform(&self, df: &DataFrame) -> Result<DataFrame, StageError> {
        let eta = self.linear_predictor(df)?;
        let mean: Vec<f64> = eta.iter().map(|&e| self.link.inverse(e)).collect();
        Ok(frame::with_series(
            df,
            Series::new(self.prediction_col.as_str().into(), mean),
        )?)
    }
}
