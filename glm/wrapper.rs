//! The fitted wrapper handed back to the R side.

use crate::assembler::{GlmOptions, fit_pipeline};
use crate::family::{Family, Link};
use crate::formula::FormulaError;
use crate::frame::FrameError;
use crate::persistence::PersistenceError;
use crate::pipeline::GlmPipeline;
use crate::solver::{GlmSolver, ResidualKind, SolverError};
use crate::stages::StageError;
use crate::statistics::FitStatistics;
use itertools::Itertools;
use polars::prelude::*;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WrapperError {
    #[error("Invalid formula: {0}")]
    InvalidFormula(#[from] FormulaError),
    #[error("GLM fit failed: {0}")]
    SolverFailure(#[from] SolverError),
    #[error("Model persistence failed: {0}")]
    PersistenceFailure(#[from] PersistenceError),
    #[error("The dataset does not match the fitted model: {0}")]
    SchemaMismatch(#[from] StageError),
    #[error(
        "Residuals are only available for a model fit in this session; the training summary is not persisted."
    )]
    SummaryUnavailable,
}

/// A fitted GLM pipeline plus the statistics reported in R layout.
///
/// `coefficients` is intercept first. For normal-equation fits it holds four blocks
/// (estimate, standard error, t value, p value) of `features.len() + 1` entries each.
#[derive(Debug, Clone)]
pub struct GlmWrapper {
    pipeline: GlmPipeline,
    features: Vec<String>,
    coefficients: Vec<f64>,
    dispersion: f64,
    null_deviance: f64,
    deviance: f64,
    residual_degree_of_freedom_null: i64,
    residual_degree_of_freedom: i64,
    aic: f64,
    num_iterations: usize,
    is_loaded: bool,
}

impl GlmWrapper {
    pub fn fit(
        formula: &str,
        df: &DataFrame,
        options: &GlmOptions,
        solver: &dyn GlmSolver,
    ) -> Result<Self, WrapperError> {
        let (pipeline, fit) = fit_pipeline(formula, df, options, solver)?;
        let has_intercept = pipeline.formula().has_intercept();
        let statistics = FitStatistics::extract(&fit, has_intercept)?;
        let features = pipeline.formula().feature_names().to_vec();
        Ok(Self::from_parts(pipeline, features, statistics, false))
    }

    pub(crate) fn from_parts(
        pipeline: GlmPipeline,
        features: Vec<String>,
        statistics: FitStatistics,
        is_loaded: bool,
    ) -> Self {
        Self {
            pipeline,
            features,
            coefficients: statistics.coefficients,
            dispersion: statistics.dispersion,
            null_deviance: statistics.null_deviance,
            deviance: statistics.deviance,
            residual_degree_of_freedom_null: statistics.residual_degree_of_freedom_null,
            residual_degree_of_freedom: statistics.residual_degree_of_freedom,
            aic: statistics.aic,
            num_iterations: statistics.num_iterations,
            is_loaded,
        }
    }

    /// Scores `df`; the input is left untouched.
    pub fn transform(&self, df: &DataFrame) -> Result<DataFrame, WrapperError> {
        Ok(self.pipeline.transform_output(df)?)
    }

    /// Training residuals as a one-column frame named `<kind>Residuals`.
    pub fn residuals(&self, kind: ResidualKind) -> Result<DataFrame, WrapperError> {
        let summary = self
            .pipeline
            .glm()
            .summary()
            .ok_or(WrapperError::SummaryUnavailable)?;
        let values = summary.residuals(kind)?;
        let column = Series::new(format!("{kind}Residuals").into(), values.to_vec());
        DataFrame::new(vec![column.into()])
            .map_err(|e| WrapperError::SchemaMismatch(FrameError::from(e).into()))
    }

    pub fn pipeline(&self) -> &GlmPipeline {
        &self.pipeline
    }

    pub fn family(&self) -> Family {
        self.pipeline.glm().family()
    }

    pub fn link(&self) -> Link {
        self.pipeline.glm().link()
    }

    pub fn has_intercept(&self) -> bool {
        self.pipeline.formula().has_intercept()
    }

    pub fn features(&self) -> &[String] {
        &self.features
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    pub fn dispersion(&self) -> f64 {
        self.dispersion
    }

    pub fn null_deviance(&self) -> f64 {
        self.null_deviance
    }

    pub fn deviance(&self) -> f64 {
        self.deviance
    }

    pub fn residual_degree_of_freedom_null(&self) -> i64 {
        self.residual_degree_of_freedom_null
    }

    pub fn residual_degree_of_freedom(&self) -> i64 {
        self.residual_degree_of_freedom
    }

    pub fn aic(&self) -> f64 {
        self.aic
    }

    pub fn num_iterations(&self) -> usize {
        self.num_iterations
    }

    pub fn is_loaded(&self) -> bool {
        self.is_loaded
    }

    pub(crate) fn statistics(&self) -> FitStatistics {
        FitStatistics {
            coefficients: self.coefficients.clone(),
            dispersion: self.dispersion,
            null_deviance: self.null_deviance,
            deviance: self.deviance,
            residual_degree_of_freedom_null: self.residual_degree_of_freedom_null,
            residual_degree_of_freedom: self.residual_degree_of_freedom,
            aic: self.aic,
            num_iterations: self.num_iterations,
        }
    }

    /// Splits the flat coefficient vector into an R-style summary table.
    pub fn coefficient_table(&self) -> CoefficientTable {
        let rows: Vec<String> = self
            .has_intercept()
            .then(|| "(Intercept)".to_string())
            .into_iter()
            .chain(self.features.iter().cloned())
            .collect();
        let blocks = if rows.is_empty() {
            0
        } else {
            (self.coefficients.len() / rows.len()).min(COLUMN_NAMES.len())
        };
        let columns = self
            .coefficients
            .chunks(rows.len().max(1))
            .take(blocks)
            .map(<[f64]>::to_vec)
            .collect();
        CoefficientTable {
            rows,
            headers: COLUMN_NAMES[..blocks].to_vec(),
            columns,
        }
    }
}

const COLUMN_NAMES: [&str; 4] = ["Estimate", "Std. Error", "t value", "Pr(>|t|)"];

/// Coefficients laid out as R prints them: one row per term, one column per block.
#[derive(Debug, Clone, PartialEq)]
pub struct CoefficientTable {
    pub rows: Vec<String>,
    pub headers: Vec<&'static str>,
    /// `columns[block][row]`.
    pub columns: Vec<Vec<f64>>,
}

impl CoefficientTable {
    pub fn value(&self, row: usize, column: usize) -> Option<f64> {
        self.columns.get(column)?.get(row).copied()
    }
}

impl fmt::Display for CoefficientTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self.rows.iter().map(String::len).max().unwrap_or(0);
        writeln!(
            f,
            "{:<width$} {}",
            "",
            self.headers.iter().map(|h| format!("{h:>12}")).join(" ")
        )?;
        for (i, row) in self.rows.iter().enumerate() {
            let cells = self
                .columns
                .iter()
                .map(|column| format!("{:>12.6}", column[i]))
                .join(" ");
            writeln!(f, "{row:<width$} {cells}")?;
        }
        Ok(())
    }
}
