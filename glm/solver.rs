//! The seam to the GLM solver.
//!
//! The crate never solves a GLM itself. A [`GlmSolver`] receives a dense design matrix
//! together with the fit parameters and returns natural-order coefficients plus a
//! [`TrainingSummary`]; everything else (reordering, packaging, persistence) happens
//! on this side of the trait.

use crate::family::{Family, Link};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SolverError {
    #[error("The GLM solver did not converge within {max_iterations} iterations.")]
    DidNotConverge { max_iterations: usize },
    #[error("The GLM solver rejected its input: {0}")]
    InvalidInput(String),
    #[error("The solver summary is inconsistent: {0}")]
    InconsistentSummary(String),
    #[error("The solver cannot compute {0} residuals.")]
    UnsupportedResiduals(ResidualKind),
}

/// Kinds of residuals a training summary can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResidualKind {
    Deviance,
    Pearson,
    Working,
    Response,
}

impl fmt::Display for ResidualKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResidualKind::Deviance => "deviance",
            ResidualKind::Pearson => "pearson",
            ResidualKind::Working => "working",
            ResidualKind::Response => "response",
        };
        f.write_str(name)
    }
}

impl FromStr for ResidualKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "deviance" => Ok(ResidualKind::Deviance),
            "pearson" => Ok(ResidualKind::Pearson),
            "working" => Ok(ResidualKind::Working),
            "response" => Ok(ResidualKind::Response),
            _ => Err(format!(
                "Unknown residual type: {s}. Expected deviance, pearson, working or response"
            )),
        }
    }
}

/// Everything the solver needs to know besides the data.
#[derive(Debug, Clone, PartialEq)]
pub struct GlmParams {
    pub family: Family,
    pub link: Link,
    pub fit_intercept: bool,
    pub tolerance: f64,
    pub max_iterations: usize,
    pub reg_param: f64,
    pub weight_col: Option<String>,
    pub offset_col: Option<String>,
    /// Tweedie variance power; ignored by other families.
    pub variance_power: f64,
}

/// Dense inputs handed to the solver. Rows are observations.
#[derive(Debug, Clone)]
pub struct DesignMatrix {
    /// Encoded features without an intercept column.
    pub x: Array2<f64>,
    pub y: Array1<f64>,
    pub weights: Option<Array1<f64>>,
    pub offset: Option<Array1<f64>>,
}

/// The scalar and per-coefficient statistics reported by a solver.
///
/// Per-coefficient arrays are in the solver's natural order: features first, then the
/// intercept (when one was fit).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SummaryReport {
    pub dispersion: f64,
    pub null_deviance: f64,
    pub deviance: f64,
    pub residual_degree_of_freedom_null: i64,
    pub residual_degree_of_freedom: i64,
    pub aic: f64,
    pub num_iterations: usize,
    /// True when the solver used the normal equations and reports inference arrays.
    pub is_normal_solver: bool,
    pub coefficient_standard_errors: Option<Vec<f64>>,
    pub t_values: Option<Vec<f64>>,
    pub p_values: Option<Vec<f64>>,
}

/// The in-memory training summary of a freshly fit model.
pub trait TrainingSummary: fmt::Debug + Send + Sync {
    fn report(&self) -> &SummaryReport;

    /// Residuals of the training data, one per observation.
    fn residuals(&self, kind: ResidualKind) -> Result<Array1<f64>, SolverError>;
}

/// What a solver returns.
#[derive(Debug, Clone)]
pub struct GlmFit {
    /// Feature coefficients in design-matrix column order, intercept excluded.
    pub coefficients: Vec<f64>,
    /// Zero when no intercept was fit.
    pub intercept: f64,
    pub summary: Arc<dyn TrainingSummary>,
}

pub trait GlmSolver {
    fn fit(&self, design: &DesignMatrix, params: &GlmParams) -> Result<GlmFit, SolverError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn residual_kinds_parse_case_insensitively() {
        assert_eq!(
            "Deviance".parse::<ResidualKind>().unwrap(),
            ResidualKind::Deviance
        );
        assert_eq!(
            "pearson".parse::<ResidualKind>().unwrap(),
            ResidualKind::Pearson
        );
        assert!("partial".parse::<ResidualKind>().is_err());
    }

    #[test]
    fn residual_kind_display_matches_parse() {
        for kind in [
            ResidualKind::Deviance,
            ResidualKind::Pearson,
            ResidualKind::Working,
            ResidualKind::Response,
        ] {
            assert_eq!(kind.to_string().parse::<ResidualKind>().unwrap(), kind);
        }
    }
}
