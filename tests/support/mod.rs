//! A deterministic stand-in for a GLM solver.
#![allow(dead_code)]

use glmwrap::solver::{DesignMatrix, GlmFit, GlmParams, GlmSolver, ResidualKind, SolverError};
use glmwrap::{SummaryReport, TrainingSummary};
use ndarray::Array1;
use polars::prelude::*;
use std::sync::Arc;

#[derive(Debug)]
pub struct FakeSummary {
    report: SummaryReport,
    residuals: Array1<f64>,
}

impl TrainingSummary for FakeSummary {
    fn report(&self) -> &SummaryReport {
        &self.report
    }

    fn residuals(&self, kind: ResidualKind) -> Result<Array1<f64>, SolverError> {
        match kind {
            ResidualKind::Working => Err(SolverError::UnsupportedResiduals(kind)),
            _ => Ok(self.residuals.clone()),
        }
    }
}

/// Coefficient `j` is `0.1 * (j + 1)`, the intercept is `0.5`.
pub struct FakeSolver {
    pub normal: bool,
    pub fail: bool,
}

impl FakeSolver {
    pub fn normal() -> Self {
        Self {
            normal: true,
            fail: false,
        }
    }

    pub fn iterative() -> Self {
        Self {
            normal: false,
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            normal: false,
            fail: true,
        }
    }
}

impl GlmSolver for FakeSolver {
    fn fit(&self, design: &DesignMatrix, params: &GlmParams) -> Result<GlmFit, SolverError> {
        if self.fail {
            return Err(SolverError::DidNotConverge {
                max_iterations: params.max_iterations,
            });
        }
        let p = design.x.ncols();
        let coefficients: Vec<f64> = (0..p).map(|j| 0.1 * (j + 1) as f64).collect();
        let intercept = if params.fit_intercept { 0.5 } else { 0.0 };
        let fitted = design.x.dot(&Array1::from(coefficients.clone())) + intercept;
        let residuals = &design.y - &fitted;

        let n = design.y.len() as i64;
        let k = p + usize::from(params.fit_intercept);
        let inference = |scale: f64| -> Option<Vec<f64>> {
            Some((0..k).map(|j| scale * (j + 1) as f64).collect())
        };
        let report = SummaryReport {
            dispersion: 1.0,
            null_deviance: 20.0,
            deviance: residuals.mapv(|r| r * r).sum(),
            residual_degree_of_freedom_null: n - 1,
            residual_degree_of_freedom: n - k as i64,
            aic: 31.25,
            num_iterations: if self.normal { 1 } else { 5 },
            is_normal_solver: self.normal,
            coefficient_standard_errors: if self.normal { inference(0.01) } else { None },
            t_values: if self.normal { inference(2.0) } else { None },
            p_values: if self.normal { inference(0.001) } else { None },
        };
        Ok(GlmFit {
            coefficients,
            intercept,
            summary: Arc::new(FakeSummary { report, residuals }),
        })
    }
}

pub fn gaussian_data() -> DataFrame {
    DataFrame::new(vec![
        Series::new("y".into(), vec![1.2, 2.3, 2.9, 4.1, 5.2, 5.8]).into(),
        Series::new("x1".into(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).into(),
        Series::new("x2".into(), vec![0.5, 0.1, 0.9, 0.4, 0.7, 0.2]).into(),
        Series::new("w".into(), vec![1.0, 1.0, 2.0, 2.0, 1.0, 1.0]).into(),
    ])
    .expect("construct gaussian data")
}

pub fn binomial_data() -> DataFrame {
    DataFrame::new(vec![
        Series::new("outcome".into(), vec!["yes", "no", "no", "yes", "no", "yes"]).into(),
        Series::new("dose".into(), vec![-4.0, -1.0, 2.0, 3.0, -6.0, 8.0]).into(),
        Series::new("group".into(), vec!["a", "b", "a", "b", "a", "a"]).into(),
    ])
    .expect("construct binomial data")
}
