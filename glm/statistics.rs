//! Packaging of solver output into the layout the R side expects.
//!
//! Solvers report per-coefficient arrays with the intercept last. R prints the
//! intercept first, so every array is rotated by one before it is concatenated.

use crate::solver::{GlmFit, SolverError, SummaryReport};

/// Moves the last element to the front when an intercept was fit.
///
/// Order of the remaining elements is preserved. Without an intercept, or for an
/// empty slice, the values are returned unchanged.
pub fn rotate_intercept<T: Clone>(values: &[T], has_intercept: bool) -> Vec<T> {
    match values.split_last() {
        Some((last, rest)) if has_intercept => {
            let mut rotated = Vec::with_capacity(values.len());
            rotated.push(last.clone());
            rotated.extend_from_slice(rest);
            rotated
        }
        _ => values.to_vec(),
    }
}

/// Statistics captured at fit time; these are what the metadata record persists.
#[derive(Debug, Clone, PartialEq)]
pub struct FitStatistics {
    pub coefficients: Vec<f64>,
    pub dispersion: f64,
    pub null_deviance: f64,
    pub deviance: f64,
    pub residual_degree_of_freedom_null: i64,
    pub residual_degree_of_freedom: i64,
    pub aic: f64,
    pub num_iterations: usize,
}

impl FitStatistics {
    /// Builds the R-ordered coefficient vector and copies the scalar statistics.
    ///
    /// With a normal-equation solver the result is four blocks (estimate, standard
    /// error, t value, p value), each intercept first. Otherwise only the estimates.
    pub fn extract(fit: &GlmFit, has_intercept: bool) -> Result<Self, SolverError> {
        let report = fit.summary.report();

        let mut estimates = fit.coefficients.clone();
        if has_intercept {
            estimates.push(fit.intercept);
        }

        let coefficients = if report.is_normal_solver {
            let blocks = [
                ("standard errors", &report.coefficient_standard_errors),
                ("t values", &report.t_values),
                ("p values", &report.p_values),
            ];
            let mut coefficients = rotate_intercept(&estimates, has_intercept);
            for (name, block) in blocks {
                let block = block.as_ref().ok_or_else(|| {
                    SolverError::InconsistentSummary(format!(
                        "normal-equation solver reported no {name}"
                    ))
                })?;
                if block.len() != estimates.len() {
                    return Err(SolverError::InconsistentSummary(format!(
                        "{} {name} for {} coefficients",
                        block.len(),
                        estimates.len()
                    )));
                }
                coefficients.extend(rotate_intercept(block, has_intercept));
            }
            coefficients
        } else {
            rotate_intercept(&estimates, has_intercept)
        };

        Ok(Self::from_report(coefficients, report))
    }

    fn from_report(coefficients: Vec<f64>, report: &SummaryReport) -> Self {
        Self {
            coefficients,
            dispersion: report.dispersion,
            null_deviance: report.null_deviance,
            deviance: report.deviance,
            residual_degree_of_freedom_null: report.residual_degree_of_freedom_null,
            residual_degree_of_freedom: report.residual_degree_of_freedom,
            aic: report.aic,
            num_iterations: report.num_iterations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::{ResidualKind, TrainingSummary};
    use ndarray::Array1;
    use std::sync::Arc;

    #[derive(Debug)]
    struct FixedSummary(SummaryReport);

    impl TrainingSummary for FixedSummary {
        fn report(&self) -> &SummaryReport {
            &self.0
        }

        fn residuals(&self, kind: ResidualKind) -> Result<Array1<f64>, SolverError> {
            Err(SolverError::UnsupportedResiduals(kind))
        }
    }

    fn fit_with(report: SummaryReport) -> GlmFit {
        GlmFit {
            coefficients: vec![1.5, -2.0],
            intercept: 0.25,
            summary: Arc::new(FixedSummary(report)),
        }
    }

    #[test]
    fn rotation_moves_only_the_last_element() {
        assert_eq!(rotate_intercept(&[1, 2, 3, 4], true), vec![4, 1, 2, 3]);
        assert_eq!(rotate_intercept(&[1, 2, 3, 4], false), vec![1, 2, 3, 4]);
        assert_eq!(rotate_intercept(&[7], true), vec![7]);
        assert!(rotate_intercept::<i32>(&[], true).is_empty());
    }

    #[test]
    fn iterative_solver_yields_estimates_only() {
        let fit = fit_with(SummaryReport {
            num_iterations: 6,
            ..SummaryReport::default()
        });
        let stats = FitStatistics::extract(&fit, true).unwrap();
        assert_eq!(stats.coefficients, vec![0.25, 1.5, -2.0]);
        assert_eq!(stats.num_iterations, 6);

        let stats = FitStatistics::extract(&fit, false).unwrap();
        assert_eq!(stats.coefficients, vec![1.5, -2.0]);
    }

    #[test]
    fn normal_solver_yields_four_rotated_blocks() {
        let fit = fit_with(SummaryReport {
            is_normal_solver: true,
            coefficient_standard_errors: Some(vec![0.1, 0.2, 0.05]),
            t_values: Some(vec![15.0, -10.0, 5.0]),
            p_values: Some(vec![0.001, 0.002, 0.01]),
            dispersion: 1.25,
            aic: 42.0,
            residual_degree_of_freedom: 7,
            residual_degree_of_freedom_null: 9,
            ..SummaryReport::default()
        });
        let stats = FitStatistics::extract(&fit, true).unwrap();
        assert_eq!(
            stats.coefficients,
            vec![
                0.25, 1.5, -2.0, 0.05, 0.1, 0.2, 5.0, 15.0, -10.0, 0.01, 0.001, 0.002
            ]
        );
        assert_eq!(stats.dispersion, 1.25);
        assert_eq!(stats.aic, 42.0);
        assert_eq!(stats.residual_degree_of_freedom, 7);
        assert_eq!(stats.residual_degree_of_freedom_null, 9);
    }

    #[test]
    fn mismatched_inference_arrays_are_rejected() {
        let fit = fit_with(SummaryReport {
            is_normal_solver: true,
            coefficient_standard_errors: Some(vec![0.1, 0.2]),
            t_values: Some(vec![1.0, 2.0, 3.0]),
            p_values: Some(vec![0.1, 0.2, 0.3]),
            ..SummaryReport::default()
        });
        assert!(matches!(
            FitStatistics::extract(&fit, true),
            Err(SolverError::InconsistentSummary(_))
        ));

        let fit = fit_with(SummaryReport {
            is_normal_solver: true,
            ..SummaryReport::default()
        });
        assert!(matches!(
            FitStatistics::extract(&fit, true),
            Err(SolverError::InconsistentSummary(_))
        ));
    }
}
