//! Builds and fits the stage sequence for a formula, dataset and family.

use crate::family::{Family, Link};
use crate::formula::{FormulaError, RFormula, RFormulaModel, StringOrderType};
use crate::frame;
use crate::pipeline::{BinomialPipeline, GlmPipeline, PlainPipeline};
use crate::solver::{DesignMatrix, GlmFit, GlmParams, GlmSolver};
use crate::stages::{GlmStage, GlmStageSpec, IndexToLabel, ProbabilityToIndex};
use crate::wrapper::WrapperError;
use polars::prelude::DataFrame;

pub const PROBABILITY_COL: &str = "probability";
pub const PREDICTED_INDEX_COL: &str = "pred_label_idx";
pub const PREDICTION_COL: &str = "prediction";

/// Fit options as passed from the R side.
#[derive(Debug, Clone, PartialEq)]
pub struct GlmOptions {
    pub family: Family,
    /// `None` selects the family's canonical link.
    pub link: Option<Link>,
    pub tol: f64,
    pub max_iter: usize,
    pub weight_col: Option<String>,
    pub reg_param: f64,
    pub offset_col: Option<String>,
    pub variance_power: f64,
    /// Tweedie only; defaults to `1 - variance_power`.
    pub link_power: Option<f64>,
    pub string_order: StringOrderType,
}

impl Default for GlmOptions {
    fn default() -> Self {
        Self {
            family: Family::Gaussian,
            link: None,
            tol: 1e-6,
            max_iter: 25,
            weight_col: None,
            reg_param: 0.0,
            offset_col: None,
            variance_power: 0.0,
            link_power: None,
            string_order: StringOrderType::default(),
        }
    }
}

impl GlmOptions {
    pub fn with_family(mut self, family: Family) -> Self {
        self.family = family;
        self
    }

    pub fn with_link(mut self, link: Link) -> Self {
        self.link = Some(link);
        self
    }

    pub fn with_tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn with_weight_col(mut self, name: &str) -> Self {
        self.weight_col = Some(name.to_string());
        self
    }

    pub fn with_reg_param(mut self, reg_param: f64) -> Self {
        self.reg_param = reg_param;
        self
    }

    pub fn with_offset_col(mut self, name: &str) -> Self {
        self.offset_col = Some(name.to_string());
        self
    }

    pub fn with_variance_power(mut self, variance_power: f64) -> Self {
        self.variance_power = variance_power;
        self
    }

    pub fn with_link_power(mut self, link_power: f64) -> Self {
        self.link_power = Some(link_power);
        self
    }

    pub fn with_string_order(mut self, order: StringOrderType) -> Self {
        self.string_order = order;
        self
    }

    pub fn resolved_link(&self) -> Link {
        match (self.link, self.family) {
            (Some(link), _) => link,
            (None, Family::Tweedie) => {
                Link::from_power(self.link_power.unwrap_or(1.0 - self.variance_power))
            }
            (None, family) => family.canonical_link(self.variance_power),
        }
    }

    fn excluded_columns(&self) -> Vec<&str> {
        self.weight_col
            .iter()
            .chain(self.offset_col.iter())
            .map(String::as_str)
            .collect()
    }
}

/// Encodes `df` with `formula`, fits the GLM through `solver` and assembles the
/// pipeline for the family. Returns the raw solver output alongside so the caller can
/// extract statistics.
pub fn fit_pipeline(
    formula: &str,
    df: &DataFrame,
    options: &GlmOptions,
    solver: &dyn GlmSolver,
) -> Result<(GlmPipeline, GlmFit), WrapperError> {
    let family = options.family;
    let link = options.resolved_link();
    log::info!(
        "Fitting '{formula}' with family {family} and link {link} on {} rows",
        df.height()
    );

    let encoder = RFormula::new(formula)
        .with_force_index_label(family.is_binomial())
        .with_string_order(options.string_order)
        .with_features_col(&frame::fresh_column_name(df, "features"))
        .with_label_col(&frame::fresh_column_name(df, "label"));
    let model = encoder.fit(df, &options.excluded_columns())?;

    if family.is_binomial() {
        let found = model.labels().map_or(0, <[String]>::len);
        if found != 2 {
            return Err(FormulaError::LabelLevels { expected: 2, found }.into());
        }
    }
    log::debug!("Features: {:?}", model.feature_names());

    let design = training_design(&model, df, options)?;
    let params = GlmParams {
        family,
        link,
        fit_intercept: model.has_intercept(),
        tolerance: options.tol,
        max_iterations: options.max_iter,
        reg_param: options.reg_param,
        weight_col: options.weight_col.clone(),
        offset_col: options.offset_col.clone(),
        variance_power: options.variance_power,
    };
    let fit = solver.fit(&design, &params)?;

    let prediction_col = frame::fresh_column_name(df, PREDICTION_COL);
    let stage_spec = |output_col: &str| GlmStageSpec {
        family,
        link,
        fit_intercept: model.has_intercept(),
        features_col: model.features_col().to_string(),
        prediction_col: output_col.to_string(),
        offset_col: options.offset_col.clone(),
    };
    let pipeline = match model.labels() {
        Some(labels) if family.is_binomial() => {
            let labels = labels.to_vec();
            let probability_col = frame::fresh_column_name(df, PROBABILITY_COL);
            let index_col = frame::fresh_column_name(df, PREDICTED_INDEX_COL);
            let glm = GlmStage::new(
                stage_spec(&probability_col),
                fit.coefficients.clone(),
                fit.intercept,
                Some(fit.summary.clone()),
            );
            GlmPipeline::Binomial(BinomialPipeline {
                formula: model,
                glm,
                to_index: ProbabilityToIndex::new(&probability_col, &index_col),
                to_label: IndexToLabel::new(&index_col, &prediction_col, labels),
            })
        }
        _ => {
            let glm = GlmStage::new(
                stage_spec(&prediction_col),
                fit.coefficients.clone(),
                fit.intercept,
                Some(fit.summary.clone()),
            );
            GlmPipeline::Plain(PlainPipeline {
                formula: model,
                glm,
            })
        }
    };
    log::debug!("Assembled pipeline: {:?}", pipeline.stage_names());
    log::info!(
        "Fit complete after {} iterations",
        fit.summary.report().num_iterations
    );
    Ok((pipeline, fit))
}

/// Dense solver inputs for the training rows. Encoding failures here belong to the
/// formula, not to a later scoring call.
fn training_design(
    model: &RFormulaModel,
    df: &DataFrame,
    options: &GlmOptions,
) -> Result<DesignMatrix, FormulaError> {
    let y = model
        .encode_label(df)?
        .ok_or_else(|| FormulaError::ColumnNotFound(model.response().to_string()))?;
    Ok(DesignMatrix {
        x: model.design_matrix(df)?,
        y,
        weights: optional_column(df, options.weight_col.as_deref())?,
        offset: optional_column(df, options.offset_col.as_deref())?,
    })
}

fn optional_column(
    df: &DataFrame,
    name: Option<&str>,
) -> Result<Option<ndarray::Array1<f64>>, FormulaError> {
    name.map(|name| frame::dense_column(df, name))
        .transpose()
        .map_err(FormulaError::from)
}
