//! Two-part model artifact: `<path>/metadata` and `<path>/pipeline/`.
//!
//! The metadata record is a single TOML document whose keys match the names the R
//! side reads. The pipeline directory is owned by [`GlmPipeline::save`].

use crate::pipeline::GlmPipeline;
use crate::statistics::FitStatistics;
use crate::wrapper::{GlmWrapper, WrapperError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

pub const WRAPPER_CLASS: &str = "glmwrap.GlmWrapper";

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("I/O error while writing the model: {0}")]
    Io(#[from] std::io::Error),
    #[error("Could not read '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Could not parse '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("Could not serialize model metadata: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("'{0}' already exists. Save with overwrite enabled to replace it.")]
    PathExists(String),
    #[error("Expected a '{expected}' artifact but found '{found}'.")]
    WrongClass { expected: String, found: String },
    #[error("The pipeline artifact has an unexpected layout: {0}")]
    UnexpectedStages(String),
    #[error("Model metadata and pipeline disagree: {0}")]
    Inconsistent(String),
}

pub(crate) fn write_toml<T: Serialize>(path: &Path, value: &T) -> Result<(), PersistenceError> {
    let text = toml::to_string_pretty(value)?;
    fs::write(path, text)?;
    Ok(())
}

pub(crate) fn read_toml<T: DeserializeOwned>(path: &Path) -> Result<T, PersistenceError> {
    let text = fs::read_to_string(path).map_err(|source| PersistenceError::Read {
        path: path.display().to_string(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| PersistenceError::Parse {
        path: path.display().to_string(),
        source,
    })
}

/// The human-inspectable half of a saved model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub class: String,
    #[serde(rename = "rFeatures")]
    pub features: Vec<String>,
    #[serde(rename = "rCoefficients")]
    pub coefficients: Vec<f64>,
    #[serde(rename = "rDispersion")]
    pub dispersion: f64,
    #[serde(rename = "rNullDeviance")]
    pub null_deviance: f64,
    #[serde(rename = "rDeviance")]
    pub deviance: f64,
    #[serde(rename = "rResidualDegreeOfFreedomNull")]
    pub residual_degree_of_freedom_null: i64,
    #[serde(rename = "rResidualDegreeOfFreedom")]
    pub residual_degree_of_freedom: i64,
    #[serde(rename = "rAic")]
    pub aic: f64,
    #[serde(rename = "rNumIterations")]
    pub num_iterations: usize,
}

impl ModelMetadata {
    pub fn from_wrapper(wrapper: &GlmWrapper) -> Self {
        let stats = wrapper.statistics();
        Self {
            class: WRAPPER_CLASS.to_string(),
            features: wrapper.features().to_vec(),
            coefficients: stats.coefficients,
            dispersion: stats.dispersion,
            null_deviance: stats.null_deviance,
            deviance: stats.deviance,
            residual_degree_of_freedom_null: stats.residual_degree_of_freedom_null,
            residual_degree_of_freedom: stats.residual_degree_of_freedom,
            aic: stats.aic,
            num_iterations: stats.num_iterations,
        }
    }

    fn into_statistics(self) -> (Vec<String>, FitStatistics) {
        (
            self.features,
            FitStatistics {
                coefficients: self.coefficients,
                dispersion: self.dispersion,
                null_deviance: self.null_deviance,
                deviance: self.deviance,
                residual_degree_of_freedom_null: self.residual_degree_of_freedom_null,
                residual_degree_of_freedom: self.residual_degree_of_freedom,
                aic: self.aic,
                num_iterations: self.num_iterations,
            },
        )
    }
}

pub fn save(wrapper: &GlmWrapper, path: &Path, overwrite: bool) -> Result<(), PersistenceError> {
    if path.exists() {
        if !overwrite {
            return Err(PersistenceError::PathExists(path.display().to_string()));
        }
        if path.is_dir() {
            fs::remove_dir_all(path)?;
        } else {
            fs::remove_file(path)?;
        }
    }
    fs::create_dir_all(path)?;
    write_toml(&path.join("metadata"), &ModelMetadata::from_wrapper(wrapper))?;
    wrapper.pipeline().save(&path.join("pipeline"))?;
    log::info!("Saved model to {}", path.display());
    Ok(())
}

pub fn load(path: &Path) -> Result<GlmWrapper, PersistenceError> {
    let metadata: ModelMetadata = read_toml(&path.join("metadata"))?;
    if metadata.class != WRAPPER_CLASS {
        return Err(PersistenceError::WrongClass {
            expected: WRAPPER_CLASS.to_string(),
            found: metadata.class,
        });
    }
    let pipeline = GlmPipeline::load(&path.join("pipeline"))?;

    let encoded = pipeline.formula().feature_names();
    if metadata.features != encoded {
        return Err(PersistenceError::Inconsistent(format!(
            "metadata lists features {:?} but the formula stage encodes {:?}",
            metadata.features, encoded
        )));
    }
    let terms = encoded.len() + usize::from(pipeline.formula().has_intercept());
    let count = metadata.coefficients.len();
    if count != terms && count != 4 * terms {
        return Err(PersistenceError::Inconsistent(format!(
            "{count} coefficients recorded for {terms} terms"
        )));
    }

    let (features, statistics) = metadata.into_statistics();
    log::info!("Loaded model from {}", path.display());
    Ok(GlmWrapper::from_parts(pipeline, features, statistics, true))
}

impl GlmWrapper {
    /// Writes the model to `path`; an existing path is replaced only with `overwrite`.
    pub fn save(&self, path: impl AsRef<Path>, overwrite: bool) -> Result<(), WrapperError> {
        Ok(save(self, path.as_ref(), overwrite)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, WrapperError> {
        Ok(load(path.as_ref())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::family::{Family, Link};
    use crate::formula::RFormula;
    use crate::pipeline::PlainPipeline;
    use crate::stages::{GlmStage, GlmStageSpec};
    use polars::prelude::*;
    use tempfile::tempdir;

    fn model() -> GlmWrapper {
        let df = DataFrame::new(vec![
            Series::new("y".into(), vec![1.0, 2.0, 4.0]).into(),
            Series::new("x".into(), vec![0.1, 0.2, 0.3]).into(),
        ])
        .unwrap();
        let formula = RFormula::new("y ~ x").fit(&df, &[]).unwrap();
        let glm = GlmStage::new(
            GlmStageSpec {
                family: Family::Poisson,
                link: Link::Log,
                fit_intercept: true,
                features_col: "features".into(),
                prediction_col: "prediction".into(),
                offset_col: None,
            },
            vec![0.1 + 0.2],
            -1.0 / 3.0,
            None,
        );
        let features = formula.feature_names().to_vec();
        GlmWrapper::from_parts(
            GlmPipeline::Plain(PlainPipeline { formula, glm }),
            features,
            FitStatistics {
                coefficients: vec![-1.0 / 3.0, 0.1 + 0.2],
                dispersion: 1.0,
                null_deviance: 3.3,
                deviance: 1e-300,
                residual_degree_of_freedom_null: 2,
                residual_degree_of_freedom: 1,
                aic: f64::MAX,
                num_iterations: 4,
            },
            false,
        )
    }

    #[test]
    fn metadata_uses_r_field_names() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model");
        model().save(&path, false).unwrap();
        let text = fs::read_to_string(path.join("metadata")).unwrap();
        for key in [
            "class",
            "rFeatures",
            "rCoefficients",
            "rDispersion",
            "rNullDeviance",
            "rDeviance",
            "rResidualDegreeOfFreedomNull",
            "rResidualDegreeOfFreedom",
            "rAic",
            "rNumIterations",
        ] {
            assert!(text.contains(key), "metadata is missing {key}:\n{text}");
        }
        assert!(text.contains(WRAPPER_CLASS));
        assert!(path.join("pipeline").join("metadata").exists());
    }

    #[test]
    fn floats_survive_bit_for_bit() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model");
        let original = model();
        original.save(&path, false).unwrap();
        let loaded = GlmWrapper::load(&path).unwrap();
        assert!(loaded.is_loaded());
        assert!(!original.is_loaded());
        let bits = |w: &GlmWrapper| {
            w.coefficients()
                .iter()
                .chain([w.deviance(), w.aic()].iter())
                .map(|v| v.to_bits())
                .collect::<Vec<_>>()
        };
        assert_eq!(bits(&loaded), bits(&original));
        assert_eq!(loaded.pipeline(), original.pipeline());
    }

    #[test]
    fn save_refuses_to_clobber() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model");
        model().save(&path, false).unwrap();
        assert!(matches!(
            save(&model(), &path, false),
            Err(PersistenceError::PathExists(_))
        ));
        save(&model(), &path, true).unwrap();
    }

    #[test]
    fn load_rejects_feature_mismatch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model");
        model().save(&path, false).unwrap();
        let mut metadata: ModelMetadata = read_toml(&path.join("metadata")).unwrap();
        metadata.features = vec!["z".to_string()];
        write_toml(&path.join("metadata"), &metadata).unwrap();
        assert!(matches!(load(&path), Err(PersistenceError::Inconsistent(_))));
    }

    #[test]
    fn load_rejects_wrong_class_and_missing_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model");
        model().save(&path, false).unwrap();
        let mut metadata: ModelMetadata = read_toml(&path.join("metadata")).unwrap();
        metadata.class = "something.Else".to_string();
        write_toml(&path.join("metadata"), &metadata).unwrap();
        assert!(matches!(load(&path), Err(PersistenceError::WrongClass { .. })));

        assert!(matches!(
            load(&dir.path().join("absent")),
            Err(PersistenceError::Read { .. })
        ));
    }
}
