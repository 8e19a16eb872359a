//! The fitted stage sequence and its on-disk artifact.
//!
//! A pipeline is either plain (encoder, GLM) or binomial (encoder, GLM,
//! probability-to-index, index-to-label). Each variant knows which of its
//! intermediate columns to hide from callers.
//!
//! On disk a pipeline is a directory:
//!
//! ```text
//! <dir>/metadata                     class, topology, stage names
//! <dir>/stages/0_RFormulaModel       one TOML document per stage
//! <dir>/stages/1_GlmStage
//! ...
//! ```

use crate::family::Family;
use crate::formula::RFormulaModel;
use crate::frame;
use crate::persistence::{PersistenceError, read_toml, write_toml};
use crate::stages::{GlmStage, IndexToLabel, ProbabilityToIndex, StageError};
use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const PIPELINE_CLASS: &str = "glmwrap.GlmPipeline";

const FORMULA_STAGE: &str = "RFormulaModel";
const GLM_STAGE: &str = "GlmStage";
const INDEX_STAGE: &str = "ProbabilityToIndex";
const LABEL_STAGE: &str = "IndexToLabel";

#[derive(Debug, Clone, PartialEq)]
pub struct PlainPipeline {
    pub formula: RFormulaModel,
    pub glm: GlmStage,
}

impl PlainPipeline {
    fn dropped_columns(&self) -> Vec<&str> {
        vec![self.formula.features_col()]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BinomialPipeline {
    pub formula: RFormulaModel,
    pub glm: GlmStage,
    pub to_index: ProbabilityToIndex,
    pub to_label: IndexToLabel,
}

impl BinomialPipeline {
    fn dropped_columns(&self) -> Vec<&str> {
        vec![
            self.glm.prediction_col(),
            self.to_index.output_col(),
            self.formula.features_col(),
            self.formula.label_col(),
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GlmPipeline {
    Plain(PlainPipeline),
    Binomial(BinomialPipeline),
}

#[derive(Debug, Serialize, Deserialize)]
struct PipelineMetadata {
    class: String,
    topology: String,
    stages: Vec<String>,
}

impl GlmPipeline {
    pub fn formula(&self) -> &RFormulaModel {
        match self {
            GlmPipeline::Plain(p) => &p.formula,
            GlmPipeline::Binomial(b) => &b.formula,
        }
    }

    pub fn glm(&self) -> &GlmStage {
        match self {
            GlmPipeline::Plain(p) => &p.glm,
            GlmPipeline::Binomial(b) => &b.glm,
        }
    }

    pub fn family(&self) -> Family {
        self.glm().family()
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        match self {
            GlmPipeline::Plain(_) => vec![FORMULA_STAGE, GLM_STAGE],
            GlmPipeline::Binomial(_) => vec![FORMULA_STAGE, GLM_STAGE, INDEX_STAGE, LABEL_STAGE],
        }
    }

    pub fn stage_count(&self) -> usize {
        self.stage_names().len()
    }

    fn topology(&self) -> &'static str {
        match self {
            GlmPipeline::Plain(_) => "plain",
            GlmPipeline::Binomial(_) => "binomial",
        }
    }

    /// Intermediate columns removed from the caller-facing output.
    pub fn dropped_columns(&self) -> Vec<&str> {
        match self {
            GlmPipeline::Plain(p) => p.dropped_columns(),
            GlmPipeline::Binomial(b) => b.dropped_columns(),
        }
    }

    /// Runs every stage, keeping intermediate columns.
    pub fn transform(&self, df: &DataFrame) -> Result<DataFrame, StageError> {
        match self {
            GlmPipeline::Plain(p) => {
                let encoded = p.formula.transform(df)?;
                p.glm.transform(&encoded)
            }
            GlmPipeline::Binomial(b) => {
                let encoded = b.formula.transform(df)?;
                let scored = b.glm.transform(&encoded)?;
                let indexed = b.to_index.transform(&scored)?;
                b.to_label.transform(&indexed)
            }
        }
    }

    /// Runs every stage, then drops the intermediate columns.
    pub fn transform_output(&self, df: &DataFrame) -> Result<DataFrame, StageError> {
        let out = self.transform(df)?;
        Ok(frame::drop_present(&out, &self.dropped_columns())?)
    }

    pub fn save(&self, dir: &Path) -> Result<(), PersistenceError> {
        let stage_dir = dir.join("stages");
        fs::create_dir_all(&stage_dir)?;
        let names = self.stage_names();
        let stage_path = |index: usize| stage_dir.join(format!("{index}_{}", names[index]));

        write_toml(
            &dir.join("metadata"),
            &PipelineMetadata {
                class: PIPELINE_CLASS.to_string(),
                topology: self.topology().to_string(),
                stages: names.iter().map(|s| s.to_string()).collect(),
            },
        )?;
        write_toml(&stage_path(0), self.formula())?;
        write_toml(&stage_path(1), self.glm())?;
        if let GlmPipeline::Binomial(b) = self {
            write_toml(&stage_path(2), &b.to_index)?;
            write_toml(&stage_path(3), &b.to_label)?;
        }
        log::debug!(
            "Saved {} pipeline with {} stages to {}",
            self.topology(),
            names.len(),
            dir.display()
        );
        Ok(())
    }

    pub fn load(dir: &Path) -> Result<Self, PersistenceError> {
        let metadata: PipelineMetadata = read_toml(&dir.join("metadata"))?;
        if metadata.class != PIPELINE_CLASS {
            return Err(PersistenceError::WrongClass {
                expected: PIPELINE_CLASS.to_string(),
                found: metadata.class,
            });
        }
        let expected: Vec<&str> = match metadata.topology.as_str() {
            "plain" => vec![FORMULA_STAGE, GLM_STAGE],
            "binomial" => vec![FORMULA_STAGE, GLM_STAGE, INDEX_STAGE, LABEL_STAGE],
            other => {
                return Err(PersistenceError::UnexpectedStages(format!(
                    "unknown topology '{other}'"
                )));
            }
        };
        if metadata.stages != expected {
            return Err(PersistenceError::UnexpectedStages(format!(
                "{} topology lists stages {:?}",
                metadata.topology, metadata.stages
            )));
        }

        let stage_path = |index: usize| {
            dir.join("stages")
                .join(format!("{index}_{}", expected[index]))
        };
        let formula: RFormulaModel = read_toml(&stage_path(0))?;
        let glm: GlmStage = read_toml(&stage_path(1))?;
        let pipeline = if expected.len() == 4 {
            GlmPipeline::Binomial(BinomialPipeline {
                formula,
                glm,
                to_index: read_toml(&stage_path(2))?,
                to_label: read_toml(&stage_path(3))?,
            })
        } else {
            GlmPipeline::Plain(PlainPipeline { formula, glm })
        };
        log::debug!(
            "Loaded {} pipeline from {}",
            metadata.topology,
            dir.display()
        );
        Ok(pipeline)
    }
}
