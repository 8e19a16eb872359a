#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

//! Formula-driven GLM pipelines.
//!
//! A formula and a polars `DataFrame` go in; a fitted [`GlmWrapper`] comes out,
//! carrying an encoder stage, the fitted GLM and (for binomial models) the stages
//! that turn probabilities back into labels. Coefficients and fit statistics are
//! kept in the layout R prints them in, and the whole model saves to a directory
//! holding a TOML metadata record next to the pipeline.
//!
//! The GLM itself is solved by whatever implements [`solver::GlmSolver`].

pub mod assembler;
pub mod family;
pub mod formula;
pub mod frame;
pub mod persistence;
pub mod pipeline;
pub mod solver;
pub mod stages;
pub mod statistics;
pub mod wrapper;

pub use assembler::GlmOptions;
pub use family::{Family, Link};
pub use formula::StringOrderType;
pub use solver::{GlmFit, GlmSolver, ResidualKind, SummaryReport, TrainingSummary};
pub use wrapper::{GlmWrapper, WrapperError};
