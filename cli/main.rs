#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

use clap::{Args, CommandFactory, Parser, Subcommand};
use polars::prelude::*;
use std::error::Error;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process;

use glmwrap::GlmWrapper;

#[derive(Parser)]
#[command(
    name = "glmwrap",
    about = "Inspect and apply saved formula-driven GLM models",
    long_about = "Reads models saved as <dir>/metadata plus <dir>/pipeline and either \
                 prints their coefficients and fit statistics or scores a TSV file."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the coefficient table and fit statistics of a saved model
    #[command(about = "Print coefficients and fit statistics")]
    Inspect {
        /// Directory the model was saved to
        #[arg(value_name = "MODEL_DIR")]
        model: PathBuf,
    },

    /// Score a tab-separated file with a saved model
    #[command(about = "Apply a saved model to new data (outputs: predictions TSV)")]
    Predict(PredictArgs),
}

#[derive(Args)]
struct PredictArgs {
    /// Directory the model was saved to
    #[arg(value_name = "MODEL_DIR")]
    model: PathBuf,

    /// Tab-separated input with a header row
    #[arg(value_name = "DATA_TSV")]
    data: PathBuf,

    /// Where to write the scored rows
    #[arg(long, default_value = "predictions.tsv")]
    out: PathBuf,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let Cli { command } = Cli::parse();
    let result = match command {
        Some(Commands::Inspect { model }) => inspect(&model),
        Some(Commands::Predict(args)) => predict(args),
        None => Cli::command()
            .print_help()
            .map(|()| println!())
            .map_err(|e| e.into()),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn inspect(model_dir: &Path) -> Result<(), Box<dyn Error>> {
    let model = GlmWrapper::load(model_dir)?;
    println!("Formula: {}", model.pipeline().formula().formula());
    println!("Family: {}  Link: {}", model.family(), model.link());
    println!();
    print!("{}", model.coefficient_table());
    println!();
    println!(
        "(Dispersion parameter taken to be {})",
        model.dispersion()
    );
    println!(
        "    Null deviance: {} on {} degrees of freedom",
        model.null_deviance(),
        model.residual_degree_of_freedom_null()
    );
    println!(
        "Residual deviance: {} on {} degrees of freedom",
        model.deviance(),
        model.residual_degree_of_freedom()
    );
    println!("AIC: {}", model.aic());
    println!();
    println!("Number of Fisher Scoring iterations: {}", model.num_iterations());
    Ok(())
}

fn predict(args: PredictArgs) -> Result<(), Box<dyn Error>> {
    log::info!("Loading model from {}", args.model.display());
    let model = GlmWrapper::load(&args.model)?;

    log::info!("Loading data from {}", args.data.display());
    let df = CsvReader::new(File::open(&args.data)?)
        .with_options(
            CsvReadOptions::default()
                .with_has_header(true)
                .with_parse_options(CsvParseOptions::default().with_separator(b'\t')),
        )
        .finish()?;

    let mut scored = model.transform(&df)?;
    let mut file = File::create(&args.out)?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .with_separator(b'\t')
        .finish(&mut scored)?;
    println!(
        "Predictions for {} rows saved to: {}",
        scored.height(),
        args.out.display()
    );
    Ok(())
}
