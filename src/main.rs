//! Command line front end: evaluate descriptors against a subject file, manage
//! saved ad-hoc descriptors, and sweep disposable run definitions.

use std::fs;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::error;

use adhoc_dataset::config::Settings;
use adhoc_dataset::convert::StandardConverter;
use adhoc_dataset::descriptor::{AdHocDataset, DescriptorId};
use adhoc_dataset::engine::{Engine, EvaluationMode};
use adhoc_dataset::library::Library;
use adhoc_dataset::lifecycle::LifecycleManager;
use adhoc_dataset::persist::{PersistenceMode, Persistor};
use adhoc_dataset::population::Population;
use adhoc_dataset::{AdHocError, Result};

#[derive(Parser)]
#[command(name = "adhoc")]
#[command(about = "Compose and evaluate ad-hoc datasets", long_about = None)]
struct Args {
    /// Settings file stem (without extension).
    #[arg(long, default_value = "adhoc")]
    settings: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Evaluate a descriptor file against a subject file and print the result.
    Evaluate {
        #[arg(long)]
        descriptor: String,
        #[arg(long)]
        population: String,
        #[arg(long, value_enum, default_value_t = ModeArg::Full)]
        mode: ModeArg,
    },
    /// Save a descriptor file as an ad-hoc dataset.
    Save {
        #[arg(long)]
        descriptor: String,
    },
    /// Print a saved ad-hoc dataset.
    Show {
        #[arg(long)]
        id: i64,
    },
    /// Delete a saved ad-hoc dataset.
    Purge {
        #[arg(long)]
        id: i64,
    },
    /// Delete disposable run definitions no run request refers to.
    Gc,
}

/// Evaluation mode as spelled on the command line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
enum ModeArg {
    Full,
    Preview,
    #[value(name = "row-filters", alias = "row_filters")]
    RowFilters,
}

impl From<ModeArg> for EvaluationMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Full => EvaluationMode::Full,
            ModeArg::Preview => EvaluationMode::Preview,
            ModeArg::RowFilters => EvaluationMode::RowFilterDiagnostic,
        }
    }
}

fn read(path: &str) -> Result<String> {
    fs::read_to_string(path).map_err(|e| AdHocError::NotFound(format!("{path}: {e}")))
}

fn run(args: Args, settings: &Settings) -> Result<()> {
    let mode = if settings.in_memory() {
        PersistenceMode::InMemory
    } else {
        PersistenceMode::File(settings.database.clone())
    };
    match args.command {
        Command::Evaluate {
            descriptor,
            population,
            mode,
        } => {
            let dataset = AdHocDataset::from_json(&read(&descriptor)?)?;
            let population = Population::from_json(&read(&population)?)?;
            let library = Library::standard();
            let converter = StandardConverter::with_resolver(&population);
            let engine = Engine::new(&library, &converter, &population, &population)
                .with_preview_row_limit(settings.preview_row_limit);
            let evaluation = engine.evaluate(&dataset, mode.into())?;
            println!("{}", serde_json::to_string_pretty(&evaluation)?);
        }
        Command::Save { descriptor } => {
            let persistor = Persistor::new(mode)?;
            let lifecycle = LifecycleManager::with_prefix(&persistor, &settings.ad_hoc_prefix);
            let saved = lifecycle.save(&AdHocDataset::from_json(&read(&descriptor)?)?)?;
            println!("{}", serde_json::to_string_pretty(&saved)?);
        }
        Command::Show { id } => {
            let persistor = Persistor::new(mode)?;
            let lifecycle = LifecycleManager::with_prefix(&persistor, &settings.ad_hoc_prefix);
            println!("{}", serde_json::to_string_pretty(&lifecycle.load(DescriptorId(id))?)?);
        }
        Command::Purge { id } => {
            let persistor = Persistor::new(mode)?;
            LifecycleManager::with_prefix(&persistor, &settings.ad_hoc_prefix)
                .purge(DescriptorId(id))?;
        }
        Command::Gc => {
            let persistor = Persistor::new(mode)?;
            let report = LifecycleManager::with_prefix(&persistor, &settings.ad_hoc_prefix)
                .garbage_collect()?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    let settings = match Settings::load_from(&args.settings) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| settings.log_filter.as_str().into()),
        )
        .init();

    match run(args, &settings) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "command failed");
            ExitCode::FAILURE
        }
    }
}
