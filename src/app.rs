//! Binary front-end.
//!
//! `main.rs` only maps the returned error to an exit code. This module:
//! - parses CLI arguments and installs the log subscriber
//! - turns flags into tasks
//! - runs them through the shared pipeline
//! - prints the rendered reports and plots

use std::collections::BTreeMap;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command, FitArgs, RunArgs, SimulateArgs};
use crate::domain::ParamSpec;
use crate::error::{AppError, FitError};
use crate::fit::SamplerConfig;
use crate::io::{TacFitTask, Task, read_table, read_task_file, write_table};

pub mod pipeline;

use pipeline::{RunSettings, TaskRunner, render_output};

/// Entry point for the `tack` binary.
pub fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    match cli.command {
        Command::Run(args) => handle_run(args),
        Command::Fit(args) => handle_fit(args),
        Command::Simulate(args) => handle_simulate(args),
        Command::Models => {
            print!("{}", crate::report::format_models());
            Ok(())
        }
    }
}

/// Logs go to stderr so reports on stdout stay pipeable.
///
/// Filter precedence: `--log-level`, then `RUST_LOG`, then `info`.
fn init_tracing(log_level: Option<&str>) {
    let filter = match log_level {
        Some(directives) => EnvFilter::new(directives),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    // A subscriber may already be installed (e.g. by an embedding host).
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn handle_run(args: RunArgs) -> Result<(), AppError> {
    let tasks = read_task_file(&args.task_file)?;
    info!(path = %args.task_file.display(), tasks = tasks.len(), "task file read");

    let settings = RunSettings {
        plot: !args.no_plot,
        ..RunSettings::default()
    };
    let mut runner = TaskRunner::new();
    for (i, task) in tasks.iter().enumerate() {
        info!(index = i + 1, task = task.kind(), "task started");
        let output = runner.run(task)?;
        println!("{}", render_output(&output, &settings));
    }
    Ok(())
}

fn handle_fit(args: FitArgs) -> Result<(), AppError> {
    let settings = RunSettings {
        plot: !args.no_plot,
        width: args.width,
        height: args.height,
    };
    let task = fit_task_from_args(args);
    let output = TaskRunner::new().run(&Task::TacFit(task))?;
    println!("{}", render_output(&output, &settings));
    Ok(())
}

fn handle_simulate(args: SimulateArgs) -> Result<(), AppError> {
    let params = simulation_params(&args.params)?;
    let mut table = read_table(&args.table)?;

    let values = crate::models::evaluate_model(
        &args.model,
        table.time_series(&args.time_label)?,
        table.column(&args.inp_label)?,
        &params,
    )?;
    table.insert(args.out_label.clone(), values)?;

    let output = args.output.as_ref().unwrap_or(&args.table);
    write_table(output, &table)?;
    info!(path = %output.display(), label = %args.out_label, "simulated curve written");
    Ok(())
}

/// Name→value map of `name=value` flags; bounds and repeated names are rejected.
pub fn simulation_params(specs: &[ParamSpec]) -> Result<BTreeMap<String, f64>, FitError> {
    let mut params = BTreeMap::new();
    for p in specs {
        if p.min.is_some() || p.max.is_some() {
            return Err(FitError::InvalidData(format!(
                "parameter '{}' of a simulation takes a single value, not bounds",
                p.name
            )));
        }
        if params.insert(p.name.clone(), p.init).is_some() {
            return Err(FitError::InvalidData(format!("parameter '{}' given twice", p.name)));
        }
    }
    Ok(params)
}

pub fn fit_task_from_args(args: FitArgs) -> TacFitTask {
    TacFitTask {
        tac_path: args.table.to_string_lossy().into_owned(),
        time_label: args.time_label,
        inp_label: args.inp_label,
        tis_label: args.tis_label,
        method: args.method,
        model: args.model,
        param: args.params,
        tcut: args.tcut,
        mcmc: SamplerConfig {
            walkers: args.walkers,
            steps: args.steps,
            workers: args.workers,
            seed: args.seed,
            ..SamplerConfig::default()
        },
        export: args.export,
        export_json: args.export_json,
        plot: !args.no_plot,
    }
}
