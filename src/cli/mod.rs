//! Command-line parsing for the `tack` TAC kinetics fitter.
//!
//! Only flag definitions live here; `app` turns them into tasks and runs them.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::domain::ParamSpec;

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "tack", version, about = "Tissue time-activity curve kinetic model fitter")]
pub struct Cli {
    /// Log filter (e.g. `info`, `debug`, `tac_kinetics=trace`); overrides RUST_LOG.
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run every task of a JSON task file in order.
    Run(RunArgs),
    /// Fit one tissue curve of a table file.
    Fit(FitArgs),
    /// Evaluate a model on a table's input curve and write the result as a new column.
    Simulate(SimulateArgs),
    /// List the available models and their parameters.
    Models,
}

#[derive(Debug, Parser)]
pub struct RunArgs {
    /// Task file (JSON).
    #[arg(value_name = "TASK_FILE")]
    pub task_file: PathBuf,

    /// Disable terminal plots for every task.
    #[arg(long)]
    pub no_plot: bool,
}

/// Options for a single fit.
#[derive(Debug, Parser, Clone)]
pub struct FitArgs {
    /// Tab-delimited table holding the curves.
    #[arg(long, value_name = "TSV")]
    pub table: PathBuf,

    /// Label of the time column.
    #[arg(long)]
    pub time_label: String,

    /// Label of the input function column.
    #[arg(long)]
    pub inp_label: String,

    /// Label of the tissue curve column.
    #[arg(long)]
    pub tis_label: String,

    /// Response model (step, step2, step_fermi, fermi2, patlak).
    #[arg(long)]
    pub model: String,

    /// Fit method: `leastsq` or `emcee`.
    #[arg(long, default_value = "leastsq")]
    pub method: String,

    /// Use only the first N samples.
    #[arg(long)]
    pub tcut: Option<usize>,

    /// Parameter as `name=init[:min[:max]]` (repeatable).
    #[arg(long = "param", value_name = "SPEC", required = true)]
    pub params: Vec<ParamSpec>,

    /// Number of walkers (emcee).
    #[arg(long, default_value_t = 32)]
    pub walkers: usize,

    /// Number of sampler steps (emcee).
    #[arg(long, default_value_t = 2000)]
    pub steps: usize,

    /// Worker threads evaluating the log-probability (emcee).
    #[arg(long, default_value_t = 4)]
    pub workers: usize,

    /// Random seed of the sampler (emcee).
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Disable the terminal plot.
    #[arg(long)]
    pub no_plot: bool,

    /// Plot width (columns).
    #[arg(long, default_value_t = 100)]
    pub width: usize,

    /// Plot height (rows).
    #[arg(long, default_value_t = 25)]
    pub height: usize,

    /// Export the fitted curves to a tab-delimited table.
    #[arg(long)]
    pub export: Option<PathBuf>,

    /// Export the fit result to JSON.
    #[arg(long = "export-json")]
    pub export_json: Option<PathBuf>,
}

/// Options for forward simulation.
#[derive(Debug, Parser)]
pub struct SimulateArgs {
    /// Tab-delimited table holding the input curve.
    #[arg(long, value_name = "TSV")]
    pub table: PathBuf,

    #[arg(long)]
    pub time_label: String,

    #[arg(long)]
    pub inp_label: String,

    #[arg(long)]
    pub model: String,

    /// Parameter as `name=value` (repeatable).
    #[arg(long = "param", value_name = "SPEC", required = true)]
    pub params: Vec<ParamSpec>,

    /// Label of the new column.
    #[arg(long, default_value = "sim")]
    pub out_label: String,

    /// Output table (defaults to overwriting the input table).
    #[arg(long, value_name = "TSV")]
    pub output: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fit_with_repeated_params() {
        let cli = Cli::try_parse_from([
            "tack",
            "fit",
            "--table",
            "scan.tsv",
            "--time-label",
            "tacq",
            "--inp-label",
            "1",
            "--tis-label",
            "2",
            "--model",
            "step",
            "--param",
            "amp=0.5:0:1",
            "--param",
            "extent=10",
            "--no-plot",
        ])
        .unwrap();
        let Command::Fit(args) = cli.command else {
            panic!("expected fit");
        };
        assert_eq!(args.method, "leastsq");
        assert_eq!(args.params.len(), 2);
        assert_eq!(args.params[0].max, Some(1.0));
        assert!(args.no_plot);
        assert_eq!(args.walkers, 32);
    }

    #[test]
    fn rejects_malformed_param() {
        let res = Cli::try_parse_from([
            "tack", "fit", "--table", "a", "--time-label", "t", "--inp-label", "i", "--tis-label", "y",
            "--model", "step", "--param", "amp",
        ]);
        assert!(res.is_err());
    }

    #[test]
    fn global_log_level() {
        let cli = Cli::try_parse_from(["tack", "models", "--log-level", "debug"]).unwrap();
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert!(matches!(cli.command, Command::Models));
    }
}
