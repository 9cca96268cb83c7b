//! Task execution shared by `tack run` and `tack fit`.
//!
//! Tasks run in order against one in-memory table registry:
//! load/save tables -> simulate or correct columns -> fit tissue curves -> export
//!
//! The front-end only prints what [`render_output`] returns.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::Path;

use tracing::{debug, info};

use crate::domain::TacTable;
use crate::error::FitError;
use crate::fit::{FitInput, FitOptions, FitOutcome};
use crate::io::{
    Correction, CorrectionTask, SimulateTask, TableTask, TacFitTask, TacPlotTask, Task, read_table, write_curves,
    write_result_json, write_table,
};
use crate::math::shift_time;
use crate::models::evaluate_model;

/// Presentation settings applied to every task of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSettings {
    pub plot: bool,
    pub width: usize,
    pub height: usize,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            plot: true,
            width: 100,
            height: 25,
        }
    }
}

/// What one task produced.
#[derive(Debug, Clone)]
pub enum TaskOutput {
    Fit { outcome: FitOutcome, plot: bool },
    TableLoaded { name: String, rows: usize, columns: usize },
    TableSaved { name: String },
    Simulated { name: String, label: String },
    Corrected { name: String, label: String },
    SeriesPlot(SeriesPlot),
}

/// Columns of one table collected for a series plot.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesPlot {
    pub table: String,
    pub time_label: String,
    pub time: Vec<f64>,
    pub series: Vec<(String, Vec<f64>)>,
    pub xlabel: Option<String>,
    pub ylabel: Option<String>,
}

/// Executes tasks against a named table registry.
#[derive(Debug, Default)]
pub struct TaskRunner {
    tables: BTreeMap<String, TacTable>,
}

impl TaskRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(&self, name: &str) -> Option<&TacTable> {
        self.tables.get(name)
    }

    /// Run one task; errors abort the task list.
    pub fn run(&mut self, task: &Task) -> Result<TaskOutput, FitError> {
        debug!(task = task.kind(), "running task");
        match task {
            Task::TacFit(t) => {
                let outcome = self.run_fit(t)?;
                Ok(TaskOutput::Fit {
                    outcome,
                    plot: t.plot,
                })
            }
            Task::LoadTable(t) => self.load_table(t),
            Task::SaveTable(t) => self.save_table(t),
            Task::Simulate(t) => self.simulate(t),
            Task::Correction(t) => self.correct(t),
            Task::TacPlot(t) => self.tac_plot(t).map(TaskOutput::SeriesPlot),
        }
    }

    /// Run every task in order, stopping at the first failure.
    pub fn run_all(&mut self, tasks: &[Task]) -> Result<Vec<TaskOutput>, FitError> {
        tasks.iter().map(|t| self.run(t)).collect()
    }

    /// Fit a tissue curve, then write the requested exports.
    pub fn run_fit(&self, task: &TacFitTask) -> Result<FitOutcome, FitError> {
        let table = self.resolve_table(&task.tac_path)?;
        let data = FitInput::from_table(&table, &task.time_label, &task.inp_label, &task.tis_label)?;
        let spec = task.parameter_spec()?;
        let options = FitOptions {
            sampler: task.mcmc.clone(),
            ..FitOptions::default()
        };

        let outcome = crate::fit::fit(&data, &task.model, &task.method, &spec, task.tcut, &options)?;

        if let (Some(path), Some(curves)) = (&task.export, outcome.curves()) {
            write_curves(path, curves)?;
        }
        if let Some(path) = &task.export_json {
            write_result_json(path, &outcome)?;
        }
        Ok(outcome)
    }

    /// Registry tables take precedence over files of the same name.
    fn resolve_table(&self, tac_path: &str) -> Result<Cow<'_, TacTable>, FitError> {
        match self.tables.get(tac_path) {
            Some(table) => Ok(Cow::Borrowed(table)),
            None => Ok(Cow::Owned(read_table(Path::new(tac_path))?)),
        }
    }

    fn load_table(&mut self, task: &TableTask) -> Result<TaskOutput, FitError> {
        let table = read_table(&task.file)?;
        let (rows, columns) = (table.len(), table.labels().len());
        info!(name = %task.name, rows, columns, "table loaded");
        self.tables.insert(task.name.clone(), table);
        Ok(TaskOutput::TableLoaded {
            name: task.name.clone(),
            rows,
            columns,
        })
    }

    fn save_table(&self, task: &TableTask) -> Result<TaskOutput, FitError> {
        let table = self.registered(&task.name)?;
        write_table(&task.file, table)?;
        info!(name = %task.name, path = %task.file.display(), "table saved");
        Ok(TaskOutput::TableSaved {
            name: task.name.clone(),
        })
    }

    fn simulate(&mut self, task: &SimulateTask) -> Result<TaskOutput, FitError> {
        let table = self.registered(&task.name)?;
        let t = table.time_series(&task.time_label)?;
        let input = table.column(&task.inp_label)?;
        let values = evaluate_model(&task.model, t, input, &task.param)?;

        if let Some(table) = self.tables.get_mut(&task.name) {
            table.insert(task.out_label.clone(), values)?;
        }
        info!(name = %task.name, model = %task.model, label = %task.out_label, "simulated curve stored");
        Ok(TaskOutput::Simulated {
            name: task.name.clone(),
            label: task.out_label.clone(),
        })
    }

    fn correct(&mut self, task: &CorrectionTask) -> Result<TaskOutput, FitError> {
        let table = self.registered(&task.table_name)?;
        let input = table.column(&task.label_in)?;
        let values: Vec<f64> = match &task.correction {
            Correction::Scale { factor } => input.iter().map(|v| v * factor).collect(),
            Correction::Shift { time_label, delay } => shift_time(input, table.time_series(time_label)?, *delay),
        };

        if let Some(table) = self.tables.get_mut(&task.table_name) {
            table.insert(task.label_out.clone(), values)?;
        }
        info!(
            name = %task.table_name,
            from = %task.label_in,
            to = %task.label_out,
            correction = ?task.correction,
            "correction applied"
        );
        Ok(TaskOutput::Corrected {
            name: task.table_name.clone(),
            label: task.label_out.clone(),
        })
    }

    /// Collect the listed columns; every label must exist.
    pub fn tac_plot(&self, task: &TacPlotTask) -> Result<SeriesPlot, FitError> {
        let table = self.resolve_table(&task.tac_name)?;
        let time = table.time_series(&task.time_label)?.to_vec();
        let series = task
            .label_list()
            .into_iter()
            .map(|label| -> Result<(String, Vec<f64>), FitError> {
                Ok((label.to_string(), table.column(label)?.to_vec()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if series.is_empty() {
            return Err(FitError::InvalidData(format!(
                "TACPlot of '{}' lists no labels",
                task.tac_name
            )));
        }
        Ok(SeriesPlot {
            table: task.tac_name.clone(),
            time_label: task.time_label.clone(),
            time,
            series,
            xlabel: task.xlabel.clone(),
            ylabel: task.ylabel.clone(),
        })
    }

    fn registered(&self, name: &str) -> Result<&TacTable, FitError> {
        self.tables.get(name).ok_or_else(|| {
            let known: Vec<&str> = self.tables.keys().map(String::as_str).collect();
            FitError::Table(format!("no table named '{name}' (loaded: {})", known.join(", ")))
        })
    }
}

/// Human-facing text for one task output.
pub fn render_output(output: &TaskOutput, settings: &RunSettings) -> String {
    match output {
        TaskOutput::Fit { outcome, plot } => {
            let plot = *plot && settings.plot;
            match outcome {
                FitOutcome::LeastSquares { fit, curves } => {
                    let mut out = crate::report::format_fit_report(fit);
                    if plot {
                        out.push('\n');
                        out.push_str(&crate::plot::render_fit_plot(curves, settings.width, settings.height));
                    }
                    out
                }
                FitOutcome::Bayesian { fit, curves } => {
                    let mut out = crate::report::format_bayesian_summary(fit);
                    if plot {
                        out.push('\n');
                        out.push_str(&crate::plot::render_chain_summary(
                            &fit.chains,
                            0,
                            1,
                            settings.width,
                            (settings.height / 2).max(5),
                        ));
                        out.push_str(&crate::plot::render_fit_plot(curves, settings.width, settings.height));
                    }
                    out
                }
                FitOutcome::Skipped { method } => format!("fit skipped: unknown method '{method}'\n"),
            }
        }
        TaskOutput::TableLoaded { name, rows, columns } => {
            format!("loaded table '{name}' ({rows} rows, {columns} columns)\n")
        }
        TaskOutput::TableSaved { name } => format!("saved table '{name}'\n"),
        TaskOutput::Simulated { name, label } => format!("simulated column '{label}' in table '{name}'\n"),
        TaskOutput::Corrected { name, label } => format!("corrected column '{label}' in table '{name}'\n"),
        TaskOutput::SeriesPlot(plot) if settings.plot => crate::plot::render_series_plot(
            &plot.time_label,
            &plot.time,
            &plot.series,
            plot.xlabel.as_deref(),
            plot.ylabel.as_deref(),
            settings.width,
            settings.height,
        ),
        TaskOutput::SeriesPlot(plot) => format!("plot of table '{}' skipped (plots disabled)\n", plot.table),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::parse_tasks;
    use crate::models::patlak;

    fn write_scan(dir: &Path) -> std::path::PathBuf {
        let t: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let input: Vec<f64> = t.iter().map(|&s| 10.0 * s * (-s / 3.0).exp()).collect();
        let tissue = patlak(&t, &input, 0.05, 0.3);

        let mut table = TacTable::new();
        table.insert("tacq", t).unwrap();
        table.insert("1", input).unwrap();
        table.insert("2", tissue).unwrap();
        let path = dir.join("scan.tsv");
        write_table(&path, &table).unwrap();
        path
    }

    #[test]
    fn task_list_loads_fits_and_exports() {
        let dir = tempfile::tempdir().unwrap();
        let scan = write_scan(dir.path());
        let curves = dir.path().join("curves.tsv");
        let json = dir.path().join("result.json");

        let text = format!(
            r#"{{ "task": [
                {{ "type": "LoadTable", "name": "scan", "file": {scan:?} }},
                {{ "type": "TACFit", "tac_path": "scan", "time_label": "tacq",
                   "inp_label": "1", "tis_label": "2", "method": "leastsq", "model": "patlak",
                   "param": [ {{ "name": "k1", "init": 0.01 }}, {{ "name": "v0", "init": 0.1 }} ],
                   "export": {curves:?}, "export_json": {json:?} }}
            ] }}"#
        );
        let tasks = parse_tasks(&text).unwrap();
        let mut runner = TaskRunner::new();
        let outputs = runner.run_all(&tasks).unwrap();

        assert!(matches!(outputs[0], TaskOutput::TableLoaded { rows: 20, columns: 3, .. }));
        let TaskOutput::Fit {
            outcome: FitOutcome::LeastSquares { fit, .. },
            ..
        } = &outputs[1]
        else {
            panic!("expected a least-squares fit");
        };
        let best = fit.best_value_map();
        assert!((best["k1"] - 0.05).abs() < 1e-4, "k1 = {}", best["k1"]);
        assert!((best["v0"] - 0.3).abs() < 1e-3, "v0 = {}", best["v0"]);

        assert_eq!(read_table(&curves).unwrap().len(), 20);
        let exported: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&json).unwrap()).unwrap();
        assert_eq!(exported["method"], "leastsq");
    }

    #[test]
    fn fit_reads_a_file_when_no_table_is_registered() {
        let dir = tempfile::tempdir().unwrap();
        let scan = write_scan(dir.path());
        let task = TacFitTask {
            tac_path: scan.to_string_lossy().into_owned(),
            time_label: "tacq".to_string(),
            inp_label: "1".to_string(),
            tis_label: "2".to_string(),
            method: "simplex".to_string(),
            model: "patlak".to_string(),
            param: vec![
                crate::domain::ParamSpec::new("k1", 0.01),
                crate::domain::ParamSpec::new("v0", 0.1),
            ],
            tcut: None,
            mcmc: Default::default(),
            export: None,
            export_json: None,
            plot: true,
        };
        let outcome = TaskRunner::new().run_fit(&task).unwrap();
        assert!(matches!(outcome, FitOutcome::Skipped { ref method } if method == "simplex"));
    }

    #[test]
    fn simulate_then_save() {
        let dir = tempfile::tempdir().unwrap();
        let scan = write_scan(dir.path());
        let out = dir.path().join("sim.tsv");
        let text = format!(
            r#"{{ "task": [
                {{ "type": "LoadTable", "name": "scan", "file": {scan:?} }},
                {{ "type": "Simulate", "name": "scan", "time_label": "tacq", "inp_label": "1",
                   "model": "patlak", "param": {{ "k1": 0.05, "v0": 0.3 }}, "out_label": "sim" }},
                {{ "type": "SaveTable", "name": "scan", "file": {out:?} }}
            ] }}"#
        );
        let mut runner = TaskRunner::new();
        runner.run_all(&parse_tasks(&text).unwrap()).unwrap();

        let saved = read_table(&out).unwrap();
        let sim = saved.get("sim").unwrap();
        let tissue = saved.get("2").unwrap();
        for (a, b) in sim.iter().zip(tissue) {
            assert!((a - b).abs() < 1e-9);
        }
        assert_eq!(runner.table("scan").unwrap().labels().len(), 4);
    }

    #[test]
    fn scale_correction_adds_a_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ttest.tsv");
        let mut table = TacTable::new();
        table.insert("tacq", vec![0.0, 1.0, 2.0, 3.0]).unwrap();
        table.insert("Right", vec![0.0, 1.0, 1.5, -2.0]).unwrap();
        write_table(&path, &table).unwrap();

        let text = format!(
            r#"{{ "task": [
                {{ "type": "LoadTable", "name": "ttest", "file": {path:?} }},
                {{ "type": "Correction", "correction": "Scale", "table_name": "ttest",
                   "label_in": "Right", "label_out": "Right2", "factor": 2.0 }},
                {{ "type": "Correction", "correction": "Shift", "table_name": "ttest",
                   "label_in": "Right", "label_out": "Late", "time_label": "tacq", "delay": 1.0 }}
            ] }}"#
        );
        let mut runner = TaskRunner::new();
        let outputs = runner.run_all(&parse_tasks(&text).unwrap()).unwrap();
        assert!(matches!(outputs[1], TaskOutput::Corrected { ref label, .. } if label == "Right2"));

        let ttest = runner.table("ttest").unwrap();
        assert_eq!(ttest.get("Right2").unwrap(), &[0.0, 2.0, 3.0, -4.0]);
        assert_eq!(ttest.get("Late").unwrap(), &[0.0, 0.0, 1.0, 1.5]);
        assert_eq!(ttest.get("Right").unwrap(), &[0.0, 1.0, 1.5, -2.0]);
    }

    #[test]
    fn correction_of_an_unknown_column_fails() {
        let dir = tempfile::tempdir().unwrap();
        let scan = write_scan(dir.path());
        let mut runner = TaskRunner::new();
        runner
            .run(&Task::LoadTable(TableTask {
                name: "scan".to_string(),
                file: scan,
            }))
            .unwrap();
        let task = Task::Correction(CorrectionTask {
            table_name: "scan".to_string(),
            label_in: "missing".to_string(),
            label_out: "out".to_string(),
            correction: Correction::Scale { factor: 2.0 },
        });
        assert!(matches!(runner.run(&task), Err(FitError::Table(_))));
    }

    #[test]
    fn tac_plot_collects_listed_columns() {
        let dir = tempfile::tempdir().unwrap();
        let scan = write_scan(dir.path());
        let text = format!(
            r#"{{ "task": [
                {{ "type": "LoadTable", "name": "tac_table", "file": {scan:?} }},
                {{ "type": "TACPlot", "tac_name": "tac_table", "time_label": "tacq",
                   "labels": "1,2", "ylabel": "Bq/mL" }}
            ] }}"#
        );
        let mut runner = TaskRunner::new();
        let outputs = runner.run_all(&parse_tasks(&text).unwrap()).unwrap();
        let TaskOutput::SeriesPlot(plot) = &outputs[1] else {
            panic!("expected a series plot");
        };
        assert_eq!(plot.series.len(), 2);
        assert_eq!(plot.series[0].0, "1");
        assert_eq!(plot.time.len(), 20);

        let shown = render_output(&outputs[1], &RunSettings::default());
        assert!(shown.contains("| Bq/mL=["));
        assert!(shown.ends_with("o 1  x 2\n"));
        let hidden = RunSettings {
            plot: false,
            ..RunSettings::default()
        };
        assert!(render_output(&outputs[1], &hidden).contains("skipped"));

        let bad = TacPlotTask {
            tac_name: "tac_table".to_string(),
            time_label: "tacq".to_string(),
            labels: "1,nope".to_string(),
            xlabel: None,
            ylabel: None,
        };
        assert!(matches!(runner.tac_plot(&bad), Err(FitError::Table(_))));
    }

    #[test]
    fn saving_an_unknown_table_fails() {
        let task = Task::SaveTable(TableTask {
            name: "missing".to_string(),
            file: "unused.tsv".into(),
        });
        let err = TaskRunner::new().run(&task).unwrap_err();
        assert!(matches!(err, FitError::Table(_)));
    }

    #[test]
    fn rendering_respects_plot_settings() {
        let output = TaskOutput::TableLoaded {
            name: "scan".to_string(),
            rows: 3,
            columns: 2,
        };
        assert_eq!(
            render_output(&output, &RunSettings::default()),
            "loaded table 'scan' (3 rows, 2 columns)\n"
        );

        let skipped = TaskOutput::Fit {
            outcome: FitOutcome::Skipped {
                method: "simplex".to_string(),
            },
            plot: true,
        };
        assert!(render_output(&skipped, &RunSettings::default()).contains("simplex"));
    }
}
