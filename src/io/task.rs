//! JSON task files.
//!
//! A task file is `{ "task": [ { "type": "TACFit", ... }, ... ] }`; tasks run
//! in order. Required tags are checked per task before deserialising, and all
//! missing tags of one task (including those of its parameter entries) are
//! reported in a single error.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::domain::{ParamSpec, ParameterSpec};
use crate::error::FitError;
use crate::fit::SamplerConfig;

const TAC_FIT_TAGS: [&str; 7] = [
    "tac_path",
    "time_label",
    "inp_label",
    "tis_label",
    "method",
    "model",
    "param",
];
const PARAM_TAGS: [&str; 2] = ["name", "init"];
const TABLE_TAGS: [&str; 2] = ["name", "file"];
const SIMULATE_TAGS: [&str; 6] = ["name", "time_label", "inp_label", "model", "param", "out_label"];
const CORRECTION_TAGS: [&str; 4] = ["correction", "table_name", "label_in", "label_out"];
const SCALE_TAGS: [&str; 1] = ["factor"];
const SHIFT_TAGS: [&str; 2] = ["time_label", "delay"];
const TAC_PLOT_TAGS: [&str; 3] = ["tac_name", "time_label", "labels"];

/// Fit one tissue curve of a table file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TacFitTask {
    /// Table file, or the name of a table loaded earlier with `LoadTable`.
    pub tac_path: String,
    pub time_label: String,
    pub inp_label: String,
    pub tis_label: String,
    pub method: String,
    pub model: String,
    pub param: Vec<ParamSpec>,
    #[serde(default)]
    pub tcut: Option<usize>,
    #[serde(default)]
    pub mcmc: SamplerConfig,
    #[serde(default)]
    pub export: Option<PathBuf>,
    #[serde(default)]
    pub export_json: Option<PathBuf>,
    #[serde(default = "default_plot")]
    pub plot: bool,
}

fn default_plot() -> bool {
    true
}

impl TacFitTask {
    pub fn parameter_spec(&self) -> Result<ParameterSpec, FitError> {
        ParameterSpec::new(self.param.clone())
    }
}

/// `LoadTable` / `SaveTable`: move a named in-memory table from or to a file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableTask {
    pub name: String,
    pub file: PathBuf,
}

/// Evaluate a model on a named table and store the curve as a new column.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimulateTask {
    pub name: String,
    pub time_label: String,
    pub inp_label: String,
    pub model: String,
    pub param: BTreeMap<String, f64>,
    pub out_label: String,
}

/// How a [`CorrectionTask`] derives its output column.
#[derive(Debug, Clone, PartialEq)]
pub enum Correction {
    /// Multiply every value by `factor`.
    Scale { factor: f64 },
    /// Delay the curve by `delay` time units along `time_label`.
    Shift { time_label: String, delay: f64 },
}

/// Derive column `label_out` of a named table from column `label_in`.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrectionTask {
    pub table_name: String,
    pub label_in: String,
    pub label_out: String,
    pub correction: Correction,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct CorrectionFields {
    correction: String,
    table_name: String,
    label_in: String,
    label_out: String,
    #[serde(default)]
    factor: Option<f64>,
    #[serde(default)]
    time_label: Option<String>,
    #[serde(default)]
    delay: Option<f64>,
}

impl CorrectionFields {
    fn into_task(self) -> Result<CorrectionTask, FitError> {
        let missing = |tag: &str| FitError::MissingFields {
            context: "Correction task".to_string(),
            fields: vec![tag.to_string()],
        };
        let correction = match self.correction.as_str() {
            "Scale" => Correction::Scale {
                factor: self.factor.ok_or_else(|| missing("factor"))?,
            },
            "Shift" => Correction::Shift {
                time_label: self.time_label.ok_or_else(|| missing("time_label"))?,
                delay: self.delay.ok_or_else(|| missing("delay"))?,
            },
            other => return Err(unknown_correction(other)),
        };
        Ok(CorrectionTask {
            table_name: self.table_name,
            label_in: self.label_in,
            label_out: self.label_out,
            correction,
        })
    }
}

fn unknown_correction(name: &str) -> FitError {
    FitError::InvalidData(format!("unknown correction '{name}' (expected Scale or Shift)"))
}

/// Plot columns of a table against its time column.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TacPlotTask {
    /// Registered table name, or a table file.
    pub tac_name: String,
    pub time_label: String,
    /// Comma-separated column labels.
    pub labels: String,
    #[serde(default)]
    pub xlabel: Option<String>,
    #[serde(default)]
    pub ylabel: Option<String>,
}

impl TacPlotTask {
    pub fn label_list(&self) -> Vec<&str> {
        self.labels.split(',').map(str::trim).filter(|l| !l.is_empty()).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Task {
    TacFit(TacFitTask),
    LoadTable(TableTask),
    SaveTable(TableTask),
    Simulate(SimulateTask),
    Correction(CorrectionTask),
    TacPlot(TacPlotTask),
}

impl Task {
    pub fn kind(&self) -> &'static str {
        match self {
            Task::TacFit(_) => "TACFit",
            Task::LoadTable(_) => "LoadTable",
            Task::SaveTable(_) => "SaveTable",
            Task::Simulate(_) => "Simulate",
            Task::Correction(_) => "Correction",
            Task::TacPlot(_) => "TACPlot",
        }
    }
}

/// Read and validate a task file.
pub fn read_task_file(path: &Path) -> Result<Vec<Task>, FitError> {
    let text = std::fs::read_to_string(path)?;
    parse_tasks(&text)
}

/// Parse and validate task file contents.
pub fn parse_tasks(text: &str) -> Result<Vec<Task>, FitError> {
    let root: Value = serde_json::from_str(text)?;
    let tasks = root
        .get("task")
        .and_then(Value::as_array)
        .ok_or_else(|| FitError::MissingFields {
            context: "task file".to_string(),
            fields: vec!["task".to_string()],
        })?;

    tasks
        .iter()
        .enumerate()
        .map(|(i, value)| parse_task(i, value))
        .collect()
}

fn parse_task(index: usize, value: &Value) -> Result<Task, FitError> {
    let mut obj = value
        .as_object()
        .cloned()
        .ok_or_else(|| FitError::InvalidData(format!("task {} is not an object", index + 1)))?;
    let kind = match obj.remove("type") {
        Some(Value::String(s)) => s,
        _ => {
            return Err(FitError::MissingFields {
                context: format!("task {}", index + 1),
                fields: vec!["type".to_string()],
            });
        }
    };

    match kind.as_str() {
        "TACFit" => {
            let mut missing = missing_tags(&obj, &TAC_FIT_TAGS);
            if let Some(params) = obj.get("param").and_then(Value::as_array) {
                for (j, p) in params.iter().enumerate() {
                    let entry = p.as_object().cloned().unwrap_or_default();
                    missing.extend(
                        missing_tags(&entry, &PARAM_TAGS)
                            .into_iter()
                            .map(|tag| format!("param[{j}].{tag}")),
                    );
                }
            }
            require(&kind, missing)?;
            Ok(Task::TacFit(serde_json::from_value(Value::Object(obj))?))
        }
        "LoadTable" | "SaveTable" => {
            require(&kind, missing_tags(&obj, &TABLE_TAGS))?;
            let table: TableTask = serde_json::from_value(Value::Object(obj))?;
            Ok(if kind == "LoadTable" {
                Task::LoadTable(table)
            } else {
                Task::SaveTable(table)
            })
        }
        "Simulate" => {
            require(&kind, missing_tags(&obj, &SIMULATE_TAGS))?;
            Ok(Task::Simulate(serde_json::from_value(Value::Object(obj))?))
        }
        "Correction" => {
            let mut missing = missing_tags(&obj, &CORRECTION_TAGS);
            match obj.get("correction").and_then(Value::as_str) {
                Some("Scale") => missing.extend(missing_tags(&obj, &SCALE_TAGS)),
                Some("Shift") => missing.extend(missing_tags(&obj, &SHIFT_TAGS)),
                Some(other) => return Err(unknown_correction(other)),
                None => {}
            }
            require(&kind, missing)?;
            let fields: CorrectionFields = serde_json::from_value(Value::Object(obj))?;
            Ok(Task::Correction(fields.into_task()?))
        }
        "TACPlot" => {
            require(&kind, missing_tags(&obj, &TAC_PLOT_TAGS))?;
            Ok(Task::TacPlot(serde_json::from_value(Value::Object(obj))?))
        }
        other => Err(FitError::InvalidData(format!(
            "unknown task type '{other}' (expected TACFit, LoadTable, SaveTable, Simulate, Correction or TACPlot)"
        ))),
    }
}

fn missing_tags(obj: &Map<String, Value>, required: &[&str]) -> Vec<String> {
    required
        .iter()
        .filter(|tag| !obj.contains_key(**tag))
        .map(|tag| tag.to_string())
        .collect()
}

fn require(kind: &str, missing: Vec<String>) -> Result<(), FitError> {
    if missing.is_empty() {
        Ok(())
    } else {
        Err(FitError::MissingFields {
            context: format!("{kind} task"),
            fields: missing,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_full_fit_task() {
        let text = r#"{
            "task": [
                { "type": "LoadTable", "name": "scan", "file": "scan.tsv" },
                {
                    "type": "TACFit",
                    "tac_path": "scan",
                    "time_label": "tacq",
                    "inp_label": "1",
                    "tis_label": "2",
                    "method": "emcee",
                    "model": "step",
                    "tcut": 12,
                    "mcmc": { "walkers": 16, "steps": 500 },
                    "param": [
                        { "name": "amp", "init": 0.5, "min": 0.0, "max": 1.0 },
                        { "name": "extent", "init": 10.0 }
                    ]
                }
            ]
        }"#;
        let tasks = parse_tasks(text).unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].kind(), "LoadTable");
        let Task::TacFit(fit) = &tasks[1] else {
            panic!("expected a TACFit task");
        };
        assert_eq!(fit.tcut, Some(12));
        assert_eq!(fit.mcmc.walkers, 16);
        assert_eq!(fit.mcmc.workers, 4);
        assert!(fit.plot);
        let spec = fit.parameter_spec().unwrap();
        assert_eq!(spec.get("amp").unwrap().max, Some(1.0));
        assert_eq!(spec.get("extent").unwrap().min, None);
    }

    #[test]
    fn reports_every_missing_tag_at_once() {
        let text = r#"{ "task": [ {
            "type": "TACFit",
            "time_label": "tacq",
            "method": "leastsq",
            "param": [ { "name": "amp" }, { "init": 3.0 } ]
        } ] }"#;
        let err = parse_tasks(text).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Missing tags in TACFit task: <tac_path> <inp_label> <tis_label> <model> \
             <param[0].init> <param[1].name>"
        );
    }

    #[test]
    fn unknown_task_type_is_rejected() {
        let err = parse_tasks(r#"{ "task": [ { "type": "ROIMeans" } ] }"#).unwrap_err();
        assert!(err.to_string().contains("ROIMeans"));
        assert!(parse_tasks(r#"{ "tasks": [] }"#).is_err());
    }

    #[test]
    fn parses_scale_and_shift_corrections() {
        let text = r#"{ "task": [
            { "type": "Correction", "correction": "Scale", "table_name": "ttest",
              "label_in": "Right", "label_out": "Right2", "factor": 2.0 },
            { "type": "Correction", "correction": "Shift", "table_name": "ttest",
              "label_in": "Right", "label_out": "Delayed", "time_label": "tacq", "delay": 1.5 }
        ] }"#;
        let tasks = parse_tasks(text).unwrap();
        let Task::Correction(scale) = &tasks[0] else {
            panic!("expected a Correction task");
        };
        assert_eq!(scale.correction, Correction::Scale { factor: 2.0 });
        assert_eq!(scale.label_out, "Right2");
        let Task::Correction(shift) = &tasks[1] else {
            panic!("expected a Correction task");
        };
        assert_eq!(
            shift.correction,
            Correction::Shift {
                time_label: "tacq".to_string(),
                delay: 1.5
            }
        );
    }

    #[test]
    fn correction_tags_are_checked_together() {
        let text = r#"{ "task": [ { "type": "Correction", "table_name": "ttest",
            "label_in": "Right", "label_out": "Right2", "factor": 2.0 } ] }"#;
        let err = parse_tasks(text).unwrap_err();
        assert_eq!(err.to_string(), "Missing tags in Correction task: <correction>");

        let text = r#"{ "task": [ { "type": "Correction", "correction": "Scale",
            "table_name": "ttest", "label_in": "Right" } ] }"#;
        let err = parse_tasks(text).unwrap_err();
        assert_eq!(err.to_string(), "Missing tags in Correction task: <label_out> <factor>");

        let text = r#"{ "task": [ { "type": "Correction", "correction": "Gamma",
            "table_name": "t", "label_in": "a", "label_out": "b" } ] }"#;
        assert!(matches!(parse_tasks(text), Err(FitError::InvalidData(_))));
    }

    #[test]
    fn tac_plot_requires_table_time_and_labels() {
        let err = parse_tasks(r#"{ "task": [ { "type": "TACPlot" } ] }"#).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Missing tags in TACPlot task: <tac_name> <time_label> <labels>"
        );

        let text = r#"{ "task": [ { "type": "TACPlot", "tac_name": "tac_table",
            "time_label": "tacq", "labels": "1, 2,", "xlabel": "Time [sec]" } ] }"#;
        let tasks = parse_tasks(text).unwrap();
        let Task::TacPlot(plot) = &tasks[0] else {
            panic!("expected a TACPlot task");
        };
        assert_eq!(plot.label_list(), vec!["1", "2"]);
        assert_eq!(plot.xlabel.as_deref(), Some("Time [sec]"));
        assert_eq!(plot.ylabel, None);
    }

    #[test]
    fn misspelled_optional_tag_is_rejected() {
        let text = r#"{ "task": [ { "type": "SaveTable", "name": "a", "file": "a.tsv", "fiel": "x" } ] }"#;
        assert!(matches!(parse_tasks(text), Err(FitError::Json(_))));
    }

    #[test]
    fn reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        std::fs::write(
            &path,
            r#"{ "task": [ { "type": "Simulate", "name": "scan", "time_label": "t",
                 "inp_label": "cin", "model": "patlak", "param": { "k1": 0.1, "v0": 0.2 },
                 "out_label": "sim" } ] }"#,
        )
        .unwrap();
        let tasks = read_task_file(&path).unwrap();
        let Task::Simulate(sim) = &tasks[0] else {
            panic!("expected a Simulate task");
        };
        assert_eq!(sim.param["k1"], 0.1);
    }
}
