//! Export fit results.
//!
//! - fitted curves as a tab-delimited table (readable with `read_table`)
//! - the structured fit result as JSON

use std::fs::File;
use std::path::Path;

use serde::Serialize;
use tracing::info;

use crate::domain::{FitCurves, TacTable};
use crate::error::FitError;
use crate::fit::{BayesianFit, FitOutcome, LeastSquaresFit};
use crate::io::table::write_table;

/// Column labels appended for the fitted curve and its bands.
pub const FIT_LABEL: &str = "fit";
pub const CONFIDENCE_LABEL: &str = "fit_confidence";
pub const PREDICTION_LABEL: &str = "fit_prediction";

/// The fitted samples of `curves` as a table (first `cutoff` rows).
pub fn curves_table(curves: &FitCurves) -> Result<TacTable, FitError> {
    let n = curves.best_fit.len();
    let mut table = TacTable::new();
    table.insert(curves.time_label.clone(), curves.time[..n].to_vec())?;
    table.insert(curves.input_label.clone(), curves.input[..n].to_vec())?;
    table.insert(curves.tissue_label.clone(), curves.tissue[..n].to_vec())?;
    table.insert(FIT_LABEL, curves.best_fit.clone())?;
    table.insert(CONFIDENCE_LABEL, curves.confidence_band.clone())?;
    table.insert(PREDICTION_LABEL, curves.prediction_band.clone())?;
    Ok(table)
}

/// Write the fitted curves as a tab-delimited table.
pub fn write_curves(path: &Path, curves: &FitCurves) -> Result<(), FitError> {
    write_table(path, &curves_table(curves)?)?;
    info!(path = %path.display(), "exported fitted curves");
    Ok(())
}

#[derive(Serialize)]
struct FitExport<'a> {
    method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    least_squares: Option<&'a LeastSquaresFit>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bayesian: Option<&'a BayesianFit>,
    curves: &'a FitCurves,
}

/// Write the fit result as pretty-printed JSON. Skipped fits write nothing.
pub fn write_result_json(path: &Path, outcome: &FitOutcome) -> Result<(), FitError> {
    let export = match outcome {
        FitOutcome::LeastSquares { fit, curves } => FitExport {
            method: "leastsq",
            least_squares: Some(&**fit),
            bayesian: None,
            curves,
        },
        FitOutcome::Bayesian { fit, curves } => FitExport {
            method: "emcee",
            least_squares: None,
            bayesian: Some(&**fit),
            curves,
        },
        FitOutcome::Skipped { .. } => return Ok(()),
    };

    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, &export)?;
    info!(path = %path.display(), "exported fit result");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::table::read_table;

    fn curves() -> FitCurves {
        FitCurves {
            time_label: "tacq".to_string(),
            tissue_label: "2".to_string(),
            input_label: "1".to_string(),
            time: vec![0.0, 1.0, 2.0, 3.0],
            tissue: vec![0.0, 1.0, 2.5, 2.0],
            input: vec![0.0, 5.0, 4.0, 3.0],
            cutoff: 3,
            best_fit: vec![0.0, 1.1, 2.4],
            confidence_band: vec![0.0, 0.1, 0.2],
            prediction_band: vec![0.3, 0.4, 0.5],
        }
    }

    #[test]
    fn curves_table_covers_fitted_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("curves.tsv");
        write_curves(&path, &curves()).unwrap();

        let table = read_table(&path).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(
            table.labels(),
            &["tacq", "1", "2", FIT_LABEL, CONFIDENCE_LABEL, PREDICTION_LABEL]
        );
        assert_eq!(table.get(FIT_LABEL).unwrap(), &[0.0, 1.1, 2.4]);
    }

    #[test]
    fn skipped_fit_writes_no_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("result.json");
        let outcome = FitOutcome::Skipped {
            method: "simplex".to_string(),
        };
        write_result_json(&path, &outcome).unwrap();
        assert!(!path.exists());
    }
}
