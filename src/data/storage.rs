//! Result files for a sweep.
//!
//! ```text
//! <output_dir>/
//!   op_csv/opr_points.csv        operating-point table, rewritten after every point
//!   spara_csv/S21_12_04.csv      raw VNA block, one per term and bias point
//!   spara_s2p/12_04.s2p          Touchstone network, one per bias point
//!   sweep_config.toml            resolved settings
//!   sweep_summary.json           per-point outcome of the run
//! ```

use crate::data::touchstone;
use crate::error::AppResult;
use crate::measurement::{BiasPoint, OperatingPoint, RawCapture, SParameterSet, ScatteringTerm};
use serde::Serialize;
use std::fs::File;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Directory of the operating-point table.
pub const OPERATING_POINT_DIR: &str = "op_csv";
/// File name of the operating-point table.
pub const OPERATING_POINT_FILE: &str = "opr_points.csv";
/// Directory of raw captures.
pub const RAW_CAPTURE_DIR: &str = "spara_csv";
/// Directory of Touchstone files.
pub const NETWORK_DIR: &str = "spara_s2p";
/// Settings snapshot file name.
pub const CONFIG_SNAPSHOT_FILE: &str = "sweep_config.toml";
/// Run summary file name.
pub const SUMMARY_FILE: &str = "sweep_summary.json";

/// Raw capture path relative to the output root.
pub fn raw_capture_path(root: &Path, term: ScatteringTerm, bias: BiasPoint) -> PathBuf {
    root.join(RAW_CAPTURE_DIR)
        .join(format!("{}_{}.csv", term, bias.tag()))
}

/// Network file path relative to the output root.
pub fn network_path(root: &Path, bias: BiasPoint) -> PathBuf {
    root.join(NETWORK_DIR).join(format!("{}.s2p", bias.tag()))
}

/// Writes every result file of one run.
///
/// Owns the operating-point table, the only state that grows over the sweep.
pub struct DataRecorder {
    root: PathBuf,
    table: Vec<OperatingPoint>,
}

impl DataRecorder {
    /// Create the output directory tree under `root`.
    pub fn create(root: &Path) -> AppResult<Self> {
        for dir in [OPERATING_POINT_DIR, RAW_CAPTURE_DIR, NETWORK_DIR] {
            std::fs::create_dir_all(root.join(dir))?;
        }
        info!("Recording results under '{}'", root.display());
        Ok(Self {
            root: root.to_path_buf(),
            table: Vec::new(),
        })
    }

    /// Output root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the operating-point table.
    pub fn operating_point_path(&self) -> PathBuf {
        self.root.join(OPERATING_POINT_DIR).join(OPERATING_POINT_FILE)
    }

    /// Rows recorded so far, in grid order.
    pub fn operating_points(&self) -> &[OperatingPoint] {
        &self.table
    }

    /// Append a row and rewrite the whole table.
    ///
    /// The new file replaces the old one by rename, so a reader always sees a
    /// complete prefix of the sweep.
    pub fn append_operating_point(&mut self, point: OperatingPoint) -> AppResult<()> {
        self.table.push(point);
        let path = self.operating_point_path();
        let dir = self.root.join(OPERATING_POINT_DIR);

        let mut tmp = NamedTempFile::new_in(&dir)?;
        {
            let mut writer = csv::Writer::from_writer(tmp.as_file_mut());
            for row in &self.table {
                writer.serialize(row)?;
            }
            writer.flush()?;
        }
        tmp.persist(&path).map_err(|e| e.error)?;
        debug!(
            "Operating-point table now {} rows ({})",
            self.table.len(),
            path.display()
        );
        Ok(())
    }

    /// Persist a raw capture verbatim.
    pub fn write_raw_capture(&self, capture: &RawCapture) -> AppResult<PathBuf> {
        let path = raw_capture_path(&self.root, capture.term, capture.bias);
        std::fs::write(&path, &capture.text)?;
        debug!("Raw {} saved to {}", capture.term, path.display());
        Ok(path)
    }

    /// Write the consolidated network file of one bias point.
    pub fn write_network(&self, set: &SParameterSet) -> AppResult<PathBuf> {
        let path = network_path(&self.root, set.bias);
        touchstone::write_touchstone(&path, set)?;
        info!("Network saved to {}", path.display());
        Ok(path)
    }

    /// Write the run summary as pretty JSON.
    pub fn write_summary<T: Serialize>(&self, summary: &T) -> AppResult<PathBuf> {
        let path = self.root.join(SUMMARY_FILE);
        let file = File::create(&path)?;
        serde_json::to_writer_pretty(file, summary)?;
        Ok(path)
    }
}

/// Read an operating-point table back.
pub fn load_operating_points(path: &Path) -> AppResult<Vec<OperatingPoint>> {
    let mut reader = csv::Reader::from_path(path)?;
    let rows = reader
        .deserialize()
        .collect::<Result<Vec<OperatingPoint>, csv::Error>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(v1: f64, v2: f64) -> OperatingPoint {
        OperatingPoint::new(BiasPoint::new(v1, v2), (v1, v1 / 100.0), (v2, v2 / 50.0))
    }

    #[test]
    fn test_creates_directory_tree() {
        let dir = tempfile::tempdir().unwrap();
        DataRecorder::create(dir.path()).unwrap();
        for sub in [OPERATING_POINT_DIR, RAW_CAPTURE_DIR, NETWORK_DIR] {
            assert!(dir.path().join(sub).is_dir());
        }
    }

    #[test]
    fn test_table_is_rewritten_with_header() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = DataRecorder::create(dir.path()).unwrap();
        recorder.append_operating_point(op(0.0, 0.0)).unwrap();
        recorder.append_operating_point(op(0.0, 0.2)).unwrap();

        let text = std::fs::read_to_string(recorder.operating_point_path()).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("v1,v2,meas_v1,meas_i1,meas_v2,meas_i2"));
        assert_eq!(lines.count(), 2);

        let rows = load_operating_points(&recorder.operating_point_path()).unwrap();
        assert_eq!(rows, recorder.operating_points());
        assert_eq!(rows[1].bias(), BiasPoint::new(0.0, 0.2));
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = DataRecorder::create(dir.path()).unwrap();
        for i in 0..5 {
            recorder.append_operating_point(op(i as f64 * 0.2, 0.0)).unwrap();
        }
        let entries: Vec<_> = std::fs::read_dir(dir.path().join(OPERATING_POINT_DIR))
            .unwrap()
            .collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_raw_capture_is_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = DataRecorder::create(dir.path()).unwrap();
        let text = " 1.0E-01, 2.0E-02\n not even numbers \n".to_string();
        let capture = RawCapture::new(ScatteringTerm::S12, BiasPoint::new(1.2, 0.0), text.clone());
        let path = recorder.write_raw_capture(&capture).unwrap();
        assert!(path.ends_with("spara_csv/S12_12_00.csv"));
        assert_eq!(std::fs::read_to_string(path).unwrap(), text);
    }

    #[test]
    fn test_paths_follow_naming_rule() {
        let root = Path::new("out");
        let bias = BiasPoint::new(1.8, 0.2);
        assert_eq!(
            raw_capture_path(root, ScatteringTerm::S22, bias),
            Path::new("out/spara_csv/S22_18_02.csv")
        );
        assert_eq!(network_path(root, bias), Path::new("out/spara_s2p/18_02.s2p"));
    }

    #[test]
    fn test_summary_is_json() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = DataRecorder::create(dir.path()).unwrap();
        let path = recorder
            .write_summary(&serde_json::json!({ "points": 4 }))
            .unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(value["points"], 4);
    }
}
