//! CSV result files.
use crate::error::{AppResult, DaqError};
use crate::procedures::result::{Emission, ResultSink};
use std::path::{Path, PathBuf};

/// Column headers of a result file.
pub const DATA_COLUMNS: [&str; 3] = ["Current (A)", "Voltage (V)", "Resistance (Ohm)"];

/// First free `<prefix>_<YYYYMMDD>_<n>.csv` in `dir`, counting from 1.
///
/// Creates `dir` if needed.
pub fn unique_filename(dir: impl AsRef<Path>, prefix: &str) -> AppResult<PathBuf> {
    let dir = dir.as_ref();
    if !dir.exists() {
        std::fs::create_dir_all(dir).map_err(|e| DaqError::Storage(e.to_string()))?;
    }
    let date = chrono::Local::now().format("%Y%m%d");
    let mut n: u32 = 1;
    loop {
        let candidate = dir.join(format!("{prefix}_{date}_{n}.csv"));
        if !candidate.exists() {
            return Ok(candidate);
        }
        n = n
            .checked_add(1)
            .ok_or_else(|| DaqError::Storage(format!("no free file name in {}", dir.display())))?;
    }
}

/// A sink that appends measured points to a CSV file.
#[cfg(feature = "storage_csv")]
pub struct CsvSink {
    path: PathBuf,
    writer: std::sync::Mutex<csv::Writer<std::fs::File>>,
}

#[cfg(feature = "storage_csv")]
impl CsvSink {
    /// Create `path`, write `# key: value` header lines, then the column row.
    pub fn create(path: impl Into<PathBuf>, header: &[(String, String)]) -> AppResult<Self> {
        use std::io::Write;

        let path = path.into();
        let mut file = std::fs::File::create(&path)
            .map_err(|e| DaqError::Storage(format!("Failed to create CSV file: {}", e)))?;
        for (key, value) in header {
            writeln!(file, "# {key}: {value}").map_err(|e| DaqError::Storage(e.to_string()))?;
        }

        let mut writer = csv::Writer::from_writer(file);
        writer
            .write_record(DATA_COLUMNS)
            .and_then(|_| writer.flush().map_err(csv::Error::from))
            .map_err(|e| DaqError::Storage(e.to_string()))?;
        tracing::info!("CSV results will be written to '{}'.", path.display());

        Ok(Self {
            path,
            writer: std::sync::Mutex::new(writer),
        })
    }

    /// File being written.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(feature = "storage_csv")]
impl ResultSink for CsvSink {
    fn emit(&self, emission: &Emission) -> AppResult<()> {
        let Emission::Results(sample) = emission else {
            return Ok(());
        };
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| DaqError::Storage("CSV writer lock poisoned".into()))?;
        writer
            .write_record(&[
                sample.current.to_string(),
                sample.voltage.to_string(),
                sample.resistance.to_string(),
            ])
            .map_err(|e| DaqError::Storage(e.to_string()))?;
        // Flushed per row so the file is usable while the sweep runs.
        writer.flush().map_err(|e| DaqError::Storage(e.to_string()))
    }
}

/// Placeholder when CSV storage is not compiled in.
#[cfg(not(feature = "storage_csv"))]
pub struct CsvSink;

#[cfg(not(feature = "storage_csv"))]
impl CsvSink {
    /// Always fails with [`DaqError::FeatureNotEnabled`].
    pub fn create(_path: impl Into<PathBuf>, _header: &[(String, String)]) -> AppResult<Self> {
        Err(DaqError::FeatureNotEnabled("storage_csv".to_string()))
    }

    /// Empty path.
    pub fn path(&self) -> &Path {
        Path::new("")
    }
}

#[cfg(not(feature = "storage_csv"))]
impl ResultSink for CsvSink {
    fn emit(&self, _emission: &Emission) -> AppResult<()> {
        Ok(())
    }
}

#[cfg(all(test, feature = "storage_csv"))]
mod tests {
    use super::*;
    use crate::procedures::result::MeasurementSample;

    #[test]
    fn test_unique_filename_counts_up() {
        let dir = tempfile::tempdir().unwrap();
        let first = unique_filename(dir.path().join("runs"), "IV").unwrap();
        let name = first.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("IV_"));
        assert!(name.ends_with("_1.csv"));

        std::fs::write(&first, "").unwrap();
        let second = unique_filename(dir.path().join("runs"), "IV").unwrap();
        assert!(second.to_string_lossy().ends_with("_2.csv"));
    }

    #[test]
    fn test_csv_sink_writes_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("iv.csv");
        let sink = CsvSink::create(
            &path,
            &[("Maximum Current".to_string(), "0.1 µA".to_string())],
        )
        .unwrap();
        sink.emit(&Emission::Results(MeasurementSample::new(0.0, 1e-6)))
            .unwrap();
        sink.emit(&Emission::Progress(50.0)).unwrap();
        sink.emit(&Emission::Results(MeasurementSample::new(2.0, 4.0)))
            .unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(
            lines,
            [
                "# Maximum Current: 0.1 µA",
                "Current (A),Voltage (V),Resistance (Ohm)",
                "0,0.000001,NaN",
                "2,4,2",
            ]
        );
    }
}
