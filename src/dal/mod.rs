use std::{
    fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};

use crate::error::PersistenceError;

pub mod record_csv;
pub mod summary_json;

pub use record_csv::*;
pub use summary_json::*;

pub const RUN_FILE_PREFIX: &str = "providers-";

/// Where one run's output lands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunFiles {
    pub records: PathBuf,
    pub summary: PathBuf,
}

impl RunFiles {
    /// `providers-YYYYmmdd-HHMMSS.csv` and its `.summary.json` sibling.
    pub fn new(output_dir: &Path, started_at: DateTime<Utc>) -> Self {
        let stem = format!("{}{}", RUN_FILE_PREFIX, started_at.format("%Y%m%d-%H%M%S"));
        RunFiles {
            records: output_dir.join(format!("{}.csv", stem)),
            summary: output_dir.join(format!("{}.summary.json", stem)),
        }
    }
}

/// Writes to a temporary sibling, then renames over `path`.
pub fn write_atomically(path: &Path, contents: &[u8]) -> Result<(), PersistenceError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn run_files_are_named_after_the_start_time() {
        let started_at = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();

        let files = RunFiles::new(Path::new("output"), started_at);

        assert_eq!(files.records, Path::new("output/providers-20240309-070501.csv"));
        assert_eq!(
            files.summary,
            Path::new("output/providers-20240309-070501.summary.json")
        );
    }

    #[test]
    fn atomic_write_creates_directories_and_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("out.csv");

        write_atomically(&path, b"a,b\n").unwrap();
        write_atomically(&path, b"c,d\n").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "c,d\n");
        assert!(!dir.path().join("nested").join("out.csv.tmp").exists());
    }
}
