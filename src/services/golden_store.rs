use std::{
    cmp::Reverse,
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
    time::SystemTime,
};

use itertools::Itertools;

use crate::{
    dal::{read_records, write_records, RUN_FILE_PREFIX},
    domain::provider_record::ProviderRecord,
    error::PersistenceError,
};

pub const GOLDEN_FILE_NAME: &str = "providers-golden.csv";

const FIELD_SEPARATOR: char = '\u{241E}';
const RECORD_SEPARATOR: char = '\u{241F}';

/// Order-insensitive identity of a record: every present field with its
/// exact value. Two records share a key iff all their fields are equal.
pub fn canonical_key(record: &ProviderRecord) -> String {
    record
        .fields()
        .into_iter()
        .sorted_by(|a, b| a.0.cmp(b.0))
        .map(|(field, value)| format!("{}{}{}", field, FIELD_SEPARATOR, value))
        .join(&RECORD_SEPARATOR.to_string())
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    /// Existing rows untouched, followed by the run's new rows.
    pub golden: Vec<ProviderRecord>,
    /// The run's phone-bearing rows without exact duplicates.
    pub augmented: Vec<ProviderRecord>,
    /// Rows appended to the golden set.
    pub added: usize,
}

/// Appends to `golden` every phone-bearing run record it does not already
/// hold. Phones are compared and stored normalized; existing golden rows
/// keep their stored phone text. Phone-less records are dropped.
pub fn merge(golden: Vec<ProviderRecord>, run: &[ProviderRecord]) -> MergeOutcome {
    let mut seen: HashSet<String> = golden.iter().map(golden_key).collect();
    let mut run_seen = HashSet::new();
    let mut golden = golden;
    let mut augmented = vec![];
    let mut added = 0;

    for record in run.iter().filter_map(with_normalized_phone) {
        let key = canonical_key(&record);
        if !run_seen.insert(key.clone()) {
            continue;
        }
        if seen.insert(key) {
            golden.push(record.clone());
            added += 1;
        }
        augmented.push(record);
    }

    MergeOutcome {
        golden,
        augmented,
        added,
    }
}

/// Appends one golden row for every normalized phone `run` does not have yet.
/// Returns the rows and how many were appended.
pub fn backfill(run: Vec<ProviderRecord>, golden: &[ProviderRecord]) -> (Vec<ProviderRecord>, usize) {
    let mut phones: HashSet<String> = run.iter().filter_map(ProviderRecord::normalized_phone).collect();
    let mut rows = run;
    let mut appended = 0;

    for record in golden.iter().filter_map(with_normalized_phone) {
        let Some(phone) = record.phone.clone() else {
            continue;
        };
        if phones.insert(phone) {
            rows.push(record);
            appended += 1;
        }
    }

    (rows, appended)
}

fn golden_key(record: &ProviderRecord) -> String {
    match with_normalized_phone(record) {
        Some(normalized) => canonical_key(&normalized),
        None => canonical_key(record),
    }
}

fn with_normalized_phone(record: &ProviderRecord) -> Option<ProviderRecord> {
    let phone = record.normalized_phone()?;
    let mut record = record.clone();
    record.set("phone", &phone);
    Some(record)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeReport {
    pub before: usize,
    pub after: usize,
    pub added: usize,
    pub backfilled: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebuildReport {
    pub before: usize,
    pub after: usize,
    pub run_files: usize,
    pub backfilled: usize,
}

/// The cross-run record set, kept as `providers-golden.csv` next to the run files.
pub struct GoldenStore {
    output_dir: PathBuf,
}

impl GoldenStore {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        GoldenStore {
            output_dir: output_dir.into(),
        }
    }

    pub fn golden_path(&self) -> PathBuf {
        self.output_dir.join(GOLDEN_FILE_NAME)
    }

    /// A missing golden file is an empty golden set.
    pub fn load(&self) -> Result<Vec<ProviderRecord>, PersistenceError> {
        let path = self.golden_path();
        match path.exists() {
            true => read_records(&path),
            false => Ok(vec![]),
        }
    }

    pub fn save(&self, golden: &[ProviderRecord]) -> Result<(), PersistenceError> {
        write_records(&self.golden_path(), golden)
    }

    /// Merges one finished run into the golden set, then rewrites the run
    /// file as its augmented, backfilled copy.
    pub fn merge_run(&self, run_path: &Path) -> Result<MergeReport, PersistenceError> {
        let golden = self.load()?;
        let before = golden.len();
        let run = read_records(run_path)?;

        let MergeOutcome {
            golden,
            augmented,
            added,
        } = merge(golden, &run);
        let (run_rows, backfilled) = backfill(augmented, &golden);

        self.save(&golden)?;
        write_records(run_path, &run_rows)?;

        log::info!(
            "Golden updated: {} -> {} rows (added {}), backfilled {} rows into {}",
            before,
            golden.len(),
            added,
            backfilled,
            run_path.display()
        );

        Ok(MergeReport {
            before,
            after: golden.len(),
            added,
            backfilled,
        })
    }

    /// Folds every run file, newest first, into the golden set and backfills
    /// each run file from the result. Unreadable run files are skipped.
    pub fn rebuild(&self) -> Result<RebuildReport, PersistenceError> {
        let mut golden = self.load()?;
        let before = golden.len();
        let run_files = self.run_files()?;

        for path in &run_files {
            match read_records(path) {
                Ok(run) => golden = merge(golden, &run).golden,
                Err(e) => log::warn!("Skipping unreadable run file {}: {}", path.display(), e),
            }
        }
        self.save(&golden)?;

        let mut backfilled = 0;
        for path in &run_files {
            let Ok(run) = read_records(path) else {
                continue;
            };
            let (rows, appended) = backfill(run, &golden);
            if appended > 0 {
                write_records(path, &rows)?;
                backfilled += appended;
            }
        }

        Ok(RebuildReport {
            before,
            after: golden.len(),
            run_files: run_files.len(),
            backfilled,
        })
    }

    /// Run CSVs in the output directory, most recently modified first.
    pub fn run_files(&self) -> Result<Vec<PathBuf>, PersistenceError> {
        if !self.output_dir.exists() {
            return Ok(vec![]);
        }

        let mut files = vec![];
        for entry in fs::read_dir(&self.output_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_run_file = name.starts_with(RUN_FILE_PREFIX)
                && name.ends_with(".csv")
                && name != GOLDEN_FILE_NAME;
            if is_run_file {
                let modified = entry.metadata()?.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                files.push((modified, entry.path()));
            }
        }

        Ok(files
            .into_iter()
            .sorted_by_key(|(modified, path)| (Reverse(*modified), path.clone()))
            .map(|(_, path)| path)
            .collect())
    }
}
