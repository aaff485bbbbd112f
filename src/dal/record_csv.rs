use std::path::Path;

use crate::{
    domain::provider_record::{column_order, ProviderRecord},
    error::PersistenceError,
};

use super::write_atomically;

/// Reads a run or golden CSV. Blank cells become absent fields; an empty
/// file is an empty set.
pub fn read_records(path: &Path) -> Result<Vec<ProviderRecord>, PersistenceError> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let headers = reader.headers()?.clone();

    let mut records = vec![];
    for row in reader.records() {
        let row = row?;
        records.push(ProviderRecord::from_pairs(headers.iter().zip(row.iter())));
    }
    Ok(records)
}

/// Preferred columns first, then every extra column any record has, sorted.
pub fn write_records(path: &Path, records: &[ProviderRecord]) -> Result<(), PersistenceError> {
    let columns = column_order(records);
    let mut writer = csv::Writer::from_writer(vec![]);

    writer.write_record(&columns)?;
    for record in records {
        writer.write_record(
            columns
                .iter()
                .map(|column| record.get(column).unwrap_or_default()),
        )?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| PersistenceError::Io(e.into_error()))?;
    write_atomically(path, &bytes)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn extra_columns_follow_preferred_ones() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("providers-run.csv");
        let records = vec![
            ProviderRecord::from_pairs([
                ("source", "dir"),
                ("phone", "4165550100"),
                ("licence_no", "L-7"),
            ]),
            ProviderRecord::from_pairs([("source", "dir"), ("phone", "4165550101"), ("hours", "9-5")]),
        ];

        write_records(&path, &records).unwrap();

        let written = fs::read_to_string(&path).unwrap();
        let header = written.lines().next().unwrap();
        assert!(header.starts_with("source,category,region,business_name,phone,"));
        assert!(header.ends_with("listing_url,detail_url,hours,licence_no"));
        assert_eq!(read_records(&path).unwrap(), records);
    }

    #[test]
    fn empty_file_reads_as_no_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("providers-empty.csv");
        fs::write(&path, "").unwrap();

        assert!(read_records(&path).unwrap().is_empty());
    }
}
