use std::path::Path;

use crate::{error::PersistenceError, services::RunSummary};

use super::write_atomically;

pub fn write_summary(path: &Path, summary: &RunSummary) -> Result<(), PersistenceError> {
    let json = serde_json::to_vec_pretty(summary)?;
    write_atomically(path, &json)
}
