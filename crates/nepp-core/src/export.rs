use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::error::{PipelineError, Result};
use crate::normalization::NormalizedRow;

/// Writes rows as CSV with a header in model column order. Missing prices are empty fields.
pub fn write_normalized_csv<W: Write>(writer: W, rows: &[NormalizedRow]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(writer);
    for row in rows {
        writer.serialize(row)?;
    }
    writer
        .flush()
        .map_err(|err| PipelineError::Csv(err.into()))?;
    Ok(())
}

pub fn export_normalized(path: &Path, rows: &[NormalizedRow]) -> Result<()> {
    let file = File::create(path).map_err(|err| PipelineError::io(path, err))?;
    write_normalized_csv(file, rows)
}
