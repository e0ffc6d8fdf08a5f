//! CSV export of upcoming doses.

use crate::{DoseInstant, Result};
use std::io::Write;
use std::path::Path;

/// A row in the CSV output
#[derive(Debug, serde::Serialize)]
struct CsvRow<'a> {
    scheduled_time: String,
    pet_id: &'a str,
    medication_id: &'a str,
    medication: &'a str,
    amount: f64,
    unit: &'static str,
}

impl<'a> From<&'a DoseInstant> for CsvRow<'a> {
    fn from(dose: &'a DoseInstant) -> Self {
        CsvRow {
            scheduled_time: dose.scheduled_time.to_rfc3339(),
            pet_id: &dose.pet_id,
            medication_id: &dose.medication_id,
            medication: &dose.medication_name,
            amount: dose.dose_amount,
            unit: dose.dose_unit.as_str(),
        }
    }
}

/// Write doses as CSV (with headers) to any writer
pub fn write_doses<W: Write>(writer: W, doses: &[DoseInstant]) -> Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    for dose in doses {
        csv_writer.serialize(CsvRow::from(dose))?;
    }
    csv_writer.flush()?;
    Ok(())
}

/// Write doses to a CSV file, replacing it. Returns the number of rows.
pub fn write_doses_csv(path: &Path, doses: &[DoseInstant]) -> Result<usize> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let file = std::fs::File::create(path)?;
    write_doses(&file, doses)?;
    file.sync_all()?;

    tracing::info!("Exported {} doses to {:?}", doses.len(), path);
    Ok(doses.len())
}
