use crate::domain::provider::ProviderKind;
use crate::error::{CommerceError, Result};
use serde::Serialize;
use std::io::Write;

/// One line of the reconciliation report.
#[derive(Debug, Serialize, PartialEq, Clone)]
pub struct ReportRow {
    pub provider: ProviderKind,
    pub reference: String,
    /// `order:<id>` or `subscription:<id>`; empty when nothing matched.
    pub entity: String,
    /// `applied`, `duplicate`, `anomaly`, `unmatched` or `error`.
    pub result: String,
}

/// Writes `provider,reference,entity,result` rows.
pub struct ReportWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> ReportWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_row(&mut self, row: &ReportRow) -> Result<()> {
        self.writer.serialize(row)?;
        Ok(())
    }

    pub fn finish(mut self) -> Result<()> {
        self.writer.flush().map_err(CommerceError::from)
    }
}
