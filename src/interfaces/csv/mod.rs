//! CSV surfaces for offline reconciliation.

pub mod report_writer;
pub mod settlement_reader;

pub use report_writer::{ReportRow, ReportWriter};
pub use settlement_reader::{SettlementReader, SettlementRecord};
