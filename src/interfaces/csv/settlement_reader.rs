use crate::domain::event::ConfirmationResult;
use crate::domain::provider::ProviderKind;
use crate::error::{CommerceError, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

/// Outcome column of a provider settlement export.
#[derive(Debug, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum SettlementOutcome {
    #[serde(alias = "succeeded", alias = "success", alias = "completed")]
    Captured,
    Authorized,
    #[serde(alias = "declined")]
    Failed,
}

/// One row of `provider,reference,outcome,amount`.
#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct SettlementRecord {
    pub provider: ProviderKind,
    pub reference: String,
    pub outcome: SettlementOutcome,
    #[serde(default)]
    pub amount: Option<Decimal>,
}

impl SettlementRecord {
    /// The row as the adapter would have reported it synchronously.
    pub fn into_confirmation(self) -> Result<ConfirmationResult> {
        let reference = self.reference.trim();
        if reference.is_empty() {
            return Err(CommerceError::validation("Settlement row has no reference"));
        }
        let result = match self.outcome {
            SettlementOutcome::Captured => ConfirmationResult::captured(self.provider, reference),
            SettlementOutcome::Authorized => ConfirmationResult::authorized(self.provider, reference),
            SettlementOutcome::Failed => ConfirmationResult::failed(self.provider, reference),
        };
        Ok(match self.amount {
            Some(amount) => result.with_amount(amount),
            None => result,
        })
    }
}

/// Reads a settlement export from any `Read` source.
///
/// Whitespace around fields is trimmed and the `amount` column may be left
/// out entirely.
pub struct SettlementReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> SettlementReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily deserializes rows; a bad row yields an error and the stream
    /// continues with the next one.
    pub fn records(self) -> impl Iterator<Item = Result<SettlementRecord>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(CommerceError::from))
    }
}
