//! Application layer: request types, the pure reconciliation rules and the
//! `CommerceEngine` that drives every checkout and payment operation
//! through the stores and provider adapters.

pub mod checkout;
pub mod engine;
pub mod reconciliation;
