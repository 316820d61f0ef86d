//! # bach-types
//!
//! Types consumed by the BachLedger VM dispatch engine.
//!
//! This crate provides:
//! - [`Transaction`](transaction::Transaction) - a ledger transaction and its declared kind
//! - [`ContractCode`](contract::ContractCode) - persisted contract metadata and its codec

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod contract;
pub mod transaction;

pub use contract::{
    decode_contract_code, decode_envelope, encode_contract_state, CodecError, ContractCode,
    CONTRACT_STATE_VERSION,
};
pub use transaction::{Transaction, TxKind};
