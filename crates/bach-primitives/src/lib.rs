//! # bach-primitives
//!
//! Primitive types shared by the BachLedger VM crates:
//! 20-byte account/contract addresses and 32-byte hashes.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod address;
mod hash;

pub use address::{Address, AddressError};
pub use hash::{keccak256, HashError, H256};

/// Account nonce type
pub type Nonce = u64;

/// Transferable amount
pub type Amount = u128;
