//! Persisted contract metadata
//!
//! A deployed contract is stored in ledger state as a two-layer blob:
//! an RLP envelope `[version, payload]` whose payload is the JSON record
//! `{"type": "<backend>", "code": "<hex>"}`. Decoding is split into the two
//! stages so a caller can tell which layer is broken.

use rlp::{Rlp, RlpStream};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Current envelope version
pub const CONTRACT_STATE_VERSION: u8 = 1;

/// Contract metadata codec errors
#[derive(Debug, Error)]
pub enum CodecError {
    /// Outer envelope is not valid RLP of the expected shape
    #[error("malformed contract envelope: {0}")]
    Envelope(String),

    /// Envelope carries a version this build does not understand
    #[error("unsupported contract envelope version {0}")]
    UnsupportedVersion(u8),

    /// Inner record is not valid JSON of the expected shape
    #[error("malformed contract record: {0}")]
    Record(#[from] serde_json::Error),
}

/// Inner contract record: which backend runs it, and its code
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractCode {
    /// Backend name, e.g. `lua` or `js`
    #[serde(rename = "type")]
    pub contract_type: String,
    /// Contract code
    #[serde(with = "hex_code")]
    pub code: Vec<u8>,
}

impl ContractCode {
    /// Create a new record
    pub fn new(contract_type: impl Into<String>, code: impl Into<Vec<u8>>) -> Self {
        Self {
            contract_type: contract_type.into(),
            code: code.into(),
        }
    }
}

/// Encode a record into its stored form (envelope around JSON)
pub fn encode_contract_state(code: &ContractCode) -> Result<Vec<u8>, CodecError> {
    let payload = serde_json::to_vec(code)?;
    let mut stream = RlpStream::new_list(2);
    stream.append(&CONTRACT_STATE_VERSION);
    stream.append(&payload);
    Ok(stream.out().to_vec())
}

/// First stage: unwrap the envelope and return the inner payload
pub fn decode_envelope(raw: &[u8]) -> Result<Vec<u8>, CodecError> {
    let rlp = Rlp::new(raw);
    let count = rlp
        .item_count()
        .map_err(|e| CodecError::Envelope(e.to_string()))?;
    if count != 2 {
        return Err(CodecError::Envelope(format!(
            "expected 2 fields, found {count}"
        )));
    }
    let version: u8 = rlp
        .val_at(0)
        .map_err(|e| CodecError::Envelope(e.to_string()))?;
    if version != CONTRACT_STATE_VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }
    rlp.val_at(1)
        .map_err(|e| CodecError::Envelope(e.to_string()))
}

/// Second stage: parse the inner JSON record
pub fn decode_contract_code(payload: &[u8]) -> Result<ContractCode, CodecError> {
    Ok(serde_json::from_slice(payload)?)
}

mod hex_code {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(code: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(code))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        let s = s.strip_prefix("0x").unwrap_or(&s);
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}
