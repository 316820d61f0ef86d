//! Contract classifier
//!
//! Decides whether a job is a plain transfer or contract work, and for
//! contract work which backend runs it. Only invocations touch the ledger:
//! their backend is declared by the contract's stored metadata.

use crate::backend::BackendKind;
use crate::error::{ClassificationError, DecodeStage};
use crate::job::Job;
use crate::ledger::{Ledger, CONTRACT_CODE_KEY, GLOBAL_CONTRACT_KEY};
use bach_types::{decode_contract_code, decode_envelope, TxKind};
use bytes::Bytes;

/// Where a job goes
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Classification {
    /// Plain value transfer, handled by the ledger
    Transfer,
    /// Contract work for a known backend
    Backend(BackendKind),
    /// Stored metadata declares a backend type nobody recognizes
    Unrecognized(String),
}

/// Stateless job classifier
#[derive(Clone, Copy, Debug, Default)]
pub struct ContractClassifier;

impl ContractClassifier {
    /// Create a classifier
    pub fn new() -> Self {
        Self
    }

    /// Classify a job.
    ///
    /// For invocations the resolved code and backend are written into the
    /// job's contract context.
    pub fn classify(
        &self,
        job: &mut Job,
        ledger: &dyn Ledger,
    ) -> Result<Classification, ClassificationError> {
        match job.transaction().kind() {
            TxKind::ContractInvoke => self.classify_invoke(job, ledger),
            kind @ (TxKind::LuaContractInit | TxKind::JsContractInit | TxKind::ContractQuery) => {
                let backend = BackendKind::for_direct_kind(kind);
                job.context_mut().backend = Some(backend);
                Ok(Classification::Backend(backend))
            }
            TxKind::Transfer | TxKind::Issue => Ok(Classification::Transfer),
        }
    }

    fn classify_invoke(
        &self,
        job: &mut Job,
        ledger: &dyn Ledger,
    ) -> Result<Classification, ClassificationError> {
        let contract = job.context().contract_addr;
        let lookup = match &contract {
            Some(addr) => ledger.get_state(addr, CONTRACT_CODE_KEY),
            None => ledger.get_global_state(GLOBAL_CONTRACT_KEY),
        };

        let raw = match lookup {
            Ok(Some(raw)) if !raw.is_empty() => raw,
            Ok(found) => {
                return Err(ClassificationError::NotFound {
                    contract,
                    len: found.map(|v| v.len()).unwrap_or(0),
                    reason: None,
                })
            }
            Err(e) => {
                return Err(ClassificationError::NotFound {
                    contract,
                    len: 0,
                    reason: Some(e.to_string()),
                })
            }
        };

        let payload = decode_envelope(&raw).map_err(|e| ClassificationError::DecodeFailed {
            stage: DecodeStage::Envelope,
            contract,
            len: raw.len(),
            reason: e.to_string(),
        })?;
        let record =
            decode_contract_code(&payload).map_err(|e| ClassificationError::DecodeFailed {
                stage: DecodeStage::Record,
                contract,
                len: payload.len(),
                reason: e.to_string(),
            })?;

        let ctx = job.context_mut();
        ctx.code = Some(Bytes::from(record.code));
        match record.contract_type.parse::<BackendKind>() {
            Ok(backend) => {
                ctx.backend = Some(backend);
                Ok(Classification::Backend(backend))
            }
            Err(unknown) => Ok(Classification::Unrecognized(unknown.0)),
        }
    }
}
