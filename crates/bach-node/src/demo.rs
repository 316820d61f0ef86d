//! Demo backends, ledger contents and workload

use bach_primitives::{keccak256, Address};
use bach_types::{CodecError, ContractCode, Transaction, TxKind};
use bach_vm::{BackendError, BackendKind, Job, Ledger, MemoryLedger, VmBackend};
use bytes::Bytes;

/// Lua demo contract
pub const LUA_CONTRACT: Address = Address::from_bytes([0x11; 20]);
/// JS demo contract
pub const JS_CONTRACT: Address = Address::from_bytes([0x22; 20]);
/// Address with no deployed contract
pub const MISSING_CONTRACT: Address = Address::from_bytes([0x33; 20]);

/// Number of funded demo accounts
pub const ACCOUNTS: u8 = 8;
/// Starting balance of each demo account
pub const INITIAL_BALANCE: u128 = 1_000_000;

/// Backend that hashes the contract code together with the call data
pub struct DemoBackend {
    kind: BackendKind,
}

impl DemoBackend {
    /// Create a demo backend
    pub fn new(kind: BackendKind) -> Self {
        Self { kind }
    }
}

impl VmBackend for DemoBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn execute_job(&mut self, job: &Job, _ledger: &dyn Ledger) -> Result<Option<Bytes>, BackendError> {
        let tx = job.transaction();
        let code = match &job.context().code {
            Some(code) => code.clone(),
            None if tx.kind().is_contract_init() => tx.payload.clone(),
            None if tx.kind() == TxKind::ContractQuery => Bytes::new(),
            None => return Err(BackendError::fatal("no contract code resolved")),
        };
        let mut input = Vec::with_capacity(code.len() + tx.payload.len());
        input.extend_from_slice(&code);
        input.extend_from_slice(&tx.payload);
        Ok(Some(Bytes::copy_from_slice(keccak256(&input).as_bytes())))
    }
}

/// Backends for one worker
pub fn backends(_worker_id: usize) -> Vec<Box<dyn VmBackend>> {
    BackendKind::ALL
        .iter()
        .map(|kind| Box::new(DemoBackend::new(*kind)) as Box<dyn VmBackend>)
        .collect()
}

/// Demo account `n`
pub fn account(n: u8) -> Address {
    let mut bytes = [0u8; 20];
    bytes[19] = n + 1;
    Address::from_bytes(bytes)
}

/// Deploy the demo contracts and fund the demo accounts
pub fn seed_ledger(ledger: &MemoryLedger) -> Result<(), CodecError> {
    ledger.deploy_contract(
        Some(LUA_CONTRACT),
        &ContractCode::new("lua", b"function main(x) return x end".to_vec()),
    )?;
    ledger.deploy_contract(
        Some(JS_CONTRACT),
        &ContractCode::new("js", b"function main(x) { return x }".to_vec()),
    )?;
    ledger.deploy_contract(None, &ContractCode::new("js", b"// system contract".to_vec()))?;
    for n in 0..ACCOUNTS {
        ledger.set_balance(account(n), INITIAL_BALANCE);
    }
    Ok(())
}

/// A deterministic mixed batch of `count` transactions.
///
/// Every sixteenth transaction invokes a contract that does not exist, so
/// the redo path shows up in the stats.
pub fn workload(count: usize) -> Vec<Transaction> {
    (0..count)
        .map(|i| {
            let nonce = i as u64;
            let from = account((i % ACCOUNTS as usize) as u8);
            let to = account(((i + 1) % ACCOUNTS as usize) as u8);
            let call = nonce.to_be_bytes().to_vec();
            match i % 16 {
                15 => Transaction::invoke(from, Some(MISSING_CONTRACT), call, nonce),
                3 => Transaction::invoke(from, None, call, nonce),
                7 => Transaction::deploy(
                    TxKind::LuaContractInit,
                    from,
                    to,
                    b"return 0".to_vec(),
                    nonce,
                ),
                11 => Transaction::deploy(
                    TxKind::JsContractInit,
                    from,
                    to,
                    b"export default 0".to_vec(),
                    nonce,
                ),
                n => match n % 4 {
                    0 => Transaction::transfer(from, to, 1, nonce),
                    1 => Transaction::invoke(from, Some(LUA_CONTRACT), call, nonce),
                    _ => Transaction::invoke(from, Some(JS_CONTRACT), call, nonce),
                },
            }
        })
        .collect()
}
