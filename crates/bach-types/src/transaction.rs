//! Transaction types for the BachLedger VM

use bach_primitives::{keccak256, Address, Amount, Nonce, H256};
use bytes::Bytes;
use rlp::RlpStream;
use std::fmt;

/// Declared kind of a transaction
///
/// The kind decides the execution path: plain value movements go straight
/// to the ledger, everything else is contract work handled by a VM backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum TxKind {
    /// Plain value transfer between accounts
    #[default]
    Transfer = 0,
    /// Asset issuance to an account
    Issue = 1,
    /// Invoke a deployed contract
    ContractInvoke = 2,
    /// Read-only contract query
    ContractQuery = 3,
    /// Deploy a Lua contract
    LuaContractInit = 4,
    /// Deploy a JavaScript contract
    JsContractInit = 5,
}

impl TxKind {
    /// Whether this kind runs inside a contract backend
    pub fn is_contract(&self) -> bool {
        matches!(
            self,
            TxKind::ContractInvoke
                | TxKind::ContractQuery
                | TxKind::LuaContractInit
                | TxKind::JsContractInit
        )
    }

    /// Whether this kind deploys a new contract
    pub fn is_contract_init(&self) -> bool {
        matches!(self, TxKind::LuaContractInit | TxKind::JsContractInit)
    }

    /// Short lowercase name used in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            TxKind::Transfer => "transfer",
            TxKind::Issue => "issue",
            TxKind::ContractInvoke => "invoke",
            TxKind::ContractQuery => "query",
            TxKind::LuaContractInit => "lua_init",
            TxKind::JsContractInit => "js_init",
        }
    }
}

impl fmt::Display for TxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A ledger transaction
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    /// Declared kind
    pub kind: TxKind,
    /// Sender nonce
    pub nonce: Nonce,
    /// Sender address
    pub from: Address,
    /// Recipient for transfers, target contract for contract kinds.
    /// `None` on a contract kind addresses the node's global contract.
    pub to: Option<Address>,
    /// Amount moved by the transaction
    pub amount: Amount,
    /// Call data, or contract source for deployments
    pub payload: Bytes,
}

impl Transaction {
    /// Create a plain value transfer
    pub fn transfer(from: Address, to: Address, amount: Amount, nonce: Nonce) -> Self {
        Self {
            kind: TxKind::Transfer,
            nonce,
            from,
            to: Some(to),
            amount,
            payload: Bytes::new(),
        }
    }

    /// Create a contract invocation. `contract = None` invokes the global contract.
    pub fn invoke(
        from: Address,
        contract: Option<Address>,
        payload: impl Into<Bytes>,
        nonce: Nonce,
    ) -> Self {
        Self {
            kind: TxKind::ContractInvoke,
            nonce,
            from,
            to: contract,
            amount: 0,
            payload: payload.into(),
        }
    }

    /// Create a contract deployment of the given init kind
    pub fn deploy(
        kind: TxKind,
        from: Address,
        contract: Address,
        code: impl Into<Bytes>,
        nonce: Nonce,
    ) -> Self {
        debug_assert!(kind.is_contract_init());
        Self {
            kind,
            nonce,
            from,
            to: Some(contract),
            amount: 0,
            payload: code.into(),
        }
    }

    /// Override the declared kind
    pub fn with_kind(mut self, kind: TxKind) -> Self {
        self.kind = kind;
        self
    }

    /// Declared kind
    pub fn kind(&self) -> TxKind {
        self.kind
    }

    /// Contract addressed by this transaction, if it is contract work
    pub fn contract_address(&self) -> Option<Address> {
        if self.kind.is_contract() {
            self.to
        } else {
            None
        }
    }

    /// Transaction hash: keccak256 of the RLP-encoded fields
    pub fn hash(&self) -> H256 {
        let mut stream = RlpStream::new_list(6);
        stream.append(&(self.kind as u8));
        stream.append(&self.nonce);
        stream.append(&self.from);
        match &self.to {
            Some(to) => stream.append(to),
            None => stream.append_empty_data(),
        };
        stream.append(&self.amount.to_be_bytes().to_vec());
        stream.append(&self.payload.to_vec());
        keccak256(&stream.out())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(b: u8) -> Address {
        Address::from_bytes([b; 20])
    }

    #[test]
    fn test_kind_classes() {
        assert!(!TxKind::Transfer.is_contract());
        assert!(!TxKind::Issue.is_contract());
        assert!(TxKind::ContractInvoke.is_contract());
        assert!(TxKind::ContractQuery.is_contract());
        assert!(TxKind::LuaContractInit.is_contract_init());
        assert!(TxKind::JsContractInit.is_contract_init());
        assert!(!TxKind::ContractInvoke.is_contract_init());
    }

    #[test]
    fn test_kind_default_is_transfer() {
        assert_eq!(TxKind::default(), TxKind::Transfer);
        assert_eq!(TxKind::LuaContractInit.to_string(), "lua_init");
    }

    #[test]
    fn test_contract_address() {
        let tx = Transaction::transfer(addr(1), addr(2), 10, 0);
        assert_eq!(tx.contract_address(), None);

        let tx = Transaction::invoke(addr(1), Some(addr(3)), vec![1, 2], 0);
        assert_eq!(tx.contract_address(), Some(addr(3)));

        let tx = Transaction::invoke(addr(1), None, vec![1, 2], 0);
        assert_eq!(tx.contract_address(), None);
    }

    #[test]
    fn test_hash_deterministic() {
        let a = Transaction::invoke(addr(1), Some(addr(3)), vec![1, 2], 7);
        let b = a.clone();
        assert_eq!(a.hash(), b.hash());
        assert!(!a.hash().is_zero());
    }

    #[test]
    fn test_hash_covers_fields() {
        let base = Transaction::transfer(addr(1), addr(2), 10, 0);
        let other_nonce = Transaction::transfer(addr(1), addr(2), 10, 1);
        let other_amount = Transaction::transfer(addr(1), addr(2), 11, 0);
        let other_kind = base.clone().with_kind(TxKind::Issue);

        assert_ne!(base.hash(), other_nonce.hash());
        assert_ne!(base.hash(), other_amount.hash());
        assert_ne!(base.hash(), other_kind.hash());
    }

    #[test]
    fn test_global_invoke_hash_differs_from_addressed() {
        let global = Transaction::invoke(addr(1), None, vec![9], 0);
        let addressed = Transaction::invoke(addr(1), Some(Address::ZERO), vec![9], 0);
        assert_ne!(global.hash(), addressed.hash());
    }
}
