//! Anchor-style 8-byte discriminators.
//!
//! Instruction discriminators are `sha256("global:" + name)[..8]`, account
//! discriminators are `sha256("account:" + TypeName)[..8]`. Both are pure
//! functions of the name; the table only saves rehashing on every build.

use sha2::{Digest, Sha256};
use std::fmt;

pub type Discriminator = [u8; 8];

/// Every instruction the envelope program exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    InitUserState,
    Create,
    Claim,
    Refund,
    Cancel,
    Close,
}

impl Operation {
    pub const ALL: [Operation; 6] = [
        Operation::InitUserState,
        Operation::Create,
        Operation::Claim,
        Operation::Refund,
        Operation::Cancel,
        Operation::Close,
    ];

    /// The on-chain instruction name hashed into the discriminator.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::InitUserState => "init_user_state",
            Operation::Create => "create",
            Operation::Claim => "claim",
            Operation::Refund => "refund",
            Operation::Cancel => "cancel",
            Operation::Close => "close",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// On-chain account types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountKind {
    UserState,
    Envelope,
    ClaimRecord,
}

impl AccountKind {
    pub const ALL: [AccountKind; 3] = [
        AccountKind::UserState,
        AccountKind::Envelope,
        AccountKind::ClaimRecord,
    ];

    pub fn type_name(&self) -> &'static str {
        match self {
            AccountKind::UserState => "UserState",
            AccountKind::Envelope => "EnvelopeAccount",
            AccountKind::ClaimRecord => "ClaimRecord",
        }
    }
}

pub fn instruction_discriminator(name: &str) -> Discriminator {
    prefixed_hash("global:", name)
}

pub fn account_discriminator(type_name: &str) -> Discriminator {
    prefixed_hash("account:", type_name)
}

fn prefixed_hash(prefix: &str, name: &str) -> Discriminator {
    let digest = Sha256::new()
        .chain_update(prefix.as_bytes())
        .chain_update(name.as_bytes())
        .finalize();
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}

/// Discriminators for every operation and account type, computed once.
///
/// Both arrays are indexed by the enum discriminant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscriminatorTable {
    instructions: [Discriminator; 6],
    accounts: [Discriminator; 3],
}

impl DiscriminatorTable {
    pub fn new() -> Self {
        DiscriminatorTable {
            instructions: Operation::ALL.map(|op| instruction_discriminator(op.name())),
            accounts: AccountKind::ALL.map(|kind| account_discriminator(kind.type_name())),
        }
    }

    pub fn instruction(&self, op: Operation) -> Discriminator {
        self.instructions[op as usize]
    }

    pub fn account(&self, kind: AccountKind) -> Discriminator {
        self.accounts[kind as usize]
    }

    /// Reverse lookup for decoding instruction data.
    pub fn operation_for(&self, discriminator: &[u8]) -> Option<Operation> {
        Operation::ALL
            .into_iter()
            .find(|op| self.instructions[*op as usize].as_slice() == discriminator)
    }
}

impl Default for DiscriminatorTable {
    fn default() -> Self {
        Self::new()
    }
}
