//! Ordered account schemas.
//!
//! The program reads its accounts positionally, so the order below is part
//! of the wire format. Builders name every account by role and [`bind`]
//! refuses anything that does not match the declared list exactly.
//!
//! [`bind`]: AccountSchema::bind

use std::fmt;

use chain_sol::{AccountMeta, Pubkey, SYSTEM_PROGRAM_ID, TOKEN_PROGRAM_ID};

use crate::config::Funding;
use crate::discriminator::Operation;
use crate::error::EnvelopeError;

/// What an account is for in a given instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    UserState,
    Envelope,
    Vault,
    ClaimRecord,
    /// Creator paying for the envelope.
    User,
    /// Envelope owner (refund, cancel, close).
    Owner,
    Claimer,
    UserToken,
    OwnerToken,
    ClaimerToken,
    Mint,
    TokenProgram,
    SystemProgram,
}

impl Role {
    pub fn name(&self) -> &'static str {
        match self {
            Role::UserState => "user_state",
            Role::Envelope => "envelope",
            Role::Vault => "vault",
            Role::ClaimRecord => "claim_record",
            Role::User => "user",
            Role::Owner => "owner",
            Role::Claimer => "claimer",
            Role::UserToken => "user_token_account",
            Role::OwnerToken => "owner_token_account",
            Role::ClaimerToken => "claimer_token_account",
            Role::Mint => "mint",
            Role::TokenProgram => "token_program",
            Role::SystemProgram => "system_program",
        }
    }

    /// Roles whose key is fixed by the runtime.
    fn fixed_key(&self) -> Option<Pubkey> {
        match self {
            Role::SystemProgram => Some(SYSTEM_PROGRAM_ID),
            Role::TokenProgram => Some(TOKEN_PROGRAM_ID),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleSpec {
    pub role: Role,
    pub is_signer: bool,
    pub is_writable: bool,
}

const fn signer(role: Role) -> RoleSpec {
    RoleSpec {
        role,
        is_signer: true,
        is_writable: true,
    }
}

const fn writable(role: Role) -> RoleSpec {
    RoleSpec {
        role,
        is_signer: false,
        is_writable: true,
    }
}

const fn readonly(role: Role) -> RoleSpec {
    RoleSpec {
        role,
        is_signer: false,
        is_writable: false,
    }
}

/// The declared account list of one instruction in one program build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountSchema {
    pub operation: Operation,
    pub deployment: &'static str,
    pub version: u16,
    pub roles: &'static [RoleSpec],
}

impl AccountSchema {
    pub fn arity(&self) -> usize {
        self.roles.len()
    }

    pub fn id(&self) -> String {
        format!("{}.{}.v{}", self.deployment, self.operation, self.version)
    }

    /// Turn role-tagged keys into account metas, checking arity, order and
    /// the keys of runtime programs.
    pub fn bind(&self, accounts: &[(Role, Pubkey)]) -> Result<Vec<AccountMeta>, EnvelopeError> {
        let mismatch = |reason: String| EnvelopeError::SchemaMismatch {
            operation: self.operation.name(),
            reason: format!("{} ({})", reason, self.id()),
        };

        if accounts.len() != self.arity() {
            return Err(mismatch(format!(
                "expected {} accounts, got {}",
                self.arity(),
                accounts.len()
            )));
        }

        self.roles
            .iter()
            .zip(accounts)
            .enumerate()
            .map(|(i, (spec, (role, key)))| {
                if spec.role != *role {
                    return Err(mismatch(format!(
                        "position {i} must be {}, got {}",
                        spec.role, role
                    )));
                }
                if let Some(expected) = spec.role.fixed_key() {
                    if *key != expected {
                        return Err(mismatch(format!(
                            "{} must be {expected}, got {key}",
                            spec.role
                        )));
                    }
                }
                Ok(AccountMeta::new(*key, spec.is_signer, spec.is_writable))
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Lamport-funded program
// ---------------------------------------------------------------------------

const INIT_USER_STATE: &[RoleSpec] = &[
    writable(Role::UserState),
    signer(Role::User),
    readonly(Role::SystemProgram),
];

const NATIVE_CREATE: &[RoleSpec] = &[
    writable(Role::UserState),
    writable(Role::Envelope),
    signer(Role::User),
    readonly(Role::SystemProgram),
];

const NATIVE_CLAIM: &[RoleSpec] = &[writable(Role::Envelope), signer(Role::Claimer)];

const NATIVE_REFUND: &[RoleSpec] = &[writable(Role::Envelope), signer(Role::Owner)];

// ---------------------------------------------------------------------------
// Token-funded program
// ---------------------------------------------------------------------------

const TOKEN_CREATE: &[RoleSpec] = &[
    writable(Role::UserState),
    writable(Role::Envelope),
    writable(Role::Vault),
    writable(Role::UserToken),
    readonly(Role::Mint),
    signer(Role::User),
    readonly(Role::TokenProgram),
    readonly(Role::SystemProgram),
];

const TOKEN_CLAIM: &[RoleSpec] = &[
    writable(Role::Envelope),
    writable(Role::Vault),
    writable(Role::ClaimerToken),
    writable(Role::ClaimRecord),
    signer(Role::Claimer),
    readonly(Role::TokenProgram),
    readonly(Role::SystemProgram),
];

const TOKEN_REFUND: &[RoleSpec] = &[
    writable(Role::Envelope),
    writable(Role::Vault),
    writable(Role::OwnerToken),
    signer(Role::Owner),
    readonly(Role::TokenProgram),
    readonly(Role::SystemProgram),
];

const TOKEN_CANCEL: &[RoleSpec] = &[
    writable(Role::Envelope),
    writable(Role::UserState),
    signer(Role::Owner),
];

const TOKEN_CLOSE: &[RoleSpec] = &[writable(Role::Envelope), signer(Role::Owner)];

/// The schemas of one program build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaSet {
    deployment: &'static str,
    schemas: Vec<AccountSchema>,
}

impl SchemaSet {
    pub fn native() -> Self {
        Self::build(
            "native",
            &[
                (Operation::InitUserState, INIT_USER_STATE),
                (Operation::Create, NATIVE_CREATE),
                (Operation::Claim, NATIVE_CLAIM),
                (Operation::Refund, NATIVE_REFUND),
            ],
        )
    }

    pub fn token() -> Self {
        Self::build(
            "token",
            &[
                (Operation::InitUserState, INIT_USER_STATE),
                (Operation::Create, TOKEN_CREATE),
                (Operation::Claim, TOKEN_CLAIM),
                (Operation::Refund, TOKEN_REFUND),
                (Operation::Cancel, TOKEN_CANCEL),
                (Operation::Close, TOKEN_CLOSE),
            ],
        )
    }

    pub fn for_funding(funding: &Funding) -> Self {
        match funding {
            Funding::Native => Self::native(),
            Funding::Token { .. } => Self::token(),
        }
    }

    fn build(deployment: &'static str, entries: &[(Operation, &'static [RoleSpec])]) -> Self {
        SchemaSet {
            deployment,
            schemas: entries
                .iter()
                .map(|(operation, roles)| AccountSchema {
                    operation: *operation,
                    deployment,
                    version: 1,
                    roles,
                })
                .collect(),
        }
    }

    pub fn deployment(&self) -> &'static str {
        self.deployment
    }

    pub fn supports(&self, op: Operation) -> bool {
        self.schemas.iter().any(|s| s.operation == op)
    }

    pub fn get(&self, op: Operation) -> Result<&AccountSchema, EnvelopeError> {
        self.schemas
            .iter()
            .find(|s| s.operation == op)
            .ok_or(EnvelopeError::UnsupportedOperation(op.name()))
    }
}
