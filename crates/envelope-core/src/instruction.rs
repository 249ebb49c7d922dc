//! Instruction payload codec and per-operation instruction builders.
//!
//! Create payload layout:
//!
//! ```text
//! discriminator     8
//! variant tag       1   0 = DirectFixed, 1 = GroupFixed, 2 = GroupRandom
//! allowed claimer  32   DirectFixed only
//! total_amount      8   u64 LE
//! total_slots       8   u64 LE
//! expiry            8   u64 LE, unit set by the deployment
//! ```
//!
//! Every other operation is the bare discriminator; its context travels in
//! the account list.

use chain_sol::{Instruction, Pubkey, SYSTEM_PROGRAM_ID, TOKEN_PROGRAM_ID};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::addresses::{
    claim_record_address, envelope_address, token_account, user_state_address, vault_address,
};
use crate::config::{Funding, Limits};
use crate::discriminator::{DiscriminatorTable, Operation};
use crate::error::EnvelopeError;
use crate::schema::{Role, SchemaSet};

pub const VARIANT_DIRECT_FIXED: u8 = 0;
pub const VARIANT_GROUP_FIXED: u8 = 1;
pub const VARIANT_GROUP_RANDOM: u8 = 2;

/// How an envelope is split among claimers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EnvelopeVariant {
    /// One named claimer takes the whole amount.
    DirectFixed { allowed: Pubkey },
    /// Equal shares for the first `total_slots` claimers.
    GroupFixed,
    /// Random shares for the first `total_slots` claimers.
    GroupRandom,
}

impl EnvelopeVariant {
    pub fn tag(&self) -> u8 {
        match self {
            EnvelopeVariant::DirectFixed { .. } => VARIANT_DIRECT_FIXED,
            EnvelopeVariant::GroupFixed => VARIANT_GROUP_FIXED,
            EnvelopeVariant::GroupRandom => VARIANT_GROUP_RANDOM,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            EnvelopeVariant::DirectFixed { .. } => "direct_fixed",
            EnvelopeVariant::GroupFixed => "group_fixed",
            EnvelopeVariant::GroupRandom => "group_random",
        }
    }

    pub fn allowed(&self) -> Option<&Pubkey> {
        match self {
            EnvelopeVariant::DirectFixed { allowed } => Some(allowed),
            _ => None,
        }
    }

    /// Tag plus active arm, without any slot filler.
    pub fn encoded_len(&self) -> usize {
        match self {
            EnvelopeVariant::DirectFixed { .. } => 33,
            _ => 1,
        }
    }

    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.push(self.tag());
        if let EnvelopeVariant::DirectFixed { allowed } = self {
            buf.extend_from_slice(allowed.as_bytes());
        }
    }

    /// Decode tag and arm from the front of `data`; returns bytes consumed.
    pub fn decode(data: &[u8]) -> Result<(Self, usize), EnvelopeError> {
        let tag = *data
            .first()
            .ok_or_else(|| EnvelopeError::Decode("missing variant tag".into()))?;
        match tag {
            VARIANT_DIRECT_FIXED => {
                let arm = data.get(1..33).ok_or_else(|| {
                    EnvelopeError::Decode(format!(
                        "direct_fixed variant needs 32 payload bytes, {} available",
                        data.len() - 1
                    ))
                })?;
                let mut allowed = [0u8; 32];
                allowed.copy_from_slice(arm);
                Ok((
                    EnvelopeVariant::DirectFixed {
                        allowed: Pubkey(allowed),
                    },
                    33,
                ))
            }
            VARIANT_GROUP_FIXED => Ok((EnvelopeVariant::GroupFixed, 1)),
            VARIANT_GROUP_RANDOM => Ok((EnvelopeVariant::GroupRandom, 1)),
            other => Err(EnvelopeError::Decode(format!("unknown variant tag {other}"))),
        }
    }
}

/// Arguments of `create`, with `expiry` already in the deployment's unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateParams {
    pub variant: EnvelopeVariant,
    pub total_amount: u64,
    pub total_slots: u64,
    pub expiry: u64,
}

impl CreateParams {
    /// Reject parameters the program would refuse, before encoding.
    pub fn validate(&self, limits: &Limits) -> Result<(), EnvelopeError> {
        if self.total_amount == 0 {
            return Err(EnvelopeError::InvalidParams("total_amount must be > 0".into()));
        }
        if self.total_slots == 0 {
            return Err(EnvelopeError::InvalidParams("total_slots must be > 0".into()));
        }
        if self.expiry == 0 {
            return Err(EnvelopeError::InvalidParams("expiry must be > 0".into()));
        }
        if matches!(self.variant, EnvelopeVariant::DirectFixed { .. }) && self.total_slots != 1 {
            return Err(EnvelopeError::InvalidParams(format!(
                "direct_fixed envelopes have exactly 1 slot, got {}",
                self.total_slots
            )));
        }
        if self.total_slots > self.total_amount {
            return Err(EnvelopeError::InvalidParams(format!(
                "{} slots cannot share {} base units",
                self.total_slots, self.total_amount
            )));
        }
        if let Some(max) = limits.max_total_amount {
            if self.total_amount > max {
                return Err(EnvelopeError::InvalidParams(format!(
                    "total_amount {} exceeds the maximum of {max}",
                    self.total_amount
                )));
            }
        }
        if let Some(min) = limits.min_amount_per_slot {
            let per_slot = self.total_amount / self.total_slots;
            if per_slot < min {
                return Err(EnvelopeError::InvalidParams(format!(
                    "{per_slot} per slot is below the minimum of {min}"
                )));
            }
        }
        Ok(())
    }
}

/// Decoded instruction data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeInstruction {
    InitUserState,
    Create(CreateParams),
    Claim,
    Refund,
    Cancel,
    Close,
}

impl EnvelopeInstruction {
    pub fn operation(&self) -> Operation {
        match self {
            EnvelopeInstruction::InitUserState => Operation::InitUserState,
            EnvelopeInstruction::Create(_) => Operation::Create,
            EnvelopeInstruction::Claim => Operation::Claim,
            EnvelopeInstruction::Refund => Operation::Refund,
            EnvelopeInstruction::Cancel => Operation::Cancel,
            EnvelopeInstruction::Close => Operation::Close,
        }
    }

    pub fn encode(&self, table: &DiscriminatorTable) -> Vec<u8> {
        let mut data = Vec::with_capacity(8 + 33 + 24);
        data.extend_from_slice(&table.instruction(self.operation()));

        if let EnvelopeInstruction::Create(params) = self {
            params.variant.encode_into(&mut data);
            data.extend_from_slice(&params.total_amount.to_le_bytes());
            data.extend_from_slice(&params.total_slots.to_le_bytes());
            data.extend_from_slice(&params.expiry.to_le_bytes());
        }

        data
    }

    pub fn decode(data: &[u8], table: &DiscriminatorTable) -> Result<Self, EnvelopeError> {
        let disc = data.get(..8).ok_or_else(|| {
            EnvelopeError::Decode(format!("instruction data is {} bytes, need 8", data.len()))
        })?;
        let op = table.operation_for(disc).ok_or_else(|| {
            EnvelopeError::Decode(format!("unknown instruction discriminator {}", hex::encode(disc)))
        })?;
        let body = &data[8..];

        let instruction = match op {
            Operation::Create => {
                let (variant, used) = EnvelopeVariant::decode(body)?;
                let rest = &body[used..];
                if rest.len() != 24 {
                    return Err(EnvelopeError::Decode(format!(
                        "create expects 24 bytes after the variant, got {}",
                        rest.len()
                    )));
                }
                EnvelopeInstruction::Create(CreateParams {
                    variant,
                    total_amount: read_u64(rest, 0),
                    total_slots: read_u64(rest, 8),
                    expiry: read_u64(rest, 16),
                })
            }
            _ if !body.is_empty() => {
                return Err(EnvelopeError::Decode(format!(
                    "{op} carries no payload, found {} extra bytes",
                    body.len()
                )))
            }
            Operation::InitUserState => EnvelopeInstruction::InitUserState,
            Operation::Claim => EnvelopeInstruction::Claim,
            Operation::Refund => EnvelopeInstruction::Refund,
            Operation::Cancel => EnvelopeInstruction::Cancel,
            Operation::Close => EnvelopeInstruction::Close,
        };
        Ok(instruction)
    }
}

/// Caller guarantees `offset + 8 <= data.len()`.
fn read_u64(data: &[u8], offset: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&data[offset..offset + 8]);
    u64::from_le_bytes(buf)
}

/// Builds complete instructions for one program deployment.
#[derive(Debug, Clone)]
pub struct EnvelopeProgram {
    program_id: Pubkey,
    funding: Funding,
    limits: Limits,
    schemas: SchemaSet,
    discriminators: DiscriminatorTable,
}

impl EnvelopeProgram {
    pub fn new(program_id: Pubkey, funding: Funding, limits: Limits) -> Self {
        EnvelopeProgram {
            program_id,
            funding,
            limits,
            schemas: SchemaSet::for_funding(&funding),
            discriminators: DiscriminatorTable::new(),
        }
    }

    pub fn program_id(&self) -> &Pubkey {
        &self.program_id
    }

    pub fn schemas(&self) -> &SchemaSet {
        &self.schemas
    }

    pub fn discriminators(&self) -> &DiscriminatorTable {
        &self.discriminators
    }

    pub fn supports(&self, op: Operation) -> bool {
        self.schemas.supports(op)
    }

    fn mint(&self) -> Result<Pubkey, EnvelopeError> {
        match self.funding {
            Funding::Token { mint } => Ok(mint),
            Funding::Native => Err(EnvelopeError::Config(
                "token accounts requested from a native deployment".into(),
            )),
        }
    }

    fn assemble(
        &self,
        ix: EnvelopeInstruction,
        accounts: &[(Role, Pubkey)],
    ) -> Result<Instruction, EnvelopeError> {
        let op = ix.operation();
        let metas = self.schemas.get(op)?.bind(accounts)?;
        let data = ix.encode(&self.discriminators);

        debug!(
            operation = %op,
            accounts = metas.len(),
            data = %hex::encode(&data),
            "instruction built"
        );

        Ok(Instruction {
            program_id: self.program_id,
            accounts: metas,
            data,
        })
    }

    pub fn init_user_state(&self, owner: &Pubkey) -> Result<Instruction, EnvelopeError> {
        let user_state = user_state_address(owner, &self.program_id)?;
        self.assemble(
            EnvelopeInstruction::InitUserState,
            &[
                (Role::UserState, user_state.address),
                (Role::User, *owner),
                (Role::SystemProgram, SYSTEM_PROGRAM_ID),
            ],
        )
    }

    /// `envelope_id` is the predicted id the program will assign.
    pub fn create(
        &self,
        owner: &Pubkey,
        envelope_id: u64,
        params: CreateParams,
    ) -> Result<Instruction, EnvelopeError> {
        params.validate(&self.limits)?;

        let user_state = user_state_address(owner, &self.program_id)?.address;
        let envelope = envelope_address(owner, envelope_id, &self.program_id)?.address;
        let ix = EnvelopeInstruction::Create(params);

        match self.funding {
            Funding::Native => self.assemble(
                ix,
                &[
                    (Role::UserState, user_state),
                    (Role::Envelope, envelope),
                    (Role::User, *owner),
                    (Role::SystemProgram, SYSTEM_PROGRAM_ID),
                ],
            ),
            Funding::Token { mint } => {
                let vault = vault_address(owner, envelope_id, &self.program_id)?.address;
                self.assemble(
                    ix,
                    &[
                        (Role::UserState, user_state),
                        (Role::Envelope, envelope),
                        (Role::Vault, vault),
                        (Role::UserToken, token_account(owner, &mint)?),
                        (Role::Mint, mint),
                        (Role::User, *owner),
                        (Role::TokenProgram, TOKEN_PROGRAM_ID),
                        (Role::SystemProgram, SYSTEM_PROGRAM_ID),
                    ],
                )
            }
        }
    }

    pub fn claim(
        &self,
        owner: &Pubkey,
        envelope_id: u64,
        claimer: &Pubkey,
    ) -> Result<Instruction, EnvelopeError> {
        let envelope = envelope_address(owner, envelope_id, &self.program_id)?.address;

        match self.funding {
            Funding::Native => self.assemble(
                EnvelopeInstruction::Claim,
                &[(Role::Envelope, envelope), (Role::Claimer, *claimer)],
            ),
            Funding::Token { .. } => {
                let vault = vault_address(owner, envelope_id, &self.program_id)?.address;
                let record = claim_record_address(&envelope, claimer, &self.program_id)?.address;
                self.assemble(
                    EnvelopeInstruction::Claim,
                    &[
                        (Role::Envelope, envelope),
                        (Role::Vault, vault),
                        (Role::ClaimerToken, token_account(claimer, &self.mint()?)?),
                        (Role::ClaimRecord, record),
                        (Role::Claimer, *claimer),
                        (Role::TokenProgram, TOKEN_PROGRAM_ID),
                        (Role::SystemProgram, SYSTEM_PROGRAM_ID),
                    ],
                )
            }
        }
    }

    pub fn refund(&self, owner: &Pubkey, envelope_id: u64) -> Result<Instruction, EnvelopeError> {
        let envelope = envelope_address(owner, envelope_id, &self.program_id)?.address;

        match self.funding {
            Funding::Native => self.assemble(
                EnvelopeInstruction::Refund,
                &[(Role::Envelope, envelope), (Role::Owner, *owner)],
            ),
            Funding::Token { .. } => {
                let vault = vault_address(owner, envelope_id, &self.program_id)?.address;
                self.assemble(
                    EnvelopeInstruction::Refund,
                    &[
                        (Role::Envelope, envelope),
                        (Role::Vault, vault),
                        (Role::OwnerToken, token_account(owner, &self.mint()?)?),
                        (Role::Owner, *owner),
                        (Role::TokenProgram, TOKEN_PROGRAM_ID),
                        (Role::SystemProgram, SYSTEM_PROGRAM_ID),
                    ],
                )
            }
        }
    }

    pub fn cancel(&self, owner: &Pubkey, envelope_id: u64) -> Result<Instruction, EnvelopeError> {
        let envelope = envelope_address(owner, envelope_id, &self.program_id)?.address;
        let user_state = user_state_address(owner, &self.program_id)?.address;
        self.assemble(
            EnvelopeInstruction::Cancel,
            &[
                (Role::Envelope, envelope),
                (Role::UserState, user_state),
                (Role::Owner, *owner),
            ],
        )
    }

    pub fn close(&self, owner: &Pubkey, envelope_id: u64) -> Result<Instruction, EnvelopeError> {
        let envelope = envelope_address(owner, envelope_id, &self.program_id)?.address;
        self.assemble(
            EnvelopeInstruction::Close,
            &[(Role::Envelope, envelope), (Role::Owner, *owner)],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NATIVE_DEVNET_PROGRAM_ID, TOKEN_DEVNET_PROGRAM_ID, USDC_DEVNET_MINT};

    const OWNER: Pubkey = Pubkey::new([0x11; 32]);
    const CLAIMER: Pubkey = Pubkey::new([0x22; 32]);

    fn group(amount: u64, slots: u64) -> CreateParams {
        CreateParams {
            variant: EnvelopeVariant::GroupFixed,
            total_amount: amount,
            total_slots: slots,
            expiry: 24,
        }
    }

    fn native() -> EnvelopeProgram {
        EnvelopeProgram::new(NATIVE_DEVNET_PROGRAM_ID, Funding::Native, Limits::default())
    }

    fn token() -> EnvelopeProgram {
        EnvelopeProgram::new(
            TOKEN_DEVNET_PROGRAM_ID,
            Funding::Token {
                mint: USDC_DEVNET_MINT,
            },
            Limits::default(),
        )
    }

    // -- payload layout -----------------------------------------------------------

    #[test]
    fn group_fixed_create_golden_bytes() {
        let data = EnvelopeInstruction::Create(group(1_000_000, 2)).encode(&DiscriminatorTable::new());
        let expected = hex::decode(concat!(
            "181ec828051c0777", // create
            "01",               // group_fixed
            "40420f0000000000", // 1_000_000
            "0200000000000000", // 2 slots
            "1800000000000000", // 24
        ))
        .unwrap();
        assert_eq!(data, expected);
    }

    #[test]
    fn direct_fixed_create_carries_allowed_claimer() {
        let params = CreateParams {
            variant: EnvelopeVariant::DirectFixed { allowed: CLAIMER },
            total_amount: 5,
            total_slots: 1,
            expiry: 3600,
        };
        let data = EnvelopeInstruction::Create(params).encode(&DiscriminatorTable::new());
        assert_eq!(data.len(), 8 + 1 + 32 + 24);
        assert_eq!(data[8], 0);
        assert_eq!(&data[9..41], CLAIMER.as_bytes());
        assert_eq!(&data[41..49], &5u64.to_le_bytes());
    }

    #[test]
    fn bare_operations_are_discriminator_only() {
        let table = DiscriminatorTable::new();
        for ix in [
            EnvelopeInstruction::InitUserState,
            EnvelopeInstruction::Claim,
            EnvelopeInstruction::Refund,
            EnvelopeInstruction::Cancel,
            EnvelopeInstruction::Close,
        ] {
            let data = ix.encode(&table);
            assert_eq!(data.len(), 8);
            assert_eq!(EnvelopeInstruction::decode(&data, &table).unwrap(), ix);
        }
    }

    #[test]
    fn create_decodes_back_for_every_variant() {
        let table = DiscriminatorTable::new();
        for variant in [
            EnvelopeVariant::DirectFixed { allowed: CLAIMER },
            EnvelopeVariant::GroupFixed,
            EnvelopeVariant::GroupRandom,
        ] {
            let slots = if variant.allowed().is_some() { 1 } else { 4 };
            let ix = EnvelopeInstruction::Create(CreateParams {
                variant,
                total_amount: 4_000,
                total_slots: slots,
                expiry: 86_400,
            });
            assert_eq!(EnvelopeInstruction::decode(&ix.encode(&table), &table).unwrap(), ix);
        }
    }

    // -- decode failures -------------------------------------------------------------

    #[test]
    fn decode_rejects_unknown_discriminator() {
        let err = EnvelopeInstruction::decode(&[0u8; 8], &DiscriminatorTable::new()).unwrap_err();
        assert!(err.to_string().contains("unknown instruction discriminator"));
    }

    #[test]
    fn decode_rejects_trailing_bytes_on_bare_operation() {
        let table = DiscriminatorTable::new();
        let mut data = EnvelopeInstruction::Claim.encode(&table);
        data.push(0);
        assert!(EnvelopeInstruction::decode(&data, &table).is_err());
    }

    #[test]
    fn decode_rejects_truncated_create() {
        let table = DiscriminatorTable::new();
        let data = EnvelopeInstruction::Create(group(10, 2)).encode(&table);
        assert!(EnvelopeInstruction::decode(&data[..data.len() - 1], &table).is_err());
        assert!(EnvelopeInstruction::decode(&data[..4], &table).is_err());
    }

    #[test]
    fn decode_rejects_unknown_variant_tag() {
        let table = DiscriminatorTable::new();
        let mut data = EnvelopeInstruction::Create(group(10, 2)).encode(&table);
        data[8] = 7;
        let err = EnvelopeInstruction::decode(&data, &table).unwrap_err();
        assert!(err.to_string().contains("unknown variant tag 7"));
    }

    // -- validation ------------------------------------------------------------------

    #[test]
    fn direct_fixed_requires_one_slot() {
        let params = CreateParams {
            variant: EnvelopeVariant::DirectFixed { allowed: CLAIMER },
            total_amount: 100,
            total_slots: 2,
            expiry: 1,
        };
        let err = params.validate(&Limits::default()).unwrap_err();
        assert!(err.to_string().contains("exactly 1 slot"));
    }

    #[test]
    fn zero_amount_or_slots_rejected() {
        assert!(group(0, 1).validate(&Limits::default()).is_err());
        assert!(group(10, 0).validate(&Limits::default()).is_err());
        assert!(group(1, 2).validate(&Limits::default()).is_err());
    }

    #[test]
    fn limits_are_enforced() {
        let limits = Limits {
            max_total_amount: Some(100_000_000),
            min_amount_per_slot: Some(10_000),
        };
        assert!(group(100_000_000, 10).validate(&limits).is_ok());
        assert!(group(100_000_001, 10).validate(&limits).is_err());
        assert!(group(50_000, 6).validate(&limits).is_err());
    }

    #[test]
    fn invalid_create_never_reaches_encoding() {
        let err = native().create(&OWNER, 1, group(10, 0)).unwrap_err();
        assert!(matches!(err, EnvelopeError::InvalidParams(_)));
    }

    // -- builders ----------------------------------------------------------------------

    #[test]
    fn native_create_accounts() {
        let ix = native().create(&OWNER, 1, group(1_000_000, 2)).unwrap();
        let expected_envelope = envelope_address(&OWNER, 1, &NATIVE_DEVNET_PROGRAM_ID)
            .unwrap()
            .address;

        assert_eq!(ix.program_id, NATIVE_DEVNET_PROGRAM_ID);
        assert_eq!(ix.accounts.len(), 4);
        assert_eq!(ix.accounts[1].pubkey, expected_envelope);
        assert!(ix.accounts[2].is_signer);
        assert_eq!(ix.accounts[2].pubkey, OWNER);
    }

    #[test]
    fn token_claim_accounts() {
        let program = token();
        let ix = program.claim(&OWNER, 4, &CLAIMER).unwrap();
        let envelope = envelope_address(&OWNER, 4, &TOKEN_DEVNET_PROGRAM_ID).unwrap().address;
        let record = claim_record_address(&envelope, &CLAIMER, &TOKEN_DEVNET_PROGRAM_ID)
            .unwrap()
            .address;

        assert_eq!(ix.accounts.len(), 7);
        assert_eq!(ix.accounts[0].pubkey, envelope);
        assert_eq!(
            ix.accounts[2].pubkey,
            token_account(&CLAIMER, &USDC_DEVNET_MINT).unwrap()
        );
        assert_eq!(ix.accounts[3].pubkey, record);
        assert!(ix.accounts[4].is_signer);
        assert_eq!(ix.accounts[5].pubkey, TOKEN_PROGRAM_ID);
    }

    #[test]
    fn token_create_includes_vault_and_mint() {
        let ix = token().create(&OWNER, 2, group(1_000_000, 2)).unwrap();
        assert_eq!(ix.accounts.len(), 8);
        assert_eq!(
            ix.accounts[2].pubkey,
            vault_address(&OWNER, 2, &TOKEN_DEVNET_PROGRAM_ID).unwrap().address
        );
        assert_eq!(ix.accounts[4].pubkey, USDC_DEVNET_MINT);
        assert!(!ix.accounts[4].is_writable);
    }

    #[test]
    fn native_deployment_has_no_cancel() {
        let err = native().cancel(&OWNER, 1).unwrap_err();
        assert!(matches!(err, EnvelopeError::UnsupportedOperation("cancel")));
    }

    #[test]
    fn token_cancel_and_close() {
        let program = token();
        assert_eq!(program.cancel(&OWNER, 1).unwrap().accounts.len(), 3);
        let close = program.close(&OWNER, 1).unwrap();
        assert_eq!(close.accounts.len(), 2);
        assert_eq!(
            close.data,
            program.discriminators().instruction(Operation::Close).to_vec()
        );
    }
}
