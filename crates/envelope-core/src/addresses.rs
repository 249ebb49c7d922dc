//! Seed families for every program-owned account.
//!
//! ```text
//! user state     ["user_state", owner]
//! envelope       ["envelope", owner, id_le8]
//! envelope vault ["envelope_vault", owner, id_le8]
//! claim record   ["claim", envelope, claimer]
//! ```

use chain_sol::{derive_associated_token_address, find_program_address, Pubkey};
use serde::Serialize;

use crate::error::EnvelopeError;

pub const USER_STATE_SEED: &[u8] = b"user_state";
pub const ENVELOPE_SEED: &[u8] = b"envelope";
pub const VAULT_SEED: &[u8] = b"envelope_vault";
pub const CLAIM_SEED: &[u8] = b"claim";

/// A derived address together with its canonical bump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgramAddress {
    pub address: Pubkey,
    pub bump: u8,
}

fn derive(seeds: &[&[u8]], program_id: &Pubkey, what: &str) -> Result<ProgramAddress, EnvelopeError> {
    find_program_address(seeds, program_id)
        .map(|(address, bump)| ProgramAddress { address, bump })
        .map_err(|e| match EnvelopeError::from(e) {
            EnvelopeError::AddressDerivationExhausted(msg) => {
                EnvelopeError::AddressDerivationExhausted(format!("{what}: {msg}"))
            }
            other => other,
        })
}

pub fn user_state_address(owner: &Pubkey, program_id: &Pubkey) -> Result<ProgramAddress, EnvelopeError> {
    derive(&[USER_STATE_SEED, owner.as_ref()], program_id, "user state")
}

pub fn envelope_address(
    owner: &Pubkey,
    envelope_id: u64,
    program_id: &Pubkey,
) -> Result<ProgramAddress, EnvelopeError> {
    derive(
        &[ENVELOPE_SEED, owner.as_ref(), &envelope_id.to_le_bytes()],
        program_id,
        "envelope",
    )
}

pub fn vault_address(
    owner: &Pubkey,
    envelope_id: u64,
    program_id: &Pubkey,
) -> Result<ProgramAddress, EnvelopeError> {
    derive(
        &[VAULT_SEED, owner.as_ref(), &envelope_id.to_le_bytes()],
        program_id,
        "envelope vault",
    )
}

/// Keyed on the envelope address, which already encodes owner and id.
pub fn claim_record_address(
    envelope: &Pubkey,
    claimer: &Pubkey,
    program_id: &Pubkey,
) -> Result<ProgramAddress, EnvelopeError> {
    derive(
        &[CLAIM_SEED, envelope.as_ref(), claimer.as_ref()],
        program_id,
        "claim record",
    )
}

pub fn token_account(wallet: &Pubkey, mint: &Pubkey) -> Result<Pubkey, EnvelopeError> {
    Ok(derive_associated_token_address(wallet, mint)?)
}

/// Every program-owned address involved with one envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvelopeAddresses {
    pub user_state: ProgramAddress,
    pub envelope: ProgramAddress,
    pub vault: ProgramAddress,
    /// Only known once a claimer is named.
    pub claim_record: Option<ProgramAddress>,
}

impl EnvelopeAddresses {
    pub fn derive(
        owner: &Pubkey,
        envelope_id: u64,
        claimer: Option<&Pubkey>,
        program_id: &Pubkey,
    ) -> Result<Self, EnvelopeError> {
        let envelope = envelope_address(owner, envelope_id, program_id)?;
        let claim_record = claimer
            .map(|c| claim_record_address(&envelope.address, c, program_id))
            .transpose()?;
        Ok(EnvelopeAddresses {
            user_state: user_state_address(owner, program_id)?,
            envelope,
            vault: vault_address(owner, envelope_id, program_id)?,
            claim_record,
        })
    }
}
