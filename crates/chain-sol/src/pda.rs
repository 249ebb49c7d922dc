//! Program Derived Address (PDA) search.
//!
//! A PDA is `SHA-256(seed_0 || ... || seed_n || bump || program_id ||
//! "ProgramDerivedAddress")` for the first bump (255 counting down) whose
//! hash is NOT a valid Ed25519 point. Off-curve addresses have no private
//! key, so only the owning program can authorize them.

use sha2::{Digest, Sha256};

use crate::address::Pubkey;
use crate::error::SolError;

/// The string appended to PDA derivation: "ProgramDerivedAddress".
const PDA_MARKER: &[u8] = b"ProgramDerivedAddress";

/// Maximum length of a single seed, in bytes.
pub const MAX_SEED_LEN: usize = 32;

/// Maximum number of seeds (the bump counts as one more).
pub const MAX_SEEDS: usize = 16;

/// Find the canonical program address and bump for `seeds` under `program_id`.
///
/// Deterministic: identical inputs always yield identical `(address, bump)`.
/// Running out of bumps is reported as [`SolError::PdaExhausted`]; callers
/// should treat it as a configuration failure.
pub fn find_program_address(
    seeds: &[&[u8]],
    program_id: &Pubkey,
) -> Result<(Pubkey, u8), SolError> {
    check_seeds(seeds)?;

    for bump in (0u8..=255).rev() {
        if let Some(address) = try_create_program_address(seeds, bump, program_id) {
            return Ok((address, bump));
        }
    }

    Err(SolError::PdaExhausted)
}

/// Recreate a PDA from a known bump. Returns an error if the result lands on
/// the curve (the bump is not valid for these seeds).
pub fn create_program_address(
    seeds: &[&[u8]],
    bump: u8,
    program_id: &Pubkey,
) -> Result<Pubkey, SolError> {
    check_seeds(seeds)?;
    try_create_program_address(seeds, bump, program_id).ok_or_else(|| {
        SolError::InvalidSeeds(format!("bump {bump} yields an on-curve address"))
    })
}

fn check_seeds(seeds: &[&[u8]]) -> Result<(), SolError> {
    if seeds.len() >= MAX_SEEDS {
        return Err(SolError::InvalidSeeds(format!(
            "{} seeds given, at most {} allowed",
            seeds.len(),
            MAX_SEEDS - 1
        )));
    }
    if let Some((i, seed)) = seeds
        .iter()
        .enumerate()
        .find(|(_, s)| s.len() > MAX_SEED_LEN)
    {
        return Err(SolError::InvalidSeeds(format!(
            "seed {i} is {} bytes, max is {MAX_SEED_LEN}",
            seed.len()
        )));
    }
    Ok(())
}

/// Returns `Some(address)` if the derived point is OFF the Ed25519 curve,
/// `None` if it falls on the curve.
fn try_create_program_address(seeds: &[&[u8]], bump: u8, program_id: &Pubkey) -> Option<Pubkey> {
    let mut hasher = Sha256::new();

    for seed in seeds {
        hasher.update(seed);
    }
    hasher.update([bump]);
    hasher.update(program_id.as_bytes());
    hasher.update(PDA_MARKER);

    let hash: [u8; 32] = hasher.finalize().into();

    if is_on_curve(&hash) {
        return None;
    }

    Some(Pubkey(hash))
}

/// Check if 32 bytes decompress to a valid Ed25519 curve point.
pub fn is_on_curve(bytes: &[u8; 32]) -> bool {
    curve25519_dalek::edwards::CompressedEdwardsY(*bytes)
        .decompress()
        .is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn program() -> Pubkey {
        Pubkey::new([0x5A; 32])
    }

    #[test]
    fn pda_is_not_on_curve() {
        let (addr, _) = find_program_address(&[b"envelope", &[0xAA; 32]], &program()).unwrap();
        assert!(!is_on_curve(addr.as_bytes()), "PDA must NOT be on the Ed25519 curve");
    }

    #[test]
    fn derivation_is_deterministic() {
        let owner = [0x11u8; 32];
        let id = 1u64.to_le_bytes();
        let a = find_program_address(&[b"envelope", &owner, &id], &program()).unwrap();
        let b = find_program_address(&[b"envelope", &owner, &id], &program()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn different_ids_give_different_addresses() {
        let owner = [0x11u8; 32];
        let a = find_program_address(&[b"envelope", &owner, &1u64.to_le_bytes()], &program())
            .unwrap();
        let b = find_program_address(&[b"envelope", &owner, &2u64.to_le_bytes()], &program())
            .unwrap();
        assert_ne!(a.0, b.0);
    }

    #[test]
    fn different_programs_give_different_addresses() {
        let seeds: [&[u8]; 2] = [b"user_state", &[0x22; 32]];
        let a = find_program_address(&seeds, &Pubkey::new([1; 32])).unwrap();
        let b = find_program_address(&seeds, &Pubkey::new([2; 32])).unwrap();
        assert_ne!(a.0, b.0);
    }

    #[test]
    fn create_with_found_bump_reproduces_address() {
        let seeds: [&[u8]; 2] = [b"user_state", &[0x33; 32]];
        let (addr, bump) = find_program_address(&seeds, &program()).unwrap();
        let again = create_program_address(&seeds, bump, &program()).unwrap();
        assert_eq!(addr, again);
    }

    #[test]
    fn found_bump_is_the_highest_off_curve_bump() {
        let seeds: [&[u8]; 2] = [b"claim", &[0x44; 32]];
        let (_, bump) = find_program_address(&seeds, &program()).unwrap();
        for higher in (bump as u16 + 1)..=255 {
            assert!(
                try_create_program_address(&seeds, higher as u8, &program()).is_none(),
                "bump {higher} should have been on-curve"
            );
        }
    }

    #[test]
    fn oversized_seed_is_rejected() {
        let long = [0u8; 33];
        let err = find_program_address(&[&long], &program()).unwrap_err();
        assert!(matches!(err, SolError::InvalidSeeds(_)));
    }

    #[test]
    fn too_many_seeds_are_rejected() {
        let seed: &[u8] = b"x";
        let seeds = vec![seed; MAX_SEEDS];
        assert!(find_program_address(&seeds, &program()).is_err());
    }

    #[test]
    fn is_on_curve_accepts_basepoint() {
        // The Ed25519 basepoint (compressed form).
        let mut basepoint = [0x66u8; 32];
        basepoint[0] = 0x58;
        assert!(is_on_curve(&basepoint));
    }

    #[test]
    fn real_public_key_is_on_curve() {
        use rand::rngs::OsRng;
        let key = ed25519_dalek::SigningKey::generate(&mut OsRng);
        assert!(is_on_curve(&key.verifying_key().to_bytes()));
    }
}
