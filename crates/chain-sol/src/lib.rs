//! Solana wire primitives for the envelope client.
//!
//! Address derivation, well-known program ids and the legacy transaction
//! wire format, implemented by hand without `solana-sdk` (which drags in
//! tokio and 200+ transitive dependencies). `ed25519-dalek` verifies
//! signatures, `curve25519-dalek` answers the on-curve question for
//! program-derived addresses, and `bs58` handles Base58.
//!
//! Nothing in this crate performs I/O or holds a private key outside the
//! `test-signer` feature.

pub mod address;
pub mod error;
pub mod pda;
pub mod programs;
pub mod transaction;

// Re-export key public types for ergonomic imports.
pub use address::{address_to_bytes, bytes_to_address, Hash, Pubkey};
pub use error::SolError;
pub use pda::{create_program_address, find_program_address, is_on_curve};
pub use programs::{
    derive_associated_token_address, ASSOCIATED_TOKEN_PROGRAM_ID, SYSTEM_PROGRAM_ID,
    TOKEN_PROGRAM_ID,
};
pub use transaction::{
    decode_compact_u16, encode_compact_u16, is_placeholder, AccountMeta, CompiledInstruction,
    Instruction, Message, MessageHeader, Transaction, PLACEHOLDER_SIGNATURE, SIGNATURE_LEN,
};
