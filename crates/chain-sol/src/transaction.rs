//! Legacy Solana transaction wire format.
//!
//! Transactions are compiled and parsed by hand, no `solana-sdk`. Unsigned
//! transactions carry one all-zero placeholder per required signature so
//! an external wallet can fill the slots in place.
//!
//! ```text
//! Transaction:
//!   num_signatures          compact-u16
//!   signatures              64 bytes * num_signatures
//!   message:
//!     num_required_sigs     u8
//!     num_readonly_signed   u8
//!     num_readonly_unsigned u8
//!     num_accounts          compact-u16
//!     account_keys          32 bytes * num_accounts
//!     recent_blockhash      32 bytes
//!     num_instructions      compact-u16
//!     instructions[]        (see below)
//!
//! Instruction:
//!   program_id_index        u8
//!   num_accounts            compact-u16
//!   account_indices         u8 * num_accounts
//!   data_len                compact-u16
//!   data                    u8 * data_len
//! ```

use ed25519_dalek::{Signature, VerifyingKey};

use crate::address::{Hash, Pubkey};
use crate::error::SolError;

/// Length of an Ed25519 signature.
pub const SIGNATURE_LEN: usize = 64;

/// An unfilled signature slot.
pub const PLACEHOLDER_SIGNATURE: [u8; SIGNATURE_LEN] = [0u8; SIGNATURE_LEN];

/// Accounts are referenced by `u8` index inside compiled instructions.
const MAX_ACCOUNT_KEYS: usize = 256;

// ---------------------------------------------------------------------------
// Compact-u16 encoding
// ---------------------------------------------------------------------------

/// Encode a `u16` value in Solana's compact-u16 format.
///
/// - Values 0..0x7f       -> 1 byte
/// - Values 0x80..0x3fff  -> 2 bytes
/// - Values 0x4000..      -> 3 bytes
pub fn encode_compact_u16(value: u16) -> Vec<u8> {
    let mut val = value as u32;
    let mut out = Vec::with_capacity(3);

    loop {
        let mut byte = (val & 0x7f) as u8;
        val >>= 7;
        if val > 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if val == 0 {
            break;
        }
    }

    out
}

/// Decode a compact-u16 value from a byte slice.
///
/// Returns `(value, bytes_consumed)` or an error if the data is truncated.
pub fn decode_compact_u16(data: &[u8]) -> Result<(u16, usize), SolError> {
    let mut value: u32 = 0;
    let mut consumed = 0usize;

    loop {
        let byte = *data.get(consumed).ok_or_else(|| {
            SolError::SerializationError(
                "unexpected end of data while decoding compact-u16".into(),
            )
        })?;
        value |= ((byte & 0x7f) as u32) << (7 * consumed);
        consumed += 1;

        if byte & 0x80 == 0 || consumed >= 3 {
            break;
        }
    }

    if value > u16::MAX as u32 {
        return Err(SolError::SerializationError(
            "compact-u16 value overflow".into(),
        ));
    }

    Ok((value as u16, consumed))
}

fn compact_len(len: usize, what: &str) -> Result<Vec<u8>, SolError> {
    let value = u16::try_from(len).map_err(|_| {
        SolError::SerializationError(format!("{what} count {len} exceeds compact-u16"))
    })?;
    Ok(encode_compact_u16(value))
}

// ---------------------------------------------------------------------------
// Data structures
// ---------------------------------------------------------------------------

/// A single account reference in an instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountMeta {
    pub pubkey: Pubkey,
    pub is_signer: bool,
    pub is_writable: bool,
}

impl AccountMeta {
    pub fn new(pubkey: Pubkey, is_signer: bool, is_writable: bool) -> Self {
        AccountMeta {
            pubkey,
            is_signer,
            is_writable,
        }
    }
}

/// An instruction before it is compiled into a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub program_id: Pubkey,
    pub accounts: Vec<AccountMeta>,
    pub data: Vec<u8>,
}

/// Message header: signer and read-only counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Number of required signatures (first N account keys are signers).
    pub num_required_signatures: u8,
    /// How many of the signing accounts are read-only.
    pub num_readonly_signed: u8,
    /// How many of the non-signing accounts are read-only.
    pub num_readonly_unsigned: u8,
}

/// A compiled instruction where account references are replaced by u8 indices
/// into the message's `account_keys` array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledInstruction {
    pub program_id_index: u8,
    pub account_indices: Vec<u8>,
    pub data: Vec<u8>,
}

/// A legacy transaction message: the bytes every signer signs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: MessageHeader,
    /// All account keys, in canonical order:
    ///   1. writable signers (fee payer first)
    ///   2. read-only signers
    ///   3. writable non-signers
    ///   4. read-only non-signers
    pub account_keys: Vec<Pubkey>,
    pub recent_blockhash: Hash,
    pub instructions: Vec<CompiledInstruction>,
}

/// Signatures plus message. Unfilled slots hold [`PLACEHOLDER_SIGNATURE`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub signatures: Vec<[u8; SIGNATURE_LEN]>,
    pub message: Message,
}

/// True when a signature slot has not been filled.
pub fn is_placeholder(signature: &[u8; SIGNATURE_LEN]) -> bool {
    signature.iter().all(|b| *b == 0)
}

// ---------------------------------------------------------------------------
// Message compilation
// ---------------------------------------------------------------------------

impl Message {
    /// Compile instructions, in the given order, with a single fee payer.
    ///
    /// The fee payer is always a writable signer at index 0.
    pub fn compile(
        instructions: &[Instruction],
        fee_payer: &Pubkey,
        recent_blockhash: &Hash,
    ) -> Result<Self, SolError> {
        struct AccountEntry {
            pubkey: Pubkey,
            is_signer: bool,
            is_writable: bool,
        }

        // Instruction account lists are tiny; a Vec keeps insertion order.
        let mut entries: Vec<AccountEntry> = Vec::new();
        let mut upsert = |pubkey: Pubkey, signer: bool, writable: bool| {
            if let Some(entry) = entries.iter_mut().find(|e| e.pubkey == pubkey) {
                entry.is_signer |= signer;
                entry.is_writable |= writable;
            } else {
                entries.push(AccountEntry {
                    pubkey,
                    is_signer: signer,
                    is_writable: writable,
                });
            }
        };

        upsert(*fee_payer, true, true);
        for ix in instructions {
            for meta in &ix.accounts {
                upsert(meta.pubkey, meta.is_signer, meta.is_writable);
            }
            upsert(ix.program_id, false, false);
        }

        // Stable sort: within a category insertion order is kept, so the
        // fee payer stays first among writable signers.
        entries.sort_by_key(|e| match (e.is_signer, e.is_writable) {
            (true, true) => 0u8,
            (true, false) => 1,
            (false, true) => 2,
            (false, false) => 3,
        });

        if entries.len() > MAX_ACCOUNT_KEYS {
            return Err(SolError::TransactionBuildError(format!(
                "{} account keys exceed the {MAX_ACCOUNT_KEYS} addressable by u8",
                entries.len()
            )));
        }

        let count = |pred: &dyn Fn(&AccountEntry) -> bool| entries.iter().filter(|e| pred(e)).count();
        let header = MessageHeader {
            num_required_signatures: count(&|e| e.is_signer) as u8,
            num_readonly_signed: count(&|e| e.is_signer && !e.is_writable) as u8,
            num_readonly_unsigned: count(&|e| !e.is_signer && !e.is_writable) as u8,
        };

        let account_keys: Vec<Pubkey> = entries.iter().map(|e| e.pubkey).collect();
        let index_of = |key: &Pubkey| -> Result<u8, SolError> {
            account_keys
                .iter()
                .position(|k| k == key)
                .map(|i| i as u8)
                .ok_or_else(|| {
                    SolError::TransactionBuildError(format!("{key} not in account keys"))
                })
        };

        let mut compiled = Vec::with_capacity(instructions.len());
        for ix in instructions {
            let account_indices = ix
                .accounts
                .iter()
                .map(|meta| index_of(&meta.pubkey))
                .collect::<Result<Vec<u8>, SolError>>()?;
            compiled.push(CompiledInstruction {
                program_id_index: index_of(&ix.program_id)?,
                account_indices,
                data: ix.data.clone(),
            });
        }

        Ok(Message {
            header,
            account_keys,
            recent_blockhash: *recent_blockhash,
            instructions: compiled,
        })
    }

    /// The fee payer (first account key).
    pub fn fee_payer(&self) -> Option<&Pubkey> {
        self.account_keys.first()
    }

    /// Keys that must sign, in signature-slot order.
    pub fn signer_keys(&self) -> &[Pubkey] {
        let n = (self.header.num_required_signatures as usize).min(self.account_keys.len());
        &self.account_keys[..n]
    }

    /// Whether the key at `index` is writable according to the header.
    pub fn is_writable(&self, index: usize) -> bool {
        let signers = self.header.num_required_signatures as usize;
        if index < signers {
            index < signers - self.header.num_readonly_signed as usize
        } else {
            index < self.account_keys.len() - self.header.num_readonly_unsigned as usize
        }
    }

    /// Serialize the message (the bytes that get signed).
    pub fn serialize(&self) -> Result<Vec<u8>, SolError> {
        let mut buf = Vec::with_capacity(256);

        buf.push(self.header.num_required_signatures);
        buf.push(self.header.num_readonly_signed);
        buf.push(self.header.num_readonly_unsigned);

        buf.extend_from_slice(&compact_len(self.account_keys.len(), "account key")?);
        for key in &self.account_keys {
            buf.extend_from_slice(key.as_bytes());
        }

        buf.extend_from_slice(&self.recent_blockhash.0);

        buf.extend_from_slice(&compact_len(self.instructions.len(), "instruction")?);
        for ix in &self.instructions {
            buf.push(ix.program_id_index);

            buf.extend_from_slice(&compact_len(ix.account_indices.len(), "account index")?);
            buf.extend_from_slice(&ix.account_indices);

            buf.extend_from_slice(&compact_len(ix.data.len(), "data byte")?);
            buf.extend_from_slice(&ix.data);
        }

        Ok(buf)
    }

    /// Parse a legacy message. The slice must contain exactly one message.
    pub fn deserialize(bytes: &[u8]) -> Result<Self, SolError> {
        let mut reader = Reader::new(bytes);

        let first = reader.u8()?;
        if first & 0x80 != 0 {
            return Err(SolError::SerializationError(format!(
                "versioned message (prefix {first:#04x}) is not supported"
            )));
        }
        let header = MessageHeader {
            num_required_signatures: first,
            num_readonly_signed: reader.u8()?,
            num_readonly_unsigned: reader.u8()?,
        };

        let num_keys = reader.compact_u16()? as usize;
        let mut account_keys = Vec::with_capacity(num_keys);
        for _ in 0..num_keys {
            account_keys.push(Pubkey(reader.array32()?));
        }
        if (header.num_required_signatures as usize) > num_keys
            || (header.num_readonly_signed > header.num_required_signatures)
            || (header.num_required_signatures as usize + header.num_readonly_unsigned as usize)
                > num_keys
        {
            return Err(SolError::SerializationError(
                "message header inconsistent with account key count".into(),
            ));
        }

        let recent_blockhash = Hash(reader.array32()?);

        let num_ix = reader.compact_u16()? as usize;
        let mut instructions = Vec::with_capacity(num_ix);
        for _ in 0..num_ix {
            let program_id_index = reader.u8()?;
            let n_accounts = reader.compact_u16()? as usize;
            let account_indices = reader.take(n_accounts)?.to_vec();
            let n_data = reader.compact_u16()? as usize;
            let data = reader.take(n_data)?.to_vec();

            let out_of_range = std::iter::once(&program_id_index)
                .chain(account_indices.iter())
                .any(|i| *i as usize >= num_keys);
            if out_of_range {
                return Err(SolError::SerializationError(
                    "instruction references an account index out of range".into(),
                ));
            }

            instructions.push(CompiledInstruction {
                program_id_index,
                account_indices,
                data,
            });
        }

        if reader.remaining() != 0 {
            return Err(SolError::SerializationError(format!(
                "{} trailing bytes after message",
                reader.remaining()
            )));
        }

        Ok(Message {
            header,
            account_keys,
            recent_blockhash,
            instructions,
        })
    }

    /// Rebuild the instructions with their account metas resolved.
    pub fn decompile(&self) -> Vec<Instruction> {
        let signers = self.header.num_required_signatures as usize;
        self.instructions
            .iter()
            .map(|ix| Instruction {
                program_id: self.account_keys[ix.program_id_index as usize],
                accounts: ix
                    .account_indices
                    .iter()
                    .map(|i| {
                        let i = *i as usize;
                        AccountMeta::new(self.account_keys[i], i < signers, self.is_writable(i))
                    })
                    .collect(),
                data: ix.data.clone(),
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

impl Transaction {
    /// Wrap a message with a placeholder for every required signature.
    pub fn new_unsigned(message: Message) -> Self {
        let slots = message.header.num_required_signatures as usize;
        Transaction {
            signatures: vec![PLACEHOLDER_SIGNATURE; slots],
            message,
        }
    }

    /// Serialize to wire format.
    pub fn to_wire(&self) -> Result<Vec<u8>, SolError> {
        let message = self.message.serialize()?;
        let mut wire =
            Vec::with_capacity(3 + self.signatures.len() * SIGNATURE_LEN + message.len());
        wire.extend_from_slice(&compact_len(self.signatures.len(), "signature")?);
        for sig in &self.signatures {
            wire.extend_from_slice(sig);
        }
        wire.extend_from_slice(&message);
        Ok(wire)
    }

    /// Parse wire format. Placeholder slots are accepted here; callers
    /// decide whether a missing signature is an error.
    pub fn from_wire(raw: &[u8]) -> Result<Self, SolError> {
        let (num_sigs, prefix) = decode_compact_u16(raw)?;
        let sigs_end = prefix + num_sigs as usize * SIGNATURE_LEN;
        if sigs_end > raw.len() {
            return Err(SolError::SerializationError(
                "transaction too short: signature slots exceed length".into(),
            ));
        }

        let signatures = raw[prefix..sigs_end]
            .chunks_exact(SIGNATURE_LEN)
            .map(|chunk| {
                let mut sig = [0u8; SIGNATURE_LEN];
                sig.copy_from_slice(chunk);
                sig
            })
            .collect::<Vec<_>>();

        let message = Message::deserialize(&raw[sigs_end..])?;
        if signatures.len() != message.header.num_required_signatures as usize {
            return Err(SolError::SerializationError(format!(
                "{} signature slots but message requires {}",
                signatures.len(),
                message.header.num_required_signatures
            )));
        }

        Ok(Transaction {
            signatures,
            message,
        })
    }

    /// The signature slot belonging to `key`, if `key` is a required signer.
    pub fn signature_for(&self, key: &Pubkey) -> Option<&[u8; SIGNATURE_LEN]> {
        let idx = self.message.signer_keys().iter().position(|k| k == key)?;
        self.signatures.get(idx)
    }

    /// Whether `key` has a filled (non-placeholder) signature slot.
    pub fn is_signed_by(&self, key: &Pubkey) -> bool {
        self.signature_for(key).is_some_and(|s| !is_placeholder(s))
    }

    /// Number of filled signature slots.
    pub fn present_signatures(&self) -> usize {
        self.signatures.iter().filter(|s| !is_placeholder(s)).count()
    }

    /// Required signers whose slots are still placeholders.
    pub fn missing_signers(&self) -> Vec<Pubkey> {
        self.message
            .signer_keys()
            .iter()
            .zip(&self.signatures)
            .filter(|(_, sig)| is_placeholder(sig))
            .map(|(key, _)| *key)
            .collect()
    }

    /// The transaction id: Base58 of the fee payer's signature, once present.
    pub fn id(&self) -> Option<String> {
        self.signatures
            .first()
            .filter(|s| !is_placeholder(s))
            .map(|s| bs58::encode(s).into_string())
    }

    /// Verify every filled signature against the message bytes.
    pub fn verify_signatures(&self) -> Result<(), SolError> {
        let message = self.message.serialize()?;
        for (i, (key, sig)) in self
            .message
            .signer_keys()
            .iter()
            .zip(&self.signatures)
            .enumerate()
        {
            if is_placeholder(sig) {
                continue;
            }
            let vk = VerifyingKey::from_bytes(key.as_bytes())
                .map_err(|e| SolError::InvalidPublicKey(format!("signer {i} ({key}): {e}")))?;
            vk.verify_strict(&message, &Signature::from_bytes(sig))
                .map_err(|_| {
                    SolError::SigningError(format!("signature {i} does not verify for {key}"))
                })?;
        }
        Ok(())
    }

    /// Fill the slot matching the key derived from `private_key`.
    ///
    /// Test-only path: production signing happens outside this workspace.
    #[cfg(any(test, feature = "test-signer"))]
    pub fn sign_with_seed(&mut self, private_key: &[u8; 32]) -> Result<(), SolError> {
        use ed25519_dalek::Signer;
        use zeroize::Zeroize;

        let mut seed = *private_key;
        let signing_key = ed25519_dalek::SigningKey::from_bytes(&seed);
        seed.zeroize();
        let our_pubkey = Pubkey(signing_key.verifying_key().to_bytes());

        let idx = self
            .message
            .signer_keys()
            .iter()
            .position(|k| *k == our_pubkey)
            .ok_or_else(|| {
                SolError::SigningError(format!("{our_pubkey} not found in transaction signers"))
            })?;

        let message = self.message.serialize()?;
        self.signatures[idx] = signing_key.sign(&message).to_bytes();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Bounds-checked cursor over wire bytes.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Reader { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], SolError> {
        if n > self.remaining() {
            return Err(SolError::SerializationError(format!(
                "message truncated: wanted {n} bytes at offset {}, {} left",
                self.pos,
                self.remaining()
            )));
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, SolError> {
        Ok(self.take(1)?[0])
    }

    fn array32(&mut self) -> Result<[u8; 32], SolError> {
        let mut out = [0u8; 32];
        out.copy_from_slice(self.take(32)?);
        Ok(out)
    }

    fn compact_u16(&mut self) -> Result<u16, SolError> {
        let (value, used) = decode_compact_u16(&self.data[self.pos..])?;
        self.pos += used;
        Ok(value)
    }
}
