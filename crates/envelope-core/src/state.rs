//! Decoders for the program's account data.
//!
//! Every record starts with an 8-byte account discriminator, skipped here,
//! followed by little-endian fixed-width fields in declaration order. The
//! only irregular field is the envelope variant; see [`VariantLayout`].
//!
//! ```text
//! UserState        disc 8 | owner 32 | last_envelope_id 8                     = 48
//! ClaimRecord      disc 8 | claimer 32 | envelope_id 8 | amount 8 | at i64 8  = 64
//! EnvelopeAccount  disc 8 | owner 32 | envelope_id 8 | variant slot
//!                  | total_amount 8 | total_slots 8 | withdrawn 8
//!                  | claimed_count 8 | expiry i64 8 | cancelled 1
//! ```
//!
//! As deployed the variant slot is 33 bytes for `direct_fixed` (122 byte
//! account) and 40 bytes for the group arms (129 byte account).

use chain_sol::Pubkey;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::VariantLayout;
use crate::discriminator::{AccountKind, DiscriminatorTable};
use crate::error::EnvelopeError;
use crate::instruction::EnvelopeVariant;

const DISCRIMINATOR_LEN: usize = 8;

pub const USER_STATE_LEN: usize = 48;
pub const CLAIM_RECORD_LEN: usize = 64;

/// Envelope bytes before and after the variant slot.
const ENVELOPE_HEAD_LEN: usize = DISCRIMINATOR_LEN + 32 + 8;
const ENVELOPE_TAIL_LEN: usize = 8 * 5 + 1;

/// Minimum envelope length under `layout` for the given variant.
pub fn envelope_len(layout: &VariantLayout, variant: &EnvelopeVariant) -> usize {
    ENVELOPE_HEAD_LEN + layout.slot_width(variant) + ENVELOPE_TAIL_LEN
}

// ---------------------------------------------------------------------------
// Reading helpers
// ---------------------------------------------------------------------------

struct Fields<'a> {
    data: &'a [u8],
    offset: usize,
    record: &'static str,
}

impl<'a> Fields<'a> {
    fn after_discriminator(data: &'a [u8], record: &'static str, min_len: usize) -> Result<Self, EnvelopeError> {
        if data.len() < min_len {
            return Err(EnvelopeError::Decode(format!(
                "{record} is {} bytes, need at least {min_len}",
                data.len()
            )));
        }
        Ok(Fields {
            data,
            offset: DISCRIMINATOR_LEN,
            record,
        })
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], EnvelopeError> {
        let out = self
            .data
            .get(self.offset..self.offset + n)
            .ok_or_else(|| {
                EnvelopeError::Decode(format!(
                    "{} truncated at offset {} (wanted {n} bytes of {})",
                    self.record,
                    self.offset,
                    self.data.len()
                ))
            })?;
        self.offset += n;
        Ok(out)
    }

    fn pubkey(&mut self) -> Result<Pubkey, EnvelopeError> {
        let mut key = [0u8; 32];
        key.copy_from_slice(self.take(32)?);
        Ok(Pubkey(key))
    }

    fn u64(&mut self) -> Result<u64, EnvelopeError> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(buf))
    }

    fn i64(&mut self) -> Result<i64, EnvelopeError> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(i64::from_le_bytes(buf))
    }

    fn bool(&mut self) -> Result<bool, EnvelopeError> {
        match self.take(1)?[0] {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(EnvelopeError::Decode(format!(
                "{} has invalid bool byte {other} at offset {}",
                self.record,
                self.offset - 1
            ))),
        }
    }

    fn rest(&self) -> &'a [u8] {
        &self.data[self.offset.min(self.data.len())..]
    }
}

// ---------------------------------------------------------------------------
// UserState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UserState {
    pub owner: Pubkey,
    pub last_envelope_id: u64,
}

impl UserState {
    pub fn decode(data: &[u8]) -> Result<Self, EnvelopeError> {
        let mut f = Fields::after_discriminator(data, "user state", USER_STATE_LEN)?;
        Ok(UserState {
            owner: f.pubkey()?,
            last_envelope_id: f.u64()?,
        })
    }

    pub fn encode(&self, table: &DiscriminatorTable) -> Vec<u8> {
        let mut out = Vec::with_capacity(USER_STATE_LEN);
        out.extend_from_slice(&table.account(AccountKind::UserState));
        out.extend_from_slice(self.owner.as_bytes());
        out.extend_from_slice(&self.last_envelope_id.to_le_bytes());
        out
    }

    /// The id the program will assign next. Advisory: another create for
    /// the same owner can land first.
    pub fn next_envelope_id(&self) -> u64 {
        self.last_envelope_id.saturating_add(1)
    }
}

// ---------------------------------------------------------------------------
// EnvelopeAccount
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EnvelopeAccount {
    pub owner: Pubkey,
    pub envelope_id: u64,
    pub variant: EnvelopeVariant,
    pub total_amount: u64,
    pub total_slots: u64,
    pub withdrawn_amount: u64,
    pub claimed_count: u64,
    /// Unix seconds.
    pub expiry: i64,
    pub cancelled: bool,
}

impl EnvelopeAccount {
    pub fn decode(data: &[u8], layout: &VariantLayout) -> Result<Self, EnvelopeError> {
        // Smallest possible record: one-byte variant, no filler.
        let mut f = Fields::after_discriminator(data, "envelope", ENVELOPE_HEAD_LEN + 1 + ENVELOPE_TAIL_LEN)?;
        let owner = f.pubkey()?;
        let envelope_id = f.u64()?;

        let (variant, _) = EnvelopeVariant::decode(f.rest())?;
        let needed = envelope_len(layout, &variant);
        if data.len() < needed {
            return Err(EnvelopeError::Decode(format!(
                "envelope with {} variant is {} bytes, need at least {needed}",
                variant.name(),
                data.len()
            )));
        }
        f.take(layout.slot_width(&variant))?;

        let account = EnvelopeAccount {
            owner,
            envelope_id,
            variant,
            total_amount: f.u64()?,
            total_slots: f.u64()?,
            withdrawn_amount: f.u64()?,
            claimed_count: f.u64()?,
            expiry: f.i64()?,
            cancelled: f.bool()?,
        };
        account.check_invariants()?;
        Ok(account)
    }

    /// Inverse of [`decode`](Self::decode), filler bytes zeroed.
    pub fn encode(&self, layout: &VariantLayout, table: &DiscriminatorTable) -> Vec<u8> {
        let mut out = Vec::with_capacity(envelope_len(layout, &self.variant));
        out.extend_from_slice(&table.account(AccountKind::Envelope));
        out.extend_from_slice(self.owner.as_bytes());
        out.extend_from_slice(&self.envelope_id.to_le_bytes());

        self.variant.encode_into(&mut out);
        let filler = layout.slot_width(&self.variant) - self.variant.encoded_len();
        out.resize(out.len() + filler, 0);

        out.extend_from_slice(&self.total_amount.to_le_bytes());
        out.extend_from_slice(&self.total_slots.to_le_bytes());
        out.extend_from_slice(&self.withdrawn_amount.to_le_bytes());
        out.extend_from_slice(&self.claimed_count.to_le_bytes());
        out.extend_from_slice(&self.expiry.to_le_bytes());
        out.push(self.cancelled as u8);
        out
    }

    fn check_invariants(&self) -> Result<(), EnvelopeError> {
        if self.withdrawn_amount > self.total_amount {
            return Err(EnvelopeError::Decode(format!(
                "envelope {} withdrew {} of {}",
                self.envelope_id, self.withdrawn_amount, self.total_amount
            )));
        }
        if self.claimed_count > self.total_slots {
            return Err(EnvelopeError::Decode(format!(
                "envelope {} has {} claims for {} slots",
                self.envelope_id, self.claimed_count, self.total_slots
            )));
        }
        Ok(())
    }

    pub fn remaining_amount(&self) -> u64 {
        self.total_amount - self.withdrawn_amount
    }

    pub fn remaining_slots(&self) -> u64 {
        self.total_slots - self.claimed_count
    }

    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expiry
    }

    pub fn is_claimable(&self, now: i64) -> bool {
        !self.cancelled
            && !self.is_expired(now)
            && self.remaining_slots() > 0
            && self.remaining_amount() > 0
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.expiry, 0)
    }

    pub fn summary(&self, now: i64) -> EnvelopeSummary {
        EnvelopeSummary {
            owner: self.owner,
            envelope_id: self.envelope_id,
            variant: self.variant.name(),
            allowed: self.variant.allowed().copied(),
            total_amount: self.total_amount,
            total_slots: self.total_slots,
            withdrawn_amount: self.withdrawn_amount,
            claimed_count: self.claimed_count,
            remaining_amount: self.remaining_amount(),
            remaining_slots: self.remaining_slots(),
            expires_at: self
                .expires_at()
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| self.expiry.to_string()),
            expired: self.is_expired(now),
            cancelled: self.cancelled,
            claimable: self.is_claimable(now),
        }
    }
}

/// Display view of an envelope at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvelopeSummary {
    pub owner: Pubkey,
    pub envelope_id: u64,
    pub variant: &'static str,
    pub allowed: Option<Pubkey>,
    pub total_amount: u64,
    pub total_slots: u64,
    pub withdrawn_amount: u64,
    pub claimed_count: u64,
    pub remaining_amount: u64,
    pub remaining_slots: u64,
    pub expires_at: String,
    pub expired: bool,
    pub cancelled: bool,
    pub claimable: bool,
}

// ---------------------------------------------------------------------------
// ClaimRecord
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClaimRecord {
    pub claimer: Pubkey,
    pub envelope_id: u64,
    pub amount: u64,
    /// Unix seconds.
    pub claimed_at: i64,
}

impl ClaimRecord {
    pub fn decode(data: &[u8]) -> Result<Self, EnvelopeError> {
        let mut f = Fields::after_discriminator(data, "claim record", CLAIM_RECORD_LEN)?;
        Ok(ClaimRecord {
            claimer: f.pubkey()?,
            envelope_id: f.u64()?,
            amount: f.u64()?,
            claimed_at: f.i64()?,
        })
    }

    pub fn encode(&self, table: &DiscriminatorTable) -> Vec<u8> {
        let mut out = Vec::with_capacity(CLAIM_RECORD_LEN);
        out.extend_from_slice(&table.account(AccountKind::ClaimRecord));
        out.extend_from_slice(self.claimer.as_bytes());
        out.extend_from_slice(&self.envelope_id.to_le_bytes());
        out.extend_from_slice(&self.amount.to_le_bytes());
        out.extend_from_slice(&self.claimed_at.to_le_bytes());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::{CreateParams, EnvelopeInstruction};

    const OWNER: Pubkey = Pubkey::new([0x11; 32]);
    const ALLOWED: Pubkey = Pubkey::new([0x22; 32]);

    fn group_envelope() -> EnvelopeAccount {
        EnvelopeAccount {
            owner: OWNER,
            envelope_id: 3,
            variant: EnvelopeVariant::GroupFixed,
            total_amount: 1_000_000,
            total_slots: 2,
            withdrawn_amount: 500_000,
            claimed_count: 1,
            expiry: 1_700_000_000,
            cancelled: false,
        }
    }

    /// Hand-assembled envelope bytes, independent of `encode`.
    fn golden_envelope(variant_bytes: &[u8]) -> Vec<u8> {
        let mut bytes = vec![112, 57, 15, 110, 139, 224, 53, 33];
        bytes.extend_from_slice(&[0x11; 32]);
        bytes.extend_from_slice(&[3, 0, 0, 0, 0, 0, 0, 0]);
        bytes.extend_from_slice(variant_bytes);
        bytes.extend_from_slice(&[0x40, 0x42, 0x0f, 0, 0, 0, 0, 0]); // 1_000_000
        bytes.extend_from_slice(&[2, 0, 0, 0, 0, 0, 0, 0]);
        bytes.extend_from_slice(&[0x20, 0xa1, 0x07, 0, 0, 0, 0, 0]); // 500_000
        bytes.extend_from_slice(&[1, 0, 0, 0, 0, 0, 0, 0]);
        bytes.extend_from_slice(&[0x00, 0xf1, 0x53, 0x65, 0, 0, 0, 0]); // 1_700_000_000
        bytes.push(0);
        bytes
    }

    // -- golden bytes: fixed slot ------------------------------------------------------

    #[test]
    fn fixed_slot_group_variant_skips_filler() {
        let mut variant = vec![1u8];
        variant.extend_from_slice(&[0xEE; 39]); // filler, content ignored
        let bytes = golden_envelope(&variant);
        assert_eq!(bytes.len(), 129);

        let decoded = EnvelopeAccount::decode(&bytes, &VariantLayout::default()).unwrap();
        assert_eq!(decoded, group_envelope());
    }

    #[test]
    fn fixed_slot_direct_variant_has_no_filler() {
        let mut variant = vec![0u8];
        variant.extend_from_slice(&[0x22; 32]);
        let mut bytes = golden_envelope(&variant);
        // Direct envelopes have a single slot.
        bytes[8 + 32 + 8 + 33 + 8] = 1;
        bytes[8 + 32 + 8 + 33 + 24] = 0;
        bytes[8 + 32 + 8 + 33 + 16..8 + 32 + 8 + 33 + 24].copy_from_slice(&0u64.to_le_bytes());

        let decoded = EnvelopeAccount::decode(&bytes, &VariantLayout::default()).unwrap();
        assert_eq!(decoded.variant, EnvelopeVariant::DirectFixed { allowed: ALLOWED });
        assert_eq!(decoded.total_slots, 1);
        assert_eq!(decoded.total_amount, 1_000_000);
        assert_eq!(decoded.withdrawn_amount, 0);
    }

    #[test]
    fn fixed_slot_encode_matches_golden() {
        let mut variant = vec![1u8];
        variant.extend_from_slice(&[0u8; 39]);
        let table = DiscriminatorTable::new();
        assert_eq!(
            group_envelope().encode(&VariantLayout::default(), &table),
            golden_envelope(&variant)
        );
    }

    // -- golden bytes: deployed accounts ----------------------------------------------

    const GROUP_RANDOM_ACCOUNT: &str = concat!(
        "70390f6e8be03521111111111111111111111111111111111111111111111111",
        "1111111111111111030000000000000002000000000000000000000000000000",
        "00000000000000000000000000000000000000000000000040420f0000000000",
        "040000000000000090d0030000000000010000000000000000f1536500000000",
        "00",
    );

    const DIRECT_FIXED_ACCOUNT: &str = concat!(
        "70390f6e8be03521111111111111111111111111111111111111111111111111",
        "1111111111111111070000000000000000222222222222222222222222222222",
        "2222222222222222222222222222222222404b4c000000000001000000000000",
        "000000000000000000000000000000000000d2496b0000000001",
    );

    #[test]
    fn deployed_group_random_account() {
        let bytes = hex::decode(GROUP_RANDOM_ACCOUNT).unwrap();
        assert_eq!(bytes.len(), 129);

        let layout = VariantLayout::default();
        let account = EnvelopeAccount::decode(&bytes, &layout).unwrap();
        assert_eq!(account.owner, OWNER);
        assert_eq!(account.envelope_id, 3);
        assert_eq!(account.variant, EnvelopeVariant::GroupRandom);
        assert_eq!(account.total_amount, 1_000_000);
        assert_eq!(account.total_slots, 4);
        assert_eq!(account.withdrawn_amount, 250_000);
        assert_eq!(account.claimed_count, 1);
        assert_eq!(account.expiry, 1_700_000_000);
        assert!(!account.cancelled);
        assert_eq!(envelope_len(&layout, &account.variant), 129);
        assert_eq!(account.encode(&layout, &DiscriminatorTable::new()), bytes);
    }

    #[test]
    fn deployed_direct_fixed_account() {
        let bytes = hex::decode(DIRECT_FIXED_ACCOUNT).unwrap();
        assert_eq!(bytes.len(), 122);

        let layout = VariantLayout::default();
        let account = EnvelopeAccount::decode(&bytes, &layout).unwrap();
        assert_eq!(account.owner, OWNER);
        assert_eq!(account.envelope_id, 7);
        assert_eq!(account.variant, EnvelopeVariant::DirectFixed { allowed: ALLOWED });
        assert_eq!(account.total_amount, 5_000_000);
        assert_eq!(account.total_slots, 1);
        assert_eq!(account.withdrawn_amount, 0);
        assert_eq!(account.claimed_count, 0);
        assert_eq!(account.expiry, 1_800_000_000);
        assert!(account.cancelled);
        assert_eq!(envelope_len(&layout, &account.variant), 122);
        assert_eq!(account.encode(&layout, &DiscriminatorTable::new()), bytes);
    }

    #[test]
    fn group_account_is_not_read_with_a_direct_sized_slot() {
        let bytes = hex::decode(GROUP_RANDOM_ACCOUNT).unwrap();
        let narrow = VariantLayout::FixedSlot {
            direct: 33,
            group: 33,
        };
        let misread = EnvelopeAccount::decode(&bytes, &narrow);
        assert_ne!(misread.ok().map(|a| a.total_amount), Some(1_000_000));
    }

    // -- golden bytes: compact -------------------------------------------------------------

    #[test]
    fn compact_group_variant_reads_fields_immediately() {
        let bytes = golden_envelope(&[1]);
        assert_eq!(bytes.len(), 90);
        let decoded = EnvelopeAccount::decode(&bytes, &VariantLayout::Compact).unwrap();
        assert_eq!(decoded, group_envelope());
        assert_eq!(
            decoded.encode(&VariantLayout::Compact, &DiscriminatorTable::new()),
            bytes
        );
    }

    #[test]
    fn layouts_disagree_on_the_same_bytes() {
        // Compact bytes read with a fixed slot are too short.
        let bytes = golden_envelope(&[1]);
        assert!(EnvelopeAccount::decode(&bytes, &VariantLayout::default()).is_err());
    }

    // -- decode failures ----------------------------------------------------------------

    #[test]
    fn short_envelope_is_a_decode_error() {
        let bytes = golden_envelope(&[1]);
        let err = EnvelopeAccount::decode(&bytes[..60], &VariantLayout::Compact).unwrap_err();
        assert!(matches!(err, EnvelopeError::Decode(_)));
    }

    #[test]
    fn unknown_variant_tag_is_rejected() {
        let bytes = golden_envelope(&[9]);
        let err = EnvelopeAccount::decode(&bytes, &VariantLayout::Compact).unwrap_err();
        assert!(err.to_string().contains("unknown variant tag 9"));
    }

    #[test]
    fn invalid_bool_is_rejected() {
        let mut bytes = golden_envelope(&[1]);
        let last = bytes.len() - 1;
        bytes[last] = 2;
        let err = EnvelopeAccount::decode(&bytes, &VariantLayout::Compact).unwrap_err();
        assert!(err.to_string().contains("invalid bool byte 2"));
    }

    #[test]
    fn overdrawn_envelope_is_protocol_drift() {
        let mut account = group_envelope();
        account.withdrawn_amount = account.total_amount + 1;
        let bytes = account.encode(&VariantLayout::Compact, &DiscriminatorTable::new());
        let err = EnvelopeAccount::decode(&bytes, &VariantLayout::Compact).unwrap_err();
        assert!(err.to_string().contains("withdrew"));
    }

    #[test]
    fn overclaimed_envelope_is_protocol_drift() {
        let mut account = group_envelope();
        account.claimed_count = 3;
        let bytes = account.encode(&VariantLayout::Compact, &DiscriminatorTable::new());
        assert!(EnvelopeAccount::decode(&bytes, &VariantLayout::Compact).is_err());
    }

    // -- derived values ----------------------------------------------------------------

    #[test]
    fn remaining_after_one_of_two_claims() {
        let table = DiscriminatorTable::new();
        let create = EnvelopeInstruction::Create(CreateParams {
            variant: EnvelopeVariant::GroupFixed,
            total_amount: 1_000_000,
            total_slots: 2,
            expiry: 24,
        });
        let EnvelopeInstruction::Create(params) =
            EnvelopeInstruction::decode(&create.encode(&table), &table).unwrap()
        else {
            panic!("create did not decode as create");
        };

        let account = EnvelopeAccount {
            owner: OWNER,
            envelope_id: 1,
            variant: params.variant,
            total_amount: params.total_amount,
            total_slots: params.total_slots,
            withdrawn_amount: 500_000,
            claimed_count: 1,
            expiry: 1_700_000_000,
            cancelled: false,
        };
        let layout = VariantLayout::default();
        let decoded = EnvelopeAccount::decode(&account.encode(&layout, &table), &layout).unwrap();

        assert_eq!(decoded.remaining_amount(), 500_000);
        assert_eq!(decoded.remaining_slots(), 1);
    }

    #[test]
    fn expiry_and_claimability() {
        let account = group_envelope();
        assert!(account.is_claimable(account.expiry - 1));
        assert!(account.is_expired(account.expiry));
        assert!(!account.is_claimable(account.expiry));

        let cancelled = EnvelopeAccount {
            cancelled: true,
            ..account
        };
        assert!(!cancelled.is_claimable(0));
    }

    #[test]
    fn summary_renders_rfc3339_expiry() {
        let summary = group_envelope().summary(0);
        assert_eq!(summary.expires_at, "2023-11-14T22:13:20+00:00");
        assert_eq!(summary.variant, "group_fixed");
        assert_eq!(summary.remaining_amount, 500_000);
        assert!(summary.claimable);

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["owner"], OWNER.to_base58());
        assert!(json["allowed"].is_null());
    }

    // -- user state / claim record --------------------------------------------------------

    #[test]
    fn user_state_golden_bytes() {
        let mut bytes = vec![72, 177, 85, 249, 76, 167, 186, 126];
        bytes.extend_from_slice(&[0x11; 32]);
        bytes.extend_from_slice(&[5, 0, 0, 0, 0, 0, 0, 0]);

        let state = UserState::decode(&bytes).unwrap();
        assert_eq!(state.owner, OWNER);
        assert_eq!(state.last_envelope_id, 5);
        assert_eq!(state.next_envelope_id(), 6);
        assert_eq!(state.encode(&DiscriminatorTable::new()), bytes);
    }

    #[test]
    fn user_state_tolerates_trailing_space() {
        let mut bytes = UserState {
            owner: OWNER,
            last_envelope_id: 0,
        }
        .encode(&DiscriminatorTable::new());
        bytes.extend_from_slice(&[0u8; 16]);
        assert_eq!(UserState::decode(&bytes).unwrap().next_envelope_id(), 1);
    }

    #[test]
    fn short_user_state_is_rejected() {
        let err = UserState::decode(&[0u8; 47]).unwrap_err();
        assert!(err.to_string().contains("need at least 48"));
    }

    #[test]
    fn claim_record_decodes() {
        let record = ClaimRecord {
            claimer: ALLOWED,
            envelope_id: 3,
            amount: 250_000,
            claimed_at: 1_700_000_100,
        };
        let bytes = record.encode(&DiscriminatorTable::new());
        assert_eq!(bytes.len(), CLAIM_RECORD_LEN);
        assert_eq!(&bytes[..8], &[57, 229, 0, 9, 65, 62, 96, 7]);
        assert_eq!(ClaimRecord::decode(&bytes).unwrap(), record);
        assert!(ClaimRecord::decode(&bytes[..63]).is_err());
    }
}
