//! Deployment configuration with TOML and environment variable support.
//!
//! Two deployments of the envelope program exist: one funds envelopes in
//! lamports, the other in an SPL token. They differ in program id, account
//! schemas, the unit of the create expiry field and creation limits, so all
//! of that lives here instead of in code.

use std::path::Path;
use std::time::Duration;

use chain_sol::Pubkey;
use serde::{Deserialize, Serialize};

use crate::error::EnvelopeError;
use crate::instruction::EnvelopeVariant;

/// Native deployment: `8sVfWmonJAzAQnS4nYcxv3GBSs4rDpvmniRrApwrh1QK`
pub const NATIVE_DEVNET_PROGRAM_ID: Pubkey = Pubkey::new([
    0x74, 0xf1, 0x42, 0x6b, 0x73, 0x5f, 0x6e, 0x92, 0xa7, 0xbb, 0x38, 0xb0, 0xaa, 0xe5, 0xa6,
    0x74, 0x03, 0x04, 0xac, 0x90, 0x4c, 0xe4, 0x90, 0xf2, 0x3e, 0xd5, 0xd3, 0xc2, 0x42, 0x23,
    0xbc, 0x98,
]);

/// Token deployment: `5DXoYSQxaJzQ1W4LqSq2nWZ12PvFsb4FHo4xWgSrchVH`
pub const TOKEN_DEVNET_PROGRAM_ID: Pubkey = Pubkey::new([
    0x3e, 0xa4, 0x8b, 0xbd, 0x1c, 0x16, 0x16, 0x76, 0xfd, 0x49, 0x18, 0x61, 0x8a, 0xa7, 0x1e,
    0x82, 0xb8, 0x2b, 0x63, 0x7c, 0x23, 0x1d, 0x6f, 0x6f, 0x19, 0x2f, 0xf6, 0xd2, 0x3a, 0x08,
    0x05, 0x70,
]);

/// Devnet USDC mint: `4zMMC9srt5Ri5X14GAgXhaHii3GnPAEERYPJgZJDncDU`
pub const USDC_DEVNET_MINT: Pubkey = Pubkey::new([
    0x3b, 0x44, 0x2c, 0xb3, 0x91, 0x21, 0x57, 0xf1, 0x3a, 0x93, 0x3d, 0x01, 0x34, 0x28, 0x2d,
    0x03, 0x2b, 0x5f, 0xfe, 0xcd, 0x01, 0xa2, 0xdb, 0xf1, 0xb7, 0x79, 0x06, 0x08, 0xdf, 0x00,
    0x2e, 0xa7,
]);

/// Mainnet USDC mint: `EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v`
pub const USDC_MAINNET_MINT: Pubkey = Pubkey::new([
    0xc6, 0xfa, 0x7a, 0xf3, 0xbe, 0xdb, 0xad, 0x3a, 0x3d, 0x65, 0xf3, 0x6a, 0xab, 0xc9, 0x74,
    0x31, 0xb1, 0xbb, 0xe4, 0xc2, 0xd2, 0xf6, 0xe0, 0xe4, 0x7c, 0xa6, 0x02, 0x03, 0x45, 0x2f,
    0x5d, 0x61,
]);

/// Slot of a `direct_fixed` envelope: tag plus the 32-byte allowed claimer.
pub const DIRECT_SLOT_WIDTH: usize = 33;

/// Slot of a group envelope as deployed: tag plus 39 bytes of padding, so
/// the amount fields that follow start on an 8-byte boundary.
pub const GROUP_SLOT_WIDTH: usize = 40;

/// Freshness tokens are valid for roughly 150 slots; anything older is dead.
pub const DEFAULT_FLOW_TTL_SECS: u64 = 150;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Network {
    Devnet,
    Testnet,
    Mainnet,
}

impl Network {
    /// Block explorer link for a transaction signature.
    pub fn explorer_url(&self, signature: &str) -> String {
        match self {
            Network::Devnet => format!("https://explorer.solana.com/tx/{signature}?cluster=devnet"),
            Network::Testnet => {
                format!("https://explorer.solana.com/tx/{signature}?cluster=testnet")
            }
            Network::Mainnet => format!("https://explorer.solana.com/tx/{signature}"),
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "devnet" => Some(Network::Devnet),
            "testnet" => Some(Network::Testnet),
            "mainnet" | "mainnet-beta" => Some(Network::Mainnet),
            _ => None,
        }
    }
}

/// What an envelope holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Funding {
    /// Lamports held directly by the envelope account.
    Native,
    /// SPL tokens of `mint` held by a per-envelope vault.
    Token { mint: Pubkey },
}

/// Unit of the `expiry` field in the create payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryUnit {
    Hours,
    Seconds,
}

impl ExpiryUnit {
    /// Convert a caller duration into the on-wire value.
    ///
    /// An hours deployment refuses durations that are not whole hours
    /// rather than rounding silently.
    pub fn encode(&self, expiry: Duration) -> Result<u64, EnvelopeError> {
        let secs = expiry.as_secs();
        if secs == 0 || expiry.subsec_nanos() != 0 {
            return Err(EnvelopeError::InvalidParams(format!(
                "expiry must be a positive whole number of seconds, got {expiry:?}"
            )));
        }
        match self {
            ExpiryUnit::Seconds => Ok(secs),
            ExpiryUnit::Hours if secs % 3600 == 0 => Ok(secs / 3600),
            ExpiryUnit::Hours => Err(EnvelopeError::InvalidParams(format!(
                "this deployment counts expiry in hours; {secs}s is not a whole hour"
            ))),
        }
    }

    /// Convert an on-wire value back into a duration.
    pub fn decode(&self, value: u64) -> Option<Duration> {
        match self {
            ExpiryUnit::Seconds => Some(Duration::from_secs(value)),
            ExpiryUnit::Hours => value.checked_mul(3600).map(Duration::from_secs),
        }
    }
}

/// How the variant field is laid out inside an envelope account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VariantLayout {
    /// Tag plus active arm only.
    Compact,
    /// Each arm occupies a fixed slot: `direct` bytes for `direct_fixed`,
    /// `group` bytes for both group arms. Bytes past the arm are filler.
    FixedSlot { direct: usize, group: usize },
}

impl Default for VariantLayout {
    fn default() -> Self {
        VariantLayout::FixedSlot {
            direct: DIRECT_SLOT_WIDTH,
            group: GROUP_SLOT_WIDTH,
        }
    }
}

impl VariantLayout {
    /// Bytes the variant occupies in an envelope account, tag included.
    pub fn slot_width(&self, variant: &EnvelopeVariant) -> usize {
        let arm_len = variant.encoded_len();
        match (self, variant) {
            (VariantLayout::Compact, _) => arm_len,
            (VariantLayout::FixedSlot { direct, .. }, EnvelopeVariant::DirectFixed { .. }) => {
                (*direct).max(arm_len)
            }
            (VariantLayout::FixedSlot { group, .. }, _) => (*group).max(arm_len),
        }
    }
}

/// Creation limits enforced before any bytes are encoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    /// Upper bound on an envelope's total amount, in base units.
    pub max_total_amount: Option<u64>,
    /// Lower bound on `total_amount / total_slots`.
    pub min_amount_per_slot: Option<u64>,
}

/// Bounded confirmation polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationPolicy {
    pub max_attempts: u32,
    pub interval_ms: u64,
}

impl Default for ConfirmationPolicy {
    fn default() -> Self {
        // 30 seconds at one status read every 2 seconds.
        ConfirmationPolicy {
            max_attempts: 15,
            interval_ms: 2000,
        }
    }
}

impl ConfirmationPolicy {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Everything that varies between envelope program deployments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeConfig {
    pub program_id: Pubkey,

    pub network: Network,

    pub funding: Funding,

    pub expiry_unit: ExpiryUnit,

    #[serde(default)]
    pub variant_layout: VariantLayout,

    #[serde(default)]
    pub limits: Limits,

    #[serde(default)]
    pub confirmation: ConfirmationPolicy,

    /// Check ed25519 signatures locally before submitting.
    #[serde(default = "default_true")]
    pub verify_signatures: bool,

    /// Pending flows older than this are pruned from the registry.
    #[serde(default = "default_flow_ttl")]
    pub flow_ttl_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_flow_ttl() -> u64 {
    DEFAULT_FLOW_TTL_SECS
}

impl EnvelopeConfig {
    /// The lamport-funded program on devnet.
    pub fn native_devnet() -> Self {
        EnvelopeConfig {
            program_id: NATIVE_DEVNET_PROGRAM_ID,
            network: Network::Devnet,
            funding: Funding::Native,
            expiry_unit: ExpiryUnit::Hours,
            variant_layout: VariantLayout::default(),
            limits: Limits {
                // 10 SOL, 0.01 SOL per claimer
                max_total_amount: Some(10_000_000_000),
                min_amount_per_slot: Some(10_000_000),
            },
            confirmation: ConfirmationPolicy::default(),
            verify_signatures: true,
            flow_ttl_secs: DEFAULT_FLOW_TTL_SECS,
        }
    }

    /// The USDC-funded program on devnet.
    pub fn token_devnet() -> Self {
        EnvelopeConfig {
            program_id: TOKEN_DEVNET_PROGRAM_ID,
            network: Network::Devnet,
            funding: Funding::Token {
                mint: USDC_DEVNET_MINT,
            },
            expiry_unit: ExpiryUnit::Seconds,
            variant_layout: VariantLayout::default(),
            limits: Limits {
                // 100 USDC, 0.01 USDC per claimer (6 decimals)
                max_total_amount: Some(100_000_000),
                min_amount_per_slot: Some(10_000),
            },
            confirmation: ConfirmationPolicy::default(),
            verify_signatures: true,
            flow_ttl_secs: DEFAULT_FLOW_TTL_SECS,
        }
    }

    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, EnvelopeError> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            EnvelopeError::Config(format!(
                "failed to read {}: {e}",
                path.as_ref().display()
            ))
        })?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self, EnvelopeError> {
        let config: EnvelopeConfig = toml::from_str(contents)
            .map_err(|e| EnvelopeError::Config(format!("failed to parse TOML config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Environment variables override file values.
    pub fn from_env(&mut self) -> Result<(), EnvelopeError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `ENVELOPE_*` overrides from any key lookup, then re-validate.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), EnvelopeError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(id) = lookup("ENVELOPE_PROGRAM_ID") {
            self.program_id = Pubkey::from_base58(&id)
                .map_err(|e| EnvelopeError::Config(format!("invalid ENVELOPE_PROGRAM_ID: {e}")))?;
        }

        if let Some(network) = lookup("ENVELOPE_NETWORK") {
            self.network = Network::parse(&network).ok_or_else(|| {
                EnvelopeError::Config(format!("invalid ENVELOPE_NETWORK: {network}"))
            })?;
        }

        if let Some(attempts) = lookup("ENVELOPE_CONFIRM_MAX_ATTEMPTS") {
            self.confirmation.max_attempts = attempts.parse().map_err(|e| {
                EnvelopeError::Config(format!("invalid ENVELOPE_CONFIRM_MAX_ATTEMPTS: {e}"))
            })?;
        }

        if let Some(interval) = lookup("ENVELOPE_CONFIRM_INTERVAL_MS") {
            self.confirmation.interval_ms = interval.parse().map_err(|e| {
                EnvelopeError::Config(format!("invalid ENVELOPE_CONFIRM_INTERVAL_MS: {e}"))
            })?;
        }

        self.validate()
    }

    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), EnvelopeError> {
        if self.confirmation.max_attempts == 0 {
            return Err(EnvelopeError::Config(
                "confirmation.max_attempts must be > 0".into(),
            ));
        }
        if let VariantLayout::FixedSlot { direct, group } = self.variant_layout {
            if direct < DIRECT_SLOT_WIDTH {
                return Err(EnvelopeError::Config(format!(
                    "variant_layout direct slot {direct} cannot hold a direct_fixed variant ({DIRECT_SLOT_WIDTH})"
                )));
            }
            if group == 0 {
                return Err(EnvelopeError::Config(
                    "variant_layout group slot must hold at least the tag byte".into(),
                ));
            }
        }
        if self.limits.max_total_amount == Some(0) {
            return Err(EnvelopeError::Config(
                "limits.max_total_amount must be > 0".into(),
            ));
        }
        if let (Some(max), Some(min)) = (
            self.limits.max_total_amount,
            self.limits.min_amount_per_slot,
        ) {
            if min > max {
                return Err(EnvelopeError::Config(format!(
                    "limits.min_amount_per_slot ({min}) exceeds limits.max_total_amount ({max})"
                )));
            }
        }
        if self.flow_ttl_secs == 0 {
            return Err(EnvelopeError::Config("flow_ttl_secs must be > 0".into()));
        }
        if let Funding::Token { mint } = self.funding {
            if mint == Pubkey::default() {
                return Err(EnvelopeError::Config("token funding needs a mint".into()));
            }
        }
        Ok(())
    }

    pub fn is_token(&self) -> bool {
        matches!(self.funding, Funding::Token { .. })
    }

    pub fn flow_ttl(&self) -> Duration {
        Duration::from_secs(self.flow_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    // -- presets ------------------------------------------------------------

    #[test]
    fn preset_ids_match_base58() {
        assert_eq!(
            NATIVE_DEVNET_PROGRAM_ID.to_base58(),
            "8sVfWmonJAzAQnS4nYcxv3GBSs4rDpvmniRrApwrh1QK"
        );
        assert_eq!(
            TOKEN_DEVNET_PROGRAM_ID.to_base58(),
            "5DXoYSQxaJzQ1W4LqSq2nWZ12PvFsb4FHo4xWgSrchVH"
        );
        assert_eq!(
            USDC_DEVNET_MINT.to_base58(),
            "4zMMC9srt5Ri5X14GAgXhaHii3GnPAEERYPJgZJDncDU"
        );
        assert_eq!(
            USDC_MAINNET_MINT.to_base58(),
            "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v"
        );
    }

    #[test]
    fn presets_validate() {
        assert!(EnvelopeConfig::native_devnet().validate().is_ok());
        assert!(EnvelopeConfig::token_devnet().validate().is_ok());
        assert!(EnvelopeConfig::token_devnet().is_token());
        assert!(!EnvelopeConfig::native_devnet().is_token());
    }

    // -- TOML ---------------------------------------------------------------

    #[test]
    fn minimal_toml_uses_defaults() {
        let config = EnvelopeConfig::from_toml_str(
            r#"
            program_id = "8sVfWmonJAzAQnS4nYcxv3GBSs4rDpvmniRrApwrh1QK"
            network = "devnet"
            expiry_unit = "hours"

            [funding]
            kind = "native"
            "#,
        )
        .unwrap();

        assert_eq!(config.program_id, NATIVE_DEVNET_PROGRAM_ID);
        assert_eq!(
            config.variant_layout,
            VariantLayout::FixedSlot {
                direct: 33,
                group: 40
            }
        );
        assert_eq!(config.confirmation, ConfirmationPolicy::default());
        assert!(config.verify_signatures);
        assert_eq!(config.flow_ttl_secs, DEFAULT_FLOW_TTL_SECS);
        assert_eq!(config.limits, Limits::default());
    }

    #[test]
    fn full_token_toml() {
        let config = EnvelopeConfig::from_toml_str(
            r#"
            program_id = "5DXoYSQxaJzQ1W4LqSq2nWZ12PvFsb4FHo4xWgSrchVH"
            network = "mainnet"
            expiry_unit = "seconds"
            verify_signatures = false
            flow_ttl_secs = 60

            [funding]
            kind = "token"
            mint = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v"

            [variant_layout]
            kind = "compact"

            [limits]
            max_total_amount = 100000000
            min_amount_per_slot = 10000

            [confirmation]
            max_attempts = 5
            interval_ms = 500
            "#,
        )
        .unwrap();

        assert_eq!(
            config.funding,
            Funding::Token {
                mint: USDC_MAINNET_MINT
            }
        );
        assert_eq!(config.variant_layout, VariantLayout::Compact);
        assert_eq!(config.confirmation.interval(), Duration::from_millis(500));
        assert!(!config.verify_signatures);
        assert_eq!(config.network, Network::Mainnet);
    }

    #[test]
    fn narrow_slot_width_is_rejected() {
        let err = EnvelopeConfig::from_toml_str(
            r#"
            program_id = "8sVfWmonJAzAQnS4nYcxv3GBSs4rDpvmniRrApwrh1QK"
            network = "devnet"
            expiry_unit = "hours"

            [funding]
            kind = "native"

            [variant_layout]
            kind = "fixed_slot"
            direct = 9
            group = 40
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("direct slot 9"));
    }

    #[test]
    fn bad_program_id_is_a_config_error() {
        let err = EnvelopeConfig::from_toml_str(
            r#"
            program_id = "not-base58!"
            network = "devnet"
            expiry_unit = "hours"
            [funding]
            kind = "native"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, EnvelopeError::Config(_)));
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = EnvelopeConfig::from_file("/nonexistent/envelope.toml").unwrap_err();
        assert!(err.to_string().contains("failed to read"));
    }

    // -- validation -----------------------------------------------------------

    #[test]
    fn zero_attempts_rejected() {
        let mut config = EnvelopeConfig::native_devnet();
        config.confirmation.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn min_above_max_rejected() {
        let mut config = EnvelopeConfig::native_devnet();
        config.limits.min_amount_per_slot = Some(20_000_000_000);
        assert!(config.validate().is_err());
    }

    #[test]
    fn token_without_mint_rejected() {
        let mut config = EnvelopeConfig::token_devnet();
        config.funding = Funding::Token {
            mint: Pubkey::default(),
        };
        assert!(config.validate().is_err());
    }

    // -- overrides ------------------------------------------------------------

    #[test]
    fn overrides_replace_values() {
        let vars: HashMap<&str, &str> = [
            ("ENVELOPE_NETWORK", "mainnet-beta"),
            ("ENVELOPE_CONFIRM_MAX_ATTEMPTS", "3"),
            ("ENVELOPE_CONFIRM_INTERVAL_MS", "10"),
        ]
        .into_iter()
        .collect();

        let mut config = EnvelopeConfig::native_devnet();
        config
            .apply_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.network, Network::Mainnet);
        assert_eq!(config.confirmation.max_attempts, 3);
        assert_eq!(config.confirmation.interval_ms, 10);
    }

    #[test]
    fn invalid_override_is_reported() {
        let mut config = EnvelopeConfig::native_devnet();
        let err = config
            .apply_overrides(|k| (k == "ENVELOPE_CONFIRM_MAX_ATTEMPTS").then(|| "many".into()))
            .unwrap_err();
        assert!(err.to_string().contains("ENVELOPE_CONFIRM_MAX_ATTEMPTS"));
    }

    // -- units and layout -------------------------------------------------------

    #[test]
    fn hours_unit_encodes_whole_hours_only() {
        assert_eq!(ExpiryUnit::Hours.encode(Duration::from_secs(7200)).unwrap(), 2);
        assert!(ExpiryUnit::Hours.encode(Duration::from_secs(5400)).is_err());
        assert_eq!(ExpiryUnit::Seconds.encode(Duration::from_secs(5400)).unwrap(), 5400);
    }

    #[test]
    fn zero_or_fractional_expiry_rejected() {
        assert!(ExpiryUnit::Seconds.encode(Duration::ZERO).is_err());
        assert!(ExpiryUnit::Seconds.encode(Duration::from_millis(1500)).is_err());
    }

    #[test]
    fn expiry_decode_inverts_encode() {
        assert_eq!(ExpiryUnit::Hours.decode(24), Some(Duration::from_secs(86_400)));
        assert_eq!(ExpiryUnit::Hours.decode(u64::MAX), None);
    }

    #[test]
    fn slot_width_per_arm() {
        let direct = EnvelopeVariant::DirectFixed {
            allowed: Pubkey::new([7; 32]),
        };
        let fixed = VariantLayout::default();
        assert_eq!(fixed.slot_width(&direct), 33);
        assert_eq!(fixed.slot_width(&EnvelopeVariant::GroupFixed), 40);
        assert_eq!(fixed.slot_width(&EnvelopeVariant::GroupRandom), 40);
        assert_eq!(VariantLayout::Compact.slot_width(&direct), 33);
        assert_eq!(VariantLayout::Compact.slot_width(&EnvelopeVariant::GroupFixed), 1);
    }

    #[test]
    fn explorer_urls() {
        assert_eq!(
            Network::Devnet.explorer_url("abc"),
            "https://explorer.solana.com/tx/abc?cluster=devnet"
        );
        assert_eq!(
            Network::Mainnet.explorer_url("abc"),
            "https://explorer.solana.com/tx/abc"
        );
    }
}
