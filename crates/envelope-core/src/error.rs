use chain_sol::SolError;
use thiserror::Error;

/// Everything the envelope client can report.
///
/// The first six variants are the remote-facing taxonomy: what a caller
/// does next depends on which one it gets (rebuild, re-read state, retry
/// the transport, or give up). The rest are local misuse or wire problems.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Address derivation exhausted: {0}")]
    AddressDerivationExhausted(String),

    #[error("Stale freshness token: {0}")]
    StaleFreshnessToken(String),

    #[error("Remote program error {code}{}: {message}", .name.map(|n| format!(" ({n})")).unwrap_or_default())]
    RemoteProgram {
        code: u32,
        name: Option<&'static str>,
        message: String,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Predicted envelope id {predicted_id} was taken before submission (program code {code})")]
    PredictedIdConflict { predicted_id: u64, code: u32 },

    /// Rejected by the node without a program error code.
    #[error("Transaction rejected: {0}")]
    Rejected(String),

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Account schema mismatch for {operation}: {reason}")]
    SchemaMismatch {
        operation: &'static str,
        reason: String,
    },

    #[error("Operation {0} is not supported by this deployment")]
    UnsupportedOperation(&'static str),

    #[error("Missing signature for {0}")]
    MissingSignature(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Unknown flow: {0}")]
    FlowNotFound(String),

    #[error("Signed transaction does not match flow {0}")]
    FlowMismatch(String),

    #[error("Invalid flow transition from {from} to {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Wire error: {0}")]
    Wire(String),
}

impl EnvelopeError {
    /// Whether a caller may retry the same request unchanged.
    ///
    /// Only transport failures qualify. A stale token or a predicted-id
    /// conflict needs a freshly built transaction instead.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EnvelopeError::Transport(_))
    }

    /// Whether the right remedy is to build a new unsigned transaction.
    pub fn needs_rebuild(&self) -> bool {
        matches!(
            self,
            EnvelopeError::StaleFreshnessToken(_) | EnvelopeError::PredictedIdConflict { .. }
        )
    }
}

impl From<SolError> for EnvelopeError {
    fn from(e: SolError) -> Self {
        match e {
            SolError::PdaExhausted => EnvelopeError::AddressDerivationExhausted(e.to_string()),
            SolError::SigningError(_) => EnvelopeError::InvalidSignature(e.to_string()),
            other => EnvelopeError::Wire(other.to_string()),
        }
    }
}
