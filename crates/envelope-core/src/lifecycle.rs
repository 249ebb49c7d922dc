//! Flow state machine, submission and bounded confirmation polling.
//!
//! ```text
//! Built -> AwaitingSignature -> Submitted -> Confirmed
//!                                         -> Failed
//!                                         -> Expired
//!                                         -> TimedOut -> Confirmed | Failed
//! ```
//!
//! `TimedOut` only means polling gave up. The transaction may still land,
//! so callers re-query with [`LifecycleManager::transaction_status`].

use std::fmt;
use std::thread;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::builder::{TransactionBuilder, UnsignedTransaction};
use crate::classifier::{Classification, ClassifiedError, ErrorClassifier};
use crate::config::{ConfirmationPolicy, Network};
use crate::error::EnvelopeError;
use crate::ledger::{Ledger, LedgerError, SignatureStatus};

/// System program "account already in use".
pub const ACCOUNT_IN_USE_CODE: u32 = 0;
/// Anchor `ConstraintSeeds`: the passed envelope address is not the one the
/// program derives from its own counter.
pub const CONSTRAINT_SEEDS_CODE: u32 = 2006;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowState {
    Built,
    AwaitingSignature,
    Submitted,
    Confirmed,
    Failed,
    Expired,
    TimedOut,
}

impl FlowState {
    pub fn name(&self) -> &'static str {
        match self {
            FlowState::Built => "built",
            FlowState::AwaitingSignature => "awaiting_signature",
            FlowState::Submitted => "submitted",
            FlowState::Confirmed => "confirmed",
            FlowState::Failed => "failed",
            FlowState::Expired => "expired",
            FlowState::TimedOut => "timed_out",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FlowState::Confirmed | FlowState::Failed | FlowState::Expired
        )
    }

    pub fn can_transition_to(&self, next: FlowState) -> bool {
        use FlowState::*;
        matches!(
            (self, next),
            (Built, AwaitingSignature)
                | (AwaitingSignature, Submitted)
                | (Submitted, Confirmed | Failed | Expired | TimedOut)
                | (TimedOut, Confirmed | Failed)
        )
    }
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What a flow is meant to do on-chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum FlowAction {
    InitUserState,
    Create {
        /// Predicted, not authoritative.
        envelope_id: u64,
        includes_init: bool,
    },
    Claim {
        envelope_id: u64,
        claimer: chain_sol::Pubkey,
    },
    Refund {
        envelope_id: u64,
    },
    Cancel {
        envelope_id: u64,
    },
    Close {
        envelope_id: u64,
    },
}

impl FlowAction {
    pub fn name(&self) -> &'static str {
        match self {
            FlowAction::InitUserState => "init_user_state",
            FlowAction::Create { .. } => "create",
            FlowAction::Claim { .. } => "claim",
            FlowAction::Refund { .. } => "refund",
            FlowAction::Cancel { .. } => "cancel",
            FlowAction::Close { .. } => "close",
        }
    }

    pub fn predicted_envelope_id(&self) -> Option<u64> {
        match self {
            FlowAction::Create { envelope_id, .. } => Some(*envelope_id),
            _ => None,
        }
    }
}

/// One unsigned transaction waiting for its signed counterpart.
///
/// Lives in memory only; it carries no authority.
#[derive(Debug, Clone)]
pub struct PendingFlow {
    id: Uuid,
    action: FlowAction,
    unsigned: UnsignedTransaction,
    state: FlowState,
    created_at: DateTime<Utc>,
}

impl PendingFlow {
    pub fn new(action: FlowAction, unsigned: UnsignedTransaction) -> Self {
        Self::created_at(action, unsigned, Utc::now())
    }

    pub fn created_at(action: FlowAction, unsigned: UnsignedTransaction, at: DateTime<Utc>) -> Self {
        PendingFlow {
            id: Uuid::new_v4(),
            action,
            unsigned,
            state: FlowState::Built,
            created_at: at,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn action(&self) -> &FlowAction {
        &self.action
    }

    pub fn unsigned(&self) -> &UnsignedTransaction {
        &self.unsigned
    }

    pub fn state(&self) -> FlowState {
        self.state
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.created_at
    }

    pub fn transition(&mut self, next: FlowState) -> Result<(), EnvelopeError> {
        if !self.state.can_transition_to(next) {
            return Err(EnvelopeError::InvalidTransition {
                from: self.state.name(),
                to: next.name(),
            });
        }
        debug!(flow = %self.id, from = %self.state, to = %next, "flow transition");
        self.state = next;
        Ok(())
    }

    /// Mark the unsigned bytes as handed out. Handing out again is a no-op.
    pub fn hand_out(&mut self) -> Result<&UnsignedTransaction, EnvelopeError> {
        if self.state != FlowState::AwaitingSignature {
            self.transition(FlowState::AwaitingSignature)?;
        }
        Ok(&self.unsigned)
    }
}

/// Remote outcome of a submission that did not confirm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SubmitFailure {
    /// The blockhash aged out; build a new transaction.
    Expired { message: String },
    Program {
        code: u32,
        name: Option<&'static str>,
        message: String,
    },
    /// The predicted envelope id was taken; re-read state and rebuild.
    PredictedIdConflict { predicted_id: u64, code: u32 },
    Rejected { message: String },
    Transport { message: String },
}

impl From<SubmitFailure> for EnvelopeError {
    fn from(f: SubmitFailure) -> Self {
        match f {
            SubmitFailure::Expired { message } => EnvelopeError::StaleFreshnessToken(message),
            SubmitFailure::Program {
                code,
                name,
                message,
            } => EnvelopeError::RemoteProgram {
                code,
                name,
                message,
            },
            SubmitFailure::PredictedIdConflict { predicted_id, code } => {
                EnvelopeError::PredictedIdConflict { predicted_id, code }
            }
            SubmitFailure::Rejected { message } => EnvelopeError::Rejected(message),
            SubmitFailure::Transport { message } => EnvelopeError::Transport(message),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Confirmed,
    Finalized,
    Failed,
    Expired,
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionResult {
    pub correlation_id: Uuid,
    pub action: FlowAction,
    /// `None` when the transaction never reached the ledger.
    pub signature: Option<String>,
    pub status: TransactionStatus,
    pub slot: Option<u64>,
    pub failure: Option<SubmitFailure>,
    pub logs: Vec<String>,
    pub explorer_url: Option<String>,
}

impl TransactionResult {
    /// `Ok` for confirmed and timed-out results, the failure otherwise.
    pub fn into_result(self) -> Result<Self, EnvelopeError> {
        match (&self.status, &self.failure) {
            (TransactionStatus::Failed | TransactionStatus::Expired, Some(f)) => {
                Err(f.clone().into())
            }
            (TransactionStatus::Failed | TransactionStatus::Expired, None) => Err(
                EnvelopeError::Rejected(format!("{} failed", self.action.name())),
            ),
            _ => Ok(self),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self.status,
            TransactionStatus::Confirmed | TransactionStatus::Finalized
        )
    }
}

/// One-shot status read for a signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub signature: String,
    pub status: SignatureStatus,
    /// Slots since inclusion.
    pub confirmations: Option<u64>,
    /// False while the node has not included the signature yet.
    pub settled: bool,
    pub error: Option<ClassifiedError>,
    pub explorer_url: String,
}

enum PollOutcome {
    Confirmed { slot: u64, finalized: bool },
    Errored { slot: u64, detail: String },
    TimedOut,
}

pub struct LifecycleManager {
    builder: TransactionBuilder,
    classifier: ErrorClassifier,
    policy: ConfirmationPolicy,
    network: Network,
}

impl LifecycleManager {
    pub fn new(
        builder: TransactionBuilder,
        classifier: ErrorClassifier,
        policy: ConfirmationPolicy,
        network: Network,
    ) -> Self {
        LifecycleManager {
            builder,
            classifier,
            policy,
            network,
        }
    }

    pub fn builder(&self) -> &TransactionBuilder {
        &self.builder
    }

    pub fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    /// Check signed bytes against the flow, send them and wait.
    ///
    /// Local problems (bad bytes, wrong transaction, missing signature)
    /// return `Err` and leave the flow untouched. Once the transaction is
    /// sent every outcome is a `TransactionResult`.
    pub fn submit<L: Ledger + ?Sized>(
        &self,
        ledger: &L,
        flow: &mut PendingFlow,
        signed: &[u8],
    ) -> Result<TransactionResult, EnvelopeError> {
        if flow.state() != FlowState::AwaitingSignature {
            return Err(EnvelopeError::InvalidTransition {
                from: flow.state().name(),
                to: FlowState::Submitted.name(),
            });
        }

        let transaction = self.builder.parse_signed(signed)?;
        if transaction.message != flow.unsigned().transaction.message {
            return Err(EnvelopeError::FlowMismatch(flow.id().to_string()));
        }

        flow.transition(FlowState::Submitted)?;
        let local_signature = transaction.id();

        let wire = transaction.to_wire()?;
        match ledger.send_transaction(&wire) {
            Ok(signature) => {
                info!(flow = %flow.id(), action = flow.action().name(), %signature, "transaction submitted");
                self.confirm(ledger, flow, signature)
            }
            Err(LedgerError::Rejected(raw)) => {
                let classified = self.classifier.classify(&raw);
                warn!(flow = %flow.id(), classification = ?classified.classification, "submission rejected");
                self.fail(flow, local_signature, None, classified)
            }
            Err(LedgerError::Transport(raw)) => {
                warn!(flow = %flow.id(), error = %raw, "submission transport failure");
                flow.transition(FlowState::Failed)?;
                Ok(self.result(
                    flow,
                    None,
                    TransactionStatus::Failed,
                    None,
                    Some(SubmitFailure::Transport { message: raw }),
                    Vec::new(),
                ))
            }
        }
    }

    fn confirm<L: Ledger + ?Sized>(
        &self,
        ledger: &L,
        flow: &mut PendingFlow,
        signature: String,
    ) -> Result<TransactionResult, EnvelopeError> {
        match self.poll(ledger, &signature) {
            PollOutcome::Confirmed { slot, finalized } => {
                flow.transition(FlowState::Confirmed)?;
                let status = if finalized {
                    TransactionStatus::Finalized
                } else {
                    TransactionStatus::Confirmed
                };
                Ok(self.result(flow, Some(signature), status, Some(slot), None, Vec::new()))
            }
            PollOutcome::Errored { slot, detail } => {
                let classified = self.classifier.classify(&detail);
                warn!(flow = %flow.id(), %signature, classification = ?classified.classification, "transaction failed on-chain");
                self.fail(flow, Some(signature), Some(slot), classified)
            }
            PollOutcome::TimedOut => {
                warn!(
                    flow = %flow.id(),
                    %signature,
                    attempts = self.policy.max_attempts,
                    "confirmation polling exhausted"
                );
                flow.transition(FlowState::TimedOut)?;
                Ok(self.result(flow, Some(signature), TransactionStatus::TimedOut, None, None, Vec::new()))
            }
        }
    }

    /// At most `max_attempts` reads, sleeping between reads but not after
    /// the last one. Transport errors use up an attempt and are retried.
    fn poll<L: Ledger + ?Sized>(&self, ledger: &L, signature: &str) -> PollOutcome {
        let attempts = self.policy.max_attempts;
        for attempt in 1..=attempts {
            match ledger.signature_status(signature) {
                Ok(SignatureStatus::Pending) => {
                    debug!(%signature, attempt, attempts, "still pending");
                }
                Ok(SignatureStatus::Confirmed { slot }) => {
                    return PollOutcome::Confirmed {
                        slot,
                        finalized: false,
                    }
                }
                Ok(SignatureStatus::Finalized { slot }) => {
                    return PollOutcome::Confirmed {
                        slot,
                        finalized: true,
                    }
                }
                Ok(SignatureStatus::Errored { slot, detail }) => {
                    return PollOutcome::Errored { slot, detail }
                }
                Err(e) => {
                    warn!(%signature, attempt, attempts, error = e.raw(), "status read failed");
                }
            }
            if attempt < attempts {
                thread::sleep(self.policy.interval());
            }
        }
        PollOutcome::TimedOut
    }

    fn fail(
        &self,
        flow: &mut PendingFlow,
        signature: Option<String>,
        slot: Option<u64>,
        classified: ClassifiedError,
    ) -> Result<TransactionResult, EnvelopeError> {
        let (state, status, failure) = self.failure_for(flow.action(), &classified);
        flow.transition(state)?;
        Ok(self.result(flow, signature, status, slot, Some(failure), classified.logs))
    }

    fn failure_for(
        &self,
        action: &FlowAction,
        classified: &ClassifiedError,
    ) -> (FlowState, TransactionStatus, SubmitFailure) {
        let message = classified.message();
        match &classified.classification {
            Classification::Expired => (
                FlowState::Expired,
                TransactionStatus::Expired,
                SubmitFailure::Expired { message },
            ),
            Classification::ProgramError { code, known } => {
                let failure = match action.predicted_envelope_id() {
                    Some(predicted_id)
                        if *code == ACCOUNT_IN_USE_CODE || *code == CONSTRAINT_SEEDS_CODE =>
                    {
                        SubmitFailure::PredictedIdConflict {
                            predicted_id,
                            code: *code,
                        }
                    }
                    _ => SubmitFailure::Program {
                        code: *code,
                        name: known.map(|k| k.name),
                        message: known.map(|k| k.message.to_string()).unwrap_or(message),
                    },
                };
                (FlowState::Failed, TransactionStatus::Failed, failure)
            }
            _ => (
                FlowState::Failed,
                TransactionStatus::Failed,
                SubmitFailure::Rejected { message },
            ),
        }
    }

    fn result(
        &self,
        flow: &PendingFlow,
        signature: Option<String>,
        status: TransactionStatus,
        slot: Option<u64>,
        failure: Option<SubmitFailure>,
        logs: Vec<String>,
    ) -> TransactionResult {
        TransactionResult {
            correlation_id: flow.id(),
            action: *flow.action(),
            explorer_url: signature.as_deref().map(|s| self.network.explorer_url(s)),
            signature,
            status,
            slot,
            failure,
            logs,
        }
    }

    /// One status read plus the current slot for confirmation depth.
    pub fn transaction_status<L: Ledger + ?Sized>(
        &self,
        ledger: &L,
        signature: &str,
    ) -> Result<StatusReport, EnvelopeError> {
        let status = ledger.signature_status(signature)?;
        let confirmations = match status.slot() {
            Some(slot) => Some(ledger.current_slot()?.saturating_sub(slot)),
            None => None,
        };
        let error = match &status {
            SignatureStatus::Errored { detail, .. } => Some(self.classifier.classify(detail)),
            _ => None,
        };
        Ok(StatusReport {
            signature: signature.to_string(),
            settled: status.is_settled(),
            status,
            confirmations,
            error,
            explorer_url: self.network.explorer_url(signature),
        })
    }
}
