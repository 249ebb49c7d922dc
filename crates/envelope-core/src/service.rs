//! The public facade: build unsigned flows, accept signed bytes, read
//! program state.

use std::time::Duration;

use chain_sol::{Instruction, Pubkey};
use chrono::Utc;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::addresses::{claim_record_address, envelope_address, user_state_address, EnvelopeAddresses};
use crate::builder::{decode_base64, TransactionBuilder, UnsignedTransaction};
use crate::classifier::{ErrorClassifier, ProgramErrorTable};
use crate::config::EnvelopeConfig;
use crate::error::EnvelopeError;
use crate::instruction::{CreateParams, EnvelopeProgram, EnvelopeVariant};
use crate::ledger::Ledger;
use crate::lifecycle::{FlowAction, FlowState, LifecycleManager, PendingFlow, StatusReport, TransactionResult};
use crate::registry::FlowRegistry;
use crate::state::{ClaimRecord, EnvelopeAccount, UserState};

/// What a caller gets back from a `build_unsigned_*` call.
#[derive(Debug, Clone, Serialize)]
pub struct BuiltFlow {
    pub correlation_id: Uuid,
    pub action: FlowAction,
    /// Base64 of the unsigned wire bytes, ready for a wallet.
    pub transaction: String,
    #[serde(skip)]
    pub unsigned: UnsignedTransaction,
    /// Only for create; advisory until the transaction confirms.
    pub predicted_envelope_id: Option<u64>,
    pub includes_init: bool,
}

/// One client per program deployment and ledger.
pub struct EnvelopeService<L: Ledger> {
    config: EnvelopeConfig,
    ledger: L,
    program: EnvelopeProgram,
    lifecycle: LifecycleManager,
    flows: FlowRegistry,
}

impl<L: Ledger> EnvelopeService<L> {
    pub fn new(config: EnvelopeConfig, ledger: L) -> Result<Self, EnvelopeError> {
        config.validate()?;

        let program = EnvelopeProgram::new(config.program_id, config.funding, config.limits);
        let lifecycle = LifecycleManager::new(
            TransactionBuilder::new(config.verify_signatures),
            ErrorClassifier::new(ProgramErrorTable::envelope())?,
            config.confirmation,
            config.network,
        );

        info!(
            program_id = %config.program_id,
            deployment = program.schemas().deployment(),
            network = ?config.network,
            "envelope service ready"
        );

        Ok(EnvelopeService {
            config,
            ledger,
            program,
            lifecycle,
            flows: FlowRegistry::new(),
        })
    }

    pub fn config(&self) -> &EnvelopeConfig {
        &self.config
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn program(&self) -> &EnvelopeProgram {
        &self.program
    }

    pub fn pending_flows(&self) -> usize {
        self.flows.len()
    }

    pub fn flow_state(&self, correlation_id: &Uuid) -> Option<FlowState> {
        self.flows.get(correlation_id).map(|f| f.state())
    }

    // -- addresses ---------------------------------------------------------------------

    pub fn derive_addresses(
        &self,
        owner: &Pubkey,
        envelope_id: u64,
        claimer: Option<&Pubkey>,
    ) -> Result<EnvelopeAddresses, EnvelopeError> {
        EnvelopeAddresses::derive(owner, envelope_id, claimer, &self.config.program_id)
    }

    // -- unsigned flows ----------------------------------------------------------------

    pub fn build_unsigned_init(&mut self, owner: &Pubkey) -> Result<BuiltFlow, EnvelopeError> {
        let ix = self.program.init_user_state(owner)?;
        self.register(FlowAction::InitUserState, &[ix], owner)
    }

    /// Build a create, prepending `init_user_state` when the owner has no
    /// user state yet. The envelope id is predicted from the counter.
    pub fn build_unsigned_create(
        &mut self,
        owner: &Pubkey,
        variant: EnvelopeVariant,
        total_amount: u64,
        total_slots: u64,
        expiry: Duration,
    ) -> Result<BuiltFlow, EnvelopeError> {
        let params = CreateParams {
            variant,
            total_amount,
            total_slots,
            expiry: self.config.expiry_unit.encode(expiry)?,
        };
        // Fail on bad input before touching the ledger.
        params.validate(&self.config.limits)?;

        let (envelope_id, includes_init) = match self.get_user_state(owner)? {
            Some(state) => (state.next_envelope_id(), false),
            None => (1, true),
        };

        let mut instructions = Vec::with_capacity(2);
        if includes_init {
            instructions.push(self.program.init_user_state(owner)?);
        }
        instructions.push(self.program.create(owner, envelope_id, params)?);

        info!(
            owner = %owner,
            envelope_id,
            includes_init,
            variant = variant.name(),
            total_amount,
            total_slots,
            "create flow"
        );

        self.register(
            FlowAction::Create {
                envelope_id,
                includes_init,
            },
            &instructions,
            owner,
        )
    }

    /// The claimer pays the fee.
    pub fn build_unsigned_claim(
        &mut self,
        owner: &Pubkey,
        claimer: &Pubkey,
        envelope_id: u64,
    ) -> Result<BuiltFlow, EnvelopeError> {
        let ix = self.program.claim(owner, envelope_id, claimer)?;
        self.register(
            FlowAction::Claim {
                envelope_id,
                claimer: *claimer,
            },
            &[ix],
            claimer,
        )
    }

    pub fn build_unsigned_refund(
        &mut self,
        owner: &Pubkey,
        envelope_id: u64,
    ) -> Result<BuiltFlow, EnvelopeError> {
        let ix = self.program.refund(owner, envelope_id)?;
        self.register(FlowAction::Refund { envelope_id }, &[ix], owner)
    }

    pub fn build_unsigned_cancel(
        &mut self,
        owner: &Pubkey,
        envelope_id: u64,
    ) -> Result<BuiltFlow, EnvelopeError> {
        let ix = self.program.cancel(owner, envelope_id)?;
        self.register(FlowAction::Cancel { envelope_id }, &[ix], owner)
    }

    pub fn build_unsigned_close(
        &mut self,
        owner: &Pubkey,
        envelope_id: u64,
    ) -> Result<BuiltFlow, EnvelopeError> {
        let ix = self.program.close(owner, envelope_id)?;
        self.register(FlowAction::Close { envelope_id }, &[ix], owner)
    }

    fn register(
        &mut self,
        action: FlowAction,
        instructions: &[Instruction],
        fee_payer: &Pubkey,
    ) -> Result<BuiltFlow, EnvelopeError> {
        let unsigned = self
            .lifecycle
            .builder()
            .build_unsigned(&self.ledger, instructions, fee_payer)?;

        let mut flow = PendingFlow::new(action, unsigned);
        flow.hand_out()?;

        let built = BuiltFlow {
            correlation_id: flow.id(),
            action,
            transaction: flow.unsigned().to_base64(),
            unsigned: flow.unsigned().clone(),
            predicted_envelope_id: action.predicted_envelope_id(),
            includes_init: matches!(
                action,
                FlowAction::Create {
                    includes_init: true,
                    ..
                }
            ),
        };

        self.flows.prune_stale(self.config.flow_ttl(), Utc::now());
        self.flows.insert(flow);
        Ok(built)
    }

    // -- submission -------------------------------------------------------------------

    /// Submit signed bytes for a flow and wait for confirmation.
    ///
    /// The flow is consumed once the transaction has been handed to the
    /// ledger. If the bytes are refused locally (unparseable, unsigned, or
    /// for a different transaction) the flow stays and can be retried.
    pub fn submit(
        &mut self,
        correlation_id: &Uuid,
        signed: &[u8],
    ) -> Result<TransactionResult, EnvelopeError> {
        let mut flow = self.flows.take(correlation_id)?;
        let outcome = self.lifecycle.submit(&self.ledger, &mut flow, signed);

        if flow.state() == FlowState::AwaitingSignature {
            self.flows.insert(flow);
        }
        self.flows.prune_stale(self.config.flow_ttl(), Utc::now());

        let result = outcome?;
        info!(
            flow = %result.correlation_id,
            action = result.action.name(),
            status = ?result.status,
            signature = result.signature.as_deref().unwrap_or("-"),
            "flow finished"
        );
        Ok(result)
    }

    /// [`submit`](Self::submit) for a base64 transaction as wallets return it.
    pub fn submit_base64(
        &mut self,
        correlation_id: &Uuid,
        signed: &str,
    ) -> Result<TransactionResult, EnvelopeError> {
        let bytes = decode_base64(signed)?;
        self.submit(correlation_id, &bytes)
    }

    pub fn transaction_status(&self, signature: &str) -> Result<StatusReport, EnvelopeError> {
        self.lifecycle.transaction_status(&self.ledger, signature)
    }

    // -- state reads ------------------------------------------------------------------

    pub fn get_user_state(&self, owner: &Pubkey) -> Result<Option<UserState>, EnvelopeError> {
        let address = user_state_address(owner, &self.config.program_id)?.address;
        self.ledger
            .account_data(&address)?
            .map(|data| UserState::decode(&data))
            .transpose()
    }

    pub fn get_envelope(
        &self,
        owner: &Pubkey,
        envelope_id: u64,
    ) -> Result<Option<EnvelopeAccount>, EnvelopeError> {
        let address = envelope_address(owner, envelope_id, &self.config.program_id)?.address;
        self.ledger
            .account_data(&address)?
            .map(|data| EnvelopeAccount::decode(&data, &self.config.variant_layout))
            .transpose()
    }

    pub fn get_claim_record(
        &self,
        owner: &Pubkey,
        envelope_id: u64,
        claimer: &Pubkey,
    ) -> Result<Option<ClaimRecord>, EnvelopeError> {
        let envelope = envelope_address(owner, envelope_id, &self.config.program_id)?.address;
        let address = claim_record_address(&envelope, claimer, &self.config.program_id)?.address;
        self.ledger
            .account_data(&address)?
            .map(|data| ClaimRecord::decode(&data))
            .transpose()
    }
}
