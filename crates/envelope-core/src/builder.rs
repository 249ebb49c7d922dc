//! Unsigned transaction assembly and signed transaction intake.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chain_sol::{Hash, Instruction, Message, Pubkey, Transaction};
use tracing::{debug, info};

use crate::error::EnvelopeError;
use crate::ledger::Ledger;

/// A transaction ready to leave for an external signer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTransaction {
    pub transaction: Transaction,
    /// Wire bytes with every signature slot zeroed.
    pub wire: Vec<u8>,
    pub blockhash: Hash,
    pub fee_payer: Pubkey,
    /// Keys that must sign, in slot order.
    pub signers: Vec<Pubkey>,
}

impl UnsignedTransaction {
    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.wire)
    }

    pub fn message(&self) -> &Message {
        &self.transaction.message
    }
}

pub fn decode_base64(encoded: &str) -> Result<Vec<u8>, EnvelopeError> {
    BASE64
        .decode(encoded.trim())
        .map_err(|e| EnvelopeError::Wire(format!("invalid base64 transaction: {e}")))
}

#[derive(Debug, Clone, Copy)]
pub struct TransactionBuilder {
    verify_signatures: bool,
}

impl TransactionBuilder {
    pub fn new(verify_signatures: bool) -> Self {
        TransactionBuilder { verify_signatures }
    }

    /// Compile `instructions` in the given order with placeholder
    /// signatures.
    ///
    /// The blockhash is fetched last, right before compiling, so the token
    /// is as fresh as possible when the bytes reach the signer.
    pub fn build_unsigned<L: Ledger + ?Sized>(
        &self,
        ledger: &L,
        instructions: &[Instruction],
        fee_payer: &Pubkey,
    ) -> Result<UnsignedTransaction, EnvelopeError> {
        if instructions.is_empty() {
            return Err(EnvelopeError::InvalidParams(
                "a transaction needs at least one instruction".into(),
            ));
        }

        let blockhash = ledger.latest_blockhash()?;
        let message = Message::compile(instructions, fee_payer, &blockhash)?;
        let transaction = Transaction::new_unsigned(message);
        let wire = transaction.to_wire()?;
        let signers = transaction.message.signer_keys().to_vec();

        info!(
            fee_payer = %fee_payer,
            blockhash = %blockhash,
            instructions = instructions.len(),
            signers = signers.len(),
            size = wire.len(),
            "unsigned transaction built"
        );

        Ok(UnsignedTransaction {
            transaction,
            wire,
            blockhash,
            fee_payer: *fee_payer,
            signers,
        })
    }

    /// Parse externally signed bytes. The fee payer's slot must be filled.
    pub fn parse_signed(&self, wire: &[u8]) -> Result<Transaction, EnvelopeError> {
        let transaction = Transaction::from_wire(wire)?;

        let fee_payer = *transaction
            .message
            .fee_payer()
            .ok_or_else(|| EnvelopeError::Wire("transaction has no account keys".into()))?;
        if !transaction.is_signed_by(&fee_payer) {
            return Err(EnvelopeError::MissingSignature(fee_payer.to_base58()));
        }

        if self.verify_signatures {
            transaction
                .verify_signatures()
                .map_err(|e| EnvelopeError::InvalidSignature(e.to_string()))?;
        }

        debug!(
            fee_payer = %fee_payer,
            present = transaction.present_signatures(),
            missing = transaction.missing_signers().len(),
            "signed transaction parsed"
        );
        Ok(transaction)
    }
}
