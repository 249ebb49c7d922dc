//! Client for the on-chain envelope program.
//!
//! An envelope escrows an amount for a set of claimers until an expiry.
//! This crate never holds keys. It builds unsigned transactions, hands them
//! to an external signer, takes the signed bytes back, submits them and
//! reports a structured outcome.
//!
//! Layers, bottom up:
//! - [`discriminator`], [`addresses`], [`schema`], [`instruction`],
//!   [`state`]: the program's wire format
//! - [`builder`]: unsigned transaction assembly and signed intake
//! - [`classifier`]: RPC error text to [`classifier::Classification`]
//! - [`lifecycle`], [`registry`]: flow state machine and polling
//! - [`service`]: the facade most callers want
//!
//! All network access goes through the [`ledger::Ledger`] trait.

pub mod addresses;
pub mod builder;
pub mod classifier;
pub mod config;
pub mod discriminator;
pub mod error;
pub mod instruction;
pub mod ledger;
pub mod lifecycle;
pub mod registry;
pub mod schema;
pub mod service;
pub mod state;
pub mod telemetry;

pub use addresses::{EnvelopeAddresses, ProgramAddress};
pub use builder::{decode_base64, TransactionBuilder, UnsignedTransaction};
pub use classifier::{
    Classification, ClassifiedError, CodeMatcher, ErrorClassifier, KnownError, ProgramErrorTable,
};
pub use config::{
    ConfirmationPolicy, EnvelopeConfig, ExpiryUnit, Funding, Limits, Network, VariantLayout,
};
pub use discriminator::{AccountKind, DiscriminatorTable, Operation};
pub use error::EnvelopeError;
pub use instruction::{CreateParams, EnvelopeInstruction, EnvelopeProgram, EnvelopeVariant};
pub use ledger::{Ledger, LedgerError, SignatureStatus};
pub use lifecycle::{
    FlowAction, FlowState, LifecycleManager, PendingFlow, StatusReport, SubmitFailure,
    TransactionResult, TransactionStatus,
};
pub use registry::FlowRegistry;
pub use service::{BuiltFlow, EnvelopeService};
pub use state::{ClaimRecord, EnvelopeAccount, EnvelopeSummary, UserState};
pub use telemetry::init_tracing;

pub use chain_sol::{Hash, Pubkey};
