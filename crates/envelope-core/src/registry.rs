//! In-memory correlation store for flows awaiting a signature.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::error::EnvelopeError;
use crate::lifecycle::PendingFlow;

/// Flows keyed by correlation id.
///
/// A flow leaves the registry when it is submitted or when it outlives the
/// freshness window of its blockhash, whichever comes first.
#[derive(Debug, Default)]
pub struct FlowRegistry {
    flows: HashMap<Uuid, PendingFlow>,
}

impl FlowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, flow: PendingFlow) -> Uuid {
        let id = flow.id();
        self.flows.insert(id, flow);
        id
    }

    pub fn get(&self, id: &Uuid) -> Option<&PendingFlow> {
        self.flows.get(id)
    }

    /// Remove and return the flow.
    pub fn take(&mut self, id: &Uuid) -> Result<PendingFlow, EnvelopeError> {
        self.flows
            .remove(id)
            .ok_or_else(|| EnvelopeError::FlowNotFound(id.to_string()))
    }

    /// Drop flows created more than `max_age` before `now`. Returns how
    /// many were dropped.
    pub fn prune_stale(&mut self, max_age: Duration, now: DateTime<Utc>) -> usize {
        let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
        let before = self.flows.len();
        self.flows.retain(|_, flow| flow.age(now) <= max_age);
        let pruned = before - self.flows.len();
        if pruned > 0 {
            debug!(pruned, remaining = self.flows.len(), "pruned stale flows");
        }
        pruned
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }
}
