//! Accumulators that fold individual votes and view timeouts into quorums.
//!
//! Each author has at most one pending target. When an author moves on to a new target, its
//! signature is removed from the previous one, which is discarded once empty. Neither type is
//! safe for concurrent use.

use crate::{
    crypto::{Hasher, HasherExt},
    types::{BftNode, Digest, QuorumCertificate, View, ViewTimeoutSigned, Vote},
    validators::{BftValidatorSet, ValidationState},
};
use std::{collections::HashMap, hash::Hash, sync::Arc};
use tracing::trace;

/// Per-target signature accumulation with a single pending target per author.
struct Accumulator<K> {
    states: HashMap<K, ValidationState>,
    previous: HashMap<BftNode, K>,
}

impl<K: Clone + Eq + Hash> Accumulator<K> {
    fn new() -> Self {
        Self {
            states: HashMap::new(),
            previous: HashMap::new(),
        }
    }

    /// Record `target` as the pending target of `author`, returning false for a duplicate.
    fn replace_previous(&mut self, author: &BftNode, target: &K) -> bool {
        let Some(previous) = self.previous.insert(author.clone(), target.clone()) else {
            return true;
        };
        if previous == *target {
            return false;
        }
        if let Some(state) = self.states.get_mut(&previous) {
            state.remove_signature(author);
            if state.is_empty() {
                self.states.remove(&previous);
            }
        }
        true
    }

    /// Add a signature and return the completed state, if any.
    fn insert(
        &mut self,
        author: &BftNode,
        target: K,
        timestamp: u64,
        signature: &crate::types::Signature,
        validators: &Arc<BftValidatorSet>,
    ) -> Option<ValidationState> {
        if !validators.contains_node(author) {
            return None;
        }
        if !self.replace_previous(author, &target) {
            return None;
        }
        let state = self
            .states
            .entry(target.clone())
            .or_insert_with(|| validators.new_validation_state());
        if state.add_signature(author, timestamp, signature.clone()) {
            return self.states.remove(&target);
        }
        None
    }

    fn len(&self) -> usize {
        self.states.len()
    }
}

/// Forms QCs from votes. Votes are grouped by the hash of their [crate::types::VoteData].
pub struct PendingVotes {
    hasher: Arc<dyn Hasher>,
    votes: Accumulator<Digest>,
}

impl PendingVotes {
    pub fn new(hasher: Arc<dyn Hasher>) -> Self {
        Self {
            hasher,
            votes: Accumulator::new(),
        }
    }

    /// Insert a vote and return a QC if it completes a quorum.
    pub fn insert_vote(
        &mut self,
        vote: &Vote,
        validators: &Arc<BftValidatorSet>,
    ) -> Option<QuorumCertificate> {
        let digest = self.hasher.hash(vote.vote_data());
        let state = self.votes.insert(
            vote.author(),
            digest,
            vote.timestamp(),
            vote.signature(),
            validators,
        )?;
        trace!(view = %vote.view(), "formed QC");
        Some(QuorumCertificate::new(
            vote.vote_data().clone(),
            state.signatures(),
        ))
    }

    /// Number of targets with pending signatures.
    pub fn pending(&self) -> usize {
        self.votes.len()
    }
}

/// Detects when a quorum of validators wants to move to the same view.
pub struct PendingViewTimeouts {
    timeouts: Accumulator<View>,
}

impl Default for PendingViewTimeouts {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingViewTimeouts {
    pub fn new() -> Self {
        Self {
            timeouts: Accumulator::new(),
        }
    }

    /// Insert a view timeout and return its view if it completes a quorum.
    pub fn insert_view_timeout(
        &mut self,
        timeout: &ViewTimeoutSigned,
        validators: &Arc<BftValidatorSet>,
    ) -> Option<View> {
        let view = timeout.view();
        self.timeouts
            .insert(timeout.author(), view, 0, timeout.signature(), validators)
            .map(|_| view)
    }

    /// Number of views with pending signatures.
    pub fn pending(&self) -> usize {
        self.timeouts.len()
    }
}
