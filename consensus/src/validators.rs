//! Weighted validator sets and signature accumulation.

use crate::types::{BftNode, Signature, TimestampedSignature, TimestampedSignatures};
use bytes::BufMut;
use commonware_codec::{EncodeSize, Write};
use std::{collections::BTreeMap, sync::Arc};

/// A validator and its voting power.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BftValidator {
    pub node: BftNode,
    pub power: u64,
}

impl BftValidator {
    pub fn new(node: BftNode, power: u64) -> Self {
        Self { node, power }
    }
}

/// The immutable set of validators of an epoch.
///
/// A set of signers forms a quorum once their combined power is at least two thirds of the total.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BftValidatorSet {
    validators: BTreeMap<BftNode, u64>,
    total_power: u64,
}

impl BftValidatorSet {
    /// Create a set from validators. Duplicate nodes keep the last power given.
    pub fn new(validators: impl IntoIterator<Item = BftValidator>) -> Self {
        let validators: BTreeMap<_, _> = validators
            .into_iter()
            .map(|validator| (validator.node, validator.power))
            .collect();
        let total_power = validators
            .values()
            .fold(0u64, |total, power| total.saturating_add(*power));
        Self {
            validators,
            total_power,
        }
    }

    pub fn contains_node(&self, node: &BftNode) -> bool {
        self.validators.contains_key(node)
    }

    /// Power of `node`, or zero if it is not a validator.
    pub fn power(&self, node: &BftNode) -> u64 {
        self.validators.get(node).copied().unwrap_or_default()
    }

    pub fn total_power(&self) -> u64 {
        self.total_power
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &BftNode> {
        self.validators.keys()
    }

    pub fn validators(&self) -> impl Iterator<Item = BftValidator> + '_ {
        self.validators
            .iter()
            .map(|(node, power)| BftValidator::new(node.clone(), *power))
    }

    /// Returns true if `power` is enough to form a quorum.
    pub fn is_quorum(&self, power: u64) -> bool {
        power > 0 && 3 * u128::from(power) >= 2 * u128::from(self.total_power)
    }

    /// Start accumulating signatures for a new target.
    pub fn new_validation_state(self: &Arc<Self>) -> ValidationState {
        ValidationState::new(self.clone())
    }
}

impl Write for BftValidatorSet {
    fn write(&self, buf: &mut impl BufMut) {
        (self.validators.len() as u64).write(buf);
        for (node, power) in &self.validators {
            node.write(buf);
            power.write(buf);
        }
    }
}

impl EncodeSize for BftValidatorSet {
    fn encode_size(&self) -> usize {
        (self.validators.len() as u64).encode_size()
            + self
                .validators
                .iter()
                .map(|(node, power)| node.encode_size() + power.encode_size())
                .sum::<usize>()
    }
}

/// Signatures collected for a single target from members of a validator set.
#[derive(Clone, Debug)]
pub struct ValidationState {
    validators: Arc<BftValidatorSet>,
    signed: BTreeMap<BftNode, TimestampedSignature>,
    signed_power: u64,
}

impl ValidationState {
    pub fn new(validators: Arc<BftValidatorSet>) -> Self {
        Self {
            validators,
            signed: BTreeMap::new(),
            signed_power: 0,
        }
    }

    /// Add a signature from `node` and return whether the state is complete.
    ///
    /// Signatures from non-validators are ignored.
    pub fn add_signature(&mut self, node: &BftNode, timestamp: u64, signature: Signature) -> bool {
        let weight = self.validators.power(node);
        if weight > 0 && !self.signed.contains_key(node) {
            self.signed_power = self.signed_power.saturating_add(weight);
            self.signed.insert(
                node.clone(),
                TimestampedSignature {
                    timestamp,
                    weight,
                    signature,
                },
            );
        }
        self.complete()
    }

    /// Remove the signature of `node`, if present.
    pub fn remove_signature(&mut self, node: &BftNode) {
        if let Some(removed) = self.signed.remove(node) {
            self.signed_power -= removed.weight;
        }
    }

    pub fn is_signed_by(&self, node: &BftNode) -> bool {
        self.signed.contains_key(node)
    }

    pub fn is_empty(&self) -> bool {
        self.signed.is_empty()
    }

    pub fn complete(&self) -> bool {
        self.validators.is_quorum(self.signed_power)
    }

    pub fn signatures(&self) -> TimestampedSignatures {
        TimestampedSignatures::new(self.signed.clone())
    }
}
