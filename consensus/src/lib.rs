//! Order commands with a leader-based, chained BFT protocol.
//!
//! # Overview
//!
//! Validators exchange proposals, votes and view timeouts over a sequence of views to build a
//! chain of certified vertices. A vertex is committed once quorum certificates (QCs) form three
//! consecutive direct links on top of it. Liveness is maintained by an exponential-backoff
//! [pacemaker] and a vertex synchronization protocol ([sync]) that lets a node fetch missing
//! ancestors from its peers.
//!
//! # Design
//!
//! Every node processes events on a single logical thread. Consensus messages flow through a
//! pipeline of [bft::BftEventProcessor] stages:
//!
//! 1. [bft::Verifier] drops messages from unknown authors or with invalid signatures.
//! 2. [bft::Preprocessor] drops stale messages and holds back messages whose QC is not yet in
//!    the local [store::VertexStore] until [sync::BftSync] fetches the missing vertices.
//! 3. [bft::Reducer] applies the [safety::SafetyRules], feeds the [pending] accumulators and
//!    the pacemaker, and emits proposals and votes.
//!
//! All I/O leaves the core through sender traits and re-enters as events, so the core never
//! blocks. The only state shared across threads is the ledger behind
//! [ledger::StateComputerLedger], which serializes `prepare` and `commit` with a lock.
//!
//! # Status
//!
//! `chainbft-consensus` is **ALPHA** software. Developers should expect breaking changes.

use commonware_runtime::Clock;
use std::time::UNIX_EPOCH;
use thiserror::Error;
use types::Digest;

pub mod bft;
pub mod crypto;
pub mod election;
pub mod engine;
pub mod ledger;
pub mod metrics;
pub mod pacemaker;
pub mod pending;
pub mod safety;
pub mod store;
pub mod sync;
pub mod types;
pub mod validators;

#[cfg(any(test, feature = "mocks"))]
pub mod mocks;

/// Errors that stop a node.
///
/// Recoverable conditions (safety violations, invalid signatures, pending syncs) never surface
/// here: they are logged and the offending event is dropped.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Evidence of safety break: ledger does not extend to parent of {0}")]
    EvidenceOfSafetyBreak(Digest),
    #[error("Accumulator failure: commit does not extend state version {0}")]
    AccumulatorFailure(u64),
    #[error("Missing parent of vertex {0}")]
    MissingParent(Digest),
    #[error("Missing vertex {0}")]
    MissingVertex(Digest),
    #[error("Invalid root: {0}")]
    InvalidRoot(&'static str),
    #[error("Missing committed header in QC for {0}")]
    MissingCommittedHeader(Digest),
    #[error("Invalid sync info: {0}")]
    InvalidSyncInfo(&'static str),
    #[error("Syncing required but no author was provided")]
    MissingSyncAuthor,
    #[error("Unexpected vertices response for {0}")]
    UnexpectedSyncResponse(Digest),
    #[error("Invalid pacemaker config: {0}")]
    InvalidPacemakerConfig(String),
}

/// Produces commands for a view, excluding commands already prepared on the chain.
pub trait NextCommandGenerator {
    fn generate_next_command(
        &self,
        view: types::View,
        prepared: &std::collections::HashSet<Digest>,
    ) -> Option<types::Command>;
}

/// Supplies the local time, in milliseconds since the Unix epoch, used to timestamp votes.
pub trait TimeSupplier {
    fn current_time(&self) -> u64;
}

/// [TimeSupplier] backed by a runtime [Clock].
#[derive(Clone, Debug)]
pub struct ClockTime<C>(pub C);

impl<C: Clock> TimeSupplier for ClockTime<C> {
    fn current_time(&self) -> u64 {
        self.0
            .current()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or_default()
    }
}
