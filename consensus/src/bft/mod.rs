//! The event pipeline of a node.
//!
//! Inbound consensus messages pass through three [BftEventProcessor] stages:
//!
//! ```txt
//! +------------+     +----------------+     +-----------+
//! |  Verifier  +---->|  Preprocessor  +---->|  Reducer  |
//! +------------+     +-------+--------+     +-----------+
//!                            |   ^
//!                            v   |
//!                        +-------+---+
//!                        |  BftSync  |
//!                        +-----------+
//! ```
//!
//! [Verifier] drops messages from non-validators and messages with invalid signatures.
//! [Preprocessor] drops messages that arrive too late or at the wrong node, and holds back
//! messages whose QC has not been synced yet. [Reducer] turns what remains into votes,
//! proposals and view changes.

use crate::{
    crypto::{CountingVerifier, HashSigner, HashVerifier, Hasher},
    election::ProposerElection,
    metrics::SystemCounters,
    pacemaker::Pacemaker,
    pending::PendingVotes,
    safety::{SafetyRules, SafetyState},
    store::VertexStore,
    sync::BftSyncer,
    types::{BftNode, BftUpdate, Proposal, View, ViewTimeoutSigned, Vote},
    validators::BftValidatorSet,
    Error, NextCommandGenerator, TimeSupplier,
};
use std::{cell::RefCell, rc::Rc, sync::Arc};

mod preprocessor;
pub use preprocessor::Preprocessor;
mod queues;
pub use queues::{SyncEvent, SyncQueues};
mod reducer;
pub use reducer::Reducer;
mod verifier;
pub use verifier::Verifier;

/// A stage of the event pipeline.
///
/// Every method returns an error only if the node can no longer make progress safely.
pub trait BftEventProcessor {
    /// Enter the first view.
    fn start(&mut self) -> Result<(), Error>;

    fn process_proposal(&mut self, proposal: Proposal) -> Result<(), Error>;

    fn process_vote(&mut self, vote: Vote) -> Result<(), Error>;

    fn process_view_timeout(&mut self, timeout: ViewTimeoutSigned) -> Result<(), Error>;

    /// Handle the expiry of the timer scheduled for `view`.
    fn process_local_timeout(&mut self, view: View) -> Result<(), Error>;

    /// Handle the insertion of a vertex into the local store.
    fn process_bft_update(&mut self, update: BftUpdate) -> Result<(), Error>;
}

/// Sends consensus messages to other nodes.
pub trait BftEventSender {
    /// Send a proposal to every node in `nodes`.
    fn broadcast_proposal(&self, proposal: Proposal, nodes: Vec<BftNode>);

    /// Send a vote to the leader that collects it.
    fn send_vote(&self, vote: Vote, leader: &BftNode);
}

/// Configuration of the event pipeline of a node.
pub struct Config {
    pub me: BftNode,
    pub validators: Arc<BftValidatorSet>,
    pub election: Arc<dyn ProposerElection>,
    pub hasher: Arc<dyn Hasher>,

    /// Signs proposals and votes. Expected to already count signatures.
    pub signer: Box<dyn HashSigner>,

    /// Verifies the signatures of inbound messages.
    pub verifier: Box<dyn HashVerifier>,

    /// Supplies the command of every proposal made by this node.
    pub generator: Arc<dyn NextCommandGenerator>,

    pub sender: Box<dyn BftEventSender>,
    pub counters: SystemCounters,

    /// Timestamps votes.
    pub time: Box<dyn TimeSupplier>,

    pub pacemaker: Rc<RefCell<dyn Pacemaker>>,
    pub store: Rc<RefCell<VertexStore>>,
    pub syncer: Rc<RefCell<dyn BftSyncer>>,
}

impl Config {
    /// Panics if the configuration can never reach consensus.
    pub fn assert(&self) {
        assert!(
            !self.validators.is_empty(),
            "validator set must not be empty"
        );
        assert!(
            self.validators.total_power() > 0,
            "validator set must have voting power"
        );
    }
}

/// Assemble the pipeline described by `config`, returning its first stage.
pub fn build(config: Config) -> Box<dyn BftEventProcessor> {
    config.assert();
    let Config {
        me,
        validators,
        election,
        hasher,
        signer,
        verifier,
        generator,
        sender,
        counters,
        time,
        pacemaker,
        store,
        syncer,
    } = config;

    let safety = SafetyRules::new(me.clone(), SafetyState::default(), hasher.clone(), signer);
    let reducer = Reducer::new(reducer::Config {
        me: me.clone(),
        validators: validators.clone(),
        election: election.clone(),
        hasher: hasher.clone(),
        safety,
        pending: PendingVotes::new(hasher.clone()),
        generator,
        sender,
        counters: counters.clone(),
        time,
        pacemaker: pacemaker.clone(),
        store,
        syncer: syncer.clone(),
    });
    let preprocessor = Preprocessor::new(
        me,
        Box::new(reducer),
        pacemaker,
        syncer,
        election,
        SyncQueues::new(),
    );
    Box::new(Verifier::new(
        validators,
        Box::new(preprocessor),
        hasher,
        Box::new(CountingVerifier::new(verifier, counters)),
    ))
}
