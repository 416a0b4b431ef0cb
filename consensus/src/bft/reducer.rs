use super::{BftEventProcessor, BftEventSender};
use crate::{
    crypto::{HashSigner, Hasher, HasherExt},
    election::ProposerElection,
    metrics::SystemCounters,
    pacemaker::Pacemaker,
    pending::PendingVotes,
    safety::SafetyRules,
    store::VertexStore,
    sync::BftSyncer,
    types::{
        BftNode, BftUpdate, Digest, Proposal, SyncInfo, UnverifiedVertex, VerifiedVertex,
        View, ViewTimeoutSigned, Vote,
    },
    validators::BftValidatorSet,
    Error, NextCommandGenerator, TimeSupplier,
};
use std::{cell::RefCell, collections::HashSet, rc::Rc, sync::Arc};
use tracing::{debug, error, trace};

/// Everything a [Reducer] needs.
pub struct Config {
    pub me: BftNode,
    pub validators: Arc<BftValidatorSet>,
    pub election: Arc<dyn ProposerElection>,
    pub hasher: Arc<dyn Hasher>,
    pub safety: SafetyRules<Box<dyn HashSigner>>,
    pub pending: PendingVotes,
    pub generator: Arc<dyn NextCommandGenerator>,
    pub sender: Box<dyn BftEventSender>,
    pub counters: SystemCounters,
    pub time: Box<dyn TimeSupplier>,
    pub pacemaker: Rc<RefCell<dyn Pacemaker>>,
    pub store: Rc<RefCell<VertexStore>>,
    pub syncer: Rc<RefCell<dyn BftSyncer>>,
}

/// Applies preprocessed messages to the state of the node.
pub struct Reducer {
    me: BftNode,
    validators: Arc<BftValidatorSet>,
    election: Arc<dyn ProposerElection>,
    hasher: Arc<dyn Hasher>,
    safety: SafetyRules<Box<dyn HashSigner>>,
    pending: PendingVotes,
    generator: Arc<dyn NextCommandGenerator>,
    sender: Box<dyn BftEventSender>,
    counters: SystemCounters,
    time: Box<dyn TimeSupplier>,
    pacemaker: Rc<RefCell<dyn Pacemaker>>,
    store: Rc<RefCell<VertexStore>>,
    syncer: Rc<RefCell<dyn BftSyncer>>,
}

impl Reducer {
    pub fn new(config: Config) -> Self {
        Self {
            me: config.me,
            validators: config.validators,
            election: config.election,
            hasher: config.hasher,
            safety: config.safety,
            pending: config.pending,
            generator: config.generator,
            sender: config.sender,
            counters: config.counters,
            time: config.time,
            pacemaker: config.pacemaker,
            store: config.store,
            syncer: config.syncer,
        }
    }

    fn current_view(&self) -> View {
        self.pacemaker.borrow().current_view()
    }

    /// Propose a vertex for `view` extending the highest QC.
    fn propose(&mut self, view: View) {
        let (highest_qc, highest_committed_qc, prepared) = {
            let store = self.store.borrow();
            let highest_qc = store.highest_qc().clone();
            let prepared: HashSet<Digest> = store
                .get_path_from_root(highest_qc.proposed().vertex_id())
                .iter()
                .filter_map(|prepared| prepared.vertex().command())
                .map(|command| self.hasher.hash(command))
                .collect();
            (highest_qc, store.highest_committed_qc().clone(), prepared)
        };

        // Propose nothing while the epoch is changing
        let command = if highest_qc.proposed().ledger_header().is_end_of_epoch() {
            None
        } else {
            self.generator.generate_next_command(view, &prepared)
        };

        let vertex = UnverifiedVertex::new(highest_qc, view, command);
        let proposal = self.safety.sign_proposal(vertex, highest_committed_qc);
        debug!(%view, "broadcasting proposal");
        self.counters.bft_proposals_made.inc();
        self.sender
            .broadcast_proposal(proposal, self.validators.nodes().cloned().collect());
    }
}

impl BftEventProcessor for Reducer {
    fn start(&mut self) -> Result<(), Error> {
        let (highest_qc, highest_committed_qc) = {
            let store = self.store.borrow();
            (
                store.highest_qc().clone(),
                store.highest_committed_qc().clone(),
            )
        };
        self.pacemaker
            .borrow_mut()
            .process_qc(&highest_qc, &highest_committed_qc)
    }

    fn process_proposal(&mut self, proposal: Proposal) -> Result<(), Error> {
        let vertex = VerifiedVertex::new(proposal.vertex().clone(), self.hasher.as_ref());
        let current = self.current_view();
        if vertex.view() != current {
            trace!(view = %vertex.view(), %current, "ignoring proposal");
            return Ok(());
        }
        trace!(%vertex, author = %proposal.author(), "processing proposal");
        self.counters.bft_processed.inc();

        let header = self.store.borrow_mut().insert_vertex(vertex.clone())?;
        let leader = self.election.proposer(current);
        match header {
            Some(header) => {
                let sync_info = self.store.borrow().sync_info()?;
                let timestamp = self.time.current_time();
                match self.safety.vote_for(&vertex, header, timestamp, sync_info) {
                    Ok(vote) => {
                        if !vertex.has_direct_parent() {
                            self.counters.bft_indirect_parent.inc();
                        }
                        trace!(%vertex, %leader, "sending vote");
                        self.sender.send_vote(vote, &leader);
                    }
                    Err(violation) => {
                        self.counters.bft_rejected.inc();
                        error!(%vertex, %violation, "rejected proposal");
                    }
                }
            }
            None => debug!(%vertex, "not voting for vertex behind the ledger"),
        }

        // Leaders wait for votes (or timeouts) before moving on
        if leader != self.me && self.election.proposer(current.next()) != self.me {
            self.pacemaker.borrow_mut().process_next_view(current);
        }
        Ok(())
    }

    fn process_vote(&mut self, vote: Vote) -> Result<(), Error> {
        trace!(author = %vote.author(), view = %vote.view(), "processing vote");
        let Some(qc) = self.pending.insert_vote(&vote, &self.validators) else {
            return Ok(());
        };
        self.counters.bft_vote_quorums.inc();
        trace!(%qc, "formed QC");

        let highest_committed_qc = self.store.borrow().highest_committed_qc().clone();
        let sync_info = match SyncInfo::new(qc, highest_committed_qc) {
            Ok(sync_info) => sync_info,
            Err(err) => {
                debug!(?err, "ignoring QC below the committed QC");
                return Ok(());
            }
        };
        self.syncer
            .borrow_mut()
            .sync_to_qc(&sync_info, Some(vote.author()))?;
        Ok(())
    }

    fn process_view_timeout(&mut self, timeout: ViewTimeoutSigned) -> Result<(), Error> {
        trace!(author = %timeout.author(), view = %timeout.view(), "processing view timeout");
        let view = self
            .pacemaker
            .borrow_mut()
            .process_view_timeout(&timeout, &self.validators);
        if let Some(view) = view {
            self.counters.bft_timeout_quorums.inc();
            self.propose(view);
        }
        Ok(())
    }

    fn process_local_timeout(&mut self, view: View) -> Result<(), Error> {
        trace!(%view, "processing local timeout");
        let before = self.current_view();
        self.pacemaker.borrow_mut().process_local_timeout(view);
        if self.current_view() != before {
            self.counters.bft_timed_out_views.inc();
        }
        Ok(())
    }

    fn process_bft_update(&mut self, _: BftUpdate) -> Result<(), Error> {
        Ok(())
    }
}
