//! Assembly of a single node.
//!
//! [Engine] builds the genesis vertex, the [VertexStore], the pacemaker, the vertex sync and the
//! event pipeline of a node, and routes every inbound [Message] to the component that handles it.
//! Everything the node emits leaves through one [Sender].

use crate::{
    bft::{self, BftEventProcessor, BftEventSender},
    crypto::{CountingSigner, HashSigner, HashVerifier, Hasher},
    election::ProposerElection,
    ledger::{Ledger, LedgerUpdate},
    metrics::SystemCounters,
    pacemaker::{
        self, ExponentialTimeoutPacemaker, Pacemaker, PacemakerInfoSender, PacemakerTimeoutSender,
        SignedViewTimeoutToLeaderSender, ViewTimeoutSender, ViewTimeoutSigner,
    },
    store::{BftUpdateSender, VertexStore},
    sync::{
        BftSync, GetVerticesErrorResponse, GetVerticesRequest, GetVerticesResponse, Server,
        SyncLedgerRequestSender, SyncVerticesRequestSender, SyncVerticesResponseSender,
    },
    types::{
        AccumulatorState, BftNode, BftUpdate, ConsensusEvent, LedgerHeader, QuorumCertificate,
        UnverifiedVertex, VerifiedVertex, View,
    },
    validators::BftValidatorSet,
    Error, NextCommandGenerator, TimeSupplier,
};
use std::{cell::RefCell, rc::Rc, sync::Arc};
use tracing::{debug, trace};

/// Everything a node sends, to peers or back to itself.
pub trait Sender:
    PacemakerTimeoutSender
    + PacemakerInfoSender
    + ViewTimeoutSender
    + BftEventSender
    + BftUpdateSender
    + SyncVerticesRequestSender
    + SyncVerticesResponseSender
    + SyncLedgerRequestSender
    + Clone
    + 'static
{
}

impl<T> Sender for T where
    T: PacemakerTimeoutSender
        + PacemakerInfoSender
        + ViewTimeoutSender
        + BftEventSender
        + BftUpdateSender
        + SyncVerticesRequestSender
        + SyncVerticesResponseSender
        + SyncLedgerRequestSender
        + Clone
        + 'static
{
}

/// The genesis vertex and its self-certifying QC, built on top of `accumulator_state`.
///
/// Every node that starts from the same ledger state derives the same genesis.
pub fn genesis(
    hasher: &dyn Hasher,
    accumulator_state: AccumulatorState,
) -> (VerifiedVertex, QuorumCertificate) {
    let vertex = VerifiedVertex::new(UnverifiedVertex::genesis(), hasher);
    let qc = QuorumCertificate::genesis(&vertex, LedgerHeader::genesis(accumulator_state));
    (vertex, qc)
}

/// Configuration of an [Engine].
pub struct Config<S, O> {
    pub me: BftNode,
    pub validators: Arc<BftValidatorSet>,
    pub election: Arc<dyn ProposerElection>,
    pub hasher: Arc<dyn Hasher>,

    /// Signs proposals, votes and view timeouts.
    pub signer: S,

    /// Verifies the signatures of inbound messages.
    pub verifier: Box<dyn HashVerifier>,

    /// Ledger the node commits to. Genesis is derived from its current state.
    pub ledger: Arc<dyn Ledger>,

    /// Supplies the command of every proposal made by this node.
    pub generator: Arc<dyn NextCommandGenerator>,

    pub sender: O,
    pub counters: SystemCounters,

    /// Timestamps votes.
    pub time: Box<dyn TimeSupplier>,

    pub pacemaker: pacemaker::Config,
}

/// Something delivered to a node.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    Consensus(ConsensusEvent),
    LocalTimeout(View),
    BftUpdate(BftUpdate),
    GetVerticesRequest(GetVerticesRequest),
    GetVerticesResponse(GetVerticesResponse),
    GetVerticesErrorResponse(GetVerticesErrorResponse),
    LedgerUpdate(LedgerUpdate),
}

/// A node, starting from genesis.
pub struct Engine<O: Sender> {
    me: BftNode,
    processor: Box<dyn BftEventProcessor>,
    sync: Rc<RefCell<BftSync<O, O>>>,
    server: Server<O>,
    store: Rc<RefCell<VertexStore>>,
    pacemaker: Rc<RefCell<dyn Pacemaker>>,
}

impl<O: Sender> Engine<O> {
    /// Create a node. Fails if the pacemaker configuration is invalid.
    pub fn new<S: HashSigner + Clone + 'static>(config: Config<S, O>) -> Result<Self, Error> {
        let Config {
            me,
            validators,
            election,
            hasher,
            signer,
            verifier,
            ledger,
            generator,
            sender,
            counters,
            time,
            pacemaker: pacemaker_config,
        } = config;

        // Start from the genesis of the ledger
        let current = ledger.current_header();
        let (genesis, genesis_qc) = genesis(hasher.as_ref(), *current.accumulator_state());
        debug!(%me, genesis = %genesis, "creating engine");
        let store = Rc::new(RefCell::new(VertexStore::new(
            genesis,
            genesis_qc.clone(),
            ledger,
            Box::new(sender.clone()),
            counters.clone(),
        )?));

        // Proposals, votes and view timeouts share one counted signer
        let signer = CountingSigner::new(signer, counters.clone());

        // Every view change sends a signed view timeout to the leader of the new view
        let proceed = SignedViewTimeoutToLeaderSender::new(
            ViewTimeoutSigner::new(me.clone(), hasher.clone(), signer.clone()),
            election.clone(),
            sender.clone(),
        );
        let pacemaker: Rc<RefCell<dyn Pacemaker>> =
            Rc::new(RefCell::new(ExponentialTimeoutPacemaker::new(
                pacemaker_config,
                sender.clone(),
                proceed,
                sender.clone(),
                genesis_qc,
            )?));

        let sync = Rc::new(RefCell::new(BftSync::new(
            me.clone(),
            store.clone(),
            pacemaker.clone(),
            sender.clone(),
            sender.clone(),
            counters.clone(),
            current,
        )));
        let processor = bft::build(bft::Config {
            me: me.clone(),
            validators,
            election,
            hasher,
            signer: Box::new(signer),
            verifier,
            generator,
            sender: Box::new(sender.clone()),
            counters,
            time,
            pacemaker: pacemaker.clone(),
            store: store.clone(),
            syncer: sync.clone(),
        });
        let server = Server::new(me.clone(), store.clone(), sender);
        Ok(Self {
            me,
            processor,
            sync,
            server,
            store,
            pacemaker,
        })
    }

    pub fn me(&self) -> &BftNode {
        &self.me
    }

    /// Enter the first view.
    pub fn start(&mut self) -> Result<(), Error> {
        debug!(me = %self.me, "starting engine");
        self.processor.start()
    }

    /// Route a delivered message to the component that handles it.
    pub fn handle(&mut self, message: Message) -> Result<(), Error> {
        match message {
            Message::Consensus(ConsensusEvent::Proposal(proposal)) => {
                self.processor.process_proposal(proposal)
            }
            Message::Consensus(ConsensusEvent::Vote(vote)) => self.processor.process_vote(vote),
            Message::Consensus(ConsensusEvent::ViewTimeout(timeout)) => {
                self.processor.process_view_timeout(timeout)
            }
            Message::LocalTimeout(view) => self.processor.process_local_timeout(view),
            Message::BftUpdate(update) => self.processor.process_bft_update(update),
            Message::GetVerticesRequest(request) => {
                self.server.process_get_vertices_request(&request)
            }
            Message::GetVerticesResponse(response) => {
                trace!(me = %self.me, sender = %response.sender(), "vertices response");
                self.sync
                    .borrow_mut()
                    .process_get_vertices_response(&response)
            }
            Message::GetVerticesErrorResponse(response) => self
                .sync
                .borrow_mut()
                .process_get_vertices_error_response(&response),
            Message::LedgerUpdate(update) => self.sync.borrow_mut().process_ledger_update(&update),
        }
    }

    pub fn current_view(&self) -> View {
        self.pacemaker.borrow().current_view()
    }

    /// The highest QC that committed a vertex.
    pub fn highest_committed_qc(&self) -> QuorumCertificate {
        self.store.borrow().highest_committed_qc().clone()
    }

    /// The last committed vertex.
    pub fn root(&self) -> VerifiedVertex {
        self.store.borrow().root().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        crypto::Sha256Hasher,
        election::Dictatorship,
        mocks::{
            crypto::{Keys, Secp256r1Verifier},
            fixtures::Fixture,
            processor::FixedTime,
            senders::{Outbound, Outbox},
        },
        sync::GetVerticesResponse,
        types::ViewTimeoutSigned,
        validators::BftValidator,
    };
    use commonware_macros::test_traced;
    use std::time::Duration;

    fn engine(fixture: &Fixture, keys: &[Keys], me: usize, leader: usize) -> Engine<Outbox> {
        engine_with_counters(fixture, keys, me, leader, SystemCounters::default())
    }

    fn engine_with_counters(
        fixture: &Fixture,
        keys: &[Keys],
        me: usize,
        leader: usize,
        counters: SystemCounters,
    ) -> Engine<Outbox> {
        let validators = Arc::new(BftValidatorSet::new(
            keys.iter().map(|keys| BftValidator::new(keys.node(), 1)),
        ));
        Engine::new(Config {
            me: keys[me].node(),
            validators,
            election: Arc::new(Dictatorship::new(keys[leader].node())),
            hasher: fixture.hasher.clone(),
            signer: keys[me].clone(),
            verifier: Box::new(Secp256r1Verifier),
            ledger: fixture.ledger.clone(),
            generator: fixture.ledger.clone(),
            sender: fixture.outbox.clone(),
            counters,
            time: Box::new(FixedTime(0)),
            pacemaker: pacemaker::Config::default(),
        })
        .unwrap()
    }

    fn keys() -> Vec<Keys> {
        (0..3).map(Keys::from_seed).collect()
    }

    #[test]
    fn genesis_is_deterministic() {
        let (a, a_qc) = genesis(&Sha256Hasher, AccumulatorState::default());
        let (b, b_qc) = genesis(&Sha256Hasher, AccumulatorState::default());
        assert_eq!(a, b);
        assert_eq!(a_qc, b_qc);
        assert!(a.is_genesis());
        assert_eq!(a_qc.proposed().vertex_id(), a.id());
        let (committed, _) = a_qc.committed_and_proof().unwrap();
        assert_eq!(committed.vertex_id(), a.id());
    }

    #[test]
    fn rejects_invalid_pacemaker_config() {
        let fixture = Fixture::new();
        let keys = keys();
        let result = Engine::new(Config {
            me: keys[0].node(),
            validators: Arc::new(BftValidatorSet::new([BftValidator::new(keys[0].node(), 1)])),
            election: Arc::new(Dictatorship::new(keys[0].node())),
            hasher: fixture.hasher.clone(),
            signer: keys[0].clone(),
            verifier: Box::new(Secp256r1Verifier),
            ledger: fixture.ledger.clone(),
            generator: fixture.ledger.clone(),
            sender: fixture.outbox.clone(),
            counters: SystemCounters::default(),
            time: Box::new(FixedTime(0)),
            pacemaker: pacemaker::Config {
                timeout: Duration::ZERO,
                ..Default::default()
            },
        });
        assert!(matches!(result, Err(Error::InvalidPacemakerConfig(_))));
    }

    #[test_traced]
    fn start_times_out_to_leader_of_first_view() {
        let fixture = Fixture::new();
        let keys = keys();
        let mut engine = engine(&fixture, &keys, 1, 0);
        assert_eq!(engine.current_view(), View::genesis());
        assert_eq!(engine.root(), fixture.genesis);
        engine.start().unwrap();
        assert_eq!(engine.current_view(), View::new(1));

        let outbound = fixture.outbox.drain();
        assert!(outbound
            .iter()
            .any(|event| matches!(event, Outbound::ScheduleTimeout(view, _) if *view == View::new(1))));
        let timeout: Vec<&ViewTimeoutSigned> = outbound
            .iter()
            .filter_map(|event| match event {
                Outbound::ViewTimeout(timeout, leader) if leader == &keys[0].node() => {
                    Some(timeout)
                }
                _ => None,
            })
            .collect();
        assert_eq!(timeout.len(), 1);
        assert_eq!(timeout[0].author(), &keys[1].node());
        assert_eq!(timeout[0].view(), View::new(1));
    }

    #[test]
    fn view_timeouts_are_counted_as_signatures() {
        let fixture = Fixture::new();
        let keys = keys();
        let counters = SystemCounters::default();
        let mut engine = engine_with_counters(&fixture, &keys, 1, 0, counters.clone());
        assert_eq!(counters.signatures_signed.get(), 0);

        // Entering a view signs a timeout for its leader
        engine.start().unwrap();
        assert_eq!(counters.signatures_signed.get(), 1);
        engine.handle(Message::LocalTimeout(View::new(1))).unwrap();
        assert_eq!(counters.signatures_signed.get(), 2);
    }

    #[test]
    fn local_timeout_moves_to_next_view() {
        let fixture = Fixture::new();
        let keys = keys();
        let mut engine = engine(&fixture, &keys, 1, 0);
        engine.start().unwrap();
        engine.handle(Message::LocalTimeout(View::new(1))).unwrap();
        assert_eq!(engine.current_view(), View::new(2));

        // A stale timer changes nothing
        engine.handle(Message::LocalTimeout(View::new(1))).unwrap();
        assert_eq!(engine.current_view(), View::new(2));
    }

    #[test]
    fn serves_vertex_requests() {
        let fixture = Fixture::new();
        let keys = keys();
        let mut engine = engine(&fixture, &keys, 1, 0);
        fixture.outbox.drain();
        engine
            .handle(Message::GetVerticesRequest(GetVerticesRequest::new(
                keys[2].node(),
                *fixture.genesis.id(),
                1,
            )))
            .unwrap();
        assert_eq!(
            fixture.outbox.drain(),
            vec![Outbound::GetVerticesResponse(
                keys[2].node(),
                GetVerticesResponse::new(keys[1].node(), vec![fixture.genesis.clone()])
            )]
        );
    }

    #[test]
    fn leader_ignores_own_view_timeout_until_quorum() {
        let fixture = Fixture::new();
        let keys = keys();
        let mut engine = engine(&fixture, &keys, 0, 0);
        engine.start().unwrap();
        let own = fixture
            .outbox
            .drain()
            .into_iter()
            .find_map(|event| match event {
                Outbound::ViewTimeout(timeout, _) => Some(timeout),
                _ => None,
            })
            .unwrap();

        // One of three timeouts is not a quorum
        engine
            .handle(Message::Consensus(ConsensusEvent::ViewTimeout(own)))
            .unwrap();
        assert!(!fixture
            .outbox
            .drain()
            .iter()
            .any(|event| matches!(event, Outbound::BroadcastProposal(..))));
    }
}
