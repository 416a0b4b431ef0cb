//! A genesis vertex store backed by an in-memory ledger.

use super::{
    ledger::{InMemoryMempool, RecordingStateComputer},
    senders::Outbox,
};
use crate::{
    crypto::{Hasher, Sha256Hasher},
    engine,
    ledger::{Accumulator, StateComputerLedger},
    metrics::SystemCounters,
    store::VertexStore,
    types::{
        AccumulatorState, BftHeader, Command, QuorumCertificate, TimestampedSignatures,
        UnverifiedVertex, VerifiedLedgerHeaderAndProof, VerifiedVertex, View, VoteData,
    },
};
use std::sync::Arc;

/// The ledger every [Fixture] runs on.
pub type FixtureLedger = StateComputerLedger<InMemoryMempool, RecordingStateComputer, Outbox>;

/// Everything needed to build vertex stores that share one ledger.
///
/// Every fixture starts from the same genesis, so vertices built by one fixture are valid in
/// another.
pub struct Fixture {
    pub hasher: Arc<dyn Hasher>,
    pub genesis: VerifiedVertex,
    pub genesis_qc: QuorumCertificate,
    pub outbox: Outbox,
    pub mempool: InMemoryMempool,
    pub computer: RecordingStateComputer,
    pub ledger: Arc<FixtureLedger>,
}

#[allow(clippy::new_without_default)]
impl Fixture {
    pub fn new() -> Self {
        let hasher: Arc<dyn Hasher> = Arc::new(Sha256Hasher);
        let (genesis, genesis_qc) = engine::genesis(hasher.as_ref(), AccumulatorState::default());
        let outbox = Outbox::new();
        let mempool = InMemoryMempool::new(hasher.clone());
        let computer = RecordingStateComputer::new();
        let ledger = Arc::new(StateComputerLedger::new(
            VerifiedLedgerHeaderAndProof::genesis(genesis_qc.proposed().clone()),
            Accumulator::new(hasher.clone()),
            mempool.clone(),
            computer.clone(),
            outbox.clone(),
            SystemCounters::default(),
        ));
        Self {
            hasher,
            genesis,
            genesis_qc,
            outbox,
            mempool,
            computer,
            ledger,
        }
    }

    /// A store holding only genesis.
    pub fn store(&self) -> VertexStore {
        VertexStore::new(
            self.genesis.clone(),
            self.genesis_qc.clone(),
            self.ledger.clone(),
            Box::new(self.outbox.clone()),
            SystemCounters::default(),
        )
        .unwrap()
    }

    /// A vertex at `view` extending the vertex certified by `qc`, carrying the single byte
    /// `command`.
    pub fn child(&self, qc: &QuorumCertificate, view: u64, command: Option<u8>) -> VerifiedVertex {
        let command = command.map(|byte| Command::new(vec![byte]));
        VerifiedVertex::new(
            UnverifiedVertex::new(qc.clone(), View::new(view), command),
            self.hasher.as_ref(),
        )
    }

    /// An unsigned QC on `vertex`, executed to `header`, committing the grandparent when the
    /// vertex closes a direct 3-chain.
    pub fn certify(vertex: &VerifiedVertex, header: BftHeader) -> QuorumCertificate {
        let parent = vertex
            .parent_header()
            .cloned()
            .unwrap_or_else(|| header.clone());
        let committed = if vertex.touches_genesis()
            || !vertex.has_direct_parent()
            || !vertex.parent_has_direct_parent()
        {
            None
        } else {
            vertex.grandparent_header().cloned()
        };
        QuorumCertificate::new(
            VoteData::new(header, parent, committed),
            TimestampedSignatures::default(),
        )
    }

    /// Insert a child of the vertex certified by `qc` into `store` and add a QC on it.
    pub fn extend(
        &self,
        store: &mut VertexStore,
        qc: &QuorumCertificate,
        view: u64,
        command: Option<u8>,
    ) -> (VerifiedVertex, QuorumCertificate) {
        let vertex = self.child(qc, view, command);
        let header = store
            .insert_vertex(vertex.clone())
            .unwrap()
            .expect("vertex is behind the ledger");
        let qc = Self::certify(&vertex, header);
        store.add_qc(&qc).unwrap();
        (vertex, qc)
    }
}
