use super::{
    BftSyncer, GetVerticesErrorResponse, GetVerticesRequest, GetVerticesResponse,
    LocalSyncRequest, SyncLedgerRequestSender, SyncResult, SyncVerticesRequestSender,
};
use crate::{
    ledger::LedgerUpdate,
    metrics::SystemCounters,
    pacemaker::Pacemaker,
    store::VertexStore,
    types::{
        BftHeader, BftNode, Digest, LedgerVersion, SyncInfo, VerifiedLedgerHeaderAndProof,
        VerifiedVertex,
    },
    Error,
};
use std::{
    cell::RefCell,
    collections::{BTreeMap, HashMap, VecDeque},
    rc::Rc,
};
use tracing::{debug, info, trace, warn};

/// Number of vertices that make up a committed 3-chain.
const COMMITTED_CHAIN: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SyncStage {
    Preparing,
    GetCommittedVertices,
    SyncToCommit,
    GetQcVertices,
}

struct SyncState {
    local_sync_id: Digest,
    sync_info: SyncInfo,
    committed_header: BftHeader,
    committed_proof: VerifiedLedgerHeaderAndProof,
    author: BftNode,
    stage: SyncStage,
    fetched: VecDeque<VerifiedVertex>,
}

impl SyncState {
    fn new(sync_info: SyncInfo, author: BftNode) -> Result<Self, Error> {
        let local_sync_id = *sync_info.highest_qc().proposed().vertex_id();
        let Some((committed_header, committed_proof)) =
            sync_info.highest_committed_qc().committed_and_proof()
        else {
            return Err(Error::MissingCommittedHeader(local_sync_id));
        };
        let committed_header = committed_header.clone();
        Ok(Self {
            local_sync_id,
            sync_info,
            committed_header,
            committed_proof,
            author,
            stage: SyncStage::Preparing,
            fetched: VecDeque::new(),
        })
    }
}

/// Synchronizes the local [VertexStore] with peers.
pub struct BftSync<R, L> {
    me: BftNode,
    store: Rc<RefCell<VertexStore>>,
    pacemaker: Rc<RefCell<dyn Pacemaker>>,
    request_sender: R,
    ledger_sender: L,
    counters: SystemCounters,

    syncing: HashMap<Digest, SyncState>,
    ledger_syncing: BTreeMap<LedgerVersion, Vec<Digest>>,
    bft_syncing: HashMap<(Digest, usize), Vec<Digest>>,
    current_ledger_header: VerifiedLedgerHeaderAndProof,
}

impl<R, L> BftSync<R, L>
where
    R: SyncVerticesRequestSender,
    L: SyncLedgerRequestSender,
{
    pub fn new(
        me: BftNode,
        store: Rc<RefCell<VertexStore>>,
        pacemaker: Rc<RefCell<dyn Pacemaker>>,
        request_sender: R,
        ledger_sender: L,
        counters: SystemCounters,
        current_ledger_header: VerifiedLedgerHeaderAndProof,
    ) -> Self {
        Self {
            me,
            store,
            pacemaker,
            request_sender,
            ledger_sender,
            counters,
            syncing: HashMap::new(),
            ledger_syncing: BTreeMap::new(),
            bft_syncing: HashMap::new(),
            current_ledger_header,
        }
    }

    /// Number of syncs in progress.
    pub fn pending(&self) -> usize {
        self.syncing.len()
    }

    fn requires_ledger_sync(&self, state: &SyncState) -> bool {
        let store = self.store.borrow();
        !store.contains_vertex(state.committed_header.vertex_id())
            && store.root().view() < state.committed_header.view()
    }

    fn start_sync(&mut self, sync_info: SyncInfo, author: BftNode) -> Result<(), Error> {
        let mut state = SyncState::new(sync_info, author)?;
        if self.requires_ledger_sync(&state) {
            // Fetch the committed 3-chain to build a new root from
            state.stage = SyncStage::GetCommittedVertices;
            let id = *state.sync_info.highest_committed_qc().proposed().vertex_id();
            debug!(vertex = %id, author = %state.author, "requesting committed vertices");
            self.send_request(&state, id, COMMITTED_CHAIN);
        } else {
            state.stage = SyncStage::GetQcVertices;
            debug!(vertex = %state.local_sync_id, author = %state.author, "requesting QC vertex");
            self.send_request(&state, state.local_sync_id, 1);
        }
        self.syncing.insert(state.local_sync_id, state);
        Ok(())
    }

    fn send_request(&mut self, state: &SyncState, vertex_id: Digest, count: usize) {
        self.bft_syncing
            .entry((vertex_id, count))
            .or_default()
            .push(state.local_sync_id);
        self.counters.bft_sync_requests_sent.inc();
        self.request_sender.send_get_vertices_request(
            &state.author,
            GetVerticesRequest::new(self.me.clone(), vertex_id, count),
        );
    }

    fn rebuild_and_sync_qc(&mut self, state: SyncState) -> Result<(), Error> {
        info!(
            vertex = %state.local_sync_id,
            root = %self.store.borrow().root(),
            "rebuilding and syncing QC"
        );
        if self.requires_ledger_sync(&state) {
            let mut fetched: Vec<VerifiedVertex> = state.fetched.iter().cloned().collect();
            fetched.sort_by_key(VerifiedVertex::view);
            let root_qc = match fetched.get(1).and_then(VerifiedVertex::qc) {
                Some(qc) => qc.clone(),
                None => {
                    warn!(vertex = %state.local_sync_id, "fetched vertices do not form a chain");
                    return Ok(());
                }
            };
            let root = fetched.remove(0);
            let result = self.store.borrow_mut().rebuild(
                root,
                root_qc,
                state.sync_info.highest_committed_qc().clone(),
                fetched,
            );
            match result {
                Ok(()) => {}
                Err(err @ (Error::EvidenceOfSafetyBreak(_) | Error::AccumulatorFailure(_))) => {
                    return Err(err)
                }
                Err(err) => {
                    warn!(vertex = %state.local_sync_id, ?err, "unable to rebuild");
                    return Ok(());
                }
            }
        } else {
            info!(vertex = %state.local_sync_id, "skipping rebuild");
        }

        // The store is now in sync with the committed state
        self.sync_to_qc(&state.sync_info, Some(&state.author))?;
        Ok(())
    }

    fn process_committed_response(
        &mut self,
        mut state: SyncState,
        response: &GetVerticesResponse,
    ) -> Result<(), Error> {
        info!(
            vertex = %state.local_sync_id,
            sender = %response.sender(),
            "processing committed vertices"
        );
        state.fetched.extend(response.vertices().iter().cloned());

        if state.committed_proof.state_version() <= self.current_ledger_header.state_version() {
            return self.rebuild_and_sync_qc(state);
        }

        // Wait for the ledger to reach the committed state
        state.stage = SyncStage::SyncToCommit;
        self.ledger_syncing
            .entry(state.committed_proof.version())
            .or_default()
            .push(state.local_sync_id);
        self.ledger_sender.send_local_sync_request(LocalSyncRequest::new(
            state.committed_proof.clone(),
            vec![state.author.clone()],
        ));
        self.syncing.insert(state.local_sync_id, state);
        Ok(())
    }

    fn process_qc_response(
        &mut self,
        mut state: SyncState,
        vertex: VerifiedVertex,
    ) -> Result<(), Error> {
        let Some(parent) = vertex.parent_id().copied() else {
            warn!(vertex = %state.local_sync_id, "fetched genesis while syncing QC");
            return Ok(());
        };
        state.fetched.push_front(vertex);

        if !self.store.borrow().contains_vertex(&parent) {
            info!(
                vertex = %state.local_sync_id,
                fetched = state.fetched.len(),
                root = %self.store.borrow().root(),
                "requesting further vertices"
            );
            self.send_request(&state, parent, 1);
            self.syncing.insert(state.local_sync_id, state);
            return Ok(());
        }

        {
            let mut store = self.store.borrow_mut();
            for vertex in &state.fetched {
                let Some(qc) = vertex.qc() else {
                    return Ok(());
                };
                if !store.add_qc(qc)? {
                    info!(vertex = %state.local_sync_id, "unable to add QC of fetched vertex");
                    return Ok(());
                }
                store.insert_vertex(vertex.clone())?;
            }
        }
        self.sync_to_qc(&state.sync_info, Some(&state.author))?;
        Ok(())
    }

    /// Handle vertices served by a peer.
    pub fn process_get_vertices_response(
        &mut self,
        response: &GetVerticesResponse,
    ) -> Result<(), Error> {
        let Some(first) = response.vertices().first() else {
            warn!(sender = %response.sender(), "empty vertices response");
            return Ok(());
        };
        trace!(sender = %response.sender(), vertex = %first, "received vertices");
        let key = (*first.id(), response.vertices().len());
        let Some(syncs) = self.bft_syncing.remove(&key) else {
            trace!(vertex = %first, "no sync waiting for vertices");
            return Ok(());
        };
        for id in syncs {
            // Sync may have been satisfied by another response
            let Some(state) = self.syncing.remove(&id) else {
                continue;
            };
            match state.stage {
                SyncStage::GetCommittedVertices => {
                    self.process_committed_response(state, response)?
                }
                SyncStage::GetQcVertices => self.process_qc_response(state, first.clone())?,
                SyncStage::Preparing | SyncStage::SyncToCommit => {
                    self.syncing.insert(id, state);
                    return Err(Error::UnexpectedSyncResponse(id));
                }
            }
        }
        Ok(())
    }

    /// Handle a peer that could not serve a request by syncing to what it does hold.
    pub fn process_get_vertices_error_response(
        &mut self,
        response: &GetVerticesErrorResponse,
    ) -> Result<(), Error> {
        info!(sender = %response.sender(), sync_info = %response.sync_info(), "received vertices error");
        self.sync_to_qc(response.sync_info(), Some(response.sender()))?;
        Ok(())
    }

    /// Resume syncs that were waiting for the ledger to commit up to the new tip.
    pub fn process_ledger_update(&mut self, update: &LedgerUpdate) -> Result<(), Error> {
        trace!(version = update.tail().state_version(), "ledger update");
        self.current_ledger_header = update.tail().clone();
        let tip = update.tail().version();
        let ready: Vec<LedgerVersion> = self
            .ledger_syncing
            .range(..=tip)
            .map(|(version, _)| *version)
            .collect();
        for version in ready {
            let Some(ids) = self.ledger_syncing.remove(&version) else {
                continue;
            };
            for id in ids {
                if let Some(state) = self.syncing.remove(&id) {
                    self.rebuild_and_sync_qc(state)?;
                }
            }
        }
        Ok(())
    }
}

impl<R, L> BftSyncer for BftSync<R, L>
where
    R: SyncVerticesRequestSender,
    L: SyncLedgerRequestSender,
{
    fn sync_to_qc(
        &mut self,
        sync_info: &SyncInfo,
        author: Option<&BftNode>,
    ) -> Result<SyncResult, Error> {
        let qc = sync_info.highest_qc();
        if qc.view() < self.store.borrow().root().view() {
            return Ok(SyncResult::Invalid);
        }

        if self.store.borrow_mut().add_qc(qc)? {
            let (highest_qc, highest_committed_qc) = {
                let store = self.store.borrow();
                (
                    store.highest_qc().clone(),
                    store.highest_committed_qc().clone(),
                )
            };
            self.pacemaker
                .borrow_mut()
                .process_qc(&highest_qc, &highest_committed_qc)?;
            return Ok(SyncResult::Synced);
        }

        if qc.view().is_genesis() {
            warn!(%sync_info, "bad genesis");
            return Ok(SyncResult::Invalid);
        }

        trace!(%sync_info, "sync required");
        if self.syncing.contains_key(qc.proposed().vertex_id()) {
            return Ok(SyncResult::InProgress);
        }
        let Some(author) = author else {
            return Err(Error::MissingSyncAuthor);
        };
        self.start_sync(sync_info.clone(), author.clone())?;
        Ok(SyncResult::InProgress)
    }
}
