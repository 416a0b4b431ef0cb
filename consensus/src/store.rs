//! In-memory tree of uncommitted vertices.
//!
//! The store holds every vertex that descends from the last committed vertex (the root), each
//! prepared against the ledger. Adding a QC that commits a vertex above the root commits the path
//! up to that vertex, makes it the new root, and prunes every branch that does not descend from
//! it.

use crate::{
    ledger::{CommandStatus, Ledger, PreparedVertex, VerifiedCommandsAndProof},
    metrics::SystemCounters,
    types::{BftHeader, BftUpdate, Command, Digest, QuorumCertificate, SyncInfo, VerifiedVertex},
    Error,
};
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};
use tracing::{debug, info, trace, warn};

/// Notified of every vertex inserted into a [VertexStore].
pub trait BftUpdateSender {
    fn send_bft_update(&self, update: BftUpdate);
}

/// Tree state kept aside while a rebuild is in progress.
struct Snapshot {
    root: PreparedVertex,
    vertices: HashMap<Digest, PreparedVertex>,
    children: HashMap<Digest, HashSet<Digest>>,
    highest_qc: QuorumCertificate,
    highest_committed_qc: QuorumCertificate,
}

/// Uncommitted vertices rooted at the last committed vertex.
pub struct VertexStore {
    ledger: Arc<dyn Ledger>,
    update_sender: Box<dyn BftUpdateSender>,
    counters: SystemCounters,

    root: PreparedVertex,
    vertices: HashMap<Digest, PreparedVertex>,
    children: HashMap<Digest, HashSet<Digest>>,

    highest_qc: QuorumCertificate,
    highest_committed_qc: QuorumCertificate,
}

impl VertexStore {
    /// Create a store rooted at `root`, certified by `root_qc`, which must also commit it.
    pub fn new(
        root: VerifiedVertex,
        root_qc: QuorumCertificate,
        ledger: Arc<dyn Ledger>,
        update_sender: Box<dyn BftUpdateSender>,
        counters: SystemCounters,
    ) -> Result<Self, Error> {
        let root = Self::prepared_root(root, &root_qc, &root_qc)?;
        Ok(Self {
            ledger,
            update_sender,
            counters,
            root,
            vertices: HashMap::new(),
            children: HashMap::new(),
            highest_qc: root_qc.clone(),
            highest_committed_qc: root_qc,
        })
    }

    fn prepared_root(
        root: VerifiedVertex,
        root_qc: &QuorumCertificate,
        root_commit_qc: &QuorumCertificate,
    ) -> Result<PreparedVertex, Error> {
        if root_qc.proposed().vertex_id() != root.id() {
            return Err(Error::InvalidRoot("root QC does not certify the root"));
        }
        let Some((committed, _)) = root_commit_qc.committed_and_proof() else {
            return Err(Error::MissingCommittedHeader(*root.id()));
        };
        if committed.vertex_id() != root.id() {
            return Err(Error::InvalidRoot("commit QC does not commit the root"));
        }
        let header = root_qc.proposed().ledger_header().clone();
        Ok(PreparedVertex::new(root, header, CommandStatus::Ignored))
    }

    /// Replace the whole store with a new root and its descendants.
    ///
    /// `root_commit_qc` must commit `root`. Vertices must be ordered parent first. Vertices the
    /// ledger has already committed past become the new root. On error the store is left as it
    /// was.
    pub fn rebuild(
        &mut self,
        root: VerifiedVertex,
        root_qc: QuorumCertificate,
        root_commit_qc: QuorumCertificate,
        vertices: Vec<VerifiedVertex>,
    ) -> Result<(), Error> {
        let root = Self::prepared_root(root, &root_qc, &root_commit_qc)?;
        info!(root = %root.vertex(), vertices = vertices.len(), "rebuilding vertex store");
        let previous = Snapshot {
            root: std::mem::replace(&mut self.root, root),
            vertices: std::mem::take(&mut self.vertices),
            children: std::mem::take(&mut self.children),
            highest_qc: std::mem::replace(&mut self.highest_qc, root_qc),
            highest_committed_qc: std::mem::replace(
                &mut self.highest_committed_qc,
                root_commit_qc.clone(),
            ),
        };

        match self.rebuild_from(&root_commit_qc, vertices) {
            Ok(inserted) => {
                self.update_size();
                for vertex in inserted {
                    if self.vertices.contains_key(vertex.id()) {
                        self.update_sender.send_bft_update(BftUpdate::new(vertex));
                    }
                }
                Ok(())
            }
            Err(err) => {
                warn!(?err, "rebuild failed, restoring vertex store");
                self.root = previous.root;
                self.vertices = previous.vertices;
                self.children = previous.children;
                self.highest_qc = previous.highest_qc;
                self.highest_committed_qc = previous.highest_committed_qc;
                self.update_size();
                Err(err)
            }
        }
    }

    /// Insert `vertices` above the current root, returning those that were prepared.
    fn rebuild_from(
        &mut self,
        root_commit_qc: &QuorumCertificate,
        vertices: Vec<VerifiedVertex>,
    ) -> Result<Vec<VerifiedVertex>, Error> {
        // Each vertex is certified by the QC of its child, the last by the commit QC
        let certified: Vec<BftHeader> = vertices
            .iter()
            .filter_map(VerifiedVertex::qc)
            .chain(std::iter::once(root_commit_qc))
            .map(|qc| qc.proposed().clone())
            .collect();

        let mut inserted = Vec::new();
        for vertex in vertices {
            if let Some(qc) = vertex.qc() {
                self.add_qc(qc)?;
            }
            if self.contains_vertex(vertex.id()) {
                continue;
            }
            if self.prepare_and_insert(&vertex)?.is_some() {
                inserted.push(vertex);
                continue;
            }

            // The ledger already holds this vertex, so it is committed
            let Some(header) = certified
                .iter()
                .find(|header| header.vertex_id() == vertex.id())
            else {
                debug!(%vertex, "ledger is ahead of uncertified vertex");
                continue;
            };
            let header = header.ledger_header().clone();
            debug!(%vertex, "ledger is ahead, advancing root");
            self.root = PreparedVertex::new(vertex, header, CommandStatus::Ignored);
            self.prune();
        }
        self.add_qc(root_commit_qc)?;
        if self.highest_qc.view() < self.highest_committed_qc.view() {
            self.highest_qc = self.highest_committed_qc.clone();
        }
        Ok(inserted)
    }

    /// The last committed vertex.
    pub fn root(&self) -> &VerifiedVertex {
        self.root.vertex()
    }

    pub fn highest_qc(&self) -> &QuorumCertificate {
        &self.highest_qc
    }

    pub fn highest_committed_qc(&self) -> &QuorumCertificate {
        &self.highest_committed_qc
    }

    /// The highest QCs known, as shared with peers.
    pub fn sync_info(&self) -> Result<SyncInfo, Error> {
        SyncInfo::new(self.highest_qc.clone(), self.highest_committed_qc.clone())
    }

    /// Number of uncommitted vertices.
    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn contains_vertex(&self, id: &Digest) -> bool {
        self.root.id() == id || self.vertices.contains_key(id)
    }

    fn get(&self, id: &Digest) -> Option<&PreparedVertex> {
        if self.root.id() == id {
            return Some(&self.root);
        }
        self.vertices.get(id)
    }

    /// Prepare `vertex` and insert it, returning its executed header.
    ///
    /// Returns `None` if the ledger is already past the vertex.
    pub fn insert_vertex(&mut self, vertex: VerifiedVertex) -> Result<Option<BftHeader>, Error> {
        if let Some(existing) = self.get(vertex.id()) {
            return Ok(Some(existing.header()));
        }
        let Some(header) = self.prepare_and_insert(&vertex)? else {
            return Ok(None);
        };
        self.update_sender.send_bft_update(BftUpdate::new(vertex));
        Ok(Some(header))
    }

    fn prepare_and_insert(&mut self, vertex: &VerifiedVertex) -> Result<Option<BftHeader>, Error> {
        let Some(parent) = vertex.parent_id().copied() else {
            return Err(Error::MissingParent(*vertex.id()));
        };
        if !self.contains_vertex(&parent) {
            return Err(Error::MissingParent(*vertex.id()));
        }

        let path = self.get_path_from_root(&parent);
        let Some(prepared) = self.ledger.prepare(&path, vertex)? else {
            debug!(%vertex, "ledger is ahead of vertex");
            return Ok(None);
        };
        let header = prepared.header();
        trace!(%vertex, status = ?prepared.status(), "inserted vertex");
        self.children.entry(parent).or_default().insert(*vertex.id());
        self.vertices.insert(*vertex.id(), prepared);
        self.update_size();
        Ok(Some(header))
    }

    /// Add a QC, committing whatever it commits.
    ///
    /// Returns false if the certified vertex is not in the store.
    pub fn add_qc(&mut self, qc: &QuorumCertificate) -> Result<bool, Error> {
        if !self.contains_vertex(qc.proposed().vertex_id()) {
            return Ok(false);
        }
        if qc.view() > self.highest_qc.view() {
            self.highest_qc = qc.clone();
        }
        if let Some((committed, _)) = qc.committed_and_proof() {
            self.commit(committed.clone(), qc)?;
        }
        Ok(true)
    }

    fn commit(&mut self, header: BftHeader, qc: &QuorumCertificate) -> Result<(), Error> {
        if header.view() <= self.root.view() {
            return Ok(());
        }
        let tip = *header.vertex_id();
        if !self.vertices.contains_key(&tip) {
            return Err(Error::MissingVertex(tip));
        }
        let Some((_, proof)) = qc.committed_and_proof() else {
            return Err(Error::MissingCommittedHeader(*qc.proposed().vertex_id()));
        };

        let path = self.get_path_from_root(&tip);
        let commands: Vec<Command> = path
            .iter()
            .filter_map(PreparedVertex::successful_command)
            .cloned()
            .collect();
        self.ledger
            .commit(VerifiedCommandsAndProof::new(commands, proof))?;

        let Some(root) = self.vertices.remove(&tip) else {
            return Err(Error::MissingVertex(tip));
        };
        self.root = root;
        self.prune();
        self.counters
            .bft_committed_vertices
            .inc_by(path.len() as u64);
        self.highest_committed_qc = qc.clone();
        if qc.view() >= self.highest_qc.view() {
            self.highest_qc = qc.clone();
        }
        self.update_size();
        info!(root = %self.root.vertex(), committed = path.len(), "committed");
        Ok(())
    }

    /// Drop every vertex that does not descend from the root.
    fn prune(&mut self) {
        let mut keep = HashSet::new();
        let mut stack = vec![*self.root.id()];
        while let Some(id) = stack.pop() {
            if let Some(children) = self.children.get(&id) {
                for child in children {
                    if keep.insert(*child) {
                        stack.push(*child);
                    }
                }
            }
        }
        self.vertices.retain(|id, _| keep.contains(id));
        let root = *self.root.id();
        self.children
            .retain(|id, _| *id == root || keep.contains(id));
    }

    fn update_size(&self) {
        self.counters
            .bft_vertex_store_size
            .set(self.vertices.len() as i64);
    }

    /// Vertices from the root (exclusive) to `id` (inclusive).
    pub fn get_path_from_root(&self, id: &Digest) -> Vec<PreparedVertex> {
        let mut path = Vec::new();
        let mut next = Some(*id);
        while let Some(id) = next {
            let Some(vertex) = self.vertices.get(&id) else {
                break;
            };
            next = vertex.vertex().parent_id().copied();
            path.push(vertex.clone());
        }
        path.reverse();
        path
    }

    /// `count` vertices starting at `id` and walking towards the root.
    ///
    /// Returns `None` if the store does not hold that many.
    pub fn get_vertices(&self, id: &Digest, count: usize) -> Option<Vec<VerifiedVertex>> {
        let mut vertices = Vec::new();
        let mut next = *id;
        while vertices.len() < count {
            let vertex = self.get(&next)?.vertex();
            vertices.push(vertex.clone());
            if vertices.len() == count {
                break;
            }
            next = *vertex.parent_id()?;
        }
        Some(vertices)
    }
}
