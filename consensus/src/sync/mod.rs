//! Fetching missing vertices from peers.
//!
//! When a node sees a QC for a vertex it does not hold, [BftSync] requests the vertex (and, if
//! needed, its ancestors) from the peer that sent the QC. If the peer's committed state is ahead of
//! the local root, the node instead fetches the three vertices of the committed 3-chain, waits for
//! the ledger to catch up, and rebuilds its [crate::store::VertexStore] from them.
//!
//! [Server] answers the same requests for peers.

use crate::{
    types::{BftNode, Digest, SyncInfo, VerifiedLedgerHeaderAndProof, VerifiedVertex},
    Error,
};

mod server;
pub use server::Server;
mod syncer;
pub use syncer::BftSync;

/// Outcome of [BftSyncer::sync_to_qc].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncResult {
    /// The QC is in the store.
    Synced,
    /// The QC's vertex is being fetched.
    InProgress,
    /// The QC can never be synced to.
    Invalid,
}

/// Brings the local store up to date with a peer's [SyncInfo].
pub trait BftSyncer {
    /// Ensure the vertex certified by the highest QC of `sync_info` is in the store.
    ///
    /// `author` is the peer to fetch from and is required whenever fetching is needed.
    fn sync_to_qc(
        &mut self,
        sync_info: &SyncInfo,
        author: Option<&BftNode>,
    ) -> Result<SyncResult, Error>;
}

/// Request for the vertex `vertex_id` and its `count - 1` closest ancestors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GetVerticesRequest {
    sender: BftNode,
    vertex_id: Digest,
    count: usize,
}

impl GetVerticesRequest {
    pub fn new(sender: BftNode, vertex_id: Digest, count: usize) -> Self {
        Self {
            sender,
            vertex_id,
            count,
        }
    }

    /// The node that sent the request.
    pub fn sender(&self) -> &BftNode {
        &self.sender
    }

    pub fn vertex_id(&self) -> &Digest {
        &self.vertex_id
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

/// Vertices served for a [GetVerticesRequest], starting at the requested vertex.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GetVerticesResponse {
    sender: BftNode,
    vertices: Vec<VerifiedVertex>,
}

impl GetVerticesResponse {
    pub fn new(sender: BftNode, vertices: Vec<VerifiedVertex>) -> Self {
        Self { sender, vertices }
    }

    /// The node that served the request.
    pub fn sender(&self) -> &BftNode {
        &self.sender
    }

    pub fn vertices(&self) -> &[VerifiedVertex] {
        &self.vertices
    }
}

/// Sent instead of a [GetVerticesResponse] when the vertices are no longer (or not yet) held.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GetVerticesErrorResponse {
    sender: BftNode,
    sync_info: SyncInfo,
}

impl GetVerticesErrorResponse {
    pub fn new(sender: BftNode, sync_info: SyncInfo) -> Self {
        Self { sender, sync_info }
    }

    pub fn sender(&self) -> &BftNode {
        &self.sender
    }

    /// The highest QCs of the sender.
    pub fn sync_info(&self) -> &SyncInfo {
        &self.sync_info
    }
}

/// Request to bring the local ledger up to `target`, fetching from `targets`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalSyncRequest {
    target: VerifiedLedgerHeaderAndProof,
    targets: Vec<BftNode>,
}

impl LocalSyncRequest {
    pub fn new(target: VerifiedLedgerHeaderAndProof, targets: Vec<BftNode>) -> Self {
        Self { target, targets }
    }

    pub fn target(&self) -> &VerifiedLedgerHeaderAndProof {
        &self.target
    }

    pub fn targets(&self) -> &[BftNode] {
        &self.targets
    }
}

/// Sends vertex requests to peers.
pub trait SyncVerticesRequestSender {
    fn send_get_vertices_request(&self, node: &BftNode, request: GetVerticesRequest);
}

/// Sends answers to vertex requests.
pub trait SyncVerticesResponseSender {
    fn send_get_vertices_response(&self, node: &BftNode, response: GetVerticesResponse);
    fn send_get_vertices_error_response(&self, node: &BftNode, response: GetVerticesErrorResponse);
}

/// Hands ledger sync requests to the ledger sync service.
pub trait SyncLedgerRequestSender {
    fn send_local_sync_request(&self, request: LocalSyncRequest);
}
