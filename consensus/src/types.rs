//! Chain data model shared across the crate.
//!
//! - [View]: a monotonically increasing round counter. One leader is designated per view.
//! - [BftHeader]: a pointer into the chain (view and vertex id) plus the [LedgerHeader] produced
//!   by executing the vertex.
//! - [VoteData]: the proposed, parent and (optionally) committed headers a vote attests to.
//! - [QuorumCertificate]: a [VoteData] signed by a weighted quorum of validators.
//! - [UnverifiedVertex] / [VerifiedVertex]: a proposed command extending the vertex certified by
//!   its QC. A verified vertex carries its content-hash id.
//! - [SyncInfo]: the highest QC and highest committed QC known to a node, piggybacked on votes
//!   and view timeouts so that receivers can detect they are behind.
//! - [Proposal], [Vote], [ViewTimeoutSigned]: the consensus messages exchanged between nodes.

use crate::{
    crypto::{Hasher, HasherExt},
    validators::BftValidatorSet,
    Error,
};
use bytes::{BufMut, Bytes};
use commonware_codec::{EncodeSize, Write};
use commonware_utils::hex;
use std::{
    collections::BTreeMap,
    fmt::{self, Display, Formatter},
};

/// A round of consensus.
///
/// Views are totally ordered and start at [View::genesis].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct View(u64);

impl View {
    /// Returns the genesis view.
    pub const fn genesis() -> Self {
        Self(0)
    }

    /// Creates a new view from a u64 value.
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the underlying u64 value.
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Returns true if this is the genesis view.
    pub const fn is_genesis(self) -> bool {
        self.0 == 0
    }

    /// Returns the next view.
    ///
    /// # Panics
    ///
    /// Panics if the view would overflow u64::MAX.
    pub const fn next(self) -> Self {
        Self(self.0.checked_add(1).expect("view overflow"))
    }

    /// Returns the previous view, or `None` if this is the genesis view.
    pub fn previous(self) -> Option<Self> {
        self.0.checked_sub(1).map(Self)
    }

    /// Number of views strictly between `self` and `later`.
    pub const fn views_until(self, later: Self) -> u64 {
        later.0.saturating_sub(self.0).saturating_sub(1)
    }
}

impl Display for View {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Write for View {
    fn write(&self, buf: &mut impl BufMut) {
        self.0.write(buf);
    }
}

impl EncodeSize for View {
    fn encode_size(&self) -> usize {
        self.0.encode_size()
    }
}

/// Length of a [Digest] in bytes.
pub const DIGEST_LENGTH: usize = 32;

/// Output of a [Hasher]. Vertex ids are digests.
#[derive(Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Digest([u8; DIGEST_LENGTH]);

impl Digest {
    pub const fn new(bytes: [u8; DIGEST_LENGTH]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Digest {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Display for Digest {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex(&self.0[..4]))
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex(&self.0))
    }
}

impl Write for Digest {
    fn write(&self, buf: &mut impl BufMut) {
        self.0.write(buf);
    }
}

impl EncodeSize for Digest {
    fn encode_size(&self) -> usize {
        DIGEST_LENGTH
    }
}

/// Identity of a validator: the encoded public key it signs with.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BftNode(Bytes);

impl BftNode {
    pub fn key(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for BftNode {
    fn from(key: Vec<u8>) -> Self {
        Self(Bytes::from(key))
    }
}

impl Display for BftNode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let len = self.0.len().min(4);
        write!(f, "{}", hex(&self.0[self.0.len() - len..]))
    }
}

impl fmt::Debug for BftNode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex(&self.0))
    }
}

impl Write for BftNode {
    fn write(&self, buf: &mut impl BufMut) {
        self.0.write(buf);
    }
}

impl EncodeSize for BftNode {
    fn encode_size(&self) -> usize {
        self.0.encode_size()
    }
}

/// An opaque signature over a [Digest].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Signature(Bytes);

impl From<Vec<u8>> for Signature {
    fn from(signature: Vec<u8>) -> Self {
        Self(Bytes::from(signature))
    }
}

impl AsRef<[u8]> for Signature {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Write for Signature {
    fn write(&self, buf: &mut impl BufMut) {
        self.0.write(buf);
    }
}

impl EncodeSize for Signature {
    fn encode_size(&self) -> usize {
        self.0.encode_size()
    }
}

/// An application command ordered by consensus. The core treats its payload as opaque.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Command(Bytes);

impl Command {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self(payload.into())
    }

    pub fn payload(&self) -> &Bytes {
        &self.0
    }
}

impl Write for Command {
    fn write(&self, buf: &mut impl BufMut) {
        self.0.write(buf);
    }
}

impl EncodeSize for Command {
    fn encode_size(&self) -> usize {
        self.0.encode_size()
    }
}

/// Position of the ledger after executing some prefix of commands.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct AccumulatorState {
    state_version: u64,
    accumulator_hash: Digest,
}

impl AccumulatorState {
    pub const fn new(state_version: u64, accumulator_hash: Digest) -> Self {
        Self {
            state_version,
            accumulator_hash,
        }
    }

    pub const fn state_version(&self) -> u64 {
        self.state_version
    }

    pub const fn accumulator_hash(&self) -> &Digest {
        &self.accumulator_hash
    }
}

impl Write for AccumulatorState {
    fn write(&self, buf: &mut impl BufMut) {
        self.state_version.write(buf);
        self.accumulator_hash.write(buf);
    }
}

impl EncodeSize for AccumulatorState {
    fn encode_size(&self) -> usize {
        self.state_version.encode_size() + self.accumulator_hash.encode_size()
    }
}

/// Ordering key of ledger headers: epoch, then end-of-epoch, then state version.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LedgerVersion {
    pub epoch: u64,
    pub end_of_epoch: bool,
    pub state_version: u64,
}

/// Execution metadata of a vertex.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LedgerHeader {
    epoch: u64,
    view: View,
    accumulator_state: AccumulatorState,
    timestamp: u64,
    next_validator_set: Option<BftValidatorSet>,
}

impl LedgerHeader {
    pub fn new(
        epoch: u64,
        view: View,
        accumulator_state: AccumulatorState,
        timestamp: u64,
        next_validator_set: Option<BftValidatorSet>,
    ) -> Self {
        Self {
            epoch,
            view,
            accumulator_state,
            timestamp,
            next_validator_set,
        }
    }

    /// Header of the genesis vertex of epoch zero.
    pub fn genesis(accumulator_state: AccumulatorState) -> Self {
        Self::new(0, View::genesis(), accumulator_state, 0, None)
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn view(&self) -> View {
        self.view
    }

    pub fn accumulator_state(&self) -> &AccumulatorState {
        &self.accumulator_state
    }

    pub fn state_version(&self) -> u64 {
        self.accumulator_state.state_version
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn next_validator_set(&self) -> Option<&BftValidatorSet> {
        self.next_validator_set.as_ref()
    }

    /// An end-of-epoch header carries the validator set of the next epoch.
    pub fn is_end_of_epoch(&self) -> bool {
        self.next_validator_set.is_some()
    }

    /// Returns a copy of this header positioned at a later view.
    pub fn update_view_and_timestamp(&self, view: View, timestamp: u64) -> Self {
        Self {
            view,
            timestamp,
            ..self.clone()
        }
    }

    pub fn version(&self) -> LedgerVersion {
        LedgerVersion {
            epoch: self.epoch,
            end_of_epoch: self.is_end_of_epoch(),
            state_version: self.state_version(),
        }
    }
}

impl Write for LedgerHeader {
    fn write(&self, buf: &mut impl BufMut) {
        self.epoch.write(buf);
        self.view.write(buf);
        self.accumulator_state.write(buf);
        self.timestamp.write(buf);
        self.next_validator_set.write(buf);
    }
}

impl EncodeSize for LedgerHeader {
    fn encode_size(&self) -> usize {
        self.epoch.encode_size()
            + self.view.encode_size()
            + self.accumulator_state.encode_size()
            + self.timestamp.encode_size()
            + self.next_validator_set.encode_size()
    }
}

/// A pointer into the chain plus the result of executing the vertex it points to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BftHeader {
    view: View,
    vertex_id: Digest,
    ledger_header: LedgerHeader,
}

impl BftHeader {
    pub fn new(view: View, vertex_id: Digest, ledger_header: LedgerHeader) -> Self {
        Self {
            view,
            vertex_id,
            ledger_header,
        }
    }

    pub fn view(&self) -> View {
        self.view
    }

    pub fn vertex_id(&self) -> &Digest {
        &self.vertex_id
    }

    pub fn ledger_header(&self) -> &LedgerHeader {
        &self.ledger_header
    }
}

impl Display for BftHeader {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.vertex_id, self.view)
    }
}

impl Write for BftHeader {
    fn write(&self, buf: &mut impl BufMut) {
        self.view.write(buf);
        self.vertex_id.write(buf);
        self.ledger_header.write(buf);
    }
}

impl EncodeSize for BftHeader {
    fn encode_size(&self) -> usize {
        self.view.encode_size() + self.vertex_id.encode_size() + self.ledger_header.encode_size()
    }
}

/// The headers a vote attests to.
///
/// `committed` is set only when a quorum on `proposed` completes a chain of three direct
/// parent links.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct VoteData {
    proposed: BftHeader,
    parent: BftHeader,
    committed: Option<BftHeader>,
}

impl VoteData {
    pub fn new(proposed: BftHeader, parent: BftHeader, committed: Option<BftHeader>) -> Self {
        Self {
            proposed,
            parent,
            committed,
        }
    }

    pub fn proposed(&self) -> &BftHeader {
        &self.proposed
    }

    pub fn parent(&self) -> &BftHeader {
        &self.parent
    }

    pub fn committed(&self) -> Option<&BftHeader> {
        self.committed.as_ref()
    }
}

impl Write for VoteData {
    fn write(&self, buf: &mut impl BufMut) {
        self.proposed.write(buf);
        self.parent.write(buf);
        self.committed.write(buf);
    }
}

impl EncodeSize for VoteData {
    fn encode_size(&self) -> usize {
        self.proposed.encode_size() + self.parent.encode_size() + self.committed.encode_size()
    }
}

/// [VoteData] plus the voter's local time. Votes are signed over this.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TimestampedVoteData {
    vote_data: VoteData,
    node_timestamp: u64,
}

impl TimestampedVoteData {
    pub fn new(vote_data: VoteData, node_timestamp: u64) -> Self {
        Self {
            vote_data,
            node_timestamp,
        }
    }

    pub fn vote_data(&self) -> &VoteData {
        &self.vote_data
    }

    pub fn node_timestamp(&self) -> u64 {
        self.node_timestamp
    }
}

impl Write for TimestampedVoteData {
    fn write(&self, buf: &mut impl BufMut) {
        self.vote_data.write(buf);
        self.node_timestamp.write(buf);
    }
}

impl EncodeSize for TimestampedVoteData {
    fn encode_size(&self) -> usize {
        self.vote_data.encode_size() + self.node_timestamp.encode_size()
    }
}

/// A signature with the signer's timestamp and voting power.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TimestampedSignature {
    pub timestamp: u64,
    pub weight: u64,
    pub signature: Signature,
}

impl Write for TimestampedSignature {
    fn write(&self, buf: &mut impl BufMut) {
        self.timestamp.write(buf);
        self.weight.write(buf);
        self.signature.write(buf);
    }
}

impl EncodeSize for TimestampedSignature {
    fn encode_size(&self) -> usize {
        self.timestamp.encode_size() + self.weight.encode_size() + self.signature.encode_size()
    }
}

/// Aggregated signatures of a quorum, keyed by signer.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct TimestampedSignatures(BTreeMap<BftNode, TimestampedSignature>);

impl TimestampedSignatures {
    pub fn new(signatures: BTreeMap<BftNode, TimestampedSignature>) -> Self {
        Self(signatures)
    }

    pub fn count(&self) -> usize {
        self.0.len()
    }

    pub fn signers(&self) -> impl Iterator<Item = &BftNode> {
        self.0.keys()
    }

    pub fn get(&self, node: &BftNode) -> Option<&TimestampedSignature> {
        self.0.get(node)
    }

    /// Weighted median of the signers' timestamps, or `None` if nobody signed.
    pub fn weighted_timestamp(&self) -> Option<u64> {
        let total: u128 = self.0.values().map(|s| u128::from(s.weight)).sum();
        if total == 0 {
            return None;
        }
        let mut weighted: Vec<(u64, u64)> =
            self.0.values().map(|s| (s.timestamp, s.weight)).collect();
        weighted.sort_unstable();
        let mut median = total / 2;
        for (timestamp, weight) in weighted {
            let weight = u128::from(weight);
            if median < weight {
                return Some(timestamp);
            }
            median -= weight;
        }
        None
    }
}

impl Write for TimestampedSignatures {
    fn write(&self, buf: &mut impl BufMut) {
        (self.0.len() as u64).write(buf);
        for (node, signature) in &self.0 {
            node.write(buf);
            signature.write(buf);
        }
    }
}

impl EncodeSize for TimestampedSignatures {
    fn encode_size(&self) -> usize {
        (self.0.len() as u64).encode_size()
            + self
                .0
                .iter()
                .map(|(node, signature)| node.encode_size() + signature.encode_size())
                .sum::<usize>()
    }
}

/// Proof that a ledger header was committed by a quorum.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct VerifiedLedgerHeaderAndProof {
    proposed: BftHeader,
    parent: BftHeader,
    committed: BftHeader,
    signatures: TimestampedSignatures,
}

impl VerifiedLedgerHeaderAndProof {
    pub fn new(
        proposed: BftHeader,
        parent: BftHeader,
        committed: BftHeader,
        signatures: TimestampedSignatures,
    ) -> Self {
        Self {
            proposed,
            parent,
            committed,
            signatures,
        }
    }

    /// Proof of the genesis state, which needs no signatures.
    pub fn genesis(header: BftHeader) -> Self {
        Self::new(
            header.clone(),
            header.clone(),
            header,
            TimestampedSignatures::default(),
        )
    }

    pub fn ledger_header(&self) -> &LedgerHeader {
        self.committed.ledger_header()
    }

    pub fn committed(&self) -> &BftHeader {
        &self.committed
    }

    pub fn epoch(&self) -> u64 {
        self.ledger_header().epoch()
    }

    pub fn state_version(&self) -> u64 {
        self.ledger_header().state_version()
    }

    pub fn accumulator_state(&self) -> &AccumulatorState {
        self.ledger_header().accumulator_state()
    }

    pub fn is_end_of_epoch(&self) -> bool {
        self.ledger_header().is_end_of_epoch()
    }

    pub fn version(&self) -> LedgerVersion {
        self.ledger_header().version()
    }
}

/// A [VoteData] signed by a quorum of validators.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct QuorumCertificate {
    vote_data: VoteData,
    signatures: TimestampedSignatures,
}

impl QuorumCertificate {
    pub fn new(vote_data: VoteData, signatures: TimestampedSignatures) -> Self {
        Self {
            vote_data,
            signatures,
        }
    }

    /// The self-certifying QC of the genesis vertex, which commits genesis itself.
    pub fn genesis(vertex: &VerifiedVertex, ledger_header: LedgerHeader) -> Self {
        let header = BftHeader::new(vertex.view(), *vertex.id(), ledger_header);
        let vote_data = VoteData::new(header.clone(), header.clone(), Some(header));
        Self::new(vote_data, TimestampedSignatures::default())
    }

    /// View of the certified vertex.
    pub fn view(&self) -> View {
        self.vote_data.proposed.view
    }

    pub fn vote_data(&self) -> &VoteData {
        &self.vote_data
    }

    pub fn proposed(&self) -> &BftHeader {
        &self.vote_data.proposed
    }

    pub fn parent(&self) -> &BftHeader {
        &self.vote_data.parent
    }

    pub fn signatures(&self) -> &TimestampedSignatures {
        &self.signatures
    }

    /// The header this QC commits and the proof that it was committed.
    pub fn committed_and_proof(&self) -> Option<(&BftHeader, VerifiedLedgerHeaderAndProof)> {
        self.vote_data.committed.as_ref().map(|committed| {
            let proof = VerifiedLedgerHeaderAndProof::new(
                self.vote_data.proposed.clone(),
                self.vote_data.parent.clone(),
                committed.clone(),
                self.signatures.clone(),
            );
            (committed, proof)
        })
    }
}

impl Display for QuorumCertificate {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "QC{{{}}}", self.vote_data.proposed)
    }
}

impl Write for QuorumCertificate {
    fn write(&self, buf: &mut impl BufMut) {
        self.vote_data.write(buf);
        self.signatures.write(buf);
    }
}

impl EncodeSize for QuorumCertificate {
    fn encode_size(&self) -> usize {
        self.vote_data.encode_size() + self.signatures.encode_size()
    }
}

/// A vertex as received from the network, before its id is computed.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct UnverifiedVertex {
    qc: Option<QuorumCertificate>,
    view: View,
    command: Option<Command>,
}

impl UnverifiedVertex {
    /// The genesis vertex has no QC and no command.
    pub fn genesis() -> Self {
        Self {
            qc: None,
            view: View::genesis(),
            command: None,
        }
    }

    pub fn new(qc: QuorumCertificate, view: View, command: Option<Command>) -> Self {
        Self {
            qc: Some(qc),
            view,
            command,
        }
    }

    pub fn qc(&self) -> Option<&QuorumCertificate> {
        self.qc.as_ref()
    }

    pub fn view(&self) -> View {
        self.view
    }

    pub fn command(&self) -> Option<&Command> {
        self.command.as_ref()
    }
}

impl Write for UnverifiedVertex {
    fn write(&self, buf: &mut impl BufMut) {
        self.qc.write(buf);
        self.view.write(buf);
        self.command.write(buf);
    }
}

impl EncodeSize for UnverifiedVertex {
    fn encode_size(&self) -> usize {
        self.qc.encode_size() + self.view.encode_size() + self.command.encode_size()
    }
}

/// A vertex whose id has been computed from its contents.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct VerifiedVertex {
    vertex: UnverifiedVertex,
    id: Digest,
}

impl VerifiedVertex {
    /// Compute the id of `vertex` with `hasher`.
    pub fn new(vertex: UnverifiedVertex, hasher: &dyn Hasher) -> Self {
        let id = hasher.hash(&vertex);
        Self { vertex, id }
    }

    pub fn id(&self) -> &Digest {
        &self.id
    }

    pub fn view(&self) -> View {
        self.vertex.view
    }

    pub fn command(&self) -> Option<&Command> {
        self.vertex.command.as_ref()
    }

    pub fn qc(&self) -> Option<&QuorumCertificate> {
        self.vertex.qc.as_ref()
    }

    pub fn unverified(&self) -> &UnverifiedVertex {
        &self.vertex
    }

    pub fn is_genesis(&self) -> bool {
        self.vertex.qc.is_none()
    }

    /// Id of the parent vertex. Genesis has none.
    pub fn parent_id(&self) -> Option<&Digest> {
        self.parent_header().map(BftHeader::vertex_id)
    }

    pub fn parent_header(&self) -> Option<&BftHeader> {
        self.qc().map(QuorumCertificate::proposed)
    }

    pub fn grandparent_header(&self) -> Option<&BftHeader> {
        self.qc().map(QuorumCertificate::parent)
    }

    /// True if this vertex, its parent, or its grandparent is at the genesis view.
    pub fn touches_genesis(&self) -> bool {
        match (self.parent_header(), self.grandparent_header()) {
            (Some(parent), Some(grandparent)) => {
                self.view().is_genesis()
                    || parent.view().is_genesis()
                    || grandparent.view().is_genesis()
            }
            _ => true,
        }
    }

    /// True if the parent sits at the immediately preceding view.
    pub fn has_direct_parent(&self) -> bool {
        self.parent_header()
            .is_some_and(|parent| parent.view().next() == self.view())
    }

    /// True if the grandparent sits at the view immediately preceding the parent.
    pub fn parent_has_direct_parent(&self) -> bool {
        match (self.parent_header(), self.grandparent_header()) {
            (Some(parent), Some(grandparent)) => grandparent.view().next() == parent.view(),
            _ => false,
        }
    }
}

impl Display for VerifiedVertex {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.view())
    }
}

/// The highest QC and highest committed QC known to a node.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SyncInfo {
    highest_qc: QuorumCertificate,
    // Omitted when the committed QC is the highest QC
    highest_committed_qc: Option<QuorumCertificate>,
}

impl SyncInfo {
    /// Create a [SyncInfo], rejecting incoherent pairs.
    pub fn new(
        highest_qc: QuorumCertificate,
        highest_committed_qc: QuorumCertificate,
    ) -> Result<Self, Error> {
        if highest_committed_qc.vote_data().committed().is_none() {
            return Err(Error::InvalidSyncInfo("committed QC has no committed header"));
        }
        if highest_committed_qc.view() > highest_qc.view() {
            return Err(Error::InvalidSyncInfo(
                "committed QC is higher than the highest QC",
            ));
        }
        if highest_committed_qc.view() == highest_qc.view() {
            if highest_committed_qc != highest_qc {
                return Err(Error::InvalidSyncInfo(
                    "QCs at the same view must be equal",
                ));
            }
            return Ok(Self {
                highest_qc,
                highest_committed_qc: None,
            });
        }
        Ok(Self {
            highest_qc,
            highest_committed_qc: Some(highest_committed_qc),
        })
    }

    pub fn highest_qc(&self) -> &QuorumCertificate {
        &self.highest_qc
    }

    pub fn highest_committed_qc(&self) -> &QuorumCertificate {
        self.highest_committed_qc
            .as_ref()
            .unwrap_or(&self.highest_qc)
    }
}

impl Display for SyncInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SyncInfo{{highest={} committed={}}}",
            self.highest_qc,
            self.highest_committed_qc()
        )
    }
}

/// A signed vote for a proposed vertex.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Vote {
    author: BftNode,
    vote_data: TimestampedVoteData,
    signature: Signature,
    sync_info: SyncInfo,
}

impl Vote {
    pub fn new(
        author: BftNode,
        vote_data: TimestampedVoteData,
        signature: Signature,
        sync_info: SyncInfo,
    ) -> Self {
        Self {
            author,
            vote_data,
            signature,
            sync_info,
        }
    }

    pub fn author(&self) -> &BftNode {
        &self.author
    }

    /// View of the vertex voted for.
    pub fn view(&self) -> View {
        self.vote_data.vote_data().proposed().view()
    }

    pub fn vote_data(&self) -> &VoteData {
        self.vote_data.vote_data()
    }

    pub fn timestamped_vote_data(&self) -> &TimestampedVoteData {
        &self.vote_data
    }

    pub fn timestamp(&self) -> u64 {
        self.vote_data.node_timestamp()
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn sync_info(&self) -> &SyncInfo {
        &self.sync_info
    }
}

/// A node's request to move to a view, sent to the leader of that view.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ViewTimeout {
    author: BftNode,
    epoch: u64,
    view: View,
}

impl ViewTimeout {
    pub fn new(author: BftNode, epoch: u64, view: View) -> Self {
        Self {
            author,
            epoch,
            view,
        }
    }

    pub fn author(&self) -> &BftNode {
        &self.author
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn view(&self) -> View {
        self.view
    }
}

impl Write for ViewTimeout {
    fn write(&self, buf: &mut impl BufMut) {
        self.author.write(buf);
        self.epoch.write(buf);
        self.view.write(buf);
    }
}

impl EncodeSize for ViewTimeout {
    fn encode_size(&self) -> usize {
        self.author.encode_size() + self.epoch.encode_size() + self.view.encode_size()
    }
}

/// A signed [ViewTimeout] with the sender's [SyncInfo].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ViewTimeoutSigned {
    timeout: ViewTimeout,
    sync_info: SyncInfo,
    signature: Signature,
}

impl ViewTimeoutSigned {
    pub fn new(timeout: ViewTimeout, sync_info: SyncInfo, signature: Signature) -> Self {
        Self {
            timeout,
            sync_info,
            signature,
        }
    }

    pub fn timeout(&self) -> &ViewTimeout {
        &self.timeout
    }

    pub fn author(&self) -> &BftNode {
        &self.timeout.author
    }

    pub fn view(&self) -> View {
        self.timeout.view
    }

    pub fn sync_info(&self) -> &SyncInfo {
        &self.sync_info
    }

    pub fn qc(&self) -> &QuorumCertificate {
        self.sync_info.highest_qc()
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }
}

/// A leader's signed proposal of a new vertex.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Proposal {
    vertex: UnverifiedVertex,
    committed_qc: QuorumCertificate,
    author: BftNode,
    signature: Signature,
}

impl Proposal {
    pub fn new(
        vertex: UnverifiedVertex,
        committed_qc: QuorumCertificate,
        author: BftNode,
        signature: Signature,
    ) -> Self {
        Self {
            vertex,
            committed_qc,
            author,
            signature,
        }
    }

    pub fn vertex(&self) -> &UnverifiedVertex {
        &self.vertex
    }

    pub fn view(&self) -> View {
        self.vertex.view
    }

    pub fn author(&self) -> &BftNode {
        &self.author
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn committed_qc(&self) -> &QuorumCertificate {
        &self.committed_qc
    }

    /// The QC of the proposed vertex and the proposer's highest committed QC.
    pub fn sync_info(&self) -> Result<SyncInfo, Error> {
        let qc = self.vertex.qc().ok_or(Error::InvalidSyncInfo(
            "proposal does not extend a certified vertex",
        ))?;
        SyncInfo::new(qc.clone(), self.committed_qc.clone())
    }
}

/// Notification that a vertex was inserted into the local store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BftUpdate {
    inserted: VerifiedVertex,
}

impl BftUpdate {
    pub fn new(inserted: VerifiedVertex) -> Self {
        Self { inserted }
    }

    pub fn inserted(&self) -> &VerifiedVertex {
        &self.inserted
    }
}

/// Any consensus message received from a peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConsensusEvent {
    Proposal(Proposal),
    Vote(Vote),
    ViewTimeout(ViewTimeoutSigned),
}

impl ConsensusEvent {
    pub fn author(&self) -> &BftNode {
        match self {
            Self::Proposal(proposal) => proposal.author(),
            Self::Vote(vote) => vote.author(),
            Self::ViewTimeout(timeout) => timeout.author(),
        }
    }

    pub fn view(&self) -> View {
        match self {
            Self::Proposal(proposal) => proposal.view(),
            Self::Vote(vote) => vote.view(),
            Self::ViewTimeout(timeout) => timeout.view(),
        }
    }
}
