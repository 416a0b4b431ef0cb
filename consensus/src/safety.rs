//! Voting rules that keep a node from contributing to conflicting commits.
//!
//! A node tracks the last view it voted in and the view it is locked on. It never votes twice in
//! the same (or an earlier) view and never votes for a vertex whose parent is older than its lock.
//! Voting for a vertex locks on the vertex's grandparent (the HotStuff pre-commit).

use crate::{
    crypto::{HashSigner, Hasher, HasherExt},
    types::{
        BftHeader, BftNode, Proposal, QuorumCertificate, SyncInfo, TimestampedVoteData,
        UnverifiedVertex, VerifiedVertex, View, Vote, VoteData,
    },
};
use std::sync::Arc;
use thiserror::Error;

/// A vote that would break safety.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Violation {
    #[error("violates earlier vote at view {0}")]
    EarlierVote(View),
    #[error("does not respect locked view {0}")]
    LockedView(View),
    #[error("vertex has no parent")]
    NoParent,
}

/// The safety state of a node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SafetyState {
    last_voted_view: View,
    locked_view: View,
}

impl SafetyState {
    pub fn new(last_voted_view: View, locked_view: View) -> Self {
        Self {
            last_voted_view,
            locked_view,
        }
    }

    pub fn last_voted_view(&self) -> View {
        self.last_voted_view
    }

    pub fn locked_view(&self) -> View {
        self.locked_view
    }
}

/// Signs proposals and votes while enforcing the voting rules.
///
/// Each node must own exactly one instance.
pub struct SafetyRules<S: HashSigner> {
    me: BftNode,
    hasher: Arc<dyn Hasher>,
    signer: S,
    state: SafetyState,
}

impl<S: HashSigner> SafetyRules<S> {
    pub fn new(me: BftNode, state: SafetyState, hasher: Arc<dyn Hasher>, signer: S) -> Self {
        Self {
            me,
            hasher,
            signer,
            state,
        }
    }

    pub fn state(&self) -> SafetyState {
        self.state
    }

    /// Sign a vertex proposed by this node.
    pub fn sign_proposal(
        &self,
        vertex: UnverifiedVertex,
        highest_committed_qc: QuorumCertificate,
    ) -> Proposal {
        let digest = self.hasher.hash(&vertex);
        let signature = self.signer.sign(&digest);
        Proposal::new(vertex, highest_committed_qc, self.me.clone(), signature)
    }

    /// Build the [VoteData] for a vertex, committing the grandparent if the vertex completes a
    /// chain of three direct links that does not touch genesis.
    fn vote_data(vertex: &VerifiedVertex, proposed: BftHeader, parent: BftHeader) -> VoteData {
        let committed = if vertex.touches_genesis()
            || !vertex.has_direct_parent()
            || !vertex.parent_has_direct_parent()
        {
            None
        } else {
            vertex.grandparent_header().cloned()
        };
        VoteData::new(proposed, parent, committed)
    }

    /// Vote for a vertex executed to `header`.
    pub fn vote_for(
        &mut self,
        vertex: &VerifiedVertex,
        header: BftHeader,
        timestamp: u64,
        sync_info: SyncInfo,
    ) -> Result<Vote, Violation> {
        // Ensure the vertex does not violate earlier votes
        if vertex.view() <= self.state.last_voted_view {
            return Err(Violation::EarlierVote(self.state.last_voted_view));
        }
        let (Some(parent), Some(grandparent)) =
            (vertex.parent_header(), vertex.grandparent_header())
        else {
            return Err(Violation::NoParent);
        };
        if parent.view() < self.state.locked_view {
            return Err(Violation::LockedView(self.state.locked_view));
        }

        // Pre-commit on the grandparent
        let mut next = self.state;
        next.last_voted_view = vertex.view();
        if grandparent.view() > next.locked_view {
            next.locked_view = grandparent.view();
        }

        let vote_data = TimestampedVoteData::new(
            Self::vote_data(vertex, header, parent.clone()),
            timestamp,
        );
        let digest = self.hasher.hash(&vote_data);
        self.state = next;
        let signature = self.signer.sign(&digest);
        Ok(Vote::new(self.me.clone(), vote_data, signature, sync_info))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        crypto::Sha256Hasher,
        mocks::crypto::Keys,
        types::{tests, Command},
    };

    fn rules() -> SafetyRules<Keys> {
        let keys = Keys::from_seed(0);
        SafetyRules::new(
            keys.node(),
            SafetyState::default(),
            Arc::new(Sha256Hasher),
            keys,
        )
    }

    fn vertex(view: u64, parent: u64, grandparent: u64) -> VerifiedVertex {
        let qc = tests::qc(tests::header(parent, 1), tests::header(grandparent, 2), None);
        VerifiedVertex::new(
            UnverifiedVertex::new(qc, View::new(view), Some(Command::new(vec![view as u8]))),
            &Sha256Hasher,
        )
    }

    fn header_of(vertex: &VerifiedVertex) -> BftHeader {
        BftHeader::new(vertex.view(), *vertex.id(), tests::ledger(vertex.view().get(), 0))
    }

    fn sync_info() -> SyncInfo {
        let committed = tests::qc(
            tests::header(0, 0),
            tests::header(0, 0),
            Some(tests::header(0, 0)),
        );
        SyncInfo::new(committed.clone(), committed).unwrap()
    }

    fn vote(rules: &mut SafetyRules<Keys>, vertex: &VerifiedVertex) -> Result<Vote, Violation> {
        rules.vote_for(vertex, header_of(vertex), 0, sync_info())
    }

    #[test]
    fn direct_three_chain_commits_grandparent() {
        let mut rules = rules();
        let vote = vote(&mut rules, &vertex(3, 2, 1)).unwrap();
        assert_eq!(vote.vote_data().committed(), Some(&tests::header(1, 2)));
        assert_eq!(rules.state().locked_view(), View::new(1));
        assert_eq!(rules.state().last_voted_view(), View::new(3));
    }

    #[test]
    fn skipped_view_does_not_commit() {
        let mut rules = rules();
        let vote = vote(&mut rules, &vertex(4, 2, 1)).unwrap();
        assert_eq!(vote.vote_data().committed(), None);
        let vote = vote_with_gap_in_parent(&mut rules);
        assert_eq!(vote.vote_data().committed(), None);
    }

    fn vote_with_gap_in_parent(rules: &mut SafetyRules<Keys>) -> Vote {
        // Grandparent at 2, parent at 4
        let vertex = vertex(5, 4, 2);
        rules.vote_for(&vertex, header_of(&vertex), 0, sync_info()).unwrap()
    }

    #[test]
    fn touching_genesis_does_not_commit() {
        let mut rules = rules();
        let vote = vote(&mut rules, &vertex(2, 1, 0)).unwrap();
        assert_eq!(vote.vote_data().committed(), None);
    }

    #[test]
    fn cannot_vote_twice_in_same_or_earlier_view() {
        let mut rules = rules();
        vote(&mut rules, &vertex(3, 2, 1)).unwrap();
        assert_eq!(
            vote(&mut rules, &vertex(3, 2, 1)),
            Err(Violation::EarlierVote(View::new(3)))
        );
        assert_eq!(
            vote(&mut rules, &vertex(2, 1, 0)),
            Err(Violation::EarlierVote(View::new(3)))
        );
    }

    #[test]
    fn votes_respect_locked_view() {
        let mut rules = rules();
        // Locks on view 4
        vote(&mut rules, &vertex(6, 5, 4)).unwrap();
        assert_eq!(rules.state().locked_view(), View::new(4));
        assert_eq!(
            vote(&mut rules, &vertex(7, 3, 2)),
            Err(Violation::LockedView(View::new(4)))
        );

        // Rejections leave the state untouched
        assert_eq!(rules.state().last_voted_view(), View::new(6));
        vote(&mut rules, &vertex(7, 4, 3)).unwrap();
    }

    #[test]
    fn lock_never_moves_backwards() {
        let mut rules = rules();
        vote(&mut rules, &vertex(6, 5, 4)).unwrap();
        vote(&mut rules, &vertex(8, 5, 2)).unwrap();
        assert_eq!(rules.state().locked_view(), View::new(4));
    }

    #[test]
    fn genesis_cannot_be_voted_for() {
        let mut rules = SafetyRules::new(
            Keys::from_seed(0).node(),
            SafetyState::new(View::genesis(), View::genesis()),
            Arc::new(Sha256Hasher),
            Keys::from_seed(0),
        );
        let genesis = VerifiedVertex::new(UnverifiedVertex::genesis(), &Sha256Hasher);
        let header = BftHeader::new(View::genesis(), *genesis.id(), tests::ledger(0, 0));
        assert_eq!(
            rules.vote_for(&genesis, header, 0, sync_info()),
            Err(Violation::EarlierVote(View::genesis()))
        );
    }

    #[test]
    fn proposals_and_votes_verify_under_signer_key() {
        use crate::crypto::HashVerifier;
        let mut rules = rules();
        let keys = Keys::from_seed(0);
        let vertex = vertex(3, 2, 1);
        let vote = vote(&mut rules, &vertex).unwrap();
        let digest = Sha256Hasher.hash(vote.timestamped_vote_data());
        assert!(keys.verify(vote.author(), &digest, vote.signature()));

        let proposal = rules.sign_proposal(vertex.unverified().clone(), sync_info().highest_qc().clone());
        let digest = Sha256Hasher.hash(proposal.vertex());
        assert!(keys.verify(proposal.author(), &digest, proposal.signature()));
    }
}
