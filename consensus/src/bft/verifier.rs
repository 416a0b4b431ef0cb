use super::BftEventProcessor;
use crate::{
    crypto::{HashVerifier, Hasher, HasherExt},
    types::{BftNode, BftUpdate, Proposal, View, ViewTimeoutSigned, Vote},
    validators::BftValidatorSet,
    Error,
};
use std::sync::Arc;
use tracing::{info, warn};

/// Drops messages that were not signed by a member of the validator set.
pub struct Verifier {
    validators: Arc<BftValidatorSet>,
    next: Box<dyn BftEventProcessor>,
    hasher: Arc<dyn Hasher>,
    verifier: Box<dyn HashVerifier>,
}

impl Verifier {
    pub fn new(
        validators: Arc<BftValidatorSet>,
        next: Box<dyn BftEventProcessor>,
        hasher: Arc<dyn Hasher>,
        verifier: Box<dyn HashVerifier>,
    ) -> Self {
        Self {
            validators,
            next,
            hasher,
            verifier,
        }
    }

    fn valid_author(&self, kind: &'static str, author: &BftNode, view: View) -> bool {
        if self.validators.contains_node(author) {
            return true;
        }
        warn!(kind, %author, %view, "message from unknown author");
        false
    }
}

impl BftEventProcessor for Verifier {
    fn start(&mut self) -> Result<(), Error> {
        self.next.start()
    }

    fn process_proposal(&mut self, proposal: Proposal) -> Result<(), Error> {
        if !self.valid_author("proposal", proposal.author(), proposal.view()) {
            return Ok(());
        }
        let digest = self.hasher.hash(proposal.vertex());
        if !self
            .verifier
            .verify(proposal.author(), &digest, proposal.signature())
        {
            info!(author = %proposal.author(), view = %proposal.view(), "proposal has invalid signature");
            return Ok(());
        }
        self.next.process_proposal(proposal)
    }

    fn process_vote(&mut self, vote: Vote) -> Result<(), Error> {
        if !self.valid_author("vote", vote.author(), vote.view()) {
            return Ok(());
        }
        let digest = self.hasher.hash(vote.timestamped_vote_data());
        if !self.verifier.verify(vote.author(), &digest, vote.signature()) {
            info!(author = %vote.author(), view = %vote.view(), "vote has invalid signature");
            return Ok(());
        }
        self.next.process_vote(vote)
    }

    fn process_view_timeout(&mut self, timeout: ViewTimeoutSigned) -> Result<(), Error> {
        if !self.valid_author("view timeout", timeout.author(), timeout.view()) {
            return Ok(());
        }
        let digest = self.hasher.hash(timeout.timeout());
        if !self
            .verifier
            .verify(timeout.author(), &digest, timeout.signature())
        {
            info!(author = %timeout.author(), view = %timeout.view(), "view timeout has invalid signature");
            return Ok(());
        }
        self.next.process_view_timeout(timeout)
    }

    fn process_local_timeout(&mut self, view: View) -> Result<(), Error> {
        self.next.process_local_timeout(view)
    }

    fn process_bft_update(&mut self, update: BftUpdate) -> Result<(), Error> {
        self.next.process_bft_update(update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        crypto::{HashSigner, Sha256Hasher},
        mocks::{
            crypto::{Keys, Secp256r1Verifier},
            processor::{Recorded, RecordingProcessor},
        },
        types::{
            tests::{header, qc},
            Signature, SyncInfo, TimestampedVoteData, UnverifiedVertex, ViewTimeout, VoteData,
        },
        validators::BftValidator,
    };

    fn setup() -> (Verifier, RecordingProcessor, Keys) {
        let keys = Keys::from_seed(0);
        let validators = Arc::new(BftValidatorSet::new([
            BftValidator::new(keys.node(), 1),
            BftValidator::new(Keys::from_seed(1).node(), 1),
        ]));
        let recorder = RecordingProcessor::new();
        let verifier = Verifier::new(
            validators,
            Box::new(recorder.clone()),
            Arc::new(Sha256Hasher),
            Box::new(Secp256r1Verifier),
        );
        (verifier, recorder, keys)
    }

    fn genesis_sync_info() -> SyncInfo {
        let genesis = qc(header(0, 0), header(0, 0), Some(header(0, 0)));
        SyncInfo::new(genesis.clone(), genesis).unwrap()
    }

    fn vote(keys: &Keys, signer: &Keys) -> Vote {
        let data = TimestampedVoteData::new(VoteData::new(header(1, 1), header(0, 0), None), 5);
        let signature = signer.sign(&Sha256Hasher.hash(&data));
        Vote::new(keys.node(), data, signature, genesis_sync_info())
    }

    fn proposal(keys: &Keys, signer: &Keys) -> Proposal {
        let genesis = qc(header(0, 0), header(0, 0), Some(header(0, 0)));
        let vertex = UnverifiedVertex::new(genesis.clone(), View::new(1), None);
        let signature = signer.sign(&Sha256Hasher.hash(&vertex));
        Proposal::new(vertex, genesis, keys.node(), signature)
    }

    fn timeout(keys: &Keys, signer: &Keys) -> ViewTimeoutSigned {
        let timeout = ViewTimeout::new(keys.node(), 0, View::new(1));
        let signature = signer.sign(&Sha256Hasher.hash(&timeout));
        ViewTimeoutSigned::new(timeout, genesis_sync_info(), signature)
    }

    #[test]
    fn forwards_correctly_signed_messages() {
        let (mut verifier, recorder, keys) = setup();
        let vote = vote(&keys, &keys);
        let proposal = proposal(&keys, &keys);
        let timeout = timeout(&keys, &keys);
        verifier.process_vote(vote.clone()).unwrap();
        verifier.process_proposal(proposal.clone()).unwrap();
        verifier.process_view_timeout(timeout.clone()).unwrap();
        assert_eq!(
            recorder.events(),
            vec![
                Recorded::Vote(vote),
                Recorded::Proposal(proposal),
                Recorded::ViewTimeout(timeout)
            ]
        );
    }

    #[test]
    fn drops_messages_signed_by_someone_else() {
        let (mut verifier, recorder, keys) = setup();
        let other = Keys::from_seed(1);
        verifier.process_vote(vote(&keys, &other)).unwrap();
        verifier.process_proposal(proposal(&keys, &other)).unwrap();
        verifier.process_view_timeout(timeout(&keys, &other)).unwrap();
        assert!(recorder.events().is_empty());
    }

    #[test]
    fn drops_messages_from_unknown_authors() {
        let (mut verifier, recorder, _) = setup();
        let outsider = Keys::from_seed(9);
        verifier.process_vote(vote(&outsider, &outsider)).unwrap();
        verifier
            .process_proposal(proposal(&outsider, &outsider))
            .unwrap();
        verifier
            .process_view_timeout(timeout(&outsider, &outsider))
            .unwrap();
        assert!(recorder.events().is_empty());
    }

    #[test]
    fn drops_malformed_signatures() {
        let (mut verifier, recorder, keys) = setup();
        let data = TimestampedVoteData::new(VoteData::new(header(1, 1), header(0, 0), None), 5);
        let vote = Vote::new(keys.node(), data, Signature::from(vec![0; 3]), genesis_sync_info());
        verifier.process_vote(vote).unwrap();
        assert!(recorder.events().is_empty());
    }

    #[test]
    fn forwards_local_events_unchecked() {
        let (mut verifier, recorder, _) = setup();
        verifier.start().unwrap();
        verifier.process_local_timeout(View::new(3)).unwrap();
        assert_eq!(
            recorder.events(),
            vec![Recorded::Start, Recorded::LocalTimeout(View::new(3))]
        );
    }
}
