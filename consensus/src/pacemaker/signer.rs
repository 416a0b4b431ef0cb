use super::{ProceedToViewSender, ViewTimeoutSender};
use crate::{
    crypto::{HashSigner, Hasher, HasherExt},
    election::ProposerElection,
    types::{BftNode, SyncInfo, View, ViewTimeout, ViewTimeoutSigned},
};
use std::sync::Arc;
use tracing::trace;

/// Signs view timeouts on behalf of the local node.
pub struct ViewTimeoutSigner<S> {
    me: BftNode,
    hasher: Arc<dyn Hasher>,
    signer: S,
}

impl<S: HashSigner> ViewTimeoutSigner<S> {
    pub fn new(me: BftNode, hasher: Arc<dyn Hasher>, signer: S) -> Self {
        Self { me, hasher, signer }
    }

    /// Sign a timeout for `view`, stamped with the epoch of the highest QC.
    pub fn sign_view_timeout(&self, view: View, sync_info: SyncInfo) -> ViewTimeoutSigned {
        let epoch = sync_info.highest_qc().proposed().ledger_header().epoch();
        let timeout = ViewTimeout::new(self.me.clone(), epoch, view);
        let signature = self.signer.sign(&self.hasher.hash(&timeout));
        ViewTimeoutSigned::new(timeout, sync_info, signature)
    }
}

/// Sends a signed view timeout to the leader of every view the node proceeds to.
pub struct SignedViewTimeoutToLeaderSender<S, E, V> {
    signer: ViewTimeoutSigner<S>,
    election: E,
    sender: V,
}

impl<S, E, V> SignedViewTimeoutToLeaderSender<S, E, V>
where
    S: HashSigner,
    E: ProposerElection,
    V: ViewTimeoutSender,
{
    pub fn new(signer: ViewTimeoutSigner<S>, election: E, sender: V) -> Self {
        Self {
            signer,
            election,
            sender,
        }
    }
}

impl<S, E, V> ProceedToViewSender for SignedViewTimeoutToLeaderSender<S, E, V>
where
    S: HashSigner,
    E: ProposerElection,
    V: ViewTimeoutSender,
{
    fn send_proceed_to_next_view(&self, view: View, sync_info: SyncInfo) {
        let timeout = self.signer.sign_view_timeout(view, sync_info);
        let leader = self.election.proposer(view);
        trace!(%view, %leader, "sending view timeout");
        self.sender.send_view_timeout(timeout, &leader);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        crypto::{HashVerifier, Sha256Hasher},
        election::RotatingLeaders,
        mocks::{
            crypto::Keys,
            senders::{Outbound, Outbox},
        },
        types::{
            tests::{ledger, qc},
            BftHeader, Digest, LedgerHeader,
        },
        validators::tests::equal_set,
    };

    fn sync_info(epoch: u64) -> SyncInfo {
        let header = BftHeader::new(
            View::genesis(),
            Digest::default(),
            LedgerHeader::new(epoch, View::genesis(), *ledger(0, 0).accumulator_state(), 0, None),
        );
        let genesis = qc(header.clone(), header.clone(), Some(header));
        SyncInfo::new(genesis.clone(), genesis).unwrap()
    }

    #[test]
    fn signs_over_timeout_with_highest_qc_epoch() {
        let keys = Keys::from_seed(3);
        let signer = ViewTimeoutSigner::new(keys.node(), Arc::new(Sha256Hasher), keys.clone());
        let signed = signer.sign_view_timeout(View::new(7), sync_info(2));
        assert_eq!(signed.author(), &keys.node());
        assert_eq!(signed.view(), View::new(7));
        assert_eq!(signed.timeout().epoch(), 2);
        let digest = Sha256Hasher.hash(signed.timeout());
        assert!(keys.verify(signed.author(), &digest, signed.signature()));
    }

    #[test]
    fn sends_to_leader_of_view() {
        let keys = Keys::from_seed(1);
        let validators = equal_set(3);
        let election = RotatingLeaders::new(&validators);
        let outbox = Outbox::new();
        let sender = SignedViewTimeoutToLeaderSender::new(
            ViewTimeoutSigner::new(keys.node(), Arc::new(Sha256Hasher), keys),
            election.clone(),
            outbox.clone(),
        );
        sender.send_proceed_to_next_view(View::new(4), sync_info(0));
        let events = outbox.drain();
        assert_eq!(events.len(), 1);
        let Outbound::ViewTimeout(timeout, leader) = &events[0] else {
            panic!("unexpected event: {:?}", events[0]);
        };
        assert_eq!(timeout.view(), View::new(4));
        assert_eq!(leader, &election.proposer(View::new(4)));
    }
}
