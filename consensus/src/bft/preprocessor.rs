use super::{BftEventProcessor, SyncEvent, SyncQueues};
use crate::{
    election::ProposerElection,
    pacemaker::Pacemaker,
    sync::{BftSyncer, SyncResult},
    types::{BftNode, BftUpdate, Digest, Proposal, View, ViewTimeoutSigned, Vote},
    Error,
};
use std::{cell::RefCell, rc::Rc, sync::Arc};
use tracing::{debug, trace, warn};

/// Drops messages that are stale or sent to the wrong leader, and holds back proposals and view
/// timeouts until the QC they carry is in the store.
pub struct Preprocessor {
    me: BftNode,
    next: Box<dyn BftEventProcessor>,
    pacemaker: Rc<RefCell<dyn Pacemaker>>,
    syncer: Rc<RefCell<dyn BftSyncer>>,
    election: Arc<dyn ProposerElection>,
    queues: SyncQueues,
}

impl Preprocessor {
    pub fn new(
        me: BftNode,
        next: Box<dyn BftEventProcessor>,
        pacemaker: Rc<RefCell<dyn Pacemaker>>,
        syncer: Rc<RefCell<dyn BftSyncer>>,
        election: Arc<dyn ProposerElection>,
        queues: SyncQueues,
    ) -> Self {
        Self {
            me,
            next,
            pacemaker,
            syncer,
            election,
            queues,
        }
    }

    /// Number of messages waiting for a sync.
    pub fn queued(&self) -> usize {
        self.queues.len()
    }

    fn current_view(&self) -> View {
        self.pacemaker.borrow().current_view()
    }

    /// Returns false if the event must wait for a sync.
    fn process_event(&mut self, event: &SyncEvent) -> Result<bool, Error> {
        match event {
            SyncEvent::Proposal(proposal) => self.process_proposal_internal(proposal),
            SyncEvent::ViewTimeout(timeout) => self.process_view_timeout_internal(timeout),
        }
    }

    fn process_view_timeout_internal(&mut self, timeout: &ViewTimeoutSigned) -> Result<bool, Error> {
        let view = timeout.view();
        if self.election.proposer(view) != self.me {
            warn!(author = %timeout.author(), %view, "ignoring confused view timeout");
            return Ok(true);
        }
        let current = self.current_view();
        if view < current {
            trace!(%view, %current, "ignoring stale view timeout");
            return Ok(true);
        }

        let result = self
            .syncer
            .borrow_mut()
            .sync_to_qc(timeout.sync_info(), Some(timeout.author()))?;
        match result {
            SyncResult::Synced => {
                self.next.process_view_timeout(timeout.clone())?;
                Ok(true)
            }
            SyncResult::Invalid => Ok(true),
            SyncResult::InProgress => Ok(false),
        }
    }

    fn process_proposal_internal(&mut self, proposal: &Proposal) -> Result<bool, Error> {
        let view = proposal.view();
        let current = self.current_view();
        if view < current {
            trace!(%view, %current, "ignoring stale proposal");
            return Ok(true);
        }
        let sync_info = match proposal.sync_info() {
            Ok(sync_info) => sync_info,
            Err(err) => {
                debug!(author = %proposal.author(), %view, ?err, "ignoring malformed proposal");
                return Ok(true);
            }
        };

        let result = self
            .syncer
            .borrow_mut()
            .sync_to_qc(&sync_info, Some(proposal.author()))?;
        match result {
            SyncResult::Synced => {
                self.next.process_proposal(proposal.clone())?;
                Ok(true)
            }
            SyncResult::Invalid => Ok(true),
            SyncResult::InProgress => Ok(false),
        }
    }

    fn process_or_queue(&mut self, event: SyncEvent) -> Result<(), Error> {
        if !self.queues.is_empty_else_add(&event) {
            trace!(author = %event.author(), view = %event.view(), "queued behind earlier events");
            return Ok(());
        }
        if !self.process_event(&event)? {
            debug!(author = %event.author(), view = %event.view(), "waiting for sync");
            self.queues.add(event);
        }
        Ok(())
    }

    /// Replay the author's queue while its head can be processed. The first head must wait on
    /// `vertex_id`, if given.
    fn drain(&mut self, author: &BftNode, mut vertex_id: Option<Digest>) -> Result<(), Error> {
        while let Some(event) = self.queues.peek(author, vertex_id.as_ref()).cloned() {
            if !self.process_event(&event)? {
                break;
            }
            self.queues.pop(author);
            vertex_id = None;
        }
        Ok(())
    }
}

impl BftEventProcessor for Preprocessor {
    fn start(&mut self) -> Result<(), Error> {
        self.next.start()
    }

    fn process_proposal(&mut self, proposal: Proposal) -> Result<(), Error> {
        trace!(author = %proposal.author(), view = %proposal.view(), "preprocessing proposal");
        self.process_or_queue(SyncEvent::Proposal(proposal))
    }

    fn process_vote(&mut self, vote: Vote) -> Result<(), Error> {
        // Only the leader of a view collects its votes
        let view = vote.view();
        if self.election.proposer(view) != self.me {
            warn!(author = %vote.author(), %view, "ignoring confused vote");
            return Ok(());
        }
        self.next.process_vote(vote)
    }

    fn process_view_timeout(&mut self, timeout: ViewTimeoutSigned) -> Result<(), Error> {
        trace!(author = %timeout.author(), view = %timeout.view(), "preprocessing view timeout");
        self.process_or_queue(SyncEvent::ViewTimeout(timeout))
    }

    fn process_local_timeout(&mut self, view: View) -> Result<(), Error> {
        let before = self.current_view();
        self.next.process_local_timeout(view)?;
        let after = self.current_view();
        if before == after {
            return Ok(());
        }
        let Some(stale) = after.previous() else {
            return Ok(());
        };

        debug!(view = %after, queued = self.queues.len(), "clearing queues");
        for author in self.queues.authors() {
            let Some(event) = self.queues.clear_view_and_get_next(&author, stale).cloned() else {
                continue;
            };
            if self.process_event(&event)? {
                self.queues.pop(&author);
                self.drain(&author, None)?;
            }
        }
        Ok(())
    }

    fn process_bft_update(&mut self, update: BftUpdate) -> Result<(), Error> {
        let id = *update.inserted().id();
        trace!(vertex = %id, "vertex inserted");
        for author in self.queues.authors() {
            self.drain(&author, Some(id))?;
        }
        self.next.process_bft_update(update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        crypto::Sha256Hasher,
        election::Dictatorship,
        mocks::processor::{Recorded, RecordingProcessor, StubPacemaker, StubSyncer},
        types::{
            tests::{header, qc},
            BftHeader, QuorumCertificate, Signature, SyncInfo, TimestampedVoteData,
            UnverifiedVertex, VerifiedVertex, ViewTimeout, VoteData,
        },
        validators::tests::node,
    };

    struct Harness {
        preprocessor: Preprocessor,
        recorder: RecordingProcessor,
        pacemaker: Rc<RefCell<StubPacemaker>>,
        syncer: Rc<RefCell<StubSyncer>>,
    }

    fn harness(leader: u8, view: u64) -> Harness {
        let pacemaker = Rc::new(RefCell::new(StubPacemaker::new(View::new(view))));
        let syncer = Rc::new(RefCell::new(StubSyncer::new(SyncResult::Synced)));
        let recorder = RecordingProcessor::new().with_pacemaker(pacemaker.clone());
        let preprocessor = Preprocessor::new(
            node(0),
            Box::new(recorder.clone()),
            pacemaker.clone(),
            syncer.clone(),
            Arc::new(Dictatorship::new(node(leader))),
            SyncQueues::new(),
        );
        Harness {
            preprocessor,
            recorder,
            pacemaker,
            syncer,
        }
    }

    fn genesis() -> QuorumCertificate {
        qc(header(0, 0), header(0, 0), Some(header(0, 0)))
    }

    fn high_qc(view: u64, id: u8) -> QuorumCertificate {
        qc(header(view, id), header(0, 0), None)
    }

    fn proposal(author: u8, view: u64, qc_id: u8) -> Proposal {
        Proposal::new(
            UnverifiedVertex::new(high_qc(view - 1, qc_id), View::new(view), None),
            genesis(),
            node(author),
            Signature::from(vec![]),
        )
    }

    fn timeout(author: u8, view: u64, qc_id: u8) -> ViewTimeoutSigned {
        ViewTimeoutSigned::new(
            ViewTimeout::new(node(author), 0, View::new(view)),
            SyncInfo::new(high_qc(view - 1, qc_id), genesis()).unwrap(),
            Signature::from(vec![]),
        )
    }

    fn vote(author: u8, view: u64) -> Vote {
        Vote::new(
            node(author),
            TimestampedVoteData::new(VoteData::new(header(view, 1), header(0, 0), None), 0),
            Signature::from(vec![]),
            SyncInfo::new(genesis(), genesis()).unwrap(),
        )
    }

    fn vertex(view: u64) -> VerifiedVertex {
        VerifiedVertex::new(
            UnverifiedVertex::new(genesis(), View::new(view), None),
            &Sha256Hasher,
        )
    }

    #[test]
    fn votes_only_reach_the_leader_of_their_view() {
        let mut h = harness(0, 1);
        h.preprocessor.process_vote(vote(1, 1)).unwrap();
        assert_eq!(h.recorder.events(), vec![Recorded::Vote(vote(1, 1))]);

        let mut h = harness(2, 1);
        h.preprocessor.process_vote(vote(1, 1)).unwrap();
        assert!(h.recorder.events().is_empty());
    }

    #[test]
    fn stale_and_confused_messages_are_dropped() {
        let mut h = harness(0, 5);
        h.preprocessor.process_proposal(proposal(1, 4, 1)).unwrap();
        h.preprocessor.process_view_timeout(timeout(1, 4, 1)).unwrap();
        assert!(h.recorder.events().is_empty());
        assert!(h.syncer.borrow().calls().is_empty());

        let mut h = harness(2, 1);
        h.preprocessor.process_view_timeout(timeout(1, 1, 1)).unwrap();
        assert!(h.recorder.events().is_empty());
    }

    #[test]
    fn synced_messages_are_forwarded() {
        let mut h = harness(0, 2);
        h.preprocessor.process_proposal(proposal(1, 2, 1)).unwrap();
        h.preprocessor.process_view_timeout(timeout(1, 2, 1)).unwrap();
        assert_eq!(
            h.recorder.events(),
            vec![
                Recorded::Proposal(proposal(1, 2, 1)),
                Recorded::ViewTimeout(timeout(1, 2, 1))
            ]
        );
        let calls = h.syncer.borrow().calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].1, Some(node(1)));
    }

    #[test]
    fn invalid_sync_drops_message() {
        let mut h = harness(0, 2);
        h.syncer.borrow_mut().set_default(SyncResult::Invalid);
        h.preprocessor.process_proposal(proposal(1, 2, 1)).unwrap();
        assert!(h.recorder.events().is_empty());
        assert_eq!(h.preprocessor.queued(), 0);
    }

    #[test]
    fn in_progress_sync_queues_until_vertex_is_inserted() {
        let mut h = harness(0, 2);
        h.syncer.borrow_mut().set_default(SyncResult::InProgress);

        // Waits on the vertex at view 1
        let missing = vertex(1);
        let certified = BftHeader::new(missing.view(), *missing.id(), header(1, 0).ledger_header().clone());
        let waiting = Proposal::new(
            UnverifiedVertex::new(qc(certified, header(0, 0), None), View::new(2), None),
            genesis(),
            node(1),
            Signature::from(vec![]),
        );
        h.preprocessor.process_proposal(waiting.clone()).unwrap();
        assert_eq!(h.preprocessor.queued(), 1);

        // Later messages of the same author queue behind it without a sync
        h.preprocessor.process_view_timeout(timeout(1, 2, 1)).unwrap();
        assert_eq!(h.preprocessor.queued(), 2);
        assert_eq!(h.syncer.borrow().calls().len(), 1);

        // An unrelated insertion does not release the queue
        h.syncer.borrow_mut().set_default(SyncResult::Synced);
        let unrelated = BftUpdate::new(vertex(3));
        h.preprocessor.process_bft_update(unrelated.clone()).unwrap();
        assert_eq!(h.preprocessor.queued(), 2);

        let update = BftUpdate::new(missing);
        h.preprocessor.process_bft_update(update.clone()).unwrap();
        assert_eq!(h.preprocessor.queued(), 0);
        assert_eq!(
            h.recorder.events(),
            vec![
                Recorded::BftUpdate(unrelated),
                Recorded::Proposal(waiting),
                Recorded::ViewTimeout(timeout(1, 2, 1)),
                Recorded::BftUpdate(update),
            ]
        );
    }

    #[test]
    fn view_change_flushes_stale_queued_events() {
        let mut h = harness(0, 2);
        h.syncer.borrow_mut().set_default(SyncResult::InProgress);
        h.preprocessor.process_proposal(proposal(1, 2, 1)).unwrap();
        h.preprocessor.process_view_timeout(timeout(2, 3, 2)).unwrap();
        assert_eq!(h.preprocessor.queued(), 2);

        // Timing out of a view that is not current changes nothing
        h.preprocessor.process_local_timeout(View::new(1)).unwrap();
        assert_eq!(h.preprocessor.queued(), 2);

        // Moving to view 3 drops the view 2 proposal and retries the view 3 timeout
        h.syncer.borrow_mut().set_default(SyncResult::Synced);
        h.preprocessor.process_local_timeout(View::new(2)).unwrap();
        assert_eq!(h.pacemaker.borrow().current_view(), View::new(3));
        assert_eq!(h.preprocessor.queued(), 0);
        assert_eq!(
            h.recorder.events(),
            vec![
                Recorded::LocalTimeout(View::new(1)),
                Recorded::LocalTimeout(View::new(2)),
                Recorded::ViewTimeout(timeout(2, 3, 2)),
            ]
        );
    }

    #[test]
    fn later_view_does_not_evict_event_waiting_on_sync() {
        let mut h = harness(0, 2);
        h.syncer.borrow_mut().set_default(SyncResult::InProgress);
        let missing = vertex(1);
        let certified = BftHeader::new(missing.view(), *missing.id(), header(1, 0).ledger_header().clone());
        let waiting = Proposal::new(
            UnverifiedVertex::new(qc(certified, header(0, 0), None), View::new(2), None),
            genesis(),
            node(1),
            Signature::from(vec![]),
        );
        h.preprocessor.process_proposal(waiting.clone()).unwrap();
        h.preprocessor.process_proposal(proposal(1, 3, 1)).unwrap();
        assert_eq!(h.preprocessor.queued(), 2);

        // The in-flight head is still released by its vertex
        h.syncer.borrow_mut().set_default(SyncResult::Synced);
        let update = BftUpdate::new(missing);
        h.preprocessor.process_bft_update(update.clone()).unwrap();
        assert_eq!(h.preprocessor.queued(), 0);
        assert_eq!(
            h.recorder.events(),
            vec![
                Recorded::Proposal(waiting),
                Recorded::Proposal(proposal(1, 3, 1)),
                Recorded::BftUpdate(update),
            ]
        );
    }
}
