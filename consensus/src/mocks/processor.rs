//! Stand-ins for the components a [BftEventProcessor] talks to.

use crate::{
    bft::BftEventProcessor,
    pacemaker::Pacemaker,
    sync::{BftSyncer, SyncResult},
    types::{
        BftNode, BftUpdate, Proposal, QuorumCertificate, SyncInfo, View, ViewTimeoutSigned, Vote,
    },
    validators::BftValidatorSet,
    Error, TimeSupplier,
};
use std::{cell::RefCell, rc::Rc, sync::Arc};

/// An event seen by a [RecordingProcessor].
#[derive(Clone, Debug, PartialEq)]
pub enum Recorded {
    Start,
    Proposal(Proposal),
    Vote(Vote),
    ViewTimeout(ViewTimeoutSigned),
    LocalTimeout(View),
    BftUpdate(BftUpdate),
}

/// A [BftEventProcessor] that records every event. Clones share the record.
///
/// Local timeouts are passed on to the pacemaker, if one is attached.
#[derive(Clone, Default)]
pub struct RecordingProcessor {
    events: Rc<RefCell<Vec<Recorded>>>,
    pacemaker: Option<Rc<RefCell<dyn Pacemaker>>>,
}

impl RecordingProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pacemaker(mut self, pacemaker: Rc<RefCell<dyn Pacemaker>>) -> Self {
        self.pacemaker = Some(pacemaker);
        self
    }

    pub fn events(&self) -> Vec<Recorded> {
        self.events.borrow().clone()
    }

    fn record(&self, event: Recorded) -> Result<(), Error> {
        self.events.borrow_mut().push(event);
        Ok(())
    }
}

impl BftEventProcessor for RecordingProcessor {
    fn start(&mut self) -> Result<(), Error> {
        self.record(Recorded::Start)
    }

    fn process_proposal(&mut self, proposal: Proposal) -> Result<(), Error> {
        self.record(Recorded::Proposal(proposal))
    }

    fn process_vote(&mut self, vote: Vote) -> Result<(), Error> {
        self.record(Recorded::Vote(vote))
    }

    fn process_view_timeout(&mut self, timeout: ViewTimeoutSigned) -> Result<(), Error> {
        self.record(Recorded::ViewTimeout(timeout))
    }

    fn process_local_timeout(&mut self, view: View) -> Result<(), Error> {
        if let Some(pacemaker) = &self.pacemaker {
            pacemaker.borrow_mut().process_local_timeout(view);
        }
        self.record(Recorded::LocalTimeout(view))
    }

    fn process_bft_update(&mut self, update: BftUpdate) -> Result<(), Error> {
        self.record(Recorded::BftUpdate(update))
    }
}

/// A [Pacemaker] that moves one view at a time and never forms timeout quorums.
pub struct StubPacemaker {
    current: View,
}

impl StubPacemaker {
    pub fn new(current: View) -> Self {
        Self { current }
    }
}

impl Pacemaker for StubPacemaker {
    fn current_view(&self) -> View {
        self.current
    }

    fn process_qc(&mut self, qc: &QuorumCertificate, _: &QuorumCertificate) -> Result<(), Error> {
        if qc.view() >= self.current {
            self.current = qc.view().next();
        }
        Ok(())
    }

    fn process_next_view(&mut self, view: View) {
        if view == self.current {
            self.current = view.next();
        }
    }

    fn process_local_timeout(&mut self, view: View) {
        self.process_next_view(view);
    }

    fn process_view_timeout(
        &mut self,
        _: &ViewTimeoutSigned,
        _: &Arc<BftValidatorSet>,
    ) -> Option<View> {
        None
    }
}

/// A [BftSyncer] that answers every request with a fixed result and records the requests.
pub struct StubSyncer {
    result: SyncResult,
    calls: Vec<(SyncInfo, Option<BftNode>)>,
}

impl StubSyncer {
    pub fn new(result: SyncResult) -> Self {
        Self {
            result,
            calls: Vec::new(),
        }
    }

    pub fn set_default(&mut self, result: SyncResult) {
        self.result = result;
    }

    pub fn calls(&self) -> Vec<(SyncInfo, Option<BftNode>)> {
        self.calls.clone()
    }
}

impl BftSyncer for StubSyncer {
    fn sync_to_qc(
        &mut self,
        sync_info: &SyncInfo,
        author: Option<&BftNode>,
    ) -> Result<SyncResult, Error> {
        self.calls.push((sync_info.clone(), author.cloned()));
        Ok(self.result)
    }
}

/// A [TimeSupplier] that never moves.
#[derive(Clone, Copy, Debug)]
pub struct FixedTime(pub u64);

impl TimeSupplier for FixedTime {
    fn current_time(&self) -> u64 {
        self.0
    }
}
