//! A recorder for everything a node sends.

use crate::{
    bft::BftEventSender,
    ledger::{LedgerUpdate, LedgerUpdateSender},
    pacemaker::{
        PacemakerInfoSender, PacemakerTimeoutSender, ProceedToViewSender, ViewTimeoutSender,
    },
    store::BftUpdateSender,
    sync::{
        GetVerticesErrorResponse, GetVerticesRequest, GetVerticesResponse, LocalSyncRequest,
        SyncLedgerRequestSender, SyncVerticesRequestSender, SyncVerticesResponseSender,
    },
    types::{BftNode, BftUpdate, Proposal, SyncInfo, View, ViewTimeoutSigned, Vote},
};
use futures::channel::mpsc;
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

/// Something a node sent.
#[derive(Clone, Debug, PartialEq)]
pub enum Outbound {
    ScheduleTimeout(View, Duration),
    ProceedToNextView(View, SyncInfo),
    CurrentView(View),
    TimeoutProcessed(View),
    ViewTimeout(ViewTimeoutSigned, BftNode),
    BroadcastProposal(Proposal, Vec<BftNode>),
    Vote(Vote, BftNode),
    BftUpdate(BftUpdate),
    LedgerUpdate(LedgerUpdate),
    GetVerticesRequest(BftNode, GetVerticesRequest),
    GetVerticesResponse(BftNode, GetVerticesResponse),
    GetVerticesErrorResponse(BftNode, GetVerticesErrorResponse),
    LocalSyncRequest(LocalSyncRequest),
}

/// Implements every sender of a node by recording [Outbound]s, in order.
///
/// Clones share the same record.
#[derive(Clone)]
pub struct Outbox {
    sender: mpsc::UnboundedSender<Outbound>,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<Outbound>>>,
}

impl Default for Outbox {
    fn default() -> Self {
        Self::new()
    }
}

impl Outbox {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded();
        Self {
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
        }
    }

    fn record(&self, outbound: Outbound) {
        self.sender
            .unbounded_send(outbound)
            .expect("outbox receiver dropped");
    }

    /// Take everything recorded so far.
    pub fn drain(&self) -> Vec<Outbound> {
        let mut receiver = self.receiver.lock().unwrap();
        let mut drained = Vec::new();
        while let Ok(Some(outbound)) = receiver.try_next() {
            drained.push(outbound);
        }
        drained
    }
}

impl PacemakerTimeoutSender for Outbox {
    fn schedule_timeout(&self, view: View, timeout: Duration) {
        self.record(Outbound::ScheduleTimeout(view, timeout));
    }
}

impl ProceedToViewSender for Outbox {
    fn send_proceed_to_next_view(&self, view: View, sync_info: SyncInfo) {
        self.record(Outbound::ProceedToNextView(view, sync_info));
    }
}

impl PacemakerInfoSender for Outbox {
    fn send_current_view(&self, view: View) {
        self.record(Outbound::CurrentView(view));
    }

    fn send_timeout_processed(&self, view: View) {
        self.record(Outbound::TimeoutProcessed(view));
    }
}

impl ViewTimeoutSender for Outbox {
    fn send_view_timeout(&self, timeout: ViewTimeoutSigned, leader: &BftNode) {
        self.record(Outbound::ViewTimeout(timeout, leader.clone()));
    }
}

impl BftEventSender for Outbox {
    fn broadcast_proposal(&self, proposal: Proposal, nodes: Vec<BftNode>) {
        self.record(Outbound::BroadcastProposal(proposal, nodes));
    }

    fn send_vote(&self, vote: Vote, leader: &BftNode) {
        self.record(Outbound::Vote(vote, leader.clone()));
    }
}

impl BftUpdateSender for Outbox {
    fn send_bft_update(&self, update: BftUpdate) {
        self.record(Outbound::BftUpdate(update));
    }
}

impl LedgerUpdateSender for Outbox {
    fn send_ledger_update(&self, update: LedgerUpdate) {
        self.record(Outbound::LedgerUpdate(update));
    }
}

impl SyncVerticesRequestSender for Outbox {
    fn send_get_vertices_request(&self, node: &BftNode, request: GetVerticesRequest) {
        self.record(Outbound::GetVerticesRequest(node.clone(), request));
    }
}

impl SyncVerticesResponseSender for Outbox {
    fn send_get_vertices_response(&self, node: &BftNode, response: GetVerticesResponse) {
        self.record(Outbound::GetVerticesResponse(node.clone(), response));
    }

    fn send_get_vertices_error_response(&self, node: &BftNode, response: GetVerticesErrorResponse) {
        self.record(Outbound::GetVerticesErrorResponse(node.clone(), response));
    }
}

impl SyncLedgerRequestSender for Outbox {
    fn send_local_sync_request(&self, request: LocalSyncRequest) {
        self.record(Outbound::LocalSyncRequest(request));
    }
}
