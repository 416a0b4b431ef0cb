use crate::types::{BftNode, Digest, Proposal, View, ViewTimeoutSigned};
use std::collections::{HashMap, VecDeque};

/// A message that can only be processed once its QC is in the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncEvent {
    Proposal(Proposal),
    ViewTimeout(ViewTimeoutSigned),
}

impl SyncEvent {
    pub fn author(&self) -> &BftNode {
        match self {
            Self::Proposal(proposal) => proposal.author(),
            Self::ViewTimeout(timeout) => timeout.author(),
        }
    }

    pub fn view(&self) -> View {
        match self {
            Self::Proposal(proposal) => proposal.view(),
            Self::ViewTimeout(timeout) => timeout.view(),
        }
    }

    /// Id of the vertex certified by the QC the message carries, if any.
    pub fn qc_vertex_id(&self) -> Option<&Digest> {
        match self {
            Self::Proposal(proposal) => proposal
                .vertex()
                .qc()
                .map(|qc| qc.proposed().vertex_id()),
            Self::ViewTimeout(timeout) => Some(timeout.qc().proposed().vertex_id()),
        }
    }
}

/// One FIFO queue of [SyncEvent]s per author.
///
/// The head of each queue is the event whose sync is in flight and is only dropped once resolved,
/// by [SyncQueues::pop] or [SyncQueues::clear_view_and_get_next]. Behind the head, a newer event
/// supersedes the author's queued events from lower views.
#[derive(Debug, Default)]
pub struct SyncQueues {
    queues: HashMap<BftNode, VecDeque<SyncEvent>>,
}

impl SyncQueues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if nothing is queued for the author of `event`. Otherwise, queues `event`
    /// behind the author's earlier events.
    pub fn is_empty_else_add(&mut self, event: &SyncEvent) -> bool {
        if self.is_empty_for(event.author()) {
            return true;
        }
        self.add(event.clone());
        false
    }

    /// Queue `event` behind the author's head.
    pub fn add(&mut self, event: SyncEvent) {
        let queue = self.queues.entry(event.author().clone()).or_default();
        if queue.len() > 1 {
            let view = event.view();
            let mut index = 0;
            queue.retain(|queued| {
                index += 1;
                index == 1 || queued.view() >= view
            });
        }
        queue.push_back(event);
    }

    pub fn is_empty_for(&self, author: &BftNode) -> bool {
        self.queues.get(author).map_or(true, VecDeque::is_empty)
    }

    /// Authors with queued events.
    pub fn authors(&self) -> Vec<BftNode> {
        let mut authors: Vec<_> = self
            .queues
            .iter()
            .filter(|(_, queue)| !queue.is_empty())
            .map(|(author, _)| author.clone())
            .collect();
        authors.sort();
        authors
    }

    /// The head of the author's queue, if it waits on `vertex_id` (or on anything when `None`).
    pub fn peek(&self, author: &BftNode, vertex_id: Option<&Digest>) -> Option<&SyncEvent> {
        let head = self.queues.get(author)?.front()?;
        match vertex_id {
            Some(id) if head.qc_vertex_id() != Some(id) => None,
            _ => Some(head),
        }
    }

    /// Remove the head of the author's queue.
    pub fn pop(&mut self, author: &BftNode) -> Option<SyncEvent> {
        let queue = self.queues.get_mut(author)?;
        let head = queue.pop_front();
        if queue.is_empty() {
            self.queues.remove(author);
        }
        head
    }

    /// Drop the author's events at or below `view` and return the new head.
    pub fn clear_view_and_get_next(&mut self, author: &BftNode, view: View) -> Option<&SyncEvent> {
        let queue = self.queues.get_mut(author)?;
        queue.retain(|queued| queued.view() > view);
        if queue.is_empty() {
            self.queues.remove(author);
            return None;
        }
        self.queues.get(author)?.front()
    }

    /// Total number of queued events.
    pub fn len(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
