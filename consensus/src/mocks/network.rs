//! A deterministic, single-threaded network of engines running on the deterministic runtime.
//!
//! Messages are delivered in the order they are sent and take no time to arrive. Timers only
//! fire once no message is in flight, at which point the network sleeps on the runtime clock
//! until the earliest deadline.

use super::{
    crypto::{Keys, Secp256r1Verifier},
    fixtures::Fixture,
    senders::{Outbound, Outbox},
};
use crate::{
    election::{Dictatorship, ProposerElection, RotatingLeaders},
    engine::{self, Engine, Message},
    ledger::{Ledger, VerifiedCommandsAndProof},
    metrics::SystemCounters,
    pacemaker,
    sync::LocalSyncRequest,
    types::{BftNode, Command, ConsensusEvent, View},
    validators::{BftValidator, BftValidatorSet},
    ClockTime, Error,
};
use commonware_runtime::{deterministic, Clock};
use std::{
    collections::{BTreeMap, HashMap, HashSet, VecDeque},
    sync::Arc,
    time::{Duration, SystemTime},
};
use tracing::{debug, trace};

/// How leaders are chosen.
#[derive(Clone, Copy, Debug)]
pub enum Election {
    /// The node at this index leads every view.
    Dictatorship(usize),
    /// Round robin over all nodes.
    Rotating,
}

struct Node {
    keys: Keys,
    fixture: Fixture,
    engine: Engine<Outbox>,
}

struct Envelope {
    from: usize,
    to: usize,
    message: Message,
}

/// Equally weighted validators connected by a lossless network.
pub struct Network {
    context: deterministic::Context,
    start: SystemTime,
    nodes: Vec<Node>,
    index: HashMap<BftNode, usize>,
    queue: VecDeque<Envelope>,
    timers: BTreeMap<(u64, u64), (usize, View)>,
    sequence: u64,
    isolated: HashSet<usize>,
}

impl Network {
    /// Create and start `count` nodes whose clocks follow `context`.
    pub fn new(
        context: deterministic::Context,
        count: usize,
        election: Election,
    ) -> Result<Self, Error> {
        let keys: Vec<Keys> = (0..count as u64).map(Keys::from_seed).collect();
        let validators = Arc::new(BftValidatorSet::new(
            keys.iter().map(|keys| BftValidator::new(keys.node(), 1)),
        ));
        let election: Arc<dyn ProposerElection> = match election {
            Election::Dictatorship(leader) => Arc::new(Dictatorship::new(keys[leader].node())),
            Election::Rotating => Arc::new(RotatingLeaders::new(&validators)),
        };

        let mut nodes = Vec::with_capacity(count);
        for keys in keys {
            let fixture = Fixture::new();
            let engine = Engine::new(engine::Config {
                me: keys.node(),
                validators: validators.clone(),
                election: election.clone(),
                hasher: fixture.hasher.clone(),
                signer: keys.clone(),
                verifier: Box::new(Secp256r1Verifier),
                ledger: fixture.ledger.clone(),
                generator: fixture.ledger.clone(),
                sender: fixture.outbox.clone(),
                counters: SystemCounters::default(),
                time: Box::new(ClockTime(context.clone())),
                pacemaker: pacemaker::Config::default(),
            })?;
            nodes.push(Node {
                keys,
                fixture,
                engine,
            });
        }
        let index = nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (node.keys.node(), i))
            .collect();

        let mut network = Self {
            start: context.current(),
            context,
            nodes,
            index,
            queue: VecDeque::new(),
            timers: BTreeMap::new(),
            sequence: 0,
            isolated: HashSet::new(),
        };
        for i in 0..count {
            network.nodes[i].engine.start()?;
            network.flush(i)?;
        }
        Ok(network)
    }

    pub fn node(&self, i: usize) -> BftNode {
        self.nodes[i].keys.node()
    }

    pub fn engine(&self, i: usize) -> &Engine<Outbox> {
        &self.nodes[i].engine
    }

    /// Commands node `i` has committed, in order.
    pub fn committed(&self, i: usize) -> Vec<Command> {
        self.nodes[i].fixture.computer.committed()
    }

    /// Milliseconds of runtime time elapsed since the network started.
    pub fn now(&self) -> u64 {
        self.context
            .current()
            .duration_since(self.start)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or_default()
    }

    /// Add a command to the mempool of every node.
    pub fn submit(&self, command: Command) {
        for node in &self.nodes {
            node.fixture.mempool.add(command.clone());
        }
    }

    /// Drop every message sent to or from the given nodes, replacing any earlier partition.
    pub fn isolate(&mut self, nodes: impl IntoIterator<Item = usize>) {
        self.isolated = nodes.into_iter().collect();
        debug!(isolated = ?self.isolated, "partitioned network");
    }

    pub fn heal(&mut self) {
        self.isolated.clear();
        debug!("healed network");
    }

    fn blocked(&self, from: usize, to: usize) -> bool {
        from != to && (self.isolated.contains(&from) || self.isolated.contains(&to))
    }

    /// Deliver the next message, or fire the next timer if nothing is in flight.
    ///
    /// Returns false once there is nothing left to do.
    pub async fn step(&mut self) -> Result<bool, Error> {
        if let Some(envelope) = self.queue.pop_front() {
            if self.blocked(envelope.from, envelope.to) {
                trace!(from = envelope.from, to = envelope.to, "dropped message");
                return Ok(true);
            }
            self.nodes[envelope.to].engine.handle(envelope.message)?;
            self.flush(envelope.to)?;
            return Ok(true);
        }

        let Some(((deadline, _), (node, view))) = self.timers.pop_first() else {
            return Ok(false);
        };
        self.context
            .sleep_until(self.start + Duration::from_millis(deadline))
            .await;
        trace!(node, %view, now = self.now(), "timer fired");
        self.nodes[node].engine.handle(Message::LocalTimeout(view))?;
        self.flush(node)?;
        Ok(true)
    }

    /// Step until `done` holds, for at most `limit` steps. Returns whether `done` holds.
    pub async fn run_until(
        &mut self,
        limit: usize,
        done: impl Fn(&Self) -> bool,
    ) -> Result<bool, Error> {
        for _ in 0..limit {
            if done(self) {
                return Ok(true);
            }
            if !self.step().await? {
                break;
            }
        }
        Ok(done(self))
    }

    fn send(&mut self, from: usize, to: &BftNode, message: Message) {
        let Some(&to) = self.index.get(to) else {
            trace!(from, %to, "message to unknown node");
            return;
        };
        self.queue.push_back(Envelope { from, to, message });
    }

    /// Route everything node `i` has sent.
    fn flush(&mut self, i: usize) -> Result<(), Error> {
        loop {
            let outbound = self.nodes[i].fixture.outbox.drain();
            if outbound.is_empty() {
                return Ok(());
            }
            let me = self.node(i);
            for event in outbound {
                match event {
                    Outbound::ScheduleTimeout(view, timeout) => {
                        let deadline = self.now() + timeout.as_millis() as u64;
                        self.sequence += 1;
                        self.timers.insert((deadline, self.sequence), (i, view));
                    }
                    Outbound::ViewTimeout(timeout, leader) => {
                        self.send(i, &leader, Message::Consensus(ConsensusEvent::ViewTimeout(timeout)))
                    }
                    Outbound::BroadcastProposal(proposal, nodes) => {
                        for node in nodes {
                            self.send(
                                i,
                                &node,
                                Message::Consensus(ConsensusEvent::Proposal(proposal.clone())),
                            );
                        }
                    }
                    Outbound::Vote(vote, leader) => {
                        self.send(i, &leader, Message::Consensus(ConsensusEvent::Vote(vote)))
                    }
                    Outbound::BftUpdate(update) => self.send(i, &me, Message::BftUpdate(update)),
                    Outbound::LedgerUpdate(update) => {
                        self.send(i, &me, Message::LedgerUpdate(update))
                    }
                    Outbound::GetVerticesRequest(node, request) => {
                        self.send(i, &node, Message::GetVerticesRequest(request))
                    }
                    Outbound::GetVerticesResponse(node, response) => {
                        self.send(i, &node, Message::GetVerticesResponse(response))
                    }
                    Outbound::GetVerticesErrorResponse(node, response) => {
                        self.send(i, &node, Message::GetVerticesErrorResponse(response))
                    }
                    Outbound::LocalSyncRequest(request) => self.sync_ledger(i, &request)?,
                    Outbound::ProceedToNextView(view, _)
                    | Outbound::CurrentView(view)
                    | Outbound::TimeoutProcessed(view) => {
                        trace!(node = i, %view, "view progress");
                    }
                }
            }
        }
    }

    /// Copy committed commands from a reachable target to node `i`.
    fn sync_ledger(&mut self, i: usize, request: &LocalSyncRequest) -> Result<(), Error> {
        let version = request.target().state_version() as usize;
        let commands = request.targets().iter().find_map(|target| {
            let &source = self.index.get(target)?;
            if self.blocked(source, i) {
                return None;
            }
            let committed = self.nodes[source].fixture.computer.committed();
            (committed.len() >= version).then(|| committed[..version].to_vec())
        });
        let Some(commands) = commands else {
            debug!(node = i, version, "no target can serve ledger sync");
            return Ok(());
        };
        debug!(node = i, version, "syncing ledger");
        self.nodes[i]
            .fixture
            .ledger
            .commit(VerifiedCommandsAndProof::new(commands, request.target().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commonware_macros::test_traced;
    use commonware_runtime::Runner;

    fn commands(range: std::ops::RangeInclusive<u8>) -> Vec<Command> {
        range.map(|i| Command::new(vec![i])).collect()
    }

    fn committed_at_least(network: &Network, nodes: &[usize], count: usize) -> bool {
        nodes
            .iter()
            .all(|&i| network.committed(i).len() >= count)
    }

    #[test_traced]
    fn dictatorship_commits_same_commands() {
        deterministic::Runner::default().start(|context| async move {
            let mut network = Network::new(context, 3, Election::Dictatorship(0)).unwrap();
            for command in commands(1..=3) {
                network.submit(command);
            }
            assert!(network
                .run_until(10_000, |network| committed_at_least(network, &[0, 1, 2], 3))
                .await
                .unwrap());
            for i in 0..3 {
                assert_eq!(network.committed(i)[..3], commands(1..=3)[..]);
            }

            // Nothing was timed out
            assert_eq!(network.now(), 0);
        });
    }

    #[test_traced]
    fn rotating_leaders_commit_same_commands() {
        deterministic::Runner::default().start(|context| async move {
            let mut network = Network::new(context, 3, Election::Rotating).unwrap();
            for command in commands(1..=3) {
                network.submit(command);
            }
            assert!(network
                .run_until(10_000, |network| committed_at_least(network, &[0, 1, 2], 3))
                .await
                .unwrap());
            for i in 0..3 {
                assert_eq!(network.committed(i)[..3], commands(1..=3)[..]);
            }
        });
    }

    #[test_traced]
    fn isolated_leader_commits_nothing() {
        deterministic::Runner::default().start(|context| async move {
            let mut network = Network::new(context, 3, Election::Dictatorship(0)).unwrap();
            network.isolate([0]);
            for command in commands(1..=3) {
                network.submit(command);
            }
            network.run_until(2_000, |_| false).await.unwrap();
            for i in 0..3 {
                assert!(network.committed(i).is_empty());
                assert!(network.engine(i).root().is_genesis());
            }

            // Followers keep timing out of leaderless views
            assert!(network.engine(1).current_view() > View::new(1));
            assert!(network.now() > 0);
        });
    }

    #[test_traced]
    fn quorum_progresses_without_isolated_follower() {
        deterministic::Runner::default().start(|context| async move {
            let mut network = Network::new(context, 3, Election::Dictatorship(0)).unwrap();
            network.isolate([2]);
            for command in commands(1..=3) {
                network.submit(command);
            }
            assert!(network
                .run_until(10_000, |network| committed_at_least(network, &[0, 1], 3))
                .await
                .unwrap());
            assert_eq!(network.committed(0)[..3], commands(1..=3)[..]);
            assert_eq!(network.committed(1)[..3], commands(1..=3)[..]);
            assert!(network.committed(2).is_empty());
        });
    }

    #[test_traced]
    fn healed_follower_catches_up() {
        deterministic::Runner::default().start(|context| async move {
            let mut network = Network::new(context, 3, Election::Dictatorship(0)).unwrap();
            network.isolate([2]);
            for command in commands(1..=6) {
                network.submit(command);
            }
            assert!(network
                .run_until(20_000, |network| committed_at_least(network, &[0, 1], 6))
                .await
                .unwrap());
            assert!(network.committed(2).is_empty());

            // The lagging node syncs from its peers once messages flow again
            network.heal();
            for command in commands(7..=9) {
                network.submit(command);
            }
            assert!(network
                .run_until(20_000, |network| committed_at_least(network, &[0, 1, 2], 7))
                .await
                .unwrap());
            for i in 0..3 {
                assert_eq!(network.committed(i)[..7], commands(1..=9)[..7]);
            }
        });
    }
}
