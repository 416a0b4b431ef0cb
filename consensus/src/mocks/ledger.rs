//! In-memory mempool and state computer.

use crate::{
    crypto::{Hasher, HasherExt},
    ledger::{Mempool, StateComputer, StateComputerResult, VerifiedCommandsAndProof},
    types::{Command, Digest, View},
};
use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

/// A FIFO [Mempool] shared between clones, keyed by command hash.
#[derive(Clone)]
pub struct InMemoryMempool {
    hasher: Arc<dyn Hasher>,
    commands: Arc<Mutex<Vec<(Digest, Command)>>>,
}

impl InMemoryMempool {
    pub fn new(hasher: Arc<dyn Hasher>) -> Self {
        Self {
            hasher,
            commands: Arc::default(),
        }
    }

    /// Queue a command. Duplicates are ignored.
    pub fn add(&self, command: Command) {
        let hash = self.hasher.hash(&command);
        let mut commands = self.commands.lock().unwrap();
        if !commands.iter().any(|(queued, _)| *queued == hash) {
            commands.push((hash, command));
        }
    }

    pub fn len(&self) -> usize {
        self.commands.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Mempool for InMemoryMempool {
    fn get_commands(&self, count: usize, prepared: &HashSet<Digest>) -> Vec<Command> {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .filter(|(hash, _)| !prepared.contains(hash))
            .take(count)
            .map(|(_, command)| command.clone())
            .collect()
    }

    fn remove_committed(&self, hash: &Digest) {
        self.commands
            .lock()
            .unwrap()
            .retain(|(queued, _)| queued != hash);
    }
}

#[derive(Default)]
struct State {
    failing: HashSet<Command>,
    prepared: Vec<Vec<Command>>,
    committed: Vec<Command>,
}

/// A [StateComputer] that records what it is asked to do.
#[derive(Clone, Default)]
pub struct RecordingStateComputer {
    state: Arc<Mutex<State>>,
}

impl RecordingStateComputer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every future execution of `command` fail.
    pub fn fail(&self, command: Command) {
        self.state.lock().unwrap().failing.insert(command);
    }

    /// Every batch of commands prepared, in order.
    pub fn prepared(&self) -> Vec<Vec<Command>> {
        self.state.lock().unwrap().prepared.clone()
    }

    /// Every command committed, in order.
    pub fn committed(&self) -> Vec<Command> {
        self.state.lock().unwrap().committed.clone()
    }
}

impl StateComputer for RecordingStateComputer {
    fn prepare(&self, commands: &[Command], _: View) -> StateComputerResult {
        let mut state = self.state.lock().unwrap();
        state.prepared.push(commands.to_vec());
        let failed = commands
            .iter()
            .filter(|command| state.failing.contains(*command))
            .cloned()
            .collect();
        StateComputerResult::new(failed, None)
    }

    fn commit(&self, committed: &VerifiedCommandsAndProof) {
        self.state
            .lock()
            .unwrap()
            .committed
            .extend_from_slice(committed.commands());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Hashes every command to the same digest.
    struct Constant;

    impl Hasher for Constant {
        fn hash_bytes(&self, _: &[u8]) -> Digest {
            Digest::default()
        }
    }

    #[test]
    fn commands_are_keyed_by_injected_hasher() {
        let mempool = InMemoryMempool::new(Arc::new(Constant));
        mempool.add(Command::new(vec![1]));
        mempool.add(Command::new(vec![2]));
        assert_eq!(mempool.len(), 1);
        assert!(mempool
            .get_commands(1, &HashSet::from([Digest::default()]))
            .is_empty());
        mempool.remove_committed(&Digest::default());
        assert!(mempool.is_empty());
    }
}
