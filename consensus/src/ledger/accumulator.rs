use crate::{
    crypto::{Hasher, HasherExt},
    types::{AccumulatorState, Command, Digest},
};
use std::sync::Arc;

/// Hash chain over committed commands.
///
/// Each command bumps the state version by one and chains its hash onto the previous
/// accumulator hash.
#[derive(Clone)]
pub struct Accumulator {
    hasher: Arc<dyn Hasher>,
}

impl Accumulator {
    pub fn new(hasher: Arc<dyn Hasher>) -> Self {
        Self { hasher }
    }

    /// Content hash of `command`, used to deduplicate commands.
    pub fn hash_command(&self, command: &Command) -> Digest {
        self.hasher.hash(command)
    }

    /// Append `command` to `parent`.
    pub fn accumulate(&self, parent: &AccumulatorState, command: &Command) -> AccumulatorState {
        let mut bytes = Vec::with_capacity(64);
        bytes.extend_from_slice(parent.accumulator_hash().as_ref());
        bytes.extend_from_slice(self.hash_command(command).as_ref());
        AccumulatorState::new(parent.state_version() + 1, self.hasher.hash_bytes(&bytes))
    }

    /// Returns true if appending `commands` to `start` yields `end`.
    pub fn verify(&self, start: &AccumulatorState, commands: &[Command], end: &AccumulatorState) -> bool {
        let state = commands
            .iter()
            .fold(*start, |state, command| self.accumulate(&state, command));
        state == *end
    }

    /// Given `commands` that lead up to `target`, return the suffix that extends `current` to
    /// `target`.
    ///
    /// Commands already reflected in `current` are skipped. Returns `None` if `current` is not a
    /// prefix of the chain ending at `target`.
    pub fn verify_and_get_extension(
        &self,
        current: &AccumulatorState,
        commands: &[Command],
        target: &AccumulatorState,
    ) -> Option<Vec<Command>> {
        let start = target.state_version().checked_sub(commands.len() as u64)?;
        let skip = current.state_version().checked_sub(start)?;
        if skip > commands.len() as u64 {
            return None;
        }
        let extension = &commands[skip as usize..];
        self.verify(current, extension, target)
            .then(|| extension.to_vec())
    }
}
