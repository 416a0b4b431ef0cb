use super::{
    Accumulator, CommandStatus, Ledger, LedgerUpdate, LedgerUpdateSender, Mempool, PreparedVertex,
    StateComputer, VerifiedCommandsAndProof,
};
use crate::{
    metrics::SystemCounters,
    types::{Command, Digest, LedgerHeader, VerifiedLedgerHeaderAndProof, VerifiedVertex, View},
    Error, NextCommandGenerator,
};
use std::{
    collections::HashSet,
    sync::{Mutex, MutexGuard, PoisonError},
};
use tracing::{debug, error};

/// A [Ledger] backed by a [StateComputer] and a [Mempool].
///
/// `prepare` and `commit` are serialized by a single lock over the committed tip.
pub struct StateComputerLedger<M, S, U> {
    accumulator: Accumulator,
    mempool: M,
    state_computer: S,
    update_sender: U,
    counters: SystemCounters,

    current: Mutex<VerifiedLedgerHeaderAndProof>,
}

impl<M, S, U> StateComputerLedger<M, S, U>
where
    M: Mempool,
    S: StateComputer,
    U: LedgerUpdateSender,
{
    pub fn new(
        initial: VerifiedLedgerHeaderAndProof,
        accumulator: Accumulator,
        mempool: M,
        state_computer: S,
        update_sender: U,
        counters: SystemCounters,
    ) -> Self {
        Self {
            accumulator,
            mempool,
            state_computer,
            update_sender,
            counters,
            current: Mutex::new(initial),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VerifiedLedgerHeaderAndProof> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<M, S, U> Ledger for StateComputerLedger<M, S, U>
where
    M: Mempool,
    S: StateComputer,
    U: LedgerUpdateSender,
{
    fn prepare(
        &self,
        previous: &[PreparedVertex],
        vertex: &VerifiedVertex,
    ) -> Result<Option<PreparedVertex>, Error> {
        let Some(parent) = vertex.parent_header() else {
            return Err(Error::MissingParent(*vertex.id()));
        };
        let parent_header = parent.ledger_header();
        let previous_commands: Vec<Command> = previous
            .iter()
            .filter_map(PreparedVertex::successful_command)
            .cloned()
            .collect();
        let timestamp = vertex
            .qc()
            .and_then(|qc| qc.signatures().weighted_timestamp())
            .unwrap_or_else(|| parent_header.timestamp());

        let current = self.lock();
        if current.state_version() > parent_header.state_version() {
            return Ok(None);
        }

        // Don't execute commands while the epoch is changing
        if parent_header.is_end_of_epoch() {
            let header = parent_header.update_view_and_timestamp(vertex.view(), timestamp);
            return Ok(Some(PreparedVertex::new(
                vertex.clone(),
                header,
                CommandStatus::Ignored,
            )));
        }

        let Some(mut uncommitted) = self.accumulator.verify_and_get_extension(
            current.accumulator_state(),
            &previous_commands,
            parent_header.accumulator_state(),
        ) else {
            error!(vertex = %vertex, "ledger does not extend to parent");
            return Err(Error::EvidenceOfSafetyBreak(*vertex.id()));
        };
        if let Some(command) = vertex.command() {
            uncommitted.push(command.clone());
        }
        let result = self.state_computer.prepare(&uncommitted, vertex.view());

        let (status, accumulator_state) = match vertex.command() {
            None => (CommandStatus::Ignored, *parent_header.accumulator_state()),
            Some(command) if result.is_failed(command) => {
                (CommandStatus::Failed, *parent_header.accumulator_state())
            }
            Some(command) => (
                CommandStatus::Success,
                self.accumulator
                    .accumulate(parent_header.accumulator_state(), command),
            ),
        };
        let header = LedgerHeader::new(
            parent_header.epoch(),
            vertex.view(),
            accumulator_state,
            timestamp,
            result.next_validator_set().cloned(),
        );
        Ok(Some(PreparedVertex::new(vertex.clone(), header, status)))
    }

    fn commit(&self, committed: VerifiedCommandsAndProof) -> Result<(), Error> {
        self.counters.ledger_processed.inc();
        let mut current = self.lock();
        let next = committed.proof();
        if next.version() <= current.version() {
            return Ok(());
        }

        let Some(extension) = self.accumulator.verify_and_get_extension(
            current.accumulator_state(),
            committed.commands(),
            next.accumulator_state(),
        ) else {
            error!(
                current = current.state_version(),
                next = next.state_version(),
                "accumulator failure"
            );
            return Err(Error::AccumulatorFailure(current.state_version()));
        };

        let stored = VerifiedCommandsAndProof::new(extension, next.clone());
        self.state_computer.commit(&stored);

        *current = next.clone();
        self.counters
            .ledger_state_version
            .set(current.state_version() as i64);
        for command in stored.commands() {
            self.mempool
                .remove_committed(&self.accumulator.hash_command(command));
        }
        debug!(
            version = current.state_version(),
            commands = stored.commands().len(),
            "committed"
        );
        self.update_sender.send_ledger_update(LedgerUpdate::new(stored));
        Ok(())
    }

    fn current_header(&self) -> VerifiedLedgerHeaderAndProof {
        self.lock().clone()
    }
}

impl<M, S, U> NextCommandGenerator for StateComputerLedger<M, S, U>
where
    M: Mempool,
    S: StateComputer,
    U: LedgerUpdateSender,
{
    fn generate_next_command(&self, _: View, prepared: &HashSet<Digest>) -> Option<Command> {
        self.mempool.get_commands(1, prepared).into_iter().next()
    }
}
