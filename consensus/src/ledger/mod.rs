//! Execution of vertices against the replicated state.
//!
//! Consensus drives the ledger in two phases. [Ledger::prepare] speculatively executes a vertex
//! on top of its uncommitted ancestors to compute the [LedgerHeader] it is voted on with.
//! [Ledger::commit] persists commands once a QC proves them committed.

use crate::{
    types::{
        BftHeader, Command, Digest, LedgerHeader, VerifiedLedgerHeaderAndProof, VerifiedVertex,
        View,
    },
    validators::BftValidatorSet,
    Error,
};
use std::collections::HashSet;

mod accumulator;
pub use accumulator::Accumulator;
mod state_computer;
pub use state_computer::StateComputerLedger;

/// Outcome of executing the command of a vertex.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandStatus {
    /// Executed and appended to the accumulator.
    Success,
    /// Rejected by the state computer.
    Failed,
    /// Not executed (no command, or the epoch is ending).
    Ignored,
}

/// A vertex with the result of speculatively executing it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreparedVertex {
    vertex: VerifiedVertex,
    ledger_header: LedgerHeader,
    status: CommandStatus,
}

impl PreparedVertex {
    pub fn new(vertex: VerifiedVertex, ledger_header: LedgerHeader, status: CommandStatus) -> Self {
        Self {
            vertex,
            ledger_header,
            status,
        }
    }

    pub fn vertex(&self) -> &VerifiedVertex {
        &self.vertex
    }

    pub fn id(&self) -> &Digest {
        self.vertex.id()
    }

    pub fn view(&self) -> View {
        self.vertex.view()
    }

    pub fn ledger_header(&self) -> &LedgerHeader {
        &self.ledger_header
    }

    pub fn status(&self) -> CommandStatus {
        self.status
    }

    /// The command of the vertex, if it was executed successfully.
    pub fn successful_command(&self) -> Option<&Command> {
        match self.status {
            CommandStatus::Success => self.vertex.command(),
            CommandStatus::Failed | CommandStatus::Ignored => None,
        }
    }

    /// Pointer to this vertex with its executed header.
    pub fn header(&self) -> BftHeader {
        BftHeader::new(self.view(), *self.id(), self.ledger_header.clone())
    }
}

/// Commands proven committed by a ledger proof.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifiedCommandsAndProof {
    commands: Vec<Command>,
    proof: VerifiedLedgerHeaderAndProof,
}

impl VerifiedCommandsAndProof {
    pub fn new(commands: Vec<Command>, proof: VerifiedLedgerHeaderAndProof) -> Self {
        Self { commands, proof }
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn proof(&self) -> &VerifiedLedgerHeaderAndProof {
        &self.proof
    }
}

/// Emitted after every successful commit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerUpdate {
    committed: VerifiedCommandsAndProof,
}

impl LedgerUpdate {
    pub fn new(committed: VerifiedCommandsAndProof) -> Self {
        Self { committed }
    }

    pub fn committed(&self) -> &VerifiedCommandsAndProof {
        &self.committed
    }

    /// Proof of the new ledger tip.
    pub fn tail(&self) -> &VerifiedLedgerHeaderAndProof {
        self.committed.proof()
    }

    pub fn next_validator_set(&self) -> Option<&BftValidatorSet> {
        self.tail().ledger_header().next_validator_set()
    }
}

/// Result of speculatively executing a sequence of commands.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StateComputerResult {
    failed: HashSet<Command>,
    next_validator_set: Option<BftValidatorSet>,
}

impl StateComputerResult {
    pub fn new(failed: HashSet<Command>, next_validator_set: Option<BftValidatorSet>) -> Self {
        Self {
            failed,
            next_validator_set,
        }
    }

    pub fn is_failed(&self, command: &Command) -> bool {
        self.failed.contains(command)
    }

    pub fn next_validator_set(&self) -> Option<&BftValidatorSet> {
        self.next_validator_set.as_ref()
    }
}

/// Application state machine.
pub trait StateComputer: Send + Sync {
    /// Speculatively execute uncommitted commands in order.
    fn prepare(&self, commands: &[Command], view: View) -> StateComputerResult;

    /// Persist commands that are proven committed.
    fn commit(&self, committed: &VerifiedCommandsAndProof);
}

/// Pool of commands waiting to be proposed.
pub trait Mempool: Send + Sync {
    /// Up to `count` commands whose hashes are not in `prepared`.
    fn get_commands(&self, count: usize, prepared: &HashSet<Digest>) -> Vec<Command>;

    /// Forget a command once it is committed.
    fn remove_committed(&self, hash: &Digest);
}

/// Notified of every ledger commit.
pub trait LedgerUpdateSender: Send + Sync {
    fn send_ledger_update(&self, update: LedgerUpdate);
}

/// The replicated ledger as seen by consensus.
pub trait Ledger: Send + Sync {
    /// Execute `vertex` on top of `previous`, the uncommitted path from the root to its parent.
    ///
    /// Returns `None` if the ledger has already committed past the parent of `vertex`.
    fn prepare(
        &self,
        previous: &[PreparedVertex],
        vertex: &VerifiedVertex,
    ) -> Result<Option<PreparedVertex>, Error>;

    /// Commit commands, skipping those the ledger already holds.
    fn commit(&self, committed: VerifiedCommandsAndProof) -> Result<(), Error>;

    /// Proof of the current ledger tip.
    fn current_header(&self) -> VerifiedLedgerHeaderAndProof;
}
