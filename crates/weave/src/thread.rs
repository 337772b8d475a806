//! Per-thread state: private views of shared variables, registers, and the
//! outcomes of stepping a thread.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::sync::Arc;

use im::OrdMap;
use serde::Serialize;

use crate::ast::{Block, Value};
use crate::commit::{Commit, CommitHistory};
use crate::graph::EventId;

pub type ThreadId = usize;

/// One view of one shared variable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Global {
    pub value: Value,
    /// When present, the most recent entry of `history`.
    pub commit: Option<Commit>,
    pub history: CommitHistory,
}

impl Global {
    /// A view holding a value that was just written under `commit`.
    pub fn written(value: Value, commit: Commit) -> Self {
        let mut history = CommitHistory::new();
        history.push(commit);
        Self {
            value,
            commit: Some(commit),
            history,
        }
    }

    /// Overwrites the value and records the new commit.
    pub fn write(&mut self, value: Value, commit: Commit) {
        self.value = value;
        self.commit = Some(commit);
        self.history.push(commit);
    }
}

impl fmt::Display for Global {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.commit {
            Some(c) => write!(f, "{} [{}; {}]", self.value, c, self.history),
            None => write!(f, "{} [_; {}]", self.value, self.history),
        }
    }
}

pub type Globals = OrdMap<String, Global>;
pub type Locals = OrdMap<String, Value>;

/// Compares two views by value only, ignoring commit metadata.
pub fn same_values(a: &Globals, b: &Globals) -> bool {
    a.len() == b.len()
        && a.iter()
            .all(|(var, global)| b.get(var).map_or(false, |other| other.value == global.value))
}

#[derive(Clone, Debug)]
pub struct ThreadContext {
    pub locals: Locals,
    pub globals: Globals,
    /// Last graph event this thread produced.
    pub tail: EventId,
}

impl ThreadContext {
    pub fn new(globals: Globals, tail: EventId) -> Self {
        Self {
            locals: Locals::new(),
            globals,
            tail,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Thread {
    pub ctx: ThreadContext,
    pub block: Arc<Block>,
    pub pc: usize,
    pub terminated: Option<TerminationStatus>,
}

impl Thread {
    pub fn new(ctx: ThreadContext, block: Arc<Block>) -> Self {
        Self {
            ctx,
            block,
            pc: 0,
            terminated: None,
        }
    }

    pub fn is_live(&self) -> bool {
        self.terminated.is_none()
    }

    /// Source text of the statement the thread executes next, if any.
    pub fn next_statement(&self) -> Option<&str> {
        self.block.get(self.pc).map(|stmt| stmt.source.as_str())
    }
}

/// Equality for state deduplication: histories and graph positions are
/// bookkeeping and do not take part.
impl PartialEq for Thread {
    fn eq(&self, other: &Self) -> bool {
        self.block.id == other.block.id
            && self.pc == other.pc
            && self.terminated == other.terminated
            && self.ctx.locals == other.ctx.locals
            && same_values(&self.ctx.globals, &other.ctx.globals)
    }
}

impl Eq for Thread {}

/// Terminal outcome of a thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationStatus {
    Completed,
    DataraceException,
    UnlockException,
    AssertionFailureException,
    UnassignedVariableReadException,
}

impl TerminationStatus {
    pub fn is_violation(self) -> bool {
        self != TerminationStatus::Completed
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TerminationStatus::Completed => "completed",
            TerminationStatus::DataraceException => "datarace_exception",
            TerminationStatus::UnlockException => "unlock_exception",
            TerminationStatus::AssertionFailureException => "assertion_failure_exception",
            TerminationStatus::UnassignedVariableReadException => "unassigned_variable_read_exception",
        }
    }
}

impl fmt::Display for TerminationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a step advanced the thread. Combines with `|` across a round.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProgressStatus {
    Progress,
    NoProgress,
}

impl ProgressStatus {
    pub fn made_progress(self) -> bool {
        self == ProgressStatus::Progress
    }
}

impl BitOr for ProgressStatus {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        if self.made_progress() || rhs.made_progress() {
            ProgressStatus::Progress
        } else {
            ProgressStatus::NoProgress
        }
    }
}

impl BitOrAssign for ProgressStatus {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = *self | rhs;
    }
}

/// Result of one call to [`progress_thread`](crate::step::progress_thread).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    Progress(ProgressStatus),
    Terminated(TerminationStatus),
}

impl StepOutcome {
    /// Whether the step changed any state.
    pub fn made_progress(self) -> bool {
        match self {
            StepOutcome::Progress(p) => p.made_progress(),
            StepOutcome::Terminated(_) => true,
        }
    }
}
