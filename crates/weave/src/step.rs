//! Single-statement transition for one thread.
//!
//! Race rule: a thread's history of `x` holds exactly the writes to `x` that
//! happen before its current point, because views only move between threads
//! at lock release/acquire, join and spawn. An access to `x` by thread T is
//! therefore racy when some other thread has written `x` under a commit that
//! is missing from T's history.

use tracing::debug;

use crate::ast::{Expr, LValue, Stmt, StmtKind, Value};
use crate::commit::{Commit, Merge};
use crate::context::GlobalContext;
use crate::error::{Result, WeaveError};
use crate::graph::{Conflict, EventId, EventKind};
use crate::thread::{
    Global, Globals, ProgressStatus, StepOutcome, TerminationStatus, Thread, ThreadContext, ThreadId,
};

/// Why a statement did not complete normally.
enum Fault {
    Terminate(TerminationStatus),
    Internal(WeaveError),
}

impl From<WeaveError> for Fault {
    fn from(err: WeaveError) -> Self {
        Fault::Internal(err)
    }
}

type Step<T> = std::result::Result<T, Fault>;

/// Executes the statement at the thread's program counter.
///
/// Returns `Progress(NoProgress)` without changing any thread or lock state
/// when the statement is blocked. Stepping an already terminated thread
/// returns its termination status again.
pub fn progress_thread(ctx: &mut GlobalContext, tid: ThreadId) -> Result<StepOutcome> {
    let thread = ctx.thread(tid)?;
    if let Some(status) = thread.terminated {
        return Ok(StepOutcome::Terminated(status));
    }
    let block = thread.block.clone();
    let pc = thread.pc;

    let stmt = match block.get(pc) {
        Some(stmt) => stmt,
        None if pc == block.len() => {
            debug!(thread = tid, "completed");
            return terminate(ctx, tid, TerminationStatus::Completed);
        }
        None => return Err(WeaveError::MissingStatement { thread: tid, pc }),
    };

    let outcome = match execute(ctx, tid, stmt) {
        Ok(progress) => StepOutcome::Progress(progress),
        Err(Fault::Terminate(status)) => terminate(ctx, tid, status)?,
        Err(Fault::Internal(err)) => return Err(err),
    };
    debug!(thread = tid, pc, stmt = %stmt, ?outcome, "step");
    Ok(outcome)
}

fn terminate(ctx: &mut GlobalContext, tid: ThreadId, status: TerminationStatus) -> Result<StepOutcome> {
    record(ctx, tid, EventKind::End(status))?;
    ctx.thread_mut(tid)?.terminated = Some(status);
    Ok(StepOutcome::Terminated(status))
}

fn record(ctx: &mut GlobalContext, tid: ThreadId, kind: EventKind) -> Result<EventId> {
    let thread = ctx.threads.get_mut(tid).ok_or(WeaveError::InvalidThread(tid))?;
    Ok(ctx.graph.append(&mut thread.ctx.tail, tid, kind))
}

fn advance(ctx: &mut GlobalContext, tid: ThreadId, by: usize) -> Step<ProgressStatus> {
    ctx.thread_mut(tid)?.pc += by;
    Ok(ProgressStatus::Progress)
}

fn execute(ctx: &mut GlobalContext, tid: ThreadId, stmt: &Stmt) -> Step<ProgressStatus> {
    match &stmt.kind {
        StmtKind::Nop => advance(ctx, tid, 1),
        StmtKind::Assign { target, value } => {
            let value = eval(ctx, tid, value)?;
            match target {
                LValue::Register(reg) => {
                    ctx.thread_mut(tid)?.ctx.locals.insert(reg.clone(), value);
                }
                LValue::Global(var) => write_global(ctx, tid, var, value)?,
            }
            advance(ctx, tid, 1)
        }
        StmtKind::Join(target) => join(ctx, tid, target),
        StmtKind::Lock(name) => acquire(ctx, tid, name),
        StmtKind::Unlock(name) => release(ctx, tid, name),
        StmtKind::Assert(condition) => {
            let passed = eval(ctx, tid, condition)? != 0;
            record(
                ctx,
                tid,
                EventKind::Assert {
                    condition: condition.to_string(),
                    passed,
                },
            )?;
            if !passed {
                return Err(Fault::Terminate(TerminationStatus::AssertionFailureException));
            }
            advance(ctx, tid, 1)
        }
        StmtKind::Cond { condition, offset } => {
            if eval(ctx, tid, condition)? != 0 {
                advance(ctx, tid, 1)
            } else {
                advance(ctx, tid, *offset)
            }
        }
        StmtKind::Jump(offset) => advance(ctx, tid, *offset),
    }
}

fn eval(ctx: &mut GlobalContext, tid: ThreadId, expr: &Expr) -> Step<Value> {
    match expr {
        Expr::Const(value) => Ok(*value),
        Expr::Register(reg) => ctx
            .thread(tid)?
            .ctx
            .locals
            .get(reg)
            .copied()
            .ok_or(Fault::Terminate(TerminationStatus::UnassignedVariableReadException)),
        Expr::Global(var) => read_global(ctx, tid, var),
        Expr::Add(lhs, rhs) => {
            let lhs = eval(ctx, tid, lhs)?;
            Ok(lhs.wrapping_add(eval(ctx, tid, rhs)?))
        }
        Expr::Eq(lhs, rhs) => {
            let lhs = eval(ctx, tid, lhs)?;
            Ok(Value::from(lhs == eval(ctx, tid, rhs)?))
        }
        Expr::Neq(lhs, rhs) => {
            let lhs = eval(ctx, tid, lhs)?;
            Ok(Value::from(lhs != eval(ctx, tid, rhs)?))
        }
        Expr::Spawn(block) => {
            let spawned = ctx.threads.len();
            let globals = ctx.thread(tid)?.ctx.globals.clone();
            let event = record(ctx, tid, EventKind::Spawn { spawned })?;
            let start = ctx.graph.start(spawned, Some(event));
            ctx.threads
                .push_back(Thread::new(ThreadContext::new(globals, start), block.clone()));
            debug!(thread = tid, spawned, block = %block.id, "spawn");
            Ok(spawned as Value)
        }
    }
}

/// The first write to `var` by another thread that `tid` has not witnessed.
fn unordered_write(ctx: &GlobalContext, tid: ThreadId, var: &str) -> Step<Option<EventId>> {
    let thread = ctx.thread(tid)?;
    let history = thread.ctx.globals.get(var).map(|g| &g.history);
    let found = ctx.commit_map.iter().find_map(|(commit, event)| {
        let write = ctx.graph.get(*event)?;
        let foreign = write.thread != tid && matches!(&write.kind, EventKind::Write { var: v, .. } if v == var);
        let witnessed = history.map_or(false, |h| h.contains(*commit));
        (foreign && !witnessed).then_some(*event)
    });
    Ok(found)
}

fn check_race(ctx: &mut GlobalContext, tid: ThreadId, var: &str) -> Step<()> {
    if let Some(write) = unordered_write(ctx, tid, var)? {
        debug!(thread = tid, var, write = write.0, "data race");
        record(
            ctx,
            tid,
            EventKind::Race {
                var: var.to_string(),
                write,
            },
        )?;
        return Err(Fault::Terminate(TerminationStatus::DataraceException));
    }
    Ok(())
}

fn read_global(ctx: &mut GlobalContext, tid: ThreadId, var: &str) -> Step<Value> {
    check_race(ctx, tid, var)?;
    let global = match ctx.thread(tid)?.ctx.globals.get(var) {
        Some(global) => global.clone(),
        None => return Err(Fault::Terminate(TerminationStatus::UnassignedVariableReadException)),
    };
    let source = global.commit.and_then(|c| ctx.commit_map.get(&c).copied());
    record(
        ctx,
        tid,
        EventKind::Read {
            var: var.to_string(),
            value: global.value,
            commit: global.commit,
            source,
        },
    )?;
    Ok(global.value)
}

fn write_global(ctx: &mut GlobalContext, tid: ThreadId, var: &str, value: Value) -> Step<()> {
    check_race(ctx, tid, var)?;
    let commit = ctx.mint_commit();
    let globals = &mut ctx.thread_mut(tid)?.ctx.globals;
    match globals.get_mut(var) {
        Some(global) => global.write(value, commit),
        None => {
            globals.insert(var.to_string(), Global::written(value, commit));
        }
    }
    let event = record(
        ctx,
        tid,
        EventKind::Write {
            var: var.to_string(),
            value,
            commit,
        },
    )?;
    ctx.commit_map.insert(commit, event);
    Ok(())
}

/// Merges `from` into `into` variable by variable. Stops at the first
/// variable whose histories diverged and reports the two latest commits.
pub fn pull(into: &mut Globals, from: &Globals) -> Option<(String, Commit, Commit)> {
    for (var, theirs) in from.iter() {
        match into.get_mut(var) {
            None => {
                into.insert(var.clone(), theirs.clone());
            }
            Some(ours) => match ours.history.merge(&theirs.history) {
                Merge::Kept => {}
                Merge::Advanced => {
                    ours.value = theirs.value;
                    ours.commit = theirs.commit;
                }
                Merge::Diverged { ours, theirs } => return Some((var.clone(), ours, theirs)),
            },
        }
    }
    None
}

// The foreign-write scan in `check_race` normally stops the second unordered
// writer before its view can be published, so a diverged merge at acquire or
// join only shows up when a lock or thread snapshot was built by hand.
fn to_conflict(ctx: &GlobalContext, diverged: Option<(String, Commit, Commit)>) -> Option<Conflict> {
    diverged.map(|(var, ours, theirs)| {
        let source = |c: Commit| ctx.commit_map.get(&c).copied().unwrap_or(ctx.entry_node);
        Conflict {
            var,
            sources: (source(ours), source(theirs)),
        }
    })
}

fn acquire(ctx: &mut GlobalContext, tid: ThreadId, name: &str) -> Step<ProgressStatus> {
    let mut lock = ctx.locks.get(name).cloned().unwrap_or_default();
    if !lock.is_free() {
        return Ok(ProgressStatus::NoProgress);
    }

    let mut globals = ctx.thread(tid)?.ctx.globals.clone();
    let conflict = to_conflict(ctx, pull(&mut globals, &lock.globals));
    let raced = conflict.is_some();
    let event = record(
        ctx,
        tid,
        EventKind::Lock {
            name: name.to_string(),
            ordered_after: lock.last,
            conflict,
        },
    )?;
    if raced {
        return Err(Fault::Terminate(TerminationStatus::DataraceException));
    }

    ctx.thread_mut(tid)?.ctx.globals = globals;
    lock.owner = Some(tid);
    lock.last = Some(event);
    ctx.locks.insert(name.to_string(), lock);
    advance(ctx, tid, 1)
}

fn release(ctx: &mut GlobalContext, tid: ThreadId, name: &str) -> Step<ProgressStatus> {
    let mut lock = match ctx.locks.get(name) {
        Some(lock) if lock.owner == Some(tid) => lock.clone(),
        _ => return Err(Fault::Terminate(TerminationStatus::UnlockException)),
    };

    lock.globals = ctx.thread(tid)?.ctx.globals.clone();
    lock.owner = None;
    let event = record(
        ctx,
        tid,
        EventKind::Unlock {
            name: name.to_string(),
        },
    )?;
    lock.last = Some(event);
    ctx.locks.insert(name.to_string(), lock);
    advance(ctx, tid, 1)
}

fn join(ctx: &mut GlobalContext, tid: ThreadId, target: &Expr) -> Step<ProgressStatus> {
    let target = eval(ctx, tid, target)?;
    let joinee = match usize::try_from(target).ok().and_then(|id| ctx.threads.get(id).map(|t| (id, t))) {
        Some((id, thread)) if !thread.is_live() => id,
        _ => return Ok(ProgressStatus::NoProgress),
    };

    let (from, theirs) = {
        let thread = ctx.thread(joinee)?;
        (thread.ctx.tail, thread.ctx.globals.clone())
    };
    let mut globals = ctx.thread(tid)?.ctx.globals.clone();
    let conflict = to_conflict(ctx, pull(&mut globals, &theirs));
    let raced = conflict.is_some();
    record(ctx, tid, EventKind::Join { joinee, from, conflict })?;
    if raced {
        return Err(Fault::Terminate(TerminationStatus::DataraceException));
    }

    ctx.thread_mut(tid)?.ctx.globals = globals;
    advance(ctx, tid, 1)
}
