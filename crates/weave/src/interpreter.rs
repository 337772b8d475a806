//! Single run with a fixed round-robin schedule.

use std::io::Write;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::ast::Program;
use crate::context::GlobalContext;
use crate::error::{Result, WeaveError};
use crate::step::progress_thread;
use crate::thread::{ProgressStatus, StepOutcome, TerminationStatus, ThreadId};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Threads that terminated with a violation, in the order they did so.
    pub failures: Vec<(ThreadId, TerminationStatus)>,
    /// Live threads when a round made no progress. Empty unless deadlocked.
    pub deadlocked: Vec<ThreadId>,
    pub rounds: usize,
}

impl RunReport {
    pub fn is_deadlock(&self) -> bool {
        !self.deadlocked.is_empty()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && !self.is_deadlock()
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_clean() {
            0
        } else {
            1
        }
    }
}

/// Steps every live thread once per round, in thread-table order, until all
/// threads have terminated or a whole round makes no progress.
pub fn run_threads(ctx: &mut GlobalContext) -> Result<RunReport> {
    let mut report = RunReport::default();
    loop {
        let mut round = ProgressStatus::NoProgress;
        // Threads spawned during the round take their first step in it.
        let mut tid = 0;
        while tid < ctx.threads.len() {
            if ctx.thread(tid)?.is_live() {
                match progress_thread(ctx, tid)? {
                    StepOutcome::Progress(progress) => round |= progress,
                    StepOutcome::Terminated(status) => {
                        round |= ProgressStatus::Progress;
                        if status.is_violation() {
                            warn!(thread = tid, %status, "thread terminated with a violation");
                            report.failures.push((tid, status));
                        }
                    }
                }
            }
            tid += 1;
        }
        report.rounds += 1;

        if ctx.all_terminated() {
            break;
        }
        if round == ProgressStatus::NoProgress {
            report.deadlocked = ctx.live_threads();
            warn!(blocked = ?report.deadlocked, "no thread can make progress");
            break;
        }
    }
    debug!(rounds = report.rounds, "run finished");
    Ok(report)
}

/// Prints the outcome of a run.
pub fn write_run_report(ctx: &GlobalContext, report: &RunReport, out: &mut dyn Write) -> std::io::Result<()> {
    for (tid, status) in &report.failures {
        let statement = ctx
            .threads
            .get(*tid)
            .and_then(|t| t.next_statement())
            .unwrap_or("end");
        writeln!(out, "Thread {} terminated with {} at '{}'", tid, status, statement)?;
    }
    if report.is_deadlock() {
        let blocked: Vec<String> = report
            .deadlocked
            .iter()
            .map(|tid| {
                let statement = ctx.threads.get(*tid).and_then(|t| t.next_statement()).unwrap_or("end");
                format!("{} ('{}')", tid, statement)
            })
            .collect();
        writeln!(out, "Deadlock: blocked threads {}", blocked.join(", "))?;
    }
    if report.is_clean() {
        writeln!(out, "Program finished successfully")?;
    }
    Ok(())
}

/// Runs `program` once and renders its execution graph to `output`.
pub fn interpret(program: &Program, output: &Path, out: &mut dyn Write) -> Result<i32> {
    let mut ctx = GlobalContext::new(program);
    let report = run_threads(&mut ctx)?;
    write_run_report(&ctx, &report, out).map_err(WeaveError::Render)?;
    ctx.write_execution_graph(output)?;
    info!(path = %output.display(), "execution graph written");
    Ok(report.exit_code())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn run(src: &str) -> (GlobalContext, RunReport) {
        let mut ctx = GlobalContext::new(&parse(src).unwrap());
        let report = run_threads(&mut ctx).unwrap();
        (ctx, report)
    }

    #[test]
    fn test_clean_run() {
        let (ctx, report) = run("$t = spawn { lock m; x = 1; unlock m; } join $t; lock m; $r = x; unlock m;");
        assert!(report.is_clean());
        assert!(ctx.all_terminated());
        assert_eq!(ctx.threads[0].ctx.locals.get("r"), Some(&1));
    }

    #[test]
    fn test_deadlock_is_reported() {
        let src = "lock a; $t = spawn { lock b; lock a; } lock b;";
        let (_, report) = run(src);
        assert!(report.is_deadlock());
        assert_eq!(report.deadlocked, vec![0, 1]);
        assert_eq!(report.exit_code(), 1);
    }

    #[test]
    fn test_failures_are_collected() {
        let (_, report) = run("unlock m;");
        assert_eq!(report.failures, vec![(0, TerminationStatus::UnlockException)]);
    }

    #[test]
    fn test_report_text() {
        let (ctx, report) = run("assert 1 == 2;");
        let mut out = Vec::new();
        write_run_report(&ctx, &report, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "Thread 0 terminated with assertion_failure_exception at 'assert 1 == 2'\n"
        );
    }
}
