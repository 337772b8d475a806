//! Interactive stepping: the operator picks which thread runs next.

use std::io::{BufRead, Write};
use std::path::Path;

use tracing::debug;

use crate::ast::Program;
use crate::context::{GlobalContext, Lock};
use crate::error::{Result, WeaveError};
use crate::interpreter::run_threads;
use crate::step::progress_thread;
use crate::thread::{Global, ProgressStatus, StepOutcome, TerminationStatus, Thread, ThreadId};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Run one statement of a thread.
    Step(ThreadId),
    Finish,
    Restart,
    List,
    Print,
    Graph,
    Quit,
    Info,
    /// Nothing to do; carries a message for invalid input.
    Skip(Option<String>),
}

const HELP: &str = "\
Commands:
s [tid] - Step thread
[tid] - Step thread
f - Finish the program
r - Restart the program
l - List all threads
g - Toggle printing the execution graph after each step
p - Print the execution graph now
q - Quit the interpreter
? - Display this help message";

fn parse_tid(text: &str) -> Option<ThreadId> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

pub fn parse_command(input: &str) -> Command {
    let command = input.trim();
    if let Some(tid) = parse_tid(command) {
        return Command::Step(tid);
    }
    match command {
        "q" => Command::Quit,
        "r" => Command::Restart,
        "f" => Command::Finish,
        "l" => Command::List,
        "g" => Command::Graph,
        "p" => Command::Print,
        "?" => Command::Info,
        _ if command.starts_with('s') && !command[1..].starts_with(|c: char| c.is_alphabetic()) => {
            match parse_tid(command[1..].trim()) {
                Some(tid) => Command::Step(tid),
                None => Command::Skip(Some("Expected thread id".to_string())),
            }
        }
        _ => Command::Skip(Some(format!("Unknown command: {}", command))),
    }
}

fn show_global(out: &mut dyn Write, var: &str, global: &Global) -> std::io::Result<()> {
    writeln!(out, "{} = {}", var, global)
}

pub fn show_thread(out: &mut dyn Write, thread: &Thread, tid: ThreadId) -> std::io::Result<()> {
    writeln!(out, "---- Thread {}", tid)?;
    if !thread.ctx.locals.is_empty() {
        for (reg, value) in thread.ctx.locals.iter() {
            writeln!(out, "${} = {}", reg, value)?;
        }
        writeln!(out, "--")?;
    }
    if !thread.ctx.globals.is_empty() {
        for (var, global) in thread.ctx.globals.iter() {
            show_global(out, var, global)?;
        }
        writeln!(out, "--")?;
    }
    for (idx, stmt) in thread.block.stmts.iter().enumerate() {
        let cursor = if idx == thread.pc { "-> " } else { "   " };
        writeln!(out, "{}{};", cursor, stmt.source.replace('\n', "\n   "))?;
    }
    if thread.pc == thread.block.len() {
        writeln!(out, "-> ")?;
    }
    Ok(())
}

pub fn show_lock(out: &mut dyn Write, name: &str, lock: &Lock) -> std::io::Result<()> {
    match lock.owner {
        Some(owner) => writeln!(out, "{}: held by thread {}", name, owner)?,
        None => writeln!(out, "{}: <free>", name)?,
    }
    for (var, global) in lock.globals.iter() {
        show_global(out, var, global)?;
    }
    Ok(())
}

/// Shows locks and threads; completed threads only when `show_all`.
pub fn show_global_context(out: &mut dyn Write, ctx: &GlobalContext, show_all: bool) -> std::io::Result<()> {
    let mut showed_any = false;
    for (tid, thread) in ctx.threads.iter().enumerate() {
        if show_all || thread.terminated != Some(TerminationStatus::Completed) {
            show_thread(out, thread, tid)?;
            writeln!(out)?;
            showed_any = true;
        }
    }
    if showed_any && !ctx.locks.is_empty() {
        writeln!(out, "---- Locks")?;
        for (name, lock) in ctx.locks.iter() {
            show_lock(out, name, lock)?;
        }
        writeln!(out, "--")?;
    }
    Ok(())
}

/// Steps `tid` once. Returns whether the state should be shown again and a
/// message for the operator.
pub fn step_thread(ctx: &mut GlobalContext, tid: ThreadId) -> Result<(bool, Option<String>)> {
    let thread = match ctx.threads.get(tid) {
        Some(thread) => thread,
        None => return Ok((false, Some(format!("Invalid thread id: {}", tid)))),
    };
    match thread.terminated {
        Some(TerminationStatus::Completed) => {
            return Ok((false, Some(format!("Thread {} has terminated normally", tid))));
        }
        Some(_) => return Ok((false, Some(format!("Thread {} has terminated with an error", tid)))),
        None => {}
    }
    let statement = thread.next_statement().unwrap_or("end").to_string();

    let message = match progress_thread(ctx, tid)? {
        StepOutcome::Progress(ProgressStatus::Progress) => return Ok((true, None)),
        StepOutcome::Progress(ProgressStatus::NoProgress) => {
            return Ok((false, Some(format!("Thread {} is blocking on '{}'", tid, statement))));
        }
        StepOutcome::Terminated(TerminationStatus::Completed) => {
            return Ok((true, Some(format!("Thread {} terminated normally", tid))));
        }
        StepOutcome::Terminated(TerminationStatus::DataraceException) => {
            format!("Thread {} encountered a data race at '{}' and was terminated", tid, statement)
        }
        StepOutcome::Terminated(TerminationStatus::AssertionFailureException) => {
            format!("Thread {} failed assertion '{}' and was terminated", tid, statement)
        }
        StepOutcome::Terminated(TerminationStatus::UnassignedVariableReadException) => {
            format!("Thread {} read an unassigned variable in '{}' and was terminated", tid, statement)
        }
        StepOutcome::Terminated(TerminationStatus::UnlockException) => {
            format!("Thread {} released a lock it does not hold in '{}' and was terminated", tid, statement)
        }
    };
    Ok((false, Some(message)))
}

/// Reads commands from `input` until `q` or end of input.
pub fn interpret_interactive(
    program: &Program,
    output: &Path,
    input: &mut dyn BufRead,
    out: &mut dyn Write,
) -> Result<i32> {
    let mut ctx = GlobalContext::new(program);
    let mut print_graphs = true;
    let mut command = Command::List;
    let mut prev_threads = 1;
    let mut message: Option<String> = None;
    ctx.write_execution_graph(output)?;

    while command != Command::Quit {
        let show = !matches!(command, Command::Skip(_)) || prev_threads != ctx.threads.len();
        if show {
            show_global_context(out, &ctx, command == Command::List).map_err(WeaveError::Render)?;
        }
        prev_threads = ctx.threads.len();
        if let Some(msg) = message.take() {
            writeln!(out, "{}", msg).map_err(WeaveError::Render)?;
        }

        write!(out, "> ").map_err(WeaveError::Render)?;
        out.flush().map_err(WeaveError::Render)?;
        let mut line = String::new();
        let read = input.read_line(&mut line).map_err(WeaveError::Render)?;
        command = if read == 0 {
            Command::Quit
        } else if line.trim().is_empty() {
            // Repeat the previous command.
            command
        } else {
            parse_command(&line)
        };
        debug!(?command, "debugger command");

        match command.clone() {
            Command::Step(tid) => {
                let (show, msg) = step_thread(&mut ctx, tid)?;
                message = msg;
                if print_graphs {
                    ctx.write_execution_graph(output)?;
                }
                if !show {
                    command = Command::Skip(None);
                }
            }
            Command::Finish => {
                let report = run_threads(&mut ctx)?;
                message = Some(if report.is_clean() {
                    "Program finished successfully".to_string()
                } else {
                    "Program terminated with an error".to_string()
                });
                if print_graphs {
                    ctx.write_execution_graph(output)?;
                }
            }
            Command::Restart => {
                ctx = GlobalContext::new(program);
                command = Command::List;
                if print_graphs {
                    ctx.write_execution_graph(output)?;
                }
            }
            Command::Graph => {
                print_graphs = !print_graphs;
                let verb = if print_graphs { "will" } else { "won't" };
                message = Some(format!("graphs {} print automatically", verb));
                command = Command::Skip(None);
            }
            Command::Print => {
                ctx.write_execution_graph(output)?;
                message = Some(format!("Execution graph written to {}", output.display()));
                command = Command::Skip(None);
            }
            Command::Info => {
                message = Some(HELP.to_string());
                command = Command::Skip(None);
            }
            Command::Skip(msg) => message = msg,
            Command::List | Command::Quit => {}
        }
    }
    Ok(0)
}
