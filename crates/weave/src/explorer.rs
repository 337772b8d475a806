//! Exhaustive exploration of interleavings.
//!
//! Depth-first search over global contexts. Every live thread that can take
//! a step defines a successor; successors equivalent to an already visited
//! context are pruned. A step that terminates a thread with a violation, and
//! a state in which every live thread is blocked, are findings.

use std::io::Write;
use std::path::{Path, PathBuf};

use rustc_hash::FxHashMap;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::ast::Program;
use crate::config::ExplorerConfig;
use crate::context::GlobalContext;
use crate::error::{Result, WeaveError};
use crate::path::{thread_sequence, Branch, Choice, ThreadStatus};
use crate::render::indexed_path;
use crate::step::progress_thread;
use crate::thread::{StepOutcome, TerminationStatus, ThreadId};

/// Visited states bucketed by fingerprint, with a hit counter per state.
/// A fingerprint match only counts once the contexts compare equal.
#[derive(Debug, Default)]
pub struct StateCache {
    seen: FxHashMap<u64, Vec<(GlobalContext, usize)>>,
    distinct: usize,
}

impl StateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a visit. Returns true the first time a state is seen.
    pub fn visit(&mut self, ctx: &GlobalContext) -> bool {
        self.visit_bucket(ctx.fingerprint(), ctx)
    }

    fn visit_bucket(&mut self, fingerprint: u64, ctx: &GlobalContext) -> bool {
        let bucket = self.seen.entry(fingerprint).or_default();
        if let Some((_, count)) = bucket.iter_mut().find(|(seen, _)| seen == ctx) {
            *count += 1;
            return false;
        }
        bucket.push((ctx.clone(), 1));
        self.distinct += 1;
        true
    }

    /// Number of distinct states.
    pub fn len(&self) -> usize {
        self.distinct
    }

    pub fn is_empty(&self) -> bool {
        self.distinct == 0
    }

    /// How often `ctx` has been reached.
    pub fn hits(&self, ctx: &GlobalContext) -> usize {
        self.seen
            .get(&ctx.fingerprint())
            .and_then(|bucket| bucket.iter().find(|(seen, _)| seen == ctx))
            .map_or(0, |(_, count)| *count)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FindingKind {
    Violation { thread: ThreadId, status: TerminationStatus },
    Deadlock { blocked: Vec<ThreadId> },
}

#[derive(Clone, Debug, Serialize)]
pub struct Finding {
    #[serde(flatten)]
    pub kind: FindingKind,
    pub trace: Vec<Choice>,
    /// Final state, kept for rendering.
    #[serde(skip)]
    pub context: GlobalContext,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    NoViolation,
    ViolationFound,
    /// The budget ran out before the search space was exhausted.
    Inconclusive,
}

#[derive(Clone, Debug, Serialize)]
pub struct ExplorationReport {
    pub outcome: Outcome,
    pub states_explored: usize,
    pub states_pruned: usize,
    pub final_states: usize,
    pub max_depth_reached: usize,
    pub findings: Vec<Finding>,
}

impl ExplorationReport {
    /// The first finding in search order.
    pub fn first(&self) -> Option<&Finding> {
        self.findings.first()
    }

    pub fn violations(&self) -> impl Iterator<Item = &Finding> {
        self.findings
            .iter()
            .filter(|f| matches!(f.kind, FindingKind::Violation { .. }))
    }

    pub fn deadlocks(&self) -> impl Iterator<Item = &Finding> {
        self.findings
            .iter()
            .filter(|f| matches!(f.kind, FindingKind::Deadlock { .. }))
    }

    pub fn exit_code(&self) -> i32 {
        if self.findings.is_empty() {
            0
        } else {
            1
        }
    }
}

/// A search state with its precomputed successors.
struct Frame {
    branch: Branch,
    successors: Vec<Option<(GlobalContext, StepOutcome, String)>>,
    trace: Vec<Choice>,
}

pub struct Explorer {
    program: Program,
    config: ExplorerConfig,
    cache: StateCache,
}

impl Explorer {
    pub fn new(program: Program, config: ExplorerConfig) -> Self {
        Self {
            program,
            config,
            cache: StateCache::new(),
        }
    }

    pub fn cache(&self) -> &StateCache {
        &self.cache
    }

    pub fn explore(&mut self) -> Result<ExplorationReport> {
        self.explore_with(|_| {})
    }

    /// Runs the search, calling `visit` on every newly reached state.
    pub fn explore_with(&mut self, mut visit: impl FnMut(&GlobalContext)) -> Result<ExplorationReport> {
        self.cache = StateCache::new();
        let mut report = ExplorationReport {
            outcome: Outcome::NoViolation,
            states_explored: 0,
            states_pruned: 0,
            final_states: 0,
            max_depth_reached: 0,
            findings: Vec::new(),
        };
        let mut exhausted = false;

        let root = GlobalContext::new(&self.program);
        self.cache.visit(&root);
        visit(&root);
        let mut stack = Vec::new();
        let first = expand(&root, Vec::new())?;
        if first.branch.is_stuck() {
            let blocked = first.branch.blocked();
            debug!(?blocked, "initial state deadlocked");
            record_finding(&mut report, FindingKind::Deadlock { blocked }, Vec::new(), root);
        } else {
            stack.push(first);
        }

        'search: while let Some(frame) = stack.last_mut() {
            let Some(tid) = frame.branch.step() else {
                stack.pop();
                continue;
            };
            let Some((child, outcome, statement)) = frame.successors[tid].take() else {
                continue;
            };
            let mut trace = frame.trace.clone();
            trace.push(Choice { thread: tid, statement });

            report.states_explored += 1;
            report.max_depth_reached = report.max_depth_reached.max(trace.len());
            if self.config.max_states.map_or(false, |max| report.states_explored > max) {
                warn!(states = report.states_explored, "state budget exhausted");
                exhausted = true;
                break;
            }

            if let StepOutcome::Terminated(status) = outcome {
                if status.is_violation() {
                    debug!(thread = tid, %status, trace = %thread_sequence(&trace), "violation");
                    let kind = FindingKind::Violation { thread: tid, status };
                    if record_finding(&mut report, kind, trace, child) && self.config.stop_at_first {
                        break 'search;
                    }
                    continue;
                }
            }

            if !self.cache.visit(&child) {
                report.states_pruned += 1;
                continue;
            }
            visit(&child);

            if child.all_terminated() {
                report.final_states += 1;
                continue;
            }
            if self.config.max_depth.map_or(false, |max| trace.len() >= max) {
                exhausted = true;
                continue;
            }

            let next = expand(&child, trace)?;
            if next.branch.is_stuck() {
                let blocked = next.branch.blocked();
                debug!(?blocked, trace = %thread_sequence(&next.trace), "deadlock");
                let kind = FindingKind::Deadlock { blocked };
                if record_finding(&mut report, kind, next.trace, child) && self.config.stop_at_first {
                    break 'search;
                }
                continue;
            }
            stack.push(next);
        }

        if exhausted && report.findings.is_empty() {
            warn!("exploration budget exhausted, result is inconclusive");
        }
        report.outcome = if !report.findings.is_empty() {
            Outcome::ViolationFound
        } else if exhausted {
            Outcome::Inconclusive
        } else {
            Outcome::NoViolation
        };
        info!(
            outcome = ?report.outcome,
            explored = report.states_explored,
            pruned = report.states_pruned,
            distinct = self.cache.len(),
            findings = report.findings.len(),
            "exploration finished"
        );
        Ok(report)
    }
}

/// Tries every live thread from `ctx` on its own copy.
fn expand(ctx: &GlobalContext, trace: Vec<Choice>) -> Result<Frame> {
    let mut statuses = Vec::with_capacity(ctx.threads.len());
    let mut successors = Vec::with_capacity(ctx.threads.len());
    for tid in 0..ctx.threads.len() {
        if !ctx.thread(tid)?.is_live() {
            statuses.push(ThreadStatus::Disabled);
            successors.push(None);
            continue;
        }
        let statement = ctx.thread(tid)?.next_statement().unwrap_or("end").to_string();
        let mut child = ctx.clone();
        let outcome = progress_thread(&mut child, tid)?;
        if outcome.made_progress() {
            statuses.push(ThreadStatus::Pending);
            successors.push(Some((child, outcome, statement)));
        } else {
            statuses.push(ThreadStatus::Blocked);
            successors.push(None);
        }
    }
    Ok(Frame {
        branch: Branch::new(statuses),
        successors,
        trace,
    })
}

/// Adds a finding unless an equivalent final state was already reported.
fn record_finding(report: &mut ExplorationReport, kind: FindingKind, trace: Vec<Choice>, context: GlobalContext) -> bool {
    if report
        .findings
        .iter()
        .any(|f| f.kind == kind && f.context == context)
    {
        return false;
    }
    report.findings.push(Finding { kind, trace, context });
    true
}

/// Renders the final state of every finding to `<stem>_<idx>.<ext>` next to
/// `output`.
pub fn write_finding_graphs(report: &mut ExplorationReport, output: &Path) -> Result<Vec<PathBuf>> {
    let mut written = Vec::with_capacity(report.findings.len());
    for (idx, finding) in report.findings.iter_mut().enumerate() {
        let path = indexed_path(output, idx);
        finding.context.write_execution_graph(&path)?;
        info!(path = %path.display(), "execution graph written");
        written.push(path);
    }
    Ok(written)
}

/// Model-checks `program`, printing failing and deadlocked traces to `out`
/// and rendering one graph per finding next to `output`.
pub fn model_check(program: &Program, output: &Path, config: ExplorerConfig, out: &mut dyn Write) -> Result<i32> {
    let mut explorer = Explorer::new(program.clone(), config);
    let mut report = explorer.explore()?;
    write_report(&report, out).map_err(WeaveError::Render)?;
    write_finding_graphs(&mut report, output)?;
    Ok(report.exit_code())
}

/// Human-readable summary of a report.
pub fn write_report(report: &ExplorationReport, out: &mut dyn Write) -> std::io::Result<()> {
    let violations: Vec<_> = report.violations().collect();
    let deadlocks: Vec<_> = report.deadlocks().collect();

    if !violations.is_empty() {
        writeln!(out, "Found {} failing trace(s):", violations.len())?;
        for finding in &violations {
            if let FindingKind::Violation { thread, status } = &finding.kind {
                writeln!(out, "{}  (thread {}: {})", thread_sequence(&finding.trace), thread, status)?;
            }
        }
    }
    if !deadlocks.is_empty() {
        writeln!(out, "Found {} deadlocked trace(s):", deadlocks.len())?;
        for finding in &deadlocks {
            writeln!(out, "{}", thread_sequence(&finding.trace))?;
        }
    }
    match report.outcome {
        Outcome::NoViolation => writeln!(out, "No violations found ({} states)", report.states_explored)?,
        Outcome::Inconclusive => writeln!(
            out,
            "Inconclusive: budget exhausted after {} states",
            report.states_explored
        )?,
        Outcome::ViolationFound => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn explore(src: &str) -> ExplorationReport {
        Explorer::new(parse(src).unwrap(), ExplorerConfig::default())
            .explore()
            .unwrap()
    }

    #[test]
    fn test_single_thread_no_violation() {
        let report = explore("x = 1; $r = x; assert $r == 1;");
        assert_eq!(report.outcome, Outcome::NoViolation);
        assert_eq!(report.final_states, 1);
        assert_eq!(report.exit_code(), 0);
    }

    #[test]
    fn test_assertion_failure_found() {
        let report = explore("x = 1; assert x == 2;");
        assert_eq!(report.outcome, Outcome::ViolationFound);
        let first = report.first().unwrap();
        assert_eq!(
            first.kind,
            FindingKind::Violation {
                thread: 0,
                status: TerminationStatus::AssertionFailureException
            }
        );
        assert_eq!(first.trace.len(), 2);
    }

    #[test]
    fn test_deadlock_found() {
        let report = explore("lock m; lock m;");
        assert_eq!(report.outcome, Outcome::ViolationFound);
        assert_eq!(report.first().unwrap().kind, FindingKind::Deadlock { blocked: vec![0] });
    }

    #[test]
    fn test_stop_at_first() {
        let src = "x = 0; $t = spawn { x = 1; } $u = spawn { x = 2; } $r = x;";
        let all = explore(src);
        let first = Explorer::new(parse(src).unwrap(), ExplorerConfig::default().with_stop_at_first(true))
            .explore()
            .unwrap();
        assert_eq!(first.findings.len(), 1);
        assert!(all.findings.len() >= 1);
        assert_eq!(first.first().unwrap().trace, all.first().unwrap().trace);
    }

    #[test]
    fn test_state_budget_is_inconclusive() {
        let src = "$t = spawn { $a = 1; $b = 2; } $c = 3; $d = 4;";
        let report = Explorer::new(parse(src).unwrap(), ExplorerConfig::default().with_max_states(2))
            .explore()
            .unwrap();
        assert_eq!(report.outcome, Outcome::Inconclusive);
        assert_eq!(report.exit_code(), 0);
    }

    #[test]
    fn test_cache_counts_revisits() {
        let src = "$t = spawn { $a = 1; } $b = 2;";
        let mut explorer = Explorer::new(parse(src).unwrap(), ExplorerConfig::default());
        let report = explorer.explore().unwrap();
        assert!(report.states_pruned > 0);
        let root = GlobalContext::new(&parse(src).unwrap());
        assert_eq!(explorer.cache().hits(&root), 1);
    }

    #[test]
    fn test_initial_deadlock_found() {
        let report = explore("join 0;");
        assert_eq!(report.outcome, Outcome::ViolationFound);
        assert_eq!(report.exit_code(), 1);
        let first = report.first().unwrap();
        assert_eq!(first.kind, FindingKind::Deadlock { blocked: vec![0] });
        assert!(first.trace.is_empty());
        assert_eq!(report.states_explored, 0);
    }

    #[test]
    fn test_cache_compares_states_within_bucket() {
        let a = GlobalContext::new(&parse("x = 1;").unwrap());
        let mut b = a.clone();
        progress_thread(&mut b, 0).unwrap();
        assert!(a != b);

        let mut cache = StateCache::new();
        assert!(cache.visit_bucket(7, &a));
        assert!(cache.visit_bucket(7, &b));
        assert!(!cache.visit_bucket(7, &a));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_report_text() {
        let report = explore("x = 1; assert x == 2;");
        let mut out = Vec::new();
        write_report(&report, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Found 1 failing trace(s):"));
        assert!(text.contains("0 0  (thread 0: assertion_failure_exception)"));
    }
}
