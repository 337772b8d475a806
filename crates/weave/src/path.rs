//! Choice points of the exhaustive search.

use serde::Serialize;

use crate::thread::ThreadId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreadStatus {
    /// Terminated; never scheduled again.
    Disabled,
    /// Live, but its next statement cannot run in this state.
    Blocked,
    /// Runnable and not yet explored from this state.
    Pending,
    /// The branch currently being explored.
    Active,
    Visited,
}

impl ThreadStatus {
    pub fn is_runnable(self) -> bool {
        matches!(self, ThreadStatus::Pending | ThreadStatus::Active | ThreadStatus::Visited)
    }
}

/// Scheduling alternatives at one search state.
#[derive(Clone, Debug)]
pub struct Branch {
    pub threads: Vec<ThreadStatus>,
    pub active_thread: Option<ThreadId>,
}

impl Branch {
    pub fn new(threads: Vec<ThreadStatus>) -> Self {
        Self {
            threads,
            active_thread: None,
        }
    }

    /// No live thread can run, though at least one is live.
    pub fn is_stuck(&self) -> bool {
        self.threads.iter().any(|s| *s == ThreadStatus::Blocked) && !self.threads.iter().any(|s| s.is_runnable())
    }

    pub fn blocked(&self) -> Vec<ThreadId> {
        self.threads
            .iter()
            .enumerate()
            .filter(|(_, s)| **s == ThreadStatus::Blocked)
            .map(|(tid, _)| tid)
            .collect()
    }

    /// Marks the active thread visited and activates the next pending one.
    pub fn step(&mut self) -> Option<ThreadId> {
        if let Some(active) = self.active_thread {
            self.threads[active] = ThreadStatus::Visited;
        }
        let next = self.threads.iter().position(|s| *s == ThreadStatus::Pending)?;
        self.threads[next] = ThreadStatus::Active;
        self.active_thread = Some(next);
        Some(next)
    }
}

/// One scheduling decision: which thread ran which statement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Choice {
    pub thread: ThreadId,
    pub statement: String,
}

/// Thread ids of a trace, as printed in reports.
pub fn thread_sequence(trace: &[Choice]) -> String {
    trace
        .iter()
        .map(|c| c.thread.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_visits_pending_in_order() {
        use ThreadStatus::*;
        let mut branch = Branch::new(vec![Pending, Blocked, Pending, Disabled]);
        assert_eq!(branch.step(), Some(0));
        assert_eq!(branch.threads[0], Active);
        assert_eq!(branch.step(), Some(2));
        assert_eq!(branch.threads[0], Visited);
        assert_eq!(branch.step(), None);
        assert_eq!(branch.threads[2], Visited);
    }

    #[test]
    fn test_stuck_when_only_blocked() {
        use ThreadStatus::*;
        let branch = Branch::new(vec![Blocked, Disabled, Blocked]);
        assert!(branch.is_stuck());
        assert_eq!(branch.blocked(), vec![0, 2]);
        assert!(!Branch::new(vec![Disabled, Disabled]).is_stuck());
        assert!(!Branch::new(vec![Blocked, Pending]).is_stuck());
    }

    #[test]
    fn test_thread_sequence() {
        let trace = vec![
            Choice {
                thread: 0,
                statement: "x = 1".into(),
            },
            Choice {
                thread: 1,
                statement: "$r = x".into(),
            },
        ];
        assert_eq!(thread_sequence(&trace), "0 1");
    }
}
