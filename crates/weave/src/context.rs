//! Whole-program state: threads, locks, commits and the execution graph.

use std::hash::{Hash, Hasher};
use std::path::Path;

use im::{OrdMap, Vector};
use rustc_hash::FxHasher;

use crate::ast::{BlockId, Program};
use crate::commit::Commit;
use crate::error::{Result, WeaveError};
use crate::graph::{EventId, ExecutionGraph};
use crate::render;
use crate::thread::{Globals, Thread, ThreadContext, ThreadId};

/// A mutex together with the view published by its last releaser.
#[derive(Clone, Debug, Default)]
pub struct Lock {
    pub globals: Globals,
    pub owner: Option<ThreadId>,
    /// Last event that touched the lock.
    pub last: Option<EventId>,
}

impl Lock {
    pub fn is_free(&self) -> bool {
        self.owner.is_none()
    }
}

pub type Locks = OrdMap<String, Lock>;

#[derive(Clone, Debug)]
pub struct GlobalContext {
    pub threads: Vector<Thread>,
    pub locks: Locks,
    pub entry_node: EventId,
    pub commit_map: OrdMap<Commit, EventId>,
    /// Next commit to mint.
    pub uuid: u64,
    pub graph: ExecutionGraph,
}

impl GlobalContext {
    /// Seeds the main thread with the program's top-level block.
    pub fn new(program: &Program) -> Self {
        let mut graph = ExecutionGraph::new();
        let entry_node = graph.start(0, None);
        let main = Thread::new(ThreadContext::new(Globals::new(), entry_node), program.body.clone());
        Self {
            threads: Vector::unit(main),
            locks: Locks::new(),
            entry_node,
            commit_map: OrdMap::new(),
            uuid: 0,
            graph,
        }
    }

    pub fn thread(&self, tid: ThreadId) -> Result<&Thread> {
        self.threads.get(tid).ok_or(WeaveError::InvalidThread(tid))
    }

    pub fn thread_mut(&mut self, tid: ThreadId) -> Result<&mut Thread> {
        self.threads.get_mut(tid).ok_or(WeaveError::InvalidThread(tid))
    }

    pub fn mint_commit(&mut self) -> Commit {
        let commit = Commit(self.uuid);
        self.uuid += 1;
        commit
    }

    /// Ids of threads that have not terminated.
    pub fn live_threads(&self) -> Vec<ThreadId> {
        (0..self.threads.len()).filter(|&tid| self.threads[tid].is_live()).collect()
    }

    pub fn all_terminated(&self) -> bool {
        self.threads.iter().all(|t| !t.is_live())
    }

    fn block_of(&self, tid: ThreadId) -> Option<BlockId> {
        self.threads.get(tid).map(|t| t.block.id)
    }

    /// Gives every live thread a pending marker for its next statement.
    pub fn add_pending_markers(&mut self) {
        for tid in 0..self.threads.len() {
            let thread = &self.threads[tid];
            if !thread.is_live() {
                continue;
            }
            let tail = thread.ctx.tail;
            let statement = thread.next_statement().unwrap_or("end").to_string();
            self.graph.append_pending(tail, tid, &statement);
        }
    }

    /// Renders the execution graph to `path`, format chosen by extension.
    pub fn write_execution_graph(&mut self, path: &Path) -> Result<()> {
        self.add_pending_markers();
        render::write_graph(&self.graph, path)
    }

    /// Hash of the same projection [`PartialEq`] compares.
    pub fn fingerprint(&self) -> u64 {
        let mut per_thread: Vec<u64> = self
            .threads
            .iter()
            .map(|t| {
                let mut h = FxHasher::default();
                t.block.id.hash(&mut h);
                t.pc.hash(&mut h);
                t.terminated.hash(&mut h);
                for (reg, value) in t.ctx.locals.iter() {
                    reg.hash(&mut h);
                    value.hash(&mut h);
                }
                0xffu8.hash(&mut h);
                for (var, global) in t.ctx.globals.iter() {
                    var.hash(&mut h);
                    global.value.hash(&mut h);
                }
                h.finish()
            })
            .collect();
        per_thread.sort_unstable();

        let mut h = FxHasher::default();
        per_thread.hash(&mut h);
        for (name, lock) in self.locks.iter() {
            name.hash(&mut h);
            lock.owner.and_then(|tid| self.block_of(tid)).hash(&mut h);
        }
        h.finish()
    }
}

/// State equivalence for deduplication. Threads are matched by the block
/// they execute, so spawn order is irrelevant; lock owners are compared the
/// same way.
impl PartialEq for GlobalContext {
    fn eq(&self, other: &Self) -> bool {
        if self.threads.len() != other.threads.len() || self.locks.len() != other.locks.len() {
            return false;
        }

        let mut used = vec![false; other.threads.len()];
        for thread in self.threads.iter() {
            let matched = other
                .threads
                .iter()
                .enumerate()
                .find(|(i, t)| !used[*i] && t.block.id == thread.block.id);
            match matched {
                Some((i, t)) if t == thread => used[i] = true,
                _ => return false,
            }
        }

        self.locks.iter().all(|(name, lock)| {
            other.locks.get(name).map_or(false, |theirs| {
                lock.owner.and_then(|tid| self.block_of(tid)) == theirs.owner.and_then(|tid| other.block_of(tid))
            })
        })
    }
}

impl Eq for GlobalContext {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    #[test]
    fn test_new_seeds_main_thread() {
        let program = parse("x = 1;").unwrap();
        let ctx = GlobalContext::new(&program);
        assert_eq!(ctx.threads.len(), 1);
        assert_eq!(ctx.threads[0].pc, 0);
        assert_eq!(ctx.threads[0].ctx.tail, ctx.entry_node);
        assert_eq!(ctx.graph.len(), 1);
        assert!(ctx.locks.is_empty());
    }

    #[test]
    fn test_fresh_contexts_are_equal() {
        let program = parse("x = 1;").unwrap();
        let a = GlobalContext::new(&program);
        let b = GlobalContext::new(&program);
        assert_eq!(a, b);
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_pc_distinguishes_contexts() {
        let program = parse("x = 1;").unwrap();
        let a = GlobalContext::new(&program);
        let mut b = a.clone();
        b.threads[0].pc = 1;
        assert_ne!(a, b);
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_lock_ownership_distinguishes_contexts() {
        let program = parse("lock m;").unwrap();
        let mut a = GlobalContext::new(&program);
        a.locks.insert("m".into(), Lock::default());
        let mut b = a.clone();
        b.locks.insert(
            "m".into(),
            Lock {
                owner: Some(0),
                ..Lock::default()
            },
        );
        assert_ne!(a, b);
    }

    #[test]
    fn test_pending_markers_once() {
        let program = parse("x = 1;").unwrap();
        let mut ctx = GlobalContext::new(&program);
        ctx.add_pending_markers();
        ctx.add_pending_markers();
        assert_eq!(ctx.graph.len(), 2);
    }
}
