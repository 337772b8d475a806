//! Causal execution graph.
//!
//! Events live in an append-only arena and refer to each other by
//! [`EventId`]. Every event has a program-order predecessor (`prev`) except
//! the root `Start`; the first event of a spawned thread is a `Start` whose
//! predecessor is the spawning event. Cross-thread edges (reads-from, lock
//! ordering, joins, conflicts) are carried in the event kinds.
//!
//! The arena is a persistent vector, so cloning a context for a search branch
//! shares all events recorded so far.

use im::Vector;

use crate::ast::Value;
use crate::commit::Commit;
use crate::thread::{TerminationStatus, ThreadId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId(pub usize);

/// Two writes to `var` that neither thread had ordered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Conflict {
    pub var: String,
    pub sources: (EventId, EventId),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventKind {
    Start,
    End(TerminationStatus),
    Read {
        var: String,
        value: Value,
        commit: Option<Commit>,
        /// The write this read observed.
        source: Option<EventId>,
    },
    Write {
        var: String,
        value: Value,
        commit: Commit,
    },
    Spawn {
        spawned: ThreadId,
    },
    Join {
        joinee: ThreadId,
        /// Last event of the joined thread.
        from: EventId,
        conflict: Option<Conflict>,
    },
    Lock {
        name: String,
        /// Event of the previous release, if any.
        ordered_after: Option<EventId>,
        conflict: Option<Conflict>,
    },
    Unlock {
        name: String,
    },
    Assert {
        condition: String,
        passed: bool,
    },
    /// An access to `var` that is unordered with the foreign `write`.
    Race {
        var: String,
        write: EventId,
    },
    /// The statement a live thread will run next. Rendering only.
    Pending {
        statement: String,
    },
}

impl EventKind {
    pub fn is_pending(&self) -> bool {
        matches!(self, EventKind::Pending { .. })
    }

    /// Short human-readable label.
    pub fn label(&self) -> String {
        match self {
            EventKind::Start => "start".to_string(),
            EventKind::End(status) => format!("end: {}", status),
            EventKind::Read { var, value, .. } => format!("read {} = {}", var, value),
            EventKind::Write { var, value, commit } => format!("write {} = {} @{}", var, value, commit),
            EventKind::Spawn { spawned } => format!("spawn thread {}", spawned),
            EventKind::Join { joinee, .. } => format!("join thread {}", joinee),
            EventKind::Lock { name, .. } => format!("lock {}", name),
            EventKind::Unlock { name } => format!("unlock {}", name),
            EventKind::Assert { condition, passed } => {
                format!("assert {} ({})", condition, if *passed { "ok" } else { "failed" })
            }
            EventKind::Race { var, .. } => format!("race on {}", var),
            EventKind::Pending { statement } => statement.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    pub thread: ThreadId,
    pub kind: EventKind,
    pub prev: Option<EventId>,
    pub next: Option<EventId>,
}

#[derive(Clone, Debug, Default)]
pub struct ExecutionGraph {
    events: Vector<Event>,
}

impl ExecutionGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn get(&self, id: EventId) -> Option<&Event> {
        self.events.get(id.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (EventId, &Event)> {
        self.events.iter().enumerate().map(|(i, e)| (EventId(i), e))
    }

    fn push(&mut self, event: Event) -> EventId {
        let id = EventId(self.events.len());
        self.events.push_back(event);
        id
    }

    /// Adds the `Start` event of a thread. `parent` is the spawning event,
    /// absent for the main thread.
    pub fn start(&mut self, thread: ThreadId, parent: Option<EventId>) -> EventId {
        self.push(Event {
            thread,
            kind: EventKind::Start,
            prev: parent,
            next: None,
        })
    }

    /// Appends an event after `*tail` and moves `*tail` to it.
    ///
    /// A pending marker hanging off the tail is replaced in place.
    pub fn append(&mut self, tail: &mut EventId, thread: ThreadId, kind: EventKind) -> EventId {
        let event = Event {
            thread,
            kind,
            prev: Some(*tail),
            next: None,
        };
        let pending = self
            .successor(*tail)
            .filter(|&next| self.get(next).map_or(false, |e| e.kind.is_pending()));
        let id = match pending {
            Some(slot) => {
                self.events.set(slot.0, event);
                slot
            }
            None => {
                let id = self.push(event);
                if let Some(prev) = self.events.get_mut(tail.0) {
                    prev.next = Some(id);
                }
                id
            }
        };
        tracing::trace!(thread, event = id.0, "append {}", self.events[id.0].kind.label());
        *tail = id;
        id
    }

    /// Hangs a pending marker off `tail` unless it already has a successor.
    pub fn append_pending(&mut self, tail: EventId, thread: ThreadId, statement: &str) -> Option<EventId> {
        if self.successor(tail).is_some() {
            return None;
        }
        let id = self.push(Event {
            thread,
            kind: EventKind::Pending {
                statement: statement.to_string(),
            },
            prev: Some(tail),
            next: None,
        });
        if let Some(prev) = self.events.get_mut(tail.0) {
            prev.next = Some(id);
        }
        Some(id)
    }

    pub fn successor(&self, id: EventId) -> Option<EventId> {
        self.get(id).and_then(|e| e.next)
    }

    /// Events of one thread in program order, starting from its `Start`.
    pub fn thread_events(&self, start: EventId) -> Vec<EventId> {
        let mut out = Vec::new();
        let mut cursor = Some(start);
        while let Some(id) = cursor {
            out.push(id);
            cursor = self.successor(id);
        }
        out
    }

    /// `Start` events, one per thread, in creation order.
    pub fn starts(&self) -> impl Iterator<Item = (EventId, &Event)> {
        self.iter().filter(|(_, e)| e.kind == EventKind::Start)
    }

    /// Whether `earlier` reaches `later` along program order and cross-thread
    /// edges.
    pub fn happens_before(&self, earlier: EventId, later: EventId) -> bool {
        let mut stack = vec![later];
        let mut seen = vec![false; self.events.len()];
        while let Some(id) = stack.pop() {
            if id == earlier {
                return true;
            }
            if seen.get(id.0).copied().unwrap_or(true) {
                continue;
            }
            seen[id.0] = true;
            if let Some(event) = self.get(id) {
                stack.extend(event.prev);
                match &event.kind {
                    EventKind::Read { source, .. } => stack.extend(*source),
                    EventKind::Join { from, .. } => stack.push(*from),
                    EventKind::Lock { ordered_after, .. } => stack.extend(*ordered_after),
                    _ => {}
                }
            }
        }
        false
    }
}
