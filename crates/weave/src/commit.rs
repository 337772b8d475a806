//! Commit histories for happens-before tracking.
//!
//! Every write to a global mints a fresh [`Commit`]. A thread's view of a
//! variable carries the ordered list of commits it has witnessed. Views only
//! travel between threads at synchronization points, so a commit being in a
//! view's history means the write happened before the view's current point.

use std::fmt;

use im::Vector;

/// Identifier of one write, minted in increasing order by the global context.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Commit(pub u64);

impl fmt::Display for Commit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of pulling another history into this one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Merge {
    /// The other history is a prefix of ours; nothing changed.
    Kept,
    /// Ours was a strict prefix of theirs and has been fast-forwarded.
    Advanced,
    /// Neither is a prefix of the other. Holds the latest commit on each side.
    Diverged { ours: Commit, theirs: Commit },
}

/// The ordered commits a single view of a variable has witnessed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct CommitHistory {
    commits: Vector<Commit>,
}

impl CommitHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.commits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commits.is_empty()
    }

    pub fn last(&self) -> Option<Commit> {
        self.commits.last().copied()
    }

    pub fn push(&mut self, commit: Commit) {
        self.commits.push_back(commit);
    }

    pub fn contains(&self, commit: Commit) -> bool {
        self.commits.iter().any(|c| *c == commit)
    }

    /// Returns true if self is a prefix of other.
    pub fn partial_le(&self, other: &CommitHistory) -> bool {
        self.commits.len() <= other.commits.len()
            && self.commits.iter().zip(other.commits.iter()).all(|(a, b)| a == b)
    }

    /// Fast-forwards self to other when self is a prefix of it.
    /// Diverged histories are left untouched.
    pub fn merge(&mut self, other: &CommitHistory) -> Merge {
        if other.partial_le(self) {
            return Merge::Kept;
        }
        if self.partial_le(other) {
            self.commits = other.commits.clone();
            return Merge::Advanced;
        }
        match (self.last(), other.last()) {
            (Some(ours), Some(theirs)) => Merge::Diverged { ours, theirs },
            // An empty history is a prefix of everything.
            _ => Merge::Kept,
        }
    }
}

impl fmt::Display for CommitHistory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, c) in self.commits.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{c}")?;
        }
        write!(f, "]")
    }
}

impl FromIterator<Commit> for CommitHistory {
    fn from_iter<I: IntoIterator<Item = Commit>>(iter: I) -> Self {
        Self {
            commits: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn history(ids: &[u64]) -> CommitHistory {
        ids.iter().map(|&i| Commit(i)).collect()
    }

    #[test]
    fn test_new_is_empty() {
        let h = CommitHistory::new();
        assert!(h.is_empty());
        assert_eq!(h.last(), None);
    }

    #[test]
    fn test_push() {
        let mut h = CommitHistory::new();
        h.push(Commit(3));
        h.push(Commit(7));
        assert_eq!(h.len(), 2);
        assert_eq!(h.last(), Some(Commit(7)));
        assert!(h.contains(Commit(3)));
        assert!(!h.contains(Commit(4)));
    }

    #[test]
    fn test_partial_le() {
        let a = history(&[1, 2]);
        let b = history(&[1, 2, 5]);
        assert!(a.partial_le(&b));
        assert!(!b.partial_le(&a));
        assert!(CommitHistory::new().partial_le(&a));
    }

    #[test]
    fn test_merge_fast_forwards() {
        let mut a = history(&[1]);
        assert_eq!(a.merge(&history(&[1, 4])), Merge::Advanced);
        assert_eq!(a, history(&[1, 4]));
    }

    #[test]
    fn test_merge_keeps_longer() {
        let mut a = history(&[1, 4]);
        assert_eq!(a.merge(&history(&[1])), Merge::Kept);
        assert_eq!(a, history(&[1, 4]));
    }

    #[test]
    fn test_merge_diverged() {
        let mut a = history(&[1, 2]);
        let result = a.merge(&history(&[1, 3]));
        assert_eq!(
            result,
            Merge::Diverged {
                ours: Commit(2),
                theirs: Commit(3)
            }
        );
        assert_eq!(a, history(&[1, 2]));
    }

    #[test]
    fn test_display() {
        assert_eq!(history(&[1, 2, 3]).to_string(), "[1, 2, 3]");
        assert_eq!(CommitHistory::new().to_string(), "[]");
    }

    proptest! {
        #[test]
        fn prop_prefix_is_le(ids in prop::collection::vec(0u64..100, 0..12), cut in 0usize..12) {
            let full = history(&ids);
            let prefix = history(&ids[..cut.min(ids.len())]);
            prop_assert!(prefix.partial_le(&full));
            if prefix.len() < full.len() {
                prop_assert!(!full.partial_le(&prefix));
            }
        }

        #[test]
        fn prop_merge_result_contains_both(
            base in prop::collection::vec(0u64..100, 0..6),
            ext in prop::collection::vec(100u64..200, 0..6),
        ) {
            let short = history(&base);
            let long: CommitHistory = base.iter().chain(ext.iter()).map(|&i| Commit(i)).collect();
            let mut merged = short.clone();
            merged.merge(&long);
            prop_assert_eq!(&merged, &long);
            let mut merged = long.clone();
            prop_assert_eq!(merged.merge(&short), Merge::Kept);
        }
    }
}
