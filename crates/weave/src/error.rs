//! Error types for setup and internal faults.
//!
//! Data races, lock misuse, failed assertions and unassigned reads are not
//! errors: they are [`TerminationStatus`](crate::thread::TerminationStatus)
//! values produced by the program under test.

use std::path::PathBuf;

use thiserror::Error;

/// A syntax error in the input program.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{line}:{column}: {message}")]
pub struct ParseError {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl ParseError {
    pub fn new(line: usize, column: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            column,
            message: message.into(),
        }
    }
}

/// Errors that abort an invocation.
#[derive(Debug, Error)]
pub enum WeaveError {
    /// The input program did not parse.
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Reading the input or writing a diagram failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Rendering the execution graph failed.
    #[error("Render error: {0}")]
    Render(#[from] std::io::Error),

    /// A driver referred to a thread that does not exist.
    #[error("Invalid thread id: {0}")]
    InvalidThread(usize),

    /// A thread's program counter points outside its block.
    #[error("Thread {thread} has no statement at pc {pc}")]
    MissingStatement { thread: usize, pc: usize },
}

impl WeaveError {
    /// Creates an I/O error tagged with the offending path.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, WeaveError>;
