//! Interleaving explorer and race checker for a small lock-based language.
//!
//! Each thread works on a private view of the shared variables. Views are
//! exchanged only when a lock is released and acquired, when a thread is
//! joined, and when it is spawned. Every write is tagged with a commit, and an
//! access that meets a foreign commit missing from the thread's own history
//! is a data race.
//!
//! Three drivers share the single-step transition in [`step`]:
//! [`interpreter::interpret`] runs a fixed round-robin schedule,
//! [`debugger::interpret_interactive`] lets an operator choose, and
//! [`explorer::model_check`] searches every interleaving with state
//! deduplication.

pub mod ast;
pub mod commit;
pub mod config;
pub mod context;
pub mod debugger;
pub mod error;
pub mod explorer;
pub mod graph;
pub mod interpreter;
pub mod parser;
pub mod path;
pub mod render;
pub mod step;
pub mod thread;

pub use ast::Program;
pub use config::ExplorerConfig;
pub use context::GlobalContext;
pub use debugger::interpret_interactive;
pub use error::{ParseError, Result, WeaveError};
pub use explorer::{model_check, ExplorationReport, Explorer, Finding, FindingKind, Outcome};
pub use interpreter::{interpret, run_threads, RunReport};
pub use parser::parse;
pub use step::progress_thread;
pub use thread::{ProgressStatus, StepOutcome, TerminationStatus, ThreadId};
