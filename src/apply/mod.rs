//! The apply-side transaction state machine: lazy local transaction
//! opening, conflict detection/resolution, and commit-time origin progress
//! advancement.

mod conflict;
mod engine;
mod host;

pub use conflict::{ConflictResolver, LastWriterWinsResolver};
pub use engine::{ApplyEngine, ApplyState, ReplicationStats};
pub use host::{LocalRow, MemoryHost, ApplyHost};
