//! Logical replication core: wire codec, tuple codec, relation cache,
//! message layer, apply state machine, and conflict resolution.
//!
//! Connection establishment, the background-worker lifecycle, and the
//! upstream's change-capture mechanism are external collaborators; this
//! crate exposes trait boundaries (`apply::ApplyHost`, `origin::ProgressStore`,
//! `transport::CopyDataTransport`) at exactly those seams.

pub mod apply;
pub mod config;
pub mod encoder;
pub mod errors;
pub mod logging;
pub mod message;
pub mod origin;
pub mod pg_time;
pub mod relation;
pub mod transport;
pub mod tuple;
pub mod wire;

pub use errors::{ReplicationError, ReplicationResult};
