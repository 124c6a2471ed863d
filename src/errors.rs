//! Error types for the replication core.
//!
//! Mirrors the shape of a typical replication-checker error enum: one
//! variant per failure class, `thiserror` derives for `Display`, and a
//! handful of constructor functions so call sites read naturally.

use thiserror::Error;

/// Error produced anywhere in the wire codec, tuple codec, relation cache,
/// message layer, or apply engine.
#[derive(Error, Debug)]
pub enum ReplicationError {
    /// Truncated frame, bad length prefix, missing NUL terminator.
    #[error("malformed frame: {message}")]
    MalformedFrame { message: String },

    /// Messages arrived out of the order the apply state machine allows.
    #[error("protocol violation: {message}")]
    ProtocolViolation { message: String },

    /// A flag bit or action tag appeared that no negotiated capability permits.
    #[error("unsupported feature: {message}")]
    UnsupportedFeature { message: String },

    /// A row change referenced a relation id with no cached descriptor.
    #[error("unknown relation id {relation_id}")]
    UnknownRelation { relation_id: u32 },

    /// The locally stored schema cannot represent a received descriptor.
    #[error("schema mismatch for relation {relation_id}: {message}")]
    SchemaMismatch { relation_id: u32, message: String },

    /// Configuration loading/validation failure.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Transport/connection failure to the upstream.
    #[error("connection error: {message}")]
    Connection { message: String },

    /// The transport ended the stream.
    #[error("transport closed")]
    TransportClosed,

    /// Generic IO failure.
    #[error("io error")]
    Io(#[from] std::io::Error),

    /// String conversion failure.
    #[error("string conversion error")]
    StringConversion(#[from] std::string::FromUtf8Error),
}

pub type ReplicationResult<T> = std::result::Result<T, ReplicationError>;

impl ReplicationError {
    pub fn malformed<S: Into<String>>(message: S) -> Self {
        Self::MalformedFrame {
            message: message.into(),
        }
    }

    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Self::ProtocolViolation {
            message: message.into(),
        }
    }

    pub fn unsupported<S: Into<String>>(message: S) -> Self {
        Self::UnsupportedFeature {
            message: message.into(),
        }
    }

    pub fn schema_mismatch<S: Into<String>>(relation_id: u32, message: S) -> Self {
        Self::SchemaMismatch {
            relation_id,
            message: message.into(),
        }
    }

    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }
}

/// Non-fatal events raised during apply that do not abort the transaction.
/// Kept separate from `ReplicationError` since the apply engine must keep
/// going after reporting one of these.
#[derive(Debug, Clone)]
pub enum ReportEvent {
    /// UPDATE/DELETE target not found by replica identity.
    MissingRow {
        relation_id: u32,
        op: MissingRowOp,
    },
    /// INSERT conflicted with an existing row and was resolved.
    ConflictResolved {
        relation_id: u32,
        resolution: ResolutionTag,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingRowOp {
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionTag {
    KeepLocal,
    ApplyRemote,
    Merged,
}
