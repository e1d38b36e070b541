//! Error types for the textboard core.
//!
//! Each module boundary gets its own `thiserror` enum, mirroring the
//! `DbError`/`SessionError` split used throughout the forwarding suite this
//! crate grew out of. `main` is the only place that turns an error into a
//! process exit; everything below that converts failures into either a log
//! line (corrupt data, dropped connections) or a client-visible `E <reason>`.

use std::path::PathBuf;
use thiserror::Error;

/// Fatal at startup: bad CLI/config-file input, or a database root that
/// can't be created or isn't a directory.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid port {0}: must be 0-65535")]
    InvalidPort(String),
    #[error("unknown charset label: {0}")]
    UnknownCharset(String),
    #[error("database directory {0:?} exists and is not a directory")]
    NotADirectory(PathBuf),
    #[error("couldn't create database directory {path:?}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("couldn't read config file {path:?}: {source}")]
    ReadConfigFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed config line {line_no} in {path:?}: {line:?}")]
    MalformedLine {
        path: PathBuf,
        line_no: usize,
        line: String,
    },
}

/// Raised by [`crate::message`] when a message file can't be parsed,
/// written, or persisted. Corrupt files are downgraded to a warning by the
/// caller (§7 kind 3); a [`MessageIoError`] from `create` surfaces as an
/// [`IndexError`] for the posting connection (§7 kind 6).
#[derive(Debug, Error)]
pub enum MessageIoError {
    #[error("empty message file")]
    EmptyFile,
    #[error("malformed meta line {0:?}")]
    MalformedMeta(String),
    #[error("meta line topic {found:?} does not match expected topic {expected:?}")]
    TopicMismatch { expected: String, found: String },
    #[error("timestamp {0:?} is not a valid unsigned 64-bit integer")]
    BadTimestamp(String),
    #[error("first line {0:?} is missing a topic after the timestamp")]
    MissingTopic(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Raised by [`crate::index::Index`] when a write can't be indexed, or when
/// a snapshot rebuilt from disk turns out to have no valid messages.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("failed to persist message: {0}")]
    Persist(#[from] MessageIoError),
    #[error("topic {0:?} has no valid messages after update")]
    EmptySnapshot(String),
}

/// A recoverable protocol violation from a connected client (§7 kind 4).
/// Its `Display` text is exactly the reason appended after `E ` on the wire.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown command {0:?}")]
    UnknownCommand(String),
    #[error("missing argument")]
    MissingArgument,
    #[error("expected a non-negative integer, got {0:?}")]
    NotANumber(String),
    #[error("message must contain at least a meta line")]
    EmptyMessage,
}
