//! Error types for dhcpd configuration and service management.
//!
//! All fallible operations in this crate return [`Result<T>`], which uses
//! the [`Error`] enum for error variants.

use std::path::PathBuf;
use std::time::Duration;

use crate::controller::ServiceState;

/// Errors that can occur while syncing configuration or driving the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// File system I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (tool config or settings files).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The file watcher could not be created or attached.
    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    /// Invalid tool configuration.
    ///
    /// Returned by [`Config::validate`](crate::Config::validate).
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The host is not a Unix system. Service management is Unix-only.
    #[error("System is not a Unix environment")]
    UnsupportedPlatform,

    /// A system file the operation depends on does not exist.
    #[error("Required file {0} not found")]
    RequiredFileMissing(PathBuf),

    /// A configuration line could not be interpreted in its block context.
    ///
    /// Malformed tokens inside an otherwise recognizable line are not
    /// reported this way; they are skipped and leave prior values intact.
    #[error("Malformed directive on line {line_number}: {line}")]
    MalformedDirective { line_number: usize, line: String },

    /// The leases file could not be read. The published lease table is untouched.
    #[error("Lease file {path} unreadable: {source}")]
    LeaseFileUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The service status command printed something that is neither
    /// running nor stopped. The controller has assumed `Stopped`.
    #[error("Unknown service status: {0}")]
    UnknownServiceStatus(String),

    /// An external command did not finish within the configured bound.
    #[error("Command `{command}` timed out after {timeout:?}")]
    CommandTimedOut { command: String, timeout: Duration },

    /// A file placement command (`mv`, `cp`, `touch`) exited unsuccessfully.
    #[error("Command `{command}` failed with exit code {exit_code:?}")]
    CommandFailed {
        command: String,
        exit_code: Option<i32>,
    },

    /// A lifecycle operation was requested from a state that does not allow it.
    #[error("Cannot {operation} while service is {state}")]
    InvalidTransition {
        operation: &'static str,
        state: ServiceState,
    },
}

/// A specialized Result type for dhcpd management operations.
pub type Result<T> = std::result::Result<T, Error>;
