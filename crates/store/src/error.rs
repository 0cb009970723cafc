//! Error types for store operations.

use snafu::Snafu;

/// Result type alias for store operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors that can occur during store operations.
///
/// Absence is never an error: lookups that find nothing return `Ok(None)`.
/// `Timeout` is retried internally on every path except the synchronous
/// read primitive, whose callers know how to swallow it.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// Transient driver failure (request timeout, unavailable or
    /// overloaded replicas, exhausted connection pool).
    #[snafu(display("Database request timed out: {message}"))]
    Timeout {
        /// Driver description of the failure.
        message: String,
    },

    /// A result column did not hold the expected shape.
    #[snafu(display("Unexpected column shape: {message}"))]
    Decode {
        /// What was expected and what was found.
        message: String,
    },

    /// Stored state contradicts a structural invariant (for example a
    /// successor link pointing at a missing object).
    #[snafu(display("Invariant violated: {message}"))]
    InvariantViolation {
        /// Description of the violation.
        message: String,
    },

    /// The range commit for a ledger was rejected without a timeout; the
    /// ledger must not be considered visible.
    #[snafu(display("Range commit rejected for ledger {sequence}"))]
    CommitRejected {
        /// Sequence whose commit was rejected.
        sequence: u32,
    },

    /// Operation attempted while the store is not open.
    #[snafu(display("Store is not open"))]
    Closed,

    /// Failed to establish a session with the cluster.
    #[snafu(display("Failed to connect to the cluster: {source}"))]
    Connect {
        /// The underlying driver error.
        source: scylla::transport::errors::NewSessionError,
    },

    /// The server rejected a statement outright (schema or query bug, not
    /// a transient condition).
    #[snafu(display("Query rejected by the server: {message}"))]
    Query {
        /// Driver description of the rejection.
        message: String,
    },

    /// A structured payload failed to encode or decode.
    #[snafu(display("Codec error: {source}"))]
    Codec {
        /// The underlying codec error.
        source: chronicle_types::CodecError,
    },
}

impl From<chronicle_types::CodecError> for Error {
    fn from(source: chronicle_types::CodecError) -> Self {
        Error::Codec { source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_timeout() {
        let err = Error::Timeout { message: "request timed out".to_string() };
        assert_eq!(format!("{err}"), "Database request timed out: request timed out");
    }

    #[test]
    fn test_display_commit_rejected() {
        let err = Error::CommitRejected { sequence: 103 };
        assert_eq!(format!("{err}"), "Range commit rejected for ledger 103");
    }

    #[test]
    fn test_display_closed() {
        assert_eq!(format!("{}", Error::Closed), "Store is not open");
    }

    #[test]
    fn test_codec_errors_convert() {
        let source = chronicle_types::decode::<u64>(&[]).unwrap_err();
        let err: Error = source.into();
        assert!(matches!(err, Error::Codec { .. }));
    }
}
