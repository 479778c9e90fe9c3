//! Errors surfaced by request execution.

use ldapwire_core::{BerError, ClassifyError, DirectoryError, ResultCode};

/// Everything `Connection::execute` and its per-operation wrappers can fail with.
///
/// No variant is retried internally; retry policy belongs to the caller.
#[derive(Debug, thiserror::Error)]
pub enum LdapError {
    /// The response for this request could not be decoded. The connection
    /// itself stays usable.
    #[error("malformed encoding: {0}")]
    MalformedEncoding(#[from] BerError),
    /// Writing the request (or reading the stream) failed.
    #[error("transport error: {0:#}")]
    Transport(anyhow::Error),
    /// The server answered with a non-success result code.
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    #[error("request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("request cancelled")]
    Cancelled,
    /// The response carried a different tag than the request expects.
    #[error("unexpected response tag {tag}, expected {expected}")]
    UnexpectedResponse { tag: u32, expected: u32 },
    /// The connection closed before a response arrived, or was already
    /// closed when the request was issued.
    #[error("connection closed")]
    ConnectionClosed,
    #[error("no free message identifiers")]
    IdentifiersExhausted,
}

impl LdapError {
    /// The server's result code, for directory errors.
    #[must_use]
    pub fn result_code(&self) -> Option<ResultCode> {
        match self {
            LdapError::Directory(err) => Some(err.code),
            _ => None,
        }
    }

    /// Returns `true` if this is a directory error with the given code.
    #[must_use]
    pub fn is_result_code(&self, code: ResultCode) -> bool {
        self.result_code() == Some(code)
    }
}

impl From<ClassifyError> for LdapError {
    fn from(err: ClassifyError) -> Self {
        match err {
            ClassifyError::Directory(err) => LdapError::Directory(err),
            ClassifyError::Malformed(err) => LdapError::MalformedEncoding(err),
        }
    }
}

impl From<std::io::Error> for LdapError {
    fn from(err: std::io::Error) -> Self {
        LdapError::Transport(err.into())
    }
}
