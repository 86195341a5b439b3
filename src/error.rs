use camino::Utf8PathBuf;
use thiserror::Error;

use crate::future::Status;
use crate::task::TaskId;

#[derive(Debug, Error)]
pub enum LoomError {
    #[error("Connection to the server lost: {source}")]
    ConnectionLost {
        #[source]
        source: std::io::Error,
    },

    #[error("Couldn't connect to '{address}': {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Task id={id} failed on worker '{worker}': {message}")]
    TaskFailed {
        id: TaskId,
        worker: String,
        message: String,
    },

    #[error("Server error: {0}")]
    Server(String),

    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("Malformed message from the server.\n{0}")]
    Decode(#[from] prost::DecodeError),

    #[error("Task id={0} was already released and can't be used as an input")]
    StaleReference(TaskId),

    #[error("Invalid plan node: {0}")]
    InvalidPlanNode(String),

    #[error("Task id={id} is {status}, the operation is no longer valid")]
    InvalidFutureState { id: TaskId, status: Status },

    #[error("Symbol '{0}' is not known to the server")]
    UnknownSymbol(String),

    #[error("Path '{0}' is not absolute")]
    RelativePath(Utf8PathBuf),

    #[error("Couldn't encode task metadata: {0}")]
    Metadata(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Couldn't read client configuration.\n{0}")]
    Config(#[from] serde_json::Error),
}

impl LoomError {
    pub(crate) fn connection_closed() -> Self {
        LoomError::ConnectionLost {
            source: std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed by peer",
            ),
        }
    }

    /// Whether the connection that produced this error must be abandoned.
    ///
    /// Task failures, server-side errors and local validation errors leave the
    /// connection usable for further, unrelated submissions.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            LoomError::ConnectionLost { .. }
                | LoomError::Connect { .. }
                | LoomError::Decode(_)
                | LoomError::Protocol(_)
        )
    }
}
