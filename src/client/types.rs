use std::time::Duration;

use crate::protocol::{ErrorReason, ProtocolError};

/// Everything a client call can fail with.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The server answered `ERROR|<REASON>`.
    #[error("server replied ERROR|{0}")]
    Server(ErrorReason),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no reply within {0:?}")]
    Timeout(Duration),
    #[error("connection closed by peer")]
    Disconnected,
    #[error("not connected")]
    NotConnected,
    /// The reply could not be parsed.
    #[error(transparent)]
    Malformed(#[from] ProtocolError),
    /// A well-formed reply that does not answer the request sent.
    #[error("unexpected reply to {verb}: {reply}")]
    Unexpected { verb: &'static str, reply: String },
    #[error("invalid client identifier {0:?}")]
    InvalidId(String),
    #[error("invalid record name {0:?}")]
    InvalidName(String),
}

impl ClientError {
    /// Whether the failure lies in the transport rather than in the answer.
    /// Transport failures leave the client disconnected.
    pub fn is_transport(&self) -> bool {
        !matches!(
            self,
            Self::Server(_) | Self::InvalidId(_) | Self::InvalidName(_)
        )
    }

    /// The server's reason, for in-band errors.
    pub fn reason(&self) -> Option<&ErrorReason> {
        match self {
            Self::Server(reason) => Some(reason),
            _ => None,
        }
    }

    pub fn is_lock_conflict(&self) -> bool {
        self.reason().is_some_and(ErrorReason::is_lock_conflict)
    }
}
