use crate::protocol::{ClientId, ErrorReason};

/// Identifier of one client connection to the Manager.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of consulting the shadow table before forwarding OPEN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShadowOutcome {
    /// A tentative entry was written; roll it back if the Repository refuses.
    Reserved,
    /// The caller already owns the entry.
    AlreadyHeld,
    /// Held by someone else: reject without contacting the Repository.
    Conflict(ClientId),
    /// The table is switched off; always forward.
    Disabled,
}

/// Failure of one round trip to the Repository.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UpstreamError {
    /// Connect failed or the round trip ran past its deadline.
    #[error("repository unreachable: {0}")]
    Down(String),
    /// The link closed, or answered with something that is not a reply to
    /// the command sent.
    #[error("repository gave no usable answer: {0}")]
    NoResponse(String),
}

impl UpstreamError {
    /// The in-band reason reported to the client.
    pub fn reason(&self) -> ErrorReason {
        match self {
            Self::Down(_) => ErrorReason::RepoDown,
            Self::NoResponse(_) => ErrorReason::RepoNoResponse,
        }
    }
}
