use chrono::NaiveDateTime;
use std::fmt;

/// Wire format for record timestamps (`lastModified`).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
/// Wire format for the STATS cutoff date.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Caller-supplied identifier of a client.
///
/// Identifiers are not authenticated. Lock ownership compares them
/// case-insensitively via [`ClientId::same_as`]; the original spelling is kept
/// for display (e.g. in `LOCKED_BY|<owner>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientId(pub String);

impl ClientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Identity check used for every lock decision.
    pub fn same_as(&self, other: &ClientId) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }

    /// Grouping key under the same ASCII-only folding as [`ClientId::same_as`].
    pub fn folded(&self) -> String {
        self.0.to_ascii_lowercase()
    }

    /// An identifier must be non-empty and must not contain characters that
    /// are field separators in LIST/STATS payloads.
    pub fn is_valid(id: &str) -> bool {
        !id.trim().is_empty() && !id.contains([',', ';', '|', '\n', '\r'])
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One row of a `LIST` snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    pub name: String,
    pub author: ClientId,
    pub last_modified: NaiveDateTime,
    pub locked: bool,
}

/// Body of a `DOWNLOAD` reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordView {
    pub author: ClientId,
    pub last_modified: NaiveDateTime,
    pub content: String,
}

/// The most recently modified record at or after a STATS cutoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatestRecord {
    pub name: String,
    pub author: ClientId,
    pub last_modified: NaiveDateTime,
}

/// Aggregate answer to `STATS`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsSummary {
    /// Content bytes authored by the requesting client.
    pub my_files: usize,
    pub latest_after: Option<LatestRecord>,
    /// Content bytes per author, ordered by author.
    pub totals: Vec<(ClientId, usize)>,
}

/// In-band failure vocabulary carried as `ERROR|<REASON>`.
///
/// The `Display` form is exactly what follows `ERROR|` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ErrorReason {
    #[error("BAD_FORMAT")]
    BadFormat,
    #[error("UNKNOWN_COMMAND")]
    UnknownCommand,
    #[error("BAD_NAME")]
    BadName,
    #[error("ALREADY_EXISTS")]
    AlreadyExists,
    #[error("NOT_FOUND")]
    NotFound,
    #[error("LOCKED_BY|{0}")]
    LockedBy(ClientId),
    /// Legacy lock rejection without an owner.
    #[error("ODBIJENO")]
    Rejected,
    #[error("NOT_OPENED")]
    NotOpened,
    #[error("NOT_LOCKED")]
    NotLocked,
    #[error("REPO_DOWN")]
    RepoDown,
    #[error("REPO_NO_RESPONSE")]
    RepoNoResponse,
    #[error("INTERNAL")]
    Internal,
}

impl ErrorReason {
    /// Parses the fields that follow `ERROR` in a reply frame.
    pub fn from_fields(fields: &[&str]) -> Option<Self> {
        let reason = match fields {
            ["BAD_FORMAT"] => Self::BadFormat,
            ["UNKNOWN_COMMAND"] => Self::UnknownCommand,
            ["BAD_NAME"] => Self::BadName,
            ["ALREADY_EXISTS"] => Self::AlreadyExists,
            ["NOT_FOUND"] => Self::NotFound,
            ["LOCKED_BY", owner] if !owner.is_empty() => Self::LockedBy(ClientId::new(*owner)),
            ["ODBIJENO"] => Self::Rejected,
            ["NOT_OPENED"] => Self::NotOpened,
            ["NOT_LOCKED"] => Self::NotLocked,
            ["REPO_DOWN"] => Self::RepoDown,
            ["REPO_NO_RESPONSE"] => Self::RepoNoResponse,
            ["INTERNAL"] => Self::Internal,
            _ => return None,
        };
        Some(reason)
    }

    pub fn is_lock_conflict(&self) -> bool {
        matches!(self, Self::LockedBy(_) | Self::Rejected)
    }

    /// Upstream failures reported by the Manager rather than by the store.
    pub fn is_upstream_failure(&self) -> bool {
        matches!(self, Self::RepoDown | Self::RepoNoResponse)
    }
}

/// Failure to parse a frame into a [`crate::protocol::Command`] or
/// [`crate::protocol::Reply`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("empty frame")]
    Empty,
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("{verb}: expected {expected} field(s), got {got}")]
    FieldCount {
        verb: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("{0}: missing or invalid client identifier")]
    BadClientId(&'static str),
    #[error("invalid body encoding: {0}")]
    BadBody(String),
    #[error("malformed reply: {0}")]
    MalformedReply(String),
}

impl ProtocolError {
    /// The in-band reason sent back to a peer whose command failed to parse.
    pub fn reason(&self) -> ErrorReason {
        match self {
            Self::UnknownCommand(_) => ErrorReason::UnknownCommand,
            _ => ErrorReason::BadFormat,
        }
    }
}

pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw.trim(), TIMESTAMP_FORMAT).ok()
}
