use super::command::Command;
use super::frame::{decode_body, encode_body};
use super::types::{
    ClientId, ErrorReason, LatestRecord, ListEntry, ProtocolError, RecordView, StatsSummary,
    format_timestamp, parse_timestamp,
};

/// A response frame: `OK|...` or `ERROR|<REASON>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `OK|HELLO|id`
    Welcome { client_id: ClientId },
    /// `OK|PRIJAVA|port`: the TCP port a client should connect to.
    Announce { port: u16 },
    /// `OK|LIST|EMPTY` or `OK|LIST|name,author,lastModified,locked;...`
    List(Vec<ListEntry>),
    Uploaded,
    /// `OK|DOWNLOAD|author|lastModified|<base64>`
    Download(RecordView),
    Opened,
    Edited,
    Deleted,
    Closed,
    /// `OK|RELEASED|count`
    Released { count: usize },
    /// `OK|STATS|MY_FILES=..|LATEST_AFTER=..|TOTALS=..`
    Stats(StatsSummary),
    Error(ErrorReason),
}

impl Reply {
    pub fn error(reason: ErrorReason) -> Self {
        Self::Error(reason)
    }

    pub fn is_ok(&self) -> bool {
        !matches!(self, Self::Error(_))
    }

    pub fn error_reason(&self) -> Option<&ErrorReason> {
        match self {
            Self::Error(reason) => Some(reason),
            _ => None,
        }
    }

    /// Encodes the reply as a frame (without the trailing newline).
    pub fn to_frame(&self) -> String {
        match self {
            Self::Welcome { client_id } => format!("OK|HELLO|{client_id}"),
            Self::Announce { port } => format!("OK|PRIJAVA|{port}"),
            Self::List(entries) if entries.is_empty() => "OK|LIST|EMPTY".to_string(),
            Self::List(entries) => {
                let rows: Vec<String> = entries
                    .iter()
                    .map(|entry| {
                        format!(
                            "{},{},{},{}",
                            entry.name,
                            entry.author,
                            format_timestamp(&entry.last_modified),
                            entry.locked
                        )
                    })
                    .collect();
                format!("OK|LIST|{}", rows.join(";"))
            }
            Self::Uploaded => "OK|UPLOADED".to_string(),
            Self::Download(view) => format!(
                "OK|DOWNLOAD|{}|{}|{}",
                view.author,
                format_timestamp(&view.last_modified),
                encode_body(&view.content)
            ),
            Self::Opened => "OK|OPENED".to_string(),
            Self::Edited => "OK|EDITED".to_string(),
            Self::Deleted => "OK|DELETED".to_string(),
            Self::Closed => "OK|CLOSED".to_string(),
            Self::Released { count } => format!("OK|RELEASED|{count}"),
            Self::Stats(summary) => {
                let latest = match &summary.latest_after {
                    Some(latest) => format!(
                        "{},{},{}",
                        latest.name,
                        latest.author,
                        format_timestamp(&latest.last_modified)
                    ),
                    None => "NONE".to_string(),
                };
                let totals = if summary.totals.is_empty() {
                    "NONE".to_string()
                } else {
                    summary
                        .totals
                        .iter()
                        .map(|(author, bytes)| format!("{author}:{bytes}"))
                        .collect::<Vec<_>>()
                        .join(";")
                };
                format!(
                    "OK|STATS|MY_FILES={}|LATEST_AFTER={}|TOTALS={}",
                    summary.my_files, latest, totals
                )
            }
            Self::Error(reason) => format!("ERROR|{reason}"),
        }
    }

    /// Parses a reply frame. Anything that does not match the vocabulary is a
    /// [`ProtocolError::MalformedReply`].
    pub fn parse(frame: &str) -> Result<Self, ProtocolError> {
        let frame = frame.trim_end_matches(['\r', '\n']);
        let malformed = || ProtocolError::MalformedReply(truncate(frame));
        let fields: Vec<&str> = frame.split('|').collect();

        match fields.as_slice() {
            ["ERROR", rest @ ..] => ErrorReason::from_fields(rest)
                .map(Self::Error)
                .ok_or_else(malformed),
            ["OK", "HELLO", id] if ClientId::is_valid(id) => Ok(Self::Welcome {
                client_id: ClientId::new(*id),
            }),
            ["OK", "PRIJAVA", port] => port
                .trim()
                .parse()
                .map(|port| Self::Announce { port })
                .map_err(|_| malformed()),
            ["OK", "LIST", "EMPTY"] => Ok(Self::List(Vec::new())),
            ["OK", "LIST", rows] => rows
                .split(';')
                .map(parse_list_entry)
                .collect::<Option<Vec<_>>>()
                .map(Self::List)
                .ok_or_else(malformed),
            ["OK", "UPLOADED"] => Ok(Self::Uploaded),
            ["OK", "DOWNLOAD", author, ts, body] => {
                let last_modified = parse_timestamp(ts).ok_or_else(malformed)?;
                Ok(Self::Download(RecordView {
                    author: ClientId::new(*author),
                    last_modified,
                    content: decode_body(body)?,
                }))
            }
            ["OK", "OPENED"] => Ok(Self::Opened),
            ["OK", "EDITED"] => Ok(Self::Edited),
            ["OK", "DELETED"] => Ok(Self::Deleted),
            ["OK", "CLOSED"] => Ok(Self::Closed),
            ["OK", "RELEASED", count] => count
                .parse()
                .map(|count| Self::Released { count })
                .map_err(|_| malformed()),
            ["OK", "STATS", rest @ ..] => parse_stats(rest).map(Self::Stats).ok_or_else(malformed),
            _ => Err(malformed()),
        }
    }

    /// Whether this reply has the shape expected for `command`.
    ///
    /// A well-formed reply of the wrong kind means the stream is out of step
    /// with its peer.
    pub fn answers(&self, command: &Command) -> bool {
        matches!(
            (command, self),
            (_, Self::Error(_))
                | (Command::Hello { .. }, Self::Welcome { .. })
                | (
                    Command::Announce { .. },
                    Self::Announce { .. } | Self::Welcome { .. }
                )
                | (Command::List, Self::List(_))
                | (Command::Upload { .. }, Self::Uploaded)
                | (Command::Download { .. }, Self::Download(_))
                | (Command::Open { .. }, Self::Opened)
                | (Command::Edit { .. }, Self::Edited)
                | (Command::Delete { .. }, Self::Deleted)
                | (Command::Close { .. }, Self::Closed)
                | (Command::ReleaseAll { .. }, Self::Released { .. })
                | (Command::Stats { .. }, Self::Stats(_))
        )
    }
}

impl From<ErrorReason> for Reply {
    fn from(reason: ErrorReason) -> Self {
        Self::Error(reason)
    }
}

fn parse_list_entry(row: &str) -> Option<ListEntry> {
    let parts: Vec<&str> = row.split(',').collect();
    let [name, author, ts, locked] = parts.as_slice() else {
        return None;
    };
    Some(ListEntry {
        name: name.to_string(),
        author: ClientId::new(*author),
        last_modified: parse_timestamp(ts)?,
        locked: locked.parse().ok()?,
    })
}

fn parse_stats(fields: &[&str]) -> Option<StatsSummary> {
    let mut summary = StatsSummary::default();
    let mut seen_my_files = false;
    let mut seen_latest = false;

    for field in fields {
        let (key, value) = field.split_once('=')?;
        match key {
            "MY_FILES" => {
                summary.my_files = value.parse().ok()?;
                seen_my_files = true;
            }
            "LATEST_AFTER" => {
                if value != "NONE" {
                    let parts: Vec<&str> = value.split(',').collect();
                    let [name, author, ts] = parts.as_slice() else {
                        return None;
                    };
                    summary.latest_after = Some(LatestRecord {
                        name: name.to_string(),
                        author: ClientId::new(*author),
                        last_modified: parse_timestamp(ts)?,
                    });
                }
                seen_latest = true;
            }
            "TOTALS" => {
                if value != "NONE" {
                    for total in value.split(';') {
                        let (author, bytes) = total.rsplit_once(':')?;
                        summary
                            .totals
                            .push((ClientId::new(author), bytes.parse().ok()?));
                    }
                }
            }
            _ => return None,
        }
    }

    (seen_my_files && seen_latest).then_some(summary)
}

fn truncate(frame: &str) -> String {
    const MAX: usize = 80;
    match frame.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &frame[..idx]),
        None => frame.to_string(),
    }
}
