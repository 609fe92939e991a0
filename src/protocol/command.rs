use chrono::NaiveDate;

use super::frame::{decode_body, encode_body};
use super::types::{ClientId, DATE_FORMAT, ProtocolError};

/// A request, parsed once at the connection boundary.
///
/// Every tier speaks the same vocabulary: the client sends these to the
/// Manager, and the Manager forwards the original frame to the Repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `PRIJAVA|id`: discovery announce, answered with a TCP port.
    Announce { client_id: ClientId },
    /// `HELLO|id`: TCP handshake binding an identifier to a session.
    Hello { client_id: ClientId },
    List,
    Upload {
        name: String,
        author: ClientId,
        content: String,
    },
    Download { name: String },
    Open { name: String, client_id: ClientId },
    Edit {
        name: String,
        client_id: ClientId,
        content: String,
    },
    Delete { name: String, client_id: ClientId },
    Close { name: String, client_id: ClientId },
    ReleaseAll { client_id: ClientId },
    Stats {
        client_id: Option<ClientId>,
        after: Option<NaiveDate>,
    },
}

impl Command {
    /// Parses one frame (without its trailing newline).
    ///
    /// The verb is case-insensitive. Field counts are exact, identifiers must
    /// be valid, and bodies must be base64 of UTF-8 text; anything else is
    /// rejected here so dispatch only ever sees well-formed commands.
    pub fn parse(frame: &str) -> Result<Self, ProtocolError> {
        let frame = frame.trim_end_matches(['\r', '\n']);
        if frame.trim().is_empty() {
            return Err(ProtocolError::Empty);
        }

        let fields: Vec<&str> = frame.split('|').collect();
        let verb = fields[0].trim().to_ascii_uppercase();
        let args = &fields[1..];

        match verb.as_str() {
            "PRIJAVA" => {
                expect_fields("PRIJAVA", args, 1)?;
                Ok(Self::Announce {
                    client_id: client_id("PRIJAVA", args[0])?,
                })
            }
            "HELLO" => {
                expect_fields("HELLO", args, 1)?;
                Ok(Self::Hello {
                    client_id: client_id("HELLO", args[0])?,
                })
            }
            "LIST" => {
                expect_fields("LIST", args, 0)?;
                Ok(Self::List)
            }
            "UPLOAD" => {
                expect_fields("UPLOAD", args, 3)?;
                Ok(Self::Upload {
                    name: args[0].to_string(),
                    author: client_id("UPLOAD", args[1])?,
                    content: decode_body(args[2])?,
                })
            }
            "DOWNLOAD" => {
                expect_fields("DOWNLOAD", args, 1)?;
                Ok(Self::Download {
                    name: args[0].to_string(),
                })
            }
            "OPEN" => {
                expect_fields("OPEN", args, 2)?;
                Ok(Self::Open {
                    name: args[0].to_string(),
                    client_id: client_id("OPEN", args[1])?,
                })
            }
            "EDIT" => {
                expect_fields("EDIT", args, 3)?;
                Ok(Self::Edit {
                    name: args[0].to_string(),
                    client_id: client_id("EDIT", args[1])?,
                    content: decode_body(args[2])?,
                })
            }
            "DELETE" => {
                expect_fields("DELETE", args, 2)?;
                Ok(Self::Delete {
                    name: args[0].to_string(),
                    client_id: client_id("DELETE", args[1])?,
                })
            }
            "CLOSE" => {
                expect_fields("CLOSE", args, 2)?;
                Ok(Self::Close {
                    name: args[0].to_string(),
                    client_id: client_id("CLOSE", args[1])?,
                })
            }
            "RELEASE_ALL" => {
                expect_fields("RELEASE_ALL", args, 1)?;
                Ok(Self::ReleaseAll {
                    client_id: client_id("RELEASE_ALL", args[0])?,
                })
            }
            "STATS" => {
                if args.len() > 2 {
                    return Err(ProtocolError::FieldCount {
                        verb: "STATS",
                        expected: 2,
                        got: args.len(),
                    });
                }
                let client_id = args
                    .first()
                    .map(|raw| raw.trim())
                    .filter(|raw| !raw.is_empty())
                    .map(|raw| client_id("STATS", raw))
                    .transpose()?;
                // An unparseable cutoff means "no cutoff".
                let after = args
                    .get(1)
                    .and_then(|raw| NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT).ok());
                Ok(Self::Stats { client_id, after })
            }
            other => Err(ProtocolError::UnknownCommand(other.to_string())),
        }
    }

    /// Encodes the command as a frame (without the trailing newline).
    pub fn to_frame(&self) -> String {
        match self {
            Self::Announce { client_id } => format!("PRIJAVA|{client_id}"),
            Self::Hello { client_id } => format!("HELLO|{client_id}"),
            Self::List => "LIST".to_string(),
            Self::Upload {
                name,
                author,
                content,
            } => format!("UPLOAD|{name}|{author}|{}", encode_body(content)),
            Self::Download { name } => format!("DOWNLOAD|{name}"),
            Self::Open { name, client_id } => format!("OPEN|{name}|{client_id}"),
            Self::Edit {
                name,
                client_id,
                content,
            } => format!("EDIT|{name}|{client_id}|{}", encode_body(content)),
            Self::Delete { name, client_id } => format!("DELETE|{name}|{client_id}"),
            Self::Close { name, client_id } => format!("CLOSE|{name}|{client_id}"),
            Self::ReleaseAll { client_id } => format!("RELEASE_ALL|{client_id}"),
            Self::Stats { client_id, after } => match (client_id, after) {
                (None, None) => "STATS".to_string(),
                (Some(id), None) => format!("STATS|{id}"),
                (id, Some(date)) => format!(
                    "STATS|{}|{}",
                    id.as_ref().map(ClientId::as_str).unwrap_or(""),
                    date.format(DATE_FORMAT)
                ),
            },
        }
    }

    pub fn verb(&self) -> &'static str {
        match self {
            Self::Announce { .. } => "PRIJAVA",
            Self::Hello { .. } => "HELLO",
            Self::List => "LIST",
            Self::Upload { .. } => "UPLOAD",
            Self::Download { .. } => "DOWNLOAD",
            Self::Open { .. } => "OPEN",
            Self::Edit { .. } => "EDIT",
            Self::Delete { .. } => "DELETE",
            Self::Close { .. } => "CLOSE",
            Self::ReleaseAll { .. } => "RELEASE_ALL",
            Self::Stats { .. } => "STATS",
        }
    }

    /// The identifier carried by this command, if any.
    pub fn client_id(&self) -> Option<&ClientId> {
        match self {
            Self::Announce { client_id }
            | Self::Hello { client_id }
            | Self::Open { client_id, .. }
            | Self::Edit { client_id, .. }
            | Self::Delete { client_id, .. }
            | Self::Close { client_id, .. }
            | Self::ReleaseAll { client_id } => Some(client_id),
            Self::Upload { author, .. } => Some(author),
            Self::Stats { client_id, .. } => client_id.as_ref(),
            Self::List | Self::Download { .. } => None,
        }
    }

    /// Commands that never touch record or lock state.
    pub fn is_read_only(&self) -> bool {
        matches!(
            self,
            Self::Announce { .. }
                | Self::Hello { .. }
                | Self::List
                | Self::Download { .. }
                | Self::Stats { .. }
        )
    }
}

fn expect_fields(verb: &'static str, args: &[&str], expected: usize) -> Result<(), ProtocolError> {
    if args.len() != expected {
        return Err(ProtocolError::FieldCount {
            verb,
            expected,
            got: args.len(),
        });
    }
    Ok(())
}

fn client_id(verb: &'static str, raw: &str) -> Result<ClientId, ProtocolError> {
    let raw = raw.trim();
    if !ClientId::is_valid(raw) {
        return Err(ProtocolError::BadClientId(verb));
    }
    Ok(ClientId::new(raw))
}
