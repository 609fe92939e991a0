use chrono::NaiveDate;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use super::discovery;
use super::types::ClientError;
use crate::config::ClientConfig;
use crate::protocol::frame::{read_frame, write_frame};
use crate::protocol::types::{ListEntry, RecordView, StatsSummary};
use crate::protocol::{ClientId, Command, Reply};
use crate::repository::types::validate_name;

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

/// A client's TCP session with the Manager.
///
/// One request is in flight at a time; every reply is checked against the
/// request it answers. Any transport failure drops the connection, which
/// stays down until [`FileClient::reconnect`].
pub struct FileClient {
    client_id: ClientId,
    config: ClientConfig,
    manager_addr: SocketAddr,
    conn: Option<Connection>,
}

impl FileClient {
    /// Discovers the Manager, connects and sends `HELLO`.
    pub async fn connect(config: ClientConfig, client_id: ClientId) -> Result<Self, ClientError> {
        if !ClientId::is_valid(client_id.as_str()) {
            return Err(ClientError::InvalidId(client_id.0));
        }
        let manager_addr = discovery::discover_manager(&config, &client_id).await?;
        Self::connect_to(config, client_id, manager_addr).await
    }

    /// Connects to a known Manager address, skipping discovery.
    pub async fn connect_to(
        config: ClientConfig,
        client_id: ClientId,
        manager_addr: SocketAddr,
    ) -> Result<Self, ClientError> {
        if !ClientId::is_valid(client_id.as_str()) {
            return Err(ClientError::InvalidId(client_id.0));
        }
        let mut client = Self {
            client_id,
            config,
            manager_addr,
            conn: None,
        };
        client.establish().await?;
        Ok(client)
    }

    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    pub fn manager_addr(&self) -> SocketAddr {
        self.manager_addr
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    pub fn disconnect(&mut self) {
        self.conn = None;
    }

    /// Re-runs discovery (keeping the last known Manager address if it fails)
    /// and reconnects under the same identifier, with exponential backoff.
    pub async fn reconnect(&mut self) -> Result<(), ClientError> {
        self.conn = None;
        let attempts = self.config.reconnect_attempts.max(1);
        let mut delay_ms = 150u64;

        for attempt in 0..attempts {
            match discovery::discover_manager(&self.config, &self.client_id).await {
                Ok(addr) => self.manager_addr = addr,
                Err(e) => tracing::debug!(
                    "Discovery failed, reusing {}: {}",
                    self.manager_addr,
                    e
                ),
            }

            match self.establish().await {
                Ok(()) => {
                    tracing::info!("Reconnected to manager at {}", self.manager_addr);
                    return Ok(());
                }
                Err(e) => {
                    if attempt + 1 == attempts {
                        return Err(e);
                    }
                    tracing::warn!(
                        "Reconnect attempt {}/{} failed: {}",
                        attempt + 1,
                        attempts,
                        e
                    );
                    let jitter = rand::random::<u64>() % 50;
                    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(1200);
                }
            }
        }

        Err(ClientError::NotConnected)
    }

    async fn establish(&mut self) -> Result<(), ClientError> {
        let timeout = self.config.request_timeout();
        let stream = tokio::time::timeout(timeout, TcpStream::connect(self.manager_addr))
            .await
            .map_err(|_| ClientError::Timeout(timeout))??;
        stream.set_nodelay(true)?;

        let (read_half, write_half) = stream.into_split();
        self.conn = Some(Connection {
            reader: BufReader::new(read_half),
            writer: write_half,
        });

        let hello = Command::Hello {
            client_id: self.client_id.clone(),
        };
        match self.call(&hello).await? {
            Reply::Welcome { .. } => Ok(()),
            other => Err(self.unexpected(&hello, other)),
        }
    }

    /// Sends one command and returns whatever well-formed reply answers it,
    /// `ERROR|...` included.
    pub async fn request(&mut self, command: &Command) -> Result<Reply, ClientError> {
        let timeout = self.config.request_timeout();
        let Some(conn) = self.conn.as_mut() else {
            return Err(ClientError::NotConnected);
        };

        let result = match tokio::time::timeout(timeout, exchange(conn, command)).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout(timeout)),
        };

        if let Err(e) = &result {
            tracing::warn!("Dropping connection to {}: {}", self.manager_addr, e);
            self.conn = None;
        }
        result
    }

    /// [`Self::request`] with `ERROR|...` turned into [`ClientError::Server`].
    async fn call(&mut self, command: &Command) -> Result<Reply, ClientError> {
        match self.request(command).await? {
            Reply::Error(reason) => Err(ClientError::Server(reason)),
            reply => Ok(reply),
        }
    }

    fn unexpected(&mut self, command: &Command, reply: Reply) -> ClientError {
        self.conn = None;
        ClientError::Unexpected {
            verb: command.verb(),
            reply: reply.to_frame(),
        }
    }

    pub async fn list(&mut self) -> Result<Vec<ListEntry>, ClientError> {
        let command = Command::List;
        match self.call(&command).await? {
            Reply::List(entries) => Ok(entries),
            other => Err(self.unexpected(&command, other)),
        }
    }

    pub async fn upload(&mut self, name: &str, content: &str) -> Result<(), ClientError> {
        check_name(name)?;
        let command = Command::Upload {
            name: name.to_string(),
            author: self.client_id.clone(),
            content: content.to_string(),
        };
        match self.call(&command).await? {
            Reply::Uploaded => Ok(()),
            other => Err(self.unexpected(&command, other)),
        }
    }

    pub async fn download(&mut self, name: &str) -> Result<RecordView, ClientError> {
        check_name(name)?;
        let command = Command::Download {
            name: name.to_string(),
        };
        match self.call(&command).await? {
            Reply::Download(view) => Ok(view),
            other => Err(self.unexpected(&command, other)),
        }
    }

    pub async fn open(&mut self, name: &str) -> Result<(), ClientError> {
        check_name(name)?;
        let command = Command::Open {
            name: name.to_string(),
            client_id: self.client_id.clone(),
        };
        match self.call(&command).await? {
            Reply::Opened => Ok(()),
            other => Err(self.unexpected(&command, other)),
        }
    }

    pub async fn edit(&mut self, name: &str, content: &str) -> Result<(), ClientError> {
        check_name(name)?;
        let command = Command::Edit {
            name: name.to_string(),
            client_id: self.client_id.clone(),
            content: content.to_string(),
        };
        match self.call(&command).await? {
            Reply::Edited => Ok(()),
            other => Err(self.unexpected(&command, other)),
        }
    }

    pub async fn delete(&mut self, name: &str) -> Result<(), ClientError> {
        check_name(name)?;
        let command = Command::Delete {
            name: name.to_string(),
            client_id: self.client_id.clone(),
        };
        match self.call(&command).await? {
            Reply::Deleted => Ok(()),
            other => Err(self.unexpected(&command, other)),
        }
    }

    pub async fn close(&mut self, name: &str) -> Result<(), ClientError> {
        check_name(name)?;
        let command = Command::Close {
            name: name.to_string(),
            client_id: self.client_id.clone(),
        };
        match self.call(&command).await? {
            Reply::Closed => Ok(()),
            other => Err(self.unexpected(&command, other)),
        }
    }

    /// Releases every lock held under this identifier. Returns the count.
    pub async fn release_all(&mut self) -> Result<usize, ClientError> {
        let command = Command::ReleaseAll {
            client_id: self.client_id.clone(),
        };
        match self.call(&command).await? {
            Reply::Released { count } => Ok(count),
            other => Err(self.unexpected(&command, other)),
        }
    }

    /// `STATS` over the TCP session.
    pub async fn stats(&mut self, after: Option<NaiveDate>) -> Result<StatsSummary, ClientError> {
        let command = Command::Stats {
            client_id: Some(self.client_id.clone()),
            after,
        };
        match self.call(&command).await? {
            Reply::Stats(summary) => Ok(summary),
            other => Err(self.unexpected(&command, other)),
        }
    }

    /// `OPEN → EDIT → CLOSE`. Nothing happens past a refused OPEN; once OPEN
    /// succeeded, CLOSE is attempted whatever EDIT returned.
    pub async fn edit_file(&mut self, name: &str, content: &str) -> Result<(), ClientError> {
        self.open(name).await?;

        let edited = self.edit(name, content).await;
        if matches!(&edited, Err(e) if e.is_transport()) {
            return edited;
        }

        let closed = self.close(name).await;
        edited.and(closed)
    }

    /// `OPEN → DELETE`, closing only if the DELETE was refused (a deleted
    /// record takes its lock with it).
    pub async fn delete_file(&mut self, name: &str) -> Result<(), ClientError> {
        self.open(name).await?;

        match self.delete(name).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_transport() => Err(e),
            Err(e) => {
                if let Err(close_err) = self.close(name).await {
                    tracing::debug!("CLOSE after failed DELETE of {}: {}", name, close_err);
                }
                Err(e)
            }
        }
    }

    /// `LIST` over UDP, no session needed.
    pub async fn list_udp(&self) -> Result<Vec<ListEntry>, ClientError> {
        discovery::list(self.config.repository_udp_addr, self.config.request_timeout()).await
    }

    /// `STATS` over UDP for this identifier.
    pub async fn stats_udp(&self, after: Option<NaiveDate>) -> Result<StatsSummary, ClientError> {
        discovery::stats(
            self.config.repository_udp_addr,
            Some(&self.client_id),
            after,
            self.config.request_timeout(),
        )
        .await
    }
}

async fn exchange(conn: &mut Connection, command: &Command) -> Result<Reply, ClientError> {
    write_frame(&mut conn.writer, &command.to_frame()).await?;

    let raw = read_frame(&mut conn.reader)
        .await?
        .ok_or(ClientError::Disconnected)?;
    let reply = Reply::parse(&raw)?;
    if !reply.answers(command) {
        return Err(ClientError::Unexpected {
            verb: command.verb(),
            reply: raw,
        });
    }
    Ok(reply)
}

/// Names that would break framing are refused before anything is sent.
fn check_name(name: &str) -> Result<(), ClientError> {
    validate_name(name).map_err(|_| ClientError::InvalidName(name.to_string()))
}
