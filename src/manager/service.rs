use anyhow::Result;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tracing::info;

use super::session::Session;
use super::shadow::ShadowLockTable;
use super::types::SessionId;
use super::upstream::Upstream;
use crate::config::ManagerConfig;
use crate::protocol::frame::{MAX_DATAGRAM_LEN, read_frame, write_frame};
use crate::protocol::{Command, ErrorReason, Reply};
use crate::repository::handlers::guarded;

/// The Manager process: client-facing TCP listener plus the UDP stats relay.
pub struct ManagerServer {
    tcp: TcpListener,
    udp: UdpSocket,
    repository_addr: SocketAddr,
    upstream_timeout: Duration,
    stats_interval: Duration,
    shadow: Arc<ShadowLockTable>,
    sessions: Arc<DashMap<SessionId, SocketAddr>>,
}

impl ManagerServer {
    pub async fn bind(config: &ManagerConfig) -> Result<Self> {
        let tcp = TcpListener::bind(config.tcp_bind_addr()).await?;
        let udp = UdpSocket::bind(config.udp_bind_addr()).await?;

        Ok(Self {
            tcp,
            udp,
            repository_addr: config.repository_addr,
            upstream_timeout: config.upstream_timeout(),
            stats_interval: config.stats_interval(),
            shadow: ShadowLockTable::new(config.shadow_locks),
            sessions: Arc::new(DashMap::new()),
        })
    }

    pub fn tcp_addr(&self) -> Result<SocketAddr> {
        Ok(self.tcp.local_addr()?)
    }

    pub fn udp_addr(&self) -> Result<SocketAddr> {
        Ok(self.udp.local_addr()?)
    }

    pub fn shadow(&self) -> Arc<ShadowLockTable> {
        self.shadow.clone()
    }

    /// Live sessions by id, with their peer address.
    pub fn sessions(&self) -> Arc<DashMap<SessionId, SocketAddr>> {
        self.sessions.clone()
    }

    pub async fn run(self) -> Result<()> {
        let tcp_addr = self.tcp.local_addr()?;
        info!(
            "Manager listening on tcp {} / udp {}, forwarding to {} (shadow locks {})",
            tcp_addr,
            self.udp.local_addr()?,
            self.repository_addr,
            if self.shadow.is_enabled() { "on" } else { "off" }
        );

        // 1. UDP relay:
        let udp = Arc::new(self.udp);
        let repository_addr = self.repository_addr;
        let upstream_timeout = self.upstream_timeout;
        tokio::spawn(async move {
            relay_loop(udp, tcp_addr.port(), repository_addr, upstream_timeout).await;
        });

        // 2. Stats reporter:
        let stats_shadow = self.shadow.clone();
        let stats_sessions = self.sessions.clone();
        let stats_interval = self.stats_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(stats_interval);
            interval.tick().await;
            loop {
                interval.tick().await;
                info!(
                    "Manager stats: {} session(s), {} shadow lock(s)",
                    stats_sessions.len(),
                    stats_shadow.len()
                );
            }
        });

        // 3. Accept loop:
        loop {
            match self.tcp.accept().await {
                Ok((stream, peer)) => {
                    let upstream = Upstream::new(self.repository_addr, self.upstream_timeout);
                    let session = Session::new(peer, upstream, self.shadow.clone());
                    let sessions = self.sessions.clone();
                    tokio::spawn(async move {
                        serve_session(session, stream, sessions).await;
                    });
                }
                Err(e) => {
                    tracing::error!("Failed to accept connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }
}

/// Drives one client connection, then tears the session down exactly once.
async fn serve_session(
    mut session: Session,
    stream: TcpStream,
    sessions: Arc<DashMap<SessionId, SocketAddr>>,
) {
    let peer = session.peer();
    let id = session.id().clone();
    sessions.insert(id.clone(), peer);
    info!("Session {} opened from {}", id, peer);

    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    loop {
        let frame = match read_frame(&mut reader).await {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("Dropping session {} from {}: {}", id, peer, e);
                break;
            }
        };

        let reply = guarded(&id, session.handle(&frame))
            .await
            .unwrap_or_else(|reason| Reply::Error(reason).to_frame());

        if let Err(e) = write_frame(&mut write_half, &reply).await {
            tracing::warn!("Failed to reply to {}: {}", peer, e);
            break;
        }
    }

    session.teardown().await;
    sessions.remove(&id);
    match session.client_id() {
        Some(client_id) => info!("Session {} ({}) closed", id, client_id),
        None => info!("Session {} closed", id),
    }
}

/// Answers datagrams: discovery locally, `STATS`/`LIST` by asking the
/// Repository over a fresh link per query.
async fn relay_loop(
    socket: Arc<UdpSocket>,
    manager_port: u16,
    repository_addr: SocketAddr,
    upstream_timeout: Duration,
) {
    let mut buf = vec![0u8; 65536];

    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, src)) => {
                let command = std::str::from_utf8(&buf[..len])
                    .map_err(|_| ErrorReason::BadFormat)
                    .and_then(|frame| Command::parse(frame).map_err(|e| e.reason()));

                let socket = socket.clone();
                tokio::spawn(async move {
                    let frame = match command {
                        Ok(command) => {
                            relay(command, manager_port, repository_addr, upstream_timeout).await
                        }
                        Err(reason) => Reply::Error(reason).to_frame(),
                    };
                    let frame = if frame.len() > MAX_DATAGRAM_LEN {
                        tracing::warn!("Reply to {} exceeds one datagram", src);
                        Reply::Error(ErrorReason::Internal).to_frame()
                    } else {
                        frame
                    };

                    if let Err(e) = socket.send_to(frame.as_bytes(), src).await {
                        tracing::warn!("Failed to answer datagram from {}: {}", src, e);
                    }
                });
            }
            Err(e) => {
                tracing::error!("Failed to receive UDP packet: {}", e);
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

async fn relay(
    command: Command,
    manager_port: u16,
    repository_addr: SocketAddr,
    upstream_timeout: Duration,
) -> String {
    match command {
        Command::Announce { .. } | Command::Hello { .. } => {
            Reply::Announce { port: manager_port }.to_frame()
        }
        Command::Stats { .. } | Command::List => {
            let mut upstream = Upstream::new(repository_addr, upstream_timeout);
            match upstream.request(&command.to_frame(), &command).await {
                Ok((raw, _)) => raw,
                Err(e) => {
                    tracing::warn!("Relay of {} failed: {}", command.verb(), e);
                    Reply::Error(e.reason()).to_frame()
                }
            }
        }
        other => {
            tracing::debug!("Rejected {} over UDP", other.verb());
            Reply::Error(ErrorReason::UnknownCommand).to_frame()
        }
    }
}
