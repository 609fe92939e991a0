use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tracing::info;

use super::handlers::RepositoryHandler;
use super::store::RecordStore;
use super::types::HeldLocks;
use crate::config::RepositoryConfig;
use crate::protocol::frame::{MAX_DATAGRAM_LEN, read_frame, write_frame};
use crate::protocol::{Command, ErrorReason, Reply};

/// The Repository process: a TCP listener for commands forwarded by the
/// Manager and a UDP responder for discovery and read-only queries.
pub struct RepositoryServer {
    handler: Arc<RepositoryHandler>,
    tcp: TcpListener,
    udp: UdpSocket,
    stats_interval: Duration,
}

impl RepositoryServer {
    /// Binds both sockets. Nothing is served until [`Self::run`].
    pub async fn bind(config: &RepositoryConfig, store: Arc<RecordStore>) -> Result<Self> {
        let tcp = TcpListener::bind(config.tcp_bind_addr()).await?;
        let udp = UdpSocket::bind(config.udp_bind_addr()).await?;

        Ok(Self {
            handler: Arc::new(RepositoryHandler::new(store, config.manager_port)),
            tcp,
            udp,
            stats_interval: config.stats_interval(),
        })
    }

    pub fn tcp_addr(&self) -> Result<SocketAddr> {
        Ok(self.tcp.local_addr()?)
    }

    pub fn udp_addr(&self) -> Result<SocketAddr> {
        Ok(self.udp.local_addr()?)
    }

    /// Overrides the Manager port announced in discovery replies.
    pub fn set_manager_port(&self, port: u16) {
        self.handler.set_manager_port(port);
    }

    /// Shared handler; stays valid after [`Self::run`] takes the server, so
    /// the announced port can still be changed.
    pub fn handler(&self) -> Arc<RepositoryHandler> {
        self.handler.clone()
    }

    pub fn store(&self) -> Arc<RecordStore> {
        self.handler.store().clone()
    }

    /// Serves until the accept loop fails permanently.
    pub async fn run(self) -> Result<()> {
        info!(
            "Repository listening on tcp {} / udp {} (announcing manager port {})",
            self.tcp.local_addr()?,
            self.udp.local_addr()?,
            self.handler.manager_port()
        );

        let handler = self.handler;

        // 1. UDP responder:
        let udp_handler = handler.clone();
        let udp = Arc::new(self.udp);
        tokio::spawn(async move {
            receive_loop(udp_handler, udp).await;
        });

        // 2. Stats reporter:
        let stats_store = handler.store().clone();
        let stats_interval = self.stats_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(stats_interval);
            interval.tick().await;
            loop {
                interval.tick().await;
                let (records, locked) = stats_store.counts().await;
                info!("Repository stats: {} record(s), {} locked", records, locked);
            }
        });

        // 3. Accept loop:
        loop {
            match self.tcp.accept().await {
                Ok((stream, peer)) => {
                    let handler = handler.clone();
                    tokio::spawn(async move {
                        serve_connection(handler, stream, peer).await;
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

/// Serves one upstream connection until it closes, then releases every lock
/// taken through it. Runs exactly once per accepted connection.
async fn serve_connection(handler: Arc<RepositoryHandler>, stream: TcpStream, peer: SocketAddr) {
    info!("Connection from {}", peer);

    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut held = HeldLocks::default();

    loop {
        let frame = match read_frame(&mut reader).await {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("Dropping connection from {}: {}", peer, e);
                break;
            }
        };

        let reply = match Command::parse(&frame) {
            Ok(command) => {
                tracing::debug!("{} -> {}", peer, command.verb());
                handler.handle_guarded(command, &mut held).await
            }
            Err(e) => {
                tracing::debug!("Bad frame from {}: {}", peer, e);
                Reply::Error(e.reason())
            }
        };

        if let Err(e) = write_frame(&mut write_half, &reply.to_frame()).await {
            tracing::warn!("Failed to reply to {}: {}", peer, e);
            break;
        }
    }

    let released = handler.release_held(&mut held).await;
    if released > 0 {
        info!(
            "Connection from {} closed, released {} orphaned lock(s)",
            peer, released
        );
    } else {
        info!("Connection from {} closed", peer);
    }
}

async fn receive_loop(handler: Arc<RepositoryHandler>, socket: Arc<UdpSocket>) {
    let mut buf = vec![0u8; 65536];

    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, src)) => {
                let reply = match std::str::from_utf8(&buf[..len]) {
                    Ok(frame) => match Command::parse(frame) {
                        Ok(command) => handler.handle_datagram(command).await,
                        Err(e) => {
                            tracing::debug!("Bad datagram from {}: {}", src, e);
                            Reply::Error(e.reason())
                        }
                    },
                    Err(_) => Reply::Error(ErrorReason::BadFormat),
                };

                let mut frame = reply.to_frame();
                if frame.len() > MAX_DATAGRAM_LEN {
                    tracing::warn!(
                        "Reply to {} exceeds one datagram ({} bytes)",
                        src,
                        frame.len()
                    );
                    frame = Reply::Error(ErrorReason::Internal).to_frame();
                }

                if let Err(e) = socket.send_to(frame.as_bytes(), src).await {
                    tracing::warn!("Failed to answer datagram from {}: {}", src, e);
                }
            }
            Err(e) => {
                tracing::error!("Failed to receive UDP packet: {}", e);
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}
