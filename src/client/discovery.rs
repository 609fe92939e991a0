//! Connectionless queries against the Repository (or the Manager's relay).
//!
//! One datagram out, one datagram back, bounded by a timeout. No retries:
//! callers decide whether a lost datagram is worth another attempt.

use chrono::NaiveDate;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;

use super::types::ClientError;
use crate::config::ClientConfig;
use crate::protocol::frame::MAX_DATAGRAM_LEN;
use crate::protocol::types::{ListEntry, StatsSummary};
use crate::protocol::{ClientId, Command, ProtocolError, Reply};

/// Sends `command` to `addr` as one datagram and waits for the reply.
///
/// `ERROR|...` replies come back as `Ok(Reply::Error(_))`.
pub async fn udp_request(
    addr: SocketAddr,
    command: &Command,
    timeout: Duration,
) -> Result<Reply, ClientError> {
    let local = match addr.ip() {
        IpAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
        IpAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
    };
    let socket = UdpSocket::bind(local).await?;
    socket.send_to(command.to_frame().as_bytes(), addr).await?;

    let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
    let len = loop {
        let (len, from) = tokio::time::timeout(timeout, socket.recv_from(&mut buf))
            .await
            .map_err(|_| ClientError::Timeout(timeout))??;
        if from == addr {
            break len;
        }
        tracing::debug!("Ignoring stray datagram from {}", from);
    };

    let frame = std::str::from_utf8(&buf[..len])
        .map_err(|e| ProtocolError::MalformedReply(e.to_string()))?;
    let reply = Reply::parse(frame)?;
    if !reply.answers(command) {
        return Err(ClientError::Unexpected {
            verb: command.verb(),
            reply: frame.to_string(),
        });
    }
    Ok(reply)
}

/// Asks the Repository which TCP port the Manager listens on.
pub async fn discover_manager(
    config: &ClientConfig,
    client_id: &ClientId,
) -> Result<SocketAddr, ClientError> {
    let command = Command::Announce {
        client_id: client_id.clone(),
    };
    match udp_request(config.repository_udp_addr, &command, config.request_timeout()).await? {
        Reply::Announce { port } => {
            let addr = SocketAddr::new(config.manager_host, port);
            tracing::debug!("Discovered manager at {}", addr);
            Ok(addr)
        }
        Reply::Error(reason) => Err(ClientError::Server(reason)),
        other => Err(ClientError::Unexpected {
            verb: command.verb(),
            reply: other.to_frame(),
        }),
    }
}

/// `LIST` over UDP.
pub async fn list(addr: SocketAddr, timeout: Duration) -> Result<Vec<ListEntry>, ClientError> {
    match udp_request(addr, &Command::List, timeout).await? {
        Reply::List(entries) => Ok(entries),
        Reply::Error(reason) => Err(ClientError::Server(reason)),
        other => Err(ClientError::Unexpected {
            verb: "LIST",
            reply: other.to_frame(),
        }),
    }
}

/// `STATS` over UDP.
pub async fn stats(
    addr: SocketAddr,
    client_id: Option<&ClientId>,
    after: Option<NaiveDate>,
    timeout: Duration,
) -> Result<StatsSummary, ClientError> {
    let command = Command::Stats {
        client_id: client_id.cloned(),
        after,
    };
    match udp_request(addr, &command, timeout).await? {
        Reply::Stats(summary) => Ok(summary),
        Reply::Error(reason) => Err(ClientError::Server(reason)),
        other => Err(ClientError::Unexpected {
            verb: "STATS",
            reply: other.to_frame(),
        }),
    }
}
