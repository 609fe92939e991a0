use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use super::types::UpstreamError;
use crate::protocol::frame::{read_frame, write_frame};
use crate::protocol::{Command, Reply};

struct Link {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

/// A lazily connected request/response link to the Repository.
///
/// Every round trip (including the connect, when one is needed) is bounded
/// by `timeout`. Any failure drops the link; the next request reconnects.
pub struct Upstream {
    addr: SocketAddr,
    timeout: Duration,
    link: Option<Link>,
}

impl Upstream {
    pub fn new(addr: SocketAddr, timeout: Duration) -> Self {
        Self {
            addr,
            timeout,
            link: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    pub fn disconnect(&mut self) {
        if self.link.take().is_some() {
            tracing::debug!("Closed upstream link to {}", self.addr);
        }
    }

    /// Sends `frame` (the wire form of `command`) and waits for its reply.
    ///
    /// Returns the raw reply frame for relaying together with its parsed form.
    pub async fn request(
        &mut self,
        frame: &str,
        command: &Command,
    ) -> Result<(String, Reply), UpstreamError> {
        let deadline = self.timeout;
        let result = match tokio::time::timeout(deadline, self.exchange(frame, command)).await {
            Ok(result) => result,
            Err(_) => Err(UpstreamError::Down(format!(
                "no answer within {}ms",
                deadline.as_millis()
            ))),
        };

        if result.is_err() {
            self.link = None;
        }
        result
    }

    async fn exchange(
        &mut self,
        frame: &str,
        command: &Command,
    ) -> Result<(String, Reply), UpstreamError> {
        if self.link.is_none() {
            self.link = Some(self.connect().await?);
        }
        let Some(link) = self.link.as_mut() else {
            return Err(UpstreamError::Down("link unavailable".to_string()));
        };

        write_frame(&mut link.writer, frame)
            .await
            .map_err(|e| UpstreamError::NoResponse(format!("send failed: {}", e)))?;

        let raw = match read_frame(&mut link.reader).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Err(UpstreamError::NoResponse("link closed".to_string())),
            Err(e) => return Err(UpstreamError::NoResponse(e.to_string())),
        };

        let reply = Reply::parse(&raw).map_err(|e| UpstreamError::NoResponse(e.to_string()))?;
        if !reply.answers(command) {
            return Err(UpstreamError::NoResponse(format!(
                "{} answered with an unrelated reply",
                command.verb()
            )));
        }

        Ok((raw, reply))
    }

    async fn connect(&self) -> Result<Link, UpstreamError> {
        let stream = TcpStream::connect(self.addr)
            .await
            .map_err(|e| UpstreamError::Down(format!("{}: {}", self.addr, e)))?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("Failed to set TCP_NODELAY on upstream link: {}", e);
        }
        tracing::debug!("Opened upstream link to {}", self.addr);

        let (read_half, write_half) = stream.into_split();
        Ok(Link {
            reader: BufReader::new(read_half),
            writer: write_half,
        })
    }
}
