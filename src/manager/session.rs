use std::net::SocketAddr;
use std::sync::Arc;

use super::shadow::ShadowLockTable;
use super::types::{SessionId, ShadowOutcome, UpstreamError};
use super::upstream::Upstream;
use crate::protocol::{ClientId, Command, ErrorReason, Reply};

/// State of one client connection to the Manager.
///
/// Commands are handled strictly in arrival order; the session is driven by
/// a single task and never shared.
pub struct Session {
    id: SessionId,
    peer: SocketAddr,
    /// First identifier seen on the connection. Used for teardown.
    client_id: Option<ClientId>,
    upstream: Upstream,
    shadow: Arc<ShadowLockTable>,
    /// Identifiers this session wrote shadow entries for.
    reserved_for: Vec<ClientId>,
}

impl Session {
    pub fn new(peer: SocketAddr, upstream: Upstream, shadow: Arc<ShadowLockTable>) -> Self {
        Self {
            id: SessionId::new(),
            peer,
            client_id: None,
            upstream,
            shadow,
            reserved_for: Vec::new(),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn client_id(&self) -> Option<&ClientId> {
        self.client_id.as_ref()
    }

    /// Handles one frame from the client and returns the reply frame.
    ///
    /// Forwarded commands are relayed with the Repository's reply frame
    /// unmodified. `HELLO`, shadow conflicts and failures are answered here.
    pub async fn handle(&mut self, frame: &str) -> String {
        let command = match Command::parse(frame) {
            Ok(command) => command,
            Err(e) => {
                tracing::debug!("Bad frame from {}: {}", self.peer, e);
                return Reply::Error(e.reason()).to_frame();
            }
        };

        self.learn_identity(&command);

        match &command {
            Command::Hello { client_id } | Command::Announce { client_id } => Reply::Welcome {
                client_id: client_id.clone(),
            }
            .to_frame(),
            Command::Open { name, client_id } => {
                self.admit_open(frame, &command, name, client_id).await
            }
            _ => self.forward(frame, &command).await,
        }
    }

    /// Connection teardown. Runs once, after the read loop has ended.
    pub async fn teardown(&mut self) {
        let mut released = self.release_shadow();

        if let Some(client_id) = self.client_id.clone() {
            released += self.shadow.release_all(&client_id);

            let command = Command::ReleaseAll { client_id };
            match self.upstream.request(&command.to_frame(), &command).await {
                Ok((_, Reply::Released { count })) if count > 0 => {
                    tracing::info!(
                        "Session {} closed, repository released {} lock(s)",
                        self.id,
                        count
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("Session {}: RELEASE_ALL not delivered: {}", self.id, e);
                }
            }
        }

        if released > 0 {
            tracing::debug!("Session {} dropped {} shadow entries", self.id, released);
        }
        self.upstream.disconnect();
    }

    fn learn_identity(&mut self, command: &Command) {
        if self.client_id.is_some() {
            return;
        }
        if let Some(id) = command.client_id() {
            tracing::info!("Session {} ({}) bound to {}", self.id, self.peer, id);
            self.client_id = Some(id.clone());
        }
    }

    /// OPEN admission: consult the shadow table, forward, then keep or roll
    /// back the tentative entry according to the Repository's answer.
    async fn admit_open(
        &mut self,
        frame: &str,
        command: &Command,
        name: &str,
        client_id: &ClientId,
    ) -> String {
        match self.shadow.try_reserve(name, client_id) {
            ShadowOutcome::Conflict(owner) => {
                tracing::debug!(
                    "OPEN {} by {} rejected locally (held by {})",
                    name,
                    client_id,
                    owner
                );
                return Reply::Error(ErrorReason::LockedBy(owner)).to_frame();
            }
            // Shadow entries may be dropped early, never kept late.
            ShadowOutcome::Reserved | ShadowOutcome::AlreadyHeld => self.note_reserved(client_id),
            ShadowOutcome::Disabled => {}
        }

        match self.upstream.request(frame, command).await {
            Ok((raw, Reply::Opened)) => raw,
            Ok((raw, _)) => {
                self.shadow.rollback(name, client_id);
                raw
            }
            Err(e) => self.upstream_failed(command, e),
        }
    }

    async fn forward(&mut self, frame: &str, command: &Command) -> String {
        match self.upstream.request(frame, command).await {
            Ok((raw, reply)) => {
                self.reconcile(command, &reply);
                raw
            }
            Err(e) => self.upstream_failed(command, e),
        }
    }

    /// Mirrors the Repository's answer into the shadow table.
    fn reconcile(&self, command: &Command, reply: &Reply) {
        match (command, reply) {
            (Command::Close { name, client_id }, _)
            | (Command::Delete { name, client_id }, Reply::Deleted)
            | (
                Command::Edit {
                    name, client_id, ..
                }
                | Command::Delete { name, client_id },
                Reply::Error(
                    ErrorReason::NotOpened | ErrorReason::NotFound | ErrorReason::LockedBy(_),
                ),
            ) => {
                self.shadow.release(name, client_id);
            }
            (Command::ReleaseAll { client_id }, Reply::Released { .. }) => {
                self.shadow.release_all(client_id);
            }
            _ => {}
        }
    }

    /// The upstream link is gone, and with it every lock the Repository
    /// granted over it. Forget the matching shadow entries and report.
    fn upstream_failed(&mut self, command: &Command, error: UpstreamError) -> String {
        tracing::warn!(
            "Session {}: {} failed upstream: {}",
            self.id,
            command.verb(),
            error
        );
        self.upstream.disconnect();
        self.release_shadow();
        Reply::Error(error.reason()).to_frame()
    }

    fn note_reserved(&mut self, client_id: &ClientId) {
        if !self.reserved_for.iter().any(|id| id.same_as(client_id)) {
            self.reserved_for.push(client_id.clone());
        }
    }

    fn release_shadow(&mut self) -> usize {
        let mut released = 0;
        for id in self.reserved_for.drain(..) {
            released += self.shadow.release_all(&id);
        }
        released
    }
}
