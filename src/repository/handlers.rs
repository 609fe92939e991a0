use futures::FutureExt;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};

use super::store::RecordStore;
use super::types::{HeldLocks, record_key};
use crate::protocol::{Command, ErrorReason, Reply};

/// Maps parsed commands onto the `RecordStore`.
pub struct RepositoryHandler {
    store: Arc<RecordStore>,
    /// TCP port announced to clients in discovery replies. May change while
    /// serving, e.g. when the Manager is restarted elsewhere.
    manager_port: AtomicU16,
}

impl RepositoryHandler {
    pub fn new(store: Arc<RecordStore>, manager_port: u16) -> Self {
        Self {
            store,
            manager_port: AtomicU16::new(manager_port),
        }
    }

    pub fn manager_port(&self) -> u16 {
        self.manager_port.load(Ordering::Relaxed)
    }

    pub fn set_manager_port(&self, port: u16) {
        let previous = self.manager_port.swap(port, Ordering::Relaxed);
        if previous != port {
            tracing::info!("Announced manager port changed {} -> {}", previous, port);
        }
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    /// Handles one TCP command, recording lock changes in `held` so they can
    /// be undone when the connection closes.
    pub async fn handle(&self, command: Command, held: &mut HeldLocks) -> Reply {
        match command {
            Command::Announce { .. } => Reply::Announce {
                port: self.manager_port(),
            },
            Command::Hello { client_id } => Reply::Welcome { client_id },
            Command::List => Reply::List(self.store.list().await),
            Command::Upload {
                name,
                author,
                content,
            } => into_reply(self.store.upload(&name, &author, content).await, Reply::Uploaded),
            Command::Download { name } => match self.store.download(&name).await {
                Ok(view) => Reply::Download(view),
                Err(reason) => Reply::Error(reason),
            },
            Command::Open { name, client_id } => match self.store.open(&name, &client_id).await {
                Ok(granted) => {
                    // A re-entrant OPEN belongs to whichever connection took the lock
                    if granted {
                        held.record(&record_key(&name), &client_id);
                    }
                    Reply::Opened
                }
                Err(reason) => Reply::Error(reason),
            },
            Command::Edit {
                name,
                client_id,
                content,
            } => into_reply(
                self.store.edit(&name, &client_id, content).await.map(|_| ()),
                Reply::Edited,
            ),
            Command::Delete { name, client_id } => {
                let result = self.store.delete(&name, &client_id).await;
                if result.is_ok() {
                    held.forget(&record_key(&name), &client_id);
                }
                into_reply(result, Reply::Deleted)
            }
            Command::Close { name, client_id } => {
                let result = self.store.close(&name, &client_id).await;
                if result.is_ok() {
                    held.forget(&record_key(&name), &client_id);
                }
                into_reply(result, Reply::Closed)
            }
            Command::ReleaseAll { client_id } => {
                let count = self.store.release_all(&client_id).await;
                held.forget_client(&client_id);
                if count > 0 {
                    tracing::info!("Released {} lock(s) held by {}", count, client_id);
                }
                Reply::Released { count }
            }
            Command::Stats { client_id, after } => {
                Reply::Stats(self.store.stats(client_id.as_ref(), after).await)
            }
        }
    }

    /// [`Self::handle`] with panics converted to `ERROR|INTERNAL`.
    pub async fn handle_guarded(&self, command: Command, held: &mut HeldLocks) -> Reply {
        let verb = command.verb();
        guarded(verb, self.handle(command, held))
            .await
            .unwrap_or_else(Reply::Error)
    }

    /// Handles one UDP datagram. Only discovery and read-only queries are
    /// served without a connection.
    pub async fn handle_datagram(&self, command: Command) -> Reply {
        match command {
            Command::Announce { .. } | Command::Hello { .. } => Reply::Announce {
                port: self.manager_port(),
            },
            Command::List | Command::Stats { .. } => {
                let mut unused = HeldLocks::default();
                self.handle_guarded(command, &mut unused).await
            }
            other => {
                tracing::debug!("Rejected {} over UDP", other.verb());
                Reply::Error(ErrorReason::UnknownCommand)
            }
        }
    }

    /// Connection teardown: drop every lock taken over the closed connection.
    pub async fn release_held(&self, held: &mut HeldLocks) -> usize {
        let pairs = held.take();
        self.store.release_held(&pairs).await
    }
}

/// Runs one request's work, turning a panic inside it into
/// [`ErrorReason::Internal`].
///
/// The store's single-mutex critical sections never leave a half-applied
/// change behind, so the connection can keep going afterwards.
pub async fn guarded<F>(what: impl fmt::Display, work: F) -> Result<F::Output, ErrorReason>
where
    F: Future,
{
    match AssertUnwindSafe(work).catch_unwind().await {
        Ok(output) => Ok(output),
        Err(_) => {
            tracing::error!("Internal error in {}", what);
            Err(ErrorReason::Internal)
        }
    }
}

fn into_reply(result: Result<(), ErrorReason>, ok: Reply) -> Reply {
    match result {
        Ok(()) => ok,
        Err(reason) => Reply::Error(reason),
    }
}
