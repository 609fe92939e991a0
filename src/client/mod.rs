//! Client Module
//!
//! The user-side library: discovery over UDP, a long-lived TCP session with
//! the Manager, and the lease convention for changing records.
//!
//! ## Core Concepts
//! - **Discovery**: `PRIJAVA|id` to the Repository's UDP port returns the Manager's TCP port.
//! - **Lease convention**: edits run `OPEN → EDIT → CLOSE`; deletes run `OPEN → DELETE`,
//!   closing only when the DELETE failed. A refused OPEN stops the sequence.
//! - **Transport vs. answer**: an `ERROR|<REASON>` reply is [`ClientError::Server`]; a timeout,
//!   closed socket, or reply that does not fit the request is a transport error and drops the
//!   connection. [`FileClient::reconnect`] restores it under the same identifier.

pub mod discovery;
pub mod session;
pub mod types;

pub use session::FileClient;
pub use types::ClientError;
