//! Wire Protocol Module
//!
//! Defines the single command/reply vocabulary spoken by every tier
//! (client → Manager → Repository) over TCP and UDP.
//!
//! ## Framing
//! - **TCP**: one command per line, one reply per line, pipe (`|`) separated fields.
//! - **UDP**: one command per datagram, one reply per datagram.
//! - **Bodies**: record content travels base64-encoded so it never collides with a separator.
//!
//! ## Submodules
//! - **`command`**: The closed `Command` type with its validating parser.
//! - **`reply`**: The closed `Reply` type; `OK|...` successes and `ERROR|<REASON>` failures.
//! - **`frame`**: Async line framing and the base64 body codec.
//! - **`types`**: Identifiers, snapshot rows, statistics and the error vocabulary.

pub mod command;
pub mod frame;
pub mod reply;
pub mod types;

pub use command::Command;
pub use reply::Reply;
pub use types::{ClientId, ErrorReason, ProtocolError};

#[cfg(test)]
mod tests;
