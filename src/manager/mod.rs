//! Request Manager Module
//!
//! The middle tier: accepts client TCP sessions, forwards their commands to the
//! Repository and relays the answers back.
//!
//! ## Core Concepts
//! - **Session-scoped upstream**: every client connection owns one lazily opened TCP link to
//!   the Repository. Dropping that link makes the Repository release the locks taken over it.
//! - **Shadow lock table**: a best-effort cache of lock ownership that rejects obviously
//!   conflicting OPENs without a round trip. The Repository stays the only arbiter; the cache
//!   may under-reject, never over-grant, and can be switched off.
//! - **Teardown**: when a client goes away its shadow entries are dropped and `RELEASE_ALL`
//!   is sent upstream for the identifier the session learned.
//! - **UDP relay**: `STATS`/`LIST` datagrams are answered by asking the Repository.
//!
//! ## Submodules
//! - **`shadow`**: `ShadowLockTable`, the cache-with-rollback.
//! - **`upstream`**: the bounded request/response link to the Repository.
//! - **`session`**: per-connection command handling, OPEN admission and reconciliation.
//! - **`service`**: listeners, connection tasks, the UDP relay and the stats reporter.

pub mod service;
pub mod session;
pub mod shadow;
pub mod types;
pub mod upstream;

#[cfg(test)]
mod tests;
