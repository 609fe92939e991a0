//! Repository Module
//!
//! The authoritative tier: owns every record and its lock state.
//!
//! ## Core Concepts
//! - **Single mutex**: `RecordStore` guards the whole table with one lock; critical sections
//!   are in-memory map operations only.
//! - **Lease discipline**: EDIT/DELETE succeed only for the client currently holding the lock
//!   taken by OPEN.
//! - **Connection cleanup**: each TCP connection remembers the locks acquired through it and
//!   releases them when it closes.
//! - **UDP**: discovery (`PRIJAVA`/`HELLO`), `LIST` and `STATS` are answered without a session.

pub mod handlers;
pub mod service;
pub mod store;
pub mod types;
