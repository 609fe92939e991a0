//! Shared File Repository Library
//!
//! A three-tier store of named text records with exclusive edit locks. It is
//! the foundation for the server binary (`main.rs`) and the `repo-client` CLI.
//!
//! ## Architecture Modules
//! - **`protocol`**: The wire vocabulary shared by every tier. Commands and replies are closed
//!   enums parsed once at the socket boundary; frames are pipe-separated text lines with base64
//!   bodies.
//! - **`repository`**: The authoritative tier. Owns the record table and lock state behind a
//!   single mutex and serves the Manager over TCP and anyone over UDP (discovery, LIST, STATS).
//! - **`manager`**: The client-facing router. One task per client connection, a session-scoped
//!   link to the Repository, a best-effort shadow lock table, and lock cleanup on disconnect.
//! - **`client`**: Discovery, the `FileClient` session and the OPEN → mutate → CLOSE
//!   convention.
//! - **`config`**: Serde-backed settings for all three roles.

pub mod client;
pub mod config;
pub mod manager;
pub mod protocol;
pub mod repository;
