//! # pulse-core
//!
//! Foundation types, errors, connection IDs, and logging for the Pulse hub.
//!
//! This crate provides the shared vocabulary the other Pulse crates depend on:
//!
//! - **Connection IDs**: [`ConnectionId`], explicitly assigned by the registry
//! - **Errors**: [`ConnectionError`], [`TransportError`], [`RegistryError`] via `thiserror`
//! - **Constants**: handshake acknowledgment, ping payload, reply template
//! - **Logging**: [`logging::init_subscriber`] for the global `tracing` subscriber

#![deny(unsafe_code)]

pub mod constants;
pub mod errors;
pub mod ids;
pub mod logging;

pub use errors::{ConnectionError, RegistryError, TransportError};
pub use ids::{ConnectionId, ConnectionIdAllocator};
