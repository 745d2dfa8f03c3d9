//! # pulse-server
//!
//! Axum HTTP + `WebSocket` hub.
//!
//! - `WebSocket` gateway: upgrade, per-connection read loop, heartbeat, serialized writes
//! - Connection registry: a single coordinating task owning the live set
//! - Broadcast to every live connection and targeted delivery by identity
//! - Health and Prometheus metrics endpoints
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;
