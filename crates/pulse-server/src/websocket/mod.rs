//! WebSocket connection lifecycle, heartbeat, and delivery.
//!
//! ## Submodules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `frame` | Frame model shared by every layer |
//! | `stream` | Duplex stream seam (`FrameSink` / `FrameSource`) and axum adapters |
//! | `connection` | Per-connection state, serialized write path, read loop |
//! | `heartbeat` | Periodic ping with a tolerated-failure counter |
//! | `registry` | Coordinating task owning the live set; broadcast and targeted send |
//! | `handler` | Application callbacks (acknowledgment reply, unregister on close) |
//! | `session` | Glue from an upgraded socket to a running connection |
//!
//! ## Data Flow
//!
//! upgrade → `session` → `Connection::open` (ack, register, heartbeat) →
//! `read_pump` → `handler` → on exit `registry.unregister`.

pub mod connection;
pub mod frame;
pub mod handler;
pub mod heartbeat;
pub mod registry;
pub mod session;
pub mod stream;

#[cfg(test)]
pub(crate) mod testing;
