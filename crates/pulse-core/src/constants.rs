//! Package-level and protocol constants.

/// Current version of the Pulse hub (sourced from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Package name.
pub const NAME: &str = "pulse";

/// Text frame sent to every peer right after a successful upgrade.
pub const HANDSHAKE_ACK: &str = "websocket handshake success";

/// Payload carried by server-initiated ping frames.
pub const SERVER_PING_PAYLOAD: &str = "Server->Ping->Client";

/// Prefix of the acknowledgment sent back for every inbound message.
pub const REPLY_PREFIX: &str = "server received your message==>";

/// Build the acknowledgment reply for an inbound text payload.
pub fn reply_for(payload: &str) -> String {
    format!("{REPLY_PREFIX}{payload}")
}
