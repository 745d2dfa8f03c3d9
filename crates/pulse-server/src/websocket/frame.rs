//! Frame model.

use axum::extract::ws::Message;
use bytes::Bytes;

/// One WebSocket frame as seen by the connection layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Bytes),
    /// Ping control frame.
    Ping(Bytes),
    /// Pong control frame.
    Pong(Bytes),
    /// Close control frame.
    Close,
}

/// Frame type without its payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameKind {
    /// Text frame.
    Text,
    /// Binary frame.
    Binary,
    /// Ping frame.
    Ping,
    /// Pong frame.
    Pong,
    /// Close frame.
    Close,
}

impl Frame {
    /// Text frame from anything string-like.
    pub fn text(payload: impl Into<String>) -> Self {
        Self::Text(payload.into())
    }

    /// Ping frame carrying a static payload.
    pub fn ping(payload: &'static str) -> Self {
        Self::Ping(Bytes::from_static(payload.as_bytes()))
    }

    /// Type of this frame.
    pub fn kind(&self) -> FrameKind {
        match self {
            Self::Text(_) => FrameKind::Text,
            Self::Binary(_) => FrameKind::Binary,
            Self::Ping(_) => FrameKind::Ping,
            Self::Pong(_) => FrameKind::Pong,
            Self::Close => FrameKind::Close,
        }
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Text(s) => s.len(),
            Self::Binary(b) | Self::Ping(b) | Self::Pong(b) => b.len(),
            Self::Close => 0,
        }
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Text(s) => Message::Text(s.into()),
            Frame::Binary(b) => Message::Binary(b),
            Frame::Ping(b) => Message::Ping(b),
            Frame::Pong(b) => Message::Pong(b),
            Frame::Close => Message::Close(None),
        }
    }
}

impl From<Message> for Frame {
    fn from(message: Message) -> Self {
        match message {
            Message::Text(t) => Frame::Text(t.as_str().to_owned()),
            Message::Binary(b) => Frame::Binary(b),
            Message::Ping(b) => Frame::Ping(b),
            Message::Pong(b) => Frame::Pong(b),
            Message::Close(_) => Frame::Close,
        }
    }
}
