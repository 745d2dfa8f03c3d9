//! Duplex stream seam.
//!
//! The upgraded socket is split into a write half ([`FrameSink`], owned by the
//! connection behind its write lock) and a read half ([`FrameSource`], owned
//! by the read loop). Deadlines are applied by the connection, not here.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use pulse_core::TransportError;

use super::frame::Frame;

/// Write half of a duplex stream.
#[async_trait]
pub trait FrameSink: Send + 'static {
    /// Write one frame.
    async fn send_frame(&mut self, frame: Frame) -> Result<(), TransportError>;

    /// Close the stream. Later writes fail.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Read half of a duplex stream.
#[async_trait]
pub trait FrameSource: Send + 'static {
    /// Next inbound frame, `None` once the stream has ended.
    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>>;
}

#[async_trait]
impl FrameSink for SplitSink<WebSocket, Message> {
    async fn send_frame(&mut self, frame: Frame) -> Result<(), TransportError> {
        self.send(frame.into())
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        SinkExt::close(self)
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }
}

#[async_trait]
impl FrameSource for SplitStream<WebSocket> {
    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>> {
        self.next().await.map(|result| {
            result
                .map(Frame::from)
                .map_err(|e| TransportError::Io(e.to_string()))
        })
    }
}

/// Split an upgraded socket into boxed halves.
pub fn split(socket: WebSocket) -> (Box<dyn FrameSink>, Box<dyn FrameSource>) {
    let (sink, source) = socket.split();
    (Box::new(sink), Box::new(source))
}
