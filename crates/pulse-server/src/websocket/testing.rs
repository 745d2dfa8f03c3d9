//! In-memory stream halves and a recording handler for unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pulse_core::{ConnectionError, ConnectionId, TransportError};
use tokio::sync::mpsc;

use super::connection::{Connection, ConnectionConfig, ConnectionHandler};
use super::frame::Frame;
use super::stream::{FrameSink, FrameSource};

#[derive(Default)]
struct SinkState {
    frames: Mutex<Vec<Frame>>,
    attempts: AtomicUsize,
    failing: AtomicBool,
    stalled: AtomicBool,
    closed: AtomicBool,
    close_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// Write half that records frames in memory.
struct FakeSink {
    state: Arc<SinkState>,
}

/// Test-side view of a [`FakeSink`].
#[derive(Clone)]
pub(crate) struct SinkProbe {
    state: Arc<SinkState>,
}

impl SinkProbe {
    /// Frames successfully written, in order.
    pub(crate) fn frames(&self) -> Vec<Frame> {
        self.state.frames.lock().clone()
    }

    /// Make every following write fail immediately.
    pub(crate) fn set_failing(&self, failing: bool) {
        self.state.failing.store(failing, Ordering::SeqCst);
    }

    /// Make every following write hang forever.
    pub(crate) fn set_stalled(&self, stalled: bool) {
        self.state.stalled.store(stalled, Ordering::SeqCst);
    }

    /// Writes attempted, successful or not.
    pub(crate) fn write_attempts(&self) -> usize {
        self.state.attempts.load(Ordering::SeqCst)
    }

    /// Highest number of writes observed in progress at once.
    pub(crate) fn max_in_flight(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }

    /// Times `close` was called on the sink.
    pub(crate) fn close_calls(&self) -> usize {
        self.state.close_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FrameSink for FakeSink {
    async fn send_frame(&mut self, frame: Frame) -> Result<(), TransportError> {
        let state = &self.state;
        let _ = state.attempts.fetch_add(1, Ordering::SeqCst);
        let now = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = state.max_in_flight.fetch_max(now, Ordering::SeqCst);

        tokio::task::yield_now().await;
        if state.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        let result = if state.closed.load(Ordering::SeqCst) {
            Err(TransportError::Closed)
        } else if state.failing.load(Ordering::SeqCst) {
            Err(TransportError::Io("broken pipe".into()))
        } else {
            state.frames.lock().push(frame);
            Ok(())
        };
        let _ = state.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let _ = self.state.close_calls.fetch_add(1, Ordering::SeqCst);
        self.state.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Read half fed from an unbounded channel. Ends when every sender is dropped.
struct ChannelSource {
    rx: mpsc::UnboundedReceiver<Result<Frame, TransportError>>,
}

#[async_trait]
impl FrameSource for ChannelSource {
    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>> {
        self.rx.recv().await
    }
}

pub(crate) fn fake_sink() -> (Box<dyn FrameSink>, SinkProbe) {
    let state = Arc::new(SinkState::default());
    let probe = SinkProbe {
        state: state.clone(),
    };
    (Box::new(FakeSink { state }), probe)
}

pub(crate) fn fake_source() -> (
    Box<dyn FrameSource>,
    mpsc::UnboundedSender<Result<Frame, TransportError>>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Box::new(ChannelSource { rx }), tx)
}

pub(crate) fn test_config() -> ConnectionConfig {
    ConnectionConfig {
        ping_period: Duration::from_secs(10),
        read_deadline: Some(Duration::from_secs(30)),
        write_timeout: Duration::from_secs(5),
        max_heartbeat_failures: 3,
        max_message_size: 65_535,
        buffer_size: 20_480,
    }
}

/// Unregistered connection over a fake sink, no heartbeat running.
pub(crate) fn connection(id: u64, identity: &str) -> (Arc<Connection>, SinkProbe) {
    let (sink, probe) = fake_sink();
    let conn = Connection::new(ConnectionId::from_raw(id), identity, sink, test_config());
    (conn, probe)
}

/// Handler that records every callback.
#[derive(Default)]
pub(crate) struct RecordingHandler {
    messages: Mutex<Vec<Frame>>,
    errors: Mutex<Vec<String>>,
    closes: AtomicUsize,
    panic_on_message: bool,
}

impl RecordingHandler {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Handler whose `on_message` panics.
    pub(crate) fn panicking() -> Arc<Self> {
        Arc::new(Self {
            panic_on_message: true,
            ..Self::default()
        })
    }

    pub(crate) fn messages(&self) -> Vec<Frame> {
        self.messages.lock().clone()
    }

    pub(crate) fn errors(&self) -> Vec<String> {
        self.errors.lock().clone()
    }

    pub(crate) fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectionHandler for RecordingHandler {
    async fn on_message(&self, _conn: &Arc<Connection>, frame: Frame) {
        assert!(!self.panic_on_message, "handler panicked on {frame:?}");
        self.messages.lock().push(frame);
    }

    fn on_error(&self, _conn: &Arc<Connection>, error: &ConnectionError) {
        self.errors.lock().push(error.to_string());
    }

    fn on_close(&self, _conn: &Arc<Connection>) {
        let _ = self.closes.fetch_add(1, Ordering::SeqCst);
    }
}
