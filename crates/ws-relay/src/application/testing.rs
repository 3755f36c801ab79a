//! In-memory transports and handlers shared by the application-layer tests.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::application::dispatch::{InboundMessage, MessageHandler};
use crate::application::peer::{MessageSink, Peer, SendError};
use crate::application::reassembler::{FragmentRead, FragmentSource, ReceiveError};
use crate::domain::{MessageKind, PeerId};

/// One scripted transport read.
pub enum Step {
    Fragment {
        data: Vec<u8>,
        kind: MessageKind,
        end_of_message: bool,
    },
    Fail(String),
}

impl Step {
    pub fn fragment(data: &[u8], kind: MessageKind, end_of_message: bool) -> Self {
        Step::Fragment {
            data: data.to_vec(),
            kind,
            end_of_message,
        }
    }

    pub fn close() -> Self {
        Step::fragment(b"", MessageKind::Close, true)
    }

    pub fn fail(reason: &str) -> Self {
        Step::Fail(reason.to_string())
    }
}

/// Fragment source that replays a fixed script, then waits forever.
pub struct ScriptedSource {
    steps: VecDeque<Step>,
    reads: usize,
}

impl ScriptedSource {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: steps.into(),
            reads: 0,
        }
    }

    /// Splits one message into `chunk`-sized fragments, the last one final.
    pub fn chunked(payload: &[u8], kind: MessageKind, chunk: usize) -> Self {
        let chunks: Vec<&[u8]> = payload.chunks(chunk).collect();
        let last = chunks.len().saturating_sub(1);
        let steps = chunks
            .into_iter()
            .enumerate()
            .map(|(i, c)| Step::fragment(c, kind, i == last))
            .collect();
        Self::new(steps)
    }

    /// How many reads have been served.
    pub fn reads(&self) -> usize {
        self.reads
    }
}

#[async_trait]
impl FragmentSource for ScriptedSource {
    async fn read_fragment(&mut self, buf: &mut [u8]) -> Result<FragmentRead, ReceiveError> {
        let Some(step) = self.steps.pop_front() else {
            return std::future::pending().await;
        };
        self.reads += 1;
        match step {
            Step::Fragment {
                data,
                kind,
                end_of_message,
            } => {
                assert!(
                    data.len() <= buf.len(),
                    "scripted fragment larger than scratch buffer"
                );
                buf[..data.len()].copy_from_slice(&data);
                Ok(FragmentRead {
                    count: data.len(),
                    kind,
                    end_of_message,
                })
            }
            Step::Fail(reason) => Err(ReceiveError::Transport(reason)),
        }
    }
}

/// Shared view of what a [`RecordingSink`] has written.
#[derive(Clone, Default)]
pub struct SinkLog {
    sent: Arc<Mutex<Vec<(MessageKind, Vec<u8>)>>>,
}

impl SinkLog {
    pub fn sent(&self) -> Vec<(MessageKind, Vec<u8>)> {
        self.sent.lock().unwrap().clone()
    }
}

/// Message sink that records writes instead of performing them.
pub struct RecordingSink {
    log: SinkLog,
}

impl RecordingSink {
    pub fn new() -> (Self, SinkLog) {
        let log = SinkLog::default();
        (Self { log: log.clone() }, log)
    }
}

#[async_trait]
impl MessageSink for RecordingSink {
    async fn send_message(&mut self, kind: MessageKind, payload: Vec<u8>) -> Result<(), SendError> {
        self.log.sent.lock().unwrap().push((kind, payload));
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SendError> {
        Ok(())
    }
}

/// Message sink whose writes and close never complete, like a socket whose
/// remote end has stopped reading.
pub struct StallingSink;

#[async_trait]
impl MessageSink for StallingSink {
    async fn send_message(&mut self, _kind: MessageKind, _payload: Vec<u8>) -> Result<(), SendError> {
        std::future::pending().await
    }

    async fn close(&mut self) -> Result<(), SendError> {
        std::future::pending().await
    }
}

/// An open peer backed by a [`StallingSink`] with a short send timeout.
pub fn stalled_peer(id: PeerId, send_timeout: Duration) -> Arc<Peer> {
    let addr: SocketAddr = "127.0.0.1:40001".parse().unwrap();
    Arc::new(Peer::new(id, addr, Box::new(StallingSink)).with_send_timeout(send_timeout))
}

/// An open peer backed by a [`RecordingSink`].
pub fn test_peer(id: PeerId) -> (Arc<Peer>, SinkLog) {
    let addr: SocketAddr = "127.0.0.1:40000".parse().unwrap();
    let (sink, log) = RecordingSink::new();
    (Arc::new(Peer::new(id, addr, Box::new(sink))), log)
}

/// Handler that always returns an error.
pub struct FailingHandler;

#[async_trait]
impl MessageHandler for FailingHandler {
    async fn on_message(&self, _message: &InboundMessage) -> anyhow::Result<()> {
        anyhow::bail!("handler rejected message")
    }
}

/// Handler that always panics.
pub struct PanickingHandler;

#[async_trait]
impl MessageHandler for PanickingHandler {
    async fn on_message(&self, _message: &InboundMessage) -> anyhow::Result<()> {
        panic!("handler bug")
    }
}
