//! tokio-tungstenite adapters for the application-layer transport traits.
//!
//! After the handshake the WebSocket stream is split into two owned halves:
//!
//! - [`WsFragmentSource`] (read half) feeds the session loop.  It serves each
//!   received message through the caller's scratch buffer, one buffer-sized
//!   chunk per read, and marks the last chunk as the end of the message.
//! - [`WsSink`] (write half) lives inside the `Peer` and performs sends and
//!   the close handshake.
//!
//! Ping/pong control frames never reach the session loop; tungstenite queues
//! the pong replies itself.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::WebSocketStream;
use tracing::trace;

use crate::application::peer::{MessageSink, SendError};
use crate::application::reassembler::{FragmentRead, FragmentSource, ReceiveError};
use crate::domain::MessageKind;

/// Splits an upgraded stream into the sink and source halves.
pub fn split_stream<S>(ws: WebSocketStream<S>) -> (WsSink<S>, WsFragmentSource<S>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (sink, stream) = ws.split();
    (
        WsSink { sink },
        WsFragmentSource {
            stream,
            pending: None,
        },
    )
}

/// A received message not yet fully copied out.
struct PendingMessage {
    kind: MessageKind,
    data: Vec<u8>,
    offset: usize,
}

impl PendingMessage {
    /// Copies the next chunk into `buf`; returns the read and whether the
    /// message is now exhausted.
    fn serve(&mut self, buf: &mut [u8]) -> FragmentRead {
        let remaining = &self.data[self.offset..];
        let count = remaining.len().min(buf.len());
        buf[..count].copy_from_slice(&remaining[..count]);
        self.offset += count;
        FragmentRead {
            count,
            kind: self.kind,
            end_of_message: self.offset >= self.data.len(),
        }
    }
}

/// Read half of a WebSocket connection.
pub struct WsFragmentSource<S> {
    stream: SplitStream<WebSocketStream<S>>,
    pending: Option<PendingMessage>,
}

#[async_trait]
impl<S> FragmentSource for WsFragmentSource<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn read_fragment(&mut self, buf: &mut [u8]) -> Result<FragmentRead, ReceiveError> {
        loop {
            if let Some(pending) = self.pending.as_mut() {
                let read = pending.serve(buf);
                if read.end_of_message {
                    self.pending = None;
                }
                return Ok(read);
            }

            let (kind, data) = match self.stream.next().await {
                Some(Ok(WsMessage::Text(text))) => (MessageKind::Text, text.into_bytes()),
                Some(Ok(WsMessage::Binary(data))) => (MessageKind::Binary, data),
                Some(Ok(WsMessage::Close(frame))) => {
                    trace!("close frame: {frame:?}");
                    return Ok(close_fragment());
                }
                Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_))) => {
                    continue
                }
                // The stream ends after a completed close handshake.
                None => return Ok(close_fragment()),
                Some(Err(WsError::ConnectionClosed)) => return Ok(close_fragment()),
                Some(Err(e)) => return Err(ReceiveError::Transport(e.to_string())),
            };

            self.pending = Some(PendingMessage {
                kind,
                data,
                offset: 0,
            });
        }
    }
}

fn close_fragment() -> FragmentRead {
    FragmentRead {
        count: 0,
        kind: MessageKind::Close,
        end_of_message: true,
    }
}

/// Write half of a WebSocket connection.
pub struct WsSink<S> {
    sink: SplitSink<WebSocketStream<S>, WsMessage>,
}

#[async_trait]
impl<S> MessageSink for WsSink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send_message(&mut self, kind: MessageKind, payload: Vec<u8>) -> Result<(), SendError> {
        let message = match kind {
            MessageKind::Text => {
                WsMessage::Text(String::from_utf8(payload).map_err(|_| SendError::InvalidUtf8)?)
            }
            MessageKind::Binary => WsMessage::Binary(payload),
            MessageKind::Close => return Err(SendError::NotData(kind)),
        };
        self.sink.send(message).await.map_err(map_ws_error)
    }

    async fn close(&mut self) -> Result<(), SendError> {
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "Closing".into(),
        };
        let sent = self
            .sink
            .send(WsMessage::Close(Some(frame)))
            .await
            .map_err(map_ws_error);
        let closed = self.sink.close().await.map_err(map_ws_error);
        sent.and(closed)
    }
}

fn map_ws_error(e: WsError) -> SendError {
    match e {
        WsError::ConnectionClosed | WsError::AlreadyClosed => SendError::Closed,
        other => SendError::Transport(other.to_string()),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(data: &[u8]) -> PendingMessage {
        PendingMessage {
            kind: MessageKind::Text,
            data: data.to_vec(),
            offset: 0,
        }
    }

    #[test]
    fn test_pending_message_served_in_buffer_sized_chunks() {
        // Arrange: 10 bytes through a 4-byte buffer
        let mut message = pending(b"0123456789");
        let mut buf = [0u8; 4];

        // Act / Assert
        let first = message.serve(&mut buf);
        assert_eq!((first.count, first.end_of_message), (4, false));
        assert_eq!(&buf, b"0123");

        let second = message.serve(&mut buf);
        assert_eq!((second.count, second.end_of_message), (4, false));
        assert_eq!(&buf, b"4567");

        let third = message.serve(&mut buf);
        assert_eq!((third.count, third.end_of_message), (2, true));
        assert_eq!(&buf[..2], b"89");
    }

    #[test]
    fn test_empty_message_is_a_single_final_read() {
        let mut message = pending(b"");
        let mut buf = [0u8; 4];

        let read = message.serve(&mut buf);

        assert_eq!(read.count, 0);
        assert!(read.end_of_message);
    }

    #[test]
    fn test_message_fitting_buffer_is_final_on_first_read() {
        let mut message = pending(b"abcd");
        let mut buf = [0u8; 4];

        let read = message.serve(&mut buf);

        assert_eq!(read.count, 4);
        assert!(read.end_of_message);
        assert_eq!(read.kind, MessageKind::Text);
    }

    #[test]
    fn test_close_errors_map_to_closed() {
        assert_eq!(map_ws_error(WsError::ConnectionClosed), SendError::Closed);
        assert_eq!(map_ws_error(WsError::AlreadyClosed), SendError::Closed);
    }

    #[test]
    fn test_other_errors_map_to_transport() {
        let io = WsError::Io(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe"));
        assert!(matches!(map_ws_error(io), SendError::Transport(_)));
    }
}
