//! Application layer for ws-relay.
//!
//! Transport-agnostic relay logic: the peer object and its send path, the
//! peer registry, message reassembly, dispatch to subscribers, and the
//! per-connection session loop.  Nothing here knows about TCP or
//! tungstenite; the transport is reached only through the
//! [`FragmentSource`] and [`MessageSink`] traits.

pub mod dispatch;
pub mod handlers;
pub mod peer;
pub mod reassembler;
pub mod registry;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use dispatch::{
    DispatchReport, Dispatcher, EventChannel, InboundMessage, MessageHandler, RelayEvent,
};
pub use handlers::{BroadcastHandler, EchoHandler, LogHandler};
pub use peer::{MessageSink, Peer, SendError};
pub use reassembler::{
    CompleteMessage, FragmentRead, FragmentSource, MessageReassembler, ReceiveError,
};
pub use registry::{BroadcastReport, PeerRegistry, RegistryError};
pub use session::{run_session, SessionOptions};
