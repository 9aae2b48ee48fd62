//! Peer transport for a leader-based replicated state-machine cluster.
//!
//! Moves consensus messages, snapshot transfers, and long-lived message
//! streams between cluster members over HTTP/1.1, rejecting peers with an
//! incompatible protocol revision or a foreign cluster identity before
//! anything reaches the consensus engine.

pub mod close;
pub mod engine;
pub mod message;
pub mod net;
pub mod observer;
pub mod stream;
pub mod types;
pub mod version;

pub use close::CloseSignal;
pub use engine::{EngineError, Peer, PeerDirectory, RaftEngine, RejectionResponse, SnapshotStore};
pub use message::{
    encode_envelope, read_envelope, ConsensusMessage, EnvelopeError, MessageCodecError,
    MessageKind, SnapshotInfo, MAX_ENVELOPE_BYTES,
};
pub use net::{
    RaftTransport, RaftTransportServer, Rejection, ServerConfig, ServerHandle, TransportError,
    TransportIdentity, CONN_READ_LIMIT_BYTES,
};
pub use observer::{LogObserver, TransportObserver};
pub use stream::{parse_stream_path, ConnectionWriter, OutgoingConnection, StreamType};
pub use types::{ClusterId, IdParseError, PeerId};
pub use version::{ProtocolVersion, VersionError, VersionWindow};
