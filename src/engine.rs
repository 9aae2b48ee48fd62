use crate::message::ConsensusMessage;
use crate::stream::OutgoingConnection;
use crate::types::PeerId;
use std::fmt;
use std::io;
use std::sync::Arc;

/// A structured engine rejection that knows how to present itself to the
/// remote sender: a status code plus a plain-text body.
///
/// The transport renders these verbatim, so the engine can surface
/// protocol-meaningful detail (a stale term, an unknown sender) that the
/// remote side uses to decide whether to retry.
pub trait RejectionResponse: Send + Sync {
    fn status_code(&self) -> u16;
    fn message(&self) -> String;
}

/// Failure reported by [`RaftEngine::process`].
///
/// `Rejection` carries its own response rendering; everything else is
/// opaque to the transport and answered with a generic internal error.
pub enum EngineError {
    Rejection(Box<dyn RejectionResponse>),
    Internal(String),
}

impl fmt::Debug for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Rejection(r) => f
                .debug_struct("Rejection")
                .field("status", &r.status_code())
                .field("message", &r.message())
                .finish(),
            EngineError::Internal(detail) => {
                f.debug_tuple("Internal").field(detail).finish()
            }
        }
    }
}

/// The consensus engine as seen from the transport.
pub trait RaftEngine: Send + Sync {
    /// Hands a decoded inbound message to the engine.
    fn process(&self, msg: ConsensusMessage) -> Result<(), EngineError>;

    /// Whether `id` was removed from the cluster. Frames from a removed
    /// member are unsafe to act on even when transport-valid.
    fn is_id_removed(&self, id: PeerId) -> bool;
}

/// Durable sink for streamed snapshot payloads.
pub trait SnapshotStore: Send + Sync {
    /// Drains `src` to stable storage under the snapshot's log index. Must
    /// not return before the data is durably retrievable.
    fn save_from(&self, src: &mut dyn io::Read, index: u64) -> io::Result<()>;
}

/// A known cluster member that can take over an accepted stream.
pub trait Peer: Send + Sync {
    /// Takes ownership of the outgoing connection's write half. The peer
    /// must fire the connection's close signal exactly once when it drops
    /// or supersedes the connection.
    fn attach_outgoing(&self, conn: OutgoingConnection);
}

/// Registry resolving member ids to live peers.
pub trait PeerDirectory: Send + Sync {
    fn get(&self, id: PeerId) -> Option<Arc<dyn Peer>>;
}
