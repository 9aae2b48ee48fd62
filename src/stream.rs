use crate::close::CloseSignal;
use std::fmt;
use std::io::Write;

/// Framing convention negotiated for a long-lived peer stream.
///
/// Selected once per connection from the URL path and never changed. The
/// bare path form predates typed streams and is kept so older members can
/// still connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamType {
    /// Original untyped stream (`/raft/stream/<id>`).
    MsgApp,
    /// Typed append stream (`/raft/stream/msgapp/<id>`).
    MsgAppV2,
    /// Typed general message stream (`/raft/stream/message/<id>`).
    Message,
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamType::MsgApp => write!(f, "stream msgapp"),
            StreamType::MsgAppV2 => write!(f, "stream msgapp v2"),
            StreamType::Message => write!(f, "stream message"),
        }
    }
}

/// Splits a `/raft/stream/...` path into its stream type and the trailing
/// sender segment. Any other shape is unrecognized.
pub fn parse_stream_path(path: &str) -> Option<(StreamType, &str)> {
    let rest = path.strip_prefix("/raft/stream/")?;
    let mut segments = rest.split('/');
    let first = segments.next()?;
    let second = segments.next();
    if segments.next().is_some() {
        return None;
    }
    match (first, second) {
        (sender, None) if !sender.is_empty() => Some((StreamType::MsgApp, sender)),
        ("msgapp", Some(sender)) if !sender.is_empty() => Some((StreamType::MsgAppV2, sender)),
        ("message", Some(sender)) if !sender.is_empty() => Some((StreamType::Message, sender)),
        _ => None,
    }
}

/// Write half of an accepted stream connection.
pub trait ConnectionWriter: Write + Send {}

impl<T: Write + Send> ConnectionWriter for T {}

/// Everything the peer directory needs to take over an accepted stream:
/// the negotiated framing, the term the sender claimed at accept time, the
/// socket's write half, and the signal that releases the blocked handler.
///
/// Ownership of the writer transfers with this struct; the handler retains
/// only a clone of `close`.
pub struct OutgoingConnection {
    pub stream_type: StreamType,
    pub term: Option<u64>,
    pub writer: Box<dyn ConnectionWriter>,
    pub close: CloseSignal,
}

impl OutgoingConnection {
    /// Releases the handler blocked on this connection. Called by the peer
    /// directory on supersession or detected death, exactly once.
    pub fn close(&self) {
        self.close.fire();
    }
}

impl fmt::Debug for OutgoingConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutgoingConnection")
            .field("stream_type", &self.stream_type)
            .field("term", &self.term)
            .finish_non_exhaustive()
    }
}
