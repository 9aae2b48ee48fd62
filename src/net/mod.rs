use crate::engine::RejectionResponse;
use std::fmt;
use std::io;
use thiserror::Error;

mod handlers;
pub(crate) mod http;
mod server;

pub use handlers::{RaftTransport, TransportIdentity, CONN_READ_LIMIT_BYTES};
pub use http::{BodyReader, RequestHead};
pub use server::{RaftTransportServer, ServerConfig, ServerHandle};

/// Connection-level failures. Any of these ends the connection's thread;
/// none of them is fatal to the process.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] HttpError),
}

/// Failures while parsing the inbound request head. These occur before a
/// status code could be chosen, so the connection is dropped without a
/// response.
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("io error while reading request: {0}")]
    Io(io::Error),
    #[error("connection closed while reading headers")]
    ConnectionClosedBeforeHeaders,
    #[error("HTTP headers exceed limit")]
    HeadersTooLarge,
    #[error("partial HTTP request received")]
    PartialRequest,
    #[error("HTTP request parse error: {0:?}")]
    RequestParse(httparse::Error),
    #[error("HTTP method missing")]
    MissingMethod,
    #[error("HTTP path missing")]
    MissingPath,
    #[error("invalid header value for {name}")]
    InvalidHeaderValue { name: String },
    #[error("invalid Content-Length header value")]
    InvalidContentLength,
}

/// A refused request: every variant maps to exactly one status code and
/// plain-text body, written once, terminal to that request only.
#[derive(Error)]
pub enum Rejection {
    #[error("Method Not Allowed")]
    MethodNotAllowed { allow: &'static str },
    #[error("incompatible version")]
    IncompatibleVersion,
    #[error("cluster ID mismatch")]
    ClusterMismatch,
    #[error("error reading raft message")]
    BodyRead,
    #[error("error unmarshaling raft message")]
    BodyUnmarshal,
    #[error("failed to decode raft message ({0})")]
    EnvelopeDecode(String),
    #[error("wrong raft message type")]
    WrongMessageKind,
    #[error("failed to save snapshot ({0})")]
    SnapshotSave(String),
    #[error("error processing raft message")]
    EngineInternal,
    #[error("{}", .0.message())]
    EngineRejection(Box<dyn RejectionResponse>),
    #[error("404 page not found")]
    UnknownPath,
    #[error("invalid path")]
    UnknownStreamPath,
    #[error("invalid from")]
    InvalidSender,
    #[error("removed member")]
    RemovedSender,
    #[error("error sender not found")]
    UnknownSender,
    #[error("to field mismatch")]
    RecipientMismatch,
}

impl Rejection {
    pub fn status(&self) -> u16 {
        match self {
            Rejection::MethodNotAllowed { .. } => 405,
            Rejection::IncompatibleVersion
            | Rejection::ClusterMismatch
            | Rejection::RecipientMismatch => 412,
            Rejection::BodyRead
            | Rejection::BodyUnmarshal
            | Rejection::EnvelopeDecode(_)
            | Rejection::WrongMessageKind => 400,
            Rejection::SnapshotSave(_) | Rejection::EngineInternal => 500,
            Rejection::EngineRejection(r) => r.status_code(),
            Rejection::UnknownPath
            | Rejection::UnknownStreamPath
            | Rejection::InvalidSender
            | Rejection::UnknownSender => 404,
            Rejection::RemovedSender => 410,
        }
    }

    /// The `Allow` header value, for method refusals.
    pub fn allowed_method(&self) -> Option<&'static str> {
        match self {
            Rejection::MethodNotAllowed { allow } => Some(allow),
            _ => None,
        }
    }
}

impl fmt::Debug for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Rejection({} {})", self.status(), self)
    }
}
