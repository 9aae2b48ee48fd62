use super::http::{self, BodyReader, RequestHead};
use super::{Rejection, TransportError};
use crate::close::CloseSignal;
use crate::engine::{EngineError, Peer, PeerDirectory, RaftEngine, SnapshotStore};
use crate::message::{read_envelope, ConsensusMessage, MessageKind};
use crate::observer::TransportObserver;
use crate::stream::{parse_stream_path, OutgoingConnection};
use crate::types::{ClusterId, PeerId};
use crate::version::VersionWindow;
use std::io::{Read, Write};
use std::sync::Arc;

/// Ceiling on a single `/raft` message body. Bounding the read keeps a
/// stalled or malicious sender from pinning memory or holding the
/// connection open through an unbounded read.
pub const CONN_READ_LIMIT_BYTES: u64 = 64 * 1024;

/// How much unconsumed request body a refused POST will still swallow
/// before the response is written and the connection closed.
const MAX_DISCARD_BYTES: u64 = 256 * 1024;

/// Who this member is: its own id, its cluster, and the protocol window it
/// accepts.
#[derive(Debug, Clone, Copy)]
pub struct TransportIdentity {
    pub local_id: PeerId,
    pub cluster_id: ClusterId,
    pub versions: VersionWindow,
}

enum Route {
    Message,
    Snapshot,
    Stream,
    Unknown,
}

impl Route {
    fn of(path: &str) -> Self {
        match path {
            "/raft" => Route::Message,
            "/raft/snapshot" => Route::Snapshot,
            _ if path == "/raft/stream" || path.starts_with("/raft/stream/") => Route::Stream,
            _ => Route::Unknown,
        }
    }
}

/// Inbound side of the peer transport: decodes and demultiplexes requests
/// from other cluster members and hands them to the consensus engine, the
/// snapshot store, or the peer directory.
///
/// One instance serves every connection; all collaborators are injected at
/// construction.
pub struct RaftTransport {
    identity: TransportIdentity,
    engine: Arc<dyn RaftEngine>,
    snapshots: Arc<dyn SnapshotStore>,
    peers: Arc<dyn PeerDirectory>,
    observer: Arc<dyn TransportObserver>,
}

impl RaftTransport {
    pub fn new(
        identity: TransportIdentity,
        engine: Arc<dyn RaftEngine>,
        snapshots: Arc<dyn SnapshotStore>,
        peers: Arc<dyn PeerDirectory>,
        observer: Arc<dyn TransportObserver>,
    ) -> Self {
        Self {
            identity,
            engine,
            snapshots,
            peers,
            observer,
        }
    }

    pub fn local_id(&self) -> PeerId {
        self.identity.local_id
    }

    pub fn cluster_id(&self) -> ClusterId {
        self.identity.cluster_id
    }

    /// Serves one inbound connection to completion.
    ///
    /// Message and snapshot requests return once their response is written.
    /// Stream requests park the calling thread until the peer directory
    /// fires the connection's close signal, so this call can block
    /// indefinitely by design.
    pub fn serve_connection<S>(&self, mut stream: S) -> Result<(), TransportError>
    where
        S: Read + Write + Send + 'static,
    {
        let (head, leftover) = http::read_request_head(&mut stream)?;
        match Route::of(&head.path) {
            Route::Message => self.handle_message(&head, leftover, &mut stream),
            Route::Snapshot => self.handle_snapshot(&head, leftover, &mut stream),
            Route::Stream => self.handle_stream(head, stream),
            Route::Unknown => {
                write_rejection(&mut stream, self.base_headers(), &Rejection::UnknownPath)
                    .map_err(Into::into)
            }
        }
    }

    /// `POST /raft`: one encoded message, bounded read, decode, forward.
    fn handle_message<S: Read + Write>(
        &self,
        head: &RequestHead,
        leftover: Vec<u8>,
        stream: &mut S,
    ) -> Result<(), TransportError> {
        let declared = head.content_length().ok().flatten();
        let outcome = {
            let mut body = BodyReader::new(leftover, stream, declared.unwrap_or(0));
            let outcome = self.message_outcome(head, declared, &mut body);
            body.discard(MAX_DISCARD_BYTES);
            outcome
        };
        self.finish_post(stream, outcome)
    }

    fn message_outcome(
        &self,
        head: &RequestHead,
        declared: Option<u64>,
        body: &mut BodyReader<'_>,
    ) -> Result<(), Rejection> {
        if head.method != "POST" {
            return Err(Rejection::MethodNotAllowed { allow: "POST" });
        }
        self.check_cluster_compatibility(head)?;
        let declared = match declared {
            Some(n) if n <= CONN_READ_LIMIT_BYTES => n,
            Some(_) | None => return Err(Rejection::BodyRead),
        };
        let mut raw = Vec::with_capacity(declared as usize);
        body.read_to_vec(&mut raw).map_err(|_| Rejection::BodyRead)?;
        let msg = ConsensusMessage::decode(&raw).map_err(|err| {
            self.observer.decode_failed("/raft", &err.to_string());
            Rejection::BodyUnmarshal
        })?;
        self.forward_to_engine(msg)
    }

    /// `POST /raft/snapshot`: decode the envelope only, stream the rest of
    /// the body into the snapshot store, then notify the engine.
    ///
    /// The engine is told about the snapshot only after the store reports
    /// the payload durable, so the state it installs is guaranteed
    /// retrievable.
    fn handle_snapshot<S: Read + Write>(
        &self,
        head: &RequestHead,
        leftover: Vec<u8>,
        stream: &mut S,
    ) -> Result<(), TransportError> {
        let declared = head.content_length().ok().flatten();
        let outcome = {
            let mut body = BodyReader::new(leftover, stream, declared.unwrap_or(0));
            let outcome = self.snapshot_outcome(head, declared, &mut body);
            body.discard(MAX_DISCARD_BYTES);
            outcome
        };
        let outcome = outcome.and_then(|msg| self.forward_to_engine(msg));
        self.finish_post(stream, outcome)
    }

    fn snapshot_outcome(
        &self,
        head: &RequestHead,
        declared: Option<u64>,
        body: &mut BodyReader<'_>,
    ) -> Result<ConsensusMessage, Rejection> {
        if head.method != "POST" {
            return Err(Rejection::MethodNotAllowed { allow: "POST" });
        }
        self.check_cluster_compatibility(head)?;
        if declared.is_none() {
            return Err(Rejection::BodyRead);
        }
        let msg = read_envelope(body).map_err(|err| {
            self.observer
                .decode_failed("/raft/snapshot", &err.to_string());
            Rejection::EnvelopeDecode(err.to_string())
        })?;
        if msg.kind != MessageKind::Snapshot {
            self.observer.unexpected_message_kind(msg.kind);
            return Err(Rejection::WrongMessageKind);
        }
        let index = match msg.snapshot.as_ref() {
            Some(snap) => snap.index,
            None => {
                return Err(Rejection::EnvelopeDecode(
                    "missing snapshot descriptor".to_string(),
                ))
            }
        };
        self.snapshots.save_from(body, index).map_err(|err| {
            self.observer.snapshot_save_failed(index, &err.to_string());
            Rejection::SnapshotSave(err.to_string())
        })?;
        self.observer.snapshot_saved(index, msg.from);
        Ok(msg)
    }

    /// `GET /raft/stream[/<type>]/<sender>`: validate, accept, hand the
    /// write half to the peer directory, and park until the connection is
    /// declared dead.
    fn handle_stream<S>(&self, head: RequestHead, mut stream: S) -> Result<(), TransportError>
    where
        S: Read + Write + Send + 'static,
    {
        let headers = self.stream_headers();
        let (stream_type, sender, peer) = match self.stream_admission(&head) {
            Ok(admitted) => admitted,
            Err(rejection) => {
                return write_rejection(&mut stream, headers, &rejection).map_err(Into::into)
            }
        };
        // The remote treats a prompt, flushed 200 as its liveness signal;
        // it will not start sending frames before seeing it.
        http::write_stream_accept(&mut stream, &headers)?;
        let term = head
            .header("X-Raft-Term")
            .and_then(|raw| raw.trim().parse::<u64>().ok());
        let close = CloseSignal::new();
        let conn = OutgoingConnection {
            stream_type,
            term,
            writer: Box::new(stream),
            close: close.clone(),
        };
        self.observer.stream_attached(sender, stream_type);
        peer.attach_outgoing(conn);
        close.wait();
        Ok(())
    }

    fn stream_admission(
        &self,
        head: &RequestHead,
    ) -> Result<(crate::stream::StreamType, PeerId, Arc<dyn Peer>), Rejection> {
        if head.method != "GET" {
            return Err(Rejection::MethodNotAllowed { allow: "GET" });
        }
        self.check_cluster_compatibility(head)?;
        let (stream_type, sender_raw) = match parse_stream_path(&head.path) {
            Some(parsed) => parsed,
            None => {
                self.observer
                    .stream_rejected(&head.path, "unrecognized path");
                return Err(Rejection::UnknownStreamPath);
            }
        };
        let sender: PeerId = sender_raw.parse().map_err(|_| {
            self.observer
                .stream_rejected(&head.path, "unparsable sender id");
            Rejection::InvalidSender
        })?;
        if self.engine.is_id_removed(sender) {
            self.observer.stream_rejected(&head.path, "removed member");
            return Err(Rejection::RemovedSender);
        }
        let peer = match self.peers.get(sender) {
            Some(peer) => peer,
            None => {
                // Either a member of a foreign cluster reusing our cluster
                // id, or a member this node has not yet learned about.
                self.observer.stream_rejected(&head.path, "unknown sender");
                return Err(Rejection::UnknownSender);
            }
        };
        let local = self.identity.local_id.to_string();
        if head.header("X-Raft-To") != Some(local.as_str()) {
            self.observer
                .stream_rejected(&head.path, "recipient mismatch");
            return Err(Rejection::RecipientMismatch);
        }
        Ok((stream_type, sender, peer))
    }

    /// The shared gate: protocol window first, then cluster identity. Runs
    /// before any body byte is consumed, on every path.
    fn check_cluster_compatibility(&self, head: &RequestHead) -> Result<(), Rejection> {
        if let Err(err) = self.identity.versions.check(
            head.header("X-Server-Version"),
            head.header("X-Min-Cluster-Version"),
        ) {
            let sender = head.header("X-Server-From").unwrap_or("unknown");
            self.observer
                .version_incompatible(sender, &err.to_string());
            return Err(Rejection::IncompatibleVersion);
        }
        let want = self.identity.cluster_id.to_string();
        let got = head.header("X-Etcd-Cluster-ID").unwrap_or("");
        if got != want {
            self.observer
                .cluster_mismatch(got, self.identity.cluster_id);
            return Err(Rejection::ClusterMismatch);
        }
        Ok(())
    }

    fn forward_to_engine(&self, msg: ConsensusMessage) -> Result<(), Rejection> {
        match self.engine.process(msg) {
            Ok(()) => Ok(()),
            Err(EngineError::Rejection(response)) => Err(Rejection::EngineRejection(response)),
            Err(EngineError::Internal(detail)) => {
                self.observer.engine_failed(&detail);
                Err(Rejection::EngineInternal)
            }
        }
    }

    /// 204 only after the engine accepted the message, so the sender can
    /// tell a processed message apart from any response carrying a body.
    fn finish_post<S: Write>(
        &self,
        stream: &mut S,
        outcome: Result<(), Rejection>,
    ) -> Result<(), TransportError> {
        let headers = self.base_headers();
        match outcome {
            Ok(()) => http::write_response(stream, 204, &headers, "").map_err(Into::into),
            Err(rejection) => write_rejection(stream, headers, &rejection).map_err(Into::into),
        }
    }

    fn base_headers(&self) -> Vec<(&'static str, String)> {
        vec![("X-Etcd-Cluster-ID", self.identity.cluster_id.to_string())]
    }

    fn stream_headers(&self) -> Vec<(&'static str, String)> {
        vec![
            ("X-Server-Version", self.identity.versions.running.to_string()),
            ("X-Etcd-Cluster-ID", self.identity.cluster_id.to_string()),
        ]
    }
}

fn write_rejection<S: Write>(
    stream: &mut S,
    mut headers: Vec<(&'static str, String)>,
    rejection: &Rejection,
) -> std::io::Result<()> {
    if let Some(allow) = rejection.allowed_method() {
        headers.push(("Allow", allow.to_string()));
    }
    http::write_response(stream, rejection.status(), &headers, &rejection.to_string())
}
