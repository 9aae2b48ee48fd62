#![allow(dead_code)]

use parking_lot::Mutex;
use raftgate::{
    ClusterId, ConsensusMessage, EngineError, OutgoingConnection, Peer, PeerDirectory,
    ProtocolVersion, RaftEngine, RaftTransport, RaftTransportServer, ServerConfig, ServerHandle,
    SnapshotStore, TransportIdentity, TransportObserver, VersionWindow,
};
use raftgate::{LogObserver, PeerId};
use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

pub const LOCAL_ID: PeerId = PeerId(1);
pub const CLUSTER: &str = "c1";

/// Engine fake: records everything it is handed, with a scriptable
/// one-shot failure and a mutable removed-member set.
#[derive(Default)]
pub struct RecordingEngine {
    pub processed: Mutex<Vec<ConsensusMessage>>,
    pub removed: Mutex<HashSet<PeerId>>,
    pub next_error: Mutex<Option<EngineError>>,
}

impl RecordingEngine {
    pub fn fail_next(&self, err: EngineError) {
        *self.next_error.lock() = Some(err);
    }

    pub fn mark_removed(&self, id: PeerId) {
        self.removed.lock().insert(id);
    }
}

impl RaftEngine for RecordingEngine {
    fn process(&self, msg: ConsensusMessage) -> Result<(), EngineError> {
        if let Some(err) = self.next_error.lock().take() {
            return Err(err);
        }
        self.processed.lock().push(msg);
        Ok(())
    }

    fn is_id_removed(&self, id: PeerId) -> bool {
        self.removed.lock().contains(&id)
    }
}

/// Snapshot store fake that actually persists: one file per snapshot
/// index under a temp directory, synced before returning.
pub struct DiskSnapshotStore {
    dir: PathBuf,
}

impl DiskSnapshotStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    pub fn path_for(&self, index: u64) -> PathBuf {
        self.dir.join(format!("{index:016x}.snap.db"))
    }
}

impl SnapshotStore for DiskSnapshotStore {
    fn save_from(&self, src: &mut dyn Read, index: u64) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let mut file = File::create(self.path_for(index))?;
        io::copy(src, &mut file)?;
        file.sync_all()
    }
}

/// Failing store for the storage-error path.
pub struct BrokenSnapshotStore;

impl SnapshotStore for BrokenSnapshotStore {
    fn save_from(&self, _src: &mut dyn Read, _index: u64) -> io::Result<()> {
        Err(io::Error::new(io::ErrorKind::Other, "disk full"))
    }
}

/// Peer fake standing in for the per-peer connection manager: it holds the
/// current connection's writer, supersedes the previous one on re-attach,
/// and lets tests drive frames and teardown.
#[derive(Default)]
pub struct CapturingPeer {
    current: Mutex<Option<OutgoingConnection>>,
    pub seen: Mutex<Vec<(raftgate::StreamType, Option<u64>)>>,
}

impl CapturingPeer {
    pub fn attach_count(&self) -> usize {
        self.seen.lock().len()
    }

    /// Releases the handler and drops the writer, closing the socket.
    pub fn close_current(&self) {
        if let Some(conn) = self.current.lock().take() {
            conn.close();
        }
    }

    pub fn write_to_current(&self, bytes: &[u8]) -> io::Result<()> {
        let mut current = self.current.lock();
        let conn = current.as_mut().expect("no attached connection");
        conn.writer.write_all(bytes)?;
        conn.writer.flush()
    }
}

impl Peer for CapturingPeer {
    fn attach_outgoing(&self, conn: OutgoingConnection) {
        let mut current = self.current.lock();
        // A newer connection for the same peer supersedes the old one;
        // dropping the superseded writer closes its socket.
        if let Some(previous) = current.take() {
            previous.close();
        }
        self.seen.lock().push((conn.stream_type, conn.term));
        *current = Some(conn);
    }
}

#[derive(Default)]
pub struct StaticDirectory {
    peers: Mutex<HashMap<PeerId, Arc<CapturingPeer>>>,
    pub lookups: Mutex<Vec<PeerId>>,
}

impl StaticDirectory {
    pub fn add_peer(&self, id: PeerId) -> Arc<CapturingPeer> {
        let peer = Arc::new(CapturingPeer::default());
        self.peers.lock().insert(id, peer.clone());
        peer
    }
}

impl PeerDirectory for StaticDirectory {
    fn get(&self, id: PeerId) -> Option<Arc<dyn Peer>> {
        self.lookups.lock().push(id);
        self.peers
            .lock()
            .get(&id)
            .map(|peer| peer.clone() as Arc<dyn Peer>)
    }
}

pub struct Harness {
    pub handle: ServerHandle,
    pub addr: SocketAddr,
    pub engine: Arc<RecordingEngine>,
    pub directory: Arc<StaticDirectory>,
    pub snapshots: Arc<DiskSnapshotStore>,
    pub snapshot_dir: TempDir,
}

pub fn identity() -> TransportIdentity {
    TransportIdentity {
        local_id: LOCAL_ID,
        cluster_id: ClusterId(0xc1),
        versions: VersionWindow {
            running: ProtocolVersion::new(3, 1),
            min_supported: ProtocolVersion::new(3, 0),
        },
    }
}

pub fn start() -> Harness {
    start_with(None, None)
}

pub fn start_with(
    max_connections: Option<usize>,
    store: Option<Arc<dyn SnapshotStore>>,
) -> Harness {
    let engine = Arc::new(RecordingEngine::default());
    let directory = Arc::new(StaticDirectory::default());
    let snapshot_dir = TempDir::new().expect("temp dir");
    let snapshots = Arc::new(DiskSnapshotStore::new(snapshot_dir.path()));
    let store: Arc<dyn SnapshotStore> = store.unwrap_or_else(|| snapshots.clone());
    let observer: Arc<dyn TransportObserver> = Arc::new(LogObserver);
    let transport = Arc::new(RaftTransport::new(
        identity(),
        engine.clone(),
        store,
        directory.clone(),
        observer,
    ));
    let config = ServerConfig {
        bind: "127.0.0.1:0".parse().expect("loopback addr"),
        max_connections,
    };
    let handle = RaftTransportServer::spawn(config, transport).expect("spawn transport server");
    let addr = handle.local_addr();
    Harness {
        handle,
        addr,
        engine,
        directory,
        snapshots,
        snapshot_dir,
    }
}

/// Serialized HTTP/1.1 request with the default cluster id header.
pub fn request(method: &str, path: &str, extra: &[(&str, &str)], body: &[u8]) -> Vec<u8> {
    request_with_cluster(CLUSTER, method, path, extra, body)
}

pub fn request_with_cluster(
    cluster: &str,
    method: &str,
    path: &str,
    extra: &[(&str, &str)],
    body: &[u8],
) -> Vec<u8> {
    let mut raw = format!("{method} {path} HTTP/1.1\r\nHost: transport-test\r\n");
    raw.push_str(&format!("X-Etcd-Cluster-ID: {cluster}\r\n"));
    for (name, value) in extra {
        raw.push_str(&format!("{name}: {value}\r\n"));
    }
    raw.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));
    let mut bytes = raw.into_bytes();
    bytes.extend_from_slice(body);
    bytes
}

#[derive(Debug)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).trim_end().to_string()
    }
}

fn parse_response(raw: &[u8]) -> Response {
    let mut headers = [httparse::EMPTY_HEADER; 64];
    let mut parsed = httparse::Response::new(&mut headers);
    let head_len = match parsed.parse(raw).expect("parse response") {
        httparse::Status::Complete(len) => len,
        httparse::Status::Partial => panic!("partial response: {:?}", String::from_utf8_lossy(raw)),
    };
    Response {
        status: parsed.code.expect("status code"),
        headers: parsed
            .headers
            .iter()
            .map(|h| {
                (
                    h.name.to_string(),
                    String::from_utf8_lossy(h.value).to_string(),
                )
            })
            .collect(),
        body: raw[head_len..].to_vec(),
    }
}

/// Sends one request and reads the full response (the server closes the
/// connection after responding on non-stream paths).
pub fn send(addr: SocketAddr, raw: &[u8]) -> Response {
    try_send(addr, raw).expect("no response from server")
}

/// Like [`send`], but tolerates the server dropping the connection without
/// a response (the limiter path).
pub fn try_send(addr: SocketAddr, raw: &[u8]) -> Option<Response> {
    let mut stream = TcpStream::connect(addr).expect("connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("read timeout");
    if stream.write_all(raw).is_err() {
        return None;
    }
    let mut buf = Vec::new();
    match stream.read_to_end(&mut buf) {
        Ok(_) => {}
        Err(_) if !buf.is_empty() => {}
        Err(_) => return None,
    }
    if buf.is_empty() {
        return None;
    }
    Some(parse_response(&buf))
}

/// Opens a stream request and reads only the response head, leaving the
/// connection up. Returns the socket and the parsed head.
pub fn open_stream(addr: SocketAddr, raw: &[u8]) -> (TcpStream, Response) {
    let mut stream = TcpStream::connect(addr).expect("connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("read timeout");
    stream.write_all(raw).expect("write request");
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        let read = stream.read(&mut byte).expect("read response head");
        assert!(read > 0, "connection closed before response head completed");
        head.push(byte[0]);
    }
    let response = parse_response(&head);
    (stream, response)
}

/// Polls `predicate` until it holds or the deadline passes.
pub fn wait_until(timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    predicate()
}
