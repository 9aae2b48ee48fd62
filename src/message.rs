use crate::types::PeerId;
use std::convert::TryInto;
use std::io::{self, Read};
use thiserror::Error;

const MESSAGE_FRAME_VERSION: u8 = 1;

/// Upper bound on the length-prefixed envelope at the front of a snapshot
/// transfer body. The raw snapshot bytes that follow are unbounded.
pub const MAX_ENVELOPE_BYTES: usize = 64 * 1024;

/// The fixed set of message kinds both ends of the wire agree on.
///
/// Tags are part of the wire format; an unrecognized tag is a decode error,
/// never a silent drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Heartbeat,
    HeartbeatReply,
    AppendEntries,
    AppendEntriesReply,
    Vote,
    VoteReply,
    Snapshot,
}

impl MessageKind {
    fn tag(self) -> u8 {
        match self {
            MessageKind::Heartbeat => 1,
            MessageKind::HeartbeatReply => 2,
            MessageKind::AppendEntries => 3,
            MessageKind::AppendEntriesReply => 4,
            MessageKind::Vote => 5,
            MessageKind::VoteReply => 6,
            MessageKind::Snapshot => 7,
        }
    }

    fn from_tag(tag: u8) -> Result<Self, MessageCodecError> {
        match tag {
            1 => Ok(MessageKind::Heartbeat),
            2 => Ok(MessageKind::HeartbeatReply),
            3 => Ok(MessageKind::AppendEntries),
            4 => Ok(MessageKind::AppendEntriesReply),
            5 => Ok(MessageKind::Vote),
            6 => Ok(MessageKind::VoteReply),
            7 => Ok(MessageKind::Snapshot),
            other => Err(MessageCodecError::UnknownKind(other)),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            MessageKind::Heartbeat => "heartbeat",
            MessageKind::HeartbeatReply => "heartbeat_reply",
            MessageKind::AppendEntries => "append_entries",
            MessageKind::AppendEntriesReply => "append_entries_reply",
            MessageKind::Vote => "vote",
            MessageKind::VoteReply => "vote_reply",
            MessageKind::Snapshot => "snapshot",
        }
    }
}

/// Snapshot descriptor carried inside a [`ConsensusMessage`].
///
/// On the snapshot-transfer path the envelope ships with `data` empty and
/// the payload follows the envelope as raw body bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotInfo {
    pub index: u64,
    pub term: u64,
    pub data: Vec<u8>,
}

/// A single consensus protocol message as it crosses the wire.
///
/// `payload` is opaque to the transport; log entries and vote bookkeeping
/// are encoded inside it by the consensus engine on both ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsensusMessage {
    pub kind: MessageKind,
    pub term: u64,
    pub from: PeerId,
    pub to: PeerId,
    pub payload: Vec<u8>,
    pub snapshot: Option<SnapshotInfo>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessageCodecError {
    #[error("unsupported message frame version {0}")]
    UnsupportedFrameVersion(u8),
    #[error("unknown message kind tag {0}")]
    UnknownKind(u8),
    #[error("truncated message frame")]
    Truncated,
    #[error("{0} trailing bytes after message frame")]
    TrailingBytes(usize),
    #[error("invalid snapshot flag {0}")]
    InvalidSnapshotFlag(u8),
    #[error("{field} length {len} exceeds frame limit")]
    FieldTooLarge { field: &'static str, len: usize },
}

fn read_u8(bytes: &[u8], cursor: &mut usize) -> Result<u8, MessageCodecError> {
    let value = *bytes.get(*cursor).ok_or(MessageCodecError::Truncated)?;
    *cursor += 1;
    Ok(value)
}

fn read_u32_le(bytes: &[u8], cursor: &mut usize) -> Result<u32, MessageCodecError> {
    if bytes.len() < *cursor + 4 {
        return Err(MessageCodecError::Truncated);
    }
    let value = u32::from_le_bytes(
        bytes[*cursor..*cursor + 4]
            .try_into()
            .map_err(|_| MessageCodecError::Truncated)?,
    );
    *cursor += 4;
    Ok(value)
}

fn read_u64_le(bytes: &[u8], cursor: &mut usize) -> Result<u64, MessageCodecError> {
    if bytes.len() < *cursor + 8 {
        return Err(MessageCodecError::Truncated);
    }
    let value = u64::from_le_bytes(
        bytes[*cursor..*cursor + 8]
            .try_into()
            .map_err(|_| MessageCodecError::Truncated)?,
    );
    *cursor += 8;
    Ok(value)
}

fn read_bytes<'a>(
    bytes: &'a [u8],
    cursor: &mut usize,
    len: usize,
) -> Result<&'a [u8], MessageCodecError> {
    if bytes.len() < *cursor + len {
        return Err(MessageCodecError::Truncated);
    }
    let slice = &bytes[*cursor..*cursor + len];
    *cursor += len;
    Ok(slice)
}

fn push_len(buf: &mut Vec<u8>, field: &'static str, len: usize) -> Result<(), MessageCodecError> {
    let len32 =
        u32::try_from(len).map_err(|_| MessageCodecError::FieldTooLarge { field, len })?;
    buf.extend_from_slice(&len32.to_le_bytes());
    Ok(())
}

impl ConsensusMessage {
    pub fn heartbeat(term: u64, from: PeerId, to: PeerId) -> Self {
        Self {
            kind: MessageKind::Heartbeat,
            term,
            from,
            to,
            payload: Vec::new(),
            snapshot: None,
        }
    }

    /// Strips the snapshot payload, keeping its metadata. This is the form
    /// forwarded to the consensus engine after a snapshot body has been
    /// persisted, and the form sent as a transfer envelope.
    pub fn without_snapshot_data(&self) -> Self {
        let mut msg = self.clone();
        if let Some(snap) = msg.snapshot.as_mut() {
            snap.data = Vec::new();
        }
        msg
    }

    pub fn encode(&self) -> Result<Vec<u8>, MessageCodecError> {
        let mut buf = Vec::with_capacity(
            32 + self.payload.len()
                + self.snapshot.as_ref().map_or(0, |s| s.data.len() + 20),
        );
        buf.push(MESSAGE_FRAME_VERSION);
        buf.push(self.kind.tag());
        buf.extend_from_slice(&self.term.to_le_bytes());
        buf.extend_from_slice(&self.from.as_u64().to_le_bytes());
        buf.extend_from_slice(&self.to.as_u64().to_le_bytes());
        push_len(&mut buf, "payload", self.payload.len())?;
        buf.extend_from_slice(&self.payload);
        match &self.snapshot {
            None => buf.push(0),
            Some(snap) => {
                buf.push(1);
                buf.extend_from_slice(&snap.index.to_le_bytes());
                buf.extend_from_slice(&snap.term.to_le_bytes());
                push_len(&mut buf, "snapshot data", snap.data.len())?;
                buf.extend_from_slice(&snap.data);
            }
        }
        Ok(buf)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, MessageCodecError> {
        let mut cursor = 0usize;
        let version = read_u8(bytes, &mut cursor)?;
        if version != MESSAGE_FRAME_VERSION {
            return Err(MessageCodecError::UnsupportedFrameVersion(version));
        }
        let kind = MessageKind::from_tag(read_u8(bytes, &mut cursor)?)?;
        let term = read_u64_le(bytes, &mut cursor)?;
        let from = PeerId(read_u64_le(bytes, &mut cursor)?);
        let to = PeerId(read_u64_le(bytes, &mut cursor)?);
        let payload_len = read_u32_le(bytes, &mut cursor)? as usize;
        let payload = read_bytes(bytes, &mut cursor, payload_len)?.to_vec();
        let snapshot = match read_u8(bytes, &mut cursor)? {
            0 => None,
            1 => {
                let index = read_u64_le(bytes, &mut cursor)?;
                let snap_term = read_u64_le(bytes, &mut cursor)?;
                let data_len = read_u32_le(bytes, &mut cursor)? as usize;
                let data = read_bytes(bytes, &mut cursor, data_len)?.to_vec();
                Some(SnapshotInfo {
                    index,
                    term: snap_term,
                    data,
                })
            }
            other => return Err(MessageCodecError::InvalidSnapshotFlag(other)),
        };
        if cursor != bytes.len() {
            return Err(MessageCodecError::TrailingBytes(bytes.len() - cursor));
        }
        Ok(Self {
            kind,
            term,
            from,
            to,
            payload,
            snapshot,
        })
    }
}

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("io error reading envelope: {0}")]
    Io(#[from] io::Error),
    #[error("envelope length {0} exceeds {MAX_ENVELOPE_BYTES} bytes")]
    TooLarge(u32),
    #[error(transparent)]
    Frame(#[from] MessageCodecError),
}

/// Encodes `msg` in the length-prefixed form expected at the front of a
/// snapshot transfer body. The raw snapshot bytes follow separately.
pub fn encode_envelope(msg: &ConsensusMessage) -> Result<Vec<u8>, MessageCodecError> {
    let frame = msg.encode()?;
    let mut buf = Vec::with_capacity(4 + frame.len());
    push_len(&mut buf, "envelope", frame.len())?;
    buf.extend_from_slice(&frame);
    Ok(buf)
}

/// Reads a length-prefixed message envelope from `src`, consuming exactly
/// the prefix and the frame. Bytes after the frame (the raw snapshot
/// payload on the transfer path) are left unread in `src`.
pub fn read_envelope(src: &mut dyn Read) -> Result<ConsensusMessage, EnvelopeError> {
    let mut len_bytes = [0u8; 4];
    src.read_exact(&mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes);
    if len as usize > MAX_ENVELOPE_BYTES {
        return Err(EnvelopeError::TooLarge(len));
    }
    let mut frame = vec![0u8; len as usize];
    src.read_exact(&mut frame)?;
    Ok(ConsensusMessage::decode(&frame)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample() -> ConsensusMessage {
        ConsensusMessage {
            kind: MessageKind::AppendEntries,
            term: 9,
            from: PeerId(0xa),
            to: PeerId(0xb),
            payload: b"three entries".to_vec(),
            snapshot: None,
        }
    }

    #[test]
    fn round_trips_plain_message() {
        let msg = sample();
        let decoded = ConsensusMessage::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn round_trips_snapshot_message() {
        let msg = ConsensusMessage {
            kind: MessageKind::Snapshot,
            term: 4,
            from: PeerId(1),
            to: PeerId(2),
            payload: Vec::new(),
            snapshot: Some(SnapshotInfo {
                index: 77,
                term: 3,
                data: vec![0xab; 257],
            }),
        };
        let decoded = ConsensusMessage::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn rejects_unknown_kind_tag() {
        let mut bytes = sample().encode().unwrap();
        bytes[1] = 99;
        assert_eq!(
            ConsensusMessage::decode(&bytes),
            Err(MessageCodecError::UnknownKind(99))
        );
    }

    #[test]
    fn rejects_unsupported_frame_version() {
        let mut bytes = sample().encode().unwrap();
        bytes[0] = 2;
        assert_eq!(
            ConsensusMessage::decode(&bytes),
            Err(MessageCodecError::UnsupportedFrameVersion(2))
        );
    }

    #[test]
    fn rejects_truncated_and_padded_frames() {
        let bytes = sample().encode().unwrap();
        assert_eq!(
            ConsensusMessage::decode(&bytes[..bytes.len() - 1]),
            Err(MessageCodecError::Truncated)
        );
        let mut padded = bytes;
        padded.push(0);
        assert_eq!(
            ConsensusMessage::decode(&padded),
            Err(MessageCodecError::TrailingBytes(1))
        );
    }

    #[test]
    fn envelope_reader_leaves_trailing_bytes_unread() {
        let msg = ConsensusMessage {
            kind: MessageKind::Snapshot,
            term: 2,
            from: PeerId(5),
            to: PeerId(6),
            payload: Vec::new(),
            snapshot: Some(SnapshotInfo {
                index: 11,
                term: 2,
                data: Vec::new(),
            }),
        };
        let mut body = encode_envelope(&msg).unwrap();
        body.extend_from_slice(b"raw snapshot bytes");
        let mut src = Cursor::new(body);
        let decoded = read_envelope(&mut src).unwrap();
        assert_eq!(decoded, msg);
        let mut rest = Vec::new();
        src.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"raw snapshot bytes");
    }

    #[test]
    fn envelope_reader_caps_prefix_length() {
        let mut body = Vec::new();
        body.extend_from_slice(&(MAX_ENVELOPE_BYTES as u32 + 1).to_le_bytes());
        body.extend_from_slice(&[0u8; 16]);
        match read_envelope(&mut Cursor::new(body)) {
            Err(EnvelopeError::TooLarge(len)) => {
                assert_eq!(len as usize, MAX_ENVELOPE_BYTES + 1);
            }
            other => panic!("expected TooLarge, got {other:?}"),
        }
    }

    #[test]
    fn without_snapshot_data_keeps_metadata() {
        let msg = ConsensusMessage {
            kind: MessageKind::Snapshot,
            term: 8,
            from: PeerId(3),
            to: PeerId(4),
            payload: Vec::new(),
            snapshot: Some(SnapshotInfo {
                index: 42,
                term: 7,
                data: vec![1, 2, 3],
            }),
        };
        let stripped = msg.without_snapshot_data();
        let snap = stripped.snapshot.unwrap();
        assert_eq!(snap.index, 42);
        assert_eq!(snap.term, 7);
        assert!(snap.data.is_empty());
    }
}
