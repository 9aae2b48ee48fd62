use crate::message::MessageKind;
use crate::stream::StreamType;
use crate::types::{ClusterId, PeerId};
use log::{info, warn};

/// Observability sink for the transport handlers.
///
/// Handlers never log through a global; they emit through an instance of
/// this trait wired in at construction. The production implementation is
/// [`LogObserver`]; tests install recording implementations.
pub trait TransportObserver: Send + Sync {
    fn version_incompatible(&self, sender: &str, detail: &str);
    fn cluster_mismatch(&self, got: &str, want: ClusterId);
    fn decode_failed(&self, path: &'static str, detail: &str);
    fn unexpected_message_kind(&self, kind: MessageKind);
    fn snapshot_saved(&self, index: u64, from: PeerId);
    fn snapshot_save_failed(&self, index: u64, detail: &str);
    fn engine_failed(&self, detail: &str);
    fn stream_rejected(&self, path: &str, reason: &str);
    fn stream_attached(&self, peer: PeerId, stream_type: StreamType);
}

/// Emits transport events through the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl TransportObserver for LogObserver {
    fn version_incompatible(&self, sender: &str, detail: &str) {
        warn!("event=version_incompatible sender={sender} detail={detail}");
    }

    fn cluster_mismatch(&self, got: &str, want: ClusterId) {
        warn!("event=cluster_mismatch got={got} want={want}");
    }

    fn decode_failed(&self, path: &'static str, detail: &str) {
        warn!("event=message_decode_failed path={path} detail={detail}");
    }

    fn unexpected_message_kind(&self, kind: MessageKind) {
        warn!(
            "event=unexpected_message_kind kind={} path=snapshot",
            kind.name()
        );
    }

    fn snapshot_saved(&self, index: u64, from: PeerId) {
        info!("event=snapshot_saved index={index} from={from}");
    }

    fn snapshot_save_failed(&self, index: u64, detail: &str) {
        warn!("event=snapshot_save_failed index={index} detail={detail}");
    }

    fn engine_failed(&self, detail: &str) {
        warn!("event=engine_process_failed detail={detail}");
    }

    fn stream_rejected(&self, path: &str, reason: &str) {
        warn!("event=stream_rejected path={path} reason={reason}");
    }

    fn stream_attached(&self, peer: PeerId, stream_type: StreamType) {
        info!("event=stream_attached peer={peer} type=\"{stream_type}\"");
    }
}
