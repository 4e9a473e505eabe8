//! Per-socket write side: a serialized writer task fed by a channel.

use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::SinkExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::protocol::Envelope;

/// Cloneable send side of one connection. Sends are best-effort: a closed or
/// failing socket drops the frame with a log line and never stalls the
/// caller.
#[derive(Clone)]
pub struct ConnectionHandle {
    tx: mpsc::UnboundedSender<Message>,
}

impl ConnectionHandle {
    pub fn send(&self, envelope: &Envelope) {
        let frame = envelope.encode();
        trace!("enqueue {} frame: {}", envelope.kind, frame);
        if self.tx.send(Message::Text(frame)).is_err() {
            debug!("dropping {} frame: connection writer gone", envelope.kind);
        }
    }

    pub fn close(&self) {
        let _ = self.tx.send(Message::Close(None));
    }
}

/// Spawn the writer task for one socket. Frames queued on the returned handle
/// are written in order; writes for one connection never interleave.
pub fn spawn_writer(mut sink: SplitSink<WebSocket, Message>) -> (ConnectionHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if sink.send(msg).await.is_err() {
                debug!("connection write failed, stopping writer");
                break;
            }
            if closing {
                break;
            }
        }
    });
    (ConnectionHandle { tx }, task)
}

#[cfg(test)]
pub(crate) fn test_handle() -> (ConnectionHandle, mpsc::UnboundedReceiver<Message>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ConnectionHandle { tx }, rx)
}
