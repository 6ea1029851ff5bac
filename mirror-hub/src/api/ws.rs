use crate::protocol::{ClientMessage, ServerMessage};
use axum::extract::ws::{Message, WebSocket};
use futures::StreamExt;
use mirror_hub_core::{MirrorHub, MirrorKey, MirrorUpdate};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Frames queued per socket before forwarders start waiting.
const OUTBOX: usize = 256;

fn text(msg: &ServerMessage) -> Option<Message> {
    serde_json::to_string(msg).ok().map(|s| Message::Text(s.into()))
}

fn update_frame(update: MirrorUpdate) -> ServerMessage {
    ServerMessage::DataUpdate {
        path: update.key.to_string(),
        data: update.document.to_json(),
    }
}

/// Serve one client socket. Each subscription gets a forwarding task that
/// feeds the shared outbox; the socket loop drains it.
pub(super) async fn handle_socket(mut socket: WebSocket, hub: Arc<MirrorHub>) {
    let (out_tx, mut out_rx) = mpsc::channel::<ServerMessage>(OUTBOX);
    let mut forwarders: HashMap<MirrorKey, JoinHandle<()>> = HashMap::new();

    loop {
        tokio::select! {
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(body))) => {
                        match serde_json::from_str::<ClientMessage>(body.as_str()) {
                            Ok(request) => handle_request(request, &hub, &out_tx, &mut forwarders).await,
                            Err(e) => {
                                let _ = out_tx.try_send(ServerMessage::Error {
                                    message: format!("malformed message: {e}"),
                                });
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    _ => {}
                }
            }
            Some(frame) = out_rx.recv() => {
                let Some(frame) = text(&frame) else { continue };
                if socket.send(frame).await.is_err() {
                    break;
                }
            }
        }
    }

    for (_, task) in forwarders.drain() {
        task.abort();
    }
    debug!("websocket closed");
}

async fn handle_request(
    request: ClientMessage,
    hub: &MirrorHub,
    out: &mpsc::Sender<ServerMessage>,
    forwarders: &mut HashMap<MirrorKey, JoinHandle<()>>,
) {
    match request {
        ClientMessage::Subscribe { path } => match hub.gateway().subscribe(&path).await {
            Ok(sub) => {
                let key = sub.key().clone();
                let out = out.clone();
                let task = tokio::spawn(async move {
                    let mut updates = Box::pin(sub.into_stream());
                    while let Some(update) = updates.next().await {
                        if out.send(update_frame(update)).await.is_err() {
                            break;
                        }
                    }
                });
                // a repeated subscribe replaces the old feed
                if let Some(old) = forwarders.insert(key, task) {
                    old.abort();
                }
            }
            Err(e) => {
                warn!(%path, error = %e, "subscribe rejected");
                let _ = out.try_send(ServerMessage::Error {
                    message: format!("cannot subscribe to {path}: {e}"),
                });
            }
        },
        ClientMessage::Unsubscribe { path } => {
            if let Ok(key) = path.parse::<MirrorKey>() {
                if let Some(task) = forwarders.remove(&key) {
                    task.abort();
                    debug!(%key, "unsubscribed");
                }
            }
        }
    }
}
