//! Reconnecting client for a mirror-hub server.
//!
//! Reads arrive over one WebSocket; writes go over HTTP. The client keeps a
//! registry of active subscriptions and replays it after every (re)connect,
//! so callers never notice a dropped socket beyond a fresh snapshot.

use crate::api::{MirrorView, WriteResponse};
use crate::protocol::{ClientMessage, ServerMessage};
use anyhow::{anyhow, bail, Context, Result};
use futures::{SinkExt, StreamExt};
use mirror_hub_core::MirrorKey;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use uuid::Uuid;

type Registry = Arc<Mutex<HashMap<MirrorKey, broadcast::Sender<Value>>>>;

#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Server base URL, e.g. `http://127.0.0.1:3000`.
    pub base_url: String,
    pub reconnect_delay: Duration,
    /// Documents buffered per subscription.
    pub buffer: usize,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            reconnect_delay: Duration::from_millis(500),
            buffer: 64,
        }
    }

    fn ws_url(&self) -> String {
        if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{rest}/ws")
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{rest}/ws")
        } else {
            format!("ws://{}/ws", self.base_url)
        }
    }
}

pub struct MirrorClient {
    config: ClientConfig,
    http: reqwest::Client,
    registry: Registry,
    commands: mpsc::UnboundedSender<ClientMessage>,
    connected: watch::Receiver<bool>,
    task: JoinHandle<()>,
}

impl MirrorClient {
    /// Start the client. The socket connects in the background and keeps
    /// retrying until the client is dropped.
    pub fn connect(config: ClientConfig) -> Self {
        let registry: Registry = Arc::new(Mutex::new(HashMap::new()));
        let (commands, rx) = mpsc::unbounded_channel();
        let (connected_tx, connected) = watch::channel(false);
        let task = tokio::spawn(run_socket(
            config.ws_url(),
            config.reconnect_delay,
            registry.clone(),
            rx,
            connected_tx,
        ));
        Self {
            config,
            http: reqwest::Client::new(),
            registry,
            commands,
            connected,
            task,
        }
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Wait until the socket is up, or give up after `timeout`.
    pub async fn wait_connected(&self, timeout: Duration) -> bool {
        let mut connected = self.connected.clone();
        tokio::time::timeout(timeout, connected.wait_for(|up| *up))
            .await
            .map(|res| res.is_ok())
            .unwrap_or(false)
    }

    /// Receive every document of the mirror `key`, starting with its current
    /// state. The subscription survives reconnects.
    pub fn subscribe(&self, key: &str) -> Result<broadcast::Receiver<Value>> {
        let key: MirrorKey = key.parse()?;
        let rx = {
            let mut registry = self.registry.lock();
            match registry.get(&key) {
                Some(tx) => tx.subscribe(),
                None => {
                    let (tx, rx) = broadcast::channel(self.config.buffer.max(1));
                    registry.insert(key.clone(), tx);
                    rx
                }
            }
        };
        // ask again even for a known key so the new receiver gets a snapshot
        let _ = self.commands.send(ClientMessage::Subscribe {
            path: key.to_string(),
        });
        Ok(rx)
    }

    pub fn unsubscribe(&self, key: &str) {
        let Ok(key) = key.parse::<MirrorKey>() else {
            return;
        };
        if self.registry.lock().remove(&key).is_some() {
            let _ = self.commands.send(ClientMessage::Unsubscribe {
                path: key.to_string(),
            });
        }
    }

    /// Write `value` at `path`; `Value::Null` deletes.
    pub async fn set(&self, path: &str, value: Value) -> Result<()> {
        let resp = self
            .http
            .post(format!("{}/api/write", self.config.base_url))
            .json(&json!({ "path": path, "value": value }))
            .send()
            .await
            .context("sending write")?;
        let status = resp.status();
        if !status.is_success() {
            let body: Value = resp.json().await.unwrap_or(Value::Null);
            let reason = body["error"].as_str().unwrap_or("unknown error").to_string();
            bail!("write to {path} failed with {status}: {reason}");
        }
        let ack: WriteResponse = resp.json().await?;
        if !ack.success {
            bail!("write to {path} was not accepted");
        }
        Ok(())
    }

    pub async fn remove(&self, path: &str) -> Result<()> {
        self.set(path, Value::Null).await
    }

    /// Add `value` under `parent` with a generated child id; returns the id.
    pub async fn push(&self, parent: &str, value: Value) -> Result<String> {
        let id = Uuid::new_v4().simple().to_string();
        self.set(&format!("{}/{}", parent.trim_end_matches('/'), id), value)
            .await?;
        Ok(id)
    }

    /// One-off read of a mirror from the server's local store.
    pub async fn read(&self, key: &str) -> Result<Value> {
        let resp = self
            .http
            .get(format!("{}/api/read", self.config.base_url))
            .query(&[("path", key)])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(anyhow!("read of {key} failed with {}", resp.status()));
        }
        let view: MirrorView = resp.json().await?;
        Ok(view.data)
    }
}

impl Drop for MirrorClient {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_socket(
    url: String,
    delay: Duration,
    registry: Registry,
    mut commands: mpsc::UnboundedReceiver<ClientMessage>,
    connected: watch::Sender<bool>,
) {
    loop {
        let mut socket = match connect_async(url.as_str()).await {
            Ok((socket, _)) => socket,
            Err(e) => {
                debug!(%url, error = %e, "connect failed, retrying");
                tokio::time::sleep(delay).await;
                continue;
            }
        };
        info!(%url, "connected to mirror hub");

        // anything queued while offline is covered by the registry replay
        while commands.try_recv().is_ok() {}
        let keys: Vec<MirrorKey> = registry.lock().keys().cloned().collect();
        let mut healthy = true;
        for key in keys {
            let frame = ClientMessage::Subscribe {
                path: key.to_string(),
            };
            if send(&mut socket, &frame).await.is_err() {
                healthy = false;
                break;
            }
        }
        connected.send_replace(healthy);

        while healthy {
            tokio::select! {
                msg = socket.next() => match msg {
                    Some(Ok(Message::Text(body))) => dispatch(&registry, body.as_str()),
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => healthy = false,
                    Some(Ok(_)) => {}
                },
                cmd = commands.recv() => match cmd {
                    Some(frame) => {
                        if send(&mut socket, &frame).await.is_err() {
                            healthy = false;
                        }
                    }
                    None => {
                        let _ = socket.close(None).await;
                        connected.send_replace(false);
                        return;
                    }
                },
            }
        }

        connected.send_replace(false);
        warn!(%url, "connection to mirror hub lost, reconnecting");
        tokio::time::sleep(delay).await;
    }
}

async fn send<S>(socket: &mut S, frame: &ClientMessage) -> Result<()>
where
    S: futures::Sink<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    let body = serde_json::to_string(frame)?;
    socket.send(Message::Text(body.into())).await?;
    Ok(())
}

fn dispatch(registry: &Registry, body: &str) {
    match serde_json::from_str::<ServerMessage>(body) {
        Ok(ServerMessage::DataUpdate { path, data }) => {
            let Ok(key) = path.parse::<MirrorKey>() else {
                return;
            };
            if let Some(tx) = registry.lock().get(&key) {
                let _ = tx.send(data);
            }
        }
        Ok(ServerMessage::Error { message }) => warn!(%message, "server rejected request"),
        Err(e) => debug!(error = %e, "ignoring malformed frame"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_url_follows_scheme() {
        assert_eq!(ClientConfig::new("http://127.0.0.1:3000/").ws_url(), "ws://127.0.0.1:3000/ws");
        assert_eq!(ClientConfig::new("https://hub.example").ws_url(), "wss://hub.example/ws");
    }

    #[tokio::test]
    async fn subscribe_rejects_non_mirror_path() {
        let client = MirrorClient::connect(ClientConfig::new("http://127.0.0.1:9"));
        assert!(client.subscribe("sections/1/students/s1").is_err());
        assert!(client.subscribe("sections/1/students").is_ok());
        assert!(!client.is_connected());
    }
}
