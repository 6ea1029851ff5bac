use super::RemoteStore;
use crate::error::RemoteError;
use crate::value::Node;
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// REST client for a realtime-database style remote, where every path is
/// addressable as `{base}/{path}.json`.
#[derive(Clone)]
pub struct HttpRemote {
    client: Client,
    base: String,
}

impl HttpRemote {
    pub fn new(base: impl Into<String>, timeout: Duration) -> Result<Self, RemoteError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base: base.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}.json", self.base, path.trim_matches('/'))
    }

    async fn check(resp: Response) -> Result<Response, RemoteError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(RemoteError::Rejected(format!("{}: {}", status, body)))
    }
}

fn classify(err: reqwest::Error) -> RemoteError {
    if err.is_timeout() {
        RemoteError::Timeout
    } else if err.is_connect() {
        RemoteError::Unreachable
    } else {
        RemoteError::Transport(err)
    }
}

#[async_trait]
impl RemoteStore for HttpRemote {
    async fn read_at(&self, path: &str) -> Result<Option<Node>, RemoteError> {
        let resp = self.client.get(self.url(path)).send().await.map_err(classify)?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let value: Value = Self::check(resp).await?.json().await.map_err(classify)?;
        Ok(Node::from_json(value))
    }

    async fn write_at(&self, path: &str, value: Option<&Node>) -> Result<(), RemoteError> {
        let url = self.url(path);
        let req = match value {
            Some(node) => self.client.put(&url).json(&node.to_json()),
            None => self.client.delete(&url),
        };
        let resp = req.send().await.map_err(classify)?;
        Self::check(resp).await?;
        debug!(path, deleted = value.is_none(), "remote write accepted");
        Ok(())
    }

    async fn is_reachable(&self) -> bool {
        let url = format!("{}/.json", self.base);
        match self
            .client
            .get(url)
            .query(&[("shallow", "true")])
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!(error = %e, "remote probe failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_json_urls() {
        let remote = HttpRemote::new("https://example.test/", Duration::from_secs(1)).unwrap();
        assert_eq!(
            remote.url("sections/101/attendance"),
            "https://example.test/sections/101/attendance.json"
        );
        assert_eq!(remote.url("/config/"), "https://example.test/config.json");
    }

    #[tokio::test]
    async fn unreachable_host_reports_false() {
        // port 9 (discard) on localhost is closed in test environments
        let remote = HttpRemote::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        assert!(!remote.is_reachable().await);
        assert!(remote.write_at("config", None).await.is_err());
    }
}
