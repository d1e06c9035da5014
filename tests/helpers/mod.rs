//! Shared harness for end-to-end tests: a live server on an ephemeral port
//! plus a minimal text-event-stream reader.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use ask4me::config::Config;
use ask4me::event::EventType;
use ask4me::http::{self, AppState};
use ask4me::hub::EventHub;
use ask4me::lifecycle::Engine;
use ask4me::notify::Notifier;
use ask4me::store::Store;

pub const API_KEY: &str = "test-api-key";

/// A running service instance. The engine handle reads the same store the
/// server writes, which lets tests discover interaction URLs the way a
/// notification channel would.
pub struct TestServer {
    pub base: String,
    pub client: reqwest::Client,
    pub engine: Engine,
}

/// Spawns a server. `with_channel` wires a notifier that always succeeds
/// (`true` as the notifier binary); without it every request terminates
/// with `notify.failed`.
pub async fn spawn(with_channel: bool, heartbeat: Duration) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let base = format!("http://{addr}");

    let mut cfg = Config {
        base_url: base.clone(),
        api_key: API_KEY.to_string(),
        serverchan_sendkey: String::new(),
        apprise_urls: if with_channel {
            vec!["ntfy://e2e-topic".to_string()]
        } else {
            Vec::new()
        },
        apprise_bin: "true".to_string(),
        sqlite_path: String::new(),
        default_expires_in_seconds: 3600,
        sse_heartbeat_interval_seconds: heartbeat.as_secs().max(1),
        listen_addr: String::new(),
        terminal_cache_seconds: 60,
    };
    cfg.normalize().expect("normalize");

    let store = Arc::new(Store::open_in_memory().expect("store"));
    let hub = EventHub::new(Duration::from_secs(cfg.terminal_cache_seconds));
    hub.start_sweeper();
    let notifier = Arc::new(Notifier::from_config(&cfg));
    let engine = Engine::new(
        store,
        hub,
        notifier,
        cfg.base_url.clone(),
        cfg.default_expires_in_seconds,
    );

    let state = AppState {
        engine: engine.clone(),
        api_key: cfg.api_key.clone(),
        heartbeat_interval: heartbeat,
    };
    tokio::spawn(http::serve(listener, http::router(state)));

    TestServer {
        base,
        client: reqwest::Client::new(),
        engine,
    }
}

impl TestServer {
    /// Polls the event log for the request's interaction URL, the same URL
    /// a notification would carry.
    pub async fn interaction_url(&self, request_id: &str) -> String {
        for _ in 0..100 {
            let events = self
                .engine
                .store()
                .list_events_after(request_id, None)
                .expect("list events");
            if let Some(url) = events
                .iter()
                .find(|e| e.event_type == EventType::RequestCreated)
                .and_then(|e| e.data["interaction_url"].as_str())
            {
                return url.to_string();
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("request.created never appeared for {request_id}");
    }

    /// The token embedded in the interaction URL.
    pub async fn token_for(&self, request_id: &str) -> String {
        let url = self.interaction_url(request_id).await;
        url.split("?k=")
            .nth(1)
            .expect("interaction URL carries ?k=")
            .to_string()
    }

    /// Simulates the browser form post.
    pub async fn submit_form(
        &self,
        request_id: &str,
        token: &str,
        action: &str,
        text: &str,
    ) -> reqwest::Response {
        self.client
            .post(format!("{}/r/{}/submit?k={}", self.base, request_id, token))
            .form(&[("action", action), ("text", text)])
            .send()
            .await
            .expect("submit form")
    }
}

/// Incremental reader over a `text/event-stream` response body.
pub struct SseReader {
    response: reqwest::Response,
    buffer: String,
}

impl SseReader {
    pub fn new(response: reqwest::Response) -> Self {
        Self {
            response,
            buffer: String::new(),
        }
    }

    /// Next `data:` payload, or `None` once the stream ends.
    pub async fn next_data(&mut self) -> Option<String> {
        loop {
            if let Some(end) = self.buffer.find("\n\n") {
                let frame = self.buffer[..end].to_string();
                self.buffer.drain(..end + 2);
                for line in frame.lines() {
                    if let Some(data) = line.strip_prefix("data: ") {
                        return Some(data.to_string());
                    }
                }
                continue;
            }
            match self.response.chunk().await {
                Ok(Some(bytes)) => self.buffer.push_str(&String::from_utf8_lossy(&bytes)),
                Ok(None) | Err(_) => return None,
            }
        }
    }

    /// Next non-heartbeat event as JSON, or `None` at `[DONE]`/stream end.
    pub async fn next_event(&mut self) -> Option<serde_json::Value> {
        loop {
            let data = self.next_data().await?;
            if data == "[DONE]" {
                return None;
            }
            let value: serde_json::Value = serde_json::from_str(&data).ok()?;
            if value["type"] == "heartbeat" {
                continue;
            }
            return Some(value);
        }
    }
}
