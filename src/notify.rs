//! Notification dispatch and outcome classification.
//!
//! One operation: send `(title, body, interaction_url)` over the configured
//! channel and classify the result. A success is non-terminal (`notify.sent`);
//! any failure, including "no channel configured", is terminal
//! (`notify.failed`). The notifier never returns an error to its caller; it
//! always classifies.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::Config;

/// Combined subprocess output kept in diagnostics, in bytes.
const OUTPUT_CAP: usize = 2048;

const SERVERCHAN_ENDPOINT: &str = "https://sctapi.ftqq.com";

/// Classified outcome of a dispatch attempt. The payload becomes the event
/// payload verbatim; failures carry an `error` field.
#[derive(Debug)]
pub enum NotifyReport {
    Sent { payload: Value },
    Failed { payload: Value },
}

#[derive(Debug, Serialize, Deserialize)]
struct ServerChanReply {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

/// Dispatches notifications over the push gateway or the notifier binary.
pub struct Notifier {
    sendkey: String,
    apprise_urls: Vec<String>,
    apprise_bin: String,
    http: reqwest::Client,
}

impl Notifier {
    #[must_use]
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            sendkey: cfg.serverchan_sendkey.trim().to_string(),
            apprise_urls: cfg.apprise_urls.clone(),
            apprise_bin: cfg.apprise_bin.clone(),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
        }
    }

    /// Sends the notification and classifies the outcome.
    ///
    /// The message is the trimmed body (or a default placeholder) with the
    /// interaction URL appended on its own paragraph.
    pub async fn dispatch(&self, title: &str, body: &str, interaction_url: &str) -> NotifyReport {
        let mut message = body.trim().to_string();
        if message.is_empty() {
            message = "Please respond.".to_string();
        }
        if !interaction_url.is_empty() {
            message = format!("{message}\n\n{interaction_url}");
        }

        if !self.sendkey.is_empty() {
            return self.send_serverchan(title, &message).await;
        }
        if !self.apprise_urls.is_empty() {
            return self.send_apprise(title, &message).await;
        }
        NotifyReport::Failed {
            payload: json!({
                "error": "no serverchan_sendkey or apprise_urls configured",
            }),
        }
    }

    async fn send_serverchan(&self, title: &str, message: &str) -> NotifyReport {
        let url = format!("{SERVERCHAN_ENDPOINT}/{}.send", self.sendkey);
        let result = self
            .http
            .post(&url)
            .form(&[("title", title), ("desp", message), ("tags", "ask4me")])
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(err) => {
                warn!(error = %err, "serverchan dispatch failed");
                return NotifyReport::Failed {
                    payload: json!({
                        "channel": "serverchan",
                        "error": err.to_string(),
                    }),
                };
            }
        };

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return NotifyReport::Failed {
                payload: json!({
                    "channel": "serverchan",
                    "error": format!("serverchan http status {status}"),
                    "output": truncate(&text, OUTPUT_CAP),
                }),
            };
        }

        let reply: ServerChanReply = match response.json().await {
            Ok(reply) => reply,
            Err(err) => {
                return NotifyReport::Failed {
                    payload: json!({
                        "channel": "serverchan",
                        "error": format!("serverchan reply unparseable: {err}"),
                    }),
                }
            }
        };
        if reply.code != 0 {
            let output = serde_json::to_string(&reply).unwrap_or_default();
            return NotifyReport::Failed {
                payload: json!({
                    "channel": "serverchan",
                    "error": format!("serverchan code {}: {}", reply.code, reply.message),
                    "output": truncate(&output, OUTPUT_CAP),
                }),
            };
        }

        debug!("serverchan notification sent");
        NotifyReport::Sent {
            payload: json!({ "channel": "serverchan" }),
        }
    }

    async fn send_apprise(&self, title: &str, message: &str) -> NotifyReport {
        let mut args: Vec<String> = vec![
            "-vv".to_string(),
            "--title".to_string(),
            title.to_string(),
            "--body".to_string(),
            message.to_string(),
        ];
        for raw in &self.apprise_urls {
            let url = normalize_apprise_url(raw);
            if !url.is_empty() {
                args.push(url);
            }
        }
        let command_sh = format_shell_command(&self.apprise_bin, &args);

        let output = Command::new(&self.apprise_bin).args(&args).output().await;
        match output {
            Ok(output) => {
                let mut combined = output.stdout;
                combined.extend_from_slice(&output.stderr);
                let combined = String::from_utf8_lossy(&combined).into_owned();
                let diagnostics = json!({
                    "channel": "apprise",
                    "command": command_sh,
                    "command_sh": command_sh,
                    "command_args": args,
                });
                if output.status.success() {
                    debug!(command = %command_sh, "apprise notification sent");
                    NotifyReport::Sent {
                        payload: diagnostics,
                    }
                } else {
                    let mut payload = diagnostics;
                    payload["error"] = json!(format!("apprise exited with {}", output.status));
                    payload["output"] = json!(truncate(&combined, OUTPUT_CAP));
                    warn!(command = %command_sh, status = %output.status, "apprise failed");
                    NotifyReport::Failed { payload }
                }
            }
            Err(err) => {
                warn!(command = %command_sh, error = %err, "apprise could not be run");
                NotifyReport::Failed {
                    payload: json!({
                        "channel": "apprise",
                        "error": err.to_string(),
                        "command": command_sh,
                        "command_sh": command_sh,
                        "command_args": args,
                    }),
                }
            }
        }
    }
}

/// Rewrites the `serverchan://` scheme alias to the notifier's `schan://`.
fn normalize_apprise_url(raw: &str) -> String {
    let url = raw.trim();
    let prefix = "serverchan://";
    if url.len() >= prefix.len() && url[..prefix.len()].eq_ignore_ascii_case(prefix) {
        return format!("schan://{}", &url[prefix.len()..]);
    }
    url.to_string()
}

fn shell_quote(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Reconstructs the invocation as a copy-pasteable shell line for
/// diagnostics.
fn format_shell_command(bin: &str, args: &[String]) -> String {
    let mut parts = vec![shell_quote(bin)];
    parts.extend(args.iter().map(|a| shell_quote(a)));
    parts.join(" ")
}

fn truncate(s: &str, cap: usize) -> String {
    if s.len() <= cap {
        return s.to_string();
    }
    let mut end = cap;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}
