// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Out-of-band alert delivery.
//!
//! Reports are rendered as embeds: a title, a description and one field
//! per subject. The webhook sink posts them in the chat-webhook JSON shape;
//! the log sink writes them through `tracing`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::metrics::MetricsSnapshot;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);
const WEBHOOK_USERNAME: &str = "marvin";
const WARNING_COLOR: u32 = 0xe7_4c_3c;
const SUMMARY_COLOR: u32 = 0x34_98_db;

/// Error type for alert delivery.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Failed to build HTTP client: {0}")]
    Client(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Webhook rejected report ({status}): {body}")]
    Rejected { status: u16, body: String },
}

/// Something worth telling a human about.
#[derive(Debug, Clone, PartialEq)]
pub enum Report {
    /// A subject crossed a threshold.
    MetricsWarning {
        description: String,
        snapshot: MetricsSnapshot,
    },
    /// Once-a-day overview.
    DailySummary {
        description: String,
        system: MetricsSnapshot,
        subjects: Vec<MetricsSnapshot>,
    },
}

/// A rendered report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Embed {
    pub title: String,
    pub description: String,
    pub color: u32,
    pub fields: Vec<EmbedField>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

impl EmbedField {
    fn new(who: &str, value: String) -> Self {
        Self {
            name: format!("Data for {}:", who),
            value,
            inline: false,
        }
    }
}

impl Report {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MetricsWarning { .. } => "metrics_warning",
            Self::DailySummary { .. } => "daily_metrics",
        }
    }

    pub fn render(&self) -> Embed {
        match self {
            Self::MetricsWarning {
                description,
                snapshot,
            } => Embed {
                title: "WARNING".to_string(),
                description: description.clone(),
                color: WARNING_COLOR,
                fields: vec![EmbedField::new(&snapshot.who, render_warning(snapshot))],
            },
            Self::DailySummary {
                description,
                system,
                subjects,
            } => {
                let mut fields = vec![EmbedField::new(
                    &system.who,
                    format!(
                        "CPU: {:.2}%\nRAM: {:.2}%\n",
                        system.cpu.unwrap_or(0.0),
                        system.memory.unwrap_or(0.0)
                    ),
                )];
                fields.extend(
                    subjects
                        .iter()
                        .map(|s| EmbedField::new(&s.who, render_summary(s))),
                );
                Embed {
                    title: "Daily Summary:".to_string(),
                    description: description.clone(),
                    color: SUMMARY_COLOR,
                    fields,
                }
            }
        }
    }
}

fn render_warning(snapshot: &MetricsSnapshot) -> String {
    format!(
        "CPU:  {:.2}%\nRAM:  {:.2}%\nIO:   {}\nPING: \n--socket:   {:.4}\n--platform: {:.4}",
        snapshot.cpu.unwrap_or(0.0),
        snapshot.memory.unwrap_or(0.0),
        snapshot.io_bytes.map(|io| io.total()).unwrap_or(0),
        snapshot.socket_ping.unwrap_or(0.0),
        snapshot.platform_ping.unwrap_or(0.0),
    )
}

fn render_summary(snapshot: &MetricsSnapshot) -> String {
    let mut out = String::new();
    if let Some(uptime) = snapshot.uptime() {
        let state = if snapshot.stopped_at.is_some() {
            "stopped"
        } else {
            "running"
        };
        out.push_str(&format!("Duration ({}): {}\n", state, format_duration(uptime)));
    }
    if let Some(cpu) = snapshot.cpu {
        out.push_str(&format!("CPU: {:.2}%\n", cpu));
    }
    if let Some(memory) = snapshot.memory {
        out.push_str(&format!("RAM: {:.2}%\n", memory));
    }
    if let Some(io) = snapshot.io_bytes {
        out.push_str(&format!(
            "IO: \n--{:.3} MB read\n--{:.3} MB written\n",
            io.read as f64 / 1_000_000.0,
            io.write as f64 / 1_000_000.0
        ));
    }
    if let Some(ping) = snapshot.platform_ping {
        out.push_str(&format!("Platform ping: {:.1}ms\n", ping * 1000.0));
    }
    if let Some(ping) = snapshot.socket_ping {
        out.push_str(&format!("Socket ping: {:.1}ms\n", ping * 1000.0));
    }
    if out.is_empty() {
        out.push_str("No data to report.");
    }
    out
}

fn format_duration(duration: chrono::Duration) -> String {
    let secs = duration.num_seconds().max(0);
    format!("{}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// Destination for reports.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn report(&self, report: &Report) -> Result<(), NotifyError>;

    /// Release resources. Called once at shutdown.
    async fn close(&self) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// Writes reports to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl AlertSink for LogSink {
    async fn report(&self, report: &Report) -> Result<(), NotifyError> {
        let embed = report.render();
        let body = embed
            .fields
            .iter()
            .map(|f| format!("{}\n{}", f.name, f.value))
            .collect::<Vec<_>>()
            .join("\n");
        match report {
            Report::MetricsWarning { .. } => warn!(kind = report.kind(), "{} {}\n{}", embed.title, embed.description, body),
            Report::DailySummary { .. } => info!(kind = report.kind(), "{} {}\n{}", embed.title, embed.description, body),
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    username: &'a str,
    embeds: Vec<Embed>,
}

/// Posts reports to a chat webhook.
pub struct WebhookSink {
    client: Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>) -> Result<Self, NotifyError> {
        let client = Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .map_err(|e| NotifyError::Client(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl AlertSink for WebhookSink {
    async fn report(&self, report: &Report) -> Result<(), NotifyError> {
        debug!(kind = report.kind(), "Sending webhook report");
        let payload = WebhookPayload {
            username: WEBHOOK_USERNAME,
            embeds: vec![report.render()],
        };

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotifyError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::metrics::IoBytes;
    use chrono::Local;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn warning() -> Report {
        Report::MetricsWarning {
            description: "bulbe: 1 values exceeded threshold.".into(),
            snapshot: MetricsSnapshot {
                who: "bulbe".into(),
                cpu: Some(42.0),
                memory: Some(3.5),
                io_bytes: Some(IoBytes { read: 5, write: 6 }),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_render_warning() {
        let embed = warning().render();
        assert_eq!(embed.title, "WARNING");
        assert_eq!(embed.fields.len(), 1);
        assert_eq!(embed.fields[0].name, "Data for bulbe:");
        assert!(embed.fields[0].value.contains("CPU:  42.00%"));
        assert!(embed.fields[0].value.contains("IO:   11"));
    }

    #[test]
    fn test_render_daily_summary() {
        let start = Local::now() - chrono::Duration::seconds(3725);
        let report = Report::DailySummary {
            description: "Data for 2 subjects".into(),
            system: MetricsSnapshot {
                who: "system".into(),
                cpu: Some(5.0),
                memory: Some(50.0),
                ..Default::default()
            },
            subjects: vec![
                MetricsSnapshot {
                    who: "bulbe".into(),
                    started_at: Some(start),
                    stopped_at: Some(start + chrono::Duration::seconds(3725)),
                    socket_ping: Some(0.002),
                    ..Default::default()
                },
                MetricsSnapshot::empty("juan"),
            ],
        };

        let embed = report.render();
        assert_eq!(report.kind(), "daily_metrics");
        assert_eq!(embed.fields.len(), 3);
        assert!(embed.fields[1].value.contains("Duration (stopped): 1:02:05"));
        assert!(embed.fields[1].value.contains("Socket ping: 2.0ms"));
        assert_eq!(embed.fields[2].value, "No data to report.");
    }

    #[tokio::test]
    async fn test_log_sink_accepts_reports() {
        let sink = LogSink;
        sink.report(&warning()).await.unwrap();
        sink.close().await.unwrap();
    }

    async fn serve_once(status_line: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/hook", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = stream.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request).to_string();
                if let Some(split) = text.find("\r\n\r\n") {
                    let length = text[..split]
                        .lines()
                        .find_map(|l| {
                            let lower = l.to_ascii_lowercase();
                            lower
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap())
                        })
                        .unwrap_or(0);
                    if request.len() >= split + 4 + length || n == 0 {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            let response = format!("{}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n", status_line);
            stream.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&request).to_string()
        });
        (url, handle)
    }

    #[tokio::test]
    async fn test_webhook_posts_embed() {
        let (url, server) = serve_once("HTTP/1.1 204 No Content").await;
        let sink = WebhookSink::new(url).unwrap();
        sink.report(&warning()).await.unwrap();

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /hook"));
        assert!(request.contains("\"title\":\"WARNING\""));
        assert!(request.contains("\"username\":\"marvin\""));
    }

    #[tokio::test]
    async fn test_webhook_rejection() {
        let (url, _server) = serve_once("HTTP/1.1 400 Bad Request").await;
        let sink = WebhookSink::new(url).unwrap();
        let result = sink.report(&warning()).await;
        assert!(matches!(result, Err(NotifyError::Rejected { status: 400, .. })));
    }
}
