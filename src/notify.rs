//! The dispatcher sends at most one message per [`NotificationBatch`]; a batch
//! with no HIGH students is [`DispatchOutcome::Skipped`], not an error.

use std::fmt::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::{ChannelKind, NotificationConfig};
use crate::error::{Error, NotifyError};
use crate::models::{ClassifiedStudentRecord, NotificationBatch};

pub const SUBJECT: &str = "High Risk Students Alert - DropOutGuard";

/// One rendered alert covering every HIGH-risk student of a batch.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationMessage {
    pub batch_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub student_count: usize,
    pub html: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryReceipt {
    pub message_id: String,
    /// Somewhere a person can look at the delivered message, if the channel offers one.
    pub preview_url: Option<String>,
}

#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(&self, message: &NotificationMessage) -> Result<DeliveryReceipt, NotifyError>;
}

#[derive(Debug)]
pub enum DispatchOutcome {
    /// The batch had no HIGH-risk students; nothing was sent.
    Skipped,
    Delivered {
        students: Vec<ClassifiedStudentRecord>,
        receipt: DeliveryReceipt,
    },
}

pub struct Dispatcher {
    channel: Arc<dyn NotificationChannel>,
    from: String,
    to: String,
}

impl Dispatcher {
    pub fn new(
        channel: Arc<dyn NotificationChannel>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        Self {
            channel,
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn from_config(config: &NotificationConfig) -> Result<Self, Error> {
        let channel = build_channel(config)?;
        Ok(Self::new(channel, config.from.clone(), config.to.clone()))
    }

    pub fn channel_name(&self) -> &'static str {
        self.channel.name()
    }

    /// Send the batch and report how it went.
    pub async fn dispatch(&self, batch: NotificationBatch) -> Result<DispatchOutcome, NotifyError> {
        if batch.is_empty() {
            info!(batch = %batch.batch_id, "no high-risk students, notification skipped");
            return Ok(DispatchOutcome::Skipped);
        }

        let message = render_message(&batch, &self.from, &self.to);
        let receipt = self.channel.send(&message).await?;

        info!(
            batch = %batch.batch_id,
            channel = self.channel.name(),
            students = batch.len(),
            message_id = %receipt.message_id,
            "high-risk notification delivered"
        );
        if let Some(url) = &receipt.preview_url {
            info!("notification preview: {url}");
        }

        Ok(DispatchOutcome::Delivered {
            students: batch.students,
            receipt,
        })
    }

    /// Send in the background. Failures are logged and go no further.
    pub fn dispatch_detached(self: &Arc<Self>, batch: NotificationBatch) -> JoinHandle<()> {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            let batch_id = batch.batch_id;
            if let Err(err) = dispatcher.dispatch(batch).await {
                error!(batch = %batch_id, error = %err, "failed to send high-risk notification");
            }
        })
    }
}

pub fn build_channel(config: &NotificationConfig) -> Result<Arc<dyn NotificationChannel>, Error> {
    let channel: Arc<dyn NotificationChannel> = match config.channel {
        ChannelKind::Log => Arc::new(LogChannel),
        ChannelKind::Outbox => {
            let dir = config.outbox_dir.clone().ok_or_else(|| {
                Error::Config("notification.outbox_dir is required for the outbox channel".into())
            })?;
            Arc::new(OutboxChannel::new(dir))
        }
        ChannelKind::Webhook => {
            let url = config.webhook_url.clone().ok_or_else(|| {
                Error::Config("notification.webhook_url is required for the webhook channel".into())
            })?;
            Arc::new(WebhookChannel::new(url)?)
        }
    };
    Ok(channel)
}

pub fn render_message(batch: &NotificationBatch, from: &str, to: &str) -> NotificationMessage {
    NotificationMessage {
        batch_id: batch.batch_id,
        generated_at: Utc::now(),
        from: from.to_string(),
        to: to.to_string(),
        subject: SUBJECT.to_string(),
        student_count: batch.len(),
        html: render_html(&batch.students),
        text: render_text(&batch.students),
    }
}

const COLUMNS: [&str; 6] = [
    "Student ID",
    "Name",
    "Attendance",
    "Average Score",
    "Days Overdue",
    "Issues",
];

fn summary_row(record: &ClassifiedStudentRecord) -> [String; 6] {
    let s = &record.student;
    let field = |v: &Option<String>| v.clone().unwrap_or_default();
    [
        s.student_id.clone(),
        field(&s.name),
        s.attendance_percent
            .as_deref()
            .map(|v| format!("{v}%"))
            .unwrap_or_default(),
        field(&s.average_score),
        field(&s.days_overdue),
        record.flag_details.join(", "),
    ]
}

fn render_html(students: &[ClassifiedStudentRecord]) -> String {
    const CELL: &str = "padding: 8px; border: 1px solid #ddd;";
    let mut html = String::new();

    let _ = writeln!(html, r#"<div style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto;">"#);
    let _ = writeln!(html, r#"<h2 style="color: #d32f2f;">High Risk Students Alert</h2>"#);
    let _ = writeln!(
        html,
        "<p>The following students have been identified as high risk and may require immediate attention:</p>"
    );
    let _ = writeln!(html, r#"<table style="width: 100%; border-collapse: collapse; margin-top: 20px;">"#);
    let _ = write!(html, r#"<thead><tr style="background-color: #f2f2f2;">"#);
    for column in COLUMNS {
        let _ = write!(html, r#"<th style="{CELL}">{column}</th>"#);
    }
    let _ = writeln!(html, "</tr></thead>");
    let _ = writeln!(html, "<tbody>");
    for record in students {
        let _ = write!(html, "<tr>");
        for cell in summary_row(record) {
            let _ = write!(html, r#"<td style="{CELL}">{}</td>"#, escape_html(&cell));
        }
        let _ = writeln!(html, "</tr>");
    }
    let _ = writeln!(html, "</tbody>");
    let _ = writeln!(html, "</table>");
    let _ = writeln!(
        html,
        r#"<p style="margin-top: 20px;">Please take appropriate action to support these students.</p>"#
    );
    let _ = writeln!(html, "<p>This is an automated message from the DropOutGuard system.</p>");
    let _ = writeln!(html, "</div>");

    html
}

fn render_text(students: &[ClassifiedStudentRecord]) -> String {
    let mut text = String::new();
    let _ = writeln!(text, "High Risk Students Alert");
    let _ = writeln!(text);
    let _ = writeln!(text, "{}", COLUMNS.join(" | "));
    for record in students {
        let _ = writeln!(text, "{}", summary_row(record).join(" | "));
    }
    text
}

fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Writes alerts to the log only.
pub struct LogChannel;

#[async_trait]
impl NotificationChannel for LogChannel {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send(&self, message: &NotificationMessage) -> Result<DeliveryReceipt, NotifyError> {
        info!(
            to = %message.to,
            subject = %message.subject,
            students = message.student_count,
            "\n{}",
            message.text
        );
        Ok(DeliveryReceipt {
            message_id: message.batch_id.to_string(),
            preview_url: None,
        })
    }
}

/// Drops each alert into a directory as an HTML file that can be opened directly.
pub struct OutboxChannel {
    dir: PathBuf,
}

impl OutboxChannel {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl NotificationChannel for OutboxChannel {
    fn name(&self) -> &'static str {
        "outbox"
    }

    async fn send(&self, message: &NotificationMessage) -> Result<DeliveryReceipt, NotifyError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(format!("{}.html", message.batch_id));
        tokio::fs::write(&path, &message.html).await?;

        let path = tokio::fs::canonicalize(&path).await.unwrap_or(path);
        Ok(DeliveryReceipt {
            message_id: message.batch_id.to_string(),
            preview_url: Some(format!("file://{}", path.display())),
        })
    }
}

/// POSTs alerts as JSON to an HTTP endpoint.
pub struct WebhookChannel {
    client: reqwest::Client,
    url: String,
}

#[derive(Debug, Default, Deserialize)]
struct WebhookReply {
    id: Option<String>,
    preview_url: Option<String>,
}

impl WebhookChannel {
    pub fn new(url: impl Into<String>) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("dropout-guard/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Config(format!("failed to build webhook client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn send(&self, message: &NotificationMessage) -> Result<DeliveryReceipt, NotifyError> {
        let response = self.client.post(&self.url).json(message).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let reply: WebhookReply = serde_json::from_str(&body).unwrap_or_default();
        Ok(DeliveryReceipt {
            message_id: reply.id.unwrap_or_else(|| message.batch_id.to_string()),
            preview_url: reply.preview_url,
        })
    }
}
