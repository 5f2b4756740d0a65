//! Weekly digest formatting and delivery.
//!
//! # Responsibility
//! - Build the transient `NotificationPayload` for one window.
//! - Render a deterministic, human-readable digest.
//! - Deliver text through a `MessageTransport` (Telegram in production).
//!
//! # Invariants
//! - Digest entries are sorted by occurrence date, then name.
//! - Delivery failures are reported as `DeliveryError`, never panics.
//! - Bot tokens never appear in error messages or logs.

use crate::config::{ParseMode, TelegramConfig};
use crate::credential::{CredentialError, Secret, SecretSource};
use crate::model::birthday::BirthdayRecord;
use crate::window::WeekWindow;
use chrono::NaiveDate;
use log::{info, warn};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

pub const BOT_TOKEN_SECRET: &str = "tg-bot-token";
pub const CHAT_ID_SECRET: &str = "chat-id";

const MARKDOWN_SPECIAL_CHARS: &[char] = &['_', '*', '`', '['];

/// Delivery failures reported by a transport.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("message transport failed: {0}")]
    Transport(String),
    #[error("message rejected with status {status}: {description}")]
    Rejected { status: u16, description: String },
    #[error("messaging credentials unavailable: {0}")]
    Credential(#[from] CredentialError),
}

/// Outbound messaging collaborator. The destination is bound at construction.
pub trait MessageTransport {
    fn deliver(&self, text: &str) -> Result<(), DeliveryError>;
}

impl<T: MessageTransport + ?Sized> MessageTransport for &T {
    fn deliver(&self, text: &str) -> Result<(), DeliveryError> {
        (**self).deliver(text)
    }
}

impl<T: MessageTransport + ?Sized> MessageTransport for Box<T> {
    fn deliver(&self, text: &str) -> Result<(), DeliveryError> {
        (**self).deliver(text)
    }
}

/// One birthday observed inside the window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestEntry {
    pub date: NaiveDate,
    pub record: BirthdayRecord,
}

/// Records matched to one window. Built per run, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationPayload {
    window: WeekWindow,
    entries: Vec<DigestEntry>,
}

impl NotificationPayload {
    /// Pairs each record with its date in `window` and sorts the result.
    ///
    /// Records not observed inside the window are dropped with a warning.
    pub fn new(window: WeekWindow, records: Vec<BirthdayRecord>) -> Self {
        let mut entries = Vec::with_capacity(records.len());
        for record in records {
            match window.occurrence_of(&record) {
                Some(date) => entries.push(DigestEntry { date, record }),
                None => warn!(
                    "event=payload_skip module=notifier status=error window={} month={} day={}",
                    window, record.month, record.day
                ),
            }
        }
        entries.sort_by(|left, right| {
            left.date
                .cmp(&right.date)
                .then_with(|| left.record.name.cmp(&right.record.name))
        });
        Self { window, entries }
    }

    pub fn window(&self) -> &WeekWindow {
        &self.window
    }

    pub fn entries(&self) -> &[DigestEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Formats and sends weekly digests.
pub struct Notifier<T: MessageTransport> {
    transport: T,
    parse_mode: ParseMode,
}

impl<T: MessageTransport> Notifier<T> {
    pub fn new(transport: T, parse_mode: ParseMode) -> Self {
        Self {
            transport,
            parse_mode,
        }
    }

    pub fn format(&self, payload: &NotificationPayload) -> String {
        format_digest(payload, self.parse_mode)
    }

    /// Sends `text` once. No retry: a failure is terminal for the run.
    pub fn send(&self, text: &str) -> Result<(), DeliveryError> {
        self.transport.deliver(text)?;
        info!(
            "event=notify_send module=notifier status=ok chars={}",
            text.chars().count()
        );
        Ok(())
    }
}

/// Renders the digest text for `payload`.
///
/// Layout: a header with the count, then per day with birthdays a day
/// heading followed by one line per person.
pub fn format_digest(payload: &NotificationPayload, mode: ParseMode) -> String {
    let window = payload.window();
    let range = format!(
        "{} - {}",
        window.start().format("%B %d"),
        window.end().format("%B %d")
    );

    if payload.is_empty() {
        return format!("🎈 No birthdays coming up this week ({range})");
    }

    let count = payload.len();
    let headline = if count == 1 {
        "There is 1 birthday coming up this week".to_string()
    } else {
        format!("There are {count} birthdays coming up this week")
    };
    let mut lines = vec![
        format!("❗❗❗ {} ❗❗❗", bold(&headline, mode)),
        format!("🗓 {range}"),
    ];

    let mut current_day: Option<NaiveDate> = None;
    for entry in payload.entries() {
        if current_day != Some(entry.date) {
            current_day = Some(entry.date);
            lines.push(String::new());
            let heading = entry.date.format("%B %d (%A)").to_string();
            lines.push(format!("🎂 {} 🎂", bold(&heading, mode)));
        }

        let mut line = format!("🔴 {}", italic(&entry.record.name, mode));
        if let Some(age) = entry.record.age_on(entry.date) {
            line.push_str(&format!(" turns {age}"));
        }
        lines.push(line);
    }

    lines.join("\n")
}

fn bold(text: &str, mode: ParseMode) -> String {
    match mode {
        ParseMode::Markdown => format!("*{text}*"),
        ParseMode::Plain => text.to_string(),
    }
}

/// Italicizes user-supplied text.
///
/// Legacy Markdown has no escapes inside an entity, so each control
/// character is escaped between two closed italic runs: `Mary_Ann` becomes
/// `_Mary_\__Ann_`.
fn italic(text: &str, mode: ParseMode) -> String {
    if mode == ParseMode::Plain {
        return text.to_string();
    }
    let mut rendered = String::with_capacity(text.len() + 4);
    let mut run = String::new();
    for c in text.chars() {
        if MARKDOWN_SPECIAL_CHARS.contains(&c) {
            close_italic_run(&mut rendered, &mut run);
            rendered.push('\\');
            rendered.push(c);
        } else {
            run.push(c);
        }
    }
    close_italic_run(&mut rendered, &mut run);
    rendered
}

fn close_italic_run(rendered: &mut String, run: &mut String) {
    if run.is_empty() {
        return;
    }
    rendered.push('_');
    rendered.push_str(run);
    rendered.push('_');
    run.clear();
}

/// Telegram Bot API transport (`sendMessage`).
pub struct TelegramTransport {
    agent: ureq::Agent,
    api_base: String,
    token: Secret,
    chat_id: Secret,
    parse_mode: ParseMode,
}

#[derive(Debug, Deserialize)]
struct TelegramReply {
    ok: bool,
    description: Option<String>,
}

impl TelegramTransport {
    /// Resolves token and chat id from `secrets`.
    pub fn from_secrets(
        secrets: &dyn SecretSource,
        config: &TelegramConfig,
    ) -> Result<Self, DeliveryError> {
        let token = secrets.secret(BOT_TOKEN_SECRET)?;
        let chat_id = secrets.secret(CHAT_ID_SECRET)?;
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(config.connect_timeout_secs))
            .timeout_read(Duration::from_secs(config.read_timeout_secs))
            .timeout_write(Duration::from_secs(config.read_timeout_secs))
            .build();
        Ok(Self {
            agent,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            token,
            chat_id,
            parse_mode: config.parse_mode,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_base, self.token.expose())
    }

    fn request_body(&self, text: &str) -> serde_json::Value {
        let mut body = serde_json::json!({
            "chat_id": self.chat_id.expose(),
            "text": text,
        });
        if let Some(mode) = self.parse_mode.telegram_name() {
            body["parse_mode"] = serde_json::Value::String(mode.to_string());
        }
        body
    }

    fn redact(&self, message: &str) -> String {
        message.replace(self.token.expose(), "***")
    }
}

impl MessageTransport for TelegramTransport {
    fn deliver(&self, text: &str) -> Result<(), DeliveryError> {
        match self.agent.post(&self.endpoint()).send_json(self.request_body(text)) {
            Ok(response) => {
                let status = response.status();
                let reply: TelegramReply = response
                    .into_json()
                    .map_err(|err| DeliveryError::Transport(self.redact(&err.to_string())))?;
                if reply.ok {
                    Ok(())
                } else {
                    Err(DeliveryError::Rejected {
                        status,
                        description: reply
                            .description
                            .unwrap_or_else(|| "telegram reported ok=false".to_string()),
                    })
                }
            }
            Err(ureq::Error::Status(status, response)) => {
                let description = response
                    .into_json::<TelegramReply>()
                    .ok()
                    .and_then(|reply| reply.description)
                    .unwrap_or_else(|| "no description".to_string());
                Err(DeliveryError::Rejected {
                    status,
                    description: self.redact(&description),
                })
            }
            Err(err) => Err(DeliveryError::Transport(self.redact(&err.to_string()))),
        }
    }
}
