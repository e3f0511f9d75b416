//! Outbound alert delivery.
//!
//! | Kind | Code |
//! |------|------|
//! | [`NotifierErrorKind::Unavailable`] | `notifier.unavailable` |
//! | [`NotifierErrorKind::Rejected`] | `notifier.rejected` |
//! | [`NotifierErrorKind::Malformed`] | `notifier.malformed` |

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::info;

use crate::http_client::{HttpClient, HttpRequest};
use crate::MessageRef;

pub type NotifyFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, NotifierError>> + Send + 'a>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifierErrorKind {
    /// Transport failure or 5xx; delivery may work later.
    Unavailable,
    /// The channel refused the request (bad recipient, blocked bot, gone message).
    Rejected,
    /// The channel answered with something we could not read.
    Malformed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifierError {
    kind: NotifierErrorKind,
    message: String,
}

impl NotifierError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(NotifierErrorKind::Unavailable, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(NotifierErrorKind::Rejected, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(NotifierErrorKind::Malformed, message)
    }

    fn new(kind: NotifierErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub const fn kind(&self) -> NotifierErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            NotifierErrorKind::Unavailable => "notifier.unavailable",
            NotifierErrorKind::Rejected => "notifier.rejected",
            NotifierErrorKind::Malformed => "notifier.malformed",
        }
    }
}

impl Display for NotifierError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for NotifierError {}

/// Channel that delivers alert messages to subscribers.
pub trait Notifier: Send + Sync {
    /// Deliver `content` (HTML) to `recipient`, returning a handle to the message.
    fn send<'a>(&'a self, recipient: &'a str, content: &'a str) -> NotifyFuture<'a, MessageRef>;

    /// Delete a previously sent message. Callers treat failures as best-effort.
    fn delete<'a>(&'a self, recipient: &'a str, message: &'a MessageRef) -> NotifyFuture<'a, ()>;
}

/// Telegram Bot API notifier.
pub struct TelegramNotifier {
    http_client: Arc<dyn HttpClient>,
    api_base: String,
    token: String,
    timeout_ms: u64,
}

impl TelegramNotifier {
    pub const DEFAULT_API_BASE: &'static str = "https://api.telegram.org";

    pub fn new(http_client: Arc<dyn HttpClient>, token: impl Into<String>) -> Self {
        Self {
            http_client,
            api_base: String::from(Self::DEFAULT_API_BASE),
            token: token.into(),
            timeout_ms: 10_000,
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_owned();
        self
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base, self.token)
    }

    async fn call(&self, method: &str, payload: Value) -> Result<Value, NotifierError> {
        let request = HttpRequest::post_json(self.method_url(method), &payload)
            .with_timeout_ms(self.timeout_ms);
        let response = self
            .http_client
            .execute(request)
            .await
            .map_err(|error| NotifierError::unavailable(error.message()))?;

        if response.status >= 500 || response.status == 429 {
            return Err(NotifierError::unavailable(format!(
                "telegram {method} returned HTTP {}",
                response.status
            )));
        }
        let body: Value = serde_json::from_str(&response.body).map_err(|error| {
            NotifierError::malformed(format!("telegram {method} returned non-JSON: {error}"))
        })?;
        if body.get("ok").and_then(Value::as_bool) != Some(true) {
            let description = body
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or("no description");
            return Err(NotifierError::rejected(format!(
                "telegram {method} failed: {description}"
            )));
        }
        Ok(body)
    }
}

impl Notifier for TelegramNotifier {
    fn send<'a>(&'a self, recipient: &'a str, content: &'a str) -> NotifyFuture<'a, MessageRef> {
        Box::pin(async move {
            let body = self
                .call(
                    "sendMessage",
                    json!({ "chat_id": recipient, "text": content, "parse_mode": "HTML" }),
                )
                .await?;
            body.pointer("/result/message_id")
                .and_then(Value::as_i64)
                .map(|id| MessageRef(id.to_string()))
                .ok_or_else(|| NotifierError::malformed("sendMessage result has no message_id"))
        })
    }

    fn delete<'a>(&'a self, recipient: &'a str, message: &'a MessageRef) -> NotifyFuture<'a, ()> {
        Box::pin(async move {
            let message_id = message.as_str().parse::<i64>().map_err(|_| {
                NotifierError::rejected(format!("'{message}' is not a telegram message id"))
            })?;
            self.call(
                "deleteMessage",
                json!({ "chat_id": recipient, "message_id": message_id }),
            )
            .await
            .map(|_| ())
        })
    }
}

/// Writes alerts to the log instead of a chat channel.
#[derive(Debug, Default)]
pub struct LogNotifier {
    next_id: AtomicU64,
}

impl LogNotifier {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Notifier for LogNotifier {
    fn send<'a>(&'a self, recipient: &'a str, content: &'a str) -> NotifyFuture<'a, MessageRef> {
        Box::pin(async move {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
            info!(recipient, message_ref = id, content, "alert delivered to log");
            Ok(MessageRef(format!("log-{id}")))
        })
    }

    fn delete<'a>(&'a self, recipient: &'a str, message: &'a MessageRef) -> NotifyFuture<'a, ()> {
        Box::pin(async move {
            info!(recipient, message_ref = %message, "alert retracted from log");
            Ok(())
        })
    }
}
