//! Push and notification bridge.

use livria_core::{NotificationConfig, WorkerConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, info};
use url::Url;

use crate::host::{ClientId, Clients, WorkerHost};
use crate::SwResult;

/// Decoded push message.
#[derive(Debug, Clone, PartialEq)]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    pub tag: Option<String>,
    /// Arbitrary data attached to the notification; `url` is the click target.
    pub data: JsonValue,
}

impl PushPayload {
    /// Decode raw push data.
    ///
    /// - absent or empty data → default title and body
    /// - a JSON object → its `title`, `body`, `tag` and `data`, with defaults
    ///   for missing or empty strings
    /// - any other JSON value → defaults, it carries no fields
    /// - not JSON at all → default title, the raw text as body
    pub fn decode(raw: Option<&[u8]>, defaults: &NotificationConfig) -> Self {
        let fallback = |body: String| Self {
            title: defaults.default_title.clone(),
            body,
            tag: None,
            data: JsonValue::Null,
        };

        let raw = match raw {
            Some(raw) if !raw.is_empty() => raw,
            _ => return fallback(defaults.default_body.clone()),
        };

        match serde_json::from_slice::<JsonValue>(raw) {
            Ok(JsonValue::Object(mut fields)) => {
                let mut text = |key: &str| {
                    fields
                        .remove(key)
                        .and_then(|v| v.as_str().map(str::to_string))
                        .filter(|s| !s.is_empty())
                };
                let title = text("title").unwrap_or_else(|| defaults.default_title.clone());
                let body = text("body").unwrap_or_else(|| defaults.default_body.clone());
                let tag = text("tag");
                Self {
                    title,
                    body,
                    tag,
                    data: fields.remove("data").unwrap_or(JsonValue::Null),
                }
            }
            Ok(_) => {
                debug!("Push payload is JSON but not an object, using defaults");
                fallback(defaults.default_body.clone())
            }
            Err(_) => {
                debug!("Push payload is not JSON, using it as body text");
                fallback(String::from_utf8_lossy(raw).into_owned())
            }
        }
    }
}

/// A notification as handed to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub tag: String,
    pub data: JsonValue,
    pub vibrate: Vec<u32>,
    pub require_interaction: bool,
}

impl Notification {
    /// Build a notification. Payloads without a tag share the configured
    /// default tag, so on platforms that collapse by tag they replace each
    /// other.
    pub fn from_payload(payload: PushPayload, config: &NotificationConfig) -> Self {
        Self {
            title: payload.title,
            body: payload.body,
            icon: config.icon.clone(),
            badge: config.badge.clone(),
            tag: payload.tag.unwrap_or_else(|| config.default_tag.clone()),
            data: payload.data,
            vibrate: config.vibrate.clone(),
            require_interaction: false,
        }
    }

    /// `data.url`, if the notification carries one.
    pub fn target(&self) -> Option<&str> {
        self.data
            .get("url")
            .and_then(JsonValue::as_str)
            .filter(|s| !s.is_empty())
    }
}

/// What a notification click did.
#[derive(Debug, Clone, PartialEq)]
pub enum ClickOutcome {
    /// An existing window was focused and navigated.
    Focused { client: ClientId, url: Url },
    /// No window was open; a new one was opened.
    Opened { client: ClientId, url: Url },
}

/// Decode a push message and display it.
pub async fn handle_push(
    raw: Option<&[u8]>,
    config: &NotificationConfig,
    host: &dyn WorkerHost,
) -> SwResult<Notification> {
    let payload = PushPayload::decode(raw, config);
    let notification = Notification::from_payload(payload, config);
    info!(title = %notification.title, tag = %notification.tag, "Showing push notification");
    host.show_notification(notification.clone()).await?;
    Ok(notification)
}

/// Close the clicked notification and bring the app to its target URL.
///
/// Only the first window found is used.
pub async fn handle_click(
    notification: &Notification,
    config: &WorkerConfig,
    host: &dyn WorkerHost,
    clients: &dyn Clients,
) -> SwResult<ClickOutcome> {
    host.close_notification(notification).await?;

    let target = notification
        .target()
        .unwrap_or(config.notifications.default_url.as_str());
    let url = config.resolve(target)?;

    let windows = clients.match_windows().await?;
    match windows.into_iter().next() {
        Some(window) => {
            clients.focus(&window.id).await?;
            clients.navigate(&window.id, &url).await?;
            debug!(client = %window.id, url = %url, "Focused existing window");
            Ok(ClickOutcome::Focused {
                client: window.id,
                url,
            })
        }
        None => {
            let window = clients.open_window(&url).await?;
            debug!(client = %window.id, url = %url, "Opened new window");
            Ok(ClickOutcome::Opened {
                client: window.id,
                url,
            })
        }
    }
}
