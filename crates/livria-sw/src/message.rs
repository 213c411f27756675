//! Control channel between the foreground app and the worker.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::cache::CacheStorage;
use crate::host::WorkerHost;
use crate::SwResult;

/// Commands posted by the foreground application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    /// Activate a pending install now.
    SkipWaiting,
    /// Delete the current cache generation.
    ClearCache,
}

impl ControlMessage {
    /// Parse a posted message; unknown or malformed messages yield `None`.
    pub fn parse(message: &JsonValue) -> Option<Self> {
        serde_json::from_value(message.clone()).ok()
    }
}

/// Reply to `CLEAR_CACHE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearCacheReply {
    pub success: bool,
}

/// Reply channel supplied with a message.
pub type ReplyPort = oneshot::Sender<ClearCacheReply>;

/// What a message did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    SkippedWaiting,
    CacheCleared { existed: bool, replied: bool },
    Ignored,
}

/// Handle one posted message.
///
/// `CLEAR_CACHE` without a reply port still clears the cache, it just
/// acknowledges nothing.
pub async fn handle_message(
    message: &JsonValue,
    reply: Option<ReplyPort>,
    cache_name: &str,
    storage: &dyn CacheStorage,
    host: &dyn WorkerHost,
) -> SwResult<MessageOutcome> {
    let Some(command) = ControlMessage::parse(message) else {
        debug!(%message, "Ignoring unknown message");
        return Ok(MessageOutcome::Ignored);
    };

    match command {
        ControlMessage::SkipWaiting => {
            host.skip_waiting().await?;
            Ok(MessageOutcome::SkippedWaiting)
        }
        ControlMessage::ClearCache => {
            let result = storage.delete(cache_name).await;
            let success = result.is_ok();
            let replied = match reply {
                Some(port) => port.send(ClearCacheReply { success }).is_ok(),
                None => false,
            };
            let existed = result.inspect_err(|e| {
                warn!(cache = cache_name, error = %e, "Failed to clear cache");
            })?;
            info!(cache = cache_name, existed, replied, "Cache cleared");
            if !replied {
                debug!(cache = cache_name, "CLEAR_CACHE had no reply port");
            }
            Ok(MessageOutcome::CacheCleared { existed, replied })
        }
    }
}
