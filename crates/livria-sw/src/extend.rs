//! Event lifetime extension.
//!
//! Work registered here runs concurrently with the response being handed
//! back to the page. The host must call [`WaitUntil::settle`] before it
//! considers the event finished, which guarantees every background cache
//! write is at least attempted.

use std::future::Future;

use tokio::task::JoinSet;
use tracing::{trace, warn};

/// Background tasks attached to one worker event.
#[derive(Default)]
pub struct WaitUntil {
    tasks: JoinSet<()>,
}

impl WaitUntil {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` in the background for the remainder of the event.
    pub fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn(task);
    }

    /// Number of tasks not yet joined.
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    /// Wait for every background task. Returns how many ran to completion.
    pub async fn settle(mut self) -> usize {
        let mut completed = 0;
        while let Some(result) = self.tasks.join_next().await {
            match result {
                Ok(()) => completed += 1,
                Err(e) => warn!(error = %e, "Background task did not complete"),
            }
        }
        trace!(completed, "Event settled");
        completed
    }
}

impl std::fmt::Debug for WaitUntil {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaitUntil")
            .field("pending", &self.tasks.len())
            .finish()
    }
}
