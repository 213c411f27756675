//! In-memory registration and notification tray.
//!
//! [`MemoryHost`] is the runtime side of the worker lifecycle: it tracks the
//! installing/waiting/active workers of one registration and the
//! notifications currently displayed. Every transition is reported on an
//! event channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};
use url::Url;

use crate::host::WorkerHost;
use crate::push::Notification;
use crate::{SwError, SwResult};

// ==================== Types ====================

/// Unique identifier for a worker version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerVersionId(u64);

impl WorkerVersionId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ServiceWorkerState {
    /// Script fetched, not yet installing.
    #[default]
    Parsed,
    /// Install event running.
    Installing,
    /// Installed, waiting for the old version's clients to close.
    Installed,
    /// Activate event running.
    Activating,
    /// Active and controlling clients.
    Activated,
    /// Replaced or failed to install.
    Redundant,
}

/// One version of the worker.
#[derive(Debug, Clone)]
pub struct WorkerVersion {
    pub id: WorkerVersionId,
    pub script_url: Url,
    pub state: ServiceWorkerState,
    pub state_changed_at: Instant,
}

impl WorkerVersion {
    fn new(script_url: Url) -> Self {
        Self {
            id: WorkerVersionId::new(),
            script_url,
            state: ServiceWorkerState::Parsed,
            state_changed_at: Instant::now(),
        }
    }

    fn set_state(&mut self, state: ServiceWorkerState) {
        self.state = state;
        self.state_changed_at = Instant::now();
    }
}

/// Events emitted by [`MemoryHost`].
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    /// A worker version changed state.
    StateChange {
        worker_id: WorkerVersionId,
        new_state: ServiceWorkerState,
    },
    /// A notification was displayed.
    NotificationShown { title: String, tag: String },
    /// A notification was dismissed.
    NotificationClosed { tag: String },
}

// ==================== Registration ====================

/// Installing/waiting/active slots of one registration.
#[derive(Debug)]
pub struct Registration {
    pub scope: Url,
    pub installing: Option<WorkerVersion>,
    pub waiting: Option<WorkerVersion>,
    pub active: Option<WorkerVersion>,
    skip_waiting: bool,
}

impl Registration {
    pub fn new(scope: Url) -> Self {
        Self {
            scope,
            installing: None,
            waiting: None,
            active: None,
            skip_waiting: false,
        }
    }

    /// Start installing a new version. Returns its id.
    fn begin_install(&mut self, script_url: Url) -> (WorkerVersionId, Vec<HostEvent>) {
        let mut events = Vec::new();
        if let Some(mut previous) = self.installing.take() {
            previous.set_state(ServiceWorkerState::Redundant);
            events.push(state_event(&previous));
        }

        let mut worker = WorkerVersion::new(script_url);
        worker.set_state(ServiceWorkerState::Installing);
        events.push(state_event(&worker));

        let id = worker.id;
        self.installing = Some(worker);
        self.skip_waiting = false;
        (id, events)
    }

    /// Install succeeded. Promotes straight to activating if skip-waiting
    /// was requested or nothing is active.
    fn install_complete(&mut self) -> SwResult<Vec<HostEvent>> {
        let mut worker = self
            .installing
            .take()
            .ok_or_else(|| SwError::State("no installing worker".to_string()))?;
        worker.set_state(ServiceWorkerState::Installed);

        let mut events = vec![state_event(&worker)];
        self.waiting = Some(worker);
        if self.skip_waiting || self.active.is_none() {
            events.extend(self.promote_waiting());
        }
        Ok(events)
    }

    /// Install failed; the version becomes redundant.
    fn install_failed(&mut self) -> Vec<HostEvent> {
        self.installing
            .take()
            .map(|mut worker| {
                worker.set_state(ServiceWorkerState::Redundant);
                vec![state_event(&worker)]
            })
            .unwrap_or_default()
    }

    fn request_skip_waiting(&mut self) -> Vec<HostEvent> {
        self.skip_waiting = true;
        self.promote_waiting()
    }

    /// Move the waiting version into the active slot as activating.
    fn promote_waiting(&mut self) -> Vec<HostEvent> {
        let Some(mut worker) = self.waiting.take() else {
            return Vec::new();
        };

        let mut events = Vec::new();
        if let Some(mut old) = self.active.take() {
            old.set_state(ServiceWorkerState::Redundant);
            events.push(state_event(&old));
        }
        worker.set_state(ServiceWorkerState::Activating);
        events.push(state_event(&worker));
        self.active = Some(worker);
        events
    }

    /// Activate event finished.
    fn activate_complete(&mut self) -> SwResult<Vec<HostEvent>> {
        let worker = self
            .active
            .as_mut()
            .filter(|w| w.state == ServiceWorkerState::Activating)
            .ok_or_else(|| SwError::State("no activating worker".to_string()))?;
        worker.set_state(ServiceWorkerState::Activated);
        Ok(vec![state_event(worker)])
    }
}

fn state_event(worker: &WorkerVersion) -> HostEvent {
    HostEvent::StateChange {
        worker_id: worker.id,
        new_state: worker.state,
    }
}

// ==================== Memory Host ====================

/// In-memory [`WorkerHost`].
pub struct MemoryHost {
    registration: RwLock<Registration>,
    notifications: RwLock<Vec<Notification>>,
    event_tx: mpsc::UnboundedSender<HostEvent>,
}

impl MemoryHost {
    /// Create a host for a registration at `scope`.
    pub fn new(scope: Url) -> (Self, mpsc::UnboundedReceiver<HostEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (
            Self {
                registration: RwLock::new(Registration::new(scope)),
                notifications: RwLock::new(Vec::new()),
                event_tx,
            },
            event_rx,
        )
    }

    fn emit(&self, events: Vec<HostEvent>) {
        for event in events {
            debug!(?event, "Host event");
            // Nobody listening is fine.
            let _ = self.event_tx.send(event);
        }
    }

    /// Start installing a new worker version.
    pub async fn begin_install(&self, script_url: Url) -> WorkerVersionId {
        let (id, events) = self.registration.write().await.begin_install(script_url);
        self.emit(events);
        id
    }

    /// Record the outcome of the install event.
    pub async fn finish_install(&self, succeeded: bool) -> SwResult<()> {
        let events = {
            let mut registration = self.registration.write().await;
            if succeeded {
                registration.install_complete()?
            } else {
                registration.install_failed()
            }
        };
        self.emit(events);
        Ok(())
    }

    /// Record that the activate event finished.
    pub async fn finish_activate(&self) -> SwResult<()> {
        let events = self.registration.write().await.activate_complete()?;
        self.emit(events);
        Ok(())
    }

    /// Whether a version is waiting in the activating slot for its
    /// activate event to run.
    pub async fn needs_activation(&self) -> bool {
        self.registration
            .read()
            .await
            .active
            .as_ref()
            .is_some_and(|w| w.state == ServiceWorkerState::Activating)
    }

    /// States of the installing, waiting and active slots.
    pub async fn states(
        &self,
    ) -> (
        Option<ServiceWorkerState>,
        Option<ServiceWorkerState>,
        Option<ServiceWorkerState>,
    ) {
        let registration = self.registration.read().await;
        (
            registration.installing.as_ref().map(|w| w.state),
            registration.waiting.as_ref().map(|w| w.state),
            registration.active.as_ref().map(|w| w.state),
        )
    }

    /// Currently displayed notifications.
    pub async fn notifications(&self) -> Vec<Notification> {
        self.notifications.read().await.clone()
    }
}

#[async_trait]
impl WorkerHost for MemoryHost {
    async fn skip_waiting(&self) -> SwResult<()> {
        let events = self.registration.write().await.request_skip_waiting();
        info!("Skip waiting requested");
        self.emit(events);
        Ok(())
    }

    async fn show_notification(&self, notification: Notification) -> SwResult<()> {
        let event = HostEvent::NotificationShown {
            title: notification.title.clone(),
            tag: notification.tag.clone(),
        };
        {
            let mut shown = self.notifications.write().await;
            // Same tag replaces the displayed notification.
            shown.retain(|n| n.tag != notification.tag);
            shown.push(notification);
        }
        self.emit(vec![event]);
        Ok(())
    }

    async fn close_notification(&self, notification: &Notification) -> SwResult<()> {
        self.notifications
            .write()
            .await
            .retain(|n| n.tag != notification.tag);
        self.emit(vec![HostEvent::NotificationClosed {
            tag: notification.tag.clone(),
        }]);
        Ok(())
    }
}
