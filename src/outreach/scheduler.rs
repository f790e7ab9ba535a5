//! Send scheduler: delayed, cancellable, at-most-once delivery.
//!
//! Pending sends live in an arena keyed by [`SendHandle`] plus a
//! `(fire_at, handle)` index. A single waiter task sleeps until the earliest
//! fire time (or until an enqueue wakes it), claims every due send by moving
//! it Pending → Dispatching under the lock, and spawns one delivery task per
//! send so a slow dispatch never holds up the others.
//!
//! Pending sends are held in memory only. A restart loses them; callers that
//! need durability must re-enqueue from their own records.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, Notify, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::dispatch::{DeliveryOutcome, Outbox};
use super::state::{ScheduledSend, SendHandle, SendRequest, SendState};
use crate::error::{ScheduleError, ValidationError};
use crate::types::ContactId;

/// Default broadcast channel capacity.
const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Result of a cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CancelOutcome {
    Cancelled,
    /// Dispatch already began (or finished); cancelling has no effect.
    AlreadyFired,
    /// The send already ended without firing.
    AlreadyFinished { state: SendState },
    NotFound,
}

/// Emitted whenever a send changes state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendEvent {
    pub handle: SendHandle,
    pub contact_id: ContactId,
    pub state: SendState,
}

#[derive(Default)]
struct Queue {
    sends: HashMap<SendHandle, ScheduledSend>,
    due: BTreeSet<(DateTime<Utc>, SendHandle)>,
    /// Count of Pending sends per contact; entries are removed at zero.
    pending: HashMap<ContactId, usize>,
    shut_down: bool,
}

impl Queue {
    fn hold(&mut self, contact_id: &ContactId) {
        *self.pending.entry(contact_id.clone()).or_default() += 1;
    }

    fn release(&mut self, contact_id: &ContactId) {
        if let Some(count) = self.pending.get_mut(contact_id) {
            *count -= 1;
            if *count == 0 {
                self.pending.remove(contact_id);
            }
        }
    }
}

struct Shared {
    queue: Mutex<Queue>,
    wake: Notify,
    outbox: Arc<Outbox>,
    events: broadcast::Sender<SendEvent>,
}

/// Schedules future sends through the shared [`Outbox`].
pub struct Scheduler {
    shared: Arc<Shared>,
    next_handle: AtomicU64,
    waiter: JoinHandle<()>,
}

impl Scheduler {
    /// Create a scheduler and spawn its waiter task. Must be called inside a
    /// Tokio runtime.
    pub fn start(outbox: Arc<Outbox>) -> Arc<Self> {
        let (events, _rx) = broadcast::channel(DEFAULT_EVENT_CAPACITY);
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue::default()),
            wake: Notify::new(),
            outbox,
            events,
        });
        let waiter = tokio::spawn(run_waiter(Arc::clone(&shared)));
        Arc::new(Self {
            shared,
            next_handle: AtomicU64::new(1),
            waiter,
        })
    }

    /// Subscribe to send state changes.
    pub fn subscribe(&self) -> broadcast::Receiver<SendEvent> {
        self.shared.events.subscribe()
    }

    /// Enqueue a send. `fire_at` must be strictly in the future.
    pub async fn enqueue(&self, request: SendRequest) -> Result<SendHandle, ScheduleError> {
        if request.body.trim().is_empty() {
            return Err(ValidationError::EmptyBody.into());
        }
        let now = Utc::now();
        if request.fire_at <= now {
            return Err(ScheduleError::InvalidScheduleTime {
                fire_at: request.fire_at,
                now,
            });
        }

        let mut queue = self.shared.queue.lock().await;
        if queue.shut_down {
            return Err(ScheduleError::ShutDown);
        }

        let handle = SendHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let send = ScheduledSend::new(handle, request);
        info!(
            handle = %handle,
            contact = %send.contact_id,
            fire_at = %send.fire_at,
            "Send scheduled"
        );
        queue.due.insert((send.fire_at, handle));
        queue.hold(&send.contact_id);
        let event = SendEvent {
            handle,
            contact_id: send.contact_id.clone(),
            state: SendState::Pending,
        };
        queue.sends.insert(handle, send);
        drop(queue);

        let _ = self.shared.events.send(event);
        self.shared.wake.notify_one();
        Ok(handle)
    }

    /// Cancel a pending send.
    pub async fn cancel(&self, handle: SendHandle) -> CancelOutcome {
        let mut queue = self.shared.queue.lock().await;
        let Some(send) = queue.sends.get_mut(&handle) else {
            return CancelOutcome::NotFound;
        };

        match send.state {
            SendState::Pending => {}
            SendState::Dispatching | SendState::Fired => {
                debug!(
                    handle = %handle,
                    state = %send.state,
                    "Cancel ignored: dispatch already began"
                );
                return CancelOutcome::AlreadyFired;
            }
            state => return CancelOutcome::AlreadyFinished { state },
        }

        if let Err(e) = send.transition_to(SendState::Cancelled, None) {
            error!(handle = %handle, "Cancel failed: {}", e);
            return CancelOutcome::AlreadyFinished { state: send.state };
        }
        let key = (send.fire_at, handle);
        let contact_id = send.contact_id.clone();
        queue.due.remove(&key);
        queue.release(&contact_id);
        drop(queue);

        info!(handle = %handle, contact = %contact_id, "Send cancelled");
        let _ = self.shared.events.send(SendEvent {
            handle,
            contact_id,
            state: SendState::Cancelled,
        });
        CancelOutcome::Cancelled
    }

    /// Snapshot of one send.
    pub async fn get(&self, handle: SendHandle) -> Option<ScheduledSend> {
        self.shared.queue.lock().await.sends.get(&handle).cloned()
    }

    /// Snapshot of every send, in handle order.
    pub async fn list(&self) -> Vec<ScheduledSend> {
        let queue = self.shared.queue.lock().await;
        let mut sends: Vec<ScheduledSend> = queue.sends.values().cloned().collect();
        sends.sort_by_key(|s| s.handle);
        sends
    }

    /// Whether a send to this contact is still waiting to fire.
    pub async fn has_pending_for(&self, contact_id: &ContactId) -> bool {
        self.shared
            .queue
            .lock()
            .await
            .pending
            .contains_key(contact_id)
    }

    /// Number of sends still waiting to fire.
    pub async fn pending_count(&self) -> usize {
        self.shared.queue.lock().await.due.len()
    }

    /// Stop firing. Sends already dispatching run to completion; pending
    /// sends stay Pending and are lost with the process.
    pub async fn shutdown(&self) {
        let pending = {
            let mut queue = self.shared.queue.lock().await;
            queue.shut_down = true;
            queue.due.len()
        };
        self.shared.wake.notify_one();
        if pending > 0 {
            warn!(pending = pending, "Scheduler shut down with pending sends; they will not fire");
        } else {
            info!("Scheduler shut down");
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.waiter.abort();
    }
}

/// Waiter loop: sleep until the earliest fire time or a wake-up, then fire
/// everything due.
async fn run_waiter(shared: Arc<Shared>) {
    loop {
        let next = {
            let queue = shared.queue.lock().await;
            if queue.shut_down {
                debug!("Scheduler waiter exiting");
                return;
            }
            queue.due.first().map(|(at, _)| *at)
        };

        match next {
            None => shared.wake.notified().await,
            Some(at) => {
                let wait = (at - Utc::now()).to_std().unwrap_or_default();
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = shared.wake.notified() => {}
                }
            }
        }

        fire_due(&shared).await;
    }
}

/// Claim every due send and spawn its delivery.
async fn fire_due(shared: &Arc<Shared>) {
    let claimed: Vec<(SendHandle, ContactId, String)> = {
        let mut queue = shared.queue.lock().await;
        if queue.shut_down {
            return;
        }
        let now = Utc::now();
        let mut claimed = Vec::new();
        while let Some(&(at, handle)) = queue.due.first() {
            if at > now {
                break;
            }
            queue.due.pop_first();
            let Some(send) = queue.sends.get_mut(&handle) else {
                continue;
            };
            let contact_id = send.contact_id.clone();
            match send.transition_to(SendState::Dispatching, None) {
                Ok(()) => claimed.push((handle, contact_id.clone(), send.body.clone())),
                Err(e) => error!(handle = %handle, "Could not claim due send: {}", e),
            }
            queue.release(&contact_id);
        }
        claimed
    };

    for (handle, contact_id, body) in claimed {
        let _ = shared.events.send(SendEvent {
            handle,
            contact_id: contact_id.clone(),
            state: SendState::Dispatching,
        });
        let shared = Arc::clone(shared);
        tokio::spawn(async move {
            let outcome = shared.outbox.deliver(&contact_id, &body).await;
            finish(&shared, handle, contact_id, outcome).await;
        });
    }
}

/// Record the delivery outcome on the send.
async fn finish(
    shared: &Shared,
    handle: SendHandle,
    contact_id: ContactId,
    outcome: DeliveryOutcome,
) {
    let (state, reason) = match outcome {
        DeliveryOutcome::Sent(_) => (SendState::Fired, None),
        DeliveryOutcome::Suppressed => (
            SendState::Suppressed,
            Some("lead is do-not-contact at dispatch time".to_string()),
        ),
        DeliveryOutcome::Failed(e) => (SendState::Failed, Some(e.to_string())),
    };

    {
        let mut queue = shared.queue.lock().await;
        let Some(send) = queue.sends.get_mut(&handle) else {
            error!(handle = %handle, "Finished send missing from scheduler");
            return;
        };
        if let Err(e) = send.transition_to(state, reason) {
            error!(handle = %handle, "Could not record send outcome: {}", e);
            return;
        }
    }

    match state {
        SendState::Fired => info!(handle = %handle, contact = %contact_id, "Scheduled send fired"),
        _ => warn!(
            handle = %handle,
            contact = %contact_id,
            state = %state,
            "Scheduled send did not fire"
        ),
    }
    let _ = shared.events.send(SendEvent {
        handle,
        contact_id,
        state,
    });
}
