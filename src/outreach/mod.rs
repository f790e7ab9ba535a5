//! Outbound delivery: the dispatch seam and the send scheduler.
//!
//! - `dispatch`: `Dispatcher` trait and the DNC-guarded `Outbox` send path
//! - `state`: scheduled send state machine (Pending → Dispatching → Fired/Failed/Suppressed)
//! - `scheduler`: delayed, cancellable, at-most-once firing

pub mod dispatch;
pub mod scheduler;
pub mod state;

pub use dispatch::{DeliveryOutcome, Dispatcher, LogDispatcher, Outbox};
pub use scheduler::{CancelOutcome, Scheduler, SendEvent};
pub use state::{ScheduledSend, SendHandle, SendRequest, SendState};
