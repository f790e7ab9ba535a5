//! Lead rules pipeline.
//!
//! Inbound replies flow through `DncClassifier::classify()` on ingest; drip
//! passes run `DncClassifier::sweep()` and then `DripEngine::evaluate()`
//! before handing follow-ups to the scheduler.

pub mod dnc;
pub mod drip;

pub use dnc::{DncClassifier, DncPolicy};
pub use drip::{DripCandidate, DripEngine, DripPolicy, ScheduledDrip, spawn_drip_ticker};
