//! In-memory state: message logs and the lead registry.

pub mod leads;
pub mod messages;

pub use leads::{ImportSummary, Lead, LeadRegistry, STATUS_ACTIVE, STATUS_DNC};
pub use messages::{InboundMessage, MessageStore, OutboundMessage};
