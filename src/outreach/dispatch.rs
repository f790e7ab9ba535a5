//! Dispatch collaborator and the guarded send path.
//!
//! Every outbound message, scheduled or direct, goes through [`Outbox::deliver`]:
//! lock the lead, re-check DNC, hand the body to the [`Dispatcher`], and on
//! success append it to the outbound log.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use crate::error::{DispatchError, ValidationError};
use crate::store::{LeadRegistry, MessageStore, OutboundMessage};
use crate::types::ContactId;

/// External send mechanism (carrier API, SMS gateway, ...).
///
/// Retries are the implementation's business; the core records a returned
/// error as-is.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Send `body` to `contact_id`.
    async fn send(&self, contact_id: &ContactId, body: &str) -> Result<(), DispatchError>;
}

/// Dispatcher that only logs. Used when no carrier is configured.
pub struct LogDispatcher;

#[async_trait]
impl Dispatcher for LogDispatcher {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, contact_id: &ContactId, body: &str) -> Result<(), DispatchError> {
        info!(contact = %contact_id, body = body, "Message dispatched (log only)");
        Ok(())
    }
}

/// Result of one guarded delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Dispatched and appended to the outbound log.
    Sent(OutboundMessage),
    /// Lead was DNC at dispatch time; nothing was sent.
    Suppressed,
    /// Dispatcher reported a failure; nothing was appended.
    Failed(DispatchError),
}

/// The single outbound path shared by the scheduler and direct sends.
pub struct Outbox {
    leads: Arc<LeadRegistry>,
    store: Arc<MessageStore>,
    dispatcher: Arc<dyn Dispatcher>,
}

impl Outbox {
    pub fn new(
        leads: Arc<LeadRegistry>,
        store: Arc<MessageStore>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        Self {
            leads,
            store,
            dispatcher,
        }
    }

    /// Deliver one message.
    ///
    /// The lead stays locked from the status check until the outbound append,
    /// so a DNC flag either lands before (and suppresses) or after (and does
    /// not interrupt) the send.
    pub async fn deliver(&self, contact_id: &ContactId, body: &str) -> DeliveryOutcome {
        if body.trim().is_empty() {
            return DeliveryOutcome::Failed(DispatchError::Invalid(ValidationError::EmptyBody));
        }

        let lead = self.leads.lock(contact_id).await;
        if lead.is_dnc() {
            warn!(contact = %contact_id, "Send suppressed: lead is do-not-contact");
            return DeliveryOutcome::Suppressed;
        }

        if let Err(e) = self.dispatcher.send(contact_id, body).await {
            warn!(
                contact = %contact_id,
                dispatcher = self.dispatcher.name(),
                error = %e,
                "Dispatch failed"
            );
            return DeliveryOutcome::Failed(e);
        }

        let outcome = match self.store.append_outbound(contact_id, body, Utc::now()).await {
            Ok(message) => DeliveryOutcome::Sent(message),
            Err(e) => DeliveryOutcome::Failed(DispatchError::Invalid(e)),
        };
        drop(lead);
        outcome
    }
}
