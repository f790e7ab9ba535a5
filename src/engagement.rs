//! Engagement service. Owns the stores, scheduler, and rule engines and
//! wires them together.
//!
//! Ingest: `receive_inbound()` appends to the inbound log and classifies the
//! reply for opt-out before returning, so a DNC reply is visible to every
//! later drip pass and fire-time check.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::config::EngagementConfig;
use crate::conversation::{ConversationAssembler, ConversationEntry};
use crate::error::{ConfigError, DispatchError, ScheduleError, ValidationError};
use crate::outreach::{
    CancelOutcome, DeliveryOutcome, Dispatcher, Outbox, Scheduler, SendHandle, SendRequest,
};
use crate::pipeline::{DncClassifier, DncPolicy, DripEngine, DripPolicy, ScheduledDrip};
use crate::store::{InboundMessage, LeadRegistry, MessageStore, OutboundMessage};
use crate::types::ContactId;

/// Result of ingesting one inbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InboundReceipt {
    pub message: InboundMessage,
    /// The reply matched the opt-out policy; the lead is now DNC.
    pub opted_out: bool,
}

/// Hosts every component for one process.
pub struct Engagement {
    config: EngagementConfig,
    store: Arc<MessageStore>,
    leads: Arc<LeadRegistry>,
    assembler: ConversationAssembler,
    outbox: Arc<Outbox>,
    scheduler: Arc<Scheduler>,
    dnc: Arc<DncClassifier>,
    drip: Arc<DripEngine>,
}

impl Engagement {
    /// Build the service and start the scheduler. Must be called inside a
    /// Tokio runtime.
    pub fn new(
        config: EngagementConfig,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Result<Arc<Self>, ConfigError> {
        let policy =
            DncPolicy::new(config.dnc_keywords.as_slice()).map_err(|e| ConfigError::InvalidValue {
                key: "dnc_keywords".to_string(),
                message: e.to_string(),
            })?;
        let drip_policy = DripPolicy::from_config(&config)?;

        let store = MessageStore::new();
        let leads = LeadRegistry::new();
        let outbox = Arc::new(Outbox::new(
            Arc::clone(&leads),
            Arc::clone(&store),
            dispatcher,
        ));
        let scheduler = Scheduler::start(Arc::clone(&outbox));
        let dnc = Arc::new(DncClassifier::new(
            policy,
            Arc::clone(&leads),
            Arc::clone(&store),
        ));
        let drip = Arc::new(DripEngine::new(
            drip_policy,
            Arc::clone(&leads),
            Arc::clone(&store),
            Arc::clone(&scheduler),
            Arc::clone(&dnc),
        ));

        info!(
            keywords = config.dnc_keywords.len(),
            silence_threshold_secs = config.silence_threshold.as_secs(),
            drip_delay_secs = config.drip_delay.as_secs(),
            "Engagement service started"
        );

        Ok(Arc::new(Self {
            assembler: ConversationAssembler::new(Arc::clone(&store)),
            config,
            store,
            leads,
            outbox,
            scheduler,
            dnc,
            drip,
        }))
    }

    pub fn config(&self) -> &EngagementConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<MessageStore> {
        &self.store
    }

    pub fn leads(&self) -> &Arc<LeadRegistry> {
        &self.leads
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn drip(&self) -> &Arc<DripEngine> {
        &self.drip
    }

    pub fn dnc(&self) -> &Arc<DncClassifier> {
        &self.dnc
    }

    // ── Inbound ─────────────────────────────────────────────────────

    /// Ingest an inbound message and classify it for opt-out.
    pub async fn receive_inbound(
        &self,
        contact_id: &ContactId,
        body: &str,
        received_at: DateTime<Utc>,
    ) -> InboundReceipt {
        let message = self
            .store
            .append_inbound(contact_id, body, received_at)
            .await;
        self.classify(message).await
    }

    /// Ingest an inbound message whose timestamp arrived as text.
    pub async fn receive_inbound_raw(
        &self,
        contact_id: &ContactId,
        body: &str,
        raw_timestamp: &str,
    ) -> InboundReceipt {
        let message = self
            .store
            .append_inbound_raw(contact_id, body, raw_timestamp)
            .await;
        self.classify(message).await
    }

    async fn classify(&self, message: InboundMessage) -> InboundReceipt {
        let opted_out = self.dnc.classify(&message).await;
        if opted_out {
            info!(contact = %message.contact_id, "Inbound reply opted out");
        }
        InboundReceipt { message, opted_out }
    }

    // ── Outbound ────────────────────────────────────────────────────

    /// Send a message right away through the same guarded path the
    /// scheduler uses.
    pub async fn send_now(
        &self,
        contact_id: &ContactId,
        body: &str,
    ) -> Result<OutboundMessage, DispatchError> {
        match self.outbox.deliver(contact_id, body).await {
            DeliveryOutcome::Sent(message) => Ok(message),
            DeliveryOutcome::Suppressed => Err(DispatchError::DoNotContact {
                contact: contact_id.to_string(),
            }),
            DeliveryOutcome::Failed(e) => Err(e),
        }
    }

    /// Record a message that was sent outside this service. Like
    /// `send_now`, this registers the contact as a lead so drip passes see it.
    pub async fn record_outbound(
        &self,
        contact_id: &ContactId,
        body: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<OutboundMessage, ValidationError> {
        let message = self.store.append_outbound(contact_id, body, sent_at).await?;
        self.leads.get(contact_id).await;
        Ok(message)
    }

    /// Schedule a send for later.
    pub async fn schedule(
        &self,
        contact_id: &ContactId,
        body: &str,
        fire_at: DateTime<Utc>,
    ) -> Result<SendHandle, ScheduleError> {
        self.scheduler
            .enqueue(SendRequest {
                contact_id: contact_id.clone(),
                body: body.to_string(),
                fire_at,
            })
            .await
    }

    pub async fn cancel(&self, handle: SendHandle) -> CancelOutcome {
        self.scheduler.cancel(handle).await
    }

    // ── Views & passes ──────────────────────────────────────────────

    pub async fn conversation(&self, contact_id: &ContactId) -> Vec<ConversationEntry> {
        self.assembler.assemble(contact_id).await
    }

    /// Run one drip pass as of now.
    pub async fn run_drip(&self) -> Vec<ScheduledDrip> {
        self.drip.run(Utc::now()).await
    }

    /// Classify every stored inbound message; returns newly flagged contacts.
    pub async fn check_dnc(&self) -> BTreeSet<ContactId> {
        self.dnc.sweep().await
    }

    /// Stop the scheduler. Pending sends are not persisted.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }
}
