//! MessageStore: append-only inbound and outbound logs keyed by contact.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::error::ValidationError;
use crate::types::{ContactId, MessageTime};

/// A message received from a contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub contact_id: ContactId,
    pub body: String,
    pub received_at: MessageTime,
}

/// A message sent to a contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub contact_id: ContactId,
    pub body: String,
    pub sent_at: MessageTime,
}

#[derive(Debug, Default)]
struct ContactLog {
    inbound: Vec<InboundMessage>,
    outbound: Vec<OutboundMessage>,
}

/// In-memory message logs. Entries are never mutated or removed.
///
/// The outer map is only write-locked to create a contact's log; appends
/// and reads lock that one contact's log.
#[derive(Debug, Default)]
pub struct MessageStore {
    logs: RwLock<HashMap<ContactId, Arc<Mutex<ContactLog>>>>,
}

impl MessageStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Append an inbound message received at `received_at`.
    pub async fn append_inbound(
        &self,
        contact_id: &ContactId,
        body: &str,
        received_at: DateTime<Utc>,
    ) -> InboundMessage {
        self.push_inbound(contact_id, body, MessageTime::At(received_at))
            .await
    }

    /// Append an inbound message whose timestamp arrived as text.
    ///
    /// An unparsable timestamp is a data error: the message is still stored
    /// (ordered after well-formed entries in views) and the anomaly is logged.
    pub async fn append_inbound_raw(
        &self,
        contact_id: &ContactId,
        body: &str,
        raw_timestamp: &str,
    ) -> InboundMessage {
        let received_at = MessageTime::parse(raw_timestamp);
        if received_at.is_unparsed() {
            warn!(
                contact = %contact_id,
                raw_timestamp = raw_timestamp,
                "Inbound message has unparsable timestamp; retained with sentinel ordering"
            );
        }
        self.push_inbound(contact_id, body, received_at).await
    }

    async fn push_inbound(
        &self,
        contact_id: &ContactId,
        body: &str,
        received_at: MessageTime,
    ) -> InboundMessage {
        let message = InboundMessage {
            contact_id: contact_id.clone(),
            body: body.to_string(),
            received_at,
        };
        let log = self.log_for(contact_id).await;
        log.lock().await.inbound.push(message.clone());
        debug!(contact = %contact_id, "Inbound message appended");
        message
    }

    /// Append an outbound message sent at `sent_at`. Empty bodies are rejected.
    pub async fn append_outbound(
        &self,
        contact_id: &ContactId,
        body: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<OutboundMessage, ValidationError> {
        if body.trim().is_empty() {
            return Err(ValidationError::EmptyBody);
        }
        let message = OutboundMessage {
            contact_id: contact_id.clone(),
            body: body.to_string(),
            sent_at: MessageTime::At(sent_at),
        };
        let log = self.log_for(contact_id).await;
        log.lock().await.outbound.push(message.clone());
        debug!(contact = %contact_id, "Outbound message appended");
        Ok(message)
    }

    /// Inbound messages for a contact, in append order.
    pub async fn inbound_for(&self, contact_id: &ContactId) -> Vec<InboundMessage> {
        match self.existing_log(contact_id).await {
            Some(log) => log.lock().await.inbound.clone(),
            None => Vec::new(),
        }
    }

    /// Outbound messages for a contact, in append order.
    pub async fn outbound_for(&self, contact_id: &ContactId) -> Vec<OutboundMessage> {
        match self.existing_log(contact_id).await {
            Some(log) => log.lock().await.outbound.clone(),
            None => Vec::new(),
        }
    }

    /// Most recent inbound message with a well-formed timestamp.
    pub async fn latest_inbound(&self, contact_id: &ContactId) -> Option<InboundMessage> {
        let log = self.existing_log(contact_id).await?;
        let log = log.lock().await;
        latest_by(&log.inbound, |m| &m.received_at).cloned()
    }

    /// Most recent outbound message with a well-formed timestamp.
    pub async fn latest_outbound(&self, contact_id: &ContactId) -> Option<OutboundMessage> {
        let log = self.existing_log(contact_id).await?;
        let log = log.lock().await;
        latest_by(&log.outbound, |m| &m.sent_at).cloned()
    }

    /// Every contact with at least one logged message.
    pub async fn contacts(&self) -> Vec<ContactId> {
        let mut contacts: Vec<ContactId> = self.logs.read().await.keys().cloned().collect();
        contacts.sort();
        contacts
    }

    /// Every inbound message across all contacts, oldest first.
    pub async fn all_inbound(&self) -> Vec<InboundMessage> {
        let logs: Vec<Arc<Mutex<ContactLog>>> = self.logs.read().await.values().cloned().collect();
        let mut all = Vec::new();
        for log in logs {
            all.extend(log.lock().await.inbound.iter().cloned());
        }
        all.sort_by(|a, b| a.received_at.sort_key().cmp(&b.received_at.sort_key()));
        all
    }

    async fn existing_log(&self, contact_id: &ContactId) -> Option<Arc<Mutex<ContactLog>>> {
        self.logs.read().await.get(contact_id).cloned()
    }

    async fn log_for(&self, contact_id: &ContactId) -> Arc<Mutex<ContactLog>> {
        if let Some(log) = self.existing_log(contact_id).await {
            return log;
        }
        let mut logs = self.logs.write().await;
        Arc::clone(logs.entry(contact_id.clone()).or_default())
    }
}

/// Pick the entry with the greatest well-formed timestamp; the later append
/// wins ties. Unparsed timestamps never count as "latest".
fn latest_by<T>(items: &[T], time: impl Fn(&T) -> &MessageTime) -> Option<&T> {
    let mut best: Option<(&T, DateTime<Utc>)> = None;
    for item in items {
        let Some(at) = time(item).instant() else {
            continue;
        };
        match best {
            Some((_, best_at)) if at < best_at => {}
            _ => best = Some((item, at)),
        }
    }
    best.map(|(item, _)| item)
}
