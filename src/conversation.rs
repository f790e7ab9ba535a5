//! Conversation timelines merged from the inbound and outbound logs.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::store::{InboundMessage, MessageStore, OutboundMessage};
use crate::types::{ContactId, Direction, MessageTime};

/// One message in a conversation view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub direction: Direction,
    pub body: String,
    pub timestamp: MessageTime,
}

impl From<InboundMessage> for ConversationEntry {
    fn from(msg: InboundMessage) -> Self {
        Self {
            direction: Direction::Inbound,
            body: msg.body,
            timestamp: msg.received_at,
        }
    }
}

impl From<OutboundMessage> for ConversationEntry {
    fn from(msg: OutboundMessage) -> Self {
        Self {
            direction: Direction::Outbound,
            body: msg.body,
            timestamp: msg.sent_at,
        }
    }
}

/// Builds per-contact timelines on demand.
pub struct ConversationAssembler {
    store: Arc<MessageStore>,
}

impl ConversationAssembler {
    pub fn new(store: Arc<MessageStore>) -> Self {
        Self { store }
    }

    /// Time-ordered conversation for a contact.
    pub async fn assemble(&self, contact_id: &ContactId) -> Vec<ConversationEntry> {
        let inbound = self.store.inbound_for(contact_id).await;
        let outbound = self.store.outbound_for(contact_id).await;
        let timeline = merge(inbound, outbound);

        let unparsed = timeline
            .iter()
            .filter(|e| e.timestamp.is_unparsed())
            .count();
        if unparsed > 0 {
            warn!(
                contact = %contact_id,
                count = unparsed,
                "Conversation contains entries with unparsable timestamps"
            );
        }

        timeline
    }
}

/// Concatenate inbound then outbound and stable-sort by timestamp.
///
/// Stability gives the tie-break: equal instants keep per-log order with
/// inbound ahead of outbound. Unparsed timestamps land after everything else.
pub fn merge(
    inbound: Vec<InboundMessage>,
    outbound: Vec<OutboundMessage>,
) -> Vec<ConversationEntry> {
    let mut entries: Vec<ConversationEntry> = Vec::with_capacity(inbound.len() + outbound.len());
    entries.extend(inbound.into_iter().map(ConversationEntry::from));
    entries.extend(outbound.into_iter().map(ConversationEntry::from));
    entries.sort_by(|a, b| a.timestamp.sort_key().cmp(&b.timestamp.sort_key()));
    entries
}
