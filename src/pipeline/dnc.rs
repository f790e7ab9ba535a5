//! Do-not-contact classifier.
//!
//! Flags inbound replies containing an opt-out keyword ("stop", "remove",
//! "no more", "unsubscribe" by default) and marks the lead DNC. Matching is a
//! case-insensitive substring match, so "STOP texting me" and "stopped" both
//! count.

use std::collections::BTreeSet;
use std::sync::Arc;

use regex::Regex;
use tracing::{debug, info};

use crate::config::DEFAULT_DNC_KEYWORDS;
use crate::store::{InboundMessage, LeadRegistry, MessageStore};
use crate::types::ContactId;

/// Keyword policy compiled into one case-insensitive alternation.
#[derive(Debug, Clone)]
pub struct DncPolicy {
    keywords: Vec<String>,
    /// `None` when the keyword list is empty (matches nothing).
    regex: Option<Regex>,
}

impl DncPolicy {
    /// Build a policy from a keyword list. Keywords are matched literally.
    pub fn new<S: AsRef<str>>(keywords: &[S]) -> Result<Self, regex::Error> {
        let keywords: Vec<String> = keywords
            .iter()
            .map(|k| k.as_ref().trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();

        let regex = if keywords.is_empty() {
            None
        } else {
            let alternation = keywords
                .iter()
                .map(|k| regex::escape(k))
                .collect::<Vec<_>>()
                .join("|");
            Some(Regex::new(&format!("(?i)(?:{alternation})"))?)
        };

        Ok(Self { keywords, regex })
    }

    /// The default four-keyword policy.
    pub fn default_policy() -> Self {
        Self::new(DEFAULT_DNC_KEYWORDS).expect("default DNC keywords are valid literals")
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    /// The first opt-out keyword found in `body`, as written in the body.
    pub fn find<'a>(&self, body: &'a str) -> Option<&'a str> {
        self.regex.as_ref()?.find(body).map(|m| m.as_str())
    }

    pub fn is_opt_out(&self, body: &str) -> bool {
        self.find(body).is_some()
    }
}

/// Applies a [`DncPolicy`] to inbound messages and updates the lead registry.
pub struct DncClassifier {
    policy: DncPolicy,
    leads: Arc<LeadRegistry>,
    store: Arc<MessageStore>,
}

impl DncClassifier {
    pub fn new(policy: DncPolicy, leads: Arc<LeadRegistry>, store: Arc<MessageStore>) -> Self {
        Self {
            policy,
            leads,
            store,
        }
    }

    pub fn policy(&self) -> &DncPolicy {
        &self.policy
    }

    /// Classify one message. Returns `true` if it is an opt-out, in which
    /// case the lead is now DNC.
    pub async fn classify(&self, message: &InboundMessage) -> bool {
        self.flag(message).await.is_some()
    }

    /// Classify a batch. Returns the contacts that were newly flagged by this
    /// call (contacts already DNC are not repeated).
    pub async fn classify_all(&self, messages: &[InboundMessage]) -> BTreeSet<ContactId> {
        let mut flagged = BTreeSet::new();
        for message in messages {
            if let Some(true) = self.flag(message).await {
                flagged.insert(message.contact_id.clone());
            }
        }
        if !flagged.is_empty() {
            info!(count = flagged.len(), "DNC batch flagged contacts");
        }
        flagged
    }

    /// Classify every stored inbound message.
    pub async fn sweep(&self) -> BTreeSet<ContactId> {
        let messages = self.store.all_inbound().await;
        debug!(messages = messages.len(), "DNC sweep started");
        self.classify_all(&messages).await
    }

    /// `None` if the message is not an opt-out; otherwise whether the lead
    /// was newly flagged.
    async fn flag(&self, message: &InboundMessage) -> Option<bool> {
        let keyword = self.policy.find(&message.body)?;
        let newly = self.leads.mark_dnc(&message.contact_id).await;
        debug!(
            contact = %message.contact_id,
            keyword = keyword,
            newly_flagged = newly,
            "Opt-out keyword matched"
        );
        Some(newly)
    }
}
