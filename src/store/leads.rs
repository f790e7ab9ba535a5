//! LeadRegistry: per-contact attribute map with per-contact locking.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info};

use crate::types::ContactId;

/// Attribute key holding the lead status.
pub const STATUS_KEY: &str = "status";
/// Status of a lead that may be contacted.
pub const STATUS_ACTIVE: &str = "active";
/// Status of a lead that opted out.
pub const STATUS_DNC: &str = "DNC";

/// A lead and its free-form attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub contact_id: ContactId,
    /// Extensible attributes; `status` lives here too.
    pub attributes: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lead {
    fn new(contact_id: ContactId) -> Self {
        let now = Utc::now();
        Self {
            contact_id,
            attributes: Map::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Current status, if one has been set.
    pub fn status(&self) -> Option<&str> {
        self.attributes.get(STATUS_KEY).and_then(Value::as_str)
    }

    /// Whether this lead is flagged do-not-contact.
    pub fn is_dnc(&self) -> bool {
        self.status()
            .is_some_and(|s| s.eq_ignore_ascii_case(STATUS_DNC))
    }

    /// Merge attributes, last write wins per field.
    pub fn merge(&mut self, partial: Map<String, Value>) {
        for (key, value) in partial {
            self.attributes.insert(key, value);
        }
        self.updated_at = Utc::now();
    }

    pub fn set_status(&mut self, status: &str) {
        self.attributes
            .insert(STATUS_KEY.to_string(), Value::String(status.to_string()));
        self.updated_at = Utc::now();
    }
}

/// Outcome of a bulk lead import.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub imported: usize,
    pub skipped: usize,
}

/// Registry of leads. Every mutation of one contact's lead is serialized by
/// that contact's mutex.
#[derive(Debug, Default)]
pub struct LeadRegistry {
    leads: RwLock<HashMap<ContactId, Arc<Mutex<Lead>>>>,
}

impl LeadRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Get a lead, creating an empty one on first access.
    pub async fn get(&self, contact_id: &ContactId) -> Lead {
        self.slot(contact_id).await.lock().await.clone()
    }

    /// Get a lead without creating it.
    pub async fn peek(&self, contact_id: &ContactId) -> Option<Lead> {
        let slot = self.leads.read().await.get(contact_id).cloned()?;
        let lead = slot.lock().await.clone();
        Some(lead)
    }

    /// Merge `partial` into the lead's attributes and return the result.
    pub async fn update(&self, contact_id: &ContactId, partial: Map<String, Value>) -> Lead {
        let slot = self.slot(contact_id).await;
        let mut lead = slot.lock().await;
        lead.merge(partial);
        debug!(contact = %contact_id, "Lead updated");
        lead.clone()
    }

    /// Set the lead's status and return the result.
    pub async fn set_status(&self, contact_id: &ContactId, status: &str) -> Lead {
        let slot = self.slot(contact_id).await;
        let mut lead = slot.lock().await;
        lead.set_status(status);
        info!(contact = %contact_id, status = status, "Lead status set");
        lead.clone()
    }

    /// Flag a lead DNC. Returns `true` if it was not already flagged.
    pub async fn mark_dnc(&self, contact_id: &ContactId) -> bool {
        let slot = self.slot(contact_id).await;
        let mut lead = slot.lock().await;
        if lead.is_dnc() {
            return false;
        }
        lead.set_status(STATUS_DNC);
        info!(contact = %contact_id, "Lead flagged do-not-contact");
        true
    }

    /// Lock a lead for the duration of the returned guard.
    ///
    /// Used by the send path to hold the lead across a status check and the
    /// dispatch itself.
    pub async fn lock(&self, contact_id: &ContactId) -> OwnedMutexGuard<Lead> {
        self.slot(contact_id).await.lock_owned().await
    }

    /// All known contacts, sorted.
    pub async fn contacts(&self) -> Vec<ContactId> {
        let mut contacts: Vec<ContactId> = self.leads.read().await.keys().cloned().collect();
        contacts.sort();
        contacts
    }

    /// Snapshot of every lead, sorted by contact.
    pub async fn list(&self) -> Vec<Lead> {
        let slots: Vec<Arc<Mutex<Lead>>> = self.leads.read().await.values().cloned().collect();
        let mut leads = Vec::with_capacity(slots.len());
        for slot in slots {
            leads.push(slot.lock().await.clone());
        }
        leads.sort_by(|a, b| a.contact_id.cmp(&b.contact_id));
        leads
    }

    /// Import lead records. Each record needs a `name` and a non-blank
    /// string `phone`; the remaining fields (including `name`) are merged as
    /// attributes. Invalid records are skipped.
    pub async fn import(&self, records: Vec<Value>) -> ImportSummary {
        let mut summary = ImportSummary::default();
        for record in records {
            let Value::Object(mut fields) = record else {
                summary.skipped += 1;
                continue;
            };
            if !fields.contains_key("name") {
                summary.skipped += 1;
                continue;
            }
            let contact = fields
                .remove("phone")
                .and_then(|v| v.as_str().map(ContactId::parse));
            match contact {
                Some(Ok(contact_id)) => {
                    self.update(&contact_id, fields).await;
                    summary.imported += 1;
                }
                _ => summary.skipped += 1,
            }
        }
        info!(
            imported = summary.imported,
            skipped = summary.skipped,
            "Lead import finished"
        );
        summary
    }

    async fn slot(&self, contact_id: &ContactId) -> Arc<Mutex<Lead>> {
        if let Some(slot) = self.leads.read().await.get(contact_id) {
            return Arc::clone(slot);
        }
        let mut leads = self.leads.write().await;
        let slot = leads.entry(contact_id.clone()).or_insert_with(|| {
            debug!(contact = %contact_id, "Lead created");
            Arc::new(Mutex::new(Lead::new(contact_id.clone())))
        });
        Arc::clone(slot)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn contact(s: &str) -> ContactId {
        ContactId::parse(s).unwrap()
    }

    fn attrs(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[tokio::test]
    async fn get_creates_empty_lead() {
        let registry = LeadRegistry::new();
        let c = contact("+1555");
        assert!(registry.peek(&c).await.is_none());

        let lead = registry.get(&c).await;
        assert_eq!(lead.contact_id, c);
        assert!(lead.attributes.is_empty());
        assert!(lead.status().is_none());
        assert!(registry.peek(&c).await.is_some());
    }

    #[tokio::test]
    async fn update_merges_last_write_wins() {
        let registry = LeadRegistry::new();
        let c = contact("+1555");
        registry
            .update(&c, attrs(json!({"name": "Ann", "address": "1 Main St"})))
            .await;
        let lead = registry
            .update(&c, attrs(json!({"name": "Anne", "status": "active"})))
            .await;

        assert_eq!(lead.attributes["name"], "Anne");
        assert_eq!(lead.attributes["address"], "1 Main St");
        assert_eq!(lead.status(), Some(STATUS_ACTIVE));
    }

    #[tokio::test]
    async fn set_status_and_dnc_detection() {
        let registry = LeadRegistry::new();
        let c = contact("+1555");
        assert!(!registry.set_status(&c, STATUS_ACTIVE).await.is_dnc());
        assert!(registry.set_status(&c, STATUS_DNC).await.is_dnc());
        assert!(registry.get(&c).await.is_dnc());
    }

    #[tokio::test]
    async fn dnc_status_is_case_insensitive() {
        let registry = LeadRegistry::new();
        let c = contact("+1555");
        registry.update(&c, attrs(json!({"status": "dnc"}))).await;
        assert!(registry.get(&c).await.is_dnc());
    }

    #[tokio::test]
    async fn mark_dnc_reports_only_new_flags() {
        let registry = LeadRegistry::new();
        let c = contact("+1555");
        assert!(registry.mark_dnc(&c).await);
        assert!(!registry.mark_dnc(&c).await);
    }

    #[tokio::test]
    async fn concurrent_updates_do_not_lose_fields() {
        let registry = LeadRegistry::new();
        let c = contact("+1555");
        let mut handles = Vec::new();
        for i in 0..32 {
            let registry = Arc::clone(&registry);
            let c = c.clone();
            handles.push(tokio::spawn(async move {
                let mut partial = Map::new();
                partial.insert(format!("field_{i}"), json!(i));
                registry.update(&c, partial).await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(registry.get(&c).await.attributes.len(), 32);
    }

    #[tokio::test]
    async fn lock_blocks_concurrent_mutation() {
        let registry = LeadRegistry::new();
        let c = contact("+1555");
        let guard = registry.lock(&c).await;

        let registry2 = Arc::clone(&registry);
        let c2 = c.clone();
        let pending = tokio::spawn(async move { registry2.mark_dnc(&c2).await });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!pending.is_finished());
        assert!(!guard.is_dnc());
        drop(guard);

        assert!(pending.await.unwrap());
        assert!(registry.get(&c).await.is_dnc());
    }

    #[tokio::test]
    async fn import_requires_name_and_phone() {
        let registry = LeadRegistry::new();
        let summary = registry
            .import(vec![
                json!({"name": "Ann", "phone": "+1000"}),
                json!({"name": "No Phone"}),
                json!({"name": "Blank", "phone": "  "}),
                json!({"phone": "+2000"}),
                json!("not an object"),
            ])
            .await;

        assert_eq!(summary, ImportSummary { imported: 1, skipped: 4 });
        assert!(registry.peek(&contact("+2000")).await.is_none());
        let lead = registry.get(&contact("+1000")).await;
        assert_eq!(lead.attributes["name"], "Ann");
        assert!(!lead.attributes.contains_key("phone"));
    }

    #[tokio::test]
    async fn list_is_sorted_by_contact() {
        let registry = LeadRegistry::new();
        registry.get(&contact("+3")).await;
        registry.get(&contact("+1")).await;
        let ids: Vec<String> = registry
            .list()
            .await
            .into_iter()
            .map(|l| l.contact_id.to_string())
            .collect();
        assert_eq!(ids, vec!["+1", "+3"]);
    }
}
