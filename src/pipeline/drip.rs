//! Drip engine: follow-ups for leads that went quiet.
//!
//! A lead is due when it has been sent something and either never replied
//! after the last send, or its last reply is older than the silence
//! threshold. Each due lead gets one follow-up, scheduled a short delay out
//! so it can still be cancelled before it commits.
//!
//! Passes run on demand. [`spawn_drip_ticker`] is an opt-in external driver
//! for running them on a cron schedule.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::dnc::DncClassifier;
use crate::config::EngagementConfig;
use crate::error::ConfigError;
use crate::outreach::{Scheduler, SendHandle, SendRequest};
use crate::store::{LeadRegistry, MessageStore};
use crate::types::ContactId;

/// Silence and timing policy for drips.
#[derive(Debug, Clone)]
pub struct DripPolicy {
    pub silence_threshold: Duration,
    pub dispatch_delay: Duration,
    pub template: String,
}

impl DripPolicy {
    /// Build a policy from validated configuration.
    pub fn from_config(config: &EngagementConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let silence_threshold =
            to_delta("LEADFLOW_SILENCE_THRESHOLD_SECS", config.silence_threshold)?;
        Ok(Self {
            silence_threshold,
            dispatch_delay: to_delta("LEADFLOW_DRIP_DELAY_SECS", config.drip_delay)?,
            template: config.drip_template.clone(),
        })
    }

    /// Whether a lead last sent to at `last_sent` and last heard from at
    /// `last_reply` is due for a follow-up at `now`.
    pub fn is_due(
        &self,
        last_sent: DateTime<Utc>,
        last_reply: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> bool {
        match last_reply {
            None => true,
            Some(reply) if reply < last_sent => true,
            Some(reply) => now.signed_duration_since(reply) >= self.silence_threshold,
        }
    }
}

impl Default for DripPolicy {
    fn default() -> Self {
        Self::from_config(&EngagementConfig::default())
            .expect("default drip windows are in range")
    }
}

fn to_delta(key: &str, window: std::time::Duration) -> Result<Duration, ConfigError> {
    Duration::from_std(window).map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}

/// A proposed follow-up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DripCandidate {
    pub contact_id: ContactId,
    pub suggested_body: String,
    pub fire_at: DateTime<Utc>,
}

/// A candidate that was handed to the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduledDrip {
    pub handle: SendHandle,
    #[serde(flatten)]
    pub candidate: DripCandidate,
}

pub struct DripEngine {
    policy: DripPolicy,
    leads: Arc<LeadRegistry>,
    store: Arc<MessageStore>,
    scheduler: Arc<Scheduler>,
    dnc: Arc<DncClassifier>,
    /// Held for a whole pass so overlapping passes cannot both schedule the
    /// same lead.
    pass: Mutex<()>,
}

impl DripEngine {
    pub fn new(
        policy: DripPolicy,
        leads: Arc<LeadRegistry>,
        store: Arc<MessageStore>,
        scheduler: Arc<Scheduler>,
        dnc: Arc<DncClassifier>,
    ) -> Self {
        Self {
            policy,
            leads,
            store,
            scheduler,
            dnc,
            pass: Mutex::new(()),
        }
    }

    pub fn policy(&self) -> &DripPolicy {
        &self.policy
    }

    /// Work out which leads are due at `now` without scheduling anything.
    ///
    /// Skips DNC leads, leads never sent to, and leads that already have a
    /// follow-up waiting in the scheduler.
    pub async fn evaluate(&self, now: DateTime<Utc>) -> Vec<DripCandidate> {
        let mut candidates = Vec::new();

        for contact_id in self.leads.contacts().await {
            let Some(lead) = self.leads.peek(&contact_id).await else {
                continue;
            };
            if lead.is_dnc() {
                debug!(contact = %contact_id, "Drip skipped: do-not-contact");
                continue;
            }

            let Some(last_sent) = self
                .store
                .latest_outbound(&contact_id)
                .await
                .and_then(|m| m.sent_at.instant())
            else {
                debug!(contact = %contact_id, "Drip skipped: nothing sent yet");
                continue;
            };

            if self.scheduler.has_pending_for(&contact_id).await {
                debug!(contact = %contact_id, "Drip skipped: send already pending");
                continue;
            }

            let last_reply = self
                .store
                .latest_inbound(&contact_id)
                .await
                .and_then(|m| m.received_at.instant());

            if !self.policy.is_due(last_sent, last_reply, now) {
                continue;
            }
            let Some(fire_at) = now.checked_add_signed(self.policy.dispatch_delay) else {
                warn!(contact = %contact_id, "Drip skipped: fire time out of range");
                continue;
            };
            candidates.push(DripCandidate {
                contact_id,
                suggested_body: self.policy.template.clone(),
                fire_at,
            });
        }

        candidates
    }

    /// Run a full pass: sweep for opt-outs, evaluate, and schedule one
    /// follow-up per due lead. Returns what was scheduled. Passes are
    /// serialized.
    pub async fn run(&self, now: DateTime<Utc>) -> Vec<ScheduledDrip> {
        let _pass = self.pass.lock().await;
        let flagged = self.dnc.sweep().await;
        if !flagged.is_empty() {
            info!(count = flagged.len(), "Pre-drip DNC sweep flagged contacts");
        }

        let candidates = self.evaluate(now).await;
        let mut scheduled = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            let request = SendRequest {
                contact_id: candidate.contact_id.clone(),
                body: candidate.suggested_body.clone(),
                fire_at: candidate.fire_at,
            };
            match self.scheduler.enqueue(request).await {
                Ok(handle) => scheduled.push(ScheduledDrip { handle, candidate }),
                Err(e) => warn!(
                    contact = %candidate.contact_id,
                    error = %e,
                    "Drip candidate could not be scheduled"
                ),
            }
        }

        info!(scheduled = scheduled.len(), "Drip pass finished");
        scheduled
    }
}

/// Parse a cron expression for [`spawn_drip_ticker`].
pub fn parse_schedule(expr: &str) -> Result<cron::Schedule, ConfigError> {
    cron::Schedule::from_str(expr).map_err(|e| ConfigError::InvalidCron {
        expr: expr.to_string(),
        reason: e.to_string(),
    })
}

/// Spawn a task that runs a drip pass at every upcoming time of `schedule`.
pub fn spawn_drip_ticker(
    engine: Arc<DripEngine>,
    schedule: cron::Schedule,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let Some(next) = schedule.upcoming(Utc).next() else {
                info!("Drip schedule has no upcoming times; ticker stopping");
                return;
            };
            let wait = (next - Utc::now()).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;
            engine.run(Utc::now()).await;
        }
    })
}
