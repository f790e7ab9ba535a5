//! Integration tests for the engagement REST API and end-to-end flows.
//!
//! Each test spins up an Axum server on a random port and exercises the real
//! REST contract with reqwest.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::timeout;

use leadflow::api::routes;
use leadflow::config::EngagementConfig;
use leadflow::engagement::Engagement;
use leadflow::error::DispatchError;
use leadflow::outreach::{Dispatcher, SendState};
use leadflow::types::{ContactId, Direction};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Stub dispatcher that records every send (no carrier calls).
#[derive(Default)]
struct StubDispatcher {
    sent: Mutex<Vec<(String, String)>>,
}

impl StubDispatcher {
    fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Dispatcher for StubDispatcher {
    fn name(&self) -> &str {
        "stub"
    }

    async fn send(&self, contact_id: &ContactId, body: &str) -> Result<(), DispatchError> {
        self.sent
            .lock()
            .unwrap()
            .push((contact_id.to_string(), body.to_string()));
        Ok(())
    }
}

struct TestServer {
    base: String,
    engagement: Arc<Engagement>,
    dispatcher: Arc<StubDispatcher>,
    client: reqwest::Client,
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn get(&self, path: &str) -> (u16, Value) {
        let resp = self.client.get(self.url(path)).send().await.unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }

    async fn post(&self, path: &str, body: Value) -> (u16, Value) {
        let resp = self
            .client
            .post(self.url(path))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }
}

/// Start an Axum server on a random port.
async fn start_server(config: EngagementConfig) -> TestServer {
    let dispatcher = Arc::new(StubDispatcher::default());
    let engagement =
        Engagement::new(config, Arc::clone(&dispatcher) as Arc<dyn Dispatcher>).unwrap();
    let app = routes(Arc::clone(&engagement));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    TestServer {
        base: format!("http://127.0.0.1:{port}"),
        engagement,
        dispatcher,
        client: reqwest::Client::new(),
    }
}

fn contact(s: &str) -> ContactId {
    ContactId::parse(s).unwrap()
}

// ── REST Tests ───────────────────────────────────────────────────────

#[tokio::test]
async fn health_endpoint() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(EngagementConfig::default()).await;
        let (status, body) = server.get("/health").await;
        assert_eq!(status, 200);
        assert_eq!(body["status"], "ok");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn inbound_stop_reply_flags_lead() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(EngagementConfig::default()).await;

        let (status, body) = server
            .post(
                "/api/inbound",
                json!({"from": "+1555", "body": "please STOP texting me"}),
            )
            .await;
        assert_eq!(status, 200);
        assert_eq!(body["opted_out"], true);

        let (_, lead) = server.get("/api/leads/+1555").await;
        assert_eq!(lead["attributes"]["status"], "DNC");

        let (_, inbox) = server.get("/api/inbox").await;
        assert_eq!(inbox.as_array().unwrap().len(), 1);
        assert_eq!(inbox[0]["contact_id"], "+1555");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn inbound_without_sender_is_rejected() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(EngagementConfig::default()).await;
        let (status, body) = server.post("/api/inbound", json!({"body": "hi"})).await;
        assert_eq!(status, 400);
        assert!(body["error"].as_str().unwrap().contains("contact"));
        assert!(server.engagement.store().contacts().await.is_empty());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn conversation_orders_inbound_then_outbound() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(EngagementConfig::default()).await;
        let c = contact("+1555");
        let t0 = Utc::now() - ChronoDuration::minutes(5);

        server
            .engagement
            .record_outbound(&c, "reply", t0 + ChronoDuration::seconds(10))
            .await
            .unwrap();
        server.engagement.receive_inbound(&c, "question", t0).await;

        let (status, body) = server.get("/api/conversations/+1555").await;
        assert_eq!(status, 200);
        let entries = body.as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["direction"], "inbound");
        assert_eq!(entries[0]["body"], "question");
        assert_eq!(entries[1]["direction"], "outbound");
        assert_eq!(entries[1]["body"], "reply");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn lead_upload_and_update() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(EngagementConfig::default()).await;

        let (status, summary) = server
            .post(
                "/api/leads",
                json!([
                    {"name": "Ann", "phone": "+1000"},
                    {"name": "Missing phone"},
                    {"phone": "+2000"}
                ]),
            )
            .await;
        assert_eq!(status, 200);
        assert_eq!(summary["imported"], 1);
        assert_eq!(summary["skipped"], 2);

        let (status, _) = server.post("/api/leads", json!({"phone": "+1"})).await;
        assert_eq!(status, 400);

        let (status, updated) = server
            .post("/api/leads/+1000", json!({"status": "active", "offer": 42000}))
            .await;
        assert_eq!(status, 200);
        assert_eq!(updated["lead"]["attributes"]["name"], "Ann");
        assert_eq!(updated["lead"]["attributes"]["offer"], 42000);

        let (status, _) = server.post("/api/leads/+1000", json!({})).await;
        assert_eq!(status, 400);

        let (_, leads) = server.get("/api/leads").await;
        assert_eq!(leads.as_array().unwrap().len(), 1);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn schedule_rejects_past_time_and_missing_fields() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(EngagementConfig::default()).await;
        let past = (Utc::now() - ChronoDuration::minutes(1)).to_rfc3339();

        let (status, body) = server
            .post(
                "/api/schedule",
                json!({"to": "+1555", "message": "hello", "send_at": past}),
            )
            .await;
        assert_eq!(status, 400);
        assert!(body["error"].as_str().unwrap().contains("not in the future"));

        let (status, _) = server
            .post("/api/schedule", json!({"to": "+1555", "message": "hello"}))
            .await;
        assert_eq!(status, 400);

        let (_, scheduled) = server.get("/api/scheduled").await;
        assert!(scheduled.as_array().unwrap().is_empty());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn schedule_fires_and_cannot_be_cancelled_afterwards() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(EngagementConfig::default()).await;
        let mut events = server.engagement.scheduler().subscribe();
        let send_at = (Utc::now() + ChronoDuration::milliseconds(100)).to_rfc3339();

        let (status, body) = server
            .post(
                "/api/schedule",
                json!({"to": "+1555", "message": "hello", "send_at": send_at}),
            )
            .await;
        assert_eq!(status, 200);
        let handle = body["handle"].as_u64().unwrap();

        loop {
            let event = events.recv().await.unwrap();
            if event.handle.0 == handle && event.state.is_terminal() {
                assert_eq!(event.state, SendState::Fired);
                break;
            }
        }

        assert_eq!(server.dispatcher.sent(), vec![("+1555".to_string(), "hello".to_string())]);
        let (status, body) = server
            .post(&format!("/api/scheduled/{handle}/cancel"), json!({}))
            .await;
        assert_eq!(status, 409);
        assert_eq!(body["result"], "already_fired");

        let outbound = server.engagement.store().outbound_for(&contact("+1555")).await;
        assert_eq!(outbound.len(), 1);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn cancel_pending_and_unknown() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(EngagementConfig::default()).await;
        let send_at = (Utc::now() + ChronoDuration::hours(1)).to_rfc3339();
        let (_, body) = server
            .post(
                "/api/schedule",
                json!({"to": "+1555", "message": "later", "send_at": send_at}),
            )
            .await;
        let handle = body["handle"].as_u64().unwrap();

        let (status, body) = server
            .post(&format!("/api/scheduled/{handle}/cancel"), json!({}))
            .await;
        assert_eq!(status, 200);
        assert_eq!(body["result"], "cancelled");

        let (_, scheduled) = server.get("/api/scheduled").await;
        assert_eq!(scheduled[0]["state"], "cancelled");

        let (status, _) = server.post("/api/scheduled/9999/cancel", json!({})).await;
        assert_eq!(status, 404);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn outbound_to_dnc_contact_is_refused() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(EngagementConfig::default()).await;
        server
            .engagement
            .receive_inbound(&contact("+1555"), "unsubscribe", Utc::now())
            .await;

        let (status, _) = server
            .post("/api/outbound", json!({"to": "+1555", "body": "new offer"}))
            .await;
        assert_eq!(status, 409);
        assert!(server.dispatcher.sent().is_empty());

        let (status, body) = server
            .post("/api/outbound", json!({"to": "+1666", "body": "hello"}))
            .await;
        assert_eq!(status, 200);
        assert_eq!(body["body"], "hello");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn check_dnc_endpoint_reports_new_flags() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(EngagementConfig::default()).await;
        // Appended directly, bypassing ingest-time classification.
        server
            .engagement
            .store()
            .append_inbound(&contact("+1555"), "No more texts", Utc::now())
            .await;

        let (_, body) = server.post("/api/dnc/check", json!({})).await;
        assert_eq!(body["flagged_dnc"], json!(["+1555"]));

        let (_, body) = server.post("/api/dnc/check", json!({})).await;
        assert_eq!(body["flagged_dnc"], json!([]));
    })
    .await
    .expect("test timed out");
}

// ── End-to-end drip flows ────────────────────────────────────────────

#[tokio::test]
async fn drip_run_after_four_quiet_days() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server(EngagementConfig::default()).await;
        let c = contact("+1555");
        let t0 = Utc::now() - ChronoDuration::days(4);

        server.engagement.leads().get(&c).await;
        server
            .engagement
            .record_outbound(&c, "We'd like to buy your lot", t0)
            .await
            .unwrap();

        let before = Utc::now();
        let (status, body) = server.post("/api/drip/run", json!({})).await;
        let after = Utc::now();
        assert_eq!(status, 200);

        let drips = body["scheduled_drips"].as_array().unwrap();
        assert_eq!(drips.len(), 1);
        assert_eq!(drips[0]["contact_id"], "+1555");

        let fire_at: chrono::DateTime<Utc> =
            serde_json::from_value(drips[0]["fire_at"].clone()).unwrap();
        assert!(fire_at >= before + ChronoDuration::minutes(1));
        assert!(fire_at <= after + ChronoDuration::minutes(1));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn dnc_reply_after_drip_enqueue_suppresses_the_send() {
    timeout(TEST_TIMEOUT, async {
        let config = EngagementConfig {
            drip_delay: Duration::from_millis(300),
            ..EngagementConfig::default()
        };
        let server = start_server(config).await;
        let c = contact("+1555");
        let mut events = server.engagement.scheduler().subscribe();

        server.engagement.leads().get(&c).await;
        server
            .engagement
            .record_outbound(&c, "offer", Utc::now() - ChronoDuration::days(4))
            .await
            .unwrap();

        let drips = server.engagement.run_drip().await;
        assert_eq!(drips.len(), 1);
        let handle = drips[0].handle;

        // Opt-out lands while the follow-up is still pending.
        let receipt = server
            .engagement
            .receive_inbound(&c, "remove me please", Utc::now())
            .await;
        assert!(receipt.opted_out);

        loop {
            let event = events.recv().await.unwrap();
            if event.handle == handle && event.state.is_terminal() {
                assert_eq!(event.state, SendState::Suppressed);
                break;
            }
        }
        assert!(server.dispatcher.sent().is_empty());
        let timeline = server.engagement.conversation(&c).await;
        assert!(timeline.iter().all(|e| e.direction != Direction::Outbound || e.body == "offer"));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn drip_fire_closes_the_loop() {
    timeout(TEST_TIMEOUT, async {
        let config = EngagementConfig {
            drip_delay: Duration::from_millis(50),
            drip_template: "Any thoughts?".into(),
            ..EngagementConfig::default()
        };
        let server = start_server(config).await;
        let c = contact("+1555");
        let mut events = server.engagement.scheduler().subscribe();

        server.engagement.leads().get(&c).await;
        server
            .engagement
            .record_outbound(&c, "offer", Utc::now() - ChronoDuration::days(4))
            .await
            .unwrap();

        let drips = server.engagement.run_drip().await;
        let handle = drips[0].handle;
        loop {
            let event = events.recv().await.unwrap();
            if event.handle == handle && event.state.is_terminal() {
                assert_eq!(event.state, SendState::Fired);
                break;
            }
        }

        let outbound = server.engagement.store().outbound_for(&c).await;
        assert_eq!(outbound.len(), 2);
        assert_eq!(outbound[1].body, "Any thoughts?");
        assert_eq!(server.dispatcher.sent().len(), 1);
    })
    .await
    .expect("test timed out");
}
