use std::sync::Arc;

use anyhow::Context;

use leadflow::api;
use leadflow::config::EngagementConfig;
use leadflow::engagement::Engagement;
use leadflow::outreach::{Dispatcher, LogDispatcher};
use leadflow::pipeline::drip::{parse_schedule, spawn_drip_ticker};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = EngagementConfig::from_env().context("invalid LEADFLOW_* configuration")?;

    eprintln!("📨 leadflow v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   API: http://0.0.0.0:{}/api", config.http_port);
    eprintln!(
        "   Silence threshold: {}s, drip delay: {}s",
        config.silence_threshold.as_secs(),
        config.drip_delay.as_secs()
    );
    eprintln!("   DNC keywords: {}", config.dnc_keywords.join(", "));

    // No carrier integration is wired in; sends are logged.
    let dispatcher: Arc<dyn Dispatcher> = Arc::new(LogDispatcher);
    let engagement = Engagement::new(config.clone(), dispatcher)?;

    // ── Optional periodic drip driver ───────────────────────────────────
    let _drip_handle = match config.drip_cron.as_deref() {
        Some(expr) => {
            let schedule = parse_schedule(expr)?;
            eprintln!("   Drip: every '{}'", expr);
            Some(spawn_drip_ticker(Arc::clone(engagement.drip()), schedule))
        }
        None => {
            eprintln!("   Drip: on demand (POST /api/drip/run)");
            None
        }
    };
    eprintln!("   Scheduled sends are in-memory only and do not survive a restart.\n");

    let app = api::routes(Arc::clone(&engagement));
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.http_port))
        .await
        .with_context(|| format!("failed to bind port {}", config.http_port))?;
    tracing::info!(port = config.http_port, "API server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    engagement.shutdown().await;
    Ok(())
}
