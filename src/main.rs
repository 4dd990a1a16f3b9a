use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tech_digest::collector::Collector;
use tech_digest::config::{Config, Settings, SettingsStore};
use tech_digest::curation::CurationEngine;
use tech_digest::llm::GeminiModel;
use tech_digest::notifier::{stats_line, WebhookNotifier};
use tech_digest::pipeline::{Pipeline, RunOutcome};
use tech_digest::routes::{self, AppState};
use tech_digest::scheduler::ActiveSchedule;
use tech_digest::store::DigestStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tech_digest=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let run_now = std::env::args().skip(1).any(|arg| arg == "--now");

    // Load configuration
    let config_path = std::env::var("DIGEST_CONFIG").unwrap_or_else(|_| "feeds.toml".to_string());
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load configuration from {}", config_path))?;
    info!("Loaded {} feeds from {}", config.feeds.len(), config_path);

    let api_key = std::env::var("GEMINI_API_KEY").context("GEMINI_API_KEY is not set")?;
    let model = Arc::new(GeminiModel::new(api_key, &config.model));
    let engine = CurationEngine::new(model, config.model.target_language.clone());

    let collector = Arc::new(Collector::new(config.feeds.clone(), config.window_hours));
    let store = Arc::new(DigestStore::new(config.newsletters_dir()));

    let mut pipeline = Pipeline::new(collector, engine, store);
    if let Some(notifier) = &config.notifier {
        pipeline = pipeline.with_notifier(Arc::new(WebhookNotifier::new(&notifier.webhook_url)));
        info!("Webhook notifications enabled");
    }
    let pipeline = Arc::new(pipeline);

    let settings = Arc::new(SettingsStore::new(
        config.settings_path(),
        Settings {
            cron_schedule: config.cron_schedule.clone(),
            timezone: config.timezone.clone(),
            ..Settings::default()
        },
    ));
    let current = settings.load().await?;

    if run_now {
        info!("Running the digest pipeline once");
        match pipeline.run(current.send_on_generate).await? {
            RunOutcome::Completed(report) => info!(
                path = %report.path.display(),
                "Digest generated: {}",
                stats_line(&report.stats)
            ),
            RunOutcome::Aborted => info!("No new articles, nothing generated"),
        }
        return Ok(());
    }

    // Start the schedule
    let schedule = Arc::new(ActiveSchedule::new(pipeline.clone()).await?);
    schedule
        .reconfigure(&current.cron_schedule, &current.timezone)
        .await?;

    let state = Arc::new(AppState {
        pipeline,
        settings,
        schedule,
        admin_token: std::env::var("ADMIN_TOKEN").ok().filter(|t| !t.is_empty()),
    });
    if state.admin_token.is_none() {
        info!("ADMIN_TOKEN not set, admin routes disabled");
    }

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("Server starting on http://{}", config.bind_addr);

    axum::serve(listener, routes::router(state)).await?;

    Ok(())
}
