use std::fmt::Write as _;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::models::{Category, CuratedArticle, Digest, DigestStats};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("notification endpoint answered HTTP {0}")]
    Rejected(u16),
}

/// Delivery of a finished digest to readers.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, digest: &Digest, date: NaiveDate) -> Result<(), NotifyError>;
}

#[derive(Serialize)]
struct WebhookPayload {
    date: NaiveDate,
    subject: String,
    text: String,
    stats: CuratedCounts,
}

#[derive(Serialize)]
struct CuratedCounts {
    curated: usize,
    highlights: usize,
}

/// Posts the rendered digest as JSON to a webhook.
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("TechDigest/1.0 (Notifier)")
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, digest: &Digest, date: NaiveDate) -> Result<(), NotifyError> {
        let payload = WebhookPayload {
            date,
            subject: subject(digest, date),
            text: render_text(digest, date),
            stats: CuratedCounts {
                curated: digest.curated_count(),
                highlights: digest.highlights.len(),
            },
        };

        let response = self.client.post(&self.url).json(&payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Rejected(status.as_u16()));
        }

        info!(date = %date, "Digest notification delivered");
        Ok(())
    }
}

pub fn subject(digest: &Digest, date: NaiveDate) -> String {
    format!(
        "Tech Digest - {} ({} curated articles)",
        date.format("%d/%m/%Y"),
        digest.curated_count()
    )
}

/// Plain-text rendering of a digest, used as the notification body.
pub fn render_text(digest: &Digest, date: NaiveDate) -> String {
    let mut text = format!("TECH DIGEST - {}\n", date.format("%A, %B %-d, %Y"));
    text.push_str(&"=".repeat(60));
    text.push_str("\n\n");

    if !digest.highlights.is_empty() {
        text.push_str("HIGHLIGHTS\n\n");
        for (i, article) in digest.highlights.iter().enumerate() {
            let _ = writeln!(text, "{}. {}", i + 1, article.title);
            let _ = writeln!(
                text,
                "   Source: {} | {}",
                article.source,
                "*".repeat(article.relevance as usize)
            );
            let _ = writeln!(text, "   {}", article.summary);
            let _ = writeln!(text, "   Link: {}\n", article.url);
        }
        text.push('\n');
    }

    for category in Category::ALL {
        let articles = digest.categories.get(category);
        if articles.is_empty() {
            continue;
        }
        let _ = writeln!(text, "{}\n", category.heading());
        render_section(&mut text, articles);
        text.push('\n');
    }

    text.push_str(&"-".repeat(60));
    text.push('\n');
    text
}

fn render_section(text: &mut String, articles: &[CuratedArticle]) {
    for (i, article) in articles.iter().enumerate() {
        let _ = writeln!(text, "{}. {}", i + 1, article.title);
        let _ = writeln!(text, "   {}", article.summary);
        let _ = writeln!(text, "   {}\n", article.url);
    }
}

/// One-line summary of run stats for logs and CLI output.
pub fn stats_line(stats: &DigestStats) -> String {
    format!(
        "{} raw, {} curated ({} highlights)",
        stats.raw_articles, stats.curated_articles, stats.highlights
    )
}
