use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use feed_rs::model::Entry;
use feed_rs::parser;
use reqwest::Client;
use scraper::Html;
use tracing::{error, info, warn};

use crate::config::FeedConfig;
use crate::models::RawArticle;

/// Anything that can produce the recent articles for one pipeline run.
#[async_trait]
pub trait ArticleSource: Send + Sync {
    /// Never fails as a whole; unreachable sources contribute nothing.
    async fn collect(&self) -> Vec<RawArticle>;
}

pub struct Collector {
    client: Client,
    sources: Arc<Vec<FeedConfig>>,
    window: chrono::Duration,
}

impl Collector {
    pub fn new(sources: Vec<FeedConfig>, window_hours: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("TechDigest/1.0 (Feed Collector)")
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            sources: Arc::new(sources),
            window: chrono::Duration::hours(window_hours as i64),
        }
    }

    /// Fetches every source concurrently and returns all items in source
    /// order, without the recency filter.
    pub async fn fetch_all(&self) -> Vec<RawArticle> {
        let handles: Vec<_> = self
            .sources
            .iter()
            .cloned()
            .map(|source| {
                let client = self.client.clone();
                tokio::spawn(async move {
                    match fetch_source(&client, &source).await {
                        Ok(articles) => {
                            info!(source = %source.name, count = articles.len(), "Fetched feed");
                            articles
                        }
                        Err(e) => {
                            error!(source = %source.name, "Failed to fetch feed: {:#}", e);
                            Vec::new()
                        }
                    }
                })
            })
            .collect();

        let mut all = Vec::new();
        for (handle, source) in handles.into_iter().zip(self.sources.iter()) {
            match handle.await {
                Ok(articles) => all.extend(articles),
                Err(e) => error!(source = %source.name, "Feed task did not complete: {}", e),
            }
        }
        all
    }
}

#[async_trait]
impl ArticleSource for Collector {
    async fn collect(&self) -> Vec<RawArticle> {
        info!("Collecting from {} feeds", self.sources.len());
        let started = Instant::now();

        let all = self.fetch_all().await;
        let total = all.len();
        let recent = filter_recent(all, Utc::now(), self.window);

        info!(
            total,
            recent = recent.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Collection finished"
        );
        recent
    }
}

async fn fetch_source(client: &Client, source: &FeedConfig) -> anyhow::Result<Vec<RawArticle>> {
    info!("Fetching feed: {} ({})", source.name, source.url);

    let response = client.get(&source.url).send().await?.error_for_status()?;
    let bytes = response.bytes().await?;
    let parsed = parser::parse(&bytes[..])?;

    Ok(parsed
        .entries
        .iter()
        .filter_map(|entry| normalize_entry(entry, source))
        .collect())
}

/// Maps a feed entry onto a `RawArticle`. Entries without a link are skipped.
pub fn normalize_entry(entry: &Entry, source: &FeedConfig) -> Option<RawArticle> {
    let title = entry
        .title
        .as_ref()
        .map(|t| t.content.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "Untitled".to_string());

    let url = entry
        .links
        .first()
        .map(|l| l.href.trim().to_string())
        .unwrap_or_default();

    if url.is_empty() {
        warn!("Skipping entry with no link: {}", title);
        return None;
    }

    let description = entry
        .summary
        .as_ref()
        .map(|s| s.content.as_str())
        .or_else(|| entry.content.as_ref().and_then(|c| c.body.as_deref()))
        .map(strip_html)
        .unwrap_or_default();

    // published first, then updated; absent when neither parsed
    let published_at: Option<DateTime<Utc>> = entry.published.or(entry.updated);

    Some(RawArticle {
        title,
        url,
        description,
        published_at,
        source: source.name.clone(),
        source_category: source.category.clone(),
    })
}

/// Keeps articles published at or after `now - window`. Undated articles are
/// dropped.
pub fn filter_recent(
    articles: Vec<RawArticle>,
    now: DateTime<Utc>,
    window: chrono::Duration,
) -> Vec<RawArticle> {
    let cutoff = now - window;
    articles
        .into_iter()
        .filter(|article| matches!(article.published_at, Some(published) if published >= cutoff))
        .collect()
}

/// Removes markup and collapses whitespace, leaving a plain-text snippet.
/// Character references are decoded by the HTML parser.
pub fn strip_html(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let text = fragment.root_element().text().collect::<Vec<_>>().join(" ");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use feed_rs::model::Link;

    fn create_source(name: &str) -> FeedConfig {
        FeedConfig {
            name: name.to_string(),
            url: "https://example.com/feed".to_string(),
            category: "AI".to_string(),
        }
    }

    fn create_link(href: &str) -> Link {
        Link {
            href: href.to_string(),
            rel: None,
            media_type: None,
            href_lang: None,
            title: None,
            length: None,
        }
    }

    fn create_article(url: &str, published_at: Option<DateTime<Utc>>) -> RawArticle {
        RawArticle {
            title: "Article".to_string(),
            url: url.to_string(),
            description: String::new(),
            published_at,
            source: "Test".to_string(),
            source_category: "AI".to_string(),
        }
    }

    mod strip_html_tests {
        use super::*;

        #[test]
        fn test_plain_text_untouched() {
            assert_eq!(strip_html("Hello world"), "Hello world");
        }

        #[test]
        fn test_tags_removed_and_whitespace_collapsed() {
            let html = "<p>Rust <b>1.80</b>\n\n is   out</p><br/>";
            assert_eq!(strip_html(html), "Rust 1.80 is out");
        }

        #[test]
        fn test_entities_decoded() {
            assert_eq!(strip_html("a &amp; b &lt;c&gt;"), "a & b <c>");
        }

        #[test]
        fn test_empty() {
            assert_eq!(strip_html(""), "");
        }

        #[test]
        fn test_numeric_and_named_references_decoded() {
            assert_eq!(
                strip_html("It&#8217;s here&hellip; don&#x27;t&nbsp;wait"),
                "It\u{2019}s here\u{2026} don't wait"
            );
        }

        #[test]
        fn test_nested_markup_with_attributes() {
            let html = r#"<div class="post"><a href="https://x.dev?a=1&amp;b=2">Link</a><img src="x.png"/> text</div>"#;
            assert_eq!(strip_html(html), "Link text");
        }
    }

    mod normalize_entry_tests {
        use super::*;

        fn parse_entries(xml: &str) -> Vec<Entry> {
            parser::parse(xml.as_bytes()).unwrap().entries
        }

        #[test]
        fn test_full_rss_item() {
            let entries = parse_entries(
                r#"<?xml version="1.0" encoding="UTF-8"?>
                <rss version="2.0">
                    <channel>
                        <title>Dev.to</title>
                        <item>
                            <title>  React 19 is Here </title>
                            <link>https://react.dev/blog/19</link>
                            <description>&lt;p&gt;New &lt;em&gt;hooks&lt;/em&gt;&lt;/p&gt;</description>
                            <pubDate>Mon, 09 Dec 2024 12:00:00 GMT</pubDate>
                        </item>
                    </channel>
                </rss>"#,
            );

            let article = normalize_entry(&entries[0], &create_source("Dev.to")).unwrap();
            assert_eq!(article.title, "React 19 is Here");
            assert_eq!(article.url, "https://react.dev/blog/19");
            assert_eq!(article.description, "New hooks");
            assert_eq!(
                article.published_at.unwrap().to_rfc3339(),
                "2024-12-09T12:00:00+00:00"
            );
            assert_eq!(article.source, "Dev.to");
            assert_eq!(article.source_category, "AI");
        }

        #[test]
        fn test_missing_link_skipped() {
            let entry = Entry {
                id: "1".to_string(),
                ..Default::default()
            };
            assert!(normalize_entry(&entry, &create_source("S")).is_none());
        }

        #[test]
        fn test_missing_fields_default() {
            let entry = Entry {
                links: vec![create_link("https://a.com")],
                ..Default::default()
            };
            let article = normalize_entry(&entry, &create_source("S")).unwrap();
            assert_eq!(article.title, "Untitled");
            assert_eq!(article.description, "");
            assert_eq!(article.published_at, None);
        }

        #[test]
        fn test_updated_used_when_published_missing() {
            let updated = Utc::now() - chrono::Duration::hours(1);
            let entry = Entry {
                links: vec![create_link("https://a.com")],
                updated: Some(updated),
                ..Default::default()
            };
            let article = normalize_entry(&entry, &create_source("S")).unwrap();
            assert_eq!(article.published_at, Some(updated));
        }

        #[test]
        fn test_published_preferred_over_updated() {
            let published = Utc::now() - chrono::Duration::hours(3);
            let entry = Entry {
                links: vec![create_link("https://a.com")],
                published: Some(published),
                updated: Some(Utc::now()),
                ..Default::default()
            };
            let article = normalize_entry(&entry, &create_source("S")).unwrap();
            assert_eq!(article.published_at, Some(published));
        }

        #[test]
        fn test_atom_entry() {
            let entries = parse_entries(
                r#"<?xml version="1.0" encoding="utf-8"?>
                <feed xmlns="http://www.w3.org/2005/Atom">
                    <title>GitHub Blog</title>
                    <id>urn:blog</id>
                    <updated>2024-12-09T08:00:00Z</updated>
                    <entry>
                        <title>Copilot update</title>
                        <id>urn:post:1</id>
                        <link href="https://github.blog/copilot"/>
                        <updated>2024-12-09T08:00:00Z</updated>
                        <summary>Plain summary</summary>
                    </entry>
                </feed>"#,
            );

            let article = normalize_entry(&entries[0], &create_source("GitHub")).unwrap();
            assert_eq!(article.title, "Copilot update");
            assert_eq!(article.url, "https://github.blog/copilot");
            assert_eq!(article.description, "Plain summary");
            assert_eq!(
                article.published_at.unwrap().to_rfc3339(),
                "2024-12-09T08:00:00+00:00"
            );
        }
    }

    mod filter_recent_tests {
        use super::*;

        #[test]
        fn test_keeps_recent_and_drops_old() {
            let now = Utc::now();
            let articles = vec![
                create_article("https://new.com", Some(now - chrono::Duration::hours(1))),
                create_article("https://old.com", Some(now - chrono::Duration::hours(25))),
            ];

            let recent = filter_recent(articles, now, chrono::Duration::hours(24));
            assert_eq!(recent.len(), 1);
            assert_eq!(recent[0].url, "https://new.com");
        }

        #[test]
        fn test_boundary_is_inclusive() {
            let now = Utc::now();
            let window = chrono::Duration::hours(24);
            let articles = vec![
                create_article("https://edge.com", Some(now - window)),
                create_article(
                    "https://past-edge.com",
                    Some(now - window - chrono::Duration::seconds(1)),
                ),
            ];

            let recent = filter_recent(articles, now, window);
            assert_eq!(recent.len(), 1);
            assert_eq!(recent[0].url, "https://edge.com");
        }

        #[test]
        fn test_undated_articles_dropped() {
            let now = Utc::now();
            let articles = vec![create_article("https://undated.com", None)];
            assert!(filter_recent(articles, now, chrono::Duration::hours(24)).is_empty());
        }

        #[test]
        fn test_preserves_order() {
            let now = Utc::now();
            let articles = vec![
                create_article("https://1.com", Some(now - chrono::Duration::hours(3))),
                create_article("https://2.com", Some(now - chrono::Duration::hours(1))),
                create_article("https://3.com", Some(now - chrono::Duration::hours(2))),
            ];

            let recent = filter_recent(articles, now, chrono::Duration::hours(24));
            let urls: Vec<_> = recent.iter().map(|a| a.url.as_str()).collect();
            assert_eq!(urls, vec!["https://1.com", "https://2.com", "https://3.com"]);
        }
    }
}
