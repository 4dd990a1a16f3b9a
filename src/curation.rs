use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Instant;

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{info, warn};

use crate::llm::{ModelError, TextModel};
use crate::models::{Categories, Category, CuratedArticle, Digest, RawArticle};

/// Characters of each description sent to the model.
pub const DESCRIPTION_BUDGET: usize = 300;

#[derive(Debug, Error)]
pub enum CurationError {
    #[error("model call failed: {0}")]
    Model(#[from] ModelError),
    #[error("model output is not valid JSON: {0}")]
    MalformedJson(#[from] serde_json::Error),
    #[error("model output does not match the digest schema: {0}")]
    Schema(String),
}

fn schema_error(message: impl Into<String>) -> CurationError {
    CurationError::Schema(message.into())
}

pub struct CurationEngine {
    model: Arc<dyn TextModel>,
    target_language: String,
}

impl CurationEngine {
    pub fn new(model: Arc<dyn TextModel>, target_language: impl Into<String>) -> Self {
        Self {
            model,
            target_language: target_language.into(),
        }
    }

    /// Sends the articles to the model and validates its answer.
    ///
    /// The model is not called for an empty input; an empty digest is returned
    /// instead. Ordering and category assignment are taken from the model
    /// verbatim.
    pub async fn curate(&self, articles: &[RawArticle]) -> Result<Digest, CurationError> {
        if articles.is_empty() {
            warn!("No articles to curate");
            return Ok(Digest::empty());
        }

        info!(model = self.model.name(), articles = articles.len(), "Curating articles");
        let started = Instant::now();

        let prompt = build_prompt(articles, &self.target_language);
        let text = self.model.generate(&prompt).await?;
        let digest = parse_digest(&text, articles)?;

        let categories = &digest.categories;
        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            highlights = digest.highlights.len(),
            launches = categories.launches.len(),
            tutorials = categories.tutorials.len(),
            discussions = categories.discussions.len(),
            trends = categories.trends.len(),
            "Curated {}/{} articles",
            digest.curated_count(),
            articles.len()
        );
        Ok(digest)
    }
}

fn instructions(target_language: &str) -> String {
    format!(
        r#"You are an expert curator of technology, programming and AI content for a newsletter written in {lang}.

Analyze the articles below and return a JSON object with exactly this structure:

{{
  "highlights": [],
  "categories": {{
    "launches": [],
    "tutorials": [],
    "discussions": [],
    "trends": []
  }}
}}

- "highlights": the TOP 5 most important articles of the day.
- "launches": product launches, new features, releases.
- "tutorials": tutorials, how-tos, practical guides.
- "discussions": technical discussions, debates, opinions.
- "trends": market analysis, trends, studies.

Every article object must have these fields:

{{
  "title": "title translated into {lang}",
  "original_title": "original title, if it was translated",
  "url": "the article URL exactly as given",
  "source": "the source name",
  "category": "main category",
  "relevance": 3,
  "summary": "2-3 line summary focused on what the reader learns",
  "tags": ["tag1", "tag2", "tag3"],
  "reasoning": "one line on why it matters"
}}

TRANSLATION:
- Translate every title into natural, fluent {lang}.
- Keep technical terms in English: API, React, Node.js, TypeScript, DevOps, etc.
- Informal but professional tone, the way a working developer would write.

RELEVANCE (integer from 1 to 5):
- 5: breaking news, major launches, game-changers
- 4: useful practical tutorials, important discussions
- 3: interesting but not urgent
- 2: niche content
- 1: repetitive or low-value content

IMPORTANT:
- Only use URLs that appear in the article list.
- Leave out clickbait and shallow content.
- Return ONLY the valid JSON, with no extra text."#,
        lang = target_language
    )
}

/// Full prompt: fixed instructions followed by one indexed block per article.
pub fn build_prompt(articles: &[RawArticle], target_language: &str) -> String {
    let mut prompt = instructions(target_language);
    prompt.push_str("\n\nARTICLES:\n\n");

    for (index, article) in articles.iter().enumerate() {
        let _ = write!(
            prompt,
            "[{}]\nTitle: {}\nURL: {}\nSource: {}\nDescription: {}\n---\n\n",
            index + 1,
            article.title,
            article.url,
            article.source,
            truncate_chars(&article.description, DESCRIPTION_BUDGET),
        );
    }

    prompt.push_str("RETURN THE JSON:");
    prompt
}

fn truncate_chars(text: &str, budget: usize) -> String {
    match text.char_indices().nth(budget) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// Removes a surrounding Markdown code fence (with or without a language tag).
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(after_open) = trimmed.strip_prefix("```") else {
        return trimmed;
    };

    let body = match after_open.find('\n') {
        Some(newline) => &after_open[newline + 1..],
        None => after_open.trim_start_matches("json"),
    };
    let body = match body.rfind("```") {
        Some(close) => &body[..close],
        None => body,
    };
    body.trim()
}

/// Validates raw model output and converts it into a `Digest`.
///
/// Any missing key, wrong type, out-of-range relevance or URL that was not
/// part of the input is rejected; nothing is repaired.
pub fn parse_digest(text: &str, articles: &[RawArticle]) -> Result<Digest, CurationError> {
    let value: Value = serde_json::from_str(strip_code_fences(text))?;
    let root = value
        .as_object()
        .ok_or_else(|| schema_error("top level is not an object"))?;

    let known_urls: HashSet<&str> = articles.iter().map(|a| a.url.as_str()).collect();

    let highlights = root
        .get("highlights")
        .ok_or_else(|| schema_error("missing `highlights`"))?;
    let highlights = parse_article_list(highlights, "highlights", &known_urls)?;
    if highlights.len() > articles.len() {
        return Err(schema_error(format!(
            "{} highlights for {} input articles",
            highlights.len(),
            articles.len()
        )));
    }

    let buckets = root
        .get("categories")
        .ok_or_else(|| schema_error("missing `categories`"))?
        .as_object()
        .ok_or_else(|| schema_error("`categories` is not an object"))?;

    let mut categories = Categories::default();
    for category in Category::ALL {
        let list = buckets
            .get(category.key())
            .ok_or_else(|| schema_error(format!("missing `categories.{}`", category.key())))?;
        let location = format!("categories.{}", category.key());
        *categories.get_mut(category) = parse_article_list(list, &location, &known_urls)?;
    }

    Ok(Digest {
        highlights,
        categories,
    })
}

fn parse_article_list(
    value: &Value,
    location: &str,
    known_urls: &HashSet<&str>,
) -> Result<Vec<CuratedArticle>, CurationError> {
    let items = value
        .as_array()
        .ok_or_else(|| schema_error(format!("`{}` is not an array", location)))?;

    items
        .iter()
        .enumerate()
        .map(|(i, item)| parse_article(item, &format!("{}[{}]", location, i), known_urls))
        .collect()
}

fn parse_article(
    value: &Value,
    location: &str,
    known_urls: &HashSet<&str>,
) -> Result<CuratedArticle, CurationError> {
    let obj = value
        .as_object()
        .ok_or_else(|| schema_error(format!("`{}` is not an object", location)))?;

    let url = required_str(obj, "url", location)?;
    if !known_urls.contains(url.as_str()) {
        return Err(schema_error(format!(
            "`{}.url` {} is not one of the input articles",
            location, url
        )));
    }

    let relevance = match obj.get("relevance") {
        Some(v) => v
            .as_u64()
            .filter(|r| (1..=5).contains(r))
            .ok_or_else(|| {
                schema_error(format!(
                    "`{}.relevance` must be an integer from 1 to 5, got {}",
                    location, v
                ))
            })? as u8,
        None => return Err(schema_error(format!("missing `{}.relevance`", location))),
    };

    let tags = obj
        .get("tags")
        .and_then(Value::as_array)
        .ok_or_else(|| schema_error(format!("`{}.tags` must be an array", location)))?
        .iter()
        .map(|tag| {
            tag.as_str()
                .map(str::to_string)
                .ok_or_else(|| schema_error(format!("`{}.tags` must contain strings", location)))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CuratedArticle {
        title: required_str(obj, "title", location)?,
        original_title: optional_str(obj, "original_title", location)?,
        url,
        source: required_str(obj, "source", location)?,
        category: required_str(obj, "category", location)?,
        relevance,
        summary: required_str(obj, "summary", location)?,
        tags,
        reasoning: optional_str(obj, "reasoning", location)?,
    })
}

fn required_str(obj: &Map<String, Value>, key: &str, location: &str) -> Result<String, CurationError> {
    match obj.get(key) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(schema_error(format!("`{}.{}` is not a string", location, key))),
        None => Err(schema_error(format!("missing `{}.{}`", location, key))),
    }
}

fn optional_str(
    obj: &Map<String, Value>,
    key: &str,
    location: &str,
) -> Result<Option<String>, CurationError> {
    match obj.get(key) {
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(Value::Null) | None => Ok(None),
        Some(_) => Err(schema_error(format!("`{}.{}` is not a string", location, key))),
    }
}
