use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// One item as fetched from a feed source, before curation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawArticle {
    pub title: String,
    pub url: String,
    pub description: String,
    pub published_at: Option<DateTime<Utc>>,
    pub source: String,
    pub source_category: String,
}

/// One article after the model translated, scored and summarized it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CuratedArticle {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_title: Option<String>,
    pub url: String,
    pub source: String,
    pub category: String,
    pub relevance: u8,
    pub summary: String,
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Launches,
    Tutorials,
    Discussions,
    Trends,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Launches,
        Category::Tutorials,
        Category::Discussions,
        Category::Trends,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Category::Launches => "launches",
            Category::Tutorials => "tutorials",
            Category::Discussions => "discussions",
            Category::Trends => "trends",
        }
    }

    pub fn heading(self) -> &'static str {
        match self {
            Category::Launches => "LAUNCHES",
            Category::Tutorials => "TUTORIALS",
            Category::Discussions => "DISCUSSIONS",
            Category::Trends => "TRENDS",
        }
    }
}

/// Category buckets of a digest. The key set is fixed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Categories {
    pub launches: Vec<CuratedArticle>,
    pub tutorials: Vec<CuratedArticle>,
    pub discussions: Vec<CuratedArticle>,
    pub trends: Vec<CuratedArticle>,
}

impl Categories {
    pub fn get(&self, category: Category) -> &[CuratedArticle] {
        match category {
            Category::Launches => &self.launches,
            Category::Tutorials => &self.tutorials,
            Category::Discussions => &self.discussions,
            Category::Trends => &self.trends,
        }
    }

    pub fn get_mut(&mut self, category: Category) -> &mut Vec<CuratedArticle> {
        match category {
            Category::Launches => &mut self.launches,
            Category::Tutorials => &mut self.tutorials,
            Category::Discussions => &mut self.discussions,
            Category::Trends => &mut self.trends,
        }
    }

    pub fn total(&self) -> usize {
        Category::ALL.iter().map(|c| self.get(*c).len()).sum()
    }
}

/// The curated output of one pipeline run.
///
/// `highlights` is a cross-cutting view: an article listed there is usually
/// also present in one of the category buckets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Digest {
    pub highlights: Vec<CuratedArticle>,
    pub categories: Categories,
}

impl Digest {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.highlights.is_empty() && self.categories.total() == 0
    }

    /// Highlights plus every category entry, duplicates counted twice.
    pub fn curated_count(&self) -> usize {
        self.highlights.len() + self.categories.total()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCounts {
    pub launches: usize,
    pub tutorials: usize,
    pub discussions: usize,
    pub trends: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DigestStats {
    pub raw_articles: usize,
    pub curated_articles: usize,
    pub highlights: usize,
    pub categories: CategoryCounts,
}

impl DigestStats {
    pub fn compute(digest: &Digest, raw: &[RawArticle]) -> Self {
        let categories = &digest.categories;
        Self {
            raw_articles: raw.len(),
            curated_articles: digest.curated_count(),
            highlights: digest.highlights.len(),
            categories: CategoryCounts {
                launches: categories.launches.len(),
                tutorials: categories.tutorials.len(),
                discussions: categories.discussions.len(),
                trends: categories.trends.len(),
            },
        }
    }
}

/// Persisted envelope for one date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DigestRecord {
    pub date: NaiveDate,
    pub generated_at: DateTime<Utc>,
    pub stats: DigestStats,
    #[serde(rename = "data")]
    pub digest: Digest,
    pub raw: Vec<RawArticle>,
}
