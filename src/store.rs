use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;
use tracing::{debug, info};

use crate::models::{Digest, DigestRecord, DigestStats, RawArticle};

const RECORD_EXTENSION: &str = "json";
const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("record {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid date key {0:?}, expected YYYY-MM-DD")]
    InvalidDate(String),
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Digest records on disk, one `<YYYY-MM-DD>.json` file per date.
///
/// Not transactional: two concurrent saves for the same date race and the
/// last rename wins.
pub struct DigestStore {
    dir: PathBuf,
}

impl DigestStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, date: NaiveDate) -> PathBuf {
        self.dir
            .join(format!("{}.{}", date.format(DATE_FORMAT), RECORD_EXTENSION))
    }

    /// Saves under today's UTC date, replacing any record for that date.
    pub async fn save(&self, digest: &Digest, raw: &[RawArticle]) -> Result<PathBuf, StoreError> {
        self.save_at(digest, raw, Utc::now()).await
    }

    pub async fn save_at(
        &self,
        digest: &Digest,
        raw: &[RawArticle],
        now: DateTime<Utc>,
    ) -> Result<PathBuf, StoreError> {
        let record = DigestRecord {
            date: now.date_naive(),
            generated_at: now,
            stats: DigestStats::compute(digest, raw),
            digest: digest.clone(),
            raw: raw.to_vec(),
        };
        self.write(&record).await
    }

    async fn write(&self, record: &DigestRecord) -> Result<PathBuf, StoreError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(io_error(&self.dir))?;

        let path = self.record_path(record.date);
        let tmp = path.with_extension(format!("{}.tmp", RECORD_EXTENSION));
        let body = serde_json::to_vec_pretty(record)?;

        tokio::fs::write(&tmp, &body).await.map_err(io_error(&tmp))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(io_error(&path))?;

        info!(
            date = %record.date,
            path = %path.display(),
            size_kb = %format!("{:.2}", body.len() as f64 / 1024.0),
            "Saved digest"
        );
        Ok(path)
    }

    /// Date keys of every stored record, most recent first.
    pub async fn list(&self) -> Result<Vec<String>, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&self.dir)(e)),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_error(&self.dir))? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            match path.file_stem().and_then(|s| s.to_str()) {
                Some(stem) if parse_date_key(stem).is_ok() => keys.push(stem.to_string()),
                _ => debug!(path = %path.display(), "Skipping non-record file"),
            }
        }

        keys.sort_unstable_by(|a, b| b.cmp(a));
        Ok(keys)
    }

    /// `Ok(None)` when no record exists for the date.
    pub async fn load(&self, key: &str) -> Result<Option<DigestRecord>, StoreError> {
        let date = parse_date_key(key)?;
        let path = self.record_path(date);

        let content = match tokio::fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(date = key, "No digest stored");
                return Ok(None);
            }
            Err(e) => return Err(io_error(&path)(e)),
        };

        serde_json::from_slice(&content)
            .map(Some)
            .map_err(|source| StoreError::Corrupt { path, source })
    }

    /// The most recent record, if any.
    pub async fn latest(&self) -> Result<Option<DigestRecord>, StoreError> {
        match self.list().await?.first() {
            Some(key) => self.load(key).await,
            None => Ok(None),
        }
    }
}

pub fn parse_date_key(key: &str) -> Result<NaiveDate, StoreError> {
    match NaiveDate::parse_from_str(key, DATE_FORMAT) {
        // the round trip rejects non-padded forms like 2024-1-2
        Ok(date) if date.format(DATE_FORMAT).to_string() == key => Ok(date),
        _ => Err(StoreError::InvalidDate(key.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CuratedArticle;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn create_store() -> (DigestStore, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = DigestStore::new(dir.path().join("newsletters"));
        (store, dir)
    }

    fn at(date: &str) -> DateTime<Utc> {
        let date = parse_date_key(date).unwrap();
        Utc.from_utc_datetime(&date.and_hms_opt(7, 0, 0).unwrap())
    }

    fn create_raw(n: usize) -> RawArticle {
        RawArticle {
            title: format!("Article {}", n),
            url: format!("https://example.com/{}", n),
            description: "desc".to_string(),
            published_at: Some(Utc.with_ymd_and_hms(2024, 1, 1, 6, 30, 15).unwrap()),
            source: "HackerNews".to_string(),
            source_category: "Tech".to_string(),
        }
    }

    fn create_digest(title: &str) -> Digest {
        let article = CuratedArticle {
            title: title.to_string(),
            original_title: Some("Original".to_string()),
            url: "https://example.com/1".to_string(),
            source: "HackerNews".to_string(),
            category: "launches".to_string(),
            relevance: 4,
            summary: "Summary".to_string(),
            tags: vec!["rust".to_string(), "release".to_string()],
            reasoning: None,
        };
        let mut digest = Digest::empty();
        digest.highlights.push(article.clone());
        digest.categories.launches.push(article);
        digest
    }

    mod save_load_tests {
        use super::*;

        #[tokio::test]
        async fn test_round_trip() {
            let (store, _dir) = create_store();
            let digest = create_digest("Título");
            let raw = vec![create_raw(1), create_raw(2)];

            let path = store.save_at(&digest, &raw, at("2024-01-01")).await.unwrap();
            assert!(path.ends_with("2024-01-01.json"));

            let record = store.load("2024-01-01").await.unwrap().unwrap();
            assert_eq!(record.digest, digest);
            assert_eq!(record.raw, raw);
            assert_eq!(record.date.to_string(), "2024-01-01");
            assert_eq!(record.stats.raw_articles, 2);
            assert_eq!(record.stats.curated_articles, 2);
            assert_eq!(record.stats.categories.launches, 1);
        }

        #[tokio::test]
        async fn test_same_date_overwrites() {
            let (store, _dir) = create_store();
            let raw = vec![create_raw(1)];

            store
                .save_at(&create_digest("first"), &raw, at("2024-01-01"))
                .await
                .unwrap();
            store
                .save_at(&create_digest("second"), &raw, at("2024-01-01"))
                .await
                .unwrap();

            let record = store.load("2024-01-01").await.unwrap().unwrap();
            assert_eq!(record.digest.highlights.len(), 1);
            assert_eq!(record.digest.highlights[0].title, "second");
            assert_eq!(store.list().await.unwrap(), vec!["2024-01-01"]);
        }

        #[tokio::test]
        async fn test_list_ignores_json_without_date_name() {
            let (store, _dir) = create_store();
            store
                .save_at(&Digest::empty(), &[], at("2024-01-01"))
                .await
                .unwrap();
            std::fs::write(store.dir().join("backup.json"), "{}").unwrap();
            std::fs::write(store.dir().join("2024-13-01.json"), "{}").unwrap();

            assert_eq!(store.list().await.unwrap(), vec!["2024-01-01"]);
            let latest = store.latest().await.unwrap().unwrap();
            assert_eq!(latest.date.to_string(), "2024-01-01");
        }

        #[tokio::test]
        async fn test_date_derived_from_utc() {
            let (store, _dir) = create_store();
            let late = Utc.with_ymd_and_hms(2024, 3, 9, 23, 59, 59).unwrap();

            let path = store.save_at(&Digest::empty(), &[], late).await.unwrap();
            assert!(path.ends_with("2024-03-09.json"));
        }

        #[tokio::test]
        async fn test_missing_record_is_none() {
            let (store, _dir) = create_store();
            assert!(store.load("2024-05-05").await.unwrap().is_none());
        }

        #[tokio::test]
        async fn test_invalid_key_rejected() {
            let (store, _dir) = create_store();
            for key in ["../secrets", "2024-13-01", "2024-1-2", "latest", ""] {
                let result = store.load(key).await;
                assert!(
                    matches!(result, Err(StoreError::InvalidDate(_))),
                    "key {:?} should be rejected",
                    key
                );
            }
        }

        #[tokio::test]
        async fn test_corrupt_record_is_error() {
            let (store, _dir) = create_store();
            std::fs::create_dir_all(store.dir()).unwrap();
            std::fs::write(store.dir().join("2024-02-02.json"), "{ not json").unwrap();

            let result = store.load("2024-02-02").await;
            assert!(matches!(result, Err(StoreError::Corrupt { .. })));
        }

        #[tokio::test]
        async fn test_no_temp_file_left_behind() {
            let (store, _dir) = create_store();
            store
                .save_at(&Digest::empty(), &[], at("2024-01-01"))
                .await
                .unwrap();

            let names: Vec<_> = std::fs::read_dir(store.dir())
                .unwrap()
                .map(|e| e.unwrap().file_name().into_string().unwrap())
                .collect();
            assert_eq!(names, vec!["2024-01-01.json"]);
        }
    }

    mod list_tests {
        use super::*;

        #[tokio::test]
        async fn test_list_descending() {
            let (store, _dir) = create_store();
            for date in ["2024-01-01", "2024-01-03", "2024-01-02"] {
                store
                    .save_at(&Digest::empty(), &[], at(date))
                    .await
                    .unwrap();
            }

            assert_eq!(
                store.list().await.unwrap(),
                vec!["2024-01-03", "2024-01-02", "2024-01-01"]
            );
        }

        #[tokio::test]
        async fn test_list_missing_dir_is_empty() {
            let (store, _dir) = create_store();
            assert!(store.list().await.unwrap().is_empty());
            assert!(store.latest().await.unwrap().is_none());
        }

        #[tokio::test]
        async fn test_list_ignores_other_files() {
            let (store, _dir) = create_store();
            std::fs::create_dir_all(store.dir()).unwrap();
            std::fs::write(store.dir().join("notes.txt"), "hi").unwrap();
            store
                .save_at(&Digest::empty(), &[], at("2024-01-01"))
                .await
                .unwrap();

            assert_eq!(store.list().await.unwrap(), vec!["2024-01-01"]);
        }

        #[tokio::test]
        async fn test_latest_returns_most_recent() {
            let (store, _dir) = create_store();
            store
                .save_at(&create_digest("old"), &[], at("2024-01-01"))
                .await
                .unwrap();
            store
                .save_at(&create_digest("new"), &[], at("2024-02-01"))
                .await
                .unwrap();

            let latest = store.latest().await.unwrap().unwrap();
            assert_eq!(latest.date.to_string(), "2024-02-01");
            assert_eq!(latest.digest.highlights[0].title, "new");
        }
    }
}
