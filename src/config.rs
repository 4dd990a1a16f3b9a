use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use croner::Cron;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Root directory for persisted newsletters and runtime settings
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Trailing recency window in hours
    #[serde(default = "default_window_hours")]
    pub window_hours: u64,
    /// Initial schedule, used until an admin saves a different one
    #[serde(default = "default_cron_schedule")]
    pub cron_schedule: String,
    /// IANA zone the schedule is evaluated in
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub notifier: Option<NotifierConfig>,
    pub feeds: Vec<FeedConfig>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_bind_addr() -> String {
    "0.0.0.0:3002".to_string()
}

fn default_window_hours() -> u64 {
    24
}

fn default_cron_schedule() -> String {
    "0 7 * * *".to_string()
}

fn default_timezone() -> String {
    "America/Sao_Paulo".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_model_name")]
    pub name: String,
    #[serde(default = "default_model_base_url")]
    pub base_url: String,
    #[serde(default = "default_model_timeout")]
    pub timeout_secs: u64,
    /// Language the model translates titles and summaries into
    #[serde(default = "default_target_language")]
    pub target_language: String,
}

fn default_model_name() -> String {
    "gemini-2.5-flash-lite".to_string()
}

fn default_model_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_model_timeout() -> u64 {
    120
}

fn default_target_language() -> String {
    "Brazilian Portuguese".to_string()
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model_name(),
            base_url: default_model_base_url(),
            timeout_secs: default_model_timeout(),
            target_language: default_target_language(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct NotifierConfig {
    pub webhook_url: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct FeedConfig {
    pub name: String,
    pub url: String,
    pub category: String,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Parse config from a TOML string (useful for testing)
    pub fn from_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    pub fn newsletters_dir(&self) -> PathBuf {
        self.data_dir.join("newsletters")
    }

    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join("config.json")
    }
}

/// Settings an admin can change while the service runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub cron_schedule: String,
    pub timezone: String,
    pub send_on_generate: bool,
    pub last_updated: Option<DateTime<Utc>>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cron_schedule: default_cron_schedule(),
            timezone: default_timezone(),
            send_on_generate: false,
            last_updated: None,
        }
    }
}

/// Partial update; absent fields keep their current value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsUpdate {
    pub cron_schedule: Option<String>,
    pub timezone: Option<String>,
    pub send_on_generate: Option<bool>,
}

pub struct SettingsStore {
    path: PathBuf,
    defaults: Settings,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>, defaults: Settings) -> Self {
        Self {
            path: path.into(),
            defaults,
        }
    }

    /// Missing file yields the defaults; keys absent from the file are filled
    /// from the defaults.
    pub async fn load(&self) -> anyhow::Result<Settings> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(self.defaults.clone())
            }
            Err(e) => return Err(e.into()),
        };

        let mut merged = serde_json::to_value(&self.defaults)?;
        let stored: serde_json::Value = serde_json::from_str(&content)?;
        if let (Some(base), Some(overrides)) = (merged.as_object_mut(), stored.as_object()) {
            for (key, value) in overrides {
                base.insert(key.clone(), value.clone());
            }
        }
        Ok(serde_json::from_value(merged)?)
    }

    pub async fn update(&self, update: SettingsUpdate) -> anyhow::Result<Settings> {
        if let Some(cron) = &update.cron_schedule {
            anyhow::ensure!(is_valid_cron(cron), "invalid cron expression: {}", cron);
        }
        if let Some(timezone) = &update.timezone {
            anyhow::ensure!(
                parse_timezone(timezone).is_some(),
                "unknown timezone: {}",
                timezone
            );
        }

        let mut settings = self.load().await?;
        if let Some(cron) = update.cron_schedule {
            settings.cron_schedule = cron.trim().to_string();
        }
        if let Some(timezone) = update.timezone {
            settings.timezone = timezone.trim().to_string();
        }
        if let Some(send) = update.send_on_generate {
            settings.send_on_generate = send;
        }
        settings.last_updated = Some(Utc::now());

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_string_pretty(&settings)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(settings)
    }
}

const CRON_FIELDS: usize = 5;

/// Accepts five-field cron expressions (minute to day of week) in the dialect
/// the job scheduler runs. When both day fields are restricted, a day must
/// match both.
pub fn is_valid_cron(expression: &str) -> bool {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    fields.len() == CRON_FIELDS
        && Cron::new(&fields.join(" "))
            .with_dom_and_dow()
            .parse()
            .is_ok()
}

pub fn parse_timezone(name: &str) -> Option<Tz> {
    name.trim().parse::<Tz>().ok()
}
