//! Tech Digest - a daily curated technology newsletter
//!
//! This crate collects recent articles from RSS/Atom sources, asks a language
//! model to rank, categorize and summarize them, and stores one digest per day.
//! Digests are served over a small JSON API and generated on a cron schedule.

pub mod collector;
pub mod config;
pub mod curation;
pub mod llm;
pub mod models;
pub mod notifier;
pub mod pipeline;
pub mod routes;
pub mod scheduler;
pub mod store;
