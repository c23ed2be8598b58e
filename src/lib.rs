//! Crawler for car-ad search results: stored searches are walked page by
//! page, new ads are stored once and linked to every search that found
//! them, and subscribers hear about ads they have not seen before.

pub mod config;
pub mod error;
pub mod ingest;
pub mod models;
pub mod notify;
pub mod params;
pub mod scrapers;
pub mod service;
pub mod storage;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use error::{CrawlError, ExtractionError, FetchError, StoreError, ValidationError};
pub use ingest::{IngestEngine, IngestReport};
pub use notify::{LogNotifier, Notification, NotificationQueue, Notifier};
pub use service::{CrawlReport, CrawlService, RenewReport};
pub use storage::{CascadeReport, MemoryStore, PgStore, Store};
