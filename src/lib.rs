//! Incremental listing harvester: listing and detail page scraping into a
//! resumable JSON store, de-duplicated media downloads and CSV export.

pub mod config;
pub mod error;
pub mod export;
pub mod extract;
pub mod harvest;
pub mod media;
pub mod models;
pub mod pages;
pub mod scrapers;
pub mod search_api;
pub mod store;
pub mod throttle;

pub use config::HarvestConfig;
pub use error::{HarvestError, Result};
pub use harvest::{HarvestSummary, Harvester};
pub use models::Record;
pub use store::{JsonFileStore, RecordStore};
