//! Gap investment scout for Naver Land.
//!
//! A crawl sweeps the map around a center point, registers the complexes it
//! sees, opens the most promising ones to collect sale listings, fetches each
//! listing's detail page with a bounded pool of browser tabs and keeps the
//! listings whose previous jeonse deposit covers the asking price.

pub mod config;
pub mod crawl;
pub mod error;
pub mod geo;
pub mod models;
pub mod output;
pub mod scrapers;

pub use config::CrawlConfig;
pub use crawl::{CrawlSession, RunSummary};
pub use error::{CrawlError, CrawlResult};
