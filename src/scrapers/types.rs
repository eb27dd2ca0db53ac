use serde::{Deserialize, Serialize};

use crate::models::{ArticleStub, AssetType, JeonseEntry};

/// A complex marker seen on the map
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComplexSighting {
    pub id: String,
    pub name: String,
    pub asset_type: AssetType,
    pub listing_count: u32,
}

/// Payloads captured from the map's network traffic during a dwell window
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum NetworkPayload {
    /// Marker batch from a `single-markers` response
    Complexes(Vec<ComplexSighting>),
    /// Article list for one complex
    Articles {
        complex_id: Option<String>,
        total: Option<u32>,
        articles: Vec<ArticleStub>,
    },
}

/// Fields extracted from an article's detail page
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RawDetail {
    /// Article the page belongs to, as echoed by the page
    pub article_id: Option<String>,
    pub broker_office: String,
    pub broker_name: String,
    pub phones: Vec<String>,
    pub latest_jeonse: Option<i64>,
    pub jeonse_window: Option<JeonseEntry>,
}
