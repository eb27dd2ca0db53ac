use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Geographic coordinate in degrees
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// World pixel coordinate. Only meaningful together with the zoom it was projected at.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PixelPoint {
    pub x: f64,
    pub y: f64,
}

impl PixelPoint {
    pub fn offset(self, offset: GridOffset) -> Self {
        Self {
            x: self.x + offset.dx,
            y: self.y + offset.dy,
        }
    }

    /// Pixel delta that moves `self` onto `target`
    pub fn delta_to(self, target: PixelPoint) -> PixelDelta {
        PixelDelta {
            dx: target.x - self.x,
            dy: target.y - self.y,
        }
    }
}

/// Sweep offset in pixels relative to the sweep center
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridOffset {
    pub dx: f64,
    pub dy: f64,
}

/// Pixel distance the map view has to travel
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PixelDelta {
    pub dx: f64,
    pub dy: f64,
}

impl PixelDelta {
    pub fn length(&self) -> f64 {
        self.dx.hypot(self.dy)
    }

    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            dx: self.dx * factor,
            dy: self.dy * factor,
        }
    }
}

/// Current state of the single map view
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MapView {
    pub center: GeoPoint,
    pub zoom: f64,
}

/// Listing category requested from the map service
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AssetType {
    /// Apartment complexes (`APT`)
    Apartment,
    /// Villas and row houses (`VL`)
    Villa,
}

impl AssetType {
    pub fn code(&self) -> &'static str {
        match self {
            AssetType::Apartment => "APT",
            AssetType::Villa => "VL",
        }
    }

    /// Map endpoint that lists this category
    pub fn endpoint(&self) -> &'static str {
        match self {
            AssetType::Apartment => "complexes",
            AssetType::Villa => "houses",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_uppercase().as_str() {
            "APT" => Some(AssetType::Apartment),
            "VL" => Some(AssetType::Villa),
            _ => None,
        }
    }
}

/// Trade type of a listing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum DealType {
    Sale,
    Jeonse,
    MonthlyRent,
    Other(String),
}

impl DealType {
    /// Decode from the service's trade code (`A1`, `B1`, `B2`) or its display name
    pub fn from_code(code: &str, name: &str) -> Self {
        match (code.trim().to_ascii_uppercase().as_str(), name.trim()) {
            ("A1", _) | (_, "매매") | (_, "SALE") => DealType::Sale,
            ("B1", _) | (_, "전세") => DealType::Jeonse,
            ("B2", _) | (_, "월세") => DealType::MonthlyRent,
            (c, _) if !c.is_empty() => DealType::Other(c.to_string()),
            (_, n) => DealType::Other(n.to_string()),
        }
    }
}

/// A cluster of listings (an apartment complex or villa building)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComplexRecord {
    pub id: String,
    pub name: String,
    pub asset_type: AssetType,
    pub listing_count: u32,
    pub priority_score: u32,
    pub discovered: bool,
    pub visited_for_detail: bool,
}

/// Listing-level fields captured from an article list, before the detail fetch
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArticleStub {
    pub id: String,
    pub complex_ref: String,
    pub name: String,
    pub asset_type: AssetType,
    pub deal_type: DealType,
    /// Sale price in won
    pub price: Option<i64>,
    pub floor: String,
    pub area: String,
    pub exclusive_area: String,
    pub direction: String,
    pub features: String,
    pub registered_at: Option<NaiveDate>,
}

/// Jeonse deposit range over a lookback window
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct JeonseEntry {
    /// Length of the lookback window in years
    pub year: u32,
    pub max_price: Option<i64>,
    pub min_price: Option<i64>,
}

/// Fully resolved listing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArticleRecord {
    pub id: String,
    pub complex_ref: String,
    pub name: String,
    pub asset_type: AssetType,
    pub deal_type: DealType,
    pub price: Option<i64>,
    pub floor: String,
    pub area: String,
    pub exclusive_area: String,
    pub direction: String,
    pub features: String,
    pub registered_at: Option<NaiveDate>,
    pub broker_office: String,
    pub broker_name: String,
    pub broker_contact_primary: String,
    pub broker_contact_secondary: String,
    /// Explicit "previous jeonse" figure, when the detail page states one
    pub latest_jeonse: Option<i64>,
    pub jeonse_history: Vec<JeonseEntry>,
    pub fetched_at: DateTime<Utc>,
}

impl ArticleRecord {
    /// Most recent jeonse deposit: the explicit figure, else the newest history entry
    pub fn previous_jeonse(&self) -> Option<i64> {
        self.latest_jeonse
            .or_else(|| self.jeonse_history.last().and_then(|e| e.max_price))
    }

    pub fn gap(&self) -> Option<GapMetrics> {
        GapMetrics::compute(self.price?, self.previous_jeonse()?)
    }
}

/// Investment entry cost: what a buyer pays on top of the inherited jeonse deposit
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GapMetrics {
    pub gap_amount: i64,
    pub gap_ratio: f64,
}

impl GapMetrics {
    /// `None` when the sale price is not positive
    pub fn compute(sale_price: i64, previous_jeonse: i64) -> Option<Self> {
        if sale_price <= 0 {
            return None;
        }
        let gap_amount = sale_price - previous_jeonse;
        Some(Self {
            gap_amount,
            gap_ratio: gap_amount as f64 / sale_price as f64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(300_000_000, 290_000_000, 10_000_000, 0.0333)]
    #[case(380_000_000, 340_000_000, 40_000_000, 0.1053)]
    #[case(250_000_000, 260_000_000, -10_000_000, -0.04)]
    fn gap_metrics(
        #[case] sale: i64,
        #[case] jeonse: i64,
        #[case] amount: i64,
        #[case] ratio: f64,
    ) {
        let gap = GapMetrics::compute(sale, jeonse).unwrap();
        assert_eq!(gap.gap_amount, amount);
        assert!((gap.gap_ratio - ratio).abs() < 1e-4, "ratio {}", gap.gap_ratio);
    }

    #[test]
    fn gap_undefined_for_zero_sale_price() {
        assert!(GapMetrics::compute(0, 100).is_none());
    }

    #[test]
    fn deal_type_codes() {
        assert_eq!(DealType::from_code("a1", ""), DealType::Sale);
        assert_eq!(DealType::from_code("", "매매"), DealType::Sale);
        assert_eq!(DealType::from_code("B1", ""), DealType::Jeonse);
        assert_eq!(DealType::from_code("B2", ""), DealType::MonthlyRent);
        assert_eq!(DealType::from_code("B3", ""), DealType::Other("B3".into()));
        assert_eq!(DealType::from_code("", "단기임대"), DealType::Other("단기임대".into()));
    }

    #[test]
    fn asset_type_codes() {
        assert_eq!(AssetType::from_code(" apt "), Some(AssetType::Apartment));
        assert_eq!(AssetType::from_code("VL"), Some(AssetType::Villa));
        assert_eq!(AssetType::from_code("OPST"), None);
        assert_eq!(AssetType::Villa.endpoint(), "houses");
    }
}
