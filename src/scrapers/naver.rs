//! Field extraction for Naver Land: map API payloads and mobile detail pages.

use chrono::NaiveDate;
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::models::{ArticleStub, AssetType, DealType, GeoPoint, JeonseEntry, MapView};
use crate::scrapers::types::{ComplexSighting, NetworkPayload, RawDetail};

const EOK: i64 = 100_000_000;
const MAN: i64 = 10_000;

/// Shown by m.land.naver.com for dead article ids
pub const NOT_FOUND_MARKER: &str = "요청하신 페이지를 찾을 수 없어요";

pub fn detail_url(article_id: &str) -> String {
    format!("https://m.land.naver.com/article/info/{}", article_id)
}

pub fn alternate_detail_url(article_id: &str) -> String {
    format!("https://m.land.naver.com/article/view/{}", article_id)
}

pub fn map_url(asset: AssetType, lat: f64, lon: f64, zoom: u8) -> String {
    format!(
        "https://new.land.naver.com/{}?ms={:.7},{:.7},{}&a={}&b=A1",
        asset.endpoint(),
        lat,
        lon,
        zoom,
        asset.code()
    )
}

pub fn complex_url(asset: AssetType, complex_id: &str) -> String {
    format!("https://new.land.naver.com/{}/{}", asset.endpoint(), complex_id)
}

/// Map view encoded in the `ms=lat,lon,zoom` query parameter
pub fn view_from_url(url: &str) -> Option<MapView> {
    let parsed = Url::parse(url).ok()?;
    let (_, ms) = parsed.query_pairs().find(|(key, _)| key == "ms")?;
    let mut parts = ms.split(',').map(|p| p.trim().parse::<f64>().ok());
    let lat = parts.next()??;
    let lon = parts.next()??;
    let zoom = parts.next()??;
    Some(MapView {
        center: GeoPoint::new(lat, lon),
        zoom,
    })
}

/// Parse a Korean price into won.
///
/// "3억 8,000" and "3억 8,000만원" are 380,000,000; "7.5억" is 750,000,000;
/// a bare "8,500" is read in 만원 units; "320000000원" is taken as won.
pub fn parse_korean_won(text: &str) -> Option<i64> {
    let cleaned: String = text
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ',')
        .collect();
    let cleaned = cleaned.strip_prefix("매매").unwrap_or(&cleaned);
    if !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    let has_won = cleaned.contains('원');
    let t = cleaned.replace('원', "");

    if let Some((head, tail)) = t.split_once('억') {
        let eok: f64 = trailing_number(head)?.parse().ok()?;
        let eok_won = (eok * EOK as f64).round();
        // the cast saturates, so out-of-range amounts are rejected first
        if !eok_won.is_finite() || eok_won >= i64::MAX as f64 {
            return None;
        }
        let man = man_after_eok(tail).unwrap_or(0);
        return (eok_won as i64).checked_add(man.checked_mul(MAN)?);
    }
    if let Some(man) = number_before(&t, '만') {
        return man.checked_mul(MAN);
    }
    if let Some(thousands) = number_before(&t, '천') {
        return thousands.checked_mul(1_000 * MAN);
    }

    let plain: i64 = t.parse().ok()?;
    if has_won {
        Some(plain)
    } else {
        plain.checked_mul(MAN)
    }
}

/// Longest run of digits and dots at the end of `s`
fn trailing_number(s: &str) -> Option<&str> {
    let start = s
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit() || *c == '.')
        .last()
        .map(|(i, _)| i)?;
    Some(&s[start..])
}

fn number_before(s: &str, unit: char) -> Option<i64> {
    let pos = s.find(unit)?;
    trailing_number(&s[..pos])?.parse().ok()
}

/// 만 amount after the 억 part: "8000", "8000만" or "2천"
fn man_after_eok(tail: &str) -> Option<i64> {
    let end = tail
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map(|(i, _)| i)
        .unwrap_or(tail.len());
    let n: i64 = tail[..end].parse().ok()?;
    match tail[end..].chars().next() {
        None | Some('만') => Some(n),
        Some('천') => n.checked_mul(1_000),
        Some(_) => None,
    }
}

/// First non-empty string or number under any of `keys`
fn text_field(item: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match item.get(*key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn text_or_empty(item: &Value, key: &str) -> String {
    text_field(item, &[key]).unwrap_or_default()
}

/// First positive count under any of `keys`
fn count_field(item: &Value, keys: &[&str]) -> Option<u32> {
    keys.iter().find_map(|key| {
        let value = item.get(*key)?;
        let n = value
            .as_u64()
            .or_else(|| value.as_str().and_then(|s| s.parse().ok()))?;
        (n > 0).then(|| u32::try_from(n).unwrap_or(u32::MAX))
    })
}

/// Villa/row-house check for items served by the houses endpoint
fn is_villa(item: &Value) -> bool {
    if let Some(code) = text_field(item, &["realEstateTypeCode", "estateType", "rletTpCd"]) {
        return code.eq_ignore_ascii_case("VL");
    }
    let name = text_field(item, &["realEstateTypeName", "estateTypeName", "rletTpNm"])
        .unwrap_or_default();
    ["빌라", "연립", "다세대"].iter().any(|k| name.contains(k))
}

/// Complex markers from a `single-markers` response
pub fn parse_markers(asset: AssetType, body: &Value) -> Vec<ComplexSighting> {
    let Some(items) = body.as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .filter(|item| asset != AssetType::Villa || is_villa(item))
        .filter_map(|item| {
            Some(ComplexSighting {
                id: text_field(item, &["markerId", "complexNo", "houseNo"])?,
                name: text_field(item, &["complexName", "houseName"]).unwrap_or_default(),
                asset_type: asset,
                listing_count: count_field(item, &["articleCount", "dealCount", "totalCount", "cnt"])
                    .unwrap_or(0),
            })
        })
        .collect()
}

/// One article from a list payload. Items without an article number are skipped.
pub fn parse_article(item: &Value, complex_ref: Option<&str>, asset: AssetType) -> Option<ArticleStub> {
    let id = text_field(item, &["articleNo", "atclNo"])?;
    let complex_ref = complex_ref
        .map(str::to_string)
        .or_else(|| text_field(item, &["complexNo", "hscpNo", "houseNo"]))
        .unwrap_or_default();
    let deal_type = DealType::from_code(
        &text_field(item, &["tradeType", "tradTp"]).unwrap_or_default(),
        &text_or_empty(item, "tradeTypeName"),
    );
    let registered_at = text_field(item, &["articleConfirmYmd"])
        .and_then(|ymd| NaiveDate::parse_from_str(&ymd, "%Y%m%d").ok());

    Some(ArticleStub {
        id,
        complex_ref,
        name: text_or_empty(item, "articleName"),
        asset_type: asset,
        deal_type,
        price: text_field(item, &["dealOrWarrantPrc"]).and_then(|p| parse_korean_won(&p)),
        floor: text_or_empty(item, "floorInfo"),
        area: text_or_empty(item, "area1"),
        exclusive_area: text_or_empty(item, "area2"),
        direction: text_or_empty(item, "direction"),
        features: text_or_empty(item, "articleFeatureDesc"),
        registered_at,
    })
}

/// `(asset, complex id)` from `/api/articles/complex/{id}` or `/api/articles/house/{id}`
fn article_list_target(url: &Url) -> Option<(AssetType, String)> {
    let segments: Vec<&str> = url.path_segments()?.collect();
    let pos = segments.windows(2).position(|w| w == ["api", "articles"])?;
    let asset = match *segments.get(pos + 2)? {
        "complex" => AssetType::Apartment,
        "house" => AssetType::Villa,
        _ => return None,
    };
    let id = segments.get(pos + 3)?;
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some((asset, id.to_string()))
}

fn parse_article_list(asset: AssetType, complex_id: String, body: &Value) -> NetworkPayload {
    let items = body
        .get("articleList")
        .or_else(|| body.get("articles"))
        .and_then(Value::as_array);
    let articles = items
        .into_iter()
        .flatten()
        .filter(|item| asset != AssetType::Villa || is_villa(item))
        .filter_map(|item| parse_article(item, Some(&complex_id), asset))
        .collect();
    NetworkPayload::Articles {
        total: count_field(body, &["totalCount", "count"]),
        complex_id: Some(complex_id),
        articles,
    }
}

/// Walk any other API response looking for article lists
fn scan_for_articles(value: &Value, asset: AssetType, out: &mut Vec<ArticleStub>) {
    match value {
        Value::Object(map) => {
            if let Some(list) = map.get("articleList").filter(|v| v.is_array()) {
                return scan_for_articles(list, asset, out);
            }
            for v in map.values() {
                scan_for_articles(v, asset, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                if item.is_object() && text_field(item, &["articleNo", "atclNo"]).is_some() {
                    out.extend(parse_article(item, None, asset));
                } else {
                    scan_for_articles(item, asset, out);
                }
            }
        }
        _ => {}
    }
}

/// Turn one intercepted response into a payload, if it carries anything useful
pub fn classify_response(url: &str, body: &str, asset: AssetType) -> Option<NetworkPayload> {
    let parsed = Url::parse(url).ok()?;
    if !parsed.path().contains("/api/") {
        return None;
    }
    let json: Value = match serde_json::from_str(body) {
        Ok(json) => json,
        Err(e) => {
            debug!("Ignoring non-JSON response from {}: {}", url, e);
            return None;
        }
    };
    let path = parsed.path();

    if path.contains("complexes/single-markers") {
        return Some(NetworkPayload::Complexes(parse_markers(AssetType::Apartment, &json)));
    }
    if path.contains("houses/single-markers") {
        return Some(NetworkPayload::Complexes(parse_markers(AssetType::Villa, &json)));
    }
    if let Some((list_asset, complex_id)) = article_list_target(&parsed) {
        return Some(parse_article_list(list_asset, complex_id, &json));
    }
    if path.contains("/prices") {
        return None;
    }

    let mut articles = Vec::new();
    scan_for_articles(&json, asset, &mut articles);
    (!articles.is_empty()).then_some(NetworkPayload::Articles {
        complex_id: None,
        total: None,
        articles,
    })
}

/// Visible text of a page, one line per text node
pub fn page_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let body = Selector::parse("body")
        .ok()
        .and_then(|selector| document.select(&selector).next());
    let root = body.unwrap_or_else(|| document.root_element());

    let mut lines = Vec::new();
    for node in root.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node
            .parent()
            .and_then(|p| p.value().as_element().map(|e| e.name().to_string()))
            .is_some_and(|name| matches!(name.as_str(), "script" | "style" | "noscript"));
        let line = text.trim();
        if !hidden && !line.is_empty() {
            lines.push(line.to_string());
        }
    }
    lines.join("\n")
}

/// Dead or empty detail pages that should be retried on the alternate URL
pub fn needs_alternate(text: &str) -> bool {
    text.contains(NOT_FOUND_MARKER) || text.trim().chars().count() < 50
}

/// Compiled patterns for detail page text
#[derive(Debug, Clone)]
pub struct DetailPatterns {
    prior_jeonse: Regex,
    window_max: Regex,
    window_min: Regex,
    phone: Regex,
    broker_name: Regex,
    office: Regex,
    office_fallback: Regex,
}

impl DetailPatterns {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            prior_jeonse: Regex::new(r"기전세금\s*([\d,억만 ]+)")?,
            window_max: Regex::new(r"(\d+)\s*년\s*내\s*최고\s*([\d,억만 ]+)")?,
            window_min: Regex::new(r"(\d+)\s*년\s*내\s*최저\s*([\d,억만 ]+)")?,
            phone: Regex::new(r"0\d{1,2}-\d{3,4}-\d{4}")?,
            broker_name: Regex::new(r"^[가-힣]{2,4}$")?,
            office: Regex::new(r"공인중개사|부동산")?,
            office_fallback: Regex::new(r"중개소[ \t]+([^\n]+)")?,
        })
    }

    /// Extract broker and jeonse fields from a detail page's text
    pub fn parse_detail(&self, article_id: &str, text: &str) -> RawDetail {
        let latest_jeonse = self
            .prior_jeonse
            .captures(text)
            .and_then(|c| parse_korean_won(&c[1]));

        let window = |re: &Regex| {
            re.captures(text)
                .map(|c| (c[1].parse::<u32>().ok(), parse_korean_won(&c[2])))
        };
        let max = window(&self.window_max);
        let min = window(&self.window_min);
        let jeonse_window = match (max, min) {
            (None, None) => None,
            (max, min) => Some(JeonseEntry {
                year: max
                    .and_then(|(y, _)| y)
                    .or_else(|| min.and_then(|(y, _)| y))
                    .unwrap_or(0),
                max_price: max.and_then(|(_, p)| p),
                min_price: min.and_then(|(_, p)| p),
            }),
        };

        let (broker_name, broker_office) = self.broker(text);
        RawDetail {
            article_id: Some(article_id.to_string()),
            broker_office,
            broker_name,
            phones: self
                .phone
                .find_iter(text)
                .take(2)
                .map(|m| m.as_str().to_string())
                .collect(),
            latest_jeonse,
            jeonse_window,
        }
    }

    /// Broker name is a short Hangul line near a broker keyword; the office follows it
    fn broker(&self, text: &str) -> (String, String) {
        const NOT_NAMES: [&str; 6] = ["이미지", "상세보기", "중개사", "중개소", "프로필", "전화"];
        let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();

        let found = lines.iter().enumerate().find(|(i, line)| {
            if !self.broker_name.is_match(line) || NOT_NAMES.contains(*line) {
                return false;
            }
            let context = lines[i.saturating_sub(3)..(*i + 2).min(lines.len())].join("\n");
            ["중개사", "프로필", "중개소"].iter().any(|k| context.contains(k))
        });

        let mut office = String::new();
        let mut name = String::new();
        if let Some((i, line)) = found {
            name = line.to_string();
            office = lines
                .iter()
                .skip(i + 1)
                .take(5)
                .find(|l| self.office.is_match(l) && !l.contains("상세보기") && !l.contains("전화"))
                .map(|l| l.to_string())
                .unwrap_or_default();
        }
        if office.is_empty() {
            if let Some(c) = self.office_fallback.captures(text) {
                let candidate = c[1].trim();
                if !candidate.contains("이미지") {
                    office = candidate.to_string();
                }
            }
        }
        (name, office)
    }
}
