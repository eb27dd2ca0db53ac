use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Local;
use tracing::info;

use crate::crawl::gap::GapRow;
use crate::crawl::RunSummary;
use crate::scrapers::ResultSink;

/// Writes `gap_candidates_<timestamp>.json` and `run_summary.json` into a directory
pub struct JsonResultSink {
    dir: PathBuf,
}

impl JsonResultSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn candidates_file(&self) -> PathBuf {
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        self.dir.join(format!("gap_candidates_{}.json", stamp))
    }
}

#[async_trait]
impl ResultSink for JsonResultSink {
    async fn emit(&self, rows: &[GapRow<'_>], summary: &RunSummary) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;

        let path = self.candidates_file();
        let json = serde_json::to_string_pretty(rows)?;
        tokio::fs::write(&path, json)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("💾 Saved {} candidates to {}", rows.len(), path.display());

        let summary_path = self.dir.join("run_summary.json");
        let json = serde_json::to_string_pretty(summary)?;
        tokio::fs::write(&summary_path, json)
            .await
            .with_context(|| format!("Failed to write {}", summary_path.display()))?;
        info!("💾 Saved run summary to {}", summary_path.display());

        Ok(())
    }

    fn sink_name(&self) -> &'static str {
        "json"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawl::collector::SweepStats;
    use crate::crawl::pool::FetchStats;
    use crate::models::{ArticleRecord, AssetType, DealType, GeoPoint};
    use chrono::Utc;

    fn record() -> ArticleRecord {
        ArticleRecord {
            id: "2400000001".into(),
            complex_ref: "1234".into(),
            name: "래미안".into(),
            asset_type: AssetType::Apartment,
            deal_type: DealType::Sale,
            price: Some(300_000_000),
            floor: "5/15".into(),
            area: "84".into(),
            exclusive_area: "59".into(),
            direction: "남향".into(),
            features: String::new(),
            registered_at: None,
            broker_office: "행복공인중개사".into(),
            broker_name: "김철수".into(),
            broker_contact_primary: "02-123-4567".into(),
            broker_contact_secondary: String::new(),
            latest_jeonse: Some(310_000_000),
            jeonse_history: Vec::new(),
            fetched_at: Utc::now(),
        }
    }

    fn summary() -> RunSummary {
        RunSummary {
            started_at: Utc::now(),
            finished_at: Utc::now(),
            center: GeoPoint::new(37.5608, 126.9888),
            zoom: 15,
            asset_types: vec![AssetType::Apartment],
            sweep: SweepStats::default(),
            fetch: FetchStats::default(),
            records_emitted: 1,
            top_candidates: Vec::new(),
        }
    }

    #[tokio::test]
    async fn writes_candidates_and_summary() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonResultSink::new(dir.path().join("out"));
        let record = record();
        let rows = vec![GapRow::new(&record)];

        sink.emit(&rows, &summary()).await.unwrap();

        let mut candidates = Vec::new();
        for entry in std::fs::read_dir(sink.dir()).unwrap() {
            let name = entry.unwrap().file_name().to_string_lossy().to_string();
            if name.starts_with("gap_candidates_") {
                candidates.push(name);
            }
        }
        assert_eq!(candidates.len(), 1);

        let written: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(sink.dir().join(&candidates[0])).unwrap(),
        )
        .unwrap();
        assert_eq!(written[0]["record"]["id"], "2400000001");
        assert_eq!(written[0]["gap"]["gap_amount"], -10_000_000);

        let summary: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(sink.dir().join("run_summary.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(summary["records_emitted"], 1);
    }
}
