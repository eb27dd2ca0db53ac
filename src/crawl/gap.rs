//! Gap metrics and the investment filters applied to resolved articles.
//!
//! Filtering is a view over the result set; records that fail a filter are
//! left where they are.

use serde::Serialize;

use crate::config::CrawlConfig;
use crate::models::{ArticleRecord, GapMetrics};

/// One emitted result: the record plus its derived metrics
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GapRow<'a> {
    pub record: &'a ArticleRecord,
    pub previous_jeonse: Option<i64>,
    pub gap: Option<GapMetrics>,
}

impl<'a> GapRow<'a> {
    pub fn new(record: &'a ArticleRecord) -> Self {
        Self {
            record,
            previous_jeonse: record.previous_jeonse(),
            gap: record.gap(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GapFilter {
    /// Drop records without any jeonse history
    pub require_prior_jeonse: bool,
    /// Drop records whose previous jeonse is below the sale price
    pub require_jeonse_at_least_sale: bool,
}

impl GapFilter {
    pub fn from_config(config: &CrawlConfig) -> Self {
        Self {
            require_prior_jeonse: config.require_prior_jeonse,
            require_jeonse_at_least_sale: config.require_jeonse_at_least_sale,
        }
    }

    pub fn admits(&self, row: &GapRow<'_>) -> bool {
        if self.require_prior_jeonse && row.previous_jeonse.is_none() {
            return false;
        }
        if self.require_jeonse_at_least_sale {
            match (row.previous_jeonse, row.record.price) {
                (Some(jeonse), Some(price)) if jeonse >= price => {}
                _ => return false,
            }
        }
        true
    }

    /// Rows that pass every enabled filter, cheapest first
    pub fn apply<'a, I>(&self, records: I) -> Vec<GapRow<'a>>
    where
        I: IntoIterator<Item = &'a ArticleRecord>,
    {
        let mut rows: Vec<GapRow<'a>> = records
            .into_iter()
            .map(GapRow::new)
            .filter(|row| self.admits(row))
            .collect();
        rows.sort_by(|a, b| {
            let key = |r: &GapRow<'_>| (r.record.price.is_none(), r.record.price);
            key(a).cmp(&key(b)).then_with(|| a.record.id.cmp(&b.record.id))
        });
        rows
    }
}

/// Up to `n` rows with the smallest gap ratio
pub fn lowest_gap_ratio<'r, 'a>(rows: &'r [GapRow<'a>], n: usize) -> Vec<&'r GapRow<'a>> {
    let mut with_gap: Vec<&GapRow<'a>> = rows.iter().filter(|r| r.gap.is_some()).collect();
    with_gap.sort_by(|a, b| {
        let ratio = |r: &GapRow<'_>| r.gap.map(|g| g.gap_ratio).unwrap_or(f64::INFINITY);
        ratio(a).total_cmp(&ratio(b))
    });
    with_gap.truncate(n);
    with_gap
}
