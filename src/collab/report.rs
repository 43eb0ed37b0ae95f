//! Plain-text daily report.
//!
//! The summary lists the lowest quote per product; the detail lists every
//! quote. Both are written to the output directory so the post-flight check
//! and a human can find them.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;

use jiff::Timestamp;

use crate::model::{ReportArtifact, ValidatedPrice};

use super::{CollaboratorError, ReportRenderer, Result};

/// Renders text reports into `output_dir`.
#[derive(Debug, Clone)]
pub struct TextReportRenderer {
    output_dir: PathBuf,
}

impl TextReportRenderer {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }
}

impl ReportRenderer for TextReportRenderer {
    fn render(&self, prices: &[ValidatedPrice]) -> Result<ReportArtifact> {
        let date = prices
            .iter()
            .map(|p| p.date.clone())
            .max()
            .unwrap_or_else(|| Timestamp::now().strftime("%Y-%m-%d").to_string());

        let summary_text = summary(&date, prices);
        let detail_text = detail(&date, prices);

        fs::create_dir_all(&self.output_dir).map_err(io_error)?;
        let summary_path = self.output_dir.join(format!("daily_summary_{date}.txt"));
        let detail_path = self.output_dir.join(format!("daily_detail_{date}.txt"));
        fs::write(&summary_path, &summary_text).map_err(io_error)?;
        fs::write(&detail_path, &detail_text).map_err(io_error)?;

        Ok(ReportArtifact {
            summary_text,
            detail_text,
            optional_pdf_ref: None,
            written: vec![summary_path, detail_path],
        })
    }
}

fn io_error(e: std::io::Error) -> CollaboratorError {
    CollaboratorError::permanent(format!("failed to write report: {e}"))
}

fn summary(date: &str, prices: &[ValidatedPrice]) -> String {
    let mut out = format!("Daily price report {date}\n");
    if prices.is_empty() {
        out.push_str("No vendor prices received.\n");
        return out;
    }

    let vendors: BTreeSet<&str> = prices.iter().map(|p| p.vendor.as_str()).collect();
    let mut lowest: BTreeMap<&str, &ValidatedPrice> = BTreeMap::new();
    for p in prices {
        lowest
            .entry(p.product.as_str())
            .and_modify(|best| {
                if p.price < best.price {
                    *best = p;
                }
            })
            .or_insert(p);
    }

    let _ = writeln!(
        out,
        "{} products, {} vendors, {} quotes\n\nLowest prices:",
        lowest.len(),
        vendors.len(),
        prices.len()
    );
    for (product, p) in &lowest {
        let _ = writeln!(out, "- {product}: Rs {} ({})", format_price(p.price), p.vendor);
    }
    out
}

fn detail(date: &str, prices: &[ValidatedPrice]) -> String {
    let mut sorted: Vec<&ValidatedPrice> = prices.iter().collect();
    sorted.sort_by(|a, b| a.product.cmp(&b.product).then(a.price.total_cmp(&b.price)));

    let mut out = format!("All quotes {date}\n");
    for p in sorted {
        let _ = writeln!(out, "{} | Rs {} | {}", p.product, format_price(p.price), p.vendor);
    }
    out
}

/// `185000.0` as `185,000`; fractions kept to two places.
fn format_price(price: f64) -> String {
    let text = format!("{price:.2}");
    let (whole, frac) = text.split_once('.').unwrap_or((&text, "00"));

    let mut grouped = String::new();
    for (i, c) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    if frac == "00" {
        grouped
    } else {
        format!("{grouped}.{frac}")
    }
}
