//! Records flowing through the pipeline, collection to delivery.

use std::path::PathBuf;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

/// A vendor message as produced by the messaging driver. Untrusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessage {
    pub sender: String,
    pub body: String,

    /// Path or identifier of an attached image or document, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_ref: Option<String>,

    pub received_at: Timestamp,
}

/// A price mention pulled out of a message, not yet validated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceCandidate {
    pub product_text: String,
    pub price_text: String,
    pub source_sender: String,

    /// When the source message arrived. Drives the price's calendar date.
    pub received_at: Timestamp,
}

/// A price that passed validation and is safe to store and report.
///
/// Storage is keyed by `(product, vendor, date)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatedPrice {
    pub product: String,

    /// Canonical phone number of the vendor.
    pub vendor: String,

    pub price: f64,

    /// UTC calendar date, `YYYY-MM-DD`.
    pub date: String,
}

/// The rendered daily report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportArtifact {
    pub summary_text: String,
    pub detail_text: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optional_pdf_ref: Option<PathBuf>,

    /// Files the renderer wrote. Checked by the post-flight check.
    #[serde(default)]
    pub written: Vec<PathBuf>,
}
