//! Engine configuration.
//!
//! Every engine entry point takes its settings explicitly; nothing here is
//! process-wide. A TOML file may override any subset of the defaults:
//!
//! ```toml
//! [geofence]
//! polygon = [[30.22923, 31.73212], [30.22984, 31.73347], [30.22908, 31.73418], [30.22851, 31.73325]]
//!
//! [extraction]
//! header_scan_rows = 20
//!
//! [extraction.keywords]
//! start = ["start time", "start"]
//!
//! [distribution]
//! sheet_name = "إجمالي"
//! ```
use crate::error::XtractorError;
use crate::geofence::Geofence;
use crate::header::HeaderKeywords;
use serde::Deserialize;
use std::path::Path;

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub geofence: Geofence,
    pub extraction: ExtractionConfig,
    pub distribution: DistributionConfig,
    pub normalizer: NormalizerConfig,
}

impl EngineConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<EngineConfig, XtractorError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Ok(toml::from_str(&text)?)
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExtractionConfig {
    pub keywords: HeaderKeywords,
    /// How many leading rows may hold the header.
    pub header_scan_rows: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        ExtractionConfig {
            keywords: HeaderKeywords::default(),
            header_scan_rows: 20,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct DistributionConfig {
    /// Sheet of the visits workbook holding the rows to distribute.
    pub sheet_name: String,
    /// Name of the all-rows sheet in every produced workbook.
    pub totals_sheet_name: String,
}

impl Default for DistributionConfig {
    fn default() -> Self {
        DistributionConfig {
            sheet_name: "إجمالي".to_owned(),
            totals_sheet_name: "إجمالي".to_owned(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct NormalizerConfig {
    /// Name given to the single sheet recovered from an HTML export.
    pub html_sheet_name: String,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        NormalizerConfig {
            html_sheet_name: "iTrack Report".to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            [extraction]
            header_scan_rows = 5

            [distribution]
            sheet_name = "Visits"
            "#,
        )
        .unwrap();

        assert_eq!(config.extraction.header_scan_rows, 5);
        assert_eq!(config.extraction.keywords, HeaderKeywords::default());
        assert_eq!(config.distribution.sheet_name, "Visits");
        assert_eq!(config.distribution.totals_sheet_name, "إجمالي");
        assert_eq!(config.normalizer.html_sheet_name, "iTrack Report");
        assert_eq!(config.geofence, Geofence::default());
    }

    #[test]
    fn polygon_override() {
        let config: EngineConfig = toml::from_str("[geofence]\npolygon = [[1.0, 2.0], [3.0, 4.0]]").unwrap();
        assert_eq!(config.geofence.polygon, vec![(1.0, 2.0), (3.0, 4.0)]);
    }
}
