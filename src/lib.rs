//! # Xtractor
//!
//! Extraction and redistribution engine for vehicle-tracking and visits spreadsheets.
//!
//! ## Features
//!
//! - **Format normalization**: reads `.xlsx`, legacy BIFF8 `.xls`, and HTML pages
//!   saved under an `.xls` name, and converts the legacy ones to `.xlsx`
//! - **Stop extraction**: finds the header row of every sheet by keyword, pulls one
//!   record per stop, and falls back across columns for coordinates and addresses
//! - **Geofencing**: labels each stop inside, outside, or undefined against a
//!   configurable polygon
//! - **Unified report**: writes all records of a batch into one styled workbook
//!   with zone colors and map links
//! - **Visits distribution**: splits a visits sheet into one workbook per
//!   supervisor and per representative, with a sheet per line
//!
//! ## Example
//!
//! ```no_run
//! use std::path::Path;
//! use xtractor::EngineConfig;
//! use xtractor::ExtractionEngine;
//! use xtractor::Mode;
//!
//! let engine = ExtractionEngine::new(&EngineConfig::default());
//! let batch = engine.process(&["trucks.xls"], Mode::EngineIdle, Path::new("out"))?;
//! println!("{} records in {}", batch.extraction.statistics.total_records, batch.report.display());
//! # Ok::<(), xtractor::XtractorError>(())
//! ```
pub mod archive;
pub mod config;
pub mod distribution;
pub mod error;
pub mod extraction;
pub mod fields;
pub mod geofence;
pub mod header;
pub mod normalizer;
pub mod report;
pub mod spreadsheet;

mod helpers;
mod styled;

pub use crate::config::EngineConfig;
pub use crate::distribution::DistributionEngine;
pub use crate::distribution::DistributionResult;
pub use crate::error::XtractorError;
pub use crate::extraction::ExtractionEngine;
pub use crate::extraction::Mode;
pub use crate::extraction::Record;
pub use crate::geofence::Geofence;
pub use crate::geofence::Zone;
pub use crate::normalizer::FormatNormalizer;
pub use crate::report::ReportAssembler;
pub use crate::spreadsheet::CellValue;
pub use crate::spreadsheet::Sheet;
pub use crate::spreadsheet::Workbook;
