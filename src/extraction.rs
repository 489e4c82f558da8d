//! Extraction of vehicle stop records from tracking exports.
//!
//! Each sheet of an export describes one vehicle: its identifier sits in A1 and
//! the stop rows sit below a header that has to be discovered. The engine walks
//! files and sheets in order, skips what it cannot understand and gathers
//! everything else into one flat list of [`Record`]s.
use crate::config::EngineConfig;
use crate::error::XtractorError;
use crate::fields::car_number;
use crate::fields::car_plate;
use crate::fields::extract_address_text;
use crate::fields::extract_coordinates;
use crate::fields::FallbackChain;
use crate::geofence::Geofence;
use crate::geofence::Zone;
use crate::header::HeaderStrategy;
use crate::header::KeywordHeaderLocator;
use crate::header::LocatedHeader;
use crate::header::Role;
use crate::normalizer::FormatNormalizer;
use crate::report::ReportAssembler;
use crate::spreadsheet::reference::index_to_reference;
use crate::spreadsheet::CellValue;
use crate::spreadsheet::Sheet;
use crate::spreadsheet::Workbook;
use chrono::Local;
use serde::Deserialize;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt::Display;
use std::path::Path;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

/// Which tracking report is being processed.
#[derive(Copy, Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Engine-idle stops keyed by car number.
    #[value(name = "engine_idle")]
    EngineIdle,
    /// Parking locations keyed by car plate.
    #[value(name = "parking_details")]
    ParkingDetails,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::EngineIdle => "engine_idle",
            Mode::ParkingDetails => "parking_details",
        }
    }

    pub fn parse_car_code(&self, identifier: &str) -> String {
        match self {
            Mode::EngineIdle => car_number(identifier),
            Mode::ParkingDetails => car_plate(identifier),
        }
    }

    /// Header of the identifier column in the report.
    pub fn car_header(&self) -> &'static str {
        match self {
            Mode::EngineIdle => "Car Number",
            Mode::ParkingDetails => "Car Plate",
        }
    }

    pub fn report_title(&self) -> &'static str {
        match self {
            Mode::EngineIdle => "Vehicle Stops Report",
            Mode::ParkingDetails => "Vehicle Locations Report",
        }
    }
}

impl Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = XtractorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "engine_idle" => Ok(Mode::EngineIdle),
            "parking_details" => Ok(Mode::ParkingDetails),
            other => Err(XtractorError::SchemaError(format!(
                "Unknown mode '{other}', expected 'engine_idle' or 'parking_details'"
            ))),
        }
    }
}

/// One stop of one vehicle. Time fields keep the cell value as read.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Record {
    pub car_code: String,
    pub start_time: CellValue,
    pub end_time: CellValue,
    pub duration: CellValue,
    /// `"lat,lon"` or empty
    pub coordinates: String,
    pub zone: Zone,
    pub address: String,
    pub source_sheet: String,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct ExtractionStatistics {
    pub total_records: usize,
    pub inside_zone: usize,
    pub outside_zone: usize,
    pub undefined_zone: usize,
    pub unique_cars: usize,
    pub sheets_processed: usize,
}

impl ExtractionStatistics {
    pub fn from_records(records: &[Record]) -> ExtractionStatistics {
        let count = |zone: Zone| records.iter().filter(|record| record.zone == zone).count();
        let distinct = |field: fn(&Record) -> &str| {
            records
                .iter()
                .map(field)
                .filter(|value| !value.is_empty())
                .collect::<HashSet<_>>()
                .len()
        };
        ExtractionStatistics {
            total_records: records.len(),
            inside_zone: count(Zone::Inside),
            outside_zone: count(Zone::Outside),
            undefined_zone: count(Zone::Undefined),
            unique_cars: distinct(|record| record.car_code.as_str()),
            sheets_processed: distinct(|record| record.source_sheet.as_str()),
        }
    }
}

/// A sheet left out of the batch because no usable header was found.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct SkippedSheet {
    pub file: String,
    pub sheet: String,
    pub reason: String,
}

/// A file of the batch that could not be read at all.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct FailedFile {
    pub file: String,
    pub message: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct BatchExtraction {
    pub records: Vec<Record>,
    pub statistics: ExtractionStatistics,
    pub skipped_sheets: Vec<SkippedSheet>,
    pub failed_files: Vec<FailedFile>,
}

/// A batch written out as a report.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProcessedBatch {
    pub report: PathBuf,
    #[serde(flatten)]
    pub extraction: BatchExtraction,
}

pub struct ExtractionEngine<H: HeaderStrategy = KeywordHeaderLocator> {
    header: H,
    geofence: Geofence,
    normalizer: FormatNormalizer,
    coordinates: FallbackChain,
    address: FallbackChain,
}

impl ExtractionEngine<KeywordHeaderLocator> {
    pub fn new(config: &EngineConfig) -> ExtractionEngine<KeywordHeaderLocator> {
        let header = KeywordHeaderLocator::new(config.extraction.keywords.clone(), config.extraction.header_scan_rows);
        ExtractionEngine::with_strategy(header, config)
    }
}

impl<H: HeaderStrategy> ExtractionEngine<H> {
    pub fn with_strategy(header: H, config: &EngineConfig) -> ExtractionEngine<H> {
        ExtractionEngine {
            header,
            geofence: config.geofence.clone(),
            normalizer: FormatNormalizer::new(config.normalizer.clone()),
            coordinates: FallbackChain::new(extract_coordinates),
            address: FallbackChain::new(extract_address_text),
        }
    }

    /// Extracts one sheet. A sheet without a usable header is a SchemaError,
    /// which the batch treats as a reason to skip that sheet only.
    pub fn extract_sheet(&self, sheet: &Sheet, mode: Mode) -> Result<Vec<Record>, XtractorError> {
        let car_code = mode.parse_car_code(sheet.cell(1, 1).to_string().trim());
        let LocatedHeader { row: header_row, columns } = self
            .header
            .locate(sheet)
            .ok_or_else(|| XtractorError::SchemaError("no usable header".to_owned()))?;
        debug!(
            sheet = %sheet.name(),
            header = %index_to_reference(header_row - 1, 0),
            car_code = %car_code,
            "Located header"
        );

        let value = |row: usize, role: Role| {
            columns
                .get(role)
                .map(|col| sheet.cell(row, col).trimmed())
                .unwrap_or_default()
        };
        let mut records = Vec::new();
        for row in header_row + 1..=sheet.row_count() {
            if sheet.row(row).iter().all(CellValue::is_empty) {
                continue;
            }
            let start_time = value(row, Role::Start);
            let end_time = value(row, Role::End);
            let duration = value(row, Role::Duration);
            if start_time.is_empty() && end_time.is_empty() && duration.is_empty() {
                continue;
            }
            let coordinate_text = value(row, Role::Coordinate).to_string();
            let address_text = value(row, Role::Address).to_string();
            let coordinates = self.coordinates.resolve([coordinate_text.as_str(), address_text.as_str()]);
            let address = self.address.resolve([address_text.as_str(), coordinate_text.as_str()]);
            records.push(Record {
                car_code: car_code.clone(),
                start_time,
                end_time,
                duration,
                zone: self.geofence.classify(&coordinates),
                coordinates,
                address,
                source_sheet: sheet.name().to_owned(),
            });
        }
        Ok(records)
    }

    /// Extracts every sheet of a loaded workbook; sheets without a usable header are skipped.
    pub fn extract_workbook(&self, workbook: &Workbook, mode: Mode) -> (Vec<Record>, Vec<SkippedSheet>) {
        let mut records = Vec::new();
        let mut skipped = Vec::new();
        for sheet in &workbook.sheets {
            match self.extract_sheet(sheet, mode) {
                Ok(sheet_records) => {
                    debug!(file = %workbook.source, sheet = %sheet.name(), records = sheet_records.len(), "Extracted sheet");
                    records.extend(sheet_records);
                }
                Err(e) => {
                    let reason = e.to_string();
                    warn!(file = %workbook.source, sheet = %sheet.name(), "Skipped sheet: {}", reason);
                    skipped.push(SkippedSheet {
                        file: workbook.source.clone(),
                        sheet: sheet.name().to_owned(),
                        reason,
                    });
                }
            }
        }
        (records, skipped)
    }

    pub fn extract_file(&self, path: &Path, mode: Mode) -> Result<(Vec<Record>, Vec<SkippedSheet>), XtractorError> {
        let workbook = self.normalizer.load(path)?;
        let (records, skipped) = self.extract_workbook(&workbook, mode);
        info!(
            file = %workbook.source,
            sheets = workbook.sheets.len(),
            records = records.len(),
            skipped = skipped.len(),
            "Extracted file"
        );
        Ok((records, skipped))
    }

    /// Extracts a batch. Unreadable files are reported, not fatal; a batch
    /// that yields no record at all is an error.
    pub fn extract<P: AsRef<Path>>(&self, files: &[P], mode: Mode) -> Result<BatchExtraction, XtractorError> {
        let mut batch = BatchExtraction::default();
        for path in files {
            let path = path.as_ref();
            match self.extract_file(path, mode) {
                Ok((records, skipped)) => {
                    batch.records.extend(records);
                    batch.skipped_sheets.extend(skipped);
                }
                Err(e) => {
                    error!(file = %path.display(), "Failed to read file: {}", e);
                    batch.failed_files.push(FailedFile {
                        file: path.display().to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }
        if batch.records.is_empty() {
            Err(XtractorError::EmptyResultError(format!(
                "No records found in {} file(s) ({} sheet(s) skipped, {} file(s) unreadable)",
                files.len(),
                batch.skipped_sheets.len(),
                batch.failed_files.len()
            )))?;
        }
        batch.statistics = ExtractionStatistics::from_records(&batch.records);
        info!(
            records = batch.statistics.total_records,
            inside = batch.statistics.inside_zone,
            outside = batch.statistics.outside_zone,
            undefined = batch.statistics.undefined_zone,
            cars = batch.statistics.unique_cars,
            "Batch extracted"
        );
        Ok(batch)
    }

    /// Extracts a batch and writes `Summary_Report_<mode>_<timestamp>.xlsx` into `output_dir`.
    pub fn process<P: AsRef<Path>>(&self, files: &[P], mode: Mode, output_dir: &Path) -> Result<ProcessedBatch, XtractorError> {
        let extraction = self.extract(files, mode)?;
        std::fs::create_dir_all(output_dir)?;
        let report = output_dir.join(format!(
            "Summary_Report_{}_{}.xlsx",
            mode,
            Local::now().format("%Y%m%d_%H%M%S")
        ));
        ReportAssembler::new(mode).write(&extraction.records, &report)?;
        Ok(ProcessedBatch { report, extraction })
    }
}
