//! Turns whatever the tracking portals export into a workbook the engines can read.
//!
//! Modern `.xlsx` files are read as they are. Anything else is tried first as a
//! BIFF8 `.xls` workbook and then as an HTML page holding a `<table>`, which is
//! what some portals save under an `.xls` name.
use crate::config::NormalizerConfig;
use crate::error::XtractorError;
use crate::spreadsheet::open_html;
use crate::spreadsheet::open_xls;
use crate::spreadsheet::open_xlsx;
use crate::spreadsheet::source_name;
use crate::spreadsheet::CellValue;
use crate::spreadsheet::Sheet;
use crate::spreadsheet::Workbook;
use crate::styled::unique_headers;
use crate::styled::unique_sheet_name;
use crate::styled::StyledCell;
use crate::styled::StyledSheetBuilder;
use rust_xlsxwriter::Format;
use rust_xlsxwriter::TableStyle;
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use tracing::error;
use tracing::info;
use tracing::warn;

/// True for the zip-based container the engines write.
pub fn is_modern_workbook(path: &Path) -> bool {
    has_extension(path, &["xlsx", "xlsm"])
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|extension| extension.to_str())
        .map(|extension| extensions.iter().any(|candidate| extension.eq_ignore_ascii_case(candidate)))
        .unwrap_or(false)
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ConvertedFile {
    pub original: String,
    pub converted: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ConversionError {
    pub file: String,
    pub error: String,
}

/// Outcome of converting every legacy workbook in a directory.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ConversionSummary {
    pub converted: Vec<ConvertedFile>,
    /// Files already in the modern format.
    pub skipped: Vec<String>,
    pub errors: Vec<ConversionError>,
    pub total: usize,
}

#[derive(Clone, Debug, Default)]
pub struct FormatNormalizer {
    config: NormalizerConfig,
}

impl FormatNormalizer {
    pub fn new(config: NormalizerConfig) -> FormatNormalizer {
        FormatNormalizer { config }
    }

    /// Reads every sheet of `path` into memory without writing anything.
    pub fn load(&self, path: &Path) -> Result<Workbook, XtractorError> {
        let name = source_name(path);
        if !path.is_file() {
            Err(XtractorError::format(&name, "file does not exist"))?;
        }
        if is_modern_workbook(path) {
            return open_xlsx(path).map_err(|e| XtractorError::format(&name, e));
        }
        match open_xls(path) {
            Ok(workbook) => Ok(workbook),
            Err(legacy_error) => {
                warn!(file = %name, "Not a legacy workbook ({}), trying HTML table", legacy_error);
                let workbook = open_html(path, &self.config.html_sheet_name)
                    .map_err(|html_error| XtractorError::format(&name, format!("{legacy_error}; {html_error}")))?;
                info!(file = %name, "Parsed HTML table export");
                Ok(workbook)
            }
        }
    }

    /// Returns `path` itself for modern workbooks; otherwise writes `<stem>.xlsx`
    /// into `output_dir` and returns that path. The source file is never modified.
    pub fn normalize(&self, path: &Path, output_dir: &Path) -> Result<PathBuf, XtractorError> {
        if is_modern_workbook(path) {
            info!(file = %source_name(path), "Already in modern format");
            return Ok(path.to_path_buf());
        }
        let workbook = self.load(path)?;
        fs::create_dir_all(output_dir)?;
        let stem = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "converted".to_owned());
        let output = output_dir.join(format!("{stem}.xlsx"));
        write_workbook(&workbook, &output)?;
        info!(file = %workbook.source, output = %output.display(), sheets = workbook.sheets.len(), "Converted to xlsx");
        Ok(output)
    }

    /// Converts each `.xls` directly inside `dir`; one failing file does not stop the rest.
    pub fn convert_directory(&self, dir: &Path, output_dir: &Path) -> Result<ConversionSummary, XtractorError> {
        fs::create_dir_all(output_dir)?;
        let mut entries = fs::read_dir(dir)?
            .map(|entry| entry.map(|entry| entry.path()))
            .collect::<Result<Vec<_>, _>>()?;
        entries.sort();

        let mut summary = ConversionSummary::default();
        for path in entries {
            let file_name = source_name(&path);
            if file_name.starts_with("~$") || file_name.starts_with('.') || !path.is_file() {
                continue;
            }
            if !has_extension(&path, &["xls", "xlsx"]) {
                continue;
            }
            summary.total += 1;
            if has_extension(&path, &["xlsx"]) {
                summary.skipped.push(file_name);
                continue;
            }
            match self.normalize(&path, output_dir) {
                Ok(converted) => summary.converted.push(ConvertedFile {
                    original: file_name,
                    converted: source_name(&converted),
                }),
                Err(e) => {
                    error!(file = %file_name, "Conversion failed: {}", e);
                    summary.errors.push(ConversionError {
                        file: file_name,
                        error: e.to_string(),
                    });
                }
            }
        }
        info!(
            converted = summary.converted.len(),
            errors = summary.errors.len(),
            skipped = summary.skipped.len(),
            "Directory conversion complete"
        );
        Ok(summary)
    }
}

fn write_workbook(workbook: &Workbook, output: &Path) -> Result<(), XtractorError> {
    let mut book = rust_xlsxwriter::Workbook::new();
    let mut taken = Vec::new();
    for sheet in &workbook.sheets {
        let name = unique_sheet_name(sheet.name(), &mut taken);
        let (headers, rows) = split_header(sheet);
        if headers.is_empty() && !sheet.is_empty() {
            warn!(sheet = %name, "First row cannot serve as table headers, writing without table style");
        }
        let worksheet = StyledSheetBuilder::new(&name, headers)
            .header_format(Format::new(), None)
            .table(TableStyle::Medium9)
            .build(&rows)?;
        book.push_worksheet(worksheet);
    }
    book.save(output)?;
    Ok(())
}

/// Uses the first row as table headers when every cell of it is non-blank text,
/// suffixing repeated names; otherwise every row is data.
fn split_header(sheet: &Sheet) -> (Vec<String>, Vec<Vec<StyledCell>>) {
    let to_cells = |row: &[CellValue]| row.iter().cloned().map(StyledCell::value).collect::<Vec<_>>();
    let first = sheet.row(1);
    let all_text = !first.is_empty() && first.iter().all(|cell| matches!(cell, CellValue::Text(text) if !text.trim().is_empty()));
    if sheet.row_count() > 1 && all_text {
        let headers = unique_headers(first.iter().map(CellValue::to_string));
        (headers, sheet.rows().skip(1).map(to_cells).collect())
    } else {
        (Vec::new(), sheet.rows().map(to_cells).collect())
    }
}
