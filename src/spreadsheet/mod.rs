//! In-memory tabular model and the readers that fill it.
//!
//! Every supported source (Office Open XML workbooks, BIFF8 workbooks inside an
//! OLE container, and HTML documents holding a `<table>`) is loaded eagerly into a
//! [`Workbook`]: an ordered list of [`Sheet`] grids of [`CellValue`]s.

pub mod cell;
pub(crate) mod excel;
pub(crate) mod html;
pub(crate) mod reference;
pub mod sheet;
pub(crate) mod xls;
pub(crate) mod xlsx;

pub use crate::spreadsheet::cell::CellValue;
pub use crate::spreadsheet::sheet::Sheet;

use crate::error::XtractorError;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SpreadsheetError {
    #[error("Spreadsheet '{0}' contains no worksheets")]
    EmptySpreadsheet(String),

    #[error("Spreadsheet '{0}' is password protected")]
    PasswordProtected(String),

    #[error("Missing package part '{0}'")]
    MissingPart(String),

    #[error("No <table> element found in '{0}'")]
    NoTable(String),
}

/// All sheets of one source file, in workbook order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Workbook {
    /// Display name of the source, usually its file name.
    pub source: String,
    pub sheets: Vec<Sheet>,
}

impl Workbook {
    pub fn sheet(&self, name: &str) -> Option<&Sheet> {
        self.sheets.iter().find(|sheet| sheet.name() == name)
    }
}

/// A source that can be drained into sheets.
pub(crate) trait Spreadsheet {
    fn name(&self) -> String;

    fn read_sheets(&mut self) -> Result<Vec<Sheet>, XtractorError>;

    fn into_workbook(mut self) -> Result<Workbook, XtractorError>
    where
        Self: Sized,
    {
        let sheets = self.read_sheets()?;
        Ok(Workbook { source: self.name(), sheets })
    }
}

/// Display name used in logs and error messages.
pub(crate) fn source_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

pub(crate) fn open_xlsx(path: &Path) -> Result<Workbook, XtractorError> {
    xlsx::XlsxSpreadsheet::open(path)?.into_workbook()
}

pub(crate) fn open_xls(path: &Path) -> Result<Workbook, XtractorError> {
    xls::XlsSpreadsheet::open(path)?.into_workbook()
}

pub(crate) fn open_html(path: &Path, sheet_name: &str) -> Result<Workbook, XtractorError> {
    html::HtmlSpreadsheet::open(path, sheet_name)?.into_workbook()
}
