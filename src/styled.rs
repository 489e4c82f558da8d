//! Shared layout for every workbook the engine writes: banner rows, a header row,
//! formatted data cells, fixed widths, an optional banded table and frozen panes.
use crate::error::XtractorError;
use crate::spreadsheet::cell::datetime_to_serial;
use crate::spreadsheet::reference::index_to_reference;
use crate::spreadsheet::CellValue;
use rust_xlsxwriter::Format;
use rust_xlsxwriter::Table;
use rust_xlsxwriter::TableColumn;
use rust_xlsxwriter::TableStyle;
use rust_xlsxwriter::Url;
use rust_xlsxwriter::Worksheet;
use std::collections::HashSet;
use tracing::warn;

/// Longest sheet name the container accepts.
pub const MAX_SHEET_NAME_CHARS: usize = 31;

pub(crate) const DATETIME_FORMAT: &str = "dd/mm/yyyy hh:mm:ss";

/// One data cell and its optional format.
#[derive(Clone, Debug)]
pub(crate) struct StyledCell {
    content: Content,
    format: Option<Format>,
}

#[derive(Clone, Debug)]
enum Content {
    Value(CellValue),
    Link { url: String, text: String },
}

impl StyledCell {
    pub(crate) fn value(value: impl Into<CellValue>) -> StyledCell {
        StyledCell {
            content: Content::Value(value.into()),
            format: None,
        }
    }

    pub(crate) fn link(url: impl Into<String>, text: impl Into<String>) -> StyledCell {
        StyledCell {
            content: Content::Link { url: url.into(), text: text.into() },
            format: None,
        }
    }

    pub(crate) fn with_format(mut self, format: &Format) -> StyledCell {
        self.format = Some(format.clone());
        self
    }

    fn write(&self, worksheet: &mut Worksheet, row: u32, col: u16) -> Result<(), XtractorError> {
        match (&self.content, &self.format) {
            (Content::Value(CellValue::Empty), Some(format)) => {
                worksheet.write_blank(row, col, format)?;
            }
            (Content::Value(CellValue::Empty), None) => (),
            (Content::Value(CellValue::Number(number)), Some(format)) => {
                worksheet.write_number_with_format(row, col, *number, format)?;
            }
            (Content::Value(CellValue::Number(number)), None) => {
                worksheet.write_number(row, col, *number)?;
            }
            (Content::Value(CellValue::Timestamp(timestamp)), format) => {
                // A serial without a date format would show as a bare number
                let format = format.clone().unwrap_or_default().set_num_format(DATETIME_FORMAT);
                worksheet.write_number_with_format(row, col, datetime_to_serial(timestamp), &format)?;
            }
            (Content::Value(CellValue::Text(text)), Some(format)) => {
                worksheet.write_string_with_format(row, col, text, format)?;
            }
            (Content::Value(CellValue::Text(text)), None) => {
                worksheet.write_string(row, col, text)?;
            }
            (Content::Link { url, text }, format) => {
                let link = Url::new(url.as_str()).set_text(text.as_str());
                worksheet.write_url_with_format(row, col, link, &format.clone().unwrap_or_default())?;
            }
        }
        Ok(())
    }
}

/// A full-width merged row above the header.
#[derive(Clone, Debug)]
struct Banner {
    text: String,
    format: Format,
    height: f64,
}

/// Lays out one worksheet. Rows are, in order: banners, an optional spacer,
/// the header, then data. Without headers the data starts where the header would be.
#[derive(Clone)]
pub(crate) struct StyledSheetBuilder {
    name: String,
    headers: Vec<String>,
    header_format: Format,
    header_height: Option<f64>,
    banners: Vec<Banner>,
    spacer_height: Option<f64>,
    widths: Vec<f64>,
    table_style: Option<TableStyle>,
    freeze_header: bool,
}

impl StyledSheetBuilder {
    pub(crate) fn new(name: &str, headers: Vec<String>) -> StyledSheetBuilder {
        StyledSheetBuilder {
            name: name.to_owned(),
            headers,
            header_format: Format::new().set_bold(),
            header_height: None,
            banners: Vec::new(),
            spacer_height: None,
            widths: Vec::new(),
            table_style: None,
            freeze_header: false,
        }
    }

    pub(crate) fn banner(mut self, text: impl Into<String>, format: Format, height: f64) -> StyledSheetBuilder {
        self.banners.push(Banner {
            text: text.into(),
            format,
            height,
        });
        self
    }

    pub(crate) fn spacer(mut self, height: f64) -> StyledSheetBuilder {
        self.spacer_height = Some(height);
        self
    }

    pub(crate) fn header_format(mut self, format: Format, height: Option<f64>) -> StyledSheetBuilder {
        self.header_format = format;
        self.header_height = height;
        self
    }

    pub(crate) fn widths(mut self, widths: &[f64]) -> StyledSheetBuilder {
        self.widths = widths.to_vec();
        self
    }

    /// Wraps header and data in a banded table. Applied best-effort.
    pub(crate) fn table(mut self, style: TableStyle) -> StyledSheetBuilder {
        self.table_style = Some(style);
        self
    }

    pub(crate) fn freeze_header(mut self) -> StyledSheetBuilder {
        self.freeze_header = true;
        self
    }

    /// 0-based index of the header row.
    pub(crate) fn header_row(&self) -> u32 {
        (self.banners.len() + usize::from(self.spacer_height.is_some())) as u32
    }

    pub(crate) fn build(&self, rows: &[Vec<StyledCell>]) -> Result<Worksheet, XtractorError> {
        let mut worksheet = Worksheet::new();
        worksheet.set_name(&self.name)?;

        let width = self.headers.len().max(rows.iter().map(Vec::len).max().unwrap_or(0)).max(1);
        let last_col = (width - 1) as u16;
        for (row, banner) in self.banners.iter().enumerate() {
            let row = row as u32;
            if last_col == 0 {
                worksheet.write_string_with_format(row, 0, &banner.text, &banner.format)?;
            } else {
                worksheet.merge_range(row, 0, row, last_col, &banner.text, &banner.format)?;
            }
            worksheet.set_row_height(row, banner.height)?;
        }
        if let Some(height) = self.spacer_height {
            worksheet.set_row_height(self.banners.len() as u32, height)?;
        }

        let header_row = self.header_row();
        let first_data_row = if self.headers.is_empty() { header_row } else { header_row + 1 };
        for (row, cells) in rows.iter().enumerate() {
            let row = first_data_row + row as u32;
            for (col, cell) in cells.iter().enumerate() {
                cell.write(&mut worksheet, row, col as u16)?;
            }
        }
        if let (Some(style), false) = (&self.table_style, self.headers.is_empty()) {
            self.apply_table(&mut worksheet, style.clone(), rows.len(), last_col);
        }
        for (col, header) in self.headers.iter().enumerate() {
            worksheet.write_string_with_format(header_row, col as u16, header, &self.header_format)?;
        }
        if let Some(height) = self.header_height {
            worksheet.set_row_height(header_row, height)?;
        }

        for (col, width) in self.widths.iter().enumerate() {
            worksheet.set_column_width(col as u16, *width)?;
        }
        if self.freeze_header && !self.headers.is_empty() {
            worksheet.set_freeze_panes(header_row + 1, 0)?;
        }
        Ok(worksheet)
    }

    fn apply_table(&self, worksheet: &mut Worksheet, style: TableStyle, data_rows: usize, last_col: u16) {
        let first_row = self.header_row();
        let last_row = first_row + data_rows as u32;
        let range = format!(
            "{}:{}",
            index_to_reference(first_row as usize, 0),
            index_to_reference(last_row as usize, last_col as usize)
        );
        if data_rows == 0 || !has_unique_headers(&self.headers) || self.headers.len() != last_col as usize + 1 {
            warn!(sheet = %self.name, range = %range, "Skipped table style: header row cannot name the table columns");
            return;
        }
        let columns: Vec<TableColumn> = self.headers.iter().map(|header| TableColumn::new().set_header(header)).collect();
        let table = Table::new().set_style(style).set_banded_rows(true).set_columns(&columns);
        if let Err(error) = worksheet.add_table(first_row, 0, last_row, last_col, &table) {
            warn!(sheet = %self.name, range = %range, "Skipped table style: {}", error);
        }
    }
}

/// Table columns need distinct, non-blank names.
pub(crate) fn has_unique_headers(headers: &[String]) -> bool {
    let mut seen = HashSet::new();
    !headers.is_empty() && headers.iter().all(|header| !header.trim().is_empty() && seen.insert(header.to_lowercase()))
}

/// Header texts made usable as table column names: trimmed, blanks named
/// `Column<n>`, and repeats (compared case-insensitively) suffixed `.1`, `.2`
/// until no two names collide.
pub(crate) fn unique_headers(texts: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut taken = HashSet::new();
    texts
        .into_iter()
        .enumerate()
        .map(|(index, text)| {
            let text = text.trim();
            let base = if text.is_empty() { format!("Column{}", index + 1) } else { text.to_owned() };
            let mut header = base.clone();
            let mut counter = 0;
            while !taken.insert(header.to_lowercase()) {
                counter += 1;
                header = format!("{base}.{counter}");
            }
            header
        })
        .collect()
}

/// Truncates a sheet name to the container limit and makes it unique among `taken`.
/// Names are compared case-insensitively, as the container does.
pub(crate) fn unique_sheet_name(name: &str, taken: &mut Vec<String>) -> String {
    let base: String = name.chars().take(MAX_SHEET_NAME_CHARS).collect();
    let base = if base.trim().is_empty() { "Sheet".to_owned() } else { base };
    let mut candidate = base.clone();
    let mut counter = 1;
    while taken.iter().any(|used| used.to_lowercase() == candidate.to_lowercase()) {
        counter += 1;
        let suffix = format!(" ({counter})");
        let kept: String = base.chars().take(MAX_SHEET_NAME_CHARS - suffix.chars().count()).collect();
        candidate = format!("{kept}{suffix}");
    }
    taken.push(candidate.clone());
    candidate
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_row_follows_banners_and_spacer() {
        let builder = StyledSheetBuilder::new("s", vec!["a".to_owned()]);
        assert_eq!(builder.header_row(), 0);
        let builder = builder.banner("Title", Format::new(), 35.0).banner("Date", Format::new(), 30.0).spacer(10.0);
        assert_eq!(builder.header_row(), 3);
    }

    #[test]
    fn sheet_names_are_truncated_and_deduplicated() {
        let mut taken = Vec::new();
        let long = "A very long line name that exceeds the limit";
        let first = unique_sheet_name(long, &mut taken);
        let second = unique_sheet_name(long, &mut taken);
        assert_eq!(first.chars().count(), 31);
        assert_eq!(second.chars().count(), 31);
        assert!(second.ends_with(" (2)"));
        assert_eq!(unique_sheet_name("line", &mut taken), "line");
        assert_eq!(unique_sheet_name("LINE", &mut taken), "LINE (2)");
    }

    #[test]
    fn table_headers_must_be_distinct() {
        let headers = |names: &[&str]| names.iter().map(|name| name.to_string()).collect::<Vec<_>>();
        assert!(has_unique_headers(&headers(&["a", "b"])));
        assert!(!has_unique_headers(&headers(&["a", "A"])));
        assert!(!has_unique_headers(&headers(&["a", " "])));
        assert!(!has_unique_headers(&[]));
    }

    #[test]
    fn unique_headers_always_pass_the_table_check() {
        let texts = ["Sales", "sales", " ", "A", "A", "A.1"].map(str::to_owned);
        let headers = unique_headers(texts);
        assert_eq!(headers, vec!["Sales", "sales.1", "Column3", "A", "A.1", "A.1.1"]);
        assert!(has_unique_headers(&headers));
    }

    #[test]
    fn builds_worksheet_with_data() {
        let builder = StyledSheetBuilder::new("Report", vec!["#".to_owned(), "Name".to_owned()])
            .banner("Title", Format::new().set_bold(), 30.0)
            .widths(&[8.0, 20.0])
            .table(TableStyle::Medium2)
            .freeze_header();
        let rows = vec![
            vec![StyledCell::value(1.0), StyledCell::value("Cairo")],
            vec![StyledCell::value(2.0), StyledCell::link("https://example.com", "site")],
        ];
        assert!(builder.build(&rows).is_ok());
    }
}
