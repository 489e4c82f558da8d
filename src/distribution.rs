//! Redistribution of a visits workbook into one workbook per supervisor and per
//! representative.
//!
//! The first three columns of the visits sheet are read positionally as
//! supervisor, representative and line, whatever their header says. Every
//! produced workbook holds a totals sheet and one sheet per line.
use crate::config::DistributionConfig;
use crate::config::EngineConfig;
use crate::error::ResultMessage;
use crate::error::XtractorError;
use crate::normalizer::FormatNormalizer;
use crate::spreadsheet::source_name;
use crate::spreadsheet::CellValue;
use crate::spreadsheet::Workbook;
use crate::styled::unique_headers;
use crate::styled::unique_sheet_name;
use crate::styled::StyledCell;
use crate::styled::StyledSheetBuilder;
use crate::styled::MAX_SHEET_NAME_CHARS;
use chrono::Local;
use rust_xlsxwriter::Color;
use rust_xlsxwriter::Format;
use rust_xlsxwriter::FormatAlign;
use rust_xlsxwriter::TableStyle;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt::Display;
use std::path::Path;
use std::path::PathBuf;
use tracing::error;
use tracing::info;

const MAX_FILE_STEM_CHARS: usize = 200;

/// One produced workbook.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct GroupSummary {
    pub name: String,
    pub filename: String,
    pub lines_count: usize,
    pub records_count: usize,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct DistributionResult {
    pub supervisors: Vec<GroupSummary>,
    pub representatives: Vec<GroupSummary>,
    pub total_files: usize,
}

impl DistributionResult {
    /// Full paths of every produced workbook.
    pub fn paths(&self, output_dir: &Path) -> Vec<PathBuf> {
        self.supervisors
            .iter()
            .chain(&self.representatives)
            .map(|group| output_dir.join(&group.filename))
            .collect()
    }
}

impl Display for DistributionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Distributed into {} file(s): {} supervisor(s), {} representative(s)",
            self.total_files,
            self.supervisors.len(),
            self.representatives.len()
        )?;
        for (label, groups) in [("Supervisor", &self.supervisors), ("Representative", &self.representatives)] {
            for group in groups {
                writeln!(
                    f,
                    "  {label} {}: {} ({} line(s), {} record(s))",
                    group.name, group.filename, group.lines_count, group.records_count
                )?;
            }
        }
        Ok(())
    }
}

/// Pre-flight summary of a visits sheet.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct VisitsValidation {
    pub total_rows: usize,
    pub supervisors_count: usize,
    pub representatives_count: usize,
    pub lines_count: usize,
    pub columns: Vec<String>,
}

#[derive(Copy, Clone, Debug)]
enum GroupKind {
    Supervisor,
    Representative,
}

impl GroupKind {
    fn column(&self) -> usize {
        match self {
            GroupKind::Supervisor => 0,
            GroupKind::Representative => 1,
        }
    }

    fn file_prefix(&self) -> &'static str {
        match self {
            GroupKind::Supervisor => "Supervisor",
            GroupKind::Representative => "Representative",
        }
    }
}

const LINE_COLUMN: usize = 2;

/// Header texts plus the rows that carry at least one of the three key columns.
#[derive(Debug)]
struct VisitsTable {
    headers: Vec<String>,
    rows: Vec<Vec<CellValue>>,
}

impl VisitsTable {
    fn from_workbook(workbook: &Workbook, sheet_name: &str) -> Result<VisitsTable, XtractorError> {
        let sheet = workbook.sheet(sheet_name).ok_or_else(|| {
            XtractorError::SchemaError(format!("Sheet '{sheet_name}' not found in '{}'", workbook.source))
        })?;
        if sheet.column_count() < 3 {
            Err(XtractorError::SchemaError(format!(
                "Sheet '{sheet_name}' must have at least 3 columns (supervisor, representative, line), found {}",
                sheet.column_count()
            )))?;
        }
        let headers = table_headers(sheet.row(1));
        let rows = sheet
            .rows()
            .skip(1)
            .filter(|row| !row[..3].iter().all(CellValue::is_empty))
            .map(|row| row.iter().map(CellValue::trimmed).collect())
            .collect();
        Ok(VisitsTable { headers, rows })
    }

    /// Group key of a cell: its display text, so a number `1` and the text `"1"` share a group.
    fn key(row: &[CellValue], column: usize) -> String {
        row.get(column).map(|cell| cell.to_string()).unwrap_or_default()
    }

    /// Distinct non-empty values of `column`, in first-seen order.
    fn distinct<'a>(rows: impl IntoIterator<Item = &'a Vec<CellValue>>, column: usize) -> Vec<String> {
        let mut seen = HashSet::new();
        rows.into_iter()
            .map(|row| VisitsTable::key(row, column))
            .filter(|key| !key.is_empty() && seen.insert(key.clone()))
            .collect()
    }
}

fn table_headers(cells: &[CellValue]) -> Vec<String> {
    unique_headers(cells.iter().map(CellValue::to_string))
}

/// Sheet names may not contain `/ \ : * ? [ ]`.
fn sheet_title(name: &str) -> String {
    name.chars()
        .take(MAX_SHEET_NAME_CHARS)
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' => '-',
            '[' => '(',
            ']' => ')',
            c => c,
        })
        .collect()
}

fn safe_file_stem(name: &str) -> String {
    name.chars()
        .map(|c| if matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|') { '-' } else { c })
        .take(MAX_FILE_STEM_CHARS)
        .collect()
}

pub struct DistributionEngine {
    config: DistributionConfig,
    normalizer: FormatNormalizer,
}

impl DistributionEngine {
    pub fn new(config: &EngineConfig) -> DistributionEngine {
        DistributionEngine {
            config: config.distribution.clone(),
            normalizer: FormatNormalizer::new(config.normalizer.clone()),
        }
    }

    /// Loads `path` and distributes `sheet_name` (or the configured default) into `output_dir`.
    pub fn distribute(&self, path: &Path, sheet_name: Option<&str>, output_dir: &Path) -> Result<DistributionResult, XtractorError> {
        let workbook = self.normalizer.load(path)?;
        self.distribute_workbook(&workbook, sheet_name.unwrap_or(&self.config.sheet_name), output_dir)
    }

    pub fn distribute_workbook(&self, workbook: &Workbook, sheet_name: &str, output_dir: &Path) -> Result<DistributionResult, XtractorError> {
        let table = VisitsTable::from_workbook(workbook, sheet_name)?;
        if table.rows.is_empty() {
            Err(XtractorError::EmptyResultError(format!("Sheet '{sheet_name}' has no visit rows")))?;
        }
        info!(
            file = %workbook.source,
            sheet = %sheet_name,
            rows = table.rows.len(),
            supervisor = %table.headers[0],
            representative = %table.headers[1],
            line = %table.headers[LINE_COLUMN],
            "Distributing visits"
        );
        std::fs::create_dir_all(output_dir)?;

        let created = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let mut filenames = HashSet::new();
        let mut result = DistributionResult {
            supervisors: self.distribute_groups(&table, GroupKind::Supervisor, &created, output_dir, &mut filenames),
            representatives: self.distribute_groups(&table, GroupKind::Representative, &created, output_dir, &mut filenames),
            total_files: 0,
        };
        result.total_files = result.supervisors.len() + result.representatives.len();
        info!(
            supervisors = result.supervisors.len(),
            representatives = result.representatives.len(),
            total = result.total_files,
            "Distribution complete"
        );
        Ok(result)
    }

    /// Writes one workbook per distinct key; a group that fails is logged and left out.
    fn distribute_groups(
        &self,
        table: &VisitsTable,
        kind: GroupKind,
        created: &str,
        output_dir: &Path,
        filenames: &mut HashSet<String>,
    ) -> Vec<GroupSummary> {
        let keys = VisitsTable::distinct(&table.rows, kind.column());
        let mut summaries = Vec::with_capacity(keys.len());
        for (index, key) in keys.iter().enumerate() {
            info!(group = kind.file_prefix(), name = %key, "Processing group {}/{}", index + 1, keys.len());
            let rows: Vec<&Vec<CellValue>> = table.rows.iter().filter(|row| VisitsTable::key(row, kind.column()) == *key).collect();
            if rows.is_empty() {
                continue;
            }
            let filename = unique_filename(kind.file_prefix(), key, filenames);
            match self.write_group(table, key, &rows, created, &output_dir.join(&filename)) {
                Ok(lines_count) => summaries.push(GroupSummary {
                    name: key.clone(),
                    filename,
                    lines_count,
                    records_count: rows.len(),
                }),
                Err(e) => error!(group = kind.file_prefix(), name = %key, "Failed to write group workbook: {}", e),
            }
        }
        summaries
    }

    /// Writes the totals sheet and one sheet per line; returns the number of line sheets written.
    fn write_group(&self, table: &VisitsTable, name: &str, rows: &[&Vec<CellValue>], created: &str, path: &Path) -> Result<usize, XtractorError> {
        let mut workbook = rust_xlsxwriter::Workbook::new();
        let mut taken = Vec::new();
        let totals_name = unique_sheet_name(&self.config.totals_sheet_name, &mut taken);
        workbook.push_worksheet(visits_sheet(&totals_name, name, &table.headers, rows, created)?);

        let lines = VisitsTable::distinct(rows.iter().copied(), LINE_COLUMN);
        let mut lines_written = 0;
        for line in &lines {
            let line_rows: Vec<&Vec<CellValue>> = rows.iter().copied().filter(|row| VisitsTable::key(row, LINE_COLUMN) == *line).collect();
            let sheet_name = unique_sheet_name(&sheet_title(line), &mut taken);
            match visits_sheet(&sheet_name, line, &table.headers, &line_rows, created) {
                Ok(worksheet) => {
                    workbook.push_worksheet(worksheet);
                    lines_written += 1;
                }
                Err(e) => error!(sheet = %sheet_name, "Failed to build line sheet: {}", e),
            }
        }
        workbook
            .save(path)
            .map_err(XtractorError::from)
            .with_prefix(&source_name(path))?;
        Ok(lines_written)
    }

    /// Summarizes a visits sheet without writing anything.
    pub fn validate(&self, path: &Path, sheet_name: Option<&str>) -> Result<VisitsValidation, XtractorError> {
        let workbook = self.normalizer.load(path)?;
        let table = VisitsTable::from_workbook(&workbook, sheet_name.unwrap_or(&self.config.sheet_name))?;
        let validation = VisitsValidation {
            total_rows: table.rows.len(),
            supervisors_count: VisitsTable::distinct(&table.rows, GroupKind::Supervisor.column()).len(),
            representatives_count: VisitsTable::distinct(&table.rows, GroupKind::Representative.column()).len(),
            lines_count: VisitsTable::distinct(&table.rows, LINE_COLUMN).len(),
            columns: table.headers,
        };
        if validation.supervisors_count == 0 {
            Err(XtractorError::SchemaError("No supervisors found in the first column".to_owned()))?;
        }
        if validation.representatives_count == 0 {
            Err(XtractorError::SchemaError("No representatives found in the second column".to_owned()))?;
        }
        Ok(validation)
    }
}

/// Appends `_2`, `_3`, … when two keys sanitize to the same file name.
fn unique_filename(prefix: &str, key: &str, taken: &mut HashSet<String>) -> String {
    let stem = format!("{prefix}_{}", safe_file_stem(key));
    let mut filename = format!("{stem}.xlsx");
    let mut counter = 1;
    while !taken.insert(filename.to_lowercase()) {
        counter += 1;
        filename = format!("{stem}_{counter}.xlsx");
    }
    filename
}

fn visits_sheet(
    sheet_name: &str,
    title: &str,
    headers: &[String],
    rows: &[&Vec<CellValue>],
    created: &str,
) -> Result<rust_xlsxwriter::Worksheet, XtractorError> {
    let banner = |size: u8, fill: u32| {
        Format::new()
            .set_font_name("Arial")
            .set_font_size(size)
            .set_bold()
            .set_font_color(Color::White)
            .set_background_color(Color::RGB(fill))
            .set_align(FormatAlign::Center)
            .set_align(FormatAlign::VerticalCenter)
    };
    let cells: Vec<Vec<StyledCell>> = rows
        .iter()
        .map(|row| row.iter().cloned().map(StyledCell::value).collect())
        .collect();
    StyledSheetBuilder::new(sheet_name, headers.to_vec())
        .banner(format!("Visits & Sales - {title}"), banner(16, 0x1F4E78), 35.0)
        .banner(format!("Created: {created}"), banner(12, 0x4472C4), 30.0)
        .spacer(10.0)
        .header_format(Format::new().set_bold(), Some(25.0))
        .table(TableStyle::Medium2)
        .freeze_header()
        .build(&cells)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spreadsheet::Sheet;
    use tempfile::tempdir;

    fn visits(rows: &[&[&str]]) -> Workbook {
        let rows = rows
            .iter()
            .map(|row| row.iter().map(|text| if text.is_empty() { CellValue::Empty } else { CellValue::from(*text) }).collect())
            .collect();
        Workbook {
            source: "visits.xlsx".to_owned(),
            sheets: vec![Sheet::new("إجمالي", rows)],
        }
    }

    fn engine() -> DistributionEngine {
        DistributionEngine::new(&EngineConfig::default())
    }

    #[test]
    fn headers_are_named_and_deduplicated() {
        let cells = [" Supervisor ", "", "Line", "Line", "Line"].map(CellValue::from);
        assert_eq!(table_headers(&cells), vec!["Supervisor", "Column2", "Line", "Line.1", "Line.2"]);
    }

    #[test]
    fn suffixed_headers_never_collide() {
        let cells = ["A", "A", "A.1", "Sales", "sales"].map(CellValue::from);
        assert_eq!(table_headers(&cells), vec!["A", "A.1", "A.1.1", "Sales", "sales.1"]);
    }

    #[test]
    fn numbers_and_their_text_share_a_group() {
        let dir = tempdir().unwrap();
        let workbook = Workbook {
            source: "visits.xlsx".to_owned(),
            sheets: vec![Sheet::new("إجمالي", vec![
                vec![CellValue::from("Supervisor"), CellValue::from("Rep"), CellValue::from("Line")],
                vec![CellValue::Number(1.0), CellValue::from("R1"), CellValue::Number(7.0)],
                vec![CellValue::from("1"), CellValue::from("R1"), CellValue::from("7")],
            ])],
        };
        let result = engine().distribute_workbook(&workbook, "إجمالي", dir.path()).unwrap();
        assert_eq!(result.supervisors.len(), 1);
        assert_eq!(result.supervisors[0].name, "1");
        assert_eq!(result.supervisors[0].records_count, 2);
        assert_eq!(result.supervisors[0].lines_count, 1);
    }

    #[test]
    fn line_count_excludes_sheets_that_could_not_be_built() {
        let dir = tempdir().unwrap();
        let workbook = visits(&[
            &["Supervisor", "Rep", "Line"],
            &["S1", "R1", "Cardio"],
            &["S1", "R1", "'Quoted'"],
        ]);
        let result = engine().distribute_workbook(&workbook, "إجمالي", dir.path()).unwrap();
        assert_eq!(result.supervisors[0].records_count, 2);
        assert_eq!(result.supervisors[0].lines_count, 1);
        assert_eq!(result.representatives[0].lines_count, 1);
    }

    #[test]
    fn names_are_sanitized() {
        assert_eq!(sheet_title("North/South [A]: 1*2?"), "North-South (A)- 1-2-");
        assert_eq!(sheet_title(&"x".repeat(40)).chars().count(), 31);
        assert_eq!(safe_file_stem("a/b\\c:d*e?f\"g<h>i|j"), "a-b-c-d-e-f-g-h-i-j");

        let mut taken = HashSet::new();
        assert_eq!(unique_filename("Supervisor", "A/B", &mut taken), "Supervisor_A-B.xlsx");
        assert_eq!(unique_filename("Supervisor", "A:B", &mut taken), "Supervisor_A-B_2.xlsx");
    }

    #[test]
    fn groups_by_supervisor_and_representative() {
        let dir = tempdir().unwrap();
        let workbook = visits(&[
            &["Supervisor", "Rep", "Line", "Sales"],
            &["S1", "R1", "L1", "10"],
            &["S1", "R2", "L1", "20"],
            &["", "", "", "orphan"],
            &["S2", "R3", "L2", "30"],
        ]);
        let result = engine().distribute_workbook(&workbook, "إجمالي", dir.path()).unwrap();

        assert_eq!(result.supervisors, vec![
            GroupSummary {
                name: "S1".to_owned(),
                filename: "Supervisor_S1.xlsx".to_owned(),
                lines_count: 1,
                records_count: 2,
            },
            GroupSummary {
                name: "S2".to_owned(),
                filename: "Supervisor_S2.xlsx".to_owned(),
                lines_count: 1,
                records_count: 1,
            },
        ]);
        assert_eq!(result.representatives.len(), 3);
        assert_eq!(result.total_files, 5);
        for path in result.paths(dir.path()) {
            assert!(path.is_file(), "{}", path.display());
        }
        assert!(result.to_string().starts_with("Distributed into 5 file(s)"));
    }

    #[test]
    fn narrow_table_is_a_schema_error() {
        let dir = tempdir().unwrap();
        let workbook = visits(&[&["Supervisor", "Rep"], &["S1", "R1"]]);
        let result = engine().distribute_workbook(&workbook, "إجمالي", dir.path());
        assert!(matches!(result, Err(XtractorError::SchemaError(_))));
    }

    #[test]
    fn missing_sheet_is_a_schema_error() {
        let dir = tempdir().unwrap();
        let workbook = visits(&[&["Supervisor", "Rep", "Line"], &["S1", "R1", "L1"]]);
        let result = engine().distribute_workbook(&workbook, "Visits", dir.path());
        assert!(matches!(result, Err(XtractorError::SchemaError(message)) if message.contains("Visits")));
    }

    #[test]
    fn header_only_table_is_empty() {
        let dir = tempdir().unwrap();
        let workbook = visits(&[&["Supervisor", "Rep", "Line"], &["", "", ""]]);
        let result = engine().distribute_workbook(&workbook, "إجمالي", dir.path());
        assert!(matches!(result, Err(XtractorError::EmptyResultError(_))));
    }

    #[test]
    fn rows_without_supervisor_still_reach_their_representative() {
        let dir = tempdir().unwrap();
        let workbook = visits(&[
            &["Supervisor", "Rep", "Line"],
            &["", "R1", "L1"],
            &["S1", "R1", ""],
        ]);
        let result = engine().distribute_workbook(&workbook, "إجمالي", dir.path()).unwrap();
        assert_eq!(result.supervisors.len(), 1);
        assert_eq!(result.supervisors[0].records_count, 1);
        assert_eq!(result.supervisors[0].lines_count, 0);
        assert_eq!(result.representatives[0].records_count, 2);
        assert_eq!(result.representatives[0].lines_count, 1);
    }
}
