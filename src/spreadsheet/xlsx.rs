use crate::error::XtractorError;
use crate::helpers::xml::XmlNodeHelper;
use crate::helpers::zip::ZipHelper;
use crate::match_xml_events;
use crate::spreadsheet::cell::CellValue;
use crate::spreadsheet::cell::DateSystem;
use crate::spreadsheet::cell::NumberKind;
use crate::spreadsheet::excel::is_password_protected;
use crate::spreadsheet::excel::load_relationships;
use crate::spreadsheet::excel::NumberFormats;
use crate::spreadsheet::reference::reference_to_index;
use crate::spreadsheet::sheet::Sheet;
use crate::spreadsheet::sheet::SheetBuilder;
use crate::spreadsheet::source_name;
use crate::spreadsheet::Spreadsheet;
use crate::spreadsheet::SpreadsheetError;
use chrono::NaiveDate;
use chrono::NaiveDateTime;
use quick_xml::events::Event;
use quick_xml::name::QName;
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::io::Seek;
use std::io::SeekFrom;
use std::path::Path;
use tracing::debug;
use zip::ZipArchive;

const TAG_CUSTOM_FORMATS: QName = QName(b"numFmts");
const TAG_CUSTOM_FORMAT: QName = QName(b"numFmt");
const TAG_CELL_FORMATS: QName = QName(b"cellXfs");
const TAG_CELL_FORMAT: QName = QName(b"xf");
const TAG_SHARED_STRING_ITEM: QName = QName(b"si");
const TAG_WORKBOOK_PROPERTIES: QName = QName(b"workbookPr");
const TAG_SHEET: QName = QName(b"sheet");
const TAG_ROW: QName = QName(b"row");
const TAG_CELL: QName = QName(b"c");
const TAG_INLINE_STRING: QName = QName(b"is");
const TAG_VALUE: QName = QName(b"v");

/// An Office Open XML workbook (`.xlsx`, `.xlsm`).
pub(crate) struct XlsxSpreadsheet {
    name: String,
    zip: ZipArchive<BufReader<File>>,
    number_formats: NumberFormats,
    shared_strings: Vec<String>,
    /// (sheet name, package path) in workbook order
    sheets: Vec<(String, String)>,
}

impl XlsxSpreadsheet {
    pub(crate) fn open(path: &Path) -> Result<XlsxSpreadsheet, XtractorError> {
        let name = source_name(path);
        let mut file = File::open(path)?;
        if is_password_protected(&mut file) {
            Err(SpreadsheetError::PasswordProtected(name.clone()))?;
        }
        file.seek(SeekFrom::Start(0))?;

        let mut zip = ZipArchive::new(BufReader::new(file))?;
        let (sheets, system) = load_workbook(&mut zip)?;
        if sheets.is_empty() {
            Err(SpreadsheetError::EmptySpreadsheet(name.clone()))?;
        }
        let number_formats = load_number_formats(&mut zip, system)?;
        let shared_strings = load_shared_strings(&mut zip)?;

        Ok(XlsxSpreadsheet {
            name,
            zip,
            number_formats,
            shared_strings,
            sheets,
        })
    }
}

impl Spreadsheet for XlsxSpreadsheet {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn read_sheets(&mut self) -> Result<Vec<Sheet>, XtractorError> {
        let mut sheets = Vec::with_capacity(self.sheets.len());
        for (sheet_name, zip_path) in &self.sheets {
            let mut reader = self.zip.xml_part(zip_path)?
                .ok_or_else(|| SpreadsheetError::MissingPart(zip_path.clone()))?;
            let mut builder = SheetBuilder::new(sheet_name);
            let mut next_row = 0usize;
            let mut next_col = 0usize;
            let mut pending: Option<PendingCell> = None;
            match_xml_events!(reader => {
                Event::Start(event) if event.name() == TAG_ROW => {
                    if let Some(row) = event.parse_attribute::<usize>("r")? {
                        next_row = row.saturating_sub(1);
                    }
                    next_col = 0;
                }
                Event::End(event) if event.name() == TAG_ROW => next_row += 1,
                Event::Start(event) if event.name() == TAG_CELL => {
                    let (row, col) = event.attribute("r")?
                        .and_then(|reference| reference_to_index(&reference))
                        .unwrap_or((next_row, next_col));
                    next_col = col + 1;
                    pending = Some(PendingCell {
                        row,
                        col,
                        kind: event.attribute("t")?.unwrap_or_default(),
                        style: event.parse_attribute::<usize>("s")?.unwrap_or(0),
                        raw: None,
                    });
                }
                Event::Start(event) if pending.is_some() && event.name() == TAG_VALUE => {
                    let raw = reader.read_text(TAG_VALUE, true)?;
                    if let Some(cell) = pending.as_mut() {
                        cell.raw = Some(raw);
                    }
                }
                Event::Start(event) if pending.is_some() && event.name() == TAG_INLINE_STRING => {
                    let raw = reader.read_text(TAG_INLINE_STRING, false)?;
                    if let Some(cell) = pending.as_mut() {
                        cell.raw = Some(raw);
                    }
                }
                Event::End(event) if event.name() == TAG_CELL => {
                    if let Some(cell) = pending.take() {
                        let (row, col) = (cell.row, cell.col);
                        builder.push(row, col, cell.decode(&self.number_formats, &self.shared_strings));
                    }
                }
            });
            let sheet = builder.finish();
            debug!(source = %self.name, sheet = %sheet.name(), rows = sheet.row_count(), "Loaded worksheet");
            sheets.push(sheet);
        }
        Ok(sheets)
    }
}

/// A `<c>` element whose value has not been interpreted yet.
struct PendingCell {
    row: usize,
    col: usize,
    /// The `t` attribute; empty means numeric
    kind: String,
    style: usize,
    raw: Option<String>,
}

impl PendingCell {
    fn decode(self, number_formats: &NumberFormats, shared_strings: &[String]) -> CellValue {
        let Some(raw) = self.raw else {
            return CellValue::Empty;
        };
        match self.kind.as_str() {
            "s" => raw
                .trim()
                .parse::<usize>()
                .ok()
                .and_then(|index| shared_strings.get(index))
                .map(|text| CellValue::Text(text.clone()))
                .unwrap_or_default(),
            "inlineStr" | "str" => CellValue::Text(raw),
            "b" => CellValue::from_bool(raw.trim() == "1"),
            "e" => CellValue::Empty,
            "d" => parse_iso_datetime(&raw)
                .map(CellValue::Timestamp)
                .unwrap_or(CellValue::Text(raw)),
            _ => match raw.trim().parse::<f64>() {
                Ok(number) => number_formats.value(self.style, number),
                Err(_) => CellValue::Text(raw),
            },
        }
    }
}

fn parse_iso_datetime(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .or_else(|| NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?.and_hms_opt(0, 0, 0))
}

/// Reads the sheet list (resolved through workbook relationships) and the date system.
fn load_workbook(zip: &mut ZipArchive<BufReader<File>>) -> Result<(Vec<(String, String)>, DateSystem), XtractorError> {
    let relationships = load_relationships(zip, "xl/_rels/workbook.xml.rels")?;
    let mut reader = zip.xml_part("xl/workbook.xml")?
        .ok_or_else(|| SpreadsheetError::MissingPart("xl/workbook.xml".to_owned()))?;
    let mut sheets = Vec::new();
    let mut system = DateSystem::Excel1900;
    match_xml_events!(reader => {
        Event::Start(event) if event.local_name().as_ref() == TAG_SHEET.as_ref() => {
            if let (Some(name), Some(id)) = (event.attribute("name")?, event.attribute("id")?) {
                if let Some(path) = relationships.get(&id) {
                    sheets.push((name, path.clone()));
                }
            }
        }
        Event::Start(event) if event.local_name().as_ref() == TAG_WORKBOOK_PROPERTIES.as_ref() => {
            let is_1904 = event.attribute("date1904")?
                .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
                .unwrap_or(false);
            if is_1904 {
                system = DateSystem::Excel1904;
            }
        }
    });
    Ok((sheets, system))
}

/// Reads custom number formats and the format id of every cell style.
fn load_number_formats(zip: &mut ZipArchive<BufReader<File>>, system: DateSystem) -> Result<NumberFormats, XtractorError> {
    let Some(mut reader) = zip.xml_part("xl/styles.xml")? else {
        return Ok(NumberFormats::new(&[], &HashMap::new(), system));
    };
    let mut custom_formats = HashMap::new();
    let mut format_ids = Vec::new();
    let mut in_custom_formats = false;
    let mut in_cell_formats = false;
    match_xml_events!(reader => {
        Event::Start(event) if event.name() == TAG_CUSTOM_FORMATS => in_custom_formats = true,
        Event::End(event) if event.name() == TAG_CUSTOM_FORMATS => in_custom_formats = false,
        Event::Start(event) if in_custom_formats && event.name() == TAG_CUSTOM_FORMAT => {
            let id = event.parse_attribute::<u16>("numFmtId")?;
            let code = event.attribute("formatCode")?;
            if let (Some(id), Some(code)) = (id, code) {
                custom_formats.insert(id, NumberKind::from_format_code(&code));
            }
        }
        Event::Start(event) if event.name() == TAG_CELL_FORMATS => in_cell_formats = true,
        Event::End(event) if event.name() == TAG_CELL_FORMATS => in_cell_formats = false,
        Event::Start(event) if in_cell_formats && event.name() == TAG_CELL_FORMAT => {
            format_ids.push(event.parse_attribute::<u16>("numFmtId")?.unwrap_or(0));
        }
    });
    Ok(NumberFormats::new(&format_ids, &custom_formats, system))
}

fn load_shared_strings(zip: &mut ZipArchive<BufReader<File>>) -> Result<Vec<String>, XtractorError> {
    let mut shared_strings = Vec::new();
    let Some(mut reader) = zip.xml_part("xl/sharedStrings.xml")? else {
        return Ok(shared_strings);
    };
    match_xml_events!(reader => {
        Event::Start(event) if event.name() == TAG_SHARED_STRING_ITEM => {
            shared_strings.push(reader.read_text(TAG_SHARED_STRING_ITEM, false)?);
        }
    });
    Ok(shared_strings)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(kind: &str, style: usize, raw: &str) -> PendingCell {
        PendingCell {
            row: 0,
            col: 0,
            kind: kind.to_owned(),
            style,
            raw: Some(raw.to_owned()),
        }
    }

    #[test]
    fn decode_cell_types() {
        let formats = NumberFormats::new(&[0, 22], &HashMap::new(), DateSystem::Excel1900);
        let strings = vec!["Start Time".to_owned()];

        assert_eq!(pending("s", 0, "0").decode(&formats, &strings), CellValue::from("Start Time"));
        assert_eq!(pending("s", 0, "4").decode(&formats, &strings), CellValue::Empty);
        assert_eq!(pending("", 0, "12.5").decode(&formats, &strings), CellValue::Number(12.5));
        assert!(matches!(pending("", 1, "45292.5").decode(&formats, &strings), CellValue::Timestamp(_)));
        assert_eq!(pending("b", 0, "1").decode(&formats, &strings), CellValue::from("true"));
        assert_eq!(pending("e", 0, "#N/A").decode(&formats, &strings), CellValue::Empty);
        assert_eq!(pending("str", 0, "30.1,31.2").decode(&formats, &strings), CellValue::from("30.1,31.2"));
        assert_eq!(
            pending("d", 0, "2024-01-01T06:30:00").decode(&formats, &strings),
            CellValue::Timestamp(parse_iso_datetime("2024-01-01T06:30:00").unwrap())
        );
    }
}
