use crate::error::ResultOptionChain;
use crate::error::XtractorError;
use crate::helpers::biff8::Biff8Reader;
use crate::helpers::cfb::CompoundFile;
use crate::match_biff8_record;
use crate::spreadsheet::cell::CellValue;
use crate::spreadsheet::cell::DateSystem;
use crate::spreadsheet::cell::NumberKind;
use crate::spreadsheet::excel::NumberFormats;
use crate::spreadsheet::sheet::Sheet;
use crate::spreadsheet::sheet::SheetBuilder;
use crate::spreadsheet::source_name;
use crate::spreadsheet::Spreadsheet;
use crate::spreadsheet::SpreadsheetError;
use either::Either;
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

// BIFF8 record types
const FORMULA: u16 = 6;
const EOF: u16 = 10;
const DATE1904: u16 = 34;
const FILE_PASS: u16 = 47;
const CODE_PAGE: u16 = 66;
const BOUND_SHEET8: u16 = 133;
const MUL_RK: u16 = 189;
const XF: u16 = 224;
const SST: u16 = 252;
const LABEL_SST: u16 = 253;
const NUMBER: u16 = 515;
const LABEL: u16 = 516;
const BOOL_ERR: u16 = 517;
const STRING: u16 = 519;
const ARRAY: u16 = 545;
const TABLE: u16 = 566;
const RK: u16 = 638;
const SHARED_FORMULA: u16 = 1212;
const FORMAT: u16 = 1054;
const BOF: u16 = 2057;

#[derive(Error, Debug)]
pub enum XlsError {
    #[error("Unknown code page '{0}'")]
    CodePageError(u16),

    #[error("Invalid formula result '{0:#018x}'")]
    FormulaValueError(u64),

    #[error("Worksheet '{0}' points outside the workbook stream")]
    SheetOffsetError(String),
}

/// A legacy Excel 97-2003 workbook.
pub(crate) struct XlsSpreadsheet {
    name: String,
    reader: Biff8Reader,
    shared_strings: Vec<String>,
    number_formats: NumberFormats,
    /// (sheet name, BOF offset) for worksheets only
    sheets: Vec<(String, usize)>,
}

/// A decoded cell: either final, or a number still needing its style's format.
type CellRecord = Either<CellValue, (usize, f64)>;

impl XlsSpreadsheet {
    /// Opens the container and reads the workbook globals up to their EOF record.
    pub(crate) fn open(path: &Path) -> Result<XlsSpreadsheet, XtractorError> {
        let name = source_name(path);
        let mut file = BufReader::new(File::open(path)?);
        let container = CompoundFile::open(&mut file)?;
        let mut reader = container.stream("Workbook")
            .ok_none_else(|| container.stream("Book"))?
            .map(Biff8Reader::new)
            .ok_or_else(|| SpreadsheetError::EmptySpreadsheet(name.clone()))?;

        let mut system = DateSystem::Excel1900;
        let mut shared_strings = Vec::new();
        let mut custom_formats: HashMap<u16, NumberKind> = HashMap::new();
        let mut format_ids: Vec<u16> = Vec::new();
        let mut sheets: Vec<(String, usize)> = Vec::new();
        match_biff8_record!(reader => {
            EOF => break,
            FILE_PASS => Err(SpreadsheetError::PasswordProtected(name.clone()))?,
            DATE1904 if reader.read_u16()? == 1 => system = DateSystem::Excel1904,
            CODE_PAGE => {
                let code_page = reader.read_u16()?;
                let encoding = codepage::to_encoding(code_page).ok_or(XlsError::CodePageError(code_page))?;
                reader.set_code_page(encoding);
            }
            FORMAT => {
                let id = reader.read_u16()?;
                let code = reader.read_string()?;
                custom_formats.insert(id, NumberKind::from_format_code(&code));
            }
            XF => {
                reader.skip(2)?;
                format_ids.push(reader.read_u16()?);
            }
            SST => shared_strings = load_shared_strings(&mut reader)?,
            BOUND_SHEET8 => {
                let offset = reader.read_u32()? as usize;
                let _visibility = reader.read_u8()?;
                let sheet_type = reader.read_u8()?;
                let sheet_name = reader.read_short_string()?;
                // Charts, macro sheets and VB modules carry no cell grid
                if sheet_type == 0 {
                    sheets.push((sheet_name, offset));
                }
            }
        });
        if sheets.is_empty() {
            Err(SpreadsheetError::EmptySpreadsheet(name.clone()))?;
        }

        Ok(XlsSpreadsheet {
            name,
            reader,
            shared_strings,
            number_formats: NumberFormats::new(&format_ids, &custom_formats, system),
            sheets,
        })
    }

    fn read_sheet(&mut self, sheet_name: &str, offset: usize) -> Result<Sheet, XtractorError> {
        self.reader.seek(offset);
        if self.reader.next_record()? != Some(BOF) {
            Err(XlsError::SheetOffsetError(sheet_name.to_owned()))?;
        }
        let mut builder = SheetBuilder::new(sheet_name);
        while let Some(kind) = self.reader.next_record()? {
            match kind {
                BOF | EOF => break,
                MUL_RK => {
                    let row = self.reader.read_u16()? as usize;
                    let first_col = self.reader.read_u16()? as usize;
                    // Each entry is a 2-byte style and a 4-byte RK value, followed by the last column
                    let count = self.reader.record_len().saturating_sub(6) / 6;
                    for col in first_col..first_col + count {
                        let style = self.reader.read_u16()? as usize;
                        let number = self.reader.read_rk_number()?;
                        builder.push(row, col, self.number_formats.value(style, number));
                    }
                }
                BOOL_ERR | NUMBER | RK | LABEL_SST | LABEL | FORMULA => {
                    let row = self.reader.read_u16()? as usize;
                    let col = self.reader.read_u16()? as usize;
                    let record = match kind {
                        BOOL_ERR => read_bool_or_error_cell(&mut self.reader)?,
                        NUMBER => read_number_cell(&mut self.reader)?,
                        RK => read_rk_cell(&mut self.reader)?,
                        LABEL_SST => read_label_sst_cell(&mut self.reader, &self.shared_strings)?,
                        LABEL => read_label_cell(&mut self.reader)?,
                        _ => read_formula_cell(&mut self.reader)?,
                    };
                    let value = match record {
                        Either::Left(value) => value,
                        Either::Right((style, number)) => self.number_formats.value(style, number),
                    };
                    builder.push(row, col, value);
                }
                _ => (),
            }
        }
        Ok(builder.finish())
    }
}

impl Spreadsheet for XlsSpreadsheet {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn read_sheets(&mut self) -> Result<Vec<Sheet>, XtractorError> {
        let mut sheets = Vec::with_capacity(self.sheets.len());
        for (sheet_name, offset) in self.sheets.clone() {
            let sheet = self.read_sheet(&sheet_name, offset)?;
            debug!(source = %self.name, sheet = %sheet.name(), rows = sheet.row_count(), "Loaded worksheet");
            sheets.push(sheet);
        }
        Ok(sheets)
    }
}

/// Reads the shared string table; its strings may run across CONTINUE records.
fn load_shared_strings(reader: &mut Biff8Reader) -> Result<Vec<String>, XtractorError> {
    let _total = reader.read_u32()?;
    let count = reader.read_u32()? as usize;
    let mut shared_strings = Vec::with_capacity(count.min(1 << 16));
    for _ in 0..count {
        shared_strings.push(reader.read_rich_string()?);
    }
    Ok(shared_strings)
}

/// Booleans become text, error codes become blanks.
fn read_bool_or_error_cell(reader: &mut Biff8Reader) -> Result<CellRecord, XtractorError> {
    reader.skip(2)?;
    let value = reader.read_u8()?;
    let is_error = reader.read_u8()? != 0;
    Ok(Either::Left(if is_error {
        CellValue::Empty
    } else {
        CellValue::from_bool(value != 0)
    }))
}

fn read_number_cell(reader: &mut Biff8Reader) -> Result<CellRecord, XtractorError> {
    let style = reader.read_u16()? as usize;
    Ok(Either::Right((style, reader.read_f64()?)))
}

fn read_rk_cell(reader: &mut Biff8Reader) -> Result<CellRecord, XtractorError> {
    let style = reader.read_u16()? as usize;
    Ok(Either::Right((style, reader.read_rk_number()?)))
}

fn read_label_sst_cell(reader: &mut Biff8Reader, shared_strings: &[String]) -> Result<CellRecord, XtractorError> {
    reader.skip(2)?;
    let index = reader.read_u32()? as usize;
    Ok(Either::Left(
        shared_strings
            .get(index)
            .map(|text| CellValue::Text(text.clone()))
            .unwrap_or_default(),
    ))
}

fn read_label_cell(reader: &mut Biff8Reader) -> Result<CellRecord, XtractorError> {
    reader.skip(2)?;
    Ok(Either::Left(CellValue::Text(reader.read_string()?)))
}

/// Reads the cached result of a formula. String results live in the following STRING record.
fn read_formula_cell(reader: &mut Biff8Reader) -> Result<CellRecord, XtractorError> {
    let style = reader.read_u16()? as usize;
    let result = reader.read_u64()?;
    if result & 0xFFFF_0000_0000_0000 != 0xFFFF_0000_0000_0000 {
        return Ok(Either::Right((style, f64::from_bits(result))));
    }
    match result & 0xFF {
        0 => {
            while let Some(kind) = reader.next_record()? {
                match kind {
                    STRING => return Ok(Either::Left(CellValue::Text(reader.read_string()?))),
                    SHARED_FORMULA | ARRAY | TABLE => continue,
                    _ => break,
                }
            }
            Err(XlsError::FormulaValueError(result))?
        }
        1 => Ok(Either::Left(CellValue::from_bool((result >> 16) & 0xFF != 0))),
        2 | 3 => Ok(Either::Left(CellValue::Empty)),
        _ => Err(XlsError::FormulaValueError(result))?,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(kind: u16, body: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&kind.to_le_bytes());
        bytes.extend_from_slice(&(body.len() as u16).to_le_bytes());
        bytes.extend_from_slice(body);
        bytes
    }

    fn formula_body(result: u64) -> Vec<u8> {
        let mut body = vec![0, 0, 0, 0, 0, 0];
        body.extend_from_slice(&result.to_le_bytes());
        body
    }

    fn read_formula(stream: Vec<u8>) -> Result<CellRecord, XtractorError> {
        let mut reader = Biff8Reader::new(stream);
        reader.next_record()?;
        reader.skip(4)?;
        read_formula_cell(&mut reader)
    }

    #[test]
    fn formula_numeric_result() {
        let stream = record(FORMULA, &formula_body(2.5f64.to_bits()));
        assert!(matches!(read_formula(stream).unwrap(), Either::Right((0, value)) if value == 2.5));
    }

    #[test]
    fn formula_string_result_follows_in_string_record() {
        let mut stream = record(FORMULA, &formula_body(0xFFFF_0000_0000_0000));
        stream.extend(record(SHARED_FORMULA, &[0; 4]));
        stream.extend(record(STRING, &[3, 0, 0, b'A', b'B', b'C']));
        assert!(matches!(read_formula(stream).unwrap(), Either::Left(CellValue::Text(text)) if text == "ABC"));
    }

    #[test]
    fn formula_boolean_and_error_results() {
        let stream = record(FORMULA, &formula_body(0xFFFF_0000_0001_0001));
        assert!(matches!(read_formula(stream).unwrap(), Either::Left(CellValue::Text(text)) if text == "true"));
        let stream = record(FORMULA, &formula_body(0xFFFF_0000_0007_0002));
        assert!(matches!(read_formula(stream).unwrap(), Either::Left(CellValue::Empty)));
    }

    #[test]
    fn label_sst_out_of_range_is_blank() {
        let mut reader = Biff8Reader::new(record(LABEL_SST, &[0, 0, 0, 0, 0, 0, 9, 0, 0, 0]));
        reader.next_record().unwrap();
        reader.skip(4).unwrap();
        let strings = vec!["only".to_owned()];
        assert!(matches!(read_label_sst_cell(&mut reader, &strings).unwrap(), Either::Left(CellValue::Empty)));
    }
}
