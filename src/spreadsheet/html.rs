use crate::error::XtractorError;
use crate::spreadsheet::cell::CellValue;
use crate::spreadsheet::sheet::Sheet;
use crate::spreadsheet::source_name;
use crate::spreadsheet::Spreadsheet;
use crate::spreadsheet::SpreadsheetError;
use encoding_rs::Encoding;
use encoding_rs::UTF_8;
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;
use tracing::debug;
use tracing::warn;

static META_CHARSET: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"(?i)<meta[^>]+charset\s*=\s*["']?([A-Za-z0-9_\-:]+)"#).unwrap());
static TABLE_START: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<table\b").unwrap());
static TABLE_END: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)</table\s*>").unwrap());
static ROW_START: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<tr\b").unwrap());
static CELL_START: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<t[dh]\b([^>]*)>").unwrap());
static CELL_END: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)</t[dh]\s*>").unwrap());
static COLSPAN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"(?i)colspan\s*=\s*["']?(\d+)"#).unwrap());
static LINE_BREAK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<br\s*/?>").unwrap());
static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());
static ENTITY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"&(#[xX][0-9A-Fa-f]+|#\d+|[A-Za-z]+);").unwrap());
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Upper bound on a single `colspan` so a malformed attribute cannot blow up a row.
const MAX_COLSPAN: usize = 1024;

/// An HTML document that some tracking portals export with an `.xls` extension.
/// The first `<table>` becomes a single sheet of text cells.
pub(crate) struct HtmlSpreadsheet {
    name: String,
    sheet_name: String,
    table: String,
}

impl HtmlSpreadsheet {
    pub(crate) fn open(path: &Path, sheet_name: &str) -> Result<HtmlSpreadsheet, XtractorError> {
        let name = source_name(path);
        let bytes = std::fs::read(path)?;
        let document = decode_document(&name, &bytes);
        let table = first_table(&document).ok_or_else(|| SpreadsheetError::NoTable(name.clone()))?;
        Ok(HtmlSpreadsheet {
            name,
            sheet_name: sheet_name.to_owned(),
            table: table.to_owned(),
        })
    }
}

impl Spreadsheet for HtmlSpreadsheet {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn read_sheets(&mut self) -> Result<Vec<Sheet>, XtractorError> {
        let rows = parse_rows(&self.table);
        debug!(source = %self.name, rows = rows.len(), "Parsed HTML table");
        Ok(vec![Sheet::new(self.sheet_name.clone(), rows)])
    }
}

/// Picks the document encoding: byte order mark, then strict UTF-8, then a declared
/// `<meta charset>`, and finally lossy UTF-8.
fn decode_document(name: &str, bytes: &[u8]) -> String {
    if let Some((encoding, bom_length)) = Encoding::for_bom(bytes) {
        let (text, _) = encoding.decode_without_bom_handling(&bytes[bom_length..]);
        return text.into_owned();
    }
    if let Ok(text) = std::str::from_utf8(bytes) {
        return text.to_owned();
    }
    let preview = String::from_utf8_lossy(&bytes[..bytes.len().min(4096)]);
    let declared = META_CHARSET
        .captures(&preview)
        .and_then(|captures| Encoding::for_label(captures[1].as_bytes()));
    match declared {
        Some(encoding) if encoding != UTF_8 => {
            let (text, _, _) = encoding.decode(bytes);
            text.into_owned()
        }
        _ => {
            warn!(source = %name, "Document is not valid UTF-8 and declares no usable charset, decoding lossily");
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

fn first_table(document: &str) -> Option<&str> {
    let start = TABLE_START.find(document)?.start();
    let end = TABLE_END
        .find_at(document, start)
        .map(|found| found.end())
        .unwrap_or(document.len());
    Some(&document[start..end])
}

/// Splits the table at every `<tr` so unclosed rows still terminate at the next one.
/// Cells are segmented the same way at every `<td`/`<th`.
fn parse_rows(table: &str) -> Vec<Vec<CellValue>> {
    segments(&ROW_START, table)
        .into_iter()
        .map(parse_cells)
        .filter(|row| !row.is_empty())
        .collect()
}

fn parse_cells(row_html: &str) -> Vec<CellValue> {
    let starts: Vec<_> = CELL_START.captures_iter(row_html).collect();
    let mut row = Vec::new();
    for (index, captures) in starts.iter().enumerate() {
        let Some(opening) = captures.get(0) else {
            continue;
        };
        let end = starts
            .get(index + 1)
            .and_then(|next| next.get(0))
            .map(|next| next.start())
            .unwrap_or(row_html.len());
        let mut content = &row_html[opening.end()..end];
        if let Some(closing) = CELL_END.find(content) {
            content = &content[..closing.start()];
        }
        let span = COLSPAN
            .captures(&captures[1])
            .and_then(|span| span[1].parse::<usize>().ok())
            .unwrap_or(1)
            .clamp(1, MAX_COLSPAN);
        let text = cell_text(content);
        for _ in 0..span {
            row.push(if text.is_empty() { CellValue::Empty } else { CellValue::Text(text.clone()) });
        }
    }
    row
}

fn segments<'a>(pattern: &Regex, html: &'a str) -> Vec<&'a str> {
    let starts: Vec<usize> = pattern.find_iter(html).map(|found| found.start()).collect();
    starts
        .iter()
        .enumerate()
        .map(|(index, start)| &html[*start..starts.get(index + 1).copied().unwrap_or(html.len())])
        .collect()
}

fn cell_text(html: &str) -> String {
    let text = LINE_BREAK.replace_all(html, " ");
    let text = TAG.replace_all(&text, "");
    let text = decode_entities(&text);
    WHITESPACE.replace_all(&text, " ").trim().to_owned()
}

fn decode_entities(text: &str) -> String {
    ENTITY
        .replace_all(text, |captures: &regex::Captures| {
            let entity = &captures[1];
            let decoded = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "nbsp" => Some(' '),
                _ => entity
                    .strip_prefix("#x")
                    .or_else(|| entity.strip_prefix("#X"))
                    .map(|hex| u32::from_str_radix(hex, 16))
                    .or_else(|| entity.strip_prefix('#').map(str::parse::<u32>))
                    .and_then(Result::ok)
                    .and_then(char::from_u32),
            };
            decoded.map(String::from).unwrap_or_else(|| captures[0].to_owned())
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = r#"<html><head><meta charset="utf-8"></head><body>
        <table border="1">
          <tr><th>Start Time</th><th>End Time</th><th colspan="2">Address</th></tr>
          <tr><td>2024-01-01 08:00</td><td> 2024-01-01&nbsp;08:30 </td><td>Main&amp;1st<br/>Cairo</td><td></td>
          <tr><td>&#1605;&#x648;&#1602;&#1593;</td></tr>
        </table></body></html>"#;

    #[test]
    fn parses_rows_with_colspan_and_entities() {
        let rows = parse_rows(first_table(REPORT).unwrap());
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], vec![
            CellValue::from("Start Time"),
            CellValue::from("End Time"),
            CellValue::from("Address"),
            CellValue::from("Address"),
        ]);
        assert_eq!(rows[1][1], CellValue::from("2024-01-01 08:30"));
        assert_eq!(rows[1][2], CellValue::from("Main&1st Cairo"));
        assert_eq!(rows[1][3], CellValue::Empty);
        assert_eq!(rows[2][0], CellValue::from("موقع"));
    }

    #[test]
    fn documents_without_table_are_rejected() {
        assert!(first_table("<html><body><p>nothing</p></body></html>").is_none());
    }

    #[test]
    fn declared_charset_is_honoured() {
        let mut bytes = br#"<meta http-equiv="Content-Type" content="text/html; charset=windows-1256"><table><tr><td>"#.to_vec();
        bytes.push(0xC7);
        bytes.extend_from_slice(b"</td></tr></table>");
        let document = decode_document("report.xls", &bytes);
        assert!(document.contains('ا'));
    }

    #[test]
    fn unknown_entities_are_kept() {
        assert_eq!(decode_entities("a &bogus; b &#65;"), "a &bogus; b A");
    }
}
