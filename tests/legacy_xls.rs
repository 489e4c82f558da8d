use chrono::NaiveDate;
use chrono::NaiveDateTime;
use std::fs;
use std::path::Path;
use tempfile::tempdir;
use xtractor::CellValue;
use xtractor::EngineConfig;
use xtractor::ExtractionEngine;
use xtractor::FormatNormalizer;
use xtractor::Mode;
use xtractor::Sheet;
use xtractor::Zone;

const SECTOR: usize = 512;
const END_OF_CHAIN: u32 = 0xFFFF_FFFE;
const FREE_SECTOR: u32 = 0xFFFF_FFFF;
const FAT_SECTOR: u32 = 0xFFFF_FFFD;

fn record(kind: u16, body: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&kind.to_le_bytes());
    bytes.extend_from_slice(&(body.len() as u16).to_le_bytes());
    bytes.extend_from_slice(body);
    bytes
}

/// Row, column and style prefix shared by every cell record.
fn cell(row: u16, col: u16, style: u16) -> Vec<u8> {
    [row, col, style].iter().flat_map(|value| value.to_le_bytes()).collect()
}

/// 16-bit count, option byte, 8-bit characters.
fn unicode_string(text: &str) -> Vec<u8> {
    let mut bytes = (text.len() as u16).to_le_bytes().to_vec();
    bytes.push(0);
    bytes.extend_from_slice(text.as_bytes());
    bytes
}

fn bof(kind: u16) -> Vec<u8> {
    let mut body = vec![0u8; 16];
    body[..2].copy_from_slice(&0x0600u16.to_le_bytes());
    body[2..4].copy_from_slice(&kind.to_le_bytes());
    record(2057, &body)
}

fn style(format_id: u16) -> Vec<u8> {
    let mut body = vec![0u8; 20];
    body[2..4].copy_from_slice(&format_id.to_le_bytes());
    record(224, &body)
}

fn rk_integer(value: u32) -> u32 {
    (value << 2) | 0x02
}

/// Workbook globals followed by one worksheet. Style 1 is a built-in date,
/// style 2 a custom date-time format.
fn workbook_stream() -> Vec<u8> {
    let mut globals = bof(0x0005);
    globals.extend(record(66, &1252u16.to_le_bytes()));
    let mut format = 164u16.to_le_bytes().to_vec();
    format.extend(unicode_string("yyyy-mm-dd hh:mm"));
    globals.extend(record(1054, &format));
    globals.extend(style(0));
    globals.extend(style(14));
    globals.extend(style(164));

    // Shared strings; "Port Road" is split by a CONTINUE record that switches to UTF-16
    let mut strings = 7u32.to_le_bytes().to_vec();
    strings.extend(7u32.to_le_bytes());
    for text in ["Truck 17 / ABC", "Start Time", "End Time", "Duration", "Address"] {
        strings.extend(unicode_string(text));
    }
    strings.extend(9u16.to_le_bytes());
    strings.push(0);
    strings.extend(b"Port ");
    globals.extend(record(252, &strings));
    let mut continuation = vec![0x01];
    continuation.extend("Road".encode_utf16().flat_map(u16::to_le_bytes));
    continuation.extend(unicode_string("Coordinates"));
    globals.extend(record(60, &continuation));

    let sheet_offset_at = globals.len() + 4;
    let mut sheet_entry = vec![0u8; 6];
    sheet_entry.extend([5, 0]);
    sheet_entry.extend(b"Stops");
    globals.extend(record(133, &sheet_entry));
    let mut chart_entry = vec![0, 0, 0, 0, 0, 2, 6, 0];
    chart_entry.extend(b"Chart1");
    globals.extend(record(133, &chart_entry));
    globals.extend(record(10, &[]));
    let sheet_offset = globals.len() as u32;
    globals[sheet_offset_at..sheet_offset_at + 4].copy_from_slice(&sheet_offset.to_le_bytes());

    let mut sheet = bof(0x0010);
    let shared = |row: u16, col: u16, index: u32| {
        let mut body = cell(row, col, 0);
        body.extend(index.to_le_bytes());
        record(253, &body)
    };
    sheet.extend(shared(0, 0, 0));
    for (col, index) in [1u32, 2, 3, 4, 6].into_iter().enumerate() {
        sheet.extend(shared(1, col as u16, index));
    }
    for (col, serial) in [45292.5f64, 45292.75].into_iter().enumerate() {
        let mut body = cell(2, col as u16, 2);
        body.extend(serial.to_le_bytes());
        sheet.extend(record(515, &body));
    }
    let mut label = cell(2, 2, 0);
    label.extend(unicode_string("06:00:00"));
    sheet.extend(record(516, &label));
    sheet.extend(shared(2, 3, 5));
    let mut formula = cell(2, 4, 0);
    formula.extend(0xFFFF_0000_0000_0000u64.to_le_bytes());
    formula.extend([0u8; 8]);
    sheet.extend(record(6, &formula));
    sheet.extend(record(519, &unicode_string("30.22900,31.73300")));

    let mut multiple = 3u16.to_le_bytes().to_vec();
    multiple.extend(0u16.to_le_bytes());
    multiple.extend(1u16.to_le_bytes());
    multiple.extend(rk_integer(45293).to_le_bytes());
    multiple.extend(0u16.to_le_bytes());
    multiple.extend(rk_integer(1234).to_le_bytes());
    multiple.extend(1u16.to_le_bytes());
    sheet.extend(record(189, &multiple));
    let mut hundredths = cell(3, 2, 0);
    hundredths.extend((rk_integer(1250) | 0x01).to_le_bytes());
    sheet.extend(record(638, &hundredths));
    let mut boolean = cell(4, 0, 0);
    boolean.extend([1, 0]);
    sheet.extend(record(517, &boolean));
    sheet.extend(record(10, &[]));

    let mut stream = globals;
    stream.extend(sheet);
    stream
}

/// Wraps a stream named `Workbook` in a version 3 compound file: sector 0 holds
/// the allocation table, sector 1 the directory, the stream follows.
fn compound_file(mut stream: Vec<u8>) -> Vec<u8> {
    // Streams under the mini-stream cutoff would live in mini sectors
    let size = stream.len().max(4096).div_ceil(SECTOR) * SECTOR;
    stream.resize(size, 0);
    let stream_sectors = size / SECTOR;

    let mut header = vec![0u8; SECTOR];
    header[..8].copy_from_slice(&[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1]);
    header[24..26].copy_from_slice(&0x003Eu16.to_le_bytes());
    header[26..28].copy_from_slice(&3u16.to_le_bytes());
    header[28..30].copy_from_slice(&0xFFFEu16.to_le_bytes());
    header[30..32].copy_from_slice(&9u16.to_le_bytes());
    header[32..34].copy_from_slice(&6u16.to_le_bytes());
    header[44..48].copy_from_slice(&1u32.to_le_bytes());
    header[48..52].copy_from_slice(&1u32.to_le_bytes());
    header[56..60].copy_from_slice(&4096u32.to_le_bytes());
    header[60..64].copy_from_slice(&END_OF_CHAIN.to_le_bytes());
    header[68..72].copy_from_slice(&END_OF_CHAIN.to_le_bytes());
    for slot in header[76..].chunks_exact_mut(4) {
        slot.copy_from_slice(&FREE_SECTOR.to_le_bytes());
    }
    header[76..80].copy_from_slice(&0u32.to_le_bytes());

    let mut table = vec![FREE_SECTOR; SECTOR / 4];
    table[0] = FAT_SECTOR;
    table[1] = END_OF_CHAIN;
    for sector in 2..2 + stream_sectors {
        table[sector] = if sector == stream_sectors + 1 { END_OF_CHAIN } else { sector as u32 + 1 };
    }

    let entry = |name: &str, kind: u8, start: u32, size: u32| {
        let mut slot = vec![0u8; 128];
        let units: Vec<u16> = name.encode_utf16().chain(Some(0)).collect();
        for (index, unit) in units.iter().enumerate() {
            slot[index * 2..index * 2 + 2].copy_from_slice(&unit.to_le_bytes());
        }
        slot[64..66].copy_from_slice(&(units.len() as u16 * 2).to_le_bytes());
        slot[66] = kind;
        slot[116..120].copy_from_slice(&start.to_le_bytes());
        slot[120..124].copy_from_slice(&size.to_le_bytes());
        slot
    };
    let mut directory = entry("Root Entry", 5, END_OF_CHAIN, 0);
    directory.extend(entry("Workbook", 2, 2, size as u32));
    directory.resize(SECTOR, 0);

    let mut file = header;
    file.extend(table.iter().flat_map(|index| index.to_le_bytes()));
    file.extend(directory);
    file.extend(stream);
    file
}

fn at(day: u32, hour: u32, minute: u32) -> CellValue {
    let timestamp: NaiveDateTime = NaiveDate::from_ymd_opt(2024, 1, day).unwrap().and_hms_opt(hour, minute, 0).unwrap();
    CellValue::Timestamp(timestamp)
}

fn write_legacy(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("legacy.xls");
    fs::write(&path, compound_file(workbook_stream())).unwrap();
    path
}

fn assert_stops_sheet(sheet: &Sheet) {
    assert_eq!(sheet.name(), "Stops");
    assert_eq!(sheet.cell(1, 1), &CellValue::from("Truck 17 / ABC"));
    assert_eq!(sheet.cell(2, 5), &CellValue::from("Coordinates"));
    assert_eq!(sheet.cell(3, 1), &at(1, 12, 0));
    assert_eq!(sheet.cell(3, 2), &at(1, 18, 0));
    assert_eq!(sheet.cell(3, 3), &CellValue::from("06:00:00"));
    assert_eq!(sheet.cell(3, 4), &CellValue::from("Port Road"));
    assert_eq!(sheet.cell(3, 5), &CellValue::from("30.22900,31.73300"));
    assert_eq!(sheet.cell(4, 1), &at(2, 0, 0));
    assert_eq!(sheet.cell(4, 2), &CellValue::Number(1234.0));
    assert_eq!(sheet.cell(4, 3), &CellValue::Number(12.5));
    assert_eq!(sheet.cell(5, 1), &CellValue::from("true"));
}

#[test]
fn legacy_workbook_reads_every_cell_kind() {
    let dir = tempdir().unwrap();
    let path = write_legacy(dir.path());
    let workbook = FormatNormalizer::default().load(&path).unwrap();
    assert_eq!(workbook.source, "legacy.xls");
    assert_eq!(workbook.sheets.len(), 1);
    assert_stops_sheet(&workbook.sheets[0]);
}

#[test]
fn legacy_workbook_converts_without_losing_values() {
    let dir = tempdir().unwrap();
    let path = write_legacy(dir.path());
    let normalizer = FormatNormalizer::default();
    let converted = normalizer.normalize(&path, &dir.path().join("converted")).unwrap();
    assert_eq!(converted.file_name().unwrap(), "legacy.xlsx");
    assert!(path.is_file());

    let workbook = normalizer.load(&converted).unwrap();
    assert_eq!(workbook.sheets.len(), 1);
    assert_stops_sheet(&workbook.sheets[0]);

    let batch = ExtractionEngine::new(&EngineConfig::default()).extract(&[&converted], Mode::EngineIdle).unwrap();
    let first = &batch.records[0];
    assert_eq!(first.car_code, "17");
    assert_eq!(first.start_time, at(1, 12, 0));
    assert_eq!(first.address, "Port Road");
    assert_eq!(first.zone, Zone::Inside);
}
