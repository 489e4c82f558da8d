//! The unified stops report written after an extraction batch.
use crate::error::XtractorError;
use crate::extraction::Mode;
use crate::extraction::Record;
use crate::fields::extract_coordinates;
use crate::geofence::Zone;
use crate::spreadsheet::CellValue;
use crate::styled::StyledCell;
use crate::styled::StyledSheetBuilder;
use chrono::Local;
use rust_xlsxwriter::Color;
use rust_xlsxwriter::Format;
use rust_xlsxwriter::FormatAlign;
use rust_xlsxwriter::FormatBorder;
use rust_xlsxwriter::FormatUnderline;
use std::path::Path;
use tracing::info;

pub const REPORT_SHEET_NAME: &str = "Unified Report";

pub const MISSING_ADDRESS: &str = "Not available";

const COLUMN_WIDTHS: [f64; 9] = [8.0, 18.0, 22.0, 22.0, 18.0, 25.0, 18.0, 50.0, 30.0];

/// Renders records as one styled sheet with zone colors and map links.
pub struct ReportAssembler {
    mode: Mode,
}

impl ReportAssembler {
    pub fn new(mode: Mode) -> ReportAssembler {
        ReportAssembler { mode }
    }

    pub fn headers(&self) -> Vec<String> {
        ["#", self.mode.car_header(), "Stop Start", "Stop End", "Stop Duration", "Coordinates", "Zone", "Location", "Source"]
            .iter()
            .map(|header| header.to_string())
            .collect()
    }

    /// Writes the report to `path`. Nothing is created when `records` is empty.
    pub fn write(&self, records: &[Record], path: &Path) -> Result<(), XtractorError> {
        if records.is_empty() {
            Err(XtractorError::EmptyResultError("No records to write into the report".to_owned()))?;
        }
        let formats = ReportFormats::new();
        let title = format!("{} - {}", self.mode.report_title(), Local::now().format("%Y-%m-%d %H:%M:%S"));
        let rows: Vec<Vec<StyledCell>> = records
            .iter()
            .enumerate()
            .map(|(index, record)| formats.row(index + 1, record))
            .collect();

        let worksheet = StyledSheetBuilder::new(REPORT_SHEET_NAME, self.headers())
            .banner(title, formats.title.clone(), 30.0)
            .header_format(formats.header.clone(), Some(25.0))
            .widths(&COLUMN_WIDTHS)
            .freeze_header()
            .build(&rows)?;
        let mut workbook = rust_xlsxwriter::Workbook::new();
        workbook.push_worksheet(worksheet);
        workbook.save(path)?;
        info!(path = %path.display(), records = records.len(), mode = %self.mode, "Report written");
        Ok(())
    }
}

struct ReportFormats {
    title: Format,
    header: Format,
    centered: Format,
    car_code: Format,
    duration: Format,
    link: Format,
    inside: Format,
    outside: Format,
    undefined: Format,
    address: Format,
    missing_address: Format,
    source: Format,
}

impl ReportFormats {
    fn new() -> ReportFormats {
        let centered = Format::new()
            .set_align(FormatAlign::Center)
            .set_align(FormatAlign::VerticalCenter)
            .set_border(FormatBorder::Thin)
            .set_border_color(Color::Black);
        let zone = |zone: Zone| {
            let (fill, font) = zone_palette(zone);
            centered
                .clone()
                .set_background_color(Color::RGB(fill))
                .set_font_name("Arial")
                .set_font_size(11)
                .set_font_color(Color::RGB(font))
                .set_bold()
        };
        let address = centered
            .clone()
            .set_align(FormatAlign::Right)
            .set_text_wrap()
            .set_font_name("Arial")
            .set_font_size(10);
        ReportFormats {
            title: Format::new()
                .set_font_name("Arial")
                .set_font_size(14)
                .set_bold()
                .set_font_color(Color::RGB(0x1F4E78))
                .set_background_color(Color::RGB(0xB4C7E7))
                .set_align(FormatAlign::Center)
                .set_align(FormatAlign::VerticalCenter),
            header: centered
                .clone()
                .set_font_name("Arial")
                .set_font_size(12)
                .set_bold()
                .set_font_color(Color::White)
                .set_background_color(Color::RGB(0x4472C4)),
            car_code: centered.clone().set_font_name("Arial").set_font_size(11).set_bold(),
            duration: centered
                .clone()
                .set_font_name("Arial")
                .set_font_size(11)
                .set_bold()
                .set_font_color(Color::RGB(0xC00000)),
            link: centered
                .clone()
                .set_font_name("Arial")
                .set_font_size(10)
                .set_bold()
                .set_font_color(Color::RGB(0x0563C1))
                .set_underline(FormatUnderline::Single),
            inside: zone(Zone::Inside),
            outside: zone(Zone::Outside),
            undefined: zone(Zone::Undefined),
            missing_address: address.clone().set_italic().set_font_color(Color::RGB(0x999999)),
            address: address.set_bold().set_font_color(Color::RGB(0x0066CC)),
            source: centered.clone().set_font_name("Arial").set_font_size(9).set_font_color(Color::RGB(0x666666)),
            centered,
        }
    }

    fn zone(&self, zone: Zone) -> &Format {
        match zone {
            Zone::Inside => &self.inside,
            Zone::Outside => &self.outside,
            Zone::Undefined => &self.undefined,
        }
    }

    fn row(&self, serial: usize, record: &Record) -> Vec<StyledCell> {
        let coordinates = match map_link(&record.coordinates) {
            Some(url) => StyledCell::link(url, record.coordinates.as_str()).with_format(&self.link),
            None if record.coordinates.trim().is_empty() => StyledCell::value(CellValue::Empty).with_format(&self.centered),
            None => StyledCell::value(record.coordinates.as_str()).with_format(&self.centered),
        };
        let address = if record.address.is_empty() {
            StyledCell::value(MISSING_ADDRESS).with_format(&self.missing_address)
        } else {
            StyledCell::value(record.address.as_str()).with_format(&self.address)
        };
        vec![
            StyledCell::value(serial as f64).with_format(&self.centered),
            StyledCell::value(record.car_code.as_str()).with_format(&self.car_code),
            StyledCell::value(record.start_time.clone()).with_format(&self.centered),
            StyledCell::value(record.end_time.clone()).with_format(&self.centered),
            StyledCell::value(record.duration.clone()).with_format(&self.duration),
            coordinates,
            StyledCell::value(record.zone.as_str()).with_format(self.zone(record.zone)),
            address,
            StyledCell::value(record.source_sheet.as_str()).with_format(&self.source),
        ]
    }
}

/// Fill and font colors of a zone cell.
pub(crate) fn zone_palette(zone: Zone) -> (u32, u32) {
    match zone {
        Zone::Inside => (0xC6EFCE, 0x006100),
        Zone::Outside => (0xFFC7CE, 0x9C0006),
        Zone::Undefined => (0xFFEB9C, 0x9C6500),
    }
}

/// Map URL for a `"lat,lon"` cell; `None` when the text holds no coordinate pair.
pub fn map_link(coordinates: &str) -> Option<String> {
    let pair = extract_coordinates(coordinates);
    (!pair.is_empty()).then(|| format!("https://www.google.com/maps?q={pair}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spreadsheet::open_xlsx;
    use std::fs::File;
    use std::io::Read;
    use tempfile::tempdir;
    use zip::ZipArchive;

    fn record(address: &str, coordinates: &str, zone: Zone) -> Record {
        Record {
            car_code: "123".to_owned(),
            start_time: CellValue::from("2024-01-01 08:00"),
            end_time: CellValue::Empty,
            duration: CellValue::from("00:10:00"),
            coordinates: coordinates.to_owned(),
            zone,
            address: address.to_owned(),
            source_sheet: "Truck".to_owned(),
        }
    }

    #[test]
    fn empty_report_is_refused_before_writing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("report.xlsx");
        let result = ReportAssembler::new(Mode::EngineIdle).write(&[], &path);
        assert!(matches!(result, Err(XtractorError::EmptyResultError(_))));
        assert!(!path.exists());
    }

    #[test]
    fn header_follows_mode() {
        assert_eq!(ReportAssembler::new(Mode::EngineIdle).headers()[1], "Car Number");
        assert_eq!(ReportAssembler::new(Mode::ParkingDetails).headers()[1], "Car Plate");
        assert_eq!(ReportAssembler::new(Mode::EngineIdle).headers().len(), COLUMN_WIDTHS.len());
    }

    #[test]
    fn map_links_need_a_coordinate_pair() {
        assert_eq!(map_link("30.1,31.2").as_deref(), Some("https://www.google.com/maps?q=30.1,31.2"));
        assert_eq!(map_link(""), None);
        assert_eq!(map_link("n/a"), None);
    }

    #[test]
    fn zones_have_fixed_colors() {
        assert_eq!(zone_palette(Zone::Inside), (0xC6EFCE, 0x006100));
        assert_eq!(zone_palette(Zone::Outside), (0xFFC7CE, 0x9C0006));
        assert_eq!(zone_palette(Zone::Undefined), (0xFFEB9C, 0x9C6500));

        let formats = ReportFormats::new();
        for zone in [Zone::Inside, Zone::Outside, Zone::Undefined] {
            let (fill, font) = zone_palette(zone);
            let expected = formats
                .centered
                .clone()
                .set_background_color(Color::RGB(fill))
                .set_font_name("Arial")
                .set_font_size(11)
                .set_font_color(Color::RGB(font))
                .set_bold();
            assert_eq!(formats.zone(zone), &expected, "{zone}");
        }
    }

    fn package_part(path: &Path, part: &str) -> String {
        let mut zip = ZipArchive::new(File::open(path).unwrap()).unwrap();
        let mut content = String::new();
        zip.by_name(part).unwrap().read_to_string(&mut content).unwrap();
        content
    }

    #[test]
    fn written_report_reads_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("report.xlsx");
        let records = vec![
            record("Port Road", "30.2290,31.7330", Zone::Inside),
            record("Cairo", "30.0444,31.2357", Zone::Outside),
            record("", "", Zone::Undefined),
        ];
        ReportAssembler::new(Mode::EngineIdle).write(&records, &path).unwrap();

        let workbook = open_xlsx(&path).unwrap();
        let sheet = workbook.sheet(REPORT_SHEET_NAME).unwrap();
        assert!(sheet.cell(1, 1).to_string().starts_with("Vehicle Stops Report - "));
        assert_eq!(sheet.cell(2, 2), &CellValue::from("Car Number"));
        assert_eq!(sheet.cell(3, 1), &CellValue::Number(1.0));
        assert_eq!(sheet.cell(3, 6), &CellValue::from("30.2290,31.7330"));
        assert_eq!(sheet.cell(5, 6), &CellValue::Empty);
        let zones: Vec<String> = (3..=5).map(|row| sheet.cell(row, 7).to_string()).collect();
        assert_eq!(zones, vec!["inside", "outside", "undefined"]);
        assert_eq!(sheet.cell(5, 8), &CellValue::from(MISSING_ADDRESS));

        let xml = package_part(&path, "xl/worksheets/sheet1.xml");
        assert!(xml.contains(r#"<mergeCell ref="A1:I1"/>"#), "{xml}");
        assert!(xml.contains(r#"ySplit="2""#), "{xml}");
        assert!(xml.contains(r#"<hyperlink ref="F3""#), "{xml}");
        assert!(xml.contains(r#"<hyperlink ref="F4""#), "{xml}");
        assert!(!xml.contains(r#"<hyperlink ref="F5""#), "{xml}");

        let styles = package_part(&path, "xl/styles.xml");
        for color in ["FFC6EFCE", "FF006100", "FFFFC7CE", "FF9C0006", "FFFFEB9C", "FF9C6500"] {
            assert!(styles.contains(color), "{color}");
        }
    }

    #[test]
    fn writes_report_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("report.xlsx");
        let records = vec![
            record("Port Road", "30.2290,31.7330", Zone::Inside),
            record("", "", Zone::Undefined),
        ];
        ReportAssembler::new(Mode::ParkingDetails).write(&records, &path).unwrap();
        assert!(path.is_file());
    }
}
