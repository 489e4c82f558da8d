//! Pieces shared by the Excel readers.
use crate::error::XtractorError;
use crate::helpers::cfb::CompoundFile;
use crate::helpers::xml::XmlNodeHelper;
use crate::helpers::zip::ZipHelper;
use crate::match_xml_events;
use crate::spreadsheet::cell::CellValue;
use crate::spreadsheet::cell::DateSystem;
use crate::spreadsheet::cell::NumberKind;
use quick_xml::events::Event;
use std::collections::HashMap;
use std::io::Read;
use std::io::Seek;
use zip::ZipArchive;

const TAG_RELATIONSHIP: &[u8] = b"Relationship";

/// Per-style interpretation of numeric cells.
/// Style index `n` maps to the number format of the n-th cell format record.
#[derive(Debug, Default)]
pub(crate) struct NumberFormats {
    kinds: Vec<NumberKind>,
    system: DateSystem,
}

impl NumberFormats {
    /// Resolves each style's format id against custom formats first, then built-in ids.
    pub(crate) fn new(format_ids: &[u16], custom_formats: &HashMap<u16, NumberKind>, system: DateSystem) -> NumberFormats {
        let kinds = format_ids
            .iter()
            .map(|id| {
                custom_formats
                    .get(id)
                    .copied()
                    .or_else(|| NumberKind::from_builtin_format(*id))
                    .unwrap_or_default()
            })
            .collect();
        NumberFormats { kinds, system }
    }

    /// Unknown style indexes fall back to plain numbers.
    pub(crate) fn value(&self, style: usize, number: f64) -> CellValue {
        let kind = self.kinds.get(style).copied().unwrap_or_default();
        CellValue::from_number(number, kind, self.system)
    }
}

/// Maps relationship ids to package paths for worksheet targets.
pub(crate) fn load_relationships<RS: Read + Seek>(zip: &mut ZipArchive<RS>, path: &str) -> Result<HashMap<String, String>, XtractorError> {
    let mut relationships = HashMap::new();
    let Some(mut reader) = zip.xml_part(path)? else {
        return Ok(relationships);
    };
    match_xml_events!(reader => {
        Event::Start(event) if event.local_name().as_ref() == TAG_RELATIONSHIP => {
            let is_worksheet = event.attribute("Type")?
                .map(|kind| kind.ends_with("/worksheet"))
                .unwrap_or(true);
            if let (true, Some(id), Some(target)) = (is_worksheet, event.attribute("Id")?, event.attribute("Target")?) {
                relationships.insert(id, to_zip_path(&target));
            }
        }
    });
    Ok(relationships)
}

/// Normalizes a relationship target to a path inside the package.
pub(crate) fn to_zip_path(target: &str) -> String {
    let target = target.replace('\\', "/");
    if let Some(absolute) = target.strip_prefix('/') {
        absolute.to_owned()
    } else if target.starts_with("xl/") {
        target
    } else {
        format!("xl/{}", target.trim_start_matches("./"))
    }
}

/// Encrypted workbooks are OLE containers holding an `EncryptedPackage` stream.
pub(crate) fn is_password_protected<RS: Read + Seek>(reader: &mut RS) -> bool {
    CompoundFile::open(reader)
        .map(|container| container.contains("EncryptedPackage"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zip_paths() {
        assert_eq!(to_zip_path("worksheets/sheet1.xml"), "xl/worksheets/sheet1.xml");
        assert_eq!(to_zip_path("/xl/worksheets/sheet2.xml"), "xl/worksheets/sheet2.xml");
        assert_eq!(to_zip_path("xl/worksheets/sheet3.xml"), "xl/worksheets/sheet3.xml");
    }

    #[test]
    fn number_formats_prefer_custom_definitions() {
        let mut custom = HashMap::new();
        custom.insert(164u16, NumberKind::DateTime);
        let formats = NumberFormats::new(&[0, 164, 14, 46], &custom, DateSystem::Excel1900);

        assert_eq!(formats.value(0, 2.0), CellValue::Number(2.0));
        assert!(matches!(formats.value(1, 45292.5), CellValue::Timestamp(_)));
        assert!(matches!(formats.value(2, 45292.0), CellValue::Timestamp(_)));
        assert_eq!(formats.value(3, 0.5), CellValue::from("12:00:00"));
        assert_eq!(formats.value(99, 7.0), CellValue::Number(7.0));
    }
}
