//! Part lookup inside Office Open XML packages.

use crate::error::XtractorError;
use crate::helpers::xml::XmlReader;
use std::io::BufReader;
use std::io::Read;
use std::io::Seek;
use zip::read::ZipFile;
use zip::result::ZipError;
use zip::ZipArchive;

pub(crate) trait ZipHelper<RS: Read + Seek> {
    /// Opens a part by name, ignoring case and accepting backslash separators.
    fn part(&'_ mut self, name: &str) -> Result<Option<ZipFile<'_, RS>>, XtractorError>;

    /// Opens a part as a streaming XML document.
    fn xml_part(&'_ mut self, name: &str) -> Result<Option<XmlReader<BufReader<ZipFile<'_, RS>>>>, XtractorError> {
        Ok(self.part(name)?.map(|file| XmlReader::new(BufReader::new(file))))
    }
}

impl<RS: Read + Seek> ZipHelper<RS> for ZipArchive<RS> {
    fn part(&'_ mut self, name: &str) -> Result<Option<ZipFile<'_, RS>>, XtractorError> {
        let wanted = name.trim_start_matches('/').replace('\\', "/");
        let Some(path) = self
            .file_names()
            .find(|candidate| candidate.replace('\\', "/").eq_ignore_ascii_case(&wanted))
            .map(str::to_owned)
        else {
            return Ok(None);
        };
        match self.by_name(&path) {
            Ok(file) => Ok(Some(file)),
            Err(ZipError::FileNotFound) => Ok(None),
            Err(error) => Err(error)?,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::io::Write;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    #[test]
    fn part_lookup_ignores_case() {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        writer.start_file("xl/Workbook.xml", SimpleFileOptions::default()).unwrap();
        writer.write_all(b"<workbook/>").unwrap();
        let mut archive = ZipArchive::new(writer.finish().unwrap()).unwrap();

        let mut content = String::new();
        archive.part("/XL/workbook.xml").unwrap().unwrap().read_to_string(&mut content).unwrap();
        assert_eq!(content, "<workbook/>");
        assert!(archive.part("xl/styles.xml").unwrap().is_none());
    }
}
