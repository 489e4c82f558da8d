//! Bundles produced workbooks into a single zip for download.
use crate::error::XtractorError;
use crate::spreadsheet::source_name;
use std::collections::HashSet;
use std::fs::File;
use std::io;
use std::path::Path;
use tracing::info;
use zip::write::SimpleFileOptions;
use zip::CompressionMethod;
use zip::ZipWriter;

/// Writes every file in `files` into `archive`, flat, under its own file name.
pub fn bundle<P: AsRef<Path>>(files: &[P], archive: &Path) -> Result<usize, XtractorError> {
    if let Some(parent) = archive.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut writer = ZipWriter::new(File::create(archive)?);
    let mut names = HashSet::new();
    for file in files {
        let file = file.as_ref();
        let name = source_name(file);
        if !names.insert(name.clone()) {
            Err(XtractorError::SchemaError(format!("'{name}' appears twice in the archive")))?;
        }
        writer.start_file(name, options)?;
        io::copy(&mut File::open(file)?, &mut writer)?;
    }
    writer.finish()?;
    info!(archive = %archive.display(), files = names.len(), "Archive written");
    Ok(names.len())
}
