use thiserror::Error;

/// Main error type for the extraction and distribution engine.
/// Aggregates domain failures together with errors from dependencies and internal readers.
#[derive(Error, Debug)]
pub enum XtractorError {
    /// The input could not be read as any supported tabular format.
    #[error("Unable to read '{file}' as a spreadsheet: {message}")]
    FormatError { file: String, message: String },

    /// The input was readable but does not have the expected shape.
    #[error("{0}")]
    SchemaError(String),

    /// A call produced nothing to write.
    #[error("{0}")]
    EmptyResultError(String),

    #[error("{0}")]
    WithContextError(String),

    // Standard library errors
    #[error("{0}")]
    IoError(#[from] std::io::Error),

    #[error("{0}")]
    ParseIntError(#[from] std::num::ParseIntError),

    // Third-party library errors
    #[error("{0}")]
    ZipError(#[from] zip::result::ZipError),

    #[error("{0}")]
    XmlError(#[from] quick_xml::Error),

    #[error("{0}")]
    XmlEncodingError(#[from] quick_xml::encoding::EncodingError),

    #[error("{0}")]
    XmlAttributeError(#[from] quick_xml::events::attributes::AttrError),

    #[error("{0}")]
    XlsxWriterError(#[from] rust_xlsxwriter::XlsxError),

    #[error("{0}")]
    ConfigError(#[from] toml::de::Error),

    // Helper module errors
    #[error("{0}")]
    CfbHelperError(#[from] crate::helpers::cfb::CfbError),

    #[error("{0}")]
    XmlHelperError(#[from] crate::helpers::xml::XmlError),

    #[error("{0}")]
    Biff8HelperError(#[from] crate::helpers::biff8::Biff8Error),

    // Spreadsheet module errors
    #[error("{0}")]
    SpreadsheetError(#[from] crate::spreadsheet::SpreadsheetError),

    #[error("{0}")]
    XlsError(#[from] crate::spreadsheet::xls::XlsError),
}

impl XtractorError {
    pub(crate) fn format(file: impl Into<String>, message: impl ToString) -> Self {
        XtractorError::FormatError {
            file: file.into(),
            message: message.to_string(),
        }
    }
}

pub(crate) trait ResultOptionChain {
    fn ok_none_else<F>(self, f: F) -> Self
    where
        F: FnOnce() -> Self;
}

impl<T, E> ResultOptionChain for Result<Option<T>, E> {
    fn ok_none_else<F>(self, f: F) -> Self
    where
        F: FnOnce() -> Self,
    {
        match self {
            Ok(None) => f(),
            _ => self,
        }
    }
}

pub(crate) trait ResultMessage {
    fn with_prefix(self, message: &str) -> Self;
}

impl<T> ResultMessage for Result<T, XtractorError> {
    fn with_prefix(self, message: &str) -> Self {
        self.map_err(|e| XtractorError::WithContextError(format!("{}: {}", message, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_none_else_falls_through_only_on_none() {
        let first: Result<Option<u8>, XtractorError> = Ok(None);
        assert_eq!(first.ok_none_else(|| Ok(Some(2))).ok().flatten(), Some(2));

        let second: Result<Option<u8>, XtractorError> = Ok(Some(1));
        assert_eq!(second.ok_none_else(|| Ok(Some(2))).ok().flatten(), Some(1));
    }

    #[test]
    fn with_prefix_wraps_message() {
        let result: Result<(), XtractorError> = Err(XtractorError::SchemaError("too few columns".to_owned()));
        let error = result.with_prefix("visits.xlsx").unwrap_err();
        assert_eq!(error.to_string(), "visits.xlsx: too few columns");
    }
}
