//! Streaming XML access for the parts of an Office Open XML package.

use crate::error::XtractorError;
use quick_xml::escape::resolve_xml_entity;
use quick_xml::events::BytesRef;
use quick_xml::events::BytesStart;
use quick_xml::events::Event;
use quick_xml::name::QName;
use quick_xml::Reader;
use std::io::BufRead;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum XmlError {
    #[error("Unknown entity '&{0};'")]
    ParseEntityError(String),

    #[error("Attribute '{0}' has an unparsable value '{1}'")]
    ParseAttributeValueError(String, String),
}

pub(crate) struct XmlReader<R: BufRead> {
    reader: Reader<R>,
    buffer: Vec<u8>,
}

impl<R: BufRead> XmlReader<R> {
    pub(crate) fn new(source: R) -> XmlReader<R> {
        let mut reader = Reader::from_reader(source);
        let config = reader.config_mut();
        config.check_comments = false;
        config.check_end_names = false;
        config.expand_empty_elements = true;
        config.trim_text(false);
        XmlReader {
            reader,
            buffer: Vec::with_capacity(1024),
        }
    }

    /// Next event, or `None` once the document is exhausted.
    pub(crate) fn next(&'_ mut self) -> Result<Option<Event<'_>>, XtractorError> {
        self.buffer.clear();
        match self.reader.read_event_into(&mut self.buffer)? {
            Event::Eof => Ok(None),
            event => Ok(Some(event)),
        }
    }

    /// Collects the character data up to the closing `end` tag.
    /// Only text inside `<t>` runs counts when `in_text` starts false; phonetic runs are ignored.
    pub(crate) fn read_text(&mut self, end: QName, in_text: bool) -> Result<String, XtractorError> {
        let mut text = String::new();
        let mut is_text = in_text;
        let mut is_phonetic = false;
        crate::match_xml_events!(self => {
            Event::End(event) if event.name() == end => break,
            Event::Start(event) if event.name().as_ref() == b"rPh" => is_phonetic = true,
            Event::End(event) if event.name().as_ref() == b"rPh" => is_phonetic = false,
            Event::Start(event) if !is_phonetic && event.name().as_ref() == b"t" => is_text = true,
            Event::End(event) if event.name().as_ref() == b"t" => is_text = in_text,
            Event::Text(event) if is_text => text.push_str(&event.xml_content()?),
            Event::CData(event) if is_text => text.push_str(&event.xml_content()?),
            Event::GeneralRef(event) if is_text => push_reference(&mut text, &event)?,
        });
        Ok(text)
    }
}

/// Attribute lookups on start tags.
pub(crate) trait XmlNodeHelper {
    /// Unescaped value of the attribute whose local name is `name`.
    fn attribute(&self, name: &str) -> Result<Option<String>, XtractorError>;

    fn parse_attribute<T: std::str::FromStr>(&self, name: &str) -> Result<Option<T>, XtractorError> {
        match self.attribute(name)? {
            Some(value) => value
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| XmlError::ParseAttributeValueError(name.to_owned(), value).into()),
            None => Ok(None),
        }
    }
}

impl XmlNodeHelper for BytesStart<'_> {
    fn attribute(&self, name: &str) -> Result<Option<String>, XtractorError> {
        for attribute in self.attributes() {
            let attribute = attribute?;
            if attribute.key.local_name().as_ref() == name.as_bytes() {
                return Ok(Some(attribute.unescape_value()?.into_owned()));
            }
        }
        Ok(None)
    }
}

/// Appends the expansion of an entity or character reference.
pub(crate) fn push_reference(text: &mut String, reference: &BytesRef) -> Result<(), XtractorError> {
    let raw = reference.xml_content()?;
    if let Some(number) = raw.strip_prefix('#') {
        let code = match number.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16)?,
            None => number.parse::<u32>()?,
        };
        if let Some(character) = char::from_u32(code) {
            text.push(character);
        }
    } else if let Some(entity) = resolve_xml_entity(&raw) {
        text.push_str(entity);
    } else {
        Err(XmlError::ParseEntityError(raw.to_string()))?;
    }
    Ok(())
}

#[macro_export]
macro_rules! match_xml_events {
    ($reader:expr => { $($arms:tt)* }) => {
        while let Some(event) = $reader.next()? {
            match event {
                $($arms)*
                _ => (),
            }
        }
    };
}
