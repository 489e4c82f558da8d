//! Record reader for the BIFF8 stream of Excel 97-2003 workbooks.
//! A logical record is its own body plus any CONTINUE records that follow it,
//! exposed to callers as one contiguous cursor.

use crate::error::XtractorError;
use crate::helpers::bytes::u16_at;
use encoding_rs::Encoding;
use encoding_rs::UTF_16BE;
use encoding_rs::UTF_16LE;
use std::ops::Range;
use thiserror::Error;

const CONTINUE: u16 = 60;

/// Errors specific to BIFF8 record parsing
#[derive(Error, Debug)]
pub enum Biff8Error {
    #[error("Fewer than {0} bytes remaining in record")]
    NoEnoughDataError(usize),

    #[error("Truncated record header at offset {0}")]
    RecordHeaderError(usize),
}

pub(crate) struct Biff8Reader {
    /// Code page declared by the workbook, used for compressed 8-bit strings
    code_page: Option<&'static Encoding>,
    buffer: Vec<u8>,
    /// Offset of the next record header
    pointer: usize,
    /// Body ranges of the current record and its continuations
    chunks: Vec<Range<usize>>,
    chunk: usize,
    position: usize,
}

impl Biff8Reader {
    pub(crate) fn new(buffer: Vec<u8>) -> Biff8Reader {
        Biff8Reader {
            code_page: None,
            buffer,
            pointer: 0,
            chunks: Vec::new(),
            chunk: 0,
            position: 0,
        }
    }

    /// Records the workbook code page. UTF-16 code pages leave compressed strings as Latin-1.
    pub(crate) fn set_code_page(&mut self, encoding: &'static Encoding) {
        self.code_page = if encoding == UTF_16LE || encoding == UTF_16BE {
            None
        } else {
            Some(encoding)
        };
    }

    /// Advances to the next record and returns its type, or `None` at the end of the stream.
    pub(crate) fn next_record(&mut self) -> Result<Option<u16>, XtractorError> {
        let Some(kind) = u16_at(&self.buffer, self.pointer) else {
            return Ok(None);
        };
        let body = self.record_body(self.pointer)?;
        self.chunks.clear();
        self.chunk = 0;
        self.position = body.start;
        self.pointer = body.end;
        self.chunks.push(body);
        while u16_at(&self.buffer, self.pointer) == Some(CONTINUE) {
            let body = self.record_body(self.pointer)?;
            self.pointer = body.end;
            self.chunks.push(body);
        }
        Ok(Some(kind))
    }

    fn record_body(&self, header: usize) -> Result<Range<usize>, XtractorError> {
        let size = u16_at(&self.buffer, header + 2).ok_or(Biff8Error::RecordHeaderError(header))? as usize;
        let start = header + 4;
        Ok(start..self.buffer.len().min(start + size))
    }

    /// Moves the stream to an absolute offset, typically a worksheet BOF.
    pub(crate) fn seek(&mut self, pointer: usize) {
        self.pointer = pointer;
        self.chunks.clear();
    }

    /// Total body length of the current record, continuations included.
    pub(crate) fn record_len(&self) -> usize {
        self.chunks.iter().map(|range| range.len()).sum()
    }

    /// Returns up to `length` bytes, stepping into the next continuation when the current one is exhausted.
    fn take(&mut self, length: usize) -> &[u8] {
        while let Some(range) = self.chunks.get(self.chunk).cloned() {
            if self.position < range.end {
                let start = self.position;
                self.position = range.end.min(start + length);
                return &self.buffer[start..self.position];
            }
            if !self.advance_chunk() {
                break;
            }
        }
        &[]
    }

    /// Returns up to `length` bytes without leaving the current continuation.
    fn take_in_chunk(&mut self, length: usize) -> &[u8] {
        match self.chunks.get(self.chunk).cloned() {
            Some(range) if self.position < range.end => {
                let start = self.position;
                self.position = range.end.min(start + length);
                &self.buffer[start..self.position]
            }
            _ => &[],
        }
    }

    fn advance_chunk(&mut self) -> bool {
        self.chunk += 1;
        match self.chunks.get(self.chunk) {
            Some(range) => {
                self.position = range.start;
                true
            }
            None => false,
        }
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], XtractorError> {
        let mut output = [0u8; N];
        let mut filled = 0;
        while filled < N {
            let part = self.take(N - filled);
            if part.is_empty() {
                Err(Biff8Error::NoEnoughDataError(N))?;
            }
            let size = part.len();
            output[filled..filled + size].copy_from_slice(part);
            filled += size;
        }
        Ok(output)
    }

    pub(crate) fn skip(&mut self, length: usize) -> Result<(), XtractorError> {
        let mut remaining = length;
        while remaining > 0 {
            let size = self.take(remaining).len();
            if size == 0 {
                Err(Biff8Error::NoEnoughDataError(length))?;
            }
            remaining -= size;
        }
        Ok(())
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8, XtractorError> {
        self.read_array::<1>().map(|bytes| bytes[0])
    }

    pub(crate) fn read_u16(&mut self) -> Result<u16, XtractorError> {
        self.read_array().map(u16::from_le_bytes)
    }

    pub(crate) fn read_u32(&mut self) -> Result<u32, XtractorError> {
        self.read_array().map(u32::from_le_bytes)
    }

    pub(crate) fn read_u64(&mut self) -> Result<u64, XtractorError> {
        self.read_array().map(u64::from_le_bytes)
    }

    pub(crate) fn read_f64(&mut self) -> Result<f64, XtractorError> {
        self.read_array().map(f64::from_le_bytes)
    }

    /// Reads an RK value: a 30-bit integer or the high bits of an IEEE double, optionally divided by 100.
    pub(crate) fn read_rk_number(&mut self) -> Result<f64, XtractorError> {
        Ok(decode_rk(self.read_u32()?))
    }

    /// ShortXLUnicodeString: 8-bit character count.
    pub(crate) fn read_short_string(&mut self) -> Result<String, XtractorError> {
        let count = self.read_u8()? as usize;
        self.read_characters(count, false)
    }

    /// XLUnicodeString: 16-bit character count.
    pub(crate) fn read_string(&mut self) -> Result<String, XtractorError> {
        let count = self.read_u16()? as usize;
        self.read_characters(count, false)
    }

    /// XLUnicodeRichExtendedString as stored in the shared string table.
    pub(crate) fn read_rich_string(&mut self) -> Result<String, XtractorError> {
        let count = self.read_u16()? as usize;
        self.read_characters(count, true)
    }

    /// Reads `count` characters that may be split across continuations.
    /// Every continuation restarts with its own option byte choosing 8-bit or 16-bit storage.
    fn read_characters(&mut self, count: usize, is_extended: bool) -> Result<String, XtractorError> {
        let flags = self.read_u8()?;
        let mut is_high_byte = flags & 0x01 != 0;
        let runs = if is_extended && flags & 0x08 != 0 {
            self.read_u16()? as usize
        } else {
            0
        };
        let phonetic_size = if is_extended && flags & 0x04 != 0 {
            self.read_u32()? as usize
        } else {
            0
        };

        let code_page = self.code_page;
        let mut text = String::with_capacity(count);
        let mut remaining = count;
        while remaining > 0 {
            let wanted = if is_high_byte { remaining * 2 } else { remaining };
            let bytes = self.take_in_chunk(wanted);
            if is_high_byte {
                let (decoded, _) = UTF_16LE.decode_without_bom_handling(bytes);
                text.push_str(&decoded);
                remaining -= bytes.len() / 2;
            } else {
                decode_compressed(bytes, code_page, &mut text);
                remaining -= bytes.len();
            }
            if remaining > 0 {
                if !self.advance_chunk() {
                    Err(Biff8Error::NoEnoughDataError(remaining))?;
                }
                is_high_byte = self.read_u8()? & 0x01 != 0;
            }
        }

        // Formatting runs and phonetic data trail the characters
        self.skip(runs * 4 + phonetic_size)?;
        Ok(text)
    }
}

fn decode_compressed(bytes: &[u8], code_page: Option<&'static Encoding>, text: &mut String) {
    match code_page {
        Some(encoding) => {
            let (decoded, _) = encoding.decode_without_bom_handling(bytes);
            text.push_str(&decoded);
        }
        None => text.extend(bytes.iter().map(|byte| *byte as char)),
    }
}

pub(crate) fn decode_rk(value: u32) -> f64 {
    let is_percentage = value & 0x01 != 0;
    let is_integer = value & 0x02 != 0;
    let number = if is_integer {
        ((value as i32) >> 2) as f64
    } else {
        f64::from_bits(((value & 0xFFFF_FFFC) as u64) << 32)
    };
    if is_percentage {
        number / 100.0
    } else {
        number
    }
}

#[macro_export]
macro_rules! match_biff8_record {
    ($reader:expr => { $($arms:tt)* }) => {
        while let Some(kind) = $reader.next_record()? {
            match kind {
                $($arms)*
                _ => (),
            }
        }
    };
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

    #[test]
    fn rk_numbers() {
        // Integer 5
        assert_eq!(decode_rk((5 << 2) | 0x02), 5.0);
        // Integer 1234 divided by 100
        assert_eq!(decode_rk((1234 << 2) | 0x03), 12.34);
        // Double 1.0: high 32 bits are 0x3FF00000
        assert_eq!(decode_rk(0x3FF0_0000), 1.0);
        // Negative integer
        assert_eq!(decode_rk(((-7i32 << 2) as u32) | 0x02), -7.0);
    }

    #[test]
    fn continuation_joins_record_body() {
        let mut stream = record(516, &[1, 0, 2]);
        stream.extend(record(CONTINUE, &[0, 3, 0, 0, 0]));
        stream.extend(record(10, &[]));
        let mut reader = Biff8Reader::new(stream);

        assert_eq!(reader.next_record().unwrap(), Some(516));
        assert_eq!(reader.record_len(), 8);
        assert_eq!(reader.read_u16().unwrap(), 1);
        // This value straddles the record and its continuation
        assert_eq!(reader.read_u16().unwrap(), 2);
        assert_eq!(reader.read_u32().unwrap(), 3);
        assert_eq!(reader.next_record().unwrap(), Some(10));
        assert_eq!(reader.next_record().unwrap(), None);
    }

    #[test]
    fn string_switches_width_across_continuation() {
        // 5 characters: "ab" compressed, then "cde" as UTF-16 after a new option byte
        let mut stream = record(252, &[5, 0, 0, b'a', b'b']);
        stream.extend(record(CONTINUE, &[1, b'c', 0, b'd', 0, b'e', 0]));
        let mut reader = Biff8Reader::new(stream);
        reader.next_record().unwrap();
        assert_eq!(reader.read_rich_string().unwrap(), "abcde");
    }

    #[test]
    fn rich_string_skips_runs_after_characters() {
        // One formatting run (4 bytes) follows the characters
        let body = [2, 0, 0x08, 1, 0, b'h', b'i', 0, 0, 1, 0, 3, 0];
        let mut stream = record(252, &body);
        stream.extend(record(252, &[1, 0, 0, b'z']));
        let mut reader = Biff8Reader::new(stream);
        reader.next_record().unwrap();
        assert_eq!(reader.read_rich_string().unwrap(), "hi");
        assert_eq!(reader.read_u16().unwrap(), 3);
    }

    #[test]
    fn compressed_strings_follow_code_page() {
        let mut reader = Biff8Reader::new(record(516, &[1, 0, 0, 0xC7]));
        reader.set_code_page(encoding_rs::WINDOWS_1256);
        reader.next_record().unwrap();
        assert_eq!(reader.read_string().unwrap(), "ا");
    }

    #[test]
    fn short_read_is_an_error() {
        let mut reader = Biff8Reader::new(record(516, &[1]));
        reader.next_record().unwrap();
        assert!(reader.read_u16().is_err());
    }
}
