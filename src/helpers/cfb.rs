//! OLE Compound File Binary (CFB) container reader.
//! Legacy `.xls` workbooks store their BIFF8 record stream inside this container.

use crate::error::XtractorError;
use crate::helpers::bytes::index_at;
use crate::helpers::bytes::indexes;
use crate::helpers::bytes::u16_at;
use crate::helpers::bytes::u64_at;
use encoding_rs::UTF_16LE;
use std::collections::HashMap;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use thiserror::Error;

const SIGNATURE: u64 = 0xE11A_B1A1_E011_CFD0;
const HEADER_SIZE: usize = 512;
const MINI_SECTOR_SIZE: usize = 64;
const DIRECTORY_ENTRY_SIZE: usize = 128;
// Sector ids above this value are markers (free, end of chain, FAT, DIFAT)
const MAX_REGULAR_SECTOR: usize = 0xFFFF_FFFA;

/// Errors specific to Compound File Binary format parsing
#[derive(Error, Debug)]
pub enum CfbError {
    #[error("The file is corrupted or has an invalid CFB structure")]
    FileFormatError,

    #[error("Invalid OLE signature (not an office document?)")]
    OleSignatureError,

    #[error("Invalid sector size '2 ^ {1}' for major version '{0}'")]
    SectorSizeError(u16, u16),

    #[error("Sector chain starting at '{0}' is broken or cyclic")]
    SectorChainError(usize),

    #[error("Empty root directory")]
    RootDirectoryError,
}

/// In-memory view over a compound file: its streams are resolved by name on demand.
pub(crate) struct CompoundFile {
    entries: HashMap<String, Entry>,
    allocation_table: Vec<usize>,
    sectors: Sectors,
    mini_allocation_table: Vec<usize>,
    mini_sectors: Sectors,
    mini_stream_cutoff: usize,
}

impl CompoundFile {
    /// Reads the whole container into memory and resolves its directory.
    pub(crate) fn open<RS: Read + Seek>(reader: &mut RS) -> Result<CompoundFile, XtractorError> {
        let size = reader.seek(SeekFrom::End(0))? as usize;
        if size < HEADER_SIZE {
            Err(CfbError::FileFormatError)?;
        }
        reader.seek(SeekFrom::Start(0))?;
        let mut data = vec![0u8; HEADER_SIZE];
        reader.read_exact(&mut data)?;
        // Check the signature before pulling the rest of the file into memory
        let header = Header::parse(&data)?;
        reader.read_to_end(&mut data)?;

        let size = header.sector_size()?;
        let sectors = Sectors { data, size, origin: size };
        let allocation_table = load_allocation_table(&sectors, &header)?;

        let directory = read_chain(&allocation_table, &sectors, header.directory_start)?;
        let entries: HashMap<String, Entry> = directory
            .chunks_exact(DIRECTORY_ENTRY_SIZE)
            .filter_map(Entry::parse)
            .collect();
        let root = entries.get("Root Entry").ok_or(CfbError::RootDirectoryError)?;

        let mini_allocation_table = if header.mini_allocation_sector_count > 0 {
            let bytes = read_chain(&allocation_table, &sectors, header.mini_allocation_start)?;
            indexes(&bytes).collect()
        } else {
            Vec::new()
        };
        let mut mini_stream = read_chain(&allocation_table, &sectors, root.start)?;
        mini_stream.truncate(root.size);
        // Mini sectors are addressed from zero, the regular sectors skip the header
        let mini_sectors = Sectors::mini(mini_stream);

        Ok(CompoundFile {
            entries,
            allocation_table,
            sectors,
            mini_allocation_table,
            mini_sectors,
            mini_stream_cutoff: header.mini_stream_cutoff,
        })
    }

    /// Checks if a stream exists in the container
    pub(crate) fn contains(&self, name: &str) -> bool {
        self.entry(name).is_some()
    }

    /// Returns the bytes of a named stream, or `None` when it is absent.
    pub(crate) fn stream(&self, name: &str) -> Result<Option<Vec<u8>>, XtractorError> {
        let Some(entry) = self.entry(name) else {
            return Ok(None);
        };
        let mut bytes = if entry.size < self.mini_stream_cutoff {
            read_chain(&self.mini_allocation_table, &self.mini_sectors, entry.start)?
        } else {
            read_chain(&self.allocation_table, &self.sectors, entry.start)?
        };
        if bytes.len() < entry.size {
            Err(CfbError::SectorChainError(entry.start))?;
        }
        bytes.truncate(entry.size);
        Ok(Some(bytes))
    }

    fn entry(&self, name: &str) -> Option<&Entry> {
        self.entries.get(name).or_else(|| {
            self.entries
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, entry)| entry)
        })
    }
}

/// Builds the allocation table from the header DIFAT slots and any chained DIFAT sectors.
fn load_allocation_table(sectors: &Sectors, header: &Header) -> Result<Vec<usize>, XtractorError> {
    let mut table_sectors: Vec<usize> = indexes(&sectors.data[76..HEADER_SIZE]).collect();

    let mut next = header.difat_start;
    let mut visited = 0usize;
    while next <= MAX_REGULAR_SECTOR {
        visited += 1;
        if visited > sectors.count() {
            Err(CfbError::SectorChainError(header.difat_start))?;
        }
        let sector = sectors.get(next).ok_or(CfbError::SectorChainError(next))?;
        let mut entries: Vec<usize> = indexes(sector).collect();
        next = entries.pop().ok_or(CfbError::FileFormatError)?;
        table_sectors.extend(entries);
    }

    let mut table = Vec::new();
    for index in table_sectors.into_iter().filter(|index| *index <= MAX_REGULAR_SECTOR) {
        let sector = sectors.get(index).ok_or(CfbError::SectorChainError(index))?;
        table.extend(indexes(sector));
    }
    if table.is_empty() {
        Err(CfbError::FileFormatError)?;
    }
    Ok(table)
}

/// Concatenates the sectors of a chain, stopping at the first end marker.
fn read_chain(table: &[usize], sectors: &Sectors, start: usize) -> Result<Vec<u8>, XtractorError> {
    let mut content = Vec::new();
    let mut index = start;
    let mut steps = 0usize;
    while index <= MAX_REGULAR_SECTOR {
        steps += 1;
        if steps > table.len() {
            Err(CfbError::SectorChainError(start))?;
        }
        content.extend_from_slice(sectors.get(index).ok_or(CfbError::SectorChainError(start))?);
        index = *table.get(index).ok_or(CfbError::SectorChainError(start))?;
    }
    Ok(content)
}

struct Sectors {
    data: Vec<u8>,
    size: usize,
    // Regular sector 0 starts right after the header, mini sector 0 at offset 0
    origin: usize,
}

impl Sectors {
    fn mini(data: Vec<u8>) -> Sectors {
        Sectors { data, size: MINI_SECTOR_SIZE, origin: 0 }
    }

    fn count(&self) -> usize {
        self.data.len() / self.size
    }

    fn get(&self, index: usize) -> Option<&[u8]> {
        let lower = self.origin + index.checked_mul(self.size)?;
        if lower >= self.data.len() {
            return None;
        }
        let upper = self.data.len().min(lower + self.size);
        Some(&self.data[lower..upper])
    }
}

struct Header {
    major_version: u16,
    sector_shift: u16,
    directory_start: usize,
    mini_stream_cutoff: usize,
    mini_allocation_start: usize,
    mini_allocation_sector_count: usize,
    difat_start: usize,
}

impl Header {
    fn parse(data: &[u8]) -> Result<Header, XtractorError> {
        if u64_at(data, 0) != Some(SIGNATURE) {
            Err(CfbError::OleSignatureError)?;
        }
        let field = |offset: usize| index_at(data, offset).ok_or(CfbError::FileFormatError);
        Ok(Header {
            major_version: u16_at(data, 26).ok_or(CfbError::FileFormatError)?,
            sector_shift: u16_at(data, 30).ok_or(CfbError::FileFormatError)?,
            directory_start: field(48)?,
            mini_stream_cutoff: field(56)?,
            mini_allocation_start: field(60)?,
            mini_allocation_sector_count: field(64)?,
            difat_start: field(68)?,
        })
    }

    fn sector_size(&self) -> Result<usize, XtractorError> {
        match (self.major_version, self.sector_shift) {
            (3, 9) => Ok(512),
            // Version 4 pads the header out to a full 4096-byte sector
            (4, 12) => Ok(4096),
            (version, shift) => Err(CfbError::SectorSizeError(version, shift))?,
        }
    }
}

struct Entry {
    start: usize,
    size: usize,
}

impl Entry {
    /// Parses one 128-byte directory slot; unused slots yield `None`.
    fn parse(bytes: &[u8]) -> Option<(String, Entry)> {
        let object_type = *bytes.get(66)?;
        if object_type == 0 {
            return None;
        }
        let name_size = (u16_at(bytes, 64)? as usize).min(64);
        let (name, _, _) = UTF_16LE.decode(&bytes[..name_size]);
        let name = name.split('\0').next().unwrap_or_default().to_owned();
        let start = index_at(bytes, 116)?;
        // Version 3 files only define the low 32 bits of the size
        let size = index_at(bytes, 120)?;
        Some((name, Entry { start, size }))
    }
}
