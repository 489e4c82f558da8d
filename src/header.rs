//! Header row discovery for loosely structured tracking exports.
//!
//! Exports from the tracking portal put a free-form banner above the data, mix
//! English and Arabic labels and do not keep a fixed column order. A
//! [`HeaderStrategy`] finds the row holding the column labels and binds the
//! labels it recognises to semantic [`Role`]s.
use crate::spreadsheet::CellValue;
use crate::spreadsheet::Sheet;
use serde::Deserialize;

/// Semantic meaning of a data column.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum Role {
    Start,
    End,
    Duration,
    Address,
    Coordinate,
}

impl Role {
    /// Binding order used when one label matches several roles.
    pub const ALL: [Role; 5] = [Role::Start, Role::End, Role::Duration, Role::Address, Role::Coordinate];
}

/// Role → 1-based column index; unresolved roles stay `None`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ColumnMap {
    columns: [Option<usize>; 5],
}

impl ColumnMap {
    pub fn get(&self, role: Role) -> Option<usize> {
        self.columns[role as usize]
    }

    pub fn bind(&mut self, role: Role, column: usize) {
        self.columns[role as usize] = Some(column);
    }

    pub fn is_bound(&self, role: Role) -> bool {
        self.get(role).is_some()
    }

    /// A map is usable once any of the time columns is known.
    pub fn has_time_columns(&self) -> bool {
        [Role::Start, Role::End, Role::Duration].iter().any(|role| self.is_bound(*role))
    }
}

/// Keywords recognising each role, matched as lower-case substrings.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct HeaderKeywords {
    pub start: Vec<String>,
    pub end: Vec<String>,
    pub duration: Vec<String>,
    pub address: Vec<String>,
    pub coordinate: Vec<String>,
}

impl Default for HeaderKeywords {
    fn default() -> Self {
        fn words(words: &[&str]) -> Vec<String> {
            words.iter().map(|word| word.to_string()).collect()
        }
        HeaderKeywords {
            start: words(&["start time", "بداية", "start", "وقت البدء"]),
            end: words(&["end time", "نهاية", "end", "وقت النهاية"]),
            duration: words(&["duration", "مدة", "stop duration"]),
            address: words(&["address", "موقع", "عنوان"]),
            coordinate: words(&["coordinate", "إحداثيات", "احداثيات"]),
        }
    }
}

impl HeaderKeywords {
    pub fn for_role(&self, role: Role) -> &[String] {
        match role {
            Role::Start => &self.start,
            Role::End => &self.end,
            Role::Duration => &self.duration,
            Role::Address => &self.address,
            Role::Coordinate => &self.coordinate,
        }
    }

    /// `text` must already be lower-case.
    pub fn matches(&self, role: Role, text: &str) -> bool {
        self.for_role(role).iter().any(|keyword| text.contains(&keyword.to_lowercase()))
    }
}

/// A header row (1-based) with the columns bound beneath it.
#[derive(Clone, Debug, PartialEq)]
pub struct LocatedHeader {
    pub row: usize,
    pub columns: ColumnMap,
}

/// Finds the header of a sheet; `None` means the sheet has no usable header.
pub trait HeaderStrategy {
    fn locate(&self, sheet: &Sheet) -> Option<LocatedHeader>;
}

/// Picks the first row mentioning a start label, or both an end and a duration label.
///
/// An end label on its own is not enough: exports reuse words like "end" in
/// banner text above the real header.
#[derive(Clone, Debug)]
pub struct KeywordHeaderLocator {
    keywords: HeaderKeywords,
    scan_rows: usize,
}

impl Default for KeywordHeaderLocator {
    fn default() -> Self {
        KeywordHeaderLocator::new(HeaderKeywords::default(), 20)
    }
}

impl KeywordHeaderLocator {
    pub fn new(keywords: HeaderKeywords, scan_rows: usize) -> KeywordHeaderLocator {
        KeywordHeaderLocator { keywords, scan_rows }
    }

    fn is_header_row(&self, cells: &[CellValue]) -> bool {
        let text = cells
            .iter()
            .filter(|cell| !cell.is_empty())
            .map(|cell| cell.to_string().to_lowercase())
            .collect::<Vec<_>>()
            .join(" ");
        self.keywords.matches(Role::Start, &text)
            || (self.keywords.matches(Role::End, &text) && self.keywords.matches(Role::Duration, &text))
    }

    /// Each cell binds to the first still-unbound role it matches, walking left to right.
    fn bind_columns(&self, cells: &[CellValue]) -> ColumnMap {
        let mut columns = ColumnMap::default();
        for (index, cell) in cells.iter().enumerate() {
            if cell.is_empty() {
                continue;
            }
            let label = cell.to_string().to_lowercase();
            let role = Role::ALL
                .into_iter()
                .find(|role| !columns.is_bound(*role) && self.keywords.matches(*role, &label));
            if let Some(role) = role {
                columns.bind(role, index + 1);
            }
        }
        columns
    }
}

impl HeaderStrategy for KeywordHeaderLocator {
    fn locate(&self, sheet: &Sheet) -> Option<LocatedHeader> {
        let last_row = self.scan_rows.min(sheet.row_count());
        let row = (1..=last_row).find(|row| self.is_header_row(sheet.row(*row)))?;
        let columns = self.bind_columns(sheet.row(row));
        columns.has_time_columns().then_some(LocatedHeader { row, columns })
    }
}
