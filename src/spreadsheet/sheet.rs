use crate::spreadsheet::cell::CellValue;

static EMPTY: CellValue = CellValue::Empty;

/// A named, rectangular grid of cells anchored at A1.
/// Rows and columns are addressed 1-based; reads outside the grid yield `Empty`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Sheet {
    name: String,
    rows: Vec<Vec<CellValue>>,
    width: usize,
}

impl Sheet {
    /// Builds a sheet from row vectors, padding short rows to the widest one.
    pub fn new(name: impl Into<String>, rows: Vec<Vec<CellValue>>) -> Sheet {
        let width = rows.iter().map(Vec::len).max().unwrap_or(0);
        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.resize(width, CellValue::Empty);
                row
            })
            .collect();
        Sheet { name: name.into(), rows, width }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.width
    }

    pub fn is_empty(&self) -> bool {
        self.rows.iter().all(|row| row.iter().all(CellValue::is_empty))
    }

    pub fn cell(&self, row: usize, col: usize) -> &CellValue {
        row.checked_sub(1)
            .zip(col.checked_sub(1))
            .and_then(|(row, col)| self.rows.get(row)?.get(col))
            .unwrap_or(&EMPTY)
    }

    pub fn row(&self, row: usize) -> &[CellValue] {
        row.checked_sub(1)
            .and_then(|row| self.rows.get(row))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn rows(&self) -> impl Iterator<Item = &[CellValue]> {
        self.rows.iter().map(Vec::as_slice)
    }
}

/// Accumulates sparse cells from a reader and lays them out as a dense grid.
pub(crate) struct SheetBuilder {
    name: String,
    cells: Vec<(usize, usize, CellValue)>,
    row_upper_bound: Option<usize>,
    col_upper_bound: Option<usize>,
}

impl SheetBuilder {
    pub(crate) fn new(name: &str) -> SheetBuilder {
        SheetBuilder {
            name: name.to_owned(),
            cells: Vec::new(),
            row_upper_bound: None,
            col_upper_bound: None,
        }
    }

    /// Adds a cell at 0-based (row, col); blank values are dropped.
    pub(crate) fn push(&mut self, row: usize, col: usize, value: CellValue) {
        if value.is_empty() {
            return;
        }
        self.update_bound(row, col);
        self.cells.push((row, col, value));
    }

    fn update_bound(&mut self, row: usize, col: usize) {
        self.row_upper_bound = Some(self.row_upper_bound.map_or(row, |bound| bound.max(row)));
        self.col_upper_bound = Some(self.col_upper_bound.map_or(col, |bound| bound.max(col)));
    }

    pub(crate) fn finish(self) -> Sheet {
        let (Some(rows), Some(cols)) = (self.row_upper_bound, self.col_upper_bound) else {
            return Sheet::new(self.name, Vec::new());
        };
        let mut grid = vec![vec![CellValue::Empty; cols + 1]; rows + 1];
        for (row, col, value) in self.cells {
            grid[row][col] = value;
        }
        Sheet::new(self.name, grid)
    }
}
