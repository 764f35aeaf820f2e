//! Grid cell identifiers and index errors.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Maximum number of rows or columns a grid may have.
///
/// Cell ids render row and column as three zero-padded decimal digits,
/// and that textual width is a compatibility boundary of the on-disk key
/// format: a wider grid would change the byte-lexicographic ordering of
/// keys. Configurations exceeding this cap are rejected at construction.
pub const MAX_GRID_DIM: u32 = 1000;

/// Identifier of one grid cell, as a (row, column) pair.
///
/// Cells are addressed row-major from the south-west corner of the
/// configured bounds. The textual form is `G_RRR_CCC` with both fields
/// zero-padded to exactly three digits, e.g. `G_090_040`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellId {
    /// Row index (south to north), in `[0, rows)`.
    pub row: u32,
    /// Column index (west to east), in `[0, cols)`.
    pub col: u32,
}

impl CellId {
    /// Creates a cell id from row and column indices.
    pub fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }

    /// Returns the inclusive lower bound of this cell's storage key range.
    ///
    /// Every key belonging to the cell starts with this prefix.
    pub fn key_prefix(&self) -> String {
        format!("{}|", self)
    }

    /// Returns the exclusive upper bound of this cell's storage key range.
    ///
    /// `~` (0x7E) sorts strictly after every digit, `.` and `-`, so
    /// `[key_prefix, key_end)` covers exactly the keys of this cell.
    pub fn key_end(&self) -> String {
        format!("{}|~", self)
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "G_{:03}_{:03}", self.row, self.col)
    }
}

impl FromStr for CellId {
    type Err = GridError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || GridError::InvalidCellId(s.to_string());

        let rest = s.strip_prefix("G_").ok_or_else(invalid)?;
        let (row, col) = rest.split_once('_').ok_or_else(invalid)?;
        if row.len() != 3 || col.len() != 3 {
            return Err(invalid());
        }

        Ok(Self {
            row: row.parse().map_err(|_| invalid())?,
            col: col.parse().map_err(|_| invalid())?,
        })
    }
}

/// Errors raised by grid construction and cell id parsing.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GridError {
    /// Bounds are not a proper rectangle (`min >= max` on some axis).
    #[error("invalid bounds: ({min_lon}, {min_lat}) .. ({max_lon}, {max_lat})")]
    InvalidBounds {
        min_lon: f64,
        min_lat: f64,
        max_lon: f64,
        max_lat: f64,
    },

    /// Cell size is zero, negative, or not finite.
    #[error("cell size must be a positive number of degrees, got {0}")]
    InvalidCellSize(f64),

    /// The configured bounds and cell size produce too many cells.
    #[error("grid of {rows}x{cols} cells exceeds the {max}x{max} limit", max = MAX_GRID_DIM)]
    TooManyCells { rows: u32, cols: u32 },

    /// A cell id tag did not match the `G_RRR_CCC` form.
    #[error("invalid cell id: '{0}' (expected G_RRR_CCC)")]
    InvalidCellId(String),
}
