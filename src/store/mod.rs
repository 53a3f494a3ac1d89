//! # Partitioned Append Log
//!
//! The remote tabular store seen as a small row-oriented database without
//! transactions. One partition holds the tracking configuration, every other
//! partition is the telemetry log of one identity.
//!
//! This module handles:
//! - The [`PartitionedLog`] capability (create/list/count/delete-range/append/read-range)
//! - A1-notation cell ranges ([`CellRange`])
//! - Backends: in-memory ([`memory`]), JSON-lines files ([`file`]) and the
//!   spreadsheet REST API ([`sheets`])

use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, TrackerError};

pub mod file;
pub mod memory;
pub mod sheets;

/// Identity of one partition inside the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionInfo {
    /// Store-assigned numeric id, used by count/delete operations
    pub id: u64,
    /// Partition title, used by append/read operations
    pub title: String,
}

/// Store operations the tracker depends on.
///
/// Nothing here is transactional: a read-count/delete/append sequence can
/// interleave with other writers.
#[async_trait]
pub trait PartitionedLog: Send + Sync {
    /// List every partition in store order.
    async fn list_partitions(&self) -> Result<Vec<PartitionInfo>>;

    /// Create an empty partition. Fails if the title is already taken.
    async fn create_partition(&self, name: &str) -> Result<PartitionInfo>;

    /// Number of rows currently held by a partition.
    async fn row_count(&self, partition_id: u64) -> Result<usize>;

    /// Delete rows `start..end` (0-based, end exclusive) from a partition.
    async fn delete_rows(&self, partition_id: u64, start: usize, end: usize) -> Result<()>;

    /// Append one row after the last row of a partition. Values are
    /// user-entered text; the store infers types.
    async fn append_row(&self, partition: &str, values: &[String]) -> Result<()>;

    /// Read the cells of a partition covered by `range`.
    async fn read_range(&self, partition: &str, range: &CellRange) -> Result<Vec<Vec<String>>>;
}

/// Rectangular cell range in A1 notation, e.g. `A1:B`, `A:D`, `B2:C10`.
///
/// Rows and columns are stored 0-based; `None` bounds are open-ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRange {
    pub start_col: usize,
    pub start_row: usize,
    pub end_col: Option<usize>,
    pub end_row: Option<usize>,
}

impl CellRange {
    /// Every cell from column `start_col` onwards.
    pub fn columns(start_col: usize, end_col: usize) -> Self {
        Self {
            start_col,
            start_row: 0,
            end_col: Some(end_col),
            end_row: None,
        }
    }

    /// Cut `rows` down to this range. Trailing rows with no cells in the
    /// range are dropped, matching what the spreadsheet API returns.
    pub fn slice(&self, rows: &[Vec<String>]) -> Vec<Vec<String>> {
        let last_row = self
            .end_row
            .map_or(rows.len(), |end| (end + 1).min(rows.len()));

        let mut out: Vec<Vec<String>> = rows
            .iter()
            .take(last_row)
            .skip(self.start_row)
            .map(|row| {
                let last_col = self.end_col.map_or(row.len(), |end| (end + 1).min(row.len()));
                row.iter()
                    .take(last_col)
                    .skip(self.start_col)
                    .cloned()
                    .collect()
            })
            .collect();

        while out.last().is_some_and(|row| row.is_empty()) {
            out.pop();
        }
        out
    }
}

impl FromStr for CellRange {
    type Err = TrackerError;

    fn from_str(text: &str) -> Result<Self> {
        let (start, end) = match text.split_once(':') {
            Some((start, end)) => (start, Some(end)),
            None => (text, None),
        };

        let (start_col, start_row) = parse_cell(start)?;
        let start_col = start_col.unwrap_or(0);
        let start_row = start_row.unwrap_or(0);

        let (end_col, end_row) = match end {
            Some(end) => parse_cell(end)?,
            // A single cell reference covers just that cell
            None => (Some(start_col), Some(start_row)),
        };

        if end_col.is_some_and(|c| c < start_col) || end_row.is_some_and(|r| r < start_row) {
            return Err(TrackerError::Store(format!("Inverted cell range: {}", text)));
        }

        Ok(Self {
            start_col,
            start_row,
            end_col,
            end_row,
        })
    }
}

impl fmt::Display for CellRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", column_name(self.start_col), self.start_row + 1)?;
        if self.end_col == Some(self.start_col) && self.end_row == Some(self.start_row) {
            return Ok(());
        }
        write!(f, ":")?;
        if let Some(col) = self.end_col {
            write!(f, "{}", column_name(col))?;
        }
        if let Some(row) = self.end_row {
            write!(f, "{}", row + 1)?;
        }
        Ok(())
    }
}

/// Parse one side of an A1 range into 0-based (column, row). Either part may be missing.
fn parse_cell(cell: &str) -> Result<(Option<usize>, Option<usize>)> {
    let invalid = || TrackerError::Store(format!("Invalid cell reference: {:?}", cell));

    let split = cell
        .find(|c: char| c.is_ascii_digit())
        .unwrap_or(cell.len());
    let (letters, digits) = cell.split_at(split);

    if letters.is_empty() && digits.is_empty() {
        return Err(invalid());
    }

    let col = if letters.is_empty() {
        None
    } else {
        let mut index = 0usize;
        for c in letters.chars() {
            if !c.is_ascii_alphabetic() {
                return Err(invalid());
            }
            let digit = c.to_ascii_uppercase() as usize - 'A' as usize + 1;
            index = index
                .checked_mul(26)
                .and_then(|shifted| shifted.checked_add(digit))
                .ok_or_else(invalid)?;
        }
        Some(index - 1)
    };

    let row = if digits.is_empty() {
        None
    } else {
        let row: usize = digits.parse().map_err(|_| invalid())?;
        if row == 0 {
            return Err(invalid());
        }
        Some(row - 1)
    };

    Ok((col, row))
}

/// 0-based column index to spreadsheet letters (0 → A, 25 → Z, 26 → AA).
fn column_name(mut index: usize) -> String {
    let mut name = Vec::new();
    loop {
        name.push(b'A' + (index % 26) as u8);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    name.reverse();
    String::from_utf8(name).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn rows(data: &[&[&str]]) -> Vec<Vec<String>> {
        data.iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect()
    }

    #[test]
    fn test_parse_open_ended_range() {
        let range: CellRange = "A1:B".parse().unwrap();
        assert_eq!(range, CellRange::columns(0, 1));
        assert_eq!(range.to_string(), "A1:B");
    }

    #[test]
    fn test_parse_column_only_range() {
        let range: CellRange = "A:D".parse().unwrap();
        assert_eq!(range.start_row, 0);
        assert_eq!(range.end_col, Some(3));
        assert_eq!(range.end_row, None);
    }

    #[test]
    fn test_parse_bounded_range() {
        let range: CellRange = "B2:C10".parse().unwrap();
        assert_eq!(range.start_col, 1);
        assert_eq!(range.start_row, 1);
        assert_eq!(range.end_col, Some(2));
        assert_eq!(range.end_row, Some(9));
        assert_eq!(range.to_string(), "B2:C10");
    }

    #[test]
    fn test_single_cell_round_trips() {
        let range: CellRange = "A1".parse().unwrap();
        assert_eq!(range.to_string(), "A1");
    }

    #[test]
    fn test_parse_rejects_invalid() {
        assert!("".parse::<CellRange>().is_err());
        assert!("A0".parse::<CellRange>().is_err());
        assert!("C1:A1".parse::<CellRange>().is_err());
        assert!("A-1".parse::<CellRange>().is_err());
        assert!("AAAAAAAAAAAAAAAAAAAA1:B".parse::<CellRange>().is_err());
        assert!("A1:ZZZZZZZZZZZZZZZZZZZZZZZZ".parse::<CellRange>().is_err());
        assert!("A99999999999999999999999".parse::<CellRange>().is_err());
    }

    #[test]
    fn test_column_names() {
        assert_eq!(column_name(0), "A");
        assert_eq!(column_name(25), "Z");
        assert_eq!(column_name(26), "AA");
        assert_eq!(column_name(27), "AB");
    }

    #[test]
    fn test_slice_limits_columns_and_drops_trailing_empty() {
        let data = rows(&[&["10", "x", "y"], &["a", "true"], &[], &[]]);
        let range: CellRange = "A1:B".parse().unwrap();
        assert_eq!(
            range.slice(&data),
            rows(&[&["10", "x"], &["a", "true"]])
        );
    }

    #[test]
    fn test_slice_respects_row_bounds() {
        let data = rows(&[&["1"], &["2"], &["3"]]);
        let range: CellRange = "A2:A2".parse().unwrap();
        assert_eq!(range.slice(&data), rows(&[&["2"]]));
    }
}
