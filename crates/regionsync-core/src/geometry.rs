//! Grid geometry validator.
//!
//! Pure clamping of proposed region geometry onto the dashboard grid:
//! - **Position**: `row >= 0`, `0 <= col <= GRID_COLUMNS - col_span`
//! - **Size**: `1 <= row_span <= MAX_ROW_SPAN`, `1 <= col_span <= GRID_COLUMNS - col`
//!
//! Nothing here fails. Drags and resizes that leave the grid are pulled back
//! onto it. Cross-region overlap is a separate, opt-in check
//! ([`find_overlap`]) driven by [`OverlapPolicy`].

use serde::{Deserialize, Serialize};

/// Number of columns in the dashboard grid.
pub const GRID_COLUMNS: u32 = 12;

/// Tallest a region may be, in grid rows.
pub const MAX_ROW_SPAN: u32 = 20;

/// Occupied grid cells of a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridRect {
    pub row: u32,
    pub col: u32,
    pub row_span: u32,
    pub col_span: u32,
}

impl GridRect {
    /// Whether the two rectangles share at least one cell.
    pub fn overlaps(&self, other: &GridRect) -> bool {
        self.row < other.row + other.row_span
            && other.row < self.row + self.row_span
            && self.col < other.col + other.col_span
            && other.col < self.col + self.col_span
    }
}

/// Unclamped geometry as proposed by a drag, a resize, or a seed layout.
///
/// Missing spans fall back to configured defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridPlacement {
    pub row: i32,
    pub col: i32,
    #[serde(default)]
    pub row_span: Option<i32>,
    #[serde(default)]
    pub col_span: Option<i32>,
}

impl GridPlacement {
    pub fn at(row: i32, col: i32) -> Self {
        Self {
            row,
            col,
            row_span: None,
            col_span: None,
        }
    }

    pub fn with_size(self, row_span: i32, col_span: i32) -> Self {
        Self {
            row_span: Some(row_span),
            col_span: Some(col_span),
            ..self
        }
    }
}

/// How the store treats geometry that intersects another active region.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapPolicy {
    /// Overlap is tolerated; rendering order decides what is on top.
    #[default]
    Allow,
    /// Moves, resizes and inserts that would overlap are refused.
    Reject,
}

/// Clamp a top-left position so a region of `col_span` columns stays on the grid.
pub fn clamp_position(row: i32, col: i32, col_span: u32) -> (u32, u32) {
    let col_span = col_span.clamp(1, GRID_COLUMNS);
    let row = row.max(0) as u32;
    let col = col.clamp(0, GRID_COLUMNS as i32 - 1) as u32;
    (row, col.min(GRID_COLUMNS - col_span))
}

/// Clamp a size so it fits the span limits and the columns right of `col`.
pub fn clamp_size(row_span: i32, col_span: i32, col: u32) -> (u32, u32) {
    let row_span = row_span.clamp(1, MAX_ROW_SPAN as i32) as u32;
    let max_cols = GRID_COLUMNS - col.min(GRID_COLUMNS - 1);
    let col_span = col_span.clamp(1, max_cols as i32) as u32;
    (row_span, col_span)
}

/// Clamp a full placement: spans first, then position, then size again
/// against the final column.
pub fn clamp_placement(
    placement: GridPlacement,
    default_row_span: u32,
    default_col_span: u32,
) -> GridRect {
    let requested_rows = placement.row_span.unwrap_or(default_row_span as i32);
    let requested_cols = placement
        .col_span
        .unwrap_or(default_col_span as i32)
        .clamp(1, GRID_COLUMNS as i32);

    let (row, col) = clamp_position(placement.row, placement.col, requested_cols as u32);
    let (row_span, col_span) = clamp_size(requested_rows, requested_cols, col);

    GridRect {
        row,
        col,
        row_span,
        col_span,
    }
}

/// Return the id of the first region in `others` that `candidate` overlaps.
pub fn find_overlap<'a, I>(candidate: &GridRect, others: I) -> Option<&'a str>
where
    I: IntoIterator<Item = (&'a str, GridRect)>,
{
    others
        .into_iter()
        .find(|(_, rect)| candidate.overlaps(rect))
        .map(|(id, _)| id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_never_leaves_grid() {
        for col_span in 1..=GRID_COLUMNS {
            for col in -5..20 {
                for row in [-10, -1, 0, 7] {
                    let (r, c) = clamp_position(row, col, col_span);
                    assert!(c + col_span <= GRID_COLUMNS, "col={col} span={col_span}");
                    assert!(c < GRID_COLUMNS);
                    assert_eq!(r, row.max(0) as u32);
                }
            }
        }
    }

    #[test]
    fn position_shifts_left_for_wide_regions() {
        assert_eq!(clamp_position(0, 10, 4), (0, 8));
        assert_eq!(clamp_position(2, 3, 4), (2, 3));
        assert_eq!(clamp_position(-3, -3, 12), (0, 0));
    }

    #[test]
    fn size_respects_limits() {
        assert_eq!(clamp_size(0, 0, 0), (1, 1));
        assert_eq!(clamp_size(50, 50, 0), (MAX_ROW_SPAN, GRID_COLUMNS));
        assert_eq!(clamp_size(3, 6, 9), (3, 3));
        assert_eq!(clamp_size(3, 6, 11), (3, 1));
        assert_eq!(clamp_size(3, 6, 40), (3, 1));
    }

    #[test]
    fn placement_keeps_requested_span_when_it_fits() {
        let rect = clamp_placement(GridPlacement::at(0, 10).with_size(2, 4), 4, 4);
        assert_eq!(
            rect,
            GridRect {
                row: 0,
                col: 8,
                row_span: 2,
                col_span: 4
            }
        );
    }

    #[test]
    fn placement_uses_defaults() {
        let rect = clamp_placement(GridPlacement::at(1, 1), 3, 5);
        assert_eq!(rect.row_span, 3);
        assert_eq!(rect.col_span, 5);
    }

    #[test]
    fn overlap_detection() {
        let a = GridRect { row: 0, col: 0, row_span: 2, col_span: 4 };
        let b = GridRect { row: 1, col: 3, row_span: 2, col_span: 2 };
        let c = GridRect { row: 2, col: 0, row_span: 1, col_span: 12 };
        let d = GridRect { row: 0, col: 4, row_span: 2, col_span: 2 };

        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
        // Edge-adjacent is not overlap.
        assert!(!a.overlaps(&d));

        let others = vec![("c", c), ("b", b)];
        assert_eq!(find_overlap(&a, others), Some("b"));
    }
}
