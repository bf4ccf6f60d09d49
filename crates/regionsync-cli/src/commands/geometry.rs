use std::path::Path;

use anyhow::Result;
use regionsync_core::geometry::{self, GridPlacement, GridRect};

use super::config;

pub fn clamp(
    row: i32,
    col: i32,
    row_span: Option<i32>,
    col_span: Option<i32>,
    config_path: Option<&Path>,
) -> Result<()> {
    let grid = config::load(config_path)?.grid;
    let placement = GridPlacement {
        row,
        col,
        row_span,
        col_span,
    };
    let rect = geometry::clamp_placement(placement, grid.default_row_span, grid.default_col_span);
    if changed(&placement, &rect) {
        tracing::debug!(?placement, ?rect, "placement adjusted to fit the grid");
    }
    println!("{}", serde_json::to_string(&rect)?);
    Ok(())
}

fn changed(placement: &GridPlacement, rect: &GridRect) -> bool {
    placement.row != rect.row as i32
        || placement.col != rect.col as i32
        || placement.row_span.is_some_and(|span| span != rect.row_span as i32)
        || placement.col_span.is_some_and(|span| span != rect.col_span as i32)
}
