//! Domain types shared across regionsync crates.
//!
//! `Region` is the persisted shape exchanged with the remote store.
//! `RegionPatch` is a partial update: every field is optional and a merge
//! keeps the newest value per field.

use serde::{Deserialize, Serialize};

use crate::geometry::GridRect;

/// Opaque region identifier (server-assigned, or a local placeholder).
pub type RegionId = String;

/// Identifier of the layout a region belongs to.
pub type LayoutId = String;

// ── Region ─────────────────────────────────────────────────────────

/// A positioned, sized widget instance within a layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub id: RegionId,
    pub layout_id: LayoutId,
    /// Widget tag; opaque to the sync engine.
    pub region_type: String,
    pub grid_row: u32,
    pub grid_col: u32,
    pub row_span: u32,
    pub col_span: u32,
    pub is_collapsed: bool,
    pub is_locked: bool,
    /// Optimistic concurrency token, bumped by the remote store on every write.
    pub version: u64,
    /// Unix timestamp (seconds).
    pub created_at: u64,
    /// Unix timestamp (seconds).
    pub updated_at: u64,
    /// Set when the region is soft-deleted.
    #[serde(default)]
    pub deleted_at: Option<u64>,
}

impl Region {
    /// Whether the region is part of the active (non-deleted) set.
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }

    /// The grid cells covered by this region.
    pub fn rect(&self) -> GridRect {
        GridRect {
            row: self.grid_row,
            col: self.grid_col,
            row_span: self.row_span,
            col_span: self.col_span,
        }
    }

    /// True when geometry and interaction flags match `other`.
    ///
    /// Ignores identity, version and timestamps.
    pub fn same_content(&self, other: &Region) -> bool {
        self.region_type == other.region_type
            && self.rect() == other.rect()
            && self.is_collapsed == other.is_collapsed
            && self.is_locked == other.is_locked
            && self.deleted_at.is_some() == other.deleted_at.is_some()
    }
}

// ── Patches ────────────────────────────────────────────────────────

/// Partial update to a region's mutable fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grid_row: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grid_col: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_span: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub col_span: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_collapsed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_locked: Option<bool>,
}

impl RegionPatch {
    pub fn position(grid_row: u32, grid_col: u32) -> Self {
        Self {
            grid_row: Some(grid_row),
            grid_col: Some(grid_col),
            ..Self::default()
        }
    }

    pub fn size(row_span: u32, col_span: u32) -> Self {
        Self {
            row_span: Some(row_span),
            col_span: Some(col_span),
            ..Self::default()
        }
    }

    pub fn collapsed(is_collapsed: bool) -> Self {
        Self {
            is_collapsed: Some(is_collapsed),
            ..Self::default()
        }
    }

    pub fn locked(is_locked: bool) -> Self {
        Self {
            is_locked: Some(is_locked),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Merge a newer patch over this one. Fields set in `newer` win.
    pub fn merge(&mut self, newer: RegionPatch) {
        self.grid_row = newer.grid_row.or(self.grid_row);
        self.grid_col = newer.grid_col.or(self.grid_col);
        self.row_span = newer.row_span.or(self.row_span);
        self.col_span = newer.col_span.or(self.col_span);
        self.is_collapsed = newer.is_collapsed.or(self.is_collapsed);
        self.is_locked = newer.is_locked.or(self.is_locked);
    }

    /// Return a copy of `region` with this patch applied.
    pub fn apply_to(&self, region: &Region) -> Region {
        Region {
            grid_row: self.grid_row.unwrap_or(region.grid_row),
            grid_col: self.grid_col.unwrap_or(region.grid_col),
            row_span: self.row_span.unwrap_or(region.row_span),
            col_span: self.col_span.unwrap_or(region.col_span),
            is_collapsed: self.is_collapsed.unwrap_or(region.is_collapsed),
            is_locked: self.is_locked.unwrap_or(region.is_locked),
            ..region.clone()
        }
    }

    /// True when every field set in this patch already holds in `region`.
    pub fn is_applied_to(&self, region: &Region) -> bool {
        self.apply_to(region).same_content(region)
    }
}

// ── Remote contract ────────────────────────────────────────────────

/// Payload for creating a region. Geometry is already clamped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRegion {
    pub region_type: String,
    pub grid_row: u32,
    pub grid_col: u32,
    pub row_span: u32,
    pub col_span: u32,
}

/// Conditional write sent to the remote store.
///
/// The write only lands if the stored version still equals
/// `expected_version`; the stored version then becomes `version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionWrite {
    pub expected_version: u64,
    pub version: u64,
    pub fields: RegionPatch,
}

impl RegionWrite {
    pub fn new(expected_version: u64, fields: RegionPatch) -> Self {
        Self {
            expected_version,
            version: expected_version + 1,
            fields,
        }
    }
}

/// Result of a conditional write.
///
/// `NoMatchingRow` is returned both when the row vanished and when its
/// version moved on; callers re-read to tell the two apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome<T> {
    Applied(T),
    NoMatchingRow,
}

impl<T> WriteOutcome<T> {
    pub fn is_conflict(&self) -> bool {
        matches!(self, WriteOutcome::NoMatchingRow)
    }
}

/// Seed entry for bootstrapping a new layout for a user role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDefault {
    pub region_type: String,
    pub grid_row: i32,
    pub grid_col: i32,
}
