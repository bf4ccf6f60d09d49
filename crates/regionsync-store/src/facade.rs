//! UI-facing view of the store.
//!
//! [`RegionView`] is the region shape UI layers consume: versions,
//! timestamps and pending-write bookkeeping are stripped. [`LayoutHandle`]
//! binds a store to one layout.

use serde::Serialize;
use tokio::sync::watch;

use regionsync_core::{GridPlacement, Region};

use crate::entity::LocalRegion;
use crate::error::StoreResult;
use crate::layout::LayoutError;
use crate::store::RegionStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionView {
    pub id: String,
    pub layout_id: String,
    pub region_type: String,
    pub grid_row: u32,
    pub grid_col: u32,
    pub row_span: u32,
    pub col_span: u32,
    pub is_collapsed: bool,
    pub is_locked: bool,
}

impl From<&Region> for RegionView {
    fn from(region: &Region) -> Self {
        Self {
            id: region.id.clone(),
            layout_id: region.layout_id.clone(),
            region_type: region.region_type.clone(),
            grid_row: region.grid_row,
            grid_col: region.grid_col,
            row_span: region.row_span,
            col_span: region.col_span,
            is_collapsed: region.is_collapsed,
            is_locked: region.is_locked,
        }
    }
}

impl From<Region> for RegionView {
    fn from(region: Region) -> Self {
        RegionView::from(&region)
    }
}

impl From<&LocalRegion> for RegionView {
    fn from(entity: &LocalRegion) -> Self {
        RegionView::from(entity.current())
    }
}

/// A store bound to one layout.
#[derive(Clone)]
pub struct LayoutHandle {
    store: RegionStore,
    layout_id: String,
}

impl RegionStore {
    pub fn layout(&self, layout_id: &str) -> LayoutHandle {
        LayoutHandle {
            store: self.clone(),
            layout_id: layout_id.to_string(),
        }
    }
}

impl LayoutHandle {
    pub fn layout_id(&self) -> &str {
        &self.layout_id
    }

    pub fn store(&self) -> &RegionStore {
        &self.store
    }

    /// Bumped whenever the store's cache changes.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.store.subscribe()
    }

    pub async fn regions(&self) -> Vec<RegionView> {
        self.store
            .regions(&self.layout_id)
            .await
            .iter()
            .map(RegionView::from)
            .collect()
    }

    pub async fn loading(&self) -> bool {
        self.store.is_loading(&self.layout_id).await
    }

    pub async fn error(&self) -> Option<LayoutError> {
        self.store.error(&self.layout_id).await
    }

    pub async fn add_region(
        &self,
        region_type: &str,
        placement: GridPlacement,
    ) -> StoreResult<RegionView> {
        self.store
            .add_region(&self.layout_id, region_type, placement)
            .await
            .map(RegionView::from)
    }

    pub async fn remove_region(&self, region_id: &str) -> StoreResult<()> {
        self.store.remove_region(&self.layout_id, region_id).await
    }

    pub async fn update_region_position(
        &self,
        region_id: &str,
        row: i32,
        col: i32,
    ) -> StoreResult<RegionView> {
        self.store
            .update_region_position(&self.layout_id, region_id, row, col)
            .await
            .map(RegionView::from)
    }

    pub async fn update_region_size(
        &self,
        region_id: &str,
        row_span: i32,
        col_span: i32,
    ) -> StoreResult<RegionView> {
        self.store
            .update_region_size(&self.layout_id, region_id, row_span, col_span)
            .await
            .map(RegionView::from)
    }

    pub async fn reorder_regions<S: AsRef<str>>(&self, ordered_ids: &[S]) -> StoreResult<()> {
        self.store.reorder_regions(&self.layout_id, ordered_ids).await
    }

    pub async fn toggle_collapse(&self, region_id: &str) -> StoreResult<RegionView> {
        self.store
            .toggle_collapse(&self.layout_id, region_id)
            .await
            .map(RegionView::from)
    }

    pub async fn toggle_lock(&self, region_id: &str) -> StoreResult<RegionView> {
        self.store
            .toggle_lock(&self.layout_id, region_id)
            .await
            .map(RegionView::from)
    }

    /// Persist every pending change of the layout now.
    pub async fn save(&self) -> StoreResult<()> {
        self.store.flush_updates(&self.layout_id).await
    }

    /// Re-fetch the layout from the remote store.
    pub async fn reload(&self) -> StoreResult<Vec<RegionView>> {
        let regions = self.store.load_regions(&self.layout_id).await?;
        Ok(regions.iter().map(RegionView::from).collect())
    }
}
