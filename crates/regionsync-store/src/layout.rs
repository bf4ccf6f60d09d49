//! Per-layout cache: entities, display order and loading/error state.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use regionsync_core::geometry::{self, GridRect};
use regionsync_core::{Region, RegionId};

use crate::entity::LocalRegion;

/// Last failure recorded for a layout, readable by the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutError {
    /// Operation that failed (`load`, `create`, `update`, `delete`, `seed`).
    pub op: String,
    pub region_id: Option<String>,
    pub message: String,
    /// Unix timestamp (seconds).
    pub at: u64,
}

impl LayoutError {
    pub(crate) fn new(op: &str, region_id: Option<&str>, error: &dyn fmt::Display) -> Self {
        Self {
            op: op.to_string(),
            region_id: region_id.map(str::to_string),
            message: error.to_string(),
            at: crate::store::epoch_secs(),
        }
    }
}

impl fmt::Display for LayoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.region_id {
            Some(region_id) => write!(f, "{} {}: {}", self.op, region_id, self.message),
            None => write!(f, "{}: {}", self.op, self.message),
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct LayoutState {
    order: Vec<RegionId>,
    entities: HashMap<RegionId, LocalRegion>,
    pub loading: bool,
    pub loaded: bool,
    /// Role defaults are offered at most once per layout.
    pub seeded: bool,
    pub error: Option<LayoutError>,
}

impl LayoutState {
    pub fn get(&self, region_id: &str) -> Option<&LocalRegion> {
        self.entities.get(region_id)
    }

    pub fn get_mut(&mut self, region_id: &str) -> Option<&mut LocalRegion> {
        self.entities.get_mut(region_id)
    }

    /// Insert at the end of the display order, or replace in place.
    pub fn insert(&mut self, entity: LocalRegion) {
        let id = entity.id().to_string();
        if !self.entities.contains_key(&id) {
            self.order.push(id.clone());
        }
        self.entities.insert(id, entity);
    }

    /// Replace the entity under `region_id` with what `f` returns.
    ///
    /// The result may carry a new id (a confirmed placeholder); it keeps the
    /// old display position. `None` drops the entity.
    pub fn update_entity<F>(&mut self, region_id: &str, f: F)
    where
        F: FnOnce(LocalRegion) -> Option<LocalRegion>,
    {
        let Some(entity) = self.entities.remove(region_id) else {
            return;
        };
        let position = self.order.iter().position(|id| id == region_id);
        match f(entity) {
            Some(next) => {
                let next_id = next.id().to_string();
                if next_id != region_id {
                    self.entities.remove(&next_id);
                    self.order.retain(|id| *id != next_id);
                    if let Some(slot) = self.order.iter_mut().find(|id| *id == region_id) {
                        *slot = next_id.clone();
                    }
                }
                if position.is_none() {
                    self.order.push(next_id.clone());
                }
                self.entities.insert(next_id, next);
            }
            None => self.order.retain(|id| id != region_id),
        }
    }

    pub fn remove(&mut self, region_id: &str) -> Option<LocalRegion> {
        self.order.retain(|id| id != region_id);
        self.entities.remove(region_id)
    }

    /// Every cached entity in display order, removals in flight included.
    pub fn entities(&self) -> impl Iterator<Item = &LocalRegion> {
        self.order.iter().filter_map(|id| self.entities.get(id))
    }

    /// Displayed state of the active regions, in display order.
    pub fn active(&self) -> Vec<Region> {
        self.entities()
            .filter(|entity| entity.is_active())
            .map(|entity| entity.current().clone())
            .collect()
    }

    /// First active region other than `except` that `rect` overlaps.
    pub fn find_overlap(&self, rect: &GridRect, except: &str) -> Option<String> {
        let others = self
            .entities()
            .filter(|entity| entity.is_active() && entity.id() != except)
            .map(|entity| (entity.id(), entity.current().rect()));
        geometry::find_overlap(rect, others).map(str::to_string)
    }

    /// Replace the cache with a fresh server listing.
    ///
    /// Unconfirmed local changes are laid over the fresh copies but keep
    /// expecting the version they were made against. Inserts that have not
    /// reached the server are kept, and anything else the server no longer
    /// lists is dropped. Known regions keep their display order; new ones
    /// are appended in server order.
    pub fn merge_server(&mut self, regions: Vec<Region>) {
        let mut previous = std::mem::take(&mut self.entities);
        let mut listed = Vec::with_capacity(regions.len());

        for server in regions {
            let id = server.id.clone();
            let entity = match previous.remove(&id) {
                Some(local) => local.refresh(server),
                None => LocalRegion::Confirmed(server),
            };
            self.entities.insert(id.clone(), entity);
            listed.push(id);
        }
        for (id, entity) in previous {
            if entity.is_placeholder() {
                self.entities.insert(id, entity);
            }
        }

        let mut order: Vec<RegionId> = self
            .order
            .iter()
            .filter(|id| self.entities.contains_key(id.as_str()))
            .cloned()
            .collect();
        for id in listed {
            if !order.contains(&id) {
                order.push(id);
            }
        }
        self.order = order;
    }

    /// Move `ids` to the front in the given order.
    ///
    /// Unknown ids are ignored; unlisted regions keep their relative order
    /// after the listed ones.
    pub fn reorder(&mut self, ids: &[RegionId]) {
        let mut order = Vec::with_capacity(self.order.len());
        for id in ids {
            if self.entities.contains_key(id) && !order.contains(id) {
                order.push(id.clone());
            }
        }
        for id in &self.order {
            if !order.contains(id) {
                order.push(id.clone());
            }
        }
        self.order = order;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regionsync_core::RegionPatch;

    fn region(id: &str, col: u32, version: u64) -> Region {
        Region {
            id: id.to_string(),
            layout_id: "layout-1".to_string(),
            region_type: "kpi".to_string(),
            grid_row: 0,
            grid_col: col,
            row_span: 2,
            col_span: 2,
            is_collapsed: false,
            is_locked: false,
            version,
            created_at: 1,
            updated_at: 1,
            deleted_at: None,
        }
    }

    fn ids(layout: &LayoutState) -> Vec<String> {
        layout.active().into_iter().map(|r| r.id).collect()
    }

    #[test]
    fn merge_refreshes_pending_and_keeps_placeholders() {
        let mut layout = LayoutState::default();
        layout.insert(LocalRegion::Confirmed(region("a", 0, 1)));
        layout.insert(LocalRegion::Confirmed(region("b", 2, 1)));
        layout.insert(LocalRegion::placeholder(region("tmp-1", 4, 1)));
        layout
            .get_mut("a")
            .unwrap()
            .apply(RegionPatch::collapsed(true));

        layout.merge_server(vec![region("c", 6, 1), region("a", 0, 3)]);

        assert_eq!(ids(&layout), vec!["a", "tmp-1", "c"]);
        let a = layout.get("a").unwrap();
        assert_eq!(a.expected_version(), Some(1));
        assert_eq!(a.baseline().unwrap().version, 3);
        assert!(a.current().is_collapsed);
        assert!(layout.get("b").is_none());
    }

    #[test]
    fn update_entity_renames_in_place() {
        let mut layout = LayoutState::default();
        layout.insert(LocalRegion::Confirmed(region("a", 0, 1)));
        layout.insert(LocalRegion::placeholder(region("tmp-1", 2, 1)));
        layout.insert(LocalRegion::Confirmed(region("c", 4, 1)));

        layout.update_entity("tmp-1", |e| Some(e.rebase(region("srv-9", 2, 1))));

        assert_eq!(ids(&layout), vec!["a", "srv-9", "c"]);
        assert!(!layout.get("srv-9").unwrap().is_optimistic());
    }

    #[test]
    fn reorder_ignores_unknown_and_keeps_rest() {
        let mut layout = LayoutState::default();
        for (id, col) in [("a", 0), ("b", 2), ("c", 4), ("d", 6)] {
            layout.insert(LocalRegion::Confirmed(region(id, col, 1)));
        }

        layout.reorder(&["c".to_string(), "zzz".to_string(), "a".to_string()]);
        assert_eq!(ids(&layout), vec!["c", "a", "b", "d"]);
    }

    #[test]
    fn overlap_skips_self_and_removed() {
        let mut layout = LayoutState::default();
        layout.insert(LocalRegion::Confirmed(region("a", 0, 1)));
        layout.insert(LocalRegion::Confirmed(region("b", 4, 1)));
        layout.get_mut("b").unwrap().mark_deleted(5);

        let rect = region("x", 1, 1).rect();
        assert_eq!(layout.find_overlap(&rect, "x"), Some("a".to_string()));
        assert_eq!(layout.find_overlap(&rect, "a"), None);
        assert_eq!(layout.find_overlap(&region("x", 4, 1).rect(), "x"), None);
    }
}
