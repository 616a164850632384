//! Search queries and result publishing
//!
//! A query carries the bounding box and zoom, a cooperative cancellation
//! hook consulted between tree nodes and between objects, and counters for
//! the read statistics the renderer reports. Materialized map objects flow
//! to a [`Publisher`], which owns the duplicate policy.

use rustc_hash::FxHashMap;

use crate::geo::Bbox31;

/// A materialized map object ready for rendering: decoded geometry,
/// decoded tag/value types and resolved names.
#[derive(Debug, Clone, Default)]
pub struct MapObject {
    pub id: i64,
    /// Closed area rather than a polyline.
    pub area: bool,
    /// 31-bit coordinates.
    pub points: Vec<(u32, u32)>,
    pub inner_rings: Vec<Vec<(u32, u32)>>,
    pub types: Vec<(String, String)>,
    pub additional_types: Vec<(String, String)>,
    /// Resolved names in file order, keyed by the rule tag.
    pub names: Vec<(String, String)>,
    pub label: Option<(u32, u32)>,
}

impl MapObject {
    pub fn contains_type(&self, tag: &str, value: &str) -> bool {
        self.types.iter().any(|(t, v)| t == tag && v == value)
            || self.additional_types.iter().any(|(t, v)| t == tag && v == value)
    }

    pub fn name(&self, tag: &str) -> Option<&str> {
        self.names.iter().find(|(t, _)| t == tag).map(|(_, v)| v.as_str())
    }
}

/// Collector for query results. `publish` returns whether the object was
/// kept, so readers can stop tracking it.
pub trait Publisher {
    fn publish(&mut self, object: MapObject, zoom: u32) -> bool;
}

/// Read statistics accumulated over one query.
#[derive(Debug, Default, Clone, Copy)]
pub struct QueryStats {
    pub read_subtrees: u32,
    pub accepted_subtrees: u32,
    pub visited_objects: u32,
    pub accepted_objects: u32,
    /// Leaf tiles carrying land/sea information that intersected the query.
    pub ocean_tiles: u32,
    /// Of those, tiles flagged as sea.
    pub ocean: u32,
}

/// A bbox + zoom search across the open files.
pub struct SearchQuery {
    pub bbox: Bbox31,
    pub zoom: u32,
    /// Bbox used for ocean-tile accounting; stays at the caller's request
    /// even when the search bbox is widened for basemap tiles.
    pub ocean_bbox: Bbox31,
    pub stats: QueryStats,
    cancel: Option<Box<dyn Fn() -> bool + Send + Sync>>,
}

impl SearchQuery {
    pub fn new(bbox: Bbox31, zoom: u32) -> SearchQuery {
        SearchQuery { bbox, zoom, ocean_bbox: bbox, stats: QueryStats::default(), cancel: None }
    }

    pub fn with_cancel(
        mut self,
        cancel: impl Fn() -> bool + Send + Sync + 'static,
    ) -> SearchQuery {
        self.cancel = Some(Box::new(cancel));
        self
    }

    /// Consulted between nodes and between objects; readers finish the
    /// current item, release their limits and return.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().map(|f| f()).unwrap_or(false)
    }
}

/// Default publisher with the standard duplicate policy: an id seen twice
/// at zoom >= 15 is always rejected; at lower zooms the copy is kept only
/// when its endpoints differ from the kept one (objects clipped at tile
/// seams arrive once per tile).
#[derive(Default)]
pub struct ResultPublisher {
    pub results: Vec<MapObject>,
    seen: FxHashMap<i64, ((u32, u32), (u32, u32))>,
}

impl ResultPublisher {
    pub fn new() -> ResultPublisher {
        ResultPublisher::default()
    }

    pub fn clear(&mut self) {
        self.results.clear();
        self.seen.clear();
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

impl Publisher for ResultPublisher {
    fn publish(&mut self, object: MapObject, zoom: u32) -> bool {
        if object.id > 0 {
            let first = object.points.first().copied().unwrap_or((0, 0));
            let last = object.points.last().copied().unwrap_or((0, 0));
            if let Some(&(kept_first, kept_last)) = self.seen.get(&object.id) {
                if zoom >= 15 {
                    return false;
                }
                if kept_first == first && kept_last == last {
                    return false;
                }
            }
            self.seen.insert(object.id, (first, last));
        }
        self.results.push(object);
        true
    }
}
