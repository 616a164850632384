//! Open-file registry
//!
//! A process typically keeps several map files open at once (country
//! extracts, a worldwide basemap, road-only files, live overlays).
//! Queries fan out over the registered files; opening and closing are
//! serialized, readers only snapshot the list.
//!
//! The registry also owns the cache manifest: on open it tries to hydrate
//! index headers from the manifest, and records freshly scanned files so
//! the next run can skip the scan.

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};
use std::time::UNIX_EPOCH;

use butterfly_common::Result;
use once_cell::sync::Lazy;
use tracing::{debug, error, info, warn};

use crate::cache::{self, FileIndex, StoredIndex, CACHE_VERSION};
use crate::obf::routing::{RouteDataObject, RouteSubregion};
use crate::obf::MapFile;
use crate::query::{MapObject, Publisher, ResultPublisher, SearchQuery};
use crate::rules::RouteRuleTable;

/// At and below this zoom only basemap files are rendered.
const ZOOM_ONLY_FOR_BASEMAPS: u32 = 11;
/// At and below this zoom route rendering uses the base subregion tree.
const ZOOM_FOR_BASE_ROUTE_RENDERING: u32 = 13;
/// Below this zoom basemap objects still back road-only route rendering.
const DETAILED_ZOOM_START_FOR_ROUTE_SECTION: u32 = 13;
/// Above this zoom the query box is widened to whole coastline tiles.
const ZOOM_MAX_DETAILED_FOR_COASTLINES: u32 = 16;

struct CacheState {
    index: Option<StoredIndex>,
    dirty: bool,
}

/// The set of open map files plus the cache manifest state.
pub struct FileRegistry {
    files: RwLock<Vec<Arc<MapFile>>>,
    cache: Mutex<CacheState>,
}

/// A routing leaf found by [`FileRegistry::search_route_subregions`],
/// addressable for later materialization.
#[derive(Clone)]
pub struct FoundSubregion {
    pub file: Arc<MapFile>,
    /// Position of the owning routing index within the file.
    pub routing_index: usize,
    pub subregion: RouteSubregion,
}

impl Default for FileRegistry {
    fn default() -> FileRegistry {
        FileRegistry::new()
    }
}

impl FileRegistry {
    pub fn new() -> FileRegistry {
        FileRegistry {
            files: RwLock::new(Vec::new()),
            cache: Mutex::new(CacheState { index: None, dirty: false }),
        }
    }

    /// Open a map file and register it. An already open file of the same
    /// path is closed first. A matching cache entry hydrates the index
    /// headers without scanning; otherwise the file is scanned and the
    /// manifest updated.
    pub fn open_file(
        &self,
        path: impl AsRef<Path>,
        use_live: bool,
        routing_only: bool,
    ) -> Result<Arc<MapFile>> {
        let path = path.as_ref();
        self.close_file(path);

        let size = fs::metadata(path)?.len();
        let path_str = path.to_string_lossy().into_owned();

        let cached_entry = {
            let state = self.cache.lock().unwrap();
            state
                .index
                .as_ref()
                .and_then(|stored| stored.find(&path_str, size))
                .cloned()
        };

        let file = match cached_entry {
            Some(entry) => {
                let mut file = MapFile::open_shallow(path)?;
                entry.hydrate(&mut file, routing_only);
                debug!(path = %path.display(), "map file hydrated from cache");
                file
            }
            None => {
                let file = MapFile::open(path, use_live, routing_only)?;
                // only files carrying routing data are worth remembering
                if !file.routing_indexes.is_empty() || !file.hh_indexes.is_empty() {
                    let modified_ms = fs::metadata(path)
                        .and_then(|m| m.modified())
                        .ok()
                        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                        .map(|d| d.as_millis() as u64)
                        .unwrap_or(0);
                    let entry = FileIndex::from_map_file(&file, modified_ms);
                    let mut state = self.cache.lock().unwrap();
                    let stored =
                        state.index.get_or_insert_with(|| StoredIndex::new(modified_ms));
                    stored.upsert(entry);
                    state.dirty = true;
                }
                file
            }
        };

        let file = Arc::new(file);
        self.files.write().unwrap().push(file.clone());
        Ok(file)
    }

    /// Close the file registered under `path`; its indexes become
    /// unreachable for new queries.
    pub fn close_file(&self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        let mut files = self.files.write().unwrap();
        let before = files.len();
        files.retain(|f| f.path != path);
        let closed = files.len() != before;
        if closed {
            info!(path = %path.display(), "map file closed");
        }
        closed
    }

    /// Snapshot of the open files, in registration order.
    pub fn files(&self) -> Vec<Arc<MapFile>> {
        self.files.read().unwrap().clone()
    }

    /// Load the cache manifest. A manifest with a different version is
    /// discarded so the files get rescanned and the manifest rebuilt.
    pub fn load_cache(&self, path: impl AsRef<Path>) -> bool {
        match cache::read_manifest(path.as_ref()) {
            Ok(stored) if stored.version == CACHE_VERSION => {
                let mut state = self.cache.lock().unwrap();
                state.index = Some(stored);
                state.dirty = false;
                true
            }
            Ok(stored) => {
                debug!(version = stored.version, "cache manifest version mismatch, discarding");
                false
            }
            Err(err) => {
                warn!(path = %path.as_ref().display(), %err, "cache manifest unreadable");
                false
            }
        }
    }

    /// Persist the cache manifest when anything changed since loading.
    pub fn write_cache(&self, path: impl AsRef<Path>) -> bool {
        let mut state = self.cache.lock().unwrap();
        if !state.dirty {
            return true;
        }
        let Some(stored) = state.index.as_ref() else {
            return true;
        };
        match cache::write_manifest(path.as_ref(), stored) {
            Ok(()) => {
                state.dirty = false;
                true
            }
            Err(err) => {
                error!(path = %path.as_ref().display(), %err, "cache manifest not written");
                false
            }
        }
    }

    /// Render query across all open files: detailed files at the query
    /// box (widened to coastline tiles at high zoom), basemap files at
    /// basemap tile granularity, road-only files via their routing data.
    /// A sea rectangle is published when the touched tiles are mostly
    /// ocean and no coastline geometry made it into the result.
    pub fn search_objects_for_rendering(
        &self,
        query: &mut SearchQuery,
        publisher: &mut ResultPublisher,
    ) -> Result<()> {
        let files = self.files();
        let original = query.bbox;
        query.ocean_bbox = original;
        let basemap_bbox = if query.zoom > ZOOM_ONLY_FOR_BASEMAPS {
            original.aligned_to_zoom(ZOOM_ONLY_FOR_BASEMAPS)
        } else {
            original
        };
        let detailed_bbox = if query.zoom > ZOOM_MAX_DETAILED_FOR_COASTLINES {
            original.aligned_to_zoom(ZOOM_MAX_DETAILED_FOR_COASTLINES)
        } else {
            original
        };

        let mut detailed = ResultPublisher::new();
        let mut basemap = ResultPublisher::new();
        for file in &files {
            if query.is_cancelled() {
                break;
            }
            if file.basemap {
                query.bbox = basemap_bbox;
                file.read_map_objects(query, &mut basemap)?;
            } else {
                query.bbox = detailed_bbox;
                file.read_map_objects(query, &mut detailed)?;
            }
        }

        // road-only files carry no map section; render their roads
        let mut routing_section_read = false;
        if query.zoom >= ZOOM_ONLY_FOR_BASEMAPS {
            query.bbox = original;
            for file in files.iter().filter(|f| f.road_only) {
                if query.is_cancelled() {
                    break;
                }
                let before = detailed.len();
                self.read_route_data_as_map_objects(file, query, &mut detailed)?;
                routing_section_read |= detailed.len() != before;
            }
        }
        query.bbox = original;
        if query.is_cancelled() {
            return Ok(());
        }

        let empty_data = query.zoom > ZOOM_ONLY_FOR_BASEMAPS && detailed.is_empty();
        let include_basemap = query.zoom <= ZOOM_ONLY_FOR_BASEMAPS
            || empty_data
            || (routing_section_read && query.zoom < DETAILED_ZOOM_START_FOR_ROUTE_SECTION);

        let mut has_coastline = false;
        for obj in detailed.results.drain(..) {
            has_coastline |= obj.contains_type("natural", "coastline");
            publisher.publish(obj, query.zoom);
        }
        if include_basemap {
            for obj in basemap.results.drain(..) {
                has_coastline |= obj.contains_type("natural", "coastline");
                publisher.publish(obj, query.zoom);
            }
        }

        if !has_coastline
            && query.stats.ocean_tiles > 0
            && 2 * query.stats.ocean > query.stats.ocean_tiles
        {
            let sea = MapObject {
                area: true,
                points: vec![
                    (original.left, original.top),
                    (original.right, original.top),
                    (original.right, original.bottom),
                    (original.left, original.bottom),
                    (original.left, original.top),
                ],
                types: vec![("natural".into(), "coastline".into())],
                additional_types: vec![("layer".into(), "-5".into())],
                ..Default::default()
            };
            publisher.publish(sea, query.zoom);
        }
        Ok(())
    }

    fn read_route_data_as_map_objects(
        &self,
        file: &Arc<MapFile>,
        query: &mut SearchQuery,
        publisher: &mut ResultPublisher,
    ) -> Result<()> {
        let base = query.zoom <= ZOOM_FOR_BASE_ROUTE_RENDERING;
        for index in &file.routing_indexes {
            if query.is_cancelled() {
                return Ok(());
            }
            if !index.intersects(&query.bbox, base) {
                continue;
            }
            let rules = index.rules(file.data())?;
            let subs = index.search_subregions(file.data(), &query.bbox, base)?;
            for sub in &subs {
                if query.is_cancelled() {
                    return Ok(());
                }
                for road in index.load_subregion_data(file.data(), sub)? {
                    publisher.publish(route_to_map_object(&road, rules), query.zoom);
                }
            }
        }
        Ok(())
    }

    /// Find routing leaves intersecting the query box across the open
    /// files. `basemap` selects the wide-area tree; `filter` restricts
    /// the search to the given files.
    pub fn search_route_subregions(
        &self,
        query: &SearchQuery,
        basemap: bool,
        filter: Option<&[Arc<MapFile>]>,
    ) -> Result<Vec<FoundSubregion>> {
        let mut found = Vec::new();
        for file in self.files() {
            if query.is_cancelled() {
                break;
            }
            if let Some(filter) = filter {
                // live-update files bypass the filter, they overlay others
                let is_live_update = file.hh_indexes.is_empty();
                if !is_live_update && !filter.iter().any(|f| Arc::ptr_eq(f, &file)) {
                    continue;
                }
            }
            for (i, index) in file.routing_indexes.iter().enumerate() {
                if !index.intersects(&query.bbox, basemap) {
                    continue;
                }
                for subregion in index.search_subregions(file.data(), &query.bbox, basemap)? {
                    found.push(FoundSubregion {
                        file: file.clone(),
                        routing_index: i,
                        subregion,
                    });
                }
            }
        }
        Ok(found)
    }

    /// Materialize the road objects of one previously found leaf.
    pub fn search_route_data_for_subregion(
        &self,
        found: &FoundSubregion,
    ) -> Result<Vec<RouteDataObject>> {
        let index = &found.file.routing_indexes[found.routing_index];
        index.load_subregion_data(found.file.data(), &found.subregion)
    }
}

/// Project a road into a renderable map object: transport-network tags
/// become primary types, everything else additional.
fn route_to_map_object(road: &RouteDataObject, rules: &RouteRuleTable) -> MapObject {
    let mut obj = MapObject { id: road.id, ..Default::default() };
    for &t in &road.types {
        if let Some(r) = rules.get(t) {
            let pair = (r.tag.clone(), r.value.clone());
            match r.tag.as_str() {
                "highway" | "route" | "railway" | "aeroway" | "aerialway" => obj.types.push(pair),
                _ => obj.additional_types.push(pair),
            }
        }
    }
    obj.points =
        road.points_x.iter().copied().zip(road.points_y.iter().copied()).collect();
    for (&rule_id, value) in &road.names {
        if let Some(r) = rules.get(rule_id) {
            obj.names.push((r.tag.clone(), value.clone()));
        }
    }
    obj
}

static REGISTRY: Lazy<FileRegistry> = Lazy::new(FileRegistry::new);

/// The process-wide registry behind the legacy entry points.
pub fn default_registry() -> &'static FileRegistry {
    &REGISTRY
}

/// Open a map file in the process-wide registry. A file that fails to
/// open is logged and omitted; the application keeps running.
pub fn init_binary_map_file(
    path: impl AsRef<Path>,
    use_live: bool,
    routing_only: bool,
) -> Option<Arc<MapFile>> {
    match REGISTRY.open_file(path.as_ref(), use_live, routing_only) {
        Ok(file) => Some(file),
        Err(err) => {
            error!(path = %path.as_ref().display(), %err, "map file not initialized");
            None
        }
    }
}

/// Close a file in the process-wide registry.
pub fn close_binary_map_file(path: impl AsRef<Path>) -> bool {
    REGISTRY.close_file(path)
}

/// Load the cache manifest into the process-wide registry.
pub fn init_map_files_from_cache(path: impl AsRef<Path>) -> bool {
    REGISTRY.load_cache(path)
}

/// Persist the process-wide registry's cache manifest if it changed.
pub fn write_map_files_cache(path: impl AsRef<Path>) -> bool {
    REGISTRY.write_cache(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::RouteRuleTable;

    #[test]
    fn route_objects_project_to_map_objects() {
        let mut rules = RouteRuleTable::default();
        rules.init_rule(1, "highway".into(), "primary".into());
        rules.init_rule(2, "maxspeed".into(), "50".into());
        rules.init_rule(3, "name".into(), String::new());

        let mut road = RouteDataObject {
            id: 77,
            types: vec![1, 2],
            points_x: vec![10, 20],
            points_y: vec![30, 40],
            ..Default::default()
        };
        road.names.insert(3, "Rue Haute".into());

        let obj = route_to_map_object(&road, &rules);
        assert_eq!(obj.id, 77);
        assert_eq!(obj.types, vec![("highway".into(), "primary".into())]);
        assert_eq!(obj.additional_types, vec![("maxspeed".into(), "50".into())]);
        assert_eq!(obj.points, vec![(10, 30), (20, 40)]);
        assert_eq!(obj.name("name"), Some("Rue Haute"));
    }

    #[test]
    fn registry_starts_empty_and_close_is_idempotent() {
        let registry = FileRegistry::new();
        assert!(registry.files().is_empty());
        assert!(!registry.close_file("/nonexistent.obf"));
    }
}
