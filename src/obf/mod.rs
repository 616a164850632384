//! OBF container
//!
//! An OBF file is a tagged top-level message holding co-located index
//! sections: map rendering, routing, transport and hierarchical routing.
//! Sections use the seekable framing (big-endian length) so the container
//! scan records offsets and shallow headers without touching data-bearing
//! bytes. The declared version is repeated at the tail; a missing or
//! different trailer means the file is damaged.

pub mod hh;
pub mod map;
pub mod routing;
pub mod transport;

use std::fs::File;
use std::path::{Path, PathBuf};

use butterfly_common::{Error, Result};
use memmap2::Mmap;
use once_cell::sync::OnceCell;
use rustc_hash::FxHashMap;
use tracing::{info, warn};

use crate::query::{Publisher, SearchQuery};
use hh::HHRouteIndex;
use map::MapIndex;
use routing::RoutingIndex;
use transport::{TransportIndex, TransportRoute, TransportStop};

/// The container version this build reads.
pub const MAP_VERSION: u32 = 2;

// OsmAndStructure
pub const F_VERSION: u32 = 1;
pub const F_TRANSPORT_INDEX: u32 = 4;
pub const F_MAP_INDEX: u32 = 6;
pub const F_ROUTING_INDEX: u32 = 9;
pub const F_HH_ROUTING_INDEX: u32 = 10;
pub const F_DATE_CREATED: u32 = 18;
pub const F_VERSION_CONFIRM: u32 = 32;

use crate::wire::{Codec, Tag};

/// One opened map file: the mapped bytes plus shallow headers of every
/// index inside it. Queries construct fresh cursors over the shared
/// mapping, so a `MapFile` can serve concurrent readers.
#[derive(Debug)]
pub struct MapFile {
    pub path: PathBuf,
    /// File name component, used for cache matching.
    pub name: String,
    pub size: u64,
    mmap: Mmap,
    pub version: u32,
    /// Creation timestamp, milliseconds since the epoch.
    pub date_created: u64,
    /// Coarse worldwide map.
    pub basemap: bool,
    /// Routing-only extract (`.road` files).
    pub road_only: bool,
    /// Incremental overlay (`live/` directory).
    pub live: bool,
    /// External overlay file.
    pub external: bool,
    pub map_indexes: Vec<MapIndex>,
    pub routing_indexes: Vec<RoutingIndex>,
    pub transport_indexes: Vec<TransportIndex>,
    pub hh_indexes: Vec<HHRouteIndex>,
    incomplete_transport: OnceCell<FxHashMap<u64, Vec<usize>>>,
}

struct ParsedStructure {
    version: u32,
    date_created: u64,
    basemap: bool,
    external: bool,
    map_indexes: Vec<MapIndex>,
    routing_indexes: Vec<RoutingIndex>,
    transport_indexes: Vec<TransportIndex>,
    hh_indexes: Vec<HHRouteIndex>,
}

impl MapFile {
    /// Open and scan a map file. `use_live` admits the routing indexes of
    /// live overlay files; `routing_only` skips map sections entirely.
    pub fn open(path: impl AsRef<Path>, use_live: bool, routing_only: bool) -> Result<MapFile> {
        let mut file = MapFile::open_shallow(path.as_ref())?;
        let parsed = parse_structure(&file.mmap, file.live, use_live, routing_only)?;
        file.version = parsed.version;
        file.date_created = parsed.date_created;
        file.basemap |= parsed.basemap;
        file.external |= parsed.external;
        file.map_indexes = parsed.map_indexes;
        file.routing_indexes = parsed.routing_indexes;
        file.transport_indexes = parsed.transport_indexes;
        file.hh_indexes = parsed.hh_indexes;
        info!(
            path = %file.path.display(),
            map = file.map_indexes.len(),
            routing = file.routing_indexes.len(),
            transport = file.transport_indexes.len(),
            hh = file.hh_indexes.len(),
            "map file opened"
        );
        Ok(file)
    }

    /// Map the file and derive the name-based flags, reading no bytes.
    /// Used by the cache-hydration path as well as the full scan.
    pub fn open_shallow(path: &Path) -> Result<MapFile> {
        let handle = File::open(path)?;
        let size = handle.metadata()?.len();
        // read-only mapping; the file must not change while open
        let mmap = unsafe { Mmap::map(&handle)? };
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let path_str = path.to_string_lossy();
        Ok(MapFile {
            name,
            size,
            mmap,
            version: 0,
            date_created: 0,
            basemap: false,
            road_only: path_str.contains(".road"),
            live: path_str.contains("live/"),
            external: path_str.contains("osmand_ext"),
            path: path.to_path_buf(),
            map_indexes: Vec::new(),
            routing_indexes: Vec::new(),
            transport_indexes: Vec::new(),
            hh_indexes: Vec::new(),
            incomplete_transport: OnceCell::new(),
        })
    }

    /// The mapped bytes. Index readers take this together with their
    /// stored offsets.
    pub fn data(&self) -> &[u8] {
        &self.mmap
    }

    /// Run a bbox + zoom query over every map level that covers the
    /// requested zoom, publishing matching objects.
    pub fn read_map_objects(
        &self,
        query: &mut SearchQuery,
        publisher: &mut dyn Publisher,
    ) -> Result<()> {
        for index in &self.map_indexes {
            for level in &index.levels {
                if query.is_cancelled() {
                    return Ok(());
                }
                if !level.zoom_covers(query.zoom) || !level.bbox.intersects(&query.bbox) {
                    continue;
                }
                index.search_level(self.data(), level, query, publisher)?;
            }
        }
        Ok(())
    }

    /// Search all transport indexes of this file. The query bbox is in
    /// zoom-24 coordinates.
    pub fn search_transport(&self, query: &mut SearchQuery) -> Result<Vec<TransportStop>> {
        let mut out = Vec::new();
        for index in &self.transport_indexes {
            out.extend(index.search(self.data(), query)?);
        }
        Ok(out)
    }

    /// The transport index owning an absolute file offset.
    pub fn transport_index_for_offset(&self, offset: usize) -> Option<&TransportIndex> {
        self.transport_indexes.iter().find(|i| i.contains_offset(offset))
    }

    /// Load transport routes by absolute offsets, grouped per owning
    /// index so each group shares one string-table read.
    pub fn load_transport_routes(
        &self,
        offsets: &[usize],
    ) -> Result<FxHashMap<usize, TransportRoute>> {
        let mut grouped: FxHashMap<usize, Vec<usize>> = FxHashMap::default();
        for &offset in offsets {
            match self.transport_indexes.iter().position(|i| i.contains_offset(offset)) {
                Some(idx) => grouped.entry(idx).or_default().push(offset),
                None => warn!(offset, "route offset outside every transport index"),
            }
        }
        let mut result = FxHashMap::default();
        for (idx, offsets) in grouped {
            result.extend(self.transport_indexes[idx].load_routes(self.data(), &offsets)?);
        }
        Ok(result)
    }

    /// Cross-file continuations of transport routes, read once per file.
    pub fn incomplete_transport_routes(&self) -> Result<&FxHashMap<u64, Vec<usize>>> {
        self.incomplete_transport.get_or_try_init(|| {
            let mut map: FxHashMap<u64, Vec<usize>> = FxHashMap::default();
            for index in &self.transport_indexes {
                for (id, offsets) in index.incomplete_routes(self.data())? {
                    map.entry(id).or_default().extend(offsets);
                }
            }
            Ok(map)
        })
    }
}

fn parse_structure(
    data: &[u8],
    live: bool,
    use_live: bool,
    routing_only: bool,
) -> Result<ParsedStructure> {
    let mut parsed = ParsedStructure {
        version: 0,
        date_created: 0,
        basemap: false,
        external: false,
        map_indexes: Vec::new(),
        routing_indexes: Vec::new(),
        transport_indexes: Vec::new(),
        hh_indexes: Vec::new(),
    };
    // sentinel: a file whose trailer is missing must fail the check below
    let mut version_confirm: u32 = u32::MAX - 1;

    let mut codec = Codec::new(data);
    loop {
        match codec.read_tag()? {
            Tag::End => break,
            Tag::Field { number: F_VERSION, .. } => {
                parsed.version = codec.read_varint32()?;
            }
            Tag::Field { number: F_DATE_CREATED, .. } => {
                parsed.date_created = codec.read_varint64()?;
            }
            Tag::Field { number: F_MAP_INDEX, .. } => {
                let len = codec.read_fixed32_be()? as usize;
                let offset = codec.position();
                if !routing_only {
                    let index = MapIndex::read_header(data, offset, len)?;
                    parsed.basemap |= index.name.contains("basemap");
                    parsed.external |= index.name.contains("osmand_ext");
                    parsed.map_indexes.push(index);
                }
                codec.seek(offset + len)?;
            }
            Tag::Field { number: F_ROUTING_INDEX, .. } => {
                let len = codec.read_fixed32_be()? as usize;
                let offset = codec.position();
                if !live || use_live {
                    parsed.routing_indexes.push(RoutingIndex::read_header(data, offset, len)?);
                }
                codec.seek(offset + len)?;
            }
            Tag::Field { number: F_TRANSPORT_INDEX, .. } => {
                let len = codec.read_fixed32_be()? as usize;
                let offset = codec.position();
                parsed.transport_indexes.push(TransportIndex::read_header(data, offset, len)?);
                codec.seek(offset + len)?;
            }
            Tag::Field { number: F_HH_ROUTING_INDEX, .. } => {
                let len = codec.read_fixed32_be()? as usize;
                let offset = codec.position();
                if !live || use_live {
                    parsed.hh_indexes.push(HHRouteIndex::read_header(data, offset, len)?);
                }
                codec.seek(offset + len)?;
            }
            Tag::Field { number: F_VERSION_CONFIRM, .. } => {
                version_confirm = codec.read_varint32()?;
            }
            Tag::Field { wire, .. } => codec.skip_field(wire)?,
        }
    }

    if parsed.version != version_confirm {
        return Err(Error::corrupt("file does not end with the version it starts with"));
    }
    if parsed.version != MAP_VERSION {
        return Err(Error::UnsupportedVersion(parsed.version));
    }
    Ok(parsed)
}
