//! Butterfly-OBF: reader for OBF binary map containers
//!
//! An OBF file packs several co-located indexes over one region:
//! - Map index: encoding rules + per-zoom R-trees of rendering objects
//! - Routing index: encoding rules + detailed/base R-trees of road blocks
//! - HH routing index: precomputed hierarchical-routing points + segments
//! - Transport index: stops R-tree, routes, schedules
//!
//! Everything is read lazily through offsets recorded at open time;
//! a persisted cache manifest makes re-opening O(1). Queries carry a
//! bounding box and zoom, descend the matching R-trees with delta-coded
//! coordinates, and publish materialized objects through a `Publisher`.
//!
//! Key principle: the file is mapped once and never locked; every query
//! walks its own cursor over the shared bytes.

pub mod cache;
pub mod geo;
pub mod obf;
pub mod query;
pub mod registry;
pub mod rules;
pub mod strings;
pub mod wire;

pub use butterfly_common::{Error, Result};

pub use geo::Bbox31;
pub use obf::{MapFile, MAP_VERSION};
pub use query::{MapObject, Publisher, ResultPublisher, SearchQuery};
pub use registry::{
    close_binary_map_file, default_registry, init_binary_map_file, init_map_files_from_cache,
    write_map_files_cache, FileRegistry, FoundSubregion,
};
pub use rules::TimeOfWeek;
