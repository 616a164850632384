//! Map-rendering index
//!
//! A map index holds an encoding-rule table and one or more zoom levels,
//! each with its own R-tree of data boxes. Box edges are stored as signed
//! deltas against the parent box; geometry inside a data block is stored
//! as signed deltas against the previous vertex with the low
//! [`SHIFT_COORDINATES`](crate::geo::SHIFT_COORDINATES) bits dropped.
//!
//! The container scan records only level headers. Rules and root boxes
//! are read on the first query that needs them.

use butterfly_common::{Error, Result};
use once_cell::sync::OnceCell;
use tracing::warn;

use crate::geo::{Bbox31, SHIFT_COORDINATES};
use crate::query::{MapObject, Publisher, SearchQuery};
use crate::rules::MapRuleTable;
use crate::strings::read_string_table;
use crate::wire::{Codec, Tag};

// OsmAndMapIndex
pub const IDX_NAME: u32 = 2;
pub const IDX_RULES: u32 = 4;
pub const IDX_LEVELS: u32 = 5;

// MapEncodingRule
pub const RULE_TAG: u32 = 3;
pub const RULE_VALUE: u32 = 5;
pub const RULE_ID: u32 = 7;
pub const RULE_TYPE: u32 = 10;

// MapRootLevel
pub const LEVEL_MAX_ZOOM: u32 = 1;
pub const LEVEL_MIN_ZOOM: u32 = 2;
pub const LEVEL_LEFT: u32 = 3;
pub const LEVEL_RIGHT: u32 = 4;
pub const LEVEL_TOP: u32 = 5;
pub const LEVEL_BOTTOM: u32 = 6;
pub const LEVEL_BOXES: u32 = 7;
pub const LEVEL_BLOCKS: u32 = 15;

// MapDataBox
pub const BOX_LEFT: u32 = 1;
pub const BOX_RIGHT: u32 = 2;
pub const BOX_TOP: u32 = 3;
pub const BOX_BOTTOM: u32 = 4;
pub const BOX_SHIFT_TO_DATA: u32 = 5;
pub const BOX_OCEAN: u32 = 6;
pub const BOX_BOXES: u32 = 7;

// MapDataBlock
pub const BLOCK_BASE_ID: u32 = 10;
pub const BLOCK_DATA_OBJECTS: u32 = 12;
pub const BLOCK_STRING_TABLE: u32 = 15;

// MapData
pub const DATA_COORDINATES: u32 = 1;
pub const DATA_AREA_COORDINATES: u32 = 2;
pub const DATA_POLYGON_INNER: u32 = 4;
pub const DATA_ADDITIONAL_TYPES: u32 = 6;
pub const DATA_TYPES: u32 = 7;
pub const DATA_STRING_NAMES: u32 = 10;
pub const DATA_ID: u32 = 12;
pub const DATA_LABEL: u32 = 16;

/// Boxes nested deeper than this mean a damaged file, not a deep tree.
pub const MAX_TREE_DEPTH: u32 = 32;

pub const COORD_MASK: u32 = !((1 << SHIFT_COORDINATES) - 1);

/// One map index section.
#[derive(Debug, Default)]
pub struct MapIndex {
    pub name: String,
    pub offset: usize,
    pub length: usize,
    pub levels: Vec<MapRoot>,
    rules: OnceCell<MapRuleTable>,
}

/// One zoom level of a map index.
#[derive(Debug, Default)]
pub struct MapRoot {
    pub min_zoom: u32,
    pub max_zoom: u32,
    pub bbox: Bbox31,
    pub offset: usize,
    pub length: usize,
    bounds: OnceCell<Vec<MapTreeBounds>>,
}

/// An R-tree node of a map level.
#[derive(Debug, Clone, Default)]
pub struct MapTreeBounds {
    pub bbox: Bbox31,
    pub offset: usize,
    pub length: usize,
    /// Absolute offset of the leaf's data block, 0 for interior nodes.
    pub map_data_block: usize,
    pub ocean: Option<bool>,
}

fn add_delta(base: u32, delta: i32) -> u32 {
    (i64::from(base) + i64::from(delta)) as u32
}

impl MapIndex {
    /// Shallow read at open time: name and level headers; rules deferred.
    pub fn read_header(data: &[u8], offset: usize, length: usize) -> Result<MapIndex> {
        let mut index = MapIndex { offset, length, ..Default::default() };
        let mut codec = Codec::at(data, offset);
        let old = codec.push_limit(length)?;
        loop {
            match codec.read_tag()? {
                Tag::End => break,
                Tag::Field { number: IDX_NAME, .. } => index.name = codec.read_string()?,
                Tag::Field { number: IDX_LEVELS, .. } => {
                    let len = codec.read_fixed32_be()? as usize;
                    let level_offset = codec.position();
                    let inner = codec.push_limit(len)?;
                    let mut level = MapRoot {
                        offset: level_offset,
                        length: len,
                        ..Default::default()
                    };
                    level.read_fields(&mut codec, false)?;
                    codec.pop_limit(inner);
                    codec.seek(level_offset + len)?;
                    index.levels.push(level);
                }
                Tag::Field { wire, .. } => codec.skip_field(wire)?,
            }
        }
        codec.pop_limit(old);
        Ok(index)
    }

    /// Hydrated entry from the cache manifest: headers only, no file reads.
    pub fn from_parts(name: String, offset: usize, length: usize, levels: Vec<MapRoot>) -> MapIndex {
        MapIndex { name, offset, length, levels, rules: OnceCell::new() }
    }

    /// The encoding-rule table, read from the file on first use.
    pub fn rules(&self, data: &[u8]) -> Result<&MapRuleTable> {
        self.rules.get_or_try_init(|| {
            let mut table = MapRuleTable::default();
            let mut codec = Codec::at(data, self.offset);
            let old = codec.push_limit(self.length)?;
            let mut default_id = 1u32;
            loop {
                match codec.read_tag()? {
                    Tag::End => break,
                    Tag::Field { number: IDX_RULES, .. } => {
                        let len = codec.read_varint32()? as usize;
                        let inner = codec.push_limit(len)?;
                        read_map_encoding_rule(&mut codec, &mut table, default_id)?;
                        default_id += 1;
                        codec.pop_limit(inner);
                    }
                    Tag::Field { number: IDX_LEVELS, wire } => codec.skip_field(wire)?,
                    Tag::Field { wire, .. } => codec.skip_field(wire)?,
                }
            }
            codec.pop_limit(old);
            table.finish();
            Ok(table)
        })
    }

    /// Search one level against the query, publishing matching objects.
    pub fn search_level(
        &self,
        data: &[u8],
        level: &MapRoot,
        query: &mut SearchQuery,
        publisher: &mut dyn Publisher,
    ) -> Result<()> {
        let rules = self.rules(data)?;
        let bounds = level.bounds(data)?;

        let mut found: Vec<MapTreeBounds> = Vec::new();
        for root_box in bounds {
            if query.is_cancelled() {
                return Ok(());
            }
            if !root_box.bbox.intersects(&query.bbox) {
                continue;
            }
            let mut codec = Codec::at(data, root_box.offset);
            let old = codec.push_limit(root_box.length)?;
            let mut node = root_box.clone();
            search_tree_bounds(&mut codec, &mut node, &level.bbox, query, &mut found, 0)?;
            codec.pop_limit(old);
        }

        // sequential file access: leaves in ascending data-block order
        found.sort_by_key(|t| t.map_data_block);

        for tree in &found {
            if query.is_cancelled() {
                return Ok(());
            }
            let mut codec = Codec::at(data, tree.map_data_block);
            let length = codec.read_varint32()? as usize;
            let old = codec.push_limit(length)?;
            read_map_data_blocks(&mut codec, tree, rules, query, publisher)?;
            codec.pop_limit(old);
        }
        Ok(())
    }
}

impl MapRoot {
    /// Hydrated entry from the cache manifest.
    pub fn from_parts(
        offset: usize,
        length: usize,
        bbox: Bbox31,
        min_zoom: u32,
        max_zoom: u32,
    ) -> MapRoot {
        MapRoot { min_zoom, max_zoom, bbox, offset, length, bounds: OnceCell::new() }
    }

    pub fn zoom_covers(&self, zoom: u32) -> bool {
        self.min_zoom <= zoom && zoom <= self.max_zoom
    }

    fn read_fields(&mut self, codec: &mut Codec<'_>, init_subtrees: bool) -> Result<()> {
        let mut boxes = Vec::new();
        loop {
            match codec.read_tag()? {
                Tag::End => break,
                Tag::Field { number: LEVEL_MAX_ZOOM, .. } => {
                    self.max_zoom = codec.read_varint32()?;
                }
                Tag::Field { number: LEVEL_MIN_ZOOM, .. } => {
                    self.min_zoom = codec.read_varint32()?;
                }
                Tag::Field { number: LEVEL_LEFT, .. } => {
                    self.bbox.left = codec.read_int32()? as u32;
                }
                Tag::Field { number: LEVEL_RIGHT, .. } => {
                    self.bbox.right = codec.read_int32()? as u32;
                }
                Tag::Field { number: LEVEL_TOP, .. } => {
                    self.bbox.top = codec.read_int32()? as u32;
                }
                Tag::Field { number: LEVEL_BOTTOM, .. } => {
                    self.bbox.bottom = codec.read_int32()? as u32;
                }
                Tag::Field { number: LEVEL_BOXES, .. } => {
                    if !init_subtrees {
                        let rest = codec.bytes_until_limit();
                        codec.skip(rest)?;
                        continue;
                    }
                    let len = codec.read_fixed32_be()? as usize;
                    let box_offset = codec.position();
                    let inner = codec.push_limit(len)?;
                    let mut bounds = MapTreeBounds {
                        offset: box_offset,
                        length: len,
                        ..Default::default()
                    };
                    bounds.read_bounds_only(&mut *codec, &self.bbox)?;
                    codec.pop_limit(inner);
                    codec.seek(box_offset + len)?;
                    boxes.push(bounds);
                }
                Tag::Field { number: LEVEL_BLOCKS, .. } => {
                    let rest = codec.bytes_until_limit();
                    codec.skip(rest)?;
                }
                Tag::Field { wire, .. } => codec.skip_field(wire)?,
            }
        }
        if init_subtrees {
            let _ = self.bounds.set(boxes);
        }
        Ok(())
    }

    /// Root R-tree boxes, read from the file on first query.
    pub fn bounds(&self, data: &[u8]) -> Result<&Vec<MapTreeBounds>> {
        self.bounds.get_or_try_init(|| {
            let mut codec = Codec::at(data, self.offset);
            let old = codec.push_limit(self.length)?;
            let mut scratch = MapRoot {
                offset: self.offset,
                length: self.length,
                bbox: self.bbox,
                ..Default::default()
            };
            scratch.read_fields(&mut codec, true)?;
            codec.pop_limit(old);
            Ok(scratch.bounds.take().unwrap_or_default())
        })
    }
}

impl MapTreeBounds {
    /// Read only this node's delta edges against `parent`; children and
    /// data pointers are left for the query descent.
    fn read_bounds_only(&mut self, codec: &mut Codec<'_>, parent: &Bbox31) -> Result<()> {
        let mut init = 0u8;
        loop {
            match codec.read_tag()? {
                Tag::End => break,
                Tag::Field { number: BOX_LEFT, .. } => {
                    self.bbox.left = add_delta(parent.left, codec.read_sint32()?);
                    init |= 1;
                }
                Tag::Field { number: BOX_RIGHT, .. } => {
                    self.bbox.right = add_delta(parent.right, codec.read_sint32()?);
                    init |= 2;
                }
                Tag::Field { number: BOX_TOP, .. } => {
                    self.bbox.top = add_delta(parent.top, codec.read_sint32()?);
                    init |= 4;
                }
                Tag::Field { number: BOX_BOTTOM, .. } => {
                    self.bbox.bottom = add_delta(parent.bottom, codec.read_sint32()?);
                    init |= 8;
                }
                Tag::Field { wire, .. } => codec.skip_field(wire)?,
            }
            if init == 0xf {
                break;
            }
        }
        Ok(())
    }
}

fn read_map_encoding_rule(
    codec: &mut Codec<'_>,
    table: &mut MapRuleTable,
    default_id: u32,
) -> Result<()> {
    let mut id = default_id;
    let mut tag = String::new();
    let mut value = String::new();
    let mut kind = 0u32;
    loop {
        match codec.read_tag()? {
            Tag::End => break,
            Tag::Field { number: RULE_TAG, .. } => tag = codec.read_string()?,
            Tag::Field { number: RULE_VALUE, .. } => value = codec.read_string()?,
            Tag::Field { number: RULE_ID, .. } => id = codec.read_varint32()?,
            Tag::Field { number: RULE_TYPE, .. } => kind = codec.read_varint32()?,
            Tag::Field { wire, .. } => codec.skip_field(wire)?,
        }
    }
    table.init_rule(id, kind, tag, value);
    Ok(())
}

/// Pre-order descent. Leaves carrying a data pointer are copied into
/// `found`; interior children are visited in place and never cached.
fn search_tree_bounds(
    codec: &mut Codec<'_>,
    current: &mut MapTreeBounds,
    parent: &Bbox31,
    query: &mut SearchQuery,
    found: &mut Vec<MapTreeBounds>,
    depth: u32,
) -> Result<()> {
    if depth > MAX_TREE_DEPTH {
        return Err(Error::corrupt("map tree deeper than the format allows"));
    }
    query.stats.read_subtrees += 1;
    let mut init = 0u8;
    let mut ocean: Option<bool> = None;
    loop {
        if query.is_cancelled() {
            return Ok(());
        }
        if init == 0xf {
            init = 0;
            if !current.bbox.intersects(&query.bbox) {
                return Ok(());
            }
            query.stats.accepted_subtrees += 1;
        }
        match codec.read_tag()? {
            Tag::End => break,
            Tag::Field { number: BOX_LEFT, .. } => {
                current.bbox.left = add_delta(parent.left, codec.read_sint32()?);
                init |= 1;
            }
            Tag::Field { number: BOX_RIGHT, .. } => {
                current.bbox.right = add_delta(parent.right, codec.read_sint32()?);
                init |= 2;
            }
            Tag::Field { number: BOX_TOP, .. } => {
                current.bbox.top = add_delta(parent.top, codec.read_sint32()?);
                init |= 4;
            }
            Tag::Field { number: BOX_BOTTOM, .. } => {
                current.bbox.bottom = add_delta(parent.bottom, codec.read_sint32()?);
                init |= 8;
            }
            Tag::Field { number: BOX_SHIFT_TO_DATA, .. } => {
                let shift = codec.read_fixed32_be()? as usize;
                current.map_data_block = current.offset + shift;
                found.push(current.clone());
            }
            Tag::Field { number: BOX_OCEAN, .. } => {
                ocean = Some(codec.read_bool()?);
            }
            Tag::Field { number: BOX_BOXES, .. } => {
                // land/sea information applies only to childless leaves
                ocean = None;
                let len = codec.read_fixed32_be()? as usize;
                let child_offset = codec.position();
                let inner = codec.push_limit(len)?;
                let mut child = MapTreeBounds {
                    offset: child_offset,
                    length: len,
                    ..Default::default()
                };
                let parent_bbox = current.bbox;
                search_tree_bounds(codec, &mut child, &parent_bbox, query, found, depth + 1)?;
                codec.pop_limit(inner);
                codec.seek(child_offset + len)?;
            }
            Tag::Field { wire, .. } => codec.skip_field(wire)?,
        }
    }
    if let Some(sea) = ocean {
        if current.bbox.intersects(&query.ocean_bbox) {
            query.stats.ocean_tiles += 1;
            if sea {
                query.stats.ocean += 1;
            }
        }
    }
    Ok(())
}

/// An object decoded from a block, waiting for the block string table.
struct PendingObject {
    object: MapObject,
    /// `(rule tag, string id)` pairs in file order.
    string_ids: Vec<(String, u32)>,
}

fn read_map_data_blocks(
    codec: &mut Codec<'_>,
    tree: &MapTreeBounds,
    rules: &MapRuleTable,
    query: &mut SearchQuery,
    publisher: &mut dyn Publisher,
) -> Result<()> {
    let mut base_id: u64 = 0;
    let mut pending: Vec<PendingObject> = Vec::new();
    let mut table: Option<Vec<String>> = None;
    loop {
        if query.is_cancelled() {
            return Ok(());
        }
        match codec.read_tag()? {
            Tag::End => break,
            Tag::Field { number: BLOCK_BASE_ID, .. } => {
                base_id = codec.read_varint64()?;
            }
            Tag::Field { number: BLOCK_DATA_OBJECTS, .. } => {
                let len = codec.read_varint32()? as usize;
                let inner = codec.push_limit(len)?;
                if let Some(mut obj) = read_map_data_object(codec, tree, rules, query)? {
                    obj.object.id += base_id as i64;
                    pending.push(obj);
                }
                let rest = codec.bytes_until_limit();
                codec.skip(rest)?;
                codec.pop_limit(inner);
            }
            Tag::Field { number: BLOCK_STRING_TABLE, .. } => {
                let len = codec.read_varint32()? as usize;
                let inner = codec.push_limit(len)?;
                if !pending.is_empty() {
                    table = Some(read_string_table(codec)?);
                }
                let rest = codec.bytes_until_limit();
                codec.skip(rest)?;
                codec.pop_limit(inner);
            }
            Tag::Field { wire, .. } => codec.skip_field(wire)?,
        }
    }

    let table = table.unwrap_or_default();
    for mut p in pending {
        for (tag, sid) in p.string_ids.drain(..) {
            match table.get(sid as usize) {
                Some(s) => p.object.names.push((tag, s.clone())),
                None => warn!(id = sid, "name string id outside block table"),
            }
        }
        query.stats.accepted_objects += 1;
        publisher.publish(p.object, query.zoom);
    }
    Ok(())
}

/// Decode one object, dropping it early when its geometry cannot touch
/// the query box.
fn read_map_data_object(
    codec: &mut Codec<'_>,
    tree: &MapTreeBounds,
    rules: &MapRuleTable,
    query: &mut SearchQuery,
) -> Result<Option<PendingObject>> {
    let area = match codec.read_tag()? {
        Tag::Field { number: DATA_COORDINATES, .. } => false,
        Tag::Field { number: DATA_AREA_COORDINATES, .. } => true,
        _ => return Ok(None),
    };
    query.stats.visited_objects += 1;

    let size = codec.read_varint32()? as usize;
    let inner = codec.push_limit(size)?;
    let mut px = tree.bbox.left & COORD_MASK;
    let mut py = tree.bbox.top & COORD_MASK;
    let mut contains = false;
    let mut min_x = u32::MAX;
    let mut max_x = 0u32;
    let mut min_y = u32::MAX;
    let mut max_y = 0u32;
    let mut points = Vec::new();
    while codec.bytes_until_limit() > 0 {
        let dx = codec.read_sint32()?;
        let dy = codec.read_sint32()?;
        let x = add_delta(px, dx << SHIFT_COORDINATES);
        let y = add_delta(py, dy << SHIFT_COORDINATES);
        points.push((x, y));
        px = x;
        py = y;
        if !contains && query.bbox.contains_point(x, y) {
            contains = true;
        }
        if !contains {
            min_x = min_x.min(x);
            max_x = max_x.max(x);
            min_y = min_y.min(y);
            max_y = max_y.max(y);
        }
    }
    codec.pop_limit(inner);
    if !contains {
        let mbr = Bbox31::new(min_x, max_x, min_y, max_y);
        if points.is_empty() || !mbr.intersects(&query.bbox) {
            return Ok(None);
        }
    }

    let mut object = MapObject { area, points, ..Default::default() };
    let mut string_ids = Vec::new();
    loop {
        match codec.read_tag()? {
            Tag::End => break,
            Tag::Field { number: DATA_POLYGON_INNER, .. } => {
                let size = codec.read_varint32()? as usize;
                let inner = codec.push_limit(size)?;
                let mut ring = Vec::new();
                let mut px = tree.bbox.left & COORD_MASK;
                let mut py = tree.bbox.top & COORD_MASK;
                while codec.bytes_until_limit() > 0 {
                    let dx = codec.read_sint32()?;
                    let dy = codec.read_sint32()?;
                    let x = add_delta(px, dx << SHIFT_COORDINATES);
                    let y = add_delta(py, dy << SHIFT_COORDINATES);
                    ring.push((x, y));
                    px = x;
                    py = y;
                }
                codec.pop_limit(inner);
                object.inner_rings.push(ring);
            }
            Tag::Field { number: DATA_ADDITIONAL_TYPES, .. } => {
                let size = codec.read_varint32()? as usize;
                let inner = codec.push_limit(size)?;
                while codec.bytes_until_limit() > 0 {
                    let id = codec.read_varint32()?;
                    match rules.decode(id) {
                        Some(rule) => object
                            .additional_types
                            .push((rule.tag.clone(), rule.value.clone())),
                        None => warn!(id, "additional type id outside rule table"),
                    }
                }
                codec.pop_limit(inner);
            }
            Tag::Field { number: DATA_TYPES, .. } => {
                let size = codec.read_varint32()? as usize;
                let inner = codec.push_limit(size)?;
                while codec.bytes_until_limit() > 0 {
                    let id = codec.read_varint32()?;
                    match rules.decode(id) {
                        Some(rule) => object.types.push((rule.tag.clone(), rule.value.clone())),
                        None => warn!(id, "type id outside rule table"),
                    }
                }
                codec.pop_limit(inner);
            }
            Tag::Field { number: DATA_ID, .. } => {
                object.id = codec.read_sint64()?;
            }
            Tag::Field { number: DATA_STRING_NAMES, .. } => {
                let size = codec.read_varint32()? as usize;
                let inner = codec.push_limit(size)?;
                while codec.bytes_until_limit() > 0 {
                    let rule_id = codec.read_varint32()?;
                    let string_id = codec.read_varint32()?;
                    match rules.decode(rule_id) {
                        Some(rule) => string_ids.push((rule.tag.clone(), string_id)),
                        None => warn!(id = rule_id, "name rule id outside table"),
                    }
                }
                codec.pop_limit(inner);
            }
            Tag::Field { number: DATA_LABEL, .. } => {
                let size = codec.read_varint32()? as usize;
                let inner = codec.push_limit(size)?;
                let mut lx = 0i32;
                let mut ly = 0i32;
                let mut i = 0;
                while codec.bytes_until_limit() > 0 {
                    match i {
                        0 => lx = codec.read_sint32()?,
                        1 => ly = codec.read_sint32()?,
                        _ => {
                            codec.read_varint32()?;
                        }
                    }
                    i += 1;
                }
                codec.pop_limit(inner);
                object.label = Some((lx as u32, ly as u32));
            }
            Tag::Field { wire, .. } => codec.skip_field(wire)?,
        }
    }
    Ok(Some(PendingObject { object, string_ids }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ResultPublisher;
    use crate::wire::{Writer, WireType};

    fn encode_geometry(points: &[(u32, u32)], base: (u32, u32)) -> Writer {
        let mut w = Writer::new();
        let mut px = base.0 & COORD_MASK;
        let mut py = base.1 & COORD_MASK;
        for &(x, y) in points {
            w.write_sint32(((x as i64 - px as i64) >> SHIFT_COORDINATES) as i32);
            w.write_sint32(((y as i64 - py as i64) >> SHIFT_COORDINATES) as i32);
            px = x;
            py = y;
        }
        w
    }

    fn data_object(points: &[(u32, u32)], base: (u32, u32), id: i64, type_ids: &[u32]) -> Writer {
        let mut w = Writer::new();
        let geom = encode_geometry(points, base);
        w.write_tag(DATA_COORDINATES, WireType::LengthDelimited);
        w.write_varint32(geom.len() as u32);
        w.write_raw(&geom.into_bytes());
        let mut types = Writer::new();
        for &t in type_ids {
            types.write_varint32(t);
        }
        w.write_message_field(DATA_TYPES, &types);
        w.write_tag(DATA_ID, WireType::Varint);
        w.write_sint64(id);
        w
    }

    fn rule_table() -> MapRuleTable {
        let mut t = MapRuleTable::default();
        t.init_rule(1, 0, "highway".into(), "residential".into());
        t.init_rule(2, 0, "building".into(), "yes".into());
        t.finish();
        t
    }

    #[test]
    fn object_inside_query_is_decoded() {
        // coordinates are multiples of 32 so the shift is lossless
        let tree = MapTreeBounds {
            bbox: Bbox31::new(1000 * 32, 2000 * 32, 1000 * 32, 2000 * 32),
            ..Default::default()
        };
        let points = [(1100 * 32, 1100 * 32), (1200 * 32, 1150 * 32)];
        let obj = data_object(&points, (tree.bbox.left, tree.bbox.top), 7, &[1]);
        let bytes = obj.into_bytes();

        let mut q = SearchQuery::new(Bbox31::new(0, u32::MAX, 0, u32::MAX), 14);
        let mut c = Codec::new(&bytes);
        let decoded = read_map_data_object(&mut c, &tree, &rule_table(), &mut q)
            .unwrap()
            .expect("object kept");
        assert_eq!(decoded.object.points, points);
        assert_eq!(decoded.object.types, vec![("highway".into(), "residential".into())]);
        assert_eq!(decoded.object.id, 7);
        assert_eq!(q.stats.visited_objects, 1);
    }

    #[test]
    fn object_outside_query_is_dropped() {
        let tree = MapTreeBounds {
            bbox: Bbox31::new(1000 * 32, 2000 * 32, 1000 * 32, 2000 * 32),
            ..Default::default()
        };
        let points = [(1100 * 32, 1100 * 32), (1200 * 32, 1150 * 32)];
        let obj = data_object(&points, (tree.bbox.left, tree.bbox.top), 7, &[1]);
        let bytes = obj.into_bytes();

        // query box far away from the geometry
        let mut q = SearchQuery::new(Bbox31::new(0, 100, 0, 100), 14);
        let mut c = Codec::new(&bytes);
        assert!(read_map_data_object(&mut c, &tree, &rule_table(), &mut q)
            .unwrap()
            .is_none());
    }

    #[test]
    fn unknown_type_ids_do_not_abort() {
        let tree = MapTreeBounds {
            bbox: Bbox31::new(0, 4096, 0, 4096),
            ..Default::default()
        };
        let points = [(320, 320), (640, 640)];
        let obj = data_object(&points, (0, 0), 9, &[1, 99, 2]);
        let bytes = obj.into_bytes();

        let mut q = SearchQuery::new(Bbox31::new(0, 4096, 0, 4096), 14);
        let mut c = Codec::new(&bytes);
        let decoded = read_map_data_object(&mut c, &tree, &rule_table(), &mut q)
            .unwrap()
            .expect("object kept despite dangling id");
        assert_eq!(decoded.object.types.len(), 2);
    }

    #[test]
    fn block_reader_resolves_names_and_base_id() {
        let tree = MapTreeBounds {
            bbox: Bbox31::new(0, 4096, 0, 4096),
            ..Default::default()
        };
        let mut rules = rule_table();
        rules.init_rule(3, 1, "name".into(), String::new());
        rules.finish();

        let mut obj = data_object(&[(320, 320), (640, 640)], (0, 0), 4, &[1]);
        let mut names = Writer::new();
        names.write_varint32(3); // rule id (name)
        names.write_varint32(0); // string id
        obj.write_message_field(DATA_STRING_NAMES, &names);

        let mut block = Writer::new();
        block.write_varint_field(BLOCK_BASE_ID, 100);
        block.write_message_field(BLOCK_DATA_OBJECTS, &obj);
        let mut strings = Writer::new();
        strings.write_string_field(1, "Main St");
        block.write_message_field(BLOCK_STRING_TABLE, &strings);
        let bytes = block.into_bytes();

        let mut q = SearchQuery::new(Bbox31::new(0, 4096, 0, 4096), 14);
        let mut p = ResultPublisher::new();
        let mut c = Codec::new(&bytes);
        read_map_data_blocks(&mut c, &tree, &rules, &mut q, &mut p).unwrap();

        assert_eq!(p.results.len(), 1);
        assert_eq!(p.results[0].id, 104);
        assert_eq!(p.results[0].name("name"), Some("Main St"));
        assert_eq!(q.stats.accepted_objects, 1);
    }

    #[test]
    fn tree_descent_prunes_and_collects_in_offset_order() {
        // two leaves under one root; only one intersects the query
        let root_bbox = Bbox31::new(0, 1 << 20, 0, 1 << 20);

        fn leaf(parent: &Bbox31, bbox: Bbox31, shift: u32) -> Writer {
            let mut w = Writer::new();
            w.write_tag(BOX_LEFT, WireType::Varint);
            w.write_sint32(bbox.left as i32 - parent.left as i32);
            w.write_tag(BOX_RIGHT, WireType::Varint);
            w.write_sint32(bbox.right as i32 - parent.right as i32);
            w.write_tag(BOX_TOP, WireType::Varint);
            w.write_sint32(bbox.top as i32 - parent.top as i32);
            w.write_tag(BOX_BOTTOM, WireType::Varint);
            w.write_sint32(bbox.bottom as i32 - parent.bottom as i32);
            w.write_tag(BOX_SHIFT_TO_DATA, WireType::Fixed32);
            w.write_fixed32_be(shift);
            w
        }

        let near = leaf(&root_bbox, Bbox31::new(100, 200, 100, 200), 5000);
        let far = leaf(&root_bbox, Bbox31::new(900_000, 910_000, 900_000, 910_000), 1000);
        let mut root = Writer::new();
        root.write_seekable_field(BOX_BOXES, &near);
        root.write_seekable_field(BOX_BOXES, &far);
        let bytes = root.into_bytes();

        let mut q = SearchQuery::new(Bbox31::new(0, 500, 0, 500), 14);
        let mut found = Vec::new();
        let mut node = MapTreeBounds {
            bbox: root_bbox,
            offset: 0,
            length: bytes.len(),
            ..Default::default()
        };
        let mut c = Codec::new(&bytes);
        search_tree_bounds(&mut c, &mut node, &root_bbox, &mut q, &mut found, 0).unwrap();

        assert_eq!(found.len(), 1, "far leaf must be pruned");
        assert_eq!(found[0].bbox, Bbox31::new(100, 200, 100, 200));
        assert!(found[0].map_data_block > 0);
        assert_eq!(q.stats.read_subtrees, 1 + 2);
        // root + near leaf accepted, far leaf pruned
        assert_eq!(q.stats.accepted_subtrees, 1);
    }

    #[test]
    fn ocean_leaf_counted() {
        let root_bbox = Bbox31::new(0, 1000, 0, 1000);
        let mut w = Writer::new();
        w.write_tag(BOX_LEFT, WireType::Varint);
        w.write_sint32(0);
        w.write_tag(BOX_RIGHT, WireType::Varint);
        w.write_sint32(0);
        w.write_tag(BOX_TOP, WireType::Varint);
        w.write_sint32(0);
        w.write_tag(BOX_BOTTOM, WireType::Varint);
        w.write_sint32(0);
        w.write_varint_field(BOX_OCEAN, 1);
        let bytes = w.into_bytes();

        let mut q = SearchQuery::new(Bbox31::new(0, 1000, 0, 1000), 14);
        let mut found = Vec::new();
        let mut node = MapTreeBounds {
            bbox: root_bbox,
            offset: 0,
            length: bytes.len(),
            ..Default::default()
        };
        let mut c = Codec::new(&bytes);
        search_tree_bounds(&mut c, &mut node, &root_bbox, &mut q, &mut found, 0).unwrap();
        assert_eq!(q.stats.ocean_tiles, 1);
        assert_eq!(q.stats.ocean, 1);
    }
}
