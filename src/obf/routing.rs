//! Routing index
//!
//! A routing index carries its encoding-rule table and two R-trees of
//! subregions: one for detailed zooms and a "base" one for wide-area
//! queries. Subregion children are expanded one level at a time on first
//! touch and kept in memory for later queries; leaves point at
//! `RouteDataBlock`s holding the road objects.

use std::sync::Mutex;

use butterfly_common::{Error, Result};
use once_cell::sync::OnceCell;
use rustc_hash::FxHashMap;
use tracing::{error, warn};

use crate::geo::{self, Bbox31, ROUTE_SHIFT_COORDINATES};
use crate::rules::{RouteRuleTable, TimeOfWeek};
use crate::strings::read_string_table;
use crate::wire::{Codec, Tag};

// OsmAndRoutingIndex
pub const IDX_NAME: u32 = 1;
pub const IDX_RULES: u32 = 2;
pub const IDX_ROOT_BOXES: u32 = 3;
pub const IDX_BASEMAP_BOXES: u32 = 4;
pub const IDX_BLOCKS: u32 = 5;

// RouteEncodingRule
pub const RULE_TAG: u32 = 3;
pub const RULE_VALUE: u32 = 5;
pub const RULE_ID: u32 = 7;

// RouteDataBox
pub const BOX_LEFT: u32 = 1;
pub const BOX_RIGHT: u32 = 2;
pub const BOX_TOP: u32 = 3;
pub const BOX_BOTTOM: u32 = 4;
pub const BOX_SHIFT_TO_DATA: u32 = 5;
pub const BOX_BOXES: u32 = 7;

// RouteDataBlock
pub const BLOCK_ID_TABLE: u32 = 5;
pub const BLOCK_DATA_OBJECTS: u32 = 6;
pub const BLOCK_RESTRICTIONS: u32 = 7;
pub const BLOCK_STRING_TABLE: u32 = 8;

// RouteData
pub const DATA_POINTS: u32 = 1;
pub const DATA_POINT_TYPES: u32 = 4;
pub const DATA_POINT_NAMES: u32 = 5;
pub const DATA_TYPES: u32 = 7;
pub const DATA_ROUTE_ID: u32 = 12;
pub const DATA_STRING_NAMES: u32 = 14;

// IdTable
pub const ID_TABLE_ROUTE_ID: u32 = 1;

// RestrictionData
pub const RESTRICTION_FROM: u32 = 1;
pub const RESTRICTION_TO: u32 = 2;
pub const RESTRICTION_VIA: u32 = 3;
pub const RESTRICTION_TYPE: u32 = 4;

pub const MAX_TREE_DEPTH: u32 = 32;

pub const HEIGHT_UNDEFINED: f64 = -100_000.0;

/// One routing index section.
#[derive(Debug, Default)]
pub struct RoutingIndex {
    pub name: String,
    pub offset: usize,
    pub length: usize,
    rules: OnceCell<RouteRuleTable>,
    /// Detailed-zoom R-tree roots. Children grow in place as queries
    /// expand them, hence the lock.
    subregions: Mutex<Vec<RouteSubregion>>,
    /// Wide-area ("base") R-tree roots.
    base_subregions: Mutex<Vec<RouteSubregion>>,
}

/// An R-tree node of a routing index.
#[derive(Debug, Clone, Default)]
pub struct RouteSubregion {
    pub bbox: Bbox31,
    pub offset: usize,
    pub length: usize,
    /// Offset of the leaf's data block relative to `offset`; 0 for
    /// interior nodes.
    pub shift_to_data: u32,
    pub subregions: Vec<RouteSubregion>,
}

impl RouteSubregion {
    /// Absolute file offset of the referenced data block.
    pub fn data_block_offset(&self) -> usize {
        self.offset + self.shift_to_data as usize
    }
}

/// A road restriction, finalized against the block id table.
#[derive(Debug, Clone, Default)]
pub struct RestrictionInfo {
    pub to: i64,
    pub via: i64,
    pub kind: u32,
}

/// A road as stored in a routing data block.
#[derive(Debug, Clone, Default)]
pub struct RouteDataObject {
    pub id: i64,
    pub types: Vec<u32>,
    pub points_x: Vec<u32>,
    pub points_y: Vec<u32>,
    pub restrictions: Vec<RestrictionInfo>,
    /// Per-vertex type bags.
    pub point_types: Vec<Vec<u32>>,
    pub point_name_types: Vec<Vec<u32>>,
    pub point_names: Vec<Vec<String>>,
    /// Raw string ids per vertex, consumed when the block table resolves.
    pub(crate) point_name_ids_raw: Vec<Vec<u32>>,
    /// `(rule id, string id)` pairs as stored; names resolve on finalize.
    pub names_ids: Vec<(u32, u32)>,
    pub names: FxHashMap<u32, String>,
    pub(crate) height_distance: Vec<f64>,
}

fn add_delta(base: u32, delta: i32) -> u32 {
    (i64::from(base) + i64::from(delta)) as u32
}

fn resolve_conditional_bag(bag: &mut [u32], rules: &RouteRuleTable, time: &TimeOfWeek) {
    for i in 0..bag.len() {
        let Some(rule) = rules.get(bag[i]) else { continue };
        if !rule.conditional() {
            continue;
        }
        let Some(active) = rule.conditional_value(time) else { continue };
        let Some(target) = rules.get(active) else { continue };
        let non_cond = &target.tag;
        let slot = bag
            .iter()
            .position(|&t| rules.get(t).map(|r| &r.tag == non_cond).unwrap_or(false))
            .unwrap_or(i);
        bag[slot] = active;
    }
}

impl RoutingIndex {
    /// Full header read at open time: name, rules and root box headers.
    pub fn read_header(data: &[u8], offset: usize, length: usize) -> Result<RoutingIndex> {
        let index = RoutingIndex { offset, length, ..Default::default() };
        let mut rules = RouteRuleTable::default();
        let mut name = String::new();
        let mut subs = Vec::new();
        let mut base_subs = Vec::new();

        let mut codec = Codec::at(data, offset);
        let old = codec.push_limit(length)?;
        let mut default_id = 1u32;
        loop {
            match codec.read_tag()? {
                Tag::End => break,
                Tag::Field { number: IDX_NAME, .. } => name = codec.read_string()?,
                Tag::Field { number: IDX_RULES, .. } => {
                    let len = codec.read_varint32()? as usize;
                    let inner = codec.push_limit(len)?;
                    read_route_encoding_rule(&mut codec, &mut rules, default_id)?;
                    default_id += 1;
                    codec.pop_limit(inner);
                }
                Tag::Field { number: n @ (IDX_ROOT_BOXES | IDX_BASEMAP_BOXES), .. } => {
                    let len = codec.read_fixed32_be()? as usize;
                    let box_offset = codec.position();
                    let inner = codec.push_limit(len)?;
                    let mut sub = RouteSubregion {
                        offset: box_offset,
                        length: len,
                        ..Default::default()
                    };
                    // root coordinates are absolute; children deferred
                    read_route_tree(&mut codec, &mut sub, None, false, true, 0)?;
                    codec.pop_limit(inner);
                    codec.seek(box_offset + len)?;
                    if n == IDX_BASEMAP_BOXES {
                        base_subs.push(sub);
                    } else {
                        subs.push(sub);
                    }
                }
                Tag::Field { number: IDX_BLOCKS, .. } => break,
                Tag::Field { wire, .. } => codec.skip_field(wire)?,
            }
        }
        codec.pop_limit(old);

        rules.complete_conditional();
        let _ = index.rules.set(rules);
        *index.subregions.lock().unwrap() = subs;
        *index.base_subregions.lock().unwrap() = base_subs;
        Ok(RoutingIndex { name, ..index })
    }

    /// Hydrated entry from the cache manifest; rules stay lazy.
    pub fn from_parts(
        name: String,
        offset: usize,
        length: usize,
        subregions: Vec<RouteSubregion>,
        base_subregions: Vec<RouteSubregion>,
    ) -> RoutingIndex {
        RoutingIndex {
            name,
            offset,
            length,
            rules: OnceCell::new(),
            subregions: Mutex::new(subregions),
            base_subregions: Mutex::new(base_subregions),
        }
    }

    /// The rule table, re-read from the file when this index was hydrated
    /// from the cache manifest.
    pub fn rules(&self, data: &[u8]) -> Result<&RouteRuleTable> {
        self.rules.get_or_try_init(|| {
            let mut rules = RouteRuleTable::default();
            let mut codec = Codec::at(data, self.offset);
            let old = codec.push_limit(self.length)?;
            let mut default_id = 1u32;
            loop {
                match codec.read_tag()? {
                    Tag::End => break,
                    Tag::Field { number: IDX_RULES, .. } => {
                        let len = codec.read_varint32()? as usize;
                        let inner = codec.push_limit(len)?;
                        read_route_encoding_rule(&mut codec, &mut rules, default_id)?;
                        default_id += 1;
                        codec.pop_limit(inner);
                    }
                    Tag::Field { number: IDX_ROOT_BOXES | IDX_BASEMAP_BOXES | IDX_BLOCKS, .. } => {
                        break
                    }
                    Tag::Field { wire, .. } => codec.skip_field(wire)?,
                }
            }
            codec.pop_limit(old);
            rules.complete_conditional();
            Ok(rules)
        })
    }

    /// Whether any root subregion of the requested tree touches `bbox`.
    pub fn intersects(&self, bbox: &Bbox31, base: bool) -> bool {
        let lock = if base { &self.base_subregions } else { &self.subregions };
        lock.lock().unwrap().iter().any(|s| s.bbox.intersects(bbox))
    }

    /// Top-level subregion headers (for the cache manifest).
    pub fn subregion_headers(&self, base: bool) -> Vec<RouteSubregion> {
        let lock = if base { &self.base_subregions } else { &self.subregions };
        lock.lock()
            .unwrap()
            .iter()
            .map(|s| RouteSubregion { subregions: Vec::new(), ..s.clone() })
            .collect()
    }

    /// Find the leaf subregions intersecting `bbox`, expanding unexplored
    /// levels from the file as needed. Results are sorted by data-block
    /// offset so the caller reads the file sequentially.
    pub fn search_subregions(
        &self,
        data: &[u8],
        bbox: &Bbox31,
        base: bool,
    ) -> Result<Vec<RouteSubregion>> {
        let lock = if base { &self.base_subregions } else { &self.subregions };
        let mut subs = lock.lock().unwrap();
        let mut found = Vec::new();
        search_route_region(data, &mut subs, bbox, &mut found, 0)?;
        found.sort_by_key(RouteSubregion::data_block_offset);
        Ok(found)
    }

    /// Materialize the road objects of one leaf subregion.
    pub fn load_subregion_data(
        &self,
        data: &[u8],
        sub: &RouteSubregion,
    ) -> Result<Vec<RouteDataObject>> {
        // rules must exist before objects are handed out (cache-hydrated
        // indexes read them here)
        self.rules(data)?;
        let mut codec = Codec::at(data, sub.data_block_offset());
        let length = codec.read_varint32()? as usize;
        let old = codec.push_limit(length)?;
        let objects = read_route_tree_data(&mut codec, sub)?;
        codec.pop_limit(old);
        Ok(objects)
    }
}

fn read_route_encoding_rule(
    codec: &mut Codec<'_>,
    rules: &mut RouteRuleTable,
    default_id: u32,
) -> Result<()> {
    let mut id = default_id;
    let mut tag = String::new();
    let mut value = String::new();
    loop {
        match codec.read_tag()? {
            Tag::End => break,
            Tag::Field { number: RULE_TAG, .. } => tag = codec.read_string()?,
            Tag::Field { number: RULE_VALUE, .. } => value = codec.read_string()?,
            Tag::Field { number: RULE_ID, .. } => id = codec.read_varint32()?,
            Tag::Field { wire, .. } => codec.skip_field(wire)?,
        }
    }
    rules.init_rule(id, tag, value);
    Ok(())
}

/// Read one subregion message. `parent` supplies the delta base when
/// `read_coordinates` is set; with `read_children`, one level of child
/// headers is read into `this.subregions` (grandchildren stay on disk).
fn read_route_tree(
    codec: &mut Codec<'_>,
    this: &mut RouteSubregion,
    parent: Option<&Bbox31>,
    read_children: bool,
    read_coordinates: bool,
    depth: u32,
) -> Result<()> {
    if depth > MAX_TREE_DEPTH {
        return Err(Error::corrupt("route tree deeper than the format allows"));
    }
    let base = parent.copied().unwrap_or_default();
    loop {
        match codec.read_tag()? {
            Tag::End => break,
            Tag::Field { number: BOX_LEFT, .. } => {
                let d = codec.read_sint32()?;
                if read_coordinates {
                    this.bbox.left = add_delta(base.left, d);
                }
            }
            Tag::Field { number: BOX_RIGHT, .. } => {
                let d = codec.read_sint32()?;
                if read_coordinates {
                    this.bbox.right = add_delta(base.right, d);
                }
            }
            Tag::Field { number: BOX_TOP, .. } => {
                let d = codec.read_sint32()?;
                if read_coordinates {
                    this.bbox.top = add_delta(base.top, d);
                }
            }
            Tag::Field { number: BOX_BOTTOM, .. } => {
                let d = codec.read_sint32()?;
                if read_coordinates {
                    this.bbox.bottom = add_delta(base.bottom, d);
                }
            }
            Tag::Field { number: BOX_SHIFT_TO_DATA, .. } => {
                this.shift_to_data = codec.read_fixed32_be()?;
            }
            Tag::Field { number: BOX_BOXES, wire } => {
                if !read_children {
                    codec.skip_field(wire)?;
                    continue;
                }
                let len = codec.read_fixed32_be()? as usize;
                let child_offset = codec.position();
                let inner = codec.push_limit(len)?;
                let mut child = RouteSubregion {
                    offset: child_offset,
                    length: len,
                    ..Default::default()
                };
                let parent_bbox = this.bbox;
                read_route_tree(codec, &mut child, Some(&parent_bbox), false, true, depth + 1)?;
                codec.pop_limit(inner);
                codec.seek(child_offset + len)?;
                this.subregions.push(child);
            }
            Tag::Field { wire, .. } => codec.skip_field(wire)?,
        }
    }
    Ok(())
}

/// Recursive collect over the in-memory tree, expanding missing levels.
fn search_route_region(
    data: &[u8],
    subs: &mut Vec<RouteSubregion>,
    bbox: &Bbox31,
    found: &mut Vec<RouteSubregion>,
    depth: u32,
) -> Result<()> {
    if depth > MAX_TREE_DEPTH {
        return Err(Error::corrupt("route tree deeper than the format allows"));
    }
    for sub in subs.iter_mut() {
        if !sub.bbox.intersects(bbox) {
            continue;
        }
        if sub.subregions.is_empty() && sub.shift_to_data == 0 {
            let mut codec = Codec::at(data, sub.offset);
            let old = codec.push_limit(sub.length)?;
            read_route_tree(&mut codec, sub, None, true, false, depth)?;
            codec.pop_limit(old);
        }
        search_route_region(data, &mut sub.subregions, bbox, found, depth + 1)?;
        if sub.shift_to_data != 0 {
            found.push(RouteSubregion { subregions: Vec::new(), ..sub.clone() });
        }
    }
    Ok(())
}

/// Read a whole `RouteDataBlock` and finalize ids, restrictions and names.
fn read_route_tree_data(codec: &mut Codec<'_>, sub: &RouteSubregion) -> Result<Vec<RouteDataObject>> {
    let mut id_table: Vec<i64> = Vec::new();
    let mut restrictions: FxHashMap<usize, Vec<(i64, i64, u32)>> = FxHashMap::default();
    let mut string_table: Vec<String> = Vec::new();
    let mut objects: Vec<Option<RouteDataObject>> = Vec::new();

    loop {
        match codec.read_tag()? {
            Tag::End => break,
            Tag::Field { number: BLOCK_DATA_OBJECTS, .. } => {
                let len = codec.read_varint32()? as usize;
                let inner = codec.push_limit(len)?;
                let obj = read_route_data_object(codec, sub.bbox.left, sub.bbox.top)?;
                let slot = obj.id as usize;
                if objects.len() <= slot {
                    objects.resize_with(slot + 1, || None);
                }
                objects[slot] = Some(obj);
                codec.pop_limit(inner);
            }
            Tag::Field { number: BLOCK_STRING_TABLE, .. } => {
                let len = codec.read_varint32()? as usize;
                let inner = codec.push_limit(len)?;
                string_table = read_string_table(codec)?;
                let rest = codec.bytes_until_limit();
                codec.skip(rest)?;
                codec.pop_limit(inner);
            }
            Tag::Field { number: BLOCK_RESTRICTIONS, .. } => {
                let len = codec.read_varint32()? as usize;
                let inner = codec.push_limit(len)?;
                let mut from = 0usize;
                let mut to = 0i64;
                let mut via = 0i64;
                let mut kind = 0u32;
                loop {
                    match codec.read_tag()? {
                        Tag::End => break,
                        Tag::Field { number: RESTRICTION_FROM, .. } => {
                            from = codec.read_int32()? as usize;
                        }
                        Tag::Field { number: RESTRICTION_TO, .. } => {
                            to = i64::from(codec.read_int32()?);
                        }
                        Tag::Field { number: RESTRICTION_VIA, .. } => {
                            via = i64::from(codec.read_int32()?);
                        }
                        Tag::Field { number: RESTRICTION_TYPE, .. } => {
                            kind = codec.read_int32()? as u32;
                        }
                        Tag::Field { wire, .. } => codec.skip_field(wire)?,
                    }
                }
                restrictions.entry(from).or_default().push((to, via, kind));
                codec.pop_limit(inner);
            }
            Tag::Field { number: BLOCK_ID_TABLE, .. } => {
                let len = codec.read_varint32()? as usize;
                let inner = codec.push_limit(len)?;
                let mut route_id = 0i64;
                loop {
                    match codec.read_tag()? {
                        Tag::End => break,
                        Tag::Field { number: ID_TABLE_ROUTE_ID, .. } => {
                            route_id += codec.read_sint64()?;
                            id_table.push(route_id);
                        }
                        Tag::Field { wire, .. } => codec.skip_field(wire)?,
                    }
                }
                codec.pop_limit(inner);
            }
            Tag::Field { wire, .. } => codec.skip_field(wire)?,
        }
    }

    // restrictions: rewrite table indexes into real road ids
    for (from, list) in restrictions {
        if let Some(Some(obj)) = objects.get_mut(from) {
            for (to, via, kind) in list {
                let to = match id_table.get(to as usize) {
                    Some(&id) => id,
                    None => {
                        warn!(index = to, "restriction target outside id table");
                        continue;
                    }
                };
                let via = if via != 0 {
                    id_table.get(via as usize).copied().unwrap_or(0)
                } else {
                    0
                };
                obj.restrictions.push(RestrictionInfo { to, via, kind });
            }
        }
    }

    let mut out = Vec::new();
    for obj in objects.into_iter().flatten() {
        let mut obj = obj;
        if (obj.id as usize) < id_table.len() {
            obj.id = id_table[obj.id as usize];
        }
        for &(rule_id, string_id) in &obj.names_ids {
            match string_table.get(string_id as usize) {
                Some(s) => {
                    obj.names.insert(rule_id, s.clone());
                }
                None => error!(id = string_id, "string id outside block table"),
            }
        }
        let name_ids = std::mem::take(&mut obj.point_name_ids_raw);
        for vec in name_ids {
            let mut res = Vec::new();
            for sid in vec {
                match string_table.get(sid as usize) {
                    Some(s) => res.push(s.clone()),
                    None => error!(id = sid, "point name id outside block table"),
                }
            }
            obj.point_names.push(res);
        }
        out.push(obj);
    }
    Ok(out)
}

fn read_route_data_object(codec: &mut Codec<'_>, left: u32, top: u32) -> Result<RouteDataObject> {
    let mut obj = RouteDataObject::default();
    loop {
        match codec.read_tag()? {
            Tag::End => break,
            Tag::Field { number: DATA_TYPES, .. } => {
                let len = codec.read_varint32()? as usize;
                let inner = codec.push_limit(len)?;
                while codec.bytes_until_limit() > 0 {
                    obj.types.push(codec.read_varint32()?);
                }
                codec.pop_limit(inner);
            }
            Tag::Field { number: DATA_ROUTE_ID, .. } => {
                obj.id = codec.read_int64()?;
            }
            Tag::Field { number: DATA_POINTS, .. } => {
                let len = codec.read_varint32()? as usize;
                let inner = codec.push_limit(len)?;
                let mut px = (left >> ROUTE_SHIFT_COORDINATES) as i64;
                let mut py = (top >> ROUTE_SHIFT_COORDINATES) as i64;
                while codec.bytes_until_limit() > 0 {
                    let x = px + i64::from(codec.read_sint32()?);
                    let y = py + i64::from(codec.read_sint32()?);
                    obj.points_x.push((x << ROUTE_SHIFT_COORDINATES) as u32);
                    obj.points_y.push((y << ROUTE_SHIFT_COORDINATES) as u32);
                    px = x;
                    py = y;
                }
                codec.pop_limit(inner);
            }
            Tag::Field { number: DATA_STRING_NAMES, .. } => {
                let len = codec.read_varint32()? as usize;
                let inner = codec.push_limit(len)?;
                while codec.bytes_until_limit() > 0 {
                    let rule = codec.read_varint32()?;
                    let string = codec.read_varint32()?;
                    obj.names_ids.push((rule, string));
                }
                codec.pop_limit(inner);
            }
            Tag::Field { number: DATA_POINT_NAMES, .. } => {
                let len = codec.read_varint32()? as usize;
                let inner = codec.push_limit(len)?;
                while codec.bytes_until_limit() > 0 {
                    let point = codec.read_varint32()? as usize;
                    let name_type = codec.read_varint32()?;
                    let name_id = codec.read_varint32()?;
                    if obj.point_name_types.len() <= point {
                        obj.point_name_types.resize_with(point + 1, Vec::new);
                    }
                    obj.point_name_types[point].push(name_type);
                    if obj.point_name_ids_raw.len() <= point {
                        obj.point_name_ids_raw.resize_with(point + 1, Vec::new);
                    }
                    obj.point_name_ids_raw[point].push(name_id);
                }
                codec.pop_limit(inner);
            }
            Tag::Field { number: DATA_POINT_TYPES, .. } => {
                let len = codec.read_varint32()? as usize;
                let inner = codec.push_limit(len)?;
                while codec.bytes_until_limit() > 0 {
                    let point = codec.read_varint32()? as usize;
                    let bag_len = codec.read_varint32()? as usize;
                    let bag_limit = codec.push_limit(bag_len)?;
                    if obj.point_types.len() <= point {
                        obj.point_types.resize_with(point + 1, Vec::new);
                    }
                    while codec.bytes_until_limit() > 0 {
                        obj.point_types[point].push(codec.read_varint32()?);
                    }
                    codec.pop_limit(bag_limit);
                }
                codec.pop_limit(inner);
            }
            Tag::Field { wire, .. } => codec.skip_field(wire)?,
        }
    }
    Ok(obj)
}

impl RouteDataObject {
    pub fn points_len(&self) -> usize {
        self.points_x.len()
    }

    /// Value of `tag` from the object's types, falling back to names.
    pub fn value_of(&self, rules: &RouteRuleTable, tag: &str) -> Option<String> {
        for &t in &self.types {
            if let Some(r) = rules.get(t) {
                if r.tag == tag {
                    return Some(r.value.clone());
                }
            }
        }
        for (&k, v) in &self.names {
            if let Some(r) = rules.get(k) {
                if r.tag == tag {
                    return Some(v.clone());
                }
            }
        }
        None
    }

    /// Value of `tag` at a vertex: point types first, then point names.
    pub fn point_value_of(&self, rules: &RouteRuleTable, point: usize, tag: &str) -> Option<String> {
        if let Some(bag) = self.point_types.get(point) {
            for &t in bag {
                if let Some(r) = rules.get(t) {
                    if r.tag == tag {
                        return Some(r.value.clone());
                    }
                }
            }
        }
        if let Some(bag) = self.point_name_types.get(point) {
            for (i, &t) in bag.iter().enumerate() {
                if let Some(r) = rules.get(t) {
                    if r.tag == tag {
                        return self.point_names.get(point).and_then(|n| n.get(i)).cloned();
                    }
                }
            }
        }
        None
    }

    pub fn highway(&self, rules: &RouteRuleTable) -> Option<String> {
        self.value_of(rules, "highway")
    }

    pub fn oneway(&self, rules: &RouteRuleTable) -> i8 {
        for &t in &self.types {
            if let Some(r) = rules.get(t) {
                if r.oneway != 0 {
                    return r.oneway;
                }
                if r.roundabout {
                    return 1;
                }
            }
        }
        0
    }

    pub fn roundabout(&self, rules: &RouteRuleTable) -> bool {
        self.types.iter().any(|&t| rules.get(t).map(|r| r.roundabout).unwrap_or(false))
    }

    pub fn tunnel(&self, rules: &RouteRuleTable) -> bool {
        self.types.iter().any(|&t| {
            rules
                .get(t)
                .map(|r| {
                    (r.tag == "tunnel" && r.value == "yes") || (r.tag == "layer" && r.value == "-1")
                })
                .unwrap_or(false)
        })
    }

    pub fn platform(&self, rules: &RouteRuleTable) -> bool {
        self.types.iter().any(|&t| {
            rules
                .get(t)
                .map(|r| {
                    (r.tag == "railway" && r.value == "platform")
                        || (r.tag == "public_transport" && r.value == "platform")
                })
                .unwrap_or(false)
        })
    }

    pub fn has_traffic_light_at(&self, rules: &RouteRuleTable, point: usize) -> bool {
        self.point_types
            .get(point)
            .map(|bag| {
                bag.iter().any(|&t| {
                    rules.get(t).map(|r| r.value.starts_with("traffic_signals")).unwrap_or(false)
                })
            })
            .unwrap_or(false)
    }

    /// Resolve conditional type entries at `time`, for the object and for
    /// every vertex. An active alternative overwrites the entry carrying
    /// its plain tag; with no such entry it takes the conditional entry's
    /// own slot.
    pub fn process_conditional_tags(&mut self, rules: &RouteRuleTable, time: &TimeOfWeek) {
        resolve_conditional_bag(&mut self.types, rules, time);
        for bag in &mut self.point_types {
            resolve_conditional_bag(bag, rules, time);
        }
    }

    /// `(distance, height)` pairs, two per vertex, interpolated across
    /// stretches without elevation tags by great-circle distance. Empty
    /// when the object carries no start elevation.
    pub fn height_array(&mut self, rules: &RouteRuleTable) -> Vec<f64> {
        if !self.height_distance.is_empty() {
            return self.height_distance.clone();
        }
        let Some(start) = self.value_of(rules, "osmand_ele_start") else {
            return Vec::new();
        };
        let start_height: f64 = start.parse().unwrap_or(0.0);
        let end_height: f64 = self
            .value_of(rules, "osmand_ele_end")
            .and_then(|v| v.parse().ok())
            .unwrap_or(start_height);

        let n = self.points_len();
        let mut arr = vec![0.0; 2 * n];
        if n == 0 {
            return arr;
        }
        arr[0] = 0.0;
        arr[1] = start_height;
        let mut prev_height = start_height;
        let mut plat = geo::get_31_latitude_y(self.points_y[0]);
        let mut plon = geo::get_31_longitude_x(self.points_x[0]);
        for k in 1..n {
            let lat = geo::get_31_latitude_y(self.points_y[k]);
            let lon = geo::get_31_longitude_x(self.points_x[k]);
            let dd = geo::distance(plat, plon, lat, lon);
            let height = if k == n - 1 {
                end_height
            } else if let Some(asc) = self.point_value_of(rules, k, "osmand_ele_asc") {
                prev_height + asc.parse().unwrap_or(0.0)
            } else if let Some(desc) = self.point_value_of(rules, k, "osmand_ele_desc") {
                prev_height - desc.parse().unwrap_or(0.0)
            } else {
                HEIGHT_UNDEFINED
            };
            arr[2 * k] = dd;
            arr[2 * k + 1] = height;
            if height != HEIGHT_UNDEFINED {
                let mut total = dd;
                let mut first_undefined = k;
                while first_undefined >= 1 && arr[2 * (first_undefined - 1) + 1] == HEIGHT_UNDEFINED
                {
                    first_undefined -= 1;
                    total += arr[2 * first_undefined];
                }
                if total > 0.0 {
                    let slope = (height - prev_height) / total;
                    for j in first_undefined..k {
                        arr[2 * j + 1] = arr[2 * j] * slope + arr[2 * j - 1];
                    }
                }
                prev_height = height;
            }
            plat = lat;
            plon = lon;
        }
        self.height_distance = arr.clone();
        arr
    }
}
