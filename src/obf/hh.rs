//! Hierarchical-routing (HH) index
//!
//! Two mostly independent lazy trees: a spatial tree of point boxes whose
//! leaves are network points, and a flat list of segment blocks covering
//! contiguous point-id ranges, each a lazy tree of inner blocks holding
//! per-point adjacency.
//!
//! Points live in an owning [`HHPointStore`]; cross-references (the
//! opposite-direction twin, segment endpoints) are typed indexes into the
//! store, never shared pointers.

use std::sync::Mutex;

use butterfly_common::{Error, Result};
use once_cell::sync::OnceCell;
use rustc_hash::FxHashMap;
use tracing::warn;

use crate::geo::Bbox31;
use crate::strings::read_string_table;
use crate::wire::{Codec, Tag};

// OsmAndHHRoutingIndex
pub const IDX_EDITION: u32 = 1;
pub const IDX_PROFILE: u32 = 2;
pub const IDX_PROFILE_PARAMS: u32 = 3;
pub const IDX_TAG_VALUES_TABLE: u32 = 4;
pub const IDX_POINT_BOXES: u32 = 5;
pub const IDX_POINT_SEGMENTS: u32 = 6;

// HHRoutePointsBox
pub const PBOX_LEFT: u32 = 1;
pub const PBOX_RIGHT: u32 = 2;
pub const PBOX_TOP: u32 = 3;
pub const PBOX_BOTTOM: u32 = 4;
pub const PBOX_BOXES: u32 = 5;
pub const PBOX_POINTS: u32 = 6;

// HHRouteNetworkPoint
pub const PNT_FILE_ID: u32 = 1;
pub const PNT_DX: u32 = 2;
pub const PNT_DY: u32 = 3;
pub const PNT_ROAD_ID: u32 = 4;
pub const PNT_ROAD_START_END: u32 = 5;
pub const PNT_CLUSTER_ID: u32 = 6;
pub const PNT_GLOBAL_ID: u32 = 7;
pub const PNT_DUAL_POINT_ID: u32 = 8;
pub const PNT_DUAL_CLUSTER_ID: u32 = 9;
pub const PNT_PARTIAL_IND: u32 = 10;
pub const PNT_TAG_VALUE_IDS: u32 = 11;

// HHRouteBlockSegments
pub const SEG_ID_RANGE_START: u32 = 1;
pub const SEG_ID_RANGE_LENGTH: u32 = 2;
pub const SEG_PROFILE_ID: u32 = 3;
pub const SEG_INNER_BLOCKS: u32 = 4;
pub const SEG_POINT_SEGMENTS: u32 = 5;

// HHRoutePointSegments
pub const PSEG_IN: u32 = 1;
pub const PSEG_OUT: u32 = 2;

pub const MAX_TREE_DEPTH: u32 = 32;

/// Typed index of a point inside its [`HHPointStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PointId(pub u32);

/// A vertex of the hierarchical routing graph, geo-located on a road.
#[derive(Debug, Clone, Default)]
pub struct NetworkDBPoint {
    /// Local id within this index; segment blocks range over these.
    pub file_id: u32,
    /// Global 64-bit id, unique across files.
    pub index: i64,
    pub cluster_id: u32,
    pub start_x: u32,
    pub start_y: u32,
    pub end_x: u32,
    pub end_y: u32,
    pub road_id: i64,
    /// Vertex index on the road; `end` is `start +/- 1`.
    pub start: i16,
    pub end: i16,
    /// Position of the owning file in the registry at load time.
    pub map_id: u16,
    /// Adjacency may be truncated at a file boundary.
    pub incomplete: bool,
    /// Global id of the opposite-direction twin, negative when absent.
    pub dual_point_id: i64,
    pub dual: Option<PointId>,
    /// References into the index `tag=value` table.
    pub tag_values: Vec<u32>,
    conn_in: Option<Vec<NetworkDBSegment>>,
    conn_out: Option<Vec<NetworkDBSegment>>,
}

impl NetworkDBPoint {
    /// The connection set for one direction, if already materialized.
    pub fn connected(&self, incoming: bool) -> Option<&[NetworkDBSegment]> {
        if incoming { self.conn_in.as_deref() } else { self.conn_out.as_deref() }
    }
}

/// A loaded graph edge between two stored points.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkDBSegment {
    pub start: PointId,
    pub end: PointId,
    /// Seconds.
    pub dist: f64,
    pub direction_out: bool,
    pub shortcut: bool,
}

/// Owning arena for the points of one HH index of one file.
#[derive(Debug, Default)]
pub struct HHPointStore {
    points: Vec<NetworkDBPoint>,
    by_global: FxHashMap<i64, PointId>,
    by_file_id: FxHashMap<u32, PointId>,
}

impl HHPointStore {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn get(&self, id: PointId) -> &NetworkDBPoint {
        &self.points[id.0 as usize]
    }

    pub fn by_global_id(&self, index: i64) -> Option<PointId> {
        self.by_global.get(&index).copied()
    }

    pub fn by_file_id(&self, file_id: u32) -> Option<PointId> {
        self.by_file_id.get(&file_id).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (PointId, &NetworkDBPoint)> + '_ {
        self.points.iter().enumerate().map(|(i, p)| (PointId(i as u32), p))
    }

    /// Insert a freshly parsed point and, when its twin is already here,
    /// wire both directions and propagate the opposite endpoint.
    fn insert(&mut self, point: NetworkDBPoint) -> PointId {
        let id = PointId(self.points.len() as u32);
        self.by_global.insert(point.index, id);
        self.by_file_id.insert(point.file_id, id);
        self.points.push(point);
        let dual_global = self.points[id.0 as usize].dual_point_id;
        if dual_global >= 0 {
            if let Some(dual) = self.by_global.get(&dual_global).copied() {
                let (dual_sx, dual_sy) = {
                    let d = &self.points[dual.0 as usize];
                    (d.start_x, d.start_y)
                };
                let (own_sx, own_sy) = {
                    let p = &self.points[id.0 as usize];
                    (p.start_x, p.start_y)
                };
                {
                    let p = &mut self.points[id.0 as usize];
                    p.dual = Some(dual);
                    p.end_x = dual_sx;
                    p.end_y = dual_sy;
                }
                {
                    let d = &mut self.points[dual.0 as usize];
                    d.dual = Some(id);
                    d.end_x = own_sx;
                    d.end_y = own_sy;
                }
            }
        }
        id
    }

    /// First assignment wins; connection sets are immutable afterwards.
    fn set_connected(&mut self, id: PointId, incoming: bool, segments: Vec<NetworkDBSegment>) {
        let p = &mut self.points[id.0 as usize];
        let slot = if incoming { &mut p.conn_in } else { &mut p.conn_out };
        if slot.is_none() {
            *slot = Some(segments);
        }
    }
}

/// Cluster neighborhood provider. The routing engine knows which points
/// share a cluster; adjacency arrays in the file are parallel to these
/// lists.
pub trait HHRoutingContext {
    fn incoming_points(&self, store: &HHPointStore, point: PointId) -> Vec<PointId>;
    fn outgoing_points(&self, store: &HHPointStore, point: PointId) -> Vec<PointId>;
}

/// A segment block header covering a contiguous range of point file-ids.
#[derive(Debug, Clone, Default)]
pub struct HHBlockSegments {
    pub id_range_start: u32,
    pub id_range_length: u32,
    pub profile_id: u32,
    pub offset: usize,
    pub length: usize,
    pub children: Vec<HHBlockSegments>,
    /// Set once this block's point segments were consumed; a loaded block
    /// is never read from the file again.
    loaded: bool,
}

/// `[id_range_start, id_range_start + id_range_length)` membership.
pub fn check_id(search_ind: u32, block: &HHBlockSegments) -> bool {
    block.id_range_start <= search_ind && search_ind < block.id_range_start + block.id_range_length
}

/// One HH routing index section.
#[derive(Debug, Default)]
pub struct HHRouteIndex {
    pub offset: usize,
    pub length: usize,
    /// Monotonically increasing data edition; files used together must
    /// agree on it.
    pub edition: u64,
    pub profile: String,
    pub profile_params: Vec<String>,
    /// Absolute bounds of the top point box.
    pub top_bbox: Bbox31,
    pub top_offset: usize,
    pub top_length: usize,
    encoding_rules: OnceCell<Vec<(String, String)>>,
    segments: Mutex<Vec<HHBlockSegments>>,
}

impl HHRouteIndex {
    /// Shallow read at open time: edition, profile and the top point-box
    /// bounds. Points and segment blocks stay on disk.
    pub fn read_header(data: &[u8], offset: usize, length: usize) -> Result<HHRouteIndex> {
        let mut index = HHRouteIndex { offset, length, ..Default::default() };
        let mut codec = Codec::at(data, offset);
        let old = codec.push_limit(length)?;
        loop {
            match codec.read_tag()? {
                Tag::End => break,
                Tag::Field { number: IDX_EDITION, .. } => {
                    index.edition = codec.read_varint64()?;
                }
                Tag::Field { number: IDX_PROFILE, .. } => {
                    index.profile = codec.read_string()?;
                }
                Tag::Field { number: IDX_PROFILE_PARAMS, .. } => {
                    index.profile_params.push(codec.read_string()?);
                }
                Tag::Field { number: IDX_POINT_BOXES, .. } => {
                    let len = codec.read_fixed32_be()? as usize;
                    index.top_offset = codec.position();
                    index.top_length = len;
                    let inner = codec.push_limit(len)?;
                    index.top_bbox = read_point_box_bounds(&mut codec)?;
                    let rest = codec.bytes_until_limit();
                    codec.skip(rest)?;
                    codec.pop_limit(inner);
                }
                Tag::Field { number: IDX_POINT_SEGMENTS, .. } => {
                    // segment headers are read by init_hh_points
                    let rest = codec.bytes_until_limit();
                    codec.skip(rest)?;
                }
                Tag::Field { wire, .. } => codec.skip_field(wire)?,
            }
        }
        codec.pop_limit(old);
        Ok(index)
    }

    /// Hydrated entry from the cache manifest.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        offset: usize,
        length: usize,
        edition: u64,
        profile: String,
        profile_params: Vec<String>,
        top_bbox: Bbox31,
        top_offset: usize,
        top_length: usize,
    ) -> HHRouteIndex {
        HHRouteIndex {
            offset,
            length,
            edition,
            profile,
            profile_params,
            top_bbox,
            top_offset,
            top_length,
            encoding_rules: OnceCell::new(),
            segments: Mutex::new(Vec::new()),
        }
    }

    /// The `tag=value` pairs of the index string table, available after
    /// [`init_hh_points`](Self::init_hh_points).
    pub fn encoding_rules(&self) -> &[(String, String)] {
        self.encoding_rules.get().map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of top-level segment blocks discovered so far.
    pub fn segment_block_count(&self) -> usize {
        self.segments.lock().unwrap().len()
    }

    /// Materialize every network point of this index. Dual twins are wired
    /// as soon as both sides exist, independent of read order. Adjacency
    /// stays lazy; segment block headers are recorded for
    /// [`load_network_segment_point`](Self::load_network_segment_point).
    pub fn init_hh_points(&self, data: &[u8], map_id: u16) -> Result<HHPointStore> {
        let mut store = HHPointStore::default();
        let mut blocks = Vec::new();
        let mut rules = Vec::new();

        let mut codec = Codec::at(data, self.offset);
        let old = codec.push_limit(self.length)?;
        loop {
            match codec.read_tag()? {
                Tag::End => break,
                Tag::Field { number: IDX_TAG_VALUES_TABLE, .. } => {
                    let len = codec.read_varint32()? as usize;
                    let inner = codec.push_limit(len)?;
                    for entry in read_string_table(&mut codec)? {
                        if let Some((tag, value)) = entry.split_once('=') {
                            rules.push((tag.to_string(), value.to_string()));
                        }
                    }
                    codec.pop_limit(inner);
                }
                Tag::Field { number: IDX_POINT_BOXES, .. } => {
                    let parent = Bbox31::default();
                    read_point_box(&mut codec, &parent, &rules, map_id, &mut store, 0)?;
                }
                Tag::Field { number: IDX_POINT_SEGMENTS, .. } => {
                    let mut block = HHBlockSegments::default();
                    read_segment_block_header(&mut codec, &mut block)?;
                    blocks.push(block);
                }
                Tag::Field { wire, .. } => codec.skip_field(wire)?,
            }
        }
        codec.pop_limit(old);

        let _ = self.encoding_rules.set(rules);
        *self.segments.lock().unwrap() = blocks;
        Ok(store)
    }

    /// Demand-load the adjacency covering `search_ind`. Expanded inner
    /// blocks are cached, and a block whose payload was consumed is never
    /// read from the file again. Returns the number of loaded edges.
    pub fn load_network_segment_point(
        &self,
        data: &[u8],
        ctx: &dyn HHRoutingContext,
        store: &mut HHPointStore,
        search_ind: u32,
    ) -> Result<usize> {
        let mut blocks = self.segments.lock().unwrap();
        for block in blocks.iter_mut() {
            if check_id(search_ind, block) {
                return load_block(data, block, ctx, store, search_ind, 0);
            }
        }
        Ok(0)
    }
}

/// Read only the delta edges of a point box, against `(0,0,0,0)` for the
/// top box.
fn read_point_box_bounds(codec: &mut Codec<'_>) -> Result<Bbox31> {
    let mut bbox = Bbox31::default();
    let mut init = 0u8;
    loop {
        match codec.read_tag()? {
            Tag::End => break,
            Tag::Field { number: PBOX_LEFT, .. } => {
                bbox.left = codec.read_sint32()? as u32;
                init |= 1;
            }
            Tag::Field { number: PBOX_RIGHT, .. } => {
                bbox.right = codec.read_sint32()? as u32;
                init |= 2;
            }
            Tag::Field { number: PBOX_TOP, .. } => {
                bbox.top = codec.read_sint32()? as u32;
                init |= 4;
            }
            Tag::Field { number: PBOX_BOTTOM, .. } => {
                bbox.bottom = codec.read_sint32()? as u32;
                init |= 8;
            }
            Tag::Field { wire, .. } => codec.skip_field(wire)?,
        }
        if init == 0xf {
            break;
        }
    }
    Ok(bbox)
}

fn add_delta(base: u32, delta: i32) -> u32 {
    (i64::from(base) + i64::from(delta)) as u32
}

/// Full descent of a point box: edges, child boxes, points.
fn read_point_box(
    codec: &mut Codec<'_>,
    parent: &Bbox31,
    rules: &[(String, String)],
    map_id: u16,
    store: &mut HHPointStore,
    depth: u32,
) -> Result<()> {
    if depth > MAX_TREE_DEPTH {
        return Err(Error::corrupt("point box tree deeper than the format allows"));
    }
    let len = codec.read_fixed32_be()? as usize;
    let box_offset = codec.position();
    let old = codec.push_limit(len)?;
    let mut bbox = Bbox31::default();
    loop {
        match codec.read_tag()? {
            Tag::End => break,
            Tag::Field { number: PBOX_LEFT, .. } => {
                bbox.left = add_delta(parent.left, codec.read_sint32()?);
            }
            Tag::Field { number: PBOX_RIGHT, .. } => {
                bbox.right = add_delta(parent.right, codec.read_sint32()?);
            }
            Tag::Field { number: PBOX_TOP, .. } => {
                bbox.top = add_delta(parent.top, codec.read_sint32()?);
            }
            Tag::Field { number: PBOX_BOTTOM, .. } => {
                bbox.bottom = add_delta(parent.bottom, codec.read_sint32()?);
            }
            Tag::Field { number: PBOX_BOXES, .. } => {
                read_point_box(codec, &bbox, rules, map_id, store, depth + 1)?;
            }
            Tag::Field { number: PBOX_POINTS, .. } => {
                read_point(codec, &bbox, rules, map_id, store)?;
            }
            Tag::Field { wire, .. } => codec.skip_field(wire)?,
        }
    }
    codec.pop_limit(old);
    codec.seek(box_offset + len)?;
    Ok(())
}

/// Read one point record; position deltas are against the enclosing box's
/// `(left, top)`.
fn read_point(
    codec: &mut Codec<'_>,
    bbox: &Bbox31,
    rules: &[(String, String)],
    map_id: u16,
    store: &mut HHPointStore,
) -> Result<PointId> {
    let len = codec.read_varint32()? as usize;
    let old = codec.push_limit(len)?;
    let mut pnt = NetworkDBPoint { map_id, dual_point_id: -1, ..Default::default() };
    loop {
        match codec.read_tag()? {
            Tag::End => break,
            Tag::Field { number: PNT_FILE_ID, .. } => {
                pnt.file_id = codec.read_varint32()?;
            }
            Tag::Field { number: PNT_DX, .. } => {
                let x = add_delta(bbox.left, codec.read_sint32()?);
                pnt.start_x = x;
                pnt.end_x = x;
            }
            Tag::Field { number: PNT_DY, .. } => {
                let y = add_delta(bbox.top, codec.read_sint32()?);
                pnt.start_y = y;
                pnt.end_y = y;
            }
            Tag::Field { number: PNT_GLOBAL_ID, .. } => {
                pnt.index = codec.read_int64()?;
            }
            Tag::Field { number: PNT_ROAD_ID, .. } => {
                pnt.road_id = codec.read_int64()?;
            }
            Tag::Field { number: PNT_ROAD_START_END, .. } => {
                let v = codec.read_varint32()?;
                pnt.start = (v >> 1) as i16;
                pnt.end = pnt.start + if v & 1 == 1 { 1 } else { -1 };
            }
            Tag::Field { number: PNT_CLUSTER_ID, .. } => {
                pnt.cluster_id = codec.read_varint32()?;
            }
            Tag::Field { number: PNT_DUAL_POINT_ID, .. } => {
                pnt.dual_point_id = i64::from(codec.read_int32()?);
            }
            Tag::Field { number: PNT_DUAL_CLUSTER_ID, .. } => {
                codec.read_varint32()?;
            }
            Tag::Field { number: PNT_PARTIAL_IND, .. } => {
                pnt.incomplete = codec.read_varint32()? > 0;
            }
            Tag::Field { number: PNT_TAG_VALUE_IDS, .. } => {
                let len = codec.read_varint32()? as usize;
                let inner = codec.push_limit(len)?;
                while codec.bytes_until_limit() > 0 {
                    let id = codec.read_varint32()?;
                    if (id as usize) < rules.len() {
                        pnt.tag_values.push(id);
                    } else {
                        warn!(id, "tag value id outside index table");
                    }
                }
                codec.pop_limit(inner);
            }
            Tag::Field { wire, .. } => codec.skip_field(wire)?,
        }
    }
    codec.pop_limit(old);
    Ok(store.insert(pnt))
}

/// Read a segment block header: the id range and extent only; inner
/// blocks and point segments are skipped.
fn read_segment_block_header(codec: &mut Codec<'_>, block: &mut HHBlockSegments) -> Result<()> {
    let len = codec.read_fixed32_be()? as usize;
    block.offset = codec.position();
    block.length = len;
    let old = codec.push_limit(len)?;
    loop {
        match codec.read_tag()? {
            Tag::End => break,
            Tag::Field { number: SEG_ID_RANGE_START, .. } => {
                block.id_range_start = codec.read_varint32()?;
            }
            Tag::Field { number: SEG_ID_RANGE_LENGTH, .. } => {
                block.id_range_length = codec.read_varint32()?;
            }
            Tag::Field { number: SEG_PROFILE_ID, .. } => {
                block.profile_id = codec.read_varint32()?;
            }
            Tag::Field { number: SEG_INNER_BLOCKS | SEG_POINT_SEGMENTS, .. } => {
                let rest = codec.bytes_until_limit();
                codec.skip(rest)?;
            }
            Tag::Field { wire, .. } => codec.skip_field(wire)?,
        }
    }
    codec.pop_limit(old);
    codec.seek(block.offset + len)?;
    Ok(())
}

fn load_block(
    data: &[u8],
    block: &mut HHBlockSegments,
    ctx: &dyn HHRoutingContext,
    store: &mut HHPointStore,
    search_ind: u32,
    depth: u32,
) -> Result<usize> {
    if depth > MAX_TREE_DEPTH {
        return Err(Error::corrupt("segment block tree deeper than the format allows"));
    }
    if !block.children.is_empty() {
        for child in block.children.iter_mut() {
            if check_id(search_ind, child) {
                return load_block(data, child, ctx, store, search_ind, depth + 1);
            }
        }
        return Ok(0);
    }
    if block.loaded {
        return Ok(0);
    }

    let mut codec = Codec::at(data, block.offset);
    let old = codec.push_limit(block.length)?;
    let mut loaded = 0usize;
    let mut ind = 0u32;
    loop {
        match codec.read_tag()? {
            Tag::End => break,
            Tag::Field { number: SEG_ID_RANGE_START, .. } => {
                block.id_range_start = codec.read_varint32()?;
            }
            Tag::Field { number: SEG_ID_RANGE_LENGTH, .. } => {
                block.id_range_length = codec.read_varint32()?;
            }
            Tag::Field { number: SEG_PROFILE_ID, .. } => {
                block.profile_id = codec.read_varint32()?;
            }
            Tag::Field { number: SEG_INNER_BLOCKS, .. } => {
                if !check_id(search_ind, block) {
                    let rest = codec.bytes_until_limit();
                    codec.skip(rest)?;
                    continue;
                }
                let len = codec.read_fixed32_be()? as usize;
                let child_offset = codec.position();
                let inner = codec.push_limit(len)?;
                let mut child =
                    HHBlockSegments { offset: child_offset, length: len, ..Default::default() };
                loaded += load_inner_block(&mut codec, &mut child, ctx, store, search_ind)?;
                codec.pop_limit(inner);
                codec.seek(child_offset + len)?;
                block.children.push(child);
            }
            Tag::Field { number: SEG_POINT_SEGMENTS, .. } => {
                if !check_id(search_ind, block) {
                    let rest = codec.bytes_until_limit();
                    codec.skip(rest)?;
                    continue;
                }
                let pnt_file_id = block.id_range_start + ind;
                ind += 1;
                loaded += load_point_segments(&mut codec, ctx, store, pnt_file_id)?;
            }
            Tag::Field { wire, .. } => codec.skip_field(wire)?,
        }
    }
    codec.pop_limit(old);
    if ind > 0 {
        block.loaded = true;
    }
    Ok(loaded)
}

/// Walk a freshly discovered inner block in place: header fields always,
/// payload only when `search_ind` falls into its range.
fn load_inner_block(
    codec: &mut Codec<'_>,
    block: &mut HHBlockSegments,
    ctx: &dyn HHRoutingContext,
    store: &mut HHPointStore,
    search_ind: u32,
) -> Result<usize> {
    let mut loaded = 0usize;
    let mut ind = 0u32;
    loop {
        match codec.read_tag()? {
            Tag::End => break,
            Tag::Field { number: SEG_ID_RANGE_START, .. } => {
                block.id_range_start = codec.read_varint32()?;
            }
            Tag::Field { number: SEG_ID_RANGE_LENGTH, .. } => {
                block.id_range_length = codec.read_varint32()?;
            }
            Tag::Field { number: SEG_PROFILE_ID, .. } => {
                block.profile_id = codec.read_varint32()?;
            }
            Tag::Field { number: SEG_INNER_BLOCKS, .. } => {
                if !check_id(search_ind, block) {
                    let rest = codec.bytes_until_limit();
                    codec.skip(rest)?;
                    continue;
                }
                let len = codec.read_fixed32_be()? as usize;
                let child_offset = codec.position();
                let inner = codec.push_limit(len)?;
                let mut child =
                    HHBlockSegments { offset: child_offset, length: len, ..Default::default() };
                loaded += load_inner_block(codec, &mut child, ctx, store, search_ind)?;
                codec.pop_limit(inner);
                codec.seek(child_offset + len)?;
                block.children.push(child);
            }
            Tag::Field { number: SEG_POINT_SEGMENTS, .. } => {
                if !check_id(search_ind, block) {
                    let rest = codec.bytes_until_limit();
                    codec.skip(rest)?;
                    continue;
                }
                let pnt_file_id = block.id_range_start + ind;
                ind += 1;
                loaded += load_point_segments(codec, ctx, store, pnt_file_id)?;
            }
            Tag::Field { wire, .. } => codec.skip_field(wire)?,
        }
    }
    if ind > 0 {
        block.loaded = true;
    }
    Ok(loaded)
}

/// Read one point's incoming/outgoing adjacency arrays and attach the
/// resulting connection sets.
fn load_point_segments(
    codec: &mut Codec<'_>,
    ctx: &dyn HHRoutingContext,
    store: &mut HHPointStore,
    pnt_file_id: u32,
) -> Result<usize> {
    let size = codec.read_varint32()? as usize;
    let old = codec.push_limit(size)?;
    let mut segments_in: Vec<i32> = Vec::new();
    let mut segments_out: Vec<i32> = Vec::new();
    loop {
        match codec.read_tag()? {
            Tag::End => break,
            Tag::Field { number: n @ (PSEG_IN | PSEG_OUT), .. } => {
                let len = codec.read_varint32()? as usize;
                let inner = codec.push_limit(len)?;
                let list = if n == PSEG_IN { &mut segments_in } else { &mut segments_out };
                while codec.bytes_until_limit() > 0 {
                    list.push(codec.read_int32()?);
                }
                codec.pop_limit(inner);
            }
            Tag::Field { wire, .. } => codec.skip_field(wire)?,
        }
    }
    codec.pop_limit(old);

    let Some(pid) = store.by_file_id(pnt_file_id) else {
        // point not used from this file
        return Ok(0);
    };
    let incoming = ctx.incoming_points(store, pid);
    let outgoing = ctx.outgoing_points(store, pid);
    let conn_in = parse_segments(store, &segments_in, &incoming, pid, false);
    let conn_out = parse_segments(store, &segments_out, &outgoing, pid, true);
    let loaded = conn_in.len() + conn_out.len();
    store.set_connected(pid, true, conn_in);
    store.set_connected(pid, false, conn_out);
    Ok(loaded)
}

/// Turn an adjacency array into edges. Entries are deciseconds; zero means
/// no edge to that neighbor. An array shorter than the neighbor list logs
/// a warning and yields no edges for that side.
fn parse_segments(
    store: &HHPointStore,
    point_segments: &[i32],
    neighbors: &[PointId],
    pnt: PointId,
    out: bool,
) -> Vec<NetworkDBSegment> {
    if point_segments.is_empty() || store.get(pnt).incomplete {
        return Vec::new();
    }
    if point_segments.len() < neighbors.len() {
        warn!(
            direction = if out { "outgoing" } else { "incoming" },
            stored = point_segments.len(),
            neighbors = neighbors.len(),
            "adjacency array shorter than the neighbor list"
        );
        return Vec::new();
    }
    let mut list = Vec::new();
    for (i, &neighbor) in neighbors.iter().enumerate() {
        let d = point_segments[i];
        if d <= 0 {
            continue;
        }
        let dist = f64::from(d) / 10.0;
        let (start, end) = if out { (pnt, neighbor) } else { (neighbor, pnt) };
        list.push(NetworkDBSegment { start, end, dist, direction_out: out, shortcut: false });
    }
    list
}
