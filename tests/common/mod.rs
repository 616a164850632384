//! Synthetic OBF builder for the end-to-end tests
//!
//! Emits the same framing the readers consume: varint-tagged fields,
//! big-endian seekable sections, delta-coded boxes and geometry. Data
//! blocks are tucked into an unused length-delimited field of their leaf
//! box so the box's shift-to-data pointer can be computed locally.

#![allow(dead_code)]

use butterfly_obf::geo::{Bbox31, ROUTE_SHIFT_COORDINATES, SHIFT_COORDINATES};
use butterfly_obf::obf::{self, hh, map, routing, transport};
use butterfly_obf::wire::{WireType, Writer};

/// Field number used to embed data blocks inside a leaf box; skipped by
/// the readers as an unknown field.
const EMBED_FIELD: u32 = 19;

pub fn varint_len(mut v: u64) -> usize {
    let mut n = 1;
    while v >= 0x80 {
        v >>= 7;
        n += 1;
    }
    n
}

/// Assemble a container file. Returns the bytes plus the absolute offset
/// of each section's content (in input order).
pub fn build_obf(version: u32, sections: &[(u32, Vec<u8>)]) -> (Vec<u8>, Vec<usize>) {
    build_obf_with_trailer(version, version, true, sections)
}

/// Same, with full control over the trailer for corruption scenarios.
pub fn build_obf_with_trailer(
    version: u32,
    version_confirm: u32,
    write_trailer: bool,
    sections: &[(u32, Vec<u8>)],
) -> (Vec<u8>, Vec<usize>) {
    let mut w = Writer::new();
    w.write_varint_field(obf::F_VERSION, u64::from(version));
    w.write_varint_field(obf::F_DATE_CREATED, 1_650_000_000_000);
    let mut offsets = Vec::new();
    for (field, body) in sections {
        let tag_len = varint_len(u64::from((field << 3) | 7));
        offsets.push(w.len() + tag_len + 4);
        let mut b = Writer::new();
        b.write_raw(body);
        w.write_seekable_field(*field, &b);
    }
    if write_trailer {
        w.write_varint_field(obf::F_VERSION_CONFIRM, u64::from(version_confirm));
    }
    (w.into_bytes(), offsets)
}

fn string_table(entries: &[&str]) -> Writer {
    let mut w = Writer::new();
    for e in entries {
        w.write_string_field(1, e);
    }
    w
}

fn write_sint_field(w: &mut Writer, field: u32, value: i32) {
    w.write_tag(field, WireType::Varint);
    w.write_sint32(value);
}

/// Edges of a box as sint deltas against the parent, then a shift-to-data
/// pointer and the embedded data blob.
fn leaf_box_content(
    parent: &Bbox31,
    bbox: &Bbox31,
    ocean: Option<bool>,
    block_body: &[u8],
) -> Vec<u8> {
    let mut edges = Writer::new();
    write_sint_field(&mut edges, map::BOX_LEFT, bbox.left as i32 - parent.left as i32);
    write_sint_field(&mut edges, map::BOX_RIGHT, bbox.right as i32 - parent.right as i32);
    write_sint_field(&mut edges, map::BOX_TOP, bbox.top as i32 - parent.top as i32);
    write_sint_field(&mut edges, map::BOX_BOTTOM, bbox.bottom as i32 - parent.bottom as i32);
    if let Some(sea) = ocean {
        edges.write_varint_field(map::BOX_OCEAN, u64::from(sea));
    }

    let mut blob = Writer::new();
    blob.write_varint32(block_body.len() as u32);
    blob.write_raw(block_body);

    // shift points at the blob, past the shift field and the wrapper tag
    let wrapper_tag = varint_len(u64::from((EMBED_FIELD << 3) | 2));
    let shift = edges.len() + 5 + wrapper_tag + varint_len(blob.len() as u64);

    let mut w = Writer::new();
    w.write_raw(&edges.into_bytes());
    w.write_tag(map::BOX_SHIFT_TO_DATA, WireType::Fixed32);
    w.write_fixed32_be(shift as u32);
    w.write_tag(EMBED_FIELD, WireType::LengthDelimited);
    w.write_varint32(blob.len() as u32);
    w.write_raw(&blob.into_bytes());
    w.into_bytes()
}

// ---- map section ----------------------------------------------------------

pub struct MapLevelSpec {
    pub min_zoom: u32,
    pub max_zoom: u32,
    pub bbox: Bbox31,
    pub leaves: Vec<MapLeafSpec>,
}

pub struct MapLeafSpec {
    pub bbox: Bbox31,
    pub ocean: Option<bool>,
    /// MapDataBlock body, see [`map_block`].
    pub block: Vec<u8>,
}

/// Body of one map index section.
pub fn map_section(
    name: &str,
    rules: &[(u32, u32, &str, &str)],
    levels: &[MapLevelSpec],
) -> Vec<u8> {
    let mut w = Writer::new();
    w.write_string_field(map::IDX_NAME, name);
    for &(id, kind, tag, value) in rules {
        let mut r = Writer::new();
        r.write_string_field(map::RULE_TAG, tag);
        r.write_string_field(map::RULE_VALUE, value);
        r.write_varint_field(map::RULE_ID, u64::from(id));
        r.write_varint_field(map::RULE_TYPE, u64::from(kind));
        w.write_message_field(map::IDX_RULES, &r);
    }
    for level in levels {
        let mut l = Writer::new();
        l.write_varint_field(map::LEVEL_MAX_ZOOM, u64::from(level.max_zoom));
        l.write_varint_field(map::LEVEL_MIN_ZOOM, u64::from(level.min_zoom));
        l.write_varint_field(map::LEVEL_LEFT, u64::from(level.bbox.left));
        l.write_varint_field(map::LEVEL_RIGHT, u64::from(level.bbox.right));
        l.write_varint_field(map::LEVEL_TOP, u64::from(level.bbox.top));
        l.write_varint_field(map::LEVEL_BOTTOM, u64::from(level.bbox.bottom));
        for leaf in &level.leaves {
            let content = leaf_box_content(&level.bbox, &leaf.bbox, leaf.ocean, &leaf.block);
            let mut b = Writer::new();
            b.write_raw(&content);
            l.write_seekable_field(map::LEVEL_BOXES, &b);
        }
        w.write_seekable_field(map::IDX_LEVELS, &l);
    }
    w.into_bytes()
}

/// Body of a MapDataBlock.
pub fn map_block(base_id: u64, objects: &[Vec<u8>], strings: &[&str]) -> Vec<u8> {
    let mut w = Writer::new();
    w.write_varint_field(map::BLOCK_BASE_ID, base_id);
    for o in objects {
        let mut ow = Writer::new();
        ow.write_raw(o);
        w.write_message_field(map::BLOCK_DATA_OBJECTS, &ow);
    }
    if !strings.is_empty() {
        w.write_message_field(map::BLOCK_STRING_TABLE, &string_table(strings));
    }
    w.into_bytes()
}

/// One map object. Point coordinates must sit on the 32-unit lattice so
/// the coordinate shift is lossless; the first delta is taken against the
/// leaf's masked top-left corner.
pub fn map_object(
    leaf: &Bbox31,
    points: &[(u32, u32)],
    id: i64,
    types: &[u32],
    names: &[(u32, u32)],
    area: bool,
) -> Vec<u8> {
    let mask = !((1u32 << SHIFT_COORDINATES) - 1);
    let mut geom = Writer::new();
    let mut px = leaf.left & mask;
    let mut py = leaf.top & mask;
    for &(x, y) in points {
        geom.write_sint32(((i64::from(x) - i64::from(px)) >> SHIFT_COORDINATES) as i32);
        geom.write_sint32(((i64::from(y) - i64::from(py)) >> SHIFT_COORDINATES) as i32);
        px = x;
        py = y;
    }

    let mut w = Writer::new();
    let coord_field = if area { map::DATA_AREA_COORDINATES } else { map::DATA_COORDINATES };
    w.write_message_field(coord_field, &geom);
    if !types.is_empty() {
        let mut t = Writer::new();
        for &id in types {
            t.write_varint32(id);
        }
        w.write_message_field(map::DATA_TYPES, &t);
    }
    if !names.is_empty() {
        let mut n = Writer::new();
        for &(rule, sid) in names {
            n.write_varint32(rule);
            n.write_varint32(sid);
        }
        w.write_message_field(map::DATA_STRING_NAMES, &n);
    }
    w.write_tag(map::DATA_ID, WireType::Varint);
    w.write_sint64(id);
    w.into_bytes()
}

// ---- routing section ------------------------------------------------------

pub struct RoutingLeafSpec {
    pub bbox: Bbox31,
    pub basemap: bool,
    /// RouteDataBlock body, see [`route_block`].
    pub block: Vec<u8>,
}

/// Body of one routing index section with leaf root boxes.
pub fn routing_section(
    name: &str,
    rules: &[(u32, &str, &str)],
    leaves: &[RoutingLeafSpec],
) -> Vec<u8> {
    let mut w = Writer::new();
    w.write_string_field(routing::IDX_NAME, name);
    for &(id, tag, value) in rules {
        let mut r = Writer::new();
        r.write_string_field(routing::RULE_TAG, tag);
        r.write_string_field(routing::RULE_VALUE, value);
        r.write_varint_field(routing::RULE_ID, u64::from(id));
        w.write_message_field(routing::IDX_RULES, &r);
    }
    for leaf in leaves {
        // root boxes are absolute: deltas against a zero parent
        let content = leaf_box_content(&Bbox31::default(), &leaf.bbox, None, &leaf.block);
        let mut b = Writer::new();
        b.write_raw(&content);
        let field =
            if leaf.basemap { routing::IDX_BASEMAP_BOXES } else { routing::IDX_ROOT_BOXES };
        w.write_seekable_field(field, &b);
    }
    w.into_bytes()
}

/// Body of a RouteDataBlock.
pub fn route_block(
    objects: &[Vec<u8>],
    id_table: &[i64],
    strings: &[&str],
    restrictions: &[(u32, u32, u32, u32)],
) -> Vec<u8> {
    let mut w = Writer::new();
    for o in objects {
        let mut ow = Writer::new();
        ow.write_raw(o);
        w.write_message_field(routing::BLOCK_DATA_OBJECTS, &ow);
    }
    for &(from, to, via, kind) in restrictions {
        let mut r = Writer::new();
        r.write_varint_field(routing::RESTRICTION_FROM, u64::from(from));
        r.write_varint_field(routing::RESTRICTION_TO, u64::from(to));
        if via != 0 {
            r.write_varint_field(routing::RESTRICTION_VIA, u64::from(via));
        }
        r.write_varint_field(routing::RESTRICTION_TYPE, u64::from(kind));
        w.write_message_field(routing::BLOCK_RESTRICTIONS, &r);
    }
    let mut t = Writer::new();
    let mut prev = 0i64;
    for &id in id_table {
        t.write_sint64_field(routing::ID_TABLE_ROUTE_ID, id - prev);
        prev = id;
    }
    w.write_message_field(routing::BLOCK_ID_TABLE, &t);
    if !strings.is_empty() {
        w.write_message_field(routing::BLOCK_STRING_TABLE, &string_table(strings));
    }
    w.into_bytes()
}

/// One road object. `id` indexes the block id table. Point coordinates
/// must sit on the 16-unit lattice.
pub fn route_object(
    leaf: &Bbox31,
    points: &[(u32, u32)],
    id: u64,
    types: &[u32],
    names: &[(u32, u32)],
) -> Vec<u8> {
    let mut geom = Writer::new();
    let mut px = (leaf.left >> ROUTE_SHIFT_COORDINATES) as i64;
    let mut py = (leaf.top >> ROUTE_SHIFT_COORDINATES) as i64;
    for &(x, y) in points {
        let sx = (x >> ROUTE_SHIFT_COORDINATES) as i64;
        let sy = (y >> ROUTE_SHIFT_COORDINATES) as i64;
        geom.write_sint32((sx - px) as i32);
        geom.write_sint32((sy - py) as i32);
        px = sx;
        py = sy;
    }

    let mut w = Writer::new();
    w.write_message_field(routing::DATA_POINTS, &geom);
    if !types.is_empty() {
        let mut t = Writer::new();
        for &ty in types {
            t.write_varint32(ty);
        }
        w.write_message_field(routing::DATA_TYPES, &t);
    }
    if !names.is_empty() {
        let mut n = Writer::new();
        for &(rule, sid) in names {
            n.write_varint32(rule);
            n.write_varint32(sid);
        }
        w.write_message_field(routing::DATA_STRING_NAMES, &n);
    }
    w.write_varint_field(routing::DATA_ROUTE_ID, id);
    w.into_bytes()
}

// ---- HH section -----------------------------------------------------------

pub struct HHPointSpec {
    pub file_id: u32,
    pub global_id: i64,
    pub dual_global_id: i64,
    pub x: u32,
    pub y: u32,
    pub cluster_id: u32,
    pub road_id: i64,
    /// `(start << 1) | forward`
    pub road_start_end: u32,
    pub incomplete: bool,
    pub tag_values: Vec<u32>,
}

/// Body of one HH routing index section.
pub fn hh_section(
    edition: u64,
    profile: &str,
    params: &[&str],
    tag_values: &[&str],
    bbox: Bbox31,
    points: &[HHPointSpec],
    segment_blocks: &[Vec<u8>],
) -> Vec<u8> {
    let mut w = Writer::new();
    w.write_varint_field(hh::IDX_EDITION, edition);
    w.write_string_field(hh::IDX_PROFILE, profile);
    for p in params {
        w.write_string_field(hh::IDX_PROFILE_PARAMS, p);
    }
    if !tag_values.is_empty() {
        w.write_message_field(hh::IDX_TAG_VALUES_TABLE, &string_table(tag_values));
    }

    let mut boxw = Writer::new();
    write_sint_field(&mut boxw, hh::PBOX_LEFT, bbox.left as i32);
    write_sint_field(&mut boxw, hh::PBOX_RIGHT, bbox.right as i32);
    write_sint_field(&mut boxw, hh::PBOX_TOP, bbox.top as i32);
    write_sint_field(&mut boxw, hh::PBOX_BOTTOM, bbox.bottom as i32);
    for p in points {
        let mut pw = Writer::new();
        pw.write_varint_field(hh::PNT_FILE_ID, u64::from(p.file_id));
        write_sint_field(&mut pw, hh::PNT_DX, p.x as i32 - bbox.left as i32);
        write_sint_field(&mut pw, hh::PNT_DY, p.y as i32 - bbox.top as i32);
        pw.write_varint_field(hh::PNT_GLOBAL_ID, p.global_id as u64);
        pw.write_varint_field(hh::PNT_CLUSTER_ID, u64::from(p.cluster_id));
        pw.write_varint_field(hh::PNT_ROAD_ID, p.road_id as u64);
        pw.write_varint_field(hh::PNT_ROAD_START_END, u64::from(p.road_start_end));
        if p.dual_global_id >= 0 {
            pw.write_varint_field(hh::PNT_DUAL_POINT_ID, p.dual_global_id as u64);
        }
        if p.incomplete {
            pw.write_varint_field(hh::PNT_PARTIAL_IND, 1);
        }
        if !p.tag_values.is_empty() {
            let mut tv = Writer::new();
            for &t in &p.tag_values {
                tv.write_varint32(t);
            }
            pw.write_message_field(hh::PNT_TAG_VALUE_IDS, &tv);
        }
        boxw.write_message_field(hh::PBOX_POINTS, &pw);
    }
    w.write_seekable_field(hh::IDX_POINT_BOXES, &boxw);

    for block in segment_blocks {
        let mut b = Writer::new();
        b.write_raw(block);
        w.write_seekable_field(hh::IDX_POINT_SEGMENTS, &b);
    }
    w.into_bytes()
}

/// Content of one segment block. `point_segments` are `(in, out)`
/// decisecond arrays in file-id order starting at `id_range_start`.
pub fn hh_segment_block(
    id_range_start: u32,
    id_range_length: u32,
    profile_id: u32,
    inner_blocks: &[Vec<u8>],
    point_segments: &[(Vec<i32>, Vec<i32>)],
) -> Vec<u8> {
    let mut w = Writer::new();
    w.write_varint_field(hh::SEG_ID_RANGE_START, u64::from(id_range_start));
    w.write_varint_field(hh::SEG_ID_RANGE_LENGTH, u64::from(id_range_length));
    w.write_varint_field(hh::SEG_PROFILE_ID, u64::from(profile_id));
    for inner in inner_blocks {
        let mut b = Writer::new();
        b.write_raw(inner);
        w.write_seekable_field(hh::SEG_INNER_BLOCKS, &b);
    }
    for (seg_in, seg_out) in point_segments {
        let mut s = Writer::new();
        let mut iw = Writer::new();
        for &d in seg_in {
            iw.write_varint64(d as u64);
        }
        s.write_message_field(hh::PSEG_IN, &iw);
        let mut ow = Writer::new();
        for &d in seg_out {
            ow.write_varint64(d as u64);
        }
        s.write_message_field(hh::PSEG_OUT, &ow);
        w.write_message_field(hh::SEG_POINT_SEGMENTS, &s);
    }
    w.into_bytes()
}

// ---- transport section ----------------------------------------------------

pub struct TransportStopSpec {
    /// Zoom-24 position, absolute (the tree bounds are written absolute).
    pub x24: u32,
    pub y24: u32,
    pub id: i64,
    pub name_sid: u32,
    pub routes_ids: Vec<u64>,
}

/// Body of one transport index section plus the within-body offsets of
/// the route records (for `load_transport_routes`).
pub fn transport_section(
    name: &str,
    bbox: Bbox31,
    stops: &[TransportStopSpec],
    strings: &[&str],
    routes: &[Vec<u8>],
) -> (Vec<u8>, Vec<usize>) {
    let mut w = Writer::new();
    w.write_string_field(transport::IDX_NAME, name);

    // route records first, wrapped in the routes field the header skips
    let mut area = Writer::new();
    let mut rel = Vec::new();
    for r in routes {
        rel.push(area.len());
        area.write_varint32(r.len() as u32);
        area.write_raw(r);
    }
    let tag_len = varint_len(u64::from((transport::IDX_ROUTES << 3) | 2));
    let area_start = w.len() + tag_len + varint_len(area.len() as u64);
    let offsets = rel.iter().map(|o| area_start + o).collect();
    w.write_message_field(transport::IDX_ROUTES, &area);

    let mut tree = Writer::new();
    write_sint_field(&mut tree, transport::TREE_LEFT, bbox.left as i32);
    write_sint_field(&mut tree, transport::TREE_RIGHT, bbox.right as i32);
    write_sint_field(&mut tree, transport::TREE_TOP, bbox.top as i32);
    write_sint_field(&mut tree, transport::TREE_BOTTOM, bbox.bottom as i32);
    for stop in stops {
        let mut s = Writer::new();
        write_sint_field(&mut s, transport::STOP_DX, stop.x24 as i32 - bbox.left as i32);
        write_sint_field(&mut s, transport::STOP_DY, stop.y24 as i32 - bbox.top as i32);
        s.write_tag(transport::STOP_ID, WireType::Varint);
        s.write_sint64(stop.id);
        s.write_varint_field(transport::STOP_NAME, u64::from(stop.name_sid));
        for &rid in &stop.routes_ids {
            s.write_varint_field(transport::STOP_ROUTES_IDS, rid);
        }
        tree.write_message_field(transport::TREE_LEAFS, &s);
    }
    w.write_seekable_field(transport::IDX_STOPS, &tree);

    w.write_message_field(transport::IDX_STRING_TABLE, &string_table(strings));
    (w.into_bytes(), offsets)
}

/// One transport route record body (without the length prefix the loader
/// reads first).
pub fn transport_route(
    id: u64,
    route_ref: &str,
    kind_sid: u32,
    name_sid: u32,
    dist: u32,
    geometry: &[&[(u32, u32)]],
) -> Vec<u8> {
    let mut w = Writer::new();
    w.write_varint_field(transport::ROUTE_ID, id);
    w.write_string_field(transport::ROUTE_REF, route_ref);
    w.write_varint_field(transport::ROUTE_TYPE, u64::from(kind_sid));
    w.write_varint_field(transport::ROUTE_NAME, u64::from(name_sid));
    w.write_varint_field(transport::ROUTE_DISTANCE, u64::from(dist));
    if !geometry.is_empty() {
        let mut g = Writer::new();
        let mut px = 0i64;
        let mut py = 0i64;
        for (i, way) in geometry.iter().enumerate() {
            if i > 0 {
                g.write_sint32(0);
                g.write_sint32(0);
            }
            for &(x, y) in *way {
                g.write_sint32(((i64::from(x) - px) >> SHIFT_COORDINATES) as i32);
                g.write_sint32(((i64::from(y) - py) >> SHIFT_COORDINATES) as i32);
                px = i64::from(x);
                py = i64::from(y);
            }
        }
        w.write_message_field(transport::ROUTE_GEOMETRY, &g);
    }
    w.into_bytes()
}
