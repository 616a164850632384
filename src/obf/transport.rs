//! Transport index
//!
//! Stops are leaves of an R-tree; routes live elsewhere in the section and
//! are referenced from stops by file offset. Tree bounds, stop positions
//! and route stop positions use zoom-24 tile coordinates (transport
//! queries are issued at zoom 24); route geometry is stored like map
//! geometry and materializes at full 31-bit precision.
//!
//! Names are deferred: stops and routes first carry numeric ids into the
//! section string table and are resolved in a second pass.

use butterfly_common::Result;
use rustc_hash::FxHashMap;

use crate::geo::{Bbox31, SHIFT_COORDINATES};
use crate::query::SearchQuery;
use crate::strings::{IndexStringTable, StringRef};
use crate::wire::{Codec, Tag};

/// Transport coordinates are stored at this zoom.
pub const TRANSPORT_STOP_ZOOM: u32 = 24;

// OsmAndTransportIndex
pub const IDX_NAME: u32 = 1;
pub const IDX_ROUTES: u32 = 3;
pub const IDX_STOPS: u32 = 6;
pub const IDX_STRING_TABLE: u32 = 9;
pub const IDX_INCOMPLETE_ROUTES: u32 = 18;

// TransportStopsTree
pub const TREE_LEFT: u32 = 1;
pub const TREE_RIGHT: u32 = 2;
pub const TREE_TOP: u32 = 3;
pub const TREE_BOTTOM: u32 = 4;
pub const TREE_LEAFS: u32 = 5;
pub const TREE_SUBTREES: u32 = 6;
pub const TREE_BASE_ID: u32 = 16;

// TransportStop
pub const STOP_DX: u32 = 1;
pub const STOP_DY: u32 = 2;
pub const STOP_ID: u32 = 5;
pub const STOP_NAME: u32 = 6;
pub const STOP_NAME_EN: u32 = 7;
pub const STOP_ROUTES_REFS: u32 = 8;
pub const STOP_ROUTES_IDS: u32 = 9;
pub const STOP_DELETED_ROUTES_IDS: u32 = 10;
pub const STOP_ADDITIONAL_NAME_PAIRS: u32 = 11;
pub const STOP_EXITS: u32 = 12;

// TransportStopExit
pub const EXIT_DX: u32 = 1;
pub const EXIT_DY: u32 = 2;
pub const EXIT_REF: u32 = 3;

// TransportRoute
pub const ROUTE_ID: u32 = 1;
pub const ROUTE_TYPE: u32 = 3;
pub const ROUTE_OPERATOR: u32 = 4;
pub const ROUTE_REF: u32 = 5;
pub const ROUTE_NAME: u32 = 6;
pub const ROUTE_NAME_EN: u32 = 7;
pub const ROUTE_DISTANCE: u32 = 8;
pub const ROUTE_COLOR: u32 = 9;
pub const ROUTE_GEOMETRY: u32 = 10;
pub const ROUTE_SCHEDULE: u32 = 11;
pub const ROUTE_DIRECT_STOPS: u32 = 15;

// TransportRouteStop
pub const RSTOP_ID: u32 = 1;
pub const RSTOP_DX: u32 = 2;
pub const RSTOP_DY: u32 = 3;
pub const RSTOP_NAME: u32 = 4;
pub const RSTOP_NAME_EN: u32 = 5;

// TransportRouteSchedule
pub const SCHED_TRIP_INTERVALS: u32 = 1;
pub const SCHED_AVG_STOP_INTERVALS: u32 = 2;
pub const SCHED_AVG_WAIT_INTERVALS: u32 = 3;

// IncompleteTransportRoutes / IncompleteTransportRoute
pub const INC_ROUTES: u32 = 6;
pub const INC_ID: u32 = 1;
pub const INC_ROUTE_REF: u32 = 5;

/// One transport index section.
#[derive(Debug, Default)]
pub struct TransportIndex {
    pub name: String,
    pub offset: usize,
    pub length: usize,
    /// Stops-tree bounds in zoom-24 coordinates, stored absolute.
    pub bbox: Bbox31,
    pub stops_offset: usize,
    pub stops_length: usize,
    pub string_table: IndexStringTable,
    pub incomplete_routes_offset: usize,
    pub incomplete_routes_length: usize,
}

/// A public-transport stop.
#[derive(Debug, Clone, Default)]
pub struct TransportStop {
    pub id: i64,
    pub file_offset: usize,
    /// Zoom-24 position.
    pub x24: u32,
    pub y24: u32,
    pub name: StringRef,
    pub name_en: StringRef,
    /// `(language, name)` pairs.
    pub names: Vec<(StringRef, StringRef)>,
    /// Absolute file offsets of the routes passing this stop.
    pub references_to_routes: Vec<u32>,
    pub routes_ids: Vec<u64>,
    pub deleted_routes_ids: Vec<u64>,
    pub exits: Vec<TransportStopExit>,
}

impl TransportStop {
    pub fn x31(&self) -> u32 {
        self.x24 << (31 - TRANSPORT_STOP_ZOOM)
    }

    pub fn y31(&self) -> u32 {
        self.y24 << (31 - TRANSPORT_STOP_ZOOM)
    }

    fn resolve_names(&mut self, table: &FxHashMap<u32, String>) {
        self.name.resolve(table);
        self.name_en.resolve(table);
        for (l, n) in &mut self.names {
            l.resolve(table);
            n.resolve(table);
        }
        for exit in &mut self.exits {
            exit.reference.resolve(table);
        }
    }
}

/// A station exit attached to a stop.
#[derive(Debug, Clone, Default)]
pub struct TransportStopExit {
    pub x24: u32,
    pub y24: u32,
    pub reference: StringRef,
}

/// Interval tables of a scheduled route.
#[derive(Debug, Clone, Default)]
pub struct TransportSchedule {
    pub trip_intervals: Vec<u32>,
    pub avg_stop_intervals: Vec<u32>,
    pub avg_wait_intervals: Vec<u32>,
}

/// A public-transport route with geometry and its forward stop list.
#[derive(Debug, Clone, Default)]
pub struct TransportRoute {
    pub id: u64,
    pub file_offset: usize,
    pub route_ref: String,
    pub kind: StringRef,
    pub name: StringRef,
    pub name_en: StringRef,
    pub operator: StringRef,
    pub color: StringRef,
    /// Meters.
    pub dist: u32,
    pub forward_stops: Vec<TransportStop>,
    /// Polylines in 31-bit coordinates; a `(0, 0)` delta in the file
    /// separates them (pen-up).
    pub geometry: Vec<Vec<(u32, u32)>>,
    pub schedule: Option<TransportSchedule>,
}

impl TransportRoute {
    fn resolve_names(&mut self, table: &FxHashMap<u32, String>) {
        self.kind.resolve(table);
        self.name.resolve(table);
        self.name_en.resolve(table);
        self.operator.resolve(table);
        self.color.resolve(table);
        for stop in &mut self.forward_stops {
            stop.resolve_names(table);
        }
    }
}

fn add_delta(base: u32, delta: i32) -> u32 {
    (i64::from(base) + i64::from(delta)) as u32
}

impl TransportIndex {
    /// Shallow read at open time: name, tree bounds and the extents of the
    /// string table, the stops tree and the incomplete-routes side table.
    pub fn read_header(data: &[u8], offset: usize, length: usize) -> Result<TransportIndex> {
        let mut index = TransportIndex { offset, length, ..Default::default() };
        let mut codec = Codec::at(data, offset);
        let old = codec.push_limit(length)?;
        loop {
            match codec.read_tag()? {
                Tag::End => break,
                Tag::Field { number: IDX_NAME, .. } => index.name = codec.read_string()?,
                Tag::Field { number: IDX_ROUTES, wire } => codec.skip_field(wire)?,
                Tag::Field { number: IDX_STOPS, .. } => {
                    let len = codec.read_fixed32_be()? as usize;
                    index.stops_offset = codec.position();
                    index.stops_length = len;
                    let inner = codec.push_limit(len)?;
                    index.read_tree_bounds(&mut codec)?;
                    let rest = codec.bytes_until_limit();
                    codec.skip(rest)?;
                    codec.pop_limit(inner);
                }
                Tag::Field { number: IDX_STRING_TABLE, .. } => {
                    let len = codec.read_varint32()? as usize;
                    index.string_table = IndexStringTable::new(codec.position(), len);
                    codec.skip(len)?;
                }
                Tag::Field { number: IDX_INCOMPLETE_ROUTES, .. } => {
                    let len = codec.read_varint32()? as usize;
                    index.incomplete_routes_offset = codec.position();
                    index.incomplete_routes_length = len;
                    codec.skip(len)?;
                }
                Tag::Field { wire, .. } => codec.skip_field(wire)?,
            }
        }
        codec.pop_limit(old);
        Ok(index)
    }

    fn read_tree_bounds(&mut self, codec: &mut Codec<'_>) -> Result<()> {
        let mut init = 0u8;
        loop {
            match codec.read_tag()? {
                Tag::End => break,
                Tag::Field { number: TREE_LEFT, .. } => {
                    self.bbox.left = codec.read_sint32()? as u32;
                    init |= 1;
                }
                Tag::Field { number: TREE_RIGHT, .. } => {
                    self.bbox.right = codec.read_sint32()? as u32;
                    init |= 2;
                }
                Tag::Field { number: TREE_TOP, .. } => {
                    self.bbox.top = codec.read_sint32()? as u32;
                    init |= 4;
                }
                Tag::Field { number: TREE_BOTTOM, .. } => {
                    self.bbox.bottom = codec.read_sint32()? as u32;
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

    /// Hydrated entry from the cache manifest.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        name: String,
        offset: usize,
        length: usize,
        bbox: Bbox31,
        stops_offset: usize,
        stops_length: usize,
        string_table_offset: usize,
        string_table_length: usize,
        incomplete_routes_offset: usize,
        incomplete_routes_length: usize,
    ) -> TransportIndex {
        TransportIndex {
            name,
            offset,
            length,
            bbox,
            stops_offset,
            stops_length,
            string_table: IndexStringTable::new(string_table_offset, string_table_length),
            incomplete_routes_offset,
            incomplete_routes_length,
        }
    }

    /// Search the stops tree; results come back with names resolved.
    /// The query bbox must be in zoom-24 coordinates.
    pub fn search(&self, data: &[u8], query: &mut SearchQuery) -> Result<Vec<TransportStop>> {
        if self.stops_length == 0 || !self.bbox.intersects(&query.bbox) {
            return Ok(Vec::new());
        }
        let mut results = Vec::new();
        let mut codec = Codec::at(data, self.stops_offset);
        let old = codec.push_limit(self.stops_length)?;
        search_transport_tree(&mut codec, &Bbox31::default(), query, &mut results)?;
        codec.pop_limit(old);

        let table = self.string_table.get_or_read(data)?;
        for stop in &mut results {
            stop.resolve_names(table);
        }
        Ok(results)
    }

    /// Whether `file_offset` points inside this section.
    pub fn contains_offset(&self, file_offset: usize) -> bool {
        self.offset <= file_offset && file_offset - self.offset < self.length
    }

    /// Load the routes at the given absolute offsets, names resolved.
    /// Offsets are visited in ascending order for sequential access.
    pub fn load_routes(
        &self,
        data: &[u8],
        offsets: &[usize],
    ) -> Result<FxHashMap<usize, TransportRoute>> {
        let mut sorted: Vec<usize> = offsets.to_vec();
        sorted.sort_unstable();
        sorted.dedup();

        let mut result = FxHashMap::default();
        for &offset in &sorted {
            let route = read_transport_route(data, offset)?;
            result.insert(offset, route);
        }
        let table = self.string_table.get_or_read(data)?;
        for route in result.values_mut() {
            route.resolve_names(table);
        }
        Ok(result)
    }

    /// The incomplete-routes side table: route id to the offsets where the
    /// route's geometry resumes.
    pub fn incomplete_routes(&self, data: &[u8]) -> Result<FxHashMap<u64, Vec<usize>>> {
        let mut map: FxHashMap<u64, Vec<usize>> = FxHashMap::default();
        if self.incomplete_routes_length == 0 {
            return Ok(map);
        }
        let mut codec = Codec::at(data, self.incomplete_routes_offset);
        let old = codec.push_limit(self.incomplete_routes_length)?;
        loop {
            match codec.read_tag()? {
                Tag::End => break,
                Tag::Field { number: INC_ROUTES, .. } => {
                    let len = codec.read_varint32()? as usize;
                    let inner = codec.push_limit(len)?;
                    let mut route_id = 0u64;
                    let mut route_offset = 0usize;
                    loop {
                        match codec.read_tag()? {
                            Tag::End => break,
                            Tag::Field { number: INC_ID, .. } => {
                                route_id = codec.read_varint64()?;
                            }
                            Tag::Field { number: INC_ROUTE_REF, .. } => {
                                let shift = codec.read_varint32()? as usize;
                                // older writers stored absolute offsets
                                route_offset =
                                    if shift > self.offset { shift } else { self.offset + shift };
                            }
                            Tag::Field { wire, .. } => codec.skip_field(wire)?,
                        }
                    }
                    codec.pop_limit(inner);
                    map.entry(route_id).or_default().push(route_offset);
                }
                Tag::Field { wire, .. } => codec.skip_field(wire)?,
            }
        }
        codec.pop_limit(old);
        Ok(map)
    }
}

/// Descent over the stops tree: delta bounds, leaf stops, subtree links
/// and the retroactive base id.
fn search_transport_tree(
    codec: &mut Codec<'_>,
    parent: &Bbox31,
    query: &mut SearchQuery,
    results: &mut Vec<TransportStop>,
) -> Result<()> {
    query.stats.read_subtrees += 1;
    let node_start = results.len();
    let mut bbox = *parent;
    let mut init = 0u8;
    loop {
        if query.is_cancelled() {
            return Ok(());
        }
        if init == 0xf {
            init = 0;
            if !bbox.intersects(&query.bbox) {
                return Ok(());
            }
            query.stats.accepted_subtrees += 1;
        }
        match codec.read_tag()? {
            Tag::End => break,
            Tag::Field { number: TREE_LEFT, .. } => {
                bbox.left = add_delta(parent.left, codec.read_sint32()?);
                init |= 1;
            }
            Tag::Field { number: TREE_RIGHT, .. } => {
                bbox.right = add_delta(parent.right, codec.read_sint32()?);
                init |= 2;
            }
            Tag::Field { number: TREE_TOP, .. } => {
                bbox.top = add_delta(parent.top, codec.read_sint32()?);
                init |= 4;
            }
            Tag::Field { number: TREE_BOTTOM, .. } => {
                bbox.bottom = add_delta(parent.bottom, codec.read_sint32()?);
                init |= 8;
            }
            Tag::Field { number: TREE_LEAFS, .. } => {
                let stop_offset = codec.position();
                let len = codec.read_varint32()? as usize;
                let inner = codec.push_limit(len)?;
                query.stats.visited_objects += 1;
                if let Some(stop) = read_transport_stop(codec, stop_offset, &bbox, query)? {
                    results.push(stop);
                }
                let rest = codec.bytes_until_limit();
                codec.skip(rest)?;
                codec.pop_limit(inner);
            }
            Tag::Field { number: TREE_SUBTREES, .. } => {
                let len = codec.read_fixed32_be()? as usize;
                let child_offset = codec.position();
                let inner = codec.push_limit(len)?;
                search_transport_tree(codec, &bbox, query, results)?;
                codec.pop_limit(inner);
                codec.seek(child_offset + len)?;
            }
            Tag::Field { number: TREE_BASE_ID, .. } => {
                let base_id = codec.read_varint64()?;
                for stop in &mut results[node_start..] {
                    stop.id += base_id as i64;
                }
            }
            Tag::Field { wire, .. } => codec.skip_field(wire)?,
        }
    }
    Ok(())
}

/// Read one stop leaf. The position fields must come first so stops
/// outside the query are dropped without decoding the rest.
fn read_transport_stop(
    codec: &mut Codec<'_>,
    stop_offset: usize,
    bounds: &Bbox31,
    query: &mut SearchQuery,
) -> Result<Option<TransportStop>> {
    let Tag::Field { number: STOP_DX, .. } = codec.read_tag()? else {
        return Ok(None);
    };
    let x = add_delta(bounds.left, codec.read_sint32()?);
    let Tag::Field { number: STOP_DY, .. } = codec.read_tag()? else {
        return Ok(None);
    };
    let y = add_delta(bounds.top, codec.read_sint32()?);
    if !query.bbox.contains_point(x, y) {
        return Ok(None);
    }
    query.stats.accepted_objects += 1;

    let mut stop = TransportStop {
        file_offset: stop_offset,
        x24: x,
        y24: y,
        ..Default::default()
    };
    loop {
        match codec.read_tag()? {
            Tag::End => break,
            Tag::Field { number: STOP_ROUTES_REFS, .. } => {
                let shift = codec.read_varint32()?;
                stop.references_to_routes.push(stop_offset as u32 - shift);
            }
            Tag::Field { number: STOP_ROUTES_IDS, .. } => {
                stop.routes_ids.push(codec.read_varint64()?);
            }
            Tag::Field { number: STOP_DELETED_ROUTES_IDS, .. } => {
                stop.deleted_routes_ids.push(codec.read_varint64()?);
            }
            Tag::Field { number: STOP_NAME, .. } => {
                stop.name = StringRef::Unresolved(codec.read_varint32()?);
            }
            Tag::Field { number: STOP_NAME_EN, .. } => {
                stop.name_en = StringRef::Unresolved(codec.read_varint32()?);
            }
            Tag::Field { number: STOP_ADDITIONAL_NAME_PAIRS, .. } => {
                let len = codec.read_varint32()? as usize;
                let inner = codec.push_limit(len)?;
                while codec.bytes_until_limit() > 0 {
                    let lang = codec.read_varint32()?;
                    let name = codec.read_varint32()?;
                    stop.names.push((StringRef::Unresolved(lang), StringRef::Unresolved(name)));
                }
                codec.pop_limit(inner);
            }
            Tag::Field { number: STOP_ID, .. } => {
                stop.id = codec.read_sint64()?;
            }
            Tag::Field { number: STOP_EXITS, .. } => {
                let len = codec.read_varint32()? as usize;
                let inner = codec.push_limit(len)?;
                stop.exits.push(read_transport_stop_exit(codec, bounds)?);
                codec.pop_limit(inner);
            }
            Tag::Field { wire, .. } => codec.skip_field(wire)?,
        }
    }
    Ok(Some(stop))
}

fn read_transport_stop_exit(codec: &mut Codec<'_>, bounds: &Bbox31) -> Result<TransportStopExit> {
    let mut exit = TransportStopExit::default();
    loop {
        match codec.read_tag()? {
            Tag::End => break,
            Tag::Field { number: EXIT_REF, .. } => {
                exit.reference = StringRef::Unresolved(codec.read_varint32()?);
            }
            Tag::Field { number: EXIT_DX, .. } => {
                exit.x24 = add_delta(bounds.left, codec.read_sint32()?);
            }
            Tag::Field { number: EXIT_DY, .. } => {
                exit.y24 = add_delta(bounds.top, codec.read_sint32()?);
            }
            Tag::Field { wire, .. } => codec.skip_field(wire)?,
        }
    }
    Ok(exit)
}

/// Read one route record at an absolute section offset.
fn read_transport_route(data: &[u8], offset: usize) -> Result<TransportRoute> {
    let mut codec = Codec::at(data, offset);
    let length = codec.read_varint32()? as usize;
    let old = codec.push_limit(length)?;

    let mut route = TransportRoute { file_offset: offset, ..Default::default() };
    let mut stop_id = 0i64;
    let mut stop_x = 0u32;
    let mut stop_y = 0u32;
    loop {
        match codec.read_tag()? {
            Tag::End => break,
            Tag::Field { number: ROUTE_ID, .. } => route.id = codec.read_varint64()?,
            Tag::Field { number: ROUTE_DISTANCE, .. } => route.dist = codec.read_varint32()?,
            Tag::Field { number: ROUTE_REF, .. } => route.route_ref = codec.read_string()?,
            Tag::Field { number: ROUTE_TYPE, .. } => {
                route.kind = StringRef::Unresolved(codec.read_varint32()?);
            }
            Tag::Field { number: ROUTE_NAME, .. } => {
                route.name = StringRef::Unresolved(codec.read_varint32()?);
            }
            Tag::Field { number: ROUTE_NAME_EN, .. } => {
                route.name_en = StringRef::Unresolved(codec.read_varint32()?);
            }
            Tag::Field { number: ROUTE_OPERATOR, .. } => {
                route.operator = StringRef::Unresolved(codec.read_varint32()?);
            }
            Tag::Field { number: ROUTE_COLOR, .. } => {
                route.color = StringRef::Unresolved(codec.read_varint32()?);
            }
            Tag::Field { number: ROUTE_GEOMETRY, .. } => {
                let len = codec.read_varint32()? as usize;
                let inner = codec.push_limit(len)?;
                let mut px = 0i64;
                let mut py = 0i64;
                let mut way: Vec<(u32, u32)> = Vec::new();
                while codec.bytes_until_limit() > 0 {
                    let ddx = i64::from(codec.read_sint32()?) << SHIFT_COORDINATES;
                    let ddy = i64::from(codec.read_sint32()?) << SHIFT_COORDINATES;
                    if ddx == 0 && ddy == 0 {
                        if !way.is_empty() {
                            route.geometry.push(std::mem::take(&mut way));
                        }
                    } else {
                        let x = ddx + px;
                        let y = ddy + py;
                        way.push((x as u32, y as u32));
                        px = x;
                        py = y;
                    }
                }
                if !way.is_empty() {
                    route.geometry.push(way);
                }
                codec.pop_limit(inner);
            }
            Tag::Field { number: ROUTE_SCHEDULE, .. } => {
                let len = codec.read_varint32()? as usize;
                let inner = codec.push_limit(len)?;
                route.schedule = Some(read_transport_schedule(&mut codec)?);
                codec.pop_limit(inner);
            }
            Tag::Field { number: ROUTE_DIRECT_STOPS, .. } => {
                let len = codec.read_varint32()? as usize;
                let inner = codec.push_limit(len)?;
                let stop = read_transport_route_stop(
                    &mut codec,
                    &mut stop_id,
                    &mut stop_x,
                    &mut stop_y,
                    offset,
                )?;
                route.forward_stops.push(stop);
                codec.pop_limit(inner);
            }
            Tag::Field { wire, .. } => codec.skip_field(wire)?,
        }
    }
    codec.pop_limit(old);
    Ok(route)
}

/// Route stops chain their ids and positions as deltas against the
/// previous stop.
fn read_transport_route_stop(
    codec: &mut Codec<'_>,
    prev_id: &mut i64,
    prev_x: &mut u32,
    prev_y: &mut u32,
    route_offset: usize,
) -> Result<TransportStop> {
    let mut stop = TransportStop {
        file_offset: codec.position(),
        references_to_routes: vec![route_offset as u32],
        ..Default::default()
    };
    loop {
        match codec.read_tag()? {
            Tag::End => break,
            Tag::Field { number: RSTOP_ID, .. } => {
                *prev_id += codec.read_sint64()?;
            }
            Tag::Field { number: RSTOP_DX, .. } => {
                *prev_x = add_delta(*prev_x, codec.read_sint32()?);
            }
            Tag::Field { number: RSTOP_DY, .. } => {
                *prev_y = add_delta(*prev_y, codec.read_sint32()?);
            }
            Tag::Field { number: RSTOP_NAME, .. } => {
                stop.name = StringRef::Unresolved(codec.read_varint32()?);
            }
            Tag::Field { number: RSTOP_NAME_EN, .. } => {
                stop.name_en = StringRef::Unresolved(codec.read_varint32()?);
            }
            Tag::Field { wire, .. } => codec.skip_field(wire)?,
        }
    }
    stop.id = *prev_id;
    stop.x24 = *prev_x;
    stop.y24 = *prev_y;
    Ok(stop)
}

fn read_transport_schedule(codec: &mut Codec<'_>) -> Result<TransportSchedule> {
    let mut schedule = TransportSchedule::default();
    loop {
        match codec.read_tag()? {
            Tag::End => break,
            Tag::Field {
                number: n @ (SCHED_TRIP_INTERVALS | SCHED_AVG_STOP_INTERVALS | SCHED_AVG_WAIT_INTERVALS),
                ..
            } => {
                let len = codec.read_varint32()? as usize;
                let inner = codec.push_limit(len)?;
                let list = match n {
                    SCHED_TRIP_INTERVALS => &mut schedule.trip_intervals,
                    SCHED_AVG_STOP_INTERVALS => &mut schedule.avg_stop_intervals,
                    _ => &mut schedule.avg_wait_intervals,
                };
                while codec.bytes_until_limit() > 0 {
                    list.push(codec.read_varint32()?);
                }
                codec.pop_limit(inner);
            }
            Tag::Field { wire, .. } => codec.skip_field(wire)?,
        }
    }
    Ok(schedule)
}
