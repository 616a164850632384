//! Cache manifest
//!
//! A separate versioned file remembering, for every known map file, the
//! offsets and shallow headers of everything inside it. A matching entry
//! lets a file open without reading any data-bearing bytes; child boxes
//! below the recorded headers are re-read from the map file on demand
//! because their coordinates only decode through their ancestor chain.
//!
//! An entry matches a file iff the file path ends with the recorded name
//! and the sizes agree. Any mismatch falls back to a full header scan.

use std::fs;
use std::path::Path;

use butterfly_common::Result;
use tracing::debug;

use crate::geo::Bbox31;
use crate::obf::hh::HHRouteIndex;
use crate::obf::map::{MapIndex, MapRoot};
use crate::obf::routing::{RouteSubregion, RoutingIndex};
use crate::obf::transport::TransportIndex;
use crate::obf::MapFile;
use crate::wire::{Codec, Tag, Writer};

/// Bumped on any structural change to the manifest.
pub const CACHE_VERSION: u32 = 5;

// OsmAndStoredIndex
const S_VERSION: u32 = 1;
const S_DATE_CREATED: u32 = 2;
const S_FILE_INDEX: u32 = 7;

// FileIndex
const FI_SIZE: u32 = 1;
const FI_DATE_MODIFIED: u32 = 2;
const FI_FILE_NAME: u32 = 3;
const FI_VERSION: u32 = 4;
const FI_MAP: u32 = 8;
const FI_ROUTING: u32 = 9;
const FI_TRANSPORT: u32 = 10;
const FI_HH: u32 = 11;

// MapPart / MapLevel
const MP_SIZE: u32 = 1;
const MP_OFFSET: u32 = 2;
const MP_NAME: u32 = 3;
const MP_LEVEL: u32 = 5;
const ML_SIZE: u32 = 1;
const ML_OFFSET: u32 = 2;
const ML_LEFT: u32 = 4;
const ML_RIGHT: u32 = 5;
const ML_TOP: u32 = 6;
const ML_BOTTOM: u32 = 7;
const ML_MIN_ZOOM: u32 = 8;
const ML_MAX_ZOOM: u32 = 9;

// RoutingPart / RoutingSubregion
const RP_SIZE: u32 = 1;
const RP_OFFSET: u32 = 2;
const RP_NAME: u32 = 3;
const RP_SUBREGION: u32 = 5;
const RS_SIZE: u32 = 1;
const RS_OFFSET: u32 = 2;
const RS_BASEMAP: u32 = 3;
const RS_LEFT: u32 = 4;
const RS_RIGHT: u32 = 5;
const RS_TOP: u32 = 6;
const RS_BOTTOM: u32 = 7;
const RS_SHIFT_TO_DATA: u32 = 8;

// TransportPart
const TP_SIZE: u32 = 1;
const TP_OFFSET: u32 = 2;
const TP_NAME: u32 = 3;
const TP_LEFT: u32 = 4;
const TP_RIGHT: u32 = 5;
const TP_TOP: u32 = 6;
const TP_BOTTOM: u32 = 7;
const TP_STRING_TABLE_OFFSET: u32 = 8;
const TP_STRING_TABLE_LENGTH: u32 = 9;
const TP_STOPS_OFFSET: u32 = 10;
const TP_STOPS_LENGTH: u32 = 11;
const TP_INCOMPLETE_OFFSET: u32 = 12;
const TP_INCOMPLETE_LENGTH: u32 = 13;

// HHRoutingPart
const HP_SIZE: u32 = 1;
const HP_OFFSET: u32 = 2;
const HP_EDITION: u32 = 3;
const HP_PROFILE: u32 = 4;
const HP_PROFILE_PARAMS: u32 = 5;
const HP_LEFT: u32 = 6;
const HP_RIGHT: u32 = 7;
const HP_TOP: u32 = 8;
const HP_BOTTOM: u32 = 9;
const HP_POINTS_OFFSET: u32 = 10;
const HP_POINTS_LENGTH: u32 = 11;

/// The whole manifest.
#[derive(Debug, Clone, Default)]
pub struct StoredIndex {
    pub version: u32,
    pub date_created: u64,
    pub files: Vec<FileIndex>,
}

/// Manifest entry for one map file.
#[derive(Debug, Clone, Default)]
pub struct FileIndex {
    pub size: u64,
    pub date_modified: u64,
    pub name: String,
    pub version: u32,
    pub map_parts: Vec<MapPart>,
    pub routing_parts: Vec<RoutingPart>,
    pub transport_parts: Vec<TransportPart>,
    pub hh_parts: Vec<HHPart>,
}

#[derive(Debug, Clone, Default)]
pub struct MapPart {
    pub offset: usize,
    pub length: usize,
    pub name: String,
    pub levels: Vec<MapLevelPart>,
}

#[derive(Debug, Clone, Default)]
pub struct MapLevelPart {
    pub offset: usize,
    pub length: usize,
    pub bbox: Bbox31,
    pub min_zoom: u32,
    pub max_zoom: u32,
}

#[derive(Debug, Clone, Default)]
pub struct RoutingPart {
    pub offset: usize,
    pub length: usize,
    pub name: String,
    pub subregions: Vec<RoutingSubregionPart>,
}

#[derive(Debug, Clone, Default)]
pub struct RoutingSubregionPart {
    pub offset: usize,
    pub length: usize,
    pub basemap: bool,
    pub bbox: Bbox31,
    pub shift_to_data: u32,
}

#[derive(Debug, Clone, Default)]
pub struct TransportPart {
    pub offset: usize,
    pub length: usize,
    pub name: String,
    pub bbox: Bbox31,
    pub string_table_offset: usize,
    pub string_table_length: usize,
    pub stops_offset: usize,
    pub stops_length: usize,
    pub incomplete_offset: usize,
    pub incomplete_length: usize,
}

#[derive(Debug, Clone, Default)]
pub struct HHPart {
    pub offset: usize,
    pub length: usize,
    pub edition: u64,
    pub profile: String,
    pub profile_params: Vec<String>,
    pub bbox: Bbox31,
    pub points_offset: usize,
    pub points_length: usize,
}

impl StoredIndex {
    pub fn new(date_created: u64) -> StoredIndex {
        StoredIndex { version: CACHE_VERSION, date_created, files: Vec::new() }
    }

    /// The entry matching a file path and size, if any. Paths match by
    /// suffix so absolute and relative spellings agree.
    pub fn find(&self, path: &str, size: u64) -> Option<&FileIndex> {
        self.files.iter().find(|f| path.ends_with(&f.name) && f.size == size)
    }

    /// Replace any previous entry of the same name.
    pub fn upsert(&mut self, entry: FileIndex) {
        self.files.retain(|f| f.name != entry.name);
        self.files.push(entry);
    }
}

impl FileIndex {
    /// Capture a freshly scanned file into a manifest entry.
    pub fn from_map_file(file: &MapFile, date_modified: u64) -> FileIndex {
        let mut entry = FileIndex {
            size: file.size,
            date_modified: if file.date_created != 0 { file.date_created } else { date_modified },
            name: file.name.clone(),
            version: file.version,
            ..Default::default()
        };
        for index in &file.map_indexes {
            entry.map_parts.push(MapPart {
                offset: index.offset,
                length: index.length,
                name: index.name.clone(),
                levels: index
                    .levels
                    .iter()
                    .map(|l| MapLevelPart {
                        offset: l.offset,
                        length: l.length,
                        bbox: l.bbox,
                        min_zoom: l.min_zoom,
                        max_zoom: l.max_zoom,
                    })
                    .collect(),
            });
        }
        for index in &file.routing_indexes {
            let mut part = RoutingPart {
                offset: index.offset,
                length: index.length,
                name: index.name.clone(),
                subregions: Vec::new(),
            };
            for (base, subs) in
                [(false, index.subregion_headers(false)), (true, index.subregion_headers(true))]
            {
                for sub in subs {
                    part.subregions.push(RoutingSubregionPart {
                        offset: sub.offset,
                        length: sub.length,
                        basemap: base,
                        bbox: sub.bbox,
                        shift_to_data: sub.shift_to_data,
                    });
                }
            }
            entry.routing_parts.push(part);
        }
        for index in &file.transport_indexes {
            entry.transport_parts.push(TransportPart {
                offset: index.offset,
                length: index.length,
                name: index.name.clone(),
                bbox: index.bbox,
                string_table_offset: index.string_table.offset,
                string_table_length: index.string_table.length,
                stops_offset: index.stops_offset,
                stops_length: index.stops_length,
                incomplete_offset: index.incomplete_routes_offset,
                incomplete_length: index.incomplete_routes_length,
            });
        }
        for index in &file.hh_indexes {
            entry.hh_parts.push(HHPart {
                offset: index.offset,
                length: index.length,
                edition: index.edition,
                profile: index.profile.clone(),
                profile_params: index.profile_params.clone(),
                bbox: index.top_bbox,
                points_offset: index.top_offset,
                points_length: index.top_length,
            });
        }
        entry
    }

    /// Populate an opened (but unscanned) file from this entry. No
    /// data-bearing bytes are read; deeper structures hydrate lazily from
    /// the map file itself.
    pub fn hydrate(&self, file: &mut MapFile, routing_only: bool) {
        file.version = self.version;
        file.date_created = self.date_modified;
        if !routing_only {
            for part in &self.map_parts {
                file.basemap |= part.name.contains("basemap");
                let levels = part
                    .levels
                    .iter()
                    .map(|l| MapRoot::from_parts(l.offset, l.length, l.bbox, l.min_zoom, l.max_zoom))
                    .collect();
                file.map_indexes.push(MapIndex::from_parts(
                    part.name.clone(),
                    part.offset,
                    part.length,
                    levels,
                ));
            }
        }
        for part in &self.routing_parts {
            let mut subs = Vec::new();
            let mut base_subs = Vec::new();
            for s in &part.subregions {
                let sub = RouteSubregion {
                    bbox: s.bbox,
                    offset: s.offset,
                    length: s.length,
                    shift_to_data: s.shift_to_data,
                    subregions: Vec::new(),
                };
                if s.basemap {
                    base_subs.push(sub);
                } else {
                    subs.push(sub);
                }
            }
            file.routing_indexes.push(RoutingIndex::from_parts(
                part.name.clone(),
                part.offset,
                part.length,
                subs,
                base_subs,
            ));
        }
        for part in &self.transport_parts {
            file.transport_indexes.push(TransportIndex::from_parts(
                part.name.clone(),
                part.offset,
                part.length,
                part.bbox,
                part.stops_offset,
                part.stops_length,
                part.string_table_offset,
                part.string_table_length,
                part.incomplete_offset,
                part.incomplete_length,
            ));
        }
        for part in &self.hh_parts {
            file.hh_indexes.push(HHRouteIndex::from_parts(
                part.offset,
                part.length,
                part.edition,
                part.profile.clone(),
                part.profile_params.clone(),
                part.bbox,
                part.points_offset,
                part.points_length,
            ));
        }
    }
}

fn write_bbox(w: &mut Writer, left_field: u32, bbox: &Bbox31) {
    w.write_varint_field(left_field, u64::from(bbox.left));
    w.write_varint_field(left_field + 1, u64::from(bbox.right));
    w.write_varint_field(left_field + 2, u64::from(bbox.top));
    w.write_varint_field(left_field + 3, u64::from(bbox.bottom));
}

/// Serialize a manifest to bytes.
pub fn encode_stored_index(index: &StoredIndex) -> Vec<u8> {
    let mut w = Writer::new();
    w.write_varint_field(S_VERSION, u64::from(index.version));
    w.write_varint_field(S_DATE_CREATED, index.date_created);
    for file in &index.files {
        let mut fw = Writer::new();
        fw.write_varint_field(FI_SIZE, file.size);
        fw.write_varint_field(FI_DATE_MODIFIED, file.date_modified);
        fw.write_string_field(FI_FILE_NAME, &file.name);
        fw.write_varint_field(FI_VERSION, u64::from(file.version));
        for part in &file.map_parts {
            let mut pw = Writer::new();
            pw.write_varint_field(MP_SIZE, part.length as u64);
            pw.write_varint_field(MP_OFFSET, part.offset as u64);
            pw.write_string_field(MP_NAME, &part.name);
            for level in &part.levels {
                let mut lw = Writer::new();
                lw.write_varint_field(ML_SIZE, level.length as u64);
                lw.write_varint_field(ML_OFFSET, level.offset as u64);
                write_bbox(&mut lw, ML_LEFT, &level.bbox);
                lw.write_varint_field(ML_MIN_ZOOM, u64::from(level.min_zoom));
                lw.write_varint_field(ML_MAX_ZOOM, u64::from(level.max_zoom));
                pw.write_message_field(MP_LEVEL, &lw);
            }
            fw.write_message_field(FI_MAP, &pw);
        }
        for part in &file.routing_parts {
            let mut pw = Writer::new();
            pw.write_varint_field(RP_SIZE, part.length as u64);
            pw.write_varint_field(RP_OFFSET, part.offset as u64);
            pw.write_string_field(RP_NAME, &part.name);
            for sub in &part.subregions {
                let mut sw = Writer::new();
                sw.write_varint_field(RS_SIZE, sub.length as u64);
                sw.write_varint_field(RS_OFFSET, sub.offset as u64);
                sw.write_varint_field(RS_BASEMAP, u64::from(sub.basemap));
                write_bbox(&mut sw, RS_LEFT, &sub.bbox);
                sw.write_varint_field(RS_SHIFT_TO_DATA, u64::from(sub.shift_to_data));
                pw.write_message_field(RP_SUBREGION, &sw);
            }
            fw.write_message_field(FI_ROUTING, &pw);
        }
        for part in &file.transport_parts {
            let mut pw = Writer::new();
            pw.write_varint_field(TP_SIZE, part.length as u64);
            pw.write_varint_field(TP_OFFSET, part.offset as u64);
            pw.write_string_field(TP_NAME, &part.name);
            write_bbox(&mut pw, TP_LEFT, &part.bbox);
            pw.write_varint_field(TP_STRING_TABLE_OFFSET, part.string_table_offset as u64);
            pw.write_varint_field(TP_STRING_TABLE_LENGTH, part.string_table_length as u64);
            pw.write_varint_field(TP_STOPS_OFFSET, part.stops_offset as u64);
            pw.write_varint_field(TP_STOPS_LENGTH, part.stops_length as u64);
            pw.write_varint_field(TP_INCOMPLETE_OFFSET, part.incomplete_offset as u64);
            pw.write_varint_field(TP_INCOMPLETE_LENGTH, part.incomplete_length as u64);
            fw.write_message_field(FI_TRANSPORT, &pw);
        }
        for part in &file.hh_parts {
            let mut pw = Writer::new();
            pw.write_varint_field(HP_SIZE, part.length as u64);
            pw.write_varint_field(HP_OFFSET, part.offset as u64);
            pw.write_varint_field(HP_EDITION, part.edition);
            pw.write_string_field(HP_PROFILE, &part.profile);
            for param in &part.profile_params {
                pw.write_string_field(HP_PROFILE_PARAMS, param);
            }
            write_bbox(&mut pw, HP_LEFT, &part.bbox);
            pw.write_varint_field(HP_POINTS_OFFSET, part.points_offset as u64);
            pw.write_varint_field(HP_POINTS_LENGTH, part.points_length as u64);
            fw.write_message_field(FI_HH, &pw);
        }
        w.write_message_field(S_FILE_INDEX, &fw);
    }
    w.into_bytes()
}

fn read_bbox_field(number: u32, left_field: u32, bbox: &mut Bbox31, value: u32) -> bool {
    match number.checked_sub(left_field) {
        Some(0) => bbox.left = value,
        Some(1) => bbox.right = value,
        Some(2) => bbox.top = value,
        Some(3) => bbox.bottom = value,
        _ => return false,
    }
    true
}

/// Parse a manifest from bytes.
pub fn decode_stored_index(data: &[u8]) -> Result<StoredIndex> {
    let mut index = StoredIndex::default();
    let mut codec = Codec::new(data);
    loop {
        match codec.read_tag()? {
            Tag::End => break,
            Tag::Field { number: S_VERSION, .. } => index.version = codec.read_varint32()?,
            Tag::Field { number: S_DATE_CREATED, .. } => {
                index.date_created = codec.read_varint64()?;
            }
            Tag::Field { number: S_FILE_INDEX, .. } => {
                let len = codec.read_varint32()? as usize;
                let inner = codec.push_limit(len)?;
                index.files.push(decode_file_index(&mut codec)?);
                codec.pop_limit(inner);
            }
            Tag::Field { wire, .. } => codec.skip_field(wire)?,
        }
    }
    Ok(index)
}

fn decode_file_index(codec: &mut Codec<'_>) -> Result<FileIndex> {
    let mut file = FileIndex::default();
    loop {
        match codec.read_tag()? {
            Tag::End => break,
            Tag::Field { number: FI_SIZE, .. } => file.size = codec.read_varint64()?,
            Tag::Field { number: FI_DATE_MODIFIED, .. } => {
                file.date_modified = codec.read_varint64()?;
            }
            Tag::Field { number: FI_FILE_NAME, .. } => file.name = codec.read_string()?,
            Tag::Field { number: FI_VERSION, .. } => file.version = codec.read_varint32()?,
            Tag::Field { number: FI_MAP, .. } => {
                let len = codec.read_varint32()? as usize;
                let inner = codec.push_limit(len)?;
                file.map_parts.push(decode_map_part(codec)?);
                codec.pop_limit(inner);
            }
            Tag::Field { number: FI_ROUTING, .. } => {
                let len = codec.read_varint32()? as usize;
                let inner = codec.push_limit(len)?;
                file.routing_parts.push(decode_routing_part(codec)?);
                codec.pop_limit(inner);
            }
            Tag::Field { number: FI_TRANSPORT, .. } => {
                let len = codec.read_varint32()? as usize;
                let inner = codec.push_limit(len)?;
                file.transport_parts.push(decode_transport_part(codec)?);
                codec.pop_limit(inner);
            }
            Tag::Field { number: FI_HH, .. } => {
                let len = codec.read_varint32()? as usize;
                let inner = codec.push_limit(len)?;
                file.hh_parts.push(decode_hh_part(codec)?);
                codec.pop_limit(inner);
            }
            Tag::Field { wire, .. } => codec.skip_field(wire)?,
        }
    }
    Ok(file)
}

fn decode_map_part(codec: &mut Codec<'_>) -> Result<MapPart> {
    let mut part = MapPart::default();
    loop {
        match codec.read_tag()? {
            Tag::End => break,
            Tag::Field { number: MP_SIZE, .. } => part.length = codec.read_varint64()? as usize,
            Tag::Field { number: MP_OFFSET, .. } => part.offset = codec.read_varint64()? as usize,
            Tag::Field { number: MP_NAME, .. } => part.name = codec.read_string()?,
            Tag::Field { number: MP_LEVEL, .. } => {
                let len = codec.read_varint32()? as usize;
                let inner = codec.push_limit(len)?;
                let mut level = MapLevelPart::default();
                loop {
                    match codec.read_tag()? {
                        Tag::End => break,
                        Tag::Field { number: ML_SIZE, .. } => {
                            level.length = codec.read_varint64()? as usize;
                        }
                        Tag::Field { number: ML_OFFSET, .. } => {
                            level.offset = codec.read_varint64()? as usize;
                        }
                        Tag::Field { number: ML_MIN_ZOOM, .. } => {
                            level.min_zoom = codec.read_varint32()?;
                        }
                        Tag::Field { number: ML_MAX_ZOOM, .. } => {
                            level.max_zoom = codec.read_varint32()?;
                        }
                        Tag::Field { number, .. }
                            if (ML_LEFT..=ML_BOTTOM).contains(&number) =>
                        {
                            let v = codec.read_varint32()?;
                            read_bbox_field(number, ML_LEFT, &mut level.bbox, v);
                        }
                        Tag::Field { wire, .. } => codec.skip_field(wire)?,
                    }
                }
                codec.pop_limit(inner);
                part.levels.push(level);
            }
            Tag::Field { wire, .. } => codec.skip_field(wire)?,
        }
    }
    Ok(part)
}

fn decode_routing_part(codec: &mut Codec<'_>) -> Result<RoutingPart> {
    let mut part = RoutingPart::default();
    loop {
        match codec.read_tag()? {
            Tag::End => break,
            Tag::Field { number: RP_SIZE, .. } => part.length = codec.read_varint64()? as usize,
            Tag::Field { number: RP_OFFSET, .. } => part.offset = codec.read_varint64()? as usize,
            Tag::Field { number: RP_NAME, .. } => part.name = codec.read_string()?,
            Tag::Field { number: RP_SUBREGION, .. } => {
                let len = codec.read_varint32()? as usize;
                let inner = codec.push_limit(len)?;
                let mut sub = RoutingSubregionPart::default();
                loop {
                    match codec.read_tag()? {
                        Tag::End => break,
                        Tag::Field { number: RS_SIZE, .. } => {
                            sub.length = codec.read_varint64()? as usize;
                        }
                        Tag::Field { number: RS_OFFSET, .. } => {
                            sub.offset = codec.read_varint64()? as usize;
                        }
                        Tag::Field { number: RS_BASEMAP, .. } => {
                            sub.basemap = codec.read_bool()?;
                        }
                        Tag::Field { number: RS_SHIFT_TO_DATA, .. } => {
                            sub.shift_to_data = codec.read_varint32()?;
                        }
                        Tag::Field { number, .. }
                            if (RS_LEFT..=RS_BOTTOM).contains(&number) =>
                        {
                            let v = codec.read_varint32()?;
                            read_bbox_field(number, RS_LEFT, &mut sub.bbox, v);
                        }
                        Tag::Field { wire, .. } => codec.skip_field(wire)?,
                    }
                }
                codec.pop_limit(inner);
                part.subregions.push(sub);
            }
            Tag::Field { wire, .. } => codec.skip_field(wire)?,
        }
    }
    Ok(part)
}

fn decode_transport_part(codec: &mut Codec<'_>) -> Result<TransportPart> {
    let mut part = TransportPart::default();
    loop {
        match codec.read_tag()? {
            Tag::End => break,
            Tag::Field { number: TP_SIZE, .. } => part.length = codec.read_varint64()? as usize,
            Tag::Field { number: TP_OFFSET, .. } => part.offset = codec.read_varint64()? as usize,
            Tag::Field { number: TP_NAME, .. } => part.name = codec.read_string()?,
            Tag::Field { number: TP_STRING_TABLE_OFFSET, .. } => {
                part.string_table_offset = codec.read_varint64()? as usize;
            }
            Tag::Field { number: TP_STRING_TABLE_LENGTH, .. } => {
                part.string_table_length = codec.read_varint64()? as usize;
            }
            Tag::Field { number: TP_STOPS_OFFSET, .. } => {
                part.stops_offset = codec.read_varint64()? as usize;
            }
            Tag::Field { number: TP_STOPS_LENGTH, .. } => {
                part.stops_length = codec.read_varint64()? as usize;
            }
            Tag::Field { number: TP_INCOMPLETE_OFFSET, .. } => {
                part.incomplete_offset = codec.read_varint64()? as usize;
            }
            Tag::Field { number: TP_INCOMPLETE_LENGTH, .. } => {
                part.incomplete_length = codec.read_varint64()? as usize;
            }
            Tag::Field { number, .. } if (TP_LEFT..=TP_BOTTOM).contains(&number) => {
                let v = codec.read_varint32()?;
                read_bbox_field(number, TP_LEFT, &mut part.bbox, v);
            }
            Tag::Field { wire, .. } => codec.skip_field(wire)?,
        }
    }
    Ok(part)
}

fn decode_hh_part(codec: &mut Codec<'_>) -> Result<HHPart> {
    let mut part = HHPart::default();
    loop {
        match codec.read_tag()? {
            Tag::End => break,
            Tag::Field { number: HP_SIZE, .. } => part.length = codec.read_varint64()? as usize,
            Tag::Field { number: HP_OFFSET, .. } => part.offset = codec.read_varint64()? as usize,
            Tag::Field { number: HP_EDITION, .. } => part.edition = codec.read_varint64()?,
            Tag::Field { number: HP_PROFILE, .. } => part.profile = codec.read_string()?,
            Tag::Field { number: HP_PROFILE_PARAMS, .. } => {
                part.profile_params.push(codec.read_string()?);
            }
            Tag::Field { number: HP_POINTS_OFFSET, .. } => {
                part.points_offset = codec.read_varint64()? as usize;
            }
            Tag::Field { number: HP_POINTS_LENGTH, .. } => {
                part.points_length = codec.read_varint64()? as usize;
            }
            Tag::Field { number, .. } if (HP_LEFT..=HP_BOTTOM).contains(&number) => {
                let v = codec.read_varint32()?;
                read_bbox_field(number, HP_LEFT, &mut part.bbox, v);
            }
            Tag::Field { wire, .. } => codec.skip_field(wire)?,
        }
    }
    Ok(part)
}

/// Read a manifest file. A manifest with a different version is returned
/// as-is; the registry discards it (and rebuilds) on version mismatch.
pub fn read_manifest(path: impl AsRef<Path>) -> Result<StoredIndex> {
    let bytes = fs::read(path.as_ref())?;
    let index = decode_stored_index(&bytes)?;
    debug!(
        path = %path.as_ref().display(),
        version = index.version,
        files = index.files.len(),
        "cache manifest read"
    );
    Ok(index)
}

/// Write a manifest file.
pub fn write_manifest(path: impl AsRef<Path>, index: &StoredIndex) -> Result<()> {
    fs::write(path.as_ref(), encode_stored_index(index))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> StoredIndex {
        let mut index = StoredIndex::new(1_700_000_000_000);
        index.files.push(FileIndex {
            size: 4096,
            date_modified: 1_650_000_000_000,
            name: "belgium.obf".into(),
            version: 2,
            map_parts: vec![MapPart {
                offset: 10,
                length: 300,
                name: "belgium".into(),
                levels: vec![MapLevelPart {
                    offset: 40,
                    length: 200,
                    bbox: Bbox31::new(1, 2, 3, 4),
                    min_zoom: 12,
                    max_zoom: 15,
                }],
            }],
            routing_parts: vec![RoutingPart {
                offset: 400,
                length: 500,
                name: "belgium".into(),
                subregions: vec![
                    RoutingSubregionPart {
                        offset: 420,
                        length: 100,
                        basemap: false,
                        bbox: Bbox31::new(5, 6, 7, 8),
                        shift_to_data: 64,
                    },
                    RoutingSubregionPart {
                        offset: 530,
                        length: 90,
                        basemap: true,
                        bbox: Bbox31::new(9, 10, 11, 12),
                        shift_to_data: 0,
                    },
                ],
            }],
            transport_parts: vec![TransportPart {
                offset: 900,
                length: 150,
                name: "belgium".into(),
                bbox: Bbox31::new(13, 14, 15, 16),
                string_table_offset: 1000,
                string_table_length: 20,
                stops_offset: 910,
                stops_length: 80,
                incomplete_offset: 1040,
                incomplete_length: 5,
            }],
            hh_parts: vec![HHPart {
                offset: 1100,
                length: 800,
                edition: 7,
                profile: "car".into(),
                profile_params: vec!["height_obstacles".into()],
                bbox: Bbox31::new(17, 18, 19, 20),
                points_offset: 1120,
                points_length: 600,
            }],
        });
        index
    }

    #[test]
    fn manifest_round_trip() {
        let index = sample();
        let bytes = encode_stored_index(&index);
        let decoded = decode_stored_index(&bytes).unwrap();

        assert_eq!(decoded.version, CACHE_VERSION);
        assert_eq!(decoded.date_created, index.date_created);
        assert_eq!(decoded.files.len(), 1);
        let f = &decoded.files[0];
        assert_eq!(f.name, "belgium.obf");
        assert_eq!(f.size, 4096);
        assert_eq!(f.map_parts[0].levels[0].bbox, Bbox31::new(1, 2, 3, 4));
        assert_eq!(f.map_parts[0].levels[0].min_zoom, 12);
        assert_eq!(f.routing_parts[0].subregions.len(), 2);
        assert!(f.routing_parts[0].subregions[1].basemap);
        assert_eq!(f.routing_parts[0].subregions[0].shift_to_data, 64);
        assert_eq!(f.transport_parts[0].stops_length, 80);
        assert_eq!(f.hh_parts[0].edition, 7);
        assert_eq!(f.hh_parts[0].profile_params, vec!["height_obstacles".to_string()]);
        assert_eq!(f.hh_parts[0].bbox, Bbox31::new(17, 18, 19, 20));
    }

    #[test]
    fn find_requires_suffix_and_size() {
        let index = sample();
        assert!(index.find("/maps/belgium.obf", 4096).is_some());
        assert!(index.find("belgium.obf", 4096).is_some());
        // size mismatch forces a rescan
        assert!(index.find("/maps/belgium.obf", 4097).is_none());
        // different file
        assert!(index.find("/maps/france.obf", 4096).is_none());
    }

    #[test]
    fn upsert_replaces_by_name() {
        let mut index = sample();
        let mut replacement = index.files[0].clone();
        replacement.size = 9999;
        index.upsert(replacement);
        assert_eq!(index.files.len(), 1);
        assert_eq!(index.files[0].size, 9999);
    }
}
