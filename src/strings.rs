//! String tables
//!
//! Names are never stored inline with objects. A map or routing data block
//! carries a local table its objects reference by position; the transport
//! index carries one table for the whole section, read once on first use.
//! Until the owning table is materialized, attributes hold the numeric id.

use butterfly_common::Result;
use once_cell::sync::OnceCell;
use rustc_hash::FxHashMap;
use tracing::warn;

use crate::wire::{Codec, Tag};

/// Field number of the repeated string entry inside a string-table message.
const STRING_TABLE_ENTRY: u32 = 1;

/// Read a block-local string table: repeated length-delimited strings,
/// referenced by position.
pub fn read_string_table(codec: &mut Codec<'_>) -> Result<Vec<String>> {
    let mut list = Vec::new();
    loop {
        match codec.read_tag()? {
            Tag::End => return Ok(list),
            Tag::Field { number: STRING_TABLE_ENTRY, .. } => {
                list.push(codec.read_string()?);
            }
            Tag::Field { wire, .. } => codec.skip_field(wire)?,
        }
    }
}

/// A string attribute that starts life as a table id and is rewritten once
/// the owning table is available.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StringRef {
    Unresolved(u32),
    Resolved(String),
}

impl StringRef {
    pub fn empty() -> StringRef {
        StringRef::Resolved(String::new())
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, StringRef::Resolved(s) if s.is_empty())
    }

    /// The resolved text, or `None` while still an id.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            StringRef::Resolved(s) => Some(s),
            StringRef::Unresolved(_) => None,
        }
    }

    /// Replace the id with the table entry. Ids outside the table resolve
    /// to the empty string; the object stays usable.
    pub fn resolve(&mut self, table: &FxHashMap<u32, String>) {
        if let StringRef::Unresolved(id) = self {
            match table.get(id) {
                Some(s) => *self = StringRef::Resolved(s.clone()),
                None => {
                    warn!(id = *id, "string id outside table, dropping value");
                    *self = StringRef::empty();
                }
            }
        }
    }
}

impl Default for StringRef {
    fn default() -> StringRef {
        StringRef::empty()
    }
}

/// The transport section's string table: extents recorded at open time,
/// contents read once on first stop or route materialization.
#[derive(Debug, Default)]
pub struct IndexStringTable {
    pub offset: usize,
    pub length: usize,
    cell: OnceCell<FxHashMap<u32, String>>,
}

impl IndexStringTable {
    pub fn new(offset: usize, length: usize) -> IndexStringTable {
        IndexStringTable { offset, length, cell: OnceCell::new() }
    }

    /// The table contents, reading them from `data` on first call.
    /// Entries are keyed by position, matching how stops reference them.
    pub fn get_or_read(&self, data: &[u8]) -> Result<&FxHashMap<u32, String>> {
        self.cell.get_or_try_init(|| {
            let mut codec = Codec::at(data, self.offset);
            let old = codec.push_limit(self.length)?;
            let list = read_string_table(&mut codec)?;
            codec.pop_limit(old);
            Ok(list.into_iter().enumerate().map(|(i, s)| (i as u32, s)).collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::Writer;

    fn table_bytes(entries: &[&str]) -> Vec<u8> {
        let mut w = Writer::new();
        for e in entries {
            w.write_string_field(STRING_TABLE_ENTRY, e);
        }
        w.into_bytes()
    }

    #[test]
    fn reads_entries_in_order() {
        let bytes = table_bytes(&["Main St", "Rue de la Loi", ""]);
        let mut c = Codec::new(&bytes);
        let table = read_string_table(&mut c).unwrap();
        assert_eq!(table, vec!["Main St", "Rue de la Loi", ""]);
    }

    #[test]
    fn string_ref_resolves_by_id() {
        let mut table = FxHashMap::default();
        table.insert(0u32, "stop a".to_string());
        table.insert(1u32, "stop b".to_string());

        let mut r = StringRef::Unresolved(1);
        r.resolve(&table);
        assert_eq!(r.as_str(), Some("stop b"));

        // unknown id degrades to empty, not a panic or error
        let mut missing = StringRef::Unresolved(9);
        missing.resolve(&table);
        assert!(missing.is_empty());

        // resolving twice is a no-op
        let mut done = StringRef::Resolved("kept".into());
        done.resolve(&table);
        assert_eq!(done.as_str(), Some("kept"));
    }

    #[test]
    fn index_table_reads_once() {
        let body = table_bytes(&["x", "y"]);
        let mut file = vec![0xAAu8; 7]; // unrelated leading bytes
        let offset = file.len();
        file.extend_from_slice(&body);

        let table = IndexStringTable::new(offset, body.len());
        let first = table.get_or_read(&file).unwrap();
        assert_eq!(first.get(&0).map(String::as_str), Some("x"));
        assert_eq!(first.get(&1).map(String::as_str), Some("y"));

        // second call must not re-read: corrupt the backing bytes and the
        // cached contents stay intact
        let mut scribbled = file.clone();
        for b in scribbled.iter_mut().skip(offset) {
            *b = 0xFF;
        }
        let second = table.get_or_read(&scribbled).unwrap();
        assert_eq!(second.get(&0).map(String::as_str), Some("x"));
    }
}
