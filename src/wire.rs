//! Protocol-buffer wire-format cursor over a mapped byte range
//!
//! Binary map files are tagged field streams: each field starts with a
//! varint `(field_number << 3) | wire_type`. On top of the five standard
//! wire types the format adds a seekable framing (wire id 7): a big-endian
//! 4-byte length followed by that many bytes, used for nested messages
//! that must be skippable without parsing.
//!
//! Reads are bounded by a limit stack. `push_limit` caps the cursor to the
//! next `n` bytes; `pop_limit` restores the previous cap. Any read past
//! the active cap is a [`Error::CorruptStream`].

use butterfly_common::{Error, Result};

/// Wire types as encoded in the low 3 bits of a field tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireType {
    Varint,
    Fixed64,
    LengthDelimited,
    StartGroup,
    EndGroup,
    Fixed32,
    /// Big-endian 4-byte length followed by that many bytes. Nested
    /// messages framed this way can be skipped or seeked into without
    /// decoding anything inside them.
    Fixed32LengthDelimited,
}

impl WireType {
    fn from_id(id: u32) -> Result<WireType> {
        Ok(match id {
            0 => WireType::Varint,
            1 => WireType::Fixed64,
            2 => WireType::LengthDelimited,
            3 => WireType::StartGroup,
            4 => WireType::EndGroup,
            5 => WireType::Fixed32,
            7 => WireType::Fixed32LengthDelimited,
            other => return Err(Error::corrupt(format!("unknown wire type {other}"))),
        })
    }

    /// The 3-bit id used when encoding a tag.
    pub fn id(self) -> u32 {
        match self {
            WireType::Varint => 0,
            WireType::Fixed64 => 1,
            WireType::LengthDelimited => 2,
            WireType::StartGroup => 3,
            WireType::EndGroup => 4,
            WireType::Fixed32 => 5,
            WireType::Fixed32LengthDelimited => 7,
        }
    }
}

/// Outcome of reading one field tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    /// A field follows.
    Field { number: u32, wire: WireType },
    /// The active limit (or an end-group marker) was reached.
    End,
}

/// Positioned cursor over the raw bytes of a map file.
///
/// Cheap to construct: every query builds a fresh one at its seek point,
/// so concurrent queries on the same file never contend.
pub struct Codec<'a> {
    buf: &'a [u8],
    pos: usize,
    limit: usize,
}

impl<'a> Codec<'a> {
    pub fn new(buf: &'a [u8]) -> Codec<'a> {
        Codec { buf, pos: 0, limit: buf.len() }
    }

    /// Cursor starting at `pos` with the whole buffer readable.
    pub fn at(buf: &'a [u8], pos: usize) -> Codec<'a> {
        Codec { buf, pos, limit: buf.len() }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    /// Move to an absolute offset. The active limit is left untouched, so
    /// callers seeking outside a message must pop its limit first.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.buf.len() {
            return Err(Error::corrupt(format!(
                "seek to {pos} past end of file ({})",
                self.buf.len()
            )));
        }
        self.pos = pos;
        Ok(())
    }

    /// Cap reads to the next `len` bytes; returns the previous cap for
    /// `pop_limit`.
    pub fn push_limit(&mut self, len: usize) -> Result<usize> {
        let new = self.pos.checked_add(len).ok_or_else(|| Error::corrupt("limit overflow"))?;
        if new > self.limit {
            return Err(Error::corrupt(format!(
                "nested limit {new} exceeds enclosing limit {}",
                self.limit
            )));
        }
        let old = self.limit;
        self.limit = new;
        Ok(old)
    }

    pub fn pop_limit(&mut self, old: usize) {
        self.limit = old;
    }

    pub fn bytes_until_limit(&self) -> usize {
        self.limit.saturating_sub(self.pos)
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        if self.bytes_until_limit() < n {
            return Err(Error::corrupt(format!(
                "skip of {n} bytes past limit (remaining {})",
                self.bytes_until_limit()
            )));
        }
        self.pos += n;
        Ok(())
    }

    fn read_byte(&mut self) -> Result<u8> {
        if self.pos >= self.limit {
            return Err(Error::corrupt("read past limit"));
        }
        let b = self.buf[self.pos];
        self.pos += 1;
        Ok(b)
    }

    /// Read one field tag. Returns [`Tag::End`] at the limit boundary and
    /// on an end-group marker, so reader loops need no integer sentinels.
    pub fn read_tag(&mut self) -> Result<Tag> {
        if self.pos >= self.limit {
            return Ok(Tag::End);
        }
        let raw = self.read_varint32()?;
        if raw == 0 {
            return Ok(Tag::End);
        }
        let wire = WireType::from_id(raw & 0x7)?;
        if wire == WireType::EndGroup {
            return Ok(Tag::End);
        }
        Ok(Tag::Field { number: raw >> 3, wire })
    }

    pub fn read_varint64(&mut self) -> Result<u64> {
        let mut value: u64 = 0;
        for shift in (0..64).step_by(7) {
            let b = self.read_byte()?;
            value |= u64::from(b & 0x7f) << shift;
            if b & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(Error::corrupt("varint longer than 10 bytes"))
    }

    pub fn read_varint32(&mut self) -> Result<u32> {
        Ok(self.read_varint64()? as u32)
    }

    /// Signed varint, two's complement (protobuf `int32`).
    pub fn read_int32(&mut self) -> Result<i32> {
        Ok(self.read_varint64()? as i32)
    }

    pub fn read_int64(&mut self) -> Result<i64> {
        Ok(self.read_varint64()? as i64)
    }

    /// Zigzag-decoded signed varint (protobuf `sint32`).
    pub fn read_sint32(&mut self) -> Result<i32> {
        let v = self.read_varint32()?;
        Ok(((v >> 1) as i32) ^ -((v & 1) as i32))
    }

    pub fn read_sint64(&mut self) -> Result<i64> {
        let v = self.read_varint64()?;
        Ok(((v >> 1) as i64) ^ -((v & 1) as i64))
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_varint64()? != 0)
    }

    /// Big-endian 4-byte length prefix of a seekable nested message.
    pub fn read_fixed32_be(&mut self) -> Result<u32> {
        if self.bytes_until_limit() < 4 {
            return Err(Error::corrupt("truncated big-endian length"));
        }
        let b = &self.buf[self.pos..self.pos + 4];
        self.pos += 4;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.bytes_until_limit() < n {
            return Err(Error::corrupt(format!(
                "read of {n} bytes past limit (remaining {})",
                self.bytes_until_limit()
            )));
        }
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    /// Length-delimited UTF-8 string.
    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_varint32()? as usize;
        let bytes = self.read_bytes(len)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    /// Skip a field of the given wire type without interpreting it.
    pub fn skip_field(&mut self, wire: WireType) -> Result<()> {
        match wire {
            WireType::Varint => {
                self.read_varint64()?;
            }
            WireType::Fixed64 => self.skip(8)?,
            WireType::LengthDelimited => {
                let len = self.read_varint32()? as usize;
                self.skip(len)?;
            }
            WireType::StartGroup => loop {
                match self.read_tag()? {
                    Tag::End => break,
                    Tag::Field { wire, .. } => self.skip_field(wire)?,
                }
            },
            WireType::EndGroup => {}
            WireType::Fixed32 => self.skip(4)?,
            WireType::Fixed32LengthDelimited => {
                let len = self.read_fixed32_be()? as usize;
                self.skip(len)?;
            }
        }
        Ok(())
    }
}

/// Minimal wire-format emitter. The reader side owns the format; this
/// exists for the cache manifest (the one structure the crate persists)
/// and for building fixtures in tests.
#[derive(Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Writer {
        Writer::default()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_varint64(&mut self, mut value: u64) {
        loop {
            let b = (value & 0x7f) as u8;
            value >>= 7;
            if value == 0 {
                self.buf.push(b);
                return;
            }
            self.buf.push(b | 0x80);
        }
    }

    pub fn write_varint32(&mut self, value: u32) {
        self.write_varint64(u64::from(value));
    }

    pub fn write_sint32(&mut self, value: i32) {
        self.write_varint32(((value << 1) ^ (value >> 31)) as u32);
    }

    pub fn write_sint64(&mut self, value: i64) {
        self.write_varint64(((value << 1) ^ (value >> 63)) as u64);
    }

    pub fn write_fixed32_be(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_tag(&mut self, number: u32, wire: WireType) {
        self.write_varint32((number << 3) | wire.id());
    }

    pub fn write_varint_field(&mut self, number: u32, value: u64) {
        self.write_tag(number, WireType::Varint);
        self.write_varint64(value);
    }

    pub fn write_sint64_field(&mut self, number: u32, value: i64) {
        self.write_tag(number, WireType::Varint);
        self.write_sint64(value);
    }

    pub fn write_string_field(&mut self, number: u32, value: &str) {
        self.write_tag(number, WireType::LengthDelimited);
        self.write_varint32(value.len() as u32);
        self.buf.extend_from_slice(value.as_bytes());
    }

    /// Nested message with a varint length prefix.
    pub fn write_message_field(&mut self, number: u32, body: &Writer) {
        self.write_tag(number, WireType::LengthDelimited);
        self.write_varint32(body.buf.len() as u32);
        self.buf.extend_from_slice(&body.buf);
    }

    /// Nested message in the seekable framing: tag, then big-endian
    /// 4-byte length, then the body.
    pub fn write_seekable_field(&mut self, number: u32, body: &Writer) {
        self.write_tag(number, WireType::Fixed32LengthDelimited);
        self.write_fixed32_be(body.buf.len() as u32);
        self.buf.extend_from_slice(&body.buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_round_trip() {
        let mut w = Writer::new();
        for v in [0u64, 1, 127, 128, 300, u32::MAX as u64, u64::MAX] {
            w.write_varint64(v);
        }
        let bytes = w.into_bytes();
        let mut c = Codec::new(&bytes);
        for v in [0u64, 1, 127, 128, 300, u32::MAX as u64, u64::MAX] {
            assert_eq!(c.read_varint64().unwrap(), v);
        }
    }

    #[test]
    fn zigzag_round_trip() {
        let mut w = Writer::new();
        for v in [0i32, 1, -1, 63, -64, i32::MAX, i32::MIN] {
            w.write_sint32(v);
        }
        let bytes = w.into_bytes();
        let mut c = Codec::new(&bytes);
        for v in [0i32, 1, -1, 63, -64, i32::MAX, i32::MIN] {
            assert_eq!(c.read_sint32().unwrap(), v);
        }
    }

    #[test]
    fn tag_decomposition() {
        let mut w = Writer::new();
        w.write_tag(5, WireType::LengthDelimited);
        let bytes = w.into_bytes();
        let mut c = Codec::new(&bytes);
        assert_eq!(
            c.read_tag().unwrap(),
            Tag::Field { number: 5, wire: WireType::LengthDelimited }
        );
        assert_eq!(c.read_tag().unwrap(), Tag::End);
    }

    #[test]
    fn limit_stack_bounds_reads() {
        let mut w = Writer::new();
        w.write_varint32(300);
        w.write_varint32(400);
        let bytes = w.into_bytes();

        let mut c = Codec::new(&bytes);
        let old = c.push_limit(2).unwrap();
        assert_eq!(c.read_varint32().unwrap(), 300);
        assert_eq!(c.bytes_until_limit(), 0);
        // the second value sits past the cap
        assert!(c.read_varint32().is_err());
        c.pop_limit(old);
        assert_eq!(c.read_varint32().unwrap(), 400);
    }

    #[test]
    fn nested_limit_cannot_exceed_parent() {
        let bytes = [0u8; 8];
        let mut c = Codec::new(&bytes);
        let old = c.push_limit(4).unwrap();
        assert!(c.push_limit(6).is_err());
        c.pop_limit(old);
        assert!(c.push_limit(8).is_ok());
    }

    #[test]
    fn truncated_varint_is_corrupt() {
        let bytes = [0x80u8, 0x80];
        let mut c = Codec::new(&bytes);
        assert!(matches!(
            c.read_varint64(),
            Err(butterfly_common::Error::CorruptStream(_))
        ));
    }

    #[test]
    fn skip_unknown_fields_by_wire_type() {
        let mut w = Writer::new();
        w.write_varint_field(1, 77);
        w.write_string_field(2, "skipped");
        let mut inner = Writer::new();
        inner.write_varint_field(1, 5);
        w.write_seekable_field(3, &inner);
        w.write_varint_field(4, 42);
        let bytes = w.into_bytes();

        let mut c = Codec::new(&bytes);
        loop {
            match c.read_tag().unwrap() {
                Tag::Field { number: 4, .. } => {
                    assert_eq!(c.read_varint64().unwrap(), 42);
                    break;
                }
                Tag::Field { wire, .. } => c.skip_field(wire).unwrap(),
                Tag::End => panic!("field 4 not reached"),
            }
        }
    }

    #[test]
    fn seekable_framing_reads_back() {
        let mut inner = Writer::new();
        inner.write_varint_field(1, 9);
        let mut w = Writer::new();
        w.write_seekable_field(6, &inner);
        let bytes = w.into_bytes();

        let mut c = Codec::new(&bytes);
        match c.read_tag().unwrap() {
            Tag::Field { number: 6, wire: WireType::Fixed32LengthDelimited } => {}
            other => panic!("unexpected tag {other:?}"),
        }
        let len = c.read_fixed32_be().unwrap() as usize;
        let old = c.push_limit(len).unwrap();
        match c.read_tag().unwrap() {
            Tag::Field { number: 1, .. } => assert_eq!(c.read_varint64().unwrap(), 9),
            other => panic!("unexpected tag {other:?}"),
        }
        assert_eq!(c.read_tag().unwrap(), Tag::End);
        c.pop_limit(old);
    }
}
