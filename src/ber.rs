//! BER (basic encoding rules) packet layer.
//!
//! A [`Packet`] is one TLV: identifier class, primitive/constructed form, tag
//! number, and either raw content octets (primitive) or an ordered list of
//! child packets (constructed). Packets form a tree; encoding a constructed
//! packet concatenates the child encodings behind its own TLV header, so
//! `Packet::decode(p.encode()) == p` for any well-formed tree.
//!
//! Only definite lengths are produced and accepted. LDAP uses definite-length
//! BER exclusively; an indefinite length marker on input is reported as
//! malformed.

use bytes::BytesMut;

use crate::{Error, Result};

// Universal tag numbers used by LDAP.
pub const TAG_EOC: u64 = 0x00;
pub const TAG_BOOLEAN: u64 = 0x01;
pub const TAG_INTEGER: u64 = 0x02;
pub const TAG_OCTET_STRING: u64 = 0x04;
pub const TAG_NULL: u64 = 0x05;
pub const TAG_OBJECT_IDENTIFIER: u64 = 0x06;
pub const TAG_ENUMERATED: u64 = 0x0A;
pub const TAG_SEQUENCE: u64 = 0x10;
pub const TAG_SET: u64 = 0x11;

/// Nesting bound for decoded trees. LDAP messages are shallow; anything
/// deeper is hostile or corrupt input.
const MAX_DEPTH: usize = 32;

/// BER identifier class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Class {
    Universal,
    Application,
    Context,
    Private,
}

impl Class {
    fn bits(self) -> u8 {
        match self {
            Class::Universal => 0x00,
            Class::Application => 0x40,
            Class::Context => 0x80,
            Class::Private => 0xC0,
        }
    }

    fn from_bits(b: u8) -> Self {
        match b & 0xC0 {
            0x00 => Class::Universal,
            0x40 => Class::Application,
            0x80 => Class::Context,
            _ => Class::Private,
        }
    }
}

/// Primitive or constructed encoding form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Primitive,
    Constructed,
}

/// Structural expectations checked by [`Packet::assert`]. Unset fields are
/// not checked.
#[derive(Debug, Clone, Copy, Default)]
pub struct Assert {
    /// Expected tag number.
    pub tag: Option<u64>,
    /// Minimum number of children of the packet itself.
    pub min_children: Option<usize>,
    /// Exact number of children of the packet itself.
    pub exact_children: Option<usize>,
    /// When set, the class/kind/tag checks apply to this child instead of
    /// the packet itself (combining the bounds check with the shape check).
    pub child: Option<usize>,
}

/// One BER TLV, possibly with nested children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub class: Class,
    pub kind: PacketKind,
    pub tag: u64,
    /// Content octets of a primitive packet; empty for constructed packets.
    pub data: Vec<u8>,
    /// Child packets of a constructed packet, in encoding order.
    pub children: Vec<Packet>,
}

impl Packet {
    /// Universal constructed SEQUENCE.
    pub fn sequence() -> Self {
        Self::constructed(Class::Universal, TAG_SEQUENCE)
    }

    /// Universal constructed SET.
    pub fn set() -> Self {
        Self::constructed(Class::Universal, TAG_SET)
    }

    /// Empty constructed packet of the given class and tag.
    pub fn constructed(class: Class, tag: u64) -> Self {
        Packet {
            class,
            kind: PacketKind::Constructed,
            tag,
            data: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Universal primitive INTEGER.
    pub fn integer(value: i64) -> Self {
        Packet {
            class: Class::Universal,
            kind: PacketKind::Primitive,
            tag: TAG_INTEGER,
            data: encode_integer_content(value),
            children: Vec::new(),
        }
    }

    /// Universal primitive ENUMERATED.
    pub fn enumerated(value: i64) -> Self {
        Packet {
            class: Class::Universal,
            kind: PacketKind::Primitive,
            tag: TAG_ENUMERATED,
            data: encode_integer_content(value),
            children: Vec::new(),
        }
    }

    /// Universal primitive BOOLEAN.
    pub fn boolean(value: bool) -> Self {
        Packet {
            class: Class::Universal,
            kind: PacketKind::Primitive,
            tag: TAG_BOOLEAN,
            data: vec![if value { 0xFF } else { 0x00 }],
            children: Vec::new(),
        }
    }

    /// Universal primitive OCTET STRING.
    pub fn octet_string(value: impl Into<Vec<u8>>) -> Self {
        Packet {
            class: Class::Universal,
            kind: PacketKind::Primitive,
            tag: TAG_OCTET_STRING,
            data: value.into(),
            children: Vec::new(),
        }
    }

    /// Context-class primitive with raw content, e.g. `[0] IMPLICIT` fields.
    pub fn context(tag: u64, data: impl Into<Vec<u8>>) -> Self {
        Packet {
            class: Class::Context,
            kind: PacketKind::Primitive,
            tag,
            data: data.into(),
            children: Vec::new(),
        }
    }

    /// Append a child and return self, for literal tree construction.
    pub fn with_child(mut self, child: Packet) -> Self {
        self.children.push(child);
        self
    }

    pub fn push(&mut self, child: Packet) {
        self.children.push(child);
    }

    /// Child at `idx`, or `InvalidParameter` when out of bounds.
    pub fn child(&self, idx: usize) -> Result<&Packet> {
        self.children.get(idx).ok_or_else(|| {
            Error::InvalidParameter(format!(
                "ber.child: missing child {idx}, packet has {}",
                self.children.len()
            ))
        })
    }

    /// Decode the content octets as a (signed, big-endian) integer. Works
    /// for INTEGER, ENUMERATED and implicitly tagged integer fields.
    pub fn as_i64(&self) -> Result<i64> {
        decode_integer_content(&self.data)
            .ok_or_else(|| Error::InvalidParameter("ber.as_i64: invalid integer content".into()))
    }

    /// Decode the content octets as a BOOLEAN.
    pub fn as_bool(&self) -> Result<bool> {
        match self.data.as_slice() {
            [b] => Ok(*b != 0),
            _ => Err(Error::InvalidParameter(format!(
                "ber.as_bool: boolean content must be 1 byte, got {}",
                self.data.len()
            ))),
        }
    }

    /// Decode the content octets as UTF-8 text.
    pub fn as_text(&self) -> Result<String> {
        String::from_utf8(self.data.clone())
            .map_err(|_| Error::InvalidParameter("ber.as_text: content is not valid UTF-8".into()))
    }

    /// Check the packet (or one of its children) against structural
    /// expectations, reporting the first mismatch.
    pub fn assert(&self, class: Class, kind: PacketKind, expect: Assert) -> Result<()> {
        const OP: &str = "ber.assert";
        if let Some(n) = expect.exact_children {
            if self.children.len() != n {
                return Err(Error::InvalidParameter(format!(
                    "{OP}: expected exactly {n} children, got {}",
                    self.children.len()
                )));
            }
        }
        if let Some(n) = expect.min_children {
            if self.children.len() < n {
                return Err(Error::InvalidParameter(format!(
                    "{OP}: expected at least {n} children, got {}",
                    self.children.len()
                )));
            }
        }
        let target = match expect.child {
            Some(idx) => self.children.get(idx).ok_or_else(|| {
                Error::InvalidParameter(format!(
                    "{OP}: missing asserted child {idx}, packet has {}",
                    self.children.len()
                ))
            })?,
            None => self,
        };
        if target.class != class {
            return Err(Error::InvalidParameter(format!(
                "{OP}: expected class {class:?}, got {:?}",
                target.class
            )));
        }
        if target.kind != kind {
            return Err(Error::InvalidParameter(format!(
                "{OP}: expected {kind:?} form, got {:?}",
                target.kind
            )));
        }
        if let Some(tag) = expect.tag {
            if target.tag != tag {
                return Err(Error::InvalidParameter(format!(
                    "{OP}: expected tag {tag}, got {}",
                    target.tag
                )));
            }
        }
        Ok(())
    }

    /// Encode the tree to bytes. Total for any packet the constructors can
    /// produce.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64);
        self.encode_into(&mut out);
        out
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        write_identifier(out, self.class, self.kind, self.tag);
        match self.kind {
            PacketKind::Primitive => {
                write_length(out, self.data.len());
                out.extend_from_slice(&self.data);
            }
            PacketKind::Constructed => {
                let mut content = Vec::with_capacity(64);
                for child in &self.children {
                    child.encode_into(&mut content);
                }
                write_length(out, content.len());
                out.extend_from_slice(&content);
            }
        }
    }

    /// Decode exactly one packet spanning the whole input.
    pub fn decode(data: &[u8]) -> Result<Packet> {
        let (packet, used) = decode_at(data, 0)?;
        if used != data.len() {
            return Err(Error::Malformed(format!(
                "ber.decode: {} trailing bytes after packet",
                data.len() - used
            )));
        }
        Ok(packet)
    }

    /// Multi-line tree rendering for debug logging.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        self.dump_into(&mut out, 0);
        out
    }

    fn dump_into(&self, out: &mut String, indent: usize) {
        use std::fmt::Write;
        let tag_name = if self.class == Class::Universal {
            universal_tag_name(self.tag)
        } else {
            ""
        };
        let _ = writeln!(
            out,
            "{:indent$}({:?}, {:?}, 0x{:02X}{}{}) len={}",
            "",
            self.class,
            self.kind,
            self.tag,
            if tag_name.is_empty() { "" } else { " " },
            tag_name,
            self.data.len(),
            indent = indent * 2,
        );
        for child in &self.children {
            child.dump_into(out, indent + 1);
        }
    }
}

fn universal_tag_name(tag: u64) -> &'static str {
    match tag {
        TAG_EOC => "EOC",
        TAG_BOOLEAN => "Boolean",
        TAG_INTEGER => "Integer",
        TAG_OCTET_STRING => "Octet String",
        TAG_NULL => "NULL",
        TAG_OBJECT_IDENTIFIER => "Object Identifier",
        TAG_ENUMERATED => "Enumerated",
        TAG_SEQUENCE => "Sequence",
        TAG_SET => "Set",
        _ => "",
    }
}

fn write_identifier(out: &mut Vec<u8>, class: Class, kind: PacketKind, tag: u64) {
    let form = match kind {
        PacketKind::Primitive => 0x00,
        PacketKind::Constructed => 0x20,
    };
    if tag < 0x1F {
        out.push(class.bits() | form | tag as u8);
    } else {
        // High tag number form: leading 0x1F, then base-128 big-endian with
        // continuation bits.
        out.push(class.bits() | form | 0x1F);
        let mut stack = Vec::new();
        let mut v = tag;
        loop {
            stack.push((v & 0x7F) as u8);
            v >>= 7;
            if v == 0 {
                break;
            }
        }
        stack.reverse();
        let last = stack.len() - 1;
        for (i, b) in stack.into_iter().enumerate() {
            out.push(if i < last { b | 0x80 } else { b });
        }
    }
}

fn write_length(out: &mut Vec<u8>, length: usize) {
    if length < 128 {
        out.push(length as u8);
    } else {
        let mut bytes = Vec::new();
        let mut len = length;
        while len > 0 {
            bytes.push((len & 0xFF) as u8);
            len >>= 8;
        }
        bytes.reverse();
        out.push(0x80 | bytes.len() as u8);
        out.extend_from_slice(&bytes);
    }
}

/// Minimal two's-complement content octets for an integer.
fn encode_integer_content(value: i64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let mut start = 0;
    // Strip redundant leading 0x00 (positive) or 0xFF (negative) octets while
    // keeping the sign bit intact.
    while start < 7 {
        let cur = bytes[start];
        let next = bytes[start + 1];
        if (cur == 0x00 && next & 0x80 == 0) || (cur == 0xFF && next & 0x80 != 0) {
            start += 1;
        } else {
            break;
        }
    }
    bytes[start..].to_vec()
}

fn decode_integer_content(data: &[u8]) -> Option<i64> {
    if data.is_empty() || data.len() > 8 {
        return None;
    }
    let mut value: i64 = if data[0] & 0x80 != 0 { -1 } else { 0 };
    for &b in data {
        value = (value << 8) | b as i64;
    }
    Some(value)
}

/// Parsed identifier octets: class, form, tag and consumed byte count.
fn read_identifier(data: &[u8]) -> Result<(Class, PacketKind, u64, usize)> {
    const OP: &str = "ber.read_identifier";
    let first = *data
        .first()
        .ok_or_else(|| Error::Malformed(format!("{OP}: empty input")))?;
    let class = Class::from_bits(first);
    let kind = if first & 0x20 != 0 {
        PacketKind::Constructed
    } else {
        PacketKind::Primitive
    };
    if first & 0x1F != 0x1F {
        return Ok((class, kind, (first & 0x1F) as u64, 1));
    }
    // High tag number form.
    let mut tag: u64 = 0;
    let mut used = 1;
    loop {
        let b = *data
            .get(used)
            .ok_or_else(|| Error::Malformed(format!("{OP}: truncated high tag number")))?;
        used += 1;
        tag = tag
            .checked_mul(128)
            .and_then(|t| t.checked_add((b & 0x7F) as u64))
            .ok_or_else(|| Error::Malformed(format!("{OP}: tag number overflow")))?;
        if b & 0x80 == 0 {
            break;
        }
        if used > 10 {
            return Err(Error::Malformed(format!("{OP}: tag number too long")));
        }
    }
    Ok((class, kind, tag, used))
}

/// Parsed definite length and consumed byte count. Indefinite lengths are
/// malformed here; LDAP never uses them.
fn read_length(data: &[u8]) -> Result<(usize, usize)> {
    const OP: &str = "ber.read_length";
    let first = *data
        .first()
        .ok_or_else(|| Error::Malformed(format!("{OP}: missing length octet")))?;
    if first & 0x80 == 0 {
        return Ok((first as usize, 1));
    }
    let count = (first & 0x7F) as usize;
    if count == 0 {
        return Err(Error::Malformed(format!(
            "{OP}: indefinite length not supported"
        )));
    }
    if count > 4 {
        return Err(Error::Malformed(format!(
            "{OP}: length encoding of {count} bytes is too large"
        )));
    }
    if data.len() < 1 + count {
        return Err(Error::Malformed(format!("{OP}: truncated length octets")));
    }
    let mut length = 0usize;
    for &b in &data[1..1 + count] {
        length = (length << 8) | b as usize;
    }
    Ok((length, 1 + count))
}

fn decode_at(data: &[u8], depth: usize) -> Result<(Packet, usize)> {
    const OP: &str = "ber.decode";
    if depth > MAX_DEPTH {
        return Err(Error::Malformed(format!("{OP}: nesting deeper than {MAX_DEPTH}")));
    }
    let (class, kind, tag, id_len) = read_identifier(data)?;
    let (length, len_len) = read_length(&data[id_len..])?;
    let header = id_len + len_len;
    let total = header + length;
    if data.len() < total {
        return Err(Error::Malformed(format!(
            "{OP}: content needs {length} bytes, {} available",
            data.len() - header
        )));
    }
    let content = &data[header..total];
    let packet = match kind {
        PacketKind::Primitive => Packet {
            class,
            kind,
            tag,
            data: content.to_vec(),
            children: Vec::new(),
        },
        PacketKind::Constructed => {
            let mut children = Vec::new();
            let mut offset = 0;
            while offset < content.len() {
                let (child, used) = decode_at(&content[offset..], depth + 1)?;
                children.push(child);
                offset += used;
            }
            Packet {
                class,
                kind,
                tag,
                data: Vec::new(),
                children,
            }
        }
    };
    Ok((packet, total))
}

/// Pull the bytes of one complete TLV off the front of `buf`. Returns
/// `Ok(None)` when the buffer does not yet hold a full message. The caller
/// accumulates network reads into `buf` and calls this per iteration.
pub fn take_message_bytes(buf: &mut BytesMut) -> Result<Option<Vec<u8>>> {
    if buf.len() < 2 {
        return Ok(None);
    }
    let (_, _, _, id_len) = match read_identifier(buf) {
        Ok(parsed) => parsed,
        // A truncated high-tag identifier needs more bytes.
        Err(_) if buf.len() < 11 => return Ok(None),
        Err(e) => return Err(e),
    };
    if buf.len() < id_len + 1 {
        return Ok(None);
    }
    let first_len = buf[id_len];
    let (length, len_len) = if first_len & 0x80 == 0 {
        (first_len as usize, 1)
    } else {
        let count = (first_len & 0x7F) as usize;
        if count == 0 {
            return Err(Error::Malformed(
                "ber.take_message: indefinite length not supported".into(),
            ));
        }
        if count > 4 {
            return Err(Error::Malformed(format!(
                "ber.take_message: length encoding of {count} bytes is too large"
            )));
        }
        if buf.len() < id_len + 1 + count {
            return Ok(None);
        }
        let mut length = 0usize;
        for i in 0..count {
            length = (length << 8) | buf[id_len + 1 + i] as usize;
        }
        (length, 1 + count)
    };
    let total = id_len + len_len + length;
    if buf.len() < total {
        return Ok(None);
    }
    Ok(Some(buf.split_to(total).to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(p: &Packet) {
        let encoded = p.encode();
        let decoded = Packet::decode(&encoded).unwrap();
        assert_eq!(&decoded, p);
    }

    #[test]
    fn test_roundtrip_primitives() {
        roundtrip(&Packet::integer(0));
        roundtrip(&Packet::integer(1));
        roundtrip(&Packet::integer(127));
        roundtrip(&Packet::integer(128));
        roundtrip(&Packet::integer(256));
        roundtrip(&Packet::integer(-1));
        roundtrip(&Packet::integer(-128));
        roundtrip(&Packet::integer(4096));
        roundtrip(&Packet::integer(i64::MAX));
        roundtrip(&Packet::integer(i64::MIN));
        roundtrip(&Packet::boolean(true));
        roundtrip(&Packet::boolean(false));
        roundtrip(&Packet::enumerated(53));
        roundtrip(&Packet::octet_string("hello"));
        roundtrip(&Packet::octet_string(""));
        roundtrip(&Packet::context(0, b"password".to_vec()));
    }

    #[test]
    fn test_roundtrip_nested_tree() {
        let p = Packet::sequence()
            .with_child(Packet::integer(1))
            .with_child(
                Packet::constructed(Class::Application, 0)
                    .with_child(Packet::integer(3))
                    .with_child(Packet::octet_string("cn=admin,dc=example,dc=org"))
                    .with_child(Packet::context(0, b"secret".to_vec())),
            );
        roundtrip(&p);
    }

    #[test]
    fn test_roundtrip_length_boundaries() {
        for len in [0usize, 1, 127, 128, 255, 256, 65535, 65536] {
            roundtrip(&Packet::octet_string(vec![0x41; len]));
        }
    }

    #[test]
    fn test_integer_content_encoding() {
        assert_eq!(Packet::integer(0).data, vec![0x00]);
        assert_eq!(Packet::integer(127).data, vec![0x7F]);
        assert_eq!(Packet::integer(128).data, vec![0x00, 0x80]);
        assert_eq!(Packet::integer(300).data, vec![0x01, 0x2C]);
        assert_eq!(Packet::integer(-1).data, vec![0xFF]);
        assert_eq!(Packet::integer(-128).data, vec![0x80]);
        assert_eq!(Packet::integer(4096).data, vec![0x10, 0x00]);
    }

    #[test]
    fn test_as_i64_sign_extension() {
        assert_eq!(Packet::integer(-1).as_i64().unwrap(), -1);
        assert_eq!(Packet::integer(-32768).as_i64().unwrap(), -32768);
        let p = Packet {
            class: Class::Universal,
            kind: PacketKind::Primitive,
            tag: TAG_INTEGER,
            data: vec![0xFF; 9],
            children: Vec::new(),
        };
        assert!(p.as_i64().is_err());
    }

    #[test]
    fn test_as_text_rejects_invalid_utf8() {
        let p = Packet::octet_string(vec![0xFF, 0xFE]);
        assert!(p.as_text().is_err());
    }

    #[test]
    fn test_unknown_universal_tag_decodes_as_raw_bytes() {
        // UTCTime (tag 23) is not modelled; content survives as raw data.
        let raw = vec![0x17, 0x03, 0x31, 0x32, 0x33];
        let p = Packet::decode(&raw).unwrap();
        assert_eq!(p.class, Class::Universal);
        assert_eq!(p.tag, 23);
        assert_eq!(p.data, b"123");
        assert_eq!(p.encode(), raw);
    }

    #[test]
    fn test_decode_rejects_indefinite_length() {
        let raw = vec![0x30, 0x80, 0x00, 0x00];
        assert!(matches!(Packet::decode(&raw), Err(Error::Malformed(_))));
    }

    #[test]
    fn test_decode_rejects_truncated_content() {
        let raw = vec![0x04, 0x05, 0x61, 0x62];
        assert!(matches!(Packet::decode(&raw), Err(Error::Malformed(_))));
    }

    #[test]
    fn test_decode_rejects_trailing_bytes() {
        let mut raw = Packet::integer(7).encode();
        raw.push(0x00);
        assert!(matches!(Packet::decode(&raw), Err(Error::Malformed(_))));
    }

    #[test]
    fn test_decode_rejects_runaway_nesting() {
        let mut raw = Packet::integer(1).encode();
        for _ in 0..64 {
            let inner = raw;
            raw = Vec::new();
            raw.push(0x30);
            write_length(&mut raw, inner.len());
            raw.extend_from_slice(&inner);
        }
        assert!(matches!(Packet::decode(&raw), Err(Error::Malformed(_))));
    }

    #[test]
    fn test_high_tag_number_roundtrip() {
        let p = Packet {
            class: Class::Context,
            kind: PacketKind::Primitive,
            tag: 128,
            data: b"x".to_vec(),
            children: Vec::new(),
        };
        let encoded = p.encode();
        assert_eq!(encoded[0] & 0x1F, 0x1F);
        assert_eq!(Packet::decode(&encoded).unwrap(), p);
    }

    #[test]
    fn test_assert_envelope_shape() {
        let p = Packet::sequence()
            .with_child(Packet::integer(1))
            .with_child(Packet::constructed(Class::Application, 0));
        p.assert(
            Class::Universal,
            PacketKind::Constructed,
            Assert {
                tag: Some(TAG_SEQUENCE),
                min_children: Some(2),
                ..Default::default()
            },
        )
        .unwrap();
        // Child assertion combines the bounds check with the shape check.
        p.assert(
            Class::Universal,
            PacketKind::Primitive,
            Assert {
                tag: Some(TAG_INTEGER),
                child: Some(0),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(p
            .assert(
                Class::Universal,
                PacketKind::Primitive,
                Assert {
                    child: Some(5),
                    ..Default::default()
                },
            )
            .is_err());
        assert!(p
            .assert(
                Class::Universal,
                PacketKind::Constructed,
                Assert {
                    min_children: Some(3),
                    ..Default::default()
                },
            )
            .is_err());
        assert!(p
            .assert(
                Class::Universal,
                PacketKind::Constructed,
                Assert {
                    exact_children: Some(3),
                    ..Default::default()
                },
            )
            .is_err());
        assert!(p
            .assert(
                Class::Application,
                PacketKind::Constructed,
                Assert::default(),
            )
            .is_err());
    }

    #[test]
    fn test_take_message_bytes_incremental() {
        let full = Packet::sequence()
            .with_child(Packet::integer(1))
            .with_child(Packet::octet_string(vec![0x61; 300]))
            .encode();

        let mut buf = BytesMut::new();
        // Feed one byte at a time; the frame only completes at the end.
        for (i, b) in full.iter().enumerate() {
            buf.extend_from_slice(&[*b]);
            let got = take_message_bytes(&mut buf).unwrap();
            if i + 1 < full.len() {
                assert!(got.is_none(), "complete frame after {} bytes", i + 1);
            } else {
                assert_eq!(got.unwrap(), full);
            }
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn test_take_message_bytes_two_messages() {
        let first = Packet::integer(1).encode();
        let second = Packet::octet_string("b").encode();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&first);
        buf.extend_from_slice(&second);
        assert_eq!(take_message_bytes(&mut buf).unwrap().unwrap(), first);
        assert_eq!(take_message_bytes(&mut buf).unwrap().unwrap(), second);
        assert!(take_message_bytes(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_take_message_bytes_rejects_indefinite() {
        let mut buf = BytesMut::from(&[0x30u8, 0x80, 0x00][..]);
        assert!(take_message_bytes(&mut buf).is_err());
    }

    #[test]
    fn test_dump_renders_tree() {
        let p = Packet::sequence().with_child(Packet::integer(5));
        let dump = p.dump();
        assert!(dump.contains("Sequence"));
        assert!(dump.contains("Integer"));
    }
}
