//! A minimal BER (Basic Encoding Rules) subset sufficient to frame the
//! handful of LDAP messages this crate's `protocol` module issues —
//! BindRequest/Response, AddRequest/Response, DelRequest/Response,
//! ModifyRequest/Response and ModifyDNRequest/Response.
//!
//! This is deliberately not a general ASN.1 implementation: `spec.md` §1
//! names "the underlying directory-protocol wire codec" as an external
//! collaborator the core only consumes through the `DirectoryProtocol`
//! trait. This module is the minimal stand-in needed to actually drive
//! that trait's default implementation against a real socket, the same
//! way the teacher crate hand-rolls its own page/WAL binary framing
//! instead of depending on an external format crate.

use std::io::Read;

use anyhow::{bail, Context, Result};
use byteorder::ReadBytesExt;

pub const TAG_SEQUENCE: u8 = 0x30;
pub const TAG_SET: u8 = 0x31;
pub const TAG_INTEGER: u8 = 0x02;
pub const TAG_OCTET_STRING: u8 = 0x04;
pub const TAG_ENUMERATED: u8 = 0x0A;
pub const TAG_BOOLEAN: u8 = 0x01;

/// Context-class primitive tag `[0]`, used for the simple-bind password
/// and ModifyDN's `newSuperior`.
pub const CTX_0_PRIMITIVE: u8 = 0x80;
/// Context-class constructed tag `[3]`, used for `SaslCredentials`.
pub const CTX_3_CONSTRUCTED: u8 = 0xA3;

pub const APP_BIND_REQUEST: u8 = 0x60;
pub const APP_BIND_RESPONSE: u8 = 0x61;
pub const APP_UNBIND_REQUEST: u8 = 0x42;
pub const APP_MODIFY_REQUEST: u8 = 0x66;
pub const APP_MODIFY_RESPONSE: u8 = 0x67;
pub const APP_ADD_REQUEST: u8 = 0x68;
pub const APP_ADD_RESPONSE: u8 = 0x69;
pub const APP_DEL_REQUEST: u8 = 0x4A;
pub const APP_DEL_RESPONSE: u8 = 0x6B;
pub const APP_MODDN_REQUEST: u8 = 0x6C;
pub const APP_MODDN_RESPONSE: u8 = 0x6D;

pub fn encode_length(len: usize) -> Vec<u8> {
    if len < 0x80 {
        vec![len as u8]
    } else {
        let bytes = len.to_be_bytes();
        let first_nonzero = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len() - 1);
        let significant = &bytes[first_nonzero..];
        let mut out = vec![0x80 | significant.len() as u8];
        out.extend_from_slice(significant);
        out
    }
}

pub fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(content.len() + 6);
    out.push(tag);
    out.extend(encode_length(content.len()));
    out.extend_from_slice(content);
    out
}

/// Encode a two's-complement INTEGER/ENUMERATED value, stripping
/// redundant leading sign-extension bytes.
pub fn encode_integer(tag: u8, n: i64) -> Vec<u8> {
    let mut bytes = n.to_be_bytes().to_vec();
    while bytes.len() > 1
        && ((bytes[0] == 0x00 && bytes[1] & 0x80 == 0) || (bytes[0] == 0xFF && bytes[1] & 0x80 != 0))
    {
        bytes.remove(0);
    }
    tlv(tag, &bytes)
}

pub fn encode_sequence(tag: u8, children: &[Vec<u8>]) -> Vec<u8> {
    let mut content = Vec::new();
    for c in children {
        content.extend_from_slice(c);
    }
    tlv(tag, &content)
}

/// One parsed TLV element: its tag byte and raw content.
#[derive(Debug, Clone)]
pub struct Element {
    pub tag: u8,
    pub content: Vec<u8>,
}

/// Read one definite-length BER element from `r`. Indefinite-length
/// encoding is not supported (LDAP's DER-like profile never uses it).
pub fn read_element<R: Read>(r: &mut R) -> Result<Element> {
    let tag = r.read_u8().context("read BER tag octet")?;
    let first_len = r.read_u8().context("read BER length octet")?;
    let len = if first_len & 0x80 == 0 {
        first_len as usize
    } else {
        let n = (first_len & 0x7F) as usize;
        if n == 0 || n > 8 {
            bail!("unsupported BER long-form length octet count {n}");
        }
        let mut len: u64 = 0;
        for _ in 0..n {
            len = (len << 8) | r.read_u8().context("read BER long-form length byte")? as u64;
        }
        len as usize
    };
    let mut content = vec![0u8; len];
    r.read_exact(&mut content).context("read BER content octets")?;
    Ok(Element { tag, content })
}

/// Decode a two's-complement INTEGER/ENUMERATED content into an `i64`.
pub fn read_integer(content: &[u8]) -> i64 {
    let mut n: i64 = if content.first().map(|b| b & 0x80 != 0).unwrap_or(false) {
        -1
    } else {
        0
    };
    for &b in content {
        n = (n << 8) | b as i64;
    }
    n
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn short_form_length_round_trips() {
        let encoded = tlv(TAG_OCTET_STRING, b"hello");
        let mut cur = Cursor::new(encoded);
        let el = read_element(&mut cur).unwrap();
        assert_eq!(el.tag, TAG_OCTET_STRING);
        assert_eq!(el.content, b"hello");
    }

    #[test]
    fn long_form_length_round_trips() {
        let payload = vec![b'x'; 300];
        let encoded = tlv(TAG_OCTET_STRING, &payload);
        // 300 needs 2 length octets beyond the 0x82 marker.
        assert_eq!(encoded[1], 0x82);
        let mut cur = Cursor::new(encoded);
        let el = read_element(&mut cur).unwrap();
        assert_eq!(el.content, payload);
    }

    #[test]
    fn integer_encoding_strips_sign_extension() {
        assert_eq!(encode_integer(TAG_INTEGER, 0), vec![TAG_INTEGER, 1, 0]);
        assert_eq!(encode_integer(TAG_INTEGER, 3), vec![TAG_INTEGER, 1, 3]);
        let neg = encode_integer(TAG_INTEGER, -1);
        assert_eq!(neg, vec![TAG_INTEGER, 1, 0xFF]);
    }

    #[test]
    fn integer_round_trip() {
        for n in [-129_i64, -1, 0, 1, 127, 128, 65536] {
            let enc = encode_integer(TAG_INTEGER, n);
            let mut cur = Cursor::new(enc);
            let el = read_element(&mut cur).unwrap();
            assert_eq!(read_integer(&el.content), n);
        }
    }

    #[test]
    fn sequence_wraps_children() {
        let a = tlv(TAG_INTEGER, &[1]);
        let b = tlv(TAG_OCTET_STRING, b"x");
        let seq = encode_sequence(TAG_SEQUENCE, &[a.clone(), b.clone()]);
        let mut cur = Cursor::new(seq);
        let el = read_element(&mut cur).unwrap();
        assert_eq!(el.tag, TAG_SEQUENCE);
        let mut expected = a;
        expected.extend(b);
        assert_eq!(el.content, expected);
    }
}
