//! Basic Encoding Rules (BER) tag-length-value units.
//!
//! A [`Packet`] is one encoded element: an identifier (class, primitive or
//! constructed, tag number), a definite length, and either raw content bytes
//! or nested child packets. LDAP (RFC 4511 §5.1) only permits the definite
//! length form, so the decoder rejects indefinite lengths outright.
//!
//! The decoder never trusts a length prefix: every element is bounds-checked
//! against the bytes actually available, and child elements must fit exactly
//! inside their parent.

use std::borrow::Cow;

use thiserror::Error;

/// Maximum nesting depth accepted by the decoder.
pub const MAX_DEPTH: usize = 64;

/// Largest number of length octets accepted in the long length form.
const MAX_LENGTH_OCTETS: usize = 4;

/// Universal-class tag numbers used by LDAP.
pub mod universal {
    pub const BOOLEAN: u32 = 1;
    pub const INTEGER: u32 = 2;
    pub const OCTET_STRING: u32 = 4;
    pub const NULL: u32 = 5;
    pub const ENUMERATED: u32 = 10;
    pub const SEQUENCE: u32 = 16;
    pub const SET: u32 = 17;
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Structural violation found while decoding BER bytes.
///
/// Fatal to the element being decoded; the byte stream around it is otherwise
/// unaffected as long as framing was intact.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BerError {
    #[error("truncated identifier or length octets")]
    TruncatedHeader,
    #[error("truncated element: length prefix promises {expected} bytes, {available} available")]
    Truncated { expected: usize, available: usize },
    #[error("indefinite length encoding is not permitted")]
    IndefiniteLength,
    #[error("length field of {octets} octets exceeds supported size")]
    LengthOverflow { octets: usize },
    #[error("tag number does not fit in 32 bits")]
    TagOverflow,
    #[error("nesting deeper than {max} levels")]
    TooDeep { max: usize },
    #[error("{count} trailing bytes after element")]
    TrailingBytes { count: usize },
    #[error("unexpected shape: {0}")]
    UnexpectedShape(String),
    #[error("invalid integer encoding of {len} octets")]
    InvalidInteger { len: usize },
    #[error("invalid UTF-8 in string value")]
    InvalidUtf8,
    #[error("frame of {len} bytes exceeds limit of {max}")]
    FrameTooLarge { len: usize, max: usize },
}

// ---------------------------------------------------------------------------
// Identifier parts
// ---------------------------------------------------------------------------

/// Tag class, the top two bits of the identifier octet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
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

    fn from_identifier(octet: u8) -> Self {
        match octet & 0xC0 {
            0x00 => Class::Universal,
            0x40 => Class::Application,
            0x80 => Class::Context,
            _ => Class::Private,
        }
    }
}

/// Whether an element carries raw bytes or nested elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Primitive,
    Constructed,
}

/// Payload of a [`Packet`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Contents {
    Primitive(Vec<u8>),
    Constructed(Vec<Packet>),
}

// ---------------------------------------------------------------------------
// Packet
// ---------------------------------------------------------------------------

/// One BER element.
///
/// `description` is a human-readable label used in error messages and debug
/// output only; it is never encoded, and decoded packets carry an empty one.
#[derive(Debug, Clone)]
pub struct Packet {
    pub class: Class,
    pub tag: u32,
    pub contents: Contents,
    pub description: &'static str,
}

impl PartialEq for Packet {
    fn eq(&self, other: &Self) -> bool {
        self.class == other.class && self.tag == other.tag && self.contents == other.contents
    }
}

impl Eq for Packet {}

impl Packet {
    /// Creates a primitive element holding raw content bytes.
    #[must_use]
    pub fn primitive(
        class: Class,
        tag: u32,
        bytes: impl Into<Vec<u8>>,
        description: &'static str,
    ) -> Self {
        Self {
            class,
            tag,
            contents: Contents::Primitive(bytes.into()),
            description,
        }
    }

    /// Creates a constructed element holding child elements in order.
    #[must_use]
    pub fn constructed(
        class: Class,
        tag: u32,
        children: Vec<Packet>,
        description: &'static str,
    ) -> Self {
        Self {
            class,
            tag,
            contents: Contents::Constructed(children),
            description,
        }
    }

    #[must_use]
    pub fn octet_string(bytes: impl Into<Vec<u8>>, description: &'static str) -> Self {
        Self::primitive(Class::Universal, universal::OCTET_STRING, bytes, description)
    }

    #[must_use]
    pub fn integer(value: i64, description: &'static str) -> Self {
        Self::primitive(
            Class::Universal,
            universal::INTEGER,
            encode_integer(value),
            description,
        )
    }

    #[must_use]
    pub fn enumerated(value: i64, description: &'static str) -> Self {
        Self::primitive(
            Class::Universal,
            universal::ENUMERATED,
            encode_integer(value),
            description,
        )
    }

    #[must_use]
    pub fn boolean(value: bool, description: &'static str) -> Self {
        let octet = if value { 0xFF } else { 0x00 };
        Self::primitive(Class::Universal, universal::BOOLEAN, vec![octet], description)
    }

    #[must_use]
    pub fn sequence(children: Vec<Packet>, description: &'static str) -> Self {
        Self::constructed(Class::Universal, universal::SEQUENCE, children, description)
    }

    #[must_use]
    pub fn set(children: Vec<Packet>, description: &'static str) -> Self {
        Self::constructed(Class::Universal, universal::SET, children, description)
    }

    #[must_use]
    pub fn kind(&self) -> Kind {
        match self.contents {
            Contents::Primitive(_) => Kind::Primitive,
            Contents::Constructed(_) => Kind::Constructed,
        }
    }

    /// Returns `true` if this element has the given class and tag number.
    #[must_use]
    pub fn is(&self, class: Class, tag: u32) -> bool {
        self.class == class && self.tag == tag
    }

    // ---- Encoding ----

    /// Encodes this element and all of its children.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_into(&mut out);
        out
    }

    /// Appends the encoding of this element to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        let content: Cow<'_, [u8]> = match &self.contents {
            Contents::Primitive(bytes) => Cow::Borrowed(bytes),
            Contents::Constructed(children) => {
                let mut buf = Vec::new();
                for child in children {
                    child.encode_into(&mut buf);
                }
                Cow::Owned(buf)
            }
        };
        write_identifier(out, self.class, self.kind(), self.tag);
        write_length(out, content.len());
        out.extend_from_slice(&content);
    }

    // ---- Decoding ----

    /// Decodes the first element of `input`, returning it and the number of
    /// bytes it occupied.
    ///
    /// # Errors
    ///
    /// Returns a [`BerError`] if the header is incomplete, a length prefix is
    /// inconsistent with the available bytes, or nesting exceeds [`MAX_DEPTH`].
    pub fn decode(input: &[u8]) -> Result<(Packet, usize), BerError> {
        decode_element(input, 0)
    }

    /// Decodes exactly one element spanning all of `input`.
    ///
    /// # Errors
    ///
    /// As [`Packet::decode`], plus [`BerError::TrailingBytes`] if anything
    /// follows the element.
    pub fn decode_exact(input: &[u8]) -> Result<Packet, BerError> {
        let (packet, used) = Self::decode(input)?;
        if used == input.len() {
            Ok(packet)
        } else {
            Err(BerError::TrailingBytes {
                count: input.len() - used,
            })
        }
    }

    // ---- Accessors ----

    /// Raw content bytes of a primitive element.
    ///
    /// # Errors
    ///
    /// Returns [`BerError::UnexpectedShape`] for constructed elements.
    pub fn as_bytes(&self) -> Result<&[u8], BerError> {
        match &self.contents {
            Contents::Primitive(bytes) => Ok(bytes),
            Contents::Constructed(_) => Err(BerError::UnexpectedShape(format!(
                "{} is constructed, expected primitive",
                self.label()
            ))),
        }
    }

    /// Content bytes interpreted as a UTF-8 string.
    ///
    /// # Errors
    ///
    /// Returns [`BerError::InvalidUtf8`] if the bytes are not valid UTF-8.
    pub fn as_str(&self) -> Result<&str, BerError> {
        std::str::from_utf8(self.as_bytes()?).map_err(|_| BerError::InvalidUtf8)
    }

    /// Content bytes interpreted as a two's complement integer.
    ///
    /// # Errors
    ///
    /// Returns [`BerError::InvalidInteger`] for empty or over-long contents.
    pub fn as_integer(&self) -> Result<i64, BerError> {
        decode_integer(self.as_bytes()?)
    }

    /// Content bytes interpreted as a BOOLEAN (any non-zero octet is true).
    ///
    /// # Errors
    ///
    /// Returns [`BerError::UnexpectedShape`] unless the contents are one octet.
    pub fn as_bool(&self) -> Result<bool, BerError> {
        match self.as_bytes()? {
            [octet] => Ok(*octet != 0),
            other => Err(BerError::UnexpectedShape(format!(
                "boolean of {} octets",
                other.len()
            ))),
        }
    }

    /// Child elements of a constructed element.
    ///
    /// # Errors
    ///
    /// Returns [`BerError::UnexpectedShape`] for primitive elements.
    pub fn children(&self) -> Result<&[Packet], BerError> {
        match &self.contents {
            Contents::Constructed(children) => Ok(children),
            Contents::Primitive(_) => Err(BerError::UnexpectedShape(format!(
                "{} is primitive, expected constructed",
                self.label()
            ))),
        }
    }

    /// The child at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`BerError::UnexpectedShape`] if the element is primitive or
    /// has too few children.
    pub fn child(&self, index: usize) -> Result<&Packet, BerError> {
        self.children()?.get(index).ok_or_else(|| {
            BerError::UnexpectedShape(format!("{} has no child {index}", self.label()))
        })
    }

    fn label(&self) -> Cow<'static, str> {
        if self.description.is_empty() {
            Cow::Owned(format!("{:?} tag {}", self.class, self.tag))
        } else {
            Cow::Borrowed(self.description)
        }
    }
}

// ---------------------------------------------------------------------------
// Framing
// ---------------------------------------------------------------------------

/// Total encoded length of the first element in `input`, once its identifier
/// and length octets are available.
///
/// Returns `Ok(None)` while the header is still incomplete. The content bytes
/// themselves need not be present yet.
///
/// # Errors
///
/// Returns a [`BerError`] if the header itself is invalid (indefinite or
/// oversized length, tag overflow).
pub fn frame_len(input: &[u8]) -> Result<Option<usize>, BerError> {
    match read_header(input)? {
        Some(header) => header
            .header_len
            .checked_add(header.content_len)
            .map(Some)
            .ok_or(BerError::LengthOverflow {
                octets: MAX_LENGTH_OCTETS,
            }),
        None => Ok(None),
    }
}

struct Header {
    class: Class,
    constructed: bool,
    tag: u32,
    header_len: usize,
    content_len: usize,
}

fn read_header(input: &[u8]) -> Result<Option<Header>, BerError> {
    let Some(&first) = input.first() else {
        return Ok(None);
    };
    let mut pos = 1;

    let mut tag = u32::from(first & 0x1F);
    if tag == 0x1F {
        tag = 0;
        loop {
            let Some(&octet) = input.get(pos) else {
                return Ok(None);
            };
            pos += 1;
            if tag > (u32::MAX >> 7) {
                return Err(BerError::TagOverflow);
            }
            tag = (tag << 7) | u32::from(octet & 0x7F);
            if octet & 0x80 == 0 {
                break;
            }
        }
    }

    let Some(&length_octet) = input.get(pos) else {
        return Ok(None);
    };
    pos += 1;

    let content_len = if length_octet & 0x80 == 0 {
        usize::from(length_octet)
    } else {
        let octets = usize::from(length_octet & 0x7F);
        if octets == 0 {
            return Err(BerError::IndefiniteLength);
        }
        if octets > MAX_LENGTH_OCTETS {
            return Err(BerError::LengthOverflow { octets });
        }
        let Some(bytes) = input.get(pos..pos + octets) else {
            return Ok(None);
        };
        pos += octets;
        bytes
            .iter()
            .fold(0usize, |acc, octet| (acc << 8) | usize::from(*octet))
    };

    Ok(Some(Header {
        class: Class::from_identifier(first),
        constructed: first & 0x20 != 0,
        tag,
        header_len: pos,
        content_len,
    }))
}

fn decode_element(input: &[u8], depth: usize) -> Result<(Packet, usize), BerError> {
    if depth > MAX_DEPTH {
        return Err(BerError::TooDeep { max: MAX_DEPTH });
    }

    let header = read_header(input)?.ok_or(BerError::TruncatedHeader)?;
    let available = input.len() - header.header_len;
    if header.content_len > available {
        return Err(BerError::Truncated {
            expected: header.content_len,
            available,
        });
    }
    let end = header.header_len + header.content_len;
    let body = &input[header.header_len..end];

    let contents = if header.constructed {
        let mut children = Vec::new();
        let mut pos = 0;
        while pos < body.len() {
            let (child, used) = decode_element(&body[pos..], depth + 1)?;
            children.push(child);
            pos += used;
        }
        Contents::Constructed(children)
    } else {
        Contents::Primitive(body.to_vec())
    };

    let packet = Packet {
        class: header.class,
        tag: header.tag,
        contents,
        description: "",
    };
    Ok((packet, end))
}

#[allow(clippy::cast_possible_truncation)]
fn write_identifier(out: &mut Vec<u8>, class: Class, kind: Kind, tag: u32) {
    let mut first = class.bits();
    if kind == Kind::Constructed {
        first |= 0x20;
    }

    if tag < 0x1F {
        out.push(first | tag as u8);
        return;
    }

    out.push(first | 0x1F);
    let mut groups = Vec::with_capacity(5);
    let mut remaining = tag;
    loop {
        groups.push((remaining & 0x7F) as u8);
        remaining >>= 7;
        if remaining == 0 {
            break;
        }
    }
    let last = groups.len() - 1;
    for (i, group) in groups.iter().rev().enumerate() {
        out.push(if i < last { group | 0x80 } else { *group });
    }
}

#[allow(clippy::cast_possible_truncation)]
fn write_length(out: &mut Vec<u8>, len: usize) {
    if len < 0x80 {
        out.push(len as u8);
        return;
    }
    let bytes = len.to_be_bytes();
    let skip = bytes.iter().take_while(|octet| **octet == 0).count();
    let significant = &bytes[skip..];
    out.push(0x80 | significant.len() as u8);
    out.extend_from_slice(significant);
}

/// Minimal two's complement encoding.
fn encode_integer(value: i64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let mut start = 0;
    while start < bytes.len() - 1 {
        let redundant = (bytes[start] == 0x00 && bytes[start + 1] & 0x80 == 0)
            || (bytes[start] == 0xFF && bytes[start + 1] & 0x80 != 0);
        if !redundant {
            break;
        }
        start += 1;
    }
    bytes[start..].to_vec()
}

fn decode_integer(bytes: &[u8]) -> Result<i64, BerError> {
    if bytes.is_empty() || bytes.len() > 8 {
        return Err(BerError::InvalidInteger { len: bytes.len() });
    }
    let mut value: i64 = if bytes[0] & 0x80 != 0 { -1 } else { 0 };
    for octet in bytes {
        value = (value << 8) | i64::from(*octet);
    }
    Ok(value)
}
