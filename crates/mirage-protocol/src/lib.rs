//! Compositor command stream layouts.
//!
//! The remote-serializing backend turns every intercepted drawing primitive
//! into a self-describing, length-prefixed command record; the compositor
//! process parses the stream back with [`parse_cmd_stream`]. Both ends are
//! built together, so the only compatibility contract is that these layouts
//! match within one build ([`PROTOCOL_VERSION`] is a tripwire, not a
//! negotiation).
//!
//! Every packet starts with [`CmdHdr`] (`opcode`, padded `size_bytes`) and is
//! 4-byte aligned; variable-length payloads (pixel bytes, point arrays,
//! UTF-16 text) follow the fixed fields with their lengths encoded in the
//! fixed fields.

mod parse;
mod writer;

pub use parse::{parse_cmd_stream, DisplayCmd, StreamParseError};
pub use writer::CmdWriter;

pub const CMD_STREAM_MAGIC: u32 = u32::from_le_bytes(*b"MCMD");
pub const PROTOCOL_VERSION: u32 = 1;

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct CmdStreamHeader {
    pub magic: u32,
    pub version: u32,
    pub size_bytes: u32,
    pub flags: u32,
    pub reserved0: u32,
    pub reserved1: u32,
}

impl CmdStreamHeader {
    pub const SIZE_BYTES: usize = 24;
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct CmdHdr {
    pub opcode: u32,
    pub size_bytes: u32,
}

impl CmdHdr {
    pub const SIZE_BYTES: usize = 8;
}

#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CmdOpcode {
    Nop = 0,
    DebugMarker = 1,

    // Dependent-state commands. The consumer keeps single-slot "current
    // source" / "current points" / "current clip" state overwritten by each
    // of these; the next primary command consumes it implicitly.
    SetSource = 0x100,
    SetPoints = 0x101,
    SetClip = 0x102,

    PutImage = 0x200,
    BlendImage = 0x201,
    StretchBlt = 0x202,
    PatBlt = 0x203,
    Rectangle = 0x204,
    ArcTo = 0x205,

    MoveTo = 0x300,
    LineTo = 0x301,
    PolyPolyline = 0x302,
    PolyPolygon = 0x303,

    ExtTextOut = 0x400,

    SelectBrush = 0x500,
    SelectPen = 0x501,
    SetBoundsRect = 0x502,

    Flush = 0x700,
}

impl CmdOpcode {
    pub const fn from_u32(v: u32) -> Option<Self> {
        Some(match v {
            0 => Self::Nop,
            1 => Self::DebugMarker,
            0x100 => Self::SetSource,
            0x101 => Self::SetPoints,
            0x102 => Self::SetClip,
            0x200 => Self::PutImage,
            0x201 => Self::BlendImage,
            0x202 => Self::StretchBlt,
            0x203 => Self::PatBlt,
            0x204 => Self::Rectangle,
            0x205 => Self::ArcTo,
            0x300 => Self::MoveTo,
            0x301 => Self::LineTo,
            0x302 => Self::PolyPolyline,
            0x303 => Self::PolyPolygon,
            0x400 => Self::ExtTextOut,
            0x500 => Self::SelectBrush,
            0x501 => Self::SelectPen,
            0x502 => Self::SetBoundsRect,
            0x700 => Self::Flush,
            _ => return None,
        })
    }
}

/// Rectangle as serialized on the wire (i32 LE edges, normalized).
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct WireRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

/// Point as serialized on the wire, already in device coordinates.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct WirePoint {
    pub x: i32,
    pub y: i32,
}

/* ------------------------- Dependent-state commands ------------------------ */

/// Followed by `stride * (rect.bottom - rect.top)` bytes of packed pixels.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct CmdSetSource {
    pub hdr: CmdHdr,
    pub bits_per_pixel: u32,
    pub stride: u32,
    pub rect: WireRect,
}

/// Followed by `count` [`WirePoint`]s.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct CmdSetPoints {
    pub hdr: CmdHdr,
    pub count: u32,
    pub reserved0: u32,
}

/// Followed by `rect_count` [`WireRect`]s; a count of zero clears clipping.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct CmdSetClip {
    pub hdr: CmdHdr,
    pub rect_count: u32,
    pub reserved0: u32,
}

/* ------------------------------ Image commands ----------------------------- */

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct CmdPutImage {
    pub hdr: CmdHdr,
    pub dst: WireRect,
    pub src: WireRect,
    pub rop: u32,
    pub reserved0: u32,
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct CmdBlendImage {
    pub hdr: CmdHdr,
    pub dst: WireRect,
    pub src: WireRect,
    pub blend_fn: u32,
    pub reserved0: u32,
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct CmdStretchBlt {
    pub hdr: CmdHdr,
    pub dst: WireRect,
    pub src: WireRect,
    pub rop: u32,
    pub reserved0: u32,
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct CmdPatBlt {
    pub hdr: CmdHdr,
    pub dst: WireRect,
    pub rop: u32,
    pub color: u32,
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct CmdRectangle {
    pub hdr: CmdHdr,
    pub rect: WireRect,
    pub pen_color: u32,
    pub brush_color: u32,
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct CmdArcTo {
    pub hdr: CmdHdr,
    pub rect: WireRect,
    pub start: WirePoint,
    pub end: WirePoint,
}

/* ------------------------------ Line commands ------------------------------ */

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct CmdMoveTo {
    pub hdr: CmdHdr,
    pub x: i32,
    pub y: i32,
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct CmdLineTo {
    pub hdr: CmdHdr,
    pub x: i32,
    pub y: i32,
}

/// Followed by `poly_count` u32 per-polyline point counts; the points
/// themselves come from the preceding `SetPoints` and are always re-sent in
/// full.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct CmdPolyPolyline {
    pub hdr: CmdHdr,
    pub poly_count: u32,
    pub reserved0: u32,
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct CmdPolyPolygon {
    pub hdr: CmdHdr,
    pub poly_count: u32,
    pub reserved0: u32,
}

/* ------------------------------ Text commands ------------------------------ */

/// Followed by `count * 2` bytes of UTF-16LE code units.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct CmdExtTextOut {
    pub hdr: CmdHdr,
    pub x: i32,
    pub y: i32,
    pub flags: u32,
    pub rect: WireRect,
    pub count: u32,
}

/* ------------------------------ State commands ----------------------------- */

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct CmdSelectBrush {
    pub hdr: CmdHdr,
    pub style: u32,
    pub color: u32,
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct CmdSelectPen {
    pub hdr: CmdHdr,
    pub style: u32,
    pub color: u32,
    pub width: u32,
    pub reserved0: u32,
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct CmdSetBoundsRect {
    pub hdr: CmdHdr,
    pub rect: WireRect,
    pub flags: u32,
    pub reserved0: u32,
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct CmdFlush {
    pub hdr: CmdHdr,
}

/// Decode a stream header from the front of `bytes` (little-endian fields).
pub fn decode_stream_header_le(bytes: &[u8]) -> Option<CmdStreamHeader> {
    let b = bytes.get(..CmdStreamHeader::SIZE_BYTES)?;
    let u32_at = |o: usize| u32::from_le_bytes([b[o], b[o + 1], b[o + 2], b[o + 3]]);
    Some(CmdStreamHeader {
        magic: u32_at(0),
        version: u32_at(4),
        size_bytes: u32_at(8),
        flags: u32_at(12),
        reserved0: u32_at(16),
        reserved1: u32_at(20),
    })
}

/// Decode a command header from the front of `bytes`.
pub fn decode_cmd_hdr_le(bytes: &[u8]) -> Option<CmdHdr> {
    let b = bytes.get(..CmdHdr::SIZE_BYTES)?;
    Some(CmdHdr {
        opcode: u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
        size_bytes: u32::from_le_bytes([b[4], b[5], b[6], b[7]]),
    })
}
