//! Stream parser for the compositor side of the protocol.
//!
//! Produces a tagged-union command sequence with owned payloads; all
//! validation (magic, version, packet alignment/bounds, payload lengths)
//! happens here so the consumer can apply commands without re-checking.

use core::mem::size_of;

use thiserror::Error;

use mirage_raster::{BitsPerPixel, PackedImage, PixelRect, Point};

use crate::{
    decode_cmd_hdr_le, decode_stream_header_le, CmdArcTo, CmdBlendImage, CmdExtTextOut, CmdHdr,
    CmdLineTo, CmdMoveTo, CmdOpcode, CmdPatBlt, CmdPolyPolygon, CmdPolyPolyline, CmdPutImage,
    CmdRectangle, CmdSelectBrush, CmdSelectPen, CmdSetBoundsRect, CmdSetClip, CmdSetPoints,
    CmdSetSource, CmdStreamHeader, CmdStretchBlt, CMD_STREAM_MAGIC, PROTOCOL_VERSION,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StreamParseError {
    #[error("truncated command stream")]
    Truncated,
    #[error("bad stream magic {0:#010x}")]
    BadMagic(u32),
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u32),
    #[error("declared stream size {declared} does not match buffer length {actual}")]
    SizeMismatch { declared: u32, actual: usize },
    #[error("packet at offset {offset:#x} has bad size {size_bytes}")]
    BadPacketSize { offset: usize, size_bytes: u32 },
    #[error("unknown opcode {0:#x}")]
    UnknownOpcode(u32),
    #[error("unsupported source bit depth {0}")]
    UnsupportedBitDepth(u32),
    #[error("packet {opcode:?} payload too short: need {needed}, have {available}")]
    PayloadTooShort {
        opcode: CmdOpcode,
        needed: usize,
        available: usize,
    },
}

/// Parsed command with owned variable-length payloads.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DisplayCmd {
    Nop,
    DebugMarker {
        tag: u32,
    },
    SetSource {
        image: PackedImage,
    },
    SetPoints {
        points: Vec<Point>,
    },
    SetClip {
        rects: Vec<PixelRect>,
    },
    PutImage {
        dst: PixelRect,
        src: PixelRect,
        rop: u32,
    },
    BlendImage {
        dst: PixelRect,
        src: PixelRect,
        blend_fn: u32,
    },
    StretchBlt {
        dst: PixelRect,
        src: PixelRect,
        rop: u32,
    },
    PatBlt {
        dst: PixelRect,
        rop: u32,
        color: u32,
    },
    Rectangle {
        rect: PixelRect,
        pen_color: u32,
        brush_color: u32,
    },
    ArcTo {
        rect: PixelRect,
        start: Point,
        end: Point,
    },
    MoveTo {
        x: i32,
        y: i32,
    },
    LineTo {
        x: i32,
        y: i32,
    },
    PolyPolyline {
        counts: Vec<u32>,
    },
    PolyPolygon {
        counts: Vec<u32>,
    },
    ExtTextOut {
        x: i32,
        y: i32,
        flags: u32,
        rect: PixelRect,
        text: Vec<u16>,
    },
    SelectBrush {
        style: u32,
        color: u32,
    },
    SelectPen {
        style: u32,
        color: u32,
        width: u32,
    },
    SetBoundsRect {
        rect: PixelRect,
        flags: u32,
    },
    Flush,
}

struct PacketReader<'a> {
    body: &'a [u8],
    pos: usize,
    opcode: CmdOpcode,
}

impl<'a> PacketReader<'a> {
    fn new(opcode: CmdOpcode, packet: &'a [u8]) -> Self {
        Self {
            body: &packet[CmdHdr::SIZE_BYTES..],
            pos: 0,
            opcode,
        }
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8], StreamParseError> {
        let slice =
            self.body
                .get(self.pos..self.pos + len)
                .ok_or(StreamParseError::PayloadTooShort {
                    opcode: self.opcode,
                    needed: self.pos + len,
                    available: self.body.len(),
                })?;
        self.pos += len;
        Ok(slice)
    }

    fn u32(&mut self) -> Result<u32, StreamParseError> {
        let b = self.bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn i32(&mut self) -> Result<i32, StreamParseError> {
        Ok(self.u32()? as i32)
    }

    fn rect(&mut self) -> Result<PixelRect, StreamParseError> {
        Ok(PixelRect {
            left: self.i32()?,
            top: self.i32()?,
            right: self.i32()?,
            bottom: self.i32()?,
        })
    }

    fn point(&mut self) -> Result<Point, StreamParseError> {
        Ok(Point {
            x: self.i32()?,
            y: self.i32()?,
        })
    }

    fn skip(&mut self, len: usize) -> Result<(), StreamParseError> {
        self.bytes(len).map(|_| ())
    }

    /// Bounds-check a wire-declared element count against the remaining body.
    /// Must run before any allocation sized by the count.
    fn check_count(&self, count: usize, elem_size: usize) -> Result<(), StreamParseError> {
        let needed = self.pos.saturating_add(count.saturating_mul(elem_size));
        if needed > self.body.len() {
            return Err(StreamParseError::PayloadTooShort {
                opcode: self.opcode,
                needed,
                available: self.body.len(),
            });
        }
        Ok(())
    }
}

const fn body_size<T>() -> usize {
    size_of::<T>() - CmdHdr::SIZE_BYTES
}

fn parse_packet(opcode: CmdOpcode, packet: &[u8]) -> Result<DisplayCmd, StreamParseError> {
    let mut r = PacketReader::new(opcode, packet);
    Ok(match opcode {
        CmdOpcode::Nop => DisplayCmd::Nop,
        CmdOpcode::DebugMarker => DisplayCmd::DebugMarker { tag: r.u32()? },
        CmdOpcode::SetSource => {
            let bits_per_pixel = r.u32()?;
            let bpp = u8::try_from(bits_per_pixel)
                .ok()
                .and_then(BitsPerPixel::from_u8)
                .ok_or(StreamParseError::UnsupportedBitDepth(bits_per_pixel))?;
            let stride = r.u32()?;
            let rect = r.rect()?;
            let payload_len = stride as usize * rect.height().max(0) as usize;
            let bytes = r.bytes(payload_len)?.to_vec();
            DisplayCmd::SetSource {
                image: PackedImage {
                    bytes,
                    bpp,
                    stride,
                    rect,
                },
            }
        }
        CmdOpcode::SetPoints => {
            let count = r.u32()? as usize;
            r.skip(body_size::<CmdSetPoints>() - 4)?;
            r.check_count(count, 8)?;
            let mut points = Vec::with_capacity(count);
            for _ in 0..count {
                points.push(r.point()?);
            }
            DisplayCmd::SetPoints { points }
        }
        CmdOpcode::SetClip => {
            let rect_count = r.u32()? as usize;
            r.skip(body_size::<CmdSetClip>() - 4)?;
            r.check_count(rect_count, 16)?;
            let mut rects = Vec::with_capacity(rect_count);
            for _ in 0..rect_count {
                rects.push(r.rect()?);
            }
            DisplayCmd::SetClip { rects }
        }
        CmdOpcode::PutImage => DisplayCmd::PutImage {
            dst: r.rect()?,
            src: r.rect()?,
            rop: r.u32()?,
        },
        CmdOpcode::BlendImage => DisplayCmd::BlendImage {
            dst: r.rect()?,
            src: r.rect()?,
            blend_fn: r.u32()?,
        },
        CmdOpcode::StretchBlt => DisplayCmd::StretchBlt {
            dst: r.rect()?,
            src: r.rect()?,
            rop: r.u32()?,
        },
        CmdOpcode::PatBlt => DisplayCmd::PatBlt {
            dst: r.rect()?,
            rop: r.u32()?,
            color: r.u32()?,
        },
        CmdOpcode::Rectangle => DisplayCmd::Rectangle {
            rect: r.rect()?,
            pen_color: r.u32()?,
            brush_color: r.u32()?,
        },
        CmdOpcode::ArcTo => DisplayCmd::ArcTo {
            rect: r.rect()?,
            start: r.point()?,
            end: r.point()?,
        },
        CmdOpcode::MoveTo => DisplayCmd::MoveTo {
            x: r.i32()?,
            y: r.i32()?,
        },
        CmdOpcode::LineTo => DisplayCmd::LineTo {
            x: r.i32()?,
            y: r.i32()?,
        },
        CmdOpcode::PolyPolyline => {
            let poly_count = r.u32()? as usize;
            r.skip(body_size::<CmdPolyPolyline>() - 4)?;
            r.check_count(poly_count, 4)?;
            let mut counts = Vec::with_capacity(poly_count);
            for _ in 0..poly_count {
                counts.push(r.u32()?);
            }
            DisplayCmd::PolyPolyline { counts }
        }
        CmdOpcode::PolyPolygon => {
            let poly_count = r.u32()? as usize;
            r.skip(body_size::<CmdPolyPolygon>() - 4)?;
            r.check_count(poly_count, 4)?;
            let mut counts = Vec::with_capacity(poly_count);
            for _ in 0..poly_count {
                counts.push(r.u32()?);
            }
            DisplayCmd::PolyPolygon { counts }
        }
        CmdOpcode::ExtTextOut => {
            let x = r.i32()?;
            let y = r.i32()?;
            let flags = r.u32()?;
            let rect = r.rect()?;
            let count = r.u32()? as usize;
            let raw = r.bytes(count * 2)?;
            let text = raw
                .chunks_exact(2)
                .map(|c| u16::from_le_bytes([c[0], c[1]]))
                .collect();
            DisplayCmd::ExtTextOut {
                x,
                y,
                flags,
                rect,
                text,
            }
        }
        CmdOpcode::SelectBrush => DisplayCmd::SelectBrush {
            style: r.u32()?,
            color: r.u32()?,
        },
        CmdOpcode::SelectPen => DisplayCmd::SelectPen {
            style: r.u32()?,
            color: r.u32()?,
            width: r.u32()?,
        },
        CmdOpcode::SetBoundsRect => DisplayCmd::SetBoundsRect {
            rect: r.rect()?,
            flags: r.u32()?,
        },
        CmdOpcode::Flush => DisplayCmd::Flush,
    })
}

/// Parse one complete command stream into its command sequence.
pub fn parse_cmd_stream(bytes: &[u8]) -> Result<Vec<DisplayCmd>, StreamParseError> {
    let header = decode_stream_header_le(bytes).ok_or(StreamParseError::Truncated)?;
    if header.magic != CMD_STREAM_MAGIC {
        return Err(StreamParseError::BadMagic(header.magic));
    }
    if header.version != PROTOCOL_VERSION {
        return Err(StreamParseError::UnsupportedVersion(header.version));
    }
    if header.size_bytes as usize != bytes.len() {
        return Err(StreamParseError::SizeMismatch {
            declared: header.size_bytes,
            actual: bytes.len(),
        });
    }

    let mut cmds = Vec::new();
    let mut cursor = CmdStreamHeader::SIZE_BYTES;
    while cursor < bytes.len() {
        let hdr = decode_cmd_hdr_le(&bytes[cursor..]).ok_or(StreamParseError::Truncated)?;
        let size = hdr.size_bytes as usize;
        if size < CmdHdr::SIZE_BYTES || size % 4 != 0 || cursor + size > bytes.len() {
            return Err(StreamParseError::BadPacketSize {
                offset: cursor,
                size_bytes: hdr.size_bytes,
            });
        }
        let opcode =
            CmdOpcode::from_u32(hdr.opcode).ok_or(StreamParseError::UnknownOpcode(hdr.opcode))?;
        cmds.push(parse_packet(opcode, &bytes[cursor..cursor + size])?);
        cursor += size;
    }
    Ok(cmds)
}
